//! Chain Verifier — decides whether a transaction hash is creditable.
//!
//! A reported hash is only trusted once the mined transaction matches the
//! recipient the campaign configured and the amount the donor claimed.  The
//! check reads chain state only, never the database, so it is safe to call
//! repeatedly and long after the transfer was submitted.

use std::time::Duration;

use tracing::debug;

use crate::amount::Amount;
use crate::chain::{same_address, ChainAccess};
use crate::errors::Result;

/// Outcome of checking a transaction hash against expectations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Mined, succeeded, and matching recipient and amount.
    Verified { block_number: u64, timestamp: i64 },
    /// The node does not know the hash yet; worth retrying shortly.
    NotIndexed,
    /// Can never be credited: reverted, wrong recipient, or amount off.
    Failed(String),
}

pub async fn verify<C: ChainAccess + ?Sized>(
    chain: &C,
    hash: &str,
    expected_recipient: &str,
    expected_amount: &Amount,
) -> Result<Verification> {
    let Some(tx) = chain.transaction(hash).await? else {
        return Ok(Verification::NotIndexed);
    };

    let Some(receipt) = chain.transaction_receipt(hash).await? else {
        return Ok(Verification::Failed(format!(
            "no receipt for transaction {hash}"
        )));
    };
    if !receipt.succeeded {
        return Ok(Verification::Failed(format!("transaction {hash} reverted")));
    }

    // The recipient check is what keeps funds from being credited to the
    // wrong campaign; the amount tolerance below only absorbs display-side
    // rounding.
    match tx.to.as_deref() {
        Some(to) if same_address(to, expected_recipient) => {}
        other => {
            return Ok(Verification::Failed(format!(
                "recipient {other:?} does not match expected {expected_recipient}"
            )));
        }
    }

    // 1% symmetric tolerance: |actual - expected| <= expected / 100.
    let tolerance = expected_amount.one_percent();
    if tx.value.abs_diff(expected_amount) > tolerance {
        return Ok(Verification::Failed(format!(
            "amount {} outside tolerance of expected {expected_amount}",
            tx.value
        )));
    }

    let timestamp = chain
        .block_by_number(receipt.block_number)
        .await?
        .map(|b| b.timestamp)
        .unwrap_or(0);

    Ok(Verification::Verified {
        block_number: receipt.block_number,
        timestamp,
    })
}

/// Retry wrapper for hashes the node may not have indexed yet.  Backs off
/// exponentially from `base_delay` for up to `retries` extra attempts;
/// permanent failures and successes return immediately.
pub async fn verify_with_retry<C: ChainAccess + ?Sized>(
    chain: &C,
    hash: &str,
    expected_recipient: &str,
    expected_amount: &Amount,
    retries: u32,
    base_delay: Duration,
) -> Result<Verification> {
    let mut delay = base_delay;
    let mut attempt = 0u32;

    loop {
        let outcome = verify(chain, hash, expected_recipient, expected_amount).await?;
        if outcome != Verification::NotIndexed || attempt >= retries {
            return Ok(outcome);
        }
        attempt += 1;
        debug!("transaction {hash} not indexed yet (attempt {attempt}), retrying in {delay:?}");
        tokio::time::sleep(delay).await;
        delay *= 2;
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
