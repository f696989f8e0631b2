//! The request-driven donation sequence: submit, await inclusion, verify,
//! record.  One donation attempt is one suspendable sequence; there is no
//! background scheduler.  Verification is decoupled from submission, so a
//! hash can be confirmed minutes after the client gave up waiting.

use std::time::Duration;

use sqlx::SqlitePool;
use tracing::info;

use crate::amount::Amount;
use crate::chain::{explorer_tx_url, ChainAccess};
use crate::config::Config;
use crate::dispatch::{self, TransferConfig};
use crate::errors::{LedgerError, Result};
use crate::ledger::{self, Reconciliation, VerifiedDonation};
use crate::store::{self, Campaign};
use crate::verify::{self, Verification};

/// Identity details accompanying a donation when the donor is signed in.
#[derive(Debug, Clone, Default)]
pub struct DonorIdentity {
    pub auth_user_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug)]
pub struct DonationOutcome {
    pub transaction_hash: String,
    pub fee_transaction_hash: Option<String>,
    pub block_number: u64,
    pub timestamp_on_chain: i64,
    pub explorer_url: String,
    pub reconciliation: Reconciliation,
}

/// Full server-side flow for deployments with a node-managed sender account:
/// dispatch the transfer(s), wait for inclusion, verify, record.
pub async fn donate<C: ChainAccess + ?Sized>(
    chain: &C,
    pool: &SqlitePool,
    config: &Config,
    campaign_id: i64,
    donor_wallet: &str,
    amount: &Amount,
    identity: &DonorIdentity,
) -> Result<DonationOutcome> {
    let campaign = load_campaign(pool, campaign_id).await?;
    let transfer_config = TransferConfig::from_campaign(&campaign)?;

    let transfers = dispatch::send_donation(chain, &transfer_config, amount).await?;
    chain.await_inclusion(&transfers.donation_hash).await?;

    confirm_verified(
        chain,
        pool,
        config,
        &campaign,
        donor_wallet,
        amount,
        transfers.donation_hash,
        transfers.fee_hash,
        identity,
    )
    .await
}

/// Untrusted-client flow: the browser wallet signed and broadcast, the
/// service only received a hash.  Verification against the campaign's own
/// receiving address decides whether the hash is credited.
#[allow(clippy::too_many_arguments)]
pub async fn confirm<C: ChainAccess + ?Sized>(
    chain: &C,
    pool: &SqlitePool,
    config: &Config,
    campaign_id: i64,
    donor_wallet: &str,
    amount: &Amount,
    transaction_hash: &str,
    identity: &DonorIdentity,
) -> Result<DonationOutcome> {
    let campaign = load_campaign(pool, campaign_id).await?;
    confirm_verified(
        chain,
        pool,
        config,
        &campaign,
        donor_wallet,
        amount,
        transaction_hash.to_string(),
        None,
        identity,
    )
    .await
}

async fn load_campaign(pool: &SqlitePool, campaign_id: i64) -> Result<Campaign> {
    store::campaign_by_id(pool, campaign_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("campaign {campaign_id}")))
}

#[allow(clippy::too_many_arguments)]
async fn confirm_verified<C: ChainAccess + ?Sized>(
    chain: &C,
    pool: &SqlitePool,
    config: &Config,
    campaign: &Campaign,
    donor_wallet: &str,
    amount: &Amount,
    transaction_hash: String,
    fee_transaction_hash: Option<String>,
    identity: &DonorIdentity,
) -> Result<DonationOutcome> {
    let receiving = campaign.receiving_wallet_address.as_deref().ok_or_else(|| {
        LedgerError::InvalidConfiguration("campaign has no receiving wallet address".to_string())
    })?;

    let verification = verify::verify_with_retry(
        chain,
        &transaction_hash,
        receiving,
        amount,
        config.verify_retries,
        Duration::from_millis(config.verify_retry_delay_ms),
    )
    .await?;

    let (block_number, timestamp_on_chain) = match verification {
        Verification::Verified {
            block_number,
            timestamp,
        } => (block_number, timestamp),
        Verification::NotIndexed => {
            return Err(LedgerError::VerificationFailed(format!(
                "transaction {transaction_hash} was not indexed within the retry window"
            )));
        }
        Verification::Failed(reason) => {
            return Err(LedgerError::VerificationFailed(reason));
        }
    };

    let reconciliation = ledger::record(
        pool,
        &VerifiedDonation {
            campaign_id: campaign.id,
            donor_wallet: donor_wallet.to_string(),
            amount: amount.clone(),
            transaction_hash: transaction_hash.clone(),
            fee_transaction_hash: fee_transaction_hash.clone(),
            block_number,
            timestamp_on_chain,
            auth_user_id: identity.auth_user_id.clone(),
            email: identity.email.clone(),
        },
    )
    .await?;

    info!(
        "donation {transaction_hash} confirmed at block {block_number} for campaign {}",
        campaign.id
    );

    Ok(DonationOutcome {
        explorer_url: explorer_tx_url(&config.explorer_base_url, &transaction_hash),
        transaction_hash,
        fee_transaction_hash,
        block_number,
        timestamp_on_chain,
        reconciliation,
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::store::{memory_pool, NewCampaign};

    const RECEIVING: &str = "0xAa00000000000000000000000000000000000001";
    const FEE_ADDR: &str = "0xFe00000000000000000000000000000000000001";
    const DONOR: &str = "0xBb00000000000000000000000000000000000002";

    fn wei(s: &str) -> Amount {
        Amount::from_dec_str(s).unwrap()
    }

    fn test_config() -> Config {
        Config {
            rpc_url: String::new(),
            database_url: String::new(),
            api_port: 0,
            chain_id: 11155111,
            explorer_base_url: "https://sepolia.etherscan.io".to_string(),
            sender_address: Some("0xCc00000000000000000000000000000000000003".to_string()),
            verify_retries: 1,
            verify_retry_delay_ms: 1,
            inclusion_poll_ms: 1,
            inclusion_timeout_secs: 1,
        }
    }

    async fn seeded_campaign(pool: &SqlitePool, with_fee: bool) -> i64 {
        let fee_amount = with_fee.then(|| wei("10000000000000000"));
        store::insert_campaign(
            pool,
            &NewCampaign {
                title: "Flood Relief",
                goal_amount: &wei("5000000000000000000"),
                receiving_wallet_address: Some(RECEIVING),
                platform_fee_address: with_fee.then_some(FEE_ADDR),
                platform_fee_amount: fee_amount.as_ref(),
                is_featured: false,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn donate_happy_path_records_everything() {
        let pool = memory_pool().await;
        let chain = MockChain::new();
        let config = test_config();
        let campaign_id = seeded_campaign(&pool, false).await;
        let amount = wei("1000000000000000000");

        let outcome = donate(
            &chain,
            &pool,
            &config,
            campaign_id,
            DONOR,
            &amount,
            &DonorIdentity::default(),
        )
        .await
        .unwrap();

        assert!(outcome.fee_transaction_hash.is_none());
        assert!(outcome
            .explorer_url
            .starts_with("https://sepolia.etherscan.io/tx/0x"));
        assert!(outcome.reconciliation.warnings.is_empty());

        let campaign = store::campaign_by_id(&pool, campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, "1000000000000000000");

        let user = store::user_by_wallet(&pool, DONOR).await.unwrap().unwrap();
        assert_eq!(user.donation_count, 1);

        let stored = store::donation_by_hash(&pool, &outcome.transaction_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.block_number, Some(outcome.block_number as i64));
    }

    #[tokio::test]
    async fn donate_with_fee_records_both_hashes() {
        let pool = memory_pool().await;
        let chain = MockChain::new();
        let config = test_config();
        let campaign_id = seeded_campaign(&pool, true).await;

        let outcome = donate(
            &chain,
            &pool,
            &config,
            campaign_id,
            DONOR,
            &wei("1000000000000000000"),
            &DonorIdentity::default(),
        )
        .await
        .unwrap();

        let fee_hash = outcome.fee_transaction_hash.clone().unwrap();
        let submitted = chain.submitted.lock().unwrap();
        assert_eq!(submitted[0].0, FEE_ADDR);
        assert_eq!(submitted[1].0, RECEIVING);
        drop(submitted);

        // Only the donation transfer is the campaign's credited record, but
        // the fee hash is persisted alongside it.
        let stored = store::donation_by_hash(&pool, &outcome.transaction_hash)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fee_transaction_hash.as_deref(), Some(fee_hash.as_str()));

        let campaign = store::campaign_by_id(&pool, campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, "1000000000000000000");
    }

    #[tokio::test]
    async fn confirm_rejects_wrong_recipient_and_records_nothing() {
        let pool = memory_pool().await;
        let chain = MockChain::new();
        let config = test_config();
        let campaign_id = seeded_campaign(&pool, false).await;

        // The transfer really happened, but paid the wrong address.
        chain.stage_transfer(
            "0xrogue",
            "0xDd00000000000000000000000000000000000004",
            wei("1000000000000000000"),
            42,
            1_700_000_000,
            true,
        );

        let err = confirm(
            &chain,
            &pool,
            &config,
            campaign_id,
            DONOR,
            &wei("1000000000000000000"),
            "0xrogue",
            &DonorIdentity::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::VerificationFailed(_)));

        assert!(store::donation_by_hash(&pool, "0xrogue")
            .await
            .unwrap()
            .is_none());
        let campaign = store::campaign_by_id(&pool, campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, "0");
    }

    #[tokio::test]
    async fn confirm_accepts_client_reported_hash() {
        let pool = memory_pool().await;
        let chain = MockChain::new();
        let config = test_config();
        let campaign_id = seeded_campaign(&pool, false).await;

        chain.stage_transfer(
            "0xclient",
            RECEIVING,
            wei("1000000000000000000"),
            42,
            1_700_000_000,
            true,
        );

        let outcome = confirm(
            &chain,
            &pool,
            &config,
            campaign_id,
            DONOR,
            &wei("1000000000000000000"),
            "0xclient",
            &DonorIdentity::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.block_number, 42);
        assert_eq!(outcome.timestamp_on_chain, 1_700_000_000);
    }

    #[tokio::test]
    async fn unknown_campaign_is_not_found() {
        let pool = memory_pool().await;
        let chain = MockChain::new();
        let config = test_config();

        let err = confirm(
            &chain,
            &pool,
            &config,
            9999,
            DONOR,
            &wei("100"),
            "0xwhatever",
            &DonorIdentity::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }
}
