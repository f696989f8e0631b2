//! Transfer Dispatcher — turns one donation into one or two native transfers.
//!
//! When a platform fee is configured the fee transfer goes out first and must
//! be included before the donation transfer is submitted.  If the fee
//! transfer fails or the signer rejects it, the donation transfer is never
//! sent, so neither leg can silently go missing while the other lands.

use tracing::info;

use crate::amount::Amount;
use crate::chain::{is_address, ChainAccess};
use crate::errors::{LedgerError, Result};
use crate::store::Campaign;

/// The transfer-relevant slice of a campaign's configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub receiving_address: String,
    pub platform_fee_address: Option<String>,
    pub platform_fee_amount: Option<Amount>,
}

/// Hashes produced by one dispatched donation.  `donation_hash` is the
/// primary key of the donation record; the fee hash is kept alongside it so
/// the fee payment has a durable on-chain cross-reference too.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub donation_hash: String,
    pub fee_hash: Option<String>,
}

impl TransferConfig {
    pub fn from_campaign(campaign: &Campaign) -> Result<Self> {
        let receiving = campaign.receiving_wallet_address.clone().ok_or_else(|| {
            LedgerError::InvalidConfiguration(
                "campaign has no receiving wallet address".to_string(),
            )
        })?;
        let fee_amount = campaign
            .platform_fee_amount
            .as_deref()
            .map(Amount::from_dec_str)
            .transpose()?;
        Ok(TransferConfig {
            receiving_address: receiving,
            platform_fee_address: campaign.platform_fee_address.clone(),
            platform_fee_amount: fee_amount,
        })
    }

    /// Fee address and amount must be configured together, with a positive
    /// amount and a well-formed address.
    fn fee(&self) -> Result<Option<(&str, &Amount)>> {
        match (&self.platform_fee_address, &self.platform_fee_amount) {
            (None, None) => Ok(None),
            (Some(address), Some(amount)) => {
                if !is_address(address) {
                    return Err(LedgerError::InvalidConfiguration(format!(
                        "invalid platform fee address {address:?}"
                    )));
                }
                if amount.is_zero() {
                    return Err(LedgerError::InvalidConfiguration(
                        "platform fee amount must be positive".to_string(),
                    ));
                }
                Ok(Some((address.as_str(), amount)))
            }
            _ => Err(LedgerError::InvalidConfiguration(
                "platform fee address and amount must be set together".to_string(),
            )),
        }
    }
}

/// Submit the transfer(s) for one donation and return their hashes.
pub async fn send_donation<C: ChainAccess + ?Sized>(
    chain: &C,
    config: &TransferConfig,
    donation_amount: &Amount,
) -> Result<TransferOutcome> {
    if !is_address(&config.receiving_address) {
        return Err(LedgerError::InvalidConfiguration(format!(
            "invalid receiving wallet address {:?}",
            config.receiving_address
        )));
    }
    if donation_amount.is_zero() {
        return Err(LedgerError::Amount(
            "donation amount must be positive".to_string(),
        ));
    }

    let fee_hash = match config.fee()? {
        Some((fee_address, fee_amount)) => {
            let hash = chain.submit_transfer(fee_address, fee_amount).await?;
            chain.await_inclusion(&hash).await?;
            info!("platform fee transfer {hash} included");
            Some(hash)
        }
        None => None,
    };

    let donation_hash = chain
        .submit_transfer(&config.receiving_address, donation_amount)
        .await?;
    info!(
        "donation transfer {donation_hash} submitted to {}",
        config.receiving_address
    );

    Ok(TransferOutcome {
        donation_hash,
        fee_hash,
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
