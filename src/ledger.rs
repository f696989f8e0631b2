//! Reconciliation Recorder — writes a verified donation into the off-chain
//! ledger.
//!
//! The Donation row is the immutable proof of transfer and is written first;
//! campaign and donor aggregates are derived data, repairable by replaying
//! reconciliation from the donations table.  A failure in either aggregate
//! update is therefore a warning, never a reason to un-confirm a donation.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::amount::Amount;
use crate::errors::Result;
use crate::store::{self, NewDonation};

/// A donation that has passed on-chain verification and is ready to be
/// recorded.
#[derive(Debug, Clone)]
pub struct VerifiedDonation {
    pub campaign_id: i64,
    pub donor_wallet: String,
    pub amount: Amount,
    pub transaction_hash: String,
    pub fee_transaction_hash: Option<String>,
    pub block_number: u64,
    pub timestamp_on_chain: i64,
    pub auth_user_id: Option<String>,
    pub email: Option<String>,
}

/// What the recorder managed to do.  `warnings` carries partial-failure
/// notes that are logged for manual repair.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub donation_recorded: bool,
    pub duplicate: bool,
    pub warnings: Vec<String>,
}

pub async fn record(pool: &SqlitePool, donation: &VerifiedDonation) -> Result<Reconciliation> {
    let mut outcome = Reconciliation::default();

    // The transaction hash is the idempotence key: a hash that was already
    // credited must not move the aggregates again.
    let inserted = store::insert_confirmed_donation(
        pool,
        &NewDonation {
            campaign_id: donation.campaign_id,
            donor_wallet: &donation.donor_wallet,
            amount: &donation.amount,
            transaction_hash: &donation.transaction_hash,
            fee_transaction_hash: donation.fee_transaction_hash.as_deref(),
            block_number: donation.block_number as i64,
            timestamp_on_chain: donation.timestamp_on_chain,
        },
    )
    .await?;

    if !inserted {
        info!(
            "donation {} already recorded, skipping aggregates",
            donation.transaction_hash
        );
        outcome.duplicate = true;
        return Ok(outcome);
    }
    outcome.donation_recorded = true;

    match store::add_to_campaign_total(pool, donation.campaign_id, &donation.amount).await {
        Ok(true) => {}
        Ok(false) => {
            let msg = format!(
                "campaign {} not found; donation {} recorded without campaign total update",
                donation.campaign_id, donation.transaction_hash
            );
            warn!("{msg}");
            outcome.warnings.push(msg);
        }
        Err(e) => {
            let msg = format!(
                "campaign total update failed for donation {}: {e}",
                donation.transaction_hash
            );
            warn!("{msg}");
            outcome.warnings.push(msg);
        }
    }

    if let Err(e) = credit_donor(pool, donation).await {
        let msg = format!(
            "donor statistics update failed for donation {}: {e}",
            donation.transaction_hash
        );
        warn!("{msg}");
        outcome.warnings.push(msg);
    }

    Ok(outcome)
}

/// Resolve which User row the donation belongs to and apply it.
///
/// A wallet match wins.  Failing that, an auth-identity match gains the
/// wallet.  With neither, a new row is created from whatever identifiers
/// are present.  A wallet-keyed row without an auth link picks one up when
/// the caller supplies it, so the same donor never splits into two rows.
async fn credit_donor(pool: &SqlitePool, donation: &VerifiedDonation) -> Result<()> {
    let wallet = donation.donor_wallet.as_str();

    if let Some(user) = store::user_by_wallet(pool, wallet).await? {
        if let Some(auth_id) = donation.auth_user_id.as_deref() {
            if user.auth_user_id.is_none() {
                store::link_auth_identity(pool, user.id, auth_id, donation.email.as_deref())
                    .await?;
            }
        }
        return store::apply_user_donation(
            pool,
            user.id,
            &donation.amount,
            donation.timestamp_on_chain,
        )
        .await;
    }

    if let Some(auth_id) = donation.auth_user_id.as_deref() {
        if let Some(user) = store::user_by_auth(pool, auth_id).await? {
            store::set_user_wallet(pool, user.id, wallet).await?;
            return store::apply_user_donation(
                pool,
                user.id,
                &donation.amount,
                donation.timestamp_on_chain,
            )
            .await;
        }
    }

    let user_id = store::insert_user(
        pool,
        donation.auth_user_id.as_deref(),
        donation.email.as_deref(),
        Some(wallet),
    )
    .await?;
    store::apply_user_donation(pool, user_id, &donation.amount, donation.timestamp_on_chain).await
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{memory_pool, NewCampaign};

    const WALLET: &str = "0xBb00000000000000000000000000000000000002";

    fn wei(s: &str) -> Amount {
        Amount::from_dec_str(s).unwrap()
    }

    async fn seeded_campaign(pool: &SqlitePool) -> i64 {
        store::insert_campaign(
            pool,
            &NewCampaign {
                title: "Flood Relief",
                goal_amount: &wei("5000000000000000000"),
                receiving_wallet_address: Some("0xAa00000000000000000000000000000000000001"),
                platform_fee_address: None,
                platform_fee_amount: None,
                is_featured: false,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn verified(campaign_id: i64, hash: &str) -> VerifiedDonation {
        VerifiedDonation {
            campaign_id,
            donor_wallet: WALLET.to_string(),
            amount: wei("1000000000000000000"),
            transaction_hash: hash.to_string(),
            fee_transaction_hash: None,
            block_number: 42,
            timestamp_on_chain: 1_700_000_000,
            auth_user_id: None,
            email: None,
        }
    }

    #[tokio::test]
    async fn records_and_updates_aggregates() {
        let pool = memory_pool().await;
        let campaign_id = seeded_campaign(&pool).await;

        let outcome = record(&pool, &verified(campaign_id, "0xh1")).await.unwrap();
        assert!(outcome.donation_recorded);
        assert!(!outcome.duplicate);
        assert!(outcome.warnings.is_empty());

        let campaign = store::campaign_by_id(&pool, campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, "1000000000000000000");

        let user = store::user_by_wallet(&pool, WALLET).await.unwrap().unwrap();
        assert_eq!(user.total_donated, "1000000000000000000");
        assert_eq!(user.donation_count, 1);
        assert_eq!(user.first_donation_at, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn recording_twice_does_not_double_credit() {
        let pool = memory_pool().await;
        let campaign_id = seeded_campaign(&pool).await;
        let donation = verified(campaign_id, "0xh1");

        record(&pool, &donation).await.unwrap();
        let second = record(&pool, &donation).await.unwrap();
        assert!(second.duplicate);
        assert!(!second.donation_recorded);

        let campaign = store::campaign_by_id(&pool, campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, "1000000000000000000");
        let user = store::user_by_wallet(&pool, WALLET).await.unwrap().unwrap();
        assert_eq!(user.donation_count, 1);
    }

    #[tokio::test]
    async fn missing_campaign_still_records_donation() {
        let pool = memory_pool().await;

        let outcome = record(&pool, &verified(9999, "0xh1")).await.unwrap();
        assert!(outcome.donation_recorded);
        assert_eq!(outcome.warnings.len(), 1);

        let stored = store::donation_by_hash(&pool, "0xh1").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn wallet_user_gains_auth_link() {
        let pool = memory_pool().await;
        let campaign_id = seeded_campaign(&pool).await;
        store::insert_user(&pool, None, None, Some(WALLET))
            .await
            .unwrap();

        let mut donation = verified(campaign_id, "0xh1");
        donation.auth_user_id = Some("auth-1".to_string());
        donation.email = Some("donor@example.org".to_string());
        record(&pool, &donation).await.unwrap();

        let user = store::user_by_wallet(&pool, WALLET).await.unwrap().unwrap();
        assert_eq!(user.auth_user_id.as_deref(), Some("auth-1"));
        assert_eq!(user.email.as_deref(), Some("donor@example.org"));
        assert_eq!(user.donation_count, 1);

        // No second row appeared for the auth identity.
        let by_auth = store::user_by_auth(&pool, "auth-1").await.unwrap().unwrap();
        assert_eq!(by_auth.id, user.id);
    }

    #[tokio::test]
    async fn auth_user_gains_wallet() {
        let pool = memory_pool().await;
        let campaign_id = seeded_campaign(&pool).await;
        let existing = store::insert_user(&pool, Some("auth-1"), Some("donor@example.org"), None)
            .await
            .unwrap();

        let mut donation = verified(campaign_id, "0xh1");
        donation.auth_user_id = Some("auth-1".to_string());
        record(&pool, &donation).await.unwrap();

        let user = store::user_by_wallet(&pool, WALLET).await.unwrap().unwrap();
        assert_eq!(user.id, existing);
        assert_eq!(user.total_donated, "1000000000000000000");
    }

    #[tokio::test]
    async fn anonymous_donor_gets_wallet_only_row() {
        let pool = memory_pool().await;
        let campaign_id = seeded_campaign(&pool).await;

        record(&pool, &verified(campaign_id, "0xh1")).await.unwrap();

        let user = store::user_by_wallet(&pool, WALLET).await.unwrap().unwrap();
        assert!(user.auth_user_id.is_none());
        assert_eq!(user.donation_count, 1);
    }

    #[tokio::test]
    async fn campaign_total_addition_survives_f64_range() {
        let pool = memory_pool().await;
        let campaign_id = seeded_campaign(&pool).await;
        sqlx::query("UPDATE campaigns SET current_amount = '9007199254740993' WHERE id = ?1")
            .bind(campaign_id)
            .execute(&pool)
            .await
            .unwrap();

        record(&pool, &verified(campaign_id, "0xh1")).await.unwrap();

        let campaign = store::campaign_by_id(&pool, campaign_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(campaign.current_amount, "1009007199254740993");
    }
}
