//! Database layer — migrations, records, and per-entity queries.
//!
//! Amount columns hold decimal wei strings; SQL arithmetic on them would
//! silently truncate past i64, so increments are computed in [`Amount`] and
//! applied with a compare-and-swap `UPDATE` retried on conflict.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::amount::Amount;
use crate::errors::{LedgerError, Result};

/// Attempts before a contended compare-and-swap update gives up.
const CAS_ATTEMPTS: u32 = 8;

pub const DONATION_CONFIRMED: &str = "confirmed";
pub const CAMPAIGN_ACTIVE: &str = "active";

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub title: String,
    pub goal_amount: String,
    pub current_amount: String,
    pub receiving_wallet_address: Option<String>,
    pub platform_fee_address: Option<String>,
    pub platform_fee_amount: Option<String>,
    pub status: String,
    pub is_featured: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: i64,
    pub campaign_id: i64,
    pub donor_wallet: String,
    pub amount: String,
    pub transaction_hash: String,
    pub fee_transaction_hash: Option<String>,
    pub block_number: Option<i64>,
    pub timestamp_on_chain: Option<i64>,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub auth_user_id: Option<String>,
    pub email: Option<String>,
    pub wallet_address: Option<String>,
    pub total_donated: String,
    pub donation_count: i64,
    pub first_donation_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ─────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct NewCampaign<'a> {
    pub title: &'a str,
    pub goal_amount: &'a Amount,
    pub receiving_wallet_address: Option<&'a str>,
    pub platform_fee_address: Option<&'a str>,
    pub platform_fee_amount: Option<&'a Amount>,
    pub is_featured: bool,
}

pub async fn insert_campaign(pool: &SqlitePool, c: &NewCampaign<'_>) -> Result<Campaign> {
    let ts = now();
    let id = sqlx::query(
        r#"
        INSERT INTO campaigns
            (title, goal_amount, current_amount, receiving_wallet_address,
             platform_fee_address, platform_fee_amount, status, is_featured,
             created_at, updated_at)
        VALUES (?1, ?2, '0', ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
    )
    .bind(c.title)
    .bind(c.goal_amount.to_string())
    .bind(c.receiving_wallet_address)
    .bind(c.platform_fee_address)
    .bind(c.platform_fee_amount.map(|a| a.to_string()))
    .bind(CAMPAIGN_ACTIVE)
    .bind(c.is_featured)
    .bind(ts)
    .execute(pool)
    .await?
    .last_insert_rowid();

    campaign_by_id(pool, id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("campaign {id} just inserted")))
}

pub async fn campaign_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Campaign>> {
    let row = sqlx::query_as::<_, Campaign>(
        r#"
        SELECT id, title, goal_amount, current_amount, receiving_wallet_address,
               platform_fee_address, platform_fee_amount, status, is_featured,
               created_at, updated_at
        FROM   campaigns
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Add `amount` to the campaign's running total with exact arithmetic.
///
/// Returns `Ok(false)` when the campaign does not exist — the caller treats
/// that as a reconciliation warning, not a failure.  Concurrent donations to
/// the same campaign are handled by re-reading and retrying when the guarded
/// `UPDATE` touches no row.
pub async fn add_to_campaign_total(
    pool: &SqlitePool,
    campaign_id: i64,
    amount: &Amount,
) -> Result<bool> {
    for _ in 0..CAS_ATTEMPTS {
        let Some(campaign) = campaign_by_id(pool, campaign_id).await? else {
            return Ok(false);
        };
        let current = Amount::from_dec_str(&campaign.current_amount)?;
        let next = current.plus(amount);

        let updated = sqlx::query(
            r#"
            UPDATE campaigns
            SET    current_amount = ?1, updated_at = ?2
            WHERE  id = ?3 AND current_amount = ?4
            "#,
        )
        .bind(next.to_string())
        .bind(now())
        .bind(campaign_id)
        .bind(&campaign.current_amount)
        .execute(pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(true);
        }
    }
    Err(LedgerError::Reconciliation(format!(
        "campaign {campaign_id} total update kept conflicting"
    )))
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct NewDonation<'a> {
    pub campaign_id: i64,
    pub donor_wallet: &'a str,
    pub amount: &'a Amount,
    pub transaction_hash: &'a str,
    pub fee_transaction_hash: Option<&'a str>,
    pub block_number: i64,
    pub timestamp_on_chain: i64,
}

/// Persist a confirmed donation.  A row with the same `transaction_hash` is
/// silently ignored so retries never double-credit.  Returns whether a new
/// row was written.
pub async fn insert_confirmed_donation(pool: &SqlitePool, d: &NewDonation<'_>) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        INSERT OR IGNORE INTO donations
            (campaign_id, donor_wallet, amount, transaction_hash,
             fee_transaction_hash, block_number, timestamp_on_chain,
             status, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(d.campaign_id)
    .bind(d.donor_wallet)
    .bind(d.amount.to_string())
    .bind(d.transaction_hash)
    .bind(d.fee_transaction_hash)
    .bind(d.block_number)
    .bind(d.timestamp_on_chain)
    .bind(DONATION_CONFIRMED)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(rows_affected == 1)
}

pub async fn donation_by_hash(pool: &SqlitePool, hash: &str) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, campaign_id, donor_wallet, amount, transaction_hash,
               fee_transaction_hash, block_number, timestamp_on_chain,
               status, created_at
        FROM   donations
        WHERE  transaction_hash = ?1
        "#,
    )
    .bind(hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn donations_for_campaign(pool: &SqlitePool, campaign_id: i64) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, Donation>(
        r#"
        SELECT id, campaign_id, donor_wallet, amount, transaction_hash,
               fee_transaction_hash, block_number, timestamp_on_chain,
               status, created_at
        FROM   donations
        WHERE  campaign_id = ?1
        ORDER  BY created_at DESC, id DESC
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(Debug, Default)]
pub struct DonationFilter {
    pub campaign_id: Option<i64>,
    pub donor_wallet: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_donations(pool: &SqlitePool, filter: &DonationFilter) -> Result<Vec<Donation>> {
    let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
        "SELECT id, campaign_id, donor_wallet, amount, transaction_hash, \
         fee_transaction_hash, block_number, timestamp_on_chain, status, created_at \
         FROM donations WHERE 1=1",
    );
    if let Some(id) = filter.campaign_id {
        qb.push(" AND campaign_id = ").push_bind(id);
    }
    if let Some(wallet) = &filter.donor_wallet {
        qb.push(" AND donor_wallet = ").push_bind(wallet.clone());
    }
    if let Some(status) = &filter.status {
        qb.push(" AND status = ").push_bind(status.clone());
    }
    qb.push(" ORDER BY created_at DESC, id DESC");
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }

    let rows = qb.build_query_as::<Donation>().fetch_all(pool).await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

pub async fn user_by_id(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        r#"
        SELECT id, auth_user_id, email, wallet_address, total_donated,
               donation_count, first_donation_at, created_at, updated_at
        FROM   users
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn user_by_wallet(pool: &SqlitePool, wallet: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        r#"
        SELECT id, auth_user_id, email, wallet_address, total_donated,
               donation_count, first_donation_at, created_at, updated_at
        FROM   users
        WHERE  wallet_address = ?1
        "#,
    )
    .bind(wallet)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn user_by_auth(pool: &SqlitePool, auth_user_id: &str) -> Result<Option<User>> {
    let row = sqlx::query_as::<_, User>(
        r#"
        SELECT id, auth_user_id, email, wallet_address, total_donated,
               donation_count, first_donation_at, created_at, updated_at
        FROM   users
        WHERE  auth_user_id = ?1
        "#,
    )
    .bind(auth_user_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Create a user with zeroed donation statistics.
pub async fn insert_user(
    pool: &SqlitePool,
    auth_user_id: Option<&str>,
    email: Option<&str>,
    wallet_address: Option<&str>,
) -> Result<i64> {
    let ts = now();
    let id = sqlx::query(
        r#"
        INSERT INTO users
            (auth_user_id, email, wallet_address, total_donated, donation_count,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, '0', 0, ?4, ?4)
        "#,
    )
    .bind(auth_user_id)
    .bind(email)
    .bind(wallet_address)
    .bind(ts)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Apply one confirmed donation to a user's cumulative statistics.
pub async fn apply_user_donation(
    pool: &SqlitePool,
    user_id: i64,
    amount: &Amount,
    timestamp_on_chain: i64,
) -> Result<()> {
    for _ in 0..CAS_ATTEMPTS {
        let Some(user) = user_by_id(pool, user_id).await? else {
            return Err(LedgerError::Reconciliation(format!(
                "user {user_id} disappeared during reconciliation"
            )));
        };
        let total = Amount::from_dec_str(&user.total_donated)?;
        let next = total.plus(amount);

        let updated = sqlx::query(
            r#"
            UPDATE users
            SET    total_donated = ?1,
                   donation_count = donation_count + 1,
                   first_donation_at = COALESCE(first_donation_at, ?2),
                   updated_at = ?3
            WHERE  id = ?4 AND total_donated = ?5
            "#,
        )
        .bind(next.to_string())
        .bind(timestamp_on_chain)
        .bind(now())
        .bind(user_id)
        .bind(&user.total_donated)
        .execute(pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }
    }
    Err(LedgerError::Reconciliation(format!(
        "user {user_id} statistics update kept conflicting"
    )))
}

/// Attach an auth identity to a wallet-keyed user that has none yet.
pub async fn link_auth_identity(
    pool: &SqlitePool,
    user_id: i64,
    auth_user_id: &str,
    email: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET    auth_user_id = ?1, email = COALESCE(email, ?2), updated_at = ?3
        WHERE  id = ?4 AND auth_user_id IS NULL
        "#,
    )
    .bind(auth_user_id)
    .bind(email)
    .bind(now())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Attach a wallet to an auth-keyed user that has none yet.
pub async fn set_user_wallet(pool: &SqlitePool, user_id: i64, wallet: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET    wallet_address = ?1, updated_at = ?2
        WHERE  id = ?3 AND wallet_address IS NULL
        "#,
    )
    .bind(wallet)
    .bind(now())
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Verification codes
// ─────────────────────────────────────────────────────────

/// Issue a six-digit sign-in code for `address`, replacing any previous one.
/// Delivery is the caller's concern; only storage and expiry live here.
pub async fn issue_verification_code(
    pool: &SqlitePool,
    address: &str,
    ttl_secs: i64,
) -> Result<String> {
    use rand::Rng;
    let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));

    sqlx::query(
        r#"
        INSERT INTO verification_codes (address, code, expires_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(address) DO UPDATE SET code = excluded.code, expires_at = excluded.expires_at
        "#,
    )
    .bind(address)
    .bind(&code)
    .bind(now() + ttl_secs)
    .execute(pool)
    .await?;

    Ok(code)
}

/// Single-use: a matching, unexpired code is deleted as it is consumed.
pub async fn consume_verification_code(
    pool: &SqlitePool,
    address: &str,
    code: &str,
) -> Result<bool> {
    let deleted = sqlx::query(
        "DELETE FROM verification_codes WHERE address = ?1 AND code = ?2 AND expires_at > ?3",
    )
    .bind(address)
    .bind(code)
    .bind(now())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(deleted == 1)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // One connection: each `sqlite::memory:` connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
