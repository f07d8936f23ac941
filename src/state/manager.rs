//! PostgreSQL state manager

use crate::account::{AccountConfig, AccountStore};
use crate::config::DatabaseConfig;
use crate::error::{KeeperError, KeeperResult};
use crate::events::AccountEvent;
use crate::order::Order;
use crate::registry::{RegistryEntry, ValidatorRecord, ValidatorRegistry};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

/// State manager for PostgreSQL persistence of one account
pub struct StateManager {
    pool: PgPool,
    /// Account whose rows this manager reads and writes
    account: Address,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig, account: Address) -> KeeperResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool, account })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> KeeperResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keeper_account (
                account BYTEA PRIMARY KEY,
                owner BYTEA NOT NULL,
                app_data BYTEA NOT NULL,
                domain_separator BYTEA NOT NULL,
                settlement BYTEA NOT NULL,
                initialized_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS validator_registry (
                account BYTEA NOT NULL,
                namespace BYTEA NOT NULL,
                seq BIGINT NOT NULL,
                deposit_id BYTEA NOT NULL,
                pubkey BYTEA NOT NULL,
                signature BYTEA NOT NULL,
                PRIMARY KEY (account, namespace, seq),
                UNIQUE (account, namespace, deposit_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_events (
                id BIGSERIAL PRIMARY KEY,
                account BYTEA NOT NULL,
                event_type VARCHAR(50) NOT NULL,
                event_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_account_type
            ON account_events (account, event_type)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS proposed_orders (
                uid BYTEA PRIMARY KEY,
                account BYTEA NOT NULL,
                valid_to BIGINT NOT NULL,
                order_data JSONB NOT NULL,
                proposed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> KeeperResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Stored account configuration, if the account was initialized
    pub async fn load_account(&self) -> KeeperResult<Option<AccountConfig>> {
        let row = sqlx::query(
            r#"
            SELECT owner, app_data, domain_separator, settlement
            FROM keeper_account
            WHERE account = $1
            "#,
        )
        .bind(self.account.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> KeeperResult<AccountConfig> {
            Ok(AccountConfig {
                owner: address_column(&row, "owner")?,
                app_data: hash_column(&row, "app_data")?,
                domain_separator: hash_column(&row, "domain_separator")?,
                settlement: address_column(&row, "settlement")?,
            })
        })
        .transpose()
    }

    /// Rebuild the registry stored under `namespace`
    pub async fn load_registry(&self, namespace: H256) -> KeeperResult<ValidatorRegistry> {
        let rows = sqlx::query(
            r#"
            SELECT seq, deposit_id, pubkey, signature
            FROM validator_registry
            WHERE account = $1 AND namespace = $2
            ORDER BY seq
            "#,
        )
        .bind(self.account.as_bytes())
        .bind(namespace.as_bytes())
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .iter()
            .map(|row| -> KeeperResult<RegistryEntry> {
                let seq: i64 = row.try_get("seq")?;
                Ok(RegistryEntry {
                    seq: u64::try_from(seq)
                        .map_err(|_| KeeperError::Internal(format!("negative sequence {}", seq)))?,
                    id: hash_column(row, "deposit_id")?,
                    record: ValidatorRecord {
                        pubkey: Bytes::from(row.try_get::<Vec<u8>, _>("pubkey")?),
                        signature: Bytes::from(row.try_get::<Vec<u8>, _>("signature")?),
                    },
                })
            })
            .collect::<KeeperResult<Vec<_>>>()?;

        debug!("Loaded {} registry entries", entries.len());
        ValidatorRegistry::from_entries(entries)
    }

    /// Remember a published proposal. Re-recording the same UID is a no-op.
    pub async fn record_order(&self, uid: &Bytes, order: &Order) -> KeeperResult<()> {
        let order_data =
            serde_json::to_value(order).map_err(|e| KeeperError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO proposed_orders (uid, account, valid_to, order_data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (uid) DO NOTHING
            "#,
        )
        .bind(&uid[..])
        .bind(self.account.as_bytes())
        .bind(i64::from(order.valid_to))
        .bind(order_data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AccountStore for StateManager {
    async fn save_account(&self, config: &AccountConfig) -> KeeperResult<()> {
        sqlx::query(
            r#"
            INSERT INTO keeper_account (account, owner, app_data, domain_separator, settlement)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(self.account.as_bytes())
        .bind(config.owner.as_bytes())
        .bind(config.app_data.as_bytes())
        .bind(config.domain_separator.as_bytes())
        .bind(config.settlement.as_bytes())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_registry(&self, namespace: H256, entries: &[RegistryEntry]) -> KeeperResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM validator_registry WHERE account = $1 AND namespace = $2")
            .bind(self.account.as_bytes())
            .bind(namespace.as_bytes())
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            let seq = i64::try_from(entry.seq)
                .map_err(|_| KeeperError::Internal(format!("sequence {} too large", entry.seq)))?;
            sqlx::query(
                r#"
                INSERT INTO validator_registry
                    (account, namespace, seq, deposit_id, pubkey, signature)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(self.account.as_bytes())
            .bind(namespace.as_bytes())
            .bind(seq)
            .bind(entry.id.as_bytes())
            .bind(&entry.record.pubkey[..])
            .bind(&entry.record.signature[..])
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Persisted {} registry entries", entries.len());
        Ok(())
    }

    async fn record_event(&self, event: &AccountEvent) -> KeeperResult<()> {
        let event_data =
            serde_json::to_value(event).map_err(|e| KeeperError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO account_events (account, event_type, event_data)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(self.account.as_bytes())
        .bind(event.name())
        .bind(event_data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn address_column(row: &PgRow, column: &str) -> KeeperResult<Address> {
    let bytes: Vec<u8> = row.try_get(column)?;
    fixed_width(&bytes, 20, column).map(Address::from_slice)
}

fn hash_column(row: &PgRow, column: &str) -> KeeperResult<H256> {
    let bytes: Vec<u8> = row.try_get(column)?;
    fixed_width(&bytes, 32, column).map(H256::from_slice)
}

fn fixed_width<'a>(bytes: &'a [u8], width: usize, column: &str) -> KeeperResult<&'a [u8]> {
    if bytes.len() != width {
        return Err(KeeperError::Internal(format!(
            "column {} holds {} bytes, expected {}",
            column,
            bytes.len(),
            width
        )));
    }
    Ok(bytes)
}
