// src/ledger/sqlite.rs
//! SQLite-backed transaction ledger

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use super::{ServerAction, StoredTransaction, TxStore, MAX_NONCE, TXSTORE_FILENAME};
use crate::config::AppConfig;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct SqliteTxStore {
    pool: SqlitePool,
}

type TxRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    Option<Vec<u8>>,
    i64,
    String,
    i64,
    i64,
    Option<i64>,
    Option<i64>,
);

const SELECT_TX: &str = "SELECT tx_id, signer, destination, gas_limit, gas_price, data, nonce,
            server_action, attempts, creation_block_number, boost_block_number, mined_block_number
     FROM transactions";

impl SqliteTxStore {
    /// Open the ledger described by the app config: `<workdir>/txstore.db` or memory.
    pub async fn open(app: &AppConfig) -> Result<Self> {
        if app.in_memory {
            Self::in_memory().await
        } else {
            tokio::fs::create_dir_all(&app.workdir).await?;
            Self::new(&app.workdir.join(TXSTORE_FILENAME)).await
        }
    }

    pub async fn new(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::create_tables(&pool).await?;

        info!("Server database location: {}", path.display());

        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to `:memory:` is a separate database, so pin a single one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::create_tables(&pool).await?;

        info!("Server database location: memory");

        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_id TEXT NOT NULL UNIQUE,
                signer TEXT NOT NULL,
                destination TEXT,
                gas_limit TEXT NOT NULL,
                gas_price TEXT NOT NULL,
                data BLOB,
                nonce INTEGER NOT NULL,
                server_action TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                creation_block_number INTEGER NOT NULL,
                boost_block_number INTEGER,
                mined_block_number INTEGER,
                UNIQUE (nonce, signer)
            )",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_pending
             ON transactions(server_action, mined_block_number)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TxStore for SqliteTxStore {
    async fn put_tx(&self, tx: &StoredTransaction, update_existing: bool) -> Result<()> {
        tx.validate()?;
        let key = tx.nonce_signer();

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM transactions WHERE nonce = ? AND signer = ?")
                .bind(nonce_bound(key.nonce))
                .bind(hex_address(key.signer))
                .fetch_optional(&self.pool)
                .await?;

        let result = match existing {
            Some((id,)) if update_existing => {
                debug!("Updating transaction at nonce {} of {:#x}", key.nonce, key.signer);
                sqlx::query(
                    "UPDATE transactions SET
                        tx_id = ?, signer = ?, destination = ?, gas_limit = ?, gas_price = ?,
                        data = ?, nonce = ?, server_action = ?, attempts = ?,
                        creation_block_number = ?, boost_block_number = ?, mined_block_number = ?
                     WHERE id = ?",
                )
                .bind(hex_hash(tx.tx_id))
                .bind(hex_address(tx.from))
                .bind(tx.to.map(hex_address))
                .bind(tx.gas_limit.to_string())
                .bind(tx.gas_price.to_string())
                .bind(tx.data.as_ref().map(|d| d.to_vec()))
                .bind(nonce_bound(tx.nonce))
                .bind(tx.server_action.as_str())
                .bind(tx.attempts as i64)
                .bind(tx.creation_block_number as i64)
                .bind(tx.boost_block_number.map(|b| b as i64))
                .bind(tx.mined_block_number.map(|b| b as i64))
                .bind(id)
                .execute(&self.pool)
                .await
            }
            Some(_) => {
                return Err(Error::DuplicateNonce {
                    signer: key.signer,
                    nonce: key.nonce,
                })
            }
            None => {
                sqlx::query(
                    "INSERT INTO transactions
                     (tx_id, signer, destination, gas_limit, gas_price, data, nonce,
                      server_action, attempts, creation_block_number, boost_block_number,
                      mined_block_number)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(hex_hash(tx.tx_id))
                .bind(hex_address(tx.from))
                .bind(tx.to.map(hex_address))
                .bind(tx.gas_limit.to_string())
                .bind(tx.gas_price.to_string())
                .bind(tx.data.as_ref().map(|d| d.to_vec()))
                .bind(nonce_bound(tx.nonce))
                .bind(tx.server_action.as_str())
                .bind(tx.attempts as i64)
                .bind(tx.creation_block_number as i64)
                .bind(tx.boost_block_number.map(|b| b as i64))
                .bind(tx.mined_block_number.map(|b| b as i64))
                .execute(&self.pool)
                .await
            }
        };

        result.map_err(|e| map_write_error(e, tx))?;
        Ok(())
    }

    async fn get_tx_by_nonce(&self, signer: Address, nonce: u64) -> Result<Option<StoredTransaction>> {
        if nonce > MAX_NONCE {
            return Ok(None);
        }
        let row: Option<TxRow> =
            sqlx::query_as(&format!("{} WHERE signer = ? AND nonce = ?", SELECT_TX))
                .bind(hex_address(signer))
                .bind(nonce_bound(nonce))
                .fetch_optional(&self.pool)
                .await?;

        row.map(row_to_tx).transpose()
    }

    async fn get_tx_by_id(&self, tx_id: H256) -> Result<Option<StoredTransaction>> {
        let row: Option<TxRow> = sqlx::query_as(&format!("{} WHERE tx_id = ?", SELECT_TX))
            .bind(hex_hash(tx_id))
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_tx).transpose()
    }

    async fn get_txs_until_nonce(&self, signer: Address, nonce: u64) -> Result<Vec<StoredTransaction>> {
        let rows: Vec<TxRow> = sqlx::query_as(&format!(
            "{} WHERE signer = ? AND nonce <= ? ORDER BY nonce ASC",
            SELECT_TX
        ))
        .bind(hex_address(signer))
        .bind(nonce_bound(nonce))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_tx).collect()
    }

    async fn remove_txs_until_nonce(&self, signer: Address, nonce: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM transactions WHERE signer = ? AND nonce <= ?")
            .bind(hex_address(signer))
            .bind(nonce_bound(nonce))
            .execute(&self.pool)
            .await?;

        debug!(
            "Removed {} transactions of {:#x} up to nonce {}",
            result.rows_affected(),
            signer,
            nonce
        );
        Ok(result.rows_affected())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM transactions")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_all_by_signer(&self, signer: Address) -> Result<Vec<StoredTransaction>> {
        let rows: Vec<TxRow> =
            sqlx::query_as(&format!("{} WHERE signer = ? ORDER BY nonce ASC", SELECT_TX))
                .bind(hex_address(signer))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(row_to_tx).collect()
    }

    async fn get_all(&self) -> Result<Vec<StoredTransaction>> {
        let rows: Vec<TxRow> =
            sqlx::query_as(&format!("{} ORDER BY nonce ASC, signer ASC", SELECT_TX))
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(row_to_tx).collect()
    }

    async fn is_action_pending(
        &self,
        action: ServerAction,
        destination: Option<Address>,
    ) -> Result<bool> {
        let found: Option<(i64,)> = match destination {
            Some(destination) => {
                sqlx::query_as(
                    "SELECT id FROM transactions
                     WHERE mined_block_number IS NULL AND server_action = ? AND destination = ?
                     LIMIT 1",
                )
                .bind(action.as_str())
                .bind(hex_address(destination))
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id FROM transactions
                     WHERE mined_block_number IS NULL AND server_action = ?
                     LIMIT 1",
                )
                .bind(action.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(found.is_some())
    }
}

/// Addresses and hashes are stored lowercase so lookups are case-insensitive.
fn hex_address(address: Address) -> String {
    format!("{:#x}", address)
}

fn hex_hash(hash: H256) -> String {
    format!("{:#x}", hash)
}

/// Nonces above `MAX_NONCE` are never stored, so clamping keeps range queries inclusive.
fn nonce_bound(nonce: u64) -> i64 {
    i64::try_from(nonce).unwrap_or(i64::MAX)
}

fn map_write_error(err: sqlx::Error, tx: &StoredTransaction) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if db_err.message().contains("tx_id") {
                return Error::DuplicateTransactionId(tx.tx_id);
            }
            return Error::DuplicateNonce {
                signer: tx.from,
                nonce: tx.nonce,
            };
        }
    }
    Error::Database(err)
}

fn decode_error(column: &str, value: &str) -> Error {
    Error::Database(sqlx::Error::Decode(
        format!("invalid {} in ledger: {}", column, value).into(),
    ))
}

fn row_to_tx(row: TxRow) -> Result<StoredTransaction> {
    let (
        tx_id,
        signer,
        destination,
        gas_limit,
        gas_price,
        data,
        nonce,
        server_action,
        attempts,
        creation_block_number,
        boost_block_number,
        mined_block_number,
    ) = row;

    let to = match destination {
        Some(d) => Some(Address::from_str(&d).map_err(|_| decode_error("destination", &d))?),
        None => None,
    };

    Ok(StoredTransaction {
        tx_id: H256::from_str(&tx_id).map_err(|_| decode_error("tx_id", &tx_id))?,
        from: Address::from_str(&signer).map_err(|_| decode_error("signer", &signer))?,
        to,
        gas_limit: U256::from_dec_str(&gas_limit).map_err(|_| decode_error("gas_limit", &gas_limit))?,
        gas_price: U256::from_dec_str(&gas_price).map_err(|_| decode_error("gas_price", &gas_price))?,
        data: data.map(Bytes::from),
        nonce: nonce as u64,
        server_action: server_action
            .parse()
            .map_err(|_| decode_error("server_action", &server_action))?,
        attempts: attempts as u32,
        creation_block_number: creation_block_number as u64,
        boost_block_number: boost_block_number.map(|b| b as u64),
        mined_block_number: mined_block_number.map(|b| b as u64),
    })
}
