//! Durable relayer state: pending confirmations, the retry queue, the
//! utxo-state cache and per-direction scan progress.
//!
//! Backed by a single SQLite file. A single-connection pool gives the
//! single-writer discipline; the check → retry move runs inside one
//! transaction so the two queues stay disjoint.

use std::path::Path;
use std::str::FromStr;

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::codec::{Sink, Source};
use crate::error::{RelayError, Result};

/// Any one recovery scan is bounded; callers re-invoke until drained.
pub const ITER_BATCH: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    TargetToRelay,
    RelayToTarget,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::TargetToRelay => "target_to_relay",
            Self::RelayToTarget => "relay_to_target",
        }
    }
}

/// A cross-chain event whose proof must be (re-)submitted: the source-side
/// height and the storage key identifying the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub height: u32,
    pub key: String,
}

impl Submission {
    /// Store-boundary form: `u32_le(height) || var_string(key)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_u32_le(self.height);
        sink.write_var_string(&self.key);
        sink.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut source = Source::new(bytes);
        let height = source
            .read_u32_le()
            .map_err(|e| RelayError::Corrupt(format!("submission height: {e}")))?;
        let key = source
            .read_var_string()
            .map_err(|e| RelayError::Corrupt(format!("submission key: {e}")))?;
        Ok(Self { height, key })
    }
}

/// Identifies one unspent output on the target chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoKey {
    pub txid: String,
    pub index: i32,
}

impl UtxoKey {
    /// Store-boundary form: `var_string(txid) || i32_le(index)`.
    pub fn encode(&self) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_var_string(&self.txid);
        sink.write_i32_le(self.index);
        sink.into_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the store under `db_path`.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let dir = db_path.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| RelayError::Config(format!("create {}: {e}", dir.display())))?;
        let file = dir.join("relayer.db");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", file.display()))
            .map_err(RelayError::Store)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS check_txs (
                direction TEXT NOT NULL,
                tx_hash TEXT NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (direction, tx_hash)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retries (
                direction TEXT NOT NULL,
                payload BLOB NOT NULL,
                PRIMARY KEY (direction, payload)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS utxos (
                key BLOB NOT NULL PRIMARY KEY,
                spent INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS progress (
                direction TEXT NOT NULL PRIMARY KEY,
                height INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn put_check(
        &self,
        direction: Direction,
        tx_hash: &str,
        submission: &Submission,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO check_txs (direction, tx_hash, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(direction, tx_hash) DO UPDATE SET payload = excluded.payload;
            "#,
        )
        .bind(direction.as_str())
        .bind(tx_hash)
        .bind(submission.encode())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_check(&self, direction: Direction, tx_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM check_txs WHERE direction = ?1 AND tx_hash = ?2;")
            .bind(direction.as_str())
            .bind(tx_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn iter_check(&self, direction: Direction) -> Result<Vec<(String, Submission)>> {
        let rows = sqlx::query(
            "SELECT tx_hash, payload FROM check_txs WHERE direction = ?1 LIMIT ?2;",
        )
        .bind(direction.as_str())
        .bind(ITER_BATCH)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let tx_hash: String = row.get(0);
                let payload: Vec<u8> = row.get(1);
                Ok((tx_hash, Submission::decode(&payload)?))
            })
            .collect()
    }

    /// Atomically demote a pending confirmation into the retry queue. The
    /// entry exists in exactly one of the two tables at every point.
    pub async fn move_check_to_retry(&self, direction: Direction, tx_hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT payload FROM check_txs WHERE direction = ?1 AND tx_hash = ?2;",
        )
        .bind(direction.as_str())
        .bind(tx_hash)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(());
        };
        let payload: Vec<u8> = row.get(0);
        sqlx::query("DELETE FROM check_txs WHERE direction = ?1 AND tx_hash = ?2;")
            .bind(direction.as_str())
            .bind(tx_hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO retries (direction, payload) VALUES (?1, ?2)
            ON CONFLICT(direction, payload) DO NOTHING;
            "#,
        )
        .bind(direction.as_str())
        .bind(payload)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn put_retry(&self, direction: Direction, submission: &Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retries (direction, payload) VALUES (?1, ?2)
            ON CONFLICT(direction, payload) DO NOTHING;
            "#,
        )
        .bind(direction.as_str())
        .bind(submission.encode())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_retry(&self, direction: Direction, submission: &Submission) -> Result<()> {
        sqlx::query("DELETE FROM retries WHERE direction = ?1 AND payload = ?2;")
            .bind(direction.as_str())
            .bind(submission.encode())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn iter_retry(&self, direction: Direction) -> Result<Vec<Submission>> {
        let rows = sqlx::query("SELECT payload FROM retries WHERE direction = ?1 LIMIT ?2;")
            .bind(direction.as_str())
            .bind(ITER_BATCH)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let payload: Vec<u8> = row.get(0);
                Submission::decode(&payload)
            })
            .collect()
    }

    pub async fn put_utxo(&self, key: &UtxoKey, spent: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO utxos (key, spent) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET spent = excluded.spent;
            "#,
        )
        .bind(key.encode())
        .bind(spent as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_utxo(&self, key: &UtxoKey) -> Result<Option<bool>> {
        let row = sqlx::query_scalar::<_, i64>("SELECT spent FROM utxos WHERE key = ?1;")
            .bind(key.encode())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|spent| spent != 0))
    }

    /// Persist the next height to scan. Heights never regress, including
    /// across restarts: a lower write is ignored.
    pub async fn put_progress(&self, direction: Direction, height: u32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO progress (direction, height) VALUES (?1, ?2)
            ON CONFLICT(direction) DO UPDATE SET
                height = MAX(progress.height, excluded.height);
            "#,
        )
        .bind(direction.as_str())
        .bind(height as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_progress(&self, direction: Direction) -> Result<Option<u32>> {
        let row = sqlx::query_scalar::<_, i64>(
            "SELECT height FROM progress WHERE direction = ?1;",
        )
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|height| height as u32))
    }
}
