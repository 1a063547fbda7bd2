//! SQLite-backed [`BackupStore`] with bounded-size log rotation.
//!
//! Every actor gets its own database file so there is no cross-actor write
//! contention. The pool is capped at one connection: handler-side inserts
//! and the rotation transaction serialize through it.
//!
//! Rotation is best-effort bounded retention, not a hard cap: each pass
//! moves the oldest `keep` rows into a fresh archive file, so immediately
//! after a pass the primary holds at most `max(count_before - keep, keep)`
//! rows, and producers can add up to one tick's worth of rows between
//! passes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::backup::{BackupMode, BackupStore, LogMessage};
use crate::error::BackupError;

/// Directory holding primary per-actor databases, under the base dir.
const BACKUP_DIR: &str = "sqlitedb";
/// Directory holding rotation archives, under the base dir.
const ROTATE_DIR: &str = "sqlitedb_rotate";

/// Tick period of the rotation task.
pub const ROTATE_TICK: Duration = Duration::from_secs(30);

const ACTOR_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS actor(
    uuid TEXT PRIMARY KEY,
    name TEXT,
    start_time TEXT,
    end_time TEXT
)";

const LOG_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS log(
    seq INTEGER PRIMARY KEY ASC,
    time TEXT,
    message TEXT
)";

const INSERT_ACTOR_START: &str = "INSERT INTO actor(uuid, name, start_time) VALUES (?, ?, ?)";
const UPDATE_ACTOR_END: &str = "UPDATE actor SET end_time = ? WHERE uuid = ?";
const INSERT_LOG: &str = "INSERT INTO log(time, message) VALUES (?, ?)";
const SELECT_LOG_COUNT: &str = "SELECT COUNT(*) FROM log";
const SELECT_OLDEST: &str = "SELECT seq, time, message FROM log ORDER BY seq ASC LIMIT ?";
const DELETE_ROTATED: &str = "DELETE FROM log WHERE seq <= ?";

type DbPool = Pool<Sqlite>;

/// SQLite store for one actor's lifetime row and message log.
pub struct SqliteStore {
    name: String,
    uuid: Uuid,
    pool: DbPool,
}

impl SqliteStore {
    /// Open (or create) the primary store under the process working
    /// directory and start the rotation task when `mode` asks for one.
    pub async fn open(
        name: &str,
        uuid: Uuid,
        mode: BackupMode,
        token: &CancellationToken,
    ) -> Result<Arc<Self>, BackupError> {
        Self::open_in(Path::new("."), name, uuid, mode, ROTATE_TICK, token).await
    }

    /// Same as [`SqliteStore::open`] with an explicit base directory and
    /// rotation period. Tests point this at a temp dir with a short period.
    pub async fn open_in(
        base: &Path,
        name: &str,
        uuid: Uuid,
        mode: BackupMode,
        rotate_every: Duration,
        token: &CancellationToken,
    ) -> Result<Arc<Self>, BackupError> {
        let dir = ensure_dir(&base.join(BACKUP_DIR))?;
        let file = dir.join(format!("{name}_{uuid}.db"));
        let pool = open_pool(&file).await?;

        let store = Arc::new(Self {
            name: name.to_string(),
            uuid,
            pool,
        });

        if let BackupMode::Rotate(keep) = mode {
            let rotator = Rotator {
                base: base.to_path_buf(),
                name: store.name.clone(),
                uuid,
                pool: store.pool.clone(),
                keep,
                in_flight: Arc::new(AtomicBool::new(false)),
            };
            tokio::spawn(rotator.run(rotate_every, token.child_token()));
        }

        Ok(store)
    }

    /// Path of the primary database file for an actor under `base`.
    pub fn primary_path(base: &Path, name: &str, uuid: Uuid) -> PathBuf {
        base.join(BACKUP_DIR).join(format!("{name}_{uuid}.db"))
    }

    /// Directory holding rotation archives under `base`.
    pub fn archive_dir(base: &Path) -> PathBuf {
        base.join(ROTATE_DIR)
    }
}

#[async_trait]
impl BackupStore for SqliteStore {
    async fn start(&self, at: DateTime<Utc>) -> Result<(), BackupError> {
        sqlx::query(INSERT_ACTOR_START)
            .bind(self.uuid.to_string())
            .bind(&self.name)
            .bind(at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert(&self, payload: &str) -> Result<(), BackupError> {
        let body = serde_json::to_string(&LogMessage { message: payload })?;
        sqlx::query(INSERT_LOG)
            .bind(Utc::now().to_rfc3339())
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stop(&self, at: DateTime<Utc>) -> Result<(), BackupError> {
        sqlx::query(UPDATE_ACTOR_END)
            .bind(at.to_rfc3339())
            .bind(self.uuid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Rotation task state. Cloned into each spawned pass.
#[derive(Clone)]
struct Rotator {
    base: PathBuf,
    name: String,
    uuid: Uuid,
    pool: DbPool,
    keep: u64,
    /// Single-slot gate: ticks arriving while a pass runs are dropped.
    in_flight: Arc<AtomicBool>,
}

impl Rotator {
    async fn run(self, every: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; the first pass
        // should run one full period after open.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    if self
                        .in_flight
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        debug!(
                            service = crate::SERVICE,
                            actor = %self.name,
                            uuid = %self.uuid,
                            "rotation pass in flight, tick dropped"
                        );
                        continue;
                    }

                    let rotator = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = rotator.pass().await {
                            error!(
                                service = crate::SERVICE,
                                actor = %rotator.name,
                                uuid = %rotator.uuid,
                                error = %err,
                                "rotation pass failed"
                            );
                        }
                        rotator.in_flight.store(false, Ordering::Release);
                    });
                }
            }
        }
    }

    /// One rotation pass.
    ///
    /// Runs inside a primary-store transaction; any failure drops the
    /// transaction (rolling it back), closes the archive, and leaves the
    /// retry to the next tick.
    async fn pass(&self) -> Result<(), BackupError> {
        let mut tx = self.pool.begin().await?;

        let count: i64 = sqlx::query_scalar(SELECT_LOG_COUNT)
            .fetch_one(&mut *tx)
            .await?;
        if count <= self.keep as i64 {
            tx.commit().await?;
            return Ok(());
        }

        let archive = open_archive(&self.base, &self.name, self.uuid).await?;

        let rows: Vec<(i64, String, String)> = match sqlx::query_as(SELECT_OLDEST)
            .bind(self.keep as i64)
            .fetch_all(&mut *tx)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                archive.close().await;
                return Err(BackupError::Query(err));
            }
        };

        let moved = rows.len();
        let mut last_seq = 0i64;
        for (seq, time, message) in rows {
            if let Err(err) = sqlx::query(INSERT_LOG)
                .bind(&time)
                .bind(&message)
                .execute(&archive)
                .await
            {
                archive.close().await;
                return Err(BackupError::Query(err));
            }
            last_seq = seq;
        }

        if let Err(err) = sqlx::query(DELETE_ROTATED)
            .bind(last_seq)
            .execute(&mut *tx)
            .await
        {
            archive.close().await;
            return Err(BackupError::Query(err));
        }

        let committed = tx.commit().await;
        archive.close().await;
        committed?;

        debug!(
            service = crate::SERVICE,
            actor = %self.name,
            uuid = %self.uuid,
            moved,
            last_seq,
            "rotation pass complete"
        );

        Ok(())
    }
}

/// Open a fresh archive database named with the next free sequence number.
async fn open_archive(base: &Path, name: &str, uuid: Uuid) -> Result<DbPool, BackupError> {
    let dir = ensure_dir(&base.join(ROTATE_DIR))?;
    let next = next_archive_seq(&dir, name, uuid)?;
    let file = dir.join(format!("{name}_{uuid}_{next}.db"));
    open_pool(&file).await
}

/// Next archive sequence: `1 + max(existing)`, or `1` when no archive of
/// this actor exists yet. Filenames that do not match the strict
/// `{name}_{uuid}_{n}.db` pattern are ignored.
fn next_archive_seq(dir: &Path, name: &str, uuid: Uuid) -> Result<u64, BackupError> {
    let pattern = Regex::new(&format!(
        r"^{}_{}_(?P<seq>\d+)\.db$",
        regex::escape(name),
        regex::escape(&uuid.to_string()),
    ))
    .expect("escaped archive pattern is always a valid regex");

    let mut max_seq = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(caps) = pattern.captures(file_name) {
            if let Ok(seq) = caps["seq"].parse::<u64>() {
                max_seq = max_seq.max(seq);
            }
        }
    }

    Ok(max_seq + 1)
}

/// Create `path` as a 0700 directory if missing; reject non-directory paths.
fn ensure_dir(path: &Path) -> Result<PathBuf, BackupError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(path.to_path_buf()),
        Ok(_) => Err(BackupError::NotADirectory(path.to_path_buf())),
        Err(_) => {
            std::fs::create_dir_all(path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
            }
            Ok(path.to_path_buf())
        }
    }
}

/// Open a single-connection pool on `file` and create the schema.
async fn open_pool(file: &Path) -> Result<DbPool, BackupError> {
    let options = SqliteConnectOptions::new()
        .filename(file)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Off)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(BackupError::Init)?;

    sqlx::query(ACTOR_SCHEMA)
        .execute(&pool)
        .await
        .map_err(BackupError::Init)?;
    sqlx::query(LOG_SCHEMA)
        .execute(&pool)
        .await
        .map_err(BackupError::Init)?;

    Ok(pool)
}
