//! Retry for SQLite lock contention on the draft slot
//!
//! `SQLITE_BUSY` / `SQLITE_LOCKED` are retried with exponential backoff
//! until the wait budget is spent. Every other error is returned at once.

use sitrep_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default upper bound on time spent retrying a locked database
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// SQLite primary result codes for lock contention
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

/// True for SQLite lock contention errors
pub fn is_lock_error(err: &Error) -> bool {
    let Error::Database(sqlx::Error::Database(db_err)) = err else {
        return false;
    };
    match db_err.code() {
        Some(code) => {
            // Extended codes keep the primary code in the low byte
            let primary = code
                .parse::<u32>()
                .map(|c| (c & 0xff).to_string())
                .unwrap_or_else(|_| code.to_string());
            primary == SQLITE_BUSY || primary == SQLITE_LOCKED
        }
        None => db_err.message().contains("database is locked"),
    }
}

/// Run `operation`, retrying while the database is locked
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let budget = Duration::from_millis(max_wait_ms);
    let started = Instant::now();
    let mut backoff = FIRST_BACKOFF;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "Draft slot unlocked after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_lock_error(&err) {
            return Err(err);
        }
        let elapsed = started.elapsed();
        if elapsed >= budget {
            return Err(Error::Busy {
                operation: operation_name.to_string(),
                attempts,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }

        warn!(
            operation = operation_name,
            attempts,
            backoff_ms = backoff.as_millis() as u64,
            "Draft database locked, backing off"
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
