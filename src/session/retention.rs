//! Background retention sweeper (spec.md §4.4, DESIGN.md Open Question
//! decision: hourly sweep). Generalized from the teacher's
//! `spawn_retention_task` shape (initial startup delay, fixed-interval
//! `tokio::spawn` loop over a shared connection) from a per-room
//! message-count/age rule to the spec's flat 90-day StoredMessage cutoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;

use crate::cache::CacheHierarchy;
use crate::logging::{log_error, log_info};

const STARTUP_DELAY_SECS: u64 = 30;

/// Result of a single retention sweep, surfaced for logging/tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionResult {
    pub messages_deleted: i64,
    pub sessions_deleted: i64,
}

/// Spawns the background task. Takes the same `Arc<Mutex<Connection>>` the
/// `SessionStore` uses internally so both share one connection rather than
/// opening a second handle onto the same SQLite file. Each sweep also evicts
/// expired L2 cache records (spec.md §4.3 table) — `CacheHierarchy` itself
/// never schedules this, since correctness for reads doesn't depend on it
/// running promptly, only on it running eventually.
pub fn spawn_retention_task(
    conn: Arc<Mutex<Connection>>,
    cache: Arc<CacheHierarchy>,
    retention_days: i64,
    sweep_interval_secs: u64,
) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(STARTUP_DELAY_SECS)).await;
        loop {
            {
                let db = conn.lock().unwrap_or_else(|e| {
                    log_error!("retention sweeper: connection mutex poisoned, recovering");
                    e.into_inner()
                });
                match run_retention(&db, retention_days) {
                    Ok(result) => {
                        if result.messages_deleted > 0 || result.sessions_deleted > 0 {
                            log_info!(
                                messages_deleted = result.messages_deleted,
                                sessions_deleted = result.sessions_deleted,
                                "retention sweep pruned expired data"
                            );
                        }
                    }
                    Err(e) => log_error!(error = %e, "retention sweep failed"),
                }
            }
            cache.evict_expired_l2();
            tokio::time::sleep(Duration::from_secs(sweep_interval_secs)).await;
        }
    });
}

/// Deletes messages older than `retention_days`, then any session left with
/// zero remaining messages whose `end_time` is set (closed, fully emptied
/// sessions — open sessions are never swept regardless of age).
pub fn run_retention(conn: &Connection, retention_days: i64) -> Result<RetentionResult, rusqlite::Error> {
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();

    let messages_deleted = conn.execute(
        "DELETE FROM messages WHERE timestamp < ?1",
        rusqlite::params![cutoff],
    )? as i64;

    let sessions_deleted = conn.execute(
        "DELETE FROM sessions WHERE end_time IS NOT NULL
         AND session_id NOT IN (SELECT DISTINCT session_id FROM messages)",
        [],
    )? as i64;

    Ok(RetentionResult {
        messages_deleted,
        sessions_deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Language, Role};
    use crate::session::SessionStore;

    #[test]
    fn sweep_removes_messages_past_retention_and_their_emptied_closed_sessions() {
        let store = SessionStore::open_in_memory(30).unwrap();
        let session_id = store.ensure_session("user-1", None, Language::En).unwrap();
        store
            .append_turn(&session_id, Role::User, "old message", Language::En, None, None)
            .unwrap();
        store.end_session(&session_id).unwrap();

        // Backdate the message beyond the retention cutoff directly against
        // the store's own connection rather than a synthetic one, so this
        // exercises the real schema `run_retention` runs against in production.
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE messages SET timestamp = ?1 WHERE session_id = ?2",
                rusqlite::params!["2020-01-01T00:00:00Z", &session_id],
            )
            .unwrap();
        }

        let conn = store.conn.lock().unwrap();
        let result = run_retention(&conn, 90).unwrap();
        assert_eq!(result.messages_deleted, 1);
        assert_eq!(result.sessions_deleted, 1);
    }

    #[test]
    fn sweep_keeps_recent_messages() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE sessions (session_id TEXT PRIMARY KEY, end_time TEXT);
             CREATE TABLE messages (session_id TEXT, timestamp TEXT);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages VALUES ('s1', ?1)",
            rusqlite::params![Utc::now().to_rfc3339()],
        )
        .unwrap();

        let result = run_retention(&conn, 90).unwrap();
        assert_eq!(result.messages_deleted, 0);
    }
}
