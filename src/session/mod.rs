//! SessionStore — conversation persistence (spec.md §4.4).
//!
//! Grounded on the teacher's `src/db.rs`: a single `rusqlite::Connection`
//! behind a `Mutex`, schema created with idempotent `execute_batch`
//! migrations. `AppendTurn` additionally takes a per-session `DashMap`-
//! striped lock so that two concurrent appends to the *same* session always
//! serialize in program order even if the surrounding connection mutex is
//! briefly released between the read and the write half of the operation.

pub mod retention;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::EngineError;
use crate::models::{IntentAggregate, Language, Role, Session, StoredMessage};
use crate::validation::InputValidator;

pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    session_locks: DashMap<String, Arc<Mutex<()>>>,
    inactivity_window: ChronoDuration,
}

impl SessionStore {
    pub fn new(database_url: &str, inactivity_minutes: i64) -> Result<Self, EngineError> {
        if let Some(parent) = std::path::Path::new(database_url).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(database_url).map_err(|e| EngineError::Fatal {
            reason: format!("failed to open session store: {e}"),
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            session_locks: DashMap::new(),
            inactivity_window: ChronoDuration::minutes(inactivity_minutes),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory(inactivity_minutes: i64) -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(|e| EngineError::Fatal {
            reason: format!("failed to open in-memory session store: {e}"),
        })?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            session_locks: DashMap::new(),
            inactivity_window: ChronoDuration::minutes(inactivity_minutes),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Spawns the background retention sweeper (spec.md §4.4, §9) sharing
    /// this store's own connection handle rather than opening a second
    /// handle onto the same SQLite file. Also carries the L2 cache so each
    /// sweep evicts expired semantic-cache entries (spec.md §4.3).
    pub fn spawn_retention(
        &self,
        cache: Arc<crate::cache::CacheHierarchy>,
        retention_days: i64,
        sweep_interval_secs: u64,
    ) {
        retention::spawn_retention_task(self.conn.clone(), cache, retention_days, sweep_interval_secs);
    }

    fn migrate(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;

             CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                outlet_id TEXT,
                language TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                intents TEXT NOT NULL DEFAULT '{}',
                context TEXT NOT NULL DEFAULT '{}'
             );

             CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

             CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                language TEXT NOT NULL,
                intent TEXT,
                confidence REAL,
                timestamp TEXT NOT NULL,
                pii_scrubbed INTEGER NOT NULL DEFAULT 0,
                embedding TEXT
             );

             CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON messages(session_id, timestamp);",
        )
        .map_err(|e| EngineError::Fatal {
            reason: format!("session store migration failed: {e}"),
        })
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns an existing open session for the user within the inactivity
    /// window, or creates one. Creation must succeed when `outlet_id` is
    /// absent (spec.md §4.4, resolving the source's open issue).
    pub fn ensure_session(
        &self,
        user_id: &str,
        outlet_id: Option<&str>,
        language: Language,
    ) -> Result<String, EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = (Utc::now() - self.inactivity_window).to_rfc3339();

        let existing: Option<String> = conn
            .query_row(
                "SELECT session_id FROM sessions
                 WHERE user_id = ?1 AND end_time IS NULL AND start_time > ?2
                 ORDER BY start_time DESC LIMIT 1",
                params![user_id, cutoff],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| EngineError::Fatal {
                reason: format!("session lookup failed: {e}"),
            })?;

        if let Some(session_id) = existing {
            return Ok(session_id);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (session_id, user_id, outlet_id, language, start_time, message_count, intents, context)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, '{}', '{}')",
            params![&session_id, user_id, outlet_id, language.as_str(), &now],
        )
        .map_err(|e| EngineError::Fatal {
            reason: format!("session creation failed: {e}"),
        })?;

        Ok(session_id)
    }

    /// Persists a turn, scrubbing PII first (SPEC_FULL.md §4.17), and
    /// atomically updates the session's `message_count` and `intents`
    /// aggregate. Serialized per-session via `session_lock`.
    pub fn append_turn(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        language: Language,
        intent: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<StoredMessage, EngineError> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let (scrubbed, pii_scrubbed) = InputValidator::scrub_pii(content);
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let role_str = match role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        conn.execute(
            "INSERT INTO messages (id, session_id, role, content, language, intent, confidence, timestamp, pii_scrubbed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &id,
                session_id,
                role_str,
                &scrubbed,
                language.as_str(),
                intent,
                confidence,
                now.to_rfc3339(),
                pii_scrubbed as i64,
            ],
        )
        .map_err(|e| EngineError::PersistenceFailure {
            reason: format!("failed to insert turn: {e}"),
        })?;

        let intents_json: String = conn
            .query_row(
                "SELECT intents FROM sessions WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .map_err(|e| EngineError::PersistenceFailure {
                reason: format!("failed to read session for aggregate update: {e}"),
            })?;
        let mut intents: HashMap<String, IntentAggregate> =
            serde_json::from_str(&intents_json).unwrap_or_default();
        if let Some(intent_name) = intent {
            let agg = intents.entry(intent_name.to_string()).or_default();
            agg.count += 1;
            agg.confidence_sum += confidence.unwrap_or(0.0);
        }
        let intents_json = serde_json::to_string(&intents).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            "UPDATE sessions SET message_count = message_count + 1, intents = ?2 WHERE session_id = ?1",
            params![session_id, &intents_json],
        )
        .map_err(|e| EngineError::PersistenceFailure {
            reason: format!("failed to update session aggregate: {e}"),
        })?;

        Ok(StoredMessage {
            session_id: session_id.to_string(),
            role,
            content: scrubbed,
            language,
            intent: intent.map(str::to_string),
            confidence,
            timestamp: now,
            pii_scrubbed,
            embedding: None,
        })
    }

    /// Last `n` turns, oldest-first.
    pub fn recent_turns(&self, session_id: &str, n: i64) -> Result<Vec<StoredMessage>, EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT role, content, language, intent, confidence, timestamp, pii_scrubbed
                 FROM messages WHERE session_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
            )
            .map_err(|e| EngineError::Fatal {
                reason: format!("failed to prepare recent_turns query: {e}"),
            })?;

        let rows = stmt
            .query_map(params![session_id, n], |row| {
                let role_str: String = row.get(0)?;
                let language_str: String = row.get(2)?;
                let timestamp_str: String = row.get(5)?;
                Ok((
                    role_str,
                    row.get::<_, String>(1)?,
                    language_str,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    timestamp_str,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(|e| EngineError::Fatal {
                reason: format!("recent_turns query failed: {e}"),
            })?;

        let mut turns = Vec::new();
        for row in rows {
            let (role_str, content, language_str, intent, confidence, timestamp_str, pii_scrubbed) =
                row.map_err(|e| EngineError::Fatal {
                    reason: format!("failed to read turn row: {e}"),
                })?;
            let role = if role_str == "user" { Role::User } else { Role::Assistant };
            let language = match language_str.as_str() {
                "zh" => Language::Zh,
                "ms" => Language::Ms,
                _ => Language::En,
            };
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            turns.push(StoredMessage {
                session_id: session_id.to_string(),
                role,
                content,
                language,
                intent,
                confidence,
                timestamp,
                pii_scrubbed: pii_scrubbed != 0,
                embedding: None,
            });
        }
        turns.reverse();
        Ok(turns)
    }

    pub fn end_session(&self, session_id: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE sessions SET end_time = ?2 WHERE session_id = ?1",
            params![session_id, Utc::now().to_rfc3339()],
        )
        .map_err(|e| EngineError::PersistenceFailure {
            reason: format!("failed to end session: {e}"),
        })?;
        Ok(())
    }

    /// Lightweight liveness probe for `GET /health` (spec.md §6.2): confirms
    /// the connection mutex is reachable and the schema responds to a query.
    pub fn ping(&self) -> bool {
        let conn = match self.conn.lock() {
            Ok(c) => c,
            Err(e) => e.into_inner(),
        };
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>, EngineError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.query_row(
            "SELECT session_id, user_id, outlet_id, language, start_time, end_time, message_count, intents, context
             FROM sessions WHERE session_id = ?1",
            params![session_id],
            |row| {
                let language_str: String = row.get(3)?;
                let start_time_str: String = row.get(4)?;
                let end_time_str: Option<String> = row.get(5)?;
                let intents_str: String = row.get(7)?;
                let context_str: String = row.get(8)?;
                Ok(Session {
                    session_id: row.get(0)?,
                    user_id: row.get(1)?,
                    outlet_id: row.get(2)?,
                    language: match language_str.as_str() {
                        "zh" => Language::Zh,
                        "ms" => Language::Ms,
                        _ => Language::En,
                    },
                    start_time: DateTime::parse_from_rfc3339(&start_time_str)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    end_time: end_time_str.and_then(|s| {
                        DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc))
                    }),
                    message_count: row.get(6)?,
                    intents: serde_json::from_str(&intents_str).unwrap_or_default(),
                    context: serde_json::from_str(&context_str).unwrap_or_default(),
                })
            },
        )
        .optional()
        .map_err(|e| EngineError::Fatal {
            reason: format!("failed to load session: {e}"),
        })
    }
}
