//! Per-user tracking of a reverse-split confirmation session across brokers.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// One user's in-progress session. Broker sets serialize as JSON lists and
/// rehydrate as sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub started_at: DateTime<Utc>,
    pub expected_brokers: BTreeSet<String>,
    pub completed_brokers: BTreeSet<String>,
    pub confirmed_all: bool,
    pub errors: Vec<(String, String)>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
}

pub struct SessionTracker {
    sessions: HashMap<i64, Session>,
    store_path: PathBuf,
}

impl SessionTracker {
    pub fn new(store_path: PathBuf) -> Self {
        let mut tracker = Self {
            sessions: HashMap::new(),
            store_path,
        };
        tracker.load();
        tracker
    }

    /// Begin a fresh session for the user, replacing any existing one.
    pub fn start_session(&mut self, user_id: i64, expected_brokers: &[String]) {
        self.start_session_at(user_id, expected_brokers, Utc::now());
    }

    pub fn start_session_at(&mut self, user_id: i64, expected_brokers: &[String], now: DateTime<Utc>) {
        self.sessions.insert(
            user_id,
            Session {
                started_at: now,
                expected_brokers: expected_brokers.iter().map(|b| b.to_lowercase()).collect(),
                completed_brokers: BTreeSet::new(),
                confirmed_all: false,
                errors: Vec::new(),
                messages: Vec::new(),
            },
        );
        self.persist();
    }

    pub fn has_session(&self, user_id: i64) -> bool {
        self.sessions.contains_key(&user_id)
    }

    /// Idempotent: completing an already-complete broker is a no-op.
    pub fn mark_broker_complete(&mut self, user_id: i64, broker_name: &str) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            session.completed_brokers.insert(broker_name.to_lowercase());
            self.persist();
        }
    }

    pub fn mark_error(&mut self, user_id: i64, broker_name: &str, message: &str) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            session
                .errors
                .push((broker_name.to_string(), message.to_string()));
            self.persist();
        }
    }

    pub fn mark_all_done(&mut self, user_id: i64) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            session.confirmed_all = true;
            self.persist();
        }
    }

    pub fn append_message(&mut self, user_id: i64, message: &str) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            session.messages.push(SessionMessage {
                timestamp: Utc::now(),
                content: message.to_string(),
            });
            self.persist();
        }
    }

    /// Character-offset windows over the `\n`-joined message log. The split
    /// ignores message boundaries; the windows reassemble to the original
    /// exactly.
    pub fn get_message_chunks(&self, user_id: i64, chunk_size: usize) -> Vec<String> {
        let Some(session) = self.sessions.get(&user_id) else {
            return Vec::new();
        };
        if session.messages.is_empty() || chunk_size == 0 {
            return Vec::new();
        }

        let all_text = session
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let chars: Vec<char> = all_text.chars().collect();
        chars
            .chunks(chunk_size)
            .map(|window| window.iter().collect())
            .collect()
    }

    pub fn get_status(&self, user_id: i64) -> String {
        let Some(session) = self.sessions.get(&user_id) else {
            return "No active RSA session for this user.".to_string();
        };

        let missing: Vec<&String> = session
            .expected_brokers
            .difference(&session.completed_brokers)
            .collect();
        let completed: Vec<&str> = session
            .completed_brokers
            .iter()
            .map(|s| s.as_str())
            .collect();

        let mut status = format!("Brokers complete: [{}]\n", completed.join(", "));
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.iter().map(|s| s.as_str()).collect();
            status.push_str(&format!("⚠️ Missing: [{}]\n", missing.join(", ")));
        }
        if !session.errors.is_empty() {
            status.push_str("❌ Errors:\n");
            for (broker, msg) in &session.errors {
                status.push_str(&format!("  - {broker}: {msg}\n"));
            }
        }
        if session.confirmed_all {
            status.push_str("✅ All brokers marked complete.");
        }
        status
    }

    /// Raw session record, for the debug dump command.
    pub fn get_session_dump(&self, user_id: i64) -> Option<&Session> {
        self.sessions.get(&user_id)
    }

    /// Drop every session older than the TTL, whatever state it is in.
    pub fn cleanup_expired_sessions(&mut self, ttl_minutes: i64) {
        self.cleanup_expired_at(ttl_minutes, Utc::now());
    }

    pub fn cleanup_expired_at(&mut self, ttl_minutes: i64, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(ttl_minutes);
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.started_at >= cutoff);
        if self.sessions.len() != before {
            info!("🧹 Pruned {} expired RSA session(s)", before - self.sessions.len());
            self.persist();
        }
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            error!("❌ Failed to save RSA sessions: {e}");
        }
    }

    pub fn save(&self) -> Result<(), String> {
        super::write_json_pretty(&self.store_path, &self.sessions)
    }

    fn load(&mut self) {
        if !self.store_path.exists() {
            return;
        }
        match std::fs::read_to_string(&self.store_path)
            .map_err(|e| e.to_string())
            .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
        {
            Ok(sessions) => {
                self.sessions = sessions;
                info!("📂 Loaded {} RSA session(s) from disk.", self.sessions.len());
            }
            Err(e) => error!("❌ Failed to load RSA sessions: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracker(dir: &TempDir) -> SessionTracker {
        SessionTracker::new(dir.path().join("rsa_sessions.json"))
    }

    fn brokers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mark_broker_complete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_session(7, &brokers(&["schwab", "bbae"]));
        t.mark_broker_complete(7, "schwab");
        t.mark_broker_complete(7, "Schwab");

        let session = t.get_session_dump(7).unwrap();
        assert_eq!(session.completed_brokers.len(), 1);
        assert!(session.completed_brokers.contains("schwab"));
    }

    #[test]
    fn test_status_lists_missing_and_complete() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_session(7, &brokers(&["bbae", "schwab"]));
        t.mark_broker_complete(7, "bbae");

        let status = t.get_status(7);
        assert!(status.contains("Brokers complete: [bbae]"));
        assert!(status.contains("Missing: [schwab]"));
    }

    #[test]
    fn test_status_with_errors_and_confirmation() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_session(7, &brokers(&["bbae"]));
        t.mark_error(7, "bbae", "error placing order for bbae");
        t.mark_all_done(7);

        let status = t.get_status(7);
        assert!(status.contains("bbae: error placing order for bbae"));
        assert!(status.contains("✅ All brokers marked complete."));
    }

    #[test]
    fn test_no_session_status() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        assert_eq!(t.get_status(99), "No active RSA session for this user.");
    }

    #[test]
    fn test_message_chunks_exact_windows() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        t.start_session(7, &brokers(&["bbae"]));

        // Two messages joined with "\n": 2000 + 1 + 1099 = 3100 chars.
        t.append_message(7, &"a".repeat(2000));
        t.append_message(7, &"b".repeat(1099));

        let chunks = t.get_message_chunks(7, 1500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1500);
        assert_eq!(chunks[1].len(), 1500);
        assert_eq!(chunks[2].len(), 100);

        let reassembled = chunks.concat();
        let original = format!("{}\n{}", "a".repeat(2000), "b".repeat(1099));
        assert_eq!(reassembled, original);
    }

    #[test]
    fn test_message_chunks_without_session() {
        let dir = TempDir::new().unwrap();
        let t = tracker(&dir);
        assert!(t.get_message_chunks(7, 1500).is_empty());
    }

    #[test]
    fn test_cleanup_removes_only_expired_sessions() {
        let dir = TempDir::new().unwrap();
        let mut t = tracker(&dir);
        let now = Utc::now();
        t.start_session_at(1, &brokers(&["bbae"]), now - Duration::minutes(120));
        t.start_session_at(2, &brokers(&["bbae"]), now - Duration::minutes(1));

        t.cleanup_expired_at(60, now);
        assert!(!t.has_session(1));
        assert!(t.has_session(2));
    }

    #[test]
    fn test_save_load_round_trip_rehydrates_sets() {
        let dir = TempDir::new().unwrap();
        {
            let mut t = tracker(&dir);
            t.start_session(7, &brokers(&["bbae", "schwab"]));
            t.mark_broker_complete(7, "bbae");
            t.append_message(7, "bbae 1: buying 1 of FRGT");
        }

        let t = tracker(&dir);
        let session = t.get_session_dump(7).unwrap();
        assert_eq!(session.expected_brokers.len(), 2);
        assert!(session.completed_brokers.contains("bbae"));
        assert!(!session.confirmed_all);
        assert_eq!(session.messages.len(), 1);
    }
}
