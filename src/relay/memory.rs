//! Bounded per-channel conversation memory.
//!
//! Each channel keeps a short rolling window of (user, summarized assistant)
//! turns that is injected between the system prompt and the new query. Idle
//! channels expire by TTL; expiry takes an explicit clock so tests can pin it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::openai::Message;

struct ChannelHistory {
    turns: Vec<Message>,
    last_active: DateTime<Utc>,
}

pub struct ConversationMemory {
    channels: HashMap<i64, ChannelHistory>,
    max_turns: usize,
    idle_ttl: Duration,
}

impl ConversationMemory {
    pub fn new(max_turns: usize, idle_ttl_minutes: i64) -> Self {
        Self {
            channels: HashMap::new(),
            max_turns,
            idle_ttl: Duration::minutes(idle_ttl_minutes),
        }
    }

    /// The stored turns for a channel, oldest first.
    pub fn context_for(&self, chat_id: i64) -> Vec<Message> {
        self.channels
            .get(&chat_id)
            .map(|h| h.turns.clone())
            .unwrap_or_default()
    }

    pub fn push_exchange(&mut self, chat_id: i64, user_content: String, assistant_content: String) {
        self.push_exchange_at(chat_id, user_content, assistant_content, Utc::now());
    }

    pub fn push_exchange_at(
        &mut self,
        chat_id: i64,
        user_content: String,
        assistant_content: String,
        now: DateTime<Utc>,
    ) {
        let history = self.channels.entry(chat_id).or_insert_with(|| ChannelHistory {
            turns: Vec::new(),
            last_active: now,
        });
        history.turns.push(Message::user(user_content));
        history.turns.push(Message::assistant(assistant_content));
        history.last_active = now;

        if history.turns.len() > self.max_turns {
            let excess = history.turns.len() - self.max_turns;
            history.turns.drain(..excess);
        }
    }

    pub fn prune_idle(&mut self) {
        self.prune_idle_at(Utc::now());
    }

    pub fn prune_idle_at(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.idle_ttl;
        self.channels.retain(|_, history| history.last_active >= cutoff);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::Role;

    #[test]
    fn test_exchanges_accumulate_in_order() {
        let mut memory = ConversationMemory::new(40, 120);
        memory.push_exchange(1, "q1".to_string(), "a1".to_string());
        memory.push_exchange(1, "q2".to_string(), "a2".to_string());

        let context = memory.context_for(1);
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].role, Role::User);
        assert_eq!(context[0].content, "q1");
        assert_eq!(context[3].role, Role::Assistant);
        assert_eq!(context[3].content, "a2");
    }

    #[test]
    fn test_channels_are_independent() {
        let mut memory = ConversationMemory::new(40, 120);
        memory.push_exchange(1, "q1".to_string(), "a1".to_string());

        assert!(memory.context_for(2).is_empty());
    }

    #[test]
    fn test_window_is_bounded() {
        let mut memory = ConversationMemory::new(4, 120);
        for i in 0..5 {
            memory.push_exchange(1, format!("q{i}"), format!("a{i}"));
        }

        let context = memory.context_for(1);
        assert_eq!(context.len(), 4);
        // The oldest exchanges fell off.
        assert_eq!(context[0].content, "q3");
    }

    #[test]
    fn test_idle_channels_expire() {
        let mut memory = ConversationMemory::new(40, 60);
        let now = Utc::now();
        memory.push_exchange_at(1, "old".to_string(), "a".to_string(), now - Duration::minutes(90));
        memory.push_exchange_at(2, "new".to_string(), "a".to_string(), now - Duration::minutes(5));

        memory.prune_idle_at(now);
        assert!(memory.context_for(1).is_empty());
        assert_eq!(memory.context_for(2).len(), 2);
        assert_eq!(memory.channel_count(), 1);
    }
}
