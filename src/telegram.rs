//! Telegram client wrapper using teloxide.

use teloxide::prelude::*;
use teloxide::types::MessageId;
use tracing::warn;

/// Telegram's hard per-message limit.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, String> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Send text of any length, split at the platform limit.
    pub async fn send_chunked(&self, chat_id: i64, text: &str) -> Result<(), String> {
        for chunk in chunk_text(text, MAX_MESSAGE_LENGTH) {
            self.send_message(chat_id, &chunk).await?;
        }
        Ok(())
    }

    pub async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), String> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id as i32), text)
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to edit message: {e}"))
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), String> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id as i32))
            .await
            .map(|_| ())
            .map_err(|e| format!("Failed to delete message: {e}"))
    }
}

/// Fixed-size character windows. Not word-aware; windows reassemble to the
/// input exactly.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() || chunk_size == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|window| window.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_text("hello", 4096), vec!["hello".to_string()]);
    }

    #[test]
    fn test_long_text_splits_and_reassembles() {
        let text = "x".repeat(9000);
        let chunks = chunk_text(&text, MAX_MESSAGE_LENGTH);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 4096);
        assert_eq!(chunks[2].len(), 9000 - 2 * 4096);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(5000);
        let chunks = chunk_text(&text, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 4096).is_empty());
    }
}
