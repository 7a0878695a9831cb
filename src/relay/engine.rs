//! The relay itself: reformat → complete → chunked reply → memory summary.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::openai::{self, Client, Message};
use crate::relay::memory::ConversationMemory;
use crate::relay::prompts::{Prompts, WEBSEARCH_SYSTEM_PROMPT};
use crate::relay::thinking::ThinkingIndicator;
use crate::telegram::TelegramClient;

const TEMPERATURE: f32 = 0.7;
const MAX_COMPLETION_TOKENS: u32 = 600;
const REFORMAT_TEMPERATURE: f32 = 0.3;
const REFORMAT_MAX_TOKENS: u32 = 150;

pub const WEBSEARCH_FAILURE_REPLY: &str = "An error occurred while performing web search.";

pub struct ChatRelay {
    client: Client,
    telegram: Arc<TelegramClient>,
    memory: Mutex<ConversationMemory>,
    prompts: Prompts,
    /// Append-only prompt/response transcript, enabled by config.
    transcript_path: Option<PathBuf>,
}

impl ChatRelay {
    pub fn new(
        client: Client,
        telegram: Arc<TelegramClient>,
        memory: ConversationMemory,
        prompts: Prompts,
        transcript_path: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            telegram,
            memory: Mutex::new(memory),
            prompts,
            transcript_path,
        }
    }

    /// Handle one `..ai` query end to end.
    pub async fn respond(&self, chat_id: i64, author: &str, raw_query: &str) {
        if raw_query.is_empty() {
            let _ = self
                .telegram
                .send_message(chat_id, "Usage: `..ai <your question>`")
                .await;
            return;
        }

        let indicator = ThinkingIndicator::start(self.telegram.clone(), chat_id);

        let reformatted = self.reformat(raw_query).await;

        let mut chat_messages = vec![Message::system(&self.prompts.system)];
        {
            let mut memory = self.memory.lock().await;
            memory.prune_idle();
            chat_messages.extend(memory.context_for(chat_id));
        }
        chat_messages.push(Message::user(format!("{author}: {reformatted}")));

        let reply = self.complete_or_apologize(&chat_messages).await;

        indicator.stop().await;

        if let Err(e) = self.telegram.send_chunked(chat_id, &reply).await {
            warn!("Failed to deliver reply: {e}");
        }

        if reply == openai::FALLBACK_REPLY {
            return;
        }

        self.log_transcript(author, &reformatted, &reply, "Final Response");

        // Memory stores a summarized reply to keep the window cheap. When
        // the summary pass fails the exchange is simply not remembered.
        let summary_messages = [
            Message::system(&self.prompts.summary),
            Message::user(&reply),
        ];
        match self
            .client
            .chat(&summary_messages, TEMPERATURE, MAX_COMPLETION_TOKENS)
            .await
        {
            Ok(summary) => {
                let mut memory = self.memory.lock().await;
                memory.push_exchange(chat_id, format!("{author}: {raw_query}"), summary.clone());
                self.log_transcript("SYSTEM", "Summary Prompt", &summary, "Memory Summary");
            }
            Err(e) => warn!("Summary pass failed, skipping memory update: {e}"),
        }
    }

    /// One search-enabled completion pass for `!web` queries.
    pub async fn websearch(&self, query: &str) -> String {
        let messages = [
            Message::system(WEBSEARCH_SYSTEM_PROMPT),
            Message::user(format!("!web {query}")),
        ];
        match self
            .client
            .chat(&messages, TEMPERATURE, MAX_COMPLETION_TOKENS)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Web search query failed: {e}");
                WEBSEARCH_FAILURE_REPLY.to_string()
            }
        }
    }

    /// Completion with the uniform apology fallback; the conversational flow
    /// never sees an error.
    pub async fn complete_or_apologize(&self, messages: &[Message]) -> String {
        match self
            .client
            .chat(messages, TEMPERATURE, MAX_COMPLETION_TOKENS)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("❌ Chat API call failed: {e}");
                openai::FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Access to the raw client for callers that build their own prompts.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn reformat(&self, user_input: &str) -> String {
        let messages = [
            Message::system(&self.prompts.reformat),
            Message::user(user_input),
        ];
        match self
            .client
            .chat(&messages, REFORMAT_TEMPERATURE, REFORMAT_MAX_TOKENS)
            .await
        {
            Ok(reformatted) => {
                info!("🔧 Reformatted prompt: {reformatted}");
                self.log_transcript("SYSTEM", user_input, &reformatted, "Reformatted Query");
                reformatted
            }
            Err(e) => {
                warn!("Reformat pass failed, using raw query: {e}");
                user_input.to_string()
            }
        }
    }

    fn log_transcript(&self, user: &str, prompt: &str, response: &str, note: &str) {
        let Some(ref path) = self.transcript_path else {
            return;
        };
        let entry = format!("\n---\nUser: {user}\nNote: {note}\nPrompt: {prompt}\nResponse: {response}\n");
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, entry.as_bytes()));
        if let Err(e) = result {
            warn!("Failed to append transcript: {e}");
        }
    }
}
