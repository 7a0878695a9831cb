//! Tracing layer that mirrors log lines into a Telegram chat.
//!
//! WARN and ERROR go out immediately (prefixed so they stand out in the
//! chat); INFO lines are batched and flushed periodically to keep the log
//! chat readable.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const FLUSH_THRESHOLD: usize = 25;
const MAX_LOG_CHARS: usize = 4000;

pub struct TelegramLogLayer {
    tx: mpsc::UnboundedSender<(Level, String)>,
}

impl TelegramLogLayer {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Level, String)>();
        let chat_id = ChatId(chat_id);

        tokio::spawn(async move {
            let mut batch: Vec<String> = Vec::new();
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    received = rx.recv() => {
                        let Some((level, line)) = received else { break };
                        if level <= Level::WARN {
                            // Drain the batch first so ordering survives.
                            flush(&bot, chat_id, &mut batch).await;
                            let prefix = if level == Level::ERROR { "❌" } else { "⚠️" };
                            deliver(&bot, chat_id, &format!("{prefix} {line}")).await;
                        } else {
                            batch.push(line);
                            if batch.len() >= FLUSH_THRESHOLD {
                                flush(&bot, chat_id, &mut batch).await;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        flush(&bot, chat_id, &mut batch).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, batch: &mut Vec<String>) {
    if batch.is_empty() {
        return;
    }
    let combined = batch.join("\n");
    batch.clear();
    deliver(bot, chat_id, &combined).await;
}

async fn deliver(bot: &Bot, chat_id: ChatId, text: &str) {
    let text = if text.chars().count() > MAX_LOG_CHARS {
        let truncated: String = text.chars().take(MAX_LOG_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    };
    if let Err(e) = bot.send_message(chat_id, text).await {
        eprintln!("Failed to forward log line to Telegram: {e}");
    }
}

struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.line = format!("{value:?}");
        } else if self.line.is_empty() {
            self.line = format!("{} = {value:?}", field.name());
        } else {
            self.line.push_str(&format!(", {} = {value:?}", field.name()));
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::INFO {
            return;
        }

        let mut visitor = LineVisitor { line: String::new() };
        event.record(&mut visitor);

        if self.tx.send((level, visitor.line)).is_err() {
            eprintln!("Log forwarding channel closed, line dropped");
        }
    }
}
