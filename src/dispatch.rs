//! Applies classified events to the stores, the relay, and the server
//! controls. Owns every piece of per-user/per-channel mutable state so the
//! platform handler stays a thin shim.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::classifier::{classify, Event};
use crate::config::Config;
use crate::relay::ChatRelay;
use crate::rsa::lifecycle::{self, apply_updates, parse_lifecycle_response};
use crate::rsa::watchlist::{LifecycleStatus, WatchlistManager};
use crate::rsa::SessionTracker;
use crate::server::ServerControl;
use crate::telegram::TelegramClient;

/// How many raw session messages the debug dump shows.
const SESSION_DUMP_TAIL: usize = 10;

/// Cap on the activity echoed before each analysis chunk is sent.
const ANALYSIS_ECHO_CHARS: usize = 1800;

pub struct Dispatcher {
    config: Arc<Config>,
    watchlist: Arc<Mutex<WatchlistManager>>,
    sessions: Arc<Mutex<SessionTracker>>,
    /// Tickers currently being monitored for broker fills.
    active_trades: Mutex<HashSet<String>>,
    relay: ChatRelay,
    server: ServerControl,
    telegram: Arc<TelegramClient>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<Config>,
        watchlist: Arc<Mutex<WatchlistManager>>,
        sessions: Arc<Mutex<SessionTracker>>,
        relay: ChatRelay,
        server: ServerControl,
        telegram: Arc<TelegramClient>,
    ) -> Self {
        Self {
            config,
            watchlist,
            sessions,
            active_trades: Mutex::new(HashSet::new()),
            relay,
            server,
            telegram,
        }
    }

    /// Route one incoming message.
    pub async fn handle_message(&self, chat_id: i64, user_id: i64, author: &str, text: &str) {
        // Sessions only expire when something comes in; there is no
        // background sweep.
        {
            let mut sessions = self.sessions.lock().await;
            sessions.cleanup_expired_sessions(self.config.session_ttl_minutes);
        }

        let Some(event) = classify(text) else {
            let mut sessions = self.sessions.lock().await;
            if sessions.has_session(user_id) {
                sessions.append_message(user_id, text);
            }
            return;
        };

        info!("📩 {author} ({user_id}) → {event:?}");

        match event {
            Event::WatchlistSummary => self.send_watchlist_summary(chat_id).await,

            Event::Status(Some(ticker)) => {
                let status = self.watchlist.lock().await.get_status(&ticker);
                self.send(chat_id, &status).await;
            }
            Event::Status(None) => {
                self.send(chat_id, "Usage: `..status TICKER`").await;
            }

            Event::LifecycleReport(Some(ticker)) => {
                let report = self.watchlist.lock().await.lifecycle_report(&ticker);
                self.send(chat_id, &report).await;
            }
            Event::LifecycleReport(None) => {
                self.send(chat_id, "Usage: `..lifecycle TICKER`").await;
            }

            Event::SessionDump => {
                let dump = {
                    let sessions = self.sessions.lock().await;
                    sessions.get_session_dump(user_id).map(|session| {
                        let tail: Vec<String> = session
                            .messages
                            .iter()
                            .rev()
                            .take(SESSION_DUMP_TAIL)
                            .map(|m| format!("- {}", m.content))
                            .collect();
                        tail.into_iter().rev().collect::<Vec<_>>().join("\n")
                    })
                };
                match dump {
                    None => self.send(chat_id, "⚠️ No session found for your user.").await,
                    Some(output) => {
                        let output = if output.is_empty() { "(empty)".to_string() } else { output };
                        self.send(chat_id, &format!("🧾 Last 10 messages in session:\n{output}"))
                            .await;
                    }
                }
            }

            Event::StartServer(target) => {
                let reply = match self.server.launch(target) {
                    Ok(msg) => msg,
                    Err(e) => format!("⚠️ {e}"),
                };
                self.send(chat_id, &reply).await;
            }
            Event::StopServer(target) => {
                let reply = match self.server.stop(target) {
                    Ok(msg) => msg,
                    Err(e) => format!("⚠️ {e}"),
                };
                self.send(chat_id, &reply).await;
            }
            Event::ServerStatusQuery => {
                let status = self.server.status().await;
                let reply = self.server.render_status(&status);
                self.send(chat_id, &reply).await;
            }

            Event::AiQuery(query) => {
                self.relay.respond(chat_id, author, &query).await;
            }
            Event::WebSearch(query) => {
                let reply = self.relay.websearch(&query).await;
                if let Err(e) = self.telegram.send_chunked(chat_id, &reply).await {
                    warn!("Failed to deliver web search reply: {e}");
                }
            }

            Event::SplitDateAdd { ticker, date } => {
                let added = self.watchlist.lock().await.add(&ticker, &date);
                if added {
                    self.send(chat_id, &format!("👀 Tracking `{ticker}` for {date} split."))
                        .await;
                }
            }

            Event::TradeTrigger { ticker, .. } => {
                self.active_trades.lock().await.insert(ticker.clone());
                self.send(chat_id, &format!("🟢 Monitoring broker fills for `{ticker}`."))
                    .await;
            }

            Event::StartSession => {
                self.sessions
                    .lock()
                    .await
                    .start_session(user_id, &self.config.expected_brokers);
                self.send(chat_id, "📍 Tracking this RSA session.").await;
            }

            Event::BrokerBuy { broker, account, ticker } => {
                self.append_to_session(user_id, text).await;
                let monitored = self.active_trades.lock().await.contains(&ticker);
                if monitored {
                    let broker_account = format!("{broker}:{account}");
                    let mut watchlist = self.watchlist.lock().await;
                    watchlist.update_lifecycle(
                        &ticker,
                        &broker,
                        &account,
                        LifecycleStatus::Holding,
                        &broker_account,
                    );
                    watchlist.mark_purchase(&ticker, &broker_account, 1);
                }
            }

            Event::BrokerComplete { broker } => {
                self.append_to_session(user_id, text).await;
                self.sessions.lock().await.mark_broker_complete(user_id, &broker);
                self.close_out_broker(&broker).await;
                self.send(chat_id, &format!("✅ Closeout activity logged for `{broker}`."))
                    .await;
            }

            Event::AllComplete => {
                self.append_to_session(user_id, text).await;
                let summary = {
                    let mut sessions = self.sessions.lock().await;
                    sessions.mark_all_done(user_id);
                    sessions.get_status(user_id)
                };
                self.send(chat_id, &format!("📊 RSA session summary:\n{summary}"))
                    .await;
                self.run_lifecycle_reconciliation(chat_id, user_id).await;
                self.active_trades.lock().await.clear();
            }

            Event::BrokerError { broker } => {
                let mut sessions = self.sessions.lock().await;
                sessions.mark_error(user_id, &broker, text);
                sessions.append_message(user_id, text);
            }
        }
    }

    async fn send_watchlist_summary(&self, chat_id: i64) {
        let summaries = {
            let mut watchlist = self.watchlist.lock().await;
            watchlist.sync_purchases_from_lifecycle();
            watchlist.log_and_get_summary()
        };
        if summaries.is_empty() {
            self.send(chat_id, "Watchlist is empty.").await;
            return;
        }
        for summary in summaries {
            self.send(chat_id, &format!("📊 {summary}")).await;
        }
    }

    /// Close out one broker's positions across every monitored ticker.
    async fn close_out_broker(&self, broker: &str) {
        let active: Vec<String> = self.active_trades.lock().await.iter().cloned().collect();
        let prefix = format!("{broker}:");

        let mut watchlist = self.watchlist.lock().await;
        for ticker in &active {
            let Some(entry) = watchlist.get_entry(ticker) else {
                continue;
            };

            let lifecycle_accounts: Vec<(String, String)> = entry
                .brokers
                .get(broker)
                .map(|accounts| {
                    accounts
                        .iter()
                        .map(|(number, state)| (number.clone(), state.account.clone()))
                        .collect()
                })
                .unwrap_or_default();

            let open_counters: Vec<(String, u32)> = entry
                .purchases
                .iter()
                .filter(|(acct, _)| acct.starts_with(&prefix))
                .filter_map(|(acct, bought)| {
                    let closed = entry.closeouts.get(acct).copied().unwrap_or(0);
                    (*bought > closed).then(|| (acct.clone(), bought - closed))
                })
                .collect();

            for (number, account) in lifecycle_accounts {
                watchlist.update_lifecycle(ticker, broker, &number, LifecycleStatus::Closed, &account);
            }
            for (account, remaining) in open_counters {
                watchlist.mark_closeout(ticker, &account, remaining);
            }
        }
    }

    /// Feed the session's accumulated activity through the completion API
    /// chunk by chunk, applying whatever transitions come back. One bad
    /// chunk is reported and skipped; the rest still run.
    async fn run_lifecycle_reconciliation(&self, chat_id: i64, user_id: i64) {
        let chunks = {
            let sessions = self.sessions.lock().await;
            sessions.get_message_chunks(user_id, self.config.analysis_chunk_size)
        };
        if chunks.is_empty() {
            return;
        }

        let (tickers, summary) = {
            let watchlist = self.watchlist.lock().await;
            (watchlist.tickers(), watchlist.get_all_statuses())
        };

        info!("🔍 Reconciling {} chunk(s) of session activity", chunks.len());
        for chunk in &chunks {
            let echo: String = chunk.chars().take(ANALYSIS_ECHO_CHARS).collect();
            self.send(chat_id, &format!("📤 Sending the following messages to AI:\n{echo}"))
                .await;

            let prompt = lifecycle::build_chunk_prompt(&tickers, &summary, chunk);
            let response = match self.relay.client().chat(&prompt, 0.7, 600).await {
                Ok(r) => r,
                Err(e) => {
                    self.send(chat_id, &format!("❌ Failed to process lifecycle update: {e}"))
                        .await;
                    continue;
                }
            };

            let updates = match parse_lifecycle_response(&response) {
                Ok(u) => u,
                Err(e) => {
                    self.send(chat_id, &format!("❌ Failed to process lifecycle update: {e}"))
                        .await;
                    continue;
                }
            };

            let notifications = {
                let mut watchlist = self.watchlist.lock().await;
                apply_updates(&mut watchlist, &updates)
            };
            for notification in notifications {
                self.send(chat_id, &notification.render()).await;
            }
        }
    }

    async fn append_to_session(&self, user_id: i64, text: &str) {
        let mut sessions = self.sessions.lock().await;
        if sessions.has_session(user_id) {
            sessions.append_message(user_id, text);
        }
    }

    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.telegram.send_message(chat_id, text).await {
            warn!("Failed to send to {chat_id}: {e}");
        }
    }
}
