//! Batch reconciliation of session logs into lifecycle transitions.
//!
//! The completion API turns a chunk of raw broker chatter into structured
//! per-ticker/per-broker status updates. Parsing and transition application
//! are pure so they can be tested without any HTTP in the loop; the
//! dispatcher drives the chunk loop and reports per-chunk failures.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::openai::Message;
use crate::rsa::watchlist::{LifecycleStatus, WatchlistManager};

pub const LIFECYCLE_SYSTEM_PROMPT: &str = "You are an assistant helping manage broker positions \
     on a stock watchlist. A stock goes through lifecycle stages: \
     `planned`, `holding`, `awaiting_sell`, `closed`.";

/// One extracted (ticker, broker, number) status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleUpdate {
    pub ticker: String,
    pub broker: String,
    pub broker_number: String,
    pub status: LifecycleStatus,
    pub account: String,
}

/// A transition worth announcing: entering `awaiting_sell` or `closed` from
/// some other status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AwaitingSell {
        ticker: String,
        broker: String,
        broker_number: String,
        account: String,
    },
    Closed {
        ticker: String,
        broker: String,
        broker_number: String,
    },
}

impl Notification {
    pub fn render(&self) -> String {
        match self {
            Notification::AwaitingSell { ticker, broker, broker_number, account } => format!(
                "🔔 `{broker} {broker_number}` is now `awaiting_sell` for `{ticker}`.\n\
                 Please check account `{account}` for return of stock after split."
            ),
            Notification::Closed { ticker, broker, broker_number } => {
                format!("✅ `{broker} {broker_number}` has closed out `{ticker}`.")
            }
        }
    }
}

/// Prompt for one chunk: current watchlist context plus the raw activity log.
pub fn build_chunk_prompt(tickers: &[String], watchlist_summary: &[String], chunk: &str) -> Vec<Message> {
    let user = format!(
        "Watchlist:\n{}\n\n\
         Split dates and broker status:\n{}\n\n\
         Here are recent broker activity logs:\n{chunk}\n\n\
         Based on these messages, tell me for each stock which brokers \
         have entered a new lifecycle stage (like just purchased, or just sold). \
         Return JSON like:\n\
         {{ \"FRGT\": {{ \"BBAE\": {{ \"1\": {{ \"status\": \"holding\", \"account\": \"4365\" }} }} }} }}",
        tickers.join(", "),
        watchlist_summary.join("\n"),
    );

    vec![Message::system(LIFECYCLE_SYSTEM_PROMPT), Message::user(user)]
}

#[derive(Deserialize)]
struct RawBrokerInfo {
    status: LifecycleStatus,
    #[serde(default)]
    account: Option<String>,
}

type RawResponse = BTreeMap<String, BTreeMap<String, BTreeMap<String, RawBrokerInfo>>>;

/// Parse the structured payload returned by the model. Tolerates a Markdown
/// code fence around the JSON body; anything else malformed is an error the
/// caller reports for that chunk alone.
pub fn parse_lifecycle_response(response: &str) -> Result<Vec<LifecycleUpdate>, String> {
    let body = strip_code_fence(response.trim());
    let raw: RawResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed lifecycle payload: {e}"))?;

    let mut updates = Vec::new();
    for (ticker, broker_data) in raw {
        for (broker, accounts) in broker_data {
            for (broker_number, info) in accounts {
                let account = info
                    .account
                    .unwrap_or_else(|| format!("{broker}:{broker_number}"));
                updates.push(LifecycleUpdate {
                    ticker: ticker.to_uppercase(),
                    broker: broker.clone(),
                    broker_number,
                    status: info.status,
                    account,
                });
            }
        }
    }
    Ok(updates)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the optional language tag on the opening fence line.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest).trim()
}

/// Apply updates against the store, comparing each against the previous
/// status so a repeated status never announces twice.
pub fn apply_updates(
    watchlist: &mut WatchlistManager,
    updates: &[LifecycleUpdate],
) -> Vec<Notification> {
    let mut notifications = Vec::new();

    for update in updates {
        let prev_status = watchlist
            .get_broker_state(&update.ticker, &update.broker, &update.broker_number)
            .map(|state| state.status);

        watchlist.update_lifecycle(
            &update.ticker,
            &update.broker,
            &update.broker_number,
            update.status,
            &update.account,
        );

        match update.status {
            LifecycleStatus::AwaitingSell if prev_status != Some(LifecycleStatus::AwaitingSell) => {
                notifications.push(Notification::AwaitingSell {
                    ticker: update.ticker.clone(),
                    broker: update.broker.clone(),
                    broker_number: update.broker_number.clone(),
                    account: update.account.clone(),
                });
            }
            LifecycleStatus::Closed if prev_status != Some(LifecycleStatus::Closed) => {
                notifications.push(Notification::Closed {
                    ticker: update.ticker.clone(),
                    broker: update.broker.clone(),
                    broker_number: update.broker_number.clone(),
                });
            }
            _ => {}
        }
    }

    notifications
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> WatchlistManager {
        WatchlistManager::new(
            dir.path().join("watchlist_store.json"),
            dir.path().join("watchlist_audit.json"),
        )
    }

    fn update(status: LifecycleStatus) -> LifecycleUpdate {
        LifecycleUpdate {
            ticker: "FRGT".to_string(),
            broker: "webull".to_string(),
            broker_number: "1".to_string(),
            status,
            account: "webull:1".to_string(),
        }
    }

    #[test]
    fn test_parse_nested_payload() {
        let response = r#"{ "FRGT": { "BBAE": { "1": { "status": "holding", "account": "4365" } } } }"#;
        let updates = parse_lifecycle_response(response).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].ticker, "FRGT");
        assert_eq!(updates[0].broker, "BBAE");
        assert_eq!(updates[0].broker_number, "1");
        assert_eq!(updates[0].status, LifecycleStatus::Holding);
        assert_eq!(updates[0].account, "4365");
    }

    #[test]
    fn test_parse_tolerates_code_fence() {
        let response = "```json\n{ \"frgt\": { \"webull\": { \"1\": { \"status\": \"closed\" } } } }\n```";
        let updates = parse_lifecycle_response(response).unwrap();
        assert_eq!(updates[0].ticker, "FRGT");
        assert_eq!(updates[0].status, LifecycleStatus::Closed);
        // Missing account falls back to broker:number.
        assert_eq!(updates[0].account, "webull:1");
    }

    #[test]
    fn test_parse_rejects_malformed_payload() {
        assert!(parse_lifecycle_response("not json at all").is_err());
        assert!(parse_lifecycle_response(r#"{ "FRGT": "closed" }"#).is_err());
        assert!(
            parse_lifecycle_response(r#"{ "FRGT": { "webull": { "1": { "status": "vanished" } } } }"#)
                .is_err()
        );
    }

    #[test]
    fn test_transition_notifies_exactly_once() {
        let dir = TempDir::new().unwrap();
        let mut m = manager(&dir);

        let first = apply_updates(&mut m, &[update(LifecycleStatus::Holding)]);
        assert!(first.is_empty());

        let second = apply_updates(&mut m, &[update(LifecycleStatus::Closed)]);
        assert_eq!(second.len(), 1);
        assert!(matches!(second[0], Notification::Closed { .. }));

        // Re-applying the same status is not a transition.
        let third = apply_updates(&mut m, &[update(LifecycleStatus::Closed)]);
        assert!(third.is_empty());
    }

    #[test]
    fn test_awaiting_sell_notification_names_account() {
        let dir = TempDir::new().unwrap();
        let mut m = manager(&dir);

        let notes = apply_updates(&mut m, &[update(LifecycleStatus::AwaitingSell)]);
        assert_eq!(notes.len(), 1);
        let rendered = notes[0].render();
        assert!(rendered.contains("`webull 1` is now `awaiting_sell` for `FRGT`"));
        assert!(rendered.contains("account `webull:1`"));
    }

    #[test]
    fn test_prompt_includes_watchlist_context() {
        let prompt = build_chunk_prompt(
            &["FRGT".to_string()],
            &["📊 **FRGT** split date: 2026-09-10".to_string()],
            "webull 1: buying 1 of FRGT",
        );
        assert_eq!(prompt.len(), 2);
        assert!(prompt[1].content.contains("FRGT"));
        assert!(prompt[1].content.contains("buying 1 of FRGT"));
        assert!(prompt[1].content.contains("Return JSON"));
    }
}
