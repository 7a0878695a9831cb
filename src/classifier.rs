//! Pure classification of incoming chat text into dispatch events.
//!
//! All pattern knowledge lives here; the dispatcher only ever sees an
//! `Event`, so wording changes never touch the state machines. Rules are
//! ordered and first match wins.

use std::sync::LazyLock;

use regex::Regex;

use crate::server::StopTarget;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `..watchlist` / `..summary` / `..all`: full watchlist dump.
    WatchlistSummary,
    /// `..status TICKER`.
    Status(Option<String>),
    /// `..lifecycle TICKER`.
    LifecycleReport(Option<String>),
    /// `..sessiondump`: last few raw session messages.
    SessionDump,
    /// `..startserver [main|alt]`.
    StartServer(StopTarget),
    /// `..stopserver [main|alt]`.
    StopServer(StopTarget),
    /// `..serverstatus`.
    ServerStatusQuery,
    /// `..ai <query>`: relay to the completion API.
    AiQuery(String),
    /// `!web <query>`: search-enabled completion pass.
    WebSearch(String),
    /// Split announcement matched in broker chatter.
    SplitDateAdd { ticker: String, date: String },
    /// `!rsa buy|sell [qty] TICKER`: begin monitoring broker fills.
    TradeTrigger {
        action: TradeAction,
        quantity: Option<u32>,
        ticker: String,
    },
    /// Bare `!rsa`: start a confirmation session.
    StartSession,
    /// Broker fill notice: `<broker> <n>: buying ... of TICKER`.
    BrokerBuy {
        broker: String,
        account: String,
        ticker: String,
    },
    /// `all <broker> transactions complete`.
    BrokerComplete { broker: String },
    /// Literal `all commands complete in all brokers`.
    AllComplete,
    /// `error ... order ... for|on <broker>`.
    BrokerError { broker: String },
}

static SPLIT_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*\|\s*([A-Z]+)\*\*.*?(\d{4}-\d{2}-\d{2})").unwrap()
});

static TRADE_TRIGGER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^!rsa\s+(buy|sell)\s+(?:(\d+)\s+)?([a-z]+)").unwrap()
});

static BROKER_BUY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\w+)\s+(\d+): buying .* of ([a-z]+)").unwrap()
});

static BROKER_COMPLETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^all (\w+) transactions complete").unwrap()
});

static BROKER_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error.*order.*(?:for|on) (\w+)").unwrap()
});

/// Classify one message. Returns None when no rule matches; the dispatcher
/// decides what (if anything) to do with unmatched text.
pub fn classify(text: &str) -> Option<Event> {
    let content = text.trim();
    let lowered = content.to_lowercase();

    if lowered.starts_with("..watchlist")
        || lowered.starts_with("..summary")
        || lowered.starts_with("..all")
    {
        return Some(Event::WatchlistSummary);
    }

    if lowered.starts_with("..status") {
        return Some(Event::Status(second_token(content)));
    }

    if lowered.starts_with("..lifecycle") {
        return Some(Event::LifecycleReport(second_token(content)));
    }

    if lowered.starts_with("..sessiondump") {
        return Some(Event::SessionDump);
    }

    if let Some(rest) = strip_command(&lowered, "..startserver") {
        return Some(Event::StartServer(crate::server::parse_stop_target(rest)));
    }

    if let Some(rest) = strip_command(&lowered, "..stopserver") {
        return Some(Event::StopServer(crate::server::parse_stop_target(rest)));
    }

    if lowered.starts_with("..serverstatus") {
        return Some(Event::ServerStatusQuery);
    }

    if let Some(query) = content.strip_prefix("..ai") {
        return Some(Event::AiQuery(query.trim().to_string()));
    }

    if let Some(query) = content.strip_prefix("!web ") {
        return Some(Event::WebSearch(query.trim().to_string()));
    }

    if lowered.contains("split date") && lowered.contains("watchlist") {
        if let Some(caps) = SPLIT_DATE.captures(content) {
            return Some(Event::SplitDateAdd {
                ticker: caps[1].to_uppercase(),
                date: caps[2].to_string(),
            });
        }
        return None;
    }

    // More specific than the bare `!rsa` trigger, so it must come first.
    if let Some(caps) = TRADE_TRIGGER.captures(content) {
        let action = if caps[1].eq_ignore_ascii_case("buy") {
            TradeAction::Buy
        } else {
            TradeAction::Sell
        };
        return Some(Event::TradeTrigger {
            action,
            quantity: caps.get(2).and_then(|m| m.as_str().parse().ok()),
            ticker: caps[3].to_uppercase(),
        });
    }

    if lowered.starts_with("!rsa") {
        return Some(Event::StartSession);
    }

    if let Some(caps) = BROKER_BUY.captures(content) {
        return Some(Event::BrokerBuy {
            broker: caps[1].to_lowercase(),
            account: caps[2].to_string(),
            ticker: caps[3].to_uppercase(),
        });
    }

    if let Some(caps) = BROKER_COMPLETE.captures(content) {
        return Some(Event::BrokerComplete {
            broker: caps[1].to_lowercase(),
        });
    }

    if lowered.contains("all commands complete in all brokers") {
        return Some(Event::AllComplete);
    }

    if let Some(caps) = BROKER_ERROR.captures(content) {
        return Some(Event::BrokerError {
            broker: caps[1].to_lowercase(),
        });
    }

    None
}

fn second_token(content: &str) -> Option<String> {
    content
        .split_whitespace()
        .nth(1)
        .map(|t| t.to_uppercase())
}

fn strip_command<'a>(lowered: &'a str, command: &str) -> Option<&'a str> {
    lowered.strip_prefix(command).map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchlist_summary_aliases() {
        assert_eq!(classify("..watchlist"), Some(Event::WatchlistSummary));
        assert_eq!(classify("..summary"), Some(Event::WatchlistSummary));
        assert_eq!(classify("..all"), Some(Event::WatchlistSummary));
    }

    #[test]
    fn test_status_with_and_without_ticker() {
        assert_eq!(
            classify("..status frgt"),
            Some(Event::Status(Some("FRGT".to_string())))
        );
        assert_eq!(classify("..status"), Some(Event::Status(None)));
    }

    #[test]
    fn test_lifecycle_report() {
        assert_eq!(
            classify("..lifecycle FRGT"),
            Some(Event::LifecycleReport(Some("FRGT".to_string())))
        );
    }

    #[test]
    fn test_ai_query_strips_prefix() {
        assert_eq!(
            classify("..ai what is a reverse split?"),
            Some(Event::AiQuery("what is a reverse split?".to_string()))
        );
        assert_eq!(classify("..ai"), Some(Event::AiQuery(String::new())));
    }

    #[test]
    fn test_web_search() {
        assert_eq!(
            classify("!web FRGT reverse split news"),
            Some(Event::WebSearch("FRGT reverse split news".to_string()))
        );
    }

    #[test]
    fn test_split_date_add() {
        let text = "New split date posted to watchlist: **| FRGT** effective 2026-09-10";
        assert_eq!(
            classify(text),
            Some(Event::SplitDateAdd {
                ticker: "FRGT".to_string(),
                date: "2026-09-10".to_string(),
            })
        );
    }

    #[test]
    fn test_split_date_keywords_without_pattern() {
        assert_eq!(classify("the split date watchlist is empty"), None);
    }

    #[test]
    fn test_trade_trigger_not_shadowed_by_session_start() {
        assert_eq!(
            classify("!rsa buy 1 FRGT"),
            Some(Event::TradeTrigger {
                action: TradeAction::Buy,
                quantity: Some(1),
                ticker: "FRGT".to_string(),
            })
        );
        assert_eq!(
            classify("!rsa sell frgt"),
            Some(Event::TradeTrigger {
                action: TradeAction::Sell,
                quantity: None,
                ticker: "FRGT".to_string(),
            })
        );
        assert_eq!(classify("!rsa"), Some(Event::StartSession));
    }

    #[test]
    fn test_broker_buy_capture() {
        assert_eq!(
            classify("BBAE 1: buying 1 share of FRGT"),
            Some(Event::BrokerBuy {
                broker: "bbae".to_string(),
                account: "1".to_string(),
                ticker: "FRGT".to_string(),
            })
        );
    }

    #[test]
    fn test_broker_complete() {
        assert_eq!(
            classify("All Schwab transactions complete"),
            Some(Event::BrokerComplete {
                broker: "schwab".to_string()
            })
        );
    }

    #[test]
    fn test_all_complete_literal() {
        assert_eq!(
            classify("ok, all commands complete in all brokers"),
            Some(Event::AllComplete)
        );
    }

    #[test]
    fn test_broker_error() {
        assert_eq!(
            classify("Error placing sell order for webull"),
            Some(Event::BrokerError {
                broker: "webull".to_string()
            })
        );
        assert_eq!(
            classify("error: could not submit order on schwab"),
            Some(Event::BrokerError {
                broker: "schwab".to_string()
            })
        );
    }

    #[test]
    fn test_server_commands() {
        assert_eq!(
            classify("..stopserver alt"),
            Some(Event::StopServer(StopTarget::Alt))
        );
        assert_eq!(
            classify("..startserver"),
            Some(Event::StartServer(StopTarget::Auto))
        );
        assert_eq!(classify("..serverstatus"), Some(Event::ServerStatusQuery));
    }

    #[test]
    fn test_plain_chatter_is_unclassified() {
        assert_eq!(classify("good morning everyone"), None);
        assert_eq!(classify(""), None);
    }
}
