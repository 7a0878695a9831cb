//! Watchlist store and lifecycle update engine.
//!
//! Tickers map to split dates plus per-broker position state. Two views of
//! the same positions coexist: the nested `brokers` lifecycle records and the
//! legacy flat `purchases`/`closeouts` counters the summary commands render.
//! Every mutation persists the whole store and appends an audit record.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Split date used when a ticker is created by a purchase before any split
/// announcement has been seen.
const SENTINEL_SPLIT_DATE: &str = "9999-01-01";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Position lifecycle for one broker account. Ordered in intended use, but
/// the engine never enforces ordering: any status may overwrite any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Planned,
    Holding,
    AwaitingSell,
    Closed,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleStatus::Planned => "planned",
            LifecycleStatus::Holding => "holding",
            LifecycleStatus::AwaitingSell => "awaiting_sell",
            LifecycleStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerState {
    pub status: LifecycleStatus,
    pub account: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub split_date: String,
    /// broker name -> broker number -> position state.
    #[serde(default)]
    pub brokers: BTreeMap<String, BTreeMap<String, BrokerState>>,
    /// Legacy counters keyed by "broker:number" account strings.
    #[serde(default)]
    pub purchases: BTreeMap<String, u32>,
    #[serde(default)]
    pub closeouts: BTreeMap<String, u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl WatchlistEntry {
    fn with_split_date(split_date: &str) -> Self {
        Self {
            split_date: split_date.to_string(),
            brokers: BTreeMap::new(),
            purchases: BTreeMap::new(),
            closeouts: BTreeMap::new(),
            tags: Vec::new(),
            notes: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub ticker: String,
    pub action: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub struct WatchlistManager {
    watchlist: BTreeMap<String, WatchlistEntry>,
    audit_log: Vec<AuditRecord>,
    storage_path: PathBuf,
    audit_log_path: PathBuf,
}

impl WatchlistManager {
    pub fn new(storage_path: PathBuf, audit_log_path: PathBuf) -> Self {
        let mut manager = Self {
            watchlist: BTreeMap::new(),
            audit_log: Vec::new(),
            storage_path,
            audit_log_path,
        };
        manager.load();
        manager
    }

    /// Register a ticker (or update its split date). Returns false on an
    /// unparsable date, leaving the store untouched.
    pub fn add(&mut self, ticker: &str, split_date_str: &str) -> bool {
        let split_date = match NaiveDate::parse_from_str(split_date_str, DATE_FORMAT) {
            Ok(d) => d,
            Err(_) => {
                warn!("Invalid split date format for {ticker}: {split_date_str}");
                return false;
            }
        };

        let ticker = ticker.to_uppercase();
        let date_str = split_date.format(DATE_FORMAT).to_string();
        let entry = self
            .watchlist
            .entry(ticker.clone())
            .or_insert_with(|| WatchlistEntry::with_split_date(&date_str));
        entry.split_date = date_str;

        self.log_action(
            "add_or_update",
            &ticker,
            serde_json::json!({ "split_date": split_date_str }),
        );
        self.persist();
        true
    }

    /// Record a purchase on a broker account, creating the ticker with a
    /// far-future sentinel split date if it is not yet tracked.
    pub fn mark_purchase(&mut self, ticker: &str, broker_account: &str, quantity: u32) {
        let ticker = ticker.to_uppercase();
        let entry = self
            .watchlist
            .entry(ticker.clone())
            .or_insert_with(|| WatchlistEntry::with_split_date(SENTINEL_SPLIT_DATE));
        *entry.purchases.entry(broker_account.to_string()).or_insert(0) += quantity;

        self.log_action(
            "purchase",
            &ticker,
            serde_json::json!({ "account": broker_account, "quantity": quantity }),
        );
        self.persist();
    }

    pub fn mark_closeout(&mut self, ticker: &str, broker_account: &str, quantity: u32) {
        let ticker = ticker.to_uppercase();
        let entry = self
            .watchlist
            .entry(ticker.clone())
            .or_insert_with(|| WatchlistEntry::with_split_date(SENTINEL_SPLIT_DATE));
        *entry.closeouts.entry(broker_account.to_string()).or_insert(0) += quantity;

        self.log_action(
            "closeout",
            &ticker,
            serde_json::json!({ "account": broker_account, "quantity": quantity }),
        );
        self.persist();
    }

    /// Upsert the lifecycle record for one broker/number. The status is
    /// overwritten unconditionally; `last_seen` is stamped with now.
    pub fn update_lifecycle(
        &mut self,
        ticker: &str,
        broker: &str,
        broker_number: &str,
        status: LifecycleStatus,
        account: &str,
    ) {
        let ticker = ticker.to_uppercase();
        let entry = self
            .watchlist
            .entry(ticker.clone())
            .or_insert_with(|| WatchlistEntry::with_split_date(SENTINEL_SPLIT_DATE));

        let accounts = entry.brokers.entry(broker.to_string()).or_default();
        if let Some(prev) = accounts.get(broker_number)
            && prev.status == LifecycleStatus::Closed
            && status != LifecycleStatus::Closed
        {
            warn!("{ticker}: {broker} {broker_number} regressed from closed to {status}");
        }
        accounts.insert(
            broker_number.to_string(),
            BrokerState {
                status,
                account: account.to_string(),
                last_seen: Utc::now(),
            },
        );

        self.log_action(
            "lifecycle",
            &ticker,
            serde_json::json!({
                "broker": broker,
                "broker_number": broker_number,
                "status": status.to_string(),
                "account": account,
            }),
        );
        self.persist();
    }

    pub fn get_broker_state(
        &self,
        ticker: &str,
        broker: &str,
        broker_number: &str,
    ) -> Option<&BrokerState> {
        self.watchlist
            .get(&ticker.to_uppercase())?
            .brokers
            .get(broker)?
            .get(broker_number)
    }

    pub fn get_entry(&self, ticker: &str) -> Option<&WatchlistEntry> {
        self.watchlist.get(&ticker.to_uppercase())
    }

    pub fn tickers(&self) -> Vec<String> {
        self.watchlist.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.watchlist.is_empty()
    }

    pub fn get_status(&self, ticker: &str) -> String {
        self.status_as_of(ticker, Utc::now().date_naive())
    }

    /// Status summary relative to an explicit "today", so tests can pin it.
    pub fn status_as_of(&self, ticker: &str, today: NaiveDate) -> String {
        let ticker = ticker.to_uppercase();
        let Some(data) = self.watchlist.get(&ticker) else {
            return format!("No tracking info for `{ticker}`.");
        };

        let Ok(split_date) = NaiveDate::parse_from_str(&data.split_date, DATE_FORMAT) else {
            return format!("Invalid split date stored for `{ticker}`.");
        };

        let open_positions: Vec<&String> = data
            .purchases
            .iter()
            .filter(|(acct, qty)| **qty > data.closeouts.get(*acct).copied().unwrap_or(0))
            .map(|(acct, _)| acct)
            .collect();

        let mut summary = format!("📊 **{ticker}** split date: {split_date}");
        if today >= split_date {
            summary.push_str(" (✅ passed)\n");
        } else {
            let days_left = (split_date - today).num_days();
            summary.push_str(&format!(" (⏳ {days_left} day(s) left)\n"));
        }
        summary.push_str(&format!("💳 Purchases: {}\n", render_counters(&data.purchases)));
        summary.push_str(&format!("📤 Closeouts: {}\n", render_counters(&data.closeouts)));
        if open_positions.is_empty() {
            summary.push_str("✅ All positions closed.");
        } else {
            let open: Vec<&str> = open_positions.iter().map(|s| s.as_str()).collect();
            summary.push_str(&format!("⚠️ Still open: {}", open.join(", ")));
        }
        summary
    }

    pub fn get_all_statuses(&self) -> Vec<String> {
        self.statuses_as_of(Utc::now().date_naive())
    }

    pub fn statuses_as_of(&self, today: NaiveDate) -> Vec<String> {
        self.watchlist
            .keys()
            .map(|ticker| self.status_as_of(ticker, today))
            .collect()
    }

    /// Summary for the scheduled broadcast: every line also goes to the log.
    pub fn log_and_get_summary(&self) -> Vec<String> {
        info!("===== 🕒 Daily Watchlist Summary =====");
        let summaries = self.get_all_statuses();
        for summary in &summaries {
            info!("{summary}");
        }
        summaries
    }

    /// Per-broker lifecycle listing for one ticker (`..lifecycle`).
    pub fn lifecycle_report(&self, ticker: &str) -> String {
        self.lifecycle_report_as_of(ticker, Utc::now().date_naive())
    }

    pub fn lifecycle_report_as_of(&self, ticker: &str, today: NaiveDate) -> String {
        let ticker = ticker.to_uppercase();
        let Some(data) = self.watchlist.get(&ticker) else {
            return format!("⚠️ `{ticker}` is not on the watchlist.");
        };

        let passed = match NaiveDate::parse_from_str(&data.split_date, DATE_FORMAT) {
            Ok(split_date) if today >= split_date => "✅ passed",
            Ok(_) => "⏳ upcoming",
            Err(_) => "❓ unknown date",
        };

        let mut msg = format!(
            "📋 Lifecycle state for **{ticker}** (split {}, {passed}):\n",
            data.split_date
        );
        for (broker, accounts) in &data.brokers {
            for (number, state) in accounts {
                msg.push_str(&format!(
                    "  • {broker} {number} [{}] → `{}` (last seen {})\n",
                    state.account,
                    state.status,
                    state.last_seen.format("%Y-%m-%d %H:%M"),
                ));
            }
        }
        if data.brokers.is_empty() {
            msg.push_str("  (no broker activity recorded)\n");
        }
        msg
    }

    /// Keep the legacy counters consistent with the lifecycle records:
    /// every `holding` account appears in `purchases`, every `closed`
    /// account in `closeouts`.
    pub fn sync_purchases_from_lifecycle(&mut self) {
        let mut updated = false;
        for (ticker, entry) in self.watchlist.iter_mut() {
            for (broker, accounts) in &entry.brokers {
                for (number, state) in accounts {
                    let acct_str = format!("{broker}:{number}");
                    let target = match state.status {
                        LifecycleStatus::Holding => &mut entry.purchases,
                        LifecycleStatus::Closed => &mut entry.closeouts,
                        _ => continue,
                    };
                    if !target.contains_key(&acct_str) {
                        target.insert(acct_str.clone(), 1);
                        updated = true;
                        info!("🔄 Synced {} from lifecycle → {acct_str} for {ticker}", state.status);
                    }
                }
            }
        }
        if updated {
            self.persist();
        }
    }

    fn log_action(&mut self, action: &str, ticker: &str, metadata: serde_json::Value) {
        self.audit_log.push(AuditRecord {
            timestamp: Utc::now(),
            ticker: ticker.to_string(),
            action: action.to_string(),
            metadata,
        });
    }

    /// Persist, keeping the in-memory state authoritative when the disk
    /// write fails.
    fn persist(&self) {
        if let Err(e) = self.save() {
            error!("❌ Failed to save watchlist: {e}");
        }
    }

    pub fn save(&self) -> Result<(), String> {
        super::write_json_pretty(&self.storage_path, &self.watchlist)?;
        super::write_json_pretty(&self.audit_log_path, &self.audit_log)?;
        info!("💾 Watchlist and audit log saved.");
        Ok(())
    }

    fn load(&mut self) {
        if self.storage_path.exists() {
            match std::fs::read_to_string(&self.storage_path)
                .map_err(|e| e.to_string())
                .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
            {
                Ok(watchlist) => {
                    self.watchlist = watchlist;
                    info!("📂 Loaded watchlist from disk.");
                }
                Err(e) => error!("❌ Failed to load watchlist: {e}"),
            }
        }
        if self.audit_log_path.exists() {
            match std::fs::read_to_string(&self.audit_log_path)
                .map_err(|e| e.to_string())
                .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
            {
                Ok(audit_log) => self.audit_log = audit_log,
                Err(e) => warn!("⚠️ Failed to load audit log: {e}"),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn audit_actions(&self) -> Vec<&str> {
        self.audit_log.iter().map(|r| r.action.as_str()).collect()
    }
}

fn render_counters(counters: &BTreeMap<String, u32>) -> String {
    if counters.is_empty() {
        return "None".to_string();
    }
    counters
        .iter()
        .map(|(acct, qty)| format!("{acct} ×{qty}"))
        .collect::<Vec<_>>()
        .join(", ")
}
