//! Scheduled watchlist broadcasts.
//!
//! A background task evaluates the configured cron expressions in the
//! configured timezone and posts the watchlist summary to the announce chat
//! at each firing. The task runs on the runtime; it never touches the stores
//! from outside it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::rsa::watchlist::WatchlistManager;
use crate::telegram::TelegramClient;

/// Earliest firing across all schedules, strictly after `after`.
pub fn next_occurrence(schedules: &[Schedule], tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedules
        .iter()
        .filter_map(|schedule| schedule.after(&after.with_timezone(&tz)).next())
        .map(|dt| dt.with_timezone(&Utc))
        .min()
}

pub fn spawn_summary_broadcast(
    schedules: Vec<Schedule>,
    tz: Tz,
    watchlist: Arc<Mutex<WatchlistManager>>,
    telegram: Arc<TelegramClient>,
    chat_id: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = next_occurrence(&schedules, tz, Utc::now()) else {
                warn!("No future summary broadcast; scheduler exiting");
                return;
            };

            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::from_secs(1));
            info!("🕒 Next watchlist broadcast at {next}");
            tokio::time::sleep(wait).await;

            let summaries = {
                let mut watchlist = watchlist.lock().await;
                watchlist.sync_purchases_from_lifecycle();
                watchlist.log_and_get_summary()
            };

            if summaries.is_empty() {
                info!("Watchlist empty, skipping broadcast");
                continue;
            }
            for summary in summaries {
                if let Err(e) = telegram.send_message(chat_id, &format!("📊 {summary}")).await {
                    warn!("Failed to broadcast summary: {e}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_next_occurrence_picks_earliest_schedule() {
        // Daily at 08:45 and 16:30 (sec min hour dom mon dow year).
        let schedules = vec![
            Schedule::from_str("0 45 8 * * * *").unwrap(),
            Schedule::from_str("0 30 16 * * * *").unwrap(),
        ];
        let tz: Tz = "UTC".parse().unwrap();

        let after = DateTime::parse_from_rfc3339("2026-08-07T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_occurrence(&schedules, tz, after).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-08-07T16:30:00+00:00");

        let after = DateTime::parse_from_rfc3339("2026-08-07T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_occurrence(&schedules, tz, after).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-08-08T08:45:00+00:00");
    }

    #[test]
    fn test_next_occurrence_respects_timezone() {
        let schedules = vec![Schedule::from_str("0 45 8 * * * *").unwrap()];
        let tz: Tz = "America/New_York".parse().unwrap();

        // 08:45 America/New_York in August is 12:45 UTC (EDT, UTC-4).
        let after = DateTime::parse_from_rfc3339("2026-08-07T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let next = next_occurrence(&schedules, tz, after).unwrap();
        assert_eq!(next.to_rfc3339(), "2026-08-07T12:45:00+00:00");
    }

    #[test]
    fn test_no_schedules_yields_none() {
        let tz: Tz = "UTC".parse().unwrap();
        assert!(next_occurrence(&[], tz, Utc::now()).is_none());
    }
}
