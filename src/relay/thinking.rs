//! Rotating "thinking" indicator shown while a completion is in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::telegram::TelegramClient;

const PHRASES: &[&str] = &[
    "Heh...",
    "Well erm...",
    "Okay so...",
    "Hold on...",
    "Uhh...",
    "Thinking...",
];

const ROTATE_INTERVAL: Duration = Duration::from_secs(5);

/// Sends a placeholder message and cycles it through a phrase rotation until
/// stopped. Stopping deletes the placeholder best-effort; the delete may race
/// the final edit and failures are swallowed.
pub struct ThinkingIndicator {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ThinkingIndicator {
    pub fn start(telegram: Arc<TelegramClient>, chat_id: i64) -> Self {
        let (cancel, mut cancelled) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let Ok(message_id) = telegram.send_message(chat_id, PHRASES[0]).await else {
                return;
            };

            let mut idx = 0usize;
            loop {
                tokio::select! {
                    _ = &mut cancelled => {
                        let _ = telegram.delete_message(chat_id, message_id).await;
                        return;
                    }
                    _ = sleep(ROTATE_INTERVAL) => {
                        idx += 1;
                        let _ = telegram
                            .edit_message(chat_id, message_id, PHRASES[idx % PHRASES.len()])
                            .await;
                    }
                }
            }
        });

        Self { cancel, handle }
    }

    /// Cancel the rotation and wait for the placeholder cleanup to finish.
    pub async fn stop(self) {
        let _ = self.cancel.send(());
        let _ = self.handle.await;
    }
}
