mod classifier;
mod config;
mod dispatch;
mod openai;
mod relay;
mod rsa;
mod schedule;
mod server;
mod telegram;
mod telegram_log;

use std::sync::Arc;

use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use config::Config;
use relay::{ChatRelay, ConversationMemory, Prompts};
use rsa::{SessionTracker, WatchlistManager};
use server::ServerControl;
use telegram::TelegramClient;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "splitwatch.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging: stdout + non-blocking file, plus Telegram forwarding
    // when a log chat is configured.
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("splitwatch.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting splitwatch...");
    info!("Loaded config from {config_path}");
    info!("Announce chat: {}", config.announce_chat_id);

    std::fs::create_dir_all(&config.data_dir).ok();
    let telegram = Arc::new(TelegramClient::new(bot.clone()));

    let watchlist = Arc::new(Mutex::new(WatchlistManager::new(
        config.data_dir.join("watchlist_store.json"),
        config.data_dir.join("watchlist_audit.json"),
    )));
    let sessions = Arc::new(Mutex::new(SessionTracker::new(
        config.data_dir.join("rsa_sessions.json"),
    )));

    let prompts = Prompts::load(
        config.system_prompt_file.as_deref(),
        config.reformat_prompt_file.as_deref(),
        config.summary_prompt_file.as_deref(),
    );
    let relay = ChatRelay::new(
        openai::Client::new(config.api_url.clone(), config.model.clone()),
        telegram.clone(),
        ConversationMemory::new(config.memory_max_turns, config.memory_ttl_minutes),
        prompts,
        config.transcript_path.clone(),
    );

    let server = ServerControl::new(
        config.server_main_script.clone(),
        config.server_alt_script.clone(),
        config.tunnel_api_url.clone(),
        config.cloudflared_url.clone(),
        config.server_port,
    );

    schedule::spawn_summary_broadcast(
        config.summary_schedules.clone(),
        config.timezone,
        watchlist.clone(),
        telegram.clone(),
        config.announce_chat_id,
    );

    if let Err(e) = telegram
        .send_message(
            config.announce_chat_id,
            "🤖 Splitwatch is online and ready to go! Type `..ai` to ask me anything.",
        )
        .await
    {
        warn!("Startup announcement failed: {e}");
    }

    let dispatcher = Arc::new(dispatch::Dispatcher::new(
        config.clone(),
        watchlist,
        sessions,
        relay,
        server,
        telegram,
    ));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![dispatcher])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(
    msg: Message,
    state: Arc<dispatch::Dispatcher>,
) -> ResponseResult<()> {
    // Broker fill notices arrive from other accounts and bots, so nothing
    // is filtered here; classification decides what matters.
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (user_id, author) = match msg.from {
        Some(ref user) => (
            user.id.0 as i64,
            user.username
                .clone()
                .unwrap_or_else(|| user.first_name.clone()),
        ),
        None => (
            0,
            msg.sender_chat
                .as_ref()
                .and_then(|chat| chat.title())
                .unwrap_or("unknown")
                .to_string(),
        ),
    };

    state
        .handle_message(msg.chat.id.0, user_id, &author, text)
        .await;
    Ok(())
}
