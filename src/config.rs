use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono_tz::Tz;
use cron::Schedule;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid cron expression.
    InvalidSchedule { expr: String, source: cron::error::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidSchedule { expr, source } => {
                write!(f, "invalid cron expression '{}': {}", expr, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidSchedule { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Chat where broadcasts, summaries, and commands live.
    announce_chat_id: i64,
    /// Chat that receives forwarded WARN/ERROR log lines.
    log_chat_id: Option<i64>,
    /// Completion endpoint (OpenAI-compatible).
    #[serde(default = "default_api_url")]
    api_url: String,
    #[serde(default = "default_model")]
    model: String,
    /// Directory for state files (watchlist, sessions, logs).
    data_dir: Option<String>,
    /// Brokers a session is expected to confirm.
    #[serde(default = "default_expected_brokers")]
    expected_brokers: Vec<String>,
    #[serde(default = "default_session_ttl_minutes")]
    session_ttl_minutes: i64,
    /// Character window for the batch lifecycle analysis.
    #[serde(default = "default_analysis_chunk_size")]
    analysis_chunk_size: usize,
    #[serde(default = "default_memory_max_turns")]
    memory_max_turns: usize,
    #[serde(default = "default_memory_ttl_minutes")]
    memory_ttl_minutes: i64,
    /// Cron expressions (sec min hour dom mon dow year) for the summary
    /// broadcast, evaluated in `timezone`.
    #[serde(default = "default_summary_schedules")]
    summary_schedules: Vec<String>,
    #[serde(default = "default_timezone")]
    timezone: String,
    /// Append prompt/response pairs to `transcript_path`.
    #[serde(default)]
    log_transcript: bool,
    #[serde(default = "default_transcript_path")]
    transcript_path: String,
    system_prompt_file: Option<String>,
    reformat_prompt_file: Option<String>,
    summary_prompt_file: Option<String>,
    /// Companion game-server launch scripts.
    #[serde(default = "default_server_main_script")]
    server_main_script: String,
    #[serde(default = "default_server_alt_script")]
    server_alt_script: String,
    #[serde(default = "default_server_port")]
    server_port: u16,
    /// Local tunnel daemon management API.
    #[serde(default = "default_tunnel_api_url")]
    tunnel_api_url: String,
    cloudflared_url: Option<String>,
}

fn default_api_url() -> String {
    "http://localhost:5051/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_expected_brokers() -> Vec<String> {
    ["bbae", "dspac", "fennel", "public", "schwab", "sofi", "vanguard", "webull"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_session_ttl_minutes() -> i64 {
    60
}

fn default_analysis_chunk_size() -> usize {
    1500
}

fn default_memory_max_turns() -> usize {
    40
}

fn default_memory_ttl_minutes() -> i64 {
    120
}

fn default_summary_schedules() -> Vec<String> {
    vec!["0 45 8 * * * *".to_string(), "0 30 16 * * * *".to_string()]
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_transcript_path() -> String {
    "chat_logs.txt".to_string()
}

fn default_server_main_script() -> String {
    "start_server.sh".to_string()
}

fn default_server_alt_script() -> String {
    "start_server_alt.sh".to_string()
}

fn default_server_port() -> u16 {
    25565
}

fn default_tunnel_api_url() -> String {
    "http://127.0.0.1:4040".to_string()
}

pub struct Config {
    pub telegram_bot_token: String,
    pub announce_chat_id: i64,
    pub log_chat_id: Option<i64>,
    pub api_url: String,
    pub model: String,
    pub data_dir: PathBuf,
    pub expected_brokers: Vec<String>,
    pub session_ttl_minutes: i64,
    pub analysis_chunk_size: usize,
    pub memory_max_turns: usize,
    pub memory_ttl_minutes: i64,
    pub summary_schedules: Vec<Schedule>,
    pub timezone: Tz,
    /// Transcript file to append prompt/response pairs to, when enabled.
    pub transcript_path: Option<PathBuf>,
    pub system_prompt_file: Option<PathBuf>,
    pub reformat_prompt_file: Option<PathBuf>,
    pub summary_prompt_file: Option<PathBuf>,
    pub server_main_script: PathBuf,
    pub server_alt_script: PathBuf,
    pub server_port: u16,
    pub tunnel_api_url: String,
    pub cloudflared_url: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.announce_chat_id == 0 {
            return Err(ConfigError::Validation("announce_chat_id is required".into()));
        }
        if file.expected_brokers.is_empty() {
            return Err(ConfigError::Validation("expected_brokers must not be empty".into()));
        }

        let summary_schedules = file
            .summary_schedules
            .into_iter()
            .map(|expr| {
                Schedule::from_str(&expr)
                    .map_err(|e| ConfigError::InvalidSchedule { expr, source: e })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let timezone: Tz = file
            .timezone
            .parse()
            .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", file.timezone)))?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            announce_chat_id: file.announce_chat_id,
            log_chat_id: file.log_chat_id,
            api_url: file.api_url,
            model: file.model,
            data_dir,
            expected_brokers: file.expected_brokers,
            session_ttl_minutes: file.session_ttl_minutes,
            analysis_chunk_size: file.analysis_chunk_size,
            memory_max_turns: file.memory_max_turns,
            memory_ttl_minutes: file.memory_ttl_minutes,
            summary_schedules,
            timezone,
            transcript_path: file.log_transcript.then(|| PathBuf::from(file.transcript_path)),
            system_prompt_file: file.system_prompt_file.map(PathBuf::from),
            reformat_prompt_file: file.reformat_prompt_file.map(PathBuf::from),
            summary_prompt_file: file.summary_prompt_file.map(PathBuf::from),
            server_main_script: PathBuf::from(file.server_main_script),
            server_alt_script: PathBuf::from(file.server_alt_script),
            server_port: file.server_port,
            tunnel_api_url: file.tunnel_api_url,
            cloudflared_url: file.cloudflared_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "announce_chat_id": -100123456
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.announce_chat_id, -100123456);
        assert_eq!(config.expected_brokers.len(), 8);
        assert_eq!(config.session_ttl_minutes, 60);
        assert_eq!(config.analysis_chunk_size, 1500);
        assert_eq!(config.summary_schedules.len(), 2);
        assert!(config.transcript_path.is_none());
    }

    #[test]
    fn test_transcript_enabled() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "announce_chat_id": -1,
            "log_transcript": true
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.transcript_path, Some(PathBuf::from("chat_logs.txt")));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "telegram_bot_token": "",
            "announce_chat_id": -1
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        let file = write_config(r#"{
            "telegram_bot_token": "notanumber:ABCdef",
            "announce_chat_id": -1
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_missing_announce_chat() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "announce_chat_id": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("announce_chat_id"));
    }

    #[test]
    fn test_invalid_schedule() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "announce_chat_id": -1,
            "summary_schedules": ["not a cron"]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidSchedule { .. }));
    }

    #[test]
    fn test_invalid_timezone() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "announce_chat_id": -1,
            "timezone": "Mars/Olympus_Mons"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("timezone"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
