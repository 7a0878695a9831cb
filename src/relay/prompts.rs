//! Relay prompts: compiled-in defaults with optional file overrides.

use std::path::Path;

use tracing::{info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are Splitwatch, an upbeat trading-desk companion for a small \
     group tracking reverse stock splits. Answer clearly and concisely, \
     with a little enthusiasm and no financial advice disclaimers beyond \
     a single short caveat when genuinely warranted.";

const DEFAULT_REFORMAT_PROMPT: &str = "Rewrite the user's message as a clear, self-contained question or \
     instruction for an AI assistant. Keep the meaning, drop the filler. \
     Reply with the rewritten text only.";

const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the assistant response below in one or two sentences, \
     keeping any concrete facts, numbers, and decisions. Reply with the \
     summary only.";

pub const WEBSEARCH_SYSTEM_PROMPT: &str = "Use !web to search the web when relevant.";

pub struct Prompts {
    pub system: String,
    pub reformat: String,
    pub summary: String,
}

impl Prompts {
    /// Defaults, each replaceable by a file named in config. A missing or
    /// unreadable override falls back to the default.
    pub fn load(
        system_path: Option<&Path>,
        reformat_path: Option<&Path>,
        summary_path: Option<&Path>,
    ) -> Self {
        Self {
            system: load_or_default(system_path, DEFAULT_SYSTEM_PROMPT),
            reformat: load_or_default(reformat_path, DEFAULT_REFORMAT_PROMPT),
            summary: load_or_default(summary_path, DEFAULT_SUMMARY_PROMPT),
        }
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self::load(None, None, None)
    }
}

fn load_or_default(path: Option<&Path>, default: &str) -> String {
    let Some(path) = path else {
        return default.to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(text) => {
            info!("Loaded prompt override from {}", path.display());
            text.trim().to_string()
        }
        Err(e) => {
            warn!("Prompt file {} unreadable ({e}), using default", path.display());
            default.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_without_overrides() {
        let prompts = Prompts::default();
        assert!(prompts.system.contains("reverse stock splits"));
        assert!(!prompts.reformat.is_empty());
        assert!(!prompts.summary.is_empty());
    }

    #[test]
    fn test_file_override() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"You are a terse bot.\n").unwrap();

        let prompts = Prompts::load(Some(file.path()), None, None);
        assert_eq!(prompts.system, "You are a terse bot.");
    }

    #[test]
    fn test_missing_override_falls_back() {
        let prompts = Prompts::load(Some(Path::new("/nonexistent/prompt.txt")), None, None);
        assert!(prompts.system.contains("reverse stock splits"));
    }
}
