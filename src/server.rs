//! Companion game-server controls.
//!
//! The bot launches and stops a long-running server through its launch
//! script, identifies the process by shell-matching the script path, and
//! discovers how players can reach it (ngrok tunnels via the local
//! management API, a static cloudflared hostname, the LAN address).

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

/// Which server a start/stop command is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    /// No explicit target: stop whichever is running, start the main one.
    Auto,
    Main,
    Alt,
}

/// Resolve the argument tail of `..stopserver` / `..startserver`. Unknown
/// tokens fall back to `Auto` rather than failing the command.
pub fn parse_stop_target(args: &str) -> StopTarget {
    for token in args.split_whitespace() {
        match token.to_lowercase().as_str() {
            "main" | "primary" => return StopTarget::Main,
            "alt" | "secondary" => return StopTarget::Alt,
            _ => {}
        }
    }
    StopTarget::Auto
}

/// Point-in-time snapshot of the server processes and their reachability.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub main_running: bool,
    pub alt_running: bool,
    pub ngrok_urls: Vec<String>,
    pub lan_ip: Option<String>,
    pub cloudflared_url: Option<String>,
}

pub fn format_server_status(
    status: &ServerStatus,
    main_script: &str,
    alt_script: &str,
    port: u16,
) -> String {
    let mut out = String::new();

    if status.main_running {
        out.push_str(&format!("🟢 Main server is running ({main_script})\n"));
    } else {
        out.push_str(&format!("🔴 Main server is stopped ({main_script})\n"));
    }
    if status.alt_running {
        out.push_str(&format!("🟢 Alt server is running ({alt_script})\n"));
    } else {
        out.push_str(&format!("🔴 Alt server is stopped ({alt_script})\n"));
    }

    if status.ngrok_urls.is_empty() {
        out.push_str("🌐 Ngrok tunnels: none detected\n");
    } else {
        out.push_str(&format!("🌐 Ngrok tunnels: {}\n", status.ngrok_urls.join(", ")));
    }

    match &status.lan_ip {
        Some(ip) => out.push_str(&format!("🏠 LAN: {ip}:{port}\n")),
        None => out.push_str("🏠 LAN address unavailable\n"),
    }

    match &status.cloudflared_url {
        Some(url) => out.push_str(&format!("☁️ Cloudflared tunnel: {url}")),
        None => out.push_str("☁️ Cloudflared tunnel: none detected"),
    }

    out
}

#[derive(Deserialize)]
struct TunnelList {
    tunnels: Vec<Tunnel>,
}

#[derive(Deserialize)]
struct Tunnel {
    public_url: String,
}

pub struct ServerControl {
    main_script: PathBuf,
    alt_script: PathBuf,
    tunnel_api_url: String,
    cloudflared_url: Option<String>,
    port: u16,
    http: reqwest::Client,
}

impl ServerControl {
    pub fn new(
        main_script: PathBuf,
        alt_script: PathBuf,
        tunnel_api_url: String,
        cloudflared_url: Option<String>,
        port: u16,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self {
            main_script,
            alt_script,
            tunnel_api_url,
            cloudflared_url,
            port,
            http,
        }
    }

    pub fn launch(&self, target: StopTarget) -> Result<String, String> {
        let script = match target {
            StopTarget::Alt => &self.alt_script,
            _ => &self.main_script,
        };
        if !script.exists() {
            return Err(format!("Launch script not found: {}", script.display()));
        }
        if is_running(script) {
            return Ok(format!("Server already running ({})", script.display()));
        }

        Command::new("bash")
            .arg(script)
            .spawn()
            .map_err(|e| format!("Failed to launch {}: {e}", script.display()))?;
        info!("🚀 Launched server script {}", script.display());
        Ok(format!("Server starting ({})", script.display()))
    }

    pub fn stop(&self, target: StopTarget) -> Result<String, String> {
        let script = match target {
            StopTarget::Main => &self.main_script,
            StopTarget::Alt => &self.alt_script,
            StopTarget::Auto => {
                if is_running(&self.main_script) {
                    &self.main_script
                } else if is_running(&self.alt_script) {
                    &self.alt_script
                } else {
                    return Ok("No server process found.".to_string());
                }
            }
        };

        let output = Command::new("pkill")
            .arg("-f")
            .arg(script)
            .output()
            .map_err(|e| format!("Failed to run pkill: {e}"))?;

        if output.status.success() {
            info!("🛑 Stopped server matching {}", script.display());
            Ok(format!("Server stopped ({})", script.display()))
        } else {
            Ok(format!("No process matched {}", script.display()))
        }
    }

    pub async fn status(&self) -> ServerStatus {
        ServerStatus {
            main_running: is_running(&self.main_script),
            alt_running: is_running(&self.alt_script),
            ngrok_urls: self.discover_tunnels().await,
            lan_ip: lan_ip(),
            cloudflared_url: self.cloudflared_url.clone(),
        }
    }

    pub fn render_status(&self, status: &ServerStatus) -> String {
        format_server_status(
            status,
            &self.main_script.display().to_string(),
            &self.alt_script.display().to_string(),
            self.port,
        )
    }

    /// Ask the local tunnel daemon for active public URLs. A down daemon is
    /// normal and yields an empty list.
    async fn discover_tunnels(&self) -> Vec<String> {
        let url = format!("{}/api/tunnels", self.tunnel_api_url.trim_end_matches('/'));
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Tunnel API unreachable: {e}");
                return Vec::new();
            }
        };
        match response.json::<TunnelList>().await {
            Ok(list) => list.tunnels.into_iter().map(|t| t.public_url).collect(),
            Err(e) => {
                warn!("Tunnel API returned malformed payload: {e}");
                Vec::new()
            }
        }
    }
}

fn is_running(script: &std::path::Path) -> bool {
    Command::new("pgrep")
        .arg("-f")
        .arg(script)
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Best-effort LAN address: route a UDP socket and read the local side.
fn lan_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stop_target_defaults_to_auto() {
        assert_eq!(parse_stop_target(""), StopTarget::Auto);
        assert_eq!(parse_stop_target("somethingelse"), StopTarget::Auto);
    }

    #[test]
    fn test_parse_stop_target_keywords() {
        assert_eq!(parse_stop_target("main"), StopTarget::Main);
        assert_eq!(parse_stop_target("primary server"), StopTarget::Main);
        assert_eq!(parse_stop_target("Alt"), StopTarget::Alt);
        assert_eq!(parse_stop_target("the secondary one"), StopTarget::Alt);
    }

    #[test]
    fn test_format_includes_paths_and_network_details() {
        let status = ServerStatus {
            main_running: true,
            alt_running: false,
            ngrok_urls: vec!["https://example.ngrok.io".to_string()],
            lan_ip: Some("192.168.1.23".to_string()),
            cloudflared_url: Some("mc.example.com:25565".to_string()),
        };

        let result = format_server_status(&status, "/srv/mc/start.sh", "/srv/mc/start_alt.sh", 25565);

        assert!(result.contains("Main server is running"));
        assert!(result.contains("Alt server is stopped"));
        assert!(result.contains("/srv/mc/start.sh"));
        assert!(result.contains("/srv/mc/start_alt.sh"));
        assert!(result.contains("https://example.ngrok.io"));
        assert!(result.contains("192.168.1.23:25565"));
        assert!(result.contains("Ngrok tunnels"));
        assert!(result.contains("Cloudflared tunnel: mc.example.com:25565"));
    }

    #[test]
    fn test_format_handles_missing_network_details() {
        let status = ServerStatus {
            main_running: false,
            alt_running: false,
            ngrok_urls: Vec::new(),
            lan_ip: None,
            cloudflared_url: None,
        };

        let result = format_server_status(&status, "/srv/mc/start.sh", "/srv/mc/start_alt.sh", 25565);

        assert!(result.contains("none detected"));
        assert!(result.contains("unavailable"));
        assert!(result.contains("Cloudflared tunnel"));
    }
}
