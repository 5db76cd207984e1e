//! Public URL via an ngrok agent child process
//!
//! The agent is started as `ngrok http <port> --authtoken <token>` and the
//! public URL is read back from its local inspection API.

use meshrelay_core::{RelayError, Result};
use meshrelay_gen::config::TunnelConfig;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A running tunnel; the agent is stopped when this is dropped
pub struct Tunnel {
    child: Child,
    public_url: String,
}

impl Tunnel {
    /// Launch the agent and block until it reports a public URL
    pub fn start(config: &TunnelConfig, auth_token: &str, port: u16) -> Result<Self> {
        let child = Command::new(&config.ngrok_path)
            .args(agent_args(port, auth_token))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RelayError::Tunnel(format!("Failed to start '{}': {}", config.ngrok_path, e))
            })?;

        // Owning the child from here on means every error path stops it
        let mut tunnel = Tunnel {
            child,
            public_url: String::new(),
        };
        tunnel.public_url = tunnel.wait_for_url(config)?;
        info!(public_url = %tunnel.public_url, "tunnel established");
        Ok(tunnel)
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    fn wait_for_url(&mut self, config: &TunnelConfig) -> Result<String> {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(2)))
            .build()
            .into();
        let url = format!("{}/api/tunnels", config.api_url.trim_end_matches('/'));
        let deadline = Instant::now() + Duration::from_secs(config.startup_timeout_secs);

        loop {
            if let Some(status) = self.child.try_wait()? {
                return Err(RelayError::Tunnel(format!(
                    "ngrok exited with {}: {}",
                    status,
                    self.stderr_output()
                )));
            }

            match fetch_tunnels(&agent, &url) {
                Ok(body) => {
                    if let Some(public_url) = parse_public_url(&body) {
                        return Ok(public_url);
                    }
                    debug!("ngrok is up but has no tunnel yet");
                }
                Err(e) => debug!(error = %e, "ngrok API not ready"),
            }

            if Instant::now() >= deadline {
                return Err(RelayError::Tunnel(format!(
                    "No public URL from {} after {}s",
                    url, config.startup_timeout_secs
                )));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn stderr_output(&mut self) -> String {
        let mut output = String::new();
        if let Some(stderr) = self.child.stderr.as_mut() {
            let _ = stderr.read_to_string(&mut output);
        }
        output.trim().to_string()
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!(error = %e, "failed to stop ngrok");
            }
            let _ = self.child.wait();
        }
    }
}

fn agent_args(port: u16, auth_token: &str) -> Vec<String> {
    vec![
        "http".to_string(),
        port.to_string(),
        "--authtoken".to_string(),
        auth_token.to_string(),
        "--log".to_string(),
        "false".to_string(),
    ]
}

fn fetch_tunnels(agent: &ureq::Agent, url: &str) -> Result<serde_json::Value> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| RelayError::Tunnel(e.to_string()))?;
    let mut body = Vec::new();
    response
        .into_body()
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| RelayError::Tunnel(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| RelayError::Tunnel(e.to_string()))
}

/// Pick the public URL out of an `/api/tunnels` listing, preferring https
pub fn parse_public_url(body: &serde_json::Value) -> Option<String> {
    let urls: Vec<&str> = body
        .get("tunnels")?
        .as_array()?
        .iter()
        .filter_map(|t| t.get("public_url").and_then(|u| u.as_str()))
        .collect();
    urls.iter()
        .find(|u| u.starts_with("https://"))
        .or_else(|| urls.first())
        .map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefers_https() {
        let body = serde_json::json!({
            "tunnels": [
                { "proto": "http", "public_url": "http://abc.ngrok-free.app" },
                { "proto": "https", "public_url": "https://abc.ngrok-free.app" }
            ]
        });
        assert_eq!(parse_public_url(&body).as_deref(), Some("https://abc.ngrok-free.app"));
    }

    #[test]
    fn test_parse_falls_back_to_first() {
        let body = serde_json::json!({ "tunnels": [{ "public_url": "tcp://0.tcp.ngrok.io:1234" }] });
        assert_eq!(parse_public_url(&body).as_deref(), Some("tcp://0.tcp.ngrok.io:1234"));
    }

    #[test]
    fn test_parse_empty_listing() {
        assert_eq!(parse_public_url(&serde_json::json!({ "tunnels": [] })), None);
        assert_eq!(parse_public_url(&serde_json::json!({})), None);
    }

    #[test]
    fn test_agent_args() {
        let args = agent_args(5000, "tok_123");
        assert_eq!(&args[..4], &["http", "5000", "--authtoken", "tok_123"]);
    }

    #[test]
    fn test_missing_binary_is_tunnel_error() {
        let config = TunnelConfig {
            ngrok_path: "/nonexistent/meshrelay/ngrok".to_string(),
            ..Default::default()
        };
        let err = Tunnel::start(&config, "tok", 5000).err().unwrap();
        assert_eq!(err.kind(), meshrelay_core::ErrorKind::Tunnel);
    }
}
