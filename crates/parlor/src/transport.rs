//! Request addressing and authentication.
//!
//! `Transport` turns a verb-relative path into a fully addressed,
//! authenticated request description. It performs no I/O itself; sending is
//! the [`crate::http`] layer's job.

use crate::config::ClientConfig;

/// Versioned API root, joined onto the configured host.
const API_PREFIX: &str = "/api/v1";

/// Streaming endpoint root, scoped per server.
const GATEWAY_PREFIX: &str = "/ws/servers";

/// Credential scheme, chosen once at construction and fixed thereafter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Single `Authorization: Bearer <token>` header.
    #[default]
    Bearer,
    /// Both `X-Server-Token` and `Authorization: Token <token>`, for
    /// backward compatibility with deployments expecting either.
    ServerToken,
}

#[derive(Clone, Debug)]
pub(crate) struct Transport {
    host: String,
    api_base: String,
    token: String,
    auth: AuthMode,
    user_agent: String,
}

impl Transport {
    pub fn new(cfg: &ClientConfig) -> Self {
        let host = cfg.host.trim_end_matches('/').to_string();
        Self {
            api_base: format!("{host}{API_PREFIX}"),
            host,
            token: cfg.token.clone(),
            auth: cfg.auth,
            user_agent: cfg.user_agent.clone(),
        }
    }

    /// Absolute URL for an API path, tolerating a leading slash.
    pub fn url_for(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.api_base, path)
    }

    /// Headers for every REST request under the configured credential mode.
    pub fn request_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = match self.auth {
            AuthMode::Bearer => {
                vec![("Authorization", format!("Bearer {}", self.token))]
            }
            AuthMode::ServerToken => vec![
                ("X-Server-Token", self.token.clone()),
                ("Authorization", format!("Token {}", self.token)),
            ],
        };
        headers.push(("User-Agent", self.user_agent.clone()));
        headers
    }

    /// Streaming URL for a server: same host and token as the REST side,
    /// scheme swapped to its websocket equivalent, token as a query
    /// parameter.
    pub fn gateway_url(&self, server_id: u64) -> String {
        let ws_host = if let Some(rest) = self.host.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.host.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.host)
        };
        format!(
            "{ws_host}{GATEWAY_PREFIX}/{server_id}?token={}",
            self.token
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(host: &str, auth: AuthMode) -> Transport {
        let cfg = ClientConfig::new(host, "tok").auth_mode(auth);
        Transport::new(&cfg)
    }

    #[test]
    fn joins_paths_without_double_slashes() {
        let t = transport("https://chat.example.com/", AuthMode::Bearer);
        assert_eq!(
            t.url_for("/servers/1/channels"),
            "https://chat.example.com/api/v1/servers/1/channels"
        );
        assert_eq!(
            t.url_for("servers"),
            "https://chat.example.com/api/v1/servers"
        );
    }

    #[test]
    fn bearer_mode_sets_single_auth_header() {
        let t = transport("https://chat.example.com", AuthMode::Bearer);
        let headers = t.request_headers();
        assert!(headers.contains(&("Authorization", "Bearer tok".to_string())));
        assert!(!headers.iter().any(|(k, _)| *k == "X-Server-Token"));
    }

    #[test]
    fn server_token_mode_sets_both_headers() {
        let t = transport("https://chat.example.com", AuthMode::ServerToken);
        let headers = t.request_headers();
        assert!(headers.contains(&("X-Server-Token", "tok".to_string())));
        assert!(headers.contains(&("Authorization", "Token tok".to_string())));
    }

    #[test]
    fn gateway_url_swaps_scheme_and_carries_token() {
        let t = transport("https://chat.example.com", AuthMode::Bearer);
        assert_eq!(
            t.gateway_url(42),
            "wss://chat.example.com/ws/servers/42?token=tok"
        );

        let t = transport("http://localhost:8000", AuthMode::Bearer);
        assert_eq!(
            t.gateway_url(1),
            "ws://localhost:8000/ws/servers/1?token=tok"
        );
    }
}
