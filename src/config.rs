// Runtime configuration, read from the environment.

use crate::error::{CallError, Result};
use crate::media::MediaKind;
use crate::peer::types::{ServerConfig, ServerKind};
use std::net::SocketAddr;
use tracing::{debug, info};

/// Env var holding a JSON array of ICE servers.
pub const ICE_SERVERS_ENV: &str = "P2PCALL_ICE_SERVERS";
/// Env var listing the media kinds to acquire, e.g. `audio,video`.
pub const MEDIA_ENV: &str = "P2PCALL_MEDIA";
/// Env var holding the relay listen address.
pub const RELAY_ADDR_ENV: &str = "P2PCALL_RELAY_ADDR";

pub const DEFAULT_RELAY_ADDR: &str = "0.0.0.0:5000";

/// Settings for one participant's call machine.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub media: Vec<MediaKind>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            media: vec![MediaKind::Audio],
        }
    }
}

impl CallConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(ICE_SERVERS_ENV) {
            let servers: Vec<ServerConfig> = serde_json::from_str(&raw)?;
            config = config.with_ice_servers(servers)?;
        }

        if let Ok(raw) = std::env::var(MEDIA_ENV) {
            config.media = parse_media_kinds(&raw)?;
        }

        debug!(
            "Call config: {} ICE servers, media={:?}",
            config.ice_servers.len(),
            config.media
        );
        Ok(config)
    }

    /// Replaces the ICE server list after validating it.
    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Result<Self> {
        validate_ice_servers(&servers)?;
        info!("Using {} custom ICE servers", servers.len());
        self.ice_servers = servers;
        Ok(self)
    }
}

/// Public STUN pair used when nothing is configured.
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: ServerKind::Stun,
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: ServerKind::Stun,
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<()> {
    if servers.is_empty() {
        return Err(CallError::Config("ICE server list is empty".into()));
    }
    for server in servers {
        if server.url.is_empty() {
            return Err(CallError::Config(format!(
                "server {} has an empty URL",
                server.id
            )));
        }
        if server.r#type == ServerKind::Turn
            && (server.username.is_none() || server.credential.is_none())
        {
            return Err(CallError::Config(format!(
                "TURN server {} requires username and credential",
                server.id
            )));
        }
    }
    Ok(())
}

fn parse_media_kinds(raw: &str) -> Result<Vec<MediaKind>> {
    let mut kinds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind: MediaKind = part.parse()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err(CallError::Config(format!("{MEDIA_ENV} names no media kind")));
    }
    Ok(kinds)
}

/// Settings for the signaling relay binary.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: SocketAddr,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(RELAY_ADDR_ENV).unwrap_or_else(|_| DEFAULT_RELAY_ADDR.into());
        let addr = raw
            .parse()
            .map_err(|_| CallError::Config(format!("invalid {RELAY_ADDR_ENV}: {raw}")))?;
        Ok(Self { addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(username: Option<&str>, credential: Option<&str>) -> ServerConfig {
        ServerConfig {
            id: "turn-1".into(),
            r#type: ServerKind::Turn,
            url: "turn:turn.example.org:3478".into(),
            username: username.map(Into::into),
            credential: credential.map(Into::into),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let config = CallConfig::default();
        assert!(validate_ice_servers(&config.ice_servers).is_ok());
        assert_eq!(config.media, vec![MediaKind::Audio]);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        assert!(validate_ice_servers(&[turn(Some("user"), None)]).is_err());
        assert!(validate_ice_servers(&[turn(Some("user"), Some("secret"))]).is_ok());
    }

    #[test]
    fn empty_url_and_empty_list_are_rejected() {
        let mut server = turn(Some("u"), Some("c"));
        server.url.clear();
        assert!(validate_ice_servers(&[server]).is_err());
        assert!(validate_ice_servers(&[]).is_err());
    }

    #[test]
    fn ice_servers_parse_from_json() {
        let raw = r#"[{"id":"a","type":"stun","url":"stun.example.org","username":null,"credential":null}]"#;
        let servers: Vec<ServerConfig> = serde_json::from_str(raw).unwrap();
        let config = CallConfig::default().with_ice_servers(servers).unwrap();
        assert_eq!(config.ice_servers[0].r#type, ServerKind::Stun);
    }

    #[test]
    fn media_kinds_parse_and_dedupe() {
        assert_eq!(
            parse_media_kinds("audio, video,audio").unwrap(),
            vec![MediaKind::Audio, MediaKind::Video]
        );
        assert!(parse_media_kinds(" , ").is_err());
        assert!(parse_media_kinds("screen").is_err());
    }
}
