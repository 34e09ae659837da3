use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::events::{DEFAULT_HOST_TARGET, ON_DETECTIONS};
use crate::video::Resolution;

/// Public STUN servers used when nothing else is configured
pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Label of the channel created with every session
pub const DEFAULT_CHANNEL_LABEL: &str = "detections";

/// Streaming session configuration
///
/// Mutated only through the setters below; consumers take an
/// `Arc<SessionConfig>` snapshot from the [`super::ConfigStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capture throttle rate
    pub target_fps: u32,
    /// Requested stream resolution (None = use the source resolution)
    pub desired_resolution: Option<Resolution>,
    /// Ordered ICE server list
    pub ice_servers: Vec<IceServer>,
    /// Host object and method receiving inbound channel text
    pub message_target: MessageTarget,
    /// Channel created before the first offer
    pub default_channel: String,
    /// Unconnected sessions move to failed after this long
    pub connection_timeout_ms: u64,
    /// H.264 encoder settings
    pub encoder: EncoderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_fps: 30,
            desired_resolution: None,
            ice_servers: DEFAULT_STUN_SERVERS
                .iter()
                .map(|url| IceServer::stun(*url))
                .collect(),
            message_target: MessageTarget::default(),
            default_channel: DEFAULT_CHANNEL_LABEL.to_string(),
            connection_timeout_ms: 30_000,
            encoder: EncoderConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Check every field, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.target_fps == 0 {
            return Err(AppError::Config("target_fps must be greater than zero".into()));
        }
        if let Some(res) = self.desired_resolution {
            if !res.is_valid() {
                return Err(AppError::Config(format!(
                    "desired_resolution must be non-zero, got {}",
                    res
                )));
            }
        }
        for server in &self.ice_servers {
            server.validate()?;
        }
        if self.default_channel.is_empty() {
            return Err(AppError::Config("default_channel must not be empty".into()));
        }
        if self.message_target.target.is_empty() || self.message_target.method.is_empty() {
            return Err(AppError::Config(
                "message_target needs both target and method".into(),
            ));
        }
        if self.connection_timeout_ms == 0 {
            return Err(AppError::Config(
                "connection_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Replace the ICE list with plain (credential-less) servers
    pub fn set_ice_servers<S: AsRef<str>>(&mut self, urls: &[S]) -> Result<()> {
        let servers: Vec<IceServer> = urls
            .iter()
            .map(|u| IceServer::stun(u.as_ref().trim()))
            .collect();
        for server in &servers {
            server.validate()?;
        }
        self.ice_servers = servers;
        Ok(())
    }

    /// Append a TURN server with credentials
    pub fn add_turn_server(&mut self, url: &str, username: &str, credential: &str) -> Result<()> {
        let server = IceServer::turn(url.trim(), username, credential);
        server.validate()?;
        self.ice_servers.push(server);
        Ok(())
    }

    pub fn set_message_target(&mut self, target: &str, method: &str) -> Result<()> {
        if target.is_empty() || method.is_empty() {
            return Err(AppError::Config(
                "message target and method must not be empty".into(),
            ));
        }
        self.message_target = MessageTarget {
            target: target.to_string(),
            method: method.to_string(),
        };
        Ok(())
    }

    pub fn set_target_fps(&mut self, fps: u32) -> Result<()> {
        if fps == 0 {
            return Err(AppError::Config("target_fps must be greater than zero".into()));
        }
        self.target_fps = fps;
        Ok(())
    }

    pub fn set_desired_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        let res = Resolution::new(width, height);
        if !res.is_valid() {
            return Err(AppError::Config(format!(
                "desired_resolution must be non-zero, got {}",
                res
            )));
        }
        self.desired_resolution = Some(res);
        Ok(())
    }
}

/// One ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// `stun:`, `turn:` or `turns:` URL
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    pub fn is_turn(&self) -> bool {
        self.url.starts_with("turn:") || self.url.starts_with("turns:")
    }

    /// Both username and credential present and non-empty
    pub fn has_credentials(&self) -> bool {
        matches!(
            (&self.username, &self.credential),
            (Some(u), Some(c)) if !u.is_empty() && !c.is_empty()
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(AppError::Config("ICE server URL must not be empty".into()));
        }
        if !(self.url.starts_with("stun:") || self.url.starts_with("stuns:") || self.is_turn()) {
            return Err(AppError::Config(format!(
                "Unsupported ICE server URL scheme: {}",
                self.url
            )));
        }
        Ok(())
    }
}

/// Host callback destination for inbound channel text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTarget {
    pub target: String,
    pub method: String,
}

impl Default for MessageTarget {
    fn default() -> Self {
        Self {
            target: DEFAULT_HOST_TARGET.to_string(),
            method: ON_DETECTIONS.to_string(),
        }
    }
}

/// H.264 encoder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Target bitrate in kbps
    pub bitrate_kbps: u32,
    /// Force a keyframe every N frames (0 = encoder default)
    pub keyframe_interval: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: 1000,
            keyframe_interval: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.default_channel, "detections");
        assert_eq!(config.connection_timeout_ms, 30_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"target_fps": 15}"#).unwrap();
        assert_eq!(config.target_fps, 15);
        assert_eq!(config.message_target.method, "OnDetections");
        assert_eq!(config.desired_resolution, None);
    }

    #[test]
    fn test_setters_validate() {
        let mut config = SessionConfig::default();
        assert!(matches!(config.set_target_fps(0), Err(AppError::Config(_))));
        assert_eq!(config.target_fps, 30);

        assert!(config.set_desired_resolution(0, 480).is_err());
        config.set_desired_resolution(640, 480).unwrap();
        assert_eq!(config.desired_resolution, Some(Resolution::VGA));

        assert!(config.set_ice_servers(&["http://example.com"]).is_err());
        assert_eq!(config.ice_servers.len(), 2);
        config.set_ice_servers(&["stun:a.example:3478"]).unwrap();
        assert_eq!(config.ice_servers, vec![IceServer::stun("stun:a.example:3478")]);
    }

    #[test]
    fn test_turn_server() {
        let mut config = SessionConfig::default();
        config
            .add_turn_server("turn:turn.example:3478", "user", "pass")
            .unwrap();
        let turn = config.ice_servers.last().unwrap();
        assert!(turn.is_turn());
        assert!(turn.has_credentials());
        assert!(!IceServer::stun("turn:x").has_credentials());
    }
}
