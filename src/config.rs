use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::MediaKind;

/// A codec the room router accepts. Serialized into the router capabilities
/// returned to joining clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Media configuration for rooms created by [`crate::registry::RoomRegistry`].
/// Every room router is bound to `codecs` for its whole lifetime.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub codecs: Vec<RtpCodecCapability>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let mut vp8_parameters = serde_json::Map::new();
        vp8_parameters.insert(
            "x-google-start-bitrate".to_string(),
            serde_json::Value::from(1000),
        );
        Self {
            codecs: vec![
                RtpCodecCapability {
                    kind: MediaKind::Audio,
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: Some(2),
                    parameters: serde_json::Map::new(),
                },
                RtpCodecCapability {
                    kind: MediaKind::Video,
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: None,
                    parameters: vp8_parameters,
                },
            ],
        }
    }
}

/// Process-level settings for hosts embedding the orchestrator.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long to keep serving after the media engine dies before the
    /// process exits so a supervisor can restart it.
    pub engine_exit_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine_exit_grace: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_codecs() {
        let config = MediaConfig::default();
        assert_eq!(config.codecs.len(), 2);

        let opus = &config.codecs[0];
        assert_eq!(opus.kind, MediaKind::Audio);
        assert_eq!(opus.mime_type, "audio/opus");
        assert_eq!(opus.clock_rate, 48000);
        assert_eq!(opus.channels, Some(2));

        let vp8 = &config.codecs[1];
        assert_eq!(vp8.kind, MediaKind::Video);
        assert_eq!(vp8.mime_type, "video/VP8");
        assert_eq!(vp8.clock_rate, 90000);
        assert_eq!(
            vp8.parameters.get("x-google-start-bitrate"),
            Some(&serde_json::Value::from(1000))
        );
    }

    #[test]
    fn test_codec_wire_shape() {
        let config = MediaConfig::default();
        let json = serde_json::to_value(&config.codecs).unwrap();
        println!("{}", json);
        assert_eq!(json[0]["mimeType"], "audio/opus");
        assert_eq!(json[0]["clockRate"], 48000);
        assert_eq!(json[0]["channels"], 2);
        // VP8 has no channel count, the field is omitted entirely.
        assert!(json[1].get("channels").is_none());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.engine_exit_grace, Duration::from_secs(2));
    }
}
