//! Signaling wire messages and session states

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Signaling message exchanged as a JSON text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Local SDP offer
    Offer(SdpOffer),
    /// Remote SDP answer
    Answer(SdpAnswer),
    /// Trickled ICE candidate
    Candidate(IceCandidate),
    /// Any other `type`; ignored by the session
    #[serde(other)]
    Unknown,
}

impl SignalingMessage {
    /// Decode one text frame
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire `type` value
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer(_) => "offer",
            SignalingMessage::Answer(_) => "answer",
            SignalingMessage::Candidate(_) => "candidate",
            SignalingMessage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpOffer {
    pub sdp: String,
}

impl SdpOffer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpAnswer {
    pub sdp: String,
}

impl SdpAnswer {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Peer connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Session negotiation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    New,
    HaveLocalOffer,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl SessionPhase {
    /// Phases that fire the connection-closed host callback
    pub fn is_down(&self) -> bool {
        matches!(
            self,
            SessionPhase::Disconnected | SessionPhase::Failed | SessionPhase::Closed
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::New => write!(f, "new"),
            SessionPhase::HaveLocalOffer => write!(f, "have_local_offer"),
            SessionPhase::Connected => write!(f, "connected"),
            SessionPhase::Disconnected => write!(f, "disconnected"),
            SessionPhase::Failed => write!(f, "failed"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let json = SignalingMessage::Offer(SdpOffer::new("v=0")).to_json().unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_candidate_wire_format() {
        let msg = SignalingMessage::Candidate(IceCandidate::new("candidate:1").with_mid("0", 0));
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"candidate","candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}"#
        );
    }

    #[test]
    fn test_candidate_without_mid_omits_fields() {
        let msg = SignalingMessage::Candidate(IceCandidate::new("candidate:2"));
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"type":"candidate","candidate":"candidate:2"}"#);
        assert!(!json.contains("null"));
        assert_eq!(SignalingMessage::parse(&json).unwrap(), msg);
    }

    #[test]
    fn test_parse_answer_and_candidate() {
        let answer = SignalingMessage::parse(r#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(answer, SignalingMessage::Answer(SdpAnswer::new("v=0\r\n")));

        let cand = SignalingMessage::parse(
            r#"{"type":"candidate","candidate":"c","sdpMid":"1","sdpMLineIndex":1}"#,
        )
        .unwrap();
        assert_eq!(
            cand,
            SignalingMessage::Candidate(IceCandidate::new("c").with_mid("1", 1))
        );
    }

    #[test]
    fn test_unknown_type() {
        let msg = SignalingMessage::parse(r#"{"type":"bye"}"#).unwrap();
        assert_eq!(msg, SignalingMessage::Unknown);
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(SignalingMessage::parse("{not json").is_err());
        assert!(SignalingMessage::parse(r#"{"sdp":"x"}"#).is_err());
    }
}
