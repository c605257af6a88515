use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Kind of frame exchanged between a transport adapter and its client.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Subscribe,
    Unsubscribe,
    Send,
    Connected,
    Subscribed,
    Message,
    Error,
}

/// Error object carried by `error` frames.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FrameError {
    pub code: String,
    pub message: String,
}

/// Top level frame. Transports carry one frame per line or per text message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: Kind,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub correlation: Option<String>,
    #[serde(default)]
    pub error: Option<FrameError>,
}

impl Frame {
    fn bare(kind: Kind) -> Self {
        Self {
            kind,
            destination: None,
            subscription: None,
            payload: None,
            reply_to: None,
            correlation: None,
            error: None,
        }
    }

    pub fn subscribe(destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::bare(Kind::Subscribe)
        }
    }

    pub fn unsubscribe(subscription: impl Into<String>) -> Self {
        Self {
            subscription: Some(subscription.into()),
            ..Self::bare(Kind::Unsubscribe)
        }
    }

    pub fn send(destination: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            payload: Some(payload.into()),
            ..Self::bare(Kind::Send)
        }
    }

    /// First frame a client receives; `subscription` holds nothing, `payload`
    /// carries the connection id.
    pub fn connected(connection: impl Into<String>) -> Self {
        Self {
            payload: Some(connection.into()),
            ..Self::bare(Kind::Connected)
        }
    }

    pub fn subscribed(destination: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            subscription: Some(subscription.into()),
            ..Self::bare(Kind::Subscribed)
        }
    }

    pub fn message(
        destination: impl Into<String>,
        subscription: Option<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            destination: Some(destination.into()),
            subscription,
            payload: Some(payload.into()),
            ..Self::bare(Kind::Message)
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(FrameError {
                code: code.into(),
                message: message.into(),
            }),
            ..Self::bare(Kind::Error)
        }
    }

    /// Parse a single JSON frame, ignoring surrounding whitespace.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text.trim()).context("malformed frame")
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("serializing frame")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let mut frame = Frame::send("/app/request", "hello");
        frame.correlation = Some("42".into());
        let s = frame.to_json().unwrap();
        let de = Frame::parse(&s).unwrap();
        assert_eq!(frame, de);
    }

    #[test]
    fn missing_fields_default_to_none() {
        let frame =
            Frame::parse(r#"{"kind":"subscribe","destination":"/topic/periodic"}"#).unwrap();
        assert_eq!(frame, Frame::subscribe("/topic/periodic"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(Frame::parse(r#"{"kind":"connect"}"#).is_err());
    }
}
