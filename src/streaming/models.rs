use serde::{Deserialize, Serialize};

use crate::matching::MatchResult;

/// A frame received from a streaming client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Raw audio bytes to append to the session buffer.
    Audio(Vec<u8>),
    /// A JSON control frame, still unparsed.
    Text(String),
}

/// Control actions a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Search,
    Reset,
    Stop,
}

#[derive(Deserialize)]
struct ControlFrame {
    #[serde(default)]
    action: Option<serde_json::Value>,
}

/// Parse a control frame. Unknown or missing actions yield `Ok(None)`.
pub fn parse_control(text: &str) -> Result<Option<ControlAction>, serde_json::Error> {
    let frame: ControlFrame = serde_json::from_str(text)?;
    Ok(frame
        .action
        .and_then(|action| serde_json::from_value(action).ok()))
}

/// Events pushed to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Status {
        message: String,
    },
    Partial {
        data: MatchResult,
        message: String,
    },
    Confirmed {
        data: MatchResult,
        message: String,
    },
    NoMatch {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer_size: Option<usize>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ServerEvent::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn no_match(message: impl Into<String>, buffer_size: usize) -> Self {
        ServerEvent::NoMatch {
            message: message.into(),
            buffer_size: Some(buffer_size),
        }
    }

    /// `partial` or `confirmed` depending on the result.
    pub fn from_match(data: MatchResult) -> Self {
        let summary = format!(
            "\"{}\" by {} ({}/{} matches, {}% confidence)",
            data.title, data.artist, data.matched_hashes, data.min_required, data.confidence
        );

        if data.is_confirmed {
            ServerEvent::Confirmed {
                message: format!("Song confirmed: {}", summary),
                data,
            }
        } else {
            ServerEvent::Partial {
                message: format!("Possible match: {}. Keep sending audio", summary),
                data,
            }
        }
    }

    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Status { .. } => "status",
            ServerEvent::Partial { .. } => "partial",
            ServerEvent::Confirmed { .. } => "confirmed",
            ServerEvent::NoMatch { .. } => "no_match",
            ServerEvent::Error { .. } => "error",
        }
    }
}
