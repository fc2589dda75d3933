//! Wire format between the client and the assistant backend.
//!
//! Inbound frames are either JSON control frames tagged by `type`, or plain
//! text. Plain text may carry the legacy tool-denial marker
//! `[Permission denied for tool <name>]`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

static DENIAL_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[Permission denied for tool ([A-Za-z0-9_.\-]+)\]").expect("valid regex")
});

/// Control frames the backend sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    PermissionRequest { action: String, request_id: String },
}

/// Control frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    PermissionResponse { request_id: String, approved: bool },
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Result of classifying one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    PermissionRequest { action: String, request_id: String },
    ToolDenied { tool_name: String },
    Plain,
}

/// Classifies a raw inbound frame. Never fails: anything that is neither a
/// recognized control frame nor carries the denial marker is plain text.
pub fn classify(raw: &str) -> InboundFrame {
    if let Ok(ControlFrame::PermissionRequest { action, request_id }) =
        serde_json::from_str::<ControlFrame>(raw)
    {
        return InboundFrame::PermissionRequest { action, request_id };
    }

    if let Some(caps) = DENIAL_MARKER.captures(raw) {
        return InboundFrame::ToolDenied {
            tool_name: caps[1].to_string(),
        };
    }

    InboundFrame::Plain
}
