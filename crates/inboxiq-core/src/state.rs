//! UI-agnostic chat state
//!
//! The message log is the single source the front end renders from. Entries
//! are appended in event order and never removed during a session; the only
//! mutable part of an entry is the decision on a permission request.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::ParsedIntent;

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Time-based message id with a process-wide sequence suffix, so two
/// messages created in the same millisecond stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn next(at: DateTime<Utc>) -> Self {
        let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}-{}", at.timestamp_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Pending,
    Approved,
    Denied,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionState {
    pub action_description: String,
    pub request_id: String,
    pub decision: Decision,
}

impl PermissionState {
    pub fn pending(action_description: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            action_description: action_description.into(),
            request_id: request_id.into(),
            decision: Decision::Pending,
        }
    }

    /// Moves a pending request to its terminal decision. Returns `false`
    /// (and changes nothing) once a decision has already been recorded.
    pub fn resolve(&mut self, approved: bool) -> bool {
        if self.decision.is_terminal() {
            return false;
        }
        self.decision = if approved {
            Decision::Approved
        } else {
            Decision::Denied
        };
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Plain,
    PermissionRequest {
        permission: PermissionState,
        intent: ParsedIntent,
    },
    /// The backend refused to run a tool; the user may ask for a retry.
    PermissionDenied { tool_name: String },
}

/// A chat message in the assistant conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>, kind: MessageKind) -> Self {
        let timestamp = Utc::now();
        Self {
            id: MessageId::next(timestamp),
            role,
            content: content.into(),
            timestamp,
            kind,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content, MessageKind::Plain)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content, MessageKind::Plain)
    }

    pub fn permission_request(
        content: impl Into<String>,
        permission: PermissionState,
        intent: ParsedIntent,
    ) -> Self {
        Self::new(
            ChatRole::Assistant,
            content,
            MessageKind::PermissionRequest { permission, intent },
        )
    }

    pub fn permission_denied(content: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self::new(
            ChatRole::Assistant,
            content,
            MessageKind::PermissionDenied {
                tool_name: tool_name.into(),
            },
        )
    }

    pub fn permission(&self) -> Option<&PermissionState> {
        match &self.kind {
            MessageKind::PermissionRequest { permission, .. } => Some(permission),
            _ => None,
        }
    }

    pub fn is_pending_request(&self) -> bool {
        self.permission()
            .is_some_and(|p| p.decision == Decision::Pending)
    }

    pub fn denied_tool(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::PermissionDenied { tool_name } => Some(tool_name),
            _ => None,
        }
    }
}

/// Append-only, session-scoped message log
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ChatMessage> {
        self.messages.get(index)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// The still-pending permission state for `request_id`, if any.
    pub fn pending_request_mut(&mut self, request_id: &str) -> Option<&mut PermissionState> {
        self.messages.iter_mut().find_map(|msg| match &mut msg.kind {
            MessageKind::PermissionRequest { permission, .. }
                if permission.request_id == request_id
                    && permission.decision == Decision::Pending =>
            {
                Some(permission)
            }
            _ => None,
        })
    }

    /// Only used when the session ends (logout).
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
