//! Permission protocol: classifying inbound frames into the log, recording
//! the user's decision on a tool request, and asking for a retry after a
//! denied tool call.

use tracing::{debug, info};

use crate::error::ClientError;
use crate::intent::parse_intent;
use crate::protocol::{classify, InboundFrame, OutboundFrame};
use crate::state::{ChatMessage, Decision, MessageLog, PermissionState};

/// Anything that can carry an outbound text frame to the backend.
pub trait FrameSink {
    fn is_open(&self) -> bool;
    fn send(&mut self, payload: String) -> Result<(), ClientError>;
}

/// Classifies one inbound frame and appends exactly one message for it.
pub fn ingest<'a>(log: &'a mut MessageLog, raw: &str) -> &'a ChatMessage {
    match classify(raw) {
        InboundFrame::PermissionRequest { action, request_id } => {
            debug!(%request_id, "permission request received");
            let intent = parse_intent(&action);
            let permission = PermissionState::pending(action, request_id);
            log.push(ChatMessage::permission_request(raw, permission, intent))
        }
        InboundFrame::ToolDenied { tool_name } => {
            debug!(%tool_name, "tool execution denied");
            log.push(ChatMessage::permission_denied(raw, tool_name))
        }
        InboundFrame::Plain => log.push(ChatMessage::assistant(raw)),
    }
}

/// Records the user's answer to a pending permission request and sends it.
///
/// Returns `Ok(false)` without sending when there is no pending request with
/// that id (already decided, or never seen).
pub fn decide<S: FrameSink>(
    log: &mut MessageLog,
    sink: &mut S,
    request_id: &str,
    approved: bool,
) -> Result<bool, ClientError> {
    let Some(permission) = log.pending_request_mut(request_id) else {
        debug!(%request_id, "ignoring decision for request that is not pending");
        return Ok(false);
    };
    if !sink.is_open() {
        return Err(ClientError::NotConnected);
    }

    let payload = OutboundFrame::PermissionResponse {
        request_id: request_id.to_string(),
        approved,
    }
    .encode()?;

    permission.resolve(approved);
    if let Err(err) = sink.send(payload) {
        // Put the request back so the prompt stays actionable.
        permission.decision = Decision::Pending;
        return Err(err);
    }

    info!(%request_id, approved, "permission decision sent");
    Ok(true)
}

/// Asks the backend to try a denied tool again. The old request stays as it
/// was; the backend issues a fresh one if it still needs permission.
pub fn retry<S: FrameSink>(
    log: &mut MessageLog,
    sink: &mut S,
    tool_name: &str,
) -> Result<(), ClientError> {
    if !sink.is_open() {
        return Err(ClientError::NotConnected);
    }
    let text = retry_request_text(tool_name);
    sink.send(text.clone())?;
    log.push(ChatMessage::user(text));
    Ok(())
}

pub fn retry_request_text(tool_name: &str) -> String {
    format!(
        "Please retry the {} action. I will review the new permission request.",
        tool_name
    )
}
