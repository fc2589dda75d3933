//! One logged-in user's chat: the connection, the message log and the
//! composer, driven from a single event loop.

use tracing::{info, warn};

use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, Connector, WsConnector};
use crate::context::{Composer, SelectionToken};
use crate::error::ClientError;
use crate::format::format_outbound;
use crate::permission::{self, FrameSink};
use crate::state::{ChatMessage, MessageLog};

pub const SEND_FAILED_NOTICE: &str =
    "Failed to send message. Please check your connection and try again.";

pub struct ChatSession<C: Connector = WsConnector> {
    user_id: String,
    connection: ConnectionManager<C>,
    log: MessageLog,
    composer: Composer,
    awaiting_reply: bool,
}

impl<C: Connector> ChatSession<C> {
    pub fn new(connection: ConnectionManager<C>, user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            connection,
            log: MessageLog::new(),
            composer: Composer::new(),
            awaiting_reply: false,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    pub fn start(&mut self) {
        info!(user_id = %self.user_id, "starting chat session");
        self.connection.connect();
    }

    /// Logout: closes the connection and forgets the conversation.
    pub fn end(&mut self) {
        info!(user_id = %self.user_id, "ending chat session");
        self.connection.close();
        self.log.clear();
        self.composer.reset();
        self.awaiting_reply = false;
    }

    /// Applies a connection event. Returns `true` when a message was appended.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) -> bool {
        let appended = match self.connection.handle_event(event) {
            Some(raw) => {
                permission::ingest(&mut self.log, &raw);
                self.awaiting_reply = false;
                true
            }
            None => false,
        };
        // A reply cannot arrive on a connection that is gone.
        if self.connection.state() != ConnectionState::Open {
            self.awaiting_reply = false;
        }
        appended
    }

    /// Sends the composed message.
    ///
    /// Returns `Ok(false)` for blank input. While the connection is not open
    /// nothing is touched and `NotConnected` is returned. A transport failure
    /// keeps the input and appends a notice to the log.
    pub fn submit(&mut self) -> Result<bool, ClientError> {
        let text = self.composer.input().trim().to_string();
        if text.is_empty() {
            return Ok(false);
        }
        if !self.connection.is_open() {
            return Err(ClientError::NotConnected);
        }

        let payload = format_outbound(&text, self.composer.selected(), &self.user_id);
        if let Err(err) = self.connection.send(payload) {
            warn!(error = %err, "failed to send message");
            self.log.push(ChatMessage::assistant(SEND_FAILED_NOTICE));
            return Err(err);
        }

        self.log.push(ChatMessage::user(text));
        self.composer.clear_after_send();
        self.awaiting_reply = true;
        Ok(true)
    }

    pub fn decide(&mut self, request_id: &str, approved: bool) -> Result<bool, ClientError> {
        permission::decide(&mut self.log, &mut self.connection, request_id, approved)
    }

    pub fn retry(&mut self, tool_name: &str) -> Result<(), ClientError> {
        permission::retry(&mut self.log, &mut self.connection, tool_name)?;
        self.awaiting_reply = true;
        Ok(())
    }

    pub fn apply_tag_resolution(&mut self, token: SelectionToken, address: Option<String>) -> bool {
        self.composer.apply_tag_resolution(token, address)
    }
}
