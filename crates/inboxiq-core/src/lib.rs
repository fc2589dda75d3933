pub mod api;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod format;
pub mod intent;
pub mod line;
pub mod permission;
pub mod protocol;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use api::{ApiClient, EmailAccount, Session, Tag};
pub use config::Config;
pub use connection::{endpoint_for_user, ConnectionEvent, ConnectionManager, ConnectionState, Connector, WsConnector};
pub use context::{Candidate, Category, Committed, Composer, ContextKind, SelectedContext, SelectionToken, SuggestionState};
pub use error::ClientError;
pub use format::format_outbound;
pub use intent::{parse_intent, ParsedIntent};
pub use line::LineInput;
pub use permission::FrameSink;
pub use session::ChatSession;
pub use state::{ChatMessage, ChatRole, Decision, MessageId, MessageKind, MessageLog, PermissionState};
