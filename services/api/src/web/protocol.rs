//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the client and the API server
//! for a live conversation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::web::chat::MessageView;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sends a message to the counterpart.
    Send { text: String },

    /// Marks everything received so far as read. Sent when the view regains focus.
    MarkRead,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full conversation, newest first. Replaces whatever the client shows.
    Snapshot { messages: Vec<MessageView> },

    /// Confirms that a `send` was stored.
    Sent { id: Uuid },

    /// Confirms a `mark_read` and reports how many messages changed.
    MarkedRead { count: usize },

    /// Reports an error to the client. The connection stays open unless it is fatal.
    Error { message: String },
}
