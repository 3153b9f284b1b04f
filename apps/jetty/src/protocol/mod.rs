//! Wire frames for the single ordered channel shared with the registry.
//!
//! Frames are JSON text messages tagged by a `type` field that keeps the
//! original wire vocabulary (`tabs:request`, `terminal:create`, ...).
//! Terminal byte streams are base64-encoded inside `data` fields.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{SessionId, TabId, TabsSnapshot};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid data payload: {0}")]
    Payload(#[from] base64::DecodeError),
}

/// Client-proposed mutations and per-terminal traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    #[serde(rename = "tabs:request")]
    TabsRequest,
    #[serde(rename = "tab:create")]
    TabCreate { id: TabId, name: String },
    #[serde(rename = "tab:close")]
    TabClose { tab_id: TabId },
    #[serde(rename = "tab:rename")]
    TabRename { tab_id: TabId, new_name: String },
    #[serde(rename = "tab:set-session")]
    TabSetSession { tab_id: TabId, session_id: SessionId },
    #[serde(rename = "terminal:create")]
    TerminalCreate {
        terminal_id: TabId,
        cols: u16,
        rows: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    #[serde(rename = "terminal:input")]
    TerminalInput { terminal_id: TabId, data: String },
    #[serde(rename = "terminal:resize")]
    TerminalResize {
        terminal_id: TabId,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "terminal:request-history")]
    TerminalRequestHistory {
        terminal_id: TabId,
        session_id: SessionId,
    },
    #[serde(rename = "terminal:destroy")]
    TerminalDestroy {
        terminal_id: TabId,
        session_id: SessionId,
    },
}

/// Registry broadcasts and per-terminal traffic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    #[serde(rename = "tabs:sync")]
    TabsSync {
        #[serde(flatten)]
        snapshot: TabsSnapshot,
    },
    #[serde(rename = "tab:session-updated")]
    TabSessionUpdated {
        tab_id: TabId,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    #[serde(rename = "terminal:created")]
    TerminalCreated {
        terminal_id: TabId,
        session_id: SessionId,
        restored: bool,
    },
    #[serde(rename = "terminal:output")]
    TerminalOutput { terminal_id: TabId, data: String },
    #[serde(rename = "terminal:history")]
    TerminalHistory { terminal_id: TabId, data: String },
    #[serde(rename = "terminal:dimensions")]
    TerminalDimensions {
        terminal_id: TabId,
        cols: u16,
        rows: u16,
    },
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, WireError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_client_frame(text: &str) -> Result<ClientFrame, WireError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_server_frame(frame: &ServerFrame) -> Result<String, WireError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode_server_frame(text: &str) -> Result<ServerFrame, WireError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_data(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_data(data: &str) -> Result<Vec<u8>, WireError> {
    Ok(BASE64.decode(data)?)
}
