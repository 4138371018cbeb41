//! Message boards: append-only coordination logs between agents.
//!
//! Each board is one JSONL file under `.agent-boards/`, named after the
//! sanitized board name. Posts append; reads return a bounded tail, or a
//! time-cursored slice when the caller supplies `since`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::storage::{sanitize_name, AppendLog, StorageResult};

/// Directory under the workspace holding one log per board.
pub const BOARDS_DIR: &str = ".agent-boards";

const LOG_SUFFIX: &str = ".jsonl";
const DEFAULT_READ_LIMIT: usize = 50;
const DEFAULT_SENDER: &str = "anonymous";

/// Sentinel `since` value: the caller keeps its own cursor and wants the
/// whole log back.
const SINCE_LAST_READ: &str = "last_read";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMessage {
    pub id: String,
    pub board: String,
    pub from: String,
    pub message: String,
    /// Millisecond timestamp; also the first component of `id`.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Request record for the `message_board` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageBoardRequest {
    #[schemars(description = "One of: post, read, list, clear")]
    pub action: String,
    #[schemars(description = "Board name; sanitized to [A-Za-z0-9_-] for the filename")]
    pub board: Option<String>,
    #[schemars(description = "Message body (post)")]
    pub message: Option<String>,
    #[schemars(description = "Sender label (post; default anonymous)")]
    pub from: Option<String>,
    #[schemars(description = "Free-form tags (post)")]
    pub tags: Option<Vec<String>>,
    #[schemars(
        description = "ISO timestamp cursor (read): only messages after this instant. \
                       The sentinel \"last_read\" returns the whole log."
    )]
    pub since: Option<String>,
    #[schemars(description = "Maximum messages returned (read; default 50)")]
    pub limit: Option<usize>,
}

pub struct MessageBoard {
    root: PathBuf,
}

impl MessageBoard {
    pub fn new(workspace: &Path) -> Self {
        Self {
            root: workspace.join(BOARDS_DIR),
        }
    }

    pub async fn execute(&self, req: MessageBoardRequest) -> StorageResult<Value> {
        match req.action.as_str() {
            "post" => self.post(req),
            "read" => Ok(self.read(req)),
            "list" => Ok(self.list()),
            "clear" => self.clear(req),
            other => Ok(json!({ "status": "error", "error": format!("unknown action: {other}") })),
        }
    }

    fn log(&self, board: &str) -> AppendLog {
        let file = format!("{}{LOG_SUFFIX}", sanitize_name(board));
        AppendLog::new(self.root.join(file))
    }

    fn post(&self, req: MessageBoardRequest) -> StorageResult<Value> {
        let Some(board) = req.board.filter(|b| !b.trim().is_empty()) else {
            return Ok(json!({ "status": "error", "error": "post requires a board" }));
        };
        let Some(message) = req.message.filter(|m| !m.is_empty()) else {
            return Ok(json!({ "status": "error", "error": "post requires a message" }));
        };

        let timestamp = Utc::now().timestamp_millis();
        let record = BoardMessage {
            id: message_id(timestamp),
            board: sanitize_name(&board),
            from: req.from.unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            message,
            timestamp,
            tags: req.tags,
        };
        self.log(&board).append(&record)?;
        Ok(json!({ "status": "posted", "id": record.id }))
    }

    fn read(&self, req: MessageBoardRequest) -> Value {
        let Some(board) = req.board.filter(|b| !b.trim().is_empty()) else {
            return json!({ "status": "error", "error": "read requires a board" });
        };
        let limit = req.limit.unwrap_or(DEFAULT_READ_LIMIT);

        let mut messages: Vec<BoardMessage> = self.log(&board).read_all();
        messages.sort_by_key(|m| m.timestamp);

        match req.since.as_deref() {
            Some(SINCE_LAST_READ) => {
                // Caller-managed cursor: hand the whole log back.
            }
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(cursor) => {
                    let cutoff = cursor.timestamp_millis();
                    messages.retain(|m| m.timestamp > cutoff);
                    tail(&mut messages, limit);
                }
                // Unparsable cursors are ignored rather than rejected.
                Err(_) => tail(&mut messages, limit),
            },
            None => tail(&mut messages, limit),
        }

        json!({
            "status": "ok",
            "board": sanitize_name(&board),
            "count": messages.len(),
            "messages": messages,
        })
    }

    fn list(&self) -> Value {
        let mut boards = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(base) = name.strip_suffix(LOG_SUFFIX) {
                    boards.push(base.to_string());
                }
            }
        }
        boards.sort();
        json!({ "status": "ok", "boards": boards })
    }

    fn clear(&self, req: MessageBoardRequest) -> StorageResult<Value> {
        let Some(board) = req.board.filter(|b| !b.trim().is_empty()) else {
            return Ok(json!({ "status": "error", "error": "clear requires a board" }));
        };
        self.log(&board).remove()?;
        Ok(json!({ "status": "cleared", "board": sanitize_name(&board) }))
    }
}

fn tail(messages: &mut Vec<BoardMessage>, limit: usize) {
    if messages.len() > limit {
        messages.drain(..messages.len() - limit);
    }
}

/// `<ms>-<6 base36 chars>`, unique with high probability within one board.
fn message_id(timestamp: i64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let suffix: String = Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(6)
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect();
    format!("{timestamp}-{suffix}")
}
