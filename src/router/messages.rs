//! The JSON message envelope.

use serde::{Deserialize, Serialize};

use crate::history::PromptEntry;
use crate::search::SearchResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Hello,
    OpenSession {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
    },
    Stdin {
        session_id: String,
        data_b64: String,
    },
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    CloseSession {
        session_id: String,
    },
    SearchIndex {
        query: String,
        #[serde(default)]
        limit: i64,
        #[serde(default)]
        opened: Vec<String>,
    },
    InjectFiles {
        paths: Vec<String>,
    },
    SavePrompt {
        content: String,
        cwd: String,
    },
    LoadHistory,
    RemovePrompt {
        id: String,
    },
    UpdateSessionConfig {
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        env: Vec<(String, String)>,
    },
    Ping,
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

#[derive(Debug, Clone, Serialize)]
pub struct InjectedBlock {
    pub path: String,
    pub language: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Welcome {
        version: String,
        features: Vec<String>,
    },
    Opened {
        session_id: String,
        pid: u32,
    },
    Stdout {
        session_id: String,
        seq: u64,
        data_b64: String,
    },
    Exit {
        session_id: String,
        code: Option<i32>,
    },
    SearchResult {
        results: Vec<SearchResult>,
        opened: Vec<SearchResult>,
    },
    InjectedFiles {
        blocks: Vec<InjectedBlock>,
    },
    Saved {
        id: String,
    },
    Removed {
        id: String,
    },
    History {
        entries: Vec<PromptEntry>,
    },
    Pong,
    Error {
        code: ErrorCode,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    UnknownSession,
    SessionExited,
    Internal,
    HistoryCorrupt,
    NotFound,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tag_is_camel_case() {
        let raw = r#"{"type":"openSession","command":"bash","cols":100,"rows":40}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::OpenSession { command, cols, rows, .. } => {
                assert_eq!(command.as_deref(), Some("bash"));
                assert_eq!(cols, 100);
                assert_eq!(rows, 40);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse_and_caller_emits_bad_request() {
        let raw = r#"{"type":"doesNotExist"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn server_message_serializes_with_camel_case_type_tag() {
        let msg = ServerMessage::Opened {
            session_id: "abc".to_string(),
            pid: 42,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"opened\""));
        assert!(json.contains("\"sessionId\":\"abc\""));
    }
}
