//! Typed events parsed from the agent CLI's line-delimited output.
//!
//! The agent emits mostly-JSON lines with a `type` discriminator. Recognized
//! types map onto [`AgentEvent`] variants; anything else (malformed JSON,
//! diagnostic noise, unknown types) degrades to `RawOutput` — parsing never
//! fails a task.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One structured unit of progress information, derived from one output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ToolUse {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
    Message {
        #[serde(default = "default_role")]
        role: String,
        text: String,
    },
    FileOperation {
        op: FileOp,
        path: String,
    },
    CommandExecution {
        command: String,
    },
    Status {
        text: String,
    },
    Error {
        text: String,
    },
    Completion {
        success: bool,
        #[serde(default)]
        summary: String,
    },
    /// Fallback for lines that are not recognized structured events.
    RawOutput {
        text: String,
    },
}

fn default_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Create,
    Modify,
    Delete,
}

impl FileOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

pub struct EventParser;

impl EventParser {
    /// Parse a single complete output line into exactly one event.
    ///
    /// Any decode failure — not JSON, no `type` field, unknown `type`,
    /// missing required fields — yields `RawOutput` with the line verbatim.
    pub fn parse_line(line: &str) -> AgentEvent {
        match serde_json::from_str::<AgentEvent>(line) {
            Ok(event) => event,
            Err(_) => AgentEvent::RawOutput {
                text: line.to_string(),
            },
        }
    }
}

/// Reassembles complete lines from raw byte chunks.
///
/// The process readers hand over whatever `read()` returned; a line may span
/// two chunks or a chunk may hold several lines. The trailing incomplete line
/// is buffered between calls, so splitting only ever happens on newline
/// boundaries (which also sidesteps mid-codepoint UTF-8 splits).
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every newly completed line. Trailing `\r` is
    /// stripped so CRLF output parses the same as LF.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Drain whatever remains after the stream ends (a final line without a
    /// trailing newline), if anything.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Running statistics over a task's event stream.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EventSummary {
    pub tools_used: Vec<String>,
    pub files_changed: Vec<String>,
    pub errors: usize,
}

impl EventSummary {
    pub fn record(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::ToolUse { name, .. } => {
                if !self.tools_used.iter().any(|t| t == name) {
                    self.tools_used.push(name.clone());
                }
            }
            AgentEvent::FileOperation { path, .. } => {
                if !self.files_changed.iter().any(|p| p == path) {
                    self.files_changed.push(path.clone());
                }
            }
            AgentEvent::Error { .. } => self.errors += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_use() {
        let line = r#"{"type":"tool_use","name":"Edit","arguments":{"file_path":"src/main.rs"}}"#;
        let event = EventParser::parse_line(line);
        match event {
            AgentEvent::ToolUse { name, arguments } => {
                assert_eq!(name, "Edit");
                assert_eq!(
                    arguments.get("file_path").unwrap().as_str().unwrap(),
                    "src/main.rs"
                );
            }
            other => panic!("Expected ToolUse, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_message_with_default_role() {
        let event = EventParser::parse_line(r#"{"type":"message","text":"hi"}"#);
        match event {
            AgentEvent::Message { role, text } => {
                assert_eq!(role, "assistant");
                assert_eq!(text, "hi");
            }
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_file_operation() {
        let event =
            EventParser::parse_line(r#"{"type":"file_operation","op":"create","path":"a.rs"}"#);
        assert_eq!(
            event,
            AgentEvent::FileOperation {
                op: FileOp::Create,
                path: "a.rs".to_string()
            }
        );
    }

    #[test]
    fn test_parse_command_execution() {
        let event =
            EventParser::parse_line(r#"{"type":"command_execution","command":"cargo test"}"#);
        assert_eq!(
            event,
            AgentEvent::CommandExecution {
                command: "cargo test".to_string()
            }
        );
    }

    #[test]
    fn test_parse_completion_defaults_summary() {
        let event = EventParser::parse_line(r#"{"type":"completion","success":true}"#);
        match event {
            AgentEvent::Completion { success, summary } => {
                assert!(success);
                assert!(summary.is_empty());
            }
            other => panic!("Expected Completion, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_malformed_json_degrades_to_raw() {
        let event = EventParser::parse_line("{truncated json");
        assert_eq!(
            event,
            AgentEvent::RawOutput {
                text: "{truncated json".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unknown_type_degrades_to_raw() {
        let line = r#"{"type":"telemetry","data":42}"#;
        let event = EventParser::parse_line(line);
        assert_eq!(
            event,
            AgentEvent::RawOutput {
                text: line.to_string()
            }
        );
    }

    #[test]
    fn test_parse_plain_text_degrades_to_raw() {
        let event = EventParser::parse_line("Analyzing the codebase structure...");
        assert!(matches!(event, AgentEvent::RawOutput { .. }));
    }

    #[test]
    fn test_parse_empty_line_yields_one_event() {
        // Blank lines are normally skipped upstream, but the parser itself
        // still maps any input to exactly one event.
        let event = EventParser::parse_line("");
        assert_eq!(
            event,
            AgentEvent::RawOutput {
                text: String::new()
            }
        );
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AgentEvent::Status {
            text: "cloning".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status\""));
    }

    #[test]
    fn test_assembler_single_line_split_across_chunks() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"{\"type\":\"mess").is_empty());
        let lines = assembler.push(b"age\",\"text\":\"hi\"}\n");
        assert_eq!(lines.len(), 1);
        let event = EventParser::parse_line(&lines[0]);
        assert!(matches!(event, AgentEvent::Message { .. }));
        assert!(assembler.finish().is_none());
    }

    #[test]
    fn test_assembler_multiple_lines_in_one_chunk() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"one\ntwo\nthr");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(assembler.push(b"ee\n"), vec!["three".to_string()]);
    }

    #[test]
    fn test_assembler_strips_carriage_return() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"windows\r\n");
        assert_eq!(lines, vec!["windows".to_string()]);
    }

    #[test]
    fn test_assembler_finish_drains_remainder() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"no newline").is_empty());
        assert_eq!(assembler.finish(), Some("no newline".to_string()));
        assert!(assembler.finish().is_none());
    }

    #[test]
    fn test_summary_deduplicates_tools_and_files() {
        let mut summary = EventSummary::default();
        summary.record(&AgentEvent::ToolUse {
            name: "Edit".to_string(),
            arguments: Value::Null,
        });
        summary.record(&AgentEvent::ToolUse {
            name: "Edit".to_string(),
            arguments: Value::Null,
        });
        summary.record(&AgentEvent::FileOperation {
            op: FileOp::Modify,
            path: "src/lib.rs".to_string(),
        });
        summary.record(&AgentEvent::Error {
            text: "boom".to_string(),
        });
        assert_eq!(summary.tools_used, vec!["Edit".to_string()]);
        assert_eq!(summary.files_changed, vec!["src/lib.rs".to_string()]);
        assert_eq!(summary.errors, 1);
    }
}
