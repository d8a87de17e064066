//! Incremental assembly of streamed tool calls.
//!
//! Providers stream tool calls as partial deltas spread over many chunks.
//! The assembler merges them into complete [`ToolCall`]s by slot. Slot
//! selection: a numeric `index` wins; otherwise a delta whose `id`
//! matches an existing slot merges there; otherwise a new slot is
//! appended. Argument chunks concatenate in arrival order, so any
//! interleaving that preserves per-slot order yields the same result.

use serde::Deserialize;

use super::{FunctionCall, ToolCall};

/// One streamed chunk's view of the assistant delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
}

/// A partial tool call inside a streamed delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Accumulates tool-call deltas into complete calls.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<ToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one delta into the accumulating array.
    pub fn apply(&mut self, delta: &ToolCallDelta) {
        let slot = match delta.index {
            Some(index) => {
                while self.calls.len() <= index {
                    let next = self.calls.len();
                    self.calls.push(Self::placeholder(next));
                }
                index
            }
            None => {
                let by_id = delta
                    .id
                    .as_ref()
                    .and_then(|id| self.calls.iter().position(|c| &c.id == id));
                match by_id {
                    Some(index) => index,
                    None => {
                        let next = self.calls.len();
                        self.calls.push(Self::placeholder(next));
                        next
                    }
                }
            }
        };

        let call = &mut self.calls[slot];
        if let Some(id) = &delta.id {
            call.id = id.clone();
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                call.function.name.clone_from(name);
            }
            if let Some(chunk) = &function.arguments {
                call.function.arguments.push_str(chunk);
            }
        }
    }

    /// Whether any slot has been created.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// The assembled calls, in slot order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
    }

    /// A fresh slot with a synthesized stable id.
    fn placeholder(index: usize) -> ToolCall {
        ToolCall {
            id: format!("call_{}_{}", chrono::Utc::now().timestamp_millis(), index),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: String::new(),
                arguments: String::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            function: Some(FunctionDelta {
                name: name.map(String::from),
                arguments: arguments.map(String::from),
            }),
        }
    }

    #[test]
    fn assembles_single_call_across_chunks() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(Some(0), Some("call_1"), Some("fs_read"), Some("{\"pa")));
        assembler.apply(&delta(Some(0), None, None, Some("th\":\"a.txt\"}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "fs_read");
        assert_eq!(calls[0].function.arguments, "{\"path\":\"a.txt\"}");
    }

    #[test]
    fn id_match_selects_slot_without_index() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(None, Some("a"), Some("web_search"), Some("{\"q\":")));
        assembler.apply(&delta(None, Some("b"), Some("fs_list"), Some("{}")));
        assembler.apply(&delta(None, Some("a"), None, Some("\"rust\"}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
        assert_eq!(calls[1].function.name, "fs_list");
    }

    #[test]
    fn missing_id_synthesizes_stable_one() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(Some(0), None, Some("fs_write"), None));
        assembler.apply(&delta(Some(0), None, None, Some("{}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].call_type, "function");
    }

    #[test]
    fn interleavings_converge_per_slot() {
        // Two calls with interleaved argument chunks; per-slot order is
        // preserved, so both schedules produce identical results.
        let a = [
            delta(Some(0), Some("x"), Some("one"), Some("AA")),
            delta(Some(0), None, None, Some("BB")),
        ];
        let b = [
            delta(Some(1), Some("y"), Some("two"), Some("11")),
            delta(Some(1), None, None, Some("22")),
        ];

        let mut interleaved = ToolCallAssembler::new();
        interleaved.apply(&a[0]);
        interleaved.apply(&b[0]);
        interleaved.apply(&a[1]);
        interleaved.apply(&b[1]);

        let mut sequential = ToolCallAssembler::new();
        for d in a.iter().chain(b.iter()) {
            sequential.apply(d);
        }

        assert_eq!(interleaved.finish(), sequential.finish());
    }

    #[test]
    fn index_gaps_create_placeholders() {
        let mut assembler = ToolCallAssembler::new();
        assembler.apply(&delta(Some(1), Some("late"), Some("fs_read"), Some("{}")));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[1].id, "late");
    }
}
