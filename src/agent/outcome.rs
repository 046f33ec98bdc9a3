//! Decoding a model response into what the controller does next

use serde_json::Value;

use crate::core::{RoundTripError, RoundTripResult};
use crate::llm::{ContentBlock, StopReason};

/// What one model call asked for
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The model is done; concatenated text of the response
    FinalAnswer(String),
    /// The model wants a tool run before it continues
    ToolRequest {
        name: String,
        input: Value,
        call_id: String,
    },
}

impl RoundOutcome {
    /// Decode the content blocks and stop reason of one response.
    ///
    /// For `tool_use` only the last block is acted on, and it must be a tool
    /// use. Earlier tool-use blocks in the same response are not executed.
    pub fn decode(
        content: &[ContentBlock],
        stop_reason: Option<StopReason>,
    ) -> RoundTripResult<Self> {
        match stop_reason {
            Some(StopReason::EndTurn | StopReason::StopSequence | StopReason::MaxTokens) => {
                if stop_reason == Some(StopReason::MaxTokens) {
                    tracing::warn!("[Controller] Response truncated (max tokens)");
                }
                let text = content
                    .iter()
                    .filter_map(ContentBlock::as_text)
                    .collect::<Vec<_>>()
                    .join("");
                Ok(RoundOutcome::FinalAnswer(text))
            }
            Some(StopReason::ToolUse) => match content.last() {
                Some(ContentBlock::ToolUse { id, name, input }) => Ok(RoundOutcome::ToolRequest {
                    name: name.clone(),
                    input: input.clone(),
                    call_id: id.clone(),
                }),
                _ => Err(RoundTripError::UnexpectedStopReason(
                    "tool_use without a trailing tool_use block".to_string(),
                )),
            },
            Some(other) => Err(RoundTripError::UnexpectedStopReason(stop_reason_name(other))),
            None => Err(RoundTripError::UnexpectedStopReason("missing".to_string())),
        }
    }
}

fn stop_reason_name(reason: StopReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_final_answer_concatenates_text() {
        let content = vec![ContentBlock::text("Hel"), ContentBlock::text("lo")];
        let outcome = RoundOutcome::decode(&content, Some(StopReason::EndTurn)).unwrap();
        assert_eq!(outcome, RoundOutcome::FinalAnswer("Hello".to_string()));

        let outcome = RoundOutcome::decode(&content, Some(StopReason::MaxTokens)).unwrap();
        assert_eq!(outcome, RoundOutcome::FinalAnswer("Hello".to_string()));
    }

    #[test]
    fn test_tool_request_uses_last_block() {
        let content = vec![
            ContentBlock::text("Let me calculate that."),
            ContentBlock::tool_use("t0", "web_search", json!({"query": "ignored"})),
            ContentBlock::tool_use("t1", "wolfram_alpha", json!({"query": "1+1"})),
        ];
        let outcome = RoundOutcome::decode(&content, Some(StopReason::ToolUse)).unwrap();
        assert_eq!(
            outcome,
            RoundOutcome::ToolRequest {
                name: "wolfram_alpha".to_string(),
                input: json!({"query": "1+1"}),
                call_id: "t1".to_string(),
            }
        );
    }

    #[test]
    fn test_tool_use_without_trailing_block() {
        let content = vec![
            ContentBlock::tool_use("t1", "wolfram_alpha", json!({})),
            ContentBlock::text("trailing"),
        ];
        let err = RoundOutcome::decode(&content, Some(StopReason::ToolUse)).unwrap_err();
        assert!(matches!(err, RoundTripError::UnexpectedStopReason(_)));
    }

    #[test]
    fn test_unexpected_stop_reasons() {
        let content = vec![ContentBlock::text("no")];
        let err = RoundOutcome::decode(&content, Some(StopReason::Refusal)).unwrap_err();
        assert!(matches!(err, RoundTripError::UnexpectedStopReason(r) if r == "refusal"));

        let err = RoundOutcome::decode(&content, Some(StopReason::PauseTurn)).unwrap_err();
        assert!(matches!(err, RoundTripError::UnexpectedStopReason(r) if r == "pause_turn"));

        let err = RoundOutcome::decode(&content, None).unwrap_err();
        assert!(matches!(err, RoundTripError::UnexpectedStopReason(r) if r == "missing"));
    }
}
