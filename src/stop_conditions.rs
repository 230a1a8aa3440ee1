//! Stop condition checking for streamed generation.
//!
//! Wrappers report their stop triggers as [`PromptText`] values. Literal
//! triggers are matched against the streamed text here; marker triggers are
//! matched by identity when the runtime observes the corresponding special
//! token. A trigger that arrives split across chunks is still detected, and
//! the checker reports how much already-streamed text belongs to it.

use crate::prompt_text::{PromptPiece, PromptText};

/// Result of a stop condition check.
#[derive(Debug, Clone, PartialEq)]
pub struct StopConditionResult {
    /// Whether generation should stop.
    pub should_stop: bool,
    /// Number of bytes to remove from the end of the already-streamed
    /// response (when the matched trigger spans chunk boundaries).
    pub partial_to_remove: usize,
    /// The trigger that matched, for debugging and telemetry.
    pub matched_trigger: Option<PromptText>,
}

impl StopConditionResult {
    #[must_use]
    pub fn no_stop() -> Self {
        Self {
            should_stop: false,
            partial_to_remove: 0,
            matched_trigger: None,
        }
    }

    #[must_use]
    pub fn stop_now(matched: PromptText) -> Self {
        Self {
            should_stop: true,
            partial_to_remove: 0,
            matched_trigger: Some(matched),
        }
    }

    #[must_use]
    pub fn stop_with_removal(bytes_to_remove: usize, matched: PromptText) -> Self {
        Self {
            should_stop: true,
            partial_to_remove: bytes_to_remove,
            matched_trigger: Some(matched),
        }
    }
}

/// Checks whether appending `new_chunk` to `response` completes any literal
/// stop trigger as a suffix.
///
/// Marker-bearing triggers are skipped here: their textual spelling must
/// never match, only the actual special token (see [`check_marker_stop`]).
/// When the matched trigger started in an earlier chunk, `partial_to_remove`
/// reports how many trailing bytes of `response` belong to the trigger.
#[must_use]
pub fn check_stop_conditions(
    response: &str,
    new_chunk: &str,
    triggers: &[PromptText],
) -> StopConditionResult {
    let test_response = format!("{response}{new_chunk}");

    for trigger in triggers {
        let Some(literal) = trigger.as_literal() else {
            continue;
        };
        if literal.is_empty() {
            continue;
        }

        if test_response.ends_with(literal) {
            let already_streamed = literal.len().saturating_sub(new_chunk.len());
            if already_streamed > 0 {
                return StopConditionResult::stop_with_removal(already_streamed, trigger.clone());
            }
            return StopConditionResult::stop_now(trigger.clone());
        }
    }

    StopConditionResult::no_stop()
}

/// Checks whether an observed special token matches a marker trigger.
#[must_use]
pub fn check_marker_stop(marker_value: &str, triggers: &[PromptText]) -> StopConditionResult {
    for trigger in triggers {
        if let [PromptPiece::Marker(value)] = trigger.pieces() {
            if value == marker_value {
                return StopConditionResult::stop_now(trigger.clone());
            }
        }
    }
    StopConditionResult::no_stop()
}

/// Length in bytes of the longest proper prefix of any literal trigger that
/// is currently a suffix of `text`.
///
/// Streaming callers hold back that many bytes from display: they may turn
/// out to be the start of a stop trigger that the next chunk completes.
#[must_use]
pub fn partial_trigger_len(text: &str, triggers: &[PromptText]) -> usize {
    let mut longest = 0;
    for trigger in triggers {
        let Some(literal) = trigger.as_literal() else {
            continue;
        };
        // Proper prefixes only; a full match is a stop, not a hold-back.
        for (boundary, _) in literal.char_indices().skip(1) {
            if boundary > longest && text.ends_with(&literal[..boundary]) {
                longest = boundary;
            }
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggers() -> Vec<PromptText> {
        vec![
            PromptText::eos(),
            PromptText::marker("<|stop|>"),
            PromptText::text("<|stop|>"),
            PromptText::text("\n<|from|>user"),
        ]
    }

    #[test]
    fn test_exact_match_in_one_chunk() {
        let result = check_stop_conditions("All done.", "<|stop|>", &triggers());
        assert!(result.should_stop);
        assert_eq!(result.partial_to_remove, 0);
        assert_eq!(result.matched_trigger, Some(PromptText::text("<|stop|>")));
    }

    #[test]
    fn test_match_spanning_chunks_reports_removal() {
        let result = check_stop_conditions("All done.<|st", "op|>", &triggers());
        assert!(result.should_stop);
        assert_eq!(result.partial_to_remove, "<|st".len());
    }

    #[test]
    fn test_no_match() {
        let result = check_stop_conditions("All done", ".", &triggers());
        assert!(!result.should_stop);
        assert!(result.matched_trigger.is_none());
    }

    #[test]
    fn test_trigger_in_middle_does_not_stop() {
        let result = check_stop_conditions("a <|stop|> b", " c", &triggers());
        assert!(!result.should_stop);
    }

    #[test]
    fn test_marker_trigger_never_matches_spelled_text() {
        let only_markers = vec![PromptText::eos(), PromptText::eot()];
        let result = check_stop_conditions("All done.", "EOS", &only_markers);
        assert!(!result.should_stop);
    }

    #[test]
    fn test_marker_stop_by_identity() {
        let result = check_marker_stop("<|stop|>", &triggers());
        assert!(result.should_stop);
        assert_eq!(result.matched_trigger, Some(PromptText::marker("<|stop|>")));
        assert!(!check_marker_stop("<|other|>", &triggers()).should_stop);
    }

    #[test]
    fn test_partial_trigger_len_holds_back_prefix() {
        assert_eq!(partial_trigger_len("answer\n<|fro", &triggers()), "\n<|fro".len());
        assert_eq!(partial_trigger_len("answer<|", &triggers()), "<|".len());
        assert_eq!(partial_trigger_len("answer", &triggers()), 0);
    }

    #[test]
    fn test_full_trigger_is_not_a_partial() {
        assert_eq!(partial_trigger_len("done<|stop|>x", &triggers()), 0);
    }
}
