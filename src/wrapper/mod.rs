//! Per-model-family chat formatting.
//!
//! Each model family was trained on its own textual convention for role
//! markers, function-call syntax, and end-of-turn signaling. A wrapper turns
//! model-agnostic chat history into that convention and reports how to
//! detect the end of a generated turn. The set of wrappers is closed: one
//! implementation per supported family, resolved by model name.
//!
//! - `functionary.rs`: sequential-recipient format (`<|from|>`/`<|recipient|>`
//!   /`<|content|>` turns, parallel call batches around `<|stop|>`)
//! - `llama3.rs`: aggregated-block format (header-id role markers, plain
//!   `[[call: …]]` function tags)
//! - `general.rs`: plain-text fallback for unrecognized models

mod functionary;
mod general;
mod llama3;

pub use functionary::FunctionaryChatWrapper;
pub use general::GeneralChatWrapper;
pub use llama3::Llama3ChatWrapper;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::ChatFormatError;
use crate::function_docs::FunctionsDocumentationGenerator;
use crate::history::{ChatFunctionCall, ChatFunctions, ChatHistoryItem, ModelResponsePart};
use crate::prompt_text::{PromptPiece, PromptText};

/// Placeholder inside [`FunctionCallSyntax::result_prefix`] replaced with the
/// called function's name when a result is rendered.
pub const FUNCTION_NAME_PLACEHOLDER: &str = "{{functionName}}";

/// Declarative per-model formatting configuration.
///
/// Fixed for the lifetime of a wrapper instance; everything else is computed
/// per formatting request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatWrapperSettings {
    /// Whether the trained format has a first-class system role.
    pub supports_system_messages: bool,
    /// Function-call syntax, or `None` when the family was trained without
    /// a structural function-calling protocol.
    pub functions: Option<FunctionCallSyntax>,
}

/// The literal syntax surrounding a function call and its result.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallSyntax {
    /// Parsing-side hint: a single leading space before the call prefix is
    /// tolerated in generated output.
    pub optional_prefix_space: bool,
    /// Emitted before the function name of a call.
    pub call_prefix: PromptText,
    /// Emitted between the function name and its params.
    pub params_prefix: PromptText,
    /// Emitted after the params.
    pub call_suffix: PromptText,
    /// Emitted before a result; may contain [`FUNCTION_NAME_PLACEHOLDER`].
    pub result_prefix: PromptText,
    /// Emitted after a result.
    pub result_suffix: PromptText,
    /// Section syntax for back-to-back parallel calls, or `None` when each
    /// call is immediately followed by its result.
    pub parallelism: Option<ParallelFunctionsSyntax>,
}

/// Section syntax used when multiple calls are emitted in one batch before
/// any result is supplied.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelFunctionsSyntax {
    /// Opens the batch of calls.
    pub call_section_prefix: PromptText,
    /// Separates two calls inside the batch.
    pub between_calls: PromptText,
    /// Closes the batch of calls (typically the turn-yield marker).
    pub call_section_suffix: PromptText,
    /// Opens the batch of results.
    pub result_section_prefix: PromptText,
    /// Separates two results inside the batch.
    pub between_results: PromptText,
    /// Closes the batch of results.
    pub result_section_suffix: PromptText,
}

/// Inputs to one formatting request.
#[derive(Debug, Clone, Copy)]
pub struct GenerateContextStateOptions<'a> {
    /// The conversation, in order. Must be non-empty.
    pub chat_history: &'a [ChatHistoryItem],
    /// Functions the model may call, if any.
    pub available_functions: Option<&'a ChatFunctions>,
    /// Whether parameter descriptions are rendered into the documentation.
    pub document_function_params: bool,
}

impl GenerateContextStateOptions<'_> {
    pub(crate) fn has_functions(&self) -> bool {
        self.available_functions.is_some_and(|functions| !functions.is_empty())
    }
}

/// Output of one formatting request.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContextState {
    /// The rendered prompt, ready for the tokenizer collaborator.
    pub context_text: PromptText,
    /// Any one of these found as a suffix of generated content ends the
    /// model turn. Literal and marker forms of common triggers are listed
    /// side by side to catch either representation.
    pub stop_generation_triggers: Vec<PromptText>,
    /// Content to strip when a new turn degenerately begins with it,
    /// tried in list order.
    pub ignore_start_text: Vec<PromptText>,
    /// Hints for parsing function calls out of generated output, when the
    /// format supports them.
    pub function_call: Option<FunctionCallEngagement>,
}

/// Whether the model should be treated as "about to call a function" before
/// it has emitted a disambiguating token, and what disengages that state.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallEngagement {
    /// Treat the next generated tokens as a function call until proven
    /// otherwise.
    pub initially_engaged: bool,
    /// Prefixes that prove otherwise, tried in list order.
    pub disengage_triggers: Vec<PromptText>,
}

/// The per-model-family formatting contract.
///
/// Implementations are pure: `generate_context_state` is a deterministic
/// function of its inputs with no hidden state, so wrappers are safe to
/// share across threads.
pub trait ChatWrapper: Send + Sync {
    /// Human-readable format name, used in logs.
    fn wrapper_name(&self) -> &'static str;

    /// The fixed formatting configuration of this family.
    fn settings(&self) -> &ChatWrapperSettings;

    /// Renders chat history (and the function catalog, when present) into
    /// the family's literal convention plus stop conditions.
    fn generate_context_state(
        &self,
        options: &GenerateContextStateOptions<'_>,
    ) -> Result<GeneratedContextState, ChatFormatError>;

    /// The system text documenting available functions and the calling
    /// protocol. Empty when there are no functions.
    fn generate_functions_system_text(
        &self,
        functions: &ChatFunctions,
        document_params: bool,
    ) -> Result<PromptText, ChatFormatError> {
        let generator = FunctionsDocumentationGenerator::new(functions);
        if !generator.has_any_functions() {
            return Ok(PromptText::new());
        }

        let newline = PromptText::text("\n");
        Ok(PromptText::join(
            &newline,
            [
                PromptText::text(
                    "The assistant calls the provided functions as needed to retrieve \
                     information instead of relying on existing knowledge.",
                ),
                PromptText::text(
                    "To fulfill a request, the assistant calls relevant functions in advance \
                     when needed before responding to the request, and does not tell the user \
                     prior to calling a function.",
                ),
                PromptText::text("Provided functions:"),
                PromptText::text("```typescript"),
                PromptText::text(generator.typescript_signatures(document_params)),
                PromptText::text("```"),
                PromptText::new(),
                PromptText::text("Calling any of the provided functions can be done like this:"),
                self.generate_function_call("functionName", Some(&json!({"someKey": "someValue"}))),
                PromptText::new(),
                PromptText::text(
                    "After calling a function the raw result is written afterwards, and a \
                     natural language version of the result is written afterwards.",
                ),
            ],
        ))
    }

    /// Returns a new history with synthetic system item(s) documenting the
    /// available functions, inserted immediately before the first existing
    /// system item (or at index 0 if none). No-op without functions; the
    /// caller's history is never mutated.
    fn add_functions_system_message(
        &self,
        history: &[ChatHistoryItem],
        functions: Option<&ChatFunctions>,
        document_params: bool,
    ) -> Result<Vec<ChatHistoryItem>, ChatFormatError> {
        let Some(functions) = functions.filter(|functions| !functions.is_empty()) else {
            return Ok(history.to_vec());
        };

        let text = self.generate_functions_system_text(functions, document_params)?;
        if text.is_empty() {
            return Ok(history.to_vec());
        }

        let mut out = history.to_vec();
        let index = first_system_index(&out);
        out.insert(index, ChatHistoryItem::System { text });
        Ok(out)
    }

    /// Renders one function call in this family's syntax.
    fn generate_function_call(&self, name: &str, params: Option<&Value>) -> PromptText {
        match &self.settings().functions {
            Some(syntax) => PromptText::concat([
                syntax.call_prefix.clone(),
                PromptText::text(name),
                syntax.params_prefix.clone(),
                PromptText::text(params.map(Value::to_string).unwrap_or_default()),
                syntax.call_suffix.clone(),
            ]),
            // No structural protocol for this family: render as plain text
            // that is clearly informational rather than parseable.
            None => PromptText::text(format!(
                "\n[called: {name}({})]",
                params.map(Value::to_string).unwrap_or_default()
            )),
        }
    }

    /// Renders one function-call result in this family's syntax.
    fn generate_function_call_result(&self, name: &str, result: Option<&Value>) -> PromptText {
        match &self.settings().functions {
            Some(syntax) => PromptText::concat([
                substitute_function_name(&syntax.result_prefix, name),
                PromptText::text(result.map(Value::to_string).unwrap_or_default()),
                syntax.result_suffix.clone(),
            ]),
            None => PromptText::text(format!(
                "\n[result: {}]",
                result.map(Value::to_string).unwrap_or_default()
            )),
        }
    }

    /// Renders a model turn's parts in order, driven by the settings.
    ///
    /// Consecutive calls form one parallel batch when the settings declare
    /// parallel syntax; otherwise each call is immediately followed by its
    /// result.
    fn generate_model_response_text(&self, response: &[ModelResponsePart]) -> PromptText {
        let parallel = self
            .settings()
            .functions
            .as_ref()
            .is_some_and(|syntax| syntax.parallelism.is_some());

        let mut out: Vec<PromptText> = Vec::new();
        let mut batch: Vec<&ChatFunctionCall> = Vec::new();

        for part in response {
            match part {
                ModelResponsePart::Text(text) => {
                    if !batch.is_empty() {
                        out.push(render_call_batch(self, &batch));
                        batch.clear();
                    }
                    out.push(PromptText::text(text.clone()));
                }
                ModelResponsePart::FunctionCall(call) => {
                    if parallel {
                        batch.push(call);
                    } else {
                        out.push(render_single_call(self, call));
                    }
                }
            }
        }
        if !batch.is_empty() {
            out.push(render_call_batch(self, &batch));
        }

        PromptText::concat(out)
    }
}

/// Index of the first system item, or 0 if the history has none.
fn first_system_index(history: &[ChatHistoryItem]) -> usize {
    history
        .iter()
        .position(|item| matches!(item, ChatHistoryItem::System { .. }))
        .unwrap_or(0)
}

fn rendered_call<W: ChatWrapper + ?Sized>(wrapper: &W, call: &ChatFunctionCall) -> PromptText {
    match &call.raw_call {
        Some(raw) => raw.clone(),
        None => wrapper.generate_function_call(&call.name, call.params.as_ref()),
    }
}

fn render_single_call<W: ChatWrapper + ?Sized>(wrapper: &W, call: &ChatFunctionCall) -> PromptText {
    PromptText::concat([
        rendered_call(wrapper, call),
        wrapper.generate_function_call_result(&call.name, call.result.as_ref()),
    ])
}

fn render_call_batch<W: ChatWrapper + ?Sized>(
    wrapper: &W,
    calls: &[&ChatFunctionCall],
) -> PromptText {
    let parallel = wrapper
        .settings()
        .functions
        .as_ref()
        .and_then(|syntax| syntax.parallelism.as_ref());
    let Some(parallel) = parallel else {
        return PromptText::concat(calls.iter().map(|call| render_single_call(wrapper, call)));
    };

    let batch_calls = PromptText::join(
        &parallel.between_calls,
        calls.iter().map(|call| rendered_call(wrapper, call)),
    );
    let batch_results = PromptText::join(
        &parallel.between_results,
        calls.iter().map(|call| {
            wrapper.generate_function_call_result(&call.name, call.result.as_ref())
        }),
    );

    PromptText::concat([
        parallel.call_section_prefix.clone(),
        batch_calls,
        parallel.call_section_suffix.clone(),
        parallel.result_section_prefix.clone(),
        batch_results,
        parallel.result_section_suffix.clone(),
    ])
}

/// Replaces [`FUNCTION_NAME_PLACEHOLDER`] in literal pieces of a syntax
/// template. Markers are left untouched.
fn substitute_function_name(template: &PromptText, name: &str) -> PromptText {
    PromptText::from_pieces(
        template
            .pieces()
            .iter()
            .map(|piece| match piece {
                PromptPiece::Text(text) => {
                    PromptPiece::Text(text.replace(FUNCTION_NAME_PLACEHOLDER, name))
                }
                marker @ PromptPiece::Marker(_) => marker.clone(),
            })
            .collect(),
    )
}

type WrapperFactory = fn() -> Box<dyn ChatWrapper>;

fn new_functionary() -> Box<dyn ChatWrapper> {
    Box::new(FunctionaryChatWrapper::new())
}

fn new_llama3() -> Box<dyn ChatWrapper> {
    Box::new(Llama3ChatWrapper::new())
}

fn new_general() -> Box<dyn ChatWrapper> {
    Box::new(GeneralChatWrapper::new())
}

/// Known model name -> wrapper factory mappings, keyed by values seen in
/// GGUF `general.name` metadata.
const MODEL_WRAPPER_MAP: &[(&str, WrapperFactory)] = &[
    ("functionary", new_functionary),
    ("meetkai functionary", new_functionary),
    ("meta llama 3", new_llama3),
    ("llama 3", new_llama3),
    ("llama3", new_llama3),
];

/// Normalize a model name for fuzzy matching.
fn normalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Picks the wrapper for a model by its `general.name` metadata value.
///
/// Tries exact match first, then fuzzy (normalized substring) match.
/// Unknown or missing names fall back to the plain-text
/// [`GeneralChatWrapper`].
#[must_use]
pub fn resolve_chat_wrapper(model_name: Option<&str>) -> Box<dyn ChatWrapper> {
    let name = match model_name {
        Some(name) if !name.is_empty() => name,
        _ => return new_general(),
    };

    for &(key, factory) in MODEL_WRAPPER_MAP {
        if key == name {
            return factory();
        }
    }

    let normalized = normalize(name);
    for &(key, factory) in MODEL_WRAPPER_MAP {
        let normalized_key = normalize(key);
        if normalized.contains(&normalized_key) || normalized_key.contains(&normalized) {
            debug!(model = name, wrapper = key, "resolved chat wrapper by fuzzy match");
            return factory();
        }
    }

    debug!(model = name, "no chat wrapper matched, using general fallback");
    new_general()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_exact_match() {
        let wrapper = resolve_chat_wrapper(Some("functionary"));
        assert_eq!(wrapper.wrapper_name(), "Functionary");
    }

    #[test]
    fn test_resolve_fuzzy_match() {
        let wrapper = resolve_chat_wrapper(Some("Meta-Llama-3-8B-Instruct"));
        assert_eq!(wrapper.wrapper_name(), "Llama3Chat");
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_general() {
        let wrapper = resolve_chat_wrapper(Some("MiniCPM4.1-8B"));
        assert_eq!(wrapper.wrapper_name(), "General");
        assert_eq!(resolve_chat_wrapper(None).wrapper_name(), "General");
    }

    #[test]
    fn test_substitute_function_name_only_touches_literals() {
        let template = PromptText::concat([
            PromptText::marker("{{functionName}}"),
            PromptText::text("{{functionName}}"),
        ]);
        let substituted = substitute_function_name(&template, "getDate");
        assert_eq!(
            substituted,
            PromptText::concat([
                PromptText::marker("{{functionName}}"),
                PromptText::text("getDate"),
            ])
        );
    }

    #[test]
    fn test_first_system_index() {
        let history = vec![
            ChatHistoryItem::user("hi"),
            ChatHistoryItem::system("sys"),
        ];
        assert_eq!(first_system_index(&history), 1);
        let no_system = vec![ChatHistoryItem::user("hi")];
        assert_eq!(first_system_index(&no_system), 0);
    }
}
