//! Chat history to prompt formatting for llama.cpp model families.
//!
//! Turning a conversation into a prompt is model-specific: each family was
//! trained on its own role markers, function-call syntax, and end-of-turn
//! signaling. This crate keeps that knowledge in one place:
//!
//! - [`PromptText`] carries rendered prompts as literal text interleaved with
//!   special-token markers, so control constructs never degrade into plain
//!   text.
//! - [`ChatWrapper`] implementations render model-agnostic history into one
//!   family's convention and report how to detect the end of a generated
//!   turn; [`resolve_chat_wrapper`] picks the implementation by model name.
//! - [`stop_conditions`] matches a wrapper's stop triggers against streamed
//!   output, including triggers split across chunks.
//!
//! Tokenization and generation are out of scope: the output of
//! [`ChatWrapper::generate_context_state`] is handed to whatever runs the
//! model.

pub mod error;
pub mod function_docs;
pub mod history;
pub mod prompt_text;
pub mod stop_conditions;
pub mod wrapper;

pub use error::ChatFormatError;
pub use function_docs::FunctionsDocumentationGenerator;
pub use history::{
    ChatFunction, ChatFunctionCall, ChatFunctions, ChatHistoryItem, ModelResponsePart,
};
pub use prompt_text::{PromptPiece, PromptText};
pub use stop_conditions::{
    check_marker_stop, check_stop_conditions, partial_trigger_len, StopConditionResult,
};
pub use wrapper::{
    resolve_chat_wrapper, ChatWrapper, ChatWrapperSettings, FunctionCallEngagement,
    FunctionCallSyntax, FunctionaryChatWrapper, GeneralChatWrapper,
    GenerateContextStateOptions, GeneratedContextState, Llama3ChatWrapper,
    ParallelFunctionsSyntax,
};
