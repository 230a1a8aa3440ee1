//! Error types for chat formatting.

use thiserror::Error;

/// Errors produced while formatting chat history into a model prompt.
///
/// All of these are synchronous, value-level rejections: nothing is retried
/// and nothing is recoverable mid-render. The caller fixes the input and
/// invokes the formatter again.
#[derive(Debug, Error)]
pub enum ChatFormatError {
    /// `generate_context_state` was called with an empty history.
    #[error("chat history must contain at least one item")]
    EmptyHistory,

    /// Two function definitions share the same name.
    #[error("duplicate function definition: \"{0}\"")]
    DuplicateFunction(String),

    /// A function name collides with a word the wrapper's format reserves
    /// (for example `all` in the sequential-recipient format).
    #[error("function name \"{0}\" is reserved in this chat format")]
    ReservedFunctionName(String),

    /// A serialized prompt text failed its shape contract (wrong discriminant,
    /// non-array value, wrong element types). Never silently coerced.
    #[error("invalid serialized prompt text: {0}")]
    InvalidSerializedForm(String),
}
