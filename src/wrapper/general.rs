//! Plain-text fallback format.
//!
//! Used when a model's name matches no known family. There are no trained
//! control tokens to rely on, so turns are framed with `System:` / `User:` /
//! `Assistant:` labels and the turn boundary is detected by watching for the
//! next label in generated text.

use tracing::warn;

use crate::error::ChatFormatError;
use crate::function_docs::FunctionsDocumentationGenerator;
use crate::history::{ChatFunctions, ChatHistoryItem};
use crate::prompt_text::PromptText;
use crate::wrapper::{
    ChatWrapper, ChatWrapperSettings, GenerateContextStateOptions, GeneratedContextState,
};

/// Chat wrapper for models with no recognized trained chat format.
#[derive(Debug)]
pub struct GeneralChatWrapper {
    settings: ChatWrapperSettings,
}

impl GeneralChatWrapper {
    /// Creates the wrapper with its fixed format settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: ChatWrapperSettings {
                supports_system_messages: true,
                // No structural function-calling protocol: calls and results
                // degrade to informational plain text.
                functions: None,
            },
        }
    }
}

impl Default for GeneralChatWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatWrapper for GeneralChatWrapper {
    fn wrapper_name(&self) -> &'static str {
        "General"
    }

    fn settings(&self) -> &ChatWrapperSettings {
        &self.settings
    }

    fn generate_context_state(
        &self,
        options: &GenerateContextStateOptions<'_>,
    ) -> Result<GeneratedContextState, ChatFormatError> {
        if options.chat_history.is_empty() {
            return Err(ChatFormatError::EmptyHistory);
        }
        if options.has_functions() {
            warn!(
                wrapper = self.wrapper_name(),
                "model format has no function-calling protocol, documenting functions as plain text"
            );
        }

        let history = self.add_functions_system_message(
            options.chat_history,
            options.available_functions,
            options.document_function_params,
        )?;

        let mut blocks: Vec<PromptText> = Vec::new();
        for item in &history {
            let block = match item {
                ChatHistoryItem::System { text } => {
                    PromptText::concat([PromptText::text("System: "), text.clone()])
                }
                ChatHistoryItem::User { text } => PromptText::text(format!("User: {text}")),
                ChatHistoryItem::Model { response } => PromptText::concat([
                    PromptText::text("Assistant: "),
                    self.generate_model_response_text(response),
                ]),
            };
            blocks.push(block);
        }

        let separator = PromptText::text("\n\n");
        let mut context_text =
            PromptText::concat([PromptText::bos(), PromptText::join(&separator, blocks)]);
        // The generation point is always an assistant label.
        if !matches!(history.last(), Some(ChatHistoryItem::Model { .. })) {
            context_text.append(PromptText::text("\n\nAssistant: "));
        }

        Ok(GeneratedContextState {
            context_text,
            stop_generation_triggers: vec![
                PromptText::eos(),
                PromptText::text("\nUser:"),
                PromptText::text("\nSystem:"),
                PromptText::text("\nAssistant:"),
            ],
            ignore_start_text: Vec::new(),
            function_call: None,
        })
    }

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
                    "The assistant can use the following functions to retrieve information:",
                ),
                PromptText::text("```typescript"),
                PromptText::text(generator.typescript_signatures(document_params)),
                PromptText::text("```"),
                PromptText::text(
                    "Function calls and their results appear as plain text inside the \
                     assistant's answers.",
                ),
            ],
        ))
    }
}
