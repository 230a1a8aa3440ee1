//! Aggregated-block chat format.
//!
//! Consecutive turns of the same role are merged into one role block, and
//! each block is framed by `<|start_header_id|>role<|end_header_id|>` with an
//! end-of-turn token after its content. Function calls have no dedicated
//! control tokens; they ride inside assistant blocks as `[[call: …]]` tags.
// source: https://llama.meta.com/docs/model-cards-and-prompt-formats/meta-llama-3/

use tracing::debug;

use crate::error::ChatFormatError;
use crate::history::ChatHistoryItem;
use crate::prompt_text::PromptText;
use crate::wrapper::{
    ChatWrapper, ChatWrapperSettings, FunctionCallSyntax, GenerateContextStateOptions,
    GeneratedContextState,
};

/// Chat wrapper for the Llama 3 model family.
#[derive(Debug)]
pub struct Llama3ChatWrapper {
    settings: ChatWrapperSettings,
}

impl Llama3ChatWrapper {
    /// Creates the wrapper with its fixed format settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: ChatWrapperSettings {
                supports_system_messages: true,
                functions: Some(FunctionCallSyntax {
                    optional_prefix_space: true,
                    call_prefix: PromptText::text("[[call: "),
                    params_prefix: PromptText::text("("),
                    call_suffix: PromptText::text(")]]"),
                    result_prefix: PromptText::text(" [[result: "),
                    result_suffix: PromptText::text("]]"),
                    parallelism: None,
                }),
            },
        }
    }
}

impl Default for Llama3ChatWrapper {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockRole {
    System,
    User,
    Model,
}

impl BlockRole {
    fn header(self) -> &'static str {
        match self {
            Self::System => "<|start_header_id|>system<|end_header_id|>\n\n",
            Self::User => "<|start_header_id|>user<|end_header_id|>\n\n",
            Self::Model => "<|start_header_id|>assistant<|end_header_id|>\n\n",
        }
    }
}

impl ChatWrapper for Llama3ChatWrapper {
    fn wrapper_name(&self) -> &'static str {
        "Llama3Chat"
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
        debug!(
            wrapper = self.wrapper_name(),
            items = options.chat_history.len(),
            has_functions = options.has_functions(),
            "generating context state"
        );

        let history = self.add_functions_system_message(
            options.chat_history,
            options.available_functions,
            options.document_function_params,
        )?;

        // Aggregate consecutive same-role turns into one block per run,
        // joined by a blank line. An empty run text still produces a block;
        // when it is the trailing model block that is the generation point.
        let mut blocks: Vec<(BlockRole, Vec<PromptText>)> = Vec::new();
        for item in &history {
            let (role, text) = match item {
                ChatHistoryItem::System { text } => (BlockRole::System, text.clone()),
                ChatHistoryItem::User { text } => {
                    (BlockRole::User, PromptText::text(text.clone()))
                }
                ChatHistoryItem::Model { response } => {
                    (BlockRole::Model, self.generate_model_response_text(response))
                }
            };
            match blocks.last_mut() {
                Some((last_role, texts)) if *last_role == role => texts.push(text),
                _ => blocks.push((role, vec![text])),
            }
        }

        let last_index = blocks.len().saturating_sub(1);
        let separator = PromptText::text("\n\n");
        let mut rendered: Vec<PromptText> = vec![PromptText::bos()];
        for (index, (role, texts)) in blocks.into_iter().enumerate() {
            rendered.push(PromptText::marker(role.header()));
            rendered.push(PromptText::join(&separator, texts));
            if !(index == last_index && role == BlockRole::Model) {
                rendered.push(PromptText::eot());
            }
        }

        Ok(GeneratedContextState {
            context_text: PromptText::concat(rendered),
            stop_generation_triggers: vec![
                PromptText::eos(),
                PromptText::eot(),
                PromptText::text("<|eot_id|>"),
                PromptText::text("<|end_of_text|>"),
            ],
            ignore_start_text: Vec::new(),
            function_call: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{ChatFunction, ChatFunctionCall, ChatFunctions, ModelResponsePart};
    use crate::prompt_text::PromptPiece;
    use serde_json::json;

    fn options<'a>(
        history: &'a [ChatHistoryItem],
        functions: Option<&'a ChatFunctions>,
    ) -> GenerateContextStateOptions<'a> {
        GenerateContextStateOptions {
            chat_history: history,
            available_functions: functions,
            document_function_params: true,
        }
    }

    #[test]
    fn test_consecutive_system_turns_aggregate_into_one_block() {
        let wrapper = Llama3ChatWrapper::new();
        let history = vec![
            ChatHistoryItem::system("be helpful"),
            ChatHistoryItem::system("answer briefly"),
            ChatHistoryItem::user("hi"),
        ];
        let state = wrapper.generate_context_state(&options(&history, None)).unwrap();

        let rendered = state.context_text.to_string();
        assert!(rendered.contains("be helpful\n\nanswer briefly"));
        assert_eq!(rendered.matches("<|start_header_id|>system").count(), 1);
        assert_eq!(rendered.matches("<|start_header_id|>user").count(), 1);
        assert_eq!(rendered.matches("<|start_header_id|>").count(), 2);
        // Closed blocks end with the end-of-turn token.
        assert!(state.context_text.ends_with(&PromptText::eot()));
    }

    #[test]
    fn test_trailing_empty_model_turn_is_open() {
        let wrapper = Llama3ChatWrapper::new();
        let history = vec![
            ChatHistoryItem::user("hi"),
            ChatHistoryItem::model(Vec::new()),
        ];
        let state = wrapper.generate_context_state(&options(&history, None)).unwrap();

        assert!(state
            .context_text
            .ends_with(&PromptText::marker(BlockRole::Model.header())));
        assert!(!matches!(
            state.context_text.pieces().last(),
            Some(PromptPiece::Marker(m)) if m == "EOT"
        ));
    }

    #[test]
    fn test_function_call_rides_in_assistant_block() {
        let wrapper = Llama3ChatWrapper::new();
        let history = vec![
            ChatHistoryItem::user("weather in Lima?"),
            ChatHistoryItem::model(vec![
                ModelResponsePart::FunctionCall(
                    ChatFunctionCall::new("getWeather", Some(json!({"city": "Lima"})))
                        .with_result(json!({"celsius": 19})),
                ),
                ModelResponsePart::Text("It is mild.".into()),
            ]),
        ];
        let state = wrapper.generate_context_state(&options(&history, None)).unwrap();

        let rendered = state.context_text.to_string();
        assert!(rendered.contains(
            "[[call: getWeather({\"city\":\"Lima\"})]] [[result: {\"celsius\":19}]]It is mild."
        ));
    }

    #[test]
    fn test_functions_documented_in_single_system_message() {
        let wrapper = Llama3ChatWrapper::new();
        let functions = ChatFunctions::from_definitions([
            ChatFunction::new("getWeather").with_description("Current weather for a city"),
        ])
        .unwrap();
        let history = vec![ChatHistoryItem::user("hi")];
        let state = wrapper
            .generate_context_state(&options(&history, Some(&functions)))
            .unwrap();

        let rendered = state.context_text.to_string();
        assert_eq!(rendered.matches("<|start_header_id|>system").count(), 1);
        assert!(rendered.contains("Provided functions:"));
        assert!(rendered.contains("function getWeather("));
        assert!(rendered.contains("[[call: functionName({\"someKey\":\"someValue\"})]]"));
    }

    #[test]
    fn test_stop_triggers() {
        let wrapper = Llama3ChatWrapper::new();
        let history = vec![ChatHistoryItem::user("hi")];
        let state = wrapper.generate_context_state(&options(&history, None)).unwrap();
        assert_eq!(
            state.stop_generation_triggers,
            vec![
                PromptText::eos(),
                PromptText::eot(),
                PromptText::text("<|eot_id|>"),
                PromptText::text("<|end_of_text|>"),
            ]
        );
        assert!(state.ignore_start_text.is_empty());
        assert!(state.function_call.is_none());
    }

    #[test]
    fn test_empty_history_rejected() {
        let wrapper = Llama3ChatWrapper::new();
        assert!(matches!(
            wrapper.generate_context_state(&options(&[], None)),
            Err(ChatFormatError::EmptyHistory)
        ));
    }
}
