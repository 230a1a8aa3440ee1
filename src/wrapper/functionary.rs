//! Sequential-recipient chat format.
//!
//! Every turn is a `<|from|>role`, `<|recipient|>target`, `<|content|>`
//! triple. Function calls address their function as the recipient; a batch
//! of parallel calls is emitted together, the model yields with `<|stop|>`,
//! and all results come back together before the narrative continues.
// source: https://github.com/MeetKai/functionary/blob/main/tests/prompt_test_v2.txt

use tracing::debug;

use crate::error::ChatFormatError;
use crate::function_docs::FunctionsDocumentationGenerator;
use crate::history::{ChatFunctions, ChatHistoryItem, ModelResponsePart};
use crate::prompt_text::PromptText;
use crate::wrapper::{
    ChatWrapper, ChatWrapperSettings, FunctionCallEngagement, FunctionCallSyntax,
    GenerateContextStateOptions, GeneratedContextState, ParallelFunctionsSyntax,
};

/// Chat wrapper for the Functionary model family.
#[derive(Debug)]
pub struct FunctionaryChatWrapper {
    settings: ChatWrapperSettings,
}

impl FunctionaryChatWrapper {
    /// Creates the wrapper with its fixed format settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            settings: ChatWrapperSettings {
                supports_system_messages: true,
                functions: Some(FunctionCallSyntax {
                    optional_prefix_space: true,
                    call_prefix: PromptText::marker("\n<|from|>assistant\n<|recipient|>"),
                    params_prefix: PromptText::marker("\n<|content|>"),
                    call_suffix: PromptText::new(),
                    result_prefix: PromptText::concat([
                        PromptText::marker("\n<|from|>"),
                        PromptText::text("{{functionName}}"),
                        PromptText::marker("\n<|recipient|>all\n<|content|>"),
                    ]),
                    result_suffix: PromptText::new(),
                    parallelism: Some(ParallelFunctionsSyntax {
                        call_section_prefix: PromptText::new(),
                        between_calls: PromptText::text("\n"),
                        call_section_suffix: PromptText::marker("<|stop|>"),
                        result_section_prefix: PromptText::new(),
                        between_results: PromptText::new(),
                        result_section_suffix: PromptText::new(),
                    }),
                }),
            },
        }
    }
}

impl Default for FunctionaryChatWrapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens a `<|from|>role` / `<|recipient|>all` / `<|content|>` block.
/// `lead` prepends the turn separator used between blocks.
fn role_open(role: &str, lead: bool) -> PromptText {
    PromptText::concat([
        if lead {
            PromptText::marker("\n")
        } else {
            PromptText::new()
        },
        PromptText::marker(format!("<|from|>{role}\n")),
        PromptText::marker("<|recipient|>all\n"),
        PromptText::marker("<|content|>"),
    ])
}

/// Calls and results accumulated inside one model turn.
///
/// Calls and results are not emitted adjacently: every pending call is held
/// until a plain-text part or the end of the turn flushes the whole batch as
/// `[all calls] <|stop|> [all results]`, mirroring how the model was trained
/// to yield control after a batch of parallel calls.
#[derive(Default)]
struct PendingFunctions {
    calls: Vec<PromptText>,
    results: Vec<PromptText>,
}

impl PendingFunctions {
    fn push(&mut self, call: PromptText, result: PromptText) {
        self.calls.push(call);
        self.results.push(result);
    }

    /// Drains both buffers into `out`; no-op when nothing is pending.
    fn flush(&mut self, out: &mut Vec<PromptText>) {
        if self.results.is_empty() {
            return;
        }
        out.push(PromptText::concat(self.calls.drain(..)));
        out.push(PromptText::marker("<|stop|>"));
        out.push(PromptText::concat(self.results.drain(..)));
    }
}

impl ChatWrapper for FunctionaryChatWrapper {
    fn wrapper_name(&self) -> &'static str {
        "Functionary"
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
        let has_functions = options.has_functions();
        debug!(
            wrapper = self.wrapper_name(),
            items = options.chat_history.len(),
            has_functions,
            "generating context state"
        );

        let mut history = self.add_functions_system_message(
            options.chat_history,
            options.available_functions,
            options.document_function_params,
        )?;
        // The generation point is always a model turn.
        if !matches!(history.last(), Some(ChatHistoryItem::Model { .. })) {
            history.push(ChatHistoryItem::model(Vec::new()));
        }

        let last_index = history.len() - 1;
        let mut rendered: Vec<PromptText> = vec![PromptText::bos()];

        for (index, item) in history.iter().enumerate() {
            let is_first = index == 0;
            let is_last = index == last_index;

            match item {
                ChatHistoryItem::System { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    rendered.push(PromptText::concat([
                        role_open("system", !is_first),
                        text.clone(),
                    ]));
                }
                ChatHistoryItem::User { text } => {
                    rendered.push(PromptText::concat([
                        role_open("user", !is_first),
                        PromptText::text(text.clone()),
                    ]));
                }
                ChatHistoryItem::Model { response } => {
                    if is_last && response.is_empty() && !has_functions {
                        rendered.push(role_open("assistant", !is_first));
                        continue;
                    }

                    let mut res: Vec<PromptText> = Vec::new();
                    let mut pending = PendingFunctions::default();

                    for (part_index, part) in response.iter().enumerate() {
                        let lead = !(is_first && part_index == 0);
                        match part {
                            ModelResponsePart::Text(text) => {
                                pending.flush(&mut res);
                                res.push(PromptText::concat([
                                    role_open("assistant", lead),
                                    PromptText::text(text.clone()),
                                ]));
                            }
                            ModelResponsePart::FunctionCall(call) => {
                                let rendered_call = match &call.raw_call {
                                    Some(raw) => raw.clone(),
                                    None => PromptText::concat([
                                        if lead {
                                            PromptText::marker("\n")
                                        } else {
                                            PromptText::new()
                                        },
                                        PromptText::marker("<|from|>assistant\n"),
                                        PromptText::marker("<|recipient|>"),
                                        PromptText::text(call.name.clone()),
                                        PromptText::marker("\n"),
                                        PromptText::marker("<|content|>"),
                                        PromptText::text(
                                            call.params
                                                .as_ref()
                                                .map(ToString::to_string)
                                                .unwrap_or_default(),
                                        ),
                                    ]),
                                };
                                let rendered_result = PromptText::concat([
                                    PromptText::marker("\n"),
                                    PromptText::marker("<|from|>"),
                                    PromptText::text(call.name.clone()),
                                    PromptText::marker("\n"),
                                    PromptText::marker("<|recipient|>all\n"),
                                    PromptText::marker("<|content|>"),
                                    PromptText::text(
                                        call.result
                                            .as_ref()
                                            .map(ToString::to_string)
                                            .unwrap_or_default(),
                                    ),
                                ]);
                                pending.push(rendered_call, rendered_result);
                            }
                        }
                    }

                    pending.flush(&mut res);

                    if res.is_empty() {
                        // Empty model turn. At the end of the history this is
                        // the generation point: with functions active the
                        // model is expected to open with a call of its own,
                        // so nothing is emitted.
                        if !is_last {
                            res.push(role_open("assistant", !is_first));
                        }
                    } else if is_last
                        && matches!(response.last(), Some(ModelResponsePart::FunctionCall(_)))
                        && !has_functions
                    {
                        res.push(role_open("assistant", !is_first));
                    }

                    if !is_last {
                        res.push(PromptText::marker("<|stop|>"));
                    }

                    rendered.push(PromptText::concat(res));
                }
            }
        }

        let context_text = PromptText::concat(rendered);

        if !has_functions {
            return Ok(GeneratedContextState {
                context_text,
                stop_generation_triggers: vec![
                    PromptText::eos(),
                    PromptText::marker("<|stop|>"),
                    PromptText::text(" <|stop|>"),
                    PromptText::text("<|stop|>"),
                    PromptText::text("\n<|from|>user"),
                    PromptText::text("\n<|from|>assistant"),
                    PromptText::text("\n<|from|>system"),
                    PromptText::marker(" <|stop|>"),
                    PromptText::marker("\n<|from|>user"),
                    PromptText::marker("\n<|from|>assistant"),
                    PromptText::marker("\n<|from|>system"),
                ],
                ignore_start_text: Vec::new(),
                function_call: None,
            });
        }

        // With functions configured the model may legitimately mention the
        // assistant or system roles inside a call result, so only the user
        // role marker remains a stop trigger.
        let text_response_start: Vec<PromptText> = ["\n", "\n\n", " \n", " \n\n"]
            .iter()
            .flat_map(|prefix| {
                let opening = format!("{prefix}<|from|>assistant\n<|recipient|>all\n<|content|>");
                [PromptText::marker(opening.clone()), PromptText::text(opening)]
            })
            .collect();

        Ok(GeneratedContextState {
            context_text,
            stop_generation_triggers: vec![
                PromptText::eos(),
                PromptText::marker("<|stop|>"),
                PromptText::text(" <|stop|>"),
                PromptText::text("<|stop|>"),
                PromptText::text("\n<|from|>user"),
                PromptText::marker(" <|stop|>"),
                PromptText::marker("\n<|from|>user"),
            ],
            ignore_start_text: text_response_start.clone(),
            function_call: Some(FunctionCallEngagement {
                initially_engaged: true,
                disengage_triggers: text_response_start,
            }),
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

        // `all` is the broadcast recipient, so no function may claim it.
        let types = generator.typescript_types(document_params, &["all"])?;

        let newline = PromptText::text("\n");
        Ok(PromptText::join(
            &newline,
            [
                PromptText::text(
                    "// Supported function definitions that should be called when necessary.",
                ),
                PromptText::text("namespace functions {"),
                PromptText::new(),
                PromptText::text(types),
                PromptText::new(),
                PromptText::text("} // namespace functions"),
            ],
        ))
    }

    fn add_functions_system_message(
        &self,
        history: &[ChatHistoryItem],
        functions: Option<&ChatFunctions>,
        document_params: bool,
    ) -> Result<Vec<ChatHistoryItem>, ChatFormatError> {
        let Some(functions) = functions.filter(|functions| !functions.is_empty()) else {
            return Ok(history.to_vec());
        };

        let catalog = self.generate_functions_system_text(functions, document_params)?;
        let mut out = history.to_vec();
        let index = super::first_system_index(&out);
        out.insert(index, ChatHistoryItem::System { text: catalog });
        out.insert(
            index + 1,
            ChatHistoryItem::system(
                "The assistant calls functions with appropriate input when necessary. \
                 The assistant writes <|stop|> when finished answering.",
            ),
        );
        Ok(out)
    }
}
