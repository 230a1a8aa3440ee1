//! Chat history and function catalog types.
//!
//! These are the model-agnostic inputs to the formatting engine: an ordered
//! conversation of system/user/model turns, and an insertion-ordered set of
//! function definitions the model may call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChatFormatError;
use crate::prompt_text::PromptText;

/// One turn of a conversation, in conversation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatHistoryItem {
    /// Instructions to the model. Structured so that previously rendered
    /// marker-bearing text (e.g. an injected function catalog) survives a
    /// round trip through serialization.
    System {
        /// The system message content.
        text: PromptText,
    },
    /// A user turn.
    User {
        /// The user message content.
        text: String,
    },
    /// A model turn: ordered text parts and function calls.
    Model {
        /// The response parts, in the order the model produced them.
        response: Vec<ModelResponsePart>,
    },
}

impl ChatHistoryItem {
    /// A system turn from plain text.
    pub fn system(text: impl Into<PromptText>) -> Self {
        Self::System { text: text.into() }
    }

    /// A user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    /// A model turn.
    #[must_use]
    pub fn model(response: Vec<ModelResponsePart>) -> Self {
        Self::Model { response }
    }
}

/// One part of a model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelResponsePart {
    /// Narrative text.
    Text(String),
    /// A function call, possibly still pending its result.
    FunctionCall(ChatFunctionCall),
}

/// A function call emitted by the model, together with its result once the
/// caller has supplied one. A missing `result` means the call is still
/// pending; a missing `params` means the function takes no input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFunctionCall {
    /// The called function's name.
    pub name: String,
    /// The call arguments as a JSON value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// The call result as a JSON value, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The exact form the call was originally rendered in. When present, a
    /// re-render reuses it verbatim instead of regenerating the call syntax,
    /// so context text stays byte-stable across wrapper upgrades.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_call: Option<PromptText>,
}

impl ChatFunctionCall {
    /// A pending call with no result yet.
    pub fn new(name: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            name: name.into(),
            params,
            result: None,
            raw_call: None,
        }
    }

    /// Attaches the call result.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// One callable function: name, JSON-schema parameters, description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFunction {
    /// Unique function name.
    pub name: String,
    /// Human/model-readable description, rendered as documentation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema for the call parameters. `None` means no parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ChatFunction {
    /// A function with no description and no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            params: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the parameter schema.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Insertion-ordered set of function definitions.
///
/// Order matters: rendered documentation lists functions in the order they
/// were defined. Names are unique; defining a duplicate is an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatFunctions {
    entries: Vec<ChatFunction>,
}

impl ChatFunctions {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function definition, rejecting duplicate names.
    pub fn define(&mut self, function: ChatFunction) -> Result<(), ChatFormatError> {
        if self.entries.iter().any(|f| f.name == function.name) {
            return Err(ChatFormatError::DuplicateFunction(function.name));
        }
        self.entries.push(function);
        Ok(())
    }

    /// Looks up a function by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ChatFunction> {
        self.entries.iter().find(|f| f.name == name)
    }

    /// Whether no functions are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of defined functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates definitions in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ChatFunction> {
        self.entries.iter()
    }
}

impl ChatFunctions {
    /// Builds a set from definitions, rejecting duplicate names.
    pub fn from_definitions<I>(definitions: I) -> Result<Self, ChatFormatError>
    where
        I: IntoIterator<Item = ChatFunction>,
    {
        let mut functions = Self::new();
        for function in definitions {
            functions.define(function)?;
        }
        Ok(functions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_function_rejected() {
        let mut functions = ChatFunctions::new();
        functions.define(ChatFunction::new("getDate")).unwrap();
        let err = functions.define(ChatFunction::new("getDate")).unwrap_err();
        assert!(err.to_string().contains("getDate"));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut functions = ChatFunctions::new();
        functions.define(ChatFunction::new("zeta")).unwrap();
        functions.define(ChatFunction::new("alpha")).unwrap();
        let names: Vec<_> = functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha"]);
    }

    #[test]
    fn test_history_item_serde_round_trip() {
        let item = ChatHistoryItem::model(vec![
            ModelResponsePart::Text("checking".into()),
            ModelResponsePart::FunctionCall(
                ChatFunctionCall::new("getWeather", Some(json!({"city": "Lima"})))
                    .with_result(json!({"celsius": 19})),
            ),
        ]);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "model");
        let parsed: ChatHistoryItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_pending_call_has_no_result() {
        let call = ChatFunctionCall::new("getDate", None);
        assert!(call.result.is_none());
        let json = serde_json::to_value(&call).unwrap();
        assert!(json.get("result").is_none());
    }
}
