//! Function catalog documentation.
//!
//! Models are told which functions exist through text injected into a system
//! turn. The syntax each model family was trained on differs, but the two
//! forms used here cover the supported families: TypeScript-style function
//! signatures, and a companion form restricted to type declarations only.

use serde_json::Value;

use crate::error::ChatFormatError;
use crate::history::{ChatFunction, ChatFunctions};

/// Renders a function catalog into model-readable documentation text.
#[derive(Debug, Clone, Copy)]
pub struct FunctionsDocumentationGenerator<'a> {
    functions: &'a ChatFunctions,
}

impl<'a> FunctionsDocumentationGenerator<'a> {
    /// Wraps a function catalog for rendering.
    #[must_use]
    pub fn new(functions: &'a ChatFunctions) -> Self {
        Self { functions }
    }

    /// Whether there is anything to document. Callers must omit the whole
    /// documentation section when this is `false`, not render whitespace.
    #[must_use]
    pub fn has_any_functions(&self) -> bool {
        !self.functions.is_empty()
    }

    /// TypeScript-style signatures, one per function:
    /// `function getWeather(params: {city: string});`
    ///
    /// `document_params` controls whether parameter descriptions from the
    /// schema are rendered as inline comments.
    #[must_use]
    pub fn typescript_signatures(&self, document_params: bool) -> String {
        let entries: Vec<String> = self
            .functions
            .iter()
            .map(|function| {
                let mut entry = description_comment(function);
                entry.push_str("function ");
                entry.push_str(&function.name);
                entry.push('(');
                if let Some(params) = &function.params {
                    entry.push_str("params: ");
                    entry.push_str(&render_type(params, document_params, 0));
                }
                entry.push_str(");");
                entry
            })
            .collect();
        entries.join("\n")
    }

    /// Type declarations only: `type getWeather = (_: {city: string}) => any;`
    ///
    /// Rejects any function whose name appears in `reserved_names` (role
    /// names some formats use as sentinels must never collide with a
    /// callable function).
    pub fn typescript_types(
        &self,
        document_params: bool,
        reserved_names: &[&str],
    ) -> Result<String, ChatFormatError> {
        let mut entries: Vec<String> = Vec::with_capacity(self.functions.len());
        for function in self.functions.iter() {
            if reserved_names.contains(&function.name.as_str()) {
                return Err(ChatFormatError::ReservedFunctionName(function.name.clone()));
            }

            let mut entry = description_comment(function);
            entry.push_str("type ");
            entry.push_str(&function.name);
            entry.push_str(" = (");
            if let Some(params) = &function.params {
                entry.push_str("_: ");
                entry.push_str(&render_type(params, document_params, 0));
            }
            entry.push_str(") => any;");
            entries.push(entry);
        }
        Ok(entries.join("\n"))
    }
}

/// `// …` comment lines for a function's description, or an empty string.
fn description_comment(function: &ChatFunction) -> String {
    match &function.description {
        None => String::new(),
        Some(description) => {
            let mut out = String::new();
            for line in description.lines() {
                out.push_str("// ");
                out.push_str(line);
                out.push('\n');
            }
            out
        }
    }
}

/// Renders a JSON-schema value as a TypeScript type expression.
///
/// Covers the schema subset function definitions use: primitive types,
/// `const`, `enum`, `object` with `properties`/`required`, `array` with
/// `items`, and `oneOf`. Anything else renders as `any`.
fn render_type(schema: &Value, document_params: bool, indent: usize) -> String {
    if let Some(constant) = schema.get("const") {
        return constant.to_string();
    }
    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        let rendered: Vec<String> = values.iter().map(Value::to_string).collect();
        return rendered.join(" | ");
    }
    if let Some(options) = schema.get("oneOf").and_then(Value::as_array) {
        let rendered: Vec<String> = options
            .iter()
            .map(|option| render_type(option, document_params, indent))
            .collect();
        return rendered.join(" | ");
    }

    match schema.get("type").and_then(Value::as_str) {
        Some("string") => "string".to_owned(),
        Some("number" | "integer") => "number".to_owned(),
        Some("boolean") => "boolean".to_owned(),
        Some("null") => "null".to_owned(),
        Some("object") => render_object_type(schema, document_params, indent),
        Some("array") => {
            let item_type = schema
                .get("items")
                .map_or_else(|| "any".to_owned(), |items| render_type(items, document_params, indent));
            if item_type.contains(" | ") {
                format!("({item_type})[]")
            } else {
                format!("{item_type}[]")
            }
        }
        _ => "any".to_owned(),
    }
}

fn render_object_type(schema: &Value, document_params: bool, indent: usize) -> String {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return "{}".to_owned();
    };
    if properties.is_empty() {
        return "{}".to_owned();
    }

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    // Without an explicit `required` list, every listed property is treated
    // as required, matching how function-calling schemas are written.
    let has_required_list = schema.get("required").is_some();

    let documented = document_params
        && properties
            .values()
            .any(|property| property.get("description").and_then(Value::as_str).is_some());

    let mut fields: Vec<String> = Vec::with_capacity(properties.len());
    for (name, property) in properties {
        let optional = has_required_list && !required.contains(&name.as_str());
        let field_type = render_type(property, document_params, indent + 4);
        let mut field = String::new();
        if documented {
            if let Some(description) = property.get("description").and_then(Value::as_str) {
                for line in description.lines() {
                    field.push_str(&" ".repeat(indent + 4));
                    field.push_str("// ");
                    field.push_str(line);
                    field.push('\n');
                }
            }
            field.push_str(&" ".repeat(indent + 4));
        }
        field.push_str(name);
        if optional {
            field.push('?');
        }
        field.push_str(": ");
        field.push_str(&field_type);
        fields.push(field);
    }

    if documented {
        let mut out = String::from("{\n");
        out.push_str(&fields.join(",\n"));
        out.push('\n');
        out.push_str(&" ".repeat(indent));
        out.push('}');
        out
    } else {
        format!("{{{}}}", fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ChatFunction;
    use serde_json::json;

    fn weather_functions() -> ChatFunctions {
        ChatFunctions::from_definitions([
            ChatFunction::new("getDate").with_description("Retrieve the current date"),
            ChatFunction::new("getWeather").with_params(json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "The city to check"},
                    "units": {"enum": ["celsius", "fahrenheit"]}
                },
                "required": ["city"]
            })),
        ])
        .unwrap()
    }

    #[test]
    fn test_signatures_without_param_docs() {
        let functions = weather_functions();
        let docs = FunctionsDocumentationGenerator::new(&functions).typescript_signatures(false);
        assert_eq!(
            docs,
            "// Retrieve the current date\n\
             function getDate();\n\
             function getWeather(params: {city: string, units?: \"celsius\" | \"fahrenheit\"});"
        );
    }

    #[test]
    fn test_signatures_with_param_docs() {
        let functions = weather_functions();
        let docs = FunctionsDocumentationGenerator::new(&functions).typescript_signatures(true);
        assert!(docs.contains("// The city to check"));
        assert!(docs.contains("city: string"));
    }

    #[test]
    fn test_type_declarations() {
        let functions = weather_functions();
        let docs = FunctionsDocumentationGenerator::new(&functions)
            .typescript_types(false, &["all"])
            .unwrap();
        assert!(docs.contains("type getDate = () => any;"));
        assert!(docs.contains("type getWeather = (_: {city: string"));
    }

    #[test]
    fn test_reserved_name_rejected() {
        let functions =
            ChatFunctions::from_definitions([ChatFunction::new("all")]).unwrap();
        let err = FunctionsDocumentationGenerator::new(&functions)
            .typescript_types(false, &["all"])
            .unwrap_err();
        assert!(err.to_string().contains("all"));
    }

    #[test]
    fn test_no_functions_renders_empty() {
        let functions = ChatFunctions::new();
        let generator = FunctionsDocumentationGenerator::new(&functions);
        assert!(!generator.has_any_functions());
        assert_eq!(generator.typescript_signatures(true), "");
    }

    #[test]
    fn test_schema_corner_types() {
        let functions = ChatFunctions::from_definitions([ChatFunction::new("f").with_params(
            json!({
                "type": "object",
                "properties": {
                    "ids": {"type": "array", "items": {"type": "integer"}},
                    "mode": {"const": "fast"},
                    "mixed": {"oneOf": [{"type": "string"}, {"type": "null"}]}
                }
            }),
        )])
        .unwrap();
        let docs = FunctionsDocumentationGenerator::new(&functions).typescript_signatures(false);
        assert!(docs.contains("ids: number[]"));
        assert!(docs.contains("mode: \"fast\""));
        assert!(docs.contains("mixed: string | null"));
    }
}
