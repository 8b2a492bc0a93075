use serde_json::{Map, Value};

/// A model-issued request to run one of the fixed functions.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub parameters: Map<String, Value>,
}

/// What the model asked for on one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// A JSON object carrying a `function` key.
    Call(FunctionCall),
    /// Anything else is free-form reasoning.
    Reasoning(String),
}

impl Decision {
    /// Parse a completion into a structured decision.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        let call = parse_call(trimmed).or_else(|| extract_json_block(trimmed).and_then(parse_call));
        match call {
            Some(call) => Decision::Call(call),
            None => Decision::Reasoning(input.to_string()),
        }
    }

    #[cfg(test)]
    pub fn get_call(&self) -> Option<&FunctionCall> {
        match self {
            Decision::Call(c) => Some(c),
            _ => None,
        }
    }
}

fn parse_call(text: &str) -> Option<FunctionCall> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let name = object.get("function")?.as_str()?.trim().to_string();

    // Missing or non-object parameters become an empty bag
    let parameters = object
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Some(FunctionCall { name, parameters })
}

/// Extract the body of a ```json (or bare ```) fence.
fn extract_json_block(input: &str) -> Option<&str> {
    let start = input.find("```")?;
    let after_fence = &input[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1)?;
    let tag = after_fence[..body_start].trim();
    if !tag.is_empty() && !tag.eq_ignore_ascii_case("json") {
        return None;
    }
    let body = &after_fence[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim())
}
