//! Normalization of face-swap outputs.

use serde_json::Value;

use super::UpstreamError;

/// Pull the generated image URL out of a prediction output.
///
/// Accepted shapes: a bare string, an array whose first element is any of
/// these shapes, an object with a string `url`, or an object whose `url` is
/// an object with a string `href`. The URL must start with `http`.
pub fn extract_image_url(output: &Value) -> Result<String, UpstreamError> {
    if output.is_null() {
        return Err(UpstreamError::EmptyOutput);
    }

    let url =
        find_url(output).ok_or_else(|| UpstreamError::UnexpectedOutput(kind(output).into()))?;

    if !url.starts_with("http") {
        return Err(UpstreamError::InvalidOutputUrl(url));
    }
    Ok(url)
}

fn find_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(find_url),
        Value::Object(map) => match map.get("url")? {
            Value::String(s) => Some(s.clone()),
            Value::Object(inner) => inner.get("href")?.as_str().map(str::to_string),
            _ => None,
        },
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
