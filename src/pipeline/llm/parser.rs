//! Locate and parse the JSON payload in a model completion.

use super::LlmError;

/// Extract a JSON block from LLM response text.
/// Handles fenced blocks and responses with prose before/after the JSON.
pub fn extract_json_block(response: &str) -> Result<&str, LlmError> {
    let trimmed = response.trim();

    // Strip markdown code fences if present
    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Ok(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') || block.starts_with('[') {
                return Ok(block);
            }
        }
    }

    // Outermost object or array, whichever opens first
    let object = trimmed.find('{').zip(trimmed.rfind('}'));
    let array = trimmed.find('[').zip(trimmed.rfind(']'));
    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if a.0 < o.0 { a } else { o }),
        (o, a) => o.or(a),
    };
    if let Some((start, end)) = span {
        if start < end {
            return Ok(&trimmed[start..=end]);
        }
    }

    Err(LlmError::InvalidOutput("No JSON block found in response".into()))
}

/// Parse the JSON payload of a completion into a value.
pub fn parse_json_payload(response: &str) -> Result<serde_json::Value, LlmError> {
    let block = extract_json_block(response)?;
    serde_json::from_str(block).map_err(|e| LlmError::InvalidOutput(format!("invalid JSON: {e}")))
}

/// The array under `key` in an object payload, or the payload itself when
/// it is already an array.
pub fn array_field<'a>(
    payload: &'a serde_json::Value,
    key: &str,
) -> Result<&'a Vec<serde_json::Value>, LlmError> {
    if let Some(items) = payload.as_array() {
        return Ok(items);
    }
    payload
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| LlmError::InvalidOutput(format!("missing `{key}` array")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_block_from_fenced() {
        let response = "Here you go:\n```json\n{\"findings\": []}\n```\nDone.";
        assert_eq!(extract_json_block(response).unwrap(), "{\"findings\": []}");
    }

    #[test]
    fn extract_json_block_from_bare() {
        let response = "Sure. {\"a\": 1} trailing";
        assert_eq!(extract_json_block(response).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn extract_top_level_array() {
        let response = "[{\"article_id\": 5}]";
        assert_eq!(extract_json_block(response).unwrap(), response);
    }

    #[test]
    fn extract_json_block_no_json() {
        assert!(extract_json_block("I cannot help with that").is_err());
    }

    #[test]
    fn array_field_accepts_object_or_array() {
        let obj = parse_json_payload("{\"findings\": [1, 2]}").unwrap();
        assert_eq!(array_field(&obj, "findings").unwrap().len(), 2);
        let arr = parse_json_payload("[1]").unwrap();
        assert_eq!(array_field(&arr, "findings").unwrap().len(), 1);
        let wrong = parse_json_payload("{\"other\": 1}").unwrap();
        assert!(array_field(&wrong, "findings").is_err());
    }

    #[test]
    fn truncated_json_is_invalid() {
        let err = parse_json_payload("{\"findings\": [ {\"a\": 1 ]}").unwrap_err();
        assert!(matches!(err, LlmError::InvalidOutput(_)));
    }
}
