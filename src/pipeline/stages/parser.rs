use serde_json::Value;

use super::StageError;

/// Pull the JSON object out of a model reply.
///
/// Accepts a ```json fenced block, a bare ``` fence, or the first balanced
/// `{...}` in free text. Anything that is not a JSON object is malformed.
pub fn parse_stage_response(response: &str) -> Result<Value, StageError> {
    let candidate = fenced_block(response)
        .or_else(|| first_balanced_object(response))
        .ok_or_else(|| StageError::MalformedOutput("no JSON object found".into()))?;

    let value: Value = serde_json::from_str(candidate.trim())
        .map_err(|e| StageError::MalformedOutput(format!("invalid JSON: {e}")))?;

    if !value.is_object() {
        return Err(StageError::MalformedOutput("expected a JSON object".into()));
    }
    Ok(value)
}

fn fenced_block(response: &str) -> Option<&str> {
    let (start, marker_len) = match response.find("```json") {
        Some(i) => (i, 7),
        None => (response.find("```")?, 3),
    };
    let content_start = start + marker_len;
    let content_end = response[content_start..].find("```")?;
    let block = &response[content_start..content_start + content_end];
    block.trim_start().starts_with('{').then_some(block)
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
