use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Pull a JSON object out of an LLM reply.
///
/// Models like to wrap JSON in prose or code fences, so the first complete
/// object is taken and anything around it is ignored.
pub fn extract_json<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let mut first_error = None;
    for (start, _) in reply.match_indices('{') {
        let mut objects = serde_json::Deserializer::from_str(&reply[start..]).into_iter::<T>();
        match objects.next() {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }

    Err(match first_error {
        Some(e) => Error::MalformedResponse(format!("Invalid JSON in reply ({}): {}", e, preview(reply))),
        None => Error::MalformedResponse(format!("No JSON object in reply: {}", preview(reply))),
    })
}

/// Remove a single code fence wrapped around a whole reply.
pub(crate) fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(newline) => &trimmed[newline + 1..],
        None => return "",
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn preview(reply: &str) -> String {
    reply.chars().take(80).collect()
}
