use crate::error::GatewayError;

use super::types::{ChatRequest, MessageContent};

/// Parses and validates a chat-completions body; every failure is a 400.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, GatewayError> {
    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Validation(format!("Invalid JSON request: {}", e)))?;
    validate(&request)?;
    Ok(request)
}

pub fn validate(request: &ChatRequest) -> Result<(), GatewayError> {
    let mut problems = Vec::new();

    if request.messages.is_empty() {
        problems.push("field 'messages' must have at least 1 items".to_string());
    }
    for (i, msg) in request.messages.iter().enumerate() {
        if let MessageContent::Parts(parts) = &msg.content
            && parts.is_empty()
        {
            problems.push(format!("field 'messages[{}].content' is required", i));
        }
    }
    if let Some(t) = request.temperature
        && !(0.0..=2.0).contains(&t)
    {
        problems.push("field 'temperature' must be >= 0 and <= 2".to_string());
    }
    if let Some(p) = request.top_p
        && !(0.0..=1.0).contains(&p)
    {
        problems.push("field 'top_p' must be >= 0 and <= 1".to_string());
    }
    if let Some(m) = request.max_tokens
        && m <= 0
    {
        problems.push("field 'max_tokens' must be > 0".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::Validation(format!(
            "validation failed: {}",
            problems.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err_message(body: &str) -> String {
        match parse_chat_request(body.as_bytes()) {
            Err(GatewayError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn accepts_minimal_request() {
        let req = parse_chat_request(br#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert_eq!(req.model, "");
        assert!(!req.stream);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(err_message("{not json").starts_with("Invalid JSON request"));
    }

    #[test]
    fn rejects_missing_content() {
        assert!(err_message(r#"{"messages":[{"role":"user"}]}"#).starts_with("Invalid JSON request"));
        assert!(err_message(r#"{"messages":[{"role":"user","content":null}]}"#)
            .starts_with("Invalid JSON request"));
    }

    #[test]
    fn rejects_empty_messages() {
        assert!(err_message(r#"{"messages":[]}"#).contains("'messages'"));
    }

    #[test]
    fn reports_all_range_problems() {
        let msg = err_message(
            r#"{"messages":[{"role":"user","content":"x"}],"temperature":3.5,"top_p":-0.1,"max_tokens":0}"#,
        );
        assert!(msg.contains("'temperature'"));
        assert!(msg.contains("'top_p'"));
        assert!(msg.contains("'max_tokens'"));
    }
}
