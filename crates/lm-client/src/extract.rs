use serde::de::DeserializeOwned;

use crate::LmError;

/// Pulls a JSON object out of a model reply and deserializes it.
///
/// Models like to wrap their answer in prose or markdown, so this looks for
/// a ```` ```json ```` block first, then any fenced block, then the span from
/// the first `{` to the last `}`.
pub fn extract_json<T: DeserializeOwned>(reply: &str) -> Result<T, LmError> {
    let mut last_err = None;
    for candidate in candidates(reply) {
        match serde_json::from_str(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = Some(e),
        }
    }
    Err(LmError::Decode(match last_err {
        Some(e) => format!("{e} in reply: {reply}"),
        None => format!("no JSON found in reply: {reply}"),
    }))
}

fn candidates(reply: &str) -> Vec<&str> {
    let mut out = Vec::new();
    if let Some(block) = fenced(reply, "```json") {
        out.push(block);
    }
    if let Some(block) = fenced(reply, "```") {
        // Drop a language tag on the opening fence line.
        let block = match block.split_once('\n') {
            Some((tag, rest)) if !tag.trim_start().starts_with(['{', '[']) => rest.trim(),
            _ => block,
        };
        out.push(block);
    }
    if let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) {
        if start < end {
            out.push(&reply[start..=end]);
        }
    }
    out.push(reply.trim());
    out
}

fn fenced<'a>(reply: &'a str, open: &str) -> Option<&'a str> {
    let start = reply.find(open)? + open.len();
    let rest = &reply[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::{Value, json};

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Card {
        question: String,
        answer: String,
    }

    #[test]
    fn test_plain_object() {
        let card: Card = extract_json(r#"{"question": "日本の首都は？", "answer": "東京"}"#).unwrap();
        assert_eq!(card.answer, "東京");
    }

    #[test]
    fn test_json_fence_with_prose() {
        let reply = "Here is your review:\n```json\n{\"score\": 80, \"comments\": \"ok\"}\n```\nGood luck!";
        let value: Value = extract_json(reply).unwrap();
        assert_eq!(value, json!({"score": 80, "comments": "ok"}));
    }

    #[test]
    fn test_bare_fence() {
        let reply = "```\n{\"question\": \"q\", \"answer\": \"a\"}\n```";
        let card: Card = extract_json(reply).unwrap();
        assert_eq!(card, Card { question: "q".into(), answer: "a".into() });
    }

    #[test]
    fn test_braces_inside_text() {
        let reply = "Sure! {\"question\": \"2+2?\", \"answer\": \"4\"} Hope that helps.";
        let card: Card = extract_json(reply).unwrap();
        assert_eq!(card.question, "2+2?");
    }

    #[test]
    fn test_no_json() {
        let err = extract_json::<Value>("I cannot help with that.").unwrap_err();
        assert!(matches!(err, LmError::Decode(_)));
    }
}
