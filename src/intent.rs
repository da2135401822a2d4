use anyhow::{Result, bail};
use log::{info, warn};
use serde_json::Value;

use crate::planner::{Planner, extract_json};
use crate::types::ShareRequest;

const EXTRACT_SYSTEM_PROMPT: &str = "You extract structured data from a user command about \
sharing YouTube videos. Reply with a single JSON object:\n\
{\"video_ids\": [\"...\"], \"emails\": [\"...\"]}\n\
Video IDs are the identifiers after the word \"video\" (YouTube IDs, usually 11 characters \
of letters, digits, - and _). Emails are the addresses the videos go to. The command may be \
in Vietnamese or English.";

/// Stopwords that end the run of video IDs in a command, Vietnamese and
/// English prepositions plus the email markers themselves.
const ID_STOPWORDS: &[&str] = &[
    "cho", "với", "tới", "đến", "for", "to", "with", "email", "emails",
];

const TRIM_PUNCT: &[char] = &[',', '.', ';', ':', '!', '?', '"', '\'', '(', ')'];

/// Extract video IDs and emails from a free-form command via the planner,
/// falling back to offline parsing when the model reply is unusable.
pub async fn extract_share_info(planner: &Planner, command: &str) -> Result<ShareRequest> {
    let reply = planner.complete(EXTRACT_SYSTEM_PROMPT, command).await?;
    match parse_share_response(&reply) {
        Ok(request) => Ok(request),
        Err(e) => {
            warn!("model reply unusable ({e}), parsing command offline");
            parse_command_offline(command)
        }
    }
}

/// Decode a model reply into a ShareRequest. Accepts the legacy singular
/// keys (`video_id`, `email`) alongside the array forms.
pub fn parse_share_response(text: &str) -> Result<ShareRequest> {
    let value = extract_json(text)?;

    let video_ids = string_list(&value, "video_ids", "video_id");
    let emails = string_list(&value, "emails", "email");

    if video_ids.is_empty() {
        bail!("no video IDs in reply: {text:?}");
    }
    if emails.is_empty() {
        bail!("no emails in reply: {text:?}");
    }
    Ok(ShareRequest { video_ids, emails })
}

fn string_list(value: &Value, plural: &str, singular: &str) -> Vec<String> {
    if let Some(items) = value[plural].as_array() {
        return items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    value[singular]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default()
}

/// Token-level parser for when no planner is available. Emails are tokens
/// containing both '@' and '.'; video IDs are the ID-shaped tokens following
/// the word "video" up to the first stopword.
pub fn parse_command_offline(command: &str) -> Result<ShareRequest> {
    let tokens: Vec<&str> = command
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|t| t.trim_matches(TRIM_PUNCT))
        .filter(|t| !t.is_empty())
        .collect();

    let mut video_ids = Vec::new();
    let mut emails = Vec::new();
    let mut in_ids = false;

    for token in tokens {
        if token.contains('@') && token.contains('.') {
            emails.push(token.to_string());
            in_ids = false;
            continue;
        }
        let lower = token.to_lowercase();
        if lower == "video" || lower == "videos" {
            in_ids = true;
            continue;
        }
        if in_ids {
            if ID_STOPWORDS.contains(&lower.as_str()) {
                in_ids = false;
                continue;
            }
            if looks_like_video_id(token) {
                video_ids.push(token.to_string());
            }
        }
    }

    if video_ids.is_empty() {
        bail!("no video IDs found in command: {command:?}");
    }
    if emails.is_empty() {
        bail!("no emails found in command: {command:?}");
    }
    info!(
        "parsed offline: {} video(s), {} email(s)",
        video_ids.len(),
        emails.len()
    );
    Ok(ShareRequest { video_ids, emails })
}

fn looks_like_video_id(token: &str) -> bool {
    token.len() >= 5
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vietnamese_share_command() {
        let request =
            parse_command_offline("Chia sẻ video abc123 cho email test@gmail.com").unwrap();
        assert_eq!(
            request,
            ShareRequest {
                video_ids: vec!["abc123".into()],
                emails: vec!["test@gmail.com".into()],
            }
        );
    }

    #[test]
    fn comma_separated_ids_become_independent_entries() {
        let request =
            parse_command_offline("Chia sẻ video abc123, def456 cho email test@gmail.com")
                .unwrap();
        assert_eq!(request.video_ids, vec!["abc123", "def456"]);
        assert_eq!(request.emails, vec!["test@gmail.com"]);
    }

    #[test]
    fn parses_english_command_with_multiple_emails() {
        let request =
            parse_command_offline("share video dQw4w9WgXcQ to a@b.com and c@d.org").unwrap();
        assert_eq!(request.video_ids, vec!["dQw4w9WgXcQ"]);
        assert_eq!(request.emails, vec!["a@b.com", "c@d.org"]);
    }

    #[test]
    fn stopword_ends_the_id_run() {
        let request =
            parse_command_offline("video abc123 cho def456 email test@gmail.com").unwrap();
        assert_eq!(request.video_ids, vec!["abc123"]);
    }

    #[test]
    fn short_tokens_are_not_video_ids() {
        let err = parse_command_offline("video abc cho email test@gmail.com").unwrap_err();
        assert!(err.to_string().contains("no video IDs"));
    }

    #[test]
    fn missing_emails_is_an_error() {
        assert!(parse_command_offline("chia sẻ video abc123").is_err());
    }

    #[test]
    fn trailing_punctuation_is_stripped() {
        let request = parse_command_offline("share video abc123 to test@gmail.com.").unwrap();
        assert_eq!(request.emails, vec!["test@gmail.com"]);
    }

    #[test]
    fn decodes_fenced_model_reply() {
        let reply = "```json\n{\"video_ids\": [\"abc123\"], \"emails\": [\"a@b.com\"]}\n```";
        let request = parse_share_response(reply).unwrap();
        assert_eq!(request.video_ids, vec!["abc123"]);
        assert_eq!(request.emails, vec!["a@b.com"]);
    }

    #[test]
    fn accepts_legacy_singular_keys() {
        let reply = r#"{"video_id": "abc123", "email": "a@b.com"}"#;
        let request = parse_share_response(reply).unwrap();
        assert_eq!(request.video_ids, vec!["abc123"]);
        assert_eq!(request.emails, vec!["a@b.com"]);
    }

    #[test]
    fn empty_lists_in_reply_are_rejected() {
        assert!(parse_share_response(r#"{"video_ids": [], "emails": ["a@b.com"]}"#).is_err());
        assert!(parse_share_response(r#"{"video_ids": ["abc123"], "emails": []}"#).is_err());
    }
}
