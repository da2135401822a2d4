use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::OnceLock;

use crate::config::Config;
use crate::types::{ActionDirective, PageSnapshot};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// How much page context goes into a prompt.
const PROMPT_TEXT_MAX_CHARS: usize = 500;
const PROMPT_ELEMENT_LIMIT: usize = 10;

const ACTION_SYSTEM_PROMPT: &str = "You drive a browser that shares private YouTube videos. \
Based on the current UI information, decide the next action.\n\
The steps run in order: open the Visibility section, select Private, open the private-share \
dialog (the button is labelled Share, Private share or Edit), enter the email and press Done, \
press Done on the visibility popup, then Save.\n\
Clickable elements are not always buttons: divs and spans with onclick or tabindex count too. \
Match by text, aria-label, title, data-testid or class name, and accept similar wording.\n\
Reply with a single JSON object:\n\
{\"action\": \"click_button\" | \"fill_input\" | \"wait\" | \"done\", \
\"target\": \"description of the element\", \"value\": \"text to enter (fill_input only)\", \
\"reason\": \"why\"}\n\
If no suitable element exists reply {\"action\": \"error\", \"message\": \"what is missing\"}.";

/// LLM-backed action planner. Advisory only: its output is one more
/// directive for the orchestrator, never a retry loop of its own.
pub struct Planner {
    client: Client,
    api_key: String,
    model: String,
}

impl Planner {
    /// None when no API key is configured; the agent then runs on
    /// heuristics alone.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            info!("no API key configured, planner disabled");
            return Ok(None);
        };
        match config.llm_provider.to_lowercase().as_str() {
            "google" | "gemini" => Ok(Some(Self {
                client: Client::new(),
                api_key,
                model: config.llm_model.clone(),
            })),
            other => bail!("unsupported LLM provider: {other}"),
        }
    }

    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{GEMINI_ENDPOINT}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "systemInstruction": {"parts": [{"text": system}]},
                "contents": [{"role": "user", "parts": [{"text": user}]}],
                "generationConfig": {"temperature": 0.2},
            }))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            bail!("LLM API error ({status}): {message}");
        }

        let text = body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| anyhow!("no text in LLM response: {body}"))?;
        debug!("LLM reply: {text}");
        Ok(text.to_string())
    }

    /// Ask for the next action given the current snapshot and step.
    pub async fn next_action(
        &self,
        snapshot: &PageSnapshot,
        step: &str,
        emails: &[String],
    ) -> Result<ActionDirective> {
        let user = action_prompt(snapshot, step, emails)?;
        let reply = self.complete(ACTION_SYSTEM_PROMPT, &user).await?;
        parse_directive(&reply)
    }

    /// Ask for a concrete CSS selector for a described element. Ok(None)
    /// means the model saw nothing suitable.
    pub async fn suggest_selector(
        &self,
        snapshot: &PageSnapshot,
        description: &str,
    ) -> Result<Option<String>> {
        let system = "You locate elements on a web page. Reply with a single JSON object: \
            {\"found\": true, \"selector\": \"a CSS selector for the element\", \"reason\": \"why\"} \
            or {\"found\": false, \"reason\": \"why not\"}.";
        let user = format!(
            "Find the element \"{}\" on this page.\n\nPage text: {}\n\nClickable elements:\n{}",
            description,
            clip(&snapshot.page_text, PROMPT_TEXT_MAX_CHARS),
            elements_json(snapshot)?,
        );
        let reply = self.complete(system, &user).await?;
        let value = extract_json(&reply)?;
        if !value["found"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        let selector = value["selector"]
            .as_str()
            .or_else(|| value["element_info"]["selector"].as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(sel) = selector {
            info!("planner proposed selector: {sel}");
        }
        Ok(selector.map(String::from))
    }
}

/// User prompt for a next-action request, carrying the page state, the
/// current step and the emails the step may need to enter.
pub fn action_prompt(snapshot: &PageSnapshot, step: &str, emails: &[String]) -> Result<String> {
    Ok(format!(
        "Current UI state:\nPage text: {}\n\nClickable elements:\n{}\n\nInput fields:\n{}\n\n\
         Current step: {}\nEmails to enter: {}\n\nWhat is the next action?",
        clip(&snapshot.page_text, PROMPT_TEXT_MAX_CHARS),
        elements_json(snapshot)?,
        serde_json::to_string_pretty(&snapshot.inputs)?,
        step,
        emails.join(", "),
    ))
}

fn elements_json(snapshot: &PageSnapshot) -> Result<String> {
    let shown = &snapshot.elements[..snapshot.elements.len().min(PROMPT_ELEMENT_LIMIT)];
    Ok(serde_json::to_string_pretty(shown)?)
}

fn clip(text: &str, max: usize) -> &str {
    let mut cut = max.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// Parse a model reply into a directive, rejecting anything that does not
/// decode into the strict action schema.
pub fn parse_directive(reply: &str) -> Result<ActionDirective> {
    let value = extract_json(reply)?;
    let directive: ActionDirective =
        serde_json::from_value(value).context("model reply is not a valid action directive")?;
    if let ActionDirective::Error { ref message } = directive {
        warn!("planner reported: {message}");
    }
    Ok(directive)
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

/// Pull a JSON object out of free-form model text: a fenced markdown block
/// first, then the first balanced object. Malformed JSON in either form is
/// an error, never a guess.
pub fn extract_json(text: &str) -> Result<Value> {
    if let Some(caps) = fence_re().captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return Ok(value);
        }
    }
    if let Some(raw) = first_balanced_object(text) {
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Ok(value);
        }
    }
    bail!("no parseable JSON object in model response: {text:?}")
}

/// First `{...}` span with balanced braces, string-aware.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_json_from_markdown_fence() {
        let reply = "Sure, here you go:\n```json\n{\"action\": \"wait\"}\n```\nDone.";
        let value = extract_json(reply).unwrap();
        assert_eq!(value, json!({"action": "wait"}));
    }

    #[test]
    fn recovers_json_from_unfenced_text() {
        let reply = "I think the answer is {\"found\": true, \"selector\": \"#done-button\"} ok";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["selector"], "#done-button");
    }

    #[test]
    fn nested_objects_are_extracted_whole() {
        let reply = r##"{"found": true, "element_info": {"selector": "#save", "text": "Save"}}"##;
        let value = extract_json(reply).unwrap();
        assert_eq!(value["element_info"]["selector"], "#save");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let reply = r#"{"reason": "the {Done} button", "action": "done"}"#;
        let value = extract_json(reply).unwrap();
        assert_eq!(value["action"], "done");
    }

    #[test]
    fn malformed_fenced_json_fails_cleanly() {
        let reply = "```json\n{\"action\": \"wait\",}\n```";
        assert!(extract_json(reply).is_err());
    }

    #[test]
    fn malformed_unfenced_json_fails_cleanly() {
        assert!(extract_json("{not json at all").is_err());
        assert!(extract_json("no braces here").is_err());
    }

    #[test]
    fn parses_click_directive() {
        let reply = r#"{"action": "click_button", "target": "Xong", "reason": "confirm"}"#;
        match parse_directive(reply).unwrap() {
            ActionDirective::Click { target, .. } => assert_eq!(target, "Xong"),
            other => panic!("unexpected directive: {other:?}"),
        }
    }

    #[test]
    fn parses_fill_directive_with_value() {
        let reply = r#"{"action": "fill_input", "target": "email box", "value": "a@b.com"}"#;
        match parse_directive(reply).unwrap() {
            ActionDirective::Fill { value, .. } => assert_eq!(value, "a@b.com"),
            other => panic!("unexpected directive: {other:?}"),
        }
    }

    #[test]
    fn parses_error_directive() {
        let reply = r#"{"action": "error", "message": "nothing matches"}"#;
        assert!(matches!(
            parse_directive(reply).unwrap(),
            ActionDirective::Error { .. }
        ));
    }

    #[test]
    fn unknown_action_is_rejected_not_guessed() {
        let reply = r#"{"action": "teleport", "target": "moon"}"#;
        assert!(parse_directive(reply).is_err());
    }

    #[test]
    fn action_prompt_carries_step_and_emails() {
        let snapshot = PageSnapshot::default();
        let emails = vec!["a@b.com".to_string(), "c@d.org".to_string()];
        let prompt = action_prompt(&snapshot, "enter recipient emails", &emails).unwrap();
        assert!(prompt.contains("Current step: enter recipient emails"));
        assert!(prompt.contains("Emails to enter: a@b.com, c@d.org"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let text = "chế độ hiển thị";
        let clipped = clip(text, 7);
        assert!(text.starts_with(clipped));
    }
}
