use serde::{Deserialize, Serialize};

/// Natural-language description of a UI action ("click the Done button"),
/// deliberately not tied to one selector. The resolver turns it into a click
/// through its strategy cascade; `fallback_selectors` are tried last.
#[derive(Debug, Clone)]
pub struct TargetDescription {
    /// Locale variants of the label, e.g. ["Xong", "Done"].
    pub labels: Vec<String>,
    /// Plain CSS selectors tried after every heuristic strategy missed.
    pub fallback_selectors: Vec<String>,
}

impl TargetDescription {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            fallback_selectors: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, selectors: &[&str]) -> Self {
        self.fallback_selectors = selectors.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn describe(&self) -> String {
        self.labels.join(" / ")
    }
}

/// One clickable element pulled out of the live page. The `vsa_id` is a
/// marker attribute stamped onto the element during the scan so a later
/// click targets exactly the node that was scored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidateElement {
    pub vsa_id: u32,
    pub tag: String,
    pub text: String,
    pub aria_label: String,
    pub title: String,
    pub data_test_id: String,
    pub class_name: String,
    pub id: String,
    pub role: String,
    pub disabled: bool,
}

/// A visible input/textarea/contenteditable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InputField {
    pub vsa_id: u32,
    pub tag: String,
    pub input_type: String,
    pub placeholder: String,
    pub aria_label: String,
    pub class_name: String,
    pub id: String,
    pub role: String,
    pub content_editable: bool,
    pub value: String,
}

/// Point-in-time capture of the page. Never cached across steps: the
/// document changes after every click, so each resolution re-captures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub page_text: String,
    pub elements: Vec<CandidateElement>,
    pub inputs: Vec<InputField>,
}

/// Structured instruction produced by the planner. The wire values match
/// what the model is prompted to emit; anything else fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ActionDirective {
    #[serde(rename = "click_button")]
    Click {
        target: String,
        #[serde(default)]
        reason: String,
    },
    #[serde(rename = "fill_input")]
    Fill {
        #[serde(default)]
        target: String,
        value: String,
        #[serde(default)]
        reason: String,
    },
    #[serde(rename = "wait")]
    Wait,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error { message: String },
}

/// Parsed intent of one user command.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareRequest {
    pub video_ids: Vec<String>,
    pub emails: Vec<String>,
}
