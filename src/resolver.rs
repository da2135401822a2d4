use anyhow::Result;
use headless_chrome::Tab;
use log::{debug, info, warn};
use std::sync::Arc;

use crate::inspector;
use crate::types::{CandidateElement, PageSnapshot, TargetDescription};

/// Relevance weights for the keyword-scoring strategy. Tuned by trial in
/// practice, so they are configuration rather than invariants.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub text: i32,
    pub aria_label: i32,
    pub title: i32,
    pub class_name: i32,
    pub id: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            text: 3,
            aria_label: 2,
            title: 2,
            class_name: 1,
            id: 1,
        }
    }
}

/// Result of one resolution attempt. `NoMatch` is not an error: the caller
/// decides whether to cascade further or give up.
#[derive(Debug, Clone)]
pub enum Outcome {
    Clicked {
        strategy: &'static str,
        text: String,
    },
    NoMatch,
}

impl Outcome {
    pub fn clicked(&self) -> bool {
        matches!(self, Outcome::Clicked { .. })
    }
}

/// A single element-resolution strategy. Strategies are pure over the
/// snapshot except for the final click they dispatch through the tab.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(
        &self,
        tab: &Arc<Tab>,
        snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome>;
}

/// Expand a canonical label into the language-specific synonyms seen in the
/// YouTube Studio UI (Vietnamese/English). Unknown labels fall back to their
/// own words.
pub fn expand_keywords(label: &str) -> Vec<String> {
    let lower = label.to_lowercase();
    let synonyms: &[&str] = if lower.contains("xong") || lower.contains("done") {
        &["xong", "done", "ok", "confirm", "apply"]
    } else if lower.contains("chia sẻ") || lower.contains("share") {
        &["chia sẻ", "share", "edit", "chỉnh sửa"]
    } else if lower.contains("hiển thị") || lower.contains("visibility") {
        &["hiển thị", "visibility", "chế độ", "public", "private", "unlisted"]
    } else if lower.contains("lưu") || lower.contains("save") {
        &["lưu", "save", "publish", "update"]
    } else if lower.contains("chỉnh sửa") || lower.contains("edit") {
        &["chỉnh sửa", "edit", "sửa", "modify"]
    } else if lower.contains("riêng tư") || lower.contains("private") {
        &["riêng tư", "private"]
    } else {
        return lower.split_whitespace().map(str::to_string).collect();
    };
    synonyms.iter().map(|s| s.to_string()).collect()
}

/// All keywords for a target, deduplicated, discovery order preserved.
pub fn keywords_for(target: &TargetDescription) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for label in &target.labels {
        for kw in expand_keywords(label) {
            if !out.contains(&kw) {
                out.push(kw);
            }
        }
    }
    out
}

pub fn score_candidate(el: &CandidateElement, keywords: &[String], w: &ScoreWeights) -> i32 {
    let text = el.text.to_lowercase();
    let aria = el.aria_label.to_lowercase();
    let title = el.title.to_lowercase();
    let class = el.class_name.to_lowercase();
    let id = el.id.to_lowercase();

    let mut score = 0;
    for kw in keywords {
        if text.contains(kw.as_str()) {
            score += w.text;
        }
        if aria.contains(kw.as_str()) {
            score += w.aria_label;
        }
        if title.contains(kw.as_str()) {
            score += w.title;
        }
        if class.contains(kw.as_str()) {
            score += w.class_name;
        }
        if id.contains(kw.as_str()) {
            score += w.id;
        }
    }
    score
}

/// Candidates with score > 0, highest first. The sort is stable, so equal
/// scores keep document discovery order.
pub fn rank_candidates<'a>(
    elements: &'a [CandidateElement],
    keywords: &[String],
    weights: &ScoreWeights,
) -> Vec<(&'a CandidateElement, i32)> {
    let mut ranked: Vec<(&CandidateElement, i32)> = elements
        .iter()
        .map(|el| (el, score_candidate(el, keywords, weights)))
        .filter(|(_, score)| *score > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// Best candidate from a ranked list: the first enabled one, or the first
/// overall when everything is disabled. A disabled "Done" may still accept
/// events inside embedded web components, so it stays a last resort.
pub fn pick_best<'a>(ranked: &[(&'a CandidateElement, i32)]) -> Option<&'a CandidateElement> {
    ranked
        .iter()
        .find(|(el, _)| !el.disabled)
        .or_else(|| ranked.first())
        .map(|(el, _)| *el)
}

/// First enabled element in the slice, else the first element.
fn prefer_enabled<'a>(matches: &[&'a CandidateElement]) -> Option<&'a CandidateElement> {
    matches
        .iter()
        .find(|el| !el.disabled)
        .or_else(|| matches.first())
        .copied()
}

fn click_by_marker(tab: &Arc<Tab>, el: &CandidateElement) -> Result<()> {
    let selector = format!("[data-vsa-id=\"{}\"]", el.vsa_id);
    tab.find_element(&selector)?.click()?;
    Ok(())
}

/// Strategy 1: exact or substring text match. Among substring matches the
/// shortest text wins, so a label buried in a big container loses to the
/// actual button.
struct ExactText;

impl Strategy for ExactText {
    fn name(&self) -> &'static str {
        "exact-text"
    }

    fn attempt(
        &self,
        tab: &Arc<Tab>,
        snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome> {
        for label in &target.labels {
            let needle = label.to_lowercase();

            let exact: Vec<&CandidateElement> = snapshot
                .elements
                .iter()
                .filter(|el| el.text.trim().to_lowercase() == needle)
                .collect();
            if let Some(el) = prefer_enabled(&exact) {
                click_by_marker(tab, el)?;
                return Ok(Outcome::Clicked {
                    strategy: self.name(),
                    text: el.text.clone(),
                });
            }

            let mut partial: Vec<&CandidateElement> = snapshot
                .elements
                .iter()
                .filter(|el| el.text.to_lowercase().contains(&needle))
                .collect();
            partial.sort_by_key(|el| el.text.len());
            if let Some(el) = prefer_enabled(&partial) {
                click_by_marker(tab, el)?;
                return Ok(Outcome::Clicked {
                    strategy: self.name(),
                    text: el.text.clone(),
                });
            }
        }
        Ok(Outcome::NoMatch)
    }
}

/// Strategy 2: accessibility role "button" with a matching name.
struct RoleName;

impl Strategy for RoleName {
    fn name(&self) -> &'static str {
        "role-name"
    }

    fn attempt(
        &self,
        tab: &Arc<Tab>,
        snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome> {
        for label in &target.labels {
            let needle = label.to_lowercase();
            let mut matches: Vec<&CandidateElement> = snapshot
                .elements
                .iter()
                .filter(|el| {
                    el.role == "button" || el.tag == "button" || el.tag == "ytcp-button"
                })
                .filter(|el| {
                    el.text.to_lowercase().contains(&needle)
                        || el.aria_label.to_lowercase().contains(&needle)
                })
                .collect();
            matches.sort_by_key(|el| el.text.len());
            if let Some(el) = prefer_enabled(&matches) {
                click_by_marker(tab, el)?;
                return Ok(Outcome::Clicked {
                    strategy: self.name(),
                    text: el.text.clone(),
                });
            }
        }
        Ok(Outcome::NoMatch)
    }
}

/// Strategy 3: attribute-substring match on aria-label, title, data-testid
/// or class name.
struct AttributeSubstring;

impl Strategy for AttributeSubstring {
    fn name(&self) -> &'static str {
        "attribute-substring"
    }

    fn attempt(
        &self,
        tab: &Arc<Tab>,
        snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome> {
        for label in &target.labels {
            let needle = label.to_lowercase();
            let matches: Vec<&CandidateElement> = snapshot
                .elements
                .iter()
                .filter(|el| {
                    el.aria_label.to_lowercase().contains(&needle)
                        || el.title.to_lowercase().contains(&needle)
                        || el.data_test_id.to_lowercase().contains(&needle)
                        || el.class_name.to_lowercase().contains(&needle)
                })
                .collect();
            if let Some(el) = prefer_enabled(&matches) {
                click_by_marker(tab, el)?;
                return Ok(Outcome::Clicked {
                    strategy: self.name(),
                    text: el.text.clone(),
                });
            }
        }
        Ok(Outcome::NoMatch)
    }
}

/// Strategy 4: synonym-expanded keyword scoring over the whole snapshot.
struct KeywordScore {
    weights: ScoreWeights,
}

impl Strategy for KeywordScore {
    fn name(&self) -> &'static str {
        "keyword-score"
    }

    fn attempt(
        &self,
        tab: &Arc<Tab>,
        snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome> {
        let keywords = keywords_for(target);
        let ranked = rank_candidates(&snapshot.elements, &keywords, &self.weights);
        let Some(el) = pick_best(&ranked) else {
            return Ok(Outcome::NoMatch);
        };
        debug!(
            "keyword-score picked '{}' (tag={}, disabled={})",
            el.text.trim(),
            el.tag,
            el.disabled
        );
        if click_by_marker(tab, el).is_ok() {
            return Ok(Outcome::Clicked {
                strategy: self.name(),
                text: el.text.clone(),
            });
        }
        // Custom elements without click semantics get a scripted event.
        if js_click_marker(tab, el.vsa_id)? {
            return Ok(Outcome::Clicked {
                strategy: self.name(),
                text: el.text.clone(),
            });
        }
        Ok(Outcome::NoMatch)
    }
}

/// Dispatch a synthetic click (then focus + Enter) on one stamped element.
fn js_click_marker(tab: &Arc<Tab>, vsa_id: u32) -> Result<bool> {
    const FN: &str = r#"
(vsaId) => {
  const el = document.querySelector('[data-vsa-id="' + vsaId + '"]');
  if (!el) return false;
  try { el.click(); return true; } catch (e) {}
  try {
    el.dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true, view: window }));
    return true;
  } catch (e) {}
  try {
    el.focus();
    el.dispatchEvent(new KeyboardEvent('keydown', {
      key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true
    }));
    return true;
  } catch (e) {}
  return false;
}
"#;
    let result = tab.evaluate(&format!("({FN})({vsa_id})"), false)?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

/// Last-resort strategy: re-scan the live DOM in page context and dispatch
/// events directly, covering div/span elements with custom handlers that
/// never made it into the snapshot.
struct JsDispatch;

impl Strategy for JsDispatch {
    fn name(&self) -> &'static str {
        "js-dispatch"
    }

    fn attempt(
        &self,
        tab: &Arc<Tab>,
        _snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome> {
        const FN: &str = r#"
(keywords) => {
  const nodes = document.querySelectorAll('button, [role="button"], div, span, a, ytcp-button, [tabindex]');
  for (const el of nodes) {
    try {
      if (el.offsetParent === null) continue;
      const text = (el.textContent || el.innerText || '').toLowerCase();
      const aria = (el.getAttribute('aria-label') || '').toLowerCase();
      const title = (el.getAttribute('title') || '').toLowerCase();
      for (const kw of keywords) {
        if (!text.includes(kw) && !aria.includes(kw) && !title.includes(kw)) continue;
        try { el.click(); return (el.textContent || '').trim(); } catch (e) {}
        try {
          el.dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true, view: window }));
          return (el.textContent || '').trim();
        } catch (e) {}
        try {
          el.focus();
          el.dispatchEvent(new KeyboardEvent('keydown', {
            key: 'Enter', code: 'Enter', keyCode: 13, which: 13, bubbles: true
          }));
          return (el.textContent || '').trim();
        } catch (e) {}
      }
    } catch (e) { /* skip */ }
  }
  return null;
}
"#;
        let keywords = keywords_for(target);
        let kw_json = serde_json::to_string(&keywords)?;
        let result = tab.evaluate(&format!("({FN})({kw_json})"), false)?;
        match result.value.and_then(|v| v.as_str().map(String::from)) {
            Some(text) => Ok(Outcome::Clicked {
                strategy: self.name(),
                text,
            }),
            None => Ok(Outcome::NoMatch),
        }
    }
}

/// The element resolver: an ordered cascade of strategies with early exit.
/// Scripted dispatch is held apart from the snapshot strategies so the
/// orchestrator can slot an LLM-proposed selector in between.
pub struct Resolver {
    strategies: Vec<Box<dyn Strategy>>,
    js_dispatch: JsDispatch,
    pub weights: ScoreWeights,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl Resolver {
    pub fn new(weights: ScoreWeights) -> Self {
        Self {
            strategies: vec![
                Box::new(ExactText),
                Box::new(RoleName),
                Box::new(AttributeSubstring),
                Box::new(KeywordScore {
                    weights: weights.clone(),
                }),
            ],
            js_dispatch: JsDispatch,
            weights,
        }
    }

    /// Run the snapshot strategies against a fresh capture of the page.
    pub fn resolve(&self, tab: &Arc<Tab>, target: &TargetDescription) -> Result<Outcome> {
        let snapshot = inspector::capture(tab)?;
        self.resolve_in(tab, &snapshot, target)
    }

    /// Run the snapshot strategies against a caller-provided snapshot
    /// (e.g. one scoped to an open dialog).
    pub fn resolve_in(
        &self,
        tab: &Arc<Tab>,
        snapshot: &PageSnapshot,
        target: &TargetDescription,
    ) -> Result<Outcome> {
        for strategy in &self.strategies {
            match strategy.attempt(tab, snapshot, target) {
                Ok(Outcome::Clicked { strategy, text }) => {
                    info!("clicked '{}' via {}", text.trim(), strategy);
                    return Ok(Outcome::Clicked { strategy, text });
                }
                Ok(Outcome::NoMatch) => continue,
                Err(e) => {
                    // A strategy throwing (stale marker, detached node) just
                    // cascades to the next one.
                    debug!("strategy {} errored: {e:#}", strategy.name());
                    continue;
                }
            }
        }
        Ok(Outcome::NoMatch)
    }

    /// Scripted event dispatch, the final heuristic in the cascade.
    pub fn dispatch_js(&self, tab: &Arc<Tab>, target: &TargetDescription) -> Result<Outcome> {
        let snapshot = PageSnapshot::default();
        self.js_dispatch.attempt(tab, &snapshot, target)
    }

    /// Try one concrete CSS selector (LLM-proposed or hard-coded fallback).
    /// Selector failures are a no-match, never fatal.
    pub fn try_selector(&self, tab: &Arc<Tab>, selector: &str) -> Outcome {
        if selector.trim().is_empty() {
            return Outcome::NoMatch;
        }
        match tab.find_element(selector).and_then(|el| {
            el.click()?;
            Ok(())
        }) {
            Ok(()) => {
                info!("clicked via selector {selector}");
                Outcome::Clicked {
                    strategy: "selector",
                    text: selector.to_string(),
                }
            }
            Err(e) => {
                warn!("selector {selector} failed: {e}");
                Outcome::NoMatch
            }
        }
    }
}
