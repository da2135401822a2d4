use anyhow::{Context, Result};
use headless_chrome::Tab;
use std::sync::Arc;

use crate::types::PageSnapshot;

/// Page text is clipped before it reaches any prompt.
pub const PAGE_TEXT_MAX_CHARS: usize = 8000;

/// Injected scanner. Read-only apart from stamping a sequential
/// `data-vsa-id` marker on each candidate so a later click can address
/// exactly the element that was scored.
///
/// Takes one argument: when `scoped` is true the element scan is restricted
/// to the first visible dialog/modal container and the whole call returns
/// null if none is open.
const SNAPSHOT_FN: &str = r#"
(scoped) => {
  const attr = (el, name) => { try { return el.getAttribute(name) || ''; } catch (e) { return ''; } };
  const visible = (el) => { try { return el.offsetParent !== null; } catch (e) { return false; } };

  let root = document;
  if (scoped) {
    const popupSelectors = [
      '[role="dialog"]', '[class*="modal"]', '[class*="popup"]', '[class*="dialog"]',
      '.ytcp-dialog', '.ytcp-modal', 'tp-yt-paper-dialog',
      '[data-testid*="dialog"]', '[data-testid*="modal"]', '[data-testid*="popup"]'
    ];
    root = null;
    for (const sel of popupSelectors) {
      let found;
      try { found = document.querySelectorAll(sel); } catch (e) { continue; }
      for (const el of found) {
        if (visible(el)) { root = el; break; }
      }
      if (root) break;
    }
    if (!root) return JSON.stringify(null);
  }

  const clickableSelectors = [
    'button', '[role="button"]', 'ytcp-button',
    'input[type="button"]', 'input[type="submit"]',
    'div[onclick]', 'span[onclick]', 'a[onclick]',
    'div[tabindex]', 'span[tabindex]', 'a[tabindex]',
    '[data-testid*="visibility"]', '[data-testid*="share"]',
    '[aria-label*="visibility"]', '[aria-label*="share"]',
    '.ytcp-button', '.ytcp-dropdown-trigger',
    '[class*="visibility"]', '[class*="share"]',
    '[class*="dropdown"]', '[class*="menu"]'
  ];

  let nextId = window.__vsaNextId || 0;
  const elements = [];
  const seen = new Set();
  for (const sel of clickableSelectors) {
    let found;
    try { found = root.querySelectorAll(sel); } catch (e) { continue; }
    for (const el of found) {
      try {
        if (!visible(el)) continue;
        const text = (el.textContent || el.innerText || '').trim();
        const ariaLabel = attr(el, 'aria-label');
        const title = attr(el, 'title');
        const dataTestId = attr(el, 'data-testid');
        if (!text && !ariaLabel && !title && !dataTestId) continue;
        const disabled = !!el.disabled || attr(el, 'class').toLowerCase().includes('disabled');
        const key = text + '|' + el.tagName + '|' + disabled;
        if (seen.has(key)) continue;
        seen.add(key);
        const vsaId = nextId++;
        el.setAttribute('data-vsa-id', String(vsaId));
        elements.push({
          vsaId,
          tag: el.tagName.toLowerCase(),
          text: text.slice(0, 200),
          ariaLabel, title, dataTestId,
          className: attr(el, 'class'),
          id: attr(el, 'id'),
          role: attr(el, 'role'),
          disabled
        });
      } catch (e) { /* element threw on access, skip it */ }
    }
  }

  const inputs = [];
  let inputNodes;
  try {
    inputNodes = root.querySelectorAll('input, textarea, [contenteditable="true"], [role="textbox"]');
  } catch (e) { inputNodes = []; }
  for (const el of inputNodes) {
    try {
      if (!visible(el)) continue;
      const vsaId = nextId++;
      el.setAttribute('data-vsa-id', String(vsaId));
      inputs.push({
        vsaId,
        tag: el.tagName.toLowerCase(),
        inputType: attr(el, 'type'),
        placeholder: attr(el, 'placeholder'),
        ariaLabel: attr(el, 'aria-label'),
        className: attr(el, 'class'),
        id: attr(el, 'id'),
        role: attr(el, 'role'),
        contentEditable: attr(el, 'contenteditable') === 'true',
        value: ('value' in el ? String(el.value || '') : '').slice(0, 50)
      });
    } catch (e) { /* skip */ }
  }
  window.__vsaNextId = nextId;

  const walker = document.createTreeWalker(document.body, NodeFilter.SHOW_TEXT);
  const texts = [];
  let node;
  while ((node = walker.nextNode())) {
    const t = node.textContent.trim();
    if (t) texts.push(t);
  }

  return JSON.stringify({ pageText: texts.join(' | '), elements, inputs });
}
"#;

/// Capture a snapshot of the whole page.
pub fn capture(tab: &Arc<Tab>) -> Result<PageSnapshot> {
    Ok(run_snapshot(tab, false)?.unwrap_or_default())
}

/// Capture a snapshot scoped to the first open dialog/modal, if any.
pub fn capture_dialog(tab: &Arc<Tab>) -> Result<Option<PageSnapshot>> {
    run_snapshot(tab, true)
}

fn run_snapshot(tab: &Arc<Tab>, scoped: bool) -> Result<Option<PageSnapshot>> {
    let expr = format!("({SNAPSHOT_FN})({scoped})");
    let result = tab.evaluate(&expr, false)?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    if raw.is_empty() || raw == "null" {
        return Ok(None);
    }
    let mut snapshot: PageSnapshot =
        serde_json::from_str(&raw).context("malformed page snapshot")?;
    if snapshot.page_text.len() > PAGE_TEXT_MAX_CHARS {
        let mut cut = PAGE_TEXT_MAX_CHARS;
        while !snapshot.page_text.is_char_boundary(cut) {
            cut -= 1;
        }
        snapshot.page_text.truncate(cut);
    }
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_deserializes_with_camel_case_keys() {
        let raw = r#"{
            "pageText": "Visibility | Private | Save",
            "elements": [
                {"vsaId": 0, "tag": "button", "text": "Save", "ariaLabel": "Save changes",
                 "title": "", "dataTestId": "", "className": "ytcp-button", "id": "save",
                 "role": "button", "disabled": false}
            ],
            "inputs": [
                {"vsaId": 1, "tag": "input", "inputType": "email", "placeholder": "Enter email",
                 "ariaLabel": "", "className": "text-input", "id": "", "role": "",
                 "contentEditable": false, "value": ""}
            ]
        }"#;
        let snapshot: PageSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.elements.len(), 1);
        assert_eq!(snapshot.elements[0].aria_label, "Save changes");
        assert_eq!(snapshot.inputs[0].input_type, "email");
        assert!(!snapshot.inputs[0].content_editable);
    }

    #[test]
    fn missing_fields_default_instead_of_failing() {
        let raw = r#"{"pageText": "", "elements": [{"vsaId": 3, "tag": "div"}], "inputs": []}"#;
        let snapshot: PageSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.elements[0].vsa_id, 3);
        assert_eq!(snapshot.elements[0].text, "");
        assert!(!snapshot.elements[0].disabled);
    }
}
