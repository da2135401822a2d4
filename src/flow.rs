use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use headless_chrome::Tab;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio::time::sleep;

use crate::browser::{self, BrowserSession};
use crate::inspector;
use crate::planner::Planner;
use crate::resolver::{Outcome, Resolver};
use crate::types::{ActionDirective, InputField, PageSnapshot, ShareRequest, TargetDescription};

/// Settle time after a click before the next snapshot.
const STEP_SETTLE: Duration = Duration::from_secs(2);
/// Studio's edit page keeps loading well past DOMContentLoaded.
const PAGE_LOAD_WAIT: Duration = Duration::from_secs(5);
/// Pause between videos in a batch.
pub const INTER_VIDEO_DELAY: Duration = Duration::from_secs(3);

const DONE_RETRIES: usize = 3;

/// Outcome of a batch run. Failures carry the video ID and the error text.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// The one operation the batch loop needs. A trait so the loop is testable
/// without a browser.
#[async_trait]
pub trait VideoSharer {
    async fn share_video(&self, video_id: &str, emails: &[String]) -> Result<()>;
}

/// Share every video in the request. A failed video is recorded and the
/// batch moves on; one broken page never takes down the rest.
pub async fn run_batch(
    sharer: &dyn VideoSharer,
    request: &ShareRequest,
    delay: Duration,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let total = request.video_ids.len();

    for (index, video_id) in request.video_ids.iter().enumerate() {
        info!("[{}/{total}] sharing video {video_id}", index + 1);
        match sharer.share_video(video_id, &request.emails).await {
            Ok(()) => {
                info!("video {video_id} shared");
                summary.completed.push(video_id.clone());
            }
            Err(e) => {
                error!("video {video_id} failed: {e:#}");
                summary.failed.push((video_id.clone(), format!("{e:#}")));
            }
        }
        if index + 1 < total {
            sleep(delay).await;
        }
    }
    summary
}

/// Drives the private-share flow on one tab. Steps run strictly in order;
/// any step that cannot find its element aborts the current video.
pub struct FlowRunner {
    tab: Arc<Tab>,
    resolver: Arc<Resolver>,
    planner: Option<Planner>,
}

impl FlowRunner {
    pub fn new(session: &BrowserSession, resolver: Resolver, planner: Option<Planner>) -> Self {
        Self {
            tab: session.tab.clone(),
            resolver: Arc::new(resolver),
            planner,
        }
    }

    /// Run a browser call off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>, Arc<Resolver>) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        let resolver = self.resolver.clone();
        spawn_blocking(move || f(tab, resolver))
            .await
            .map_err(|e| anyhow::anyhow!("browser task panicked: {e}"))?
    }

    async fn open_editor(&self, video_id: &str) -> Result<()> {
        let url = format!("https://studio.youtube.com/video/{video_id}/edit");
        info!("opening {url}");
        {
            let url = url.clone();
            self.blocking(move |tab, _| {
                tab.navigate_to(&url)?;
                tab.wait_for_element("body")?;
                Ok(())
            })
            .await?
        }
        sleep(PAGE_LOAD_WAIT).await;

        // Studio sometimes bounces to the channel dashboard on a cold
        // profile; one re-navigation fixes it.
        let current = self.blocking(|tab, _| browser::current_url(&tab)).await?;
        if !current.contains("/edit") {
            warn!("landed on {current}, re-navigating");
            let url = url.clone();
            self.blocking(move |tab, _| {
                tab.navigate_to(&url)?;
                tab.wait_for_element("body")?;
                Ok(())
            })
            .await?;
            sleep(PAGE_LOAD_WAIT - STEP_SETTLE).await;
        }
        Ok(())
    }

    /// Resolve and click one target, cascading through every layer:
    /// snapshot strategies, planner-proposed selector, scripted dispatch,
    /// hard-coded fallback selectors, then a full planner directive.
    async fn click_step(
        &self,
        step: &str,
        target: TargetDescription,
        emails: &[String],
    ) -> Result<()> {
        info!("step: {step}");

        let outcome = {
            let target = target.clone();
            self.blocking(move |tab, resolver| resolver.resolve(&tab, &target))
                .await?
        };
        if outcome.clicked() {
            return Ok(());
        }

        if let Some(planner) = &self.planner {
            let snapshot = self.blocking(|tab, _| inspector::capture(&tab)).await?;
            match planner.suggest_selector(&snapshot, &target.describe()).await {
                Ok(Some(selector)) => {
                    let outcome = self
                        .blocking(move |tab, resolver| Ok(resolver.try_selector(&tab, &selector)))
                        .await?;
                    if outcome.clicked() {
                        return Ok(());
                    }
                }
                Ok(None) => debug!("planner found no selector for {step}"),
                Err(e) => warn!("selector suggestion failed: {e:#}"),
            }
        }

        let outcome = {
            let target = target.clone();
            self.blocking(move |tab, resolver| resolver.dispatch_js(&tab, &target))
                .await?
        };
        if outcome.clicked() {
            return Ok(());
        }

        for selector in target.fallback_selectors.clone() {
            let outcome = self
                .blocking(move |tab, resolver| Ok(resolver.try_selector(&tab, &selector)))
                .await?;
            if outcome.clicked() {
                return Ok(());
            }
        }

        if let Some(planner) = &self.planner {
            let snapshot = self.blocking(|tab, _| inspector::capture(&tab)).await?;
            match planner.next_action(&snapshot, step, emails).await {
                Ok(directive) => {
                    if self.execute_directive(directive).await? {
                        return Ok(());
                    }
                }
                Err(e) => warn!("planner directive failed: {e:#}"),
            }
        }

        bail!("could not resolve element for step: {step} ({})", target.describe())
    }

    /// Carry out one planner directive. Returns whether the step can be
    /// considered handled.
    async fn execute_directive(&self, directive: ActionDirective) -> Result<bool> {
        match directive {
            ActionDirective::Click { target, reason } => {
                info!("planner: click '{target}' ({reason})");
                let desc = TargetDescription::new(&[target.as_str()]);
                let outcome = {
                    let desc = desc.clone();
                    self.blocking(move |tab, resolver| resolver.resolve(&tab, &desc))
                        .await?
                };
                if outcome.clicked() {
                    return Ok(true);
                }
                let outcome = self
                    .blocking(move |tab, resolver| resolver.dispatch_js(&tab, &desc))
                    .await?;
                Ok(outcome.clicked())
            }
            ActionDirective::Fill { value, .. } => {
                info!("planner: fill '{value}'");
                self.enter_emails(std::slice::from_ref(&value)).await?;
                Ok(true)
            }
            ActionDirective::Wait => {
                sleep(STEP_SETTLE).await;
                Ok(true)
            }
            ActionDirective::Done => Ok(true),
            ActionDirective::Error { message } => {
                warn!("planner gave up: {message}");
                Ok(false)
            }
        }
    }

    /// Type each address into the share dialog's email field, confirming
    /// with Enter so the dialog turns it into a chip.
    async fn enter_emails(&self, emails: &[String]) -> Result<()> {
        let snapshot = self.blocking(|tab, _| inspector::capture(&tab)).await?;
        let input = pick_email_input(&snapshot)
            .context("no email input field visible in the share dialog")?;
        let vsa_id = input.vsa_id;
        debug!(
            "email input: tag={} type={} placeholder={:?}",
            input.tag, input.input_type, input.placeholder
        );

        for email in emails {
            info!("entering {email}");
            let email = email.clone();
            self.blocking(move |tab, _| {
                let selector = format!("[data-vsa-id=\"{vsa_id}\"]");
                let field = tab.find_element(&selector)?;
                field.click()?;
                tab.evaluate(
                    &format!(
                        "(() => {{ const el = document.querySelector('{selector}'); \
                         if (el && 'value' in el) el.value = ''; }})()"
                    ),
                    false,
                )?;
                tab.type_str(&email)?;
                tab.press_key("Enter")?;
                Ok(())
            })
            .await?;
            sleep(Duration::from_secs(1)).await;
        }
        Ok(())
    }

    /// Confirm the share dialog. The Done button often stays visually
    /// disabled until the email chip registers, so this retries, then falls
    /// back to scripted dispatch, a fixed selector, and finally a bare
    /// Enter press, which the dialog also accepts.
    async fn confirm_email_dialog(&self) -> Result<()> {
        let target = TargetDescription::new(&["Xong", "Done"]).with_fallbacks(&["#done-button"]);

        for attempt in 1..=DONE_RETRIES {
            let outcome = {
                let target = target.clone();
                self.blocking(move |tab, resolver| resolver.resolve(&tab, &target))
                    .await?
            };
            if outcome.clicked() {
                return Ok(());
            }
            debug!("Done not clickable yet (attempt {attempt}/{DONE_RETRIES})");
            sleep(STEP_SETTLE).await;
        }

        let outcome = {
            let target = target.clone();
            self.blocking(move |tab, resolver| resolver.dispatch_js(&tab, &target))
                .await?
        };
        if outcome.clicked() {
            return Ok(());
        }

        let outcome = self
            .blocking(|tab, resolver| Ok(resolver.try_selector(&tab, "#done-button")))
            .await?;
        if outcome.clicked() {
            return Ok(());
        }

        warn!("Done button unreachable, confirming with Enter");
        self.blocking(|tab, _| {
            tab.press_key("Enter")?;
            Ok(())
        })
        .await
    }

    /// Confirm the visibility popup that reappears after the share dialog
    /// closes. Resolution is scoped to the open dialog when one is found,
    /// so a "Done" elsewhere on the page is never hit by mistake.
    async fn confirm_visibility_popup(&self, emails: &[String]) -> Result<()> {
        let target = TargetDescription::new(&["Xong", "Done"])
            .with_fallbacks(&["#done-button", "#save-button"]);

        let scoped = {
            let target = target.clone();
            self.blocking(move |tab, resolver| {
                match inspector::capture_dialog(&tab)? {
                    Some(snapshot) => resolver.resolve_in(&tab, &snapshot, &target),
                    None => Ok(Outcome::NoMatch),
                }
            })
            .await?
        };
        if scoped.clicked() {
            return Ok(());
        }

        self.click_step("confirm visibility popup", target, emails)
            .await
    }
}

/// Score the visible input fields and pick the one most likely to be the
/// share dialog's email entry. Ties keep the first field in document order.
pub fn pick_email_input(snapshot: &PageSnapshot) -> Option<&InputField> {
    let mut best: Option<(&InputField, i32)> = None;
    for input in &snapshot.inputs {
        let score = score_input(input);
        if score > 0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((input, score));
        }
    }
    best.map(|(input, _)| input)
}

fn score_input(input: &InputField) -> i32 {
    let mut score = 0;
    if input.tag == "input" || input.tag == "textarea" {
        score += 2;
    }
    match input.input_type.as_str() {
        "email" => score += 3,
        "text" => score += 1,
        _ => {}
    }
    if input.placeholder.to_lowercase().contains("email") {
        score += 2;
    }
    if input.aria_label.to_lowercase().contains("email") {
        score += 2;
    }
    if input.content_editable {
        score += 1;
    }
    if input.role == "textbox" {
        score += 1;
    }
    score
}

#[async_trait]
impl VideoSharer for FlowRunner {
    async fn share_video(&self, video_id: &str, emails: &[String]) -> Result<()> {
        self.open_editor(video_id).await?;

        self.click_step(
            "open visibility section",
            TargetDescription::new(&["Chế độ hiển thị", "Visibility"]),
            emails,
        )
        .await?;
        sleep(STEP_SETTLE).await;

        self.click_step(
            "select private",
            TargetDescription::new(&["Riêng tư", "Private"])
                .with_fallbacks(&["#private-radio-button", "input[value=\"private\"]"]),
            emails,
        )
        .await?;
        sleep(STEP_SETTLE).await;

        self.click_step(
            "open private share dialog",
            TargetDescription::new(&[
                "Chỉnh sửa",
                "Chia sẻ riêng tư",
                "Chia sẻ",
                "Edit",
                "Share",
            ])
            .with_fallbacks(&[".private-share-edit-button"]),
            emails,
        )
        .await?;
        sleep(STEP_SETTLE).await;

        self.enter_emails(emails).await?;
        sleep(STEP_SETTLE).await;

        self.confirm_email_dialog().await?;
        sleep(STEP_SETTLE).await;

        self.confirm_visibility_popup(emails).await?;
        sleep(STEP_SETTLE).await;

        self.click_step(
            "save changes",
            TargetDescription::new(&["Lưu", "Save"])
                .with_fallbacks(&["ytcp-button#save", "#save-button"]),
            emails,
        )
        .await?;
        sleep(STEP_SETTLE).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedSharer {
        fail_ids: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VideoSharer for ScriptedSharer {
        async fn share_video(&self, video_id: &str, _emails: &[String]) -> Result<()> {
            self.calls.lock().unwrap().push(video_id.to_string());
            if self.fail_ids.iter().any(|id| id == video_id) {
                bail!("element not found");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn batch_continues_past_a_failed_video() {
        let sharer = ScriptedSharer {
            fail_ids: vec!["abc123".into()],
            calls: Mutex::new(Vec::new()),
        };
        let request = ShareRequest {
            video_ids: vec!["abc123".into(), "def456".into()],
            emails: vec!["test@gmail.com".into()],
        };

        let summary = run_batch(&sharer, &request, Duration::ZERO).await;

        assert_eq!(*sharer.calls.lock().unwrap(), vec!["abc123", "def456"]);
        assert_eq!(summary.completed, vec!["def456"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "abc123");
    }

    #[tokio::test]
    async fn all_successes_report_no_failures() {
        let sharer = ScriptedSharer {
            fail_ids: Vec::new(),
            calls: Mutex::new(Vec::new()),
        };
        let request = ShareRequest {
            video_ids: vec!["abc123".into()],
            emails: vec!["a@b.com".into()],
        };

        let summary = run_batch(&sharer, &request, Duration::ZERO).await;

        assert_eq!(summary.completed, vec!["abc123"]);
        assert!(summary.failed.is_empty());
    }

    fn field(tag: &str, input_type: &str, placeholder: &str) -> InputField {
        InputField {
            tag: tag.into(),
            input_type: input_type.into(),
            placeholder: placeholder.into(),
            ..Default::default()
        }
    }

    #[test]
    fn email_typed_input_beats_plain_text_input() {
        let snapshot = PageSnapshot {
            inputs: vec![
                field("input", "text", "Search"),
                field("input", "email", "Enter email address"),
            ],
            ..Default::default()
        };
        let picked = pick_email_input(&snapshot).unwrap();
        assert_eq!(picked.input_type, "email");
    }

    #[test]
    fn placeholder_mentioning_email_outranks_generic_text_field() {
        let snapshot = PageSnapshot {
            inputs: vec![
                field("input", "text", ""),
                field("input", "text", "Nhập email"),
            ],
            ..Default::default()
        };
        let picked = pick_email_input(&snapshot).unwrap();
        assert_eq!(picked.placeholder, "Nhập email");
    }

    #[test]
    fn equal_scores_keep_the_first_field_in_document_order() {
        let first = InputField {
            vsa_id: 10,
            ..field("input", "email", "")
        };
        let second = InputField {
            vsa_id: 11,
            ..field("input", "email", "")
        };
        let snapshot = PageSnapshot {
            inputs: vec![first, second],
            ..Default::default()
        };
        assert_eq!(pick_email_input(&snapshot).unwrap().vsa_id, 10);
    }

    #[test]
    fn no_inputs_means_none_not_a_panic() {
        let snapshot = PageSnapshot::default();
        assert!(pick_email_input(&snapshot).is_none());
    }
}
