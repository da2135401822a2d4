use anyhow::{Context, Result, bail};
use headless_chrome::{Browser, LaunchOptions, Tab};
use log::{info, warn};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;

/// Persistent browser session over the user's logged-in Chrome profile.
/// Created once per process, reused for every video in the batch.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(config: &Config) -> Result<Self> {
        // Attach mode first: reuse a Chrome already exposing DevTools.
        if let Ok(browser) = Browser::connect("http://127.0.0.1:9222".to_string()) {
            info!("attached to existing Chrome on port 9222");
            let tab = {
                let tabs_lock = browser.get_tabs();
                let tabs = tabs_lock
                    .lock()
                    .map_err(|_| anyhow::anyhow!("browser tab list poisoned"))?;
                match tabs.first() {
                    Some(t) => t.clone(),
                    None => browser.new_tab()?,
                }
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        if !config.profile_path.exists() {
            bail!(
                "Chrome profile directory not found: {}\n\
                 Launch Chrome once with --user-data-dir pointing there, \
                 sign in to the YouTube account, then close Chrome and retry.",
                config.profile_path.display()
            );
        }

        let chrome_path = match &config.browser_path {
            Some(p) => {
                if !p.exists() {
                    bail!("configured BROWSER_PATH does not exist: {}", p.display());
                }
                p.clone()
            }
            None => find_chrome()?,
        };

        info!(
            "launching Chrome from {} with profile {}",
            chrome_path.display(),
            config.profile_path.display()
        );

        let options = LaunchOptions {
            headless: config.headless,
            sandbox: false,
            path: Some(chrome_path),
            user_data_dir: Some(config.profile_path.clone()),
            window_size: Some(config.window_size),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--disable-session-crashed-bubble"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(120),
            ..Default::default()
        };

        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

/// Get the current page URL.
pub fn current_url(tab: &Arc<Tab>) -> Result<String> {
    let result = tab.evaluate("window.location.href", false)?;
    Ok(result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| "unknown".to_string()))
}

fn find_chrome() -> Result<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let local = format!(
            r"C:\Users\{}\AppData\Local\Google\Chrome\Application\chrome.exe",
            std::env::var("USERNAME").unwrap_or_else(|_| "Default".to_string())
        );
        vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(local),
        ]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    for path in &candidates {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    warn!("no Chrome executable found in default locations");
    bail!("Chrome executable not found; set BROWSER_PATH")
}
