use anyhow::{Context, Result, bail};
use std::path::PathBuf;

/// Process configuration, read once at startup. Passed explicitly into each
/// component constructor instead of living in globals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chrome executable. When unset, platform defaults are probed at launch.
    pub browser_path: Option<PathBuf>,
    /// Pre-authenticated Chrome user-data directory. Must exist.
    pub profile_path: PathBuf,
    pub headless: bool,
    pub window_size: (u32, u32),
    pub llm_provider: String,
    pub llm_model: String,
    /// When absent the agent runs heuristics-only, with no planner.
    pub api_key: Option<String>,
}

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_WINDOW: (u32, u32) = (1280, 800);

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so the parsing is testable
    /// without touching process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let browser_path = lookup("BROWSER_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let profile_path = match lookup("BROWSER_USER_DATA").filter(|v| !v.trim().is_empty()) {
            Some(v) => PathBuf::from(v),
            None => default_profile_dir()
                .context("BROWSER_USER_DATA not set and no default Chrome profile found")?,
        };

        let headless = lookup("HEADLESS").map(|v| parse_bool(&v)).unwrap_or(false);

        let width = parse_dim(lookup("WINDOW_WIDTH"), DEFAULT_WINDOW.0)?;
        let height = parse_dim(lookup("WINDOW_HEIGHT"), DEFAULT_WINDOW.1)?;

        let llm_provider = lookup("LLM_PROVIDER").unwrap_or_else(|| "google".to_string());
        let llm_model = lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_key = lookup("GOOGLE_API_KEY").filter(|v| !v.trim().is_empty());

        Ok(Self {
            browser_path,
            profile_path,
            headless,
            window_size: (width, height),
            llm_provider,
            llm_model,
            api_key,
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_dim(value: Option<String>, default: u32) -> Result<u32> {
    match value {
        Some(v) => {
            let n: u32 = v
                .trim()
                .parse()
                .with_context(|| format!("invalid window dimension: {v:?}"))?;
            if n == 0 {
                bail!("window dimension must be nonzero");
            }
            Ok(n)
        }
        None => Ok(default),
    }
}

/// Platform-default Chrome user-data directory, used when BROWSER_USER_DATA
/// is not configured.
fn default_profile_dir() -> Option<PathBuf> {
    let dir = if cfg!(target_os = "windows") {
        dirs::data_local_dir()?
            .join("Google")
            .join("Chrome")
            .join("User Data")
    } else if cfg!(target_os = "macos") {
        dirs::config_dir()?.join("Google").join("Chrome")
    } else {
        dirs::config_dir()?.join("google-chrome")
    };
    dir.exists().then_some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn reads_full_configuration() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("BROWSER_PATH", "/usr/bin/google-chrome"),
            ("BROWSER_USER_DATA", "/tmp/profile"),
            ("HEADLESS", "true"),
            ("WINDOW_WIDTH", "1600"),
            ("WINDOW_HEIGHT", "900"),
            ("LLM_MODEL", "gemini-2.5-pro"),
            ("GOOGLE_API_KEY", "k"),
        ]))
        .unwrap();

        assert_eq!(cfg.profile_path, PathBuf::from("/tmp/profile"));
        assert!(cfg.headless);
        assert_eq!(cfg.window_size, (1600, 900));
        assert_eq!(cfg.llm_model, "gemini-2.5-pro");
        assert_eq!(cfg.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn defaults_apply_when_optional_keys_missing() {
        let cfg =
            Config::from_lookup(lookup_from(&[("BROWSER_USER_DATA", "/tmp/profile")])).unwrap();
        assert!(!cfg.headless);
        assert_eq!(cfg.window_size, DEFAULT_WINDOW);
        assert_eq!(cfg.llm_provider, "google");
        assert_eq!(cfg.llm_model, DEFAULT_MODEL);
        assert!(cfg.api_key.is_none());
        assert!(cfg.browser_path.is_none());
    }

    #[test]
    fn blank_api_key_counts_as_absent() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("BROWSER_USER_DATA", "/tmp/profile"),
            ("GOOGLE_API_KEY", "  "),
        ]))
        .unwrap();
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn rejects_malformed_window_size() {
        let err = Config::from_lookup(lookup_from(&[
            ("BROWSER_USER_DATA", "/tmp/profile"),
            ("WINDOW_WIDTH", "wide"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("window dimension"));
    }

    #[test]
    fn headless_accepts_common_truthy_values() {
        for v in ["1", "true", "YES"] {
            assert!(parse_bool(v), "{v} should parse as true");
        }
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }
}
