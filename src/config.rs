//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the acceptance harness, supporting:
//! - Environment variables for all configurable values
//! - Defaults that point at the locally served extraction app
//! - Builder-style overrides from the CLI
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STUDY_ACCEPTANCE_BASE_URL` | Where the extraction app is served | `http://localhost:8000` |
//! | `STUDY_ACCEPTANCE_SAMPLE_PDF` | Sample document fed to the file input | `pdfs/Kim2016.pdf` |
//! | `STUDY_ACCEPTANCE_RUN_DIR` | Base directory for run outputs | `/tmp/study-acceptance` |
//! | `STUDY_ACCEPTANCE_HEADLESS` | Run Chrome without a window | `false` |
//! | `STUDY_ACCEPTANCE_VIEWPORT` | Viewport preset or `WxH` | `standard` |
//! | `STUDY_ACCEPTANCE_NAV_TIMEOUT` | Navigation timeout in seconds | `30` |
//! | `STUDY_ACCEPTANCE_ELEMENT_TIMEOUT` | Element lookup timeout in seconds | `5` |
//! | `STUDY_ACCEPTANCE_CHROME` | Chrome/Chromium executable | auto-detected |
//!
//! # Example
//!
//! ```bash
//! export STUDY_ACCEPTANCE_BASE_URL="http://127.0.0.1:9000"
//! export STUDY_ACCEPTANCE_HEADLESS=true
//! export STUDY_ACCEPTANCE_VIEWPORT=1920x1080
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default origin of the extraction app
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Main page of the extraction app, relative to the base URL
pub const APP_PAGE: &str = "Clinical_Study_Extraction.html";

/// Default sample document
pub const DEFAULT_SAMPLE_PDF: &str = "pdfs/Kim2016.pdf";

/// Default run output directory
pub const DEFAULT_RUN_DIR: &str = "/tmp/study-acceptance";

/// Default navigation timeout (seconds)
pub const DEFAULT_NAV_TIMEOUT: u64 = 30;

/// Default element lookup timeout (seconds)
pub const DEFAULT_ELEMENT_TIMEOUT: u64 = 5;

/// Default viewport preset
pub const DEFAULT_VIEWPORT: &str = "standard";

/// Default viewport width (pixels)
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;

/// Default viewport height (pixels)
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_BASE_URL: &str = "STUDY_ACCEPTANCE_BASE_URL";
pub const ENV_SAMPLE_PDF: &str = "STUDY_ACCEPTANCE_SAMPLE_PDF";
pub const ENV_RUN_DIR: &str = "STUDY_ACCEPTANCE_RUN_DIR";
pub const ENV_HEADLESS: &str = "STUDY_ACCEPTANCE_HEADLESS";
pub const ENV_VIEWPORT: &str = "STUDY_ACCEPTANCE_VIEWPORT";
pub const ENV_NAV_TIMEOUT: &str = "STUDY_ACCEPTANCE_NAV_TIMEOUT";
pub const ENV_ELEMENT_TIMEOUT: &str = "STUDY_ACCEPTANCE_ELEMENT_TIMEOUT";
pub const ENV_CHROME: &str = "STUDY_ACCEPTANCE_CHROME";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for the harness
#[derive(Debug, Clone)]
pub struct Config {
    /// How the browser is launched and how long it may take
    pub browser: BrowserSettings,
    /// Where the application under test lives
    pub target: TargetSettings,
    /// Where run outputs go
    pub runs: RunSettings,
}

/// Browser launch settings
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Run without a visible window
    pub headless: bool,
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
    /// Explicit browser executable, if any
    pub chrome_path: Option<PathBuf>,
    /// Bound on navigation + load wait
    pub navigation_timeout: Duration,
    /// Bound on element lookups
    pub element_timeout: Duration,
}

/// Application-under-test settings
#[derive(Debug, Clone)]
pub struct TargetSettings {
    /// Origin, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Local document used by the "load document" steps
    pub sample_pdf: PathBuf,
}

/// Run output settings
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub base_dir: PathBuf,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            browser: BrowserSettings::from_env(),
            target: TargetSettings::from_env(),
            runs: RunSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            browser: BrowserSettings::defaults(),
            target: TargetSettings::defaults(),
            runs: RunSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl BrowserSettings {
    pub fn from_env() -> Self {
        let viewport = env::var(ENV_VIEWPORT).unwrap_or_else(|_| DEFAULT_VIEWPORT.to_string());
        let (viewport_width, viewport_height) = parse_viewport(&viewport)
            .unwrap_or((DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT));

        Self {
            headless: env::var(ENV_HEADLESS)
                .ok()
                .and_then(|s| parse_flag(&s))
                .unwrap_or(false),
            viewport_width,
            viewport_height,
            chrome_path: env::var(ENV_CHROME).ok().map(PathBuf::from),
            navigation_timeout: Duration::from_secs(
                env::var(ENV_NAV_TIMEOUT)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_NAV_TIMEOUT),
            ),
            element_timeout: Duration::from_secs(
                env::var(ENV_ELEMENT_TIMEOUT)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_ELEMENT_TIMEOUT),
            ),
        }
    }

    pub fn defaults() -> Self {
        Self {
            headless: false,
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            chrome_path: None,
            navigation_timeout: Duration::from_secs(DEFAULT_NAV_TIMEOUT),
            element_timeout: Duration::from_secs(DEFAULT_ELEMENT_TIMEOUT),
        }
    }
}

impl TargetSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            sample_pdf: env::var(ENV_SAMPLE_PDF)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SAMPLE_PDF)),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            sample_pdf: PathBuf::from(DEFAULT_SAMPLE_PDF),
        }
    }

    /// Absolute URL of a page served by the app
    pub fn page_url(&self, page: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            page.trim_start_matches('/')
        )
    }

    /// URL of the main extraction page
    pub fn app_url(&self) -> String {
        self.page_url(APP_PAGE)
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_RUN_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_RUN_DIR)),
        }
    }

    pub fn defaults() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_RUN_DIR),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a viewport string into (width, height)
/// Supports: "compact" (1024x768), "standard" (1280x720), "full-hd" (1920x1080), or "WxH"
pub fn parse_viewport(size: &str) -> Option<(u32, u32)> {
    match size.to_lowercase().as_str() {
        "compact" => Some((1024, 768)),
        "standard" => Some((1280, 720)),
        "full-hd" | "fhd" => Some((1920, 1080)),
        custom => {
            let (w, h) = custom.split_once('x')?;
            let w: u32 = w.parse().ok()?;
            let h: u32 = h.parse().ok()?;
            if w == 0 || h == 0 {
                return None;
            }
            Some((w, h))
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the run output base directory (convenience function)
pub fn run_base_dir() -> PathBuf {
    get().runs.base_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_viewport_presets() {
        assert_eq!(parse_viewport("compact"), Some((1024, 768)));
        assert_eq!(parse_viewport("standard"), Some((1280, 720)));
        assert_eq!(parse_viewport("full-hd"), Some((1920, 1080)));
        assert_eq!(parse_viewport("FHD"), Some((1920, 1080)));
    }

    #[test]
    fn test_parse_viewport_custom() {
        assert_eq!(parse_viewport("800x600"), Some((800, 600)));
        assert_eq!(parse_viewport("0x600"), None);
        assert_eq!(parse_viewport("wide"), None);
        assert_eq!(parse_viewport("800"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_page_url_joins_cleanly() {
        let target = TargetSettings {
            base_url: "http://localhost:8000/".to_string(),
            sample_pdf: PathBuf::from("doc.pdf"),
        };
        assert_eq!(
            target.app_url(),
            "http://localhost:8000/Clinical_Study_Extraction.html"
        );
        assert_eq!(
            target.page_url("/list_available_models.html"),
            "http://localhost:8000/list_available_models.html"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.target.base_url, DEFAULT_BASE_URL);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.navigation_timeout, Duration::from_secs(30));
        assert_eq!(config.runs.base_dir, PathBuf::from(DEFAULT_RUN_DIR));
    }
}
