//! Run directory management.
//!
//! Every scenario run gets its own directory under a common base
//! (`STUDY_ACCEPTANCE_RUN_DIR`, default `/tmp/study-acceptance`) holding:
//! - numbered checkpoint screenshots with JSON manifests
//! - exported probe values and captured downloads
//! - `summary.json` and `.run.json` metadata

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config;

/// File name of the run metadata
pub const METADATA_FILE: &str = ".run.json";

/// File name of the JSON summary
pub const SUMMARY_FILE: &str = "summary.json";

/// A scenario run's output directory
#[derive(Debug, Clone)]
pub struct RunDir {
    /// Unique run ID
    pub id: String,
    /// Root directory for this run
    pub dir: PathBuf,
    /// Whether to keep files after the run ends
    pub keep: bool,
    /// Scenario the run belongs to
    pub scenario: Option<String>,
    /// Set once `init` has claimed the directory; only then may drop remove it
    created: Arc<AtomicBool>,
}

impl RunDir {
    /// Create a run directory named after a scenario plus a unique timestamp
    pub fn with_name(name: &str) -> Self {
        Self::with_name_in(config::run_base_dir(), name)
    }

    /// Like [`RunDir::with_name`], under an explicit base directory
    pub fn with_name_in(base: impl Into<PathBuf>, name: &str) -> Self {
        let id = format!("{}_{}", sanitize_name(name), generate_timestamp_suffix());
        let mut run = Self::under(base.into(), &id);
        run.scenario = Some(name.to_string());
        run
    }

    /// Use an exact directory
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let id = dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(generate_run_id);

        Self {
            id,
            dir,
            keep: true,
            scenario: None,
            created: Arc::default(),
        }
    }

    fn under(base: PathBuf, id: &str) -> Self {
        Self {
            id: id.to_string(),
            dir: base.join(id),
            keep: true,
            scenario: None,
            created: Arc::default(),
        }
    }

    /// Set whether to keep files after the run ends
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn scenario(mut self, name: impl Into<String>) -> Self {
        self.scenario = Some(name.into());
        self
    }

    /// Create the directory and write run metadata.
    /// Refuses a directory that already holds files from another run.
    pub fn init(&self) -> std::io::Result<()> {
        if self.dir.exists() && fs::read_dir(&self.dir)?.next().is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("run directory {} is not empty", self.dir.display()),
            ));
        }
        fs::create_dir_all(&self.dir)?;

        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let metadata = serde_json::json!({
            "id": self.id,
            "created": chrono::Utc::now().to_rfc3339(),
            "host": host,
            "scenario": self.scenario,
        });

        self.created.store(true, Ordering::Relaxed);
        fs::write(
            self.dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&metadata)?,
        )?;
        Ok(())
    }

    /// Path for an exported artifact; the name is sanitized but keeps its extension
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact".to_string());
        let name = match path.extension() {
            Some(ext) => format!("{}.{}", sanitize_name(&stem), sanitize_name(&ext.to_string_lossy())),
            None => sanitize_name(&stem),
        };
        self.dir.join(name)
    }

    /// Where the browser drops downloads before they are moved
    pub fn downloads_dir(&self) -> PathBuf {
        self.dir.join("downloads")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }
}

impl Drop for RunDir {
    fn drop(&mut self) {
        if !self.keep && self.created.load(Ordering::Relaxed) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

fn generate_run_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("run_{}_{}", timestamp, std::process::id())
}

/// Millisecond timestamp plus a per-process counter
fn generate_timestamp_suffix() -> String {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    format!(
        "{}_{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f"),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}

/// Sanitize a name for use in filenames
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Remove run directories under `base` not modified within `max_age`
pub fn cleanup_old_runs(base: &Path, max_age: Duration) -> std::io::Result<usize> {
    if !base.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut cleaned = 0;

    for entry in fs::read_dir(base)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > max_age) && fs::remove_dir_all(&path).is_ok() {
            tracing::debug!(path = %path.display(), "removed old run");
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

/// List run directories under `base`, oldest name first
pub fn list_runs(base: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        if path.is_dir() {
            runs.push(path);
        }
    }
    runs.sort();
    Ok(runs)
}
