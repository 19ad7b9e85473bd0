// Screenshots at named checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::harness::types::{HarnessError, HarnessResult};
use crate::run_dir::sanitize_name;

/// A screenshot taken at a named point in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Name given by the scenario
    pub name: String,

    /// Position among the run's checkpoints, starting at 1
    pub sequence: usize,

    /// Path to the PNG file
    pub path: PathBuf,

    pub width: u32,
    pub height: u32,

    /// When the screenshot was written
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

/// File name for a checkpoint image, e.g. `03_after_upload.png`
pub fn checkpoint_file_name(sequence: usize, name: &str) -> String {
    format!("{:02}_{}.png", sequence, sanitize_name(name))
}

/// Write a PNG screenshot and its JSON manifest into `dir`.
///
/// Checkpoints are write-once: an existing file at the target path is an error.
pub fn write_checkpoint(dir: &Path, sequence: usize, name: &str, png: &[u8]) -> HarnessResult<Checkpoint> {
    let img = image::load_from_memory(png)?;

    let path = dir.join(checkpoint_file_name(sequence, name));
    if path.exists() {
        return Err(HarnessError::Checkpoint(format!(
            "{} already exists",
            path.display()
        )));
    }
    fs::create_dir_all(dir)?;
    fs::write(&path, png)?;

    let checkpoint = Checkpoint {
        name: name.to_string(),
        sequence,
        path,
        width: img.width(),
        height: img.height(),
        timestamp: Utc::now(),
    };
    write_manifest(&checkpoint)?;
    Ok(checkpoint)
}

/// Write the JSON manifest next to the image
pub fn write_manifest(checkpoint: &Checkpoint) -> HarnessResult<()> {
    let manifest_path = checkpoint.path.with_extension("json");
    fs::write(manifest_path, serde_json::to_string_pretty(checkpoint)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, RgbImage};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img: RgbImage = ImageBuffer::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_file_name_is_numbered_and_sanitized() {
        assert_eq!(checkpoint_file_name(3, "after upload"), "03_after_upload.png");
        assert_eq!(checkpoint_file_name(12, "a/b"), "12_a_b.png");
    }

    #[test]
    fn test_write_checkpoint_records_dimensions_and_manifest() {
        let dir = TempDir::new().unwrap();
        let checkpoint = write_checkpoint(dir.path(), 1, "initial", &png(40, 30)).unwrap();

        assert_eq!((checkpoint.width, checkpoint.height), (40, 30));
        assert!(checkpoint.path.exists());

        let manifest = fs::read_to_string(checkpoint.path.with_extension("json")).unwrap();
        let parsed: Checkpoint = serde_json::from_str(&manifest).unwrap();
        assert_eq!(parsed.name, "initial");
        assert_eq!(parsed.sequence, 1);
    }

    #[test]
    fn test_checkpoints_are_write_once() {
        let dir = TempDir::new().unwrap();
        write_checkpoint(dir.path(), 1, "same", &png(4, 4)).unwrap();
        let err = write_checkpoint(dir.path(), 1, "same", &png(4, 4)).unwrap_err();
        assert_eq!(err.kind(), "checkpoint");
    }

    #[test]
    fn test_invalid_png_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = write_checkpoint(dir.path(), 1, "bad", b"not a png").unwrap_err();
        assert_eq!(err.kind(), "checkpoint");
    }
}
