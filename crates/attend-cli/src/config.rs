use anyhow::{Context, Result};
use attend_core::{GalleryConfig, RecognitionConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DETECTOR_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";

/// CLI configuration: an optional TOML file, then `ATTEND_*` environment
/// overrides.
pub struct Config {
    /// Root for the gallery, models, attendance CSVs and debug log.
    pub data_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// SeetaFace frontal detector model.
    pub detector_model: PathBuf,
    /// Daily attendance CSV files.
    pub attendance_dir: PathBuf,
    /// Prediction debug log.
    pub debug_log: PathBuf,
    pub recognition: RecognitionConfig,
    pub gallery: GalleryConfig,
}

/// Shape of the `ATTEND_CONFIG` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    recognition: RecognitionConfig,
    gallery: GalleryConfig,
}

impl Config {
    /// Load configuration from `ATTEND_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = var("ATTEND_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir(&var));

        let file = match var("ATTEND_CONFIG") {
            Some(path) => read_file_config(Path::new(&path))?,
            None => FileConfig::default(),
        };

        let mut recognition = file.recognition.rooted_at(&data_dir);
        recognition.confidence_threshold = parsed(&var, "ATTEND_CONFIDENCE_THRESHOLD", recognition.confidence_threshold);
        recognition.proba_threshold = parsed(&var, "ATTEND_PROBA_THRESHOLD", recognition.proba_threshold);
        recognition.padding = parsed(&var, "ATTEND_PADDING", recognition.padding);

        let db_path = var("ATTEND_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("attendance.db"));
        let detector_model = var("ATTEND_DETECTOR_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models").join(DETECTOR_MODEL_FILE));

        Ok(Self {
            db_path,
            detector_model,
            attendance_dir: data_dir.join("attendance"),
            debug_log: data_dir.join("debug_logs").join("predictions.log"),
            recognition,
            gallery: file.gallery.rooted_at(&data_dir),
            data_dir,
        })
    }
}

fn default_data_dir(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("attend")
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Parse `key` if set and valid, else keep `default`. Invalid values are
/// logged and ignored.
fn parsed<T: std::str::FromStr + Copy>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_under_xdg_data_home() {
        let cfg = Config::from_lookup(lookup(&[("XDG_DATA_HOME", "/srv/data")])).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/data/attend"));
        assert_eq!(cfg.db_path, PathBuf::from("/srv/data/attend/attendance.db"));
        assert_eq!(cfg.gallery.dir, PathBuf::from("/srv/data/attend/training_images"));
        assert_eq!(
            cfg.recognition.histogram_model_path,
            PathBuf::from("/srv/data/attend/models/trained_model.json")
        );
        assert_eq!(cfg.recognition.confidence_threshold, 100.0);
        assert_eq!(cfg.recognition.proba_threshold, 0.80);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("ATTEND_DATA_DIR", "/d"),
            ("ATTEND_DB_PATH", "/db/a.db"),
            ("ATTEND_CONFIDENCE_THRESHOLD", "72.5"),
            ("ATTEND_PROBA_THRESHOLD", "0.9"),
            ("ATTEND_PADDING", "0.2"),
            ("ATTEND_DETECTOR_MODEL", "/m/seeta.bin"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/db/a.db"));
        assert_eq!(cfg.detector_model, PathBuf::from("/m/seeta.bin"));
        assert_eq!(cfg.recognition.confidence_threshold, 72.5);
        assert_eq!(cfg.recognition.proba_threshold, 0.9);
        assert_eq!(cfg.recognition.padding, 0.2);
        assert_eq!(cfg.debug_log, PathBuf::from("/d/debug_logs/predictions.log"));
    }

    #[test]
    fn test_unparsable_override_keeps_default() {
        let cfg = Config::from_lookup(lookup(&[
            ("ATTEND_DATA_DIR", "/d"),
            ("ATTEND_CONFIDENCE_THRESHOLD", "high"),
        ]))
        .unwrap();
        assert_eq!(cfg.recognition.confidence_threshold, 100.0);
    }

    #[test]
    fn test_toml_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attend.toml");
        std::fs::write(
            &path,
            r#"
[recognition]
confidence_threshold = 65.0
neighbors = 5

[recognition.lbp]
grid_x = 4

[gallery]
prefix = "Face"
extension = "png"
"#,
        )
        .unwrap();
        let cfg = Config::from_lookup(lookup(&[
            ("ATTEND_DATA_DIR", "/d"),
            ("ATTEND_CONFIG", path.to_str().unwrap()),
            ("ATTEND_PROBA_THRESHOLD", "0.7"),
        ]))
        .unwrap();
        assert_eq!(cfg.recognition.confidence_threshold, 65.0);
        assert_eq!(cfg.recognition.neighbors, 5);
        assert_eq!(cfg.recognition.lbp.grid_x, 4);
        assert_eq!(cfg.recognition.lbp.grid_y, 8);
        assert_eq!(cfg.recognition.proba_threshold, 0.7);
        assert_eq!(cfg.recognition.canonical_size, 200);
        assert_eq!(cfg.gallery.prefix, "Face");
        assert_eq!(cfg.gallery.dir, PathBuf::from("/d/training_images"));
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let result = Config::from_lookup(lookup(&[
            ("ATTEND_DATA_DIR", "/d"),
            ("ATTEND_CONFIG", "/nonexistent/attend.toml"),
        ]));
        assert!(result.is_err());
    }
}
