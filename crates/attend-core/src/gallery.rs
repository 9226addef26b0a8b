//! Training image store.
//!
//! A flat directory of canonical face crops named
//! `<prefix>.<subject>.[<fragment>.]<sequence>.<ext>`. The subject id is the
//! only segment the trainer relies on; the display-name fragment is for
//! people browsing the directory. Names that do not parse are foreign files
//! and are ignored rather than treated as errors.

use crate::config::GalleryConfig;
use crate::equalize::equalize_histogram;
use crate::normalizer::resize_canonical;
use crate::types::{FaceSample, SubjectId};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write sample {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("gallery file not found: {0}")]
    NotFound(PathBuf),
    #[error("path is not a sample in the gallery directory: {0}")]
    OutsideGallery(PathBuf),
}

/// One parsed gallery file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryEntry {
    pub path: PathBuf,
    pub subject: SubjectId,
    pub sequence: Option<u32>,
}

/// Keep `[A-Za-z0-9_]` after trimming and turning spaces into underscores.
pub fn sanitize_component(s: &str) -> String {
    s.trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Filename fragment for an account: sanitized name and uid joined by `_`,
/// whichever are non-empty.
pub fn display_fragment(name: Option<&str>, uid: Option<&str>) -> Option<String> {
    let name = name.map(sanitize_component).unwrap_or_default();
    let uid = uid.map(sanitize_component).unwrap_or_default();
    match (name.is_empty(), uid.is_empty()) {
        (false, false) => Some(format!("{name}_{uid}")),
        (false, true) => Some(name),
        (true, false) => Some(uid),
        (true, true) => None,
    }
}

/// Whether an uploaded file name carries an accepted image extension.
pub fn is_allowed_image_name(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed)),
        None => false,
    }
}

/// Decode a gallery file as a canonical sample: grayscale, resized to
/// `canonical_size` if needed, equalized.
pub fn load_sample(path: &Path, canonical_size: u32) -> Result<FaceSample, image::ImageError> {
    let gray = image::open(path)?.to_luma8();
    let mut gray = resize_canonical(&gray, canonical_size);
    equalize_histogram(&mut gray);
    Ok(FaceSample::new(gray))
}

/// Directory-backed gallery of labelled samples.
pub struct Gallery {
    config: GalleryConfig,
}

impl Gallery {
    /// Open the gallery, creating its directory if missing.
    pub fn open(config: GalleryConfig) -> Result<Self, GalleryError> {
        std::fs::create_dir_all(&config.dir).map_err(|source| GalleryError::Io {
            path: config.dir.clone(),
            source,
        })?;
        Ok(Self { config })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Parse `<prefix>.<subject>.[...].<sequence>.<ext>`.
    ///
    /// The subject is the first segment after the prefix and must be a
    /// positive integer. The sequence is the last segment before the
    /// extension when it is numeric and distinct from the subject segment.
    pub fn parse_name(&self, file_name: &str) -> Option<(SubjectId, Option<u32>)> {
        let (stem, _ext) = file_name.rsplit_once('.')?;
        let parts: Vec<&str> = stem.split('.').collect();
        if parts.len() < 2 || parts[0] != self.config.prefix {
            return None;
        }
        let subject = SubjectId::parse(parts[1])?;
        let sequence = if parts.len() >= 3 {
            parts[parts.len() - 1].parse::<u32>().ok()
        } else {
            None
        };
        Some((subject, sequence))
    }

    /// Every parseable sample, sorted by file name.
    pub fn entries(&self) -> Result<Vec<GalleryEntry>, GalleryError> {
        Ok(self
            .file_names()?
            .into_iter()
            .filter_map(|name| {
                let (subject, sequence) = self.parse_name(&name)?;
                Some(GalleryEntry {
                    path: self.config.dir.join(&name),
                    subject,
                    sequence,
                })
            })
            .collect())
    }

    /// Samples of one subject, sorted by file name.
    pub fn list(&self, subject: SubjectId) -> Result<Vec<PathBuf>, GalleryError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.subject == subject)
            .map(|e| e.path)
            .collect())
    }

    /// Write `sample` for `subject` and return its path.
    ///
    /// The sequence number is one past the highest already used by the
    /// subject, so numbers freed by deletions below the maximum are not
    /// reused.
    pub fn save(
        &self,
        subject: SubjectId,
        sample: &FaceSample,
        fragment: Option<&str>,
    ) -> Result<PathBuf, GalleryError> {
        let existing: Vec<GalleryEntry> = self
            .entries()?
            .into_iter()
            .filter(|e| e.subject == subject)
            .collect();
        let mut sequence = existing
            .iter()
            .filter_map(|e| e.sequence)
            .max()
            .unwrap_or(0)
            .max(existing.len() as u32)
            + 1;

        let fragment = fragment.map(sanitize_component).filter(|f| !f.is_empty());
        let mut path = self.sample_path(subject, fragment.as_deref(), sequence);
        while path.exists() {
            sequence += 1;
            path = self.sample_path(subject, fragment.as_deref(), sequence);
        }

        sample.image().save(&path).map_err(|source| GalleryError::Encode {
            path: path.clone(),
            source,
        })?;
        tracing::info!(subject = %subject, path = %path.display(), "training sample saved");
        Ok(path)
    }

    /// Remove one sample. Paths outside the gallery directory, or whose name
    /// is not a gallery sample name, are refused.
    pub fn delete(&self, path: &Path) -> Result<(), GalleryError> {
        if !path.exists() {
            return Err(GalleryError::NotFound(path.to_path_buf()));
        }

        let dir = canonical(&self.config.dir)?;
        let target = canonical(path)?;
        let in_gallery = target.parent() == Some(dir.as_path())
            && target
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| self.parse_name(n))
                .is_some();
        if !in_gallery {
            return Err(GalleryError::OutsideGallery(path.to_path_buf()));
        }

        std::fs::remove_file(&target).map_err(|source| GalleryError::Io {
            path: target.clone(),
            source,
        })?;
        tracing::info!(path = %target.display(), "training sample deleted");
        Ok(())
    }

    fn sample_path(&self, subject: SubjectId, fragment: Option<&str>, sequence: u32) -> PathBuf {
        let prefix = &self.config.prefix;
        let ext = &self.config.extension;
        let name = match fragment {
            Some(f) => format!("{prefix}.{subject}.{f}.{sequence}.{ext}"),
            None => format!("{prefix}.{subject}.{sequence}.{ext}"),
        };
        self.config.dir.join(name)
    }

    fn file_names(&self) -> Result<Vec<String>, GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: self.config.dir.clone(),
            source,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.config.dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn canonical(path: &Path) -> Result<PathBuf, GalleryError> {
    path.canonicalize().map_err(|source| GalleryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
