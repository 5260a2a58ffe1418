//! Saved-session documents. A document is a JSON file with a small
//! header (format version and capture rate) and a body holding the
//! measure registry state and the captured frame snapshots.
//!
//! Loading unions the stored registry with the current one, so files
//! written before a measure existed pick it up default-enabled, and
//! entries for measures this build no longer knows are dropped.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{FaceError, Result};
use crate::measures::{all_measures, Measure};
use crate::types::FrameSnapshot;

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentHeader {
    version: u32,
    fps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentBody {
    measures: Vec<serde_json::Value>,
    frames: Vec<FrameSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentFile {
    header: DocumentHeader,
    body: DocumentBody,
}

/// An analysis session at rest.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub fps: f64,
    pub measures: Vec<Measure>,
    pub frames: Vec<FrameSnapshot>,
}

impl Document {
    pub fn new(fps: f64, measures: Vec<Measure>, frames: Vec<FrameSnapshot>) -> Self {
        Self {
            fps,
            measures,
            frames,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let measures = self
            .measures
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let file = DocumentFile {
            header: DocumentHeader {
                version: DOCUMENT_VERSION,
                fps: self.fps,
            },
            body: DocumentBody {
                measures,
                frames: self.frames.clone(),
            },
        };
        let raw = serde_json::to_vec(&file)?;
        fs::write(path, raw)?;
        info!(path = %path.display(), frames = self.frames.len(), "saved document");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Document> {
        let raw = fs::read(path)?;
        let file: DocumentFile = serde_json::from_slice(&raw)
            .map_err(|_| FaceError::InvalidDocument(path.display().to_string()))?;

        // Entries with ids this build does not know are dropped rather
        // than failing the whole load.
        let mut measures: Vec<Measure> = Vec::new();
        for value in file.body.measures {
            match serde_json::from_value::<Measure>(value) {
                Ok(measure) => measures.push(measure),
                Err(e) => warn!(error = %e, "skipping unrecognized measure entry"),
            }
        }
        add_missing_measures(&mut measures);

        info!(path = %path.display(), frames = file.body.frames.len(), "loaded document");
        Ok(Document {
            fps: file.header.fps,
            measures,
            frames: file.body.frames,
        })
    }
}

/// Appends any registry measure the stored list lacks, default-enabled.
fn add_missing_measures(measures: &mut Vec<Measure>) {
    for candidate in all_measures() {
        if !measures.iter().any(|m| m.kind == candidate.kind) {
            measures.push(candidate);
        }
    }
}
