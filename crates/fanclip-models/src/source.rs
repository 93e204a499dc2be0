//! Source and final artifacts.

use serde::{Deserialize, Serialize};

/// A downloaded source video placed in shared storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    /// Storage key of the source video
    pub reference: String,
    /// Duration in seconds
    pub duration_seconds: f64,
    /// Basename of the downloaded file, used to name the final output
    pub name: String,
}

impl SourceAsset {
    pub fn new(reference: impl Into<String>, duration_seconds: f64, name: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            duration_seconds,
            name: name.into(),
        }
    }
}

/// The stitched output of one pipeline run.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalArtifact {
    /// Storage key the output was written to
    pub reference: String,
    /// Full file contents
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl FinalArtifact {
    pub fn new(reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            reference: reference.into(),
            bytes,
        }
    }

    /// Size of the artifact in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for FinalArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalArtifact")
            .field("reference", &self.reference)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
