//! Shared data models for the fanclip pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Pipeline runs and their stages
//! - Source assets, chunk specs and chunk results
//! - Encoding configuration
//! - Storage key layout for run-scoped artifacts

pub mod chunk;
pub mod encoding;
pub mod keys;
pub mod run;
pub mod source;
pub mod stage;

pub use chunk::{ChunkResult, ChunkSpec};
pub use encoding::EncodingConfig;
pub use keys::{clip_key, final_key, run_prefix, source_key};
pub use run::RunId;
pub use source::{FinalArtifact, SourceAsset};
pub use stage::{PipelineStage, StageTransitionError};
