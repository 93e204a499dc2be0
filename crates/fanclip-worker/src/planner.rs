//! Chunk planning: split `[0, duration)` into fixed-length intervals.

use std::fmt;
use std::str::FromStr;

use fanclip_models::{ChunkSpec, SourceAsset};

use crate::error::PlanError;

/// Ratios this close to an integer are treated as exact.
const SNAP_EPSILON: f64 = 1e-9;

/// Upper bound on chunks in one plan.
pub const MAX_CHUNKS: u64 = 1_000_000;

/// What to do with a trailing interval shorter than the chunk length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailPolicy {
    /// Emit the short final chunk so all footage is covered.
    #[default]
    IncludePartial,
    /// Drop the trailing partial chunk; only whole chunks are emitted.
    Truncate,
}

impl TailPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncludePartial => "include",
            Self::Truncate => "truncate",
        }
    }
}

impl fmt::Display for TailPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "include" | "include_partial" | "partial" => Ok(Self::IncludePartial),
            "truncate" => Ok(Self::Truncate),
            other => Err(format!("unknown tail policy: {other}")),
        }
    }
}

/// Plan the chunks for `source`.
///
/// Starts are `index * chunk_length`, never accumulated, so long plans do not
/// drift. Chunks are contiguous, ordered by index, and all but possibly the
/// last have exactly `chunk_length` seconds.
pub fn plan(
    source: &SourceAsset,
    chunk_length: f64,
    policy: TailPolicy,
) -> Result<Vec<ChunkSpec>, PlanError> {
    let duration = source.duration_seconds;
    if !duration.is_finite() || duration < 0.0 {
        return Err(PlanError::InvalidDuration(duration));
    }
    if !chunk_length.is_finite() || chunk_length <= 0.0 {
        return Err(PlanError::InvalidChunkLength(chunk_length));
    }

    let ratio = snap(duration / chunk_length);
    let count = match policy {
        TailPolicy::IncludePartial => ratio.ceil(),
        TailPolicy::Truncate => ratio.floor(),
    };
    if count > MAX_CHUNKS as f64 {
        return Err(PlanError::TooManyChunks {
            count: count as u64,
            limit: MAX_CHUNKS,
        });
    }
    let count = count as usize;

    let chunks = (0..count)
        .map(|index| {
            let start_seconds = index as f64 * chunk_length;
            let is_last = index + 1 == count;
            let stop_seconds = if is_last && policy == TailPolicy::IncludePartial {
                duration
            } else {
                ((index + 1) as f64 * chunk_length).min(duration)
            };
            ChunkSpec {
                index,
                start_seconds,
                stop_seconds,
                source_ref: source.reference.clone(),
            }
        })
        .collect();

    Ok(chunks)
}

fn snap(ratio: f64) -> f64 {
    let nearest = ratio.round();
    if (ratio - nearest).abs() < SNAP_EPSILON {
        nearest
    } else {
        ratio
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use fanclip_models::{clip_key, RunId};

    use super::*;

    fn source(duration: f64) -> SourceAsset {
        SourceAsset::new("runs/r/source/v.mp4", duration, "v.mp4")
    }

    fn bounds(chunks: &[ChunkSpec]) -> Vec<(f64, f64)> {
        chunks
            .iter()
            .map(|c| (c.start_seconds, c.stop_seconds))
            .collect()
    }

    #[test]
    fn test_exact_multiple() {
        let chunks = plan(&source(3.0), 1.0, TailPolicy::IncludePartial).unwrap();
        assert_eq!(bounds(&chunks), vec![(0.0, 1.0), (1.0, 2.0), (2.0, 3.0)]);
        assert_eq!(
            chunks.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(chunks.iter().all(|c| c.source_ref == "runs/r/source/v.mp4"));

        let truncated = plan(&source(3.0), 1.0, TailPolicy::Truncate).unwrap();
        assert_eq!(truncated, chunks);
    }

    #[test]
    fn test_shorter_than_one_chunk() {
        let chunks = plan(&source(0.4), 1.0, TailPolicy::IncludePartial).unwrap();
        assert_eq!(bounds(&chunks), vec![(0.0, 0.4)]);

        assert!(plan(&source(0.4), 1.0, TailPolicy::Truncate)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_partial_tail() {
        let chunks = plan(&source(2.5), 1.0, TailPolicy::IncludePartial).unwrap();
        assert_eq!(bounds(&chunks), vec![(0.0, 1.0), (1.0, 2.0), (2.0, 2.5)]);

        let chunks = plan(&source(2.5), 1.0, TailPolicy::Truncate).unwrap();
        assert_eq!(bounds(&chunks), vec![(0.0, 1.0), (1.0, 2.0)]);
    }

    #[test]
    fn test_zero_duration() {
        for policy in [TailPolicy::IncludePartial, TailPolicy::Truncate] {
            assert!(plan(&source(0.0), 1.0, policy).unwrap().is_empty());
        }
    }

    #[test]
    fn test_invalid_inputs() {
        let p = TailPolicy::default();
        assert!(matches!(
            plan(&source(-1.0), 1.0, p),
            Err(PlanError::InvalidDuration(_))
        ));
        assert!(matches!(
            plan(&source(f64::NAN), 1.0, p),
            Err(PlanError::InvalidDuration(_))
        ));
        assert!(matches!(
            plan(&source(3.0), 0.0, p),
            Err(PlanError::InvalidChunkLength(_))
        ));
        assert!(matches!(
            plan(&source(3.0), f64::INFINITY, p),
            Err(PlanError::InvalidChunkLength(_))
        ));
        assert!(matches!(
            plan(&source(1e9), 1e-3, p),
            Err(PlanError::TooManyChunks { .. })
        ));
    }

    #[test]
    fn test_float_noise_is_snapped() {
        // 0.3 / 0.1 is 2.9999999999999996 in binary floating point.
        let chunks = plan(&source(0.3), 0.1, TailPolicy::Truncate).unwrap();
        assert_eq!(chunks.len(), 3);
        let chunks = plan(&source(0.3), 0.1, TailPolicy::IncludePartial).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].stop_seconds, 0.3);
    }

    #[test]
    fn test_contiguous_and_covering_grid() {
        let durations = [0.0, 0.25, 1.0, 7.3, 59.94, 600.0, 3601.5];
        let lengths = [0.1, 0.5, 1.0, 2.5, 10.0];

        for &d in &durations {
            for &l in &lengths {
                for policy in [TailPolicy::IncludePartial, TailPolicy::Truncate] {
                    let chunks = plan(&source(d), l, policy).unwrap();
                    let again = plan(&source(d), l, policy).unwrap();
                    assert_eq!(chunks, again, "not deterministic for d={d} l={l}");

                    for (i, c) in chunks.iter().enumerate() {
                        assert_eq!(c.index, i);
                        assert!(c.stop_seconds > c.start_seconds, "empty chunk d={d} l={l}");
                        assert!(c.stop_seconds <= d + 1e-9);
                        assert!((c.start_seconds - i as f64 * l).abs() < 1e-9);
                        if i + 1 < chunks.len() {
                            assert_eq!(c.stop_seconds, chunks[i + 1].start_seconds);
                            assert!((c.duration() - l).abs() < 1e-9);
                        }
                    }

                    let ratio = d / l;
                    match policy {
                        TailPolicy::IncludePartial => {
                            if d > 0.0 {
                                assert_eq!(chunks.last().map(|c| c.stop_seconds), Some(d));
                            }
                            assert!(chunks.len() as f64 >= ratio - 1e-9);
                        }
                        TailPolicy::Truncate => {
                            assert!(chunks.len() as f64 <= ratio + 1e-9);
                            assert!(chunks.iter().all(|c| (c.duration() - l).abs() < 1e-9));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_sub_millisecond_chunks_get_distinct_keys() {
        let run = RunId::from_string("r");
        let chunks = plan(&source(0.004), 0.0004, TailPolicy::IncludePartial).unwrap();
        assert_eq!(chunks.len(), 10);

        let keys: HashSet<String> = chunks
            .iter()
            .map(|c| clip_key(&run, c.index, c.start_seconds))
            .collect();
        assert_eq!(keys.len(), chunks.len());
    }

    #[test]
    fn test_tail_policy_parse() {
        assert_eq!("include".parse::<TailPolicy>(), Ok(TailPolicy::IncludePartial));
        assert_eq!("TRUNCATE".parse::<TailPolicy>(), Ok(TailPolicy::Truncate));
        assert!("drop".parse::<TailPolicy>().is_err());
        assert_eq!(TailPolicy::default(), TailPolicy::IncludePartial);
    }
}
