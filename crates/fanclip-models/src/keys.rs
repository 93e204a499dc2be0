//! Storage key layout.
//!
//! All artifacts of one attempt live under `runs/{run_id}/`:
//!
//! ```text
//! runs/{run_id}/source/{name}                   downloaded source video
//! runs/{run_id}/clips/{NNNNNN}-{SSSS}-{mmm}.mp4 one annotated clip per chunk
//! runs/{run_id}/out.mp4                         stitched output
//! ```
//!
//! Clip keys lead with the chunk index, so every chunk owns a disjoint key
//! even when two starts round to the same millisecond.

use crate::run::RunId;

/// Prefix shared by every key of a run.
pub fn run_prefix(run_id: &RunId) -> String {
    format!("runs/{}/", run_id)
}

/// Key of the downloaded source video.
pub fn source_key(run_id: &RunId, name: &str) -> String {
    format!("runs/{}/source/{}", run_id, name)
}

/// Key of the clip produced for chunk `index` starting at `start_seconds`.
///
/// The 6-digit index keeps keys unique and in playback order; the start
/// (4-digit seconds, then milliseconds) is only there for humans.
pub fn clip_key(run_id: &RunId, index: usize, start_seconds: f64) -> String {
    let total_ms = (start_seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "runs/{}/clips/{:06}-{:04}-{:03}.mp4",
        run_id,
        index,
        total_ms / 1000,
        total_ms % 1000
    )
}

/// Key of the stitched output.
pub fn final_key(run_id: &RunId) -> String {
    format!("runs/{}/out.mp4", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_key_is_zero_padded() {
        let run = RunId::from_string("r1");
        assert_eq!(clip_key(&run, 0, 0.0), "runs/r1/clips/000000-0000-000.mp4");
        assert_eq!(clip_key(&run, 3, 3.0), "runs/r1/clips/000003-0003-000.mp4");
        assert_eq!(clip_key(&run, 25, 12.5), "runs/r1/clips/000025-0012-500.mp4");
    }

    #[test]
    fn test_fractional_starts_do_not_collide() {
        let run = RunId::from_string("r1");
        let keys: Vec<String> = (0..10).map(|i| clip_key(&run, i, i as f64 * 0.25)).collect();
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), keys.len());
        // Lexicographic order matches playback order
        assert_eq!(deduped, keys);
    }

    #[test]
    fn test_sub_millisecond_starts_do_not_collide() {
        let run = RunId::from_string("r1");
        let keys: Vec<String> = (0..10).map(|i| clip_key(&run, i, i as f64 * 0.0004)).collect();
        assert_eq!(keys[0], "runs/r1/clips/000000-0000-000.mp4");
        assert_eq!(keys[1], "runs/r1/clips/000001-0000-000.mp4");
        let mut deduped = keys.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped, keys);
    }

    #[test]
    fn test_keys_share_run_prefix() {
        let run = RunId::from_string("abc");
        let prefix = run_prefix(&run);
        assert!(source_key(&run, "video.mp4").starts_with(&prefix));
        assert!(clip_key(&run, 1, 1.0).starts_with(&prefix));
        assert!(final_key(&run).starts_with(&prefix));
    }

    #[test]
    fn test_runs_are_isolated() {
        let a = RunId::from_string("a");
        let b = RunId::from_string("b");
        assert_ne!(clip_key(&a, 1, 1.0), clip_key(&b, 1, 1.0));
    }
}
