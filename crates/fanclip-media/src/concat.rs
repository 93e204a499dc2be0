//! Lossless concatenation of encoded clips.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Render an FFmpeg concat-demuxer list for `inputs`, in order.
pub fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

/// Join `inputs` into `output` with stream copy, preserving order.
///
/// All inputs must share codec parameters, which holds for clips produced
/// by the same encoder settings. The list file is written to `work_dir`.
pub async fn concat_clips(inputs: &[PathBuf], output: &Path, work_dir: &Path) -> MediaResult<()> {
    if inputs.is_empty() {
        return Err(MediaError::EmptyConcat);
    }
    for input in inputs {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.clone()));
        }
    }

    let list_path = work_dir.join("concat.txt");
    tokio::fs::write(&list_path, concat_list(inputs)).await?;

    let cmd = FfmpegCommand::new(&list_path, output)
        .concat_input()
        .codec_copy()
        .no_audio()
        .output_args(["-movflags", "+faststart"]);

    let result = FfmpegRunner::new().run(&cmd).await;
    let _ = tokio::fs::remove_file(&list_path).await;
    result?;

    info!(
        clips = inputs.len(),
        output = %output.display(),
        "Concatenated clips"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list_order() {
        let list = concat_list(&[PathBuf::from("/w/0002.mp4"), PathBuf::from("/w/0001.mp4")]);
        assert_eq!(list, "file '/w/0002.mp4'\nfile '/w/0001.mp4'\n");
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn test_concat_rejects_empty_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");

        let err = concat_clips(&[], &out, dir.path()).await.unwrap_err();
        assert!(matches!(err, MediaError::EmptyConcat));

        let missing = dir.path().join("nope.mp4");
        let err = concat_clips(&[missing], &out, dir.path()).await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
