//! OpenCV Haar cascade face detection.
//!
//! Frames are converted to grayscale and passed through
//! `CascadeClassifier::detectMultiScale` with a 1.1 scale step and four
//! required neighbours. Classifiers are not thread-safe, so each detector keeps
//! a small pool and checks one out per frame.
//!
//! Cascade lookup works without the `opencv` feature so callers can report
//! whether a model is available before choosing a detector.

use std::path::{Path, PathBuf};

/// Frontal face cascade shipped with OpenCV.
pub const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";

/// Directories searched for [`CASCADE_FILE`], in order.
pub const CASCADE_SEARCH_DIRS: &[&str] = &[
    "./models",
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
    "/opt/homebrew/share/opencv4/haarcascades",
    "/root",
];

/// Locate a cascade file.
///
/// An explicit path wins when it exists; otherwise the well-known install
/// directories are searched.
pub fn find_cascade(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }
    CASCADE_SEARCH_DIRS
        .iter()
        .map(|dir| Path::new(dir).join(CASCADE_FILE))
        .find(|path| path.is_file())
}

#[cfg(feature = "opencv")]
pub use self::haar::HaarCascadeDetector;

#[cfg(feature = "opencv")]
mod haar {
    use std::fmt;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use image::RgbImage;
    use opencv::core::{Mat, Rect, Size, Vector};
    use opencv::objdetect::CascadeClassifier;
    use opencv::prelude::*;
    use tracing::debug;

    use crate::detection::{BoundingBox, FaceDetector};
    use crate::error::{MediaError, MediaResult};

    const SCALE_FACTOR: f64 = 1.1;
    const MIN_NEIGHBORS: i32 = 4;

    /// Haar cascade detector backed by OpenCV.
    pub struct HaarCascadeDetector {
        path: PathBuf,
        pool: Mutex<Vec<CascadeClassifier>>,
    }

    impl HaarCascadeDetector {
        /// Load the cascade at `path`. Fails if the file is missing or unusable.
        pub fn new(path: impl AsRef<Path>) -> MediaResult<Self> {
            let path = path.as_ref().to_path_buf();
            if !path.is_file() {
                return Err(MediaError::FileNotFound(path));
            }
            let classifier = load(&path)?;
            debug!(path = %path.display(), "Loaded Haar cascade");
            Ok(Self {
                path,
                pool: Mutex::new(vec![classifier]),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn checkout(&self) -> MediaResult<CascadeClassifier> {
            let pooled = self
                .pool
                .lock()
                .map_err(|_| MediaError::detection_failed("cascade pool lock poisoned"))?
                .pop();
            match pooled {
                Some(classifier) => Ok(classifier),
                None => load(&self.path),
            }
        }

        fn checkin(&self, classifier: CascadeClassifier) {
            if let Ok(mut pool) = self.pool.lock() {
                pool.push(classifier);
            }
        }
    }

    impl fmt::Debug for HaarCascadeDetector {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("HaarCascadeDetector")
                .field("path", &self.path)
                .finish()
        }
    }

    fn load(path: &Path) -> MediaResult<CascadeClassifier> {
        let name = path
            .to_str()
            .ok_or_else(|| MediaError::detection_failed("cascade path is not UTF-8"))?;
        let classifier = CascadeClassifier::new(name).map_err(cv_error)?;
        if classifier.empty().map_err(cv_error)? {
            return Err(MediaError::detection_failed(format!(
                "cascade at {} has no stages",
                path.display()
            )));
        }
        Ok(classifier)
    }

    fn cv_error(e: opencv::Error) -> MediaError {
        MediaError::detection_failed(e.to_string())
    }

    fn detect_with(
        classifier: &mut CascadeClassifier,
        frame: &RgbImage,
    ) -> MediaResult<Vec<BoundingBox>> {
        let gray = image::imageops::grayscale(frame);
        let mat = Mat::new_rows_cols_with_data(
            gray.height() as i32,
            gray.width() as i32,
            gray.as_raw().as_slice(),
        )
        .map_err(cv_error)?;

        let mut faces = Vector::<Rect>::new();
        classifier
            .detect_multi_scale(
                &*mat,
                &mut faces,
                SCALE_FACTOR,
                MIN_NEIGHBORS,
                0,
                Size::default(),
                Size::default(),
            )
            .map_err(cv_error)?;

        Ok(faces
            .iter()
            .map(|r| BoundingBox::new(r.x as f64, r.y as f64, r.width as f64, r.height as f64))
            .filter_map(|b| b.clip_to(frame.width(), frame.height()))
            .collect())
    }

    impl FaceDetector for HaarCascadeDetector {
        fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<BoundingBox>> {
            let mut classifier = self.checkout()?;
            let result = detect_with(&mut classifier, frame);
            self.checkin(classifier);
            result
        }

        fn name(&self) -> &'static str {
            "haar_cascade"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faces.xml");
        std::fs::write(&path, b"<opencv_storage/>").unwrap();
        assert_eq!(find_cascade(Some(&path)), Some(path));
    }

    #[test]
    fn test_missing_explicit_path_falls_through() {
        let missing = Path::new("/nonexistent/faces.xml");
        let found = find_cascade(Some(missing));
        assert_ne!(found.as_deref(), Some(missing));
        if let Some(path) = found {
            assert!(path.ends_with(CASCADE_FILE));
        }
    }

    #[cfg(feature = "opencv")]
    mod haar {
        use super::super::*;
        use crate::detection::FaceDetector;
        use crate::error::MediaError;
        use image::{Rgb, RgbImage};

        #[test]
        fn test_missing_cascade_is_rejected() {
            let err = HaarCascadeDetector::new("/nonexistent/faces.xml").unwrap_err();
            assert!(matches!(err, MediaError::FileNotFound(_)));
        }

        #[test]
        fn test_garbage_cascade_is_rejected() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("faces.xml");
            std::fs::write(&path, b"not a cascade").unwrap();
            assert!(HaarCascadeDetector::new(&path).is_err());
        }

        #[test]
        fn test_flat_frame_has_no_faces() {
            let Some(path) = find_cascade(None) else {
                return;
            };
            let detector = HaarCascadeDetector::new(&path).unwrap();
            let frame = RgbImage::from_pixel(160, 120, Rgb([128, 128, 128]));
            assert!(detector.detect(&frame).unwrap().is_empty());
            // Second call reuses the pooled classifier.
            assert!(detector.detect(&frame).unwrap().is_empty());
            assert_eq!(detector.name(), "haar_cascade");
        }
    }
}
