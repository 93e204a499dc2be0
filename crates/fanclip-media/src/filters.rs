//! FFmpeg video filter definitions.

/// Pad odd frame dimensions up to the next even value.
///
/// H.264 with 4:2:0 chroma subsampling rejects odd widths and heights.
pub const FILTER_EVEN_DIMENSIONS: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";
