//! Artwork thumbnails and their scoped temporary files

use image::ImageFormat;
use std::io::{Cursor, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::Asset;
use crate::Result;

/// Re-encode artwork as a PNG whose longest edge is at most `max_edge`
pub fn make_thumbnail(bytes: &[u8], max_edge: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > max_edge || img.height() > max_edge {
        img.thumbnail(max_edge, max_edge)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Thumbnail bytes staged in a temporary file for upload.
///
/// The file lives exactly as long as this guard; dropping it on any path,
/// success or failure, removes the file.
#[derive(Debug)]
pub struct StagedArtwork {
    file: NamedTempFile,
}

impl StagedArtwork {
    pub fn stage(bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("syncq-artwork-")
            .suffix(".png")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        debug!(path = ?file.path(), size = bytes.len(), "Staged artwork for upload");
        Ok(Self { file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Asset reference pointing at the staged file
    #[must_use]
    pub fn asset(&self) -> Asset {
        Asset::File(self.path().to_path_buf())
    }
}

impl Drop for StagedArtwork {
    fn drop(&mut self) {
        debug!(path = ?self.file.path(), "Releasing staged artwork");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::png_bytes;

    #[test]
    fn test_thumbnail_is_bounded() {
        let thumb = make_thumbnail(&png_bytes(64, 32), 16).unwrap();
        let img = image::load_from_memory(&thumb).unwrap();
        assert_eq!((img.width(), img.height()), (16, 8));
    }

    #[test]
    fn test_small_artwork_is_not_upscaled() {
        let thumb = make_thumbnail(&png_bytes(8, 8), 16).unwrap();
        let img = image::load_from_memory(&thumb).unwrap();
        assert_eq!((img.width(), img.height()), (8, 8));
    }

    #[test]
    fn test_garbage_artwork_is_an_error() {
        assert!(make_thumbnail(b"not an image", 16).is_err());
    }

    #[test]
    fn test_staged_file_removed_on_drop() {
        let staged = StagedArtwork::stage(b"bytes").unwrap();
        let path = staged.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");
        assert_eq!(staged.asset().read().unwrap(), b"bytes");

        drop(staged);
        assert!(!path.exists());
    }
}
