use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageEncoder, ImageError, RgbaImage};
use rfd::FileDialog;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Extensions offered in the open dialog; anything the `image` crate decodes.
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "bmp", "tga", "ico", "tiff", "tif",
];

/// Check if a path has an extension the loader accepts.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// A decoded upload: full-resolution pixels plus where they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub image: RgbaImage,
    pub path: Option<PathBuf>,
}

impl Upload {
    pub fn new(image: RgbaImage, path: Option<PathBuf>) -> Self {
        Self { image, path }
    }
}

/// Synchronously decode any supported image into an [`Upload`].
pub fn load_upload(path: &Path) -> Result<Upload, ImageError> {
    let image = image::open(path)?.to_rgba8();
    Ok(Upload::new(image, Some(path.to_path_buf())))
}

// ============================================================================
// DISPLAY DOWNSCALING
// ============================================================================

/// Size an image of `(width, height)` is shown at when its longest edge is
/// capped to `max_edge`. `max_edge == 0` disables the cap.
pub fn display_size(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if max_edge == 0 || longest <= max_edge {
        return (width, height);
    }
    let ratio = max_edge as f64 / longest as f64;
    (
        ((width as f64 * ratio) as u32).max(1),
        ((height as f64 * ratio) as u32).max(1),
    )
}

/// Downscale for editing (Lanczos3). Returns `None` when no scaling is needed.
pub fn downscale_for_display(image: &RgbaImage, max_edge: u32) -> Option<RgbaImage> {
    let (w, h) = image.dimensions();
    let (nw, nh) = display_size(w, h, max_edge);
    if (nw, nh) == (w, h) {
        return None;
    }
    Some(imageops::resize(image, nw, nh, FilterType::Lanczos3))
}

// ============================================================================
// MASK ENCODING
// ============================================================================

/// Encode a mask as an 8-bit single-channel PNG. Returns the written size in bytes.
pub fn write_mask_png(mask: &GrayImage, path: &Path) -> Result<u64, ImageError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    PngEncoder::new(&mut writer).write_image(
        mask.as_raw(),
        mask.width(),
        mask.height(),
        image::ColorType::L8,
    )?;
    writer.flush()?;
    drop(writer);
    Ok(fs::metadata(path)?.len())
}

/// Read a written mask back for preview.
pub fn load_mask_preview(path: &Path) -> Result<GrayImage, ImageError> {
    Ok(image::open(path)?.to_luma8())
}

// ============================================================================
// FILE HANDLER
// ============================================================================

/// Native dialogs for picking uploads and saving copies of exported masks.
#[derive(Debug, Default)]
pub struct FileHandler {
    /// Directory of the last picked or saved file.
    pub last_dir: Option<PathBuf>,
}

impl FileHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show the open dialog and decode the chosen image.
    /// `None` if the user cancelled.
    pub fn pick_upload(&mut self) -> Option<Result<Upload, ImageError>> {
        let mut dialog = FileDialog::new()
            .add_filter("Images", IMAGE_EXTENSIONS)
            .add_filter("All Files", &["*"]);
        if let Some(ref dir) = self.last_dir {
            dialog = dialog.set_directory(dir);
        }
        let path = dialog.pick_file()?;
        self.last_dir = path.parent().map(Path::to_path_buf);
        Some(load_upload(&path))
    }

    /// Ask where to put a copy of `exported` and copy it there.
    /// `Ok(None)` if the user cancelled.
    pub fn save_copy_as(&mut self, exported: &Path) -> std::io::Result<Option<PathBuf>> {
        let file_name = exported
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mask.png".to_string());
        let mut dialog = FileDialog::new()
            .add_filter("PNG", &["png"])
            .set_file_name(&file_name);
        if let Some(ref dir) = self.last_dir {
            dialog = dialog.set_directory(dir);
        }
        let Some(dest) = dialog.save_file() else {
            return Ok(None);
        };
        fs::copy(exported, &dest)?;
        self.last_dir = dest.parent().map(Path::to_path_buf);
        Ok(Some(dest))
    }

    /// Pick a directory (used by the settings window for the output folder).
    pub fn pick_directory(&self) -> Option<PathBuf> {
        FileDialog::new().pick_folder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn display_size_caps_longest_edge() {
        assert_eq!(display_size(4000, 3000, 1024), (1024, 768));
        assert_eq!(display_size(3000, 4000, 1024), (768, 1024));
        // Truncation, not rounding.
        assert_eq!(display_size(2000, 1001, 1024), (1024, 512));
    }

    #[test]
    fn display_size_leaves_small_or_uncapped_images() {
        assert_eq!(display_size(800, 600, 1024), (800, 600));
        assert_eq!(display_size(1024, 10, 1024), (1024, 10));
        assert_eq!(display_size(5000, 5000, 0), (5000, 5000));
    }

    #[test]
    fn extreme_aspect_never_hits_zero() {
        assert_eq!(display_size(10_000, 2, 100), (100, 1));
    }

    #[test]
    fn downscale_returns_none_when_not_needed() {
        let img = RgbaImage::new(10, 10);
        assert!(downscale_for_display(&img, 1024).is_none());
        let big = RgbaImage::new(200, 100);
        let small = downscale_for_display(&big, 50).unwrap();
        assert_eq!(small.dimensions(), (50, 25));
    }

    #[test]
    fn mask_png_is_single_channel_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("m_mask.png");
        let mut mask = GrayImage::new(6, 4);
        mask.put_pixel(2, 1, Luma([255]));

        let bytes = write_mask_png(&mask, &path).unwrap();
        assert!(bytes > 0);

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
        assert_eq!(load_mask_preview(&path).unwrap(), mask);
    }

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_image(Path::new("a/B.JPG")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("noext")));
    }
}
