use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{GrayImage, ImageError};

use crate::canvas::{EditorError, EditorState};
use crate::io::write_mask_png;
use crate::mask::{derive_mask, reconcile_resolution};

const MASK_SUFFIX: &str = "_mask";

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Image(ImageError),
    Editor(EditorError),
    /// The export panicked; carries the panic message.
    Panicked(String),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "I/O error: {}", e),
            ExportError::Image(e) => write!(f, "image error: {}", e),
            ExportError::Editor(e) => write!(f, "invalid editor state: {}", e),
            ExportError::Panicked(msg) => write!(f, "export aborted: {}", msg),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::Image(e) => Some(e),
            ExportError::Editor(e) => Some(e),
            ExportError::Panicked(_) => None,
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        ExportError::Io(e)
    }
}

impl From<ImageError> for ExportError {
    fn from(e: ImageError) -> Self {
        ExportError::Image(e)
    }
}

impl From<EditorError> for ExportError {
    fn from(e: EditorError) -> Self {
        ExportError::Editor(e)
    }
}

/// Everything one export needs.
#[derive(Debug, Clone, Copy)]
pub struct ExportRequest<'a> {
    pub editor: Option<&'a EditorState>,
    /// Size of the image the user edited on.
    pub display_size: (u32, u32),
    /// Size the written mask must have.
    pub original_size: (u32, u32),
    pub source_path: Option<&'a Path>,
    pub output_dir: &'a Path,
    pub threshold: u8,
    /// Seconds since the epoch, used for names of unnamed uploads.
    pub unix_secs: u64,
}

/// A written mask.
#[derive(Debug, Clone)]
pub struct MaskExport {
    pub path: PathBuf,
    pub mask: GrayImage,
    pub bytes: u64,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Upload names containing "tmp" come from temporary upload staging and
/// don't describe the image.
pub fn is_temporary_upload(file_name: &str) -> bool {
    file_name.to_lowercase().contains("tmp")
}

/// Stem the output file is named after.
pub fn output_base_name(source: Option<&Path>, unix_secs: u64) -> String {
    source
        .and_then(|p| {
            let name = p.file_name()?.to_str()?;
            if is_temporary_upload(name) {
                return None;
            }
            let stem = p.file_stem()?.to_str()?;
            (!stem.is_empty()).then(|| stem.to_string())
        })
        .unwrap_or_else(|| format!("image_{}", unix_secs))
}

/// First free path among `<base>_mask.png`, `<base>_mask_1.png`, ...
///
/// The existence check and the later write are separate steps, so two
/// concurrent exports with the same base can pick the same path.
pub fn allocate_output_path(dir: &Path, base: &str) -> PathBuf {
    let first = dir.join(format!("{}{}.png", base, MASK_SUFFIX));
    if !first.exists() {
        return first;
    }
    let mut counter: u32 = 1;
    loop {
        let candidate = dir.join(format!("{}{}_{}.png", base, MASK_SUFFIX, counter));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Derive the mask at edit resolution and bring it to the original size.
pub fn build_mask(req: &ExportRequest<'_>) -> Result<GrayImage, ExportError> {
    let layer = req.editor.and_then(|e| e.paint_layer()).map(|l| &l.pixels);
    let small = derive_mask(layer, req.display_size, req.threshold)?;
    crate::log_info!(
        "Mask derived at {}x{} ({})",
        small.width(),
        small.height(),
        if layer.is_some() { "from paint layer" } else { "empty" }
    );

    if small.dimensions() != req.original_size {
        crate::log_info!(
            "Upscaling mask {}x{} -> {}x{}",
            small.width(),
            small.height(),
            req.original_size.0,
            req.original_size.1
        );
    }
    Ok(reconcile_resolution(small, req.original_size))
}

/// Build the mask and write it under a fresh name in `output_dir`.
pub fn export_mask(req: &ExportRequest<'_>) -> Result<MaskExport, ExportError> {
    let mask = build_mask(req)?;

    std::fs::create_dir_all(req.output_dir)?;
    let base = output_base_name(req.source_path, req.unix_secs);
    let path = allocate_output_path(req.output_dir, &base);
    let bytes = write_mask_png(&mask, &path)?;
    crate::log_info!("Mask written: {} ({} bytes)", path.display(), bytes);

    Ok(MaskExport { path, mask, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Brush;
    use crate::mask::{is_binary, roi_pixel_count};
    use image::{Rgba, RgbaImage};

    fn request<'a>(
        editor: Option<&'a EditorState>,
        display: (u32, u32),
        original: (u32, u32),
        source: Option<&'a Path>,
        dir: &'a Path,
    ) -> ExportRequest<'a> {
        ExportRequest {
            editor,
            display_size: display,
            original_size: original,
            source_path: source,
            output_dir: dir,
            threshold: 20,
            unix_secs: 1_700_000_000,
        }
    }

    #[test]
    fn base_name_prefers_real_file_stem() {
        assert_eq!(output_base_name(Some(Path::new("/x/vessel_07.jpg")), 5), "vessel_07");
        assert_eq!(output_base_name(Some(Path::new("/tmp/gradio/TMPab12.png")), 5), "image_5");
        assert_eq!(output_base_name(Some(Path::new("/home/u/tmp_scan.png")), 5), "image_5");
        assert_eq!(output_base_name(None, 99), "image_99");
    }

    #[test]
    fn collisions_get_incrementing_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let a = allocate_output_path(dir.path(), "leaf");
        assert_eq!(a.file_name().unwrap(), "leaf_mask.png");
        std::fs::write(&a, b"x").unwrap();

        let b = allocate_output_path(dir.path(), "leaf");
        assert_eq!(b.file_name().unwrap(), "leaf_mask_1.png");
        std::fs::write(&b, b"x").unwrap();

        let c = allocate_output_path(dir.path(), "leaf");
        assert_eq!(c.file_name().unwrap(), "leaf_mask_2.png");
    }

    #[test]
    fn no_editor_exports_empty_mask_at_original_size() {
        let dir = tempfile::tempdir().unwrap();
        let out = export_mask(&request(None, (512, 384), (2048, 1536), None, dir.path())).unwrap();
        assert_eq!(out.mask.dimensions(), (2048, 1536));
        assert_eq!(roi_pixel_count(&out.mask), 0);
        assert!(out.path.exists());
        assert_eq!(out.path.file_name().unwrap(), "image_1700000000_mask.png");
    }

    #[test]
    fn painted_mask_is_binary_and_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let mut editor = EditorState::new(RgbaImage::from_pixel(64, 48, Rgba([9, 9, 9, 255])), None);
        let brush = Brush {
            size: 9.0,
            opacity: 0.6,
            ..Brush::default()
        };
        editor.stroke(&brush, (5.0, 5.0), (60.0, 40.0));

        let src = PathBuf::from("/photos/leaf.png");
        let out = export_mask(&request(
            Some(&editor),
            (64, 48),
            (640, 480),
            Some(&src),
            dir.path(),
        ))
        .unwrap();

        assert_eq!(out.mask.dimensions(), (640, 480));
        assert!(is_binary(&out.mask));
        assert!(roi_pixel_count(&out.mask) > 0);
        assert_eq!(out.path.file_name().unwrap(), "leaf_mask.png");

        let on_disk = image::open(&out.path).unwrap().to_luma8();
        assert_eq!(on_disk, out.mask);
    }

    #[test]
    fn exporting_twice_yields_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let src = PathBuf::from("leaf.png");
        let req = request(None, (8, 8), (8, 8), Some(&src), dir.path());
        let first = export_mask(&req).unwrap();
        let second = export_mask(&req).unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(second.path.file_name().unwrap(), "leaf_mask_1.png");
    }

    #[test]
    fn mismatched_editor_size_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut editor = EditorState::new(RgbaImage::new(10, 10), None);
        editor.stroke(&Brush::default(), (5.0, 5.0), (5.0, 5.0));
        let err = export_mask(&request(Some(&editor), (20, 20), (20, 20), None, dir.path()))
            .unwrap_err();
        assert!(matches!(err, ExportError::Editor(_)));
    }
}
