//! The annotation form: one handler per user action, each a synchronous call
//! that replaces parts of [`FormState`] and reports a status line.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use image::{GrayImage, RgbaImage};

use crate::canvas::EditorState;
use crate::export::{
    ExportError, ExportRequest, MaskExport, export_mask, is_temporary_upload, unix_now,
};
use crate::io::{Upload, downscale_for_display, load_mask_preview};
use crate::logger;
use crate::session::SessionContext;
use crate::settings::MaskSettings;

pub const STATUS_READY: &str = "Ready. Load an image to start.";
pub const STATUS_LOAD_FAILED: &str = "Error loading image";
pub const STATUS_NO_IMAGE: &str = "No image to annotate";
pub const STATUS_SKETCH_CLEARED: &str = "Sketch cleared";
pub const STATUS_LOAD_FIRST: &str = "Load an image first!";

/// The image the form is working on, at display resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    pub display: RgbaImage,
    pub path: Option<PathBuf>,
}

impl SourceImage {
    pub fn size(&self) -> (u32, u32) {
        self.display.dimensions()
    }

    /// File name for status lines; staging names say nothing about the image.
    pub fn display_name(&self) -> String {
        match self.path.as_deref().and_then(Path::file_name) {
            Some(name) if is_temporary_upload(&name.to_string_lossy()) => {
                "image (temporary file)".to_string()
            }
            Some(name) => name.to_string_lossy().into_owned(),
            None => "image".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormStage {
    Empty,
    ImageLoaded,
    SketchDrawn,
    MaskExported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    pub source: Option<SourceImage>,
    pub editor: Option<EditorState>,
    pub status: String,
    /// Last written mask file.
    pub output: Option<PathBuf>,
    /// The written mask as read back from disk.
    pub preview: Option<GrayImage>,
    /// `(surface_id, revision)` of the editor when `output` was written.
    exported_at: Option<(u64, u64)>,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            source: None,
            editor: None,
            status: STATUS_READY.to_string(),
            output: None,
            preview: None,
            exported_at: None,
        }
    }
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> FormStage {
        let current = self.editor.as_ref().map(|e| (e.surface_id(), e.revision()));
        if self.source.is_none() {
            FormStage::Empty
        } else if self.output.is_some() && self.exported_at == current {
            FormStage::MaskExported
        } else if self.editor.as_ref().is_some_and(EditorState::has_strokes) {
            FormStage::SketchDrawn
        } else {
            FormStage::ImageLoaded
        }
    }
}

/// Load an upload: record its original size, downscale it for display and
/// start a fresh editor on it.
pub fn load_image(
    ctx: &mut SessionContext,
    form: &mut FormState,
    upload: Option<Upload>,
    settings: &MaskSettings,
) {
    let scope = ctx.token();
    logger::timed("load_image", scope, || {
        // The previous upload is gone; so is the need for its size.
        if let Some(old) = form.editor.as_ref().and_then(EditorState::image_id) {
            ctx.forget(old);
        }

        let Some(upload) = upload else {
            *form = FormState {
                status: STATUS_LOAD_FAILED.to_string(),
                ..FormState::default()
            };
            return;
        };

        let original = upload.image.dimensions();
        let image_id = ctx.record_original_size(original);
        crate::log_info!(
            "Loaded image {}x{} as {} in {}",
            original.0,
            original.1,
            image_id,
            ctx.token()
        );

        let display = downscale_for_display(&upload.image, settings.max_display_size)
            .unwrap_or(upload.image);
        if display.dimensions() != original {
            crate::log_info!(
                "Downscaled for display: {}x{} -> {}x{}",
                original.0,
                original.1,
                display.width(),
                display.height()
            );
        }

        let source = SourceImage {
            display: display.clone(),
            path: upload.path,
        };
        form.status = format!(
            "Loaded {} (original {}x{})",
            source.display_name(),
            original.0,
            original.1
        );
        form.editor = Some(EditorState::new(display, Some(image_id)));
        form.source = Some(source);
        form.output = None;
        form.preview = None;
        form.exported_at = None;
    })
}

/// Drop every stroke, keeping the loaded image and its id.
pub fn clear_sketch(form: &mut FormState) {
    let scope = form
        .editor
        .as_ref()
        .and_then(EditorState::image_id)
        .map(|id| id.to_string())
        .unwrap_or_else(|| "no image".to_string());
    logger::timed("clear_sketch", scope, || {
        form.output = None;
        form.exported_at = None;
        let Some(ref source) = form.source else {
            form.editor = None;
            form.status = STATUS_NO_IMAGE.to_string();
            return;
        };
        let image_id = form.editor.as_ref().and_then(EditorState::image_id);
        form.editor = Some(EditorState::new(source.display.clone(), image_id));
        form.status = STATUS_SKETCH_CLEARED.to_string();
    })
}

/// Back to the initial empty form; the session forgets its images.
pub fn reset_all(ctx: &mut SessionContext, form: &mut FormState) {
    let scope = ctx.token();
    logger::timed("reset_all", scope, || {
        ctx.evict_all();
        *form = FormState::default();
    })
}

/// Export the mask for the current sketch and show it as the preview.
pub fn save_mask(ctx: &SessionContext, form: &mut FormState, settings: &MaskSettings) {
    logger::timed("save_mask", ctx.token(), || {
        let Some(ref source) = form.source else {
            form.output = None;
            form.exported_at = None;
            form.status = STATUS_LOAD_FIRST.to_string();
            return;
        };

        let display_size = source.size();
        let image_id = form.editor.as_ref().and_then(EditorState::image_id);
        let original_size = image_id
            .and_then(|id| ctx.original_size(id))
            .unwrap_or(display_size);
        crate::log_info!(
            "Export for {}: original {}x{}, display {}x{}",
            image_id.map(|id| id.to_string()).unwrap_or_else(|| "unknown image".into()),
            original_size.0,
            original_size.1,
            display_size.0,
            display_size.1
        );

        let output_dir = settings.resolved_output_dir();
        let req = ExportRequest {
            editor: form.editor.as_ref(),
            display_size,
            original_size,
            source_path: source.path.as_deref(),
            output_dir: &output_dir,
            threshold: settings.mask_threshold,
            unix_secs: unix_now(),
        };

        match run_export(&req) {
            Ok(export) => {
                let (w, h) = export.mask.dimensions();
                let name = export
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                form.status = format!("Mask saved as {} ({}x{})", name, w, h);
                form.preview = match load_mask_preview(&export.path) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        crate::log_warn!("Preview of {} failed: {}", export.path.display(), e);
                        None
                    }
                };
                form.output = Some(export.path);
                form.exported_at = form.editor.as_ref().map(|e| (e.surface_id(), e.revision()));
            }
            Err(e) => {
                logger::write_error_with_trace("save_mask", &e);
                form.output = None;
                form.exported_at = None;
                form.status = format!("Error: {}", e);
            }
        }
    })
}

/// Run the export, turning a panic into an [`ExportError`].
fn run_export(req: &ExportRequest<'_>) -> Result<MaskExport, ExportError> {
    match panic::catch_unwind(AssertUnwindSafe(|| export_mask(req))) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ExportError::Panicked(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Brush;
    use crate::mask::{is_binary, roi_pixel_count};
    use crate::session::SessionToken;
    use image::Rgba;

    fn settings_in(dir: &Path, max_display_size: u32) -> MaskSettings {
        MaskSettings {
            max_display_size,
            output_dir: Some(dir.to_path_buf()),
            ..MaskSettings::default()
        }
    }

    fn upload(w: u32, h: u32, name: &str) -> Upload {
        Upload::new(
            RgbaImage::from_pixel(w, h, Rgba([40, 80, 120, 255])),
            Some(PathBuf::from(name)),
        )
    }

    #[test]
    fn initial_state_is_empty() {
        let form = FormState::new();
        assert_eq!(form.stage(), FormStage::Empty);
        assert_eq!(form.status, STATUS_READY);
    }

    #[test]
    fn load_downscales_and_records_original_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(300, 200, "leaf.png")), &settings_in(dir.path(), 150));

        let editor = form.editor.as_ref().unwrap();
        assert_eq!(editor.size(), (150, 100));
        assert!(editor.layers().is_empty());
        assert_eq!(ctx.original_size(editor.image_id().unwrap()), Some((300, 200)));
        assert_eq!(form.status, "Loaded leaf.png (original 300x200)");
        assert_eq!(form.stage(), FormStage::ImageLoaded);
    }

    #[test]
    fn load_without_downscaling_keeps_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(300, 200, "leaf.png")), &settings_in(dir.path(), 0));
        assert_eq!(form.editor.as_ref().unwrap().size(), (300, 200));
    }

    #[test]
    fn missing_upload_reports_error() {
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, None, &MaskSettings::default());
        assert_eq!(form.status, STATUS_LOAD_FAILED);
        assert!(form.source.is_none() && form.editor.is_none());
    }

    #[test]
    fn failed_load_forgets_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 0);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        for _ in 0..3 {
            load_image(&mut ctx, &mut form, Some(upload(10, 10, "a.png")), &settings);
            assert_eq!(ctx.tracked_images(), 1);
            load_image(&mut ctx, &mut form, None, &settings);
            assert_eq!(form.status, STATUS_LOAD_FAILED);
        }
        assert_eq!(ctx.tracked_images(), 0);
    }

    #[test]
    fn temporary_upload_names_are_not_shown() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        let staged = upload(30, 20, "/var/folders/uploads/tmpx81k2.png");
        load_image(&mut ctx, &mut form, Some(staged), &settings_in(dir.path(), 0));
        assert_eq!(form.status, "Loaded image (temporary file) (original 30x20)");
    }

    #[test]
    fn reload_forgets_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 0);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(10, 10, "a.png")), &settings);
        let first = form.editor.as_ref().unwrap().image_id().unwrap();
        load_image(&mut ctx, &mut form, Some(upload(12, 12, "b.png")), &settings);
        assert_eq!(ctx.original_size(first), None);
        assert_eq!(ctx.tracked_images(), 1);
    }

    #[test]
    fn clear_keeps_background_and_id_but_drops_layers() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(40, 30, "a.png")), &settings_in(dir.path(), 0));
        let id = form.editor.as_ref().unwrap().image_id();
        form.editor.as_mut().unwrap().stroke(&Brush::default(), (5.0, 5.0), (30.0, 20.0));
        assert_eq!(form.stage(), FormStage::SketchDrawn);

        clear_sketch(&mut form);
        let editor = form.editor.as_ref().unwrap();
        assert!(editor.layers().is_empty());
        assert_eq!(editor.image_id(), id);
        assert_eq!(editor.background(), &form.source.as_ref().unwrap().display);
        assert_eq!(editor.composite(), editor.background());
        assert_eq!(form.status, STATUS_SKETCH_CLEARED);
        assert_eq!(form.stage(), FormStage::ImageLoaded);
    }

    #[test]
    fn clear_without_image_reports_status() {
        let mut form = FormState::new();
        clear_sketch(&mut form);
        assert_eq!(form.status, STATUS_NO_IMAGE);
        assert!(form.editor.is_none());
    }

    #[test]
    fn reset_returns_to_initial_state_and_evicts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 64);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(128, 128, "a.png")), &settings);
        form.editor.as_mut().unwrap().stroke(&Brush::default(), (5.0, 5.0), (30.0, 20.0));
        save_mask(&ctx, &mut form, &settings);
        assert_eq!(form.stage(), FormStage::MaskExported);

        reset_all(&mut ctx, &mut form);
        assert_eq!(form, FormState::new());
        assert_eq!(ctx.tracked_images(), 0);
    }

    #[test]
    fn save_without_image_reports_status() {
        let ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        save_mask(&ctx, &mut form, &MaskSettings::default());
        assert_eq!(form.status, STATUS_LOAD_FIRST);
        assert!(form.output.is_none());
    }

    #[test]
    fn save_without_strokes_writes_empty_mask_at_original_size() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 100);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(400, 250, "plate.jpg")), &settings);
        save_mask(&ctx, &mut form, &settings);

        let preview = form.preview.as_ref().unwrap();
        assert_eq!(preview.dimensions(), (400, 250));
        assert_eq!(roi_pixel_count(preview), 0);
        assert_eq!(form.status, "Mask saved as plate_mask.png (400x250)");
        assert_eq!(form.output.as_ref().unwrap(), &dir.path().join("plate_mask.png"));
    }

    #[test]
    fn save_on_downscaled_sketch_restores_original_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 100);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(1000, 500, "plate.jpg")), &settings);
        assert_eq!(form.editor.as_ref().unwrap().size(), (100, 50));
        form.editor.as_mut().unwrap().stroke(&Brush::default(), (10.0, 25.0), (90.0, 25.0));

        save_mask(&ctx, &mut form, &settings);
        let preview = form.preview.as_ref().unwrap();
        assert_eq!(preview.dimensions(), (1000, 500));
        assert!(is_binary(preview));
        assert_eq!(preview.get_pixel(500, 255)[0], 255);
        assert_eq!(preview.get_pixel(500, 5)[0], 0);
    }

    #[test]
    fn saving_twice_gives_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 0);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(20, 20, "leaf.png")), &settings);
        save_mask(&ctx, &mut form, &settings);
        let first = form.output.clone().unwrap();
        save_mask(&ctx, &mut form, &settings);
        let second = form.output.clone().unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn painting_after_save_counts_as_new_sketch() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 0);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(40, 40, "leaf.png")), &settings);
        save_mask(&ctx, &mut form, &settings);
        assert_eq!(form.stage(), FormStage::MaskExported);

        form.editor.as_mut().unwrap().stroke(&Brush::default(), (5.0, 5.0), (30.0, 30.0));
        assert_eq!(form.stage(), FormStage::SketchDrawn);

        save_mask(&ctx, &mut form, &settings);
        assert_eq!(form.stage(), FormStage::MaskExported);
    }

    #[test]
    fn unknown_image_id_falls_back_to_display_size() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), 50);
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(200, 100, "x.png")), &settings);
        ctx.evict_all();
        save_mask(&ctx, &mut form, &settings);
        assert_eq!(form.preview.as_ref().unwrap().dimensions(), (50, 25));
    }

    #[test]
    fn write_failure_becomes_status_message() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be.
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();
        let settings = MaskSettings {
            output_dir: Some(blocker),
            ..MaskSettings::default()
        };
        let mut ctx = SessionContext::new(SessionToken::new());
        let mut form = FormState::new();
        load_image(&mut ctx, &mut form, Some(upload(8, 8, "a.png")), &settings);
        save_mask(&ctx, &mut form, &settings);
        assert!(form.status.starts_with("Error: "), "{}", form.status);
        assert!(form.output.is_none());
    }
}
