use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use eframe::egui;
use egui::{
    Align2, Color32, ColorImage, FontId, PointerButton, Pos2, Rect, Sense, Stroke, TextureHandle,
    TextureOptions, Vec2,
};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::session::ImageId;

pub const MIN_BRUSH_SIZE: f32 = 1.0;
pub const MAX_BRUSH_SIZE: f32 = 300.0;
/// Brush diameter change per scroll point.
const BRUSH_SCROLL_STEP: f32 = 0.1;
const MIN_ZOOM: f32 = 0.05;
const MAX_ZOOM: f32 = 32.0;

/// Every surface gets a unique id so the view can tell a rebuilt surface
/// apart from an edited one.
static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Pixel rectangle `(x0, y0, x1, y1)`, max-exclusive.
pub type DirtyRect = (u32, u32, u32, u32);

fn union_rect(a: Option<DirtyRect>, b: DirtyRect) -> DirtyRect {
    match a {
        Some(a) => (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3)),
        None => b,
    }
}

// ============================================================================
// EDITOR STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorError {
    /// A paint layer's size differs from the background.
    LayerSize {
        index: usize,
        expected: (u32, u32),
        found: (u32, u32),
    },
    /// The flattened composite's size differs from the background.
    CompositeSize { expected: (u32, u32), found: (u32, u32) },
    EmptyBackground,
}

impl fmt::Display for EditorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditorError::LayerSize { index, expected, found } => write!(
                f,
                "paint layer {} is {}x{}, expected {}x{}",
                index, found.0, found.1, expected.0, expected.1
            ),
            EditorError::CompositeSize { expected, found } => write!(
                f,
                "composite is {}x{}, expected {}x{}",
                found.0, found.1, expected.0, expected.1
            ),
            EditorError::EmptyBackground => write!(f, "background image has no pixels"),
        }
    }
}

impl std::error::Error for EditorError {}

/// A transparent overlay the user paints on.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintLayer {
    pub name: String,
    pub pixels: RgbaImage,
}

impl PaintLayer {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            pixels: RgbaImage::new(width, height),
        }
    }

    /// True if any pixel carries paint.
    pub fn has_paint(&self) -> bool {
        self.pixels.pixels().any(|p| p[3] != 0)
    }
}

/// The drawing surface: background, paint layers, their flattened composite
/// and the id of the loaded image.
///
/// All layers and the composite always match the background's size.
#[derive(Debug, Clone)]
pub struct EditorState {
    background: RgbaImage,
    layers: Vec<PaintLayer>,
    composite: RgbaImage,
    image_id: Option<ImageId>,
    surface_id: u64,
    revision: u64,
    dirty: Option<DirtyRect>,
}

impl PartialEq for EditorState {
    fn eq(&self, other: &Self) -> bool {
        self.background == other.background
            && self.layers == other.layers
            && self.composite == other.composite
            && self.image_id == other.image_id
    }
}

impl EditorState {
    /// A fresh surface with no paint layers; the composite is the background.
    pub fn new(background: RgbaImage, image_id: Option<ImageId>) -> Self {
        let composite = background.clone();
        Self {
            background,
            layers: Vec::new(),
            composite,
            image_id,
            surface_id: NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed),
            revision: 0,
            dirty: None,
        }
    }

    /// Assemble a surface from externally supplied parts, checking sizes.
    pub fn from_parts(
        background: RgbaImage,
        layers: Vec<PaintLayer>,
        composite: Option<RgbaImage>,
        image_id: Option<ImageId>,
    ) -> Result<Self, EditorError> {
        let expected = background.dimensions();
        if expected.0 == 0 || expected.1 == 0 {
            return Err(EditorError::EmptyBackground);
        }
        for (index, layer) in layers.iter().enumerate() {
            let found = layer.pixels.dimensions();
            if found != expected {
                return Err(EditorError::LayerSize { index, expected, found });
            }
        }
        if let Some(ref c) = composite
            && c.dimensions() != expected
        {
            return Err(EditorError::CompositeSize {
                expected,
                found: c.dimensions(),
            });
        }

        let mut state = Self::new(background, image_id);
        state.layers = layers;
        match composite {
            Some(c) => state.composite = c,
            None => state.recomposite(),
        }
        Ok(state)
    }

    pub fn background(&self) -> &RgbaImage {
        &self.background
    }

    pub fn layers(&self) -> &[PaintLayer] {
        &self.layers
    }

    /// The layer masks are derived from.
    pub fn paint_layer(&self) -> Option<&PaintLayer> {
        self.layers.first()
    }

    pub fn composite(&self) -> &RgbaImage {
        &self.composite
    }

    pub fn image_id(&self) -> Option<ImageId> {
        self.image_id
    }

    pub fn size(&self) -> (u32, u32) {
        self.background.dimensions()
    }

    pub fn surface_id(&self) -> u64 {
        self.surface_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_strokes(&self) -> bool {
        self.layers.iter().any(PaintLayer::has_paint)
    }

    /// Returns and clears the region changed since the last call.
    pub fn take_dirty(&mut self) -> Option<DirtyRect> {
        self.dirty.take()
    }

    /// The paint layer, created on first use.
    fn paint_layer_mut(&mut self) -> &mut PaintLayer {
        if self.layers.is_empty() {
            let (w, h) = self.size();
            self.layers.push(PaintLayer::new("Sketch", w, h));
        }
        &mut self.layers[0]
    }

    /// Paint (or erase) a brush segment in canvas pixel coordinates.
    /// Returns `true` if any pixel was touched.
    pub fn stroke(&mut self, brush: &Brush, from: (f32, f32), to: (f32, f32)) -> bool {
        let layer = self.paint_layer_mut();
        let Some(rect) = brush.line(&mut layer.pixels, from, to) else {
            return false;
        };
        self.recomposite_region(rect);
        self.dirty = Some(union_rect(self.dirty, rect));
        self.revision += 1;
        true
    }

    /// Rebuild the full composite from background and layers.
    pub fn recomposite(&mut self) {
        let (w, h) = self.size();
        self.recomposite_region((0, 0, w, h));
        self.dirty = Some((0, 0, w, h));
        self.revision += 1;
    }

    fn recomposite_region(&mut self, rect: DirtyRect) {
        let (x0, y0, x1, y1) = rect;
        let stride = self.background.width() as usize * 4;
        let Self {
            background,
            layers,
            composite,
            ..
        } = self;
        let bg: &[u8] = background.as_raw();
        let layer_raws: Vec<&[u8]> = layers.iter().map(|l| l.pixels.as_raw().as_slice()).collect();
        let buf: &mut [u8] = &mut **composite;

        buf[y0 as usize * stride..y1 as usize * stride]
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(i, row)| {
                let row_start = (y0 as usize + i) * stride;
                for x in x0 as usize..x1 as usize {
                    let o = x * 4;
                    let mut px = [
                        bg[row_start + o],
                        bg[row_start + o + 1],
                        bg[row_start + o + 2],
                        bg[row_start + o + 3],
                    ];
                    for raw in &layer_raws {
                        let src = [
                            raw[row_start + o],
                            raw[row_start + o + 1],
                            raw[row_start + o + 2],
                            raw[row_start + o + 3],
                        ];
                        px = blend_over(px, src);
                    }
                    row[o..o + 4].copy_from_slice(&px);
                }
            });
    }
}

/// Packed RGBA bytes of `rect`, row by row. Offsets stay in `usize`; `u32`
/// overflows past ~1 gigapixel.
fn copy_region(image: &RgbaImage, rect: DirtyRect) -> Vec<u8> {
    let (x0, y0, x1, y1) = rect;
    let row_bytes = (x1 - x0) as usize * 4;
    let stride = image.width() as usize * 4;
    let raw = image.as_raw();
    let mut region = Vec::with_capacity(row_bytes * (y1 - y0) as usize);
    for y in y0 as usize..y1 as usize {
        let start = y * stride + x0 as usize * 4;
        region.extend_from_slice(&raw[start..start + row_bytes]);
    }
    region
}

/// Standard source-over blend of unpremultiplied RGBA.
fn blend_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 {
        return src;
    }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let oa = sa + da * (1.0 - sa);
    if oa <= 0.0 {
        return [0, 0, 0, 0];
    }
    let mix = |s: u8, d: u8| -> u8 {
        ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / oa)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    [
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (oa * 255.0).round() as u8,
    ]
}

// ============================================================================
// BRUSH
// ============================================================================

/// Round brush with anti-aliased edge. Within one layer, paint keeps the
/// strongest alpha ever applied to a pixel, so overlapping dabs don't build up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Brush {
    /// Diameter in canvas pixels.
    pub size: f32,
    /// 0.0..=1.0
    pub opacity: f32,
    pub color: Rgba<u8>,
    pub eraser: bool,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            size: 15.0,
            opacity: 1.0,
            color: Rgba([255, 255, 255, 255]),
            eraser: false,
        }
    }
}

impl Brush {
    /// Stamp one dab centred at `center`. Returns the touched rect, if any.
    pub fn dab(&self, pixels: &mut RgbaImage, center: (f32, f32)) -> Option<DirtyRect> {
        let (w, h) = pixels.dimensions();
        let radius = (self.size / 2.0).max(0.5);
        let (cx, cy) = center;

        let x0 = (cx - radius - 1.0).floor().max(0.0) as u32;
        let y0 = (cy - radius - 1.0).floor().max(0.0) as u32;
        let x1 = ((cx + radius + 1.0).ceil().max(0.0) as u32).min(w);
        let y1 = ((cy + radius + 1.0).ceil().max(0.0) as u32).min(h);
        if x0 >= x1 || y0 >= y1 {
            return None;
        }

        let strength = self.opacity.clamp(0.0, 1.0);
        let mut touched = false;
        for y in y0..y1 {
            for x in x0..x1 {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let dist = (dx * dx + dy * dy).sqrt();
                let coverage = (radius - dist + 0.5).clamp(0.0, 1.0);
                if coverage <= 0.0 {
                    continue;
                }
                let alpha = (coverage * strength * 255.0).round() as u8;
                if alpha == 0 {
                    continue;
                }
                let px = pixels.get_pixel_mut(x, y);
                if self.eraser {
                    px[3] = px[3].saturating_sub(alpha);
                    if px[3] == 0 {
                        *px = Rgba([0, 0, 0, 0]);
                    }
                } else if alpha >= px[3] {
                    *px = Rgba([self.color[0], self.color[1], self.color[2], alpha]);
                }
                touched = true;
            }
        }

        touched.then_some((x0, y0, x1, y1))
    }

    /// Stamp dabs densely along a segment.
    pub fn line(
        &self,
        pixels: &mut RgbaImage,
        start: (f32, f32),
        end: (f32, f32),
    ) -> Option<DirtyRect> {
        let dx = end.0 - start.0;
        let dy = end.1 - start.1;
        let distance = (dx * dx + dy * dy).sqrt();

        if distance < 0.1 {
            return self.dab(pixels, start);
        }

        let steps = distance.ceil() as usize;
        let mut bounds: Option<DirtyRect> = None;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            if let Some(r) = self.dab(pixels, (start.0 + dx * t, start.1 + dy * t)) {
                bounds = Some(union_rect(bounds, r));
            }
        }
        bounds
    }
}

// ============================================================================
// CANVAS VIEW
// ============================================================================

/// On-screen view of an [`EditorState`]: zoom, pan, texture upload and
/// pointer handling.
pub struct Canvas {
    zoom: f32,
    pan_offset: Vec2,
    needs_fit: bool,
    texture: Option<TextureHandle>,
    /// `(surface_id, revision)` of the pixels currently in `texture`.
    uploaded: Option<(u64, u64)>,
    last_paint_pos: Option<(f32, f32)>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self {
            zoom: 1.0,
            pan_offset: Vec2::ZERO,
            needs_fit: true,
            texture: None,
            uploaded: None,
            last_paint_pos: None,
        }
    }

    /// Fit the next shown surface to the view.
    pub fn reset_zoom(&mut self) {
        self.needs_fit = true;
        self.pan_offset = Vec2::ZERO;
        self.last_paint_pos = None;
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    fn image_rect(&self, canvas_rect: Rect, width: u32, height: u32) -> Rect {
        let size = Vec2::new(width as f32 * self.zoom, height as f32 * self.zoom);
        let temp = Rect::from_center_size(canvas_rect.center() + self.pan_offset, size);
        // Round to pixel boundaries to prevent sub-pixel rendering gaps
        Rect::from_min_size(
            Pos2::new(temp.min.x.round(), temp.min.y.round()),
            size,
        )
    }

    /// Screen position to sub-pixel canvas coordinates (may lie outside the image).
    fn screen_to_canvas_f32(&self, screen_pos: Pos2, image_rect: Rect) -> (f32, f32) {
        (
            (screen_pos.x - image_rect.min.x) / self.zoom,
            (screen_pos.y - image_rect.min.y) / self.zoom,
        )
    }

    fn sync_texture(&mut self, ctx: &egui::Context, editor: &mut EditorState) {
        let key = (editor.surface_id(), editor.revision());
        if self.uploaded == Some(key) && self.texture.is_some() {
            return;
        }

        let same_surface = matches!(self.uploaded, Some((sid, _)) if sid == key.0);
        let dirty = editor.take_dirty();
        let partial = if same_surface { dirty } else { None };
        self.uploaded = Some(key);

        let composite = editor.composite();
        if let (Some((x0, y0, x1, y1)), Some(tex)) = (partial, self.texture.as_mut()) {
            let region = copy_region(composite, (x0, y0, x1, y1));
            let size = [(x1 - x0) as usize, (y1 - y0) as usize];
            let patch = ColorImage::from_rgba_unmultiplied(size, &region);
            tex.set_partial([x0 as usize, y0 as usize], patch, TextureOptions::LINEAR);
            return;
        }

        let image = ColorImage::from_rgba_unmultiplied(
            [composite.width() as usize, composite.height() as usize],
            composite.as_raw(),
        );
        match self.texture {
            Some(ref mut tex) => tex.set(image, TextureOptions::LINEAR),
            None => {
                self.texture =
                    Some(ctx.load_texture("editor_composite", image, TextureOptions::LINEAR))
            }
        }
    }

    /// Draw the surface and route pointer input to it. Returns `true` if the
    /// user painted this frame.
    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        editor: Option<&mut EditorState>,
        brush: &mut Brush,
    ) -> bool {
        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, Color32::from_gray(38));

        let Some(editor) = editor else {
            painter.text(
                canvas_rect.center(),
                Align2::CENTER_CENTER,
                "Load an image to start annotating",
                FontId::proportional(16.0),
                Color32::GRAY,
            );
            self.uploaded = None;
            return false;
        };

        let (w, h) = editor.size();
        if self.needs_fit {
            let fit = (canvas_rect.width() / w as f32).min(canvas_rect.height() / h as f32);
            self.zoom = fit.clamp(MIN_ZOOM, 1.0);
            self.needs_fit = false;
        }

        if response.hovered() {
            let (zoom_delta, scroll) = ui.input(|i| (i.zoom_delta(), i.scroll_delta));
            if zoom_delta != 1.0 {
                self.zoom = (self.zoom * zoom_delta).clamp(MIN_ZOOM, MAX_ZOOM);
            } else if scroll.y != 0.0 {
                brush.size =
                    (brush.size + scroll.y * BRUSH_SCROLL_STEP).clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
            }
        }

        if response.dragged_by(PointerButton::Middle) {
            self.pan_offset += response.drag_delta();
        }

        let image_rect = self.image_rect(canvas_rect, w, h);
        let mut painted = false;

        if response.dragged_by(PointerButton::Primary) || response.clicked_by(PointerButton::Primary)
        {
            if let Some(pos) = response.interact_pointer_pos() {
                let p = self.screen_to_canvas_f32(pos, image_rect);
                let from = self.last_paint_pos.unwrap_or(p);
                painted = editor.stroke(brush, from, p);
                self.last_paint_pos = Some(p);
            }
        }
        if !ui.input(|i| i.pointer.primary_down()) {
            self.last_paint_pos = None;
        }

        self.sync_texture(ui.ctx(), editor);
        if let Some(ref tex) = self.texture {
            painter.image(
                tex.id(),
                image_rect,
                Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                Color32::WHITE,
            );
        }

        if let Some(hover) = response.hover_pos() {
            let r = brush.size * 0.5 * self.zoom;
            painter.circle_stroke(hover, r + 1.0, Stroke::new(1.0, Color32::from_black_alpha(160)));
            painter.circle_stroke(hover, r, Stroke::new(1.0, Color32::from_white_alpha(220)));
        }

        painted
    }
}
