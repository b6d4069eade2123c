use std::path::PathBuf;

use eframe::egui;
use egui::{Color32, ColorImage, Key, Modifiers, Pos2, Rect, RichText, TextureHandle, TextureOptions, Vec2};
use image::GrayImage;

use crate::canvas::{Brush, Canvas, MAX_BRUSH_SIZE, MIN_BRUSH_SIZE};
use crate::form::{self, FormStage, FormState};
use crate::io::{FileHandler, Upload, is_supported_image, load_upload};
use crate::project::Project;
use crate::session::{SessionContext, SessionRegistry};
use crate::settings::MaskSettings;

const INSTRUCTIONS: &str = "\
1. Load an image (File > Open image, Ctrl+O, or drop a file on the window). \
Large images are shown downscaled; the mask is still written at full resolution.\n\
2. Paint over the region of interest with the white brush. The mouse wheel changes \
the brush size, Ctrl+wheel zooms, middle-drag pans. Brush opacity counts: very faint \
strokes fall below the mask threshold.\n\
3. Save the mask (Ctrl+S). Use \"Save copy as...\" to put the file where you need it.";

/// Everything the UI can ask for in one frame; applied after the panels are drawn.
enum UiAction {
    OpenImage,
    LoadPath(PathBuf),
    Clear,
    Save,
    Reset,
    SaveCopy,
    NewSession,
    CloseSession(usize),
    SwitchSession(usize),
    OpenSettings,
    ToggleInstructions,
    Quit,
}

/// Edit buffer for the settings window.
struct SettingsDraft {
    settings: MaskSettings,
    output_dir: String,
}

pub struct RoiMaskApp {
    // One tab per session
    projects: Vec<Project>,
    active_project_index: usize,
    untitled_counter: usize,
    registry: SessionRegistry,

    canvas: Canvas,
    file_handler: FileHandler,
    brush: Brush,

    settings: MaskSettings,
    settings_draft: Option<SettingsDraft>,
    show_instructions: bool,

    /// Texture of the active session's preview, keyed by the mask path.
    preview_texture: Option<(PathBuf, TextureHandle)>,
    /// App-level message not tied to a session (e.g. session limit).
    notice: Option<String>,
}

impl RoiMaskApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let settings = MaskSettings::load();
        crate::log_info!(
            "Settings: max_display_size={} threshold={} output_dir={}",
            settings.max_display_size,
            settings.mask_threshold,
            settings.resolved_output_dir().display()
        );

        let brush = Brush {
            size: settings.brush_size,
            opacity: settings.brush_opacity,
            ..Brush::default()
        };

        let mut app = Self {
            projects: Vec::new(),
            active_project_index: 0,
            untitled_counter: 0,
            registry: SessionRegistry::new(settings.max_sessions),
            canvas: Canvas::new(),
            file_handler: FileHandler::new(),
            brush,
            settings,
            settings_draft: None,
            show_instructions: true,
            preview_texture: None,
            notice: None,
        };
        app.new_project();
        app
    }

    /// Open a new session and switch to it
    fn new_project(&mut self) {
        let Some(token) = self.registry.open() else {
            self.notice = Some(format!(
                "At most {} sessions can be open at once.",
                self.registry.limit()
            ));
            crate::log_warn!("Session limit {} reached", self.registry.limit());
            return;
        };
        self.untitled_counter += 1;
        crate::log_info!("Opened {}", token);
        self.projects.push(Project::new_untitled(self.untitled_counter, token));
        self.active_project_index = self.projects.len() - 1;
        self.canvas.reset_zoom();
        self.preview_texture = None;
    }

    /// End a session; its size records are evicted with it.
    fn close_project(&mut self, index: usize) {
        if index >= self.projects.len() {
            return;
        }
        let project = self.projects.remove(index);
        self.registry.end(project.token);
        crate::log_info!("Closed {}", project.token);

        if self.projects.is_empty() {
            self.new_project();
        } else if self.active_project_index >= self.projects.len() {
            self.active_project_index = self.projects.len() - 1;
        } else if index < self.active_project_index {
            self.active_project_index -= 1;
        }
        self.canvas.reset_zoom();
        self.preview_texture = None;
        self.notice = None;
    }

    fn switch_to_project(&mut self, index: usize) {
        if index < self.projects.len() && index != self.active_project_index {
            self.active_project_index = index;
            self.canvas.reset_zoom();
            self.preview_texture = None;
        }
    }

    fn active_project(&self) -> Option<&Project> {
        self.projects.get(self.active_project_index)
    }

    fn load_into_active(&mut self, upload: Option<Upload>) {
        self.run_form(|session, state, settings| form::load_image(session, state, upload, settings));
        self.canvas.reset_zoom();
    }

    /// Run one form handler against the active session.
    fn run_form(
        &mut self,
        handler: impl FnOnce(&mut SessionContext, &mut FormState, &MaskSettings),
    ) {
        let Some(project) = self.projects.get_mut(self.active_project_index) else {
            return;
        };
        let Some(session) = self.registry.get_mut(project.token) else {
            crate::log_err!("No context for {}", project.token);
            return;
        };
        handler(session, &mut project.form, &self.settings);
        project.update_name_from_source();
        self.preview_texture = None;
    }

    fn handle(&mut self, ctx: &egui::Context, action: UiAction) {
        match action {
            UiAction::OpenImage => match self.file_handler.pick_upload() {
                None => {}
                Some(Ok(upload)) => self.load_into_active(Some(upload)),
                Some(Err(e)) => {
                    crate::log_err!("Failed to open image: {}", e);
                    self.load_into_active(None);
                }
            },
            UiAction::LoadPath(path) => match load_upload(&path) {
                Ok(upload) => self.load_into_active(Some(upload)),
                Err(e) => {
                    crate::log_err!("Failed to open {}: {}", path.display(), e);
                    self.load_into_active(None);
                }
            },
            UiAction::Clear => self.run_form(|_, state, _| form::clear_sketch(state)),
            UiAction::Save => {
                self.run_form(|session, state, settings| form::save_mask(session, state, settings))
            }
            UiAction::Reset => {
                self.run_form(|session, state, _| form::reset_all(session, state));
                self.canvas.reset_zoom();
            }
            UiAction::SaveCopy => {
                let Some(output) = self.active_project().and_then(|p| p.form.output.clone()) else {
                    return;
                };
                match self.file_handler.save_copy_as(&output) {
                    Ok(Some(dest)) => {
                        crate::log_info!("Copied {} to {}", output.display(), dest.display());
                        self.notice = Some(format!("Copied mask to {}", dest.display()));
                    }
                    Ok(None) => {}
                    Err(e) => {
                        crate::log_err!("Copy of {} failed: {}", output.display(), e);
                        self.notice = Some(format!("Copy failed: {}", e));
                    }
                }
            }
            UiAction::NewSession => self.new_project(),
            UiAction::CloseSession(i) => self.close_project(i),
            UiAction::SwitchSession(i) => self.switch_to_project(i),
            UiAction::OpenSettings => {
                self.settings_draft = Some(SettingsDraft {
                    output_dir: self
                        .settings
                        .output_dir
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    settings: self.settings.clone(),
                });
            }
            UiAction::ToggleInstructions => self.show_instructions = !self.show_instructions,
            UiAction::Quit => ctx.send_viewport_cmd(egui::ViewportCommand::Close),
        }
    }

    fn collect_shortcuts(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        ctx.input_mut(|i| {
            if i.consume_key(Modifiers::COMMAND, Key::O) {
                actions.push(UiAction::OpenImage);
            }
            if i.consume_key(Modifiers::COMMAND, Key::S) {
                actions.push(UiAction::Save);
            }
            if i.consume_key(Modifiers::COMMAND, Key::T) {
                actions.push(UiAction::NewSession);
            }
        });

        let dropped: Vec<PathBuf> = ctx.input(|i| {
            i.raw
                .dropped_files
                .iter()
                .filter_map(|f| f.path.clone())
                .collect()
        });
        if let Some(path) = dropped.into_iter().find(|p| is_supported_image(p)) {
            actions.push(UiAction::LoadPath(path));
        }
    }

    fn show_menu_bar(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        let has_output = self
            .active_project()
            .is_some_and(|p| p.form.output.is_some());
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("Open image...  (Ctrl+O)").clicked() {
                    actions.push(UiAction::OpenImage);
                    ui.close_menu();
                }
                if ui.button("Save mask  (Ctrl+S)").clicked() {
                    actions.push(UiAction::Save);
                    ui.close_menu();
                }
                if ui.add_enabled(has_output, egui::Button::new("Save copy as...")).clicked() {
                    actions.push(UiAction::SaveCopy);
                    ui.close_menu();
                }
                ui.separator();
                if ui
                    .add_enabled(!self.registry.is_full(), egui::Button::new("New session  (Ctrl+T)"))
                    .clicked()
                {
                    actions.push(UiAction::NewSession);
                    ui.close_menu();
                }
                if ui.button("Close session").clicked() {
                    actions.push(UiAction::CloseSession(self.active_project_index));
                    ui.close_menu();
                }
                ui.separator();
                if ui.button("Settings...").clicked() {
                    actions.push(UiAction::OpenSettings);
                    ui.close_menu();
                }
                if ui.button("Quit").clicked() {
                    actions.push(UiAction::Quit);
                    ui.close_menu();
                }
            });
            ui.menu_button("Help", |ui| {
                if ui.button("Instructions").clicked() {
                    actions.push(UiAction::ToggleInstructions);
                    ui.close_menu();
                }
            });
        });
    }

    fn show_session_tabs(&self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        egui::ScrollArea::horizontal().show(ui, |ui| {
            ui.horizontal(|ui| {
                for (i, project) in self.projects.iter().enumerate() {
                    let selected = i == self.active_project_index;
                    if ui.selectable_label(selected, project.display_title()).clicked() {
                        actions.push(UiAction::SwitchSession(i));
                    }
                    if ui.small_button("x").on_hover_text("Close session").clicked() {
                        actions.push(UiAction::CloseSession(i));
                    }
                    ui.separator();
                }
                if ui
                    .add_enabled(!self.registry.is_full(), egui::Button::new("+"))
                    .on_hover_text("New session")
                    .clicked()
                {
                    actions.push(UiAction::NewSession);
                }
            });
        });
    }

    fn show_controls(&mut self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        ui.heading("Source image");
        if ui.button(RichText::new("Load image...").strong()).clicked() {
            actions.push(UiAction::OpenImage);
        }

        ui.add_space(8.0);
        ui.label(RichText::new("Status").strong());
        if let Some(project) = self.projects.get(self.active_project_index) {
            ui.label(project.form.status.as_str());
            if let Some(ref source) = project.form.source {
                let (w, h) = source.size();
                ui.label(RichText::new(format!("Editing at {}x{}", w, h)).weak());
            }
        }
        if self.settings.downscales() {
            ui.label(
                RichText::new(format!(
                    "Images larger than {} px are edited downscaled",
                    self.settings.max_display_size
                ))
                .weak(),
            );
        }
        if let Some(ref notice) = self.notice {
            ui.colored_label(Color32::from_rgb(230, 170, 60), notice.as_str());
        }

        ui.separator();
        ui.label(RichText::new("Brush").strong());
        ui.add(egui::Slider::new(&mut self.brush.size, MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).text("Size"));
        ui.add(egui::Slider::new(&mut self.brush.opacity, 0.0..=1.0).text("Opacity"));
        ui.checkbox(&mut self.brush.eraser, "Eraser");
        ui.label(RichText::new(format!("Zoom {:.0}%", self.canvas.zoom() * 100.0)).weak());

        ui.separator();
        let stage = self
            .active_project()
            .map(|p| p.form.stage())
            .unwrap_or(FormStage::Empty);
        let has_image = stage != FormStage::Empty;
        ui.horizontal(|ui| {
            if ui.add_enabled(has_image, egui::Button::new("Clear")).clicked() {
                actions.push(UiAction::Clear);
            }
            if ui.button(RichText::new("Save mask").strong()).clicked() {
                actions.push(UiAction::Save);
            }
            if ui.button("New").on_hover_text("Reset this session").clicked() {
                actions.push(UiAction::Reset);
            }
        });
    }

    fn show_output(&mut self, ui: &mut egui::Ui, actions: &mut Vec<UiAction>) {
        ui.heading("Mask");
        let Some(project) = self.projects.get(self.active_project_index) else {
            return;
        };
        let Some(ref output) = project.form.output else {
            ui.label(RichText::new("No mask saved yet").weak());
            return;
        };
        ui.label(output.display().to_string());
        if ui.button("Save copy as...").clicked() {
            actions.push(UiAction::SaveCopy);
        }

        ui.add_space(8.0);
        ui.label(RichText::new("Preview").strong());
        let Some(ref preview) = project.form.preview else {
            ui.label(RichText::new("Preview unavailable").weak());
            return;
        };

        let stale = !matches!(self.preview_texture, Some((ref p, _)) if p == output);
        if stale {
            let tex = ui.ctx().load_texture(
                "mask_preview",
                gray_to_color_image(preview),
                TextureOptions::NEAREST,
            );
            self.preview_texture = Some((output.clone(), tex));
        }
        if let Some((_, ref tex)) = self.preview_texture {
            let (w, h) = preview.dimensions();
            let avail = ui.available_width();
            let scale = (avail / w as f32).min(1.0);
            let size = Vec2::new(w as f32 * scale, h as f32 * scale);
            let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
            ui.painter().image(
                tex.id(),
                rect,
                Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0)),
                Color32::WHITE,
            );
            ui.label(RichText::new(format!("{}x{}", w, h)).weak());
        }
    }

    fn show_settings_window(&mut self, ctx: &egui::Context) {
        let Some(ref mut draft) = self.settings_draft else {
            return;
        };
        let mut open = true;
        let mut apply = false;
        egui::Window::new("Settings")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                egui::Grid::new("settings_grid").num_columns(2).show(ui, |ui| {
                    ui.label("Max display size (0 = off)");
                    ui.add(egui::DragValue::new(&mut draft.settings.max_display_size).clamp_range(0..=16384));
                    ui.end_row();

                    ui.label("Mask threshold");
                    ui.add(egui::DragValue::new(&mut draft.settings.mask_threshold).clamp_range(0..=254));
                    ui.end_row();

                    ui.label("Output folder (empty = temp)");
                    ui.horizontal(|ui| {
                        ui.text_edit_singleline(&mut draft.output_dir);
                        if ui.button("...").clicked()
                            && let Some(dir) = self.file_handler.pick_directory()
                        {
                            draft.output_dir = dir.to_string_lossy().into_owned();
                        }
                    });
                    ui.end_row();

                    ui.label("Default brush size");
                    ui.add(
                        egui::DragValue::new(&mut draft.settings.brush_size)
                            .clamp_range(MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE),
                    );
                    ui.end_row();

                    ui.label("Default brush opacity");
                    ui.add(egui::Slider::new(&mut draft.settings.brush_opacity, 0.0..=1.0));
                    ui.end_row();

                    ui.label("Max open sessions");
                    ui.add(egui::DragValue::new(&mut draft.settings.max_sessions).clamp_range(1..=64));
                    ui.end_row();
                });
                ui.label(RichText::new("Display size applies to the next loaded image.").weak());
                if ui.button("Save").clicked() {
                    apply = true;
                }
            });

        if apply {
            let mut settings = draft.settings.clone();
            let dir = draft.output_dir.trim();
            settings.output_dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
            settings.save();
            self.registry.set_limit(settings.max_sessions);
            self.brush.size = settings.brush_size;
            self.brush.opacity = settings.brush_opacity;
            crate::log_info!("Settings saved");
            self.settings = settings;
            self.settings_draft = None;
        } else if !open {
            self.settings_draft = None;
        }
    }
}

fn gray_to_color_image(mask: &GrayImage) -> ColorImage {
    ColorImage {
        size: [mask.width() as usize, mask.height() as usize],
        pixels: mask.pixels().map(|p| Color32::from_gray(p[0])).collect(),
    }
}

impl eframe::App for RoiMaskApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // --- Dynamic window title: "roi-mask - <session>[*]" ---
        let title = match self.active_project() {
            Some(project) => format!("roi-mask - {}", project.display_title()),
            None => "roi-mask".to_string(),
        };
        ctx.send_viewport_cmd(egui::ViewportCommand::Title(title));

        let mut actions = Vec::new();
        self.collect_shortcuts(ctx, &mut actions);

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            self.show_menu_bar(ui, &mut actions);
        });
        egui::TopBottomPanel::top("session_tabs").show(ctx, |ui| {
            self.show_session_tabs(ui, &mut actions);
        });
        egui::SidePanel::left("controls")
            .resizable(false)
            .default_width(220.0)
            .show(ctx, |ui| {
                self.show_controls(ui, &mut actions);
            });
        egui::SidePanel::right("output")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                self.show_output(ui, &mut actions);
            });
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let editor = self
                    .projects
                    .get_mut(self.active_project_index)
                    .and_then(|p| p.form.editor.as_mut());
                self.canvas.show(ui, editor, &mut self.brush);
            });

        if self.show_instructions {
            let mut open = true;
            egui::Window::new("Instructions")
                .open(&mut open)
                .default_pos(Pos2::new(260.0, 80.0))
                .show(ctx, |ui| {
                    ui.label(INSTRUCTIONS);
                });
            self.show_instructions = open;
        }

        self.show_settings_window(ctx);

        for action in actions {
            self.handle(ctx, action);
        }
    }
}
