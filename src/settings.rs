use std::path::PathBuf;

use crate::mask::DEFAULT_THRESHOLD;

pub const DEFAULT_MAX_DISPLAY_SIZE: u32 = 1024;
pub const DEFAULT_MAX_SESSIONS: usize = 5;

/// User-tunable behaviour, persisted as `key=value` lines.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskSettings {
    /// Longest edge of the editing copy. 0 = edit at full resolution.
    pub max_display_size: u32,
    /// Paint intensity a pixel must exceed to become ROI.
    pub mask_threshold: u8,
    /// Where masks are written. `None` = OS temp directory.
    pub output_dir: Option<PathBuf>,
    /// Initial brush diameter (display pixels).
    pub brush_size: f32,
    /// Initial brush opacity, 0.0..=1.0.
    pub brush_opacity: f32,
    /// Maximum number of sessions (tabs) open at once.
    pub max_sessions: usize,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            max_display_size: DEFAULT_MAX_DISPLAY_SIZE,
            mask_threshold: DEFAULT_THRESHOLD,
            output_dir: None,
            brush_size: 15.0,
            brush_opacity: 1.0,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl MaskSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/roi-mask/roi_mask_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\roi-mask\roi_mask_settings.cfg
    /// On macOS:   ~/Library/Application Support/roi-mask/roi_mask_settings.cfg
    /// Fallback:   same directory as the executable.
    pub(crate) fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?
                .join("roi-mask");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("roi_mask_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            let config_dir = PathBuf::from(appdata).join("roi-mask");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("roi_mask_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("roi-mask");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("roi_mask_settings.cfg"));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("roi_mask_settings.cfg")))
        }
    }

    /// Directory masks are written to.
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// True when uploads are edited on a downscaled copy.
    pub fn downscales(&self) -> bool {
        self.max_display_size > 0
    }

    pub fn to_config_string(&self) -> String {
        let output_dir = self
            .output_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "max_display_size={}\n\
             mask_threshold={}\n\
             output_dir={}\n\
             brush_size={}\n\
             brush_opacity={}\n\
             max_sessions={}\n",
            self.max_display_size,
            self.mask_threshold,
            output_dir,
            self.brush_size,
            self.brush_opacity,
            self.max_sessions,
        )
    }

    /// Parse `key=value` lines. Unknown keys and malformed values are ignored.
    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "max_display_size" => {
                    if let Ok(v) = val.parse() {
                        s.max_display_size = v;
                    }
                }
                "mask_threshold" => {
                    if let Ok(v) = val.parse() {
                        s.mask_threshold = v;
                    }
                }
                "output_dir" => {
                    s.output_dir = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
                }
                "brush_size" => {
                    if let Ok(v) = val.parse::<f32>() {
                        s.brush_size = v.clamp(
                            crate::canvas::MIN_BRUSH_SIZE,
                            crate::canvas::MAX_BRUSH_SIZE,
                        );
                    }
                }
                "brush_opacity" => {
                    if let Ok(v) = val.parse::<f32>() {
                        s.brush_opacity = v.clamp(0.0, 1.0);
                    }
                }
                "max_sessions" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_sessions = v.max(1);
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = std::fs::write(&path, self.to_config_string()) {
            crate::log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::from_config_str(&content)
    }
}
