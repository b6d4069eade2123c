use crate::form::{FormStage, FormState};
use crate::session::SessionToken;

/// One open tab: a session token plus the form it drives.
pub struct Project {
    pub token: SessionToken,
    pub form: FormState,

    /// Display name (derived from the loaded file or "Session-X")
    pub name: String,
    untitled_name: String,
}

impl Project {
    pub fn new_untitled(untitled_counter: usize, token: SessionToken) -> Self {
        let name = format!("Session-{}", untitled_counter);
        Self {
            token,
            form: FormState::new(),
            name: name.clone(),
            untitled_name: name,
        }
    }

    /// Unsaved strokes exist.
    pub fn is_dirty(&self) -> bool {
        self.form.stage() == FormStage::SketchDrawn
    }

    /// Refresh the name after the form's source changed.
    pub fn update_name_from_source(&mut self) {
        self.name = match self.form.source {
            Some(ref source) if source.path.is_some() => source.display_name(),
            _ => self.untitled_name.clone(),
        };
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }
}
