use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

/// Identifies one editing session (one open tab).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0.simple())
    }
}

/// Identifies one loaded image within a session. Generated on every load and
/// carried by the editor state so an export can find the original size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId(Uuid);

impl ImageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "img-{}", self.0.simple())
    }
}

/// Per-session record of original image sizes, keyed by [`ImageId`].
///
/// Handlers receive this explicitly; nothing about a session lives in
/// process-wide state.
#[derive(Debug)]
pub struct SessionContext {
    token: SessionToken,
    original_sizes: HashMap<ImageId, (u32, u32)>,
}

impl SessionContext {
    pub fn new(token: SessionToken) -> Self {
        Self {
            token,
            original_sizes: HashMap::new(),
        }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Store the original size of a freshly loaded image and return its id.
    pub fn record_original_size(&mut self, size: (u32, u32)) -> ImageId {
        let id = ImageId::new();
        self.original_sizes.insert(id, size);
        id
    }

    pub fn original_size(&self, id: ImageId) -> Option<(u32, u32)> {
        self.original_sizes.get(&id).copied()
    }

    /// Drop the record for one image (it was replaced by a new upload).
    pub fn forget(&mut self, id: ImageId) -> bool {
        self.original_sizes.remove(&id).is_some()
    }

    /// Drop every record held by this session.
    pub fn evict_all(&mut self) {
        self.original_sizes.clear();
    }

    pub fn tracked_images(&self) -> usize {
        self.original_sizes.len()
    }
}

/// Owns the contexts of all open sessions, bounded by a session limit.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionToken, SessionContext>,
    limit: usize,
}

impl SessionRegistry {
    pub fn new(limit: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Start a new session. Returns `None` when the limit is reached.
    pub fn open(&mut self) -> Option<SessionToken> {
        if self.sessions.len() >= self.limit {
            return None;
        }
        let token = SessionToken::new();
        self.sessions.insert(token, SessionContext::new(token));
        Some(token)
    }

    pub fn get(&self, token: SessionToken) -> Option<&SessionContext> {
        self.sessions.get(&token)
    }

    pub fn get_mut(&mut self, token: SessionToken) -> Option<&mut SessionContext> {
        self.sessions.get_mut(&token)
    }

    /// End a session, evicting everything it recorded.
    pub fn end(&mut self, token: SessionToken) -> bool {
        self.sessions.remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Change the limit. Already-open sessions above the new limit stay open.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.limit
    }
}
