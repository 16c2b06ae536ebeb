//! Application state.

use crate::services::Services;

/// Application state shared across request handlers.
pub(crate) struct AppState {
    pub(crate) services: Services,
    /// Shared secret for the triggers. None = no auth required.
    pub(crate) secret: Option<String>,
}
