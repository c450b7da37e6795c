//! Responder name resolution

use std::collections::HashMap;

/// Display name used when a responder cannot be resolved
pub const UNKNOWN_RESPONDER: &str = "Unknown";

/// Resolves responder identifiers to display names
pub trait ResponderDirectory: Send + Sync {
    /// Display name for `responder_id`, if known
    fn display_name(&self, responder_id: &str) -> Option<String>;

    /// Display name, falling back to [`UNKNOWN_RESPONDER`]
    fn name_or_unknown(&self, responder_id: &str) -> String {
        self.display_name(responder_id)
            .unwrap_or_else(|| UNKNOWN_RESPONDER.to_string())
    }
}

impl ResponderDirectory for HashMap<String, String> {
    fn display_name(&self, responder_id: &str) -> Option<String> {
        self.get(responder_id).cloned()
    }
}
