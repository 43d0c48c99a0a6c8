use serde::{Deserialize, Serialize};

use super::types::ThreadRecord;

/// Deep-link prefix for the first signed-in Gmail account.
pub const DEFAULT_LINK_BASE: &str = "https://mail.google.com/mail/u/0/#inbox/";

/// Builds the deep link stored on a task as its provenance annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceBuilder {
    link_base: String,
}

impl Default for ReferenceBuilder {
    fn default() -> Self {
        Self {
            link_base: DEFAULT_LINK_BASE.to_string(),
        }
    }
}

impl ReferenceBuilder {
    pub fn new(link_base: impl Into<String>) -> Self {
        Self {
            link_base: link_base.into(),
        }
    }

    /// Links into the n-th signed-in account (`/mail/u/{n}/`).
    pub fn for_account(account: u32) -> Self {
        Self::new(format!("https://mail.google.com/mail/u/{}/#inbox/", account))
    }

    pub fn link_base(&self) -> &str {
        &self.link_base
    }

    pub fn for_message(&self, message_id: &str) -> String {
        format!("{}{}", self.link_base, message_id)
    }

    /// `None` when the thread has no first message to link to.
    pub fn for_thread(&self, thread: &ThreadRecord) -> Option<String> {
        thread
            .first_message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| self.for_message(id))
    }
}
