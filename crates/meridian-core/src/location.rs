use serde::{Deserialize, Serialize};

use crate::id::{BufferId, CalendarId};

/// A site holding buffers and hosting operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    /// Working-time calendar; non-zero values mean the site is open.
    pub available: Option<CalendarId>,
    pub(crate) buffers: Vec<BufferId>,
}

impl Location {
    pub(crate) fn new(name: String) -> Self {
        Self { name, available: None, buffers: Vec::new() }
    }

    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }
}
