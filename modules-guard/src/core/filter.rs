/*!
Decides which deletion events trigger a restore
*/

use std::path::Path;

use crate::core::monitor::DeletionEvent;

/// Plain, case-sensitive suffix match on the deleted path.
///
/// `modules.php` also matches `oldmodules.php`; there is only ever one target
/// in the watched directory so a glob would buy nothing.
#[derive(Debug, Clone)]
pub struct EventFilter {
    suffix: String,
}

impl EventFilter {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn matches(&self, event: &DeletionEvent) -> bool {
        self.matches_path(&event.path)
    }

    pub fn matches_path(&self, path: &Path) -> bool {
        path.to_string_lossy().ends_with(self.suffix.as_str())
    }
}
