//! Stray dialog dismissal.
//!
//! Phones leave system dialogs behind (the result of a previous USSD call, a carrier
//! notice) and a new session's first reply can land underneath one. The platform exposes a
//! [`DialogDismisser`] that can locate a button and press it; the runner uses it once before
//! dialing.

use tracing::{debug, trace};

/// Opaque reference to a pressable element found by the platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DismissHandle {
    /// Platform-assigned element id
    pub id: u64,
    /// Label of the element, as matched
    pub label: String,
}

/// What to look for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DismissCriteria {
    /// Button labels, in the order they should be tried
    pub labels: Vec<String>,
    /// Window or package names that identify a system dialog
    pub class_hints: Vec<String>,
}

impl Default for DismissCriteria {
    fn default() -> Self {
        Self {
            labels: ["OK", "Dismiss", "CLOSE", "Cancel"]
                .map(String::from)
                .to_vec(),
            class_hints: [
                "com.android.phone",
                "com.android.server.telecom",
                "com.samsung.android.incallui",
                "android.app.AlertDialog",
                "com.android.internal.app.AlertDialogActivity",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl DismissCriteria {
    /// Criteria narrowed to a single label
    pub fn for_label(&self, label: &str) -> Self {
        Self {
            labels: vec![label.to_string()],
            class_hints: self.class_hints.clone(),
        }
    }
}

/// Platform capability for finding and pressing dialog buttons
pub trait DialogDismisser: Send {
    /// Find an element matching the criteria, if one is on screen
    fn find_dismiss_target(&self, criteria: &DismissCriteria) -> Option<DismissHandle>;

    /// Press the element; returns whether the platform accepted the action
    fn activate(&mut self, handle: DismissHandle) -> bool;
}

/// Try each label of `criteria` in order and press the first match.
///
/// Returns the label that was pressed, or `None` if no dialog was found or the platform
/// refused every match.
pub fn dismiss_stray_dialog(
    dismisser: &mut dyn DialogDismisser,
    criteria: &DismissCriteria,
) -> Option<String> {
    for label in &criteria.labels {
        let Some(handle) = dismisser.find_dismiss_target(&criteria.for_label(label)) else {
            continue;
        };
        trace!("Found dismiss target {:?} (id {})", handle.label, handle.id);
        if dismisser.activate(handle) {
            debug!("Dismissed stray dialog via {:?}", label);
            return Some(label.clone());
        }
    }
    None
}
