//! Switches group managers behind one user-facing toggle.
//!
//! A [`RepresentationSwitch`] owns a set of managers that are either
//! mutually exclusive (one active at a time, e.g. slice vs. contour view of
//! the same data) or co-toggled (all shown and hidden together). It also
//! carries the settings persistence contract: the embedding application
//! stores the opaque key/value pairs from [`save_settings`] and feeds them
//! back through [`restore_settings`] on the next start.
//!
//! [`save_settings`]: RepresentationSwitch::save_settings
//! [`restore_settings`]: RepresentationSwitch::restore_settings

use tracing::debug;

use crate::clock::{Frame, TimeStamp};
use crate::error::SettingsError;

use super::manager::{DisplaySink, RepresentationManager};

/// How the grouped managers relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// At most one manager visible at a time.
    Exclusive,
    /// All managers shown and hidden together.
    CoToggled,
}

/// A toggleable group of managers driving one display slot.
pub struct RepresentationSwitch {
    name: String,
    managers: Vec<RepresentationManager>,
    mode: GroupMode,
    enabled: bool,
    /// Index of the active manager in exclusive mode; ignored when
    /// co-toggled.
    active: usize,
}

impl RepresentationSwitch {
    /// Create a disabled switch. In exclusive mode the first manager is the
    /// initially active one.
    pub fn new(
        name: impl Into<String>,
        managers: Vec<RepresentationManager>,
        mode: GroupMode,
    ) -> Self {
        Self {
            name: name.into(),
            managers,
            mode,
            enabled: false,
            active: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mode(&self) -> GroupMode {
        self.mode
    }

    /// Index of the active manager (exclusive mode).
    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn managers(&self) -> &[RepresentationManager] {
        &self.managers
    }

    // -------------------------------------------------------------------------
    // Toggling
    // -------------------------------------------------------------------------

    /// Enable or disable the whole group. Disabling hides every visible
    /// manager and flushes its actors from the sink.
    pub fn set_enabled(&mut self, enabled: bool, frame: &Frame, sink: &mut dyn DisplaySink) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        debug!(switch = %self.name, enabled, time = %frame.time, "switch toggled");

        match (enabled, self.mode) {
            (true, GroupMode::Exclusive) => {
                if let Some(manager) = self.managers.get_mut(self.active) {
                    manager.show(frame);
                }
            }
            (true, GroupMode::CoToggled) => {
                for manager in &mut self.managers {
                    manager.show(frame);
                }
            }
            (false, _) => {
                for manager in &mut self.managers {
                    manager.hide(frame, sink);
                }
            }
        }
    }

    /// Make the manager at `index` the active one (exclusive mode). The
    /// previous manager is hidden and flushed before the new one shows, so
    /// two managers never drive the display slot at once.
    pub fn activate(
        &mut self,
        index: usize,
        frame: &Frame,
        sink: &mut dyn DisplaySink,
    ) -> Result<(), SettingsError> {
        if index >= self.managers.len() {
            return Err(SettingsError::UnknownKey(format!(
                "no manager at index {index}"
            )));
        }
        if index == self.active {
            return Ok(());
        }

        if self.enabled && self.mode == GroupMode::Exclusive {
            self.managers[self.active].hide(frame, sink);
            self.managers[index].show(frame);
        }
        self.active = index;
        debug!(switch = %self.name, active = index, "active manager changed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Forwarding
    // -------------------------------------------------------------------------

    /// Forward a view change to the managers; each applies its own change
    /// acceptance.
    pub fn frame_changed(&mut self, frame: &Frame) {
        for manager in &mut self.managers {
            manager.frame_changed(frame);
        }
    }

    /// Drain finished pool work for all managers.
    pub fn poll(&self) -> usize {
        self.managers.iter().map(|m| m.poll()).sum()
    }

    /// Render every visible manager for time `t`.
    pub fn render(&mut self, t: TimeStamp, sink: &mut dyn DisplaySink) {
        for manager in &mut self.managers {
            manager.render(t, sink);
        }
    }

    // -------------------------------------------------------------------------
    // Settings persistence
    // -------------------------------------------------------------------------

    /// Serialize the switch state as ordered opaque key/value pairs.
    pub fn save_settings(&self) -> Vec<(String, String)> {
        vec![
            ("enabled".to_string(), self.enabled.to_string()),
            ("active".to_string(), self.active.to_string()),
        ]
    }

    /// Restore state saved by [`save_settings`](Self::save_settings).
    ///
    /// Unknown keys and malformed values are rejected; visibility changes
    /// are applied against `frame` and `sink` like the interactive calls.
    pub fn restore_settings(
        &mut self,
        settings: &[(String, String)],
        frame: &Frame,
        sink: &mut dyn DisplaySink,
    ) -> Result<(), SettingsError> {
        let mut enabled = self.enabled;
        let mut active = self.active;

        for (key, value) in settings {
            match key.as_str() {
                "enabled" => {
                    enabled = serde_json::from_str(value)
                        .map_err(|source| SettingsError::InvalidValue {
                            key: key.clone(),
                            source,
                        })?;
                }
                "active" => {
                    active = serde_json::from_str(value)
                        .map_err(|source| SettingsError::InvalidValue {
                            key: key.clone(),
                            source,
                        })?;
                }
                other => return Err(SettingsError::UnknownKey(other.to_string())),
            }
        }

        if active >= self.managers.len() {
            return Err(SettingsError::UnknownKey(format!(
                "no manager at index {active}"
            )));
        }

        // Apply in a safe order: deactivate first so the right manager
        // shows when the group enables.
        self.set_enabled(false, frame, sink);
        self.active = active;
        self.set_enabled(enabled, frame, sink);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
