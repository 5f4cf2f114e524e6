//! The display-facing layer: managers and switches.
//!
//! Pools compute and cache; this module decides what actually reaches a
//! display. [`RepresentationManager`] adapts pools to one display slot
//! (visibility, change acceptance, policy-driven time selection, sink
//! diffing) and [`RepresentationSwitch`] groups managers behind a single
//! user-facing toggle with settings persistence.

mod manager;
mod switch;

pub use manager::{ChangeAcceptance, DisplaySink, ManagerPolicy, RepresentationManager};
pub use switch::{GroupMode, RepresentationSwitch};
