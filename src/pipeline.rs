//! Representation pipelines: (item, position, settings) → actors.
//!
//! A [`RepresentationPipeline`] is the pure computation at the bottom of the
//! representation stack. It is supplied by an external collaborator (the
//! application's content-type plugins) and invoked from worker threads by
//! the pool's tasks, so implementations must be `Send + Sync` and must poll
//! the task context for cancellation.
//!
//! Items are referenced by stable [`ItemId`] handles; the external model
//! owns the items themselves. Actors are opaque renderables: the core moves
//! them between cache slots and display sinks without inspecting them.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Position;
use crate::error::PipelineError;
use crate::sched::TaskContext;

// =============================================================================
// ItemId
// =============================================================================

/// Stable handle to a visualizable source item (image stack or segmented
/// volume) owned by the external model.
///
/// The core never owns items; it stores IDs plus cached derived data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item{}", self.0)
    }
}

// =============================================================================
// Actor
// =============================================================================

/// An opaque renderable produced for one item at one position under one
/// settings snapshot. Immutable once produced; cheap to clone (shared).
#[derive(Clone)]
pub struct Actor {
    payload: Arc<dyn Any + Send + Sync>,
    label: Arc<str>,
}

impl Actor {
    /// Wrap a renderable payload with a debug label.
    pub fn new(label: impl Into<Arc<str>>, payload: impl Any + Send + Sync) -> Self {
        Self {
            payload: Arc::new(payload),
            label: label.into(),
        }
    }

    /// The debug label given at construction.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Downcast the payload to the concrete renderable type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Identity comparison: two handles to the same underlying renderable.
    pub fn same_as(&self, other: &Actor) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor").field("label", &self.label).finish()
    }
}

/// The actors a pool holds for each item at one committed timestamp.
///
/// An item that failed to render contributes no entry.
pub type ActorMap = HashMap<ItemId, Vec<Actor>>;

// =============================================================================
// RepresentationState
// =============================================================================

/// A single settings value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Float(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Text(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Text(v)
    }
}

/// Ordered tag→value settings store with pending-change tracking.
///
/// Pools keep one of these as their pipeline input; setting a tag marks it
/// modified until the owner calls [`commit`](Self::commit), which lets the
/// pool decide whether a change actually requires recomputation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepresentationState {
    values: BTreeMap<String, SettingValue>,
    #[serde(skip)]
    modified: Vec<String>,
}

impl RepresentationState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, recording it as modified if the value actually changed.
    pub fn set(&mut self, tag: impl Into<String>, value: impl Into<SettingValue>) {
        let tag = tag.into();
        let value = value.into();
        if self.values.get(&tag) != Some(&value) {
            self.values.insert(tag.clone(), value);
            if !self.modified.contains(&tag) {
                self.modified.push(tag);
            }
        }
    }

    /// Get a tag's value.
    pub fn get(&self, tag: &str) -> Option<&SettingValue> {
        self.values.get(tag)
    }

    /// Returns true if `tag` changed since the last commit.
    pub fn is_modified(&self, tag: &str) -> bool {
        self.modified.iter().any(|t| t == tag)
    }

    /// Returns true if any tag changed since the last commit.
    pub fn has_pending_changes(&self) -> bool {
        !self.modified.is_empty()
    }

    /// Clear the modified markers.
    pub fn commit(&mut self) {
        self.modified.clear();
    }

    /// Iterate tags and values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Order-independent digest of the committed values.
    ///
    /// Used together with [`RepresentationPipeline::representation_state`]
    /// to detect "nothing observable changed, skip recompute".
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (tag, value) in &self.values {
            tag.hash(&mut hasher);
            match value {
                SettingValue::Bool(b) => b.hash(&mut hasher),
                SettingValue::Int(i) => i.hash(&mut hasher),
                SettingValue::Float(f) => f.to_bits().hash(&mut hasher),
                SettingValue::Text(s) => s.hash(&mut hasher),
            }
        }
        hasher.finish()
    }
}

// =============================================================================
// RepresentationPipeline Trait
// =============================================================================

/// Pure function from (item, position, settings) to renderable actors.
///
/// Invoked on worker threads; implementations must not mutate shared state
/// and must poll `ctx.can_execute()` at least once per unit of work.
pub trait RepresentationPipeline: Send + Sync {
    /// Compute the actors for `item` at `position` under `state`.
    ///
    /// An empty vector is a valid result (the item is simply not visible at
    /// this position). Errors are isolated to this (item, position) key.
    fn compute_actors(
        &self,
        item: ItemId,
        position: Position,
        state: &RepresentationState,
        ctx: &TaskContext,
    ) -> Result<Vec<Actor>, PipelineError>;

    /// A digest of everything `compute_actors` would read for `item` under
    /// `state`. If the digest is unchanged the pool skips recomputation.
    fn representation_state(&self, item: ItemId, state: &RepresentationState) -> u64 {
        let mut hasher = DefaultHasher::new();
        item.hash(&mut hasher);
        state.digest().hash(&mut hasher);
        hasher.finish()
    }

    /// Name used in task descriptions and log output.
    fn name(&self) -> &str {
        "pipeline"
    }
}

// =============================================================================
// Tests
// =============================================================================
