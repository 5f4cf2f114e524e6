//! Configuration for the representation core.
//!
//! All tunables are carried by an explicit [`CoreConfig`] value threaded
//! through constructors; there is no process-wide settings store. Loading
//! and saving configuration is the application shell's responsibility.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of positions kept materialized around the crosshair.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Default grace period granted to worker threads on scheduler shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Returns the default worker count: one per available core.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// =============================================================================
// CoreConfig
// =============================================================================

/// Configuration shared by the scheduler and the representation pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Number of worker threads in the scheduler.
    ///
    /// Fixed at scheduler construction; defaults to the number of cores.
    pub worker_count: usize,

    /// Width of the position window each pool keeps materialized.
    ///
    /// The window is centered on the crosshair; positions outside it are
    /// evicted as soon as a newer window is committed. Live cache entries
    /// per pool are bounded by `window_size * item_count`.
    pub window_size: usize,

    /// How long scheduler shutdown waits for each worker to honor abort
    /// before detaching it.
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            window_size: DEFAULT_WINDOW_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl CoreConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".to_string());
        }

        if self.window_size == 0 {
            return Err("window_size must be greater than 0".to_string());
        }

        if self.window_size % 2 == 0 {
            return Err("window_size must be odd so the window centers on the crosshair".to_string());
        }

        Ok(())
    }

    /// Number of positions the window extends to each side of the crosshair.
    pub fn window_radius(&self) -> i64 {
        (self.window_size / 2) as i64
    }
}

/// Serialize `Duration` as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// =============================================================================
// Tests
// =============================================================================
