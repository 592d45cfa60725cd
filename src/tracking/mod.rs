//! Resource state tracking and GPU lifetime tracking.
//!
//! This module contains the per-command-list state controller that computes
//! and batches transition barriers, and the usage tracker that keeps GPU
//! objects alive until the fence value marking their last use completes.

mod barriers;
mod state;
mod usage;

pub use barriers::{BarrierBatch, PendingBarrier};
pub use state::{ResourceStateController, ResourceStateRecord};
pub use usage::{ResourceUsageTracker, RetiredPayload};
