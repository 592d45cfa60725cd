//! Monotonic fence for one command queue.
//!
//! A [`Fence`] pairs a strictly increasing 64-bit counter with a native
//! synchronization object. The owning queue signals the fence to a new
//! value on every submission; any thread can then ask whether a given value
//! has completed, or block until it does. A value `v` is complete when the
//! GPU has executed all work submitted with signal value ≤ `v`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{DeviceBackend, GpuFence, GpuQueue};
use crate::error::{GraphicsError, GraphicsResult};

/// Watchdog timeout for CPU-side fence waits. Hitting it means the GPU is
/// hung or the fence was never signaled; it is reported as a device fault.
const FENCE_WATCHDOG: Duration = Duration::from_secs(10);

/// Monotonic completion counter between one command queue and the CPU.
///
/// `signal` must only be called by the queue that owns the fence
/// (single-writer); every other operation is safe from any thread.
pub struct Fence {
    gpu: GpuFence,
    /// Last value handed out by `signal`.
    last_signaled: AtomicU64,
    /// Cache of the highest completed value observed so far. Monotone;
    /// lets `is_complete` answer without touching the backend on the
    /// common already-complete path.
    last_completed: AtomicU64,
    /// Declared last: the native fence above must be released while the
    /// backend (and its device) is still alive.
    backend: Arc<dyn DeviceBackend>,
}

impl Fence {
    /// Create a fence with its counter at zero.
    ///
    /// Failure to create the native object is a fatal device error.
    pub fn new(backend: Arc<dyn DeviceBackend>) -> GraphicsResult<Self> {
        let gpu = backend.create_fence()?;
        Ok(Self {
            gpu,
            last_signaled: AtomicU64::new(0),
            last_completed: AtomicU64::new(0),
            backend,
        })
    }

    /// Increment the counter and instruct `queue` to signal the fence to
    /// the new value once all previously enqueued work completes. Returns
    /// the new value.
    ///
    /// Must only be called by the queue that owns this fence.
    pub fn signal(&self, queue: &GpuQueue) -> GraphicsResult<u64> {
        let value = self.last_signaled.fetch_add(1, Ordering::SeqCst) + 1;
        self.backend.signal_fence(queue, &self.gpu, value)?;
        Ok(value)
    }

    /// The last value handed out by [`signal`](Self::signal).
    pub fn last_signaled_value(&self) -> u64 {
        self.last_signaled.load(Ordering::SeqCst)
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self, value: u64) -> bool {
        if value <= self.last_completed.load(Ordering::Acquire) {
            return true;
        }
        self.completed_value() >= value
    }

    /// The most recently observed completed value. Monotone non-decreasing.
    pub fn completed_value(&self) -> u64 {
        let observed = self.backend.completed_value(&self.gpu);
        self.last_completed.fetch_max(observed, Ordering::AcqRel);
        self.last_completed.load(Ordering::Acquire)
    }

    /// Block the calling thread until `value` completes.
    ///
    /// Returns immediately when the value is already complete; the
    /// short-circuit is required so waiting on value 0 (or any passed
    /// value) can never deadlock.
    pub fn wait_on_cpu(&self, value: u64) -> GraphicsResult<()> {
        if self.is_complete(value) {
            return Ok(());
        }
        if self.backend.wait_fence(&self.gpu, value, FENCE_WATCHDOG) {
            self.last_completed.fetch_max(value, Ordering::AcqRel);
            Ok(())
        } else {
            log::error!(
                "Fence wait for value {} timed out after {:?}; GPU may be hung",
                value,
                FENCE_WATCHDOG
            );
            Err(GraphicsError::DeviceLost)
        }
    }

    /// Block until `value` completes or `timeout` elapses.
    ///
    /// Returns `true` if the value completed. Used by asynchronous-load
    /// termination paths that must not hang on an unreachable fence.
    pub fn wait_on_cpu_timeout(&self, value: u64, timeout: Duration) -> bool {
        if self.is_complete(value) {
            return true;
        }
        if self.backend.wait_fence(&self.gpu, value, timeout) {
            self.last_completed.fetch_max(value, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// The native fence handle.
    pub fn raw(&self) -> &GpuFence {
        &self.gpu
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("last_signaled", &self.last_signaled.load(Ordering::Relaxed))
            .field(
                "last_completed",
                &self.last_completed.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::types::QueueKind;

    fn null_setup(manual: bool) -> (Arc<NullBackend>, GpuQueue, Fence) {
        let backend = Arc::new(if manual {
            NullBackend::manual()
        } else {
            NullBackend::new()
        });
        let queue = backend.get_queue(QueueKind::Graphics).unwrap();
        let fence = Fence::new(backend.clone() as Arc<dyn DeviceBackend>).unwrap();
        (backend, queue, fence)
    }

    #[test]
    fn test_signal_values_strictly_increase() {
        let (_backend, queue, fence) = null_setup(false);
        let mut prev = 0;
        for _ in 0..10 {
            let value = fence.signal(&queue).unwrap();
            assert!(value > prev);
            prev = value;
        }
    }

    #[test]
    fn test_wait_on_zero_is_noop() {
        let (_backend, _queue, fence) = null_setup(true);
        // Nothing was ever signaled; waiting on 0 must not block.
        fence.wait_on_cpu(0).unwrap();
    }

    #[test]
    fn test_is_complete_tracks_gpu_progress() {
        let (backend, queue, fence) = null_setup(true);
        let value = fence.signal(&queue).unwrap();
        assert!(!fence.is_complete(value));

        backend.complete(fence.raw(), value);
        assert!(fence.is_complete(value));
        assert_eq!(fence.completed_value(), value);
    }

    #[test]
    fn test_wait_already_complete_short_circuits() {
        let (_backend, queue, fence) = null_setup(false);
        let value = fence.signal(&queue).unwrap();
        // Auto-complete backend: value is done, wait returns immediately.
        fence.wait_on_cpu(value).unwrap();
    }

    #[test]
    fn test_wait_timeout_reports_incomplete() {
        let (_backend, queue, fence) = null_setup(true);
        let value = fence.signal(&queue).unwrap();
        assert!(!fence.wait_on_cpu_timeout(value, Duration::from_millis(10)));
    }

    #[test]
    fn test_completed_value_is_monotone() {
        let (backend, queue, fence) = null_setup(true);
        let v1 = fence.signal(&queue).unwrap();
        let v2 = fence.signal(&queue).unwrap();
        backend.complete(fence.raw(), v2);
        assert_eq!(fence.completed_value(), v2);
        // A stale observation can never move the cache backwards.
        assert!(fence.is_complete(v1));
        assert_eq!(fence.completed_value(), v2);
    }
}
