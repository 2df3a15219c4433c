//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{J3kError, Result};

/// Pipeline stage of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extract,
    Transform,
    Quantize,
    Pack,
    Assemble,
}

/// One progress notification from the encoder or decoder.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub tile_idx: usize,
    pub tiles_total: usize,
    pub stage: PipelineStage,
}

/// Receives progress events. Implementations must tolerate concurrent
/// delivery from parallel tile workers.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// A progress sink that invokes a callback function.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        (self.callback)(*event);
    }
}

/// Shared cancellation flag; cloning hands out another handle to the same
/// flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the next checkpoint surfaces `Cancelled`.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the actor can run again.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Error out when cancellation has been requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(J3kError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callback_progress_invoked() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let sink = CallbackProgress::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        sink.on_progress(&ProgressEvent {
            tile_idx: 0,
            tiles_total: 1,
            stage: PipelineStage::Extract,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.checkpoint().is_ok());
        clone.cancel();
        assert!(matches!(token.checkpoint(), Err(J3kError::Cancelled)));
        token.reset();
        assert!(clone.checkpoint().is_ok());
    }
}
