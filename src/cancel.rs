//! Cooperative cancellation shared between the caller and spawned tools.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap, clonable cancellation flag.
///
/// Every external process started through [`crate::process::Cmd`] polls the
/// token it was given and is killed once the token fires.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fire this token when the user presses Ctrl+C.
    ///
    /// Only one handler can be installed per process.
    pub fn cancel_on_ctrlc(&self) -> anyhow::Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || token.cancel())?;
        Ok(())
    }
}
