use log::debug;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::sync::{Arc, OnceLock};

/// Serializes window geometry changes against the host's render pass.
///
/// Until [`RenderLock::init`] is called, locking is a no-op. The lock is reentrant, so a
/// geometry update may run inside a render pass callback on the same thread. The device
/// registry lock must be released before this one is taken.
#[derive(Clone, Default)]
pub struct RenderLock(Arc<OnceLock<ReentrantMutex<()>>>);

#[must_use]
pub struct RenderGuard<'a>(#[allow(dead_code)] Option<ReentrantMutexGuard<'a, ()>>);

impl RenderLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self) {
        if self.0.set(ReentrantMutex::new(())).is_ok() {
            debug!("render lock initialized");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn lock(&self) -> RenderGuard<'_> {
        RenderGuard(self.0.get().map(ReentrantMutex::lock))
    }
}
