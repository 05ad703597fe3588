use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the view-model a component feeds is still mounted.
///
/// Components check it after every await and drop their result once it is detached. Clones
/// share the flag.
#[derive(Debug, Clone)]
pub struct Liveness {
    alive: Arc<AtomicBool>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn detach(&self) {
        tracing::debug!("detached");
        self.alive.store(false, Ordering::Release);
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}
