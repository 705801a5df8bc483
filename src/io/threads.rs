use std::num::NonZeroUsize;

/// Worker thread count; `0` means one per available core.
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    pub threads: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self { threads: 1 }
    }
}

impl ThreadConfig {
    pub fn new(threads: usize) -> Self {
        Self { threads }
    }

    /// Concrete thread count, never zero.
    pub fn resolve(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        }
    }
}
