//! Cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

/// Flag raised by Ctrl-C and polled by long-running loops.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag when the process receives Ctrl-C.
    ///
    /// The signal is awaited on a dedicated thread; the lifecycle itself stays
    /// synchronous and only observes the flag.
    pub fn watch_ctrl_c(&self) {
        let interrupt = self.clone();
        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    debug!("Failed to start Ctrl-C watcher: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\nInterrupted, stopping after the current step...");
                    interrupt.trigger();
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_is_shared_between_clones() {
        let interrupt = Interrupt::new();
        let watcher = interrupt.clone();
        assert!(!watcher.is_triggered());

        interrupt.trigger();
        assert!(watcher.is_triggered());
    }
}
