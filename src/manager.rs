use std::thread;

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync each rewrite, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // CASE 1: Single core. One request worker plus one for blocking file I/O.
        if cores <= 1 {
            warn!(cores, "CPU constraint detected, skipping fsync on rewrites");
            Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
            }
        }
        // CASE 2: Desktop / laptop
        else if cores < 6 {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                strict_durability: true,
            }
        }
        // CASE 3: Server. Every request is a whole-file read, more threads only add contention.
        else {
            Self {
                logical_cores: cores,
                worker_threads: cores.min(8),
                strict_durability: true,
            }
        }
    }

    /// Apply command-line overrides on top of the detected profile.
    pub fn with_overrides(mut self, workers: Option<usize>, strict: Option<bool>) -> Self {
        if let Some(workers) = workers {
            self.worker_threads = workers.max(1);
        }
        if let Some(strict) = strict {
            self.strict_durability = strict;
        }
        self
    }
}
