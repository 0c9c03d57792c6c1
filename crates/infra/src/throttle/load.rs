//! Load signals for adaptive admission.

use sysinfo::System;

/// Source of a load percentage (0-100). `None` means "no reading this time".
pub trait LoadSampler: Send + 'static {
    fn sample(&mut self) -> Option<f32>;
}

impl<F> LoadSampler for F
where
    F: FnMut() -> Option<f32> + Send + 'static,
{
    fn sample(&mut self) -> Option<f32> {
        self()
    }
}

/// Global CPU usage of the host, via `sysinfo`.
///
/// CPU usage is a delta between two refreshes, so the first reading after
/// construction is only meaningful once a sample interval has passed.
pub struct SysinfoLoadSampler {
    system: System,
}

impl SysinfoLoadSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for SysinfoLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SysinfoLoadSampler {
    fn sample(&mut self) -> Option<f32> {
        self.system.refresh_cpu_usage();
        let usage = self.system.global_cpu_usage();
        usage.is_finite().then_some(usage.clamp(0.0, 100.0))
    }
}
