use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of [`EngineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    pub cpu_blts: u64,
    pub native_blts: u64,
    pub gpu_blts: u64,
    pub color_fills: u64,

    pub sys_mem_loads: u64,
    pub vid_mem_loads: u64,
    pub msaa_loads: u64,
    pub msaa_resolved_loads: u64,
    pub lock_ref_reconciliations: u64,

    pub downscale_steps: u64,
    pub presentation_blts: u64,
    pub reconfigurations: u64,
    pub unsupported_depth_resolves: u64,
}

/// Engine counters. Cheap to bump from whichever thread holds the critical section and safe to
/// read from any other.
#[derive(Debug, Default)]
pub struct EngineStats {
    cpu_blts: AtomicU64,
    native_blts: AtomicU64,
    gpu_blts: AtomicU64,
    color_fills: AtomicU64,

    sys_mem_loads: AtomicU64,
    vid_mem_loads: AtomicU64,
    msaa_loads: AtomicU64,
    msaa_resolved_loads: AtomicU64,
    lock_ref_reconciliations: AtomicU64,

    downscale_steps: AtomicU64,
    presentation_blts: AtomicU64,
    reconfigurations: AtomicU64,
    unsupported_depth_resolves: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_cpu_blts(&self) {
        self.cpu_blts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_native_blts(&self) {
        self.native_blts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gpu_blts(&self) {
        self.gpu_blts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_color_fills(&self) {
        self.color_fills.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sys_mem_loads(&self) {
        self.sys_mem_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_vid_mem_loads(&self) {
        self.vid_mem_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_msaa_loads(&self) {
        self.msaa_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_msaa_resolved_loads(&self) {
        self.msaa_resolved_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lock_ref_reconciliations(&self) {
        self.lock_ref_reconciliations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_downscale_steps(&self) {
        self.downscale_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_presentation_blts(&self) {
        self.presentation_blts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconfigurations(&self) {
        self.reconfigurations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unsupported_depth_resolves(&self) {
        self.unsupported_depth_resolves
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            cpu_blts: self.cpu_blts.load(Ordering::Relaxed),
            native_blts: self.native_blts.load(Ordering::Relaxed),
            gpu_blts: self.gpu_blts.load(Ordering::Relaxed),
            color_fills: self.color_fills.load(Ordering::Relaxed),
            sys_mem_loads: self.sys_mem_loads.load(Ordering::Relaxed),
            vid_mem_loads: self.vid_mem_loads.load(Ordering::Relaxed),
            msaa_loads: self.msaa_loads.load(Ordering::Relaxed),
            msaa_resolved_loads: self.msaa_resolved_loads.load(Ordering::Relaxed),
            lock_ref_reconciliations: self.lock_ref_reconciliations.load(Ordering::Relaxed),
            downscale_steps: self.downscale_steps.load(Ordering::Relaxed),
            presentation_blts: self.presentation_blts.load(Ordering::Relaxed),
            reconfigurations: self.reconfigurations.load(Ordering::Relaxed),
            unsupported_depth_resolves: self.unsupported_depth_resolves.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let stats = EngineStats::new();
        stats.inc_gpu_blts();
        stats.inc_gpu_blts();
        stats.inc_unsupported_depth_resolves();

        let snap = stats.snapshot();
        assert_eq!(snap.gpu_blts, 2);
        assert_eq!(snap.unsupported_depth_resolves, 1);
        assert_eq!(
            snap,
            EngineStatsSnapshot {
                gpu_blts: 2,
                unsupported_depth_resolves: 1,
                ..EngineStatsSnapshot::default()
            }
        );
    }
}
