// src/util.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// One-way latch polled by every long-running loop; raised once at shutdown
/// and never lowered.
pub struct StopFlag {
    raised: AtomicBool,
}

impl Default for StopFlag {
    fn default() -> Self {
        Self { raised: AtomicBool::new(false) }
    }
}

impl StopFlag {
    #[inline]
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Relaxed)
    }
}

/// Burn a few cycles without yielding; the idle arm of every busy loop.
#[inline]
pub fn spin_wait(loops: u32) {
    for _ in 0..loops {
        std::hint::spin_loop();
    }
}

/// Pin the calling thread when a core index is configured. Pinning is an
/// optimization, so a missing core or a refused affinity call only logs.
pub fn pin_to_core_if_set(core_index: Option<usize>) {
    let Some(want) = core_index else { return };
    let core = core_affinity::get_core_ids()
        .into_iter()
        .flatten()
        .find(|c| c.id == want);
    match core {
        Some(core) => {
            if !core_affinity::set_for_current(core) {
                log::warn!("could not pin thread to core {want}");
            }
        }
        None => log::warn!("core {want} not present on this host; thread left unpinned"),
    }
}

/// Monotonic nanoseconds. CLOCK_MONOTONIC_RAW where available, so NTP slew
/// never bends receive-timestamp ordering.
#[cfg(target_os = "linux")]
#[inline]
pub fn now_nanos() -> u64 {
    use nix::time::{clock_gettime, ClockId};
    match clock_gettime(ClockId::CLOCK_MONOTONIC_RAW) {
        Ok(ts) => ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64,
        Err(_) => instant_nanos(),
    }
}

#[cfg(not(target_os = "linux"))]
#[inline]
pub fn now_nanos() -> u64 {
    instant_nanos()
}

/// Nanoseconds since the first call, anchored to a process-local Instant.
fn instant_nanos() -> u64 {
    static EPOCH: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    EPOCH.elapsed().as_nanos() as u64
}
