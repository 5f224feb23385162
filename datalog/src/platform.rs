use crate::SystemTime;
use core::sync::atomic::{AtomicU32, Ordering};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

/// Everything the log needs from the target: flash access through
/// `embedded_storage` plus the time and reset sources. See README.md for an
/// example implementation.
///
/// The flash side doubles as the partition descriptor: `ERASE_SIZE` is the
/// flash page size and `capacity()` the partition size. All offsets the log
/// issues are absolute within the partition, and writes never cross a block
/// boundary.
pub trait Platform: Clock + ReadNorFlash + NorFlash {}

impl<T: Clock + ReadNorFlash + NorFlash> Platform for T {}

/// Time and reset sources, supplied by the target.
pub trait Clock {
    /// Raw 32-bit tick counter in microseconds. Wraps roughly every 72
    /// minutes; [`system_time`] accounts for the wrap.
    fn micros() -> u32;

    /// RTC time, seconds since epoch.
    fn utc() -> u32;

    /// Reset reason as reported by the SoC.
    fn reset_reason() -> u8;
}

/// Get time in milliseconds, accounting for tick counter wrapping.
///
/// The extended value is 64-bit internally; on-flash `system_time` fields
/// store the low 32 bits.
pub fn system_time<C: Clock>() -> SystemTime {
    static PREV_TICKS: AtomicU32 = AtomicU32::new(0);
    static HIGH_TICKS: AtomicU32 = AtomicU32::new(0);

    let ticks = C::micros();
    if ticks < PREV_TICKS.swap(ticks, Ordering::Relaxed) {
        HIGH_TICKS.fetch_add(1, Ordering::Relaxed);
    }
    let high = u64::from(HIGH_TICKS.load(Ordering::Relaxed));

    (((high << 32) | u64::from(ticks)) / 1000) as SystemTime
}
