//! EK-PAR - Hardware Abstraction Layer
//!
//! HAL provides the platform services the background core needs:
//! - Time measurement and delays (periodic tick)
//! - Mapping the shared-memory regions that carry the mailboxes
//!
//! The real-time core needs none of this: it only holds
//! [`ParamReader`](crate::parameter::ParamReader) handles.
//!
//! # Implementing a HAL
//!
//! ```ignore
//! struct MyHal;
//!
//! impl Hal for MyHal {
//!     fn time_us(&self) -> TimeUs {
//!         // Read hardware timer
//!     }
//!
//!     unsafe fn map_region(&self, address: usize, len: usize) -> Result<*mut u8> {
//!         // Translate the physical address of the OCM window
//!     }
//!
//!     // ... implement other methods
//! }
//! ```

use crate::types::*;

// ============================================================================
// HAL Trait
// ============================================================================

/// Hardware Abstraction Layer trait
///
/// Implement this for the background core of your target.
pub trait Hal {
    /// Get current time in microseconds
    ///
    /// Must be monotonically increasing.
    fn time_us(&self) -> TimeUs;

    /// Delay (busy-wait or sleep)
    fn delay_us(&self, us: u32);

    /// Map a shared-memory window at a fixed address
    ///
    /// The default is the identity mapping used on bare-metal cores where
    /// shared SRAM is addressed directly.
    ///
    /// # Safety
    /// The returned pointer is only valid if `address..address+len` really is
    /// memory shared with the peer core.
    unsafe fn map_region(&self, address: usize, len: usize) -> Result<*mut u8> {
        if address == 0 || len == 0 {
            return Err(Error::InvalidArg);
        }
        Ok(address as *mut u8)
    }

    /// Get platform name
    fn platform_name(&self) -> &'static str;
}

// ============================================================================
// Periodic Tick
// ============================================================================

/// Fixed-rate scheduler for the background loop
///
/// Deadlines advance by whole periods; an overrun restarts the schedule from
/// the current time instead of bursting to catch up.
#[derive(Debug, Clone, Copy)]
pub struct Ticker {
    period_us: TimeUs,
    next_us: Option<TimeUs>,
}

impl Ticker {
    /// Create a ticker with the given period
    pub const fn new(period_us: TimeUs) -> Self {
        Self {
            period_us,
            next_us: None,
        }
    }

    /// Tick period
    pub fn period_us(&self) -> TimeUs {
        self.period_us
    }

    /// Block until the next deadline
    ///
    /// The first call returns immediately. Returns the number of periods
    /// that were missed.
    pub fn wait<H: Hal + ?Sized>(&mut self, hal: &H) -> u32 {
        let now = hal.time_us();
        let Some(deadline) = self.next_us else {
            self.next_us = Some(now + self.period_us);
            return 0;
        };

        if now < deadline {
            hal.delay_us((deadline - now).min(u32::MAX as TimeUs) as u32);
            self.next_us = Some(deadline + self.period_us);
            0
        } else {
            let missed = if self.period_us == 0 {
                0
            } else {
                ((now - deadline) / self.period_us) as u32
            };
            self.next_us = Some(now + self.period_us);
            missed
        }
    }
}

// ============================================================================
// No-op HAL (for testing)
// ============================================================================

/// No-op HAL for testing and simulation
///
/// Time only moves when [`NoopHal::advance_time`] or `delay_us` is called.
#[cfg(any(test, feature = "std"))]
pub struct NoopHal {
    time: core::sync::atomic::AtomicU64,
}

#[cfg(any(test, feature = "std"))]
impl NoopHal {
    /// Create new no-op HAL
    pub fn new() -> Self {
        Self {
            time: core::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Advance time (for testing)
    pub fn advance_time(&self, us: u64) {
        self.time.fetch_add(us, core::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "std"))]
impl Default for NoopHal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "std"))]
impl Hal for NoopHal {
    fn time_us(&self) -> TimeUs {
        self.time.load(core::sync::atomic::Ordering::SeqCst)
    }

    fn delay_us(&self, us: u32) {
        self.advance_time(us as u64);
    }

    fn platform_name(&self) -> &'static str {
        "noop"
    }
}

// ============================================================================
// POSIX HAL (for std environments)
// ============================================================================

#[cfg(feature = "std")]
pub mod posix {
    use super::*;
    use std::time::Instant;

    /// POSIX-based HAL for desktop testing
    ///
    /// Regions are not mapped from physical addresses; use
    /// [`MailboxRegion`](crate::mailbox::MailboxRegion) on the host.
    pub struct PosixHal {
        start: Instant,
    }

    impl PosixHal {
        /// Create new POSIX HAL
        pub fn new() -> Self {
            Self {
                start: Instant::now(),
            }
        }
    }

    impl Default for PosixHal {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Hal for PosixHal {
        fn time_us(&self) -> TimeUs {
            self.start.elapsed().as_micros() as TimeUs
        }

        fn delay_us(&self, us: u32) {
            std::thread::sleep(std::time::Duration::from_micros(us as u64));
        }

        unsafe fn map_region(&self, _address: usize, _len: usize) -> Result<*mut u8> {
            Err(Error::NotFound)
        }

        fn platform_name(&self) -> &'static str {
            "posix"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_waits_full_period() {
        let hal = NoopHal::new();
        let mut ticker = Ticker::new(1_000);

        assert_eq!(ticker.wait(&hal), 0);
        assert_eq!(hal.time_us(), 0);

        hal.advance_time(200);
        assert_eq!(ticker.wait(&hal), 0);
        assert_eq!(hal.time_us(), 1_000);

        assert_eq!(ticker.wait(&hal), 0);
        assert_eq!(hal.time_us(), 2_000);
    }

    #[test]
    fn test_ticker_overrun() {
        let hal = NoopHal::new();
        let mut ticker = Ticker::new(1_000);
        ticker.wait(&hal);

        hal.advance_time(3_500);
        assert_eq!(ticker.wait(&hal), 2);
        assert_eq!(hal.time_us(), 3_500);

        assert_eq!(ticker.wait(&hal), 0);
        assert_eq!(hal.time_us(), 4_500);
    }

    #[test]
    fn test_identity_mapping() {
        let hal = NoopHal::new();
        unsafe {
            assert_eq!(hal.map_region(0, 16), Err(Error::InvalidArg));
            assert_eq!(hal.map_region(0x2000_0000, 16), Ok(0x2000_0000 as *mut u8));
        }
    }

    #[test]
    fn test_posix_time_monotonic() {
        let hal = posix::PosixHal::new();
        let t1 = hal.time_us();
        hal.delay_us(100);
        assert!(hal.time_us() >= t1);
        assert_eq!(hal.platform_name(), "posix");
    }
}
