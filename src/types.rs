//! EK-PAR - Base types and configuration constants
//!
//! Shared by both cores: nothing in here allocates.

use core::fmt;
use core::fmt::Write as _;
use fixed::types::I16F16;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default capacity of the inbound command mailbox (bytes)
pub const COMMAND_QUEUE_SIZE: usize = 64 * 1024;

/// Default capacity of the outbound status mailbox (bytes)
pub const STATUS_QUEUE_SIZE: usize = 1024;

/// Default capacity of the parameter map mailbox (bytes)
pub const PARAMETER_MAP_QUEUE_SIZE: usize = 256 * 1024;

/// Background tick period in microseconds (1ms default)
pub const BACKGROUND_TICK_US: u64 = 1_000;

/// Maximum length of a verification warning
pub const WARNING_CAPACITY: usize = 256;

/// Reader retries before a torn mailbox read is reported as busy
pub const READ_RETRIES: u32 = 3;

// ============================================================================
// Basic Types
// ============================================================================

/// Index of a component inside its tree arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ComponentId(pub(crate) usize);

impl ComponentId {
    /// Position of the component in its arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Timestamp in microseconds
pub type TimeUs = u64;

/// Fixed-point Q16.16 for real-time core parameters
pub type Fixed = I16F16;

// ============================================================================
// Error Types
// ============================================================================

/// Result type for EK-PAR operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum Error {
    /// Invalid argument provided
    #[cfg_attr(feature = "std", error("invalid argument"))]
    InvalidArg,
    /// Mapped region cannot hold the channel header
    #[cfg_attr(feature = "std", error("region too small for a mailbox"))]
    RegionTooSmall,
    /// Mapped region is not aligned for the channel header
    #[cfg_attr(feature = "std", error("region not aligned for a mailbox"))]
    Misaligned,
    /// Writer or reader side already taken
    #[cfg_attr(feature = "std", error("mailbox side already claimed"))]
    AlreadyClaimed,
    /// Write larger than the channel capacity
    #[cfg_attr(feature = "std", error("payload of {len} bytes exceeds mailbox capacity of {capacity} bytes"))]
    PayloadTooLarge {
        /// Bytes the caller tried to write
        len: usize,
        /// Bytes the channel can carry
        capacity: usize,
    },
    /// Scratch buffer cannot hold the pending message
    #[cfg_attr(feature = "std", error("scratch buffer of {available} bytes cannot hold {needed} bytes"))]
    BufferTooSmall {
        /// Bytes of the pending message
        needed: usize,
        /// Bytes of scratch provided
        available: usize,
    },
    /// Message was overwritten during every read attempt
    #[cfg_attr(feature = "std", error("mailbox busy"))]
    Busy,
    /// Item not found
    #[cfg_attr(feature = "std", error("not found"))]
    NotFound,
    /// Item already exists
    #[cfg_attr(feature = "std", error("already exists"))]
    AlreadyExists,
    /// Staged value lies outside the parameter's declared limits
    #[cfg_attr(feature = "std", error("value outside the parameter limits"))]
    OutsideLimits,
    /// JSON serialization failed
    #[cfg_attr(feature = "std", error("serialization failed"))]
    Serialization,
}

// ============================================================================
// Interface Version
// ============================================================================

/// Version of a JSON interface exchanged over a mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
pub struct Version {
    /// Incompatible interface changes
    pub major: u32,
    /// Backwards-compatible additions
    pub minor: u32,
    /// Fixes
    pub patch: u32,
}

impl Version {
    /// Create new version
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Versions of the interfaces spoken by the pipeline
pub mod version {
    use super::Version;

    /// JSON command interface
    pub const JSON_COMMAND: Version = Version::new(0, 1, 0);

    /// JSON parameter map interface
    pub const JSON_PARAMETER_MAP: Version = Version::new(0, 1, 0);
}

// ============================================================================
// Warning
// ============================================================================

/// Bounded warning text returned by component verification
///
/// Text longer than [`WARNING_CAPACITY`] is truncated at a char boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Warning {
    text: heapless::String<WARNING_CAPACITY>,
}

impl Warning {
    /// Create a warning from text
    pub fn new(text: &str) -> Self {
        let mut warning = Self::default();
        warning.push_str(text);
        warning
    }

    /// Create a warning from format arguments
    pub fn from_args(args: fmt::Arguments<'_>) -> Self {
        let mut warning = Self::default();
        // Truncation is reported as fmt::Error; what fit is kept.
        let _ = warning.write_fmt(args);
        warning
    }

    /// Warning text
    pub fn as_str(&self) -> &str {
        self.text.as_str()
    }

    fn push_str(&mut self, text: &str) {
        for c in text.chars() {
            if self.text.push(c).is_err() {
                break;
            }
        }
    }
}

impl fmt::Write for Warning {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let before = self.text.len();
        self.push_str(s);
        if self.text.len() - before == s.len() {
            Ok(())
        } else {
            Err(fmt::Error)
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text.as_str())
    }
}

/// Build a [`Warning`] with `format!` syntax
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        $crate::types::Warning::from_args(format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_truncates() {
        let long = "x".repeat(WARNING_CAPACITY + 10);
        let warning = Warning::new(&long);
        assert_eq!(warning.as_str().len(), WARNING_CAPACITY);
    }

    #[test]
    fn test_warning_macro() {
        let warning = warning!("value {} must be even", 3);
        assert_eq!(warning.as_str(), "value 3 must be even");
    }

    #[test]
    fn test_version_display() {
        assert_eq!(version::JSON_COMMAND.to_string(), "0.1.0");
    }
}
