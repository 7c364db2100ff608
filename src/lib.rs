//! # EK-PAR: Cross-Core Parameter Pipeline
//!
//! Control plane between the two cores of an asymmetric controller: a
//! deterministic real-time core running the control loop, and a background
//! core taking operator commands.
//!
//! ## Building Blocks
//!
//! ### 1. Mailbox Channels
//!
//! Single-writer/single-reader, latest-value channels over a shared byte
//! region. Writers never block; readers copy out before acknowledging.
//!
//! ### 2. Staged/Active Parameters
//!
//! Commands only ever touch the staged value. The real-time core reads the
//! active value through a [`ParamReader`] and sees a new value only after the
//! owning component has verified it and the commit pass flipped it.
//!
//! ### 3. Component Tree
//!
//! Static hierarchy of components owning parameters, addressed by dotted
//! full names (`Converter.main.PID.current.kp`). Staging marks the
//! component chain dirty so a commit pass only walks what changed.
//!
//! ### 4. JSON Command Protocol
//!
//! Schema and version checks, typed staging and a status line for every
//! outcome.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ekpar::prelude::*;
//!
//! let mut tree = ComponentTree::new();
//! let pid = tree.add_component(None, "PID", "current")?;
//! let kp = tree.add_parameter(pid, "kp", Parameter::new(0.5f64))?;
//!
//! // real-time core
//! let gain = kp.read();
//!
//! // background core
//! let mut setting = ParameterSetting::new(commands, status, &PipelineConfig::default());
//! loop {
//!     ticker.wait(&hal);
//!     setting.receive_json_command(&mut tree)?;
//! }
//! ```
//!
//! ## Features
//!
//! - `std` (default): component tree, JSON protocol, heap mailboxes
//! - `harness` (default): `ekpar-harness` host binary
//! - `defmt`: defmt derives for embedded logging
//! - `test-util`: registry reset for external test harnesses
//!
//! Without `std` the crate still provides mailboxes, parameters and the HAL
//! for the real-time core (requires `alloc`).
//!
//! ## License
//!
//! MIT License - Copyright (c) 2026 Elektrokombinacija

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

// Core modules (both cores)
pub mod types;
pub mod mailbox;
pub mod parameter;
pub mod config;
pub mod hal;

// Background core
#[cfg(feature = "std")]
pub mod registry;
#[cfg(feature = "std")]
pub mod component;
#[cfg(feature = "std")]
pub mod command;
#[cfg(feature = "std")]
pub mod snapshot;
#[cfg(feature = "std")]
pub mod background;

// Re-exports for convenience
pub use types::*;
pub use mailbox::{MailboxBuffer, Message, Reader, Writer, HEADER_SIZE};
#[cfg(feature = "std")]
pub use mailbox::MailboxRegion;
pub use parameter::{Limits, ParamKind, ParamReader, ParamScalar, ParamType, Parameter};
#[cfg(feature = "std")]
pub use parameter::{AnyParameter, ValueError};
pub use config::{CommitPolicy, PipelineConfig};
pub use hal::{Hal, Ticker};
#[cfg(feature = "std")]
pub use registry::{ParameterAddress, ParameterRegistry};
#[cfg(feature = "std")]
pub use component::{AcceptAll, CommitReport, Component, ComponentTree, ParameterSet, Rejection, Verify};
#[cfg(feature = "std")]
pub use command::{Command, CommandError, UPDATE_SUCCESS};
#[cfg(feature = "std")]
pub use snapshot::ParameterMap;
#[cfg(feature = "std")]
pub use background::{BackgroundTask, CycleReport, ParameterSetting};

/// Prelude - commonly used items
pub mod prelude {
    pub use crate::types::*;
    pub use crate::mailbox::{MailboxBuffer, Reader, Writer};
    pub use crate::parameter::{ParamReader, ParamType, Parameter};
    pub use crate::config::{CommitPolicy, PipelineConfig};
    pub use crate::hal::{Hal, Ticker};
    #[cfg(feature = "std")]
    pub use crate::mailbox::MailboxRegion;
    #[cfg(feature = "std")]
    pub use crate::component::{ComponentTree, ParameterSet, Verify};
    #[cfg(feature = "std")]
    pub use crate::background::{BackgroundTask, ParameterSetting};
    #[cfg(feature = "std")]
    pub use crate::snapshot::ParameterMap;
}

// ============================================================================
// Version
// ============================================================================

/// Major version
pub const VERSION_MAJOR: u32 = 0;
/// Minor version
pub const VERSION_MINOR: u32 = 1;
/// Patch version
pub const VERSION_PATCH: u32 = 0;
/// Version string
pub const VERSION_STRING: &str = "0.1.0";

/// Get crate version as packed integer (major << 16 | minor << 8 | patch)
pub const fn packed_version() -> u32 {
    (VERSION_MAJOR << 16) | (VERSION_MINOR << 8) | VERSION_PATCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(packed_version(), 0x000100);
        assert_eq!(VERSION_STRING, env!("CARGO_PKG_VERSION"));
    }
}
