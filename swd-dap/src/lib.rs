//! Host-side transport driver for the Serial Wire Debug (SWD) variant of the
//! ARM Debug Interface v5.
//!
//! This crate drives a two-wire (clock + bidirectional data) link to one or
//! more ARM debug ports, performs the link-level handshakes that bring targets
//! out of their dormant or JTAG state, enumerates debug ports on multi-drop
//! buses and exposes a register-level read/write service with
//! protocol-conformant error recovery.
//!
//! See <https://developer.arm.com/documentation/ihi0031/f/?lang=en> for the
//! ADIv5 specification.
//!
//! The crate sits between two interfaces it does not implement itself:
//!
//! * [`SwdLink`] — the probe backend providing primitive bit I/O on the wire
//!   (a USB dongle, a bit-banged GPIO pair, a remote protocol, ...).
//! * [`DpCore`] — the DP/AP semantic layer that takes over each discovered
//!   [`DebugPort`] after link-up. It stays generic over [`RawDapAccess`], so
//!   the same register semantics run over this SWD transport or a JTAG one.
//!
//! A session starts with [`SwdTransport::scan`], which wakes the bus, reads
//! DPIDR (falling back to the deprecated JTAG-to-SWD switch once), probes all
//! 16 multi-drop instance IDs where that applies, and hands every answering
//! debug port to [`DpCore::dp_init`].

pub mod dp;
pub mod link;
pub mod packet;
pub mod scan;
pub mod sequences;
#[cfg(test)]
pub(crate) mod testing;
pub mod time;
pub mod transport;

pub use crate::dp::{DebugPort, DebugPortId, DebugPortVersion, DpFault, MinDpSupport, Register};
pub use crate::link::{LinkError, SwdLink};
pub use crate::packet::{build_request, TransferDirection};
pub use crate::scan::DpCore;
pub use crate::time::{Clock, MonotonicClock};
pub use crate::transport::{
    ProbeStatistics, RawDapAccess, SwdError, SwdSettings, SwdTransport,
};
