//! The probe backend interface: primitive bit I/O on the SWD wire.

use std::io;

/// An error in the probe backend driving the physical link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// An I/O error in the connection to the probe.
    #[error("an I/O error occurred in the connection to the probe")]
    Io(#[from] io::Error),

    /// An error specific to the probe in use.
    #[error("an error specific to the probe occurred")]
    Probe(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Any other backend failure.
    #[error("{0}")]
    Other(String),
}

/// Primitive bit I/O over the two-wire link.
///
/// All shifts are LSB-first with `cycles <= 32`. Parity is even and covers
/// exactly the shifted data bits. Turnaround cycles on a change of line
/// ownership are the backend's responsibility.
///
/// The owning [`SwdTransport`](crate::SwdTransport) serialises all access, so
/// exactly one transaction is in flight at any instant.
pub trait SwdLink {
    /// Brings the physical link up.
    fn init(&mut self) -> Result<(), LinkError>;

    /// Shifts `cycles` bits out.
    fn seq_out(&mut self, bits: u32, cycles: u8) -> Result<(), LinkError>;

    /// Shifts `cycles` bits out, followed by one even-parity bit.
    fn seq_out_parity(&mut self, bits: u32, cycles: u8) -> Result<(), LinkError>;

    /// Shifts `cycles` bits in.
    fn seq_in(&mut self, cycles: u8) -> Result<u32, LinkError>;

    /// Shifts `cycles` bits in, followed by one parity bit.
    ///
    /// Returns the data and whether the parity matched.
    fn seq_in_parity(&mut self, cycles: u8) -> Result<(u32, bool), LinkError>;

    /// Enables or disables the clock output to the target.
    ///
    /// Probes without a clock gate can rely on the default no-op.
    fn target_clock_output(&mut self, _enable: bool) -> Result<(), LinkError> {
        Ok(())
    }
}
