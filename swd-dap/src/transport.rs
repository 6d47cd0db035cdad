//! The SWD transaction engine: checked and unchecked register access, ACK
//! handling and sticky-error recovery.

use std::time::Duration;

use crate::{
    dp::{
        Abort, Ctrl, DebugPort, DpFault, Dpidr, RdBuff, Register, TargetSel, AP_ACCESS,
        CTRLSTAT_ERRMASK,
    },
    link::{LinkError, SwdLink},
    packet::{build_request, TransferDirection},
    sequences,
    time::{Clock, MonotonicClock, Timeout},
};

/// ACK slot values on the wire.
pub(crate) const ACK_OK: u32 = 0b001;
pub(crate) const ACK_WAIT: u32 = 0b010;
pub(crate) const ACK_FAULT: u32 = 0b100;
/// The idle bus: nothing drove the line during the ACK phase.
pub(crate) const ACK_NO_RESPONSE: u32 = 0b111;

/// Idle cycles clocked after the data phase of every completed transaction.
///
/// The specification also permits starting the next transaction right away;
/// a full byte of idle favours correctness on marginal targets over a slight
/// speed decrease.
const IDLE_CYCLES_AFTER_TRANSFER: u8 = 8;

/// Errors surfaced by the SWD transport.
///
/// WAIT, FAULT and no-response outcomes of a checked access are *not* errors:
/// they are latched in [`DebugPort::fault`] and the access returns 0. The
/// variants here are the conditions that unwind to the session boundary.
#[derive(Debug, thiserror::Error)]
pub enum SwdError {
    /// The probe backend failed.
    #[error("the probe backend failed")]
    Link(#[from] LinkError),

    /// The target answered with an ACK value outside the protocol. Usually a
    /// physical or electrical problem.
    #[error("SWD access has invalid ACK {0:#05b}")]
    InvalidAck(u8),

    /// Read data failed its parity check.
    #[error("SWD access resulted in parity error")]
    IncorrectParity,

    /// No debug port answered during first contact.
    #[error("no usable DP found")]
    NoDpFound,
}

/// Tunables of the transaction engine.
#[derive(Debug, Clone)]
pub struct SwdSettings {
    /// Wall-clock budget for WAIT/FAULT retries within one checked access.
    pub ack_timeout: Duration,
}

impl Default for SwdSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(250),
        }
    }
}

/// Wire-traffic counters, handy when tuning a probe backend.
#[derive(Debug, Default, Clone)]
pub struct ProbeStatistics {
    /// Transactions put on the wire, retries and internal aborts included.
    pub num_transfers: usize,
    /// WAIT responses seen.
    pub num_wait_resp: usize,
    /// FAULT responses seen.
    pub num_faults: usize,
    /// Line resets run outside the entry sequences.
    pub num_line_resets: usize,
}

/// The operations a [`DebugPort`] is driven through.
///
/// This is the seam between transport and register semantics:
/// [`DpCore`](crate::DpCore) implementations stay generic over this trait, so
/// the same DP/AP logic runs over the SWD transport here or over a JTAG one.
pub trait RawDapAccess {
    /// One checked transaction with ACK interpretation, bounded WAIT/FAULT
    /// retry and fault latching.
    ///
    /// Returns 0 with [`DebugPort::fault`] set when the target answered WAIT
    /// past the retry budget, FAULT, or not at all. An AP access on a port
    /// with a latched fault returns 0 without touching the wire; run
    /// [`clear_error`](Self::clear_error) first.
    fn low_access(
        &mut self,
        dp: &mut DebugPort,
        direction: TransferDirection,
        addr: u16,
        value: u32,
    ) -> Result<u32, SwdError>;

    /// A write without the ACK retry and timeout machinery. `Ok(true)` means
    /// the ACK was not OK.
    ///
    /// Used where the ACK phase carries no information (TARGETSEL selection,
    /// where the target does not drive the line) and during error recovery,
    /// where the checked path would fault on itself.
    fn write_no_check(&mut self, addr: u16, value: u32) -> Result<bool, SwdError>;

    /// A read without the ACK retry and timeout machinery; 0 on a non-OK ACK.
    /// Parity of the data phase is not checked on this path.
    fn read_no_check(&mut self, addr: u16) -> Result<u32, SwdError>;

    /// Reads CTRL/STAT and clears any latched sticky errors through ABORT.
    ///
    /// Returns the set of sticky error bits that were present (0 when clean),
    /// or [`CTRLSTAT_ERRMASK`] as a whole when the port could not be brought
    /// back. With `protocol_recovery`, or on a DPv2+ port with a latched
    /// fault, the read is preceded by a line reset, a TARGETSEL reselect
    /// (DPv2+) and a DPIDR read to resynchronise the line. Recovery recurses
    /// at most once.
    fn clear_error(
        &mut self,
        dp: &mut DebugPort,
        protocol_recovery: bool,
    ) -> Result<u32, SwdError>;

    /// Reads a DP or AP register. AP reads are posted: the access is issued
    /// through the recoverable path, then the value collected from RDBUFF.
    fn dp_read(&mut self, dp: &mut DebugPort, addr: u16) -> Result<u32, SwdError> {
        if addr & AP_ACCESS != 0 {
            self.recoverable_access(dp, TransferDirection::Read, addr, 0)?;
            self.low_access(dp, TransferDirection::Read, RdBuff::ADDRESS, 0)
        } else {
            self.recoverable_access(dp, TransferDirection::Read, addr, 0)
        }
    }

    /// Writes a DP or AP register through one checked transaction.
    fn dp_write(&mut self, dp: &mut DebugPort, addr: u16, value: u32) -> Result<(), SwdError> {
        self.low_access(dp, TransferDirection::Write, addr, value)
            .map(|_| ())
    }

    /// Writes the ABORT register.
    fn abort(&mut self, dp: &mut DebugPort, value: u32) -> Result<(), SwdError> {
        self.dp_write(dp, Abort::ADDRESS, value)
    }

    /// A checked access that additionally recovers from a dead line.
    ///
    /// When the access draws no response at all, the target gets the response
    /// period to settle, a full protocol recovery is run and the access is
    /// retried once.
    fn recoverable_access(
        &mut self,
        dp: &mut DebugPort,
        direction: TransferDirection,
        addr: u16,
        value: u32,
    ) -> Result<u32, SwdError> {
        let result = self.low_access(dp, direction, addr, value)?;
        if dp.fault != Some(DpFault::NoResponse) {
            return Ok(result);
        }

        std::thread::sleep(Duration::from_millis(20));
        tracing::warn!("Recovering and retrying access");
        self.clear_error(dp, true)?;
        self.low_access(dp, direction, addr, value)
    }

    /// Reads DPIDR, mapping protocol loss to 0 ("nothing there").
    ///
    /// Backend I/O failures still propagate; only invalid-ACK and parity
    /// conditions are folded into the 0 result, as first contact and the
    /// multi-drop probe loop treat all three the same way.
    fn read_dpidr(&mut self, dp: &mut DebugPort) -> Result<u32, SwdError> {
        match self.low_access(dp, TransferDirection::Read, Dpidr::ADDRESS, 0) {
            Ok(dpidr) => Ok(dpidr),
            Err(SwdError::InvalidAck(_) | SwdError::IncorrectParity) => Ok(0),
            Err(error) => Err(error),
        }
    }
}

/// The SWD transport: owns the probe backend and implements the wire
/// protocol on top of its shift primitives.
///
/// One transport exists per debugger session and serialises all bus traffic.
/// [`close`](Self::close) hands the backend back for teardown.
#[derive(Debug)]
pub struct SwdTransport<L: SwdLink, C: Clock = MonotonicClock> {
    link: L,
    clock: C,
    settings: SwdSettings,
    statistics: ProbeStatistics,
}

impl<L: SwdLink> SwdTransport<L> {
    /// Creates a transport over `link` with default settings, measuring the
    /// retry budget against the system monotonic clock.
    pub fn new(link: L) -> Self {
        Self::with_clock(link, MonotonicClock::default())
    }
}

impl<L: SwdLink, C: Clock> SwdTransport<L, C> {
    /// Creates a transport with an explicit [`Clock`]. Test harnesses inject
    /// simulated time through this.
    pub fn with_clock(link: L, clock: C) -> Self {
        Self {
            link,
            clock,
            settings: SwdSettings::default(),
            statistics: ProbeStatistics::default(),
        }
    }

    /// The engine tunables.
    pub fn settings_mut(&mut self) -> &mut SwdSettings {
        &mut self.settings
    }

    /// Wire-traffic counters since construction.
    pub fn statistics(&self) -> &ProbeStatistics {
        &self.statistics
    }

    /// Tears the session down and returns the probe backend.
    pub fn close(self) -> L {
        self.link
    }

    pub(crate) fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub(crate) fn line_reset(&mut self, trailing_idle: bool) -> Result<(), LinkError> {
        self.statistics.num_line_resets += 1;
        sequences::line_reset(&mut self.link, trailing_idle)
    }

    /// One SWD transaction.
    ///
    /// WAIT and FAULT are retried within [`SwdSettings::ack_timeout`]; a FAULT
    /// retry first clears the sticky flags through ABORT so the repeat is not
    /// refused outright. Aborts issued from this loop take the no-ACK path,
    /// so this function never re-enters itself.
    fn raw_access(
        &mut self,
        dp: &mut DebugPort,
        direction: TransferDirection,
        addr: u16,
        value: u32,
    ) -> Result<u32, SwdError> {
        if addr & AP_ACCESS != 0 && dp.fault.is_some() {
            tracing::debug!("Refusing AP access with fault latched: {:?}", dp.fault);
            return Ok(0);
        }

        let request = build_request(direction, addr);
        let timeout = Timeout::after(&self.clock, self.settings.ack_timeout);

        let ack = loop {
            self.statistics.num_transfers += 1;
            self.link.seq_out(request.into(), 8)?;
            let ack = self.link.seq_in(3)? & 0b111;

            if ack == ACK_FAULT {
                self.statistics.num_faults += 1;
                tracing::error!("SWD access resulted in fault, retrying");
                // Clear the sticky flags so the repeat has a chance to go
                // through.
                let mut abort = Abort(0);
                abort.set_orunerrclr(true);
                abort.set_wderrclr(true);
                abort.set_stkerrclr(true);
                abort.set_stkcmpclr(true);
                self.write_no_check(Abort::ADDRESS, abort.into())?;
            } else if ack == ACK_WAIT {
                self.statistics.num_wait_resp += 1;
            } else {
                break ack;
            }

            if timeout.is_expired(&self.clock) {
                break ack;
            }
        };

        match ack {
            ACK_OK => {}
            ACK_WAIT => {
                tracing::error!("SWD access resulted in wait, aborting");
                let mut abort = Abort(0);
                abort.set_dapabort(true);
                self.write_no_check(Abort::ADDRESS, abort.into())?;
                dp.fault = Some(DpFault::Wait);
                return Ok(0);
            }
            ACK_FAULT => {
                tracing::error!("SWD access resulted in fault");
                dp.fault = Some(DpFault::Fault);
                return Ok(0);
            }
            ACK_NO_RESPONSE => {
                tracing::error!("SWD access resulted in no response");
                dp.fault = Some(DpFault::NoResponse);
                return Ok(0);
            }
            invalid => {
                tracing::error!("SWD access has invalid ack {invalid:#x}");
                return Err(SwdError::InvalidAck(invalid as u8));
            }
        }

        let mut response = 0;
        match direction {
            TransferDirection::Read => {
                let (data, parity_ok) = self.link.seq_in_parity(32)?;
                if !parity_ok {
                    // Give up on the access; the data cannot be trusted.
                    dp.fault = Some(DpFault::Parity);
                    tracing::error!("SWD access resulted in parity error");
                    return Err(SwdError::IncorrectParity);
                }
                response = data;
            }
            TransferDirection::Write => self.link.seq_out_parity(value, 32)?,
        }

        // Clock the data through the SW-DP.
        self.link.seq_out(0, IDLE_CYCLES_AFTER_TRANSFER)?;

        Ok(response)
    }
}

impl<L: SwdLink, C: Clock> RawDapAccess for SwdTransport<L, C> {
    fn low_access(
        &mut self,
        dp: &mut DebugPort,
        direction: TransferDirection,
        addr: u16,
        value: u32,
    ) -> Result<u32, SwdError> {
        self.raw_access(dp, direction, addr, value)
    }

    fn write_no_check(&mut self, addr: u16, value: u32) -> Result<bool, SwdError> {
        let request = build_request(TransferDirection::Write, addr);

        self.statistics.num_transfers += 1;
        self.link.seq_out(request.into(), 8)?;
        let ack = self.link.seq_in(3)?;
        self.link.seq_out_parity(value, 32)?;
        self.link.seq_out(0, IDLE_CYCLES_AFTER_TRANSFER)?;

        Ok(ack != ACK_OK)
    }

    fn read_no_check(&mut self, addr: u16) -> Result<u32, SwdError> {
        let request = build_request(TransferDirection::Read, addr);

        self.statistics.num_transfers += 1;
        self.link.seq_out(request.into(), 8)?;
        let ack = self.link.seq_in(3)?;
        let (data, _parity_ok) = self.link.seq_in_parity(32)?;
        self.link.seq_out(0, IDLE_CYCLES_AFTER_TRANSFER)?;

        Ok(if ack == ACK_OK { data } else { 0 })
    }

    fn clear_error(
        &mut self,
        dp: &mut DebugPort,
        protocol_recovery: bool,
    ) -> Result<u32, SwdError> {
        tracing::debug!("Clearing sticky errors (protocol recovery: {protocol_recovery})");

        // The comms reset dance applies on DPv2+ with a latched fault, or
        // whenever a full protocol recovery was requested.
        if (dp.version.supports_multidrop() && dp.fault.is_some()) || protocol_recovery {
            // On DPv2+ the line reset deselects the target; it has to be
            // reselected before anything but TARGETSEL or DPIDR goes on the
            // bus.
            self.line_reset(true)?;
            if dp.version.supports_multidrop() {
                self.write_no_check(TargetSel::ADDRESS, dp.targetsel)?;
            }
            self.low_access(dp, TransferDirection::Read, Dpidr::ADDRESS, 0)?;
        }

        let err = self.read_no_check(Ctrl::ADDRESS)?;
        if err == 0 {
            // The status read failed outright; most likely a protocol error.
            if !protocol_recovery {
                return self.clear_error(dp, true);
            }
            // Recovery already ran and the port still does not answer.
            return Ok(CTRLSTAT_ERRMASK);
        }

        let status = Ctrl(err);
        let mut clear = Abort(0);
        clear.set_orunerrclr(status.sticky_orun());
        clear.set_stkcmpclr(status.sticky_cmp());
        clear.set_stkerrclr(status.sticky_err());
        clear.set_wderrclr(status.wdataerr());

        if u32::from(clear) != 0 {
            self.write_no_check(Abort::ADDRESS, clear.into())?;
        }
        dp.fault = None;

        Ok(err & CTRLSTAT_ERRMASK)
    }
}
