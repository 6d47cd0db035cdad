//! Fixed SWJ wire patterns: line reset and the protocol entry handshakes.
//!
//! All values come from the ARM Debug Interface Architecture Specification,
//! ADIv5.0 to ADIv5.2, ARM IHI 0031C.

use crate::link::{LinkError, SwdLink};

/// JTAG-to-dormant sequence (§B5.3.2), three parts shifted in order:
/// 5 cycles TMS high, the 31-bit magic, 8 cycles TMS high.
pub const JTAG_TO_DORMANT: [(u32, u8); 3] = [(0x1f, 5), (0x33bb_bbba, 31), (0xff, 8)];

/// The 128-bit Selection Alert (§B5.3.4), four 32-bit halves shifted in
/// order.
pub const SELECTION_ALERT: [u32; 4] = [0x6209_f392, 0x8685_2d95, 0xe3dd_afe9, 0x19bc_0ea2];

/// Activation code selecting the ARM SWD-DP after a Selection Alert.
pub const ACTIVATION_CODE_ARM_SWD: u32 = 0x1a;

/// The deprecated 16-bit JTAG-to-SWD select sequence (§5.2.1).
pub const JTAG_TO_SWD_SELECT: u32 = 0xe79e;

/// Holds the data line HIGH long enough to force every DP on the bus into
/// line reset, optionally followed by idle cycles.
///
/// The specification asks for at least 50 HIGH cycles and at least 2 idle
/// cycles. Some non-conformant parts (STM32) want 51+ HIGH and 3-4 idle
/// cycles, so 60 HIGH and 4 idle are used.
pub(crate) fn line_reset<L: SwdLink>(link: &mut L, trailing_idle: bool) -> Result<(), LinkError> {
    link.seq_out(0xffff_ffff, 32)?;
    link.seq_out(0x0fff_ffff, if trailing_idle { 32 } else { 28 })
}

/// Switches the bus out of dormant state into SWD (§B5.3.4).
pub(crate) fn dormant_to_swd<L: SwdLink>(link: &mut L) -> Result<(), LinkError> {
    // At least 8 cycles with SWDIOTMS HIGH first; a full line reset does.
    line_reset(link, false)?;

    // A SWJ-DP that defaults to JTAG has to go JTAG -> dormant first
    // (§B5.3.2).
    tracing::info!("Switching from JTAG to dormant");
    for (bits, cycles) in JTAG_TO_DORMANT {
        link.seq_out(bits, cycles)?;
    }

    tracing::info!("Switching out of dormant state into SWD");
    for half in SELECTION_ALERT {
        link.seq_out(half, 32)?;
    }

    // 4 cycles with SWDIOTMS LOW, then the 8-bit activation code. Combined
    // into a single 12-bit shift with the code above the pad.
    link.seq_out(ACTIVATION_CODE_ARM_SWD << 4, 12)?;

    // Selecting SWD leaves the target in the protocol error state; a line
    // reset brings the interface to a known state.
    line_reset(link, true)
}

/// Switches a SWJ-DP from JTAG to SWD with the deprecated select sequence
/// (§5.2.1).
///
/// ARM deprecates this on parts that implement the dormant state; it remains
/// the only way in for older parts that power up in JTAG.
pub(crate) fn jtag_to_swd<L: SwdLink>(link: &mut L) -> Result<(), LinkError> {
    tracing::warn!("Deprecated JTAG to SWD sequence");

    // The interface must be in reset state first.
    line_reset(link, false)?;

    link.seq_out(JTAG_TO_SWD_SELECT, 16)?;

    // If a SWJ-DP was already operating in SWD, this leaves it in line reset
    // instead of half-way through a transaction.
    line_reset(link, true)
}
