//! ADIv5 debug port registers and per-port state.

use bitfield::bitfield;
use jep106::JEP106Code;

/// Flag within a 16-bit register address selecting the AP address space.
///
/// The lower four bits carry A[3:0]; a set bit 8 makes the access an AP
/// access.
pub const AP_ACCESS: u16 = 0x100;

/// SELECT value putting DPBANKSEL on bank 0.
pub const DP_BANK0: u32 = 0;
/// SELECT value putting DPBANKSEL on bank 2, where TARGETID lives.
pub const DP_BANK2: u32 = 2;

/// The sticky error bits of CTRL/STAT: STICKYORUN, STICKYCMP, STICKYERR and
/// WDATAERR.
///
/// Also returned by [`clear_error`](crate::RawDapAccess::clear_error) as a
/// whole when a port cannot be recovered.
pub const CTRLSTAT_ERRMASK: u32 = 0x0000_00b2;

/// TDESIGNER field of TARGETID.
pub const TARGETID_TDESIGNER_MASK: u32 = 0x0000_0ffe;
/// TPARTNO field of TARGETID.
pub const TARGETID_TPARTNO_MASK: u32 = 0x0fff_f000;

/// A typed debug port register.
pub trait Register: From<u32> + Into<u32> + Sized {
    /// Register address as it appears in the request header. For banked
    /// registers this is the in-bank address; bank switching is the caller's
    /// business.
    const ADDRESS: u16;
    /// Name of the register, for diagnostics.
    const NAME: &'static str;
}

bitfield! {
    /// The DPIDR identification register (read-only, address `0x0`).
    #[derive(Clone, Copy)]
    pub struct Dpidr(u32);
    impl Debug;
    /// Implementation-defined revision.
    pub u8, revision, _: 31, 28;
    /// Part number of the DP.
    pub u8, partno, _: 27, 20;
    /// Minimal DP implementation (no transaction counter, pushed-verify, ...).
    pub min, _: 16;
    /// DP architecture version.
    pub u8, version, _: 15, 12;
    /// JEP106 designer in its packed form.
    pub u16, designer, _: 11, 1;
    u8, jep_cc, _: 11, 8;
    u8, jep_id, _: 7, 1;
}

impl From<u32> for Dpidr {
    fn from(raw: u32) -> Self {
        Dpidr(raw)
    }
}

impl From<Dpidr> for u32 {
    fn from(raw: Dpidr) -> Self {
        raw.0
    }
}

impl Register for Dpidr {
    const ADDRESS: u16 = 0x0;
    const NAME: &'static str = "DPIDR";
}

bitfield! {
    /// The ABORT register (write-only, address `0x0`).
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    /// Clear STICKYORUN.
    pub orunerrclr, set_orunerrclr: 4;
    /// Clear WDATAERR.
    pub wderrclr, set_wderrclr: 3;
    /// Clear STICKYERR.
    pub stkerrclr, set_stkerrclr: 2;
    /// Clear STICKYCMP.
    pub stkcmpclr, set_stkcmpclr: 1;
    /// Abort the current AP transaction.
    pub dapabort, set_dapabort: 0;
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

impl Register for Abort {
    const ADDRESS: u16 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    /// The CTRL/STAT register (address `0x4`, bank 0).
    #[derive(Clone, Copy)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub cdbgrstack, _: 27;
    pub cdbgrstreq, set_cdbgrstreq: 26;
    pub u16, trn_cnt, set_trn_cnt: 23, 12;
    pub u8, mask_lane, set_mask_lane: 11, 8;
    /// A write was discarded.
    pub wdataerr, _: 7;
    pub read_ok, _: 6;
    /// An AP transaction ended in error.
    pub sticky_err, _: 5;
    /// A pushed-compare or pushed-verify mismatched.
    pub sticky_cmp, _: 4;
    pub u8, trn_mode, _: 3, 2;
    /// An overrun was detected.
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

impl Register for Ctrl {
    const ADDRESS: u16 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    /// The TARGETID register (read-only, address `0x4`, bank 2; DPv2+).
    #[derive(Clone, Copy)]
    pub struct TargetId(u32);
    impl Debug;
    /// Target revision.
    pub u8, trevision, _: 31, 28;
    /// Designer-assigned part number.
    pub u16, tpartno, _: 27, 12;
    /// JEP106 code of the designer, packed.
    pub u16, tdesigner, _: 11, 1;
}

impl From<u32> for TargetId {
    fn from(raw: u32) -> Self {
        TargetId(raw)
    }
}

impl From<TargetId> for u32 {
    fn from(raw: TargetId) -> Self {
        raw.0
    }
}

impl Register for TargetId {
    const ADDRESS: u16 = 0x4;
    const NAME: &'static str = "TARGETID";
}

bitfield! {
    /// The SELECT register (write-only, address `0x8`).
    #[derive(Clone, Copy)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

impl Register for Select {
    const ADDRESS: u16 = 0x8;
    const NAME: &'static str = "SELECT";
}

bitfield! {
    /// The TARGETSEL register (write-only, address `0xC`; DPv2+).
    ///
    /// Written immediately after a line reset to pick one target on a
    /// multi-drop bus. The target does not drive the line during the response
    /// phase, so the write has no observable ACK.
    #[derive(Clone, Copy)]
    pub struct TargetSel(u32);
    impl Debug;
    /// Instance ID, matched against DLPIDR[31:28].
    pub u8, instance, set_instance: 31, 28;
    /// Part number, matched against TARGETID[27:12].
    pub u16, tpartno, set_tpartno: 27, 12;
    /// Designer, matched against TARGETID[11:1].
    pub u16, tdesigner, set_tdesigner: 11, 1;
    /// Should-be-one bit.
    pub sbo, set_sbo: 0;
}

impl From<u32> for TargetSel {
    fn from(raw: u32) -> Self {
        TargetSel(raw)
    }
}

impl From<TargetSel> for u32 {
    fn from(raw: TargetSel) -> Self {
        raw.0
    }
}

impl Register for TargetSel {
    const ADDRESS: u16 = 0xc;
    const NAME: &'static str = "TARGETSEL";
}

/// The RDBUFF register (read-only, address `0xC`): returns the posted result
/// of the previous AP read without generating a new access.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdBuff(pub u32);

impl From<u32> for RdBuff {
    fn from(raw: u32) -> Self {
        RdBuff(raw)
    }
}

impl From<RdBuff> for u32 {
    fn from(raw: RdBuff) -> Self {
        raw.0
    }
}

impl Register for RdBuff {
    const ADDRESS: u16 = 0xc;
    const NAME: &'static str = "RDBUFF";
}

/// Decoded DP architecture version from DPIDR[15:12].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugPortVersion {
    /// JTAG-era DP without DPIDR semantics.
    DPv0,
    /// First SWD-capable version.
    DPv1,
    /// Adds the dormant state, TARGETID and multi-drop.
    DPv2,
    /// The ADIv6 debug port.
    DPv3,
    /// A version this crate does not know about.
    Unsupported(u8),
}

impl DebugPortVersion {
    /// Multi-drop selection, and with it the reselect dance after a line
    /// reset, applies from DPv2 upwards.
    pub fn supports_multidrop(self) -> bool {
        matches!(self, DebugPortVersion::DPv2 | DebugPortVersion::DPv3)
    }
}

impl From<u8> for DebugPortVersion {
    fn from(value: u8) -> Self {
        match value {
            0 => DebugPortVersion::DPv0,
            1 => DebugPortVersion::DPv1,
            2 => DebugPortVersion::DPv2,
            3 => DebugPortVersion::DPv3,
            other => DebugPortVersion::Unsupported(other),
        }
    }
}

impl std::fmt::Display for DebugPortVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DebugPortVersion::DPv0 => write!(f, "DPv0"),
            DebugPortVersion::DPv1 => write!(f, "DPv1"),
            DebugPortVersion::DPv2 => write!(f, "DPv2"),
            DebugPortVersion::DPv3 => write!(f, "DPv3"),
            DebugPortVersion::Unsupported(version) => write!(f, "<unsupported ({version})>"),
        }
    }
}

/// Whether the DP is a minimal implementation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MinDpSupport {
    /// A full DP implementation.
    NotImplemented,
    /// MINDP: transaction counter, pushed-verify and pushed-find are absent.
    Implemented,
}

impl From<bool> for MinDpSupport {
    fn from(bit_set: bool) -> Self {
        if bit_set {
            MinDpSupport::Implemented
        } else {
            MinDpSupport::NotImplemented
        }
    }
}

/// Fully decoded DPIDR content.
#[derive(Debug)]
pub struct DebugPortId {
    /// Implementation-defined revision.
    pub revision: u8,
    /// Part number of the DP.
    pub part_no: u8,
    /// DP architecture version.
    pub version: DebugPortVersion,
    /// Minimal DP implementation or not.
    pub min_dp_support: MinDpSupport,
    /// The designer of the DP (not of the chip around it).
    pub designer: JEP106Code,
}

impl From<Dpidr> for DebugPortId {
    fn from(dpidr: Dpidr) -> DebugPortId {
        DebugPortId {
            revision: dpidr.revision(),
            part_no: dpidr.partno(),
            version: dpidr.version().into(),
            min_dp_support: dpidr.min().into(),
            designer: JEP106Code::new(dpidr.jep_cc(), dpidr.jep_id()),
        }
    }
}

/// The latched outcome of a failed transaction on a debug port.
///
/// While a fault is latched, the transport refuses new AP accesses until
/// [`clear_error`](crate::RawDapAccess::clear_error) has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpFault {
    /// The retry budget ran out with the target still answering WAIT.
    Wait,
    /// The target answered FAULT; a sticky error is pending.
    Fault,
    /// Nothing drove the line.
    NoResponse,
    /// Read data failed its parity check.
    Parity,
}

/// Mutable per-debug-port state.
///
/// One of these exists per physically distinct DP. Ownership moves to
/// [`DpCore::dp_init`](crate::DpCore::dp_init) once the port has answered;
/// the seed used to drive a scan is dropped when the scan completes.
#[derive(Debug, Clone)]
pub struct DebugPort {
    /// Decoded DPIDR version field.
    pub version: DebugPortVersion,
    /// Last non-OK outcome, cleared by a successful
    /// [`clear_error`](crate::RawDapAccess::clear_error).
    pub fault: Option<DpFault>,
    /// The TARGETSEL value this DP was selected with; 0 on a single-drop bus.
    ///
    /// Bits `[31:28]` equal [`dev_index`](Self::dev_index), bits `[27:0]` the
    /// TARGETID designer/partno fields.
    pub targetsel: u32,
    /// 4-bit instance index assigned during the multi-drop scan.
    pub dev_index: u8,
}

impl DebugPort {
    /// A blank debug port, before first contact.
    pub fn new() -> Self {
        Self {
            version: DebugPortVersion::DPv0,
            fault: None,
            targetsel: 0,
            dev_index: 0,
        }
    }
}

impl Default for DebugPort {
    fn default() -> Self {
        Self::new()
    }
}
