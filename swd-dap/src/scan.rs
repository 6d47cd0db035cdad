//! First contact: dormant wake-up, DPIDR discovery and multi-drop
//! enumeration.

use crate::{
    dp::{
        Abort, DebugPort, DebugPortId, DebugPortVersion, Dpidr, Register, Select, TargetId,
        TargetSel, DP_BANK0, DP_BANK2, TARGETID_TDESIGNER_MASK, TARGETID_TPARTNO_MASK,
    },
    link::SwdLink,
    sequences,
    time::Clock,
    transport::{RawDapAccess, SwdError, SwdTransport},
};

/// The DP/AP semantic layer that takes over a debug port after link-up.
///
/// Implementations stay generic over [`RawDapAccess`], so the same logic runs
/// over an SWD or a JTAG transport.
pub trait DpCore {
    /// Drops every debug port discovered by a previous scan.
    fn release_targets(&mut self);

    /// Takes ownership of a freshly discovered debug port and runs the DP
    /// initialisation on it (power-up, AP enumeration, ...).
    ///
    /// Ports already handed over stay valid even when a later instance of the
    /// same scan fails.
    fn dp_init(&mut self, access: &mut dyn RawDapAccess, dp: DebugPort) -> Result<(), SwdError>;
}

impl<L: SwdLink, C: Clock> SwdTransport<L, C> {
    /// Brings the bus out of dormant state and enumerates the debug ports on
    /// it, handing each one to [`DpCore::dp_init`].
    ///
    /// `targetid` preselects a known multi-drop target and skips the blind
    /// DPIDR probe (required on buses where several targets would answer at
    /// once). Returns the number of ports handed over; first contact with a
    /// completely silent bus fails with [`SwdError::NoDpFound`].
    pub fn scan(&mut self, targetid: Option<u32>, core: &mut dyn DpCore) -> Result<usize, SwdError> {
        core.release_targets();

        let mut dp = DebugPort::new();

        self.link_mut().init()?;
        self.link_mut().target_clock_output(true)?;

        sequences::dormant_to_swd(self.link_mut())?;

        let mut dp_targetid = targetid.unwrap_or(0);

        if targetid.is_none() {
            // A multi-drop bus cannot be interrogated blind: all DPs are
            // selected coming out of line reset and would drive the line
            // together (§4.2.6). Without prior knowledge the best first move
            // is a plain DPIDR read, retried once over the deprecated
            // JTAG-to-SWD switch for parts that power up in JTAG.
            let mut tried_jtag_to_swd = false;
            let dpidr = loop {
                let dpidr = self.read_dpidr(&mut dp)?;
                if dpidr != 0 {
                    break dpidr;
                }

                if !tried_jtag_to_swd {
                    sequences::jtag_to_swd(self.link_mut())?;
                    dp.fault = None;
                    tried_jtag_to_swd = true;
                    continue;
                }

                tracing::error!("No usable DP found");
                return Err(SwdError::NoDpFound);
            };

            // The version field steers protocol recovery from here on.
            dp.version = DebugPortVersion::from(Dpidr(dpidr).version());
            tracing::info!("Found {:x?}", DebugPortId::from(Dpidr(dpidr)));

            if dp.version.supports_multidrop() {
                // TARGETID lives on bank 2 and is readable with the part in
                // WFI, sleep or reset.
                self.dp_write(&mut dp, Select::ADDRESS, DP_BANK2)?;
                dp_targetid = self.dp_read(&mut dp, TargetId::ADDRESS)?;
                self.dp_write(&mut dp, Select::ADDRESS, DP_BANK0)?;
            }
        }

        // A user-supplied target ID or a DPv2+ part means multi-drop.
        if targetid.is_some() || dp.version.supports_multidrop() {
            self.multidrop_scan(dp, dp_targetid, core)
        } else {
            let mut clear = Abort(0);
            clear.set_stkerrclr(true);
            self.abort(&mut dp, clear.into())?;

            core.dp_init(self, dp)?;
            Ok(1)
        }
    }

    /// Probes all 16 instance IDs on a multi-drop bus.
    ///
    /// Instance IDs are unique by construction, which bounds a bus at 16 DPs;
    /// identical parts must have distinct instance IDs configured before they
    /// share a bus (§4.2.6).
    fn multidrop_scan(
        &mut self,
        mut seed: DebugPort,
        targetid: u32,
        core: &mut dyn DpCore,
    ) -> Result<usize, SwdError> {
        tracing::info!("Handling SWD multi-drop, TARGETID {targetid:#010x}");

        let mut found = 0;

        for instance in 0..16u8 {
            // A TARGETSEL write immediately following a line reset selects
            // the target whose DLPIDR instance and TARGETID fields match; any
            // other value deselects it. The target does not drive the line
            // during the response phase.
            self.line_reset(true)?;
            seed.fault = None;

            let mut select =
                TargetSel(targetid & (TARGETID_TDESIGNER_MASK | TARGETID_TPARTNO_MASK));
            select.set_instance(instance);
            select.set_sbo(true);
            let select = u32::from(select);

            self.write_no_check(TargetSel::ADDRESS, select)?;

            if self.read_dpidr(&mut seed)? == 0 {
                // No DP on this instance.
                continue;
            }

            // Populate a dedicated DP for the instance and yield it.
            let mut dp = seed.clone();
            dp.dev_index = instance;
            dp.targetsel = select;

            let mut clear = Abort(0);
            clear.set_stkerrclr(true);
            self.abort(&mut dp, clear.into())?;

            core.dp_init(self, dp)?;
            found += 1;
        }

        Ok(found)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::DpCore;
    use crate::{
        dp::{DebugPort, DebugPortVersion},
        sequences::{JTAG_TO_SWD_SELECT, SELECTION_ALERT},
        testing::{transport_over, MockLink, Response},
        transport::{RawDapAccess, SwdError},
    };

    const DPIDR_DPV1: u32 = 0x0bb1_1477;
    const DPIDR_DPV2: u32 = 0x0bc1_2477;
    const TARGETID: u32 = 0x0100_2927;

    #[derive(Default)]
    struct RecordingCore {
        released: usize,
        inited: Vec<DebugPort>,
    }

    impl DpCore for RecordingCore {
        fn release_targets(&mut self) {
            self.released += 1;
        }

        fn dp_init(
            &mut self,
            _access: &mut dyn RawDapAccess,
            dp: DebugPort,
        ) -> Result<(), SwdError> {
            self.inited.push(dp);
            Ok(())
        }
    }

    #[test]
    fn single_drop_dpv1() {
        // DPIDR answers on the first read: no JTAG fallback, no multi-drop,
        // one hand-off.
        let mut transport = transport_over(MockLink::scripted([
            Response::ok(DPIDR_DPV1),
            Response::ok(0),
        ]));
        let mut core = RecordingCore::default();

        let found = transport.scan(None, &mut core).unwrap();

        assert_eq!(found, 1);
        assert_eq!(core.released, 1);
        assert_eq!(core.inited.len(), 1);
        assert_eq!(core.inited[0].version, DebugPortVersion::DPv1);
        assert_eq!(core.inited[0].dev_index, 0);
        assert_eq!(core.inited[0].targetsel, 0);

        let link = transport.close();
        assert_eq!(link.init_calls, 1);
        assert_eq!(link.clock_output, Some(true));
        // DPIDR read, then the sticky clear before the hand-off.
        assert_eq!(link.requests(), vec![0xa5, 0x81]);
        // The dormant entry went out in full...
        for half in SELECTION_ALERT {
            assert_eq!(link.count_shifts(half, 32), 1);
        }
        assert_eq!(link.count_shifts(0x1a0, 12), 1);
        // ...and the deprecated fallback was never needed.
        assert_eq!(link.count_shifts(JTAG_TO_SWD_SELECT, 16), 0);
    }

    #[test]
    fn cold_jtag_target_falls_back_once() {
        // Nothing answers the first DPIDR read; after the JTAG-to-SWD select
        // sequence the part talks.
        let mut transport = transport_over(MockLink::scripted([
            Response::silent(),
            Response::ok(DPIDR_DPV1),
            Response::ok(0),
        ]));
        let mut core = RecordingCore::default();

        let found = transport.scan(None, &mut core).unwrap();

        assert_eq!(found, 1);
        assert_eq!(core.inited.len(), 1);

        let link = transport.close();
        assert_eq!(link.count_shifts(JTAG_TO_SWD_SELECT, 16), 1);
    }

    #[test]
    fn multidrop_two_of_sixteen() {
        let mut link = MockLink::scripted([
            // First contact and TARGETID discovery.
            Response::ok(DPIDR_DPV2),
            Response::ok(0),        // SELECT <- bank 2
            Response::ok(TARGETID), // TARGETID
            Response::ok(0),        // SELECT <- bank 0
        ]);
        for instance in 0..16u32 {
            // The TARGETSEL write itself is never acknowledged.
            link.responses.push_back(Response::silent());
            if instance == 3 || instance == 9 {
                link.responses.push_back(Response::ok(DPIDR_DPV2));
                link.responses.push_back(Response::ok(0)); // sticky clear
            } else {
                link.responses.push_back(Response::silent());
            }
        }
        let mut transport = transport_over(link);
        let mut core = RecordingCore::default();

        let found = transport.scan(None, &mut core).unwrap();

        assert_eq!(found, 2);
        assert_eq!(core.inited.len(), 2);
        assert_eq!(core.inited[0].dev_index, 3);
        assert_eq!(core.inited[1].dev_index, 9);
        assert_eq!(core.inited[0].targetsel, 0x3100_2927);
        assert_eq!(core.inited[1].targetsel, 0x9100_2927);
        assert!(core
            .inited
            .iter()
            .all(|dp| dp.version == DebugPortVersion::DPv2));

        // All 16 instances got a TARGETSEL write, each after its own line
        // reset.
        let link = transport.close();
        let targetsel_writes = link.requests().iter().filter(|&&req| req == 0x99).count();
        assert_eq!(targetsel_writes, 16);
        assert_eq!(
            link.written.iter().filter(|&&(value, _)| value & 0x0fff_ffff == TARGETID).count(),
            16
        );
    }

    #[test]
    fn dead_bus_fails_after_one_fallback() {
        let mut link = MockLink::default();
        link.default_response = Some(Response::silent());
        let mut transport = transport_over(link);
        let mut core = RecordingCore::default();

        let result = transport.scan(None, &mut core);

        assert!(matches!(result, Err(SwdError::NoDpFound)));
        assert_eq!(core.released, 1);
        assert_eq!(core.inited.len(), 0);

        // Exactly one fallback attempt before giving up.
        let link = transport.close();
        assert_eq!(link.count_shifts(JTAG_TO_SWD_SELECT, 16), 1);
    }
}
