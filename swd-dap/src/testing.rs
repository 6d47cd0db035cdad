//! Mock probe backend and simulated clock for the protocol tests.

use std::{cell::Cell, collections::VecDeque, rc::Rc, time::Duration};

use crate::{
    link::{LinkError, SwdLink},
    time::Clock,
    transport::{SwdTransport, ACK_NO_RESPONSE, ACK_FAULT, ACK_OK, ACK_WAIT},
};

/// A clock over shared, manually advanced time.
#[derive(Debug, Clone, Default)]
pub(crate) struct TestClock {
    now: Rc<Cell<Duration>>,
}

impl TestClock {
    pub(crate) fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// The scripted outcome of one transaction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Response {
    pub ack: u32,
    pub data: u32,
    pub parity_ok: bool,
}

impl Response {
    pub(crate) fn ok(data: u32) -> Self {
        Self {
            ack: ACK_OK,
            data,
            parity_ok: true,
        }
    }

    pub(crate) fn wait() -> Self {
        Self {
            ack: ACK_WAIT,
            data: 0,
            parity_ok: true,
        }
    }

    pub(crate) fn fault() -> Self {
        Self {
            ack: ACK_FAULT,
            data: 0,
            parity_ok: true,
        }
    }

    /// Nobody drives the line: an all-ones ACK.
    pub(crate) fn silent() -> Self {
        Self {
            ack: ACK_NO_RESPONSE,
            data: 0,
            parity_ok: true,
        }
    }

    pub(crate) fn bad_parity(data: u32) -> Self {
        Self {
            ack: ACK_OK,
            data,
            parity_ok: false,
        }
    }
}

/// A mock [`SwdLink`] that scripts one [`Response`] per transaction and
/// records everything shifted out.
///
/// A transaction starts whenever a request byte goes out (8 cycles, start and
/// park set, stop clear); that pops the next scripted response, which then
/// feeds the ACK and data phases. All other output shifts (line resets, entry
/// sequences, idle cycles) are recorded verbatim.
#[derive(Debug, Default)]
pub(crate) struct MockLink {
    pub responses: VecDeque<Response>,
    /// Used once the scripted responses run out.
    pub default_response: Option<Response>,
    current: Option<Response>,

    /// Every `seq_out` as `(bits, cycles)`.
    pub shifted_out: Vec<(u32, u8)>,
    /// Every `seq_out_parity` as `(bits, cycles)`.
    pub written: Vec<(u32, u8)>,
    pub init_calls: usize,
    pub clock_output: Option<bool>,

    pub clock: TestClock,
    /// Simulated time each transaction costs.
    pub time_per_transaction: Duration,
}

impl MockLink {
    pub(crate) fn scripted(responses: impl IntoIterator<Item = Response>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            ..Self::default()
        }
    }

    /// The request bytes shifted out, in order.
    pub(crate) fn requests(&self) -> Vec<u8> {
        self.shifted_out
            .iter()
            .filter(|&&(bits, cycles)| cycles == 8 && bits & 0xc1 == 0x81)
            .map(|&(bits, _)| bits as u8)
            .collect()
    }

    pub(crate) fn count_shifts(&self, bits: u32, cycles: u8) -> usize {
        self.shifted_out
            .iter()
            .filter(|&&shift| shift == (bits, cycles))
            .count()
    }
}

impl SwdLink for MockLink {
    fn init(&mut self) -> Result<(), LinkError> {
        self.init_calls += 1;
        Ok(())
    }

    fn seq_out(&mut self, bits: u32, cycles: u8) -> Result<(), LinkError> {
        if cycles == 8 && bits & 0xc1 == 0x81 {
            self.current = self.responses.pop_front().or(self.default_response);
            self.clock.advance(self.time_per_transaction);
        }
        self.shifted_out.push((bits, cycles));
        Ok(())
    }

    fn seq_out_parity(&mut self, bits: u32, cycles: u8) -> Result<(), LinkError> {
        self.written.push((bits, cycles));
        Ok(())
    }

    fn seq_in(&mut self, cycles: u8) -> Result<u32, LinkError> {
        assert_eq!(cycles, 3, "the only input burst without parity is the ACK");
        Ok(self.current.map(|response| response.ack).unwrap_or(ACK_NO_RESPONSE))
    }

    fn seq_in_parity(&mut self, cycles: u8) -> Result<(u32, bool), LinkError> {
        assert_eq!(cycles, 32, "data phases are 32 bits");
        let response = self
            .current
            .expect("data phase without a scripted response");
        Ok((response.data, response.parity_ok))
    }

    fn target_clock_output(&mut self, enable: bool) -> Result<(), LinkError> {
        self.clock_output = Some(enable);
        Ok(())
    }
}

/// Builds a transport whose retry budget runs on the mock's simulated time.
pub(crate) fn transport_over(link: MockLink) -> SwdTransport<MockLink, TestClock> {
    let clock = link.clock.clone();
    SwdTransport::with_clock(link, clock)
}
