use embedded_hal::spi::SpiDevice;

/// Byte transfer primitive the driver talks to the device through.
///
/// The bus is full duplex: `transfer` clocks every byte of `buf` out and
/// overwrites it with the byte clocked in at the same time. It returns how
/// many bytes of `buf` were actually received. Bridges that can deliver a
/// short read (USB adapters, bit banged buses) report it here and the driver
/// turns it into a framing error.
///
/// One command/response exchange spans two calls: a single byte carrying
/// the opcode, then, after the command's settle delay, the parameter bytes
/// or the zero bytes clocked out to read the response. Commands with no
/// settle delay and no parameters (ping, bootloader) use only the first.
/// A stub serving one `laser_on` therefore sees `[0x03]` and then `[0x02]`.
pub trait Transport {
    type Error;

    fn transfer(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// [`Transport`] over an `embedded-hal` SPI device.
///
/// The device must already be configured for SPI mode 1.
pub struct SpiTransport<SPI> {
    spi: SPI,
}

impl<SPI: SpiDevice> SpiTransport<SPI> {
    pub fn new(spi: SPI) -> Self {
        Self { spi }
    }

    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> Transport for SpiTransport<SPI> {
    type Error = SPI::Error;

    fn transfer(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.spi.transfer_in_place(buf)?;
        Ok(buf.len())
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use embedded_hal::delay::DelayNs;

    use super::Transport;

    /// One bus or delay event, in the order the driver caused it.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Step {
        /// Bytes clocked out.
        Transfer(Vec<u8>),
        /// Wait [µs].
        Delay(u32),
    }

    type Trace = Rc<RefCell<Vec<Step>>>;

    /// Delay that only records how long it was asked to wait.
    pub struct RecordingDelay {
        trace: Trace,
    }

    impl DelayNs for RecordingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.trace.borrow_mut().push(Step::Delay(ns / 1_000));
        }

        fn delay_us(&mut self, us: u32) {
            self.trace.borrow_mut().push(Step::Delay(us));
        }
    }

    /// Bus failure injected by [`ScriptedBus`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BusFault;

    /// Transport stub answering each transfer with the next scripted reply.
    ///
    /// Replies shorter than the transfer simulate truncated frames.
    #[derive(Default)]
    pub struct ScriptedBus {
        replies: VecDeque<Result<Vec<u8>, BusFault>>,
        pub sent: Vec<Vec<u8>>,
        trace: Trace,
    }

    impl ScriptedBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(&mut self, bytes: &[u8]) -> &mut Self {
            self.replies.push_back(Ok(bytes.to_vec()));
            self
        }

        pub fn fail(&mut self) -> &mut Self {
            self.replies.push_back(Err(BusFault));
            self
        }

        pub fn transfers(&self) -> usize {
            self.sent.len()
        }

        /// A delay whose waits are interleaved with this bus's transfers.
        pub fn delay(&self) -> RecordingDelay {
            RecordingDelay {
                trace: Rc::clone(&self.trace),
            }
        }

        /// Drains the transfers and waits recorded so far.
        pub fn take_steps(&self) -> Vec<Step> {
            std::mem::take(&mut *self.trace.borrow_mut())
        }
    }

    impl Transport for ScriptedBus {
        type Error = BusFault;

        fn transfer(&mut self, buf: &mut [u8]) -> Result<usize, BusFault> {
            self.sent.push(buf.to_vec());
            self.trace.borrow_mut().push(Step::Transfer(buf.to_vec()));
            let reply = self
                .replies
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected transfer {:02x?}", buf))?;
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }
    }
}
