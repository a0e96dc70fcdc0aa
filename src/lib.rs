//! embedded-hal driver for the Alphasense OPC-N2 optical particle counter.
//!
//! The OPC-N2 talks SPI mode 1. Every operation is a single command and
//! response exchange: the command byte, a settle delay, then the parameter
//! bytes or the fixed length response. The driver classifies the firmware
//! from the info string during [`Opc::init`] and decodes histograms with the
//! frame layout of that firmware.
//!
//! ## Example
//!
//! ```no_run
//! use embedded_hal::delay::DelayNs;
//! use embedded_hal::spi::SpiDevice;
//! use opc_n2::{Error, Opc, SpiTransport};
//!
//! fn sample<SPI: SpiDevice, D: DelayNs>(spi: SPI, delay: D) -> Result<(), Error<SPI::Error>> {
//!     let mut opc = Opc::connect(SpiTransport::new(spi), delay)?;
//!     opc.on()?;
//!     let reading = opc.read_histogram()?;
//!     if reading.is_valid() {
//!         let _pm2_5 = reading.pm.pm2_5;
//!     }
//!     opc.off()?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), no_std)]

mod checksum;
pub mod commands;
pub mod concentration;
pub mod decode;
pub mod firmware;
mod transport;
mod types;

use embedded_hal::delay::DelayNs;
use log::{debug, info, trace, warn};

pub use checksum::{validate, verify, ChecksumMismatch};
pub use commands::{Command, Opcode, RangeError, Switch, Timing};
pub use concentration::{MassConcentration, WeightedVolume};
pub use decode::Layout;
pub use firmware::{Firmware, FirmwareError, Model, INFO_STRING_LEN};
pub use transport::{SpiTransport, Transport};
pub use types::{
    ConfigVariables, ConfigVariables2, HistogramReading, PmReading, PotStatus, BIN_COUNT,
    BOUNDARY_COUNT, CONFIG_LEN,
};

use commands::MAX_COMMAND_LEN;
use decode::{FrameTooShort, CONFIG2_LEN, FIRMWARE_LEN, PM_LEN, POT_STATUS_LEN};

/// Firmware major version that introduced the extended command set.
const EXTENDED_COMMANDS: u8 = 18;
/// Longest histogram frame of any layout [bytes].
const MAX_HISTOGRAM_LEN: usize = Layout::Canonical.histogram_len();

/// All possible errors in this crate
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
pub enum Error<E> {
    /// The transport failed; the session stays usable.
    #[cfg_attr(feature = "thiserror", error("bus transfer failed: {0:?}"))]
    Transport(E),
    /// The response was shorter than the command requires.
    #[cfg_attr(
        feature = "thiserror",
        error("expected a {expected} byte response, got {actual}")
    )]
    Framing { expected: usize, actual: usize },
    #[cfg_attr(feature = "thiserror", error(transparent))]
    Firmware(FirmwareError),
    #[cfg_attr(feature = "thiserror", error(transparent))]
    Range(RangeError),
    /// No successful handshake, or the handshake failed.
    #[cfg_attr(feature = "thiserror", error("session is not ready"))]
    NotReady,
    #[cfg_attr(feature = "thiserror", error("session is closed"))]
    Closed,
}

impl<E> From<RangeError> for Error<E> {
    fn from(e: RangeError) -> Self {
        Error::Range(e)
    }
}

impl<E> From<FrameTooShort> for Error<E> {
    fn from(e: FrameTooShort) -> Self {
        Error::Framing {
            expected: e.expected,
            actual: e.actual,
        }
    }
}

impl<E> From<FirmwareError> for Error<E> {
    fn from(e: FirmwareError) -> Self {
        Error::Firmware(e)
    }
}

/// Last commanded laser and fan state; `None` until switched by this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerState {
    pub laser: Option<bool>,
    pub fan: Option<bool>,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Uninitialized,
    Ready(PowerState),
    /// The handshake found an unusable device. Terminal.
    Faulted,
    Closed,
}

/// OPC-N2 session owning the transport and a delay source.
pub struct Opc<T, D> {
    transport: T,
    delay: D,
    timing: Timing,
    state: State,
    firmware: Option<Firmware>,
}

impl<T, D> Opc<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Creates an uninitialized session. No bus traffic happens until
    /// [`Opc::init`].
    pub fn new(transport: T, delay: D) -> Self {
        Self {
            transport,
            delay,
            timing: Timing::default(),
            state: State::Uninitialized,
            firmware: None,
        }
    }

    /// Creates a session and performs the handshake.
    pub fn connect(transport: T, delay: D) -> Result<Self, Error<T::Error>> {
        let mut opc = Self::new(transport, delay);
        opc.init()?;
        Ok(opc)
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Reads the info string and classifies the firmware.
    ///
    /// May be repeated from `Ready` to resynchronise after a framing error.
    /// An unrecognised or unsupported device leaves the session `Faulted`.
    pub fn init(&mut self) -> Result<Firmware, Error<T::Error>> {
        match self.state {
            State::Closed => return Err(Error::Closed),
            State::Faulted => return Err(Error::NotReady),
            State::Uninitialized | State::Ready(_) => {}
        }

        let mut raw = [0u8; INFO_STRING_LEN];
        self.query(Opcode::InfoString, &mut raw)?;
        debug!("info string: {:?}", firmware::text(&raw));

        let mut detected = match firmware::classify(&raw) {
            Ok(detected) => detected,
            Err(e) => return Err(self.fault(e)),
        };

        if detected.major >= EXTENDED_COMMANDS {
            let (major, minor) = self.query_firmware()?;
            detected.major = major;
            detected.minor = Some(minor);
            if !detected.is_supported() {
                return Err(self.fault(FirmwareError::Unsupported {
                    firmware: detected,
                    signature: raw,
                }));
            }
        }

        info!("connected to {}", detected);
        self.firmware = Some(detected);
        self.state = State::Ready(PowerState::default());
        Ok(detected)
    }

    fn fault(&mut self, e: FirmwareError) -> Error<T::Error> {
        warn!("handshake failed: {:?}", e);
        self.state = State::Faulted;
        self.firmware = None;
        Error::Firmware(e)
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn firmware(&self) -> Option<Firmware> {
        self.firmware
    }

    /// Histogram layout in use, once the handshake succeeded.
    pub fn layout(&self) -> Option<Layout> {
        self.firmware.map(|f| f.layout())
    }

    pub fn power(&self) -> Option<PowerState> {
        match self.state {
            State::Ready(power) => Some(power),
            _ => None,
        }
    }

    /// Ends the session; every later operation fails with [`Error::Closed`].
    pub fn close(&mut self) {
        self.state = State::Closed;
    }

    /// Destroys the session and returns the transport and delay.
    pub fn release(self) -> (T, D) {
        (self.transport, self.delay)
    }

    fn ready(&self) -> Result<Firmware, Error<T::Error>> {
        match (self.state, self.firmware) {
            (State::Ready(_), Some(firmware)) => Ok(firmware),
            (State::Closed, _) => Err(Error::Closed),
            _ => Err(Error::NotReady),
        }
    }

    /// Like `ready`, and the firmware must be at least `major`.
    fn requires(&self, major: u8) -> Result<Firmware, Error<T::Error>> {
        let firmware = self.ready()?;
        if firmware.major < major {
            return Err(Error::Firmware(FirmwareError::RequiresFirmware {
                required: major,
                found: firmware.major,
            }));
        }
        Ok(firmware)
    }

    fn record_power(&mut self, laser: Option<bool>, fan: Option<bool>) {
        if let State::Ready(power) = &mut self.state {
            if laser.is_some() {
                power.laser = laser;
            }
            if fan.is_some() {
                power.fan = fan;
            }
        }
    }

    /// Full-duplex transfer that must deliver all of `buf`.
    fn transfer(&mut self, buf: &mut [u8]) -> Result<(), Error<T::Error>> {
        let actual = self.transport.transfer(buf).map_err(Error::Transport)?;
        if actual < buf.len() {
            warn!("short frame: {} of {} bytes", actual, buf.len());
            return Err(Error::Framing {
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Sends the command byte and returns the status byte clocked in.
    fn command_byte(&mut self, opcode: Opcode) -> Result<u8, Error<T::Error>> {
        let mut status = [opcode as u8];
        self.transfer(&mut status)?;
        Ok(status[0])
    }

    fn settle(&mut self, opcode: Opcode) {
        let us = opcode.settle(&self.timing);
        if us > 0 {
            self.delay.delay_us(us);
        }
    }

    /// Sends `command` and reports whether the device acknowledged it.
    fn send(&mut self, command: &Command) -> Result<bool, Error<T::Error>> {
        let opcode = command.opcode();
        debug!("command {:?} {:02x?}", opcode, command.params());
        let status = self.command_byte(opcode)?;

        let params = command.params();
        let mut buf = [0u8; MAX_COMMAND_LEN];
        let echo = &mut buf[..params.len()];
        if !params.is_empty() {
            self.settle(opcode);
            echo.copy_from_slice(params);
            self.transfer(echo)?;
        }

        let acknowledged = command.acknowledged(status, echo);
        if !acknowledged {
            warn!(
                "command {:?} not acknowledged: status {:#04x}, echo {:02x?}",
                opcode, status, echo
            );
        }
        Ok(acknowledged)
    }

    /// Sends `opcode` and fills `frame` with the response.
    fn query(&mut self, opcode: Opcode, frame: &mut [u8]) -> Result<(), Error<T::Error>> {
        debug!("query {:?}, {} byte response", opcode, frame.len());
        let status = self.command_byte(opcode)?;
        if status != commands::ACK {
            debug!("query {:?}: status {:#04x}", opcode, status);
        }
        self.settle(opcode);
        frame.fill(0);
        self.transfer(frame)?;
        trace!("response {:02x?}", frame);
        Ok(())
    }

    fn query_firmware(&mut self) -> Result<(u8, u8), Error<T::Error>> {
        let mut frame = [0u8; FIRMWARE_LEN];
        self.query(Opcode::ReadFirmware, &mut frame)?;
        Ok((frame[0], frame[1]))
    }

    /// Checks the connection; `true` when the device answers with its
    /// status byte.
    pub fn ping(&mut self) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        self.send(&Command::new(Opcode::Ping))
    }

    fn switch(
        &mut self,
        switch: Switch,
        laser: Option<bool>,
        fan: Option<bool>,
    ) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        let acknowledged = self.send(&Command::power(switch))?;
        if acknowledged {
            self.record_power(laser, fan);
        }
        Ok(acknowledged)
    }

    /// Turns fan and laser on.
    pub fn on(&mut self) -> Result<bool, Error<T::Error>> {
        self.switch(Switch::On, Some(true), Some(true))
    }

    /// Turns fan and laser off.
    pub fn off(&mut self) -> Result<bool, Error<T::Error>> {
        self.switch(Switch::Off, Some(false), Some(false))
    }

    pub fn laser_on(&mut self) -> Result<bool, Error<T::Error>> {
        self.switch(Switch::LaserOn, Some(true), None)
    }

    pub fn laser_off(&mut self) -> Result<bool, Error<T::Error>> {
        self.switch(Switch::LaserOff, Some(false), None)
    }

    pub fn fan_on(&mut self) -> Result<bool, Error<T::Error>> {
        self.switch(Switch::FanOn, None, Some(true))
    }

    pub fn fan_off(&mut self) -> Result<bool, Error<T::Error>> {
        self.switch(Switch::FanOff, None, Some(false))
    }

    /// Sets the fan DAC level (0-255).
    pub fn set_fan_power(&mut self, power: i32) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        let command = Command::set_fan_power(power)?;
        self.send(&command)
    }

    /// Sets the laser DAC level (0-255).
    pub fn set_laser_power(&mut self, power: i32) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        let command = Command::set_laser_power(power)?;
        self.send(&command)
    }

    /// Reads the raw info string, e.g.
    /// `OPC-N2 FirmwareVer=OPC-018.2....................BD`.
    pub fn read_info_string(&mut self) -> Result<[u8; INFO_STRING_LEN], Error<T::Error>> {
        self.ready()?;
        let mut raw = [0u8; INFO_STRING_LEN];
        self.query(Opcode::InfoString, &mut raw)?;
        Ok(raw)
    }

    /// Reads the firmware version register. Firmware 18+.
    pub fn read_firmware(&mut self) -> Result<Firmware, Error<T::Error>> {
        let firmware = self.requires(EXTENDED_COMMANDS)?;
        let (major, minor) = self.query_firmware()?;
        Ok(Firmware {
            model: firmware.model,
            major,
            minor: Some(minor),
        })
    }

    /// Reads the raw serial number string. Firmware 18+.
    pub fn serial_number(&mut self) -> Result<[u8; INFO_STRING_LEN], Error<T::Error>> {
        self.requires(EXTENDED_COMMANDS)?;
        let mut raw = [0u8; INFO_STRING_LEN];
        self.query(Opcode::SerialNumber, &mut raw)?;
        Ok(raw)
    }

    /// Reads the digital pot state. Firmware 18+.
    pub fn pot_status(&mut self) -> Result<PotStatus, Error<T::Error>> {
        self.requires(EXTENDED_COMMANDS)?;
        let mut frame = [0u8; POT_STATUS_LEN];
        self.query(Opcode::PotStatus, &mut frame)?;
        Ok(decode::pot_status(&frame)?)
    }

    /// Reads and resets the histogram.
    ///
    /// The reading is returned even when its checksum does not match; check
    /// [`HistogramReading::is_valid`] and read again if needed.
    pub fn read_histogram(&mut self) -> Result<HistogramReading, Error<T::Error>> {
        let layout = self.ready()?.layout();
        let mut buf = [0u8; MAX_HISTOGRAM_LEN];
        let frame = &mut buf[..layout.histogram_len()];
        self.query(Opcode::Histogram, frame)?;

        let reading = decode::histogram(layout, frame)?;
        if let Err(mismatch) = reading.verify() {
            warn!(
                "histogram checksum {:#06x}, bins sum to {:#06x}",
                mismatch.actual, mismatch.expected
            );
        }
        Ok(reading)
    }

    /// Reads the PM values and resets the histogram. Firmware 18+.
    pub fn read_pm(&mut self) -> Result<PmReading, Error<T::Error>> {
        self.requires(EXTENDED_COMMANDS)?;
        let mut frame = [0u8; PM_LEN];
        self.query(Opcode::PmData, &mut frame)?;
        Ok(decode::pm(&frame)?)
    }

    pub fn read_config(&mut self) -> Result<ConfigVariables, Error<T::Error>> {
        let layout = self.ready()?.layout();
        let mut frame = [0u8; CONFIG_LEN];
        self.query(Opcode::ReadConfig, &mut frame)?;
        Ok(decode::config(layout, &frame)?)
    }

    /// Reads the second configuration record. Firmware 18+.
    pub fn read_config2(&mut self) -> Result<ConfigVariables2, Error<T::Error>> {
        self.requires(EXTENDED_COMMANDS)?;
        let mut frame = [0u8; CONFIG2_LEN];
        self.query(Opcode::ReadConfig2, &mut frame)?;
        Ok(decode::config2(&frame)?)
    }

    /// Writes the configuration variables to working memory. They only
    /// survive a power cycle after [`Opc::save_config`].
    pub fn write_config(&mut self, config: &ConfigVariables) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        self.send(&Command::write_config(config))
    }

    /// Saves the configuration variables to non-volatile memory.
    pub fn save_config(&mut self) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        self.send(&Command::save_config())
    }

    /// Enters bootloader mode, needed before rewriting the firmware.
    pub fn enter_bootloader(&mut self) -> Result<bool, Error<T::Error>> {
        self.ready()?;
        self.send(&Command::new(Opcode::EnterBootloader))
    }
}
