use heapless::Vec;

use crate::types::{ConfigVariables, CONFIG_LEN};

/// Status byte the device answers with when it accepts a command byte.
pub(crate) const ACK: u8 = 0xF3;

/// Longest byte sequence a single command can carry (opcode + config record).
pub const MAX_COMMAND_LEN: usize = CONFIG_LEN + 1;

/// Command opcodes understood by the OPC-N2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Fan / laser power switches.
    Power = 0x03,
    SerialNumber = 0x10,
    ReadFirmware = 0x12,
    PotStatus = 0x13,
    /// Read and reset the histogram.
    Histogram = 0x30,
    /// Read and reset the PM values.
    PmData = 0x32,
    WriteConfig = 0x3A,
    ReadConfig = 0x3C,
    ReadConfig2 = 0x3D,
    InfoString = 0x3F,
    EnterBootloader = 0x41,
    /// Fan / laser DAC levels.
    SetDac = 0x42,
    SaveConfig = 0x43,
    Ping = 0xCF,
}

impl Opcode {
    /// Wait required between the command byte and the first response byte.
    pub fn settle(self, timing: &Timing) -> u32 {
        match self {
            Opcode::Ping | Opcode::EnterBootloader => 0,
            Opcode::InfoString | Opcode::SerialNumber => timing.info_us,
            _ => timing.command_us,
        }
    }
}

/// Settle delays applied between a command byte and its response [µs].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timing {
    /// Info string and serial number reads.
    pub info_us: u32,
    /// Every other delayed command.
    pub command_us: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            info_us: 9_000,
            command_us: 10_000,
        }
    }
}

/// Selector byte following [`Opcode::Power`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Switch {
    On = 0x00,
    Off = 0x01,
    LaserOn = 0x02,
    LaserOff = 0x03,
    FanOn = 0x04,
    FanOff = 0x05,
}

/// Selector byte following [`Opcode::SetDac`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Dac {
    Fan = 0x00,
    Laser = 0x01,
}

/// A power level outside the single byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[cfg_attr(feature = "thiserror", error("power level {value} is outside 0..=255"))]
pub struct RangeError {
    pub value: i32,
}

/// An encoded command: opcode byte followed by its parameter bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    bytes: Vec<u8, MAX_COMMAND_LEN>,
}

impl Command {
    fn build(opcode: Opcode, params: &[u8]) -> Self {
        let mut bytes = Vec::new();
        let fits = bytes.push(opcode as u8).is_ok() && bytes.extend_from_slice(params).is_ok();
        debug_assert!(
            fits,
            "{} parameter bytes overflow the command buffer",
            params.len()
        );
        Self { opcode, bytes }
    }

    /// A command without parameters.
    pub fn new(opcode: Opcode) -> Self {
        Self::build(opcode, &[])
    }

    pub fn power(switch: Switch) -> Self {
        Self::build(Opcode::Power, &[switch as u8])
    }

    pub fn set_fan_power(power: i32) -> Result<Self, RangeError> {
        Self::set_dac(Dac::Fan, power)
    }

    pub fn set_laser_power(power: i32) -> Result<Self, RangeError> {
        Self::set_dac(Dac::Laser, power)
    }

    fn set_dac(dac: Dac, power: i32) -> Result<Self, RangeError> {
        let level = u8::try_from(power).map_err(|_| RangeError { value: power })?;
        Ok(Self::build(Opcode::SetDac, &[dac as u8, level]))
    }

    pub fn write_config(config: &ConfigVariables) -> Self {
        Self::build(Opcode::WriteConfig, &config.to_bytes())
    }

    pub fn save_config() -> Self {
        Self::build(Opcode::SaveConfig, &[0x3F, 0x3C, 0x3F, 0x3C, 0x43])
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Bytes clocked out after the settle delay.
    pub fn params(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// The full sequence as it goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Checks the bytes clocked in while this command was sent.
    ///
    /// `status` answers the opcode byte; `echo` answers the parameter bytes
    /// and must repeat each previously sent byte.
    pub fn acknowledged(&self, status: u8, echo: &[u8]) -> bool {
        status == ACK
            && echo.len() == self.params().len()
            && echo.iter().zip(self.bytes.iter()).all(|(got, sent)| got == sent)
    }
}
