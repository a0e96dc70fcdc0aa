use crate::checksum::{self, ChecksumMismatch};
use crate::concentration::MassConcentration;

/// Number of histogram bins.
pub const BIN_COUNT: usize = 16;
/// Number of bin boundaries.
pub const BOUNDARY_COUNT: usize = BIN_COUNT - 1;
/// Length of the configuration variables record [bytes].
pub const CONFIG_LEN: usize = 256;

/// Mass concentrations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PmReading {
    /// Mass Concentration PM1.0 [μg/m³]
    pub pm1_0: f32,
    /// Mass Concentration PM2.5 [μg/m³]
    pub pm2_5: f32,
    /// Mass Concentration PM10 [μg/m³]
    pub pm10_0: f32,
}

/// OPC-N2 histogram data.
///
/// A reading is returned even when its checksum does not match the bin
/// counts; use [`HistogramReading::is_valid`] or [`HistogramReading::verify`]
/// to decide whether to keep it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HistogramReading {
    /// Particle counts per bin
    pub bins: [u16; BIN_COUNT],
    /// Mean Time of Flight for bins 1, 3, 5 and 7 [µs]
    pub mtof: [f32; 4],
    /// Sample Flow Rate [ml/s], only sent by firmware 16 and 17
    pub sample_flow_rate: Option<f32>,
    /// Temperature [°C]
    pub temperature: Option<f32>,
    /// Pressure [Pa]
    pub pressure: Option<u32>,
    /// Sampling Period [s]
    pub sampling_period: f32,
    /// Checksum as transmitted
    pub checksum: u16,
    /// Mass concentrations as computed by the device
    pub pm: PmReading,
}

impl HistogramReading {
    /// Whether the transmitted checksum matches the bin counts.
    pub fn is_valid(&self) -> bool {
        checksum::validate(self)
    }

    pub fn verify(&self) -> Result<(), ChecksumMismatch> {
        checksum::verify(self)
    }

    /// Bin counts as number concentration [particles/ml].
    ///
    /// `flow_rate` is the sample flow rate [ml/s]. Returns `None` when the
    /// sampled volume is zero.
    pub fn number_concentration(&self, flow_rate: f32) -> Option<[f32; BIN_COUNT]> {
        let volume = flow_rate * self.sampling_period;
        if volume <= 0.0 {
            return None;
        }
        Some(self.bins.map(|count| f32::from(count) / volume))
    }

    /// Mass concentrations derived on the host from the bin counts.
    pub fn mass_concentration<M: MassConcentration>(
        &self,
        config: &ConfigVariables,
        formula: &M,
    ) -> Option<PmReading> {
        formula.concentrations(&self.bins, self.sampling_period, config)
    }
}

/// Configuration variables stored in the device.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfigVariables {
    /// Bin boundaries [ADC counts]
    pub bin_boundaries: [u16; BOUNDARY_COUNT],
    /// Bin Particle Volume [µm³]
    pub bin_particle_volume: [f32; BIN_COUNT],
    /// Bin Particle Density [g/cm³]
    pub bin_particle_density: [f32; BIN_COUNT],
    /// Bin Sample Volume Weighting
    pub bin_sample_volume_weight: [f32; BIN_COUNT],
    /// Gain Scaling Coefficient
    pub gain_scaling_coefficient: f32,
    /// Sample Flow Rate [ml/s]
    pub sample_flow_rate: f32,
    pub laser_dac: u8,
    pub fan_dac: u8,
    /// Time of flight to sample flow rate conversion factor, firmware 16+
    pub tof_sfr: Option<u8>,
}

impl ConfigVariables {
    /// ADC threshold of the boundary `index`.
    pub fn bin_boundary(&self, index: usize) -> Option<u16> {
        self.bin_boundaries.get(index).copied()
    }

    /// Encodes the record the way the device transmits it.
    pub fn to_bytes(&self) -> [u8; CONFIG_LEN] {
        let mut buf = [0u8; CONFIG_LEN];
        for (i, boundary) in self.bin_boundaries.iter().enumerate() {
            buf[2 * i..2 * i + 2].copy_from_slice(&boundary.to_le_bytes());
        }
        let tables = [
            (32, &self.bin_particle_volume),
            (96, &self.bin_particle_density),
            (160, &self.bin_sample_volume_weight),
        ];
        for (start, table) in tables {
            for (i, value) in table.iter().enumerate() {
                let at = start + 4 * i;
                buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
        buf[224..228].copy_from_slice(&self.gain_scaling_coefficient.to_le_bytes());
        buf[228..232].copy_from_slice(&self.sample_flow_rate.to_le_bytes());
        buf[232] = self.laser_dac;
        buf[233] = self.fan_dac;
        if let Some(tof_sfr) = self.tof_sfr {
            buf[234] = tof_sfr;
        }
        buf
    }
}

/// Second set of configuration variables, firmware 18+.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfigVariables2 {
    /// Automatic mode sampling interval [s]
    pub sampling_interval: u16,
    pub idle_interval_count: u16,
    pub fan_on_idle: u8,
    pub laser_on_idle: u8,
    pub max_data_arrays_in_file: u16,
    pub only_save_pm_data: u8,
}

/// State of the digital potentiometer, firmware 18+.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PotStatus {
    pub fan_on: bool,
    pub laser_on: bool,
    pub fan_dac: u8,
    pub laser_dac: u8,
}
