//! Host-side mass concentration formulas.
//!
//! The weighting the device applies differs between firmware releases, so
//! the formula is a trait parameterised by the active [`ConfigVariables`].

use crate::types::{ConfigVariables, PmReading, BIN_COUNT};

pub trait MassConcentration {
    /// Mass concentrations for one histogram period.
    ///
    /// Returns `None` when no volume was sampled.
    fn concentrations(
        &self,
        bins: &[u16; BIN_COUNT],
        sampling_period: f32,
        config: &ConfigVariables,
    ) -> Option<PmReading>;
}

/// Sum of count × particle volume × density × sample volume weighting over
/// the bins below each size cut, divided by the sampled volume.
///
/// With volumes in µm³, densities in g/cm³ and the flow rate in ml/s the
/// result is in μg/m³.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WeightedVolume {
    /// Bins below 1 µm
    pub pm1_0_bins: usize,
    /// Bins below 2.5 µm
    pub pm2_5_bins: usize,
    /// Bins below 10 µm
    pub pm10_0_bins: usize,
}

impl Default for WeightedVolume {
    fn default() -> Self {
        Self {
            pm1_0_bins: 3,
            pm2_5_bins: 6,
            pm10_0_bins: 12,
        }
    }
}

impl WeightedVolume {
    fn mass(bins: &[u16; BIN_COUNT], config: &ConfigVariables, upto: usize) -> f32 {
        bins.iter()
            .zip(config.bin_particle_volume.iter())
            .zip(config.bin_particle_density.iter())
            .zip(config.bin_sample_volume_weight.iter())
            .take(upto.min(BIN_COUNT))
            .map(|(((&count, volume), density), weight)| {
                f32::from(count) * volume * density * weight
            })
            .sum()
    }
}

impl MassConcentration for WeightedVolume {
    fn concentrations(
        &self,
        bins: &[u16; BIN_COUNT],
        sampling_period: f32,
        config: &ConfigVariables,
    ) -> Option<PmReading> {
        let sampled = config.sample_flow_rate * sampling_period;
        if sampled <= 0.0 {
            return None;
        }
        Some(PmReading {
            pm1_0: Self::mass(bins, config, self.pm1_0_bins) / sampled,
            pm2_5: Self::mass(bins, config, self.pm2_5_bins) / sampled,
            pm10_0: Self::mass(bins, config, self.pm10_0_bins) / sampled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfigVariables {
        ConfigVariables {
            bin_boundaries: [0; 15],
            bin_particle_volume: [2.0; 16],
            bin_particle_density: [1.5; 16],
            bin_sample_volume_weight: [1.0; 16],
            gain_scaling_coefficient: 1.0,
            sample_flow_rate: 5.0,
            laser_dac: 0,
            fan_dac: 0,
            tof_sfr: None,
        }
    }

    #[test]
    fn cumulative_size_cuts() {
        let bins = [1u16; 16];
        let pm = WeightedVolume::default()
            .concentrations(&bins, 2.0, &config())
            .unwrap();
        // each bin contributes 3.0, sampled volume is 10 ml
        assert_eq!(pm.pm1_0, 0.9);
        assert_eq!(pm.pm2_5, 1.8);
        assert_eq!(pm.pm10_0, 3.6);
    }

    #[test]
    fn weighting_is_taken_from_config() {
        let mut config = config();
        config.bin_sample_volume_weight[0] = 0.0;
        let mut bins = [0u16; 16];
        bins[0] = 100;
        bins[1] = 10;
        let pm = WeightedVolume::default()
            .concentrations(&bins, 1.0, &config)
            .unwrap();
        assert_eq!(pm.pm1_0, 6.0);
    }

    #[test]
    fn zero_volume() {
        let mut config = config();
        config.sample_flow_rate = 0.0;
        assert!(WeightedVolume::default()
            .concentrations(&[1; 16], 1.0, &config)
            .is_none());
    }
}
