//! Response frame decoding.
//!
//! All multi-byte fields are little endian. Floats are sent in their memory
//! representation and are reinterpreted bit for bit.

use crate::types::{
    ConfigVariables, ConfigVariables2, HistogramReading, PmReading, PotStatus, BIN_COUNT,
    BOUNDARY_COUNT, CONFIG_LEN,
};

/// Length of the PM-only record [bytes].
pub const PM_LEN: usize = 12;
/// Length of the second configuration record [bytes].
pub const CONFIG2_LEN: usize = 9;
/// Length of the digital pot status record [bytes].
pub const POT_STATUS_LEN: usize = 4;
/// Length of the firmware version record [bytes].
pub const FIRMWARE_LEN: usize = 2;

/// Histogram frame layout, selected from the firmware version at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Layout {
    /// Firmware 14 and 15: integer temperature, pressure and period.
    Legacy,
    /// Firmware 16 and 17: sample flow rate plus a shared
    /// temperature/pressure slot.
    Interim,
    /// Firmware 18: float time of flight and temperature.
    Canonical,
}

impl Layout {
    pub fn for_major(major: u8) -> Self {
        match major {
            0..=15 => Layout::Legacy,
            16 | 17 => Layout::Interim,
            _ => Layout::Canonical,
        }
    }

    /// Histogram frame length [bytes].
    pub const fn histogram_len(self) -> usize {
        match self {
            Layout::Legacy | Layout::Interim => 62,
            Layout::Canonical => 86,
        }
    }

    /// Whether the configuration record carries the TOF to SFR factor.
    pub const fn has_tof_sfr(self) -> bool {
        !matches!(self, Layout::Legacy)
    }
}

/// A frame ended before the record it should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[cfg_attr(
    feature = "thiserror",
    error("frame too short: expected {expected} bytes, got {actual}")
)]
pub struct FrameTooShort {
    pub expected: usize,
    pub actual: usize,
}

/// Sequential reader over a frame whose length was already checked.
struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8], expected: usize) -> Result<Self, FrameTooShort> {
        if buf.len() < expected {
            return Err(FrameTooShort {
                expected,
                actual: buf.len(),
            });
        }
        Ok(Self { buf, pos: 0 })
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_bits(self.u32())
    }

    fn pm(&mut self) -> PmReading {
        PmReading {
            pm1_0: self.f32(),
            pm2_5: self.f32(),
            pm10_0: self.f32(),
        }
    }
}

/// Combines two bytes into an unsigned 16-bit value.
pub fn u16_le(low: u8, high: u8) -> u16 {
    u16::from(low) | (u16::from(high) << 8)
}

/// Reinterprets four little endian bytes as an IEEE-754 single.
pub fn f32_le(bytes: [u8; 4]) -> f32 {
    f32::from_bits(u32::from_le_bytes(bytes))
}

/// Decodes a histogram frame of at least [`Layout::histogram_len`] bytes.
pub fn histogram(layout: Layout, frame: &[u8]) -> Result<HistogramReading, FrameTooShort> {
    let mut f = Fields::new(frame, layout.histogram_len())?;
    let mut bins = [0u16; BIN_COUNT];
    for bin in bins.iter_mut() {
        *bin = f.u16();
    }

    let reading = match layout {
        Layout::Legacy => {
            let mtof = [(); 4].map(|_| f32::from(f.u8()) / 3.0);
            let temperature = f.u32() as f32 / 10.0;
            let pressure = f.u32();
            let sampling_period = f.u32() as f32 / 12e6;
            HistogramReading {
                bins,
                mtof,
                sample_flow_rate: None,
                temperature: Some(temperature),
                pressure: Some(pressure),
                sampling_period,
                checksum: f.u16(),
                pm: f.pm(),
            }
        }
        Layout::Interim => {
            let mtof = [(); 4].map(|_| f32::from(f.u8()) / 3.0);
            let sample_flow_rate = f.f32();
            // the slot carries either pressure [Pa] or temperature [°C × 10]
            let raw = f.u32();
            let (temperature, pressure) = if raw > 98_000 {
                (None, Some(raw))
            } else if raw < 5_000 {
                (Some(raw as f32 / 10.0), None)
            } else {
                (None, None)
            };
            HistogramReading {
                bins,
                mtof,
                sample_flow_rate: Some(sample_flow_rate),
                temperature,
                pressure,
                sampling_period: f.f32(),
                checksum: f.u16(),
                pm: f.pm(),
            }
        }
        Layout::Canonical => {
            let mtof = [(); 4].map(|_| f.f32());
            let temperature = f.f32();
            let pressure = f.u8();
            let sampling_period = f.u8();
            HistogramReading {
                bins,
                mtof,
                sample_flow_rate: None,
                temperature: Some(temperature),
                pressure: Some(u32::from(pressure)),
                sampling_period: f32::from(sampling_period),
                checksum: f.u16(),
                pm: f.pm(),
            }
        }
    };
    Ok(reading)
}

/// Decodes the configuration variables record.
pub fn config(layout: Layout, frame: &[u8]) -> Result<ConfigVariables, FrameTooShort> {
    let mut f = Fields::new(frame, CONFIG_LEN)?;
    let mut bin_boundaries = [0u16; BOUNDARY_COUNT];
    for boundary in bin_boundaries.iter_mut() {
        *boundary = f.u16();
    }
    f.skip(2);
    let bin_particle_volume = [(); BIN_COUNT].map(|_| f.f32());
    let bin_particle_density = [(); BIN_COUNT].map(|_| f.f32());
    let bin_sample_volume_weight = [(); BIN_COUNT].map(|_| f.f32());
    let gain_scaling_coefficient = f.f32();
    let sample_flow_rate = f.f32();
    let laser_dac = f.u8();
    let fan_dac = f.u8();
    let tof_sfr = f.u8();
    debug_assert!(f.pos <= CONFIG_LEN);

    Ok(ConfigVariables {
        bin_boundaries,
        bin_particle_volume,
        bin_particle_density,
        bin_sample_volume_weight,
        gain_scaling_coefficient,
        sample_flow_rate,
        laser_dac,
        fan_dac,
        tof_sfr: layout.has_tof_sfr().then_some(tof_sfr),
    })
}

pub fn config2(frame: &[u8]) -> Result<ConfigVariables2, FrameTooShort> {
    let mut f = Fields::new(frame, CONFIG2_LEN)?;
    Ok(ConfigVariables2 {
        sampling_interval: f.u16(),
        idle_interval_count: f.u16(),
        fan_on_idle: f.u8(),
        laser_on_idle: f.u8(),
        max_data_arrays_in_file: f.u16(),
        only_save_pm_data: f.u8(),
    })
}

pub fn pm(frame: &[u8]) -> Result<PmReading, FrameTooShort> {
    Ok(Fields::new(frame, PM_LEN)?.pm())
}

pub fn pot_status(frame: &[u8]) -> Result<PotStatus, FrameTooShort> {
    let mut f = Fields::new(frame, POT_STATUS_LEN)?;
    Ok(PotStatus {
        fan_on: f.u8() != 0,
        laser_on: f.u8() != 0,
        fan_dac: f.u8(),
        laser_dac: f.u8(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn canonical_frame(bins: &[(usize, u16)], checksum: u16) -> [u8; 86] {
        let mut frame = [0u8; 86];
        for &(i, count) in bins {
            frame[2 * i..2 * i + 2].copy_from_slice(&count.to_le_bytes());
        }
        for i in 0..4 {
            let at = 32 + 4 * i;
            frame[at..at + 4].copy_from_slice(&(i as f32 + 0.5).to_le_bytes());
        }
        frame[48..52].copy_from_slice(&21.5f32.to_le_bytes());
        frame[52] = 101;
        frame[53] = 3;
        frame[54..56].copy_from_slice(&checksum.to_le_bytes());
        frame[56..60].copy_from_slice(&1.25f32.to_le_bytes());
        frame[60..64].copy_from_slice(&2.5f32.to_le_bytes());
        frame[64..68].copy_from_slice(&10.0f32.to_le_bytes());
        frame
    }

    #[test]
    fn little_endian_fields() {
        assert_eq!(u16_le(0x34, 0x12), 0x1234);
        assert_eq!(f32_le([0x00, 0x00, 0x80, 0x3F]), 1.0);
        assert_eq!(f32_le([0x00, 0x00, 0x20, 0xC1]), -10.0);
    }

    #[test]
    fn canonical_histogram() {
        let frame = canonical_frame(&[(0, 10), (1, 5), (15, 0x0102)], 0x0111);
        let reading = histogram(Layout::Canonical, &frame).unwrap();
        assert_eq!(reading.bins[0], 10);
        assert_eq!(reading.bins[1], 5);
        assert_eq!(reading.bins[15], 0x0102);
        assert_eq!(reading.mtof, [0.5, 1.5, 2.5, 3.5]);
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(reading.pressure, Some(101));
        assert_eq!(reading.sampling_period, 3.0);
        assert_eq!(reading.checksum, 0x0111);
        assert_eq!(
            reading.pm,
            PmReading {
                pm1_0: 1.25,
                pm2_5: 2.5,
                pm10_0: 10.0
            }
        );
        assert!(reading.is_valid());
    }

    #[test]
    fn legacy_histogram() {
        let mut frame = [0u8; 62];
        frame[0] = 7;
        frame[32] = 30;
        frame[36..40].copy_from_slice(&215u32.to_le_bytes());
        frame[40..44].copy_from_slice(&101_325u32.to_le_bytes());
        frame[44..48].copy_from_slice(&24_000_000u32.to_le_bytes());
        frame[48] = 7;
        frame[50..54].copy_from_slice(&4.0f32.to_le_bytes());
        let reading = histogram(Layout::Legacy, &frame).unwrap();
        assert_eq!(reading.bins[0], 7);
        assert_eq!(reading.mtof[0], 10.0);
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(reading.pressure, Some(101_325));
        assert_eq!(reading.sampling_period, 2.0);
        assert_eq!(reading.pm.pm1_0, 4.0);
        assert!(reading.is_valid());
    }

    #[test]
    fn interim_shared_slot() {
        let mut frame = [0u8; 62];
        frame[36..40].copy_from_slice(&3.5f32.to_le_bytes());
        frame[40..44].copy_from_slice(&99_000u32.to_le_bytes());
        frame[44..48].copy_from_slice(&1.5f32.to_le_bytes());
        let reading = histogram(Layout::Interim, &frame).unwrap();
        assert_eq!(reading.sample_flow_rate, Some(3.5));
        assert_eq!(reading.pressure, Some(99_000));
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.sampling_period, 1.5);

        frame[40..44].copy_from_slice(&245u32.to_le_bytes());
        let reading = histogram(Layout::Interim, &frame).unwrap();
        assert_eq!(reading.temperature, Some(24.5));
        assert_eq!(reading.pressure, None);

        frame[40..44].copy_from_slice(&50_000u32.to_le_bytes());
        let reading = histogram(Layout::Interim, &frame).unwrap();
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.pressure, None);
    }

    #[test]
    fn config_record() {
        let expected = ConfigVariables {
            bin_boundaries: core::array::from_fn(|i| (i as u16 + 1) * 100),
            bin_particle_volume: core::array::from_fn(|i| i as f32 * 0.25),
            bin_particle_density: [1.65; 16],
            bin_sample_volume_weight: [1.0; 16],
            gain_scaling_coefficient: 0.5,
            sample_flow_rate: 3.7,
            laser_dac: 230,
            fan_dac: 255,
            tof_sfr: Some(12),
        };
        let frame = expected.to_bytes();
        assert_eq!(&frame[0..2], &[100, 0]);
        assert_eq!(frame[232], 230);
        assert_eq!(config(Layout::Canonical, &frame), Ok(expected));

        let legacy = config(Layout::Legacy, &frame).unwrap();
        assert_eq!(legacy.tof_sfr, None);
        assert_eq!(legacy.bin_boundary(14), Some(1500));
        assert_eq!(legacy.bin_boundary(15), None);
    }

    #[test]
    fn small_records() {
        let c = config2(&[1, 0, 2, 0, 1, 0, 0x66, 0xF1, 1]).unwrap();
        assert_eq!(c.sampling_interval, 1);
        assert_eq!(c.idle_interval_count, 2);
        assert_eq!(c.fan_on_idle, 1);
        assert_eq!(c.max_data_arrays_in_file, 61798);
        assert_eq!(c.only_save_pm_data, 1);

        let p = pot_status(&[0, 1, 255, 230]).unwrap();
        assert!(!p.fan_on);
        assert!(p.laser_on);
        assert_eq!(p.fan_dac, 255);
        assert_eq!(p.laser_dac, 230);
    }

    fn short<T>(expected: usize, actual: usize) -> Result<T, FrameTooShort> {
        Err(FrameTooShort { expected, actual })
    }

    #[test]
    fn short_frames_are_rejected() {
        assert_eq!(histogram(Layout::Canonical, &[0u8; 40]), short(86, 40));
        assert_eq!(histogram(Layout::Legacy, &[0u8; 61]), short(62, 61));
        // a legacy sized frame is too short for firmware 18
        assert_eq!(histogram(Layout::Canonical, &[0u8; 62]), short(86, 62));
        assert_eq!(config(Layout::Interim, &[0u8; 255]), short(CONFIG_LEN, 255));
        assert_eq!(config2(&[0u8; 8]), short(CONFIG2_LEN, 8));
        assert_eq!(pm(&[0u8; 4]), short(PM_LEN, 4));
        assert_eq!(pot_status(&[]), short(POT_STATUS_LEN, 0));

        // longer frames decode their leading record
        assert!(pm(&[0u8; 16]).is_ok());
    }

    #[test]
    fn layout_selection() {
        assert_eq!(Layout::for_major(14), Layout::Legacy);
        assert_eq!(Layout::for_major(17), Layout::Interim);
        assert_eq!(Layout::for_major(18), Layout::Canonical);
        assert_eq!(Layout::Canonical.histogram_len(), 86);
    }

    proptest! {
        #[test]
        fn float_round_trip(x in any::<f32>()) {
            let decoded = f32_le(x.to_le_bytes());
            prop_assert_eq!(decoded.to_bits(), x.to_bits());
        }

        #[test]
        fn u16_round_trip(x in any::<u16>()) {
            let [low, high] = x.to_le_bytes();
            prop_assert_eq!(u16_le(low, high), x);
        }
    }
}
