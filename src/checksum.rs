use crate::types::HistogramReading;

/// The transmitted checksum does not match the bin counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[cfg_attr(
    feature = "thiserror",
    error("histogram checksum {actual:#06x} does not match bin sum {expected:#06x}")
)]
pub struct ChecksumMismatch {
    /// Sum of the bin counts modulo 2^16
    pub expected: u16,
    /// Checksum field as transmitted
    pub actual: u16,
}

/// Sum of the bin counts truncated to 16 bits.
pub(crate) fn checksum(bins: &[u16]) -> u16 {
    let mut sum: u16 = 0;
    for count in bins.iter().copied() {
        sum = sum.wrapping_add(count);
    }
    return sum;
}

pub fn validate(reading: &HistogramReading) -> bool {
    checksum(&reading.bins) == reading.checksum
}

pub fn verify(reading: &HistogramReading) -> Result<(), ChecksumMismatch> {
    let expected = checksum(&reading.bins);
    if expected == reading.checksum {
        Ok(())
    } else {
        Err(ChecksumMismatch {
            expected,
            actual: reading.checksum,
        })
    }
}
