use core::fmt;

use heapless::String;

use crate::decode::Layout;

/// Length of the info string and serial number responses [bytes].
pub const INFO_STRING_LEN: usize = 60;

/// Oldest supported firmware major version.
pub const FIRMWARE_MIN: u8 = 14;
/// Newest supported firmware major version.
pub const FIRMWARE_MAX: u8 = 18;

const MODEL_TOKEN_LEN: usize = "OPC-N2".len();

/// Device model announced in the info string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Model {
    N1,
    N2,
}

/// Detected model and firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Firmware {
    pub model: Model,
    pub major: u8,
    pub minor: Option<u8>,
}

impl Firmware {
    pub fn is_supported(&self) -> bool {
        self.model == Model::N2 && (FIRMWARE_MIN..=FIRMWARE_MAX).contains(&self.major)
    }

    pub fn layout(&self) -> Layout {
        Layout::for_major(self.major)
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let model = match self.model {
            Model::N1 => "N1",
            Model::N2 => "N2",
        };
        write!(f, "Alphasense OPC-{}v{}", model, self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
        }
        Ok(())
    }
}

/// The device could not be used with this driver.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
pub enum FirmwareError {
    /// The info string names no known model or version.
    #[cfg_attr(feature = "thiserror", error("unrecognized info string {signature:02x?}"))]
    Unrecognized { signature: [u8; INFO_STRING_LEN] },
    /// The model or firmware version is not supported.
    #[cfg_attr(feature = "thiserror", error("unsupported device {firmware}"))]
    Unsupported {
        firmware: Firmware,
        signature: [u8; INFO_STRING_LEN],
    },
    /// The operation needs a newer firmware.
    #[cfg_attr(
        feature = "thiserror",
        error("operation requires firmware {required}+, device runs {found}")
    )]
    RequiresFirmware { required: u8, found: u8 },
}

/// Printable ASCII of an info string with the padding trimmed. Other bytes
/// are dropped wherever they appear.
pub fn text(raw: &[u8]) -> String<INFO_STRING_LEN> {
    let mut text = String::new();
    let printable = raw
        .iter()
        .filter(|b| b.is_ascii_graphic() || **b == b' ')
        .map(|&b| char::from(b));
    for c in printable {
        if c == ' ' && text.is_empty() {
            continue;
        }
        if text.push(c).is_err() {
            break;
        }
    }
    let end = text.trim_end().len();
    text.truncate(end);
    text
}

/// Classifies the info string returned by the handshake, e.g.
/// `OPC-N2 FirmwareVer=OPC-018.2....................BD`.
pub fn classify(raw: &[u8; INFO_STRING_LEN]) -> Result<Firmware, FirmwareError> {
    let unrecognized = || FirmwareError::Unrecognized { signature: *raw };
    let info = text(raw);

    let (model, at) = match (info.find("OPC-N2"), info.find("OPC-N1")) {
        (Some(at), _) => (Model::N2, at),
        (None, Some(at)) => (Model::N1, at),
        (None, None) => return Err(unrecognized()),
    };

    // the version follows the model token
    let bytes = &info.as_bytes()[at + MODEL_TOKEN_LEN..];
    let (major, minor) = match last_triple(bytes) {
        Some(at) => {
            let major = parse(&bytes[at..at + 3]).ok_or_else(unrecognized)?;
            let minor = match bytes.get(at + 3..at + 5) {
                Some([b'.', d]) if d.is_ascii_digit() => Some(d - b'0'),
                _ => None,
            };
            (major, minor)
        }
        // early firmware only reports a single digit
        None => match bytes.iter().rposition(u8::is_ascii_digit) {
            Some(at) => (bytes[at] - b'0', None),
            None => return Err(unrecognized()),
        },
    };

    let firmware = Firmware {
        model,
        major,
        minor,
    };
    if firmware.is_supported() {
        Ok(firmware)
    } else {
        Err(FirmwareError::Unsupported {
            firmware,
            signature: *raw,
        })
    }
}

/// Start of the last non-overlapping run of three digits.
fn last_triple(bytes: &[u8]) -> Option<usize> {
    let mut found = None;
    let mut i = 0;
    while i + 3 <= bytes.len() {
        if bytes[i..i + 3].iter().all(u8::is_ascii_digit) {
            found = Some(i);
            i += 3;
        } else {
            i += 1;
        }
    }
    found
}

fn parse(digits: &[u8]) -> Option<u8> {
    let mut value: u16 = 0;
    for d in digits {
        value = value * 10 + u16::from(d - b'0');
    }
    u8::try_from(value).ok()
}

#[cfg(test)]
pub(crate) fn info_string(text: &str) -> [u8; INFO_STRING_LEN] {
    let mut raw = [b' '; INFO_STRING_LEN];
    raw[..text.len()].copy_from_slice(text.as_bytes());
    raw
}
