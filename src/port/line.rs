//! Portable line configuration and its validation.
//!
//! A line configuration arrives as a baud integer, a three-character mode
//! code such as `"8N1"` and a flag word. [`LineConfig::new`] validates all
//! three without touching any device; the platform backends then turn the
//! validated value into their native line-control structure.

use super::error::PortError;
use super::sys;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Flags accepted by `open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const NONE: Self = Self(0);

    /// Hardware flow control using the RTS/CTS lines.
    pub const HW_FLOW_CONTROL: Self = Self(1 << 0);

    /// Build flags from raw bits, dropping bits that carry no meaning.
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::HW_FLOW_CONTROL.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    fn from_code(c: char) -> Option<Self> {
        match c {
            '5' => Some(Self::Five),
            '6' => Some(Self::Six),
            '7' => Some(Self::Seven),
            '8' => Some(Self::Eight),
            _ => None,
        }
    }

    /// Character width in bits.
    pub fn width(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    fn from_code(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Self::None),
            'E' => Some(Self::Even),
            'O' => Some(Self::Odd),
            _ => None,
        }
    }

    fn code(self) -> char {
        match self {
            Self::None => 'N',
            Self::Even => 'E',
            Self::Odd => 'O',
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    fn from_code(c: char) -> Option<Self> {
        match c {
            '1' => Some(Self::One),
            '2' => Some(Self::Two),
            _ => None,
        }
    }

    fn code(self) -> char {
        match self {
            Self::One => '1',
            Self::Two => '2',
        }
    }
}

/// Resolved flow-control policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    /// RTS is driven by the driver's handshake logic, output waits on CTS.
    Hardware,
}

/// Character framing decoded from a mode code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for Mode {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl FromStr for Mode {
    type Err = PortError;

    fn from_str(code: &str) -> Result<Self, PortError> {
        let chars: Vec<char> = code.chars().collect();
        let &[data, parity, stop] = chars.as_slice() else {
            return Err(PortError::invalid_argument(format!(
                "invalid mode '{code}': expected exactly 3 characters"
            )));
        };

        let data_bits = DataBits::from_code(data).ok_or_else(|| {
            PortError::invalid_argument(format!("invalid number of data bits '{data}' in mode '{code}'"))
        })?;
        let parity = Parity::from_code(parity).ok_or_else(|| {
            PortError::invalid_argument(format!("invalid parity '{parity}' in mode '{code}'"))
        })?;
        let stop_bits = StopBits::from_code(stop).ok_or_else(|| {
            PortError::invalid_argument(format!("invalid number of stop bits '{stop}' in mode '{code}'"))
        })?;

        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.data_bits.width(),
            self.parity.code(),
            self.stop_bits.code()
        )
    }
}

/// A validated line configuration.
///
/// Construction is the only validation point, so every `LineConfig` in
/// circulation is one the platform backend can translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineConfig {
    baud_rate: u32,
    mode: Mode,
    flow_control: FlowControl,
}

impl LineConfig {
    /// Validate a `(baud, mode, flags)` triple.
    ///
    /// # Errors
    ///
    /// - `PortError::UnsupportedBaudRate` if `baud_rate` is not in
    ///   [`supported_baud_rates`]; rates are never rounded
    /// - `PortError::InvalidArgument` if `mode` is malformed
    pub fn new(baud_rate: u32, mode: &str, flags: OpenFlags) -> Result<Self, PortError> {
        if !is_supported_baud_rate(baud_rate) {
            return Err(PortError::UnsupportedBaudRate(baud_rate));
        }
        let mode = mode.parse()?;
        let flow_control = if flags.contains(OpenFlags::HW_FLOW_CONTROL) {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        Ok(Self {
            baud_rate,
            mode,
            flow_control,
        })
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn data_bits(&self) -> DataBits {
        self.mode.data_bits
    }

    pub fn parity(&self) -> Parity {
        self.mode.parity
    }

    pub fn stop_bits(&self) -> StopBits {
        self.mode.stop_bits
    }

    pub fn flow_control(&self) -> FlowControl {
        self.flow_control
    }

    pub fn hardware_flow_control(&self) -> bool {
        self.flow_control == FlowControl::Hardware
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.baud_rate, self.mode)?;
        if self.hardware_flow_control() {
            f.write_str(" rts/cts")?;
        }
        Ok(())
    }
}

/// Baud rates the current platform backend can program.
pub fn supported_baud_rates() -> &'static [u32] {
    sys::SUPPORTED_BAUD_RATES
}

pub fn is_supported_baud_rate(baud_rate: u32) -> bool {
    sys::SUPPORTED_BAUD_RATES.contains(&baud_rate)
}

/// Options that change how the channel is acquired, not how the line runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Take an advisory exclusive lock so a second process cannot open the
    /// same device. Ignored on Windows, where the handle is never shared.
    pub exclusive_lock: bool,
}
