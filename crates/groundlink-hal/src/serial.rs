use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{HalError, Result};
use crate::traits::SerialStream;

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
    Nine,
}

impl DataBits {
    pub fn count(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
            DataBits::Nine => 9,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            9 => Ok(DataBits::Nine),
            other => Err(other),
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn count(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(other),
        }
    }
}

/// Parity mode, written as the usual single letter (`N`, `E`, `O`, `M`, `S`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Parity {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "N" => Some(Parity::None),
            "E" => Some(Parity::Even),
            "O" => Some(Parity::Odd),
            "M" => Some(Parity::Mark),
            "S" => Some(Parity::Space),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    fn bit_count(self) -> u8 {
        match self {
            Parity::None => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// UART line settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyS0`.
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    /// How long a read may block before reporting a timeout.
    pub read_timeout: Duration,
}

impl SerialSettings {
    /// 8N1 settings at `baud_rate` with a 50 ms read timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            read_timeout: Duration::from_millis(50),
        }
    }

    /// Bits on the wire per character: start + data + parity + stop.
    pub fn bits_per_char(&self) -> u32 {
        1 + u32::from(self.data_bits.count())
            + u32::from(self.parity.bit_count())
            + u32::from(self.stop_bits.count())
    }

    /// Time needed to clock `bytes` characters onto the wire.
    pub fn wire_time(&self, bytes: usize) -> Duration {
        let bits = bytes as u128 * u128::from(self.bits_per_char());
        let nanos = bits * 1_000_000_000 / u128::from(self.baud_rate.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Open the port through the `serialport` backend.
    pub fn open(&self) -> Result<SerialStream> {
        let port = serialport::new(&self.port, self.baud_rate)
            .data_bits(backend_data_bits(self.data_bits)?)
            .stop_bits(backend_stop_bits(self.stop_bits))
            .parity(backend_parity(self.parity)?)
            .timeout(self.read_timeout)
            .open()
            .map_err(|source| HalError::Serial {
                port: self.port.clone(),
                source,
            })?;

        info!(
            port = %self.port,
            baud = self.baud_rate,
            format = %format_args!(
                "{}{}{}",
                self.data_bits.count(),
                self.parity,
                self.stop_bits.count()
            ),
            "opened serial port"
        );
        let stream = SerialStream::from_port(port);
        debug!(?stream, "serial stream ready");
        Ok(stream)
    }
}

fn backend_data_bits(bits: DataBits) -> Result<serialport::DataBits> {
    match bits {
        DataBits::Five => Ok(serialport::DataBits::Five),
        DataBits::Six => Ok(serialport::DataBits::Six),
        DataBits::Seven => Ok(serialport::DataBits::Seven),
        DataBits::Eight => Ok(serialport::DataBits::Eight),
        DataBits::Nine => Err(HalError::Unsupported {
            setting: "data_bits",
            detail: "9-bit characters are not supported by the serial backend".to_string(),
        }),
    }
}

fn backend_stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn backend_parity(parity: Parity) -> Result<serialport::Parity> {
    match parity {
        Parity::None => Ok(serialport::Parity::None),
        Parity::Even => Ok(serialport::Parity::Even),
        Parity::Odd => Ok(serialport::Parity::Odd),
        Parity::Mark | Parity::Space => Err(HalError::Unsupported {
            setting: "parity",
            detail: format!("parity '{parity}' is not supported by the serial backend"),
        }),
    }
}
