//! Construction-time configuration for the transports.
//!
//! Every config type can be built directly or from a JSON object via
//! `from_value`. Integer fields accept JSON numbers or numeric strings; the
//! first missing or invalid field is reported by name. Millisecond fields
//! must be at least 1.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use groundlink_hal::{DataBits, Parity, SerialSettings, StopBits};
use serde_json::{Map, Value};

use crate::error::ConfigError;

type Result<T> = std::result::Result<T, ConfigError>;

/// Baud rates accepted for the RS-485 line.
pub const BAUD_RANGE: RangeInclusive<u32> = 1_200..=2_000_000;

/// Accepted range for `*_ms` fields. A zero poll or read timeout would spin.
pub const MILLIS_RANGE: RangeInclusive<u32> = 1..=u32::MAX;

/// Highest radio channel number.
pub const MAX_CHANNEL: u8 = u8::MAX;

const FRAMED_SECTION: &str = "framed serial";
const BUS_SECTION: &str = "RS485 bus";
const RADIO_SECTION: &str = "radio";

/// Settings for [`FramedSerial`](crate::FramedSerial).
#[derive(Debug, Clone, PartialEq)]
pub struct FramedSerialConfig {
    /// UART device path.
    pub port: String,
    pub baud_rate: u32,
    /// Driver-enable GPIO (high while transmitting).
    pub de_pin: u32,
    /// Receiver-enable GPIO. Equal to `de_pin` when both are tied together.
    pub re_pin: u32,
    /// Upper bound on a single UART read.
    pub serial_timeout: Duration,
}

impl FramedSerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32, de_pin: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            de_pin,
            re_pin: de_pin,
            serial_timeout: Duration::from_millis(50),
        }
    }

    /// Set a separate receiver-enable line.
    pub fn with_re_pin(mut self, re_pin: u32) -> Self {
        self.re_pin = re_pin;
        self
    }

    /// Required: `port`, `baudrate`, `de_pin`.
    /// Optional: `re_pin`, `serial_timeout_ms`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(FRAMED_SECTION, value)?;
        let port = fields.required_string("port")?;
        let baud_rate = fields.required_u32("baudrate", BAUD_RANGE)?;
        let de_pin = fields.required_u32("de_pin", 0..=u32::MAX)?;
        let re_pin = fields.optional_u32("re_pin", de_pin, 0..=u32::MAX)?;
        let serial_timeout = fields.optional_millis("serial_timeout_ms", Duration::from_millis(50))?;

        Ok(Self {
            port,
            baud_rate,
            de_pin,
            re_pin,
            serial_timeout,
        })
    }

    /// 8N1 UART settings for this link.
    pub fn serial_settings(&self) -> SerialSettings {
        let mut settings = SerialSettings::new(self.port.clone(), self.baud_rate);
        settings.read_timeout = self.serial_timeout;
        settings
    }
}

/// Settings for [`RawBus`](crate::RawBus).
#[derive(Debug, Clone, PartialEq)]
pub struct RawBusConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub de_pin: u32,
    pub re_pin: u32,
    /// Receive readiness timeout.
    pub poll_interval: Duration,
    /// Upper bound on waiting for pending bytes to drain at shutdown.
    pub shutdown_timeout: Duration,
}

impl RawBusConfig {
    /// Validate line settings against the supported ranges.
    pub fn new(baud_rate: u32, data_bits: u8, stop_bits: u8, parity: &str) -> Result<Self> {
        if !BAUD_RANGE.contains(&baud_rate) {
            return Err(out_of_range(BUS_SECTION, "baudrate", baud_rate, &BAUD_RANGE));
        }
        let data_bits = DataBits::try_from(data_bits)
            .map_err(|bits| out_of_range(BUS_SECTION, "data_bits", bits, &(5..=9)))?;
        let stop_bits = StopBits::try_from(stop_bits)
            .map_err(|bits| out_of_range(BUS_SECTION, "stop_bits", bits, &(1..=2)))?;
        let parity = Parity::from_letter(parity).ok_or_else(|| ConfigError::Invalid {
            section: BUS_SECTION,
            field: "parity",
            reason: format!("{parity:?} not in ['N', 'E', 'O', 'M', 'S']"),
        })?;

        Ok(Self {
            port: "/dev/ttyS0".to_string(),
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            de_pin: 5,
            re_pin: 6,
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(1),
        })
    }

    /// Required: `baudrate`, `data_bits`, `stop_bits`, `parity`.
    /// Optional: `port`, `de_pin`, `re_pin`, `poll_interval_ms`, `shutdown_timeout_ms`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(BUS_SECTION, value)?;
        let baud_rate = fields.required_u32("baudrate", BAUD_RANGE)?;
        let data_bits = fields.required_u32("data_bits", 5..=9)?;
        let stop_bits = fields.required_u32("stop_bits", 1..=2)?;
        let parity = fields.required_string("parity")?;

        // Ranges were checked above, so the narrowing casts are lossless.
        let mut config = Self::new(baud_rate, data_bits as u8, stop_bits as u8, &parity)?;
        config.port = fields.optional_string("port", &config.port)?;
        config.de_pin = fields.optional_u32("de_pin", config.de_pin, 0..=u32::MAX)?;
        config.re_pin = fields.optional_u32("re_pin", config.re_pin, 0..=u32::MAX)?;
        config.poll_interval = fields.optional_millis("poll_interval_ms", config.poll_interval)?;
        config.shutdown_timeout =
            fields.optional_millis("shutdown_timeout_ms", config.shutdown_timeout)?;
        Ok(config)
    }

    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            read_timeout: self.poll_interval,
        }
    }
}

/// Settings for [`Radio`](crate::Radio).
#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    /// WDS-generated header holding the property table.
    pub radio_config_path: PathBuf,
    pub channel: u8,
    pub spi_device: PathBuf,
    pub spi_speed_hz: u32,
    pub reset_pin: u32,
    /// NIRQ input (active low).
    pub irq_pin: u32,
    /// Upper bound on each clear-to-send poll.
    pub cts_timeout: Duration,
    /// Upper bound on waiting for queued packets at shutdown.
    pub shutdown_timeout: Duration,
}

impl RadioConfig {
    pub fn new(radio_config_path: impl Into<PathBuf>, channel: u8) -> Self {
        Self {
            radio_config_path: radio_config_path.into(),
            channel,
            spi_device: PathBuf::from("/dev/spidev0.0"),
            spi_speed_hz: 1_000_000,
            reset_pin: 25,
            irq_pin: 24,
            cts_timeout: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    /// Required: `radio_config_path`, `channel`.
    /// Optional: `spi_device`, `spi_speed_hz`, `reset_pin`, `irq_pin`,
    /// `cts_timeout_ms`, `shutdown_timeout_ms`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let fields = Fields::new(RADIO_SECTION, value)?;
        let path = fields.required_string("radio_config_path")?;
        let channel = fields.required_u32("channel", 0..=u32::from(MAX_CHANNEL))?;

        let mut config = Self::new(path, channel as u8);
        let spi_device = config.spi_device.to_string_lossy().into_owned();
        config.spi_device = PathBuf::from(fields.optional_string("spi_device", &spi_device)?);
        config.spi_speed_hz = fields.optional_u32("spi_speed_hz", config.spi_speed_hz, 1..=u32::MAX)?;
        config.reset_pin = fields.optional_u32("reset_pin", config.reset_pin, 0..=u32::MAX)?;
        config.irq_pin = fields.optional_u32("irq_pin", config.irq_pin, 0..=u32::MAX)?;
        config.cts_timeout = fields.optional_millis("cts_timeout_ms", config.cts_timeout)?;
        config.shutdown_timeout =
            fields.optional_millis("shutdown_timeout_ms", config.shutdown_timeout)?;
        Ok(config)
    }
}

/// A configuration file holding any subset of the transport sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkConfig {
    pub framed: Option<FramedSerialConfig>,
    pub bus: Option<RawBusConfig>,
    pub radio: Option<RadioConfig>,
}

impl LinkConfig {
    /// Parse the `framed`, `bus` and `radio` sections of a JSON object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let root = value.as_object().ok_or_else(|| ConfigError::Invalid {
            section: "link",
            field: "(root)",
            reason: "expected a JSON object".to_string(),
        })?;
        let section = |name: &str| root.get(name).filter(|v| !v.is_null());

        Ok(Self {
            framed: section("framed")
                .map(FramedSerialConfig::from_value)
                .transpose()?,
            bus: section("bus").map(RawBusConfig::from_value).transpose()?,
            radio: section("radio").map(RadioConfig::from_value).transpose()?,
        })
    }

    /// Load a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_value(&value)
    }
}

struct Fields<'a> {
    section: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(section: &'static str, value: &'a Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| ConfigError::Invalid {
            section,
            field: "(root)",
            reason: format!("expected a JSON object, got {}", type_name(value)),
        })?;
        Ok(Self { section, map })
    }

    fn get(&self, field: &'static str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &'static str) -> Result<&'a Value> {
        self.get(field).ok_or(ConfigError::Missing {
            section: self.section,
            field,
        })
    }

    fn invalid(&self, field: &'static str, reason: String) -> ConfigError {
        ConfigError::Invalid {
            section: self.section,
            field,
            reason,
        }
    }

    fn integer(&self, field: &'static str, value: &Value) -> Result<i64> {
        let parsed = match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            self.invalid(
                field,
                format!("must be an integer, got {} {value}", type_name(value)),
            )
        })
    }

    fn u32_in(&self, field: &'static str, value: &Value, range: RangeInclusive<u32>) -> Result<u32> {
        let raw = self.integer(field, value)?;
        u32::try_from(raw)
            .ok()
            .filter(|v| range.contains(v))
            .ok_or_else(|| out_of_range(self.section, field, raw, &range))
    }

    fn required_u32(&self, field: &'static str, range: RangeInclusive<u32>) -> Result<u32> {
        let value = self.required(field)?;
        self.u32_in(field, value, range)
    }

    fn optional_u32(
        &self,
        field: &'static str,
        default: u32,
        range: RangeInclusive<u32>,
    ) -> Result<u32> {
        match self.get(field) {
            Some(value) => self.u32_in(field, value, range),
            None => Ok(default),
        }
    }

    fn optional_millis(&self, field: &'static str, default: Duration) -> Result<Duration> {
        match self.get(field) {
            Some(value) => {
                let ms = self.u32_in(field, value, MILLIS_RANGE)?;
                Ok(Duration::from_millis(u64::from(ms)))
            }
            None => Ok(default),
        }
    }

    fn string(&self, field: &'static str, value: &Value) -> Result<String> {
        value.as_str().map(str::to_string).ok_or_else(|| {
            self.invalid(
                field,
                format!("must be a string, got {}", type_name(value)),
            )
        })
    }

    fn required_string(&self, field: &'static str) -> Result<String> {
        let value = self.required(field)?;
        self.string(field, value)
    }

    fn optional_string(&self, field: &'static str, default: &str) -> Result<String> {
        match self.get(field) {
            Some(value) => self.string(field, value),
            None => Ok(default.to_string()),
        }
    }
}

fn out_of_range<T: std::fmt::Display, R: std::fmt::Display>(
    section: &'static str,
    field: &'static str,
    value: T,
    range: &RangeInclusive<R>,
) -> ConfigError {
    ConfigError::Invalid {
        section,
        field,
        reason: format!("{value} outside {}..={}", range.start(), range.end()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
