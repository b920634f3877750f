//! # StepManiaX pad wire protocol
//!
//! Every logical packet starts with a single ASCII tag byte identifying the
//! command or response, followed by a tag-specific payload. Multi-byte
//! integers are little-endian.
//!
//! ## Host to pad
//!
//! | Tag | Payload |
//! |-----|---------|
//! | `w` | 1-byte length `n`, then `n` raw configuration bytes |
//! | `g` | none (read configuration) |
//! | `f` | none (factory reset) |
//! | `C` | none (force recalibration) |
//! | `R` | none (panel reset) |
//! | `y` | 1-byte [`SensorTestMode`] |
//!
//! All commands except `w` are terminated with `'\n'`, which the firmware
//! uses to delimit its text commands.
//!
//! ## Pad to host
//!
//! - `g`: 1-byte length `n`, then `n` configuration bytes.
//! - `y`: echoed mode byte, word count `c`, then `c` little-endian `u16`s.
//!   See [`crate::sensor`] for how the words are laid out.

use crate::config::{CONFIG_SIZE, PadConfig};
use crate::error::{Result, SmxError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

// --- Constants ---

pub const TAG_WRITE_CONFIG: u8 = b'w';
pub const TAG_READ_CONFIG: u8 = b'g';
pub const TAG_FACTORY_RESET: u8 = b'f';
pub const TAG_FORCE_RECALIBRATION: u8 = b'C';
pub const TAG_RESET_PANELS: u8 = b'R';
pub const TAG_SENSOR_TEST: u8 = b'y';

/// Terminator appended to the single-letter commands.
pub const COMMAND_TERMINATOR: u8 = b'\n';

/// Tag + echoed mode + word count.
const SENSOR_RESPONSE_HEADER_SIZE: usize = 3;

/// Diagnostic modes the pad can report sensor data in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SensorTestMode {
    /// Sensor polling disabled. Never sent on the wire.
    #[default]
    #[strum(to_string = "off")]
    Off = 0,
    #[strum(to_string = "uncalibrated values")]
    UncalibratedValues = b'0',
    #[strum(to_string = "calibrated values")]
    CalibratedValues = b'1',
    #[strum(to_string = "noise")]
    Noise = b'2',
    #[strum(to_string = "tare")]
    Tare = b'3',
}

impl SensorTestMode {
    pub fn is_off(&self) -> bool {
        *self == SensorTestMode::Off
    }
}

/// A command sent from the host to the pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    WriteConfig(PadConfig),
    ReadConfig,
    FactoryReset,
    ForceRecalibration,
    ResetPanels,
    RequestSensorTest(SensorTestMode),
}

impl Command {
    pub fn tag(&self) -> u8 {
        match self {
            Command::WriteConfig(_) => TAG_WRITE_CONFIG,
            Command::ReadConfig => TAG_READ_CONFIG,
            Command::FactoryReset => TAG_FACTORY_RESET,
            Command::ForceRecalibration => TAG_FORCE_RECALIBRATION,
            Command::ResetPanels => TAG_RESET_PANELS,
            Command::RequestSensorTest(_) => TAG_SENSOR_TEST,
        }
    }

    /// Serialize the command into the bytes handed to the transport.
    pub fn encode(&self) -> Bytes {
        match self {
            Command::WriteConfig(config) => {
                let mut buf = BytesMut::with_capacity(2 + CONFIG_SIZE);
                buf.put_u8(TAG_WRITE_CONFIG);
                buf.put_u8(CONFIG_SIZE as u8);
                buf.put_slice(config.as_bytes());
                buf.freeze()
            }
            Command::RequestSensorTest(mode) => Bytes::from(vec![TAG_SENSOR_TEST, u8::from(*mode), COMMAND_TERMINATOR]),
            other => Bytes::from(vec![other.tag(), COMMAND_TERMINATOR]),
        }
    }

    /// Parse a host command, as the pad firmware would.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&tag, mut rest) = bytes
            .split_first()
            .ok_or_else(|| SmxError::InvalidPacket("empty command".to_string()))?;

        match tag {
            TAG_WRITE_CONFIG => {
                if rest.remaining() < 1 {
                    return Err(SmxError::InsufficientData { expected: 2, actual: bytes.len() });
                }
                let len = rest.get_u8() as usize;
                if rest.len() < len {
                    return Err(SmxError::InsufficientData {
                        expected: len + 2,
                        actual: bytes.len(),
                    });
                }
                let mut config = PadConfig::default();
                config.copy_from_prefix(&rest[..len]);
                Ok(Command::WriteConfig(config))
            }
            TAG_READ_CONFIG => Ok(Command::ReadConfig),
            TAG_FACTORY_RESET => Ok(Command::FactoryReset),
            TAG_FORCE_RECALIBRATION => Ok(Command::ForceRecalibration),
            TAG_RESET_PANELS => Ok(Command::ResetPanels),
            TAG_SENSOR_TEST => {
                let mode = *rest
                    .first()
                    .ok_or(SmxError::InsufficientData { expected: 2, actual: bytes.len() })?;
                SensorTestMode::try_from(mode)
                    .map(Command::RequestSensorTest)
                    .map_err(|_| SmxError::UnknownSensorMode(mode))
            }
            other => Err(SmxError::InvalidPacket(format!("unknown command tag {other:#04x}"))),
        }
    }
}

/// The raw body of a `y` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorTestResponse {
    /// Mode byte echoed back from the request. Kept raw, since a response may
    /// answer a request sent by another application.
    pub mode: u8,
    pub words: Vec<u16>,
}

/// A packet received from the pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Configuration bytes, exactly as many as the packet declared.
    ConfigReadback(Bytes),
    SensorTestData(SensorTestResponse),
    /// Any tag this layer doesn't handle. Ignored for forward compatibility.
    Unknown { tag: u8, payload: Bytes },
}

impl Packet {
    pub fn tag(&self) -> u8 {
        match self {
            Packet::ConfigReadback(_) => TAG_READ_CONFIG,
            Packet::SensorTestData(_) => TAG_SENSOR_TEST,
            Packet::Unknown { tag, .. } => *tag,
        }
    }

    pub fn from_bytes(mut bytes: Bytes) -> Result<Self> {
        let Some(&tag) = bytes.first() else {
            return Err(SmxError::InvalidPacket("empty packet".to_string()));
        };

        match tag {
            TAG_READ_CONFIG => {
                if bytes.len() < 2 {
                    return Err(SmxError::InvalidPacket(format!(
                        "configuration packet too short ({} bytes)",
                        bytes.len()
                    )));
                }
                let len = bytes[1] as usize;
                if bytes.len() < len + 2 {
                    return Err(SmxError::InsufficientData {
                        expected: len + 2,
                        actual: bytes.len(),
                    });
                }
                Ok(Packet::ConfigReadback(bytes.slice(2..len + 2)))
            }
            TAG_SENSOR_TEST => {
                if bytes.len() < SENSOR_RESPONSE_HEADER_SIZE {
                    return Err(SmxError::InsufficientData {
                        expected: SENSOR_RESPONSE_HEADER_SIZE,
                        actual: bytes.len(),
                    });
                }
                let count = bytes[2] as usize;
                let expected = SENSOR_RESPONSE_HEADER_SIZE + count * 2;
                if bytes.len() < expected {
                    return Err(SmxError::InsufficientData {
                        expected,
                        actual: bytes.len(),
                    });
                }

                bytes.advance(1);
                let mode = bytes.get_u8();
                bytes.advance(1);
                let words = (0..count).map(|_| bytes.get_u16_le()).collect();
                Ok(Packet::SensorTestData(SensorTestResponse { mode, words }))
            }
            _ => Ok(Packet::Unknown {
                tag,
                payload: bytes.slice(1..),
            }),
        }
    }

    /// Serialize the packet the way the pad sends it.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Packet::ConfigReadback(data) => {
                buf.put_u8(TAG_READ_CONFIG);
                buf.put_u8(data.len().min(u8::MAX as usize) as u8);
                buf.put_slice(&data[..data.len().min(u8::MAX as usize)]);
            }
            Packet::SensorTestData(response) => {
                let count = response.words.len().min(u8::MAX as usize);
                buf.put_u8(TAG_SENSOR_TEST);
                buf.put_u8(response.mode);
                buf.put_u8(count as u8);
                for word in &response.words[..count] {
                    buf.put_u16_le(*word);
                }
            }
            Packet::Unknown { tag, payload } => {
                buf.put_u8(*tag);
                buf.put_slice(payload);
            }
        }
        buf.freeze()
    }
}
