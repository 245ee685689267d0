// SPDX-License-Identifier: Apache-2.0
//! api
//!
//! Layer: Domain
//! Purpose:
//! - In-band control frames: bit-rate, operating mode, network name
//!
//! Notes:
//! - API frames are never fanned out to other participants; the dispatcher
//!   interprets them and drops them.

use crate::domain::frame::{
    category_byte, check_category, FrameArray, FrameKind, FRAME_ARRAY_SIZE, OFFSET_PAYLOAD,
};
use crate::error::FrameError;

/// Sentinel bit-rate value meaning "unchanged / not applicable".
pub const BITRATE_NONE: i32 = -1;

/// Longest network name a NAME frame can carry, in bytes.
pub const NAME_MAX_LEN: usize = 63;

// Function discriminants, stored as u32 LE in the identifier slot.
const FUNC_NONE: u32 = 0;
const FUNC_BITRATE: u32 = 1;
const FUNC_CAN_MODE: u32 = 2;
const FUNC_DRIVER_INIT: u32 = 3;
const FUNC_DRIVER_RELEASE: u32 = 4;
const FUNC_NAME: u32 = 5;

const OFFSET_FUNCTION: usize = 2;

/// Operating mode requested of a CAN interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanMode {
    Stop,
    Start,
    ListenOnly,
}

impl CanMode {
    fn to_u8(self) -> u8 {
        match self {
            CanMode::Stop => 0,
            CanMode::Start => 1,
            CanMode::ListenOnly => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CanMode::Stop),
            1 => Some(CanMode::Start),
            2 => Some(CanMode::ListenOnly),
            _ => None,
        }
    }
}

/// An in-band control message.
///
/// `Bitrate` uses [`BITRATE_NONE`] for "not set"; `CanMode`, `DriverInit`
/// and `DriverRelease` are recognized but reserved for extension in the
/// core dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiFrame {
    None,
    Bitrate { nominal: i32, data: i32 },
    CanMode(CanMode),
    DriverInit,
    DriverRelease,
    Name(String),
}

impl ApiFrame {
    fn function(&self) -> u32 {
        match self {
            ApiFrame::None => FUNC_NONE,
            ApiFrame::Bitrate { .. } => FUNC_BITRATE,
            ApiFrame::CanMode(_) => FUNC_CAN_MODE,
            ApiFrame::DriverInit => FUNC_DRIVER_INIT,
            ApiFrame::DriverRelease => FUNC_DRIVER_RELEASE,
            ApiFrame::Name(_) => FUNC_NAME,
        }
    }

    /// Serialize into one wire unit.
    ///
    /// A name longer than [`NAME_MAX_LEN`] bytes is not representable;
    /// callers that accept external names must truncate first.
    pub fn encode(&self) -> FrameArray {
        let mut buf = [0u8; FRAME_ARRAY_SIZE];
        buf[0] = category_byte(FrameKind::Api);
        buf[OFFSET_FUNCTION..OFFSET_FUNCTION + 4].copy_from_slice(&self.function().to_le_bytes());
        match self {
            ApiFrame::None | ApiFrame::DriverInit | ApiFrame::DriverRelease => {}
            ApiFrame::Bitrate { nominal, data } => {
                buf[OFFSET_PAYLOAD..OFFSET_PAYLOAD + 4].copy_from_slice(&nominal.to_le_bytes());
                buf[OFFSET_PAYLOAD + 4..OFFSET_PAYLOAD + 8].copy_from_slice(&data.to_le_bytes());
            }
            ApiFrame::CanMode(mode) => {
                buf[OFFSET_PAYLOAD] = mode.to_u8();
            }
            ApiFrame::Name(name) => {
                let len = name.len().min(NAME_MAX_LEN);
                buf[OFFSET_PAYLOAD] = len as u8;
                buf[OFFSET_PAYLOAD + 1..OFFSET_PAYLOAD + 1 + len]
                    .copy_from_slice(&name.as_bytes()[..len]);
            }
        }
        buf
    }

    /// Deserialize one wire unit.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        check_category(bytes, FrameKind::Api)?;
        let function = u32::from_le_bytes([
            bytes[OFFSET_FUNCTION],
            bytes[OFFSET_FUNCTION + 1],
            bytes[OFFSET_FUNCTION + 2],
            bytes[OFFSET_FUNCTION + 3],
        ]);
        match function {
            FUNC_NONE => Ok(ApiFrame::None),
            FUNC_BITRATE => {
                let nominal = i32::from_le_bytes([
                    bytes[OFFSET_PAYLOAD],
                    bytes[OFFSET_PAYLOAD + 1],
                    bytes[OFFSET_PAYLOAD + 2],
                    bytes[OFFSET_PAYLOAD + 3],
                ]);
                let data = i32::from_le_bytes([
                    bytes[OFFSET_PAYLOAD + 4],
                    bytes[OFFSET_PAYLOAD + 5],
                    bytes[OFFSET_PAYLOAD + 6],
                    bytes[OFFSET_PAYLOAD + 7],
                ]);
                Ok(ApiFrame::Bitrate { nominal, data })
            }
            FUNC_CAN_MODE => CanMode::from_u8(bytes[OFFSET_PAYLOAD])
                .map(ApiFrame::CanMode)
                .ok_or(FrameError::InvalidPayload("CAN mode")),
            FUNC_DRIVER_INIT => Ok(ApiFrame::DriverInit),
            FUNC_DRIVER_RELEASE => Ok(ApiFrame::DriverRelease),
            FUNC_NAME => {
                let len = bytes[OFFSET_PAYLOAD] as usize;
                if len > NAME_MAX_LEN {
                    return Err(FrameError::InvalidPayload("name length"));
                }
                let raw = &bytes[OFFSET_PAYLOAD + 1..OFFSET_PAYLOAD + 1 + len];
                let name = std::str::from_utf8(raw)
                    .map_err(|_| FrameError::InvalidPayload("name encoding"))?;
                Ok(ApiFrame::Name(name.to_string()))
            }
            other => Err(FrameError::UnknownApiFunction(other)),
        }
    }
}
