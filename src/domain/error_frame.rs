// SPDX-License-Identifier: Apache-2.0
//! error_frame
//!
//! Layer: Domain
//! Purpose:
//! - CAN error frame: bus state, error type and the two error counters
//!
//! Notes:
//! - The positional payload layout (bytes 0..4) is wire contract and must
//!   not change without a protocol version bump.

use std::fmt;

use crate::domain::frame::{
    category_byte, check_category, FrameArray, FrameKind, FRAME_ARRAY_SIZE, OFFSET_PAYLOAD,
};
use crate::error::FrameError;

const ERROR_FRAME_DLC: u8 = 4;

/// Bus state reported in payload byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Active,
    Warn,
    Passive,
    BusOff,
}

impl BusState {
    fn to_u8(self) -> u8 {
        match self {
            BusState::Active => 0,
            BusState::Warn => 1,
            BusState::Passive => 2,
            BusState::BusOff => 3,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BusState::Active),
            1 => Some(BusState::Warn),
            2 => Some(BusState::Passive),
            3 => Some(BusState::BusOff),
            _ => None,
        }
    }
}

/// Error cause reported in payload byte 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    None,
    Bit0,
    Bit1,
    Stuff,
    Form,
    Crc,
    Ack,
}

impl ErrorType {
    fn to_u8(self) -> u8 {
        match self {
            ErrorType::None => 0,
            ErrorType::Bit0 => 1,
            ErrorType::Bit1 => 2,
            ErrorType::Stuff => 3,
            ErrorType::Form => 4,
            ErrorType::Crc => 5,
            ErrorType::Ack => 6,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ErrorType::None),
            1 => Some(ErrorType::Bit0),
            2 => Some(ErrorType::Bit1),
            3 => Some(ErrorType::Stuff),
            4 => Some(ErrorType::Form),
            5 => Some(ErrorType::Crc),
            6 => Some(ErrorType::Ack),
            _ => None,
        }
    }
}

/// A CAN error frame. DLC is always 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub state: BusState,
    pub error_type: ErrorType,
    pub rx_error_count: u8,
    pub tx_error_count: u8,
}

impl ErrorFrame {
    pub fn new(state: BusState, error_type: ErrorType) -> Self {
        Self {
            state,
            error_type,
            rx_error_count: 0,
            tx_error_count: 0,
        }
    }

    pub fn encode(&self) -> FrameArray {
        let mut buf = [0u8; FRAME_ARRAY_SIZE];
        buf[0] = category_byte(FrameKind::Error);
        buf[1] = ERROR_FRAME_DLC;
        buf[OFFSET_PAYLOAD] = self.state.to_u8();
        buf[OFFSET_PAYLOAD + 1] = self.error_type.to_u8();
        buf[OFFSET_PAYLOAD + 2] = self.rx_error_count;
        buf[OFFSET_PAYLOAD + 3] = self.tx_error_count;
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        check_category(bytes, FrameKind::Error)?;
        if bytes[1] != ERROR_FRAME_DLC {
            return Err(FrameError::InvalidDlc(bytes[1]));
        }
        let state = BusState::from_u8(bytes[OFFSET_PAYLOAD])
            .ok_or(FrameError::InvalidPayload("bus state"))?;
        let error_type = ErrorType::from_u8(bytes[OFFSET_PAYLOAD + 1])
            .ok_or(FrameError::InvalidPayload("error type"))?;
        Ok(Self {
            state,
            error_type,
            rx_error_count: bytes[OFFSET_PAYLOAD + 2],
            tx_error_count: bytes[OFFSET_PAYLOAD + 3],
        })
    }
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CAN error frame   ")?;
        match self.state {
            BusState::Active => write!(f, "Error active"),
            BusState::Warn => write!(f, "Warning level reached"),
            BusState::Passive => write!(f, "Error passive"),
            BusState::BusOff => write!(f, "Bus off"),
        }
    }
}
