use bitflags::bitflags;
use thiserror::Error;

use crate::domain::api::CanMode;
use crate::domain::frame::{CanFrame, FrameArray};

bitflags! {
    /// Capability bits a hardware interface advertises at runtime.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterfaceFeatures: u32 {
        /// The device reports bus error frames.
        const ERROR_FRAMES = 0x01;
        /// The device supports CAN FD framing.
        const CAN_FD = 0x02;
        /// The device can be put into listen-only mode.
        const LISTEN_ONLY = 0x04;
    }
}

/// Diagnostic codes returned by hardware operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterfaceError {
    #[error("driver library not available")]
    Library,
    #[error("channel not available")]
    Channel,
    #[error("bit-rate not supported by the device")]
    Bitrate,
    #[error("device not available")]
    Device,
    #[error("operation mode not supported")]
    Mode,
    #[error("device already in use")]
    InUse,
}

/// Capability interface every hardware CAN plugin exposes to a network.
///
/// All operations are non-blocking; the dispatcher polls `read` on its tick
/// and pushes writes immediately. Plugins are constructed externally and
/// handed to [`crate::app::network::CanNetwork::add_interface`] as a boxed
/// trait object.
pub trait CanInterface: Send {
    /// Open the device.
    fn connect(&mut self) -> Result<(), InterfaceError>;

    /// Release the device. Idempotent.
    fn disconnect(&mut self);

    /// Live connection status.
    fn connected(&self) -> bool;

    /// Capabilities discovered at runtime.
    fn supported_features(&self) -> InterfaceFeatures;

    /// Switch the device between start / stop / listen-only.
    fn set_mode(&mut self, mode: CanMode) -> Result<(), InterfaceError>;

    /// Configure nominal and data-phase bit timing. `data` may be the
    /// [`crate::domain::api::BITRATE_NONE`] sentinel.
    fn set_bitrate(&mut self, nominal: i32, data: i32) -> Result<(), InterfaceError>;

    /// Non-blocking pull of one received frame array. `Ok(None)` means no
    /// data is pending.
    fn read(&mut self) -> Result<Option<FrameArray>, InterfaceError>;

    /// Non-blocking push of one CAN data frame.
    fn write(&mut self, frame: &CanFrame) -> Result<(), InterfaceError>;
}
