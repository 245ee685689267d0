#![cfg(target_os = "linux")]

//! Linux SocketCAN adapter.
//!
//! Implementation notes:
//! - We try CAN-FD first (CanFdSocket). If it fails to open, fall back to
//!   classic CAN.
//! - Sockets run non-blocking; a would-block read reports "empty" to the
//!   dispatcher, which polls again on the next tick.
//! - Bit timing and operating mode live kernel-side on Linux
//!   (`ip link set can0 type can bitrate 500000`), so `set_bitrate` and
//!   `set_mode` accept the request and log it.

use std::io;

use socketcan::{CanAnyFrame, CanFdSocket, CanSocket, EmbeddedFrame, Socket};
use tracing::{debug, info, warn};

use crate::domain::api::CanMode;
use crate::domain::frame::{CanFrame, FrameArray};
use crate::ports::interface::{CanInterface, InterfaceError, InterfaceFeatures};

enum CanSocketKind {
    Fd(CanFdSocket),
    Classic(CanSocket),
}

/// A SocketCAN network device (e.g. `can0`, `vcan0`) behind the capability
/// interface.
pub struct SocketCanInterface {
    iface: String,
    socket: Option<CanSocketKind>,
}

impl SocketCanInterface {
    pub fn new(iface: impl Into<String>) -> Self {
        Self {
            iface: iface.into(),
            socket: None,
        }
    }
}

impl CanInterface for SocketCanInterface {
    fn connect(&mut self) -> Result<(), InterfaceError> {
        if self.socket.is_some() {
            return Ok(());
        }
        match CanFdSocket::open(&self.iface) {
            Ok(sock) => {
                sock.set_nonblocking(true)
                    .map_err(|_| InterfaceError::Device)?;
                info!(iface = %self.iface, "SocketCAN connected (CAN-FD socket)");
                self.socket = Some(CanSocketKind::Fd(sock));
                Ok(())
            }
            Err(e) => {
                warn!(iface = %self.iface, error = %e, "CAN-FD socket unavailable; falling back to classic CAN");
                let sock =
                    CanSocket::open(&self.iface).map_err(|_| InterfaceError::Channel)?;
                sock.set_nonblocking(true)
                    .map_err(|_| InterfaceError::Device)?;
                info!(iface = %self.iface, "SocketCAN connected (classic CAN socket)");
                self.socket = Some(CanSocketKind::Classic(sock));
                Ok(())
            }
        }
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            info!(iface = %self.iface, "SocketCAN disconnected");
        }
    }

    fn connected(&self) -> bool {
        self.socket.is_some()
    }

    fn supported_features(&self) -> InterfaceFeatures {
        match &self.socket {
            Some(CanSocketKind::Fd(_)) => InterfaceFeatures::CAN_FD,
            _ => InterfaceFeatures::empty(),
        }
    }

    fn set_mode(&mut self, mode: CanMode) -> Result<(), InterfaceError> {
        match mode {
            CanMode::Start | CanMode::Stop => {
                // Interface up/down is an `ip link` concern.
                debug!(iface = %self.iface, ?mode, "mode change delegated to the kernel interface");
                Ok(())
            }
            CanMode::ListenOnly => Err(InterfaceError::Mode),
        }
    }

    fn set_bitrate(&mut self, nominal: i32, data: i32) -> Result<(), InterfaceError> {
        // Bit timing is configured kernel-side; accept and record the values.
        debug!(iface = %self.iface, nominal, data, "bit-rate configured kernel-side (ip link)");
        Ok(())
    }

    fn read(&mut self) -> Result<Option<FrameArray>, InterfaceError> {
        let Some(socket) = &self.socket else {
            return Err(InterfaceError::Device);
        };
        let result = match socket {
            CanSocketKind::Fd(sock) => sock.read_frame().map(CanAnyFrame::from),
            CanSocketKind::Classic(sock) => sock.read_frame().map(CanAnyFrame::from),
        };
        match result {
            Ok(any) => Ok(wire_from_socketcan(&self.iface, any)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                warn!(iface = %self.iface, error = %e, "SocketCAN read failed");
                Err(InterfaceError::Device)
            }
        }
    }

    fn write(&mut self, frame: &CanFrame) -> Result<(), InterfaceError> {
        let Some(socket) = &self.socket else {
            return Err(InterfaceError::Device);
        };
        let id = make_id(frame.id(), frame.is_extended())?;
        let result = match socket {
            CanSocketKind::Fd(sock) => {
                use socketcan::frame::FdFlags;

                if frame.is_fd() {
                    let mut flags = FdFlags::empty();
                    if frame.is_brs() {
                        flags |= FdFlags::BRS;
                    }
                    if frame.is_esi() {
                        flags |= FdFlags::ESI;
                    }
                    let fd_frame = socketcan::CanFdFrame::with_flags(id, frame.data(), flags)
                        .ok_or(InterfaceError::Device)?;
                    sock.write_frame(&CanAnyFrame::from(fd_frame))
                } else {
                    let classic = classic_frame(id, frame)?;
                    sock.write_frame(&CanAnyFrame::from(classic))
                }
            }
            CanSocketKind::Classic(sock) => {
                if frame.is_fd() {
                    return Err(InterfaceError::Mode);
                }
                let classic = classic_frame(id, frame)?;
                sock.write_frame(&classic)
            }
        };
        match result {
            Ok(()) => Ok(()),
            // Non-blocking push: a full TX queue drops the frame.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(iface = %self.iface, "SocketCAN TX queue full, frame dropped");
                Ok(())
            }
            Err(e) => {
                warn!(iface = %self.iface, error = %e, "SocketCAN write failed");
                Err(InterfaceError::Device)
            }
        }
    }
}

fn classic_frame(id: socketcan::Id, frame: &CanFrame) -> Result<socketcan::CanFrame, InterfaceError> {
    if frame.is_remote() {
        socketcan::CanFrame::new_remote(id, frame.dlc() as usize).ok_or(InterfaceError::Device)
    } else {
        socketcan::CanFrame::new(id, frame.data()).ok_or(InterfaceError::Device)
    }
}

/// Convert a received SocketCAN frame into one wire unit. Frames that do
/// not map onto the wire format are skipped.
fn wire_from_socketcan(iface: &str, any: CanAnyFrame) -> Option<FrameArray> {
    let converted = match any {
        CanAnyFrame::Normal(f) => CanFrame::new(id_to_u32(f.id()), f.data()),
        CanAnyFrame::Fd(f) => CanFrame::new_fd(id_to_u32(f.id()), f.data(), f.is_brs(), f.is_esi()),
        CanAnyFrame::Remote(f) => CanFrame::new_remote(id_to_u32(f.id()), f.dlc() as u8),
        CanAnyFrame::Error(_) => {
            // Kernel error frames need berr-reporting configuration we do
            // not manage; drop them here.
            debug!(iface = %iface, "kernel error frame skipped");
            return None;
        }
    };
    match converted {
        Ok(frame) => Some(frame.encode()),
        Err(e) => {
            debug!(iface = %iface, error = %e, "unrepresentable SocketCAN frame skipped");
            None
        }
    }
}

/// Convert socketcan::Id into a raw u32 arbitration id.
fn id_to_u32(id: socketcan::Id) -> u32 {
    match id {
        socketcan::Id::Standard(sid) => sid.as_raw() as u32,
        socketcan::Id::Extended(eid) => eid.as_raw(),
    }
}

fn make_id(id_raw: u32, extended: bool) -> Result<socketcan::Id, InterfaceError> {
    use socketcan::{ExtendedId, Id, StandardId};

    if extended {
        let ext = ExtendedId::new(id_raw).ok_or(InterfaceError::Device)?;
        Ok(Id::from(ext))
    } else {
        let std = StandardId::new(id_raw as u16).ok_or(InterfaceError::Device)?;
        Ok(Id::from(std))
    }
}
