// SPDX-License-Identifier: Apache-2.0
//! canhubd — a CAN bus server.
//!
//! Hosts one or more virtual CAN networks, each exposed to clients over TCP
//! in a fixed-width binary frame format. Every client on a network observes
//! every other participant's traffic, as if they all shared a physical bus.
//! A network can optionally be bridged to a hardware CAN interface through
//! the [`ports::interface::CanInterface`] capability trait.

pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod ports;

pub use app::network::{CanNetwork, DEFAULT_BITRATE, DISPATCH_PERIOD_MS, STATISTICS_PERIOD_MS};
pub use app::registry::{HARDWARE_SOURCE_ID, MAX_SESSIONS};
pub use app::server::CanServer;
pub use app::stats::StatisticsSnapshot;
pub use domain::api::{ApiFrame, CanMode, BITRATE_NONE};
pub use domain::error_frame::{BusState, ErrorFrame, ErrorType};
pub use domain::frame::{frame_kind, CanFrame, Frame, FrameArray, FrameKind, FRAME_ARRAY_SIZE};
pub use error::{FrameError, NetworkError};
pub use ports::interface::{CanInterface, InterfaceError, InterfaceFeatures};
