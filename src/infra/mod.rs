// SPDX-License-Identifier: Apache-2.0
//! mod
//!
//! Layer: Infrastructure
//! Purpose:
//! - Concrete hardware adapters behind the capability interface.

pub mod socketcan_if;

#[cfg(target_os = "linux")]
pub use socketcan_if::SocketCanInterface;
