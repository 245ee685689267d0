// SPDX-License-Identifier: Apache-2.0
//! mod
//!
//! Layer: Domain
//! Purpose:
//! - Wire format and typed frames; no I/O in this layer.

pub mod api;
pub mod error_frame;
pub mod frame;
