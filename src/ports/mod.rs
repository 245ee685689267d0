// SPDX-License-Identifier: Apache-2.0
//! mod
//!
//! Layer: Ports
//! Purpose:
//! - Interfaces the application layer requires of infrastructure adapters.

pub mod interface;
