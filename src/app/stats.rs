// SPDX-License-Identifier: Apache-2.0
//! stats
//!
//! Layer: Application
//! Purpose:
//! - Frame counters, bus-load accounting and periodic snapshots
//!
//! Notes:
//! - Snapshots go out over a broadcast channel so observers can never block
//!   the dispatcher.

use serde::Serialize;
use tokio::sync::broadcast;

/// Periodic statistics of one network, as delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub api_frames: u32,
    pub can_frames: u32,
    pub err_frames: u32,
    /// Share of the nominal bit-time consumed over the last statistics
    /// period, clamped to 0..=100.
    pub bus_load_percent: u8,
    pub messages_per_second: u32,
}

/// Counter state owned by the dispatch loop of one network.
pub(crate) struct Statistics {
    api_frames: u32,
    can_frames: u32,
    err_frames: u32,
    bit_count: u64,
    can_frames_prev: u32,
    reload: u32,
    ticks_left: u32,
    tx: broadcast::Sender<StatisticsSnapshot>,
}

impl Statistics {
    /// `reload` is the statistics period expressed in dispatch ticks.
    pub(crate) fn new(reload: u32, tx: broadcast::Sender<StatisticsSnapshot>) -> Self {
        let reload = reload.max(1);
        Self {
            api_frames: 0,
            can_frames: 0,
            err_frames: 0,
            bit_count: 0,
            can_frames_prev: 0,
            reload,
            ticks_left: reload,
            tx,
        }
    }

    pub(crate) fn count_api(&mut self) {
        self.api_frames = self.api_frames.wrapping_add(1);
    }

    pub(crate) fn count_can(&mut self, bits: u32) {
        self.can_frames = self.can_frames.wrapping_add(1);
        self.bit_count += u64::from(bits);
    }

    pub(crate) fn count_err(&mut self) {
        self.err_frames = self.err_frames.wrapping_add(1);
    }

    /// Called once per dispatch tick. When the statistics period elapses,
    /// publishes a snapshot, resets the bit accumulator and reloads the
    /// tick counter.
    pub(crate) fn tick(&mut self, bits_per_second: u64) -> Option<StatisticsSnapshot> {
        self.ticks_left = self.ticks_left.saturating_sub(1);
        if self.ticks_left > 0 {
            return None;
        }
        self.ticks_left = self.reload;

        let load = (self.bit_count * 100 / bits_per_second.max(1)).min(100) as u8;
        let snapshot = StatisticsSnapshot {
            api_frames: self.api_frames,
            can_frames: self.can_frames,
            err_frames: self.err_frames,
            bus_load_percent: load,
            messages_per_second: self.can_frames.wrapping_sub(self.can_frames_prev),
        };
        self.bit_count = 0;
        self.can_frames_prev = self.can_frames;
        // No receivers is fine; observers come and go.
        let _ = self.tx.send(snapshot);
        Some(snapshot)
    }
}
