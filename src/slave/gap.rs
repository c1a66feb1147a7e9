// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// How a [`super::Slave`] recognizes the end of an RTU frame on the wire.
///
/// Modbus RTU has no length prefix; a frame ends when the bus has been
/// silent for a minimum inter-frame gap. The official formula assumes 11
/// bits per character and floors the gap at 1.75ms so high baud rates don't
/// shrink it into nothing. Some field devices instead implement the gap
/// exactly as `45 000 000 / baud` microseconds with no floor; [`Legacy4_5`]
/// matches that behaviour.
///
/// [`Legacy4_5`]: Self::Legacy4_5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapTiming {
    /// 3.5 character times, floored at 1.75ms. The default.
    Standard,
    /// 4.5 character times, never floored.
    Legacy4_5,
}

impl Default for GapTiming {
    fn default() -> Self {
        Self::Standard
    }
}

impl GapTiming {
    /// Minimum silence, in whole character times, that marks a frame boundary
    /// at `baud_rate`.
    #[must_use]
    pub fn inter_frame_gap(self, baud_rate: u32) -> Duration {
        let baud = u64::from(baud_rate.max(1));
        match self {
            Self::Standard => Duration::from_micros((35_000_000 / baud).max(1_750)),
            Self::Legacy4_5 => Duration::from_micros(45_000_000 / baud),
        }
    }
}
