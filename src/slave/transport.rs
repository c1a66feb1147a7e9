// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;

/// The RTS (Request To Send) line gating a half-duplex RS-485 transceiver.
///
/// A [`super::Slave`] asserts this before writing a response and deasserts
/// it once the response has been flushed, so the bus driver only drives the
/// line while a frame is actually being transmitted.
#[async_trait]
pub trait Rts: Send + Sync {
    /// Claim the bus for transmission.
    async fn assert(&self);
    /// Release the bus back to receive mode.
    async fn deassert(&self);
}

/// An [`Rts`] that does nothing.
///
/// Fits transceivers with automatic direction control, and full-duplex
/// links where half-duplex gating never applies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRts;

#[async_trait]
impl Rts for NoRts {
    async fn assert(&self) {}
    async fn deassert(&self) {}
}
