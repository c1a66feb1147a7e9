// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Everything that can go wrong setting up or running a [`super::Slave`].
///
/// Per-frame problems (a bad CRC, an unsupported function code, a malformed
/// PDU) are not reported here: RTU silently drops such frames, so they are
/// only logged. This type covers failures that end the run loop outright.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to open or configure the serial port.
    #[error(transparent)]
    Serial(#[from] tokio_serial::Error),

    /// A transport-level I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
