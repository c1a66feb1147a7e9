// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::exception::ExceptionCode;

/// Everything that can go wrong issuing a request through a [`super::Master`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The slave returned an exception response, a programmer error (bad
    /// quantity, address range, or value) was caught before the request was
    /// sent, or no response arrived before the request's deadline elapsed
    /// (surfaced as [`ExceptionCode::ResponseTimeout`]).
    #[error("modbus exception: {0}")]
    Exception(#[from] ExceptionCode),

    /// The response (or request) PDU could not be decoded.
    #[error(transparent)]
    Codec(#[from] crate::error::Error),

    /// A transport-level I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The connection was closed, either by [`super::Master::disconnect`] or
    /// because the peer closed it. Every request in flight at the time is
    /// completed with this error.
    #[error("not connected")]
    Disconnected,

    /// All 255 transaction ids are in use.
    #[error("too many requests in flight")]
    TooManyTransactions,

    /// The response carried a function code that did not match the request.
    #[error("unexpected response: expected function code {expected:?}, got {actual:?}")]
    UnexpectedResponse {
        expected: crate::frame::FunctionCode,
        actual: crate::frame::FunctionCode,
    },
}
