// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use core::fmt;

use crate::frame::Exception;

/// The full exception taxonomy exposed at the master/slave API boundary.
///
/// Codes `1`-`8` mirror [`Exception`], the subset that can legally appear in
/// an on-wire exception response PDU. Codes `80`-`89` are library-internal:
/// failure modes of the transport or the request/response lifecycle that
/// never travel on the wire, surfaced to callers the same way a protocol
/// exception is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,

    /// No response arrived before the request's timeout elapsed.
    ResponseTimeout = 80,
    /// An RTU frame failed its CRC-16 check.
    InvalidCrc = 81,
    /// A write carried a value array whose length did not match the
    /// request's quantity.
    InvalidArgumentLength = 82,
    /// An RTU frame addressed a slave id other than ours or the broadcast
    /// address.
    InvalidDeviceAddress = 83,
    /// A register/coil address fell outside `0..=0xFFFF`.
    ///
    /// Reserved per the crate's exception-code table; every address in this
    /// API is already typed as `u16`, so this condition cannot occur in
    /// practice and no code constructs it. Kept so the taxonomy stays
    /// complete and stable if a future transport widens the address type.
    InvalidAddress = 84,
    /// `address + quantity` overflowed the addressable range.
    InvalidAddressRange = 85,
    /// The function code does not apply to the addressed target type.
    ///
    /// Reserved alongside [`Self::InvalidTargetType`], which is the code
    /// this crate actually raises for a `(target, value)` mismatch; no
    /// distinct runtime situation exists for this one to cover.
    InvalidAddressType = 86,
    /// [`crate::master::TargetType`] does not match the operation.
    InvalidTargetType = 87,
    /// A value failed validation (e.g. a non-0xFF00/0x0000 coil write).
    InvalidValues = 88,
    /// A quantity fell outside the function code's permitted range.
    InvalidQuantity = 89,
}

impl ExceptionCode {
    const fn get_name(self) -> &'static str {
        match self {
            Self::IllegalFunction => "Illegal function",
            Self::IllegalDataAddress => "Illegal data address",
            Self::IllegalDataValue => "Illegal data value",
            Self::SlaveDeviceFailure => "Slave device failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveDeviceBusy => "Slave device busy",
            Self::NegativeAcknowledge => "Negative acknowledge",
            Self::MemoryParityError => "Memory parity error",
            Self::ResponseTimeout => "Response timeout",
            Self::InvalidCrc => "Invalid CRC",
            Self::InvalidArgumentLength => "Invalid argument length",
            Self::InvalidDeviceAddress => "Invalid device address",
            Self::InvalidAddress => "Invalid address",
            Self::InvalidAddressRange => "Invalid address range",
            Self::InvalidAddressType => "Invalid address type",
            Self::InvalidTargetType => "Invalid target type",
            Self::InvalidValues => "Invalid values",
            Self::InvalidQuantity => "Invalid quantity",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.get_name())
    }
}

impl From<Exception> for ExceptionCode {
    fn from(ex: Exception) -> Self {
        match ex {
            Exception::IllegalFunction => Self::IllegalFunction,
            Exception::IllegalDataAddress => Self::IllegalDataAddress,
            Exception::IllegalDataValue => Self::IllegalDataValue,
            Exception::SlaveDeviceFailure => Self::SlaveDeviceFailure,
            Exception::Acknowledge => Self::Acknowledge,
            Exception::SlaveDeviceBusy => Self::SlaveDeviceBusy,
            Exception::NegativeAcknowledge => Self::NegativeAcknowledge,
            Exception::MemoryParityError => Self::MemoryParityError,
        }
    }
}

/// Failed to convert an [`ExceptionCode`] into a wire [`Exception`] because
/// it is a library-internal code (`80`-`89`) with no on-wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotAWireException;

impl TryFrom<ExceptionCode> for Exception {
    type Error = NotAWireException;

    fn try_from(code: ExceptionCode) -> Result<Self, Self::Error> {
        match code {
            ExceptionCode::IllegalFunction => Ok(Self::IllegalFunction),
            ExceptionCode::IllegalDataAddress => Ok(Self::IllegalDataAddress),
            ExceptionCode::IllegalDataValue => Ok(Self::IllegalDataValue),
            ExceptionCode::SlaveDeviceFailure => Ok(Self::SlaveDeviceFailure),
            ExceptionCode::Acknowledge => Ok(Self::Acknowledge),
            ExceptionCode::SlaveDeviceBusy => Ok(Self::SlaveDeviceBusy),
            ExceptionCode::NegativeAcknowledge => Ok(Self::NegativeAcknowledge),
            ExceptionCode::MemoryParityError => Ok(Self::MemoryParityError),
            _ => Err(NotAWireException),
        }
    }
}
