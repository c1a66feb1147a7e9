// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use core::fmt;

mod coils;
mod data;
pub(crate) mod device_id;
pub(crate) mod rtu;
pub(crate) mod tcp;

pub use self::{coils::*, data::*, device_id::*};
use byteorder::{BigEndian, ByteOrder};

/// The location of all bytes that belong to the frame.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    /// The index where the frame starts
    pub start: usize,
    /// Number of bytes that belong to the frame
    pub size: usize,
}

impl FrameLocation {
    /// One past the last byte of the frame.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.start + self.size
    }
}

/// A Modbus function code.
///
/// It is represented by an unsigned 8 bit integer.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCode {
    /// Modbus Function Code: `01` (`0x01`).
    ReadCoils,

    /// Modbus Function Code: `02` (`0x02`).
    ReadDiscreteInputs,

    /// Modbus Function Code: `05` (`0x05`).
    WriteSingleCoil,

    /// Modbus Function Code: `06` (`0x06`).
    WriteSingleRegister,

    /// Modbus Function Code: `03` (`0x03`).
    ReadHoldingRegisters,

    /// Modbus Function Code: `04` (`0x04`).
    ReadInputRegisters,

    /// Modbus Function Code: `15` (`0x0F`).
    WriteMultipleCoils,

    /// Modbus Function Code: `16` (`0x10`).
    WriteMultipleRegisters,

    /// Modbus Function Code: `07` (`0x07`).
    ReadExceptionStatus,

    /// Modbus Function Code: `08` (`0x08`).
    Diagnostics,

    /// Modbus Function Code: `17` (`0x11`).
    ReportSlaveId,

    /// Modbus Function Code: `22` (`0x16`).
    MaskWriteRegister,

    /// Modbus Function Code: `23` (`0x17`).
    ReadWriteMultipleRegisters,

    /// Modbus Function Code: `43` (`0x2B`), sub-function `14` (`0x0E`).
    ReadDeviceIdentification,

    // TODO:
    // - ReadFileRecord
    // - WriteFileRecord
    // - Read FifoQueue
    // - EncapsulatedInterfaceTransport
    // - CanOpenGeneralReferenceRequestAndResponsePdu
    /// Custom Modbus Function Code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x07 => Self::ReadExceptionStatus,
            0x08 => Self::Diagnostics,
            0x11 => Self::ReportSlaveId,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            0x2B => Self::ReadDeviceIdentification,
            code => FunctionCode::Custom(code),
        }
    }

    /// Get the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReadExceptionStatus => 0x07,
            Self::Diagnostics => 0x08,
            Self::ReportSlaveId => 0x11,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::ReadDeviceIdentification => 0x2B,
            Self::Custom(code) => code,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

/// A Modbus sub-function code is represented by an unsigned 16 bit integer.
pub(crate) type SubFunctionCode = u16;

/// The MEI (Modbus Encapsulated Interface) type used for Read Device
/// Identification requests, the only encapsulated interface this crate
/// understands.
pub const MEI_TYPE_READ_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// A Modbus address is represented by 16 bit (from `0` to `65535`).
pub(crate) type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub(crate) type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub(crate) type Word = u16;

/// Number of items to process (`0` - `65535`).
pub(crate) type Quantity = u16;

/// Raw PDU data
type RawData<'r> = &'r [u8];

/// A request represents a message from the client (master) to the server (slave).
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'r> {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Coils<'r>),
    ReadInputRegisters(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Data<'r>),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Data<'r>),
    ReadExceptionStatus,
    Diagnostics(SubFunctionCode, &'r [u8]),
    ReportSlaveId,
    MaskWriteRegister(Address, Word, Word),
    ReadDeviceIdentification(u8, u8),
    //TODO:
    //- ReadFileRecord
    //- WriteFileRecord
    //- Read FifoQueue
    //- EncapsulatedInterfaceTransport
    //- CanOpenGeneralReferenceRequestAndResponsePdu
    Custom(FunctionCode, &'r [u8]),
}

/// A server (slave) exception response.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: FunctionCode,
    pub exception: Exception,
}

/// Represents a message from the client (slave) to the server (master).
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPdu<'r>(pub Request<'r>);

/// Represents a message from the server (slave) to the client (master).
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePdu<'r>(pub Result<Response<'r>, ExceptionResponse>);

/// The response data of a successful request.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'r> {
    ReadCoils(Coils<'r>),
    ReadDiscreteInputs(Coils<'r>),
    WriteSingleCoil(Address, Coil),
    WriteMultipleCoils(Address, Quantity),
    ReadInputRegisters(Data<'r>),
    ReadHoldingRegisters(Data<'r>),
    WriteSingleRegister(Address, Word),
    WriteMultipleRegisters(Address, Quantity),
    ReadWriteMultipleRegisters(Data<'r>),
    ReadExceptionStatus(u8),
    Diagnostics(SubFunctionCode, &'r [u8]),
    /// `(slave_id, run_indicator)`
    ReportSlaveId(&'r [u8], bool),
    MaskWriteRegister(Address, Word, Word),
    /// `(read_dev_id_code, conformity_level, more_follows, next_object_id, objects)`
    ReadDeviceIdentification(u8, u8, bool, u8, DeviceIdObjects<'r>),
    //TODO:
    //- ReadFileRecord
    //- WriteFileRecord
    //- Read FifoQueue
    //- EncapsulatedInterfaceTransport
    //- CanOpenGeneralReferenceRequestAndResponsePdu
    Custom(FunctionCode, &'r [u8]),
}

impl<'r> From<Request<'r>> for FunctionCode {
    fn from(r: Request<'r>) -> Self {
        use Request as R;

        match r {
            R::ReadCoils(_, _) => Self::ReadCoils,
            R::ReadDiscreteInputs(_, _) => Self::ReadDiscreteInputs,
            R::WriteSingleCoil(_, _) => Self::WriteSingleCoil,
            R::WriteMultipleCoils(_, _) => Self::WriteMultipleCoils,
            R::ReadInputRegisters(_, _) => Self::ReadInputRegisters,
            R::ReadHoldingRegisters(_, _) => Self::ReadHoldingRegisters,
            R::WriteSingleRegister(_, _) => Self::WriteSingleRegister,
            R::WriteMultipleRegisters(_, _) => Self::WriteMultipleRegisters,
            R::ReadWriteMultipleRegisters(_, _, _, _) => Self::ReadWriteMultipleRegisters,
            R::ReadExceptionStatus => Self::ReadExceptionStatus,
            R::Diagnostics(_, _) => Self::Diagnostics,
            R::ReportSlaveId => Self::ReportSlaveId,
            R::MaskWriteRegister(_, _, _) => Self::MaskWriteRegister,
            R::ReadDeviceIdentification(_, _) => Self::ReadDeviceIdentification,
            R::Custom(code, _) => code,
        }
    }
}

impl<'r> From<Response<'r>> for FunctionCode {
    fn from(r: Response<'r>) -> Self {
        use Response as R;

        match r {
            R::ReadCoils(_) => Self::ReadCoils,
            R::ReadDiscreteInputs(_) => Self::ReadDiscreteInputs,
            R::WriteSingleCoil(_, _) => Self::WriteSingleCoil,
            R::WriteMultipleCoils(_, _) => Self::WriteMultipleCoils,
            R::ReadInputRegisters(_) => Self::ReadInputRegisters,
            R::ReadHoldingRegisters(_) => Self::ReadHoldingRegisters,
            R::WriteSingleRegister(_, _) => Self::WriteSingleRegister,
            R::WriteMultipleRegisters(_, _) => Self::WriteMultipleRegisters,
            R::ReadWriteMultipleRegisters(_) => Self::ReadWriteMultipleRegisters,
            R::ReadExceptionStatus(_) => Self::ReadExceptionStatus,
            R::Diagnostics(_, _) => Self::Diagnostics,
            R::ReportSlaveId(_, _) => Self::ReportSlaveId,
            R::MaskWriteRegister(_, _, _) => Self::MaskWriteRegister,
            R::ReadDeviceIdentification(_, _, _, _, _) => Self::ReadDeviceIdentification,
            R::Custom(code, _) => code,
        }
    }
}

/// A server (slave) exception, as it appears on the wire.
///
/// This is the fixed set of exception codes defined by the Modbus
/// application protocol (`1` through `8`). Library-internal failure modes
/// that never travel on the wire (timeouts, transport errors, ...) are
/// represented by [`crate::ExceptionCode`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
}

impl Exception {
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
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.get_name())
    }
}

#[cfg(all(feature = "defmt", target_os = "none"))]
impl defmt::Format for Exception {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", self.get_name())
    }
}

impl Request<'_> {
    /// Number of bytes required for a serialized PDU frame.
    #[must_use]
    pub fn pdu_len(&self) -> usize {
        match *self {
            Self::ReadCoils(_, _)
            | Self::ReadDiscreteInputs(_, _)
            | Self::ReadInputRegisters(_, _)
            | Self::ReadHoldingRegisters(_, _)
            | Self::WriteSingleRegister(_, _)
            | Self::WriteSingleCoil(_, _) => 5,
            Self::WriteMultipleCoils(_, coils) => 6 + coils.packed_len(),
            Self::WriteMultipleRegisters(_, words) => 6 + words.data.len(),
            Self::ReadWriteMultipleRegisters(_, _, _, words) => 10 + words.data.len(),
            Self::ReadExceptionStatus | Self::ReportSlaveId => 1,
            Self::Diagnostics(_, data) => 3 + data.len(),
            Self::MaskWriteRegister(_, _, _) => 7,
            Self::ReadDeviceIdentification(_, _) => 4,
            Self::Custom(_, data) => 1 + data.len(),
        }
    }
}

impl Response<'_> {
    /// Number of bytes required for a serialized PDU frame.
    #[must_use]
    pub fn pdu_len(&self) -> usize {
        match *self {
            Self::ReadCoils(coils) | Self::ReadDiscreteInputs(coils) => 2 + coils.packed_len(),
            Self::WriteSingleCoil(_, _) => 5,
            Self::WriteMultipleCoils(_, _)
            | Self::WriteMultipleRegisters(_, _)
            | Self::WriteSingleRegister(_, _) => 5,
            Self::ReadInputRegisters(words)
            | Self::ReadHoldingRegisters(words)
            | Self::ReadWriteMultipleRegisters(words) => 2 + words.len() * 2,
            Self::ReadExceptionStatus(_) => 2,
            Self::Diagnostics(_, data) => 3 + data.len(),
            Self::ReportSlaveId(slave_id, _) => 2 + slave_id.len() + 1,
            Self::MaskWriteRegister(_, _, _) => 7,
            Self::ReadDeviceIdentification(_, _, _, _, objects) => {
                device_id::DEVICE_ID_RESPONSE_HEADER_LEN
                    + objects
                        .into_iter()
                        .map(|(_, value)| 2 + value.len())
                        .sum::<usize>()
            }
            Self::Custom(_, data) => 1 + data.len(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn function_code_into_u8() {
        let x: u8 = FunctionCode::WriteMultipleCoils.value();
        assert_eq!(x, 15);
        let x: u8 = FunctionCode::Custom(0xBB).value();
        assert_eq!(x, 0xBB);
    }

    #[test]
    fn function_code_from_u8() {
        assert_eq!(FunctionCode::new(15), FunctionCode::WriteMultipleCoils);
        assert_eq!(FunctionCode::new(0xBB), FunctionCode::Custom(0xBB));
        assert_eq!(FunctionCode::new(0x2B), FunctionCode::ReadDeviceIdentification);
    }

    #[test]
    fn function_code_from_request() {
        use Request::*;
        let requests = &[
            (ReadCoils(0, 0), 1),
            (ReadDiscreteInputs(0, 0), 2),
            (WriteSingleCoil(0, true), 5),
            (
                WriteMultipleCoils(
                    0,
                    Coils {
                        quantity: 0,
                        data: &[],
                    },
                ),
                0x0F,
            ),
            (ReadInputRegisters(0, 0), 0x04),
            (ReadHoldingRegisters(0, 0), 0x03),
            (WriteSingleRegister(0, 0), 0x06),
            (
                WriteMultipleRegisters(
                    0,
                    Data {
                        quantity: 0,
                        data: &[],
                    },
                ),
                0x10,
            ),
            (
                ReadWriteMultipleRegisters(
                    0,
                    0,
                    0,
                    Data {
                        quantity: 0,
                        data: &[],
                    },
                ),
                0x17,
            ),
            (ReadExceptionStatus, 0x07),
            (Diagnostics(0x00, &[]), 0x08),
            (ReportSlaveId, 0x11),
            (MaskWriteRegister(0, 0, 0), 0x16),
            (ReadDeviceIdentification(0x01, 0x00), 0x2B),
            (Custom(FunctionCode::Custom(88), &[]), 88),
        ];
        for (req, expected) in requests {
            let code: u8 = FunctionCode::from(*req).value();
            assert_eq!(*expected, code);
        }
    }

    #[test]
    fn function_code_from_response() {
        use Response::*;
        let responses = &[
            (
                ReadCoils(Coils {
                    quantity: 0,
                    data: &[],
                }),
                1,
            ),
            (
                ReadDiscreteInputs(Coils {
                    quantity: 0,
                    data: &[],
                }),
                2,
            ),
            (WriteSingleCoil(0x0, false), 5),
            (WriteMultipleCoils(0x0, 0x0), 0x0F),
            (
                ReadInputRegisters(Data {
                    quantity: 0,
                    data: &[],
                }),
                0x04,
            ),
            (
                ReadHoldingRegisters(Data {
                    quantity: 0,
                    data: &[],
                }),
                0x03,
            ),
            (WriteSingleRegister(0, 0), 0x06),
            (WriteMultipleRegisters(0, 0), 0x10),
            (
                ReadWriteMultipleRegisters(Data {
                    quantity: 0,
                    data: &[],
                }),
                0x17,
            ),
            (ReadExceptionStatus(0), 0x07),
            (Diagnostics(0x00, &[]), 0x08),
            (ReportSlaveId(&[], false), 0x11),
            (MaskWriteRegister(0, 0, 0), 0x16),
            (
                ReadDeviceIdentification(
                    0x01,
                    0x00,
                    false,
                    0x00,
                    DeviceIdObjects { data: &[], count: 0 },
                ),
                0x2B,
            ),
            (Custom(FunctionCode::Custom(99), &[]), 99),
        ];
        for (req, expected) in responses {
            let code: u8 = FunctionCode::from(*req).value();
            assert_eq!(*expected, code);
        }
    }

    #[test]
    fn test_request_pdu_len() {
        assert_eq!(Request::ReadCoils(0x12, 5).pdu_len(), 5);
        assert_eq!(Request::WriteSingleRegister(0x12, 0x33).pdu_len(), 5);
        assert_eq!(Request::ReadExceptionStatus.pdu_len(), 1);
        assert_eq!(Request::MaskWriteRegister(0x12, 0xF2, 0x25).pdu_len(), 7);
        assert_eq!(Request::ReadDeviceIdentification(0x01, 0x00).pdu_len(), 4);
        let buf = &mut [0, 0];
        assert_eq!(
            Request::WriteMultipleCoils(0, Coils::from_bools(&[true, false], buf).unwrap())
                .pdu_len(),
            7
        );
    }

    #[test]
    fn test_response_pdu_len() {
        let buf = &mut [0, 0];
        assert_eq!(
            Response::ReadCoils(Coils::from_bools(&[true], buf).unwrap()).pdu_len(),
            3
        );
        assert_eq!(Response::ReportSlaveId(&[0x01, 0x02], true).pdu_len(), 5);
    }

    #[test]
    fn frame_location_end() {
        assert_eq!(FrameLocation { start: 0, size: 3 }.end(), 3);
        assert_eq!(FrameLocation { start: 2, size: 3 }.end(), 5);
        assert_eq!(FrameLocation { start: 2, size: 0 }.end(), 2);
    }
}
