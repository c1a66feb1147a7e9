// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{error::*, frame::*};
use crate::frame::device_id;
use byteorder::{BigEndian, ByteOrder};

pub mod rtu;
pub mod tcp;

/// The type of decoding
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderType {
    Request,
    Response,
}

type Result<T> = core::result::Result<T, Error>;

impl TryFrom<u8> for Exception {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        let ex = match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::SlaveDeviceBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParityError,
            _ => {
                return Err(Error::ExceptionCode(code));
            }
        };
        Ok(ex)
    }
}

impl From<ExceptionResponse> for [u8; 2] {
    fn from(ex: ExceptionResponse) -> [u8; 2] {
        let data = &mut [0; 2];
        let fn_code: u8 = ex.function.value();
        debug_assert!(fn_code < 0x80);
        data[0] = fn_code + 0x80;
        data[1] = ex.exception as u8;
        *data
    }
}

impl TryFrom<&[u8]> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::BufferSize);
        }
        let fn_err_code = bytes[0];
        if fn_err_code < 0x80 {
            return Err(Error::ExceptionFnCode(fn_err_code));
        }
        let function = FunctionCode::new(fn_err_code - 0x80);
        let exception = Exception::try_from(bytes[1])?;
        Ok(ExceptionResponse {
            function,
            exception,
        })
    }
}

impl<'r> TryFrom<&'r [u8]> for Request<'r> {
    type Error = Error;

    fn try_from(bytes: &'r [u8]) -> Result<Self> {
        use FunctionCode as F;

        if bytes.is_empty() {
            return Err(Error::BufferSize);
        }

        let fn_code = bytes[0];

        if bytes.len() < min_request_pdu_len(FunctionCode::new(fn_code)) {
            return Err(Error::BufferSize);
        }

        let req = match FunctionCode::new(fn_code) {
            F::ReadCoils
            | F::ReadDiscreteInputs
            | F::ReadInputRegisters
            | F::ReadHoldingRegisters
            | F::WriteSingleRegister => {
                let addr = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);

                match FunctionCode::new(fn_code) {
                    F::ReadCoils => Self::ReadCoils(addr, quantity),
                    F::ReadDiscreteInputs => Self::ReadDiscreteInputs(addr, quantity),
                    F::ReadInputRegisters => Self::ReadInputRegisters(addr, quantity),
                    F::ReadHoldingRegisters => Self::ReadHoldingRegisters(addr, quantity),
                    F::WriteSingleRegister => Self::WriteSingleRegister(addr, quantity),
                    _ => unreachable!(),
                }
            }
            F::WriteSingleCoil => Self::WriteSingleCoil(
                BigEndian::read_u16(&bytes[1..3]),
                u16_coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?,
            ),
            F::WriteMultipleCoils => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]) as usize;
                let byte_count = bytes[5];
                if bytes.len() < (6 + byte_count as usize) {
                    return Err(Error::ByteCount(byte_count));
                }
                let data = &bytes[6..];
                let coils = Coils { data, quantity };
                Self::WriteMultipleCoils(address, coils)
            }
            F::WriteMultipleRegisters => {
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]) as usize;
                let byte_count = bytes[5];
                if bytes.len() < (6 + byte_count as usize) {
                    return Err(Error::ByteCount(byte_count));
                }
                let data = Data {
                    quantity,
                    data: &bytes[6..6 + byte_count as usize],
                };
                Self::WriteMultipleRegisters(address, data)
            }
            F::ReadWriteMultipleRegisters => {
                let read_address = BigEndian::read_u16(&bytes[1..3]);
                let read_quantity = BigEndian::read_u16(&bytes[3..5]);
                let write_address = BigEndian::read_u16(&bytes[5..7]);
                let write_quantity = BigEndian::read_u16(&bytes[7..9]) as usize;
                let write_count = bytes[9];
                if bytes.len() < (10 + write_count as usize) {
                    return Err(Error::ByteCount(write_count));
                }
                let data = Data {
                    quantity: write_quantity,
                    data: &bytes[10..10 + write_count as usize],
                };
                Self::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, data)
            }
            F::ReadExceptionStatus => Self::ReadExceptionStatus,
            F::ReportSlaveId => Self::ReportSlaveId,
            F::MaskWriteRegister => Self::MaskWriteRegister(
                BigEndian::read_u16(&bytes[1..3]),
                BigEndian::read_u16(&bytes[3..5]),
                BigEndian::read_u16(&bytes[5..7]),
            ),
            F::Diagnostics => {
                let sub_function = BigEndian::read_u16(&bytes[1..3]);
                Self::Diagnostics(sub_function, &bytes[3..])
            }
            F::ReadDeviceIdentification => {
                if bytes.len() < 4 || bytes[1] != MEI_TYPE_READ_DEVICE_IDENTIFICATION {
                    return Err(Error::FnCode(fn_code));
                }
                Self::ReadDeviceIdentification(bytes[2], bytes[3])
            }
            _ => match fn_code {
                fn_code if fn_code < 0x80 => {
                    Self::Custom(FunctionCode::Custom(fn_code), &bytes[1..])
                }
                _ => return Err(Error::FnCode(fn_code)),
            },
        };
        Ok(req)
    }
}

impl<'r> TryFrom<&'r [u8]> for Response<'r> {
    type Error = Error;

    fn try_from(bytes: &'r [u8]) -> Result<Self> {
        use FunctionCode as F;
        if bytes.is_empty() {
            return Err(Error::BufferSize);
        }
        let fn_code = bytes[0];
        if bytes.len() < min_response_pdu_len(FunctionCode::new(fn_code)) {
            return Err(Error::BufferSize);
        }
        let rsp = match FunctionCode::new(fn_code) {
            F::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                let byte_count = bytes[1] as usize;
                if byte_count + 2 > bytes.len() {
                    return Err(Error::BufferSize);
                }
                let data = &bytes[2..byte_count + 2];
                // Here we have not information about the exact requested quantity
                // therefore we just assume that the whole byte is meant.
                let quantity = byte_count * 8;

                match FunctionCode::new(fn_code) {
                    FunctionCode::ReadCoils => Self::ReadCoils(Coils { data, quantity }),
                    FunctionCode::ReadDiscreteInputs => {
                        Self::ReadDiscreteInputs(Coils { data, quantity })
                    }
                    _ => unreachable!(),
                }
            }
            F::WriteSingleCoil => Self::WriteSingleCoil(BigEndian::read_u16(&bytes[1..])),

            F::WriteMultipleCoils | F::WriteSingleRegister | F::WriteMultipleRegisters => {
                let addr = BigEndian::read_u16(&bytes[1..]);
                let payload = BigEndian::read_u16(&bytes[3..]);
                match FunctionCode::new(fn_code) {
                    F::WriteMultipleCoils => Self::WriteMultipleCoils(addr, payload),
                    F::WriteSingleRegister => Self::WriteSingleRegister(addr, payload),
                    F::WriteMultipleRegisters => Self::WriteMultipleRegisters(addr, payload),
                    _ => unreachable!(),
                }
            }
            F::ReadInputRegisters | F::ReadHoldingRegisters | F::ReadWriteMultipleRegisters => {
                let byte_count = bytes[1] as usize;
                let quantity = byte_count / 2;
                if byte_count + 2 > bytes.len() {
                    return Err(Error::BufferSize);
                }
                let data = &bytes[2..2 + byte_count];
                let data = Data { data, quantity };

                match FunctionCode::new(fn_code) {
                    F::ReadInputRegisters => Self::ReadInputRegisters(data),
                    F::ReadHoldingRegisters => Self::ReadHoldingRegisters(data),
                    F::ReadWriteMultipleRegisters => Self::ReadWriteMultipleRegisters(data),
                    _ => unreachable!(),
                }
            }
            F::ReadExceptionStatus => Self::ReadExceptionStatus(bytes[1]),
            F::Diagnostics => {
                let sub_function = BigEndian::read_u16(&bytes[1..3]);
                Self::Diagnostics(sub_function, &bytes[3..])
            }
            F::ReportSlaveId => {
                let byte_count = bytes[1] as usize;
                if byte_count < 1 || byte_count + 2 > bytes.len() {
                    return Err(Error::ByteCount(bytes[1]));
                }
                let slave_id = &bytes[2..2 + byte_count - 1];
                let run_indicator = bytes[2 + byte_count - 1] != 0x00;
                Self::ReportSlaveId(slave_id, run_indicator)
            }
            F::MaskWriteRegister => Self::MaskWriteRegister(
                BigEndian::read_u16(&bytes[1..3]),
                BigEndian::read_u16(&bytes[3..5]),
                BigEndian::read_u16(&bytes[5..7]),
            ),
            F::ReadDeviceIdentification => {
                if bytes.len() < min_response_pdu_len(F::ReadDeviceIdentification)
                    || bytes[1] != MEI_TYPE_READ_DEVICE_IDENTIFICATION
                {
                    return Err(Error::FnCode(fn_code));
                }
                let read_dev_id_code = bytes[2];
                let conformity = bytes[3];
                let more_follows = bytes[4] != 0x00;
                let next_object_id = bytes[5];
                let count = bytes[6] as usize;
                let objects = DeviceIdObjects {
                    data: &bytes[device_id::DEVICE_ID_RESPONSE_HEADER_LEN..],
                    count,
                };
                Self::ReadDeviceIdentification(
                    read_dev_id_code,
                    conformity,
                    more_follows,
                    next_object_id,
                    objects,
                )
            }
            _ => Self::Custom(FunctionCode::new(fn_code), &bytes[1..]),
        };
        Ok(rsp)
    }
}

/// Encode a struct into a buffer.
pub trait Encode {
    fn encode(&self, buf: &mut [u8]) -> Result<usize>;
}

impl Encode for Request<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.pdu_len() {
            return Err(Error::BufferSize);
        }
        buf[0] = FunctionCode::from(*self).value();
        match self {
            Self::ReadCoils(address, payload)
            | Self::ReadDiscreteInputs(address, payload)
            | Self::ReadInputRegisters(address, payload)
            | Self::ReadHoldingRegisters(address, payload)
            | Self::WriteSingleRegister(address, payload) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                BigEndian::write_u16(&mut buf[3..], *payload);
            }
            Self::WriteSingleCoil(address, state) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                BigEndian::write_u16(&mut buf[3..], bool_to_u16_coil(*state));
            }
            Self::WriteMultipleCoils(address, coils) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                let len = coils.len();
                BigEndian::write_u16(&mut buf[3..], len as u16);
                buf[5] = coils.packed_len() as u8;
                coils.copy_to(&mut buf[6..]);
            }
            Self::WriteMultipleRegisters(address, words) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                let len = words.len();
                BigEndian::write_u16(&mut buf[3..], len as u16);
                buf[5] = len as u8 * 2;
                for (idx, byte) in words.data.iter().enumerate() {
                    buf[idx + 6] = *byte;
                }
            }
            Self::ReadWriteMultipleRegisters(read_address, quantity, write_address, words) => {
                BigEndian::write_u16(&mut buf[1..], *read_address);
                BigEndian::write_u16(&mut buf[3..], *quantity);
                BigEndian::write_u16(&mut buf[5..], *write_address);
                let n = words.len();
                BigEndian::write_u16(&mut buf[7..], n as u16);
                buf[9] = n as u8 * 2;
                for (idx, byte) in words.data.iter().enumerate() {
                    buf[idx + 10] = *byte;
                }
            }
            Self::ReadExceptionStatus | Self::ReportSlaveId => {}
            Self::Diagnostics(sub_function, data) => {
                BigEndian::write_u16(&mut buf[1..], *sub_function);
                buf[3..3 + data.len()].copy_from_slice(data);
            }
            Self::MaskWriteRegister(address, and_mask, or_mask) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                BigEndian::write_u16(&mut buf[3..], *and_mask);
                BigEndian::write_u16(&mut buf[5..], *or_mask);
            }
            Self::ReadDeviceIdentification(read_dev_id_code, object_id) => {
                buf[1] = MEI_TYPE_READ_DEVICE_IDENTIFICATION;
                buf[2] = *read_dev_id_code;
                buf[3] = *object_id;
            }
            Self::Custom(_, custom_data) => {
                custom_data.iter().enumerate().for_each(|(idx, d)| {
                    buf[idx + 1] = *d;
                });
            }
        }
        Ok(self.pdu_len())
    }
}

impl Encode for Response<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < self.pdu_len() {
            return Err(Error::BufferSize);
        }

        buf[0] = FunctionCode::from(*self).value();
        match self {
            Self::ReadCoils(coils) | Self::ReadDiscreteInputs(coils) => {
                buf[1] = coils.packed_len() as u8;
                coils.copy_to(&mut buf[2..]);
            }
            Self::ReadInputRegisters(registers)
            | Self::ReadHoldingRegisters(registers)
            | Self::ReadWriteMultipleRegisters(registers) => {
                buf[1] = (registers.len() * 2) as u8;
                registers.copy_to(&mut buf[2..]);
            }
            Self::WriteSingleCoil(address) => {
                BigEndian::write_u16(&mut buf[1..], *address);
            }
            Self::WriteMultipleCoils(address, payload)
            | Self::WriteMultipleRegisters(address, payload)
            | Self::WriteSingleRegister(address, payload) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                BigEndian::write_u16(&mut buf[3..], *payload);
            }
            Self::ReadExceptionStatus(error_code) => {
                buf[1] = *error_code;
            }
            Self::Diagnostics(sub_function, data) => {
                BigEndian::write_u16(&mut buf[1..], *sub_function);
                buf[3..3 + data.len()].copy_from_slice(data);
            }
            Self::ReportSlaveId(slave_id, run_indicator) => {
                buf[1] = (slave_id.len() + 1) as u8;
                buf[2..2 + slave_id.len()].copy_from_slice(slave_id);
                buf[2 + slave_id.len()] = u8::from(*run_indicator) * 0xFF;
            }
            Self::MaskWriteRegister(address, and_mask, or_mask) => {
                BigEndian::write_u16(&mut buf[1..], *address);
                BigEndian::write_u16(&mut buf[3..], *and_mask);
                BigEndian::write_u16(&mut buf[5..], *or_mask);
            }
            Self::ReadDeviceIdentification(
                read_dev_id_code,
                conformity,
                more_follows,
                next_object_id,
                objects,
            ) => {
                buf[1] = MEI_TYPE_READ_DEVICE_IDENTIFICATION;
                buf[2] = *read_dev_id_code;
                buf[3] = *conformity;
                buf[4] = u8::from(*more_follows) * 0xFF;
                buf[5] = *next_object_id;
                buf[6] = objects.len() as u8;
                let mut offset = device_id::DEVICE_ID_RESPONSE_HEADER_LEN;
                for (id, value) in *objects {
                    buf[offset] = id;
                    buf[offset + 1] = value.len() as u8;
                    buf[offset + 2..offset + 2 + value.len()].copy_from_slice(value);
                    offset += 2 + value.len();
                }
            }
            Self::Custom(_, custom_data) => {
                for (idx, d) in custom_data.iter().enumerate() {
                    buf[idx + 1] = *d;
                }
            }
        }
        Ok(self.pdu_len())
    }
}

impl Encode for RequestPdu<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Encode for ResponsePdu<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::BufferSize);
        }
        match self.0 {
            Ok(res) => res.encode(buf),
            Err(e) => e.encode(buf),
        }
    }
}

impl Encode for ExceptionResponse {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::BufferSize);
        }
        let [code, ex]: [u8; 2] = (*self).into();
        buf[0] = code;
        buf[1] = ex;
        Ok(2)
    }
}

const fn min_request_pdu_len(fn_code: FunctionCode) -> usize {
    use FunctionCode as F;
    match fn_code {
        F::ReadCoils
        | F::ReadDiscreteInputs
        | F::ReadInputRegisters
        | F::WriteSingleCoil
        | F::ReadHoldingRegisters
        | F::WriteSingleRegister => 5,
        F::WriteMultipleCoils | F::WriteMultipleRegisters => 6,
        F::ReadWriteMultipleRegisters => 10,
        F::MaskWriteRegister => 7,
        F::Diagnostics => 3,
        F::ReadDeviceIdentification => 4,
        _ => 1,
    }
}

const fn min_response_pdu_len(fn_code: FunctionCode) -> usize {
    use FunctionCode as F;
    match fn_code {
        F::ReadCoils
        | F::ReadDiscreteInputs
        | F::ReadInputRegisters
        | F::ReadHoldingRegisters
        | F::ReadWriteMultipleRegisters => 2,
        F::WriteSingleCoil => 3,
        F::WriteMultipleCoils | F::WriteSingleRegister | F::WriteMultipleRegisters => 5,
        F::ReadExceptionStatus => 2,
        F::ReportSlaveId => 3,
        F::MaskWriteRegister => 7,
        F::Diagnostics => 3,
        F::ReadDeviceIdentification => 7,
        _ => 1,
    }
}
