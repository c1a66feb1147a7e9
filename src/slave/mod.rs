// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An async Modbus RTU slave (server).
//!
//! A [`Slave`] owns nothing about the application it fronts; it only knows
//! how to recognize frame boundaries on a half-duplex serial line, validate
//! and decode a request, call out to a [`RequestHandler`], and encode the
//! reply. Everything domain-specific lives behind that trait.

mod error;
mod gap;
mod handler;
mod transport;

pub use error::Error;
pub use gap::GapTiming;
pub use handler::{DeviceIdentification, ReadValue, RequestHandler};
pub use transport::{NoRts, Rts};

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;

use crate::codec::DecoderType;
use crate::codec::rtu;
use crate::exception::ExceptionCode;
use crate::frame::rtu::{Header, ResponseAdu, SlaveId};
use crate::frame::{Coils, Data, DeviceIdObjects, Exception, ExceptionResponse, FunctionCode, Request, Response, ResponsePdu};
use crate::master::{TargetType, WriteValue};

const MAX_FRAME_LEN: usize = rtu::MAX_FRAME_LEN;
/// Slave id, function code, and a trailing CRC-16: the shortest frame that
/// could possibly be valid.
const MIN_FRAME_LEN: usize = 4;
const BROADCAST_SLAVE_ID: SlaveId = 0;

const COIL_READ_QUANTITY: RangeInclusive<u16> = 1..=2000;
const REGISTER_READ_QUANTITY: RangeInclusive<u16> = 1..=125;
const COIL_WRITE_QUANTITY: RangeInclusive<u16> = 1..=1968;
const REGISTER_WRITE_QUANTITY: RangeInclusive<u16> = 1..=123;

/// Builds a [`Slave`].
pub struct SlaveBuilder<H> {
    slave_id: SlaveId,
    baud_rate: u32,
    gap_timing: GapTiming,
    handler: Arc<H>,
    rts: Arc<dyn Rts>,
}

impl<H: RequestHandler + 'static> SlaveBuilder<H> {
    /// Answer as `slave_id` on a line running at `baud_rate`, which
    /// determines the inter-frame gap.
    pub fn new(slave_id: SlaveId, baud_rate: u32, handler: H) -> Self {
        Self {
            slave_id,
            baud_rate,
            gap_timing: GapTiming::default(),
            handler: Arc::new(handler),
            rts: Arc::new(NoRts),
        }
    }

    /// Override the default [`GapTiming::Standard`] inter-frame gap.
    #[must_use]
    pub fn gap_timing(mut self, gap_timing: GapTiming) -> Self {
        self.gap_timing = gap_timing;
        self
    }

    /// Gate transmission with an RTS line, for half-duplex RS-485 buses
    /// without automatic direction control.
    #[must_use]
    pub fn rts(mut self, rts: impl Rts + 'static) -> Self {
        self.rts = Arc::new(rts);
        self
    }

    #[must_use]
    pub fn build(self) -> Slave<H> {
        Slave {
            shared: Arc::new(Shared {
                slave_id: AtomicU8::new(self.slave_id),
                gap: self.gap_timing.inter_frame_gap(self.baud_rate),
                handler: self.handler,
                rts: self.rts,
            }),
        }
    }
}

struct Shared<H> {
    slave_id: AtomicU8,
    gap: Duration,
    handler: Arc<H>,
    rts: Arc<dyn Rts>,
}

/// An async Modbus RTU slave (server).
///
/// Cloning a [`Slave`] is cheap: every clone shares the same handler,
/// RTS line, and slave id.
pub struct Slave<H> {
    shared: Arc<Shared<H>>,
}

impl<H> Clone for Slave<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: RequestHandler + 'static> Slave<H> {
    /// Open `path` at `baud_rate` (8N1) and run the slave until the port
    /// closes or a read fails.
    pub async fn serve_tty(slave_id: SlaveId, baud_rate: u32, path: &str, handler: H) -> Result<(), Error> {
        let port = tokio_serial::new(path, baud_rate).open_native_async()?;
        SlaveBuilder::new(slave_id, baud_rate, handler).build().run(port).await
    }

    /// Change the slave id this device answers to without restarting the
    /// run loop.
    pub fn set_slave_id(&self, slave_id: SlaveId) {
        self.shared.slave_id.store(slave_id, Ordering::Relaxed);
    }

    /// Drive `port`: read bytes, recognize frame boundaries by the
    /// configured inter-frame gap, and answer whatever requests are ours
    /// to answer.
    ///
    /// Returns once the port signals EOF or a read fails. A bad CRC, an
    /// address that isn't ours, or a PDU this crate can't decode all end
    /// the same way: the bytes are dropped and the loop continues, exactly
    /// as RTU mandates.
    pub async fn run<S>(&self, mut port: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(MAX_FRAME_LEN);
        let mut byte = [0u8; 1];

        loop {
            match tokio::time::timeout(self.shared.gap, port.read(&mut byte)).await {
                Ok(Ok(0)) => {
                    log::debug!("Modbus RTU slave port closed");
                    return Ok(());
                }
                Ok(Ok(_)) => {
                    if buf.is_empty() && byte[0] == 0x00 {
                        // Idle-line noise before any real frame has started.
                        continue;
                    }
                    buf.push(byte[0]);
                    if buf.len() >= MAX_FRAME_LEN {
                        self.process_frame(&mut port, &buf).await;
                        buf.clear();
                    }
                }
                Ok(Err(err)) => return Err(Error::Io(err)),
                Err(_elapsed) => {
                    // Silence for at least one inter-frame gap: whatever
                    // we've buffered is either a complete frame or garbage.
                    if !buf.is_empty() {
                        self.process_frame(&mut port, &buf).await;
                        buf.clear();
                    }
                }
            }
        }
    }

    async fn process_frame<S>(&self, port: &mut S, buf: &[u8])
    where
        S: AsyncWrite + Unpin,
    {
        if buf.len() < MIN_FRAME_LEN {
            log::trace!("dropping {} byte(s), too short to be a frame", buf.len());
            return;
        }

        let own_id = self.shared.slave_id.load(Ordering::Relaxed);
        let frame_slave_id = buf[0];
        if frame_slave_id != own_id && frame_slave_id != BROADCAST_SLAVE_ID {
            log::trace!(
                "dropping frame for slave id {frame_slave_id} ({:?}), not ours",
                ExceptionCode::InvalidDeviceAddress
            );
            return;
        }
        let broadcast = frame_slave_id == BROADCAST_SLAVE_ID;

        let frame = match rtu::decode(DecoderType::Request, buf) {
            Ok(Some((frame, _location))) => frame,
            Ok(None) => {
                log::trace!("dropping unparsable or incomplete RTU request");
                return;
            }
            Err(crate::error::Error::Crc(expected, actual)) => {
                log::warn!(
                    "dropping RTU request, {:?}: expected CRC 0x{expected:04X}, got 0x{actual:04X}",
                    ExceptionCode::InvalidCrc
                );
                return;
            }
            Err(err) => {
                log::warn!("dropping RTU request: {err}");
                return;
            }
        };

        let request = match Request::try_from(frame.pdu) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("dropping request with undecodable PDU: {err}");
                return;
            }
        };

        let function = FunctionCode::from(request);
        let mut scratch = [0u8; MAX_FRAME_LEN];
        let outcome = dispatch(&*self.shared.handler, request, &mut scratch);

        if broadcast {
            return;
        }

        let pdu = match outcome {
            Ok(response) => ResponsePdu(Ok(response)),
            Err(exception_code) => {
                self.shared.handler.on_error(function.value(), exception_code);
                let exception = Exception::try_from(exception_code).unwrap_or_else(|_| {
                    log::warn!("handler returned non-wire exception code {exception_code}, downgrading to slave device failure");
                    Exception::SlaveDeviceFailure
                });
                ResponsePdu(Err(ExceptionResponse { function, exception }))
            }
        };

        let mut resp_buf = [0u8; MAX_FRAME_LEN];
        let adu = ResponseAdu {
            hdr: Header { slave: own_id },
            pdu,
        };
        let len = match rtu::server::encode_response(adu, &mut resp_buf) {
            Ok(len) => len,
            Err(err) => {
                log::error!("failed to encode response: {err}");
                return;
            }
        };

        self.transmit(port, &resp_buf[..len]).await;
    }

    async fn transmit<S>(&self, port: &mut S, adu: &[u8])
    where
        S: AsyncWrite + Unpin,
    {
        self.shared.rts.assert().await;
        if let Err(err) = port.write_all(adu).await {
            log::warn!("failed to write response: {err}");
        } else if let Err(err) = port.flush().await {
            log::warn!("failed to flush response: {err}");
        }
        self.shared.rts.deassert().await;
    }
}

fn validate_quantity(quantity: u16, range: RangeInclusive<u16>) -> Result<(), ExceptionCode> {
    if range.contains(&quantity) {
        Ok(())
    } else {
        Err(ExceptionCode::IllegalDataValue)
    }
}

fn validate_address(address: u16, quantity: u16) -> Result<(), ExceptionCode> {
    if u32::from(address) + u32::from(quantity) <= 0x1_0000 {
        Ok(())
    } else {
        Err(ExceptionCode::IllegalDataAddress)
    }
}

/// Validate, dispatch to `handler`, and build the response PDU, borrowing
/// packed bytes from `scratch` where the wire format needs them.
fn dispatch<'buf>(
    handler: &(impl RequestHandler + ?Sized),
    request: Request<'_>,
    scratch: &'buf mut [u8],
) -> Result<Response<'buf>, ExceptionCode> {
    match request {
        Request::ReadCoils(address, quantity) => {
            validate_quantity(quantity, COIL_READ_QUANTITY)?;
            validate_address(address, quantity)?;
            let ReadValue::Bits(mut bits) = handler.read(TargetType::Coil, address, quantity)? else {
                return Err(ExceptionCode::SlaveDeviceFailure);
            };
            bits.truncate(quantity as usize);
            let coils = Coils::from_bools(&bits, scratch).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
            Ok(Response::ReadCoils(coils))
        }
        Request::ReadDiscreteInputs(address, quantity) => {
            validate_quantity(quantity, COIL_READ_QUANTITY)?;
            validate_address(address, quantity)?;
            let ReadValue::Bits(mut bits) = handler.read(TargetType::DiscreteInput, address, quantity)? else {
                return Err(ExceptionCode::SlaveDeviceFailure);
            };
            bits.truncate(quantity as usize);
            let coils = Coils::from_bools(&bits, scratch).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
            Ok(Response::ReadDiscreteInputs(coils))
        }
        Request::ReadHoldingRegisters(address, quantity) => {
            validate_quantity(quantity, REGISTER_READ_QUANTITY)?;
            validate_address(address, quantity)?;
            let ReadValue::Words(mut words) = handler.read(TargetType::HoldingRegister, address, quantity)? else {
                return Err(ExceptionCode::SlaveDeviceFailure);
            };
            words.truncate(quantity as usize);
            let data = Data::from_words(&words, scratch).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
            Ok(Response::ReadHoldingRegisters(data))
        }
        Request::ReadInputRegisters(address, quantity) => {
            validate_quantity(quantity, REGISTER_READ_QUANTITY)?;
            validate_address(address, quantity)?;
            let ReadValue::Words(mut words) = handler.read(TargetType::InputRegister, address, quantity)? else {
                return Err(ExceptionCode::SlaveDeviceFailure);
            };
            words.truncate(quantity as usize);
            let data = Data::from_words(&words, scratch).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
            Ok(Response::ReadInputRegisters(data))
        }
        Request::WriteSingleCoil(address, value) => {
            handler.write(TargetType::Coil, address, WriteValue::SingleBool(value))?;
            Ok(Response::WriteSingleCoil(address, value))
        }
        Request::WriteSingleRegister(address, value) => {
            handler.write(TargetType::HoldingRegister, address, WriteValue::Single(value))?;
            Ok(Response::WriteSingleRegister(address, value))
        }
        Request::WriteMultipleCoils(address, coils) => {
            let quantity = coils.len() as u16;
            validate_quantity(quantity, COIL_WRITE_QUANTITY)?;
            validate_address(address, quantity)?;
            let bits: Vec<bool> = coils.into_iter().collect();
            handler.write(TargetType::Coil, address, WriteValue::Bits(bits))?;
            Ok(Response::WriteMultipleCoils(address, quantity))
        }
        Request::WriteMultipleRegisters(address, data) => {
            let quantity = data.len() as u16;
            validate_quantity(quantity, REGISTER_WRITE_QUANTITY)?;
            validate_address(address, quantity)?;
            let words: Vec<u16> = data.into_iter().collect();
            handler.write(TargetType::HoldingRegister, address, WriteValue::Words(words))?;
            Ok(Response::WriteMultipleRegisters(address, quantity))
        }
        Request::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, write_data) => {
            validate_quantity(read_quantity, REGISTER_READ_QUANTITY)?;
            validate_address(read_address, read_quantity)?;
            let write_quantity = write_data.len() as u16;
            validate_quantity(write_quantity, REGISTER_WRITE_QUANTITY)?;
            validate_address(write_address, write_quantity)?;
            let write_words: Vec<u16> = write_data.into_iter().collect();
            let mut result = handler.read_write_multiple_registers(
                read_address,
                read_quantity,
                write_address,
                &write_words,
            )?;
            result.truncate(read_quantity as usize);
            let data = Data::from_words(&result, scratch).map_err(|_| ExceptionCode::SlaveDeviceFailure)?;
            Ok(Response::ReadWriteMultipleRegisters(data))
        }
        Request::ReadExceptionStatus => {
            let status = handler.read_exception_status()?;
            Ok(Response::ReadExceptionStatus(status))
        }
        Request::Diagnostics(sub_function, data) => {
            let echoed = handler.diagnostics(sub_function, data)?;
            if echoed.len() > scratch.len() {
                return Err(ExceptionCode::SlaveDeviceFailure);
            }
            scratch[..echoed.len()].copy_from_slice(&echoed);
            Ok(Response::Diagnostics(sub_function, &scratch[..echoed.len()]))
        }
        Request::ReportSlaveId => {
            let (slave_id, run_indicator) = handler.report_slave_id()?;
            if slave_id.len() > scratch.len() {
                return Err(ExceptionCode::SlaveDeviceFailure);
            }
            scratch[..slave_id.len()].copy_from_slice(&slave_id);
            Ok(Response::ReportSlaveId(&scratch[..slave_id.len()], run_indicator))
        }
        Request::MaskWriteRegister(reference_address, and_mask, or_mask) => {
            handler.mask_write_register(reference_address, and_mask, or_mask)?;
            Ok(Response::MaskWriteRegister(reference_address, and_mask, or_mask))
        }
        Request::ReadDeviceIdentification(read_dev_id_code, object_id) => {
            let identification = handler.read_device_identification(read_dev_id_code, object_id)?;
            let mut offset = 0;
            for (id, value) in &identification.objects {
                let needed = offset + 2 + value.len();
                if needed > scratch.len() {
                    return Err(ExceptionCode::SlaveDeviceFailure);
                }
                scratch[offset] = *id;
                scratch[offset + 1] = value.len() as u8;
                scratch[offset + 2..needed].copy_from_slice(value);
                offset = needed;
            }
            let objects = DeviceIdObjects {
                data: &scratch[..offset],
                count: identification.objects.len(),
            };
            Ok(Response::ReadDeviceIdentification(
                read_dev_id_code,
                identification.conformity_level,
                identification.more_follows,
                identification.next_object_id,
                objects,
            ))
        }
        Request::Custom(function_code, data) => {
            let echoed = handler.custom(function_code.value(), data)?;
            if echoed.len() > scratch.len() {
                return Err(ExceptionCode::SlaveDeviceFailure);
            }
            scratch[..echoed.len()].copy_from_slice(&echoed);
            Ok(Response::Custom(function_code, &scratch[..echoed.len()]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Registers {
        holding: Mutex<Vec<u16>>,
    }

    impl RequestHandler for Registers {
        fn read(&self, target: TargetType, address: u16, quantity: u16) -> Result<ReadValue, ExceptionCode> {
            if target != TargetType::HoldingRegister {
                return Err(ExceptionCode::IllegalFunction);
            }
            let regs = self.holding.lock().unwrap();
            let start = address as usize;
            let end = start + quantity as usize;
            regs.get(start..end)
                .map(|words| ReadValue::Words(words.to_vec()))
                .ok_or(ExceptionCode::IllegalDataAddress)
        }

        fn write(&self, target: TargetType, address: u16, value: WriteValue) -> Result<(), ExceptionCode> {
            if target != TargetType::HoldingRegister {
                return Err(ExceptionCode::IllegalFunction);
            }
            let WriteValue::Single(word) = value else {
                return Err(ExceptionCode::IllegalDataValue);
            };
            let mut regs = self.holding.lock().unwrap();
            *regs.get_mut(address as usize).ok_or(ExceptionCode::IllegalDataAddress)? = word;
            Ok(())
        }
    }

    fn registers(words: &[u16]) -> Registers {
        Registers {
            holding: Mutex::new(words.to_vec()),
        }
    }

    #[test]
    fn read_holding_registers_round_trips_through_dispatch() {
        let handler = registers(&[10, 20, 30]);
        let mut scratch = [0u8; 32];
        let response = dispatch(&handler, Request::ReadHoldingRegisters(1, 2), &mut scratch).unwrap();
        let Response::ReadHoldingRegisters(data) = response else {
            panic!("unexpected response variant");
        };
        assert_eq!(data.into_iter().collect::<Vec<_>>(), vec![20, 30]);
    }

    #[test]
    fn write_single_register_updates_backing_store() {
        let handler = registers(&[0, 0, 0]);
        let mut scratch = [0u8; 32];
        let response = dispatch(&handler, Request::WriteSingleRegister(1, 0xABCD), &mut scratch).unwrap();
        assert_eq!(response, Response::WriteSingleRegister(1, 0xABCD));
        assert_eq!(handler.holding.lock().unwrap()[1], 0xABCD);
    }

    #[test]
    fn unsupported_function_falls_back_to_illegal_function() {
        let handler = registers(&[0]);
        let mut scratch = [0u8; 32];
        let err = dispatch(&handler, Request::ReadExceptionStatus, &mut scratch).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalFunction);
    }

    #[test]
    fn read_quantity_above_limit_is_rejected_before_reaching_the_handler() {
        let handler = registers(&[0; 4]);
        let mut scratch = [0u8; 512];
        let err = dispatch(&handler, Request::ReadHoldingRegisters(0, 126), &mut scratch).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataValue);
    }

    #[test]
    fn address_quantity_overflow_past_0xffff_is_an_illegal_address() {
        let handler = registers(&[0; 4]);
        let mut scratch = [0u8; 512];
        let err = dispatch(&handler, Request::ReadHoldingRegisters(0xFFFF, 2), &mut scratch).unwrap_err();
        assert_eq!(err, ExceptionCode::IllegalDataAddress);
    }

    #[test]
    fn standard_gap_is_the_default() {
        let slave = SlaveBuilder::new(1, 19200, registers(&[0])).build();
        assert_eq!(slave.shared.gap, GapTiming::Standard.inter_frame_gap(19200));
    }

    #[test]
    fn set_slave_id_is_visible_immediately() {
        let slave = SlaveBuilder::new(1, 19200, registers(&[0])).build();
        slave.set_slave_id(7);
        assert_eq!(slave.shared.slave_id.load(Ordering::Relaxed), 7);
    }
}
