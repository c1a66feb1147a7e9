// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An async Modbus TCP master (client).

mod error;
mod value;

pub use error::Error;
pub use value::{TargetType, Value, WriteValue};

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};

use crate::codec::tcp::{self, DecodedFrame};
use crate::codec::DecoderType;
use crate::exception::ExceptionCode;
use crate::frame::tcp::{Header, RequestAdu, UnitId};
use crate::frame::{Coils, Data, ExceptionResponse, FunctionCode, Request, RequestPdu, Response};
use crate::transaction::{Transaction, TransactionTable};

/// How long a request waits for a response before failing with
/// [`ExceptionCode::ResponseTimeout`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Initial delay before the first reconnect attempt after an unexpected
/// disconnect; doubles on every failed attempt up to [`RECONNECT_MAX_BACKOFF`].
pub const RECONNECT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
/// Upper bound on the reconnect backoff delay.
pub const RECONNECT_MAX_BACKOFF: Duration = Duration::from_secs(5);

const READ_CHUNK_SIZE: usize = 512;
const MAX_PDU_LEN: usize = 253;

const COIL_READ_QUANTITY: RangeInclusive<u16> = 1..=2000;
const REGISTER_READ_QUANTITY: RangeInclusive<u16> = 1..=125;
const COIL_WRITE_QUANTITY: RangeInclusive<u16> = 1..=1968;
const REGISTER_WRITE_QUANTITY: RangeInclusive<u16> = 1..=123;

/// An async Modbus TCP master (client).
///
/// Cloning a [`Master`] is cheap: every clone shares the same socket,
/// transaction table, and background reader task.
#[derive(Clone)]
pub struct Master {
    shared: Arc<Shared>,
}

struct Shared {
    addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    transactions: Arc<Mutex<TransactionTable>>,
    unit_id: UnitId,
    request_timeout: Duration,
    /// Cleared by [`Master::disconnect`] so the reader task knows a closed
    /// connection was requested, not lost; left set otherwise so an
    /// unexpected disconnect is followed by a transparent reconnect.
    should_reconnect: AtomicBool,
}

impl Master {
    /// Connect to `addr` and start exchanging requests with unit id
    /// `unit_id`, using [`DEFAULT_REQUEST_TIMEOUT`] for every request.
    pub async fn connect(addr: SocketAddr, unit_id: UnitId) -> Result<Self, Error> {
        Self::connect_with_timeout(addr, unit_id, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Connect to `addr`, failing any request that goes unanswered for
    /// longer than `request_timeout`.
    ///
    /// If the connection is later lost without [`Master::disconnect`] having
    /// been called, the background reader task transparently redials `addr`
    /// with an exponential backoff and keeps serving the same [`Master`]
    /// handle once it succeeds.
    pub async fn connect_with_timeout(
        addr: SocketAddr,
        unit_id: UnitId,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let (read_half, write_half) = dial(addr).await?;

        let transactions = Arc::new(Mutex::new(TransactionTable::new()));
        let shared = Arc::new(Shared {
            addr,
            writer: Mutex::new(Some(write_half)),
            transactions,
            unit_id,
            request_timeout,
            should_reconnect: AtomicBool::new(true),
        });
        tokio::spawn(read_loop(Arc::clone(&shared), read_half));

        log::debug!("connected to Modbus TCP slave at {addr} (unit {unit_id})");

        Ok(Self { shared })
    }

    /// Close the connection and fail every request still in flight with
    /// [`Error::Disconnected`]. The background reader task shuts down once
    /// it observes the resulting EOF, and does not attempt to reconnect.
    pub async fn disconnect(&self) {
        self.shared.should_reconnect.store(false, Ordering::Relaxed);
        self.shared.writer.lock().await.take();
        fail_all(&self.shared.transactions, Error::Disconnected).await;
    }

    /// Read `quantity` coils, discrete inputs, holding registers or input
    /// registers starting at `address`.
    ///
    /// `quantity` and `address + quantity` are validated locally before
    /// anything is sent on the wire, failing with
    /// [`ExceptionCode::InvalidQuantity`]/[`ExceptionCode::InvalidAddressRange`]
    /// rather than round-tripping a request the slave would reject anyway.
    pub async fn read(
        &self,
        target: TargetType,
        address: u16,
        quantity: u16,
    ) -> Result<Value, Error> {
        let read_range = match target {
            TargetType::Coil | TargetType::DiscreteInput => COIL_READ_QUANTITY,
            TargetType::HoldingRegister | TargetType::InputRegister => REGISTER_READ_QUANTITY,
        };
        validate_quantity(quantity, read_range)?;
        validate_address_range(address, quantity)?;

        let request = match target {
            TargetType::Coil => Request::ReadCoils(address, quantity),
            TargetType::DiscreteInput => Request::ReadDiscreteInputs(address, quantity),
            TargetType::HoldingRegister => Request::ReadHoldingRegisters(address, quantity),
            TargetType::InputRegister => Request::ReadInputRegisters(address, quantity),
        };
        self.send_request(request, Some(quantity)).await
    }

    /// Write a coil or a holding register at `address`.
    ///
    /// A multi-element write is validated against the function code's
    /// permitted quantity range and the `0..=0xFFFF` address space before
    /// anything is sent, the same way [`Master::read`] is.
    pub async fn write(&self, target: TargetType, address: u16, value: WriteValue) -> Result<Value, Error> {
        match (target, value) {
            (TargetType::Coil, WriteValue::SingleBool(on)) => {
                self.send_request(Request::WriteSingleCoil(address, on), None).await
            }
            (TargetType::Coil, WriteValue::Bits(bits)) => {
                validate_quantity(bits.len() as u16, COIL_WRITE_QUANTITY)?;
                validate_address_range(address, bits.len() as u16)?;
                let mut buf = [0u8; MAX_PDU_LEN];
                let coils = Coils::from_bools(&bits, &mut buf).map_err(Error::Codec)?;
                self.send_request(Request::WriteMultipleCoils(address, coils), None)
                    .await
            }
            (TargetType::HoldingRegister, WriteValue::Single(word)) => {
                self.send_request(Request::WriteSingleRegister(address, word), None)
                    .await
            }
            (TargetType::HoldingRegister, WriteValue::Words(words)) => {
                validate_quantity(words.len() as u16, REGISTER_WRITE_QUANTITY)?;
                validate_address_range(address, words.len() as u16)?;
                let mut buf = [0u8; MAX_PDU_LEN];
                let data = Data::from_words(&words, &mut buf).map_err(Error::Codec)?;
                self.send_request(Request::WriteMultipleRegisters(address, data), None)
                    .await
            }
            (TargetType::HoldingRegister, WriteValue::Raw(bytes)) => {
                if bytes.is_empty() || bytes.len() % 2 != 0 {
                    return Err(Error::Exception(ExceptionCode::InvalidArgumentLength));
                }
                let quantity = (bytes.len() / 2) as u16;
                validate_quantity(quantity, REGISTER_WRITE_QUANTITY)?;
                validate_address_range(address, quantity)?;
                let data = Data {
                    data: &bytes,
                    quantity: bytes.len() / 2,
                };
                self.send_request(Request::WriteMultipleRegisters(address, data), None)
                    .await
            }
            _ => Err(Error::Exception(ExceptionCode::InvalidTargetType)),
        }
    }

    /// Read the slave's exception status byte (function code `07`).
    pub async fn read_exception_status(&self) -> Result<u8, Error> {
        match self.send_request(Request::ReadExceptionStatus, None).await? {
            Value::ExceptionStatus(status) => Ok(status),
            _ => unreachable!("ReadExceptionStatus always decodes to Value::ExceptionStatus"),
        }
    }

    /// Issue a diagnostics sub-function (function code `08`), returning the
    /// echoed data.
    pub async fn diagnostics(&self, sub_function: u16, data: &[u8]) -> Result<Vec<u8>, Error> {
        match self
            .send_request(Request::Diagnostics(sub_function, data), None)
            .await?
        {
            Value::Diagnostics { data, .. } => Ok(data),
            _ => unreachable!("Diagnostics always decodes to Value::Diagnostics"),
        }
    }

    /// Report the slave id and run indicator status (function code `17`).
    pub async fn report_slave_id(&self) -> Result<(Vec<u8>, bool), Error> {
        match self.send_request(Request::ReportSlaveId, None).await? {
            Value::ReportSlaveId { slave_id, run_indicator } => Ok((slave_id, run_indicator)),
            _ => unreachable!("ReportSlaveId always decodes to Value::ReportSlaveId"),
        }
    }

    /// Apply a bitmask to a single holding register (function code `22`):
    /// `result = (current & and_mask) | (or_mask & !and_mask)`.
    pub async fn mask_write_register(
        &self,
        reference_address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), Error> {
        self.send_request(
            Request::MaskWriteRegister(reference_address, and_mask, or_mask),
            None,
        )
        .await?;
        Ok(())
    }

    /// Read and write holding registers in a single transaction (function
    /// code `23`).
    pub async fn read_write_multiple_registers(
        &self,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        write_words: &[u16],
    ) -> Result<Vec<u16>, Error> {
        validate_quantity(read_quantity, REGISTER_READ_QUANTITY)?;
        validate_address_range(read_address, read_quantity)?;
        validate_quantity(write_words.len() as u16, REGISTER_WRITE_QUANTITY)?;
        validate_address_range(write_address, write_words.len() as u16)?;

        let mut buf = [0u8; MAX_PDU_LEN];
        let write_data = Data::from_words(write_words, &mut buf).map_err(Error::Codec)?;
        let request =
            Request::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, write_data);
        match self.send_request(request, Some(read_quantity)).await? {
            Value::Words(words) => Ok(words),
            _ => unreachable!("ReadWriteMultipleRegisters always decodes to Value::Words"),
        }
    }

    /// Read one category of device identification objects (function code
    /// `43`/`14`), starting at `object_id`.
    pub async fn read_device_identification(
        &self,
        read_dev_id_code: u8,
        object_id: u8,
    ) -> Result<Value, Error> {
        self.send_request(
            Request::ReadDeviceIdentification(read_dev_id_code, object_id),
            None,
        )
        .await
    }

    async fn send_request(&self, request: Request<'_>, quantity: Option<u16>) -> Result<Value, Error> {
        let expected_fn_code = FunctionCode::from(request);

        let (reply, reply_rx) = oneshot::channel();
        let transaction_id = self
            .shared
            .transactions
            .lock()
            .await
            .insert(Transaction {
                expected_fn_code,
                quantity,
                reply,
            })
            .map_err(|_| Error::TooManyTransactions)?;

        let mut adu_buf = [0u8; 7 + MAX_PDU_LEN];
        let adu_len = tcp::client::encode_request(
            RequestAdu {
                hdr: Header {
                    transaction_id,
                    unit_id: self.shared.unit_id,
                },
                pdu: RequestPdu(request),
            },
            &mut adu_buf,
        )
        .map_err(Error::Codec)?;

        if let Err(err) = self.write_adu(&adu_buf[..adu_len]).await {
            self.shared.transactions.lock().await.remove(transaction_id);
            return Err(err);
        }

        match tokio::time::timeout(self.shared.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Disconnected),
            Err(_) => {
                self.shared.transactions.lock().await.remove(transaction_id);
                Err(Error::Exception(ExceptionCode::ResponseTimeout))
            }
        }
    }

    async fn write_adu(&self, adu: &[u8]) -> Result<(), Error> {
        let mut writer = self.shared.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::Disconnected)?;
        writer.write_all(adu).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Dial `addr`, enabling `TCP_NODELAY` so small PDUs aren't held back by
/// Nagle's algorithm, and split the stream into independent read/write
/// halves.
async fn dial(addr: SocketAddr) -> Result<(OwnedReadHalf, OwnedWriteHalf), Error> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream.into_split())
}

/// Redial `shared.addr` with exponential backoff until it succeeds or
/// [`Master::disconnect`] clears `should_reconnect`. Installs the new write
/// half into `shared.writer` and returns the new read half to resume reading
/// on; returns `None` if reconnection was cancelled.
async fn reconnect(shared: &Arc<Shared>) -> Option<OwnedReadHalf> {
    let mut backoff = RECONNECT_INITIAL_BACKOFF;
    while shared.should_reconnect.load(Ordering::Relaxed) {
        tokio::time::sleep(backoff).await;
        if !shared.should_reconnect.load(Ordering::Relaxed) {
            return None;
        }
        match dial(shared.addr).await {
            Ok((read_half, write_half)) => {
                *shared.writer.lock().await = Some(write_half);
                log::info!("reconnected to Modbus TCP slave at {}", shared.addr);
                return Some(read_half);
            }
            Err(err) => {
                log::warn!(
                    "reconnect to Modbus TCP slave at {} failed: {err}, retrying in {backoff:?}",
                    shared.addr
                );
                backoff = (backoff * 2).min(RECONNECT_MAX_BACKOFF);
            }
        }
    }
    None
}

async fn read_loop(shared: Arc<Shared>, mut read_half: OwnedReadHalf) {
    let mut buf = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    'connection: loop {
        loop {
            let n = match read_half.read(&mut chunk).await {
                Ok(0) => {
                    log::debug!("Modbus TCP master connection closed by peer");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    log::warn!("Modbus TCP master connection read failed: {err}");
                    break;
                }
            };
            buf.extend_from_slice(&chunk[..n]);

            loop {
                match tcp::decode(DecoderType::Response, &buf) {
                    Ok(Some((frame, location))) => {
                        dispatch_response(&shared.transactions, &frame).await;
                        buf.drain(..location.start + location.size);
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::warn!("dropping undecodable response bytes: {err}");
                        buf.clear();
                        break;
                    }
                }
            }
        }

        fail_all(&shared.transactions, Error::Disconnected).await;
        buf.clear();

        if !shared.should_reconnect.load(Ordering::Relaxed) {
            break 'connection;
        }
        match reconnect(&shared).await {
            Some(new_read_half) => read_half = new_read_half,
            None => break 'connection,
        }
    }
}

async fn dispatch_response(transactions: &Arc<Mutex<TransactionTable>>, frame: &DecodedFrame<'_>) {
    let Some(transaction) = transactions.lock().await.remove(frame.transaction_id) else {
        log::warn!(
            "response for unknown or already-completed transaction id {}",
            frame.transaction_id
        );
        return;
    };
    let result = decode_response_pdu(frame.pdu, transaction.expected_fn_code, transaction.quantity);
    let _ = transaction.reply.send(result);
}

fn decode_response_pdu(
    pdu: &[u8],
    expected_fn_code: FunctionCode,
    quantity: Option<u16>,
) -> Result<Value, Error> {
    if pdu.is_empty() {
        return Err(Error::Codec(crate::error::Error::BufferSize));
    }
    if pdu[0] & 0x80 != 0 {
        let exception = ExceptionResponse::try_from(pdu).map_err(Error::Codec)?;
        return Err(Error::Exception(ExceptionCode::from(exception.exception)));
    }
    let response = Response::try_from(pdu).map_err(|err| match err {
        crate::error::Error::CoilValue(_) => Error::Exception(ExceptionCode::InvalidValues),
        err => Error::Codec(err),
    })?;
    let actual_fn_code = FunctionCode::from(response);
    if actual_fn_code != expected_fn_code {
        return Err(Error::UnexpectedResponse {
            expected: expected_fn_code,
            actual: actual_fn_code,
        });
    }
    Ok(Value::from_response(&response, quantity))
}

async fn fail_all(transactions: &Arc<Mutex<TransactionTable>>, make_err: Error) {
    for transaction in transactions.lock().await.drain() {
        let _ = transaction.reply.send(Err(clone_error(&make_err)));
    }
}

/// [`Error`] intentionally doesn't derive `Clone` (it wraps non-`Clone`
/// `std::io::Error`); draining the transaction table needs to report the
/// same disconnect/timeout cause to every waiter, so we re-derive it instead.
fn clone_error(err: &Error) -> Error {
    match err {
        Error::Disconnected => Error::Disconnected,
        Error::TooManyTransactions => Error::TooManyTransactions,
        Error::Exception(code) => Error::Exception(*code),
        Error::Codec(code) => Error::Codec(*code),
        Error::Io(io_err) => Error::Io(std::io::Error::new(io_err.kind(), io_err.to_string())),
        Error::UnexpectedResponse { expected, actual } => Error::UnexpectedResponse {
            expected: *expected,
            actual: *actual,
        },
    }
}

/// Reject a quantity outside the function code's permitted range before a
/// request is ever encoded.
fn validate_quantity(quantity: u16, range: RangeInclusive<u16>) -> Result<(), Error> {
    if range.contains(&quantity) {
        Ok(())
    } else {
        Err(Error::Exception(ExceptionCode::InvalidQuantity))
    }
}

/// Reject `address + quantity` overflowing the `0..=0xFFFF` addressable
/// range before a request is ever encoded.
fn validate_address_range(address: u16, quantity: u16) -> Result<(), Error> {
    if u32::from(address) + u32::from(quantity) <= u32::from(u16::MAX) + 1 {
        Ok(())
    } else {
        Err(Error::Exception(ExceptionCode::InvalidAddressRange))
    }
}
