// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::exception::ExceptionCode;
pub use crate::master::{TargetType, WriteValue};

/// What a successful read returns: packed bits for [`TargetType::Coil`] and
/// [`TargetType::DiscreteInput`], words for the register targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadValue {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

/// The payload of a Read Device Identification response (function code
/// `43`/`14`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentification {
    pub conformity_level: u8,
    pub more_follows: bool,
    pub next_object_id: u8,
    pub objects: Vec<(u8, Vec<u8>)>,
}

/// Application logic behind a [`super::Slave`].
///
/// [`super::Slave::run`] validates the address and quantity of every
/// incoming request before calling one of these methods, so implementors
/// only need to worry about the mapping from addresses to application
/// state. A method left at its default returns [`ExceptionCode::IllegalFunction`],
/// the correct response for a function the device doesn't support.
///
/// All methods are synchronous: a slave answers out of in-memory state, and
/// keeping the trait sync keeps it object-safe without `async-trait`.
pub trait RequestHandler: Send + Sync {
    /// Read `quantity` items of `target` starting at `address`.
    fn read(&self, target: TargetType, address: u16, quantity: u16) -> Result<ReadValue, ExceptionCode> {
        let _ = (target, address, quantity);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write `value` to `target` starting at `address`.
    fn write(&self, target: TargetType, address: u16, value: WriteValue) -> Result<(), ExceptionCode> {
        let _ = (target, address, value);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Function code `07`: report the device's exception status byte.
    fn read_exception_status(&self) -> Result<u8, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Function code `08`: echo `data` back, or act on `sub_function` and
    /// return whatever it prescribes.
    fn diagnostics(&self, sub_function: u16, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        let _ = (sub_function, data);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Function code `17`: report the slave id and run indicator status.
    fn report_slave_id(&self) -> Result<(Vec<u8>, bool), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Function code `22`: apply `(current & and_mask) | (or_mask & !and_mask)`
    /// to the register at `reference_address`.
    fn mask_write_register(&self, reference_address: u16, and_mask: u16, or_mask: u16) -> Result<(), ExceptionCode> {
        let _ = (reference_address, and_mask, or_mask);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Function code `23`: read `read_quantity` holding registers starting
    /// at `read_address`, then write `write_values` starting at
    /// `write_address`, atomically.
    fn read_write_multiple_registers(
        &self,
        read_address: u16,
        read_quantity: u16,
        write_address: u16,
        write_values: &[u16],
    ) -> Result<Vec<u16>, ExceptionCode> {
        let _ = (read_address, read_quantity, write_address, write_values);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Function code `43`/`14`: read one category of device identification
    /// objects, starting at `object_id`.
    fn read_device_identification(
        &self,
        read_dev_id_code: u8,
        object_id: u8,
    ) -> Result<DeviceIdentification, ExceptionCode> {
        let _ = (read_dev_id_code, object_id);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Any function code this crate doesn't model directly.
    fn custom(&self, function_code: u8, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
        let _ = (function_code, data);
        Err(ExceptionCode::IllegalFunction)
    }

    /// Called with every exception this slave is about to send back,
    /// immediately before the response is encoded. Never changes the
    /// outcome; useful for logging or metrics.
    fn on_error(&self, function_code: u8, exception: ExceptionCode) {
        let _ = (function_code, exception);
    }
}
