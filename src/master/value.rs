// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::frame::Response;

/// Which kind of addressable object a read or write targets.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

/// What to write to a target. A coil accepts [`Self::SingleBool`] or
/// [`Self::Bits`], a register accepts [`Self::Single`] or [`Self::Words`].
/// [`Self::Raw`] bypasses packing and is sent on the wire verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteValue {
    Single(u16),
    SingleBool(bool),
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Raw(Vec<u8>),
}

/// An owned copy of whatever a [`super::Master`] request returned. Owned
/// because the borrowed [`Response`] only lives as long as the read buffer
/// the background reader task recycles after every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    /// A write request completed with no data of its own to report.
    Ack,
    ExceptionStatus(u8),
    Diagnostics {
        sub_function: u16,
        data: Vec<u8>,
    },
    ReportSlaveId {
        slave_id: Vec<u8>,
        run_indicator: bool,
    },
    MaskWriteRegister {
        reference_address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    DeviceIdentification {
        read_dev_id_code: u8,
        conformity_level: u8,
        more_follows: bool,
        next_object_id: u8,
        objects: Vec<(u8, Vec<u8>)>,
    },
    Custom {
        function_code: u8,
        data: Vec<u8>,
    },
}

impl Value {
    /// `quantity` trims the trailing pad bits a coil response's byte-count
    /// framing forces onto the decoded bit vector (see
    /// [`crate::codec::response_pdu_len`]'s doc comment on `ReadCoils`).
    pub(crate) fn from_response(response: &Response<'_>, quantity: Option<u16>) -> Self {
        match *response {
            Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
                let mut bits: Vec<bool> = coils.into_iter().collect();
                if let Some(quantity) = quantity {
                    bits.truncate(quantity as usize);
                }
                Self::Bits(bits)
            }
            Response::WriteSingleCoil(..)
            | Response::WriteMultipleCoils(..)
            | Response::WriteSingleRegister(..)
            | Response::WriteMultipleRegisters(..) => Self::Ack,
            Response::ReadInputRegisters(words)
            | Response::ReadHoldingRegisters(words)
            | Response::ReadWriteMultipleRegisters(words) => Self::Words(words.into_iter().collect()),
            Response::ReadExceptionStatus(status) => Self::ExceptionStatus(status),
            Response::Diagnostics(sub_function, data) => Self::Diagnostics {
                sub_function,
                data: data.to_vec(),
            },
            Response::ReportSlaveId(slave_id, run_indicator) => Self::ReportSlaveId {
                slave_id: slave_id.to_vec(),
                run_indicator,
            },
            Response::MaskWriteRegister(reference_address, and_mask, or_mask) => {
                Self::MaskWriteRegister {
                    reference_address,
                    and_mask,
                    or_mask,
                }
            }
            Response::ReadDeviceIdentification(
                read_dev_id_code,
                conformity_level,
                more_follows,
                next_object_id,
                objects,
            ) => Self::DeviceIdentification {
                read_dev_id_code,
                conformity_level,
                more_follows,
                next_object_id,
                objects: objects
                    .into_iter()
                    .map(|(id, value)| (id, value.to_vec()))
                    .collect(),
            },
            Response::Custom(function_code, data) => Self::Custom {
                function_code: function_code.value(),
                data: data.to_vec(),
            },
        }
    }
}
