// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[macro_use]
extern crate log;

mod codec;
mod error;
mod exception;
mod frame;
mod transaction;

pub mod master;
pub mod slave;

pub use codec::*;
pub use error::*;
pub use exception::*;
pub use frame::*;
