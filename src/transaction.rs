// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The master's pending-transaction table: maps an MBAP transaction id to
//! the request that is still waiting for its response.

use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::frame::FunctionCode;
use crate::master::{Error, Value};

/// MBAP transaction id. Valid range `1..=255`; `0` is never issued.
pub(crate) type TransactionId = u16;

/// Upper bound for concurrently in-flight requests, and the point at which
/// the id counter wraps back to `1`.
pub(crate) const MAX_TRANSACTION_COUNT: u16 = 255;

/// What the master needs to turn a raw response PDU into a [`Value`], and
/// where to deliver the outcome once it knows.
pub(crate) struct Transaction {
    pub(crate) expected_fn_code: FunctionCode,
    pub(crate) quantity: Option<u16>,
    pub(crate) reply: oneshot::Sender<Result<Value, Error>>,
}

/// Raised when the table has no free slot left for a new transaction, i.e.
/// 255 requests are simultaneously in flight.
#[derive(Debug)]
pub(crate) struct TableFull;

pub(crate) struct TransactionTable {
    next_id: u16,
    pending: HashMap<TransactionId, Transaction>,
}

impl TransactionTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next free transaction id and register `transaction`
    /// under it. Never emits id `0`, wraps from `255` back to `1`.
    pub(crate) fn insert(&mut self, transaction: Transaction) -> Result<TransactionId, TableFull> {
        if self.pending.len() >= MAX_TRANSACTION_COUNT as usize {
            return Err(TableFull);
        }
        for _ in 0..MAX_TRANSACTION_COUNT {
            let id = self.next_id;
            self.next_id = if self.next_id >= MAX_TRANSACTION_COUNT {
                1
            } else {
                self.next_id + 1
            };
            if !self.pending.contains_key(&id) {
                self.pending.insert(id, transaction);
                return Ok(id);
            }
        }
        Err(TableFull)
    }

    pub(crate) fn remove(&mut self, id: TransactionId) -> Option<Transaction> {
        self.pending.remove(&id)
    }

    /// Remove every pending transaction, e.g. because the connection was
    /// lost or `disconnect()` was called. The caller is responsible for
    /// notifying each one.
    pub(crate) fn drain(&mut self) -> Vec<Transaction> {
        self.pending.drain().map(|(_, t)| t).collect()
    }
}
