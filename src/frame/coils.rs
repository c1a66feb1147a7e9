// SPDX-FileCopyrightText: Copyright (c) 2018-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::*;
use crate::error::*;

/// Packed coils
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coils<'c> {
    pub(crate) data: RawData<'c>,
    pub(crate) quantity: CoilQuantity,
}

impl<'c> Coils<'c> {
    /// Pack coils defined by an bool slice into a byte buffer.
    pub fn from_bools(bools: &[bool], target: &'c mut [u8]) -> Result<Self, Error> {
        Self::from_iter(bools.iter().copied(), target)
    }

    /// Pack coils from an iterator into a byte buffer.
    pub fn from_iter(
        bools: impl IntoIterator<Item = bool>,
        target: &'c mut [u8],
    ) -> Result<Self, Error> {
        let quantity = pack_coils(bools, target)?;
        Ok(Coils {
            data: target,
            quantity,
        })
    }

    //TODO: add tests
    pub(crate) fn copy_to(&self, buf: &mut [u8]) {
        let packed_len = self.packed_len();
        debug_assert!(buf.len() >= packed_len);
        (0..packed_len).for_each(|idx| {
            buf[idx] = self.data[idx];
        });
    }

    /// Quantity of coils
    #[must_use]
    pub const fn len(&self) -> usize {
        self.quantity.quantity
    }

    /// Number of bytes required to pack the coils.
    #[must_use]
    pub const fn packed_len(&self) -> usize {
        self.quantity.packed_len()
    }

    ///  Returns `true` if the container has no items.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.quantity.quantity == 0
    }

    /// Get a specific coil.
    #[must_use]
    pub const fn get(&self, idx: usize) -> Option<Coil> {
        if idx + 1 > self.quantity.quantity {
            return None;
        }
        Some((self.data[(idx as u16 / 8u16) as usize] >> (idx % 8)) & 0b1 > 0)
    }
}

/// Coils iterator.
// TODO: crate an generic iterator
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoilsIter<'c> {
    cnt: usize,
    coils: Coils<'c>,
}

impl Iterator for CoilsIter<'_> {
    type Item = Coil;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.coils.get(self.cnt);
        self.cnt += 1;
        result
    }
}

impl<'c> IntoIterator for Coils<'c> {
    type Item = Coil;
    type IntoIter = CoilsIter<'c>;

    fn into_iter(self) -> Self::IntoIter {
        CoilsIter {
            cnt: 0,
            coils: self,
        }
    }
}

/// Turn a bool into a u16 coil value
#[must_use]
pub const fn bool_to_u16_coil(state: bool) -> u16 {
    if state { 0xFF00 } else { 0x0000 }
}

/// Turn a u16 coil value into a boolean value.
pub const fn u16_coil_to_bool(coil: u16) -> Result<bool, Error> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(Error::CoilValue(coil)),
    }
}

/// A quantity of coils.
#[cfg_attr(all(feature = "defmt", target_os = "none"), derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoilQuantity {
    /// The number of coils.
    pub quantity: usize,
}

impl CoilQuantity {
    /// Calculate the number of bytes required for the number of coils.
    #[must_use]
    pub const fn packed_len(&self) -> usize {
        self.quantity.div_ceil(8)
    }
}

///  Pack coils into a byte array.
///
///  It returns the number of coils.
pub fn pack_coils(
    coils: impl IntoIterator<Item = Coil>,
    bytes: &mut [u8],
) -> Result<CoilQuantity, Error> {
    let mut coil_count = 0;
    for coil in coils {
        let value = u8::from(coil);
        let Some(byte) = bytes.get_mut(coil_count / 8) else {
            return Err(Error::BufferSize);
        };
        *byte |= value << (coil_count % 8);
        match coil_count.checked_add(1) {
            Some(count) => coil_count = count,
            None => return Err(Error::ByteCount(0)),
        }
    }
    Ok(CoilQuantity {
        quantity: coil_count,
    })
}

///  Unpack coils from a byte array.
pub fn unpack_coils(bytes: &[u8], count: u16, coils: &mut [Coil]) -> Result<(), Error> {
    if coils.len() < count as usize {
        return Err(Error::BufferSize);
    }
    (0..count).for_each(|i| {
        coils[i as usize] = (bytes[(i / 8u16) as usize] >> (i % 8)) & 0b1 > 0;
    });
    Ok(())
}
