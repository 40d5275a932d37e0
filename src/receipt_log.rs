// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Thread-safe confirmation log with deduplication.
//!
//! Records which receipts have been confirmed, in confirmation order, and
//! guarantees a receipt id is logged at most once.

use crate::base::{OrderId, ReceiptId};
use crate::error::ProcurementError;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// A thread-safe receipt confirmation log with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) duplicate checking with a [`SegQueue`]
/// to preserve confirmation order. All operations are lock-free and safe
/// for concurrent access.
#[derive(Debug)]
pub struct ReceiptLog {
    /// Confirmed receipts mapped to their order for O(1) duplicate detection.
    confirmed: DashMap<ReceiptId, OrderId>,

    /// Queue of receipt IDs maintaining FIFO confirmation order.
    confirmation_order: SegQueue<ReceiptId>,
}

impl ReceiptLog {
    /// Creates a new empty confirmation log.
    pub fn new() -> Self {
        Self {
            confirmed: DashMap::new(),
            confirmation_order: SegQueue::new(),
        }
    }

    /// Records a confirmed receipt.
    ///
    /// # Errors
    ///
    /// Returns [`ProcurementError::ReceiptAlreadyConfirmed`] if the receipt
    /// was logged before. The receipt's own draft→confirmed gate makes this
    /// unreachable in practice; the entry API keeps it airtight anyway.
    pub fn push(&self, receipt_id: ReceiptId, order_id: OrderId) -> Result<(), ProcurementError> {
        // Use entry API for atomic check-and-insert to prevent race conditions
        match self.confirmed.entry(receipt_id) {
            Entry::Occupied(_) => Err(ProcurementError::ReceiptAlreadyConfirmed(receipt_id)),
            Entry::Vacant(entry) => {
                entry.insert(order_id);
                self.confirmation_order.push(receipt_id);
                Ok(())
            }
        }
    }

    /// Forgets a confirmed receipt, freeing its id for reuse.
    ///
    /// The FIFO audit trail keeps the historical confirmation entry; only
    /// the dedup index is updated.
    pub fn remove(&self, receipt_id: ReceiptId) {
        self.confirmed.remove(&receipt_id);
    }

    /// Whether the receipt has been confirmed.
    pub fn contains(&self, receipt_id: ReceiptId) -> bool {
        self.confirmed.contains_key(&receipt_id)
    }

    /// Number of confirmed receipts.
    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }

    /// Drains the FIFO audit trail, returning receipt ids in confirmation
    /// order. The dedup index is untouched, so drained receipts still count
    /// as confirmed.
    pub fn drain_audit(&self) -> Vec<ReceiptId> {
        let mut ids = Vec::with_capacity(self.confirmation_order.len());
        while let Some(id) = self.confirmation_order.pop() {
            ids.push(id);
        }
        ids
    }
}

impl Default for ReceiptLog {
    fn default() -> Self {
        Self::new()
    }
}
