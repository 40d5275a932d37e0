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

//! Purchase receipts and receipt validation.
//!
//! A receipt is created [`Draft`], freely editable, and confirms exactly
//! once. Confirmation is the only moment a receipt touches the parent
//! order's ledger; a draft receipt has no ledger effect at all.
//!
//! [`validate_items`] is the receipt builder's contract: it checks a
//! candidate set of lines against a pending-quantity snapshot and never
//! mutates anything. The ledger re-checks at commit time because another
//! receipt may confirm in between.
//!
//! [`Draft`]: ReceiptStatus::Draft

use crate::amount;
use crate::base::{OrderId, OrderItemId, ProductId, ReceiptId, WarehouseId};
use crate::error::ProcurementError;
use crate::status::OrderStatus;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a receipt: editable draft, then immutable once confirmed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Draft,
    Confirmed,
}

/// One line of a receipt: quantity received against one order item.
///
/// The unit price is captured at receipt time and may differ from the
/// order's price (e.g. a correction from the delivery note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptLine {
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

/// Validates a candidate receipt against a pending-quantity snapshot.
///
/// `pending` maps every order item of the addressed order to its pending
/// quantity; an id missing from the map belongs to some other order.
/// Lines addressing the same item are summed before the pending check.
///
/// # Errors
///
/// - [`ProcurementError::EmptyReceipt`] - no lines proposed.
/// - [`ProcurementError::InvalidQuantity`] - a line quantity is not positive.
/// - [`ProcurementError::CrossOrderReference`] - a line references an item
///   outside the addressed order.
/// - [`ProcurementError::OverReceipt`] - requested quantity exceeds what is
///   pending, reported with item id, requested, and pending values.
/// - [`ProcurementError::OrderNotReceivable`] - the order is draft,
///   cancelled, or was fully received with nothing left pending anywhere.
pub fn validate_items(
    order_status: OrderStatus,
    pending: &HashMap<OrderItemId, Decimal>,
    lines: &[ReceiptLine],
) -> Result<(), ProcurementError> {
    if lines.is_empty() {
        return Err(ProcurementError::EmptyReceipt);
    }

    let mut requested: HashMap<OrderItemId, Decimal> = HashMap::new();
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(ProcurementError::InvalidQuantity);
        }
        if !pending.contains_key(&line.order_item_id) {
            return Err(ProcurementError::CrossOrderReference {
                order_item_id: line.order_item_id,
            });
        }
        *requested.entry(line.order_item_id).or_insert(Decimal::ZERO) += line.quantity;
    }

    for (item_id, total) in &requested {
        let available = pending[item_id];
        if *total > available {
            return Err(ProcurementError::OverReceipt {
                order_item_id: *item_id,
                requested: *total,
                pending: available,
            });
        }
    }

    if !order_status.is_receivable() {
        return Err(ProcurementError::OrderNotReceivable {
            status: order_status,
        });
    }

    Ok(())
}

#[derive(Debug)]
struct ReceiptData {
    receipt_id: ReceiptId,
    order_id: OrderId,
    warehouse_id: WarehouseId,
    receipt_date: String,
    receiver: String,
    status: ReceiptStatus,
    lines: Vec<ReceiptLine>,
}

/// Purchase receipt with interior locking.
#[derive(Debug)]
pub struct Receipt {
    inner: Mutex<ReceiptData>,
}

impl Receipt {
    pub fn new(
        receipt_id: ReceiptId,
        order_id: OrderId,
        warehouse_id: WarehouseId,
        receipt_date: &str,
        receiver: &str,
        lines: Vec<ReceiptLine>,
    ) -> Self {
        Self {
            inner: Mutex::new(ReceiptData {
                receipt_id,
                order_id,
                warehouse_id,
                receipt_date: receipt_date.to_string(),
                receiver: receiver.to_string(),
                status: ReceiptStatus::Draft,
                lines,
            }),
        }
    }

    pub fn receipt_id(&self) -> ReceiptId {
        self.inner.lock().receipt_id
    }

    pub fn order_id(&self) -> OrderId {
        self.inner.lock().order_id
    }

    pub fn status(&self) -> ReceiptStatus {
        self.inner.lock().status
    }

    pub fn lines(&self) -> Vec<ReceiptLine> {
        self.inner.lock().lines.clone()
    }

    pub fn total_quantity(&self) -> Decimal {
        let data = self.inner.lock();
        let (quantity, _) = amount::receipt_totals(data.lines.iter().map(|l| (l.quantity, l.unit_price)));
        quantity
    }

    /// Σ quantity × unit price over the receipt's lines.
    pub fn total_amount(&self) -> Decimal {
        let data = self.inner.lock();
        let (_, total) = amount::receipt_totals(data.lines.iter().map(|l| (l.quantity, l.unit_price)));
        total
    }

    /// Replaces the draft's lines wholesale. The engine re-validates the new
    /// set against the order before calling this.
    pub fn replace_lines(&self, lines: Vec<ReceiptLine>) -> Result<(), ProcurementError> {
        let mut data = self.inner.lock();
        if data.status == ReceiptStatus::Confirmed {
            return Err(ProcurementError::ReceiptAlreadyConfirmed(data.receipt_id));
        }
        data.lines = lines;
        Ok(())
    }

    /// Atomically takes the draft → confirmed transition and hands back the
    /// lines to commit. Exactly one caller can win; everyone else sees
    /// [`ProcurementError::ReceiptAlreadyConfirmed`].
    pub fn begin_confirm(&self) -> Result<Vec<ReceiptLine>, ProcurementError> {
        let mut data = self.inner.lock();
        if data.status == ReceiptStatus::Confirmed {
            return Err(ProcurementError::ReceiptAlreadyConfirmed(data.receipt_id));
        }
        data.status = ReceiptStatus::Confirmed;
        Ok(data.lines.clone())
    }

    /// Rolls a failed confirmation back to draft. Only the thread that won
    /// [`begin_confirm`](Self::begin_confirm) calls this, and only when the
    /// ledger rejected the commit (so no deltas were applied).
    pub fn abort_confirm(&self) {
        self.inner.lock().status = ReceiptStatus::Draft;
    }

    pub fn snapshot(&self) -> ReceiptSnapshot {
        let data = self.inner.lock();
        let (total_quantity, total_amount) =
            amount::receipt_totals(data.lines.iter().map(|l| (l.quantity, l.unit_price)));
        ReceiptSnapshot {
            receipt_id: data.receipt_id,
            order_id: data.order_id,
            warehouse_id: data.warehouse_id,
            receipt_date: data.receipt_date.clone(),
            receiver: data.receiver.clone(),
            status: data.status,
            total_quantity,
            total_amount,
            lines: data.lines.clone(),
        }
    }
}

/// Point-in-time copy of a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptSnapshot {
    pub receipt_id: ReceiptId,
    pub order_id: OrderId,
    pub warehouse_id: WarehouseId,
    pub receipt_date: String,
    pub receiver: String,
    pub status: ReceiptStatus,
    pub total_quantity: Decimal,
    pub total_amount: Decimal,
    pub lines: Vec<ReceiptLine>,
}

impl Serialize for Receipt {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let (total_quantity, total_amount) =
            amount::receipt_totals(data.lines.iter().map(|l| (l.quantity, l.unit_price)));
        let mut state = serializer.serialize_struct("Receipt", 6)?;
        state.serialize_field("receipt", &data.receipt_id)?;
        state.serialize_field("order", &data.order_id)?;
        state.serialize_field("warehouse", &data.warehouse_id)?;
        state.serialize_field("status", &data.status)?;
        state.serialize_field("quantity", &total_quantity)?;
        state.serialize_field("amount", &total_amount)?;
        state.end()
    }
}
