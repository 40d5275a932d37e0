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

//! Order-to-receipt reconciliation engine.
//!
//! The [`Engine`] is the central component that manages purchase orders and
//! their receipts. A receipt submission flows validate → apply (ledger) →
//! resolve (status) → recompute (amounts), with the whole mutating portion
//! serialized per order.
//!
//! # Receipt Processing
//!
//! - **Create**: validate a proposed line set against the order; store a
//!   draft. Drafts never touch the ledger.
//! - **Confirm**: commit the draft's deltas to the order's ledger
//!   all-or-nothing, resolving the order status before anything is returned.
//! - **Delete**: drop a draft, or reverse a confirmed receipt's deltas and
//!   then drop it (the correction path).
//!
//! # Thread Safety
//!
//! Orders and receipts live in [`DashMap`]s; each aggregate carries its own
//! mutex. Operations against different orders run in parallel, operations
//! against one order serialize on its lock. Lock acquisition is timed, so a
//! stuck confirmation surfaces as a retryable error instead of blocking.

use crate::base::{OrderId, OrderItemId, ReceiptId, SupplierId, WarehouseId};
use crate::error::ProcurementError;
use crate::order::{Order, OrderItemSpec, OrderSnapshot, PendingItem};
use crate::receipt::{self, Receipt, ReceiptLine, ReceiptSnapshot, ReceiptStatus};
use crate::receipt_log::ReceiptLog;
use crate::status::OrderStatus;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::time::Duration;

/// Default bound on waiting for a per-order lock.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconciliation engine managing purchase orders and receipts.
///
/// # Invariants
///
/// - Order and receipt IDs are globally unique.
/// - Only the order aggregate mutates received quantities; receipts go
///   through it.
/// - A receipt confirms exactly once; confirmation and ledger commit are
///   atomic per order.
/// - `0 ≤ received ≤ ordered` holds for every line at every observable
///   point.
pub struct Engine {
    /// Purchase orders indexed by order ID.
    orders: DashMap<OrderId, Order>,
    /// Receipts indexed by receipt ID.
    receipts: DashMap<ReceiptId, Receipt>,
    /// Confirmation log for dedup and audit ordering.
    log: ReceiptLog,
    /// Per-order lock acquisition bound.
    lock_timeout: Duration,
}

impl Engine {
    /// Creates a new engine with no orders or receipts.
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates an engine with a custom per-order lock timeout.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Engine {
            orders: DashMap::new(),
            receipts: DashMap::new(),
            log: ReceiptLog::new(),
            lock_timeout,
        }
    }

    /// Creates a draft purchase order with its initial line items.
    ///
    /// # Errors
    ///
    /// - [`ProcurementError::DuplicateOrder`] - order ID already exists.
    /// - Item validation errors from the amount calculator (quantity, price,
    ///   discount rate) - the order is not created.
    pub fn create_order(
        &self,
        order_id: OrderId,
        supplier_id: SupplierId,
        order_date: &str,
        expected_date: &str,
        items: Vec<(OrderItemId, OrderItemSpec)>,
    ) -> Result<(), ProcurementError> {
        let order = Order::new(order_id, supplier_id, order_date, expected_date);
        for (item_id, spec) in items {
            order.add_item(item_id, spec)?;
        }

        // Entry API makes the existence check and the insert atomic.
        match self.orders.entry(order_id) {
            Entry::Occupied(_) => Err(ProcurementError::DuplicateOrder),
            Entry::Vacant(entry) => {
                entry.insert(order);
                Ok(())
            }
        }
    }

    /// Adds a line item to a draft order.
    pub fn add_item(
        &self,
        order_id: OrderId,
        item_id: OrderItemId,
        spec: OrderItemSpec,
    ) -> Result<(), ProcurementError> {
        self.order(order_id)?.add_item(item_id, spec)
    }

    /// Replaces the fields of a draft order's line item.
    pub fn update_item(
        &self,
        order_id: OrderId,
        item_id: OrderItemId,
        spec: OrderItemSpec,
    ) -> Result<(), ProcurementError> {
        self.order(order_id)?.update_item(item_id, spec)
    }

    /// Removes a line item from a draft order.
    pub fn remove_item(&self, order_id: OrderId, item_id: OrderItemId) -> Result<(), ProcurementError> {
        self.order(order_id)?.remove_item(item_id)
    }

    /// Sets the order-level discount and tax amounts.
    ///
    /// Allowed until the order reaches a terminal state; the resulting final
    /// amount is validated before anything is stored.
    pub fn set_adjustments(
        &self,
        order_id: OrderId,
        discount_amount: Decimal,
        tax_amount: Decimal,
    ) -> Result<(), ProcurementError> {
        self.order(order_id)?.set_adjustments(discount_amount, tax_amount)
    }

    /// Reschedules an order's expected delivery date.
    pub fn set_expected_date(&self, order_id: OrderId, expected_date: &str) -> Result<(), ProcurementError> {
        self.order(order_id)?.set_expected_date(expected_date)
    }

    /// Confirms a draft order, locking its item list structurally.
    pub fn confirm_order(&self, order_id: OrderId) -> Result<OrderStatus, ProcurementError> {
        self.order(order_id)?.confirm()
    }

    /// Cancels a draft or confirmed order that has received nothing.
    pub fn cancel_order(&self, order_id: OrderId) -> Result<OrderStatus, ProcurementError> {
        self.order(order_id)?.cancel()
    }

    /// Validates a proposed receipt and stores it as a draft.
    ///
    /// No ledger mutation happens here; the pending check runs again at
    /// confirmation time.
    ///
    /// # Errors
    ///
    /// - [`ProcurementError::OrderNotFound`] - unknown order.
    /// - [`ProcurementError::DuplicateReceipt`] - receipt ID already exists.
    /// - Builder validation errors per [`receipt::validate_items`].
    pub fn create_receipt(
        &self,
        receipt_id: ReceiptId,
        order_id: OrderId,
        warehouse_id: WarehouseId,
        receipt_date: &str,
        receiver: &str,
        lines: Vec<ReceiptLine>,
    ) -> Result<ReceiptId, ProcurementError> {
        {
            let order = self.order(order_id)?;
            receipt::validate_items(order.status(), &order.pending_map(), &lines)?;
        }

        let receipt = Receipt::new(receipt_id, order_id, warehouse_id, receipt_date, receiver, lines);
        match self.receipts.entry(receipt_id) {
            Entry::Occupied(_) => Err(ProcurementError::DuplicateReceipt),
            Entry::Vacant(entry) => {
                entry.insert(receipt);
                Ok(receipt_id)
            }
        }
    }

    /// Replaces a draft receipt's lines after re-validating the new set.
    pub fn update_receipt_lines(
        &self,
        receipt_id: ReceiptId,
        lines: Vec<ReceiptLine>,
    ) -> Result<(), ProcurementError> {
        let receipt = self.receipt(receipt_id)?;
        if receipt.status() == ReceiptStatus::Confirmed {
            return Err(ProcurementError::ReceiptAlreadyConfirmed(receipt_id));
        }
        {
            let order = self.order(receipt.order_id())?;
            receipt::validate_items(order.status(), &order.pending_map(), &lines)?;
        }
        receipt.replace_lines(lines)
    }

    /// Confirms a draft receipt: commits its deltas to the order's ledger,
    /// resolves the order status, and recomputes totals, as one atomic unit
    /// under the per-order lock.
    ///
    /// A commit-time consistency failure (another receipt won the race) is
    /// retried once against the fresh ledger before being escalated; either
    /// way the ledger carries all of the receipt's deltas or none.
    ///
    /// # Errors
    ///
    /// - [`ProcurementError::ReceiptNotFound`] - unknown receipt.
    /// - [`ProcurementError::ReceiptAlreadyConfirmed`] - confirmed before.
    /// - [`ProcurementError::OverReceipt`] - pending quantity exhausted since
    ///   validation.
    /// - [`ProcurementError::ConcurrencyTimeout`] - order lock not acquired
    ///   in time; retryable with backoff.
    pub fn confirm_receipt(
        &self,
        receipt_id: ReceiptId,
    ) -> Result<(OrderSnapshot, ReceiptSnapshot), ProcurementError> {
        let receipt = self.receipt(receipt_id)?;
        let order_id = receipt.order_id();
        let order = self.order(order_id)?;

        // Winning the draft→confirmed transition reserves the commit; on any
        // ledger failure the receipt is rolled back to draft untouched.
        let lines = receipt.begin_confirm()?;

        let apply = order.apply_receipt_items(&lines, self.lock_timeout);
        let result = match apply {
            Err(ProcurementError::OverReceipt { .. }) | Err(ProcurementError::InvariantViolation) => {
                // One automatic retry against the re-read ledger, then escalate.
                order.apply_receipt_items(&lines, self.lock_timeout)
            }
            other => other,
        };

        match result {
            Ok(_status) => {
                self.log.push(receipt_id, order_id)?;
                Ok((order.snapshot(), receipt.snapshot()))
            }
            Err(e) => {
                receipt.abort_confirm();
                Err(e)
            }
        }
    }

    /// Deletes a receipt.
    ///
    /// Drafts are simply dropped. A confirmed receipt has its ledger deltas
    /// reversed first (the correction path); if the reversal fails, the
    /// receipt is restored and nothing changes.
    pub fn delete_receipt(&self, receipt_id: ReceiptId) -> Result<(), ProcurementError> {
        // Removing first makes this the single owner; concurrent deletes of
        // the same receipt cannot both reverse the ledger.
        let (_, receipt) = self
            .receipts
            .remove(&receipt_id)
            .ok_or(ProcurementError::ReceiptNotFound)?;

        if receipt.status() == ReceiptStatus::Confirmed {
            let order = match self.order(receipt.order_id()) {
                Ok(order) => order,
                Err(e) => {
                    self.receipts.insert(receipt_id, receipt);
                    return Err(e);
                }
            };
            if let Err(e) = order.reverse_receipt_items(&receipt.lines(), self.lock_timeout) {
                self.receipts.insert(receipt_id, receipt);
                return Err(e);
            }
            // Free the id in the confirmation log so a later receipt can
            // reuse it; the audit trail keeps the historical entry.
            self.log.remove(receipt_id);
        }
        Ok(())
    }

    /// Lines still awaiting delivery for an order, shaped for receipt-form
    /// pre-population.
    pub fn pending_items_for_order(&self, order_id: OrderId) -> Result<Vec<PendingItem>, ProcurementError> {
        Ok(self.order(order_id)?.pending_items())
    }

    /// Point-in-time copy of an order.
    pub fn order_snapshot(&self, order_id: OrderId) -> Result<OrderSnapshot, ProcurementError> {
        Ok(self.order(order_id)?.snapshot())
    }

    /// Point-in-time copy of a receipt.
    pub fn receipt_snapshot(&self, receipt_id: ReceiptId) -> Result<ReceiptSnapshot, ProcurementError> {
        Ok(self.receipt(receipt_id)?.snapshot())
    }

    /// Returns an iterator over all orders.
    ///
    /// Useful for generating output reports of order states.
    pub fn orders(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, OrderId, Order>> {
        self.orders.iter()
    }

    /// Retrieves an order by ID.
    ///
    /// Returns `None` if no order exists for the given ID.
    pub fn get_order(&self, order_id: &OrderId) -> Option<dashmap::mapref::one::Ref<'_, OrderId, Order>> {
        self.orders.get(order_id)
    }

    /// Retrieves a receipt by ID.
    pub fn get_receipt(
        &self,
        receipt_id: &ReceiptId,
    ) -> Option<dashmap::mapref::one::Ref<'_, ReceiptId, Receipt>> {
        self.receipts.get(receipt_id)
    }

    /// Number of currently confirmed receipts (deleted ones excluded).
    pub fn confirmed_receipt_count(&self) -> usize {
        self.log.len()
    }

    /// Drains the audit trail: receipt ids in confirmation order.
    pub fn drain_confirmation_audit(&self) -> Vec<ReceiptId> {
        self.log.drain_audit()
    }

    fn order(&self, order_id: OrderId) -> Result<dashmap::mapref::one::Ref<'_, OrderId, Order>, ProcurementError> {
        self.orders.get(&order_id).ok_or(ProcurementError::OrderNotFound)
    }

    fn receipt(
        &self,
        receipt_id: ReceiptId,
    ) -> Result<dashmap::mapref::one::Ref<'_, ReceiptId, Receipt>, ProcurementError> {
        self.receipts.get(&receipt_id).ok_or(ProcurementError::ReceiptNotFound)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
