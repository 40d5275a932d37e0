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

//! Purchase order aggregate.
//!
//! The order owns its line items and is the only code that mutates
//! `received_quantity` (the line-item ledger). Receipts call into the
//! aggregate instead of touching ledger rows directly, so partial updates
//! cannot diverge.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use procure_recon_rs::{Order, OrderId, OrderItemId, OrderItemSpec, ProductId, SupplierId};
//!
//! let order = Order::new(OrderId(1), SupplierId(1), "2025-06-01", "2025-06-15");
//! order
//!     .add_item(
//!         OrderItemId(1),
//!         OrderItemSpec {
//!             product_id: ProductId(9),
//!             ordered_quantity: dec!(100),
//!             unit_price: dec!(10),
//!             discount_rate: dec!(0),
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(order.subtotal(), dec!(1000.00));
//! ```

use crate::amount::{self, CURRENCY_PRECISION};
use crate::base::{OrderId, OrderItemId, ProductId, SupplierId};
use crate::error::ProcurementError;
use crate::receipt::ReceiptLine;
use crate::status::{self, OrderStatus};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Caller-supplied fields of one order line.
#[derive(Debug, Clone, Copy)]
pub struct OrderItemSpec {
    pub product_id: ProductId,
    pub ordered_quantity: Decimal,
    pub unit_price: Decimal,
    /// Fraction in `[0, 1]`, not a percentage.
    pub discount_rate: Decimal,
}

/// One ledger line: ordered vs. received for a single product.
#[derive(Debug, Clone)]
struct OrderItem {
    product_id: ProductId,
    ordered_quantity: Decimal,
    unit_price: Decimal,
    discount_rate: Decimal,
    received_quantity: Decimal,
}

impl OrderItem {
    fn pending(&self) -> Decimal {
        self.ordered_quantity - self.received_quantity
    }

    fn line_amount(&self) -> Decimal {
        // Rates and quantities are range-checked on insert, so the raw
        // formula cannot produce an invalid amount for stored items.
        self.ordered_quantity * self.unit_price * (Decimal::ONE - self.discount_rate)
    }
}

#[derive(Debug)]
struct OrderData {
    order_id: OrderId,
    supplier_id: SupplierId,
    order_date: String,
    expected_date: String,
    /// Explicit user-action flags. Status is derived from these plus the
    /// ledger, never stored.
    confirmed: bool,
    cancelled: bool,
    discount_amount: Decimal,
    tax_amount: Decimal,
    /// Line items in insertion order. Orders carry few lines, so linear
    /// lookup beats a map and keeps export order stable.
    items: Vec<(OrderItemId, OrderItem)>,
}

impl OrderData {
    fn new(order_id: OrderId, supplier_id: SupplierId, order_date: &str, expected_date: &str) -> Self {
        Self {
            order_id,
            supplier_id,
            order_date: order_date.to_string(),
            expected_date: expected_date.to_string(),
            confirmed: false,
            cancelled: false,
            discount_amount: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            items: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        for (item_id, item) in &self.items {
            debug_assert!(
                item.received_quantity >= Decimal::ZERO,
                "Invariant violated: received quantity of item {} went negative: {}",
                item_id,
                item.received_quantity
            );
            debug_assert!(
                item.received_quantity <= item.ordered_quantity,
                "Invariant violated: item {} received {} of {} ordered",
                item_id,
                item.received_quantity,
                item.ordered_quantity
            );
        }
    }

    fn item(&self, item_id: OrderItemId) -> Option<&OrderItem> {
        self.items.iter().find(|(id, _)| *id == item_id).map(|(_, item)| item)
    }

    fn status(&self) -> OrderStatus {
        status::resolve(
            self.confirmed,
            self.cancelled,
            self.items
                .iter()
                .map(|(_, item)| (item.ordered_quantity, item.received_quantity)),
        )
    }

    fn subtotal(&self) -> Decimal {
        self.items
            .iter()
            .map(|(_, item)| item.line_amount())
            .sum::<Decimal>()
            .round_dp(CURRENCY_PRECISION)
    }

    fn final_amount(&self) -> Decimal {
        // Adjustments are validated against the subtotal on every edit, so
        // this never goes negative for stored state.
        (self.subtotal() - self.discount_amount + self.tax_amount).round_dp(CURRENCY_PRECISION)
    }

    fn check_spec(spec: &OrderItemSpec) -> Result<(), ProcurementError> {
        if spec.ordered_quantity <= Decimal::ZERO {
            return Err(ProcurementError::InvalidQuantity);
        }
        if spec.unit_price <= Decimal::ZERO {
            return Err(ProcurementError::InvalidUnitPrice);
        }
        // Range-checks the discount rate as a side effect.
        amount::line_amount(spec.ordered_quantity, spec.unit_price, spec.discount_rate)?;
        Ok(())
    }

    /// Rejects any edit that would drive the final amount negative.
    fn check_totals(&self, candidate_subtotal: Decimal) -> Result<(), ProcurementError> {
        amount::final_amount(candidate_subtotal, self.discount_amount, self.tax_amount)?;
        Ok(())
    }

    fn check_editable(&self) -> Result<(), ProcurementError> {
        let status = self.status();
        if status != OrderStatus::Draft {
            return Err(ProcurementError::OrderNotEditable { status });
        }
        Ok(())
    }

    fn add_item(&mut self, item_id: OrderItemId, spec: OrderItemSpec) -> Result<(), ProcurementError> {
        self.check_editable()?;
        Self::check_spec(&spec)?;
        if self.item(item_id).is_some() {
            return Err(ProcurementError::DuplicateItem);
        }
        let line = amount::line_amount(spec.ordered_quantity, spec.unit_price, spec.discount_rate)?;
        self.check_totals(self.subtotal() + line)?;

        self.items.push((
            item_id,
            OrderItem {
                product_id: spec.product_id,
                ordered_quantity: spec.ordered_quantity,
                unit_price: spec.unit_price,
                discount_rate: spec.discount_rate,
                received_quantity: Decimal::ZERO,
            },
        ));
        self.assert_invariants();
        Ok(())
    }

    fn update_item(&mut self, item_id: OrderItemId, spec: OrderItemSpec) -> Result<(), ProcurementError> {
        self.check_editable()?;
        Self::check_spec(&spec)?;
        let old = self.item(item_id).ok_or(ProcurementError::ItemNotFound)?;
        let new_line = amount::line_amount(spec.ordered_quantity, spec.unit_price, spec.discount_rate)?;
        self.check_totals(self.subtotal() - old.line_amount() + new_line)?;

        for (id, item) in &mut self.items {
            if *id == item_id {
                item.product_id = spec.product_id;
                item.ordered_quantity = spec.ordered_quantity;
                item.unit_price = spec.unit_price;
                item.discount_rate = spec.discount_rate;
                break;
            }
        }
        self.assert_invariants();
        Ok(())
    }

    fn remove_item(&mut self, item_id: OrderItemId) -> Result<(), ProcurementError> {
        self.check_editable()?;
        let old = self.item(item_id).ok_or(ProcurementError::ItemNotFound)?;
        self.check_totals(self.subtotal() - old.line_amount())?;
        self.items.retain(|(id, _)| *id != item_id);
        Ok(())
    }

    fn set_adjustments(&mut self, discount_amount: Decimal, tax_amount: Decimal) -> Result<(), ProcurementError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(ProcurementError::OrderNotEditable { status });
        }
        // Validates sign and the resulting final amount in one step.
        amount::final_amount(self.subtotal(), discount_amount, tax_amount)?;
        self.discount_amount = discount_amount;
        self.tax_amount = tax_amount;
        Ok(())
    }

    fn set_expected_date(&mut self, expected_date: &str) -> Result<(), ProcurementError> {
        let status = self.status();
        if status.is_terminal() {
            return Err(ProcurementError::OrderNotEditable { status });
        }
        self.expected_date = expected_date.to_string();
        Ok(())
    }

    fn confirm(&mut self) -> Result<OrderStatus, ProcurementError> {
        let from = self.status();
        if from != OrderStatus::Draft {
            return Err(ProcurementError::InvalidTransition {
                from,
                requested: OrderStatus::Confirmed,
            });
        }
        if self.items.is_empty() {
            return Err(ProcurementError::EmptyOrder);
        }
        self.confirmed = true;
        Ok(self.status())
    }

    fn cancel(&mut self) -> Result<OrderStatus, ProcurementError> {
        let from = self.status();
        if from == OrderStatus::Cancelled {
            return Err(ProcurementError::InvalidTransition {
                from,
                requested: OrderStatus::Cancelled,
            });
        }
        // Once stock came in, cancellation becomes a manual correction
        // outside this engine.
        if self
            .items
            .iter()
            .any(|(_, item)| item.received_quantity > Decimal::ZERO)
        {
            return Err(ProcurementError::ReceivedOrderCannotCancel);
        }
        self.cancelled = true;
        Ok(self.status())
    }

    /// Sums requested quantities per item so that two lines addressing the
    /// same ledger row cannot slip past the pending check individually.
    fn requested_per_item(
        lines: &[ReceiptLine],
    ) -> Result<Vec<(OrderItemId, Decimal)>, ProcurementError> {
        let mut totals: Vec<(OrderItemId, Decimal)> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.quantity <= Decimal::ZERO {
                return Err(ProcurementError::InvalidQuantity);
            }
            match totals.iter_mut().find(|(id, _)| *id == line.order_item_id) {
                Some((_, total)) => *total += line.quantity,
                None => totals.push((line.order_item_id, line.quantity)),
            }
        }
        Ok(totals)
    }

    /// Ledger commit: check everything, then mutate everything.
    ///
    /// The check pass runs again here even though the receipt already passed
    /// builder validation, because another receipt may have been confirmed
    /// against this order in between.
    fn apply_receipt_items(&mut self, lines: &[ReceiptLine]) -> Result<OrderStatus, ProcurementError> {
        if lines.is_empty() {
            return Err(ProcurementError::EmptyReceipt);
        }
        let totals = Self::requested_per_item(lines)?;
        for (item_id, requested) in &totals {
            let item = self.item(*item_id).ok_or(ProcurementError::ItemNotFound)?;
            if *requested > item.pending() {
                return Err(ProcurementError::OverReceipt {
                    order_item_id: *item_id,
                    requested: *requested,
                    pending: item.pending(),
                });
            }
        }
        let status = self.status();
        if !status.is_receivable() {
            return Err(ProcurementError::OrderNotReceivable { status });
        }

        // All checks passed; no error path below this point.
        for (item_id, requested) in &totals {
            for (id, item) in &mut self.items {
                if id == item_id {
                    item.received_quantity += *requested;
                }
            }
        }
        self.assert_invariants();
        Ok(self.status())
    }

    /// Ledger reversal for a corrected or deleted confirmed receipt.
    ///
    /// Going negative here means the ledger and the receipt history no
    /// longer agree; nothing is mutated in that case.
    fn reverse_receipt_items(&mut self, lines: &[ReceiptLine]) -> Result<OrderStatus, ProcurementError> {
        let totals = Self::requested_per_item(lines)?;
        for (item_id, quantity) in &totals {
            let item = self.item(*item_id).ok_or(ProcurementError::ItemNotFound)?;
            if *quantity > item.received_quantity {
                return Err(ProcurementError::InvariantViolation);
            }
        }

        for (item_id, quantity) in &totals {
            for (id, item) in &mut self.items {
                if id == item_id {
                    item.received_quantity -= *quantity;
                }
            }
        }
        self.assert_invariants();
        Ok(self.status())
    }
}

/// Purchase order aggregate with interior locking.
///
/// All mutating operations serialize on the inner mutex; the engine wraps
/// receipt confirmation in a timed acquisition so contention surfaces as
/// [`ProcurementError::ConcurrencyTimeout`] instead of blocking forever.
#[derive(Debug)]
pub struct Order {
    inner: Mutex<OrderData>,
}

impl Order {
    pub fn new(order_id: OrderId, supplier_id: SupplierId, order_date: &str, expected_date: &str) -> Self {
        Self {
            inner: Mutex::new(OrderData::new(order_id, supplier_id, order_date, expected_date)),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.inner.lock().order_id
    }

    pub fn status(&self) -> OrderStatus {
        self.inner.lock().status()
    }

    pub fn subtotal(&self) -> Decimal {
        self.inner.lock().subtotal()
    }

    /// Returns `subtotal − discount + tax`.
    pub fn final_amount(&self) -> Decimal {
        self.inner.lock().final_amount()
    }

    pub fn pending_quantity(&self, item_id: OrderItemId) -> Result<Decimal, ProcurementError> {
        let data = self.inner.lock();
        data.item(item_id)
            .map(|item| item.pending())
            .ok_or(ProcurementError::ItemNotFound)
    }

    pub fn received_quantity(&self, item_id: OrderItemId) -> Result<Decimal, ProcurementError> {
        let data = self.inner.lock();
        data.item(item_id)
            .map(|item| item.received_quantity)
            .ok_or(ProcurementError::ItemNotFound)
    }

    pub fn add_item(&self, item_id: OrderItemId, spec: OrderItemSpec) -> Result<(), ProcurementError> {
        self.inner.lock().add_item(item_id, spec)
    }

    pub fn update_item(&self, item_id: OrderItemId, spec: OrderItemSpec) -> Result<(), ProcurementError> {
        self.inner.lock().update_item(item_id, spec)
    }

    pub fn remove_item(&self, item_id: OrderItemId) -> Result<(), ProcurementError> {
        self.inner.lock().remove_item(item_id)
    }

    pub fn set_adjustments(&self, discount_amount: Decimal, tax_amount: Decimal) -> Result<(), ProcurementError> {
        self.inner.lock().set_adjustments(discount_amount, tax_amount)
    }

    /// Reschedules the expected delivery date. Allowed until the order
    /// reaches a terminal state.
    pub fn set_expected_date(&self, expected_date: &str) -> Result<(), ProcurementError> {
        self.inner.lock().set_expected_date(expected_date)
    }

    pub fn confirm(&self) -> Result<OrderStatus, ProcurementError> {
        self.inner.lock().confirm()
    }

    pub fn cancel(&self) -> Result<OrderStatus, ProcurementError> {
        self.inner.lock().cancel()
    }

    /// Pending quantity per item, for receipt validation.
    pub fn pending_map(&self) -> HashMap<OrderItemId, Decimal> {
        let data = self.inner.lock();
        data.items
            .iter()
            .map(|(id, item)| (*id, item.pending()))
            .collect()
    }

    /// Lines still awaiting delivery, for receipt-form pre-population.
    pub fn pending_items(&self) -> Vec<PendingItem> {
        let data = self.inner.lock();
        data.items
            .iter()
            .filter(|(_, item)| item.pending() > Decimal::ZERO)
            .map(|(id, item)| PendingItem {
                order_item_id: *id,
                product_id: item.product_id,
                pending_quantity: item.pending(),
                unit_price: item.unit_price,
            })
            .collect()
    }

    /// Commits receipt deltas to the ledger, all-or-nothing, and resolves
    /// the new status before returning.
    ///
    /// # Errors
    ///
    /// - [`ProcurementError::ConcurrencyTimeout`] - lock not acquired in time.
    /// - [`ProcurementError::OverReceipt`] - a quantity exceeds what is
    ///   pending at commit time.
    /// - [`ProcurementError::OrderNotReceivable`] - order left the receivable
    ///   states since validation.
    pub fn apply_receipt_items(
        &self,
        lines: &[ReceiptLine],
        timeout: Duration,
    ) -> Result<OrderStatus, ProcurementError> {
        let mut data = self
            .inner
            .try_lock_for(timeout)
            .ok_or(ProcurementError::ConcurrencyTimeout)?;
        data.apply_receipt_items(lines)
    }

    /// Reverses previously committed receipt deltas (confirmed receipt
    /// correction/deletion).
    pub fn reverse_receipt_items(
        &self,
        lines: &[ReceiptLine],
        timeout: Duration,
    ) -> Result<OrderStatus, ProcurementError> {
        let mut data = self
            .inner
            .try_lock_for(timeout)
            .ok_or(ProcurementError::ConcurrencyTimeout)?;
        data.reverse_receipt_items(lines)
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        let data = self.inner.lock();
        OrderSnapshot {
            order_id: data.order_id,
            supplier_id: data.supplier_id,
            order_date: data.order_date.clone(),
            expected_date: data.expected_date.clone(),
            status: data.status(),
            subtotal: data.subtotal(),
            discount_amount: data.discount_amount,
            tax_amount: data.tax_amount,
            final_amount: data.final_amount(),
            items: data
                .items
                .iter()
                .map(|(id, item)| OrderItemSnapshot {
                    order_item_id: *id,
                    product_id: item.product_id,
                    ordered_quantity: item.ordered_quantity,
                    received_quantity: item.received_quantity,
                    pending_quantity: item.pending(),
                    unit_price: item.unit_price,
                    discount_rate: item.discount_rate,
                })
                .collect(),
        }
    }
}

/// One not-yet-fulfilled line, shaped for receipt-form pre-population.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingItem {
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    pub pending_quantity: Decimal,
    pub unit_price: Decimal,
}

/// Point-in-time copy of an order, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSnapshot {
    pub order_id: OrderId,
    pub supplier_id: SupplierId,
    pub order_date: String,
    pub expected_date: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub final_amount: Decimal,
    pub items: Vec<OrderItemSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemSnapshot {
    pub order_item_id: OrderItemId,
    pub product_id: ProductId,
    pub ordered_quantity: Decimal,
    pub received_quantity: Decimal,
    pub pending_quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_rate: Decimal,
}

impl Serialize for Order {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Order", 7)?;
        state.serialize_field("order", &data.order_id)?;
        state.serialize_field("supplier", &data.supplier_id)?;
        state.serialize_field("status", &data.status())?;
        state.serialize_field("subtotal", &data.subtotal().round_dp(CURRENCY_PRECISION))?;
        state.serialize_field("discount", &data.discount_amount.round_dp(CURRENCY_PRECISION))?;
        state.serialize_field("tax", &data.tax_amount.round_dp(CURRENCY_PRECISION))?;
        state.serialize_field("total", &data.final_amount().round_dp(CURRENCY_PRECISION))?;
        state.end()
    }
}
