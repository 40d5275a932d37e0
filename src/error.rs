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

//! Error types for order and receipt processing.
//!
//! Four families share one enum:
//! - validation errors: recoverable locally, no partial effect occurred
//! - state errors: the client acted on a stale view, surfaced as rejections
//! - consistency errors: a race or corrupt ledger, never silently swallowed
//! - concurrency errors: retryable by the caller with backoff

use crate::base::{OrderItemId, ReceiptId};
use crate::status::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Order and receipt processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcurementError {
    /// Quantity is zero or negative
    #[error("invalid quantity (must be positive)")]
    InvalidQuantity,

    /// Unit price is zero or negative
    #[error("invalid unit price (must be positive)")]
    InvalidUnitPrice,

    /// Discount rate is outside [0, 1]
    #[error("invalid discount rate (must be between 0 and 1)")]
    InvalidDiscountRate,

    /// Receipt proposal contains no items
    #[error("receipt must contain at least one item")]
    EmptyReceipt,

    /// Receipt item references an order item from a different order
    #[error("order item {order_item_id} does not belong to the addressed order")]
    CrossOrderReference { order_item_id: OrderItemId },

    /// Requested quantity exceeds the pending quantity of the order item.
    ///
    /// The display text is surfaced verbatim by the receipt form.
    #[error("cannot receive {requested} of item {order_item_id}: only {pending} pending")]
    OverReceipt {
        order_item_id: OrderItemId,
        requested: Decimal,
        pending: Decimal,
    },

    /// Order is cancelled or already fully received
    #[error("order is not receivable (status: {status})")]
    OrderNotReceivable { status: OrderStatus },

    /// Explicit status transition not allowed by the lifecycle table
    #[error("invalid order transition from {from} to {requested}")]
    InvalidTransition {
        from: OrderStatus,
        requested: OrderStatus,
    },

    /// Cancellation requested after stock was received against the order
    #[error("order with confirmed receipts cannot be cancelled")]
    ReceivedOrderCannotCancel,

    /// Structural edit attempted outside the DRAFT state
    #[error("order is not editable (status: {status})")]
    OrderNotEditable { status: OrderStatus },

    /// Discount or tax adjustment is negative, or drives the total negative
    #[error("discount/tax adjustment would make the amount negative")]
    NegativeAdjustment,

    /// Referenced order ID does not exist
    #[error("order not found")]
    OrderNotFound,

    /// Referenced order item ID does not exist under the order
    #[error("order item not found")]
    ItemNotFound,

    /// Duplicate order item ID within one order
    #[error("duplicate order item ID")]
    DuplicateItem,

    /// Confirm requested for an order without any line items
    #[error("order must contain at least one item to be confirmed")]
    EmptyOrder,

    /// Referenced receipt ID does not exist
    #[error("receipt not found")]
    ReceiptNotFound,

    /// Receipt was already confirmed and is immutable
    #[error("receipt {0} is already confirmed")]
    ReceiptAlreadyConfirmed(ReceiptId),

    /// Duplicate order ID
    #[error("duplicate order ID")]
    DuplicateOrder,

    /// Duplicate receipt ID
    #[error("duplicate receipt ID")]
    DuplicateReceipt,

    /// Ledger reversal would drive a received quantity negative.
    /// Data corruption signal, never a user-triggered path.
    #[error("ledger invariant violated: received quantity would go negative")]
    InvariantViolation,

    /// Timed out waiting for the per-order lock
    #[error("timed out acquiring the order lock")]
    ConcurrencyTimeout,
}

impl ProcurementError {
    /// Whether the caller may retry the operation unchanged (with backoff).
    ///
    /// Only lock-acquisition timeouts qualify; everything else either needs
    /// corrected input or a fresh read of the order.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcurementError::ConcurrencyTimeout)
    }
}
