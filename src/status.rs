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

//! Order status resolution.
//!
//! Status is derived state: a pure function over two explicit user-action
//! flags (confirmed, cancelled) and the ledger snapshot. It is never stored
//! as a mutable field, so the ledger and the status cannot be observed out
//! of sync.
//!
//! Lifecycle:
//! - [`Draft`] → [`Confirmed`] (explicit confirm)
//! - [`Confirmed`] → [`Partial`] (first received quantity) → [`Completed`]
//!   (every pending quantity reaches zero)
//! - [`Draft`] / [`Confirmed`] → [`Cancelled`] (explicit cancel, only while
//!   nothing has been received)
//!
//! [`Draft`]: OrderStatus::Draft
//! [`Confirmed`]: OrderStatus::Confirmed
//! [`Partial`]: OrderStatus::Partial
//! [`Completed`]: OrderStatus::Completed
//! [`Cancelled`]: OrderStatus::Cancelled

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate status of a purchase order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Freely editable, no receipts possible yet.
    Draft,
    /// Item list structurally locked, ready to receive.
    Confirmed,
    /// Some stock received, some still pending.
    Partial,
    /// Every item fully received. Terminal.
    Completed,
    /// Explicitly cancelled before any receipt. Terminal.
    Cancelled,
}

impl OrderStatus {
    /// Whether receipts may still be confirmed against an order in this
    /// status.
    pub fn is_receivable(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Partial)
    }

    /// Whether the order reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Partial => "partial",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Resolves the status from the explicit flags and the ledger snapshot.
///
/// `items` yields `(ordered_quantity, received_quantity)` per order line.
/// The resolution is idempotent: unchanged inputs always yield the same
/// status.
///
/// An order with no items never leaves `Draft` through this function; the
/// confirm action itself rejects empty orders.
pub fn resolve<I>(confirmed: bool, cancelled: bool, items: I) -> OrderStatus
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    if cancelled {
        return OrderStatus::Cancelled;
    }
    if !confirmed {
        return OrderStatus::Draft;
    }

    let mut any_item = false;
    let mut any_received = false;
    let mut all_complete = true;

    for (ordered, received) in items {
        any_item = true;
        if received > Decimal::ZERO {
            any_received = true;
        }
        if received < ordered {
            all_complete = false;
        }
    }

    if any_item && all_complete {
        OrderStatus::Completed
    } else if any_received {
        OrderStatus::Partial
    } else {
        OrderStatus::Confirmed
    }
}
