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

//! # Procurement Reconciliation
//!
//! This library provides an order-to-receipt reconciliation engine for
//! procurement back-offices: suppliers place goods against purchase orders,
//! warehouses record partial or full receipts, and the engine keeps the
//! per-line ledger, the derived order status, and the monetary totals
//! consistent.
//!
//! ## Core Components
//!
//! - [`Engine`]: Central facade managing orders and receipts
//! - [`Order`]: Purchase order aggregate owning the line-item ledger
//! - [`Receipt`]: Purchase receipt with a draft/confirmed lifecycle
//! - [`OrderStatus`]: Derived order status (draft → confirmed → partial →
//!   completed / cancelled)
//! - [`ProcurementError`]: Error types for validation, state, consistency,
//!   and concurrency failures
//!
//! ## Example
//!
//! ```
//! use procure_recon_rs::{
//!     Engine, OrderId, OrderItemId, OrderItemSpec, OrderStatus, ProductId, ReceiptId,
//!     ReceiptLine, SupplierId, WarehouseId,
//! };
//! use rust_decimal_macros::dec;
//!
//! let engine = Engine::new();
//!
//! // An order for 100 units at 10 each.
//! let item = OrderItemSpec {
//!     product_id: ProductId(1),
//!     ordered_quantity: dec!(100),
//!     unit_price: dec!(10),
//!     discount_rate: dec!(0),
//! };
//! engine
//!     .create_order(OrderId(1), SupplierId(1), "2025-06-01", "2025-06-15", vec![(OrderItemId(1), item)])
//!     .unwrap();
//! engine.confirm_order(OrderId(1)).unwrap();
//!
//! // Receive 40 of them.
//! let line = ReceiptLine {
//!     order_item_id: OrderItemId(1),
//!     product_id: ProductId(1),
//!     quantity: dec!(40),
//!     unit_price: dec!(10),
//! };
//! engine
//!     .create_receipt(ReceiptId(1), OrderId(1), WarehouseId(1), "2025-06-10", "dock a", vec![line])
//!     .unwrap();
//! let (order, receipt) = engine.confirm_receipt(ReceiptId(1)).unwrap();
//!
//! assert_eq!(order.status, OrderStatus::Partial);
//! assert_eq!(receipt.total_amount, dec!(400));
//! ```
//!
//! ## Thread Safety
//!
//! Mutations against one order serialize on that order's lock; operations
//! against different orders run in parallel. Lock waits are bounded, so
//! contention surfaces as a retryable error instead of blocking forever.

pub mod amount;
mod base;
mod engine;
pub mod error;
pub mod order;
pub mod receipt;
mod receipt_log;
pub mod status;

pub use base::{OrderId, OrderItemId, ProductId, ReceiptId, SupplierId, WarehouseId};
pub use engine::Engine;
pub use error::ProcurementError;
pub use order::{Order, OrderItemSpec, OrderSnapshot, PendingItem};
pub use receipt::{Receipt, ReceiptLine, ReceiptSnapshot, ReceiptStatus};
pub use receipt_log::ReceiptLog;
pub use status::OrderStatus;
