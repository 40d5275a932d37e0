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

//! Amount calculation.
//!
//! Pure functions, no side effects; re-run whenever an order or receipt's
//! items change. All values are fixed-point [`Decimal`]: intermediates keep
//! full precision, currency totals round to [`CURRENCY_PRECISION`] decimal
//! places at the end (banker's rounding, the `round_dp` default).

use crate::error::ProcurementError;
use rust_decimal::Decimal;

/// Decimal places for currency totals.
pub const CURRENCY_PRECISION: u32 = 2;

/// Computes one line amount: `quantity × unit_price × (1 − discount_rate)`.
///
/// Returned at full precision; rounding happens once at the total.
///
/// # Errors
///
/// - [`ProcurementError::InvalidDiscountRate`] - rate outside `[0, 1]`.
pub fn line_amount(
    quantity: Decimal,
    unit_price: Decimal,
    discount_rate: Decimal,
) -> Result<Decimal, ProcurementError> {
    if discount_rate < Decimal::ZERO || discount_rate > Decimal::ONE {
        return Err(ProcurementError::InvalidDiscountRate);
    }
    Ok(quantity * unit_price * (Decimal::ONE - discount_rate))
}

/// Sums line amounts over `(quantity, unit_price, discount_rate)` triples
/// and rounds to currency precision.
///
/// # Errors
///
/// - [`ProcurementError::InvalidDiscountRate`] - any line's rate is outside
///   `[0, 1]`.
pub fn order_subtotal<I>(items: I) -> Result<Decimal, ProcurementError>
where
    I: IntoIterator<Item = (Decimal, Decimal, Decimal)>,
{
    let mut subtotal = Decimal::ZERO;
    for (quantity, unit_price, discount_rate) in items {
        subtotal += line_amount(quantity, unit_price, discount_rate)?;
    }
    Ok(subtotal.round_dp(CURRENCY_PRECISION))
}

/// Computes the order's final amount: `subtotal − discount + tax`.
///
/// # Errors
///
/// - [`ProcurementError::NegativeAdjustment`] - discount or tax is negative,
///   or the discount drives the final amount below zero.
pub fn final_amount(
    subtotal: Decimal,
    discount_amount: Decimal,
    tax_amount: Decimal,
) -> Result<Decimal, ProcurementError> {
    if discount_amount < Decimal::ZERO || tax_amount < Decimal::ZERO {
        return Err(ProcurementError::NegativeAdjustment);
    }
    let total = subtotal - discount_amount + tax_amount;
    if total < Decimal::ZERO {
        return Err(ProcurementError::NegativeAdjustment);
    }
    Ok(total.round_dp(CURRENCY_PRECISION))
}

/// Sums receipt items into `(total_quantity, total_amount)`.
///
/// Receipt lines carry the price captured at receipt time, so no discount
/// applies here. The amount rounds to currency precision.
pub fn receipt_totals<I>(items: I) -> (Decimal, Decimal)
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    let mut total_quantity = Decimal::ZERO;
    let mut total_amount = Decimal::ZERO;
    for (quantity, unit_price) in items {
        total_quantity += quantity;
        total_amount += quantity * unit_price;
    }
    (total_quantity, total_amount.round_dp(CURRENCY_PRECISION))
}
