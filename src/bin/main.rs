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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use procure_recon_rs::{
    Engine, OrderId, OrderItemId, OrderItemSpec, ProductId, ReceiptId, ReceiptLine, SupplierId,
    WarehouseId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;

/// Procurement Engine - Process procurement event CSV files
///
/// Reads order and receipt events from a CSV file and outputs order states
/// to stdout. Supports order creation, item edits, confirmation,
/// cancellation, and partial receipts.
#[derive(Parser, Debug)]
#[command(name = "procure-recon-rs")]
#[command(about = "A reconciliation engine that processes procurement event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with procurement events
    ///
    /// Expected format: type,order,id,ref,qty,price,discount,tax
    /// Example: cargo run -- events.csv > orders.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Process events from CSV
    let engine = match process_events(BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    // Write results to stdout
    if let Err(e) = write_orders(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, order, id, ref, qty, price, discount, tax`
///
/// The `ref` column is overloaded by row type: supplier for `order` rows,
/// product for `item` rows, order item for `receive` rows.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    ev_type: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    order: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    id: Option<u32>,
    #[serde(rename = "ref", deserialize_with = "csv::invalid_option")]
    reference: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    qty: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    price: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    discount: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    tax: Option<Decimal>,
}

/// One parsed procurement event.
#[derive(Debug)]
enum Event {
    CreateOrder {
        order_id: OrderId,
        supplier_id: SupplierId,
    },
    AddItem {
        order_id: OrderId,
        item_id: OrderItemId,
        spec: OrderItemSpec,
    },
    Adjust {
        order_id: OrderId,
        discount_amount: Decimal,
        tax_amount: Decimal,
    },
    ConfirmOrder {
        order_id: OrderId,
    },
    CancelOrder {
        order_id: OrderId,
    },
    /// One line of a receipt in the making; lines buffer until the matching
    /// `confirm_receipt` row.
    ReceiveLine {
        order_id: OrderId,
        receipt_id: ReceiptId,
        item_id: OrderItemId,
        quantity: Decimal,
        unit_price: Option<Decimal>,
    },
    ConfirmReceipt {
        order_id: OrderId,
        receipt_id: ReceiptId,
    },
}

impl CsvRecord {
    /// Converts a CSV record to an event.
    ///
    /// Returns `None` for unknown row types or missing required fields.
    fn into_event(self) -> Option<Event> {
        let order_id = OrderId(self.order?);

        match self.ev_type.to_lowercase().as_str() {
            "order" => Some(Event::CreateOrder {
                order_id,
                supplier_id: SupplierId(self.reference?),
            }),
            "item" => Some(Event::AddItem {
                order_id,
                item_id: OrderItemId(self.id?),
                spec: OrderItemSpec {
                    product_id: ProductId(self.reference?),
                    ordered_quantity: self.qty?,
                    unit_price: self.price?,
                    discount_rate: self.discount.unwrap_or(Decimal::ZERO),
                },
            }),
            "adjust" => Some(Event::Adjust {
                order_id,
                discount_amount: self.discount.unwrap_or(Decimal::ZERO),
                tax_amount: self.tax.unwrap_or(Decimal::ZERO),
            }),
            "confirm" => Some(Event::ConfirmOrder { order_id }),
            "cancel" => Some(Event::CancelOrder { order_id }),
            "receive" => Some(Event::ReceiveLine {
                order_id,
                receipt_id: ReceiptId(self.id?),
                item_id: OrderItemId(self.reference?),
                quantity: self.qty?,
                unit_price: self.price,
            }),
            "confirm_receipt" => Some(Event::ConfirmReceipt {
                order_id,
                receipt_id: ReceiptId(self.id?),
            }),
            _ => None,
        }
    }
}

/// Process procurement events from a CSV reader.
///
/// This function uses streaming parsing to handle arbitrarily large CSV
/// files without loading the entire file into memory. Malformed rows and
/// invalid events are silently skipped.
///
/// # CSV Format
///
/// Expected columns: `type, order, id, ref, qty, price, discount, tax`
/// - `type`: Event type (order, item, adjust, confirm, cancel, receive,
///   confirm_receipt)
/// - `order`: Order ID (u32), present on every row
/// - `id`: Item ID for `item` rows, receipt ID for receipt rows
/// - `ref`: Supplier / product / order item ID depending on row type
/// - `qty`, `price`, `discount`, `tax`: Decimal fields, optional per type
///
/// # Example
///
/// ```csv
/// type,order,id,ref,qty,price,discount,tax
/// order,1,,5,,,,
/// item,1,1,9,100,10,0,
/// confirm,1,,,,,,
/// receive,1,1,1,40,,,
/// confirm_receipt,1,1,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
/// Individual event errors are logged in debug mode but don't stop
/// processing.
pub fn process_events<R: Read>(reader: R) -> Result<Engine, csv::Error> {
    let engine = Engine::new();

    // Receipt lines buffer per receipt id until the confirm row arrives.
    let mut pending_receipts: HashMap<ReceiptId, (OrderId, Vec<ReceiptLine>)> = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All) // Handle whitespace in fields like " order "
        .flexible(true) // Allow missing trailing fields
        .has_headers(true) // Skip first row as header
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(event) = record.into_event() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid event record");
                    continue;
                };

                if let Err(e) = apply_event(&engine, &mut pending_receipts, event) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping event: {}", e);
                    #[cfg(not(debug_assertions))]
                    let _ = e;
                }
            }
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(engine)
}

/// Applies one event to the engine, resolving receipt-line lookups.
fn apply_event(
    engine: &Engine,
    pending_receipts: &mut HashMap<ReceiptId, (OrderId, Vec<ReceiptLine>)>,
    event: Event,
) -> Result<(), procure_recon_rs::ProcurementError> {
    match event {
        Event::CreateOrder {
            order_id,
            supplier_id,
        } => engine.create_order(order_id, supplier_id, "", "", Vec::new()),
        Event::AddItem {
            order_id,
            item_id,
            spec,
        } => engine.add_item(order_id, item_id, spec),
        Event::Adjust {
            order_id,
            discount_amount,
            tax_amount,
        } => engine.set_adjustments(order_id, discount_amount, tax_amount),
        Event::ConfirmOrder { order_id } => engine.confirm_order(order_id).map(|_| ()),
        Event::CancelOrder { order_id } => engine.cancel_order(order_id).map(|_| ()),
        Event::ReceiveLine {
            order_id,
            receipt_id,
            item_id,
            quantity,
            unit_price,
        } => {
            // Product and default price come from the order's pending lines.
            let pending = engine.pending_items_for_order(order_id)?;
            let source = pending
                .iter()
                .find(|p| p.order_item_id == item_id)
                .ok_or(procure_recon_rs::ProcurementError::ItemNotFound)?;
            let line = ReceiptLine {
                order_item_id: item_id,
                product_id: source.product_id,
                quantity,
                unit_price: unit_price.unwrap_or(source.unit_price),
            };
            pending_receipts
                .entry(receipt_id)
                .or_insert_with(|| (order_id, Vec::new()))
                .1
                .push(line);
            Ok(())
        }
        Event::ConfirmReceipt {
            order_id,
            receipt_id,
        } => {
            let (buffered_order, lines) = pending_receipts
                .remove(&receipt_id)
                .unwrap_or((order_id, Vec::new()));
            engine.create_receipt(receipt_id, buffered_order, WarehouseId(0), "", "", lines)?;
            engine.confirm_receipt(receipt_id).map(|_| ())
        }
    }
}

/// Write order states to a CSV writer
///
/// Outputs all orders in CSV format with money rounded to 2 decimal places.
///
/// # CSV Format
///
/// Columns: `order, supplier, status, subtotal, discount, tax, total`
///
/// # Example
///
/// ```csv
/// order,supplier,status,subtotal,discount,tax,total
/// 1,5,partial,1000.00,0,0,1000.00
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_orders<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    // Get all order snapshots and serialize each one
    for order in engine.orders() {
        wtr.serialize(&*order)?;
    }

    // Flush to ensure all data is written
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use procure_recon_rs::OrderStatus;
    use rust_decimal_macros::dec;
    use std::io::Cursor;

    #[test]
    fn parse_order_with_item() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   item,1,1,9,100,10,0,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        let order = engine.get_order(&OrderId(1)).unwrap();
        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.subtotal(), dec!(1000));
    }

    #[test]
    fn parse_confirm_and_receive_flow() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   item,1,1,9,100,10,0,\n\
                   confirm,1,,,,,,\n\
                   receive,1,1,1,40,,,\n\
                   confirm_receipt,1,1,,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        let order = engine.get_order(&OrderId(1)).unwrap();
        assert_eq!(order.status(), OrderStatus::Partial);
        assert_eq!(order.pending_quantity(OrderItemId(1)).unwrap(), dec!(60));
        assert_eq!(engine.confirmed_receipt_count(), 1);
    }

    #[test]
    fn receipt_line_defaults_to_order_price() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   item,1,1,9,100,10,0,\n\
                   confirm,1,,,,,,\n\
                   receive,1,1,1,40,,,\n\
                   confirm_receipt,1,1,,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        let receipt = engine.receipt_snapshot(ReceiptId(1)).unwrap();
        assert_eq!(receipt.total_amount, dec!(400));
    }

    #[test]
    fn over_receipt_row_is_skipped() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   item,1,1,9,100,10,0,\n\
                   confirm,1,,,,,,\n\
                   receive,1,1,1,150,,,\n\
                   confirm_receipt,1,1,,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        // The oversized receipt is rejected; the ledger stays untouched.
        let order = engine.get_order(&OrderId(1)).unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.pending_quantity(OrderItemId(1)).unwrap(), dec!(100));
        assert_eq!(engine.confirmed_receipt_count(), 0);
    }

    #[test]
    fn parse_cancel_flow() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   item,1,1,9,100,10,0,\n\
                   cancel,1,,,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        let order = engine.get_order(&OrderId(1)).unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn parse_adjustments() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   item,1,1,9,10,10,0.1,\n\
                   adjust,1,,,,,50,20\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        let order = engine.get_order(&OrderId(1)).unwrap();
        assert_eq!(order.subtotal(), dec!(90.00));
        assert_eq!(order.final_amount(), dec!(60.00));
    }

    #[test]
    fn parse_with_whitespace() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n order , 1 ,, 5 ,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        assert!(engine.get_order(&OrderId(1)).is_some());
    }

    #[test]
    fn skip_malformed_rows() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,1,,5,,,,\n\
                   bogus,row,data,here,,,,\n\
                   order,2,,6,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        assert!(engine.get_order(&OrderId(1)).is_some());
        assert!(engine.get_order(&OrderId(2)).is_some());
    }

    #[test]
    fn write_orders_to_csv() {
        let csv_input = "type,order,id,ref,qty,price,discount,tax\n\
                         order,1,,5,,,,\n\
                         item,1,1,9,100,10,0,\n";
        let reader = Cursor::new(csv_input);
        let engine = process_events(reader).unwrap();

        let mut output = Vec::new();
        write_orders(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("order,supplier,status,subtotal,discount,tax,total"));
        assert!(output_str.contains("draft"));
    }

    #[test]
    fn multiple_orders() {
        let csv = "type,order,id,ref,qty,price,discount,tax\n\
                   order,3,,5,,,,\n\
                   order,1,,5,,,,\n\
                   order,2,,6,,,,\n";
        let reader = Cursor::new(csv);

        let engine = process_events(reader).unwrap();

        assert!(engine.get_order(&OrderId(1)).is_some());
        assert!(engine.get_order(&OrderId(2)).is_some());
        assert!(engine.get_order(&OrderId(3)).is_some());
    }
}
