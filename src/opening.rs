//! Opening balances for positions acquired before the imported history.
//!
//! An opening balance is an ordinary `opening_balance` transaction. It opens a
//! lot on the next processor run like any other acquisition.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::{Error, Result};
use crate::micros::MICROS_SCALE;
use crate::models::{NewTransaction, TransactionType};

pub const OPENING_BALANCE_DESCRIPTION: &str = "Opening balance - manual entry";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningBalance {
    pub symbol: String,
    pub quantity_micros: i64,
    pub cost_basis_micros: i64,
    pub acquired_date: NaiveDate,
}

/// Record an opening balance transaction, returning its id
pub fn add_opening_balance(
    conn: &Connection,
    account_id: &str,
    lot: &OpeningBalance,
) -> Result<String> {
    let symbol = lot.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(Error::InvalidInput("symbol is required".to_string()));
    }
    if lot.quantity_micros <= 0 {
        return Err(Error::InvalidInput(format!(
            "quantity must be positive, got {}",
            lot.quantity_micros
        )));
    }
    if lot.cost_basis_micros < 0 {
        return Err(Error::InvalidInput(format!(
            "cost basis cannot be negative, got {}",
            lot.cost_basis_micros
        )));
    }

    let security = db::upsert_security(conn, &symbol, None)?;
    let price_micros = ((lot.cost_basis_micros as i128 * MICROS_SCALE as i128)
        / lot.quantity_micros as i128) as i64;

    let txn_id = db::create_transaction(
        conn,
        &NewTransaction {
            account_id: account_id.to_string(),
            security_id: Some(security.id),
            transaction_type: TransactionType::OpeningBalance,
            transaction_date: lot.acquired_date,
            quantity_micros: Some(lot.quantity_micros),
            price_micros: Some(price_micros),
            amount_micros: lot.cost_basis_micros,
            fees_micros: Some(0),
            description: Some(OPENING_BALANCE_DESCRIPTION.to_string()),
        },
    )?;

    log::info!(
        "Created opening balance for {}: quantity {}, cost basis {}, acquired {}",
        symbol,
        lot.quantity_micros,
        lot.cost_basis_micros,
        lot.acquired_date
    );

    Ok(txn_id)
}
