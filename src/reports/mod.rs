//! Read-only views over the persisted lot state.

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::Result;
use crate::models::{HoldingPeriod, SymbolRemaining};

/// An open lot joined with its symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenLot {
    pub lot_id: String,
    pub symbol: String,
    pub acquired_date: NaiveDate,
    pub quantity_micros: i64,
    pub remaining_micros: i64,
    pub cost_basis_micros: i64,
    pub remaining_cost_basis_micros: i64,
}

/// Lots that still hold shares, by symbol then acquisition order
pub fn open_lots(conn: &Connection, account_id: &str) -> Result<Vec<OpenLot>> {
    let mut stmt = conn.prepare(
        r#"SELECT l.id, l.account_id, l.security_id, l.transaction_id, l.acquired_date,
                  l.quantity_micros, l.remaining_micros, l.cost_basis_micros, s.symbol
           FROM lots l
           JOIN securities s ON s.id = l.security_id
           WHERE l.account_id = ?1 AND l.remaining_micros > 0
           ORDER BY s.symbol, l.rowid"#,
    )?;

    let lots = stmt
        .query_map([account_id], |row| {
            let lot = db::lot_from_row(row)?;
            Ok(OpenLot {
                symbol: row.get(8)?,
                acquired_date: lot.acquired_date,
                quantity_micros: lot.quantity_micros,
                remaining_micros: lot.remaining_micros,
                cost_basis_micros: lot.cost_basis_micros,
                remaining_cost_basis_micros: lot.remaining_cost_basis(),
                lot_id: lot.id,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(lots)
}

/// Current holdings per symbol, skipping fully sold positions
pub fn holdings(conn: &Connection, account_id: &str) -> Result<Vec<SymbolRemaining>> {
    Ok(db::sum_remaining_by_symbol(conn, account_id)?
        .into_iter()
        .filter(|row| row.remaining_micros > 0)
        .collect())
}

/// A disposition joined with its symbol and acquisition date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedRow {
    pub symbol: String,
    pub acquired_date: NaiveDate,
    pub disposed_date: NaiveDate,
    pub quantity_micros: i64,
    pub cost_basis_micros: i64,
    pub proceeds_micros: i64,
    pub realized_gain_micros: i64,
    pub holding_period: HoldingPeriod,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainTotals {
    pub proceeds_micros: i64,
    pub cost_basis_micros: i64,
    pub realized_gain_micros: i64,
}

impl GainTotals {
    fn add(&mut self, row: &RealizedRow) {
        self.proceeds_micros += row.proceeds_micros;
        self.cost_basis_micros += row.cost_basis_micros;
        self.realized_gain_micros += row.realized_gain_micros;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealizedGains {
    pub year: Option<i32>,
    pub short_term: GainTotals,
    pub long_term: GainTotals,
    pub total: GainTotals,
    pub rows: Vec<RealizedRow>,
}

/// Realized gains for an account, optionally limited to one calendar year
pub fn realized_gains(
    conn: &Connection,
    account_id: &str,
    year: Option<i32>,
) -> Result<RealizedGains> {
    let mut stmt = conn.prepare(
        r#"SELECT s.symbol, l.acquired_date, d.disposed_date, d.quantity_micros,
                  d.cost_basis_micros, d.proceeds_micros, d.realized_gain_micros,
                  d.holding_period
           FROM lot_dispositions d
           JOIN lots l ON l.id = d.lot_id
           JOIN securities s ON s.id = l.security_id
           WHERE l.account_id = ?1
           ORDER BY d.disposed_date, d.rowid"#,
    )?;

    let rows = stmt
        .query_map(params![account_id], |row| {
            Ok(RealizedRow {
                symbol: row.get(0)?,
                acquired_date: row.get(1)?,
                disposed_date: row.get(2)?,
                quantity_micros: row.get(3)?,
                cost_basis_micros: row.get(4)?,
                proceeds_micros: row.get(5)?,
                realized_gain_micros: row.get(6)?,
                holding_period: db::holding_period_at(row, 7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut report = RealizedGains {
        year,
        ..Default::default()
    };

    for row in rows {
        if year.is_some_and(|y| row.disposed_date.year() != y) {
            continue;
        }
        match row.holding_period {
            HoldingPeriod::ShortTerm => report.short_term.add(&row),
            HoldingPeriod::LongTerm => report.long_term.add(&row),
        }
        report.total.add(&row);
        report.rows.push(row);
    }

    Ok(report)
}
