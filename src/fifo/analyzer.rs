//! Import gap analysis with ownership era detection
//!
//! An "ownership era" is a period of continuous holding of a security, ended
//! by a complete exit. Old broker exports often start in the middle of an
//! era, so the history contains sells whose buys were never imported.
//!
//! Example: ZS
//!
//! ```text
//!   Era 1:  2015 buy 1000   <- not in the export
//!           2018 sell 500   <- unmatched
//!           2019 sell 500   <- unmatched, position closed
//!   Era 2:  2023 buy 300    <- in the export, still held
//! ```
//!
//! The unmatched sells all happened before the lot that opened the current
//! era, so the 300 shares held today are unaffected and the gap is safe to
//! ignore. An unmatched sell on or after the start of the current era means
//! the held shares may be missing cost basis and need an opening balance.
//!
//! The check is a heuristic. Histories with several overlapping eras can be
//! misclassified, so treat the result as a prompt for review, not a proof.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{replay, Allocation, CancelFlag, LotSink};
use crate::db;
use crate::error::Result;
use crate::models::{Lot, Transaction};

/// Unmatched sell quantity for one security
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolGap {
    pub symbol: String,
    pub security_id: String,
    pub unmatched_micros: i64,
    /// Remaining quantity from the persisted lots (last processor run)
    pub remaining_micros: i64,
    pub needs_opening_balance: bool,
    pub last_unmatched_sell_date: NaiveDate,
    /// Start of the current era, if any shares are still held
    pub earliest_lot_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub gaps: Vec<SymbolGap>,
}

impl AnalysisResult {
    /// Gaps whose unmatched sells predate the current era
    pub fn safe_to_ignore(&self) -> impl Iterator<Item = &SymbolGap> {
        self.gaps.iter().filter(|gap| !gap.needs_opening_balance)
    }

    /// Gaps that may affect shares still held
    pub fn needs_review(&self) -> impl Iterator<Item = &SymbolGap> {
        self.gaps.iter().filter(|gap| gap.needs_opening_balance)
    }
}

/// Read-only replay of an account's history
pub struct Analyzer<'a> {
    conn: &'a Connection,
    cancel: Option<CancelFlag>,
}

impl<'a> Analyzer<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn, cancel: None }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn analyze(&self, account_id: &str) -> Result<AnalysisResult> {
        let transactions = db::list_transactions_by_account(self.conn, account_id)?;

        let mut sim = SimulatedBook::default();
        replay(&transactions, &mut sim, self.cancel.as_ref())?;

        let persisted: HashMap<String, _> = db::sum_remaining_by_symbol(self.conn, account_id)?
            .into_iter()
            .map(|row| (row.security_id.clone(), row))
            .collect();

        let mut gaps: Vec<SymbolGap> = sim
            .unmatched
            .iter()
            .map(|(security_id, gap)| {
                let row = persisted.get(security_id);
                let symbol = row
                    .map(|r| r.symbol.clone())
                    .or_else(|| gap.symbol.clone())
                    .unwrap_or_else(|| security_id.clone());
                let remaining_micros = row.map(|r| r.remaining_micros).unwrap_or(0);

                // Simulated lots define the current era. When the simulation
                // holds nothing, fall back to the persisted lots.
                let earliest_lot_date = sim
                    .earliest_open_date(security_id)
                    .or_else(|| row.and_then(|r| r.earliest_open_date));

                let needs_opening_balance = remaining_micros > 0
                    && earliest_lot_date
                        .is_some_and(|earliest| gap.last_sell_date >= earliest);

                SymbolGap {
                    symbol,
                    security_id: security_id.clone(),
                    unmatched_micros: gap.quantity_micros,
                    remaining_micros,
                    needs_opening_balance,
                    last_unmatched_sell_date: gap.last_sell_date,
                    earliest_lot_date,
                }
            })
            .collect();

        gaps.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.security_id.cmp(&b.security_id))
        });

        let needs_review = gaps.iter().filter(|g| g.needs_opening_balance).count();
        log::info!(
            "Analyzed {} transactions for account {}: {} gaps, {} need opening balances",
            transactions.len(),
            account_id,
            gaps.len(),
            needs_review
        );

        Ok(AnalysisResult { gaps })
    }
}

#[derive(Debug)]
struct UnmatchedSells {
    symbol: Option<String>,
    quantity_micros: i64,
    last_sell_date: NaiveDate,
}

/// In-memory lots per security; nothing is written
#[derive(Debug, Default)]
struct SimulatedBook {
    lots: HashMap<String, Vec<Lot>>,
    unmatched: HashMap<String, UnmatchedSells>,
}

impl SimulatedBook {
    fn earliest_open_date(&self, security_id: &str) -> Option<NaiveDate> {
        self.lots
            .get(security_id)?
            .iter()
            .filter(|lot| lot.remaining_micros > 0)
            .map(|lot| lot.acquired_date)
            .min()
    }
}

impl LotSink for SimulatedBook {
    fn open_lot(
        &mut self,
        txn: &Transaction,
        security_id: &str,
        quantity_micros: i64,
    ) -> Result<()> {
        let lots = self.lots.entry(security_id.to_string()).or_default();
        lots.push(Lot {
            id: format!("sim_{}", lots.len()),
            account_id: txn.account_id.clone(),
            security_id: security_id.to_string(),
            transaction_id: txn.id.clone(),
            acquired_date: txn.transaction_date,
            quantity_micros,
            remaining_micros: quantity_micros,
            cost_basis_micros: txn.amount_micros,
        });
        Ok(())
    }

    fn lots_for(&mut self, _txn: &Transaction, security_id: &str) -> Result<Vec<Lot>> {
        Ok(self.lots.get(security_id).cloned().unwrap_or_default())
    }

    fn dispose(&mut self, lot: &Lot, _txn: &Transaction, allocation: &Allocation) -> Result<()> {
        if let Some(stored) = self
            .lots
            .get_mut(&lot.security_id)
            .and_then(|lots| lots.iter_mut().find(|l| l.id == lot.id))
        {
            stored.remaining_micros -= allocation.quantity_micros;
        }
        Ok(())
    }

    fn unmatched(
        &mut self,
        txn: &Transaction,
        security_id: &str,
        quantity_micros: i64,
    ) -> Result<()> {
        let entry = self
            .unmatched
            .entry(security_id.to_string())
            .or_insert_with(|| UnmatchedSells {
                symbol: txn.symbol.clone(),
                quantity_micros: 0,
                last_sell_date: txn.transaction_date,
            });
        entry.quantity_micros += quantity_micros;
        entry.last_sell_date = txn.transaction_date;
        Ok(())
    }
}
