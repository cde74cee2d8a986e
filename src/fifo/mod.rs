//! FIFO (First-In-First-Out) tax lot matching
//!
//! One replay drives both consumers of the transaction history:
//! - `Processor`: persists lots and dispositions (destructive rebuild per account)
//! - `Analyzer`: simulates the same matching in memory to find unmatched sells
//!
//! Replay rules:
//! - BUY / SECURITY_TRANSFER / OPENING_BALANCE with positive quantity: open a new lot
//! - SELL with positive quantity: consume open lots oldest-first
//! - Everything else (dividends, interest, fees, cash transfers, ...) is ignored
//!
//! Transactions are replayed ascending by date. The sort is stable, so the feed's
//! own order breaks ties between transactions on the same day.

use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{HoldingPeriod, Lot, Transaction};

pub mod analyzer;
pub mod processor;

pub use analyzer::{AnalysisResult, Analyzer, SymbolGap};
pub use processor::{ProcessSummary, Processor};

/// Lots held longer than this many days are long term
pub const LONG_TERM_DAYS: i64 = 365;

/// Cooperative cancellation shared between a caller and a running replay.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Share of one sell allocated to one lot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub quantity_micros: i64,
    pub cost_basis_micros: i64,
    pub proceeds_micros: i64,
    pub realized_gain_micros: i64,
    pub holding_period: HoldingPeriod,
}

/// Side effects of a replay.
///
/// The replay decides *what* happens; the sink decides whether it is
/// written to the database or accumulated in memory.
pub trait LotSink {
    /// Open a lot for an acquisition with a positive quantity.
    fn open_lot(
        &mut self,
        txn: &Transaction,
        security_id: &str,
        quantity_micros: i64,
    ) -> Result<()>;

    /// Lots for the sell's account and security in acquisition order.
    fn lots_for(&mut self, txn: &Transaction, security_id: &str) -> Result<Vec<Lot>>;

    /// Record `allocation` against `lot`. `lot.remaining_micros` is the value
    /// before this allocation is applied.
    fn dispose(&mut self, lot: &Lot, txn: &Transaction, allocation: &Allocation) -> Result<()>;

    /// Part of a sell that no open lot could cover.
    fn unmatched(
        &mut self,
        txn: &Transaction,
        security_id: &str,
        quantity_micros: i64,
    ) -> Result<()>;
}

/// Counters collected during a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lots_opened: usize,
    pub dispositions: usize,
    pub unmatched_sells: usize,
    pub unmatched_micros: i64,
}

/// Transactions sorted ascending by date, keeping feed order for equal dates
pub fn sort_by_date_asc(transactions: &[Transaction]) -> Vec<&Transaction> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|txn| txn.transaction_date);
    sorted
}

/// Holding period for shares acquired on `acquired` and sold on `disposed`.
///
/// Flat 365-day threshold: exactly 365 days is still short term.
pub fn holding_period(acquired: NaiveDate, disposed: NaiveDate) -> HoldingPeriod {
    if (disposed - acquired).num_days() > LONG_TERM_DAYS {
        HoldingPeriod::LongTerm
    } else {
        HoldingPeriod::ShortTerm
    }
}

/// Allocate `take` micros of `sell` against `lot`.
///
/// Cost basis is proportional to the lot's original quantity, proceeds are
/// proportional to the sell's total quantity. Both truncate toward zero.
pub fn allocate(lot: &Lot, sell: &Transaction, sell_quantity_micros: i64, take: i64) -> Allocation {
    let cost_basis_micros = if lot.quantity_micros == 0 {
        0
    } else {
        let cost_per_micro = lot.cost_basis_micros as f64 / lot.quantity_micros as f64;
        (cost_per_micro * take as f64) as i64
    };

    let proceeds_per_micro = sell.amount_micros as f64 / sell_quantity_micros as f64;
    let proceeds_micros = (proceeds_per_micro * take as f64) as i64;

    Allocation {
        quantity_micros: take,
        cost_basis_micros,
        proceeds_micros,
        realized_gain_micros: proceeds_micros - cost_basis_micros,
        holding_period: holding_period(lot.acquired_date, sell.transaction_date),
    }
}

/// Replay `transactions` through `sink` using FIFO matching.
pub fn replay<S: LotSink>(
    transactions: &[Transaction],
    sink: &mut S,
    cancel: Option<&CancelFlag>,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();

    for txn in sort_by_date_asc(transactions) {
        if let Some(flag) = cancel {
            flag.check()?;
        }

        let Some(security_id) = txn.security_id.as_deref() else {
            continue;
        };
        let Some(quantity) = txn.positive_quantity() else {
            continue;
        };

        if txn.transaction_type.opens_lot() {
            sink.open_lot(txn, security_id, quantity)?;
            stats.lots_opened += 1;
        } else if txn.transaction_type.closes_lot() {
            let lots = sink.lots_for(txn, security_id)?;
            let mut remaining_to_sell = quantity;

            for lot in &lots {
                if remaining_to_sell <= 0 {
                    break;
                }
                if lot.remaining_micros <= 0 {
                    continue;
                }

                let take = remaining_to_sell.min(lot.remaining_micros);
                let allocation = allocate(lot, txn, quantity, take);
                sink.dispose(lot, txn, &allocation)?;
                stats.dispositions += 1;

                remaining_to_sell -= take;
            }

            if remaining_to_sell > 0 {
                sink.unmatched(txn, security_id, remaining_to_sell)?;
                stats.unmatched_sells += 1;
                stats.unmatched_micros += remaining_to_sell;
            }
        }
    }

    Ok(stats)
}
