//! Persisted FIFO lot rebuild for one account.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::{replay, Allocation, CancelFlag, LotSink};
use crate::db::{self, NewDisposition, NewLot};
use crate::error::Result;
use crate::models::{Lot, Transaction};

/// Outcome of a rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub lots_created: usize,
    pub dispositions_created: usize,
    pub unmatched_sells: usize,
    pub unmatched_micros: i64,
}

/// Rebuilds lots and dispositions from the full transaction history.
///
/// Only one rebuild per account may run at a time. The whole rebuild is a
/// single SQLite transaction, so concurrent readers see either the previous
/// lot state or the new one.
pub struct Processor<'a> {
    conn: &'a mut Connection,
    cancel: Option<CancelFlag>,
}

impl<'a> Processor<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn, cancel: None }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Delete and regenerate every lot and disposition for `account_id`.
    ///
    /// Sells that exceed the available lots are logged and left unmatched.
    /// Any database error rolls the whole rebuild back.
    pub fn process_transactions(&mut self, account_id: &str) -> Result<ProcessSummary> {
        let tx = self.conn.transaction()?;

        db::delete_dispositions_by_account(&tx, account_id)?;
        db::delete_lots_for_account(&tx, account_id)?;
        log::info!("Cleared existing lots for account {}", account_id);

        let transactions = db::list_transactions_by_account(&tx, account_id)?;

        let mut sink = PersistingSink {
            conn: &tx,
            cancel: self.cancel.as_ref(),
        };
        let stats = replay(&transactions, &mut sink, self.cancel.as_ref())?;

        tx.commit()?;

        let summary = ProcessSummary {
            lots_created: stats.lots_opened,
            dispositions_created: stats.dispositions,
            unmatched_sells: stats.unmatched_sells,
            unmatched_micros: stats.unmatched_micros,
        };
        log::info!(
            "Processed {} transactions for account {}: {} lots, {} dispositions, {} unmatched",
            transactions.len(),
            account_id,
            summary.lots_created,
            summary.dispositions_created,
            summary.unmatched_sells
        );

        Ok(summary)
    }
}

/// Writes every replay effect straight to the database
struct PersistingSink<'c> {
    conn: &'c Connection,
    cancel: Option<&'c CancelFlag>,
}

impl LotSink for PersistingSink<'_> {
    fn open_lot(
        &mut self,
        txn: &Transaction,
        security_id: &str,
        quantity_micros: i64,
    ) -> Result<()> {
        let lot = db::create_lot(
            self.conn,
            &NewLot {
                account_id: &txn.account_id,
                security_id,
                transaction_id: &txn.id,
                acquired_date: txn.transaction_date,
                quantity_micros,
                cost_basis_micros: txn.amount_micros,
            },
        )?;

        log::debug!(
            "Created lot {} from txn {} ({}): quantity {}",
            lot.id,
            txn.id,
            txn.symbol_or_security(),
            quantity_micros
        );
        Ok(())
    }

    fn lots_for(&mut self, txn: &Transaction, security_id: &str) -> Result<Vec<Lot>> {
        if let Some(flag) = self.cancel {
            flag.check()?;
        }
        db::list_lots_by_account_and_security(self.conn, &txn.account_id, security_id)
    }

    fn dispose(&mut self, lot: &Lot, txn: &Transaction, allocation: &Allocation) -> Result<()> {
        db::create_lot_disposition(
            self.conn,
            &NewDisposition {
                lot_id: &lot.id,
                sell_transaction_id: &txn.id,
                disposed_date: txn.transaction_date,
                quantity_micros: allocation.quantity_micros,
                cost_basis_micros: allocation.cost_basis_micros,
                proceeds_micros: allocation.proceeds_micros,
                realized_gain_micros: allocation.realized_gain_micros,
                holding_period: allocation.holding_period,
            },
        )?;

        db::update_lot_remaining(
            self.conn,
            &lot.id,
            lot.remaining_micros - allocation.quantity_micros,
        )?;

        log::debug!(
            "Matched sell {} to lot {}: quantity {}, cost basis {}, proceeds {}, gain {}, {}",
            txn.id,
            lot.id,
            allocation.quantity_micros,
            allocation.cost_basis_micros,
            allocation.proceeds_micros,
            allocation.realized_gain_micros,
            allocation.holding_period
        );
        Ok(())
    }

    fn unmatched(
        &mut self,
        txn: &Transaction,
        _security_id: &str,
        quantity_micros: i64,
    ) -> Result<()> {
        log::warn!(
            "FIFO: Sell quantity exceeds available lots for txn {} ({}): {} unmatched",
            txn.id,
            txn.symbol_or_security(),
            quantity_micros
        );
        Ok(())
    }
}
