use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::HashMap;
use tempfile::TempDir;

use holdings_lots::db;
use holdings_lots::fifo::{Analyzer, Processor};
use holdings_lots::models::{HoldingPeriod, NewTransaction, TransactionType};
use holdings_lots::opening::{add_opening_balance, OpeningBalance};
use holdings_lots::reports;

const SHARE: i64 = 1_000_000;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Book {
    _dir: TempDir,
    conn: Connection,
    account_id: String,
}

impl Book {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let conn = db::open(&dir.path().join("holdings.db")).unwrap();
        let account = db::create_account(&conn, "Brokerage", "etrade", "brokerage").unwrap();
        Self {
            _dir: dir,
            conn,
            account_id: account.id,
        }
    }

    fn record(
        &self,
        kind: TransactionType,
        symbol: &str,
        on: NaiveDate,
        shares: i64,
        amount: i64,
    ) -> String {
        let security = db::upsert_security(&self.conn, symbol, None).unwrap();
        db::create_transaction(
            &self.conn,
            &NewTransaction {
                account_id: self.account_id.clone(),
                security_id: Some(security.id),
                transaction_type: kind,
                transaction_date: on,
                quantity_micros: Some(shares),
                price_micros: None,
                amount_micros: amount,
                fees_micros: None,
                description: None,
            },
        )
        .unwrap()
    }

    fn buy(&self, symbol: &str, on: NaiveDate, shares: i64, cost: i64) -> String {
        self.record(TransactionType::Buy, symbol, on, shares * SHARE, cost * SHARE)
    }

    fn sell(&self, symbol: &str, on: NaiveDate, shares: i64, proceeds: i64) -> String {
        self.record(TransactionType::Sell, symbol, on, shares * SHARE, proceeds * SHARE)
    }

    fn process(&mut self) -> holdings_lots::fifo::ProcessSummary {
        Processor::new(&mut self.conn)
            .process_transactions(&self.account_id)
            .unwrap()
    }

    fn analyze(&self) -> holdings_lots::fifo::AnalysisResult {
        Analyzer::new(&self.conn).analyze(&self.account_id).unwrap()
    }
}

#[test]
fn test_reprocessing_is_idempotent() {
    let mut book = Book::new();
    book.buy("AAPL", date(2021, 3, 1), 10, 1_500);
    book.buy("AAPL", date(2021, 9, 1), 5, 800);
    book.sell("AAPL", date(2022, 4, 1), 12, 2_100);
    book.sell("MSFT", date(2022, 5, 1), 3, 900);

    let first = book.process();
    let lots_first: Vec<_> = db::list_lots_by_account(&book.conn, &book.account_id)
        .unwrap()
        .into_iter()
        .map(|l| {
            (
                l.transaction_id,
                l.acquired_date,
                l.quantity_micros,
                l.remaining_micros,
                l.cost_basis_micros,
            )
        })
        .collect();
    let disps_first: Vec<_> = db::list_dispositions_by_account(&book.conn, &book.account_id)
        .unwrap()
        .into_iter()
        .map(|d| (d.sell_transaction_id, d.quantity_micros, d.cost_basis_micros, d.proceeds_micros))
        .collect();

    let second = book.process();
    let lots_second: Vec<_> = db::list_lots_by_account(&book.conn, &book.account_id)
        .unwrap()
        .into_iter()
        .map(|l| {
            (
                l.transaction_id,
                l.acquired_date,
                l.quantity_micros,
                l.remaining_micros,
                l.cost_basis_micros,
            )
        })
        .collect();
    let disps_second: Vec<_> = db::list_dispositions_by_account(&book.conn, &book.account_id)
        .unwrap()
        .into_iter()
        .map(|d| (d.sell_transaction_id, d.quantity_micros, d.cost_basis_micros, d.proceeds_micros))
        .collect();

    assert_eq!(first, second);
    assert_eq!(lots_first, lots_second);
    assert_eq!(disps_first, disps_second);
    assert_eq!(first.unmatched_sells, 1);
}

#[test]
fn test_quantity_is_conserved() {
    let mut book = Book::new();
    book.buy("VTI", date(2020, 1, 2), 7, 1_050);
    book.buy("VTI", date(2020, 6, 1), 4, 600);
    book.buy("VTI", date(2021, 2, 1), 9, 1_800);
    book.sell("VTI", date(2021, 3, 1), 6, 1_260);
    book.sell("VTI", date(2021, 8, 2), 8, 1_760);
    book.process();

    let lots = db::list_lots_by_account(&book.conn, &book.account_id).unwrap();
    let dispositions = db::list_dispositions_by_account(&book.conn, &book.account_id).unwrap();

    let mut disposed: HashMap<&str, i64> = HashMap::new();
    for d in &dispositions {
        *disposed.entry(d.lot_id.as_str()).or_default() += d.quantity_micros;
    }

    for lot in &lots {
        assert!(lot.remaining_micros >= 0 && lot.remaining_micros <= lot.quantity_micros);
        let sold = disposed.get(lot.id.as_str()).copied().unwrap_or(0);
        assert_eq!(lot.quantity_micros - lot.remaining_micros, sold, "lot {}", lot.id);
    }

    let remaining: i64 = lots.iter().map(|l| l.remaining_micros).sum();
    assert_eq!(remaining, 6 * SHARE);
}

#[test]
fn test_oldest_lot_is_consumed_first_regardless_of_insert_order() {
    let mut book = Book::new();
    // Imported newest first
    book.buy("NVDA", date(2023, 5, 1), 10, 3_000);
    book.buy("NVDA", date(2022, 5, 2), 10, 2_000);
    book.sell("NVDA", date(2023, 8, 1), 12, 5_400);
    book.process();

    let lots = db::list_lots_by_account(&book.conn, &book.account_id).unwrap();
    let older = lots.iter().find(|l| l.acquired_date == date(2022, 5, 2)).unwrap();
    let newer = lots.iter().find(|l| l.acquired_date == date(2023, 5, 1)).unwrap();
    assert_eq!(older.remaining_micros, 0);
    assert_eq!(newer.remaining_micros, 8 * SHARE);

    let dispositions = db::list_dispositions_by_account(&book.conn, &book.account_id).unwrap();
    assert_eq!(dispositions.len(), 2);
    assert_eq!(dispositions[0].lot_id, older.id);
    assert_eq!(dispositions[0].quantity_micros, 10 * SHARE);
    assert_eq!(dispositions[1].lot_id, newer.id);
    assert_eq!(dispositions[1].quantity_micros, 2 * SHARE);
}

#[test]
fn test_proportional_allocation_truncates() {
    let mut book = Book::new();
    book.buy("T", date(2024, 1, 2), 3, 100);
    book.sell("T", date(2024, 2, 1), 1, 40);
    book.sell("T", date(2024, 3, 1), 2, 80);
    book.process();

    let dispositions = db::list_dispositions_by_account(&book.conn, &book.account_id).unwrap();
    assert_eq!(dispositions.len(), 2);
    assert_eq!(dispositions[0].cost_basis_micros, 33_333_333);
    assert_eq!(dispositions[1].cost_basis_micros, 66_666_666);

    let total_cost: i64 = dispositions.iter().map(|d| d.cost_basis_micros).sum();
    assert!((0..=2).contains(&(100 * SHARE - total_cost)));

    for d in &dispositions {
        assert_eq!(d.realized_gain_micros, d.proceeds_micros - d.cost_basis_micros);
    }
}

#[test]
fn test_split_sell_shares_the_same_price() {
    let mut book = Book::new();
    book.buy("KO", date(2024, 1, 2), 1, 55);
    book.buy("KO", date(2024, 1, 3), 2, 112);
    book.sell("KO", date(2024, 4, 1), 3, 180);
    book.process();

    let dispositions = db::list_dispositions_by_account(&book.conn, &book.account_id).unwrap();
    assert_eq!(dispositions.len(), 2);
    assert_eq!(dispositions[0].proceeds_micros, 60 * SHARE);
    assert_eq!(dispositions[1].proceeds_micros, 120 * SHARE);

    let total: i64 = dispositions.iter().map(|d| d.proceeds_micros).sum();
    assert_eq!(total, 180 * SHARE);
}

#[test]
fn test_holding_period_boundary() {
    let mut book = Book::new();
    book.buy("SPY", date(2023, 3, 1), 1, 400);
    book.buy("SPY", date(2023, 3, 1), 1, 400);
    // 365 days later, then 366 days later
    book.sell("SPY", date(2024, 2, 29), 1, 500);
    book.sell("SPY", date(2024, 3, 1), 1, 500);
    book.process();

    let dispositions = db::list_dispositions_by_account(&book.conn, &book.account_id).unwrap();
    assert_eq!(dispositions.len(), 2);
    assert_eq!(dispositions[0].holding_period, HoldingPeriod::ShortTerm);
    assert_eq!(dispositions[1].holding_period, HoldingPeriod::LongTerm);
}

#[test]
fn test_sell_without_history_is_reported_in_full() {
    let mut book = Book::new();
    book.sell("GME", date(2021, 1, 28), 7, 2_400);

    let summary = book.process();
    assert_eq!(summary.lots_created, 0);
    assert_eq!(summary.dispositions_created, 0);
    assert_eq!(summary.unmatched_micros, 7 * SHARE);
    assert!(db::list_dispositions_by_account(&book.conn, &book.account_id)
        .unwrap()
        .is_empty());

    let result = book.analyze();
    assert_eq!(result.gaps.len(), 1);
    assert_eq!(result.gaps[0].symbol, "GME");
    assert_eq!(result.gaps[0].unmatched_micros, 7 * SHARE);
    assert!(!result.gaps[0].needs_opening_balance);
}

#[test]
fn test_prior_era_gap_is_safe_to_ignore() {
    let mut book = Book::new();
    // Shares bought before the imported history, sold in 2019
    book.sell("ZS", date(2019, 6, 3), 100, 9_000);
    book.buy("ZS", date(2022, 2, 1), 50, 12_500);
    book.process();

    let result = book.analyze();
    assert_eq!(result.gaps.len(), 1);
    let gap = &result.gaps[0];
    assert_eq!(gap.unmatched_micros, 100 * SHARE);
    assert_eq!(gap.remaining_micros, 50 * SHARE);
    assert_eq!(gap.earliest_lot_date, Some(date(2022, 2, 1)));
    assert!(!gap.needs_opening_balance);
    assert_eq!(result.safe_to_ignore().count(), 1);
    assert_eq!(result.needs_review().count(), 0);
}

#[test]
fn test_same_day_rebuy_after_unmatched_sell_needs_review() {
    let mut book = Book::new();
    book.sell("AMD", date(2023, 6, 1), 20, 2_400);
    book.buy("AMD", date(2023, 6, 1), 20, 2_380);
    book.process();

    let result = book.analyze();
    let gap = &result.gaps[0];
    assert_eq!(gap.last_unmatched_sell_date, date(2023, 6, 1));
    assert_eq!(gap.earliest_lot_date, Some(date(2023, 6, 1)));
    assert!(gap.needs_opening_balance);
    assert_eq!(result.needs_review().count(), 1);
}

#[test]
fn test_large_positions_report_and_analyze() {
    let mut book = Book::new();
    book.sell("BRK", date(2019, 4, 1), 10, 3_000);
    book.buy("BRK", date(2023, 2, 1), 1_000, 100_000);
    book.buy("BRK", date(2023, 8, 1), 4_000, 1_600_000);
    book.process();

    let rows = reports::holdings(&book.conn, &book.account_id).unwrap();
    assert_eq!(rows[0].remaining_micros, 5_000 * SHARE);
    assert_eq!(rows[0].remaining_cost_basis_micros, 1_700_000 * SHARE);

    let result = book.analyze();
    assert_eq!(result.gaps.len(), 1);
    assert_eq!(result.gaps[0].remaining_micros, 5_000 * SHARE);
    assert!(!result.gaps[0].needs_opening_balance);
}

#[test]
fn test_opening_balance_closes_gap() {
    let mut book = Book::new();
    book.buy("AAPL", date(2020, 1, 2), 5, 400);
    book.sell("AAPL", date(2021, 1, 4), 8, 1_000);
    book.process();
    assert_eq!(book.analyze().gaps.len(), 1);

    add_opening_balance(
        &book.conn,
        &book.account_id,
        &OpeningBalance {
            symbol: "aapl".to_string(),
            quantity_micros: 3 * SHARE,
            cost_basis_micros: 150 * SHARE,
            acquired_date: date(2015, 7, 1),
        },
    )
    .unwrap();

    let summary = book.process();
    assert_eq!(summary.lots_created, 2);
    assert_eq!(summary.unmatched_sells, 0);
    assert!(book.analyze().gaps.is_empty());

    // The opening balance is the oldest lot, so it is consumed first
    let dispositions = db::list_dispositions_by_account(&book.conn, &book.account_id).unwrap();
    assert_eq!(dispositions[0].quantity_micros, 3 * SHARE);
    assert_eq!(dispositions[0].cost_basis_micros, 150 * SHARE);
    assert_eq!(dispositions[0].holding_period, HoldingPeriod::LongTerm);
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("holdings.db");

    let account_id = {
        let mut conn = db::open(&path).unwrap();
        let account = db::create_account(&conn, "IRA", "vanguard", "ira").unwrap();
        let security = db::upsert_security(&conn, "VTSAX", Some("Total Stock Market")).unwrap();
        db::create_transaction(
            &conn,
            &NewTransaction {
                account_id: account.id.clone(),
                security_id: Some(security.id),
                transaction_type: TransactionType::Buy,
                transaction_date: date(2024, 1, 2),
                quantity_micros: Some(10 * SHARE),
                price_micros: Some(100 * SHARE),
                amount_micros: 1_000 * SHARE,
                fees_micros: Some(0),
                description: None,
            },
        )
        .unwrap();
        Processor::new(&mut conn).process_transactions(&account.id).unwrap();
        account.id
    };

    let conn = db::open(&path).unwrap();
    let lots = db::list_lots_by_account(&conn, &account_id).unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].remaining_micros, 10 * SHARE);
    assert_eq!(db::get_account_by_name(&conn, "IRA").unwrap().id, account_id);
}
