//! SQLite persistence for accounts, securities, transactions, lots and dispositions.
//!
//! All amounts and quantities are stored in micros (value × 10^6).
//! Dates are stored as `YYYY-MM-DD` text.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{
    Account, Disposition, HoldingPeriod, Lot, NewTransaction, Security, SymbolRemaining,
    Transaction, TransactionType,
};

mod ids;

pub use ids::{new_id, IdPrefix};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id TEXT PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        institution_name TEXT NOT NULL,
        account_type TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS securities (
        id TEXT PRIMARY KEY,
        symbol TEXT UNIQUE NOT NULL,
        name TEXT
    );

    -- Transaction feed imported from broker exports
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        security_id TEXT,
        transaction_type TEXT NOT NULL,
        transaction_date TEXT NOT NULL,
        quantity_micros INTEGER,          -- scale: 10^6
        price_micros INTEGER,             -- scale: 10^6
        amount_micros INTEGER NOT NULL,   -- scale: 10^6
        fees_micros INTEGER,              -- scale: 10^6
        description TEXT,
        FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
        FOREIGN KEY (security_id) REFERENCES securities(id)
    );

    -- Tax lots, one per acquisition transaction. Rebuilt from scratch by the processor.
    CREATE TABLE IF NOT EXISTS lots (
        id TEXT PRIMARY KEY,
        account_id TEXT NOT NULL,
        security_id TEXT NOT NULL,
        transaction_id TEXT NOT NULL,     -- the acquisition that created this lot
        acquired_date TEXT NOT NULL,
        quantity_micros INTEGER NOT NULL,
        remaining_micros INTEGER NOT NULL,
        cost_basis_micros INTEGER NOT NULL,
        CHECK (remaining_micros >= 0 AND remaining_micros <= quantity_micros),
        FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE,
        FOREIGN KEY (security_id) REFERENCES securities(id),
        FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE
    );

    -- Sell matched against a single lot
    CREATE TABLE IF NOT EXISTS lot_dispositions (
        id TEXT PRIMARY KEY,
        lot_id TEXT NOT NULL,
        sell_transaction_id TEXT NOT NULL,
        disposed_date TEXT NOT NULL,
        quantity_micros INTEGER NOT NULL,
        cost_basis_micros INTEGER NOT NULL,
        proceeds_micros INTEGER NOT NULL,
        realized_gain_micros INTEGER NOT NULL,
        holding_period TEXT NOT NULL CHECK(holding_period IN ('short_term', 'long_term')),
        FOREIGN KEY (lot_id) REFERENCES lots(id) ON DELETE CASCADE,
        FOREIGN KEY (sell_transaction_id) REFERENCES transactions(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id);
    CREATE INDEX IF NOT EXISTS idx_lots_account_security ON lots(account_id, security_id);
    CREATE INDEX IF NOT EXISTS idx_lot_dispositions_lot ON lot_dispositions(lot_id);
"#;

/// Open (or create) the database at `path` and apply the schema
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
    }

    let conn = Connection::open(path)?;

    // WAL keeps readers (lots check) from blocking on a running rebuild
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    init_schema(&conn)?;

    log::debug!("Opened database at {}", path.display());
    Ok(conn)
}

/// In-memory database with the full schema, used by tests and dry runs
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

// ============================================================================
// Accounts
// ============================================================================

pub fn create_account(
    conn: &Connection,
    name: &str,
    institution_name: &str,
    account_type: &str,
) -> Result<Account> {
    let account = Account {
        id: new_id(IdPrefix::Account),
        name: name.to_string(),
        institution_name: institution_name.to_string(),
        account_type: account_type.to_string(),
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO accounts (id, name, institution_name, account_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            account.id,
            account.name,
            account.institution_name,
            account.account_type,
            account.created_at
        ],
    )?;

    Ok(account)
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        institution_name: row.get(2)?,
        account_type: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub fn get_account_by_name(conn: &Connection, name: &str) -> Result<Account> {
    conn.query_row(
        "SELECT id, name, institution_name, account_type, created_at
         FROM accounts WHERE name = ?1",
        [name],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("account", name))
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, institution_name, account_type, created_at
         FROM accounts ORDER BY name",
    )?;
    let accounts = stmt
        .query_map([], account_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(accounts)
}

/// Rename an account, returning the updated row
pub fn rename_account(conn: &Connection, account_id: &str, new_name: &str) -> Result<Account> {
    conn.query_row(
        "UPDATE accounts SET name = ?2 WHERE id = ?1
         RETURNING id, name, institution_name, account_type, created_at",
        params![account_id, new_name],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::not_found("account", account_id))
}

/// Delete an account. Its transactions, lots and dispositions go with it.
pub fn delete_account(conn: &Connection, account_id: &str) -> Result<()> {
    let deleted = conn.execute("DELETE FROM accounts WHERE id = ?1", [account_id])?;
    if deleted == 0 {
        return Err(Error::not_found("account", account_id));
    }
    Ok(())
}

// ============================================================================
// Securities
// ============================================================================

/// Insert a security or update the name of the existing one with the same symbol
pub fn upsert_security(conn: &Connection, symbol: &str, name: Option<&str>) -> Result<Security> {
    let security = conn.query_row(
        r#"INSERT INTO securities (id, symbol, name) VALUES (?1, ?2, ?3)
           ON CONFLICT(symbol) DO UPDATE SET name = COALESCE(excluded.name, securities.name)
           RETURNING id, symbol, name"#,
        params![new_id(IdPrefix::Security), symbol, name],
        |row| {
            Ok(Security {
                id: row.get(0)?,
                symbol: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )?;
    Ok(security)
}

pub fn get_security_by_symbol(conn: &Connection, symbol: &str) -> Result<Security> {
    conn.query_row(
        "SELECT id, symbol, name FROM securities WHERE symbol = ?1",
        [symbol],
        |row| {
            Ok(Security {
                id: row.get(0)?,
                symbol: row.get(1)?,
                name: row.get(2)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::not_found("security", symbol))
}

// ============================================================================
// Transactions
// ============================================================================

pub fn create_transaction(conn: &Connection, txn: &NewTransaction) -> Result<String> {
    let id = new_id(IdPrefix::Transaction);
    conn.execute(
        r#"INSERT INTO transactions
           (id, account_id, security_id, transaction_type, transaction_date,
            quantity_micros, price_micros, amount_micros, fees_micros, description)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
        params![
            id,
            txn.account_id,
            txn.security_id,
            txn.transaction_type.as_str(),
            txn.transaction_date,
            txn.quantity_micros,
            txn.price_micros,
            txn.amount_micros,
            txn.fees_micros,
            txn.description
        ],
    )?;
    Ok(id)
}

/// All transactions for an account in insertion order.
///
/// Callers that need chronological order sort the result themselves.
pub fn list_transactions_by_account(
    conn: &Connection,
    account_id: &str,
) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        r#"SELECT t.id, t.account_id, t.security_id, s.symbol, t.transaction_type,
                  t.transaction_date, t.quantity_micros, t.price_micros, t.amount_micros,
                  t.fees_micros, t.description
           FROM transactions t
           LEFT JOIN securities s ON s.id = t.security_id
           WHERE t.account_id = ?1
           ORDER BY t.rowid"#,
    )?;

    let transactions = stmt
        .query_map([account_id], |row| {
            let txn_type: String = row.get(4)?;
            Ok(Transaction {
                id: row.get(0)?,
                account_id: row.get(1)?,
                security_id: row.get(2)?,
                symbol: row.get(3)?,
                transaction_type: txn_type.parse().unwrap_or(TransactionType::Other),
                transaction_date: row.get(5)?,
                quantity_micros: row.get(6)?,
                price_micros: row.get(7)?,
                amount_micros: row.get(8)?,
                fees_micros: row.get(9)?,
                description: row.get(10)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(transactions)
}

pub fn delete_transactions_by_account(conn: &Connection, account_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM transactions WHERE account_id = ?1", [account_id])?)
}

// ============================================================================
// Lots
// ============================================================================

/// Parameters for a new lot; `remaining_micros` starts equal to `quantity_micros`
#[derive(Debug, Clone)]
pub struct NewLot<'a> {
    pub account_id: &'a str,
    pub security_id: &'a str,
    pub transaction_id: &'a str,
    pub acquired_date: NaiveDate,
    pub quantity_micros: i64,
    pub cost_basis_micros: i64,
}

pub fn create_lot(conn: &Connection, lot: &NewLot) -> Result<Lot> {
    let created = Lot {
        id: new_id(IdPrefix::Lot),
        account_id: lot.account_id.to_string(),
        security_id: lot.security_id.to_string(),
        transaction_id: lot.transaction_id.to_string(),
        acquired_date: lot.acquired_date,
        quantity_micros: lot.quantity_micros,
        remaining_micros: lot.quantity_micros,
        cost_basis_micros: lot.cost_basis_micros,
    };

    conn.execute(
        r#"INSERT INTO lots
           (id, account_id, security_id, transaction_id, acquired_date,
            quantity_micros, remaining_micros, cost_basis_micros)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
        params![
            created.id,
            created.account_id,
            created.security_id,
            created.transaction_id,
            created.acquired_date,
            created.quantity_micros,
            created.remaining_micros,
            created.cost_basis_micros
        ],
    )?;

    Ok(created)
}

pub fn update_lot_remaining(conn: &Connection, lot_id: &str, remaining_micros: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE lots SET remaining_micros = ?2 WHERE id = ?1",
        params![lot_id, remaining_micros],
    )?;
    if updated == 0 {
        return Err(Error::not_found("lot", lot_id));
    }
    Ok(())
}

pub(crate) fn lot_from_row(row: &Row) -> rusqlite::Result<Lot> {
    Ok(Lot {
        id: row.get(0)?,
        account_id: row.get(1)?,
        security_id: row.get(2)?,
        transaction_id: row.get(3)?,
        acquired_date: row.get(4)?,
        quantity_micros: row.get(5)?,
        remaining_micros: row.get(6)?,
        cost_basis_micros: row.get(7)?,
    })
}

/// Lots for one security in creation order, which is FIFO acquisition order
/// because the processor creates lots while replaying ascending by date.
pub fn list_lots_by_account_and_security(
    conn: &Connection,
    account_id: &str,
    security_id: &str,
) -> Result<Vec<Lot>> {
    let mut stmt = conn.prepare(
        r#"SELECT id, account_id, security_id, transaction_id, acquired_date,
                  quantity_micros, remaining_micros, cost_basis_micros
           FROM lots
           WHERE account_id = ?1 AND security_id = ?2
           ORDER BY rowid"#,
    )?;
    let lots = stmt
        .query_map(params![account_id, security_id], lot_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(lots)
}

pub fn list_lots_by_account(conn: &Connection, account_id: &str) -> Result<Vec<Lot>> {
    let mut stmt = conn.prepare(
        r#"SELECT id, account_id, security_id, transaction_id, acquired_date,
                  quantity_micros, remaining_micros, cost_basis_micros
           FROM lots
           WHERE account_id = ?1
           ORDER BY rowid"#,
    )?;
    let lots = stmt
        .query_map([account_id], lot_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(lots)
}

pub fn delete_lots_for_account(conn: &Connection, account_id: &str) -> Result<usize> {
    Ok(conn.execute("DELETE FROM lots WHERE account_id = ?1", [account_id])?)
}

/// Remaining quantity per security from the persisted lots of an account.
///
/// Remaining cost basis is summed per lot in Rust; `remaining * cost` overflows
/// SQLite's 64-bit integers for ordinary positions.
pub fn sum_remaining_by_symbol(
    conn: &Connection,
    account_id: &str,
) -> Result<Vec<SymbolRemaining>> {
    let mut stmt = conn.prepare(
        r#"SELECT l.id, l.account_id, l.security_id, l.transaction_id, l.acquired_date,
                  l.quantity_micros, l.remaining_micros, l.cost_basis_micros, s.symbol
           FROM lots l
           JOIN securities s ON s.id = l.security_id
           WHERE l.account_id = ?1
           ORDER BY s.symbol, l.security_id, l.rowid"#,
    )?;

    let lots = stmt
        .query_map([account_id], |row| Ok((lot_from_row(row)?, row.get::<_, String>(8)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut rows: Vec<SymbolRemaining> = Vec::new();
    for (lot, symbol) in lots {
        if rows.last().map_or(true, |row| row.security_id != lot.security_id) {
            rows.push(SymbolRemaining {
                security_id: lot.security_id.clone(),
                symbol,
                remaining_micros: 0,
                remaining_cost_basis_micros: 0,
                earliest_open_date: None,
            });
        }
        let last = rows.len() - 1;
        let row = &mut rows[last];

        row.remaining_micros = row
            .remaining_micros
            .checked_add(lot.remaining_micros)
            .ok_or_else(|| overflow(&row.symbol))?;
        row.remaining_cost_basis_micros = row
            .remaining_cost_basis_micros
            .checked_add(lot.remaining_cost_basis())
            .ok_or_else(|| overflow(&row.symbol))?;
        if lot.remaining_micros > 0 {
            row.earliest_open_date = Some(match row.earliest_open_date {
                Some(date) => date.min(lot.acquired_date),
                None => lot.acquired_date,
            });
        }
    }

    Ok(rows)
}

fn overflow(symbol: &str) -> Error {
    Error::InvalidInput(format!("remaining totals for {} exceed the micros range", symbol))
}

// ============================================================================
// Dispositions
// ============================================================================

/// Parameters for a new disposition
#[derive(Debug, Clone)]
pub struct NewDisposition<'a> {
    pub lot_id: &'a str,
    pub sell_transaction_id: &'a str,
    pub disposed_date: NaiveDate,
    pub quantity_micros: i64,
    pub cost_basis_micros: i64,
    pub proceeds_micros: i64,
    pub realized_gain_micros: i64,
    pub holding_period: HoldingPeriod,
}

pub fn create_lot_disposition(
    conn: &Connection,
    disposition: &NewDisposition,
) -> Result<Disposition> {
    let created = Disposition {
        id: new_id(IdPrefix::LotDisposition),
        lot_id: disposition.lot_id.to_string(),
        sell_transaction_id: disposition.sell_transaction_id.to_string(),
        disposed_date: disposition.disposed_date,
        quantity_micros: disposition.quantity_micros,
        cost_basis_micros: disposition.cost_basis_micros,
        proceeds_micros: disposition.proceeds_micros,
        realized_gain_micros: disposition.realized_gain_micros,
        holding_period: disposition.holding_period,
    };

    conn.execute(
        r#"INSERT INTO lot_dispositions
           (id, lot_id, sell_transaction_id, disposed_date, quantity_micros,
            cost_basis_micros, proceeds_micros, realized_gain_micros, holding_period)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            created.id,
            created.lot_id,
            created.sell_transaction_id,
            created.disposed_date,
            created.quantity_micros,
            created.cost_basis_micros,
            created.proceeds_micros,
            created.realized_gain_micros,
            created.holding_period.as_str()
        ],
    )?;

    Ok(created)
}

/// Delete every disposition attached to the account's lots
pub fn delete_dispositions_by_account(conn: &Connection, account_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM lot_dispositions WHERE lot_id IN (
            SELECT id FROM lots WHERE account_id = ?1
        )",
        [account_id],
    )?)
}

/// Dispositions for an account in the order they were recorded
pub fn list_dispositions_by_account(
    conn: &Connection,
    account_id: &str,
) -> Result<Vec<Disposition>> {
    let mut stmt = conn.prepare(
        r#"SELECT d.id, d.lot_id, d.sell_transaction_id, d.disposed_date, d.quantity_micros,
                  d.cost_basis_micros, d.proceeds_micros, d.realized_gain_micros, d.holding_period
           FROM lot_dispositions d
           JOIN lots l ON l.id = d.lot_id
           WHERE l.account_id = ?1
           ORDER BY d.rowid"#,
    )?;

    let dispositions = stmt
        .query_map([account_id], |row| {
            Ok(Disposition {
                id: row.get(0)?,
                lot_id: row.get(1)?,
                sell_transaction_id: row.get(2)?,
                disposed_date: row.get(3)?,
                quantity_micros: row.get(4)?,
                cost_basis_micros: row.get(5)?,
                proceeds_micros: row.get(6)?,
                realized_gain_micros: row.get(7)?,
                holding_period: holding_period_at(row, 8)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(dispositions)
}

/// Parse the `holding_period` text column at `idx`
pub(crate) fn holding_period_at(row: &Row, idx: usize) -> rusqlite::Result<HoldingPeriod> {
    let value: String = row.get(idx)?;
    value.parse().map_err(|e: Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
