//! `holdings` command line: accounts, transactions and tax lot maintenance.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;

use holdings_lots::config::Config;
use holdings_lots::db;
use holdings_lots::fifo::{Analyzer, Processor, SymbolGap};
use holdings_lots::micros::{format_micros, parse_micros};
use holdings_lots::models::{NewTransaction, TransactionType};
use holdings_lots::opening::{add_opening_balance, OpeningBalance};
use holdings_lots::reports;

#[derive(Debug, Parser)]
#[command(name = "holdings", version, about = "Brokerage holdings and FIFO tax lots")]
struct Cli {
    /// Database file (overrides HOLDINGS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage brokerage accounts
    #[command(subcommand)]
    Accounts(AccountsCommand),
    /// Record transactions by hand
    #[command(subcommand)]
    Txn(TxnCommand),
    /// Tax lot management
    #[command(subcommand)]
    Lots(LotsCommand),
}

#[derive(Debug, Subcommand)]
enum AccountsCommand {
    /// Create an account
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        institution: String,
        #[arg(long = "type", default_value = "brokerage")]
        account_type: String,
    },
    /// List accounts
    List,
    /// Rename an account
    Rename {
        #[arg(long)]
        name: String,
        #[arg(long)]
        new_name: String,
    },
    /// Delete an account with its transactions and lots
    Delete {
        #[arg(long)]
        name: String,
    },
}

#[derive(Debug, Subcommand)]
enum TxnCommand {
    /// Add a single transaction
    Add(TxnAddArgs),
}

#[derive(Debug, Args)]
struct TxnAddArgs {
    #[arg(long)]
    account_name: String,
    /// buy, sell, security_transfer, opening_balance, dividend, ...
    #[arg(long = "type", value_parser = parse_transaction_type)]
    transaction_type: TransactionType,
    /// Transaction date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    date: NaiveDate,
    #[arg(long)]
    symbol: Option<String>,
    /// Shares
    #[arg(long, value_parser = parse_micros_arg)]
    quantity: Option<i64>,
    /// Price per share
    #[arg(long, value_parser = parse_micros_arg)]
    price: Option<i64>,
    /// Total amount ($)
    #[arg(long, value_parser = parse_micros_arg, allow_hyphen_values = true)]
    amount: i64,
    #[arg(long, value_parser = parse_micros_arg)]
    fees: Option<i64>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Subcommand)]
enum LotsCommand {
    /// Process tax lots from transactions (FIFO matching)
    ///
    /// Run after importing all transaction history for an account.
    /// Clears existing lots and recomputes them from scratch.
    Process {
        #[arg(long)]
        account_name: String,
    },
    /// Analyze lot gaps and identify positions needing attention
    Check {
        #[arg(long)]
        account_name: String,
        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an opening balance for shares acquired before the imported history
    OpeningBalance {
        #[arg(long)]
        account_name: String,
        #[arg(long)]
        symbol: String,
        /// Shares
        #[arg(long, value_parser = parse_micros_arg)]
        quantity: i64,
        /// Total cost basis ($)
        #[arg(long, value_parser = parse_micros_arg)]
        cost_basis: i64,
        /// Acquisition date (YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
    },
    /// List open lots and holdings
    List {
        #[arg(long)]
        account_name: String,
    },
    /// Realized gains by holding period
    Gains {
        #[arg(long)]
        account_name: String,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        json: bool,
    },
    /// Clear all transactions and lots for an account
    Clear {
        #[arg(long)]
        account_name: String,
    },
}

fn parse_transaction_type(s: &str) -> std::result::Result<TransactionType, String> {
    s.parse().map_err(|e: holdings_lots::Error| e.to_string())
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("invalid date (use YYYY-MM-DD): {}", e))
}

fn parse_micros_arg(s: &str) -> std::result::Result<i64, String> {
    parse_micros(s).map_err(|e| e.to_string())
}

fn init_logging(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.log_level_filter())
        .parse_env("RUST_LOG")
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(path) = cli.db {
        config.database_path = path;
    }
    init_logging(&config);

    let mut conn = db::open(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path.display()))?;

    match cli.command {
        Command::Accounts(cmd) => run_accounts(&conn, cmd),
        Command::Txn(TxnCommand::Add(args)) => add_transaction(&conn, args),
        Command::Lots(cmd) => run_lots(&mut conn, cmd),
    }
}

fn run_accounts(conn: &Connection, cmd: AccountsCommand) -> Result<()> {
    match cmd {
        AccountsCommand::Add {
            name,
            institution,
            account_type,
        } => {
            let account = db::create_account(conn, &name, &institution, &account_type)
                .with_context(|| format!("failed to create account {}", name))?;
            println!("Created account {} ({})", account.name, account.id);
        }
        AccountsCommand::List => {
            let accounts = db::list_accounts(conn)?;
            if accounts.is_empty() {
                println!("No accounts.");
            }
            for account in accounts {
                println!(
                    "{:<24} {:<12} {:<12} {}",
                    account.name, account.institution_name, account.account_type, account.id
                );
            }
        }
        AccountsCommand::Rename { name, new_name } => {
            let account = db::get_account_by_name(conn, &name)?;
            let updated = db::rename_account(conn, &account.id, &new_name)
                .with_context(|| format!("failed to rename account {}", name))?;
            println!("Renamed {:?} -> {:?}", name, updated.name);
        }
        AccountsCommand::Delete { name } => {
            let account = db::get_account_by_name(conn, &name)?;
            db::delete_account(conn, &account.id)
                .with_context(|| format!("failed to delete account {}", name))?;
            log::info!("Deleted account {} ({})", account.name, account.id);
            println!("Deleted account {:?}", name);
        }
    }
    Ok(())
}

fn add_transaction(conn: &Connection, args: TxnAddArgs) -> Result<()> {
    let account = db::get_account_by_name(conn, &args.account_name)?;
    let security_id = match args.symbol.as_deref() {
        Some(symbol) => Some(db::upsert_security(conn, &symbol.trim().to_uppercase(), None)?.id),
        None => None,
    };

    let id = db::create_transaction(
        conn,
        &NewTransaction {
            account_id: account.id,
            security_id,
            transaction_type: args.transaction_type,
            transaction_date: args.date,
            quantity_micros: args.quantity,
            price_micros: args.price,
            amount_micros: args.amount,
            fees_micros: args.fees,
            description: args.description,
        },
    )?;

    println!("Created {} transaction {}", args.transaction_type, id);
    Ok(())
}

fn run_lots(conn: &mut Connection, cmd: LotsCommand) -> Result<()> {
    match cmd {
        LotsCommand::Process { account_name } => {
            let account = db::get_account_by_name(conn, &account_name)?;
            log::info!("Processing lots for {} ({})", account.name, account.id);

            let summary = Processor::new(conn)
                .process_transactions(&account.id)
                .context("failed to process tax lots")?;

            println!(
                "{}: {} lots, {} dispositions, {} unmatched sells",
                account.name,
                summary.lots_created,
                summary.dispositions_created,
                summary.unmatched_sells
            );
            if summary.unmatched_sells > 0 {
                println!(
                    "Run 'lots check --account-name {}' to review missing history.",
                    account.name
                );
            }
        }
        LotsCommand::Check { account_name, json } => {
            let account = db::get_account_by_name(conn, &account_name)?;
            let result = Analyzer::new(conn)
                .analyze(&account.id)
                .context("analysis failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            println!("\n=== {}: Lot Analysis ===", account.name);

            let safe: Vec<&SymbolGap> = result.safe_to_ignore().collect();
            let review: Vec<&SymbolGap> = result.needs_review().collect();

            if !safe.is_empty() {
                println!(
                    "\nSAFE TO IGNORE (old positions fully closed, or new buys after old sells):"
                );
                print_gaps(&safe);
            }
            if !review.is_empty() {
                println!("\nNEEDS OPENING BALANCE (current holdings affected by missing buys):");
                print_gaps(&review);
            }

            println!(
                "\nSummary: {} historical gaps (ignorable), {} need opening balances",
                safe.len(),
                review.len()
            );
            if review.is_empty() {
                println!("No action needed.");
            } else {
                println!(
                    "Add them with 'lots opening-balance --account-name {}', then rerun process.",
                    account.name
                );
            }
        }
        LotsCommand::OpeningBalance {
            account_name,
            symbol,
            quantity,
            cost_basis,
            date,
        } => {
            let account = db::get_account_by_name(conn, &account_name)?;
            add_opening_balance(
                conn,
                &account.id,
                &OpeningBalance {
                    symbol: symbol.clone(),
                    quantity_micros: quantity,
                    cost_basis_micros: cost_basis,
                    acquired_date: date,
                },
            )?;
            println!(
                "Created opening balance for {}. Run 'lots process --account-name {}' next.",
                symbol.to_uppercase(),
                account.name
            );
        }
        LotsCommand::List { account_name } => {
            let account = db::get_account_by_name(conn, &account_name)?;

            println!("\n=== {}: Open Lots ===", account.name);
            println!(
                "  {:<10} {:<12} {:>15} {:>15} {:>15}",
                "Symbol", "Acquired", "Quantity", "Remaining", "Cost Basis"
            );
            for lot in reports::open_lots(conn, &account.id)? {
                println!(
                    "  {:<10} {:<12} {:>15} {:>15} {:>15}",
                    lot.symbol,
                    lot.acquired_date,
                    format_micros(lot.quantity_micros, 4),
                    format_micros(lot.remaining_micros, 4),
                    format_micros(lot.remaining_cost_basis_micros, 2)
                );
            }

            println!("\n=== Holdings ===");
            for row in reports::holdings(conn, &account.id)? {
                println!(
                    "  {:<10} {:>15} {:>15}",
                    row.symbol,
                    format_micros(row.remaining_micros, 4),
                    format_micros(row.remaining_cost_basis_micros, 2)
                );
            }
        }
        LotsCommand::Gains {
            account_name,
            year,
            json,
        } => {
            let account = db::get_account_by_name(conn, &account_name)?;
            let report = reports::realized_gains(conn, &account.id, year)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            let scope = year.map(|y| y.to_string()).unwrap_or_else(|| "all years".to_string());
            println!("\n=== {}: Realized Gains ({}) ===", account.name, scope);
            println!(
                "  {:<10} {:<12} {:<12} {:>12} {:>14} {:>14} {:>14} {}",
                "Symbol", "Acquired", "Sold", "Quantity", "Proceeds", "Cost Basis", "Gain", "Term"
            );
            for row in &report.rows {
                println!(
                    "  {:<10} {:<12} {:<12} {:>12} {:>14} {:>14} {:>14} {}",
                    row.symbol,
                    row.acquired_date,
                    row.disposed_date,
                    format_micros(row.quantity_micros, 4),
                    format_micros(row.proceeds_micros, 2),
                    format_micros(row.cost_basis_micros, 2),
                    format_micros(row.realized_gain_micros, 2),
                    row.holding_period
                );
            }

            println!();
            for (label, totals) in [
                ("Short term", &report.short_term),
                ("Long term", &report.long_term),
                ("Total", &report.total),
            ] {
                println!(
                    "  {:<11} proceeds {:>14}  cost {:>14}  gain {:>14}",
                    label,
                    format_micros(totals.proceeds_micros, 2),
                    format_micros(totals.cost_basis_micros, 2),
                    format_micros(totals.realized_gain_micros, 2)
                );
            }
        }
        LotsCommand::Clear { account_name } => {
            let account = db::get_account_by_name(conn, &account_name)?;
            let tx = conn.transaction()?;
            db::delete_dispositions_by_account(&tx, &account.id)?;
            db::delete_lots_for_account(&tx, &account.id)?;
            let removed = db::delete_transactions_by_account(&tx, &account.id)?;
            tx.commit()?;

            log::info!("Cleared account data for {}", account.name);
            println!("Cleared {} ({} transactions removed)", account.name, removed);
        }
    }
    Ok(())
}

fn print_gaps(gaps: &[&SymbolGap]) {
    println!("  {:<10} {:>15} {:>15}", "Symbol", "Unmatched Qty", "Current Qty");
    for gap in gaps {
        println!(
            "  {:<10} {:>15} {:>15}",
            gap.symbol,
            format_micros(gap.unmatched_micros, 2),
            format_micros(gap.remaining_micros, 2)
        );
    }
}
