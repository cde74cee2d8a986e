use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub institution_name: String,
    pub account_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    pub id: String,
    pub symbol: String,
    pub name: Option<String>,
}

/// Transaction types recorded by the importers.
///
/// Only `Buy`, `SecurityTransfer`, `OpeningBalance` (acquisitions) and `Sell`
/// have any effect on tax lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Buy,
    Sell,
    SecurityTransfer,
    OpeningBalance,
    Dividend,
    Interest,
    CapGain,
    Fee,
    Split,
    Reorg,
    TransferIn,
    TransferOut,
    Other,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::SecurityTransfer => "security_transfer",
            Self::OpeningBalance => "opening_balance",
            Self::Dividend => "dividend",
            Self::Interest => "interest",
            Self::CapGain => "cap_gain",
            Self::Fee => "fee",
            Self::Split => "split",
            Self::Reorg => "reorg",
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
            Self::Other => "other",
        }
    }

    /// Transactions that open a new lot
    pub fn opens_lot(&self) -> bool {
        matches!(
            self,
            Self::Buy | Self::SecurityTransfer | Self::OpeningBalance
        )
    }

    /// Transactions that consume existing lots
    pub fn closes_lot(&self) -> bool {
        matches!(self, Self::Sell)
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "security_transfer" => Ok(Self::SecurityTransfer),
            "opening_balance" => Ok(Self::OpeningBalance),
            "dividend" => Ok(Self::Dividend),
            "interest" => Ok(Self::Interest),
            "cap_gain" => Ok(Self::CapGain),
            "fee" => Ok(Self::Fee),
            "split" => Ok(Self::Split),
            "reorg" => Ok(Self::Reorg),
            "transfer_in" => Ok(Self::TransferIn),
            "transfer_out" => Ok(Self::TransferOut),
            "other" => Ok(Self::Other),
            _ => Err(Error::InvalidInput(format!(
                "'{}' is not a valid transaction type",
                s
            ))),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transaction as read back from the transaction feed, joined with its symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    pub security_id: Option<String>,
    pub symbol: Option<String>,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub quantity_micros: Option<i64>,
    pub price_micros: Option<i64>,
    pub amount_micros: i64,
    pub fees_micros: Option<i64>,
    pub description: Option<String>,
}

impl Transaction {
    /// Quantity if present and strictly positive
    pub fn positive_quantity(&self) -> Option<i64> {
        self.quantity_micros.filter(|q| *q > 0)
    }

    pub fn symbol_or_security(&self) -> &str {
        self.symbol
            .as_deref()
            .or(self.security_id.as_deref())
            .unwrap_or("")
    }
}

/// Parameters for inserting a new transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: String,
    pub security_id: Option<String>,
    pub transaction_type: TransactionType,
    pub transaction_date: NaiveDate,
    pub quantity_micros: Option<i64>,
    pub price_micros: Option<i64>,
    pub amount_micros: i64,
    pub fees_micros: Option<i64>,
    pub description: Option<String>,
}

/// A tax lot created from a single acquisition transaction.
///
/// `0 <= remaining_micros <= quantity_micros` holds for the life of the lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub id: String,
    pub account_id: String,
    pub security_id: String,
    pub transaction_id: String,
    pub acquired_date: NaiveDate,
    pub quantity_micros: i64,
    pub remaining_micros: i64,
    pub cost_basis_micros: i64,
}

impl Lot {
    /// Cost basis attributable to the shares still held
    pub fn remaining_cost_basis(&self) -> i64 {
        if self.quantity_micros == 0 {
            return 0;
        }
        ((self.remaining_micros as i128 * self.cost_basis_micros as i128)
            / self.quantity_micros as i128) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingPeriod {
    ShortTerm,
    LongTerm,
}

impl HoldingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl FromStr for HoldingPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            _ => Err(Error::InvalidInput(format!(
                "'{}' is not a valid holding period",
                s
            ))),
        }
    }
}

impl fmt::Display for HoldingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sell consuming part or all of one lot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disposition {
    pub id: String,
    pub lot_id: String,
    pub sell_transaction_id: String,
    pub disposed_date: NaiveDate,
    pub quantity_micros: i64,
    pub cost_basis_micros: i64,
    pub proceeds_micros: i64,
    pub realized_gain_micros: i64,
    pub holding_period: HoldingPeriod,
}

/// Aggregate of persisted lot state for one security in one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRemaining {
    pub security_id: String,
    pub symbol: String,
    pub remaining_micros: i64,
    pub remaining_cost_basis_micros: i64,
    /// Earliest acquisition among lots that still hold shares
    pub earliest_open_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_round_trips_through_str() {
        for t in [
            TransactionType::Buy,
            TransactionType::Sell,
            TransactionType::SecurityTransfer,
            TransactionType::OpeningBalance,
            TransactionType::CapGain,
        ] {
            assert_eq!(t.as_str().parse::<TransactionType>().unwrap(), t);
        }
        assert!("bogus".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_lot_effects() {
        assert!(TransactionType::Buy.opens_lot());
        assert!(TransactionType::SecurityTransfer.opens_lot());
        assert!(TransactionType::OpeningBalance.opens_lot());
        assert!(TransactionType::Sell.closes_lot());
        assert!(!TransactionType::Dividend.opens_lot());
        assert!(!TransactionType::TransferIn.opens_lot());
        assert!(!TransactionType::Fee.closes_lot());
    }

    #[test]
    fn test_remaining_cost_basis() {
        let lot = Lot {
            id: "lot_1".to_string(),
            account_id: "acct_1".to_string(),
            security_id: "sec_1".to_string(),
            transaction_id: "txn_1".to_string(),
            acquired_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            quantity_micros: 100_000_000,
            remaining_micros: 50_000_000,
            cost_basis_micros: 1_000_000_000,
        };

        assert_eq!(lot.remaining_cost_basis(), 500_000_000);
    }

    #[test]
    fn test_holding_period_str() {
        assert_eq!("long_term".parse::<HoldingPeriod>().unwrap(), HoldingPeriod::LongTerm);
        assert_eq!("short_term".parse::<HoldingPeriod>().unwrap(), HoldingPeriod::ShortTerm);
        assert!(matches!(
            "long".parse::<HoldingPeriod>(),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(HoldingPeriod::LongTerm.to_string(), "long_term");
    }
}
