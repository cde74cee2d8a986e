use uuid::Uuid;

/// Prefixes make IDs self-describing in logs and CLI output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Account,
    Security,
    Transaction,
    Lot,
    LotDisposition,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "acct",
            Self::Security => "sec",
            Self::Transaction => "txn",
            Self::Lot => "lot",
            Self::LotDisposition => "disp",
        }
    }
}

pub fn new_id(prefix: IdPrefix) -> String {
    format!("{}_{}", prefix.as_str(), Uuid::new_v4().simple())
}
