//! Domain models for finsync

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fallback category for payees the categorizer could not map
pub const CATEGORY_UNKNOWN: &str = "Others";

/// How a spend left the account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "BOLETO")]
    Boleto,
    #[serde(rename = "PIX")]
    Pix,
    #[serde(rename = "TED")]
    Ted,
    #[serde(rename = "CREDIT CARD")]
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boleto => "BOLETO",
            Self::Pix => "PIX",
            Self::Ted => "TED",
            Self::CreditCard => "CREDIT CARD",
        }
    }

    pub fn all() -> &'static [PaymentMethod] {
        &[Self::Boleto, Self::Pix, Self::Ted, Self::CreditCard]
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BOLETO" => Ok(Self::Boleto),
            "PIX" => Ok(Self::Pix),
            "TED" => Ok(Self::Ted),
            "CREDIT CARD" | "CREDIT_CARD" | "CREDITCARD" => Ok(Self::CreditCard),
            _ => Err(format!("Unknown payment method: {}", s)),
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A spend transaction ready to be written to a monthly table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Payee, rewritten during enrichment
    pub name: String,
    pub category: String,
    /// Always the absolute value of the spend
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub date: DateTime<FixedOffset>,
    pub card_last_digits: Option<String>,
}

impl Transaction {
    /// Amount scaled to integer cents (half-away-from-zero rounding)
    pub fn amount_cents(&self) -> i128 {
        let mut cents = (self.amount * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        cents.rescale(0);
        cents.mantissa()
    }

    /// Deterministic identity used to skip rows that were already synced.
    ///
    /// Built from name, amount in cents and the UTC timestamp truncated to the
    /// minute, so it survives a round-trip through the sheet store regardless
    /// of how the store renders offsets or seconds.
    pub fn dedup_key(&self) -> String {
        let minute = self
            .date
            .with_timezone(&Utc)
            .format("%Y-%m-%dT%H:%MZ")
            .to_string();

        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"|");
        hasher.update(self.amount_cents().to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(minute.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn has_category(&self) -> bool {
        !self.category.trim().is_empty()
    }
}

/// Registered company resolved from a CNPJ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Tax document, digits only
    pub id: String,
    pub name: String,
    pub trading_name: Option<String>,
}

impl Company {
    /// Name to show as payee: trading name, else legal name
    pub fn display_name(&self) -> Option<&str> {
        self.trading_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.name.trim()).filter(|n| !n.is_empty()))
    }
}

/// A per-month table in the sheet store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub in_trash: bool,
}

/// Money direction as reported by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Credit,
    Debit,
}

/// Counterparty of a bank transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    pub name: Option<String>,
    /// CPF or CNPJ, possibly punctuated
    pub document: Option<String>,
}

/// Bank-transfer metadata; its presence marks a bank account record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentData {
    pub payment_method: Option<PaymentMethod>,
    pub receiver: Option<Receiver>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCardData {
    pub card_number: Option<String>,
}

/// Provider-neutral record returned by a transaction source, before filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTransaction {
    pub id: String,
    pub account_id: String,
    pub description: String,
    /// Signed amount in the transaction currency
    pub amount: Decimal,
    pub amount_in_account_currency: Option<Decimal>,
    pub date: DateTime<FixedOffset>,
    pub category: Option<String>,
    pub direction: Direction,
    pub payment_data: Option<PaymentData>,
    pub credit_card: Option<CreditCardData>,
}

/// Summary of one month's upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthReport {
    pub title: String,
    pub table_id: String,
    /// Whether the table was created by this run
    pub created: bool,
    pub inserted: usize,
    /// Rows skipped because their dedup key was already present
    pub skipped: usize,
}

/// Informational summary of a successful sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub user_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Records returned by the transaction source
    pub fetched: usize,
    /// Records that survived filtering
    pub kept: usize,
    /// Payees rewritten from a CNPJ to a company name
    pub enriched: usize,
    pub months: Vec<MonthReport>,
}

impl SyncReport {
    pub fn inserted(&self) -> usize {
        self.months.iter().map(|m| m.inserted).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn tx(name: &str, amount: &str, date: &str) -> Transaction {
        Transaction {
            name: name.to_string(),
            category: CATEGORY_UNKNOWN.to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            payment_method: PaymentMethod::Pix,
            date: DateTime::parse_from_rfc3339(date).unwrap(),
            card_last_digits: None,
        }
    }

    #[test]
    fn test_payment_method_roundtrip() {
        for method in PaymentMethod::all() {
            assert_eq!(PaymentMethod::from_str(method.as_str()).unwrap(), *method);
        }
        assert_eq!(
            PaymentMethod::from_str("credit_card").unwrap(),
            PaymentMethod::CreditCard
        );
        assert!(PaymentMethod::from_str("TEF").is_err());
    }

    #[test]
    fn test_payment_method_serde_names() {
        let json = serde_json::to_string(&PaymentMethod::CreditCard).unwrap();
        assert_eq!(json, "\"CREDIT CARD\"");
        let parsed: PaymentMethod = serde_json::from_str("\"PIX\"").unwrap();
        assert_eq!(parsed, PaymentMethod::Pix);
    }

    #[test]
    fn test_amount_cents_rounds() {
        assert_eq!(tx("a", "50.00", "2025-01-10T10:00:00Z").amount_cents(), 5000);
        assert_eq!(tx("a", "19.999", "2025-01-10T10:00:00Z").amount_cents(), 2000);
        assert_eq!(tx("a", "0.5", "2025-01-10T10:00:00Z").amount_cents(), 50);
    }

    #[test]
    fn test_dedup_key_ignores_seconds_and_offset() {
        let a = tx("Padaria", "12.30", "2025-03-05T10:15:07-03:00");
        let b = tx("Padaria", "12.3", "2025-03-05T13:15:59Z");
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.dedup_key().len(), 64);
    }

    #[test]
    fn test_dedup_key_distinguishes_fields() {
        let base = tx("Padaria", "12.30", "2025-03-05T10:15:00-03:00");
        let other_name = tx("Mercado", "12.30", "2025-03-05T10:15:00-03:00");
        let other_amount = tx("Padaria", "12.31", "2025-03-05T10:15:00-03:00");
        let other_minute = tx("Padaria", "12.30", "2025-03-05T10:16:00-03:00");

        assert_ne!(base.dedup_key(), other_name.dedup_key());
        assert_ne!(base.dedup_key(), other_amount.dedup_key());
        assert_ne!(base.dedup_key(), other_minute.dedup_key());
    }

    #[test]
    fn test_company_display_name() {
        let company = Company {
            id: "12345678000190".into(),
            name: "PADARIA SAO JOAO LTDA".into(),
            trading_name: Some("Padaria São João".into()),
        };
        assert_eq!(company.display_name(), Some("Padaria São João"));

        let no_trading = Company {
            trading_name: Some("  ".into()),
            ..company.clone()
        };
        assert_eq!(no_trading.display_name(), Some("PADARIA SAO JOAO LTDA"));

        let empty = Company {
            id: "1".into(),
            name: String::new(),
            trading_name: None,
        };
        assert_eq!(empty.display_name(), None);
    }

    #[test]
    fn test_direction_serde() {
        let d: Direction = serde_json::from_str("\"CREDIT\"").unwrap();
        assert_eq!(d, Direction::Credit);
    }
}
