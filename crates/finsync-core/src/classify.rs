//! Filtering and routing of raw source records
//!
//! Only real spend survives: investment movements, inbound credits, card bill
//! payments and transfers between the user's own accounts are dropped. The
//! rest is routed by account kind and turned into a [`Transaction`].

use chrono::FixedOffset;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::document;
use crate::models::{
    CreditCardData, Direction, PaymentData, PaymentMethod, SourceTransaction, Transaction,
    CATEGORY_UNKNOWN,
};

const INVESTMENTS_CATEGORY: &str = "Investments";
const INVESTMENT_DESCRIPTION_MARKER: &str = "Aplicação";
const CARD_BILL_PAYMENT: &str = "Pagamento de fatura";
const SAME_PERSON_TRANSFER: &str = "Same person transfer";

/// Why a record was excluded from the sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Investment,
    Credit,
    CardBillPayment,
    SamePersonTransfer,
}

/// Account-kind specific data, resolved from payment metadata presence
#[derive(Debug, Clone, PartialEq)]
pub enum AccountDetails<'a> {
    BankAccount(&'a PaymentData),
    CreditCard(Option<&'a CreditCardData>),
}

impl<'a> AccountDetails<'a> {
    pub fn of(record: &'a SourceTransaction) -> Self {
        match &record.payment_data {
            Some(payment) => Self::BankAccount(payment),
            None => Self::CreditCard(record.credit_card.as_ref()),
        }
    }
}

/// Outcome of classifying one record
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Kept(Transaction),
    Skipped(SkipReason),
    /// Bank record without a payment method or a usable payee
    Dropped,
}

pub fn skip_reason(record: &SourceTransaction) -> Option<SkipReason> {
    let category = record.category.as_deref();

    if category == Some(INVESTMENTS_CATEGORY)
        || record.description.contains(INVESTMENT_DESCRIPTION_MARKER)
    {
        return Some(SkipReason::Investment);
    }
    if record.direction == Direction::Credit {
        return Some(SkipReason::Credit);
    }
    if record.description == CARD_BILL_PAYMENT {
        return Some(SkipReason::CardBillPayment);
    }
    if category == Some(SAME_PERSON_TRANSFER) {
        return Some(SkipReason::SamePersonTransfer);
    }

    None
}

/// Absolute spend, preferring the account-currency amount when reported
pub fn spend_amount(record: &SourceTransaction) -> Decimal {
    record
        .amount_in_account_currency
        .filter(|a| !a.is_zero())
        .unwrap_or(record.amount)
        .abs()
}

/// Classify a single record
pub fn classify(record: &SourceTransaction, tz: FixedOffset) -> Classified {
    if let Some(reason) = skip_reason(record) {
        return Classified::Skipped(reason);
    }

    let (name, payment_method, card_last_digits) = match AccountDetails::of(record) {
        AccountDetails::BankAccount(payment) => {
            let Some(method) = payment.payment_method else {
                warn!(
                    transaction_id = %record.id,
                    account_id = %record.account_id,
                    "Bank transaction without payment method, dropping"
                );
                return Classified::Dropped;
            };
            let Some(name) = bank_payee(record, payment) else {
                return Classified::Dropped;
            };
            (name, method, None)
        }
        AccountDetails::CreditCard(card) => (
            record.description.clone(),
            PaymentMethod::CreditCard,
            card.and_then(|c| c.card_number.clone()),
        ),
    };

    Classified::Kept(Transaction {
        name,
        category: record
            .category
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| CATEGORY_UNKNOWN.to_string()),
        amount: spend_amount(record),
        payment_method,
        date: record.date.with_timezone(&tz),
        card_last_digits,
    })
}

/// Description, else receiver name, else masked receiver document.
///
/// The payee may come out empty. `None` means the receiver document could not
/// be masked, which drops the record.
fn bank_payee(record: &SourceTransaction, payment: &PaymentData) -> Option<String> {
    if !record.description.is_empty() {
        return Some(record.description.clone());
    }

    let Some(receiver) = payment.receiver.as_ref() else {
        return Some(String::new());
    };

    if let Some(name) = receiver.name.as_ref() {
        return Some(name.clone());
    }

    let Some(doc) = receiver.document.as_deref() else {
        return Some(String::new());
    };
    match document::mask_document(doc) {
        Ok(masked) => Some(masked),
        Err(e) => {
            warn!(
                transaction_id = %record.id,
                account_id = %record.account_id,
                error = %e,
                "Receiver document cannot be masked, dropping"
            );
            None
        }
    }
}

/// Counters for one classification pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassifyStats {
    pub skipped: usize,
    pub dropped: usize,
}

/// Classify every record; a bad record never affects its siblings
pub fn classify_all(
    records: &[SourceTransaction],
    tz: FixedOffset,
) -> (Vec<Transaction>, ClassifyStats) {
    let mut kept = Vec::new();
    let mut stats = ClassifyStats::default();

    for record in records {
        match classify(record, tz) {
            Classified::Kept(tx) => kept.push(tx),
            Classified::Skipped(reason) => {
                debug!(transaction_id = %record.id, ?reason, "Skipping transaction");
                stats.skipped += 1;
            }
            Classified::Dropped => stats.dropped += 1,
        }
    }

    (kept, stats)
}
