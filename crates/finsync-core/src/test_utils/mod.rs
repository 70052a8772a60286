//! Test utilities for finsync-core
//!
//! In-memory collaborators for orchestrator tests and a mock HTTP server
//! standing in for the provider APIs.

mod mock_server;

pub use mock_server::{pluggy_transaction, MockApiServer, MOCK_API_KEY, REJECTED_SECRET};

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::ai::{AIClient, Categorizer, MockBackend};
use crate::company::CompanyLookup;
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::models::{
    Company, CreditCardData, Direction, PaymentData, PaymentMethod, Receiver, SourceTransaction,
    Table, Transaction,
};
use crate::settings::{SettingsProvider, SheetCredentials, SourceCredentials, UserSettings};
use crate::sheet::SheetStore;
use crate::source::TransactionSource;
use crate::sync::{Collaborators, SyncOptions, SyncOrchestrator};

/// `-03:00`, the default sync offset
pub fn brt() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap()
}

pub fn vocabulary() -> Vec<String> {
    ["Food", "Groceries", "Transport", "Health", "Subscriptions"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A user with one connected account per id in `accounts`
pub fn sample_user(user_id: &str, accounts: &[&str]) -> UserSettings {
    UserSettings {
        user_id: user_id.to_string(),
        email: Some(format!("{}@example.com", user_id)),
        source: SourceCredentials {
            client_id: format!("{}-client", user_id),
            client_secret: format!("{}-secret", user_id),
            account_ids: accounts.iter().map(|a| a.to_string()).collect(),
        },
        sheet: SheetCredentials {
            token: format!("{}-token", user_id),
            page_id: format!("{}-page", user_id),
        },
    }
}

/// A debit bank transfer; `amount` is signed as the aggregator reports it
pub fn bank_record(
    id: &str,
    description: &str,
    amount: &str,
    date: &str,
    method: PaymentMethod,
) -> SourceTransaction {
    SourceTransaction {
        id: id.to_string(),
        account_id: "acc-1".to_string(),
        description: description.to_string(),
        amount: Decimal::from_str(amount).unwrap(),
        amount_in_account_currency: None,
        date: DateTime::parse_from_rfc3339(date).unwrap(),
        category: None,
        direction: Direction::Debit,
        payment_data: Some(PaymentData {
            payment_method: Some(method),
            receiver: None,
        }),
        credit_card: None,
    }
}

/// A bank transfer without description, paid to a tax document
pub fn transfer_to_document(id: &str, document: &str, amount: &str, date: &str) -> SourceTransaction {
    let mut record = bank_record(id, "", amount, date, PaymentMethod::Pix);
    record.payment_data = Some(PaymentData {
        payment_method: Some(PaymentMethod::Pix),
        receiver: Some(Receiver {
            name: None,
            document: Some(document.to_string()),
        }),
    });
    record
}

/// A credit card purchase
pub fn card_record(id: &str, description: &str, amount: &str, date: &str) -> SourceTransaction {
    SourceTransaction {
        id: id.to_string(),
        account_id: "card-1".to_string(),
        description: description.to_string(),
        amount: Decimal::from_str(amount).unwrap(),
        amount_in_account_currency: None,
        date: DateTime::parse_from_rfc3339(date).unwrap(),
        category: None,
        direction: Direction::Debit,
        payment_data: None,
        credit_card: Some(CreditCardData {
            card_number: Some("4321".to_string()),
        }),
    }
}

/// A kept transaction as it would be written to a table
pub fn transaction(name: &str, amount: &str, date: &str) -> Transaction {
    Transaction {
        name: name.to_string(),
        category: "Food".to_string(),
        amount: Decimal::from_str(amount).unwrap(),
        payment_method: PaymentMethod::Pix,
        date: DateTime::parse_from_rfc3339(date).unwrap(),
        card_last_digits: None,
    }
}

/// Settings for a fixed set of users
#[derive(Default)]
pub struct StaticSettings {
    users: Vec<UserSettings>,
}

impl StaticSettings {
    pub fn new(users: Vec<UserSettings>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn get_settings(&self, user_id: &str) -> Result<UserSettings> {
        self.users
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("user {}", user_id)))
    }

    async fn list_settings(&self) -> Result<Vec<UserSettings>> {
        Ok(self.users.clone())
    }
}

/// Transaction source serving records per account
#[derive(Default)]
pub struct InMemorySource {
    records: Mutex<HashMap<String, Vec<SourceTransaction>>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `records` for `account_id` (the records' own account id is overwritten)
    pub fn add(&self, account_id: &str, records: Vec<SourceTransaction>) {
        let records = records.into_iter().map(|mut r| {
            r.account_id = account_id.to_string();
            r
        });
        self.records
            .lock()
            .unwrap()
            .entry(account_id.to_string())
            .or_default()
            .extend(records);
    }

    /// Make every fetch of `account_id` fail
    pub fn fail_account(&self, account_id: &str) {
        self.failing.lock().unwrap().insert(account_id.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionSource for InMemorySource {
    async fn list_transactions_by_user_id(
        &self,
        user: &UserSettings,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SourceTransaction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing.lock().unwrap().clone();
        let records = self.records.lock().unwrap().clone();

        let result = FanOut::default()
            .run_all(user.source.account_ids.clone(), |account_id| {
                let failed = failing.contains(&account_id);
                let records = records.get(&account_id).cloned().unwrap_or_default();
                async move {
                    if failed {
                        return Err(Error::upstream(format!("account {} unavailable", account_id)));
                    }
                    Ok(records
                        .into_iter()
                        .filter(|r| {
                            let day = r.date.date_naive();
                            day >= from && day <= to
                        })
                        .collect::<Vec<_>>())
                }
            })
            .await;

        Ok(result.into_result()?.into_iter().flatten().collect())
    }
}

/// Company registry keyed by CNPJ digits
#[derive(Default)]
pub struct InMemoryCompanies {
    companies: Mutex<HashMap<String, Company>>,
    failing: bool,
    calls: AtomicUsize,
}

impl InMemoryCompanies {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose every lookup fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn add(&self, cnpj: &str, name: &str, trading_name: Option<&str>) {
        self.companies.lock().unwrap().insert(
            cnpj.to_string(),
            Company {
                id: cnpj.to_string(),
                name: name.to_string(),
                trading_name: trading_name.map(str::to_string),
            },
        );
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompanyLookup for InMemoryCompanies {
    async fn get_company_by_id(&self, tax_id: &str) -> Result<Company> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(Error::upstream("company registry unavailable"));
        }
        self.companies
            .lock()
            .unwrap()
            .get(tax_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("company {}", tax_id)))
    }
}

#[derive(Default)]
struct SheetState {
    tables: Vec<Table>,
    rows: HashMap<String, Vec<Transaction>>,
    /// Categories each table was created with
    options: HashMap<String, Vec<String>>,
}

/// Sheet store keeping tables and rows in memory
#[derive(Default)]
pub struct InMemorySheet {
    state: Mutex<SheetState>,
    failing_rows: Mutex<HashSet<String>>,
    failing_titles: Mutex<HashSet<String>>,
    inserts: AtomicUsize,
    creates: AtomicUsize,
}

impl InMemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table holding `rows`; returns its id
    pub fn add_table(&self, title: &str, rows: Vec<Transaction>) -> String {
        let mut state = self.state.lock().unwrap();
        let id = format!("table-{}", state.tables.len() + 1);
        state.tables.push(Table {
            id: id.clone(),
            title: title.to_string(),
            archived: false,
            in_trash: false,
        });
        state.rows.insert(id.clone(), rows);
        id
    }

    /// Make inserts of transactions named `name` fail
    pub fn fail_inserts_named(&self, name: &str) {
        self.failing_rows.lock().unwrap().insert(name.to_string());
    }

    /// Make creating the table titled `title` fail
    pub fn fail_create(&self, title: &str) {
        self.failing_titles.lock().unwrap().insert(title.to_string());
    }

    pub fn tables(&self) -> Vec<Table> {
        self.state.lock().unwrap().tables.clone()
    }

    /// Rows of the table titled `title` (empty when missing)
    pub fn rows(&self, title: &str) -> Vec<Transaction> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .iter()
            .find(|t| t.title == title)
            .and_then(|t| state.rows.get(&t.id))
            .cloned()
            .unwrap_or_default()
    }

    /// Categories the table titled `title` was created with
    pub fn table_options(&self, title: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        let table = state.tables.iter().find(|t| t.title == title)?;
        state.options.get(&table.id).cloned()
    }

    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetStore for InMemorySheet {
    async fn list_tables(&self, _user: &UserSettings) -> Result<Vec<Table>> {
        Ok(self.tables())
    }

    async fn create_transactions_table(
        &self,
        _user: &UserSettings,
        title: &str,
        categories: &[String],
    ) -> Result<Table> {
        if self.failing_titles.lock().unwrap().contains(title) {
            return Err(Error::upstream(format!("cannot create {}", title)));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = self.add_table(title, Vec::new());
        let mut state = self.state.lock().unwrap();
        state.options.insert(id.clone(), categories.to_vec());
        Ok(Table {
            id,
            title: title.to_string(),
            archived: false,
            in_trash: false,
        })
    }

    async fn list_transactions(
        &self,
        _user: &UserSettings,
        table_id: &str,
    ) -> Result<Vec<Transaction>> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(table_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("table {}", table_id)))
    }

    async fn insert_transaction(
        &self,
        _user: &UserSettings,
        table_id: &str,
        transaction: &Transaction,
    ) -> Result<()> {
        if self.failing_rows.lock().unwrap().contains(&transaction.name) {
            return Err(Error::upstream(format!("rejected {}", transaction.name)));
        }
        let mut state = self.state.lock().unwrap();
        let rows = state
            .rows
            .get_mut(table_id)
            .ok_or_else(|| Error::not_found(format!("table {}", table_id)))?;
        rows.push(transaction.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An orchestrator wired to in-memory collaborators, with handles to each
pub struct TestHarness {
    pub settings: Arc<StaticSettings>,
    pub source: Arc<InMemorySource>,
    pub companies: Arc<InMemoryCompanies>,
    pub categorizer: MockBackend,
    pub sheet: Arc<InMemorySheet>,
    pub orchestrator: SyncOrchestrator,
}

impl TestHarness {
    pub fn new(users: Vec<UserSettings>) -> Self {
        Self::with_parts(users, InMemoryCompanies::new(), MockBackend::new())
    }

    pub fn with_parts(
        users: Vec<UserSettings>,
        companies: InMemoryCompanies,
        categorizer: MockBackend,
    ) -> Self {
        let settings = Arc::new(StaticSettings::new(users));
        let source = Arc::new(InMemorySource::new());
        let companies = Arc::new(companies);
        let sheet = Arc::new(InMemorySheet::new());

        let client: Arc<dyn Categorizer> = Arc::new(AIClient::Mock(categorizer.clone()));
        let orchestrator = SyncOrchestrator::new(
            Collaborators {
                settings: settings.clone(),
                source: source.clone(),
                companies: companies.clone(),
                categorizer: client,
                sheet: sheet.clone(),
            },
            SyncOptions::new(brt(), vocabulary()),
        )
        // Mid-February 2025, so the default range is January 2025
        .with_now(Utc.with_ymd_and_hms(2025, 2, 15, 12, 0, 0).unwrap());

        Self {
            settings,
            source,
            companies,
            categorizer,
            sheet,
            orchestrator,
        }
    }
}
