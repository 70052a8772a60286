//! Sync orchestration
//!
//! One run per user: validate the range, fetch and classify the user's
//! records, enrich CNPJ payees, categorize, then upsert each month into its
//! table. No state is kept between stages; re-running a range is safe because
//! rows are only inserted when their dedup key is absent.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::ai::parsing::parse_category_map;
use crate::ai::Categorizer;
use crate::classify::classify_all;
use crate::company::CompanyLookup;
use crate::config::Config;
use crate::document::{clean_document, is_cnpj};
use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::models::{Company, MonthReport, SyncReport, Transaction};
use crate::partition::{find_table_by_title, partition_by_month, DateRange};
use crate::prompts::{apply_categories, categorization_prompt, distinct_names};
use crate::settings::{SettingsProvider, UserSettings};
use crate::sheet::SheetStore;
use crate::source::TransactionSource;

/// Pipeline stage, recorded on the run span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Fetching,
    Enriching,
    Categorizing,
    Upserting,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Fetching => "fetching",
            Self::Enriching => "enriching",
            Self::Categorizing => "categorizing",
            Self::Upserting => "upserting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

fn enter(stage: Stage) {
    Span::current().record("stage", stage.as_str());
    debug!(stage = stage.as_str(), "Entering stage");
}

/// Run settings derived from configuration
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub timezone: FixedOffset,
    /// Category vocabulary offered to the categorizer and the tables
    pub categories: Vec<String>,
    /// Known payee -> category hints
    pub hints: BTreeMap<String, String>,
    /// Limits for every per-item phase
    pub fanout: FanOut,
    /// Upper bound for one user's run in `execute_all`
    pub run_timeout: Duration,
}

impl SyncOptions {
    pub fn new(timezone: FixedOffset, categories: Vec<String>) -> Self {
        Self {
            timezone,
            categories,
            hints: BTreeMap::new(),
            fanout: FanOut::default(),
            run_timeout: Duration::from_secs(900),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            timezone: config.sync.timezone()?,
            categories: config.categories.vocabulary.clone(),
            hints: config.categories.hints.clone(),
            fanout: FanOut::new(config.sync.request_timeout(), config.sync.max_concurrency),
            run_timeout: config.sync.run_timeout(),
        })
    }
}

/// Every collaborator a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsProvider>,
    pub source: Arc<dyn TransactionSource>,
    pub companies: Arc<dyn CompanyLookup>,
    pub categorizer: Arc<dyn Categorizer>,
    pub sheet: Arc<dyn SheetStore>,
}

/// A user whose run failed in `execute_all`
#[derive(Debug)]
pub struct UserFailure {
    pub user_id: String,
    pub error: Error,
}

/// Result of syncing every user
#[derive(Debug, Default)]
pub struct SyncAllOutcome {
    pub reports: Vec<SyncReport>,
    pub failures: Vec<UserFailure>,
}

impl SyncAllOutcome {
    /// Fail with every user's error joined, each prefixed with the user id
    pub fn into_result(self) -> Result<Vec<SyncReport>> {
        let errors = self
            .failures
            .into_iter()
            .map(|f| f.error.context(format!("user {}", f.user_id)))
            .collect();
        match Error::aggregate(errors) {
            Some(err) => Err(err),
            None => Ok(self.reports),
        }
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    settings: Arc<dyn SettingsProvider>,
    source: Arc<dyn TransactionSource>,
    companies: Arc<dyn CompanyLookup>,
    categorizer: Arc<dyn Categorizer>,
    sheet: Arc<dyn SheetStore>,
    options: SyncOptions,
    /// Fixed "now" for default ranges; the wall clock when unset
    now: Option<DateTime<Utc>>,
}

impl SyncOrchestrator {
    pub fn new(collaborators: Collaborators, options: SyncOptions) -> Self {
        Self {
            settings: collaborators.settings,
            source: collaborators.source,
            companies: collaborators.companies,
            categorizer: collaborators.categorizer,
            sheet: collaborators.sheet,
            options,
            now: None,
        }
    }

    /// Pin the clock used to resolve omitted dates
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    /// Sync one user's transactions for `[start, end]`.
    ///
    /// Omitted dates default to the previous calendar month. Every month of
    /// the range is attempted; their failures come back joined.
    pub async fn execute(
        &self,
        user_id: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<SyncReport> {
        let span = info_span!("sync", user_id, stage = field::Empty);
        self.execute_in_span(user_id, start, end)
            .instrument(span)
            .await
    }

    async fn execute_in_span(
        &self,
        user_id: &str,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<SyncReport> {
        enter(Stage::Validating);
        let prepared = match self.validate(user_id, start, end) {
            Ok(range) => self
                .settings
                .get_settings(user_id)
                .await
                .map(|user| (user, range)),
            Err(e) => Err(e),
        };
        match prepared {
            Ok((user, range)) => self.run(user, range).await,
            Err(e) => {
                enter(Stage::Failed);
                warn!(error = %e, "Sync rejected");
                Err(e)
            }
        }
    }

    /// Sync every user concurrently.
    ///
    /// An invalid range fails up front; otherwise each user's outcome is
    /// reported separately and one failure never stops the others.
    pub async fn execute_all(
        &self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<SyncAllOutcome> {
        let range = DateRange::resolve(start, end, self.options.timezone, self.now())?;
        let users = self.settings.list_settings().await?;

        info!(
            users = users.len(),
            start = %range.start_date(),
            end = %range.end_date(),
            "Syncing all users"
        );

        let per_user = self.options.fanout.with_timeout(self.options.run_timeout);
        let result = self
            .options
            .fanout
            .without_timeout()
            .run_all(users, |user| {
                let this = self.clone();
                async move {
                    let user_id = user.user_id.clone();
                    let span = info_span!("sync", user_id = %user_id, stage = field::Empty);
                    let outcome = per_user.call(this.run(user, range)).instrument(span).await;
                    Ok::<_, Error>((user_id, outcome))
                }
            })
            .await;

        let mut outcome = SyncAllOutcome::default();
        for (user_id, run) in result.ok {
            match run {
                Ok(report) => outcome.reports.push(report),
                Err(error) => outcome.failures.push(UserFailure { user_id, error }),
            }
        }
        // Panicked runs lose their user id
        for error in result.errors {
            outcome.failures.push(UserFailure {
                user_id: "unknown".to_string(),
                error,
            });
        }

        info!(
            succeeded = outcome.reports.len(),
            failed = outcome.failures.len(),
            "Finished syncing all users"
        );
        Ok(outcome)
    }

    fn validate(&self, user_id: &str, start: Option<&str>, end: Option<&str>) -> Result<DateRange> {
        if user_id.trim().is_empty() {
            return Err(Error::validation("user id is required"));
        }
        DateRange::resolve(start, end, self.options.timezone, self.now())
    }

    async fn run(&self, user: UserSettings, range: DateRange) -> Result<SyncReport> {
        let result = self.run_stages(user, range).await;
        match &result {
            Ok(report) => {
                enter(Stage::Done);
                info!(
                    inserted = report.inserted(),
                    months = report.months.len(),
                    "Sync finished"
                );
            }
            Err(e) => {
                enter(Stage::Failed);
                error!(error = %e, "Sync failed");
            }
        }
        result
    }

    async fn run_stages(&self, user: UserSettings, range: DateRange) -> Result<SyncReport> {
        let tz = self.options.timezone;
        let user = Arc::new(user);

        info!(
            start = %range.start.to_rfc3339(),
            end = %range.end.to_rfc3339(),
            "Starting sync"
        );

        enter(Stage::Fetching);
        let records = self
            .source
            .list_transactions_by_user_id(&user, range.start_date(), range.end_date())
            .await?;
        let fetched = records.len();

        let (mut transactions, stats) = classify_all(&records, tz);
        info!(
            fetched,
            kept = transactions.len(),
            skipped = stats.skipped,
            dropped = stats.dropped,
            "Fetched transactions"
        );
        let kept = transactions.len();

        enter(Stage::Enriching);
        let enriched = self.enrich(&mut transactions).await;

        enter(Stage::Categorizing);
        self.categorize(&mut transactions).await?;

        enter(Stage::Upserting);
        let partition = partition_by_month(transactions, &range, tz);
        if !partition.outside.is_empty() {
            warn!(
                count = partition.outside.len(),
                "Transactions dated outside the range were not written"
            );
        }

        let mut months = Vec::new();
        let mut errors = Vec::new();

        // Months run one after another; rows within a month run concurrently
        for bucket in partition.buckets {
            let title = bucket.title();
            if bucket.transactions.is_empty() {
                debug!(month = %title, "No transactions for month");
                continue;
            }

            match self.upsert_month(&user, &title, bucket.transactions).await {
                Ok(report) => {
                    info!(
                        month = %title,
                        created = report.created,
                        inserted = report.inserted,
                        skipped = report.skipped,
                        "Month synced"
                    );
                    months.push(report);
                }
                Err(e) => {
                    warn!(month = %title, error = %e, "Month failed");
                    errors.push(e.context(format!("month {}", title)));
                }
            }
        }

        if let Some(err) = Error::aggregate(errors) {
            return Err(err);
        }

        Ok(SyncReport {
            user_id: user.user_id.clone(),
            start: range.start_date(),
            end: range.end_date(),
            fetched,
            kept,
            enriched,
            months,
        })
    }

    /// Rewrite CNPJ payees to company names; lookup failures keep the CNPJ.
    ///
    /// Returns how many transactions were renamed.
    async fn enrich(&self, transactions: &mut [Transaction]) -> usize {
        let cnpjs: HashSet<String> = transactions
            .iter()
            .filter(|tx| is_cnpj(&tx.name))
            .map(|tx| clean_document(&tx.name))
            .collect();

        if cnpjs.is_empty() {
            return 0;
        }
        debug!(count = cnpjs.len(), "Looking up companies");

        let result = self
            .options
            .fanout
            .run_all(cnpjs, |cnpj| {
                let companies = Arc::clone(&self.companies);
                async move {
                    companies
                        .get_company_by_id(&cnpj)
                        .await
                        .map(|company| (cnpj.clone(), company))
                        .map_err(|e| e.context(format!("company {}", cnpj)))
                }
            })
            .await;

        for e in &result.errors {
            warn!(error = %e, "Company lookup failed, keeping document as payee");
        }
        let found: HashMap<String, Company> = result.ok.into_iter().collect();

        let mut enriched = 0;
        for tx in transactions.iter_mut().filter(|tx| is_cnpj(&tx.name)) {
            let Some(name) = found
                .get(&clean_document(&tx.name))
                .and_then(Company::display_name)
            else {
                continue;
            };
            tx.name = name.to_string();
            enriched += 1;
        }

        enriched
    }

    /// One categorizer call for every distinct payee
    async fn categorize(&self, transactions: &mut [Transaction]) -> Result<()> {
        if transactions.is_empty() {
            debug!("Nothing to categorize");
            return Ok(());
        }

        let names = distinct_names(transactions);
        if names.is_empty() {
            debug!("No payee names to categorize");
            apply_categories(transactions, &HashMap::new(), &self.options.categories);
            return Ok(());
        }
        let prompt = categorization_prompt(&names, &self.options.categories, &self.options.hints)?;

        debug!(
            names = names.len(),
            model = self.categorizer.model(),
            "Requesting categories"
        );
        let response = self
            .options
            .fanout
            .call(self.categorizer.create_chat_completion(&prompt))
            .await?;

        let categories = parse_category_map(&response)?;
        apply_categories(transactions, &categories, &self.options.categories);
        Ok(())
    }

    /// Insert the month's new rows, creating its table when missing
    async fn upsert_month(
        &self,
        user: &Arc<UserSettings>,
        title: &str,
        transactions: Vec<Transaction>,
    ) -> Result<MonthReport> {
        let tables = self.sheet.list_tables(user).await?;

        let (table, created, mut seen) = match find_table_by_title(&tables, title) {
            Some(table) => {
                let rows = self.sheet.list_transactions(user, &table.id).await?;
                let keys: HashSet<String> = rows.iter().map(Transaction::dedup_key).collect();
                debug!(month = title, existing = keys.len(), "Reusing table");
                (table.clone(), false, keys)
            }
            None => {
                let table = self
                    .sheet
                    .create_transactions_table(user, title, &self.options.categories)
                    .await?;
                info!(month = title, table_id = %table.id, "Created table");
                (table, true, HashSet::new())
            }
        };

        // Also drops duplicates within the batch
        let total = transactions.len();
        let pending: Vec<Transaction> = transactions
            .into_iter()
            .filter(|tx| seen.insert(tx.dedup_key()))
            .collect();
        let skipped = total - pending.len();

        let table_id: Arc<str> = Arc::from(table.id.as_str());
        let result = self
            .options
            .fanout
            .run_all(pending, |tx| {
                let sheet = Arc::clone(&self.sheet);
                let user = Arc::clone(user);
                let table_id = Arc::clone(&table_id);
                async move {
                    sheet
                        .insert_transaction(&user, &table_id, &tx)
                        .await
                        .map_err(|e| e.context(format!("insert {:?}", tx.name)))
                }
            })
            .await;

        let inserted = result.ok.len();
        if let Some(err) = Error::aggregate(result.errors) {
            warn!(month = title, inserted, "Some rows failed to insert");
            return Err(err);
        }

        Ok(MonthReport {
            title: title.to_string(),
            table_id: table.id,
            created,
            inserted,
            skipped,
        })
    }
}
