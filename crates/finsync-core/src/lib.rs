//! Finsync Core Library
//!
//! Pulls a user's bank and credit-card transactions from an open-banking
//! aggregator and upserts them into per-month tables of a workspace service:
//! - Filtering and routing of aggregator records (bank account vs. card)
//! - CNPJ payee enrichment through a company registry
//! - Single-prompt spend categorization with a pluggable chat backend
//! - Month partitioning and idempotent, dedup-keyed upserts
//! - Structured fan-out with timeouts and aggregated failures
//! - Provider adapters (Pluggy, BrasilAPI, OpenAI-compatible, Notion)
//! - Layered TOML + environment configuration

pub mod ai;
pub mod classify;
pub mod company;
pub mod config;
pub mod document;
pub mod error;
pub mod fanout;
pub mod http;
pub mod models;
pub mod partition;
pub mod prompts;
pub mod settings;
pub mod sheet;
pub mod source;
pub mod sync;

/// Test utilities: in-memory collaborators and a mock provider server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIClient, Categorizer, MockBackend, OpenAICompatibleBackend};
pub use company::{BrasilApiClient, CompanyLookup};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use fanout::{FanOut, FanOutResult};
pub use models::{
    Company, MonthReport, PaymentMethod, SourceTransaction, SyncReport, Table, Transaction,
    CATEGORY_UNKNOWN,
};
pub use partition::{DateRange, MonthKey};
pub use settings::{
    Cipher, FileSettingsProvider, PlaintextCipher, SettingsProvider, SheetCredentials,
    SourceCredentials, UserSettings,
};
pub use sheet::{NotionClient, SheetStore};
pub use source::{PluggyClient, TransactionSource};
pub use sync::{
    Collaborators, Stage, SyncAllOutcome, SyncOptions, SyncOrchestrator, UserFailure,
};
