//! Sheet stores: per-month tables of transactions in a workspace service

mod notion;

pub use notion::NotionClient;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Table, Transaction};
use crate::settings::UserSettings;

/// Tables and rows of one user's workspace.
///
/// Listing methods consume the store's pagination until exhausted.
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// Every table under the user's parent page
    async fn list_tables(&self, user: &UserSettings) -> Result<Vec<Table>>;

    /// Create a transactions table whose category column offers `categories`
    async fn create_transactions_table(
        &self,
        user: &UserSettings,
        title: &str,
        categories: &[String],
    ) -> Result<Table>;

    async fn list_transactions(&self, user: &UserSettings, table_id: &str)
        -> Result<Vec<Transaction>>;

    async fn insert_transaction(
        &self,
        user: &UserSettings,
        table_id: &str,
        transaction: &Transaction,
    ) -> Result<()>;
}
