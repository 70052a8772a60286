//! Transaction sources
//!
//! A source lists a user's raw records across every connected account.
//! Filtering and routing happen later in the pipeline (see `classify`).

mod pluggy;

pub use pluggy::PluggyClient;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::SourceTransaction;
use crate::settings::UserSettings;

#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Records dated within `[from, to]` (inclusive) from every account.
    ///
    /// Account fetches run concurrently; failures are joined after every
    /// account has been attempted.
    async fn list_transactions_by_user_id(
        &self,
        user: &UserSettings,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SourceTransaction>>;
}
