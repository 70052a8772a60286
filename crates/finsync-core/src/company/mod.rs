//! Company registry lookups used to turn a CNPJ payee into a readable name

mod brasilapi;

pub use brasilapi::BrasilApiClient;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Company;

#[async_trait]
pub trait CompanyLookup: Send + Sync {
    /// Company registered under a 14-digit CNPJ
    async fn get_company_by_id(&self, tax_id: &str) -> Result<Company>;
}
