//! BrasilAPI CNPJ registry

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::document::{clean_document, CNPJ_LEN};
use crate::error::{Error, Result};
use crate::http;
use crate::models::Company;

use super::CompanyLookup;

#[derive(Clone)]
pub struct BrasilApiClient {
    http_client: Client,
    base_url: String,
}

impl BrasilApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http_client: http::client(timeout)?,
            base_url: http::trim_base_url(base_url),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CnpjResponse {
    cnpj: String,
    razao_social: String,
    nome_fantasia: Option<String>,
}

impl From<CnpjResponse> for Company {
    fn from(raw: CnpjResponse) -> Self {
        Company {
            id: raw.cnpj,
            name: raw.razao_social,
            // The registry sends "" for companies without a trading name
            trading_name: raw.nome_fantasia.filter(|n| !n.trim().is_empty()),
        }
    }
}

#[async_trait]
impl CompanyLookup for BrasilApiClient {
    async fn get_company_by_id(&self, tax_id: &str) -> Result<Company> {
        let cnpj = clean_document(tax_id);
        if cnpj.len() != CNPJ_LEN {
            return Err(Error::validation(format!("not a CNPJ: {}", tax_id)));
        }

        debug!(cnpj = %cnpj, "Looking up company");

        let response = self
            .http_client
            .get(format!("{}/api/cnpj/v1/{}", self.base_url, cnpj))
            .send()
            .await?;
        let response = http::check_status(response, "company lookup").await?;
        let raw: CnpjResponse = response.json().await?;

        Ok(raw.into())
    }
}
