//! Pluggy open-banking aggregator
//!
//! Authenticates with the user's client credentials, then pages through
//! `/transactions` for each connected account in parallel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fanout::FanOut;
use crate::http;
use crate::models::{
    CreditCardData, Direction, PaymentData, PaymentMethod, Receiver, SourceTransaction,
};
use crate::settings::UserSettings;

use super::TransactionSource;

/// Largest page the API serves
const PAGE_SIZE: u32 = 500;

/// Default budget for one account's pagination, in request timeouts
const ACCOUNT_BUDGET_REQUESTS: u32 = 20;

#[derive(Clone)]
pub struct PluggyClient {
    http_client: Client,
    base_url: String,
    fanout: FanOut,
    account_timeout: Duration,
}

impl PluggyClient {
    /// The fan-out timeout bounds each HTTP request; an account's whole
    /// pagination gets a larger budget (see [`Self::with_account_timeout`]).
    pub fn new(base_url: &str, fanout: FanOut) -> Result<Self> {
        let timeout = fanout.timeout().unwrap_or(http::DEFAULT_TIMEOUT);
        Ok(Self {
            http_client: http::client(timeout)?,
            base_url: http::trim_base_url(base_url),
            fanout,
            account_timeout: timeout * ACCOUNT_BUDGET_REQUESTS,
        })
    }

    pub fn with_account_timeout(self, account_timeout: Duration) -> Self {
        Self {
            account_timeout,
            ..self
        }
    }

    pub fn account_timeout(&self) -> Duration {
        self.account_timeout
    }

    /// Exchange client credentials for an API key
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<String> {
        let request = AuthRequest {
            client_id,
            client_secret,
        };
        let response = self
            .http_client
            .post(format!("{}/auth", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = http::check_status(response, "pluggy auth").await?;
        let auth: AuthResponse = response.json().await?;

        if auth.api_key.trim().is_empty() {
            return Err(Error::upstream("pluggy auth returned an empty API key"));
        }
        Ok(auth.api_key)
    }

    /// Every page of one account
    async fn list_account_transactions(
        &self,
        api_key: &str,
        account_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SourceTransaction>> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();
        let page_size = PAGE_SIZE.to_string();

        let mut records = Vec::new();
        let mut page: u32 = 1;

        loop {
            let page_param = page.to_string();
            let response = self
                .http_client
                .get(format!("{}/transactions", self.base_url))
                .header("X-API-KEY", api_key)
                .query(&[
                    ("accountId", account_id),
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("pageSize", page_size.as_str()),
                    ("page", page_param.as_str()),
                ])
                .send()
                .await?;
            let response = http::check_status(response, "pluggy transactions").await?;
            let body: TransactionsPage = response.json().await?;

            debug!(
                account_id,
                page,
                total_pages = body.total_pages,
                count = body.results.len(),
                "Fetched transactions page"
            );

            records.extend(
                body.results
                    .into_iter()
                    .map(|raw| raw.into_source(account_id)),
            );

            if page >= body.total_pages {
                break;
            }
            page += 1;
        }

        Ok(records)
    }
}

#[async_trait]
impl TransactionSource for PluggyClient {
    async fn list_transactions_by_user_id(
        &self,
        user: &UserSettings,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SourceTransaction>> {
        let accounts = &user.source.account_ids;
        if accounts.is_empty() {
            info!(user_id = %user.user_id, "No connected accounts");
            return Ok(Vec::new());
        }

        let api_key = self
            .fanout
            .call(self.authenticate(&user.source.client_id, &user.source.client_secret))
            .await?;

        let result = self
            .fanout
            .with_timeout(self.account_timeout)
            .run_all(accounts.iter().cloned(), |account_id| {
                let client = self.clone();
                let api_key = api_key.clone();
                async move {
                    client
                        .list_account_transactions(&api_key, &account_id, from, to)
                        .await
                        .map_err(|e| e.context(format!("account {}", account_id)))
                }
            })
            .await;

        let pages = result.into_result()?;
        Ok(pages.into_iter().flatten().collect())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionsPage {
    #[serde(default)]
    total_pages: u32,
    #[serde(default)]
    results: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransaction {
    id: String,
    #[serde(default)]
    description: String,
    amount: Decimal,
    amount_in_account_currency: Option<Decimal>,
    date: DateTime<FixedOffset>,
    category: Option<String>,
    #[serde(rename = "type")]
    direction: Direction,
    payment_data: Option<RawPaymentData>,
    credit_card_metadata: Option<RawCreditCard>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPaymentData {
    payment_method: Option<String>,
    receiver: Option<RawReceiver>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceiver {
    name: Option<String>,
    document_number: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCreditCard {
    card_number: Option<String>,
}

impl RawTransaction {
    fn into_source(self, account_id: &str) -> SourceTransaction {
        let payment_data = self.payment_data.map(|p| PaymentData {
            // Methods outside the four we write (e.g. TEF) count as missing
            payment_method: p
                .payment_method
                .and_then(|m| m.parse::<PaymentMethod>().ok()),
            receiver: p.receiver.map(|r| Receiver {
                name: r.name,
                document: r.document_number.and_then(|d| d.value),
            }),
        });

        SourceTransaction {
            id: self.id,
            account_id: account_id.to_string(),
            description: self.description,
            amount: self.amount,
            amount_in_account_currency: self.amount_in_account_currency,
            date: self.date,
            category: self.category,
            direction: self.direction,
            payment_data,
            credit_card: self.credit_card_metadata.map(|c| CreditCardData {
                card_number: c.card_number,
            }),
        }
    }
}
