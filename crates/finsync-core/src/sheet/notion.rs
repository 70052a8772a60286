//! Notion databases as monthly transaction tables
//!
//! Tables are inline databases under the user's parent page. Each row is a
//! page with the properties below. Every list endpoint is cursor-paginated
//! (`has_more` / `next_cursor`, 100 per page).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::http;
use crate::models::{PaymentMethod, Table, Transaction, CATEGORY_UNKNOWN};
use crate::settings::UserSettings;

use super::SheetStore;

pub const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;
const TABLE_ICON: &str = "💸";

const PROP_NAME: &str = "Name";
const PROP_CATEGORY: &str = "Category";
const PROP_AMOUNT: &str = "Amount";
const PROP_PAYMENT_METHOD: &str = "Payment Method";
const PROP_CARD_DIGITS: &str = "Card Last Digits";
const PROP_DATE: &str = "Date";

/// Select option colors, assigned in order
const COLORS: &[&str] = &[
    "blue", "red", "green", "purple", "yellow", "pink", "orange", "gray", "brown", "default",
];

#[derive(Clone)]
pub struct NotionClient {
    http_client: Client,
    base_url: String,
}

impl NotionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http_client: http::client(timeout)?,
            base_url: http::trim_base_url(base_url),
        })
    }

    fn request(&self, method: Method, path: &str, user: &UserSettings) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}/v1/{}", self.base_url, path))
            .bearer_auth(&user.sheet.token)
            .header("Notion-Version", NOTION_VERSION)
    }
}

#[async_trait]
impl SheetStore for NotionClient {
    async fn list_tables(&self, user: &UserSettings) -> Result<Vec<Table>> {
        let path = format!("blocks/{}/children", user.sheet.page_id);
        let mut tables = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("page_size", PAGE_SIZE.to_string())];
            if let Some(c) = &cursor {
                query.push(("start_cursor", c.clone()));
            }

            let response = self
                .request(Method::GET, &path, user)
                .query(&query)
                .send()
                .await?;
            let response = http::check_status(response, "list tables").await?;
            let page: Paginated<Block> = response.json().await?;

            tables.extend(page.results.into_iter().filter_map(Block::into_table));

            match next_cursor(page.has_more, page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!(user_id = %user.user_id, count = tables.len(), "Listed tables");
        Ok(tables)
    }

    async fn create_transactions_table(
        &self,
        user: &UserSettings,
        title: &str,
        categories: &[String],
    ) -> Result<Table> {
        let body = json!({
            "parent": { "type": "page_id", "page_id": user.sheet.page_id },
            "icon": { "type": "emoji", "emoji": TABLE_ICON },
            "title": [{ "type": "text", "text": { "content": title } }],
            "properties": table_schema(categories),
        });

        let response = self
            .request(Method::POST, "databases", user)
            .json(&body)
            .send()
            .await?;
        let response = http::check_status(response, "create table").await?;
        let created: Database = response.json().await?;

        let created_title = plain_text(&created.title);
        Ok(Table {
            id: created.id,
            title: if created_title.is_empty() {
                title.to_string()
            } else {
                created_title
            },
            archived: created.archived,
            in_trash: created.in_trash,
        })
    }

    async fn list_transactions(
        &self,
        user: &UserSettings,
        table_id: &str,
    ) -> Result<Vec<Transaction>> {
        let path = format!("databases/{}/query", table_id);
        let mut transactions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({
                "page_size": PAGE_SIZE,
                "sorts": [{ "timestamp": "created_time", "direction": "descending" }],
            });
            if let Some(c) = &cursor {
                body["start_cursor"] = Value::String(c.clone());
            }

            let response = self
                .request(Method::POST, &path, user)
                .json(&body)
                .send()
                .await?;
            let response = http::check_status(response, "list transactions").await?;
            let page: Paginated<Row> = response.json().await?;

            for row in page.results {
                match row.properties.into_transaction() {
                    Ok(tx) => transactions.push(tx),
                    // Rows edited by hand may lack fields; they cannot match a dedup key
                    Err(e) => warn!(table_id, row_id = %row.id, error = %e, "Skipping unreadable row"),
                }
            }

            match next_cursor(page.has_more, page.next_cursor) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(transactions)
    }

    async fn insert_transaction(
        &self,
        user: &UserSettings,
        table_id: &str,
        transaction: &Transaction,
    ) -> Result<()> {
        let body = json!({
            "parent": { "database_id": table_id },
            "properties": row_properties(transaction)?,
        });

        let response = self
            .request(Method::POST, "pages", user)
            .json(&body)
            .send()
            .await?;
        http::check_status(response, "insert transaction").await?;
        Ok(())
    }
}

fn next_cursor(has_more: bool, next: Option<String>) -> Option<String> {
    if has_more {
        next.filter(|c| !c.is_empty())
    } else {
        None
    }
}

/// Select option names may not contain commas
fn option_name(name: &str) -> String {
    name.replace(',', "")
}

fn select_options<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<Value> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(option_name)
        .filter(|n| !n.is_empty() && seen.insert(n.clone()))
        .zip(COLORS.iter().cycle())
        .map(|(name, color)| json!({ "name": name, "color": color }))
        .collect()
}

fn table_schema(categories: &[String]) -> Value {
    let category_names = categories
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(CATEGORY_UNKNOWN));

    let payment_methods: Vec<Value> = PaymentMethod::all()
        .iter()
        .map(|m| json!({ "name": m.as_str(), "color": payment_method_color(*m) }))
        .collect();

    json!({
        PROP_NAME: { "title": {} },
        PROP_CATEGORY: { "select": { "options": select_options(category_names) } },
        PROP_AMOUNT: { "number": { "format": "real" } },
        PROP_PAYMENT_METHOD: { "select": { "options": payment_methods } },
        PROP_CARD_DIGITS: { "rich_text": {} },
        PROP_DATE: { "date": {} },
    })
}

fn payment_method_color(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Boleto => "yellow",
        PaymentMethod::Pix => "blue",
        PaymentMethod::Ted => "green",
        PaymentMethod::CreditCard => "purple",
    }
}

fn row_properties(tx: &Transaction) -> Result<Value> {
    let amount = tx
        .amount
        .to_f64()
        .ok_or_else(|| Error::validation(format!("amount out of range: {}", tx.amount)))?;

    let digits = tx.card_last_digits.as_deref().unwrap_or_default();

    Ok(json!({
        PROP_NAME: { "title": [{ "type": "text", "text": { "content": tx.name } }] },
        PROP_CATEGORY: { "select": { "name": option_name(&tx.category) } },
        PROP_AMOUNT: { "number": amount },
        PROP_PAYMENT_METHOD: { "select": { "name": tx.payment_method.as_str() } },
        PROP_CARD_DIGITS: { "rich_text": [{ "type": "text", "text": { "content": digits } }] },
        PROP_DATE: { "date": { "start": tx.date.to_rfc3339() } },
    }))
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RichText {
    #[serde(default)]
    plain_text: String,
}

fn plain_text(parts: &[RichText]) -> String {
    parts.iter().map(|p| p.plain_text.as_str()).collect()
}

#[derive(Debug, Deserialize)]
struct Block {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    child_database: Option<ChildDatabase>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    in_trash: bool,
}

#[derive(Debug, Deserialize)]
struct ChildDatabase {
    title: String,
}

impl Block {
    fn into_table(self) -> Option<Table> {
        if self.kind != "child_database" {
            return None;
        }
        Some(Table {
            id: self.id,
            title: self.child_database?.title,
            archived: self.archived,
            in_trash: self.in_trash,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Database {
    id: String,
    #[serde(default)]
    title: Vec<RichText>,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    in_trash: bool,
}

#[derive(Debug, Deserialize)]
struct Row {
    id: String,
    properties: RowProperties,
}

#[derive(Debug, Deserialize)]
struct RowProperties {
    #[serde(rename = "Name")]
    name: Option<TitleProperty>,
    #[serde(rename = "Category")]
    category: Option<SelectProperty>,
    #[serde(rename = "Amount")]
    amount: Option<NumberProperty>,
    #[serde(rename = "Payment Method")]
    payment_method: Option<SelectProperty>,
    #[serde(rename = "Card Last Digits")]
    card_last_digits: Option<RichTextProperty>,
    #[serde(rename = "Date")]
    date: Option<DateProperty>,
}

#[derive(Debug, Deserialize)]
struct TitleProperty {
    #[serde(default)]
    title: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
struct RichTextProperty {
    #[serde(default)]
    rich_text: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
struct SelectProperty {
    select: Option<SelectOption>,
}

#[derive(Debug, Deserialize)]
struct SelectOption {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NumberProperty {
    number: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DateProperty {
    date: Option<DateValue>,
}

#[derive(Debug, Deserialize)]
struct DateValue {
    start: String,
}

impl SelectProperty {
    fn name(self) -> Option<String> {
        self.select.map(|s| s.name)
    }
}

impl RowProperties {
    fn into_transaction(self) -> Result<Transaction> {
        let missing = |prop: &str| Error::upstream(format!("row has no {}", prop));

        // An empty title is a valid payee and must keep its dedup key
        let name = self
            .name
            .map(|t| plain_text(&t.title))
            .ok_or_else(|| missing(PROP_NAME))?;

        let amount = self
            .amount
            .and_then(|a| a.number)
            .and_then(Decimal::from_f64)
            .ok_or_else(|| missing(PROP_AMOUNT))?;

        let payment_method = self
            .payment_method
            .and_then(SelectProperty::name)
            .ok_or_else(|| missing(PROP_PAYMENT_METHOD))?
            .parse::<PaymentMethod>()
            .map_err(Error::upstream)?;

        let date = self
            .date
            .and_then(|d| d.date)
            .ok_or_else(|| missing(PROP_DATE))
            .and_then(|d| parse_date(&d.start))?;

        let card_last_digits = self
            .card_last_digits
            .map(|r| plain_text(&r.rich_text))
            .filter(|d| !d.is_empty());

        Ok(Transaction {
            name,
            category: self
                .category
                .and_then(SelectProperty::name)
                .unwrap_or_else(|| CATEGORY_UNKNOWN.to_string()),
            amount,
            payment_method,
            date,
            card_last_digits,
        })
    }
}

/// Notion dates are RFC 3339 date-times or bare dates
fn parse_date(raw: &str) -> Result<DateTime<FixedOffset>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(date);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc().fixed_offset())
        .ok_or_else(|| Error::upstream(format!("invalid row date: {}", raw)))
}
