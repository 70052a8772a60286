//! Orchestrator runs against in-memory collaborators

use finsync_core::models::PaymentMethod;
use finsync_core::test_utils::{
    bank_record, card_record, sample_user, transaction, transfer_to_document, vocabulary,
    InMemoryCompanies, TestHarness,
};
use finsync_core::{Error, ErrorKind, MockBackend, CATEGORY_UNKNOWN};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

/// Collects every value recorded into a span's `stage` field
#[derive(Clone, Default)]
struct StageLog(Arc<Mutex<Vec<String>>>);

impl StageLog {
    fn stages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct StageVisitor<'a>(&'a Mutex<Vec<String>>);

impl Visit for StageVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "stage" {
            self.0.lock().unwrap().push(value.to_string());
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
}

impl<S: Subscriber> Layer<S> for StageLog {
    fn on_record(&self, _id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        values.record(&mut StageVisitor(&self.0));
    }
}

fn harness() -> TestHarness {
    TestHarness::new(vec![sample_user("alice", &["acc-a", "acc-b"])])
}

#[tokio::test]
async fn test_filtered_records_sync_nothing() {
    let h = harness();
    let mut investment = bank_record("t1", "RDB", "50.00", "2025-01-10T12:00:00Z", PaymentMethod::Ted);
    investment.category = Some("Investments".into());
    h.source.add("acc-a", vec![investment]);
    h.source.add(
        "acc-b",
        vec![card_record("t2", "Pagamento de fatura", "20.00", "2025-01-12T12:00:00Z")],
    );

    let report = h
        .orchestrator
        .execute("alice", Some("2025-01-01"), Some("2025-01-31"))
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.kept, 0);
    assert_eq!(report.inserted(), 0);
    assert_eq!(h.sheet.insert_count(), 0);
    // Empty months do not get a table
    assert_eq!(h.sheet.create_count(), 0);
    // Nothing to categorize, so no model call
    assert_eq!(h.categorizer.call_count(), 0);
}

#[tokio::test]
async fn test_cnpj_payee_enriched_to_trading_name() {
    let companies = InMemoryCompanies::new();
    companies.add("12345678000190", "ACME COMERCIO LTDA", Some("TradingName"));
    let h = TestHarness::with_parts(
        vec![sample_user("alice", &["acc-a"])],
        companies,
        MockBackend::new(),
    );
    h.source.add(
        "acc-a",
        vec![transfer_to_document("t1", "12345678000190", "-80.00", "2025-01-10T15:00:00Z")],
    );

    let report = h.orchestrator.execute("alice", None, None).await.unwrap();

    assert_eq!(report.enriched, 1);
    let rows = h.sheet.rows("Jan 2025");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "TradingName");
    assert_eq!(rows[0].category, CATEGORY_UNKNOWN);
    assert_eq!(h.companies.call_count(), 1);
}

#[tokio::test]
async fn test_existing_row_is_not_inserted_again() {
    let h = harness();
    h.sheet.add_table(
        "Mar 2025",
        vec![transaction("Padaria Real", "12.50", "2025-03-05T07:00:00-03:00")],
    );
    h.source.add(
        "acc-a",
        vec![
            bank_record("x", "Padaria Real", "-12.50", "2025-03-05T10:00:00Z", PaymentMethod::Pix),
            bank_record("y", "Uber *Trip", "-30.00", "2025-03-06T10:00:00Z", PaymentMethod::Pix),
        ],
    );

    let report = h
        .orchestrator
        .execute("alice", Some("2025-03-01"), Some("2025-03-31"))
        .await
        .unwrap();

    assert_eq!(h.sheet.insert_count(), 1);
    assert_eq!(h.sheet.create_count(), 0);
    let month = &report.months[0];
    assert_eq!(month.title, "Mar 2025");
    assert!(!month.created);
    assert_eq!(month.inserted, 1);
    assert_eq!(month.skipped, 1);

    let names: Vec<String> = h.sheet.rows("Mar 2025").into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["Padaria Real", "Uber *Trip"]);
}

#[tokio::test]
async fn test_second_run_inserts_nothing() {
    let h = harness();
    h.source.add(
        "acc-a",
        vec![
            bank_record("t1", "iFood *Pedido", "-45.90", "2025-01-03T20:00:00Z", PaymentMethod::Pix),
            card_record("t2", "Netflix.com", "-39.90", "2025-01-20T09:00:00Z"),
        ],
    );

    let first = h.orchestrator.execute("alice", None, None).await.unwrap();
    assert_eq!(first.inserted(), 2);
    assert!(first.months[0].created);

    let second = h.orchestrator.execute("alice", None, None).await.unwrap();
    assert_eq!(second.inserted(), 0);
    assert_eq!(second.months[0].skipped, 2);
    assert_eq!(h.sheet.insert_count(), 2);
    assert_eq!(h.sheet.create_count(), 1);
}

#[tokio::test]
async fn test_rows_are_positive_and_categorized() {
    let h = harness();
    h.source.add(
        "acc-a",
        vec![
            bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix),
            bank_record("t2", "Loja Sem Nome", "-5.00", "2025-01-04T20:00:00Z", PaymentMethod::Boleto),
        ],
    );
    h.source.add(
        "acc-b",
        vec![card_record("t3", "Drogaria SP", "-19.99", "2025-01-05T09:00:00Z")],
    );

    h.orchestrator.execute("alice", None, None).await.unwrap();

    let rows = h.sheet.rows("Jan 2025");
    assert_eq!(rows.len(), 3);
    let vocab = vocabulary();
    for row in &rows {
        assert!(row.amount >= Decimal::ZERO, "negative amount for {}", row.name);
        assert!(
            vocab.contains(&row.category) || row.category == CATEGORY_UNKNOWN,
            "unexpected category {} for {}",
            row.category,
            row.name
        );
    }

    let category_of = |name: &str| {
        rows.iter()
            .find(|r| r.name == name)
            .map(|r| r.category.clone())
            .unwrap()
    };
    assert_eq!(category_of("Uber *Trip"), "Transport");
    assert_eq!(category_of("Drogaria SP"), "Health");
    assert_eq!(category_of("Loja Sem Nome"), CATEGORY_UNKNOWN);

    let card = rows.iter().find(|r| r.name == "Drogaria SP").unwrap();
    assert_eq!(card.payment_method, PaymentMethod::CreditCard);
    assert_eq!(card.card_last_digits.as_deref(), Some("4321"));

    // One prompt for the whole run
    assert_eq!(h.categorizer.call_count(), 1);
}

#[tokio::test]
async fn test_new_table_offers_vocabulary() {
    let h = harness();
    h.source.add(
        "acc-a",
        vec![bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix)],
    );

    h.orchestrator.execute("alice", None, None).await.unwrap();

    assert_eq!(h.sheet.table_options("Jan 2025"), Some(vocabulary()));
}

#[tokio::test]
async fn test_company_lookup_failure_keeps_document() {
    let h = TestHarness::with_parts(
        vec![sample_user("alice", &["acc-a"])],
        InMemoryCompanies::failing(),
        MockBackend::new(),
    );
    h.source.add(
        "acc-a",
        vec![transfer_to_document("t1", "12345678000190", "-80.00", "2025-01-10T15:00:00Z")],
    );

    let report = h.orchestrator.execute("alice", None, None).await.unwrap();

    assert_eq!(report.enriched, 0);
    assert_eq!(h.sheet.rows("Jan 2025")[0].name, "12.345.678/0001-90");
}

#[tokio::test]
async fn test_same_cnpj_looked_up_once() {
    let companies = InMemoryCompanies::new();
    companies.add("12345678000190", "ACME COMERCIO LTDA", None);
    let h = TestHarness::with_parts(
        vec![sample_user("alice", &["acc-a"])],
        companies,
        MockBackend::new(),
    );
    h.source.add(
        "acc-a",
        vec![
            transfer_to_document("t1", "12345678000190", "-80.00", "2025-01-10T15:00:00Z"),
            transfer_to_document("t2", "12.345.678/0001-90", "-10.00", "2025-01-11T15:00:00Z"),
        ],
    );

    let report = h.orchestrator.execute("alice", None, None).await.unwrap();

    assert_eq!(h.companies.call_count(), 1);
    assert_eq!(report.enriched, 2);
    assert!(h
        .sheet
        .rows("Jan 2025")
        .iter()
        .all(|r| r.name == "ACME COMERCIO LTDA"));
}

#[tokio::test]
async fn test_answer_without_json_is_upstream_error() {
    let h = TestHarness::with_parts(
        vec![sample_user("alice", &["acc-a"])],
        InMemoryCompanies::new(),
        MockBackend::with_response("I could not categorize these."),
    );
    h.source.add(
        "acc-a",
        vec![bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix)],
    );

    let err = h.orchestrator.execute("alice", None, None).await.unwrap_err();

    assert!(matches!(err, Error::Upstream(_)));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(h.sheet.insert_count(), 0);
}

#[tokio::test]
async fn test_account_failures_are_joined() {
    let h = TestHarness::new(vec![sample_user("alice", &["acc-a", "acc-b", "acc-c"])]);
    h.source.add(
        "acc-b",
        vec![bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix)],
    );
    h.source.fail_account("acc-a");
    h.source.fail_account("acc-c");

    let err = h.orchestrator.execute("alice", None, None).await.unwrap_err();

    assert!(matches!(err, Error::Aggregate(_)));
    assert_eq!(err.len(), 2);
    let message = err.to_string();
    assert!(message.contains("acc-a"));
    assert!(message.contains("acc-c"));
    assert_eq!(h.sheet.insert_count(), 0);
    assert_eq!(h.categorizer.call_count(), 0);
}

#[tokio::test]
async fn test_every_month_is_attempted() {
    let h = harness();
    h.source.add(
        "acc-a",
        vec![
            bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix),
            bank_record("t2", "Uber *Trip", "-18.00", "2025-02-03T20:00:00Z", PaymentMethod::Pix),
        ],
    );
    h.sheet.fail_create("Jan 2025");

    let err = h
        .orchestrator
        .execute("alice", Some("2025-01-01"), Some("2025-02-28"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("month Jan 2025"));
    // February still went through
    assert_eq!(h.sheet.rows("Feb 2025").len(), 1);
    assert!(h.sheet.rows("Jan 2025").is_empty());
}

#[tokio::test]
async fn test_insert_failures_do_not_stop_siblings() {
    let h = harness();
    h.source.add(
        "acc-a",
        vec![
            bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix),
            bank_record("t2", "iFood *Pedido", "-45.90", "2025-01-04T20:00:00Z", PaymentMethod::Pix),
            bank_record("t3", "Spotify", "-21.90", "2025-01-05T20:00:00Z", PaymentMethod::Pix),
        ],
    );
    h.sheet.fail_inserts_named("iFood *Pedido");

    let err = h.orchestrator.execute("alice", None, None).await.unwrap_err();

    assert!(err.to_string().contains("iFood *Pedido"));
    assert_eq!(h.sheet.insert_count(), 2);
}

#[tokio::test]
async fn test_duplicates_within_batch_inserted_once() {
    let h = harness();
    let record = bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix);
    let mut copy = record.clone();
    copy.id = "t1-copy".into();
    h.source.add("acc-a", vec![record, copy]);

    let report = h.orchestrator.execute("alice", None, None).await.unwrap();

    assert_eq!(report.months[0].inserted, 1);
    assert_eq!(report.months[0].skipped, 1);
}

#[tokio::test]
async fn test_invalid_input_is_validation_error() {
    let h = harness();

    let reversed = h
        .orchestrator
        .execute("alice", Some("2025-02-01"), Some("2025-01-01"))
        .await
        .unwrap_err();
    assert_eq!(reversed.kind(), ErrorKind::Validation);

    let malformed = h
        .orchestrator
        .execute("alice", Some("01/02/2025"), None)
        .await
        .unwrap_err();
    assert_eq!(malformed.kind(), ErrorKind::Validation);

    let blank_user = h.orchestrator.execute("  ", None, None).await.unwrap_err();
    assert_eq!(blank_user.kind(), ErrorKind::Validation);

    // Nothing was fetched for rejected input
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let h = harness();
    let err = h.orchestrator.execute("carol", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_execute_all_reports_each_user() {
    let h = TestHarness::new(vec![
        sample_user("alice", &["alice-acc"]),
        sample_user("bob", &["bob-acc"]),
    ]);
    h.source.add(
        "alice-acc",
        vec![bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix)],
    );
    h.source.fail_account("bob-acc");

    let outcome = h.orchestrator.execute_all(None, None).await.unwrap();

    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].user_id, "alice");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].user_id, "bob");

    let err = outcome.into_result().unwrap_err();
    assert!(err.to_string().contains("user bob"));
}

#[tokio::test]
async fn test_execute_all_rejects_invalid_range() {
    let h = harness();
    let err = h
        .orchestrator
        .execute_all(Some("2025-02-01"), Some("2025-01-01"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(h.source.call_count(), 0);
}

#[tokio::test]
async fn test_unmaskable_receiver_skips_only_that_record() {
    let h = harness();
    h.source.add(
        "acc-a",
        vec![
            bank_record("good", "Padaria Real", "-9.50", "2025-01-04T11:30:00Z", PaymentMethod::Pix),
            transfer_to_document("bad", "123", "-40.00", "2025-01-05T11:30:00Z"),
        ],
    );

    let report = h
        .orchestrator
        .execute("alice", Some("2025-01-01"), Some("2025-01-31"))
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.kept, 1);
    assert_eq!(report.inserted(), 1);
    assert_eq!(h.sheet.rows("Jan 2025")[0].name, "Padaria Real");
}

#[tokio::test]
async fn test_run_span_records_final_stage() {
    let log = StageLog::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(log.clone()));

    let h = harness();
    h.source.add(
        "acc-a",
        vec![bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix)],
    );
    h.orchestrator.execute("alice", None, None).await.unwrap();
    assert_eq!(log.stages().last().map(String::as_str), Some("done"));
    assert!(log.stages().contains(&"upserting".to_string()));

    let failing = TestHarness::with_parts(
        vec![sample_user("alice", &["acc-a"])],
        InMemoryCompanies::new(),
        MockBackend::with_response("no idea"),
    );
    failing.source.add(
        "acc-a",
        vec![bank_record("t1", "Uber *Trip", "-23.10", "2025-01-03T20:00:00Z", PaymentMethod::Pix)],
    );
    failing.orchestrator.execute("alice", None, None).await.unwrap_err();
    let stages = log.stages();
    assert_eq!(stages.last().map(String::as_str), Some("failed"));
    assert_eq!(stages[stages.len() - 2], "categorizing");

    h.orchestrator.execute("carol", None, None).await.unwrap_err();
    assert_eq!(log.stages().last().map(String::as_str), Some("failed"));
}
