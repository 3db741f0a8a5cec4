//! Batch runner: ordering, concurrency bound, failure isolation, cancellation

mod helpers;

use catfix_enrich::types::{Action, Record};
use catfix_enrich::{BatchRunner, EnrichmentPipeline};
use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn runner(ctx: catfix_enrich::ServiceContext, concurrency: usize) -> BatchRunner {
    BatchRunner::new(EnrichmentPipeline::new(Arc::new(ctx)), concurrency)
}

fn partnumbers(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.partnumber.clone()).collect()
}

fn reasons(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.reason().map(|reason| reason.to_string()).unwrap_or_default())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_output_matches_input_order_and_length() {
    // Earlier records take longer, so completion order is reversed
    let mut catalog = FakeCatalog::new().with_item(catalog_item("7", "P-07", "TI"));
    for i in 0..12u64 {
        catalog = catalog.with_delay(&format!("P-{:02}", i), Duration::from_millis(200 - i * 10));
    }
    let catalog = Arc::new(catalog);

    let input: Vec<Record> = (0..12).map(|i| Record::new(format!("P-{:02}", i), "TI")).collect();
    let expected = partnumbers(&input);

    let output = runner(catalog_context(&catalog), 4).run_batch(input).await;

    assert_eq!(output.len(), 12);
    assert_eq!(partnumbers(&output), expected);
    assert!(output.iter().all(|r| r.is_terminal()));
    assert_eq!(output[7].reason().map(|r| r.to_string()).as_deref(), Some("already_present"));
    assert_eq!(catalog.searches(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let mut catalog = FakeCatalog::new();
    for i in 0..10 {
        catalog = catalog.with_delay(&format!("P-{}", i), Duration::from_millis(50));
    }
    let catalog = Arc::new(catalog);
    let input: Vec<Record> = (0..10).map(|i| Record::new(format!("P-{}", i), "TI")).collect();

    let output = runner(catalog_context(&catalog), 3).run_batch(input).await;

    assert_eq!(output.len(), 10);
    assert_eq!(catalog.peak_concurrency(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_one_is_sequential() {
    let mut catalog = FakeCatalog::new();
    for i in 0..4 {
        catalog = catalog.with_delay(&format!("P-{}", i), Duration::from_millis(20));
    }
    let catalog = Arc::new(catalog);
    let input: Vec<Record> = (0..4).map(|i| Record::new(format!("P-{}", i), "TI")).collect();

    let output = runner(catalog_context(&catalog), 0).run_batch(input).await;

    assert_eq!(output.len(), 4);
    assert_eq!(catalog.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_empty_batch() {
    let catalog = Arc::new(FakeCatalog::new());
    assert!(runner(catalog_context(&catalog), 4).run_batch(Vec::new()).await.is_empty());
}

#[tokio::test]
async fn test_panic_is_isolated_to_its_record() {
    let catalog = Arc::new(FakeCatalog::new().with_panic_on("BOOM"));
    let input = vec![
        Record::new("LM317", "TI"),
        Record::new("BOOM", "TI").with_field("qty", "5"),
        Record::new("NE555", "TI"),
    ];

    let output = runner(catalog_context(&catalog), 2).run_batch(input).await;

    assert_eq!(
        reasons(&output),
        vec!["not_found", "row_failed:Panic", "not_found"]
    );
    assert_eq!(output[1].action(), Some(Action::Error));
    assert_eq!(output[1].get("qty"), Some("5"));
    assert_eq!(output[1].errors, vec!["pipeline:Panic"]);
    assert_eq!(catalog.creates(), 2);
}

#[tokio::test]
async fn test_cancelled_before_start_touches_no_service() {
    let catalog = Arc::new(FakeCatalog::new());
    let token = CancellationToken::new();
    token.cancel();
    let ctx = catalog_context(&catalog).with_cancellation(token);
    let input: Vec<Record> = (0..3).map(|i| Record::new(format!("P-{}", i), "TI")).collect();

    let output = runner(ctx, 2).run_batch(input).await;

    assert_eq!(reasons(&output), vec!["row_failed:Cancelled"; 3]);
    assert!(output.iter().all(|r| r.found_in_catalog == Some(false)));
    assert_eq!(catalog.searches(), 0);
}

#[tokio::test]
async fn test_cancellation_mid_batch() {
    let token = CancellationToken::new();
    let catalog = Arc::new(FakeCatalog::new().cancelling_on_search(3, token.clone()));
    let ctx = catalog_context(&catalog).with_cancellation(token);
    let input: Vec<Record> = (0..5).map(|i| Record::new(format!("P-{}", i), "TI")).collect();

    let output = runner(ctx, 1).run_batch(input).await;

    assert_eq!(
        reasons(&output),
        vec![
            "not_found",
            "not_found",
            "row_failed:Cancelled",
            "row_failed:Cancelled",
            "row_failed:Cancelled",
        ]
    );
    assert_eq!(catalog.searches(), 3);
    assert_eq!(catalog.creates(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_keeps_annotations_gathered_before_it() {
    let token = CancellationToken::new();
    let catalog = Arc::new(
        FakeCatalog::new()
            .with_failing_search()
            .cancelling_on_search(2, token.clone()),
    );
    let ctx = catalog_context(&catalog).with_cancellation(token);

    let input = vec![Record::new("LM317", "TI").with_field("qty", "3")];
    let output = runner(ctx, 1).run_batch(input).await;

    assert_eq!(reasons(&output), vec!["row_failed:Cancelled"]);
    assert_eq!(
        output[0].errors,
        vec![
            "catalog_search:Timeout:attempt1",
            "catalog_search:Timeout:attempt2",
            "pipeline:Cancelled",
        ]
    );
    assert_eq!(output[0].get("qty"), Some("3"));
    assert_eq!(output[0].found_in_catalog, Some(false));
    assert_eq!(catalog.searches(), 2);
}
