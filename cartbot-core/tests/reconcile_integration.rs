use std::sync::Arc;

use cartbot_core::config::CoreConfig;
use cartbot_core::contract::{MockOcrProvider, OcrLine};
use cartbot_core::error::CoreError;
use cartbot_core::model::RawMention;
use cartbot_core::service::ShoppingService;

fn service() -> ShoppingService {
    ShoppingService::new(CoreConfig::default()).expect("default config is valid")
}

#[tokio::test]
async fn merging_spelling_variants_accumulates_quantity() {
    let service = service();
    service.add_item(1, "2 milk", None).await.unwrap();
    let merged = service.add_item(1, "1 Milk", None).await.unwrap();

    assert_eq!(merged.canonical_name, "milk");
    assert_eq!(merged.quantity, 3.0);

    let items = service.list_items(1).await;
    assert_eq!(items.len(), 1);
    assert!(items[0].aliases.contains("Milk"));
}

#[tokio::test]
async fn dissimilar_names_never_merge() {
    let service = service();
    service.add_item(1, "milk", None).await.unwrap();
    service.add_item(1, "sparkling water", None).await.unwrap();

    let items = service.list_items(1).await;
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn empty_text_is_rejected_per_call() {
    let service = service();
    let err = service.add_item(1, "   ", None).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn reapplied_receipt_batch_changes_nothing() {
    let service = service();
    let lines = vec![
        RawMention::ocr("bread 1 $3.50"),
        RawMention::ocr("eggs 12 $4.00"),
    ];

    let first = service.reconcile_batch(1, lines.clone()).await.unwrap();
    let second = service.reconcile_batch(1, lines).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.outcomes, second.outcomes);

    let items = service.list_items(1).await;
    assert_eq!(items.len(), 2);
    let bread = items.iter().find(|i| i.canonical_name == "bread").unwrap();
    let eggs = items.iter().find(|i| i.canonical_name == "egg").unwrap();
    assert_eq!(bread.quantity, 1.0);
    assert_eq!(eggs.quantity, 12.0);
    assert_eq!(bread.last_price, Some(3.50));
    assert_eq!(eggs.last_price, Some(4.00));
}

#[tokio::test]
async fn price_history_survives_clear() {
    let service = service();
    service
        .reconcile_batch(1, vec![RawMention::ocr("bread 1 $3.50")])
        .await
        .unwrap();

    service.mark_bought(1, "bread").await.unwrap();
    let items = service.list_items(1).await;
    assert!(items[0].bought);

    service.clear(1).await.unwrap();
    assert!(service.list_items(1).await.is_empty());

    let trend = service
        .price_trend(1, "bread", chrono::Duration::days(30))
        .await;
    assert_eq!(trend.count, 1);
    assert_eq!(trend.average, Some(3.50));
}

#[tokio::test]
async fn price_observations_only_grow() {
    let service = service();
    service
        .reconcile_batch(1, vec![RawMention::ocr("milk $2.00")])
        .await
        .unwrap();
    let after_one = service
        .price_trend(1, "milk", chrono::Duration::days(30))
        .await;
    service
        .reconcile_batch(1, vec![RawMention::ocr("milk $2.50")])
        .await
        .unwrap();
    let after_two = service
        .price_trend(1, "milk", chrono::Duration::days(30))
        .await;

    assert_eq!(after_one.count, 1);
    assert_eq!(after_two.count, 2);
    assert_eq!(after_two.min, Some(2.00));
    assert_eq!(after_two.max, Some(2.50));
}

#[tokio::test]
async fn mark_bought_unknown_item_reports_not_found() {
    let service = service();
    let err = service.mark_bought(1, "caviar").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn suggestions_exclude_active_unbought_items() {
    let service = service();
    service
        .reconcile_batch(1, vec![RawMention::ocr("milk $2.00"), RawMention::ocr("bread $3.00")])
        .await
        .unwrap();
    service.mark_bought(1, "milk").await.unwrap();
    service.clear(1).await.unwrap();

    // Milk goes back on the list and is still pending.
    service.add_item(1, "milk", None).await.unwrap();

    let suggestions = service.suggestions(1, None).await;
    assert!(!suggestions.contains(&"milk".to_owned()));
    assert!(suggestions.contains(&"bread".to_owned()));
}

#[tokio::test]
async fn users_are_isolated_from_each_other() {
    let service = service();
    service.add_item(1, "milk", None).await.unwrap();
    service.add_item(2, "bread", None).await.unwrap();

    let first = service.list_items(1).await;
    let second = service.list_items(2).await;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].canonical_name, "milk");
    assert_eq!(second[0].canonical_name, "bread");
}

#[tokio::test]
async fn scanned_receipt_flows_through_reconciliation() {
    let mut ocr = MockOcrProvider::new();
    ocr.expect_extract().times(2).returning(|_| {
        Ok(vec![
            OcrLine {
                text: "bread 1 $3.50".into(),
                confidence: 0.95,
            },
            OcrLine {
                text: "eggs 12 $4.00".into(),
                confidence: 0.90,
            },
        ])
    });

    let service = service().with_ocr(Arc::new(ocr));
    let first = service.scan_receipt(1, b"receipt".to_vec()).await.unwrap();
    assert_eq!(first.outcomes.len(), 2);
    assert!(!first.replayed);

    // Scanning the same receipt again replays the recorded batch.
    let second = service.scan_receipt(1, b"receipt".to_vec()).await.unwrap();
    assert!(second.replayed);

    let items = service.list_items(1).await;
    assert_eq!(items.len(), 2);
    assert_eq!(
        items.iter().find(|i| i.canonical_name == "egg").unwrap().quantity,
        12.0
    );
}

#[tokio::test]
async fn malformed_receipt_line_does_not_lose_the_rest() {
    let service = service();
    let result = service
        .reconcile_batch(
            1,
            vec![
                RawMention::ocr("bread 1 $3.50"),
                RawMention::ocr("%%%"),
                RawMention::ocr("milk $2.00"),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.outcomes.len(), 3);
    assert!(result.outcomes[1].is_failed());
    assert_eq!(service.list_items(1).await.len(), 2);
}
