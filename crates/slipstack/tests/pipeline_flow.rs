mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::*;
use slipstack::broadcast::{UploadPhase, UploadProgressBroadcaster};
use slipstack::db::models::{ErrorCategory, ReceiptStatus, UploadStatus};
use slipstack::db::{error_repo, receipt_repo};
use slipstack::pipeline::{BroadcastProgress, PipelineContext, PipelineError, Stage};
use slipstack::processor::{parse_extraction, ExtractError, Extraction, Region, SegmentError};
use slipstack::UploadRequest;

#[test]
fn test_mixed_regions_partly_complete() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(3)),
        ScriptedExtractor::new(vec![
            readable(receipt("Corner Market", "2024-05-10", "7.50", &[("Milk", "2.50"), ("Eggs", "5.00")])),
            Err(ExtractError::Malformed("expected value at line 1".to_string())),
            readable(receipt("Hardware Depot", "2024-05-11", "19.99", &[("Screws", "19.99")])),
        ]),
    );
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::PartlyCompleted);
    assert_eq!(outcome.count(ReceiptStatus::Processed), 2);
    assert_eq!(outcome.count(ReceiptStatus::Failed), 1);

    let upload = h.upload(upload_id);
    assert_eq!(upload.status, UploadStatus::PartlyCompleted);
    assert_eq!(upload.has_receipts, Some(true));
    assert!(upload.marked_image_url.is_some());

    let receipts = h.receipts(upload_id);
    assert_eq!(receipts.len(), 3);
    assert_eq!(receipts[0].store_name.as_deref(), Some("Corner Market"));
    assert_eq!(receipts[0].total_amount, Some(dec("7.50")));
    assert_eq!(receipts[0].currency.as_deref(), Some("EUR"));
    assert_eq!(receipts[1].status, ReceiptStatus::Failed);
    assert!(!receipts[1].is_duplicate);
    assert_eq!(receipts[2].status, ReceiptStatus::Processed);

    for index in 0..3 {
        assert!(h
            .uploads()
            .join(format!("receipt-{}-{}.jpg", upload_id, index))
            .exists());
    }
    assert!(h.uploads().join(format!("marked-{}.jpg", upload_id)).exists());

    let errors = h
        .db
        .with_conn(|conn| error_repo::list_for_upload(conn, upload_id))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::ExtractionFailure);
    assert_eq!(errors[0].receipt_id, Some(receipts[1].id));

    let items = h
        .db
        .with_conn(|conn| receipt_repo::line_items(conn, receipts[0].id))
        .unwrap();
    assert_eq!(items.len(), 2);
    let failed_items = h
        .db
        .with_conn(|conn| receipt_repo::count_line_items(conn, receipts[1].id))
        .unwrap();
    assert_eq!(failed_items, 0);
}

#[test]
fn test_all_regions_readable_completes() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(2)),
        ScriptedExtractor::new(vec![
            readable(receipt("Bakery", "2024-01-02", "3.00", &[("Bread", "3.00")])),
            readable(receipt("Pharmacy", "2024-01-02", "12.40", &[("Plasters", "12.40")])),
        ]),
    );
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Completed);
    assert_eq!(h.upload(upload_id).status, UploadStatus::Completed);
}

#[test]
fn test_zero_total_fails_the_receipt() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(2)),
        ScriptedExtractor::new(vec![
            parse_extraction(
                r#"{"merchantName": "Shop", "total": 0, "items": [{"description": "Bag", "price": 0}]}"#,
            ),
            readable(receipt("Bakery", "2024-01-02", "3.00", &[("Bread", "3.00")])),
        ]),
    );
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::PartlyCompleted);

    let receipts = h.receipts(upload_id);
    assert_eq!(receipts[0].status, ReceiptStatus::Failed);
    assert_eq!(receipts[0].total_amount, None);
    assert!(!receipts[0].is_duplicate);
    assert_eq!(receipts[1].status, ReceiptStatus::Processed);

    let errors = h
        .db
        .with_conn(|conn| error_repo::list_for_upload(conn, upload_id))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::ExtractionFailure);
    assert_eq!(errors[0].receipt_id, Some(receipts[0].id));
    let items = h
        .db
        .with_conn(|conn| receipt_repo::count_line_items(conn, receipts[0].id))
        .unwrap();
    assert_eq!(items, 0);
}

#[test]
fn test_amounts_at_decimal_limits_are_processed() {
    let huge = "50000000000000000000000000000";
    let negative_huge = "-50000000000000000000000000000";
    let h = Harness::new(
        ScriptedSegmenter::always(strips(3)),
        ScriptedExtractor::new(vec![
            readable(receipt("Corner Market", "2024-05-10", huge, &[("Gold", huge)])),
            readable(receipt(
                "Corner Market",
                "2024-05-10",
                negative_huge,
                &[("Refund", negative_huge)],
            )),
            parse_extraction(
                r#"{"merchantName": "Shop", "total": 1, "subtotal": 70000000000000000000000000000, "tax": 10000000000000000000000000000}"#,
            ),
        ]),
    );
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Completed);

    let receipts = h.receipts(upload_id);
    assert!(receipts.iter().all(|r| r.status == ReceiptStatus::Processed));
    assert!(receipts.iter().all(|r| !r.is_duplicate));

    let warnings = h
        .db
        .with_conn(|conn| {
            error_repo::count_by_category(conn, upload_id, ErrorCategory::ValidationWarning)
        })
        .unwrap();
    assert_eq!(warnings, 1);
}

#[test]
fn test_every_region_failing_is_still_partly_completed() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(2)),
        ScriptedExtractor::new(vec![Ok(Extraction::Unreadable), Ok(Extraction::Unreadable)]),
    );
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::PartlyCompleted);
    assert_eq!(outcome.count(ReceiptStatus::Failed), 2);
}

#[test]
fn test_no_regions_completes_without_receipts() {
    let h = Harness::new(ScriptedSegmenter::always(vec![]), ScriptedExtractor::default());
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Completed);
    assert!(!outcome.has_receipts);

    let upload = h.upload(upload_id);
    assert_eq!(upload.has_receipts, Some(false));
    assert!(h.receipts(upload_id).is_empty());
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_region_outside_sheet_is_unreadable() {
    let h = Harness::new(
        ScriptedSegmenter::always(vec![
            Region::new(0.0, 0.0, 500.0, 1000.0),
            Region::new(0.0, 2000.0, 500.0, 100.0),
        ]),
        ScriptedExtractor::new(vec![readable(receipt("Kiosk", "2024-02-02", "1.20", &[("Gum", "1.20")]))]),
    );
    let upload_id = h.new_upload(1);

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::PartlyCompleted);

    let receipts = h.receipts(upload_id);
    assert_eq!(receipts[1].status, ReceiptStatus::Unreadable);
    assert!(receipts[1].image_url.is_none());
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);

    let quality = h
        .db
        .with_conn(|conn| {
            error_repo::count_by_category(conn, upload_id, ErrorCategory::ImageQuality)
        })
        .unwrap();
    assert_eq!(quality, 1);
}

#[test]
fn test_segmenter_outage_fails_whole_upload() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(1))
            .then(Err(SegmentError::Unavailable("503 Service Unavailable".to_string()))),
        ScriptedExtractor::default(),
    );
    let upload_id = h.new_upload(1);

    let err = h.run(upload_id).unwrap_err();
    assert!(matches!(err, PipelineError::Segment(_)));
    assert!(err.is_retryable());

    let upload = h.upload(upload_id);
    assert_eq!(upload.status, UploadStatus::Failed);
    assert_eq!(upload.has_receipts, None);

    let errors = h
        .db
        .with_conn(|conn| error_repo::list_for_upload(conn, upload_id))
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, ErrorCategory::SystemError);
    assert_eq!(errors[0].metadata["retryable"], true);
    assert_eq!(errors[0].metadata["image"], "sheet.png");
}

#[test]
fn test_rerun_after_extractor_outage_converges() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(2)),
        ScriptedExtractor::new(vec![
            readable(receipt("Corner Market", "2024-05-10", "4.00", &[("Tea", "4.00")])),
            Err(ExtractError::Unavailable("connection reset".to_string())),
        ]),
    );
    let upload_id = h.new_upload(1);

    let err = h.run(upload_id).unwrap_err();
    assert!(matches!(err, PipelineError::ExtractorUnavailable(_)));
    assert_eq!(h.upload(upload_id).status, UploadStatus::Failed);
    // first region was written before the outage
    assert_eq!(h.receipts(upload_id).len(), 2);

    h.extractor.push(readable(receipt("Corner Market", "2024-05-10", "4.00", &[("Tea", "4.00")])));
    h.extractor.push(readable(receipt("Fuel Stop", "2024-05-10", "60.00", &[("Diesel", "60.00")])));

    let outcome = h.run(upload_id).unwrap();
    assert_eq!(outcome.status, UploadStatus::Completed);

    let receipts = h.receipts(upload_id);
    assert_eq!(receipts.len(), 2);
    assert!(receipts.iter().all(|r| r.status == ReceiptStatus::Processed));
    // the rerun does not match its own earlier attempt
    assert!(receipts.iter().all(|r| !r.is_duplicate));

    let system_errors = h
        .db
        .with_conn(|conn| {
            error_repo::count_by_category(conn, upload_id, ErrorCategory::SystemError)
        })
        .unwrap();
    assert_eq!(system_errors, 1);
}

#[test]
fn test_progress_is_reported_in_order() {
    let h = Harness::new(
        ScriptedSegmenter::always(strips(2)),
        ScriptedExtractor::new(vec![
            readable(receipt("A", "2024-03-01", "1.00", &[("x", "1.00")])),
            readable(receipt("B", "2024-03-01", "2.00", &[("y", "2.00")])),
        ]),
    );
    let upload_id = h.new_upload(1);
    let broadcaster = UploadProgressBroadcaster::new(64);
    let mut rx = broadcaster.subscribe();
    let progress = BroadcastProgress::from_tracker(broadcaster.tracker(upload_id, "job-1"));

    let ctx = PipelineContext::new(UploadRequest::new(upload_id, "sheet.png"));
    let (result, ctx) = h.pipeline.run(ctx, &progress);
    assert!(result.is_ok());
    assert_eq!(ctx.stage, Stage::Finalize);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
    assert_eq!(events[0].phase, UploadPhase::Loading);
    assert!(events
        .iter()
        .any(|e| e.phase == UploadPhase::ProcessingReceipts && e.percent == 15));
    assert!(events
        .iter()
        .any(|e| e.phase == UploadPhase::ProcessingReceipts && e.percent == 55));
    let last = events.last().unwrap();
    assert_eq!(last.phase, UploadPhase::Completed);
    assert_eq!(last.percent, 100);
    assert_eq!(last.status, Some(UploadStatus::Completed));
    assert!(events.iter().all(|e| e.job_id == "job-1"));
}

#[test]
fn test_pipeline_is_shared_across_threads() {
    let h = Harness::new(ScriptedSegmenter::always(vec![]), ScriptedExtractor::default());
    let first = h.new_upload(1);
    let second = h.new_upload(2);

    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|id| {
            let pipeline = Arc::clone(&h.pipeline);
            std::thread::spawn(move || {
                let ctx = PipelineContext::new(UploadRequest::new(id, "sheet.png"));
                pipeline.run(ctx, &slipstack::pipeline::NoopProgress).0
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap().status, UploadStatus::Completed);
    }
}
