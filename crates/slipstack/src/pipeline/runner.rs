use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error, info, info_span, warn};

use crate::broadcast::upload_progress::UploadPhase;
use crate::db::models::{ErrorCategory, NewLineItem, ReceiptStatus, UploadStatus};
use crate::db::receipt_repo::{self, ProcessedFields};
use crate::db::{error_repo, upload_repo, Database, DatabaseError};
use crate::duplicate;
use crate::error::ProcessError;
use crate::processor::image as sheet;
use crate::processor::{
    Annotator, ExtractError, Extraction, FieldExtractor, ReceiptData, Region, RegionOutlines,
    Segmenter,
};
use crate::sanitize;
use crate::storage::{marked_image_name, receipt_image_name, FileStorage};

use super::config::PipelineConfig;
use super::context::{PipelineContext, ReceiptOutcome, Stage, UploadOutcome};
use super::error::{PipelineError, PipelineWarning};
use super::progress::{region_percent, ProgressEvent, ProgressReporter};
use super::validation::validate_receipt;

const DEFAULT_UNIT: &str = "pc";

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    db: Database,
    storage: FileStorage,
    segmenter: Arc<dyn Segmenter>,
    extractor: Arc<dyn FieldExtractor>,
    annotator: Arc<dyn Annotator>,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        db: Database,
        segmenter: Arc<dyn Segmenter>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        let storage = FileStorage::new(&config.uploads_directory);
        Self {
            config,
            db,
            storage,
            segmenter,
            extractor,
            annotator: Arc::new(RegionOutlines),
        }
    }

    /// Replaces the red-outline overlay.
    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = annotator;
        self
    }

    /// Run the full pipeline for one upload.
    ///
    /// Whole-job failures mark the upload `failed`, append a `SYSTEM_ERROR`
    /// row and are returned so the caller can retry. The context is handed
    /// back in both cases.
    pub fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> (Result<UploadOutcome, PipelineError>, PipelineContext) {
        let filename = sanitize::redact_path(Path::new(&ctx.request.image_path));
        let _pipeline_span = info_span!(
            "pipeline",
            upload_id = ctx.upload_id(),
            job_id = %ctx.request.id,
            filename = %filename
        )
        .entered();

        let result = self.run_steps(&mut ctx, progress);

        match &result {
            Ok(outcome) => {
                info!(
                    status = %outcome.status,
                    receipts = outcome.receipts.len(),
                    "Upload processed"
                );
                progress.report(ProgressEvent::Completed {
                    status: outcome.status,
                    receipts: outcome.receipts.len(),
                });
            }
            Err(e) => {
                warn!(stage = ?ctx.stage, error = %e, "Upload processing failed");
                if !matches!(e, PipelineError::UploadNotFound(_)) {
                    self.record_failure(&ctx, e, &filename);
                }
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
            }
        }

        (result, ctx)
    }

    fn run_steps(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<UploadOutcome, PipelineError> {
        // Step 1: Load upload
        {
            let _step = info_span!("load").entered();
            self.step_load(ctx)?;
            progress.report(ProgressEvent::Phase {
                phase: UploadPhase::Loading,
                percent: 5,
                message: "Upload loaded".to_string(),
            });
        }

        // Step 2: Segment
        let (source, image) = {
            let _step = info_span!("segment").entered();
            ctx.stage = Stage::Segment;
            let loaded = self.step_segment(ctx)?;
            progress.report(ProgressEvent::Phase {
                phase: UploadPhase::Segmenting,
                percent: 10,
                message: format!("Found {} receipt(s)", ctx.regions.len()),
            });
            loaded
        };

        if ctx.regions.is_empty() {
            return self.finish_without_receipts(ctx);
        }

        // Step 3: Mark regions on the sheet
        {
            let _step = info_span!("annotate").entered();
            ctx.stage = Stage::Annotate;
            progress.report(ProgressEvent::Phase {
                phase: UploadPhase::Annotating,
                percent: 12,
                message: "Marking detected receipts".to_string(),
            });
            self.step_annotate(ctx, &source, &image)?;
        }

        // Step 4: Per-region crop, extract, validate, persist and score
        {
            let _step = info_span!("receipts", count = ctx.regions.len()).entered();
            ctx.stage = Stage::Receipts;
            self.step_receipts(ctx, &image, progress)?;
        }

        // Step 5: Finalize
        let _step = info_span!("finalize").entered();
        ctx.stage = Stage::Finalize;
        progress.report(ProgressEvent::Phase {
            phase: UploadPhase::Finalizing,
            percent: 95,
            message: "Finalizing upload".to_string(),
        });
        self.step_finalize(ctx)
    }

    fn step_load(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let upload_id = ctx.upload_id();
        let upload = self
            .db
            .with_conn(|conn| upload_repo::find_by_id(conn, upload_id))?
            .ok_or(PipelineError::UploadNotFound(upload_id))?;
        ctx.upload = Some(upload);
        Ok(())
    }

    /// Reads and decodes the sheet, then asks the segmenter for regions.
    /// Returns the raw bytes and the decoded image.
    fn step_segment(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<(Vec<u8>, DynamicImage), PipelineError> {
        let path = self.storage.resolve_image_path(&ctx.request.image_path);
        let source = std::fs::read(&path).map_err(|e| PipelineError::ReadSource {
            path: path.clone(),
            source: e,
        })?;
        let image = sheet::decode(&source)?;

        ctx.regions = self.segmenter.segment(&source)?;
        debug!(regions = ctx.regions.len(), "Segmentation finished");

        if !ctx.regions.is_empty() {
            let upload_id = ctx.upload_id();
            self.db
                .with_conn(|conn| upload_repo::set_has_receipts(conn, upload_id, true))?;
        }

        Ok((source, image))
    }

    fn finish_without_receipts(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<UploadOutcome, PipelineError> {
        let upload_id = ctx.upload_id();
        ctx.stage = Stage::Finalize;
        self.db.with_transaction(|conn| -> Result<(), PipelineError> {
            receipt_repo::clear_for_upload(conn, upload_id, false)?;
            upload_repo::set_has_receipts(conn, upload_id, false)?;
            upload_repo::update_status(conn, upload_id, UploadStatus::Completed)?;
            Ok(())
        })?;

        info!("No receipts detected");
        Ok(UploadOutcome {
            upload_id,
            status: UploadStatus::Completed,
            has_receipts: false,
            marked_image_url: None,
            receipts: Vec::new(),
        })
    }

    fn step_annotate(
        &self,
        ctx: &mut PipelineContext,
        source: &[u8],
        image: &DynamicImage,
    ) -> Result<(), PipelineError> {
        let upload_id = ctx.upload_id();
        let marked = match self.annotator.annotate(image, &ctx.regions) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to draw region outlines: {}", e);
                ctx.warnings.push(PipelineWarning::OverlayFailed {
                    error: e.to_string(),
                });
                source.to_vec()
            }
        };

        let stored = self.storage.save(&marked_image_name(upload_id), &marked)?;
        self.db
            .with_conn(|conn| upload_repo::set_marked_image(conn, upload_id, &stored.public_url))?;
        debug!("Stored {}", sanitize::redact_path(&stored.path));

        ctx.marked_image_url = Some(stored.public_url);
        Ok(())
    }

    fn step_receipts(
        &self,
        ctx: &mut PipelineContext,
        image: &DynamicImage,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let upload_id = ctx.upload_id();
        let user_id = ctx
            .upload
            .as_ref()
            .map(|u| u.user_id)
            .ok_or(PipelineError::UploadNotFound(upload_id))?;

        // Leftovers of an interrupted earlier attempt
        self.db
            .with_conn(|conn| receipt_repo::clear_for_upload(conn, upload_id, false))?;
        ctx.receipts.clear();

        let count = ctx.regions.len();
        for (index, region) in ctx.regions.iter().enumerate() {
            progress.report(ProgressEvent::Phase {
                phase: UploadPhase::ProcessingReceipts,
                percent: region_percent(index, count),
                message: format!("Processing receipt {} of {}", index + 1, count),
            });

            let _receipt = info_span!("receipt", index).entered();
            let outcome = self.process_region(upload_id, user_id, index, region, image)?;
            debug!(receipt_id = outcome.receipt_id, status = %outcome.status, "Receipt done");
            ctx.receipts.push(outcome);
        }

        Ok(())
    }

    fn process_region(
        &self,
        upload_id: i64,
        user_id: i64,
        index: usize,
        region: &Region,
        image: &DynamicImage,
    ) -> Result<ReceiptOutcome, PipelineError> {
        let crop = match sheet::crop_region(image, region, index) {
            Ok(bytes) => bytes,
            Err(e) => return self.record_unreadable(upload_id, index, region, &e),
        };

        let stored = self
            .storage
            .save(&receipt_image_name(upload_id, index), &crop)?;
        let receipt_id = self.db.with_conn(|conn| {
            receipt_repo::upsert_pending(conn, upload_id, index, Some(&stored.public_url))
        })?;

        let extraction = {
            let _step = info_span!("extract").entered();
            self.extractor.extract(&crop)
        };

        match extraction {
            Ok(Extraction::Readable(data)) => {
                self.record_processed(upload_id, user_id, receipt_id, index, &data)
            }
            Ok(Extraction::Unreadable) => self.record_extraction_failure(
                upload_id,
                receipt_id,
                index,
                "Receipt image is unreadable",
            ),
            Err(ExtractError::Unavailable(reason)) => {
                Err(PipelineError::ExtractorUnavailable(reason))
            }
            Err(e) => self.record_extraction_failure(upload_id, receipt_id, index, &e.to_string()),
        }
    }

    fn record_unreadable(
        &self,
        upload_id: i64,
        index: usize,
        region: &Region,
        cause: &ProcessError,
    ) -> Result<ReceiptOutcome, PipelineError> {
        warn!("Region {} cannot be cropped: {}", index, cause);
        let metadata = json!({ "regionIndex": index, "region": region });

        let receipt_id = self.db.with_transaction(|conn| -> Result<i64, PipelineError> {
            let id = receipt_repo::upsert_pending(conn, upload_id, index, None)?;
            receipt_repo::mark_status(conn, id, ReceiptStatus::Unreadable)?;
            error_repo::insert(
                conn,
                upload_id,
                Some(id),
                ErrorCategory::ImageQuality,
                &cause.to_string(),
                &metadata,
            )?;
            Ok(id)
        })?;

        Ok(ReceiptOutcome {
            receipt_id,
            region_index: index,
            status: ReceiptStatus::Unreadable,
            duplicate_of: None,
            confidence_score: None,
        })
    }

    fn record_extraction_failure(
        &self,
        upload_id: i64,
        receipt_id: i64,
        index: usize,
        message: &str,
    ) -> Result<ReceiptOutcome, PipelineError> {
        warn!("Extraction failed for receipt {}: {}", receipt_id, message);
        let metadata = json!({ "regionIndex": index });

        self.db.with_transaction(|conn| -> Result<(), PipelineError> {
            receipt_repo::mark_status(conn, receipt_id, ReceiptStatus::Failed)?;
            error_repo::insert(
                conn,
                upload_id,
                Some(receipt_id),
                ErrorCategory::ExtractionFailure,
                message,
                &metadata,
            )?;
            Ok(())
        })?;

        Ok(ReceiptOutcome {
            receipt_id,
            region_index: index,
            status: ReceiptStatus::Failed,
            duplicate_of: None,
            confidence_score: None,
        })
    }

    /// Persists a readable extraction with its line items and warnings, then
    /// scores it for duplicates, all in one transaction.
    fn record_processed(
        &self,
        upload_id: i64,
        user_id: i64,
        receipt_id: i64,
        index: usize,
        data: &ReceiptData,
    ) -> Result<ReceiptOutcome, PipelineError> {
        let fields = ProcessedFields {
            store_name: data.merchant().map(str::to_string),
            total_amount: data.total,
            tax_amount: data.tax,
            transaction_date: data.date(),
            currency: data
                .currency
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_uppercase)
                .unwrap_or_else(|| self.config.default_currency.clone()),
            keywords: data.keywords.clone(),
        };
        let items = to_line_items(data);
        let issues = validate_receipt(data);

        self.db.with_transaction(|conn| -> Result<ReceiptOutcome, PipelineError> {
            receipt_repo::mark_processed(conn, receipt_id, &fields)?;
            receipt_repo::insert_line_items(conn, receipt_id, &items)?;

            for issue in &issues {
                error_repo::insert(
                    conn,
                    upload_id,
                    Some(receipt_id),
                    ErrorCategory::ValidationWarning,
                    &issue.message(),
                    &issue.metadata(),
                )?;
            }

            let check = duplicate::check_for_duplicates(conn, receipt_id, user_id)?;
            let mut duplicate_of = None;
            if check.is_duplicate {
                if let Some(matched) = &check.matched_receipt {
                    receipt_repo::mark_duplicate(
                        conn,
                        receipt_id,
                        matched.id,
                        check.confidence_score,
                    )?;
                    duplicate_of = Some(matched.id);
                    info!(
                        receipt_id,
                        duplicate_of = matched.id,
                        score = check.confidence_score,
                        "Receipt flagged as duplicate"
                    );
                }
            }

            Ok(ReceiptOutcome {
                receipt_id,
                region_index: index,
                status: ReceiptStatus::Processed,
                duplicate_of,
                confidence_score: check
                    .matched_receipt
                    .is_some()
                    .then_some(check.confidence_score),
            })
        })
    }

    fn step_finalize(&self, ctx: &mut PipelineContext) -> Result<UploadOutcome, PipelineError> {
        let upload_id = ctx.upload_id();
        let status = self.db.with_transaction(|conn| -> Result<UploadStatus, PipelineError> {
            let counts = receipt_repo::status_counts(conn, upload_id)?;
            let status = if counts.total() > 0 && counts.processed == counts.total() {
                UploadStatus::Completed
            } else {
                UploadStatus::PartlyCompleted
            };
            upload_repo::update_status(conn, upload_id, status)?;
            Ok(status)
        })?;

        Ok(UploadOutcome {
            upload_id,
            status,
            has_receipts: true,
            marked_image_url: ctx.marked_image_url.clone(),
            receipts: ctx.receipts.clone(),
        })
    }

    /// Marks the upload failed and appends a `SYSTEM_ERROR` row. Errors here
    /// are logged; the original failure is what the caller sees.
    fn record_failure(&self, ctx: &PipelineContext, cause: &PipelineError, filename: &str) {
        let upload_id = ctx.upload_id();
        let metadata = json!({
            "jobId": ctx.request.id,
            "stage": ctx.stage,
            "image": filename,
            "retryable": cause.is_retryable(),
        });

        let recorded = self.db.with_transaction(|conn| -> Result<(), DatabaseError> {
            upload_repo::update_status(conn, upload_id, UploadStatus::Failed)?;
            error_repo::insert(
                conn,
                upload_id,
                None,
                ErrorCategory::SystemError,
                &cause.to_string(),
                &metadata,
            )?;
            Ok(())
        });

        if let Err(e) = recorded {
            error!("Failed to record failure of upload {}: {}", upload_id, e);
        }
    }
}

/// Maps extracted items onto stored line items. Quantity defaults to 1 and
/// the unit to `pc`; the unit price is derived from the line total.
fn to_line_items(data: &ReceiptData) -> Vec<NewLineItem> {
    data.items
        .iter()
        .map(|item| {
            let amount = item.quantity.unwrap_or(Decimal::ONE);
            let total_price = item.price.unwrap_or(Decimal::ZERO);
            let price_per_unit = (amount > Decimal::ZERO)
                .then(|| total_price.checked_div(amount))
                .flatten()
                .map(|p| p.round_dp(2));
            NewLineItem {
                description: item.description.trim().to_string(),
                amount,
                unit: Some(
                    item.unit
                        .as_deref()
                        .map(str::trim)
                        .filter(|u| !u.is_empty())
                        .unwrap_or(DEFAULT_UNIT)
                        .to_string(),
                ),
                price_per_unit,
                total_price,
                keywords: item.keywords.clone(),
            }
        })
        .collect()
}
