#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{ImageFormat, Rgb, RgbImage};
use rust_decimal::Decimal;
use tempfile::TempDir;

use slipstack::db::models::{ReceiptRow, UploadRow};
use slipstack::db::{receipt_repo, upload_repo, Database};
use slipstack::pipeline::{
    NoopProgress, Pipeline, PipelineConfig, PipelineContext, PipelineError, UploadOutcome,
};
use slipstack::processor::{
    ExtractError, Extraction, FieldExtractor, ReceiptData, ReceiptItem, Region, SegmentError,
    Segmenter,
};
use slipstack::UploadRequest;

/// Plays back queued answers, then repeats `fallback`.
pub struct ScriptedSegmenter {
    answers: Mutex<VecDeque<Result<Vec<Region>, SegmentError>>>,
    fallback: Vec<Region>,
    pub calls: AtomicUsize,
}

impl ScriptedSegmenter {
    pub fn always(regions: Vec<Region>) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            fallback: regions,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, answer: Result<Vec<Region>, SegmentError>) -> Self {
        self.answers.lock().unwrap().push_back(answer);
        self
    }
}

impl Segmenter for ScriptedSegmenter {
    fn segment(&self, _image: &[u8]) -> Result<Vec<Region>, SegmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answers.lock().unwrap().pop_front() {
            Some(answer) => answer,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Plays back queued extraction answers in call order; unreadable once
/// the script runs out.
#[derive(Default)]
pub struct ScriptedExtractor {
    answers: Mutex<VecDeque<Result<Extraction, ExtractError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(answers: Vec<Result<Extraction, ExtractError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, answer: Result<Extraction, ExtractError>) {
        self.answers.lock().unwrap().push_back(answer);
    }
}

impl FieldExtractor for ScriptedExtractor {
    fn extract(&self, _image: &[u8]) -> Result<Extraction, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Extraction::Unreadable))
    }
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A readable receipt whose items add up to `total`.
pub fn receipt(merchant: &str, date: &str, total: &str, items: &[(&str, &str)]) -> ReceiptData {
    ReceiptData {
        merchant_name: Some(merchant.to_string()),
        transaction_date: Some(date.to_string()),
        transaction_time: None,
        items: items
            .iter()
            .map(|(description, price)| ReceiptItem {
                description: description.to_string(),
                quantity: Some(Decimal::ONE),
                unit: None,
                price: Some(dec(price)),
                keywords: Vec::new(),
            })
            .collect(),
        subtotal: None,
        tax: None,
        total: dec(total),
        currency: Some("eur".to_string()),
        keywords: vec!["groceries".to_string()],
    }
}

pub fn readable(data: ReceiptData) -> Result<Extraction, ExtractError> {
    Ok(Extraction::Readable(data))
}

/// Regions splitting the sheet into `count` vertical strips.
pub fn strips(count: usize) -> Vec<Region> {
    let width = 1000.0 / count as f64;
    (0..count)
        .map(|i| Region::new(i as f64 * width, 0.0, width, 1000.0))
        .collect()
}

/// Writes a plain PNG sheet and returns its path.
pub fn write_sheet(dir: &Path, name: &str) -> PathBuf {
    let mut img = RgbImage::from_pixel(300, 200, Rgb([245, 245, 240]));
    for x in (10..290).step_by(20) {
        img.put_pixel(x, 100, Rgb([20, 20, 20]));
    }
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, ImageFormat::Png).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes.into_inner()).unwrap();
    path
}

/// Temp uploads directory, in-memory database and a pipeline over scripted
/// collaborators.
pub struct Harness {
    pub tmp: TempDir,
    pub db: Database,
    pub config: Arc<PipelineConfig>,
    pub segmenter: Arc<ScriptedSegmenter>,
    pub extractor: Arc<ScriptedExtractor>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn new(segmenter: ScriptedSegmenter, extractor: ScriptedExtractor) -> Self {
        let tmp = TempDir::new().unwrap();
        let uploads = tmp.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        write_sheet(&uploads, "sheet.png");

        let db = Database::open_in_memory().unwrap();
        let config = Arc::new(PipelineConfig::new(&uploads));
        let segmenter = Arc::new(segmenter);
        let extractor = Arc::new(extractor);
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&config),
            db.clone(),
            segmenter.clone(),
            extractor.clone(),
        ));

        Self {
            tmp,
            db,
            config,
            segmenter,
            extractor,
            pipeline,
        }
    }

    pub fn uploads(&self) -> &Path {
        &self.config.uploads_directory
    }

    pub fn new_upload(&self, user_id: i64) -> i64 {
        self.db
            .with_conn(|conn| upload_repo::insert(conn, user_id, "/files/sheet.png"))
            .unwrap()
    }

    pub fn run(&self, upload_id: i64) -> Result<UploadOutcome, PipelineError> {
        let ctx = PipelineContext::new(UploadRequest::new(upload_id, "sheet.png"));
        self.pipeline.run(ctx, &NoopProgress).0
    }

    pub fn upload(&self, upload_id: i64) -> UploadRow {
        self.db
            .with_conn(|conn| upload_repo::find_by_id(conn, upload_id))
            .unwrap()
            .unwrap()
    }

    pub fn receipts(&self, upload_id: i64) -> Vec<ReceiptRow> {
        self.db
            .with_conn(|conn| receipt_repo::list_for_upload(conn, upload_id))
            .unwrap()
    }
}
