use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::aggregate::LineAggregator;
use crate::classifier::{ClassificationEngine, ClassifyError};
use crate::config::PipelineOptions;
use crate::ocr::{OcrEngine, OcrError};
use crate::types::{ClassifiedLine, Receipt};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Line classification unavailable: {0}")]
    Classify(#[from] ClassifyError),
    #[error("OCR recognition failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("Receipt extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error("Extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Orchestrates: OCR text → lines → tokenize → classify → aggregate.
#[derive(Clone)]
pub struct ReceiptPipeline {
    engine: Arc<ClassificationEngine>,
    options: PipelineOptions,
}

impl ReceiptPipeline {
    pub fn new(engine: Arc<ClassificationEngine>, options: PipelineOptions) -> Self {
        Self { engine, options }
    }

    pub fn engine(&self) -> &ClassificationEngine {
        &self.engine
    }

    /// Split OCR output into lines (LF or CRLF), dropping lines that are blank.
    pub fn split_lines(text: &str) -> Vec<&str> {
        text.lines().filter(|l| !l.trim().is_empty()).collect()
    }

    /// Run the whole chain synchronously on the calling thread.
    pub fn process_text(&self, text: &str) -> Result<Receipt, PipelineError> {
        self.run(text, &AtomicBool::new(false))
    }

    /// Run the chain on the blocking pool, bounded by the configured request timeout.
    /// On timeout the in-flight work stops at the next line boundary and its result is dropped.
    pub async fn extract(&self, text: String) -> Result<Receipt, PipelineError> {
        let abandoned = Arc::new(AtomicBool::new(false));
        let task = {
            let pipeline = self.clone();
            let abandoned = Arc::clone(&abandoned);
            tokio::task::spawn_blocking(move || pipeline.run(&text, &abandoned))
        };

        let Some(limit) = self.options.request_timeout else {
            return task.await?;
        };
        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                abandoned.store(true, Ordering::Relaxed);
                tracing::warn!("Receipt extraction exceeded {limit:?}, discarding");
                Err(PipelineError::Timeout(limit))
            }
        }
    }

    /// Recognize text in an image, then extract the receipt from it.
    pub async fn extract_from_image<O>(&self, ocr: &O, image_bytes: &[u8]) -> Result<Receipt, PipelineError>
    where
        O: OcrEngine + ?Sized,
    {
        let text = ocr.read_text(image_bytes)?;
        self.extract(text).await
    }

    fn run(&self, text: &str, abandoned: &AtomicBool) -> Result<Receipt, PipelineError> {
        let lines = Self::split_lines(text);
        tracing::debug!(lines = lines.len(), "Classifying receipt lines");

        let mut classified = Vec::with_capacity(lines.len());
        for line in lines {
            if abandoned.load(Ordering::Relaxed) {
                return Err(PipelineError::Timeout(self.options.request_timeout.unwrap_or_default()));
            }
            let label = self.engine.classify_line(line)?;
            classified.push(ClassifiedLine::new(line, label));
        }

        let receipt = LineAggregator::format_receipt(&classified);
        tracing::info!(
            merchant = %receipt.merchant,
            items = receipt.items.len(),
            total = %receipt.total,
            "Receipt extracted"
        );
        Ok(receipt)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::inference::{InferenceError, Logits, MockBackend, ModelInput, NUM_LABELS};
    use crate::ocr::StaticText;
    use crate::tokenizer::WordPieceTokenizer;
    use crate::types::{Item, LineLabel};
    use crate::vocab::{Vocabulary, VocabularyStore};
    use tally_core::Money;

    const RECEIPT: &str = "STOP & SHOP - 123 MAIN ST\n\n01/02/23 14:30\n   \nMILK 2.50\nBALANCE $2.50\n";

    fn tokenizer() -> WordPieceTokenizer {
        // ids: 0 pad, 1 unk, 2 cls, 3 sep, 4 stop, 5 01/02/23, 6 milk, 7 balance
        let vocab: Vocabulary = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "stop", "01/02/23", "milk", "balance"]
            .into_iter()
            .collect();
        let store = VocabularyStore::new(vocab, TokenizerConfig::new(true, 16).unwrap());
        WordPieceTokenizer::new(Arc::new(store))
    }

    /// Labels a line by the first real token it contains.
    fn keyword_logits(input: &ModelInput) -> Result<Logits, InferenceError> {
        let mut data = vec![0.0f32; input.seq_len() * NUM_LABELS];
        if let Some(&id) = input.input_ids.get(1) {
            let channel = match id {
                4 => LineLabel::Merchant,
                5 => LineLabel::Date,
                6 => LineLabel::Item,
                7 => LineLabel::Total,
                _ => LineLabel::Other,
            }
            .channel();
            data[NUM_LABELS + channel] = 1.0;
        }
        Logits::new(data, input.seq_len(), NUM_LABELS)
    }

    fn pipeline_with(backend: MockBackend, options: PipelineOptions) -> ReceiptPipeline {
        let engine = ClassificationEngine::with_backend(tokenizer(), backend);
        ReceiptPipeline::new(Arc::new(engine), options)
    }

    fn pipeline() -> ReceiptPipeline {
        pipeline_with(MockBackend::new(keyword_logits), PipelineOptions::default())
    }

    fn expected_receipt() -> Receipt {
        Receipt {
            merchant: "STOP & SHOP".to_string(),
            date: "01/02/23 14:30".to_string(),
            total: Money::from_cents(250),
            items: vec![Item::new("MILK", Money::from_cents(250))],
        }
    }

    #[test]
    fn split_lines_drops_blank_lines() {
        assert_eq!(
            ReceiptPipeline::split_lines("A\n\n  \nB\r\n\tC"),
            vec!["A", "B", "\tC"]
        );
        assert!(ReceiptPipeline::split_lines("").is_empty());
    }

    #[test]
    fn crlf_text_gives_clean_fields() {
        let text = RECEIPT.replace('\n', "\r\n");
        assert_eq!(pipeline().process_text(&text).unwrap(), expected_receipt());
    }

    #[test]
    fn process_text_end_to_end() {
        assert_eq!(pipeline().process_text(RECEIPT).unwrap(), expected_receipt());
    }

    #[test]
    fn empty_text_gives_default_receipt() {
        assert_eq!(pipeline().process_text("\n\n").unwrap(), Receipt::default());
    }

    #[test]
    fn inference_failures_still_complete_request() {
        let p = pipeline_with(MockBackend::failing("oom"), PipelineOptions::default());
        let r = p.process_text(RECEIPT).unwrap();
        // Every line is `other`, so only the unlabeled fallbacks apply.
        assert_eq!(r.merchant, "STOP & SHOP");
        assert_eq!(r.date, "01/02/23 14:30");
        assert_eq!(r.total, Money::from_cents(250));
        assert!(r.items.is_empty());
    }

    #[tokio::test]
    async fn extract_runs_on_blocking_pool() {
        let r = pipeline().extract(RECEIPT.to_string()).await.unwrap();
        assert_eq!(r, expected_receipt());
    }

    #[tokio::test]
    async fn extract_rejects_while_model_loading() {
        let engine = ClassificationEngine::new(tokenizer());
        let p = ReceiptPipeline::new(Arc::new(engine), PipelineOptions::default());
        let err = p.extract(RECEIPT.to_string()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Classify(ClassifyError::NotReady)));
    }

    #[tokio::test]
    async fn extract_times_out() {
        let slow = MockBackend::new(|input| {
            std::thread::sleep(Duration::from_millis(100));
            keyword_logits(input)
        });
        let options = PipelineOptions { request_timeout: Some(Duration::from_millis(10)) };
        let err = pipeline_with(slow, options)
            .extract(RECEIPT.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(d) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn extract_within_timeout_succeeds() {
        let options = PipelineOptions { request_timeout: Some(Duration::from_secs(5)) };
        let r = pipeline_with(MockBackend::new(keyword_logits), options)
            .extract(RECEIPT.to_string())
            .await
            .unwrap();
        assert_eq!(r, expected_receipt());
    }

    #[tokio::test]
    async fn extract_from_image_uses_ocr_text() {
        let ocr = StaticText::new(RECEIPT);
        let r = pipeline().extract_from_image(&ocr, b"fake image").await.unwrap();
        assert_eq!(r, expected_receipt());
    }

    struct BrokenOcr;

    impl OcrEngine for BrokenOcr {
        fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
            Err(OcrError::Recognize("not a PNG".into()))
        }
    }

    #[tokio::test]
    async fn ocr_failure_propagates() {
        let err = pipeline().extract_from_image(&BrokenOcr, b"").await.unwrap_err();
        assert!(matches!(err, PipelineError::Ocr(OcrError::Recognize(_))));
    }
}
