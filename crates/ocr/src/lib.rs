pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod inference;
pub mod ocr;
pub mod pipeline;
pub mod tokenizer;
pub mod types;
pub mod vocab;

pub use aggregate::LineAggregator;
pub use classifier::{ClassificationEngine, ClassifyError, Readiness};
pub use config::{ConfigError, ModelPaths, PipelineOptions, TokenizerConfig};
pub use inference::{InferenceBackend, InferenceError, Logits, MockBackend, ModelInput};
pub use ocr::{OcrEngine, OcrError, StaticText};
pub use pipeline::{PipelineError, ReceiptPipeline};
pub use tokenizer::WordPieceTokenizer;
pub use types::{ClassifiedLine, Item, LineLabel, Receipt, TokenizedLine};
pub use vocab::{SpecialToken, SpecialTokens, Vocabulary, VocabularyStore};
