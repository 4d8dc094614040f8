//! Per-line classification on top of the WordPiece tokenizer and a model backend.
//!
//! The model is loaded once in the background. Until it is ready, classification calls are
//! rejected with [`ClassifyError::NotReady`]; callers that would rather block can await
//! [`ClassificationEngine::wait_ready`] first.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::inference::{InferenceBackend, InferenceError, Logits, ModelInput, NUM_LABELS};
use crate::tokenizer::WordPieceTokenizer;
use crate::types::LineLabel;
use crate::vocab::SpecialToken;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Classifier model is still loading")]
    NotReady,
    #[error("Classifier model failed to load: {0}")]
    LoadFailed(String),
}

/// Observable lifecycle of the model behind the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    Ready,
    Failed,
}

#[derive(Clone)]
enum ModelState {
    Loading,
    Ready(Arc<dyn InferenceBackend>),
    Failed(String),
}

pub struct ClassificationEngine {
    tokenizer: WordPieceTokenizer,
    state: Arc<watch::Sender<ModelState>>,
}

impl ClassificationEngine {
    /// An engine whose model is still to be loaded with [`spawn_load`](Self::spawn_load).
    pub fn new(tokenizer: WordPieceTokenizer) -> Self {
        let (state, _) = watch::channel(ModelState::Loading);
        Self { tokenizer, state: Arc::new(state) }
    }

    /// An engine that is ready immediately.
    pub fn with_backend(tokenizer: WordPieceTokenizer, backend: impl InferenceBackend + 'static) -> Self {
        let (state, _) = watch::channel(ModelState::Ready(Arc::new(backend)));
        Self { tokenizer, state: Arc::new(state) }
    }

    /// Run `loader` on the blocking pool and publish the outcome. Meant to be called once.
    pub fn spawn_load<F, B>(&self, loader: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Result<B, InferenceError> + Send + 'static,
        B: InferenceBackend + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let next = match loader() {
                Ok(backend) => {
                    tracing::info!("Classifier model ready");
                    ModelState::Ready(Arc::new(backend))
                }
                Err(e) => {
                    tracing::error!("Classifier model failed to load: {e}");
                    ModelState::Failed(e.to_string())
                }
            };
            state.send_replace(next);
        })
    }

    pub fn readiness(&self) -> Readiness {
        match &*self.state.borrow() {
            ModelState::Loading => Readiness::Loading,
            ModelState::Ready(_) => Readiness::Ready,
            ModelState::Failed(_) => Readiness::Failed,
        }
    }

    /// Resolve once loading has finished, successfully or not.
    pub async fn wait_ready(&self) -> Result<(), ClassifyError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, ModelState::Loading))
            .await
            .map_err(|_| ClassifyError::NotReady)?;
        match &*state {
            ModelState::Ready(_) => Ok(()),
            ModelState::Failed(msg) => Err(ClassifyError::LoadFailed(msg.clone())),
            ModelState::Loading => Err(ClassifyError::NotReady),
        }
    }

    pub fn tokenizer(&self) -> &WordPieceTokenizer {
        &self.tokenizer
    }

    pub fn max_length(&self) -> usize {
        self.tokenizer.max_length()
    }

    pub fn special_token_id(&self, token: SpecialToken) -> u32 {
        self.tokenizer.special_token_id(token)
    }

    /// Label one line. Inference failures degrade to [`LineLabel::Other`]; only an unavailable
    /// model is an error.
    pub fn classify_line(&self, line: &str) -> Result<LineLabel, ClassifyError> {
        let backend = self.backend()?;
        Ok(self.label(backend.as_ref(), line))
    }

    fn backend(&self) -> Result<Arc<dyn InferenceBackend>, ClassifyError> {
        match &*self.state.borrow() {
            ModelState::Ready(backend) => Ok(Arc::clone(backend)),
            ModelState::Loading => Err(ClassifyError::NotReady),
            ModelState::Failed(msg) => Err(ClassifyError::LoadFailed(msg.clone())),
        }
    }

    fn label(&self, backend: &dyn InferenceBackend, line: &str) -> LineLabel {
        let tokens = self.tokenizer.tokenize(line);
        let result = backend.infer(&ModelInput::from(&tokens)).and_then(|logits| {
            if logits.seq_len() == tokens.len() && logits.num_labels() == NUM_LABELS {
                Ok(logits)
            } else {
                Err(InferenceError::Shape {
                    expected: tokens.len() * NUM_LABELS,
                    actual: logits.seq_len() * logits.num_labels(),
                })
            }
        });

        match result {
            Ok(logits) => {
                let sep = self.tokenizer.special_token_id(SpecialToken::Sep);
                let label = reduce_logits(&logits, &tokens.input_ids, sep);
                tracing::debug!(%label, "Classified line {line:?}");
                label
            }
            Err(e) => {
                tracing::warn!("Inference failed for line {line:?}, labeling as other: {e}");
                LineLabel::Other
            }
        }
    }
}

/// Pick the channel of the single strongest token logit between CLS and the first SEP.
fn reduce_logits(logits: &Logits, input_ids: &[u32], sep: u32) -> LineLabel {
    let end = input_ids
        .iter()
        .position(|&id| id == sep)
        .unwrap_or(0)
        .min(logits.seq_len());

    let mut best_score = f32::NEG_INFINITY;
    let mut best_channel = 0;
    for pos in 1..end {
        let (channel, score) = argmax(logits.position(pos));
        if score > best_score {
            best_score = score;
            best_channel = channel;
        }
    }
    LineLabel::from_channel(best_channel).unwrap_or_default()
}

/// Index and value of the largest score; the first one wins ties.
fn argmax(scores: &[f32]) -> (usize, f32) {
    scores
        .iter()
        .enumerate()
        .skip(1)
        .fold((0, scores[0]), |(best, best_val), (idx, &val)| {
            if val > best_val {
                (idx, val)
            } else {
                (best, best_val)
            }
        })
}
