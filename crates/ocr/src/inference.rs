use thiserror::Error;

use crate::types::TokenizedLine;

/// Number of output channels of the line classifier.
pub const NUM_LABELS: usize = 5;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Run(String),
    #[error("Unexpected logits shape: expected {expected} values, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("Classifier not available; build with the `onnx` feature")]
    NotAvailable,
}

/// The three model input tensors for one line, widened to `i64`. Shape is `[1, seq_len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInput {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl ModelInput {
    pub fn seq_len(&self) -> usize {
        self.input_ids.len()
    }
}

impl From<&TokenizedLine> for ModelInput {
    fn from(line: &TokenizedLine) -> Self {
        let widen = |v: &[u32]| -> Vec<i64> { v.iter().map(|&x| i64::from(x)).collect() };
        Self {
            input_ids: widen(&line.input_ids),
            attention_mask: widen(&line.attention_mask),
            token_type_ids: widen(&line.token_type_ids),
        }
    }
}

/// Row-major `[1, seq_len, num_labels]` logits.
#[derive(Debug, Clone, PartialEq)]
pub struct Logits {
    data: Vec<f32>,
    seq_len: usize,
    num_labels: usize,
}

impl Logits {
    pub fn new(data: Vec<f32>, seq_len: usize, num_labels: usize) -> Result<Self, InferenceError> {
        let expected = seq_len * num_labels;
        if data.len() != expected || num_labels == 0 {
            return Err(InferenceError::Shape { expected, actual: data.len() });
        }
        Ok(Self { data, seq_len, num_labels })
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Scores of every channel at one token position.
    pub fn position(&self, pos: usize) -> &[f32] {
        let start = pos * self.num_labels;
        &self.data[start..start + self.num_labels]
    }
}

/// Abstraction over the pretrained sequence-classification model.
/// Implementations must be callable from several requests at once, serialising internally if
/// the runtime cannot.
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, input: &ModelInput) -> Result<Logits, InferenceError>;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

type InferFn = dyn Fn(&ModelInput) -> Result<Logits, InferenceError> + Send + Sync;

/// Backend driven by a closure, for exercising the classifier without a model file.
pub struct MockBackend {
    respond: Box<InferFn>,
}

impl MockBackend {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&ModelInput) -> Result<Logits, InferenceError> + Send + Sync + 'static,
    {
        Self { respond: Box::new(respond) }
    }

    /// Every call fails with `InferenceError::Run`.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |_| Err(InferenceError::Run(message.clone())))
    }
}

impl InferenceBackend for MockBackend {
    fn infer(&self, input: &ModelInput) -> Result<Logits, InferenceError> {
        (self.respond)(input)
    }
}

// ── ONNX Runtime backend (optional, gated behind `onnx` feature) ──────────────

#[cfg(feature = "onnx")]
pub mod onnx_backend {
    use std::path::Path;
    use std::sync::Mutex;

    use ort::session::Session;
    use ort::value::Tensor;

    use super::{InferenceBackend, InferenceError, Logits, ModelInput, NUM_LABELS};

    /// A loaded ONNX session. `Session::run` needs exclusive access, so calls are serialised.
    pub struct OnnxBackend {
        session: Mutex<Session>,
    }

    impl OnnxBackend {
        pub fn load(path: &Path) -> Result<Self, InferenceError> {
            let session = Session::builder()
                .and_then(|builder| builder.commit_from_file(path))
                .map_err(|e| InferenceError::Load(format!("{}: {e}", path.display())))?;
            Ok(Self { session: Mutex::new(session) })
        }
    }

    fn tensor(values: &[i64]) -> Result<Tensor<i64>, InferenceError> {
        Tensor::from_array(([1usize, values.len()], values.to_vec()))
            .map_err(|e| InferenceError::Run(e.to_string()))
    }

    impl InferenceBackend for OnnxBackend {
        fn infer(&self, input: &ModelInput) -> Result<Logits, InferenceError> {
            let inputs = ort::inputs![
                "input_ids" => tensor(&input.input_ids)?,
                "attention_mask" => tensor(&input.attention_mask)?,
                "token_type_ids" => tensor(&input.token_type_ids)?,
            ];
            let mut session = self
                .session
                .lock()
                .map_err(|_| InferenceError::Run("session lock poisoned".to_string()))?;
            let outputs = session
                .run(inputs)
                .map_err(|e| InferenceError::Run(e.to_string()))?;
            let (_, data) = outputs["logits"]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Run(e.to_string()))?;
            Logits::new(data.to_vec(), input.seq_len(), NUM_LABELS)
        }
    }
}
