//! The image-to-text step in front of the receipt pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine for '{lang}' failed to start: {message}")]
    Init { lang: String, message: String },
    #[error("Text recognition failed: {0}")]
    Recognize(String),
    #[error("No OCR engine in this build; enable the `tesseract` feature")]
    Unavailable,
}

/// Image-to-text collaborator. Takes encoded PNG/JPEG bytes and returns the recognized text.
pub trait OcrEngine: Send + Sync {
    /// Raw engine output.
    fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError>;

    /// Engine output reduced to one receipt line per `\n`, see [`normalize_text`].
    fn read_text(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
        self.recognize(image_bytes).map(|raw| normalize_text(&raw))
    }
}

/// Tidy OCR output into plain receipt lines: CR/CRLF become LF, page breaks (form feeds)
/// end a line, column gaps collapse to one space, and edge whitespace is trimmed.
/// Blank lines are kept; the pipeline drops them when splitting.
pub fn normalize_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .split(['\r', '\n', '\x0c'])
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns the same text for every image.
pub struct StaticText {
    pub text: String,
}

impl StaticText {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl OcrEngine for StaticText {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<String, OcrError> {
        Ok(self.text.clone())
    }
}

#[cfg(feature = "tesseract")]
pub mod tesseract_backend {
    use std::cell::RefCell;

    use leptess::LepTess;

    use super::{OcrEngine, OcrError};

    type SessionKey = (Option<String>, String);

    thread_local! {
        // Starting Tesseract loads the language model, so each worker thread keeps its last one.
        static SESSION: RefCell<Option<(SessionKey, LepTess)>> = const { RefCell::new(None) };
    }

    pub struct TesseractEngine {
        data_path: Option<String>,
        lang: String,
    }

    impl TesseractEngine {
        pub fn new(data_path: Option<String>, lang: &str) -> Self {
            Self { data_path, lang: lang.to_string() }
        }

        fn with_session<T>(
            &self,
            run: impl FnOnce(&mut LepTess) -> Result<T, OcrError>,
        ) -> Result<T, OcrError> {
            let key = (self.data_path.clone(), self.lang.clone());
            SESSION.with(|cell| {
                let mut slot = cell.borrow_mut();
                let mut session = match slot.take() {
                    Some((cached, session)) if cached == key => session,
                    _ => LepTess::new(self.data_path.as_deref(), &self.lang).map_err(|e| {
                        OcrError::Init { lang: self.lang.clone(), message: e.to_string() }
                    })?,
                };
                let out = run(&mut session);
                *slot = Some((key, session));
                out
            })
        }
    }

    impl OcrEngine for TesseractEngine {
        fn recognize(&self, image_bytes: &[u8]) -> Result<String, OcrError> {
            self.with_session(|session| {
                session
                    .set_image_from_mem(image_bytes)
                    .map_err(|e| OcrError::Recognize(format!("unreadable image: {e}")))?;
                session
                    .get_utf8_text()
                    .map_err(|e| OcrError::Recognize(e.to_string()))
            })
        }
    }
}
