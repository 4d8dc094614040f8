//! Vocabulary and tokenizer settings for the line classifier.
//!
//! Everything here is loaded once at startup and shared read-only afterwards.

use std::collections::HashMap;
use std::path::Path;

use crate::config::{ConfigError, ModelPaths, TokenizerConfig};

/// Token string to id. The id of a token is its line number in `vocab.txt`.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    ids: HashMap<String, u32>,
}

impl Vocabulary {
    /// Parse `vocab.txt` content. Tokens are trimmed; blank lines still occupy an id.
    pub fn parse(content: &str) -> Self {
        let mut ids = HashMap::new();
        for (idx, line) in content.lines().enumerate() {
            let token = line.trim();
            if token.is_empty() {
                continue;
            }
            // Later duplicates take the later position.
            ids.insert(token.to_string(), idx as u32);
        }
        Self { ids }
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.ids.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for Vocabulary {
    /// Assign ids by iteration order, as if each item were one line of `vocab.txt`.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let lines: Vec<String> = iter.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self::parse(&lines.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialToken {
    Cls,
    Sep,
    Pad,
    Unk,
}

impl SpecialToken {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialToken::Cls => "[CLS]",
            SpecialToken::Sep => "[SEP]",
            SpecialToken::Pad => "[PAD]",
            SpecialToken::Unk => "[UNK]",
        }
    }

    /// Id from the stock BERT uncased vocabulary, used when the loaded vocabulary lacks the token.
    pub fn fallback_id(self) -> u32 {
        match self {
            SpecialToken::Cls => 101,
            SpecialToken::Sep => 102,
            SpecialToken::Pad => 0,
            SpecialToken::Unk => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls: u32,
    pub sep: u32,
    pub pad: u32,
    pub unk: u32,
}

impl SpecialTokens {
    pub fn resolve(vocab: &Vocabulary) -> Self {
        let id = |t: SpecialToken| vocab.id(t.as_str()).unwrap_or_else(|| t.fallback_id());
        Self {
            cls: id(SpecialToken::Cls),
            sep: id(SpecialToken::Sep),
            pad: id(SpecialToken::Pad),
            unk: id(SpecialToken::Unk),
        }
    }

    pub fn get(&self, token: SpecialToken) -> u32 {
        match token {
            SpecialToken::Cls => self.cls,
            SpecialToken::Sep => self.sep,
            SpecialToken::Pad => self.pad,
            SpecialToken::Unk => self.unk,
        }
    }
}

/// Frozen vocabulary, special token ids, and tokenizer settings.
#[derive(Debug, Clone)]
pub struct VocabularyStore {
    vocab: Vocabulary,
    special: SpecialTokens,
    config: TokenizerConfig,
}

impl VocabularyStore {
    pub fn new(vocab: Vocabulary, config: TokenizerConfig) -> Self {
        let special = SpecialTokens::resolve(&vocab);
        Self { vocab, special, config }
    }

    /// Load `vocab.txt` plus the tokenizer and model configs. Any failure is fatal to startup.
    pub fn load(paths: &ModelPaths) -> Result<Self, ConfigError> {
        let vocab = load_vocabulary(&paths.vocab)?;
        let config = TokenizerConfig::load(&paths.tokenizer_config, &paths.model_config)?;
        tracing::info!(
            tokens = vocab.len(),
            max_length = config.max_length(),
            lower_case = config.do_lower_case(),
            "Vocabulary loaded from {}",
            paths.vocab.display()
        );
        Ok(Self::new(vocab, config))
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    pub fn special_token_id(&self, token: SpecialToken) -> u32 {
        self.special.get(token)
    }

    pub fn max_length(&self) -> usize {
        self.config.max_length()
    }

    pub fn do_lower_case(&self) -> bool {
        self.config.do_lower_case()
    }
}

fn load_vocabulary(path: &Path) -> Result<Vocabulary, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let vocab = Vocabulary::parse(&content);
    if vocab.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "vocabulary {} contains no tokens",
            path.display()
        )));
    }
    Ok(vocab)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn ids_follow_line_order() {
        let v = Vocabulary::parse("[PAD]\nhello\nworld\n##s\n");
        assert_eq!(v.id("[PAD]"), Some(0));
        assert_eq!(v.id("hello"), Some(1));
        assert_eq!(v.id("world"), Some(2));
        assert_eq!(v.id("##s"), Some(3));
        assert_eq!(v.len(), 4);
    }

    #[test]
    fn blank_lines_keep_their_slot() {
        let v = Vocabulary::parse("a\n\nb\r\n  c  ");
        assert_eq!(v.id("a"), Some(0));
        assert_eq!(v.id("b"), Some(2));
        assert_eq!(v.id("c"), Some(3));
        assert!(!v.contains(""));
    }

    #[test]
    fn special_tokens_from_vocab() {
        let v: Vocabulary = ["[PAD]", "[UNK]", "[CLS]", "[SEP]"].into_iter().collect();
        let s = SpecialTokens::resolve(&v);
        assert_eq!(s, SpecialTokens { cls: 2, sep: 3, pad: 0, unk: 1 });
    }

    #[test]
    fn special_tokens_fall_back_when_missing() {
        let v: Vocabulary = ["hello"].into_iter().collect();
        let s = SpecialTokens::resolve(&v);
        assert_eq!(s, SpecialTokens { cls: 101, sep: 102, pad: 0, unk: 100 });
    }

    #[test]
    fn store_accessors() {
        let v: Vocabulary = ["[PAD]", "[UNK]", "[CLS]", "[SEP]"].into_iter().collect();
        let store = VocabularyStore::new(v, TokenizerConfig::new(false, 16).unwrap());
        assert_eq!(store.max_length(), 16);
        assert!(!store.do_lower_case());
        assert_eq!(store.special_token_id(SpecialToken::Sep), 3);
        assert_eq!(store.vocabulary().len(), 4);
    }

    #[test]
    fn load_from_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vocab.txt"), "[PAD]\n[UNK]\n[CLS]\n[SEP]\nmilk\n").unwrap();
        fs::write(dir.path().join("tokenizer.json"), r#"{"do_lower_case": true}"#).unwrap();
        fs::write(dir.path().join("config.json"), r#"{"max_position_embeddings": 32}"#).unwrap();

        let store = VocabularyStore::load(&ModelPaths::in_dir(dir.path())).unwrap();
        assert_eq!(store.max_length(), 32);
        assert_eq!(store.vocabulary().id("milk"), Some(4));
        assert_eq!(store.special_token_id(SpecialToken::Cls), 2);
    }

    #[test]
    fn empty_vocabulary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vocab.txt"), "\n\n").unwrap();
        fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
        fs::write(dir.path().join("config.json"), "{}").unwrap();
        let err = VocabularyStore::load(&ModelPaths::in_dir(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_vocab_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = VocabularyStore::load(&ModelPaths::in_dir(dir.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
