//! Greedy longest-match-first WordPiece tokenization into fixed-length model input.

use std::sync::Arc;

use crate::types::TokenizedLine;
use crate::vocab::{SpecialToken, VocabularyStore};

/// Words longer than this (in characters) are not decomposed and become a single UNK.
pub const MAX_WORD_CHARS: usize = 200;

const CONTINUATION_PREFIX: &str = "##";

#[derive(Debug, Clone)]
pub struct WordPieceTokenizer {
    store: Arc<VocabularyStore>,
}

impl WordPieceTokenizer {
    pub fn new(store: Arc<VocabularyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &VocabularyStore {
        &self.store
    }

    pub fn max_length(&self) -> usize {
        self.store.max_length()
    }

    pub fn special_token_id(&self, token: SpecialToken) -> u32 {
        self.store.special_token_id(token)
    }

    /// Encode one line as `[CLS] subwords.. [SEP] [PAD]..`, exactly `max_length` long.
    pub fn tokenize(&self, line: &str) -> TokenizedLine {
        let special = self.store.special_tokens();
        let max_length = self.store.max_length();
        // Room for the content between CLS and SEP.
        let budget = max_length.saturating_sub(2);

        let text = if self.store.do_lower_case() {
            line.to_lowercase()
        } else {
            line.to_string()
        };

        let mut input_ids = Vec::with_capacity(max_length);
        input_ids.push(special.cls);
        for word in text.split_whitespace() {
            let room = budget + 1 - input_ids.len();
            if room == 0 {
                break;
            }
            let pieces = self.wordpiece(word);
            input_ids.extend(pieces.into_iter().take(room));
        }
        input_ids.push(special.sep);

        let content_len = input_ids.len();
        input_ids.resize(max_length, special.pad);

        let mut attention_mask = vec![1u32; content_len];
        attention_mask.resize(max_length, 0);

        TokenizedLine {
            input_ids,
            attention_mask,
            token_type_ids: vec![0; max_length],
        }
    }

    /// Decompose one word into subword ids. An unmatched remainder becomes UNK and ends the word.
    fn wordpiece(&self, word: &str) -> Vec<u32> {
        let vocab = self.store.vocabulary();
        let unk = self.store.special_token_id(SpecialToken::Unk);

        let chars: Vec<char> = word.chars().collect();
        if chars.len() > MAX_WORD_CHARS {
            return vec![unk];
        }

        let mut ids = Vec::new();
        let mut start = 0;
        let mut candidate = String::new();
        while start < chars.len() {
            let mut end = chars.len();
            let mut matched = None;
            while end > start {
                candidate.clear();
                if start > 0 {
                    candidate.push_str(CONTINUATION_PREFIX);
                }
                candidate.extend(&chars[start..end]);
                if let Some(id) = vocab.id(&candidate) {
                    matched = Some(id);
                    break;
                }
                end -= 1;
            }
            match matched {
                Some(id) => {
                    ids.push(id);
                    start = end;
                }
                None => {
                    ids.push(unk);
                    break;
                }
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::vocab::Vocabulary;

    const PAD: u32 = 0;
    const UNK: u32 = 1;
    const CLS: u32 = 2;
    const SEP: u32 = 3;

    fn vocab() -> Vocabulary {
        [
            "[PAD]", "[UNK]", "[CLS]", "[SEP]", // 0..3
            "milk", "bal", "##ance", "$", "##2", "2", "##.", "##50", // 4..11
            "stop", "&", "shop", "un", "##aff", "##able", // 12..17
        ]
        .into_iter()
        .collect()
    }

    fn tokenizer(max_length: usize, lower: bool) -> WordPieceTokenizer {
        let store = VocabularyStore::new(vocab(), TokenizerConfig::new(lower, max_length).unwrap());
        WordPieceTokenizer::new(Arc::new(store))
    }

    #[test]
    fn all_sequences_have_max_length() {
        let t = tokenizer(16, true);
        for line in ["", "milk", "STOP & SHOP - 123 MAIN ST", "x ".repeat(40).as_str()] {
            let out = t.tokenize(line);
            assert_eq!(out.input_ids.len(), 16);
            assert_eq!(out.attention_mask.len(), 16);
            assert_eq!(out.token_type_ids.len(), 16);
            assert_eq!(out.input_ids[0], CLS);
            assert!(out.token_type_ids.iter().all(|&t| t == 0));
        }
    }

    #[test]
    fn layout_is_cls_content_sep_then_padding() {
        let t = tokenizer(8, true);
        let out = t.tokenize("MILK");
        assert_eq!(out.input_ids, vec![CLS, 4, SEP, PAD, PAD, PAD, PAD, PAD]);
        assert_eq!(out.attention_mask, vec![1, 1, 1, 0, 0, 0, 0, 0]);
        assert_eq!(out.content_len(), 3);
    }

    #[test]
    fn continuation_pieces_use_prefix() {
        let t = tokenizer(8, true);
        let out = t.tokenize("unaffable balance");
        assert_eq!(&out.input_ids[..7], &[CLS, 15, 16, 17, 5, 6, SEP]);
    }

    #[test]
    fn longest_match_wins() {
        let t = tokenizer(8, true);
        // "2.50" -> "2" then "##." then "##50", never "##5".
        let out = t.tokenize("2.50");
        assert_eq!(&out.input_ids[..5], &[CLS, 9, 10, 11, SEP]);
    }

    #[test]
    fn unmatched_remainder_becomes_unk_and_stops_word() {
        let t = tokenizer(8, true);
        // "milkx": "milk" matches, "##x" does not.
        let out = t.tokenize("milkx shop");
        assert_eq!(&out.input_ids[..5], &[CLS, 4, UNK, 14, SEP]);
    }

    #[test]
    fn unknown_word_is_single_unk() {
        let t = tokenizer(8, true);
        let out = t.tokenize("zzz");
        assert_eq!(&out.input_ids[..3], &[CLS, UNK, SEP]);
    }

    #[test]
    fn overlong_word_is_single_unk() {
        let t = tokenizer(8, true);
        let word = "milk".repeat(51);
        assert!(word.chars().count() > MAX_WORD_CHARS);
        let out = t.tokenize(&format!("{word} shop"));
        assert_eq!(&out.input_ids[..4], &[CLS, UNK, 14, SEP]);
    }

    #[test]
    fn word_at_length_cap_is_still_decomposed() {
        let t = tokenizer(8, true);
        let word = "m".repeat(MAX_WORD_CHARS);
        let out = t.tokenize(&word);
        // Decomposition runs and fails on the first piece.
        assert_eq!(&out.input_ids[..3], &[CLS, UNK, SEP]);
    }

    #[test]
    fn lowercasing_is_configurable() {
        let lower = tokenizer(8, true).tokenize("MILK");
        let exact = tokenizer(8, false).tokenize("MILK");
        assert_eq!(lower.input_ids[1], 4);
        assert_eq!(exact.input_ids[1], UNK);
    }

    #[test]
    fn truncation_keeps_trailing_sep() {
        let t = tokenizer(5, true);
        let out = t.tokenize("milk milk milk milk milk");
        assert_eq!(out.input_ids, vec![CLS, 4, 4, 4, SEP]);
        assert_eq!(out.attention_mask, vec![1; 5]);
    }

    #[test]
    fn truncation_can_split_a_word() {
        let t = tokenizer(4, true);
        let out = t.tokenize("unaffable");
        assert_eq!(out.input_ids, vec![CLS, 15, 16, SEP]);
    }

    #[test]
    fn minimal_length_holds_only_markers() {
        let t = tokenizer(2, true);
        let out = t.tokenize("milk shop");
        assert_eq!(out.input_ids, vec![CLS, SEP]);
    }

    #[test]
    fn tokenization_is_deterministic() {
        let t = tokenizer(16, true);
        let line = "STOP & SHOP - 123 MAIN ST";
        assert_eq!(t.tokenize(line), t.tokenize(line));
    }

    #[test]
    fn multibyte_characters_split_on_char_boundaries() {
        let t = tokenizer(8, true);
        let out = t.tokenize("café milk");
        assert_eq!(&out.input_ids[..4], &[CLS, UNK, 4, SEP]);
    }
}
