//! Token id to text decoding for WordPiece and byte-level BPE vocabularies.

use super::CaptionError;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenizerKind {
    /// BERT-style vocabularies where `##` marks a word continuation.
    #[default]
    #[serde(rename = "wordpiece")]
    WordPiece,
    /// GPT-2 style vocabularies over a printable byte alphabet, `Ġ` marks a space.
    #[serde(rename = "byte-level")]
    ByteLevel,
}

#[derive(Clone, Debug)]
pub struct Tokenizer {
    kind: TokenizerKind,
    vocab: FxHashMap<i64, String>,
    special: FxHashSet<i64>,
}

impl Tokenizer {
    pub fn from_tokens<I>(kind: TokenizerKind, tokens: I, special: &[i64]) -> Self
    where
        I: IntoIterator<Item = (i64, String)>,
    {
        Self {
            kind,
            vocab: tokens.into_iter().collect(),
            special: special.iter().copied().collect(),
        }
    }

    /// Load a vocabulary file.
    ///
    /// `.json` files map token to id (`{"hello": 31373}`); any other file is
    /// read as one token per line where the line number is the id.
    pub fn load(path: &Path, kind: TokenizerKind, special: &[i64]) -> Result<Self, CaptionError> {
        let vocab_error = |reason: String| CaptionError::Vocabulary {
            path: path.to_path_buf(),
            reason,
        };
        if !path.exists() {
            return Err(CaptionError::ModelNotFound(path.to_path_buf()));
        }

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let tokens: Vec<(i64, String)> = if is_json {
            let file = File::open(path).map_err(|e| vocab_error(e.to_string()))?;
            let map: FxHashMap<String, i64> =
                serde_json::from_reader(BufReader::new(file)).map_err(|e| vocab_error(e.to_string()))?;
            map.into_iter().map(|(token, id)| (id, token)).collect()
        } else {
            std::fs::read_to_string(path)
                .map_err(|e| vocab_error(e.to_string()))?
                .lines()
                .enumerate()
                .map(|(id, token)| (id as i64, token.trim_end_matches('\r').to_string()))
                .collect()
        };

        if tokens.is_empty() {
            return Err(vocab_error(String::from("vocabulary is empty")));
        }
        Ok(Self::from_tokens(kind, tokens, special))
    }

    pub fn len(&self) -> usize {
        self.vocab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocab.is_empty()
    }

    pub fn is_special(&self, id: i64) -> bool {
        self.special.contains(&id)
    }

    /// Turn generated ids into text, dropping special and unknown ids.
    pub fn decode(&self, ids: &[i64]) -> String {
        let tokens = ids
            .iter()
            .filter(|id| !self.is_special(**id))
            .filter_map(|id| self.vocab.get(id).map(String::as_str));

        let text = match self.kind {
            TokenizerKind::WordPiece => join_wordpiece(tokens),
            TokenizerKind::ByteLevel => decode_byte_level(tokens),
        };
        text.trim().to_string()
    }
}

fn join_wordpiece<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    let mut text = String::new();
    for token in tokens {
        match token.strip_prefix("##") {
            Some(rest) => text.push_str(rest),
            None => {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(token);
            }
        }
    }
    clean_up_spaces(&text)
}

fn clean_up_spaces(text: &str) -> String {
    const REPLACEMENTS: [(&str, &str); 10] = [
        (" .", "."),
        (" ?", "?"),
        (" !", "!"),
        (" ,", ","),
        (" ' ", "'"),
        (" n't", "n't"),
        (" 'm", "'m"),
        (" 's", "'s"),
        (" 've", "'ve"),
        (" 're", "'re"),
    ];
    REPLACEMENTS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}

fn decode_byte_level<'a>(tokens: impl Iterator<Item = &'a str>) -> String {
    let decoder = byte_decoder();
    let bytes: Vec<u8> = tokens
        .flat_map(|token| token.chars())
        .filter_map(|ch| decoder.get(&ch).copied())
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Inverse of the GPT-2 byte to printable character table.
fn byte_decoder() -> FxHashMap<char, u8> {
    let mut table = FxHashMap::default();
    let mut shifted = 0u32;
    for byte in 0..=u8::MAX {
        let printable = matches!(byte, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
        let ch = if printable {
            char::from(byte)
        } else {
            let ch = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
            shifted += 1;
            ch
        };
        table.insert(ch, byte);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn wordpiece() -> Tokenizer {
        let tokens = ["[PAD]", "a", "dog", "##s", "running", ".", "[SEP]", "it", "'", "s"];
        Tokenizer::from_tokens(
            TokenizerKind::WordPiece,
            tokens
                .iter()
                .enumerate()
                .map(|(id, token)| (id as i64, token.to_string())),
            &[0, 6],
        )
    }

    #[test]
    fn wordpiece_merges_continuations_and_punctuation() {
        let tokenizer = wordpiece();
        assert_eq!(tokenizer.decode(&[1, 2, 3, 4, 5, 6, 0]), "a dogs running.");
        assert_eq!(tokenizer.decode(&[7, 8, 9]), "it's");
    }

    #[test]
    fn special_and_unknown_ids_are_dropped() {
        let tokenizer = wordpiece();
        assert_eq!(tokenizer.decode(&[0, 1, 999, 2, 6]), "a dog");
        assert_eq!(tokenizer.decode(&[0, 6]), "");
    }

    #[test]
    fn byte_level_restores_spaces_and_utf8() {
        let tokenizer = Tokenizer::from_tokens(
            TokenizerKind::ByteLevel,
            vec![
                (0, String::from("a")),
                (1, String::from("Ġman")),
                (2, String::from("Ġriding")),
                (3, String::from("Ġcaf")),
                // "é" is encoded as the two UTF-8 bytes 0xC3 0xA9.
                (4, String::from("Ã©")),
                (5, String::from("<|endoftext|>")),
            ],
            &[5],
        );
        assert_eq!(tokenizer.decode(&[0, 1, 2, 3, 4, 5]), "a man riding café");
    }

    #[test]
    fn byte_decoder_covers_every_byte() {
        let decoder = byte_decoder();
        assert_eq!(decoder.len(), 256);
        assert_eq!(decoder.get(&'Ġ'), Some(&b' '));
        assert_eq!(decoder.get(&'Ċ'), Some(&b'\n'));
        assert_eq!(decoder.get(&'A'), Some(&b'A'));
    }

    #[test]
    fn loads_text_and_json_vocabularies() {
        let dir = tempdir().unwrap();
        let text = dir.path().join("vocab.txt");
        fs::write(&text, "[PAD]\na\ncat\n").unwrap();
        let loaded = Tokenizer::load(&text, TokenizerKind::WordPiece, &[0]).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.decode(&[1, 2]), "a cat");

        let json = dir.path().join("vocab.json");
        fs::write(&json, r#"{"a": 0, "Ġcat": 1}"#).unwrap();
        let loaded = Tokenizer::load(&json, TokenizerKind::ByteLevel, &[]).unwrap();
        assert_eq!(loaded.decode(&[0, 1]), "a cat");
    }

    #[test]
    fn empty_or_missing_vocabulary_is_an_error() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("vocab.txt");
        fs::write(&empty, "").unwrap();
        assert!(matches!(
            Tokenizer::load(&empty, TokenizerKind::WordPiece, &[]),
            Err(CaptionError::Vocabulary { .. })
        ));
        assert!(matches!(
            Tokenizer::load(&dir.path().join("none.txt"), TokenizerKind::WordPiece, &[]),
            Err(CaptionError::ModelNotFound(_))
        ));
    }
}
