//! Content hash over the visible text layer
//!
//! A raster-resilient fingerprint: the text of up to twenty pages is reduced
//! to a canonical bag of tokens and hashed. Re-encoding, recompression, or
//! image-only edits leave it unchanged; any visible text edit moves it.

use std::collections::BTreeMap;

use serde_json::json;
use unicode_normalization::UnicodeNormalization;

use super::canonical::canonical_json_hash;
use super::hash::Hash256;

/// Payload version stamped into the hashed token bag
pub const CONTENT_HASH_VERSION: u32 = 1;

/// Pages of text considered; deeper pages are ignored
pub const MAX_CONTENT_PAGES: usize = 20;

/// Punctuation runs longer than this are treated as decoration and dropped
const MAX_PUNCT_RUN: usize = 3;

/// Compute the content hash over extracted page texts.
pub fn content_hash(pages: &[String]) -> Hash256 {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut token_count: u64 = 0;

    for page in pages.iter().take(MAX_CONTENT_PAGES) {
        for token in tokenize(page) {
            *counts.entry(token).or_insert(0) += 1;
            token_count += 1;
        }
    }

    let payload = json!({
        "v": CONTENT_HASH_VERSION,
        "counts": counts,
        "tokenCount": token_count,
    });
    canonical_json_hash(&payload)
}

/// Tokenize one page of text into the canonical bag entries.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize_text(text);
    let raw = split_tokens(&normalized);
    merge_fragments(raw)
}

/// NFKC, lowercase, and unify the characters PDF extractors commonly mangle.
fn normalize_text(text: &str) -> String {
    text.nfkc()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            '\u{2010}'..='\u{2015}' | '\u{2212}' => '-',
            '\u{00A0}' | '\u{2000}'..='\u{200B}' | '\u{202F}' | '\u{3000}' => ' ',
            other => other,
        })
        .collect()
}

#[derive(PartialEq)]
enum TokenKind {
    Word,
    Punct,
}

fn classify(c: char) -> Option<TokenKind> {
    if c.is_alphabetic() || c.is_numeric() {
        Some(TokenKind::Word)
    } else if matches!(c, '.' | ',' | '-' | '/') {
        Some(TokenKind::Punct)
    } else {
        None
    }
}

fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut kind: Option<TokenKind> = None;

    for c in text.chars() {
        let class = classify(c);
        match (&kind, &class) {
            (Some(k), Some(c_kind)) if *k == *c_kind => current.push(c),
            _ => {
                flush(&mut tokens, &mut current, &kind);
                if class.is_some() {
                    current.push(c);
                }
                kind = class;
            }
        }
    }
    flush(&mut tokens, &mut current, &kind);
    tokens
}

fn flush(tokens: &mut Vec<String>, current: &mut String, kind: &Option<TokenKind>) {
    if current.is_empty() {
        return;
    }
    let keep = match kind {
        Some(TokenKind::Punct) => current.chars().count() <= MAX_PUNCT_RUN,
        Some(TokenKind::Word) => true,
        None => false,
    };
    if keep {
        tokens.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Rejoin words the text extractor shattered into single letters
/// ("C e r t i f i c a t e" becomes "certificate").
fn merge_fragments(tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut run: Vec<String> = Vec::new();

    let is_fragment =
        |t: &String| t.chars().count() == 1 && t.chars().all(|c| c.is_alphabetic());

    for token in tokens {
        if is_fragment(&token) {
            run.push(token);
            continue;
        }
        drain_run(&mut out, &mut run);
        out.push(token);
    }
    drain_run(&mut out, &mut run);
    out
}

fn drain_run(out: &mut Vec<String>, run: &mut Vec<String>) {
    match run.len() {
        0 => {}
        1 => out.push(run.remove(0)),
        _ => {
            out.push(run.concat());
            run.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenization() {
        assert_eq!(
            tokenize("Issued to Alice on 2023-11-13"),
            vec!["issued", "to", "alice", "on", "2023", "-", "11", "-", "13"]
        );
    }

    #[test]
    fn test_punctuation_runs_dropped() {
        let tokens = tokenize("total ..... due");
        assert_eq!(tokens, vec!["total", "due"]);
    }

    #[test]
    fn test_short_punctuation_kept() {
        let tokens = tokenize("a/b, c");
        assert!(tokens.contains(&"/".to_string()));
        assert!(tokens.contains(&",".to_string()));
    }

    #[test]
    fn test_fragment_merge() {
        assert_eq!(
            tokenize("C e r t i f i c a t e of merit"),
            vec!["certificate", "of", "merit"]
        );
    }

    #[test]
    fn test_single_letter_word_survives() {
        assert_eq!(tokenize("grade a result"), vec!["grade", "a", "result"]);
    }

    #[test]
    fn test_smart_characters_unified() {
        let fancy = tokenize("it\u{2019}s \u{201C}done\u{201D} \u{2014} now");
        let plain = tokenize("it's \"done\" - now");
        assert_eq!(fancy, plain);
    }

    #[test]
    fn test_hash_stable_under_whitespace_and_case() {
        let a = content_hash(&["Hello   World".to_string()]);
        let b = content_hash(&["hello\nworld".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_moves_on_text_change() {
        let a = content_hash(&["issued to alice".to_string()]);
        let b = content_hash(&["issued to mallory".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pages_beyond_limit_ignored() {
        let mut pages: Vec<String> = (0..MAX_CONTENT_PAGES).map(|i| format!("page {i}")).collect();
        let base = content_hash(&pages);
        pages.push("trailing page".to_string());
        assert_eq!(content_hash(&pages), base);
    }

    #[test]
    fn test_order_insensitive_bag() {
        let a = content_hash(&["alpha beta".to_string()]);
        let b = content_hash(&["beta alpha".to_string()]);
        assert_eq!(a, b);
    }
}
