//! Keyword normalization and generation
//!
//! Track metadata is inverted into keyword entries: the title, artist and
//! album fields are tokenized, stop-words are dropped, and each surviving
//! token becomes a `keyword/`-prefixed index key. The stop-word list is a
//! fixed, case-insensitive set of English, Italian and French articles,
//! prepositions and conjunctions.

use super::TrackTag;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashSet};

/// Prefix of every keyword entry identifier
pub const KEYWORD_PREFIX: &str = "keyword/";

/// Keywords are truncated to this many characters after normalization
pub const MAX_KEYWORD_LEN: usize = 32;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English articles, prepositions, conjunctions
        "a", "an", "the", "of", "in", "on", "at", "by", "for", "with", "from", "to", "into",
        "over", "under", "about", "as", "and", "or", "but", "nor", "so", "yet", "if", "because",
        "while", "although", "that", "than", "whether", "both", "either", "neither",
        // Italian
        "il", "lo", "la", "i", "gli", "le", "un", "uno", "una", "di", "da", "con", "su", "per",
        "tra", "fra", "del", "dello", "della", "dei", "degli", "delle", "al", "allo", "alla",
        "ai", "agli", "alle", "dal", "dalla", "nel", "nella", "nei", "nelle", "sul", "sulla",
        "e", "ed", "o", "od", "ma", "se", "che", "perche", "anche", "come", "mentre", "quindi",
        // French
        "les", "une", "des", "du", "de", "d", "l", "au", "aux", "en", "dans", "sur", "sous",
        "avec", "sans", "pour", "par", "vers", "chez", "et", "ou", "mais", "donc", "ni", "car",
        "si", "que", "quand", "comme", "lorsque",
    ]
    .into_iter()
    .collect()
});

/// Fold common accented Latin characters to their ASCII base
fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ç' => 'c',
        'ñ' => 'n',
        _ => c,
    }
}

/// Lowercase, ASCII-fold and truncate a token
pub fn normalize_token(token: &str) -> String {
    token
        .chars()
        .flat_map(char::to_lowercase)
        .map(fold_char)
        .take(MAX_KEYWORD_LEN)
        .collect()
}

/// Whether a token is on the closed stop-word list
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(normalize_token(token).as_str())
}

/// Keyword entry identifiers for a track's metadata
///
/// Concatenates title, artist and album, drops stop-words, and maps each
/// remaining whitespace-separated token to a normalized, prefixed keyword.
/// The result is deduplicated and stable across invocations.
pub fn generate_keywords(tag: &TrackTag) -> BTreeSet<String> {
    let text = format!("{} {} {}", tag.title, tag.artist, tag.album);
    text.split_whitespace()
        .filter(|token| !is_stop_word(token))
        .map(normalize_token)
        .filter(|token| !token.is_empty())
        .map(|token| format!("{}{}", KEYWORD_PREFIX, token))
        .collect()
}

/// Normalized tokens of a search query
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(normalize_token)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Keyword entry identifier without its `keyword/` prefix
pub fn strip_prefix(id: &str) -> &str {
    id.strip_prefix(KEYWORD_PREFIX).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NodeId;

    fn tag(title: &str, artist: &str, album: &str) -> TrackTag {
        TrackTag::new(title, artist, album, NodeId::for_text(title))
    }

    #[test]
    fn test_stop_words_filtered() {
        let keywords = generate_keywords(&tag("The Wall", "Pink Floyd", "The Wall"));
        let expected: BTreeSet<String> = ["keyword/wall", "keyword/pink", "keyword/floyd"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(keywords, expected);
    }

    #[test]
    fn test_generation_is_stable() {
        let t = tag("Imagine", "John Lennon", "Imagine");
        assert_eq!(generate_keywords(&t), generate_keywords(&t));
    }

    #[test]
    fn test_normalization_folds_and_truncates() {
        assert_eq!(normalize_token("Éléphant"), "elephant");
        let long = "x".repeat(40);
        assert_eq!(normalize_token(&long).len(), MAX_KEYWORD_LEN);
    }

    #[test]
    fn test_stop_words_case_insensitive() {
        assert!(is_stop_word("The"));
        assert!(is_stop_word("DELLA"));
        assert!(is_stop_word("Lorsque"));
        assert!(!is_stop_word("wall"));
    }

    #[test]
    fn test_query_tokens() {
        assert_eq!(query_tokens("  John  LENNON "), vec!["john", "lennon"]);
        assert!(query_tokens("   ").is_empty());
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("keyword/wall"), "wall");
        assert_eq!(strip_prefix("wall"), "wall");
    }
}
