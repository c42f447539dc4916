//! Heuristic drug-name candidate extraction from free text.
//!
//! Deliberately crude: no dictionary, no entity recognition. Tokens survive
//! on length and a stop-word list alone, so callers must treat the output as
//! candidates to look up, not as confirmed drug names.

/// Cap on returned candidates.
const MAX_CANDIDATES: usize = 5;

/// Articles, prepositions, and question words that are never drug names.
const STOP_WORDS: &[&str] = &[
    "the", "and", "or", "is", "are", "what", "how", "when", "where", "why", "about", "between",
    "with", "for",
];

/// Scans free text for up to five drug-name candidates: whitespace tokens,
/// stripped of punctuation, at least four characters, not stop words,
/// lower-cased, in original order.
pub fn extract_drug_names(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    for word in text.split_whitespace() {
        let clean: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        if clean.chars().count() <= 3 || STOP_WORDS.contains(&clean.as_str()) {
            continue;
        }

        candidates.push(clean);
        if candidates.len() >= MAX_CANDIDATES {
            break;
        }
    }

    candidates
}
