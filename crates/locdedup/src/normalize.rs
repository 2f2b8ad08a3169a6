//! Text folding used everywhere a name is compared.
//!
//! Two pure functions: [`fold`] (case/accent/whitespace folding) and
//! [`fold_with_prefixes`] (folding plus per-kind prefix stripping and
//! numeral rewriting). Both are deterministic; [`fold`] is idempotent.

use crate::EntityKind;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Leading tokens stripped from neighborhood names before comparison.
const NEIGHBORHOOD_PREFIXES: &[&str] = &[
    "setor",
    "jardim",
    "parque",
    "vila",
    "residencial",
    "conjunto",
    "nucleo",
    "bairro",
];

/// Leading tokens stripped from condominium names before comparison.
const CONDO_PREFIXES: &[&str] = &[
    "edificio",
    "condominio",
    "residencial",
    "torre",
    "bloco",
    "ed",
    "cond",
];

/// Whole-word numeral rewrites: Roman numerals I..X and the spelled-out
/// forms that show up in condominium towers ("Torre Um", "Bloco Dois").
const NUMERAL_TABLE: &[(&str, &str)] = &[
    ("i", "1"),
    ("ii", "2"),
    ("iii", "3"),
    ("iv", "4"),
    ("v", "5"),
    ("vi", "6"),
    ("vii", "7"),
    ("viii", "8"),
    ("ix", "9"),
    ("x", "10"),
    ("um", "1"),
    ("dois", "2"),
    ("tres", "3"),
    ("quatro", "4"),
    ("cinco", "5"),
];

/// Prefixes registered for a kind. Streets and cities carry none: street
/// type words ("rua", "avenida") are part of the stored name and cities
/// never have noise prefixes.
#[must_use]
pub fn prefixes_for(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Neighborhood => NEIGHBORHOOD_PREFIXES,
        EntityKind::Condo => CONDO_PREFIXES,
        EntityKind::City | EntityKind::Street => &[],
    }
}

/// Lowercase, strip accents (NFD + combining-mark removal), collapse
/// whitespace runs to single spaces, trim.
///
/// `fold(fold(s)) == fold(s)` for all `s`.
#[must_use]
pub fn fold(s: &str) -> String {
    let stripped: String = s
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect();
    stripped
        .split_ascii_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// [`fold`], then strip one registered prefix for `kind` (first token only,
/// and only when something follows it), then rewrite whole-word numerals.
#[must_use]
pub fn fold_with_prefixes(s: &str, kind: EntityKind) -> String {
    let folded = fold(s);
    let mut tokens: Vec<&str> = folded.split(' ').filter(|t| !t.is_empty()).collect();

    if tokens.len() >= 2 {
        if let Some(first) = tokens.first() {
            if prefixes_for(kind).contains(first) {
                tokens.remove(0);
            }
        }
    }

    tokens
        .iter()
        .map(|t| rewrite_numeral(t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn rewrite_numeral(token: &str) -> &str {
    for (word, digit) in NUMERAL_TABLE {
        if token == *word {
            return digit;
        }
    }
    token
}
