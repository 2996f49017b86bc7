//! Candidate scoring and title utilities.
//!
//! Display titles differ between providers (transliteration, season suffixes,
//! subtitles), so search hits are ranked with a heuristic score instead of
//! being compared for equality.

use once_cell::sync::Lazy;
use regex::Regex;
use shared::{CandidateMatch, ResolveError, Result, ShowType};
use std::collections::HashSet;
use tracing::debug;

/// Score that outranks any partial match
pub const EXACT_MATCH_SCORE: i64 = 1_000_000;
const TOKEN_SCORE: i64 = 1000;
const CONTAINS_SCORE: i64 = 500;
const SEASON_MATCH_SCORE: i64 = 2000;
const SEASON_MISMATCH_PENALTY: i64 = 800;
const KEYWORD_SCORE: i64 = 400;
const SHARED_KEYWORDS: [&str; 2] = ["arc", "part"];

static SEASON_LONG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bseason\s*(\d+)").expect("valid regex"));
static SEASON_SHORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bs(\d{1,3})\b").expect("valid regex"));
static NON_TITLE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s-]").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// One search hit as reported by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub id: String,
    pub declared_type: Option<ShowType>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            declared_type: None,
        }
    }

    pub fn with_type(mut self, declared_type: Option<ShowType>) -> Self {
        self.declared_type = declared_type;
        self
    }
}

/// Extract a "season N" / "sN" marker.
pub fn season_marker(text: &str) -> Option<u32> {
    SEASON_LONG
        .captures(text)
        .or_else(|| SEASON_SHORT.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Heuristic similarity of a search hit to the query.
pub fn score_candidate(name: &str, query: &str) -> i64 {
    let name_l = name.to_lowercase();
    let query_l = query.to_lowercase();

    if name_l == query_l {
        return EXACT_MATCH_SCORE;
    }

    let present = query_l
        .split_whitespace()
        .filter(|token| name_l.contains(token))
        .count() as i64;
    let mut score = present * TOKEN_SCORE;

    if name_l.contains(&query_l) {
        score += CONTAINS_SCORE;
    }

    if let (Some(in_query), Some(in_name)) = (season_marker(&query_l), season_marker(&name_l)) {
        if in_query == in_name {
            score += SEASON_MATCH_SCORE;
        } else {
            score -= SEASON_MISMATCH_PENALTY * (in_query as i64 - in_name as i64).abs();
        }
    }

    for keyword in SHARED_KEYWORDS {
        if query_l.contains(keyword) && name_l.contains(keyword) {
            score += KEYWORD_SCORE;
        }
    }

    score - (name.chars().count() as i64 - query.chars().count() as i64).abs()
}

/// Pick the best candidate for `query`.
///
/// `expected_type` is a hard filter: candidates of another (or unknown) type
/// are dropped before scoring. Ties go to the first-seen candidate.
pub fn select_best(
    query: &str,
    candidates: &[Candidate],
    expected_type: Option<ShowType>,
) -> Result<CandidateMatch> {
    if candidates.is_empty() {
        return Err(ResolveError::not_found(format!(
            "no search results for '{}'",
            query
        )));
    }

    let filtered: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| expected_type.map_or(true, |t| c.declared_type == Some(t)))
        .collect();

    if filtered.is_empty() {
        return Err(ResolveError::not_found(format!(
            "no results of type {} for '{}' ({} of other types)",
            expected_type.map(|t| t.to_string()).unwrap_or_default(),
            query,
            candidates.len()
        )));
    }

    let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    let mut best: Option<CandidateMatch> = None;

    for candidate in filtered {
        let name_l = candidate.name.to_lowercase();
        if !tokens.iter().any(|t| name_l.contains(t.as_str())) {
            continue;
        }

        let score = score_candidate(&candidate.name, query);
        debug!(candidate = %candidate.name, id = %candidate.id, score, "Scored candidate");

        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(CandidateMatch {
                source_title: candidate.name.clone(),
                source_identifier: candidate.id.clone(),
                score,
                declared_type: candidate.declared_type,
            });
        }
    }

    best.ok_or_else(|| {
        ResolveError::not_found(format!(
            "none of {} search results resembles '{}'",
            candidates.len(),
            query
        ))
    })
}

/// Progressively shorter prefixes of a title, down to two words.
///
/// `"A B C D"` gives `["A B C D", "A B C", "A B"]`; titles of one or two
/// words give just themselves.
pub fn title_variants(title: &str) -> Vec<String> {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() <= 2 {
        return vec![words.join(" ")];
    }
    (2..=words.len())
        .rev()
        .map(|len| words[..len].join(" "))
        .collect()
}

/// Append `more` to `all`, skipping ids already present.
pub fn merge_candidates(all: &mut Vec<Candidate>, more: Vec<Candidate>) {
    let mut seen: HashSet<String> = all.iter().map(|c| c.id.clone()).collect();
    for candidate in more {
        if seen.insert(candidate.id.clone()) {
            all.push(candidate);
        }
    }
}

/// Strip punctuation from a display title and collapse whitespace.
pub fn clean_title(title: &str) -> String {
    let stripped = NON_TITLE_CHARS.replace_all(title, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

fn fold_diacritic(ch: char) -> Option<char> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        'ý' | 'ÿ' => 'y',
        _ => return None,
    };
    Some(folded)
}

/// URL slug used by sites that address series by title.
///
/// Long vowels written with a macron break the word (`Shippūden` becomes
/// `shipp-den`), other diacritics are folded, quotes are dropped, and any other
/// run of non-alphanumerics becomes a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for ch in title.chars() {
        if matches!(ch, '\'' | '"' | '’') {
            continue;
        }
        if matches!(
            ch,
            'ā' | 'ē' | 'ī' | 'ō' | 'ū' | 'Ā' | 'Ē' | 'Ī' | 'Ō' | 'Ū'
        ) {
            pending_dash = true;
            continue;
        }

        let lower = ch.to_lowercase().next().unwrap_or(ch);
        let lower = fold_diacritic(lower).unwrap_or(lower);

        if lower.is_ascii_alphanumeric() || lower == '-' {
            if pending_dash && !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
            pending_dash = false;
            if lower == '-' && (slug.is_empty() || slug.ends_with('-')) {
                continue;
            }
            slug.push(lower);
        } else {
            pending_dash = true;
        }
    }

    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_dominates() {
        let candidates = vec![
            Candidate::new("Naruto", "id1"),
            Candidate::new("Naruto Shippuden", "id2"),
        ];
        let best = select_best("Naruto", &candidates, None).unwrap();
        assert_eq!(best.source_identifier, "id1");
        assert_eq!(best.score, EXACT_MATCH_SCORE);
    }

    #[test]
    fn test_season_number_match_wins() {
        let candidates = vec![
            Candidate::new("One Piece Season 5", "idB"),
            Candidate::new("One Piece Season 2", "idA"),
        ];
        let best = select_best("One Piece Season 2", &candidates, None).unwrap();
        assert_eq!(best.source_identifier, "idA");
    }

    #[test]
    fn test_season_bonus_outweighs_token_overlap() {
        let right = score_candidate("Attack on Titan S3", "attack on titan season 3");
        let wrong = score_candidate("Attack on Titan Season 2", "attack on titan season 3");
        assert!(right > wrong, "{} <= {}", right, wrong);
    }

    #[test]
    fn test_empty_candidates_not_found() {
        let err = select_best("Naruto", &[], None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_token_overlap_not_found() {
        let candidates = vec![Candidate::new("Bleach", "b")];
        let err = select_best("Naruto", &candidates, None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_expected_type_is_hard_filter() {
        let candidates = vec![
            Candidate::new("Your Name", "tv").with_type(Some(ShowType::Tv)),
            Candidate::new("Your Name Special", "movie").with_type(Some(ShowType::Movie)),
        ];
        let best = select_best("Your Name", &candidates, Some(ShowType::Movie)).unwrap();
        assert_eq!(best.source_identifier, "movie");

        let only_tv = vec![Candidate::new("Your Name", "tv").with_type(Some(ShowType::Tv))];
        let err = select_best("Your Name", &only_tv, Some(ShowType::Movie)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let candidates = vec![
            Candidate::new("Bleach TV", "first"),
            Candidate::new("Bleach OV", "second"),
        ];
        let best = select_best("Bleach", &candidates, None).unwrap();
        assert_eq!(best.source_identifier, "first");
    }

    #[test]
    fn test_keyword_bonus() {
        let with_arc = score_candidate("Demon Slayer Swordsmith Village Arc", "Demon Slayer Arc");
        let without = score_candidate("Demon Slayer Swordsmith Village Xyz", "Demon Slayer Arc");
        assert!(with_arc > without);
    }

    #[test]
    fn test_season_marker() {
        assert_eq!(season_marker("Season 3"), Some(3));
        assert_eq!(season_marker("overlord s4"), Some(4));
        assert_eq!(season_marker("Naruto"), None);
    }

    #[test]
    fn test_title_variants() {
        assert_eq!(
            title_variants("That Time I Got Reincarnated"),
            vec![
                "That Time I Got Reincarnated",
                "That Time I Got",
                "That Time I",
                "That Time"
            ]
        );
        assert_eq!(title_variants("Naruto"), vec!["Naruto"]);
    }

    #[test]
    fn test_merge_candidates_skips_known_ids() {
        let mut all = vec![Candidate::new("A", "1")];
        merge_candidates(&mut all, vec![Candidate::new("A again", "1"), Candidate::new("B", "2")]);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "A");
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  Re:Zero -  Starting Life! "), "ReZero - Starting Life");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Naruto Shippūden"), "naruto-shipp-den");
        assert_eq!(slugify("JoJo's Bizarre Adventure"), "jojos-bizarre-adventure");
        assert_eq!(slugify("Pokémon: The Series"), "pokemon-the-series");
        assert_eq!(slugify("  --Dr. Stone-- "), "dr-stone");
    }
}
