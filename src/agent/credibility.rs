const BASE_SCORE: u32 = 40;
const SIGNAL_BONUS: u32 = 5;

/// Words suggesting the content carries concrete context.
const SPECIFICITY_KEYWORDS: &[&str] = &["date", "place", "person", "event"];

/// Domains whose pages count as verifiable evidence.
const TRUSTED_DOMAINS: &[&str] = &["un.org", "hrw.org", "justice.gov"];

const CAUSAL_MARKERS: &[&str] = &["because", "due to"];

/// A single piece of evidence gathered by a live-search model call.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub source: String,
    pub content: String,
    pub url: String,
    pub score: u32,
}

/// Heuristic credibility of `candidate` given the other results of its batch.
///
/// Peers identical to the candidate are skipped, so a result never
/// corroborates itself. The score is not clamped.
pub fn score(candidate: &SearchResult, peers: &[SearchResult]) -> u32 {
    let content = candidate.content.to_lowercase();
    let url = candidate.url.to_lowercase();
    let mut score = BASE_SCORE;

    let corroborated = peers.iter().filter(|p| *p != candidate).any(|p| {
        let other = p.content.to_lowercase();
        other.contains(&content) || content.contains(&other)
    });
    if corroborated {
        score += SIGNAL_BONUS;
    }

    if SPECIFICITY_KEYWORDS.iter().any(|k| content.contains(k)) {
        score += SIGNAL_BONUS;
    }

    if TRUSTED_DOMAINS.iter().any(|d| url.contains(d)) {
        score += SIGNAL_BONUS;
    }

    if CAUSAL_MARKERS.iter().any(|m| content.contains(m)) {
        score += SIGNAL_BONUS;
    }

    score
}

/// Score every result of a batch against its siblings.
pub fn score_batch(mut results: Vec<SearchResult>) -> Vec<SearchResult> {
    let scores: Vec<u32> = results.iter().map(|r| score(r, &results)).collect();
    for (result, s) in results.iter_mut().zip(scores) {
        result.score = s;
    }
    results
}
