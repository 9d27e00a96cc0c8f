//! Rule-based window choice. Each rule commits only when its evidence is unique.
use crate::resolver::scoring::{normalize, similarity};
use crate::strategy::{first_ok, rung, LadderTrace, Step};
use crate::window::candidate::WindowCandidate;

const EXECUTABLE_SUFFIXES: &[&str] = &[".exe", ".app"];

pub fn is_executable_query(query: &str) -> bool {
    let q = normalize(query);
    EXECUTABLE_SUFFIXES.iter().any(|s| q.len() > s.len() && q.ends_with(s))
}

/// Case-insensitive containment in either direction; empty strings never match.
pub fn titles_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize(a), normalize(b));
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

fn unique(matches: Vec<usize>) -> Step<usize> {
    match matches.as_slice() {
        [] => Step::fail("no match"),
        [only] => Step::Ok(*only),
        many => Step::fail(format!("ambiguous ({} matches)", many.len())),
    }
}

fn executable_name(candidates: &[WindowCandidate], query: &str) -> Step<usize> {
    if !is_executable_query(query) {
        return Step::skip("not an executable name");
    }
    let q = normalize(query);
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| normalize(&c.process_name) == q)
        .max_by_key(|(_, c)| c.area())
        .map(|(i, _)| Step::Ok(i))
        .unwrap_or_else(|| Step::fail("no window of that process"))
}

fn title_containment(candidates: &[WindowCandidate], query: &str) -> Step<usize> {
    unique(
        candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| titles_match(&c.title, query))
            .map(|(i, _)| i)
            .collect(),
    )
}

fn process_containment(candidates: &[WindowCandidate], query: &str) -> Step<usize> {
    let q = normalize(query);
    unique(
        candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.process_name.is_empty() && normalize(&c.process_name).contains(&q))
            .map(|(i, _)| i)
            .collect(),
    )
}

fn close_match(candidates: &[WindowCandidate], query: &str, cutoff: f64) -> Step<usize> {
    let q = normalize(query);
    unique(
        candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| similarity(&q, &normalize(&c.title)) >= cutoff)
            .map(|(i, _)| i)
            .collect(),
    )
}

/// Index of the candidate a rule can pick with certainty, and the rule's name.
pub fn deterministic_choice(
    candidates: &[WindowCandidate],
    query: &str,
    close_match_cutoff: f64,
    trace: &mut LadderTrace,
) -> Option<(usize, &'static str)> {
    if candidates.is_empty() || normalize(query).is_empty() {
        return None;
    }
    first_ok(
        trace,
        vec![
            rung("executable_name", || executable_name(candidates, query).map(|i| (i, "executable_name"))),
            rung("title_containment", || {
                title_containment(candidates, query).map(|i| (i, "title_containment"))
            }),
            rung("process_containment", || {
                process_containment(candidates, query).map(|i| (i, "process_containment"))
            }),
            rung("close_match", || {
                close_match(candidates, query, close_match_cutoff).map(|i| (i, "close_match"))
            }),
        ],
    )
}

/// Title similarity a candidate needs before the ranking stage tries it unprompted.
pub const SIMILARITY_FLOOR: f64 = 0.5;

/// Title containment, or a title ratio of at least [`SIMILARITY_FLOOR`].
pub fn is_plausible(candidate: &WindowCandidate, query: &str) -> bool {
    if titles_match(&candidate.title, query) {
        return true;
    }
    let title = normalize(&candidate.title);
    !title.is_empty() && similarity(&normalize(query), &title) >= SIMILARITY_FLOOR
}

/// Candidate indices, best first: title containment, then title similarity, then area.
pub fn rank_by_similarity(candidates: &[WindowCandidate], query: &str) -> Vec<usize> {
    let q = normalize(query);
    let mut keyed: Vec<(usize, bool, f64, i64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let title = normalize(&c.title);
            let ratio = if title.is_empty() { 0.0 } else { similarity(&q, &title) };
            (i, titles_match(&c.title, query), ratio, c.area())
        })
        .collect();
    keyed.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| b.2.total_cmp(&a.2))
            .then_with(|| b.3.cmp(&a.3))
            .then_with(|| a.0.cmp(&b.0))
    });
    keyed.into_iter().map(|(i, ..)| i).collect()
}
