//! Overlap-aware stitching of successive recognition deltas
//!
//! Consecutive partial transcripts usually repeat a tail of what was already
//! heard ("hello there" / "hello there, how are"). `merge` folds a new
//! fragment into the accumulated buffer without duplicating the shared part.

/// Minimum boundary-overlap length. Shorter matches are too likely to be a
/// coincidental shared word ("the", "and") rather than a genuine re-emission.
const MIN_OVERLAP: usize = 6;

/// Merge `incoming` into `existing`, avoiding duplicate concatenation.
///
/// Containment in either direction short-circuits: an incoming fragment that
/// is already present is a no-op, and an incoming fragment that contains the
/// whole buffer supersedes it (recognizers re-emit corrected full phrases).
/// Otherwise the longest case-insensitive suffix/prefix overlap of at least
/// `MIN_OVERLAP` characters is stitched, and with no overlap at all the
/// fragment is appended with a separating space.
pub fn merge(existing: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        return existing.to_string();
    }
    if existing.is_empty() {
        return incoming.to_string();
    }
    if existing == incoming {
        return existing.to_string();
    }
    if existing.contains(incoming) {
        return existing.to_string();
    }
    if incoming.contains(existing) {
        return incoming.to_string();
    }

    // Indexed over chars, not bytes: transcripts carry multibyte punctuation.
    let existing_chars: Vec<char> = existing.chars().collect();
    let incoming_chars: Vec<char> = incoming.chars().collect();
    let max_overlap = existing_chars.len().min(incoming_chars.len());

    for overlap in (MIN_OVERLAP..=max_overlap).rev() {
        let tail = &existing_chars[existing_chars.len() - overlap..];
        let head = &incoming_chars[..overlap];
        if chars_eq_ignore_case(tail, head) {
            let mut stitched = existing.to_string();
            stitched.extend(&incoming_chars[overlap..]);
            return stitched;
        }
    }

    format!("{} {}", existing, incoming)
}

fn chars_eq_ignore_case(a: &[char], b: &[char]) -> bool {
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| x.to_lowercase().eq(y.to_lowercase()))
}
