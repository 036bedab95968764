//! Review input composition.

use crate::model::Diff;

/// Upper bound on the text sent to the review generator, in characters.
pub const MAX_REVIEW_INPUT_CHARS: usize = 16_000;

/// Dependency lock files whose diffs are never sent for review.
const LOCK_FILES: &[&str] = &[
    "go.sum",
    "go.mod",
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "composer.lock",
    "Gemfile.lock",
];

/// Check if a path names a dependency lock file (substring match).
pub fn is_lock_file(path: &str) -> bool {
    LOCK_FILES.iter().any(|name| path.contains(name))
}

/// Build the review input: title and body header, then every diff whose old
/// path is not a lock file, in the given order.
pub fn compose_review_input(title: &str, body: &str, diffs: &[Diff]) -> String {
    let mut message = String::new();

    message.push_str(title);
    message.push('\n');
    message.push_str(body);
    message.push('\n');

    for diff in diffs.iter().filter(|d| !is_lock_file(&d.old_path)) {
        message.push_str(&diff.content);
    }

    message
}

/// Cut `s` to at most `max` characters without splitting a character.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
