/// Fixed challenge phrase shared by enrollment and authentication.
/// The backend's reference patterns are trained on this exact text.
pub const TARGET_PHRASE: &str = "the quick brown fox jumps over the lazy dog";

/// A sample is complete when the typed text equals the target phrase,
/// ignoring case. No trimming, no fuzzy matching.
pub fn is_complete(typed: &str) -> bool {
    typed.eq_ignore_ascii_case(TARGET_PHRASE)
}
