use crate::api::{ApiError, AuthResponse};
use crate::capture::Capture;
use crate::phrase;

/// How long the confirmation stays on screen before moving to the dashboard.
pub const REDIRECT_DELAY_SECS: f64 = 2.0;

/// Presentation tier for a confidence score. Derived from the score alone;
/// whether the attempt was accepted is the server's call and independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ConfidenceTier {
    Verified,
    Uncertain,
    Rejected,
}

impl ConfidenceTier {
    /// Lower bounds are inclusive: 0.85 is Verified, 0.60 is Uncertain.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            ConfidenceTier::Verified
        } else if score >= 0.60 {
            ConfidenceTier::Uncertain
        } else {
            ConfidenceTier::Rejected
        }
    }
}

/// Authentication attempt state: the username, the verbatim scoring result,
/// and the post-accept redirect countdown.
#[derive(Debug, Default)]
pub struct LoginFlow {
    pub username: String,
    result: Option<AuthResponse>,
    redirect_in: Option<f64>,
}

impl LoginFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// The trimmed username, or a validation error when empty.
    pub fn validated_username(&self) -> Result<String, ApiError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(ApiError::Validation(
                "Please enter your username".to_string(),
            ));
        }
        Ok(username.to_string())
    }

    /// Submission needs a username, a completed phrase, a sufficiently long
    /// sample, and no result already pending display.
    pub fn can_submit(&self, capture: &Capture) -> bool {
        self.result.is_none()
            && !self.username.trim().is_empty()
            && phrase::is_complete(capture.typed_text())
            && capture.meets_minimum()
    }

    /// Store the scoring result verbatim. When the server accepted and issued
    /// a session token, the redirect countdown starts and the token is handed
    /// back for the session store.
    pub fn apply_response(&mut self, response: AuthResponse) -> Option<String> {
        let token = if response.authenticated {
            response.token.clone()
        } else {
            None
        };
        if token.is_some() {
            self.redirect_in = Some(REDIRECT_DELAY_SECS);
        }
        self.result = Some(response);
        token
    }

    pub fn result(&self) -> Option<&AuthResponse> {
        self.result.as_ref()
    }

    pub fn tier(&self) -> Option<ConfidenceTier> {
        self.result
            .as_ref()
            .map(|r| ConfidenceTier::from_score(r.confidence_score))
    }

    /// Discard the current result to try again; the username survives.
    pub fn retry(&mut self) {
        self.result = None;
        self.redirect_in = None;
    }

    pub fn is_redirecting(&self) -> bool {
        self.redirect_in.is_some()
    }

    /// Advance the redirect countdown. Returns true exactly once, when the
    /// delay elapses.
    pub fn on_tick(&mut self, dt_secs: f64) -> bool {
        let Some(remaining) = self.redirect_in else {
            return false;
        };
        let remaining = remaining - dt_secs;
        if remaining <= 0.0 {
            self.redirect_in = None;
            true
        } else {
            self.redirect_in = Some(remaining);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Key;
    use crate::phrase::TARGET_PHRASE;
    use assert_matches::assert_matches;

    fn response(authenticated: bool, score: f64, token: Option<&str>) -> AuthResponse {
        AuthResponse {
            authenticated,
            confidence_score: score,
            message: "msg".to_string(),
            token: token.map(str::to_string),
        }
    }

    fn typed_capture(text: &str) -> Capture {
        let mut capture = Capture::new();
        for (i, c) in text.chars().enumerate() {
            let key = if c == ' ' { Key::Space } else { Key::Char(c) };
            let t = i as f64 * 100.0;
            capture.key_down(key, t);
            capture.key_up(key, t + 60.0);
        }
        capture
    }

    #[test]
    fn tier_thresholds() {
        assert_eq!(ConfidenceTier::from_score(0.90), ConfidenceTier::Verified);
        assert_eq!(ConfidenceTier::from_score(0.70), ConfidenceTier::Uncertain);
        assert_eq!(ConfidenceTier::from_score(0.40), ConfidenceTier::Rejected);
    }

    #[test]
    fn tier_lower_bounds_are_inclusive() {
        assert_eq!(ConfidenceTier::from_score(0.85), ConfidenceTier::Verified);
        assert_eq!(ConfidenceTier::from_score(0.60), ConfidenceTier::Uncertain);
        assert_eq!(ConfidenceTier::from_score(0.5999), ConfidenceTier::Rejected);
        assert_eq!(ConfidenceTier::from_score(0.8499), ConfidenceTier::Uncertain);
    }

    #[test]
    fn tier_display_labels() {
        assert_eq!(ConfidenceTier::Verified.to_string(), "Verified");
        assert_eq!(ConfidenceTier::Uncertain.to_string(), "Uncertain");
        assert_eq!(ConfidenceTier::Rejected.to_string(), "Rejected");
    }

    #[test]
    fn username_validation_trims() {
        let mut flow = LoginFlow::new();
        flow.username = "   ".to_string();
        assert_matches!(flow.validated_username(), Err(ApiError::Validation(_)));

        flow.username = "  ada  ".to_string();
        assert_eq!(flow.validated_username().unwrap(), "ada");
    }

    #[test]
    fn submit_gating() {
        let mut flow = LoginFlow::new();
        let complete = typed_capture(TARGET_PHRASE);

        // no username yet
        assert!(!flow.can_submit(&complete));

        flow.username = "ada".to_string();
        assert!(flow.can_submit(&complete));

        // incomplete phrase
        assert!(!flow.can_submit(&typed_capture("the quick")));

        // result already displayed
        flow.apply_response(response(false, 0.4, None));
        assert!(!flow.can_submit(&complete));
    }

    #[test]
    fn accepted_response_with_token_starts_redirect() {
        let mut flow = LoginFlow::new();
        flow.username = "ada".to_string();

        let token = flow.apply_response(response(true, 0.93, Some("jwt")));
        assert_eq!(token.as_deref(), Some("jwt"));
        assert!(flow.is_redirecting());
        assert_eq!(flow.tier(), Some(ConfidenceTier::Verified));
    }

    #[test]
    fn rejected_response_keeps_token_out() {
        let mut flow = LoginFlow::new();
        // even if the server were to attach a token to a rejection, it is
        // not a session credential
        let token = flow.apply_response(response(false, 0.55, Some("stray")));
        assert_eq!(token, None);
        assert!(!flow.is_redirecting());
        assert_eq!(flow.tier(), Some(ConfidenceTier::Rejected));
    }

    #[test]
    fn result_is_stored_verbatim() {
        let mut flow = LoginFlow::new();
        let res = response(false, 0.731, None);
        flow.apply_response(res.clone());
        assert_eq!(flow.result(), Some(&res));
        // tier derives from the score only, acceptance notwithstanding
        assert_eq!(flow.tier(), Some(ConfidenceTier::Uncertain));
    }

    #[test]
    fn retry_discards_result_and_keeps_username() {
        let mut flow = LoginFlow::new();
        flow.username = "ada".to_string();
        flow.apply_response(response(false, 0.3, None));

        flow.retry();
        assert_eq!(flow.result(), None);
        assert_eq!(flow.username, "ada");
        assert!(!flow.is_redirecting());
    }

    #[test]
    fn redirect_countdown_fires_once() {
        let mut flow = LoginFlow::new();
        flow.apply_response(response(true, 0.9, Some("jwt")));

        assert!(!flow.on_tick(REDIRECT_DELAY_SECS / 2.0));
        assert!(flow.on_tick(REDIRECT_DELAY_SECS));
        // countdown consumed; subsequent ticks are inert
        assert!(!flow.on_tick(REDIRECT_DELAY_SECS));
    }

    #[test]
    fn tick_without_redirect_is_inert() {
        let mut flow = LoginFlow::new();
        assert!(!flow.on_tick(1.0));
    }
}
