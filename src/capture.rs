use crate::metrics::LiveMetrics;
use crossterm::event::{KeyCode, KeyEventKind, KeyModifiers};
use serde::Serialize;
use std::collections::HashMap;

/// Minimum number of completed keystrokes before a sample may be submitted.
/// The backend enforces the same bound; checking here avoids a wasted call.
pub const MIN_SAMPLE_KEYSTROKES: usize = 5;

/// Canonical identity of a key admitted into the capture pipeline.
///
/// Space is folded into its own token so the pending map and the wire format
/// never carry a bare `' '`; the literal typed text still receives the space
/// character. Backspace is tracked for pairing but never becomes a keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Space,
    Backspace,
}

impl Key {
    pub fn token(&self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Space => "Space".to_string(),
            Key::Backspace => "Backspace".to_string(),
        }
    }

    /// Character this key contributes to the typed text, if any.
    pub fn text_char(&self) -> Option<char> {
        match self {
            Key::Char(c) => Some(*c),
            Key::Space => Some(' '),
            Key::Backspace => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Press,
    Release,
}

/// Decide whether a raw terminal key event is admissible biometric input.
///
/// Admits single printable characters, Space and Backspace, with no
/// ctrl/alt/meta modifier held. Auto-repeat events are rejected outright so a
/// held key can never mint duplicate timing pairs. Pure; no side effects.
pub fn admit(event: &crossterm::event::KeyEvent) -> Option<(Key, Phase)> {
    let phase = match event.kind {
        KeyEventKind::Press => Phase::Press,
        KeyEventKind::Release => Phase::Release,
        KeyEventKind::Repeat => return None,
    };

    let blocked = KeyModifiers::CONTROL
        | KeyModifiers::ALT
        | KeyModifiers::SUPER
        | KeyModifiers::META
        | KeyModifiers::HYPER;
    if event.modifiers.intersects(blocked) {
        return None;
    }

    let key = match event.code {
        KeyCode::Char(' ') => Key::Space,
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Backspace => Key::Backspace,
        _ => return None,
    };

    Some((key, phase))
}

/// One completed press/release pair, in wire shape.
/// Timestamps are relative monotonic milliseconds, not wall-clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keystroke {
    pub key: String,
    pub press_time: f64,
    pub release_time: f64,
}

/// Accumulates one typing sample: ordered keystrokes (by release order) plus
/// the literal text they produced.
#[derive(Debug, Default)]
pub struct Capture {
    keystrokes: Vec<Keystroke>,
    typed_text: String,
    capturing: bool,
    pending: HashMap<Key, f64>,
    metrics: LiveMetrics,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a press. Activates capture on the first admissible press.
    /// A re-press of a key that was never released overwrites the stale
    /// timestamp; last write wins.
    pub fn key_down(&mut self, key: Key, t_ms: f64) {
        if !self.capturing {
            self.capturing = true;
        }
        self.pending.insert(key, t_ms);
    }

    /// Record a release. Releases with no pending press are expected noise
    /// (filtered press, capture started mid-hold) and are dropped.
    pub fn key_up(&mut self, key: Key, t_ms: f64) {
        let Some(press_time) = self.pending.remove(&key) else {
            log::trace!("release without pending press: {}", key.token());
            return;
        };

        if key == Key::Backspace {
            self.typed_text.pop();
            return;
        }

        self.keystrokes.push(Keystroke {
            key: key.token(),
            press_time,
            release_time: t_ms,
        });
        if let Some(c) = key.text_char() {
            self.typed_text.push(c);
        }
        self.metrics = LiveMetrics::of(&self.keystrokes);
    }

    /// Filter a raw terminal event and route it. Returns true if admitted.
    pub fn handle(&mut self, event: &crossterm::event::KeyEvent, t_ms: f64) -> bool {
        match admit(event) {
            Some((key, Phase::Press)) => {
                self.key_down(key, t_ms);
                true
            }
            Some((key, Phase::Release)) => {
                self.key_up(key, t_ms);
                true
            }
            None => false,
        }
    }

    /// Back to the initial state: no keystrokes, no text, no pending presses,
    /// not capturing. Valid at any point.
    pub fn reset(&mut self) {
        self.keystrokes.clear();
        self.typed_text.clear();
        self.capturing = false;
        self.pending.clear();
        self.metrics = LiveMetrics::default();
    }

    pub fn keystrokes(&self) -> &[Keystroke] {
        &self.keystrokes
    }

    pub fn typed_text(&self) -> &str {
        &self.typed_text
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn metrics(&self) -> LiveMetrics {
        self.metrics
    }

    pub fn meets_minimum(&self) -> bool {
        self.keystrokes.len() >= MIN_SAMPLE_KEYSTROKES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEvent;

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn release(code: KeyCode) -> KeyEvent {
        let mut ev = KeyEvent::new(code, KeyModifiers::NONE);
        ev.kind = KeyEventKind::Release;
        ev
    }

    fn type_key(capture: &mut Capture, key: Key, press_ms: f64, release_ms: f64) {
        capture.key_down(key, press_ms);
        capture.key_up(key, release_ms);
    }

    #[test]
    fn admit_printable_chars() {
        assert_eq!(
            admit(&press(KeyCode::Char('a'))),
            Some((Key::Char('a'), Phase::Press))
        );
        assert_eq!(
            admit(&release(KeyCode::Char('Z'))),
            Some((Key::Char('Z'), Phase::Release))
        );
    }

    #[test]
    fn admit_normalizes_space() {
        assert_eq!(
            admit(&press(KeyCode::Char(' '))),
            Some((Key::Space, Phase::Press))
        );
        assert_eq!(Key::Space.token(), "Space");
        assert_eq!(Key::Space.text_char(), Some(' '));
    }

    #[test]
    fn admit_accepts_backspace() {
        assert_eq!(
            admit(&press(KeyCode::Backspace)),
            Some((Key::Backspace, Phase::Press))
        );
    }

    #[test]
    fn admit_rejects_functional_keys() {
        assert_eq!(admit(&press(KeyCode::Enter)), None);
        assert_eq!(admit(&press(KeyCode::Tab)), None);
        assert_eq!(admit(&press(KeyCode::Left)), None);
        assert_eq!(admit(&press(KeyCode::F(1))), None);
        assert_eq!(admit(&press(KeyCode::Esc)), None);
    }

    #[test]
    fn admit_rejects_modified_keys() {
        let ev = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::CONTROL);
        assert_eq!(admit(&ev), None);
        let ev = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::ALT);
        assert_eq!(admit(&ev), None);
        let ev = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::SUPER);
        assert_eq!(admit(&ev), None);
    }

    #[test]
    fn admit_allows_shift() {
        let ev = KeyEvent::new(KeyCode::Char('A'), KeyModifiers::SHIFT);
        assert_eq!(admit(&ev), Some((Key::Char('A'), Phase::Press)));
    }

    #[test]
    fn admit_rejects_repeat() {
        let mut ev = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        ev.kind = KeyEventKind::Repeat;
        assert_eq!(admit(&ev), None);
    }

    #[test]
    fn press_release_produces_one_keystroke() {
        let mut capture = Capture::new();
        type_key(&mut capture, Key::Char('a'), 10.0, 80.0);

        assert_eq!(capture.keystrokes().len(), 1);
        assert_eq!(
            capture.keystrokes()[0],
            Keystroke {
                key: "a".to_string(),
                press_time: 10.0,
                release_time: 80.0,
            }
        );
        assert_eq!(capture.typed_text(), "a");
    }

    #[test]
    fn first_press_activates_capture() {
        let mut capture = Capture::new();
        assert!(!capture.is_capturing());
        capture.key_down(Key::Char('x'), 0.0);
        assert!(capture.is_capturing());
    }

    #[test]
    fn repress_overwrites_pending_timestamp() {
        let mut capture = Capture::new();
        capture.key_down(Key::Char('a'), 10.0);
        capture.key_down(Key::Char('a'), 50.0);
        capture.key_up(Key::Char('a'), 90.0);

        assert_eq!(capture.keystrokes().len(), 1);
        assert_eq!(capture.keystrokes()[0].press_time, 50.0);
    }

    #[test]
    fn unmatched_release_is_ignored() {
        let mut capture = Capture::new();
        capture.key_up(Key::Char('a'), 30.0);

        assert_eq!(capture.keystrokes().len(), 0);
        assert_eq!(capture.typed_text(), "");
        assert!(!capture.is_capturing());
    }

    #[test]
    fn interleaved_keys_ordered_by_release() {
        let mut capture = Capture::new();
        // 'a' pressed first but released after 'b'
        capture.key_down(Key::Char('a'), 0.0);
        capture.key_down(Key::Char('b'), 20.0);
        capture.key_up(Key::Char('b'), 50.0);
        capture.key_up(Key::Char('a'), 70.0);

        let keys: Vec<&str> = capture.keystrokes().iter().map(|k| k.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(capture.typed_text(), "ba");
    }

    #[test]
    fn backspace_edits_text_without_keystroke() {
        let mut capture = Capture::new();
        type_key(&mut capture, Key::Char('h'), 0.0, 40.0);
        type_key(&mut capture, Key::Char('j'), 60.0, 100.0);
        type_key(&mut capture, Key::Backspace, 120.0, 160.0);

        assert_eq!(capture.typed_text(), "h");
        assert_eq!(capture.keystrokes().len(), 2);
        assert!(capture
            .keystrokes()
            .iter()
            .all(|k| k.key != "Backspace"));
    }

    #[test]
    fn backspace_on_empty_text_is_noop() {
        let mut capture = Capture::new();
        type_key(&mut capture, Key::Backspace, 0.0, 30.0);

        assert_eq!(capture.typed_text(), "");
        assert_eq!(capture.keystrokes().len(), 0);
    }

    #[test]
    fn space_token_in_sample_literal_in_text() {
        let mut capture = Capture::new();
        type_key(&mut capture, Key::Char('a'), 0.0, 30.0);
        type_key(&mut capture, Key::Space, 50.0, 80.0);

        assert_eq!(capture.keystrokes()[1].key, "Space");
        assert_eq!(capture.typed_text(), "a ");
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut capture = Capture::new();
        type_key(&mut capture, Key::Char('a'), 0.0, 30.0);
        capture.key_down(Key::Char('b'), 40.0); // left pending

        capture.reset();

        assert_eq!(capture.keystrokes().len(), 0);
        assert_eq!(capture.typed_text(), "");
        assert!(!capture.is_capturing());
        assert_eq!(capture.metrics(), LiveMetrics::default());

        // the pre-reset press must not pair with a post-reset release
        capture.key_up(Key::Char('b'), 90.0);
        assert_eq!(capture.keystrokes().len(), 0);

        type_key(&mut capture, Key::Char('c'), 100.0, 140.0);
        assert_eq!(capture.keystrokes().len(), 1);
        assert_eq!(capture.typed_text(), "c");
    }

    #[test]
    fn handle_routes_admitted_events_only() {
        let mut capture = Capture::new();
        assert!(capture.handle(&press(KeyCode::Char('a')), 0.0));
        assert!(capture.handle(&release(KeyCode::Char('a')), 40.0));
        assert!(!capture.handle(&press(KeyCode::Enter), 50.0));

        assert_eq!(capture.keystrokes().len(), 1);
    }

    #[test]
    fn meets_minimum_at_five_keystrokes() {
        let mut capture = Capture::new();
        for (i, c) in "abcde".chars().enumerate() {
            let t = i as f64 * 100.0;
            type_key(&mut capture, Key::Char(c), t, t + 50.0);
        }
        assert!(capture.meets_minimum());

        capture.reset();
        type_key(&mut capture, Key::Char('a'), 0.0, 50.0);
        assert!(!capture.meets_minimum());
    }

    #[test]
    fn keystroke_serializes_to_wire_shape() {
        let ks = Keystroke {
            key: "Space".to_string(),
            press_time: 12.5,
            release_time: 60.0,
        };
        let json = serde_json::to_value(&ks).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"key": "Space", "press_time": 12.5, "release_time": 60.0})
        );
    }

    #[test]
    fn metrics_update_on_append_not_on_backspace() {
        let mut capture = Capture::new();
        type_key(&mut capture, Key::Char('a'), 0.0, 100.0);
        type_key(&mut capture, Key::Char('b'), 150.0, 260.0);
        let before = capture.metrics();
        assert!(before.dwell_ms > 0.0);

        type_key(&mut capture, Key::Backspace, 300.0, 350.0);
        assert_eq!(capture.metrics(), before);
    }
}
