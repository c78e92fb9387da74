//! Narration state for roleplay-style replies.
//!
//! Narration (stage directions such as `*waves*`) is delimited by a
//! per-character symbol. Every occurrence of the symbol flips between
//! [`NarrationState::Prose`] and [`NarrationState::Narration`].

use serde::{Deserialize, Serialize};

/// The narration delimiter used when a profile does not set one.
pub const DEFAULT_NARRATION_SYMBOL: char = '*';

/// Whether text is spoken dialogue or narration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NarrationState {
    #[default]
    Prose,
    Narration,
}

impl NarrationState {
    pub fn is_narration(self) -> bool {
        self == NarrationState::Narration
    }

    /// The opposite state.
    pub fn toggled(self) -> Self {
        match self {
            NarrationState::Prose => NarrationState::Narration,
            NarrationState::Narration => NarrationState::Prose,
        }
    }

    /// State after folding in every delimiter found in `text`.
    ///
    /// An odd number of delimiters flips the state, an even number leaves it.
    pub fn after(self, text: &str, symbol: char) -> Self {
        if text.chars().filter(|&c| c == symbol).count() % 2 == 1 {
            self.toggled()
        } else {
            self
        }
    }

    /// State used to voice `segment` when this is the state before it.
    ///
    /// A segment is voiced with the state in effect before its own toggle.
    /// A segment that is nothing but the delimiter is treated as narration.
    pub fn voicing(self, segment: &str, symbol: char) -> Self {
        let mut chars = segment.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c == symbol => NarrationState::Narration,
            _ => self,
        }
    }
}

/// Folds segments through the narration state machine, pairing each
/// segment with the state it should be voiced in.
///
/// Returns the voiced segments and the state after the last one.
pub fn fold_segments<'a, I>(
    initial: NarrationState,
    segments: I,
    symbol: char,
) -> (Vec<(&'a str, NarrationState)>, NarrationState)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut voiced = Vec::new();
    let state = segments.into_iter().fold(initial, |state, segment| {
        voiced.push((segment, state.voicing(segment, symbol)));
        state.after(segment, symbol)
    });
    (voiced, state)
}

/// Tracks narration state across the segments of one turn.
#[derive(Debug, Clone)]
pub struct NarrationTracker {
    symbol: char,
    state: NarrationState,
}

impl NarrationTracker {
    /// Create a tracker in the prose state.
    pub fn new(symbol: char) -> Self {
        Self {
            symbol,
            state: NarrationState::Prose,
        }
    }

    pub fn symbol(&self) -> char {
        self.symbol
    }

    /// The state the next segment starts in.
    pub fn current_state(&self) -> NarrationState {
        self.state
    }

    pub fn is_narrating(&self) -> bool {
        self.state.is_narration()
    }

    /// The state `segment` should be voiced in, without consuming it.
    pub fn voicing(&self, segment: &str) -> NarrationState {
        self.state.voicing(segment, self.symbol)
    }

    /// Fold `segment`'s toggles into the tracker and return the state for the
    /// next segment.
    pub fn consume(&mut self, segment: &str) -> NarrationState {
        self.state = self.state.after(segment, self.symbol);
        self.state
    }

    /// Back to prose, as at the start of a turn.
    pub fn reset(&mut self) {
        self.state = NarrationState::Prose;
    }
}

impl Default for NarrationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_NARRATION_SYMBOL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_delimiters_toggle() {
        let state = NarrationState::Prose;
        assert_eq!(state.after("*waves", '*'), NarrationState::Narration);
        assert_eq!(state.after("*waves*", '*'), NarrationState::Prose);
        assert_eq!(state.after("no markers", '*'), NarrationState::Prose);
    }

    #[test]
    fn test_balanced_delimiters_are_idempotent() {
        let texts = ["*a* b *c*", "**", "", "x *y* z", "*one* *two* *three*"];
        for text in texts {
            for initial in [NarrationState::Prose, NarrationState::Narration] {
                assert_eq!(initial.after(text, '*'), initial, "text: {text:?}");
            }
        }
    }

    #[test]
    fn test_voicing_uses_state_before_toggle() {
        // "waves*" closes narration but is itself narration.
        assert_eq!(
            NarrationState::Narration.voicing("waves*", '*'),
            NarrationState::Narration
        );
        // "Hi *" opens narration but "Hi" is prose.
        assert_eq!(NarrationState::Prose.voicing("Hi *", '*'), NarrationState::Prose);
    }

    #[test]
    fn test_lone_delimiter_is_narration() {
        assert_eq!(NarrationState::Prose.voicing("*", '*'), NarrationState::Narration);
        assert_eq!(NarrationState::Prose.voicing(" * ", '*'), NarrationState::Narration);
        assert_eq!(NarrationState::Prose.voicing("~", '*'), NarrationState::Prose);
    }

    #[test]
    fn test_fold_segments() {
        let segments = ["Hello there.", " *", "waves*", " Bye."];
        let (voiced, end) = fold_segments(NarrationState::Prose, segments, '*');

        let states: Vec<_> = voiced.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            states,
            vec![
                NarrationState::Prose,
                NarrationState::Narration,
                NarrationState::Narration,
                NarrationState::Prose,
            ]
        );
        assert_eq!(end, NarrationState::Prose);
    }

    #[test]
    fn test_tracker_custom_symbol() {
        let mut tracker = NarrationTracker::new('~');
        assert!(!tracker.is_narrating());
        assert_eq!(tracker.consume("~"), NarrationState::Narration);
        assert_eq!(tracker.consume("*not a toggle*"), NarrationState::Narration);
        assert_eq!(tracker.consume("bows~"), NarrationState::Prose);

        tracker.consume("~");
        tracker.reset();
        assert_eq!(tracker.current_state(), NarrationState::Prose);
    }
}
