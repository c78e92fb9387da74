//! Splits a streamed reply into speakable segments.
//!
//! Safe cut points sit right after `.`, `!`, `?` or a newline outside
//! narration, and right after every narration delimiter. Dots that belong to
//! an ellipsis never cut. Narration depth is derived from the whole turn
//! buffer, so a block opened in one fragment is still respected when its
//! contents arrive in later fragments.

use crate::narration::{NarrationState, NarrationTracker};

/// A piece of the reply ready to be voiced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The raw text, delimiters included.
    pub text: String,
    /// The state this segment is voiced in.
    pub narration: NarrationState,
}

/// Find safe cut points in `text` at or after byte offset `cursor`.
///
/// The narration state at `cursor` is recomputed from `text[..cursor]`.
/// `text` is treated as complete, so a trailing `.` is a cut point.
pub fn find_split_points(text: &str, cursor: usize, symbol: char) -> Vec<usize> {
    let state = NarrationState::Prose.after(&text[..cursor], symbol);
    scan(text, cursor, state, symbol, true).points
}

struct Scan {
    points: Vec<usize>,
    /// Where the next scan must resume.
    resume_at: usize,
    /// Narration state at `resume_at`.
    state: NarrationState,
}

fn scan(text: &str, from: usize, mut state: NarrationState, symbol: char, complete: bool) -> Scan {
    let mut points = Vec::new();
    let mut resume_at = text.len();

    for (offset, c) in text[from..].char_indices() {
        let i = from + offset;
        let end = i + c.len_utf8();

        if c == symbol {
            state = state.toggled();
            points.push(end);
            continue;
        }
        if state.is_narration() {
            continue;
        }

        match c {
            '.' => {
                let next = text[end..].chars().next();
                if next.is_none() && !complete {
                    // Can't tell yet whether this dot starts an ellipsis.
                    resume_at = i;
                    break;
                }
                let prev_is_dot = text[..i].ends_with('.');
                if prev_is_dot || next == Some('.') {
                    continue;
                }
                points.push(end);
            }
            '!' | '?' | '\n' => points.push(end),
            _ => {}
        }
    }

    Scan {
        points,
        resume_at,
        state,
    }
}

/// Stateful segmenter for one turn.
#[derive(Debug, Clone)]
pub struct Segmenter {
    symbol: char,
    buffer: String,
    /// End of the last emitted segment.
    emitted: usize,
    /// How far the buffer has been scanned for cut points.
    scanned: usize,
    scan_state: NarrationState,
    tracker: NarrationTracker,
}

impl Segmenter {
    pub fn new(symbol: char) -> Self {
        Self {
            symbol,
            buffer: String::new(),
            emitted: 0,
            scanned: 0,
            scan_state: NarrationState::Prose,
            tracker: NarrationTracker::new(symbol),
        }
    }

    /// Append a streamed fragment and return any segments that became complete.
    pub fn push(&mut self, fragment: &str) -> Vec<Segment> {
        self.buffer.push_str(fragment);
        let scan = scan(&self.buffer, self.scanned, self.scan_state, self.symbol, false);
        self.scanned = scan.resume_at;
        self.scan_state = scan.state;
        self.cut(scan.points)
    }

    /// End of stream: emit everything that remains, balanced or not.
    pub fn finish(&mut self) -> Vec<Segment> {
        let scan = scan(&self.buffer, self.scanned, self.scan_state, self.symbol, true);
        self.scanned = scan.resume_at;
        self.scan_state = scan.state;
        let mut segments = self.cut(scan.points);

        if self.emitted < self.buffer.len() {
            let rest = self.buffer[self.emitted..].to_string();
            self.emitted = self.buffer.len();
            if let Some(segment) = self.emit(rest) {
                segments.push(segment);
            }
        }
        segments
    }

    /// The narration state the next segment starts in.
    pub fn narration_state(&self) -> NarrationState {
        self.tracker.current_state()
    }

    /// Everything pushed so far this turn.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Text received but not yet emitted as a segment.
    pub fn pending(&self) -> &str {
        &self.buffer[self.emitted..]
    }

    /// Start a new turn.
    pub fn reset(&mut self) {
        *self = Self::new(self.symbol);
    }

    fn cut(&mut self, points: Vec<usize>) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(points.len());
        for point in points {
            let text = self.buffer[self.emitted..point].to_string();
            self.emitted = point;
            if let Some(segment) = self.emit(text) {
                segments.push(segment);
            }
        }
        segments
    }

    fn emit(&mut self, text: String) -> Option<Segment> {
        let narration = self.tracker.voicing(&text);
        self.tracker.consume(&text);
        if text.trim().is_empty() {
            return None;
        }
        Some(Segment { text, narration })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segments: &[Segment]) -> Vec<&str> {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    fn run(fragments: &[&str]) -> Vec<Segment> {
        let mut segmenter = Segmenter::new('*');
        let mut out = Vec::new();
        for fragment in fragments {
            out.extend(segmenter.push(fragment));
        }
        out.extend(segmenter.finish());
        out
    }

    #[test]
    fn test_split_points_on_punctuation() {
        assert_eq!(find_split_points("Hi! Ok? Yes.\nNo", 0, '*'), vec![3, 7, 12, 13]);
    }

    #[test]
    fn test_ellipsis_is_not_a_cut() {
        assert_eq!(find_split_points("Well... fine.", 0, '*'), vec![13]);
        assert_eq!(find_split_points("a..b", 0, '*'), Vec::<usize>::new());
    }

    #[test]
    fn test_no_cut_inside_narration() {
        // Cut after each delimiter, none at the dot inside.
        assert_eq!(find_split_points("*She sighs. Deeply*", 0, '*'), vec![1, 19]);
    }

    #[test]
    fn test_cursor_respects_earlier_open_block() {
        let text = "*She sighs. Deeply.";
        // Scanning from after the opening delimiter still knows we're narrating.
        assert_eq!(find_split_points(text, 1, '*'), Vec::<usize>::new());
    }

    #[test]
    fn test_multibyte_offsets() {
        let text = "Café! Olé.";
        let points = find_split_points(text, 0, '*');
        assert_eq!(&text[..points[0]], "Café!");
        assert_eq!(&text[points[0]..points[1]], " Olé.");
    }

    #[test]
    fn test_stream_scenario_segments() {
        let segments = run(&["Hello", " there.", " *waves*", " Bye."]);
        assert_eq!(texts(&segments), vec!["Hello there.", " *", "waves*", " Bye."]);

        let states: Vec<_> = segments.iter().map(|s| s.narration).collect();
        assert_eq!(
            states,
            vec![
                NarrationState::Prose,
                NarrationState::Narration,
                NarrationState::Narration,
                NarrationState::Prose,
            ]
        );
    }

    #[test]
    fn test_narration_spanning_fragments() {
        let segments = run(&["*She ", "sighs. Then", " smiles.* Ok."]);
        assert_eq!(texts(&segments), vec!["*", "She sighs. Then smiles.*", " Ok."]);
        assert!(segments[1].narration.is_narration());
        assert!(!segments[2].narration.is_narration());
    }

    #[test]
    fn test_trailing_dot_waits_for_next_fragment() {
        let mut segmenter = Segmenter::new('*');
        assert!(segmenter.push("Wait.").is_empty());
        assert!(segmenter.push("..").is_empty());
        let segments = segmenter.push(" Go!");
        assert_eq!(texts(&segments), vec!["Wait... Go!"]);
    }

    #[test]
    fn test_trailing_dot_flushed_at_end() {
        let mut segmenter = Segmenter::new('*');
        assert!(segmenter.push("Done.").is_empty());
        assert_eq!(texts(&segmenter.finish()), vec!["Done."]);
    }

    #[test]
    fn test_unterminated_narration_is_flushed() {
        let segments = run(&["Okay. *She walks away"]);
        assert_eq!(texts(&segments), vec!["Okay.", " *", "She walks away"]);
        assert!(segments[2].narration.is_narration());
    }

    #[test]
    fn test_no_segment_is_emitted_twice() {
        let fragments = ["One. Two", "! *Three* ", "four? five"];
        let segments = run(&fragments);
        let joined: String = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, fragments.concat());
    }

    #[test]
    fn test_balanced_text_returns_to_prose_for_any_fragmentation() {
        let texts = [
            "Hi. *nods* Sure thing! *smiles widely.* Bye.",
            "*a* *b* *c*",
            "Plain text without markers... really.",
        ];
        for text in texts {
            let chars: Vec<(usize, char)> = text.char_indices().collect();
            for &(split, _) in &chars {
                let mut segmenter = Segmenter::new('*');
                segmenter.push(&text[..split]);
                segmenter.push(&text[split..]);
                segmenter.finish();
                assert_eq!(
                    segmenter.narration_state(),
                    NarrationState::Prose,
                    "text {text:?} split at {split}"
                );
            }
        }
    }

    #[test]
    fn test_custom_symbol() {
        let mut segmenter = Segmenter::new('~');
        let mut segments = segmenter.push("Hey. ~bows. low~ *ok*");
        segments.extend(segmenter.finish());
        assert_eq!(texts(&segments), vec!["Hey.", " ~", "bows. low~", " *ok*"]);
    }

    #[test]
    fn test_reset() {
        let mut segmenter = Segmenter::new('*');
        segmenter.push("*open");
        segmenter.reset();
        assert_eq!(segmenter.narration_state(), NarrationState::Prose);
        assert_eq!(segmenter.text(), "");
    }
}
