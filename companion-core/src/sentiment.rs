//! The trailing `[REL: +N]` sentiment tag.
//!
//! The model is asked to end every reply with a tag rating the user's tone.
//! The tag is never shown or spoken; its delta is applied to the relationship
//! score once per turn.

use once_cell::sync::Lazy;
use regex::Regex;

/// Largest magnitude a single reply may move the score.
pub const MAX_DELTA: i32 = 5;

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[REL:\s*([+-]?\d+)\]").expect("sentiment tag pattern is valid"));

/// A reply with its sentiment tag removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentiment {
    pub text: String,
    pub delta: i32,
}

/// Find the sentiment tag, strip every tag from the text and return the delta.
///
/// Without a tag the delta is 0 and the text is returned unmodified.
pub fn extract_sentiment(reply: &str) -> Sentiment {
    let Some(captures) = TAG.captures(reply) else {
        return Sentiment {
            text: reply.to_string(),
            delta: 0,
        };
    };

    // Digits too long for an i32 still saturate to the sign's limit.
    let delta = match captures[1].parse::<i32>() {
        Ok(delta) => delta.clamp(-MAX_DELTA, MAX_DELTA),
        Err(_) if captures[1].starts_with('-') => -MAX_DELTA,
        Err(_) => MAX_DELTA,
    };
    Sentiment {
        text: strip_tags(reply),
        delta,
    }
}

/// Remove every sentiment tag and trim the result.
pub fn strip_tags(text: &str) -> String {
    TAG.replace_all(text, "").trim().to_string()
}

#[derive(Debug, PartialEq, Eq)]
enum TagMatch {
    Partial,
    Complete,
    Mismatch,
}

fn match_tag_prefix(held: &str) -> TagMatch {
    const HEAD: &str = "[REL:";

    if held.len() <= HEAD.len() {
        return if HEAD.starts_with(held) {
            TagMatch::Partial
        } else {
            TagMatch::Mismatch
        };
    }
    let Some(rest) = held.strip_prefix(HEAD) else {
        return TagMatch::Mismatch;
    };

    let body = rest.trim_start();
    let body = body.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(body);
    let digits = body.chars().take_while(|c| c.is_ascii_digit()).count();
    let after = &body[digits..];

    if after.is_empty() {
        TagMatch::Partial
    } else if digits > 0 && after == "]" {
        TagMatch::Complete
    } else {
        TagMatch::Mismatch
    }
}

/// Streaming filter that hides sentiment tags from display and speech.
///
/// Text that could still be the start of a tag is held back until it either
/// completes a tag (dropped) or stops matching (released).
#[derive(Debug, Default, Clone)]
pub struct TagFilter {
    held: String,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment; returns the text that is safe to show.
    pub fn push(&mut self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len());

        for c in fragment.chars() {
            if self.held.is_empty() {
                if c == '[' {
                    self.held.push(c);
                } else {
                    out.push(c);
                }
                continue;
            }

            self.held.push(c);
            match match_tag_prefix(&self.held) {
                TagMatch::Partial => {}
                TagMatch::Complete => self.held.clear(),
                TagMatch::Mismatch => {
                    self.held.pop();
                    out.push_str(&self.held);
                    self.held.clear();
                    if c == '[' {
                        self.held.push(c);
                    } else {
                        out.push(c);
                    }
                }
            }
        }

        out
    }

    /// End of stream: release anything still held back.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.held)
    }
}
