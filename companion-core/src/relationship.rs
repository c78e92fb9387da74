//! Relationship score between the user and a character.

use chrono::Duration;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Lowest possible score.
pub const MIN_SCORE: i32 = -100;
/// Highest possible score.
pub const MAX_SCORE: i32 = 100;

/// Minutes that must pass before the score starts decaying.
pub const DECAY_GRACE_MINUTES: i64 = 5;
/// Every this many minutes of absence costs one more point.
pub const DECAY_MINUTES_PER_POINT: i64 = 30;

/// Default obedience weights when a profile does not set them.
pub const DEFAULT_GOOD_WEIGHT: f64 = 5.0;
pub const DEFAULT_BAD_WEIGHT: f64 = 5.0;

/// A score clamped to `[-100, 100]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub struct RelationshipScore(i32);

impl RelationshipScore {
    pub fn new(value: i32) -> Self {
        Self(value.clamp(MIN_SCORE, MAX_SCORE))
    }

    pub fn value(self) -> i32 {
        self.0
    }

    /// Apply a sentiment delta, keeping the score in range.
    pub fn apply(self, delta: i32) -> Self {
        Self::new(self.0.saturating_add(delta))
    }

    /// Pull the score toward zero for time spent apart.
    ///
    /// No-op below the grace period or at zero. Never crosses zero.
    pub fn decay(self, elapsed: Duration) -> Self {
        let minutes = elapsed.num_minutes();
        if self.0 == 0 || minutes < DECAY_GRACE_MINUTES {
            return self;
        }

        let step = (minutes / DECAY_MINUTES_PER_POINT).max(1);
        let step = i32::try_from(step).unwrap_or(i32::MAX).min(self.0.abs());
        Self(self.0 - self.0.signum() * step)
    }

    /// Display label for the score band.
    pub fn label(self) -> RelationshipLabel {
        RelationshipLabel::for_score(self.0)
    }
}

impl From<i32> for RelationshipScore {
    fn from(value: i32) -> Self {
        Self::new(value)
    }
}

impl From<RelationshipScore> for i32 {
    fn from(score: RelationshipScore) -> Self {
        score.0
    }
}

impl std::fmt::Display for RelationshipScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, MAX_SCORE)
    }
}

/// Named score bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipLabel {
    Nemesis,
    Hostile,
    Annoyed,
    Neutral,
    Friendly,
    CloseFriend,
    Soulmate,
}

impl RelationshipLabel {
    pub fn for_score(score: i32) -> Self {
        match score {
            s if s <= -75 => RelationshipLabel::Nemesis,
            s if s <= -40 => RelationshipLabel::Hostile,
            s if s <= -10 => RelationshipLabel::Annoyed,
            s if s < 10 => RelationshipLabel::Neutral,
            s if s < 40 => RelationshipLabel::Friendly,
            s if s < 75 => RelationshipLabel::CloseFriend,
            _ => RelationshipLabel::Soulmate,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RelationshipLabel::Nemesis => "Nemesis",
            RelationshipLabel::Hostile => "Hostile",
            RelationshipLabel::Annoyed => "Annoyed",
            RelationshipLabel::Neutral => "Neutral",
            RelationshipLabel::Friendly => "Friendly",
            RelationshipLabel::CloseFriend => "Close Friend",
            RelationshipLabel::Soulmate => "Soulmate",
        }
    }

    /// Tone instruction handed to the model.
    pub fn tone(&self) -> &'static str {
        match self {
            RelationshipLabel::Nemesis => "Openly contemptuous. Cold, cutting and reluctant to engage.",
            RelationshipLabel::Hostile => "Irritated and curt. Sarcasm comes easily.",
            RelationshipLabel::Annoyed => "Guarded and a little snippy.",
            RelationshipLabel::Neutral => "Polite but reserved.",
            RelationshipLabel::Friendly => "Warm and playful.",
            RelationshipLabel::CloseFriend => "Affectionate, teasing and open.",
            RelationshipLabel::Soulmate => "Deeply devoted, tender and completely at ease.",
        }
    }
}

impl std::fmt::Display for RelationshipLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether the character goes along with a command-like request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Obedience {
    Obey,
    Refuse,
}

impl Obedience {
    pub fn obeys(self) -> bool {
        self == Obedience::Obey
    }
}

/// Weights for (obey, refuse), shifted by the score.
pub fn obedience_weights(score: RelationshipScore, good_weight: f64, bad_weight: f64) -> (f64, f64) {
    let shift = f64::from(score.value()) / 10.0;
    ((good_weight + shift).max(0.1), (bad_weight - shift).max(0.1))
}

/// Draw an obey/refuse decision.
pub fn decide_obedience<R: Rng + ?Sized>(
    rng: &mut R,
    score: RelationshipScore,
    good_weight: f64,
    bad_weight: f64,
) -> Obedience {
    let (good, bad) = obedience_weights(score, good_weight, bad_weight);
    match WeightedIndex::new([good, bad]) {
        Ok(dist) if dist.sample(rng) == 0 => Obedience::Obey,
        Ok(_) => Obedience::Refuse,
        // Non-finite weights from a hand-edited profile.
        Err(_) => Obedience::Refuse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    #[test]
    fn test_new_clamps() {
        assert_eq!(RelationshipScore::new(250).value(), 100);
        assert_eq!(RelationshipScore::new(-101).value(), -100);
    }

    #[test]
    fn test_apply_clamps() {
        assert_eq!(RelationshipScore::new(98).apply(5).value(), 100);
        assert_eq!(RelationshipScore::new(-3).apply(-5).value(), -8);
        assert_eq!(RelationshipScore::new(i32::MAX).apply(i32::MAX).value(), 100);
    }

    #[test]
    fn test_decay_skipped_within_grace_period() {
        let score = RelationshipScore::new(50);
        assert_eq!(score.decay(Duration::minutes(4)), score);
        assert_eq!(score.decay(Duration::seconds(299)), score);
    }

    #[test]
    fn test_decay_moves_toward_zero() {
        assert_eq!(RelationshipScore::new(50).decay(Duration::minutes(5)).value(), 49);
        assert_eq!(RelationshipScore::new(50).decay(Duration::minutes(90)).value(), 47);
        assert_eq!(RelationshipScore::new(-50).decay(Duration::minutes(90)).value(), -47);
    }

    #[test]
    fn test_decay_never_overshoots() {
        for start in [-100, -7, -1, 1, 3, 100] {
            let decayed = RelationshipScore::new(start).decay(Duration::days(365));
            assert_eq!(decayed.value(), 0, "start {start}");
        }
        assert_eq!(RelationshipScore::new(0).decay(Duration::days(1)).value(), 0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(RelationshipScore::new(-100).label(), RelationshipLabel::Nemesis);
        assert_eq!(RelationshipScore::new(-40).label(), RelationshipLabel::Hostile);
        assert_eq!(RelationshipScore::new(-10).label(), RelationshipLabel::Annoyed);
        assert_eq!(RelationshipScore::new(0).label(), RelationshipLabel::Neutral);
        assert_eq!(RelationshipScore::new(10).label(), RelationshipLabel::Friendly);
        assert_eq!(RelationshipScore::new(74).label().name(), "Close Friend");
        assert_eq!(RelationshipScore::new(75).label(), RelationshipLabel::Soulmate);
    }

    #[test]
    fn test_obedience_weights_floor() {
        let (good, bad) = obedience_weights(RelationshipScore::new(100), 5.0, 5.0);
        assert_eq!(good, 15.0);
        assert_eq!(bad, 0.1);
    }

    #[test]
    fn test_decide_obedience_follows_weights() {
        let mut rng = StdRng::seed_from_u64(7);
        let obeyed = (0..200)
            .filter(|_| decide_obedience(&mut rng, RelationshipScore::new(100), 5.0, 5.0).obeys())
            .count();
        // 15 : 0.1 odds.
        assert!(obeyed > 180, "obeyed {obeyed} of 200");
    }

    #[test]
    fn test_serde_as_plain_integer() {
        let score: RelationshipScore = serde_json::from_str("42").unwrap();
        assert_eq!(score.value(), 42);
        assert_eq!(serde_json::to_string(&score).unwrap(), "42");

        let edited: RelationshipScore = serde_json::from_str("400").unwrap();
        assert_eq!(edited.value(), 100);
    }
}
