//! Guess scoring: text similarity plus the per-image point awards.

use crate::types::PlayerId;
use std::collections::HashSet;

/// Guesses whose mean similarity stays under this award the image's creator
/// the stumper bonus.
pub const STUMPER_THRESHOLD: f64 = 40.0;

/// Points the creator earns for stumping the room.
pub const STUMPER_BONUS: u32 = 50;

/// Similarity between an original prompt and a guess, in [0, 100].
///
/// Blends token-set Jaccard overlap (weight 0.6) with normalized
/// Levenshtein distance over the full strings (weight 0.4).
pub fn similarity(original: &str, guess: &str) -> u32 {
    let original = original.trim().to_lowercase();
    let guess = guess.trim().to_lowercase();

    if original == guess {
        return 100;
    }

    let a = tokenize(&original);
    let b = tokenize(&guess);
    let union = a.union(&b).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        a.intersection(&b).count() as f64 / union as f64
    };

    let max_len = original.chars().count().max(guess.chars().count());
    let lev = if max_len == 0 {
        1.0
    } else {
        1.0 - edit_distance(&original, &guess) as f64 / max_len as f64
    };

    let score = (100.0 * (0.6 * jaccard + 0.4 * lev)).round();
    score.clamp(0.0, 100.0) as u32
}

/// Split into word tokens, treating every non-word punctuation character as
/// whitespace.
fn tokenize(s: &str) -> HashSet<String> {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Classic two-row Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// One scored guess on an image.
#[derive(Debug, Clone)]
pub struct GuessScore {
    pub player_id: PlayerId,
    pub score: u32,
}

/// Point awards for a single image.
#[derive(Debug, Clone, Default)]
pub struct ImageAward {
    /// Points per guesser, equal to their similarity score.
    pub guesser_points: Vec<(PlayerId, u32)>,
    /// Stumper bonus for the image's creator, 0 if not earned.
    pub creator_bonus: u32,
}

/// Award points for one revealed image. Guessers earn their similarity
/// score; the creator earns the stumper bonus when the mean guess score
/// stays under [`STUMPER_THRESHOLD`]. No guesses means no points either way.
pub fn award_points(scores: &[GuessScore], _creator_id: &PlayerId) -> ImageAward {
    if scores.is_empty() {
        return ImageAward::default();
    }

    let guesser_points = scores
        .iter()
        .map(|s| (s.player_id.clone(), s.score))
        .collect();

    let mean = scores.iter().map(|s| s.score as f64).sum::<f64>() / scores.len() as f64;
    let creator_bonus = if mean < STUMPER_THRESHOLD {
        STUMPER_BONUS
    } else {
        0
    };

    ImageAward {
        guesser_points,
        creator_bonus,
    }
}
