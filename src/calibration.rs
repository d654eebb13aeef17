//! Three-way outcome probabilities and the scoring rules used to fit and backtest them.

use serde::{Deserialize, Serialize};

const LOG_LOSS_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

impl Outcome {
    pub const ALL: [Outcome; 3] = [Outcome::Home, Outcome::Draw, Outcome::Away];

    /// Position in `[home, draw, away]` arrays.
    pub fn index(self) -> usize {
        match self {
            Outcome::Home => 0,
            Outcome::Draw => 1,
            Outcome::Away => 2,
        }
    }

    fn from_index(idx: usize) -> Self {
        match idx {
            0 => Outcome::Home,
            1 => Outcome::Draw,
            _ => Outcome::Away,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prob3 {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

impl Prob3 {
    pub fn uniform() -> Self {
        Self::from_array([1.0 / 3.0; 3])
    }

    pub fn from_array(p: [f64; 3]) -> Self {
        Self {
            home: p[0],
            draw: p[1],
            away: p[2],
        }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.home, self.draw, self.away]
    }

    /// Scales percentages (0..100) back to probabilities.
    pub fn from_percent(p: [f64; 3]) -> Self {
        Self::from_array(p.map(|v| v / 100.0)).normalized()
    }

    pub fn get(self, outcome: Outcome) -> f64 {
        self.to_array()[outcome.index()]
    }

    /// Negative, non-finite and all-zero inputs collapse to a valid distribution.
    pub fn normalized(self) -> Self {
        let clean = self
            .to_array()
            .map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
        let sum: f64 = clean.iter().sum();
        if sum <= 0.0 {
            return Self::uniform();
        }
        Self::from_array(clean.map(|v| v / sum))
    }

    /// Most likely outcome; ties go to home, then draw.
    pub fn favourite(self) -> Outcome {
        Outcome::from_index(argmax_idx(&self.to_array()))
    }
}

/// Converts a three-way split into percentages with 2 decimals that add up to exactly 100.00.
/// See [`percent_hundredths`] for how the rounding residue is placed.
pub fn percent_split(p: [f64; 3]) -> [f64; 3] {
    percent_hundredths(p).map(|c| c as f64 / 100.0)
}

/// The same split in whole hundredths of a percent, summing to exactly 10 000.
///
/// Rounding residue goes to the largest bucket. When home and away tie for largest it goes
/// to draw, so mirrored inputs give mirrored outputs.
pub fn percent_hundredths(p: [f64; 3]) -> [i64; 3] {
    let clean = p.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    // Home + away first: the total must not depend on which side is which.
    let sum = (clean[0] + clean[2]) + clean[1];
    let shares = if sum > 0.0 {
        clean.map(|v| v / sum)
    } else {
        [1.0 / 3.0; 3]
    };

    let mut out = shares.map(|v| (v * 10_000.0).round() as i64);
    let residue = 10_000 - out.iter().sum::<i64>();
    let target = if out[0] == out[2] || out[1] >= out[0].max(out[2]) {
        Outcome::Draw
    } else if out[0] > out[2] {
        Outcome::Home
    } else {
        Outcome::Away
    };
    out[target.index()] += residue;
    out
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// First index holding the maximum.
pub fn argmax_idx(p: &[f64; 3]) -> usize {
    (1..3).fold(0, |best, i| if p[i] > p[best] { i } else { best })
}

pub fn classify_outcome(home_goals: i32, away_goals: i32) -> Outcome {
    match home_goals.cmp(&away_goals) {
        std::cmp::Ordering::Greater => Outcome::Home,
        std::cmp::Ordering::Equal => Outcome::Draw,
        std::cmp::Ordering::Less => Outcome::Away,
    }
}

/// Observed outcome frequencies; uniform when there is nothing to count.
pub fn empirical_outcome_probs(outcomes: &[Outcome]) -> Prob3 {
    if outcomes.is_empty() {
        return Prob3::uniform();
    }
    let mut counts = [0.0_f64; 3];
    for o in outcomes {
        counts[o.index()] += 1.0;
    }
    let n = outcomes.len() as f64;
    Prob3::from_array(counts.map(|c| c / n))
}

/// Multi-class Brier score, log loss and argmax accuracy. Mismatched or empty inputs score as
/// zero samples.
pub fn evaluate_probs(predictions: &[Prob3], outcomes: &[Outcome]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::default();
    }

    let mut metrics = Metrics {
        samples: predictions.len(),
        ..Metrics::default()
    };
    let mut correct = 0usize;
    for (p, actual) in predictions.iter().zip(outcomes) {
        metrics.brier += Outcome::ALL
            .iter()
            .map(|o| {
                let hit = if o == actual { 1.0 } else { 0.0 };
                (p.get(*o) - hit).powi(2)
            })
            .sum::<f64>();
        metrics.log_loss -= p.get(*actual).clamp(LOG_LOSS_FLOOR, 1.0).ln();
        if p.favourite() == *actual {
            correct += 1;
        }
    }

    let n = metrics.samples as f64;
    metrics.brier /= n;
    metrics.log_loss /= n;
    metrics.accuracy = correct as f64 / n;
    metrics
}

/// Reliability table for one outcome class over `bins` equal-width probability buckets.
pub fn calibration_bins(
    predictions: &[Prob3],
    outcomes: &[Outcome],
    class: Outcome,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let width = 1.0 / bins as f64;
    let mut table: Vec<CalibrationBin> = (0..bins)
        .map(|i| CalibrationBin {
            bucket_start: i as f64 * width,
            bucket_end: (i + 1) as f64 * width,
            count: 0,
            avg_pred: 0.0,
            actual_rate: 0.0,
        })
        .collect();

    // Accumulate sums in place, then turn them into means.
    for (p, actual) in predictions.iter().zip(outcomes) {
        let prob = p.get(class).clamp(0.0, 1.0);
        let bin = &mut table[((prob * bins as f64) as usize).min(bins - 1)];
        bin.count += 1;
        bin.avg_pred += prob;
        if *actual == class {
            bin.actual_rate += 1.0;
        }
    }
    for bin in table.iter_mut().filter(|b| b.count > 0) {
        bin.avg_pred /= bin.count as f64;
        bin.actual_rate /= bin.count as f64;
    }
    table
}
