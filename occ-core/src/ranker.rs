//! Pure, multi-factor removal-score ranker (`# 4.C`). Reads no global
//! state: every input arrives as an argument, which is what makes `P4`
//! (purity, order-independence) a property test rather than an assertion
//! about hidden state.

use occ_utils::Timestamp;

use crate::model::{Occupant, PrivilegeTier, Session};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RankerWeights {
    pub t: f64,
    pub r: f64,
    pub o: f64,
    pub l: f64,
    pub f: f64,
    pub p: f64,
    pub a: f64,
    pub g: f64,
    pub v: f64,
    pub d: f64,
}

impl RankerWeights {
    pub const DEFAULT: Self = Self {
        t: 0.20,
        r: 0.10,
        o: 0.10,
        l: 0.08,
        f: 0.08,
        p: 0.08,
        a: 0.05,
        g: 0.04,
        v: 0.12,
        d: 0.15,
    };

    /// Asserted at startup (`# 4.C`, `# 9`): a misconfigured weight table
    /// is a programmer error, not a runtime condition to degrade under.
    pub fn assert_normalized(&self) {
        let sum = self.t + self.r + self.o + self.l + self.f + self.p + self.a + self.g + self.v + self.d;
        assert!(
            (sum - 1.0).abs() < 1e-9,
            "ranker weights must sum to 1.0, got {sum}"
        );
    }
}

impl Default for RankerWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RankerConstants {
    pub t_max_minutes: f64,
    pub r_max_minutes: f64,
    pub a_max_years: f64,
    pub recency_window_days: f64,
    pub frequency_window_visits: f64,
}

impl RankerConstants {
    pub const DEFAULT: Self = Self {
        t_max_minutes: 120.0,
        r_max_minutes: 120.0,
        a_max_years: 70.0,
        recency_window_days: 30.0,
        frequency_window_visits: 10.0,
    };
}

impl Default for RankerConstants {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The normalized per-factor breakdown plus the combined score, exposed to
/// operators via `list_scored` (`# 6`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ScoreBreakdown {
    pub t: f64,
    pub r: f64,
    pub o: f64,
    pub l: f64,
    pub f: f64,
    pub p: f64,
    pub a: f64,
    pub g: f64,
    pub v: f64,
    pub d: f64,
    pub total: f64,
}

fn demand_factor(now: Timestamp) -> f64 {
    use chrono::Timelike;
    let hour = now.hour();
    if (9..12).contains(&hour) || (17..20).contains(&hour) {
        1.0
    } else if hour == 8 || hour == 20 {
        0.5
    } else {
        0.2
    }
}

/// Scores a single session/occupant pair. `rank_among_inside` is this
/// session's 1-indexed position when all currently-inside sessions are
/// sorted by entry time ascending (earliest = 1); `total_inside` is the
/// size of that set. Both come from the caller, keeping this function free
/// of any lookup into shared state.
pub fn score(
    session: &Session,
    occupant: &Occupant,
    rank_among_inside: usize,
    total_inside: usize,
    now: Timestamp,
    weights: &RankerWeights,
    constants: &RankerConstants,
) -> ScoreBreakdown {
    let elapsed_minutes = (now - session.entry_time).num_seconds() as f64 / 60.0;
    let t = (elapsed_minutes / constants.t_max_minutes).clamp(0.0, 1.0);

    let remaining_minutes = ((session.deadline - now).num_seconds() as f64 / 60.0).max(0.0);
    let r = (remaining_minutes / constants.r_max_minutes).clamp(0.0, 1.0);

    let o = rank_among_inside as f64 / (total_inside.max(1) as f64);

    let l = match occupant.last_visit {
        Some(last) => {
            let days_since = (now - last).num_seconds() as f64 / 86_400.0;
            (1.0 - days_since / constants.recency_window_days).max(0.0)
        }
        None => 0.0,
    };

    let f = (1.0 - (occupant.frequency_used as f64 / constants.frequency_window_visits).min(1.0))
        .max(0.0);

    let p = match occupant.privilege {
        PrivilegeTier::Privileged => 0.0,
        PrivilegeTier::Regular => 1.0,
    };

    let a = match occupant.age {
        Some(age) => ((constants.a_max_years - age as f64) / constants.a_max_years).clamp(0.0, 1.0),
        None => 0.5,
    };

    let g = 0.5;

    let v = (1.0 - occupant.cooperativeness_score).clamp(0.0, 1.0);

    let d = demand_factor(now);

    let total = weights.t * t
        + weights.r * r
        + weights.o * o
        + weights.l * l
        + weights.f * f
        + weights.p * p
        + weights.a * a
        + weights.g * g
        + weights.v * v
        + weights.d * d;
    let total = (total * 1000.0).round() / 1000.0;
    let total = total.clamp(0.0, 1.0);

    ScoreBreakdown { t, r, o, l, f, p, a, g, v, d, total }
}

/// Ranks every (session, occupant) pair, highest-removable first, applying
/// the full tie-break chain from `# 4.C`: score desc, then P desc
/// (non-privileged first), then entry timestamp asc, then sequence_no asc.
pub fn rank(
    sessions: &[(Session, Occupant)],
    now: Timestamp,
    weights: &RankerWeights,
    constants: &RankerConstants,
) -> Vec<(Session, Occupant, ScoreBreakdown)> {
    let mut by_entry_order: Vec<&(Session, Occupant)> = sessions.iter().collect();
    by_entry_order.sort_by(|a, b| {
        a.0.entry_time
            .cmp(&b.0.entry_time)
            .then(a.0.sequence_no.cmp(&b.0.sequence_no))
    });

    let total_inside = by_entry_order.len();
    let mut scored: Vec<(Session, Occupant, ScoreBreakdown)> = by_entry_order
        .iter()
        .enumerate()
        .map(|(idx, (session, occupant))| {
            let breakdown = score(session, occupant, idx + 1, total_inside, now, weights, constants);
            (*session, occupant.clone(), breakdown)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.2.total
            .partial_cmp(&a.2.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.2.p.partial_cmp(&a.2.p).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.0.entry_time.cmp(&b.0.entry_time))
            .then(a.0.sequence_no.cmp(&b.0.sequence_no))
    });

    scored
}
