//! Severity classification of the pace metric.
//!
//! The metric is the "expected result" delta from the analytics export:
//! positive means ahead of the course pace, negative means behind. The
//! thresholds are fixed half-open intervals, evaluated first match wins.

use serde::Serialize;

/// Discrete severity of a student's pace metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeverityTier {
    Superior,
    OnTrack,
    SmallProblems,
    Problems,
    CriticalGap,
}

impl SeverityTier {
    /// Classify a pace metric. Total over all floats; anything that falls
    /// through the ordered intervals lands in the critical tier.
    pub fn classify(metric: f64) -> Self {
        if metric > 3.0 {
            Self::Superior
        } else if metric >= 0.0 {
            Self::OnTrack
        } else if metric >= -4.0 {
            Self::SmallProblems
        } else if metric >= -10.0 {
            Self::Problems
        } else {
            Self::CriticalGap
        }
    }

    /// Short human-facing label, prefixed to tier-flavored replies.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Superior => "Superior",
            Self::OnTrack => "On track",
            Self::SmallProblems => "Small problems",
            Self::Problems => "Problems",
            Self::CriticalGap => "Critical gap",
        }
    }

    /// Fixed persona instruction for the model, one per tier. Static data:
    /// tone and rhetorical framing only, the metric itself goes into the
    /// user-side request.
    pub fn persona_prompt(&self) -> &'static str {
        match self {
            Self::Superior => {
                "The student is significantly ahead of the pace of the course. \
                 Respond as an encouraging mentor: praise their excellent results \
                 and reinforce their motivation to keep learning."
            }
            Self::OnTrack => {
                "The student is going exactly at the pace of the course. Respond \
                 positively: confirm they are doing everything right and support them."
            }
            Self::SmallProblems => {
                "The student is slightly behind the pace of the course. Respond with \
                 soft motivation and a light humorous rebuke that encourages them to \
                 catch up."
            }
            Self::Problems => {
                "The student is lagging behind the pace of the course. Respond \
                 half-jokingly: point out the lag and the importance of solving it, \
                 while reassuring them that it's okay and it could have been worse."
            }
            Self::CriticalGap => {
                "The student is critically behind the pace of the course. Respond \
                 strictly but constructively: make the seriousness of the situation \
                 clear, urge immediate action, and add concrete tips for organizing \
                 their study time."
            }
        }
    }
}

impl std::fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_follow_half_open_intervals() {
        assert_eq!(SeverityTier::classify(3.0001), SeverityTier::Superior);
        assert_eq!(SeverityTier::classify(3.0), SeverityTier::OnTrack);
        assert_eq!(SeverityTier::classify(0.0), SeverityTier::OnTrack);
        assert_eq!(SeverityTier::classify(-0.0001), SeverityTier::SmallProblems);
        assert_eq!(SeverityTier::classify(-4.0), SeverityTier::SmallProblems);
        assert_eq!(SeverityTier::classify(-4.0001), SeverityTier::Problems);
        assert_eq!(SeverityTier::classify(-10.0), SeverityTier::Problems);
        assert_eq!(SeverityTier::classify(-10.0001), SeverityTier::CriticalGap);
    }

    #[test]
    fn interior_values_map_to_expected_tiers() {
        assert_eq!(SeverityTier::classify(5.0), SeverityTier::Superior);
        assert_eq!(SeverityTier::classify(1.5), SeverityTier::OnTrack);
        assert_eq!(SeverityTier::classify(-2.0), SeverityTier::SmallProblems);
        assert_eq!(SeverityTier::classify(-7.0), SeverityTier::Problems);
        assert_eq!(SeverityTier::classify(-25.0), SeverityTier::CriticalGap);
    }

    #[test]
    fn every_tier_has_a_distinct_persona() {
        let tiers = [
            SeverityTier::Superior,
            SeverityTier::OnTrack,
            SeverityTier::SmallProblems,
            SeverityTier::Problems,
            SeverityTier::CriticalGap,
        ];
        for (i, a) in tiers.iter().enumerate() {
            assert!(!a.persona_prompt().is_empty());
            for b in &tiers[i + 1..] {
                assert_ne!(a.persona_prompt(), b.persona_prompt());
                assert_ne!(a.label(), b.label());
            }
        }
    }
}
