use crate::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four Likert responses accepted by the quiz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Choice {
    StronglyDisagree,
    Disagree,
    Agree,
    StronglyAgree,
}

impl Choice {
    /// Ordinal value used in quiz radio-button identifiers (0..=3)
    pub fn index(self) -> u8 {
        match self {
            Choice::StronglyDisagree => 0,
            Choice::Disagree => 1,
            Choice::Agree => 2,
            Choice::StronglyAgree => 3,
        }
    }
}

/// Map agree/disagree masses to a Likert choice.
///
/// Branches are evaluated in order and the order is load-bearing: the
/// zero/zero case returns `Disagree` from its own rule, not from the
/// general tie rule below, and ties resolve to the weak outcome while a
/// margin of exactly `threshold` counts as the strong one. Do not merge
/// or reorder branches.
pub fn choice(agree: f64, disagree: f64, threshold: f64) -> Result<Choice> {
    if agree == 0.0 && disagree == 0.0 {
        return Ok(Choice::Disagree);
    }
    if agree >= disagree + threshold {
        return Ok(Choice::StronglyAgree);
    }
    if agree >= disagree {
        return Ok(Choice::Agree);
    }
    if disagree >= agree + threshold {
        return Ok(Choice::StronglyDisagree);
    }
    if disagree >= agree {
        return Ok(Choice::Disagree);
    }
    // Unreachable for totally-ordered inputs; NaN would land here.
    Err(ProbeError::InvariantViolation(format!(
        "no choice for agree={agree} disagree={disagree} threshold={threshold}"
    )))
}

/// One scored statement: the agree/disagree mass pair at a statement index.
///
/// The text rendering is the on-disk score-file format and is load-bearing:
/// downstream parsing depends on the literal `agree:` / `disagree:` markers
/// and whitespace-delimited tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreLine {
    pub index: usize,
    pub agree: f64,
    pub disagree: f64,
}

impl fmt::Display for ScoreLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} agree: {} disagree: {}",
            self.index, self.agree, self.disagree
        )
    }
}

impl FromStr for ScoreLine {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let malformed = |detail: &str| ProbeError::MalformedInput(format!("{detail}: {s:?}"));

        if tokens.len() != 5 {
            return Err(malformed("score line must have 5 tokens"));
        }
        if tokens[1] != "agree:" || tokens[3] != "disagree:" {
            return Err(malformed("missing agree:/disagree: markers"));
        }

        let index = tokens[0]
            .parse::<usize>()
            .map_err(|_| malformed("bad statement index"))?;
        let agree = tokens[2]
            .parse::<f64>()
            .map_err(|_| malformed("bad agree mass"))?;
        let disagree = tokens[4]
            .parse::<f64>()
            .map_err(|_| malformed("bad disagree mass"))?;

        Ok(ScoreLine {
            index,
            agree,
            disagree,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_zero_is_disagree() {
        for threshold in [0.0, 0.5, 1.0, 100.0] {
            assert_eq!(choice(0.0, 0.0, threshold).unwrap(), Choice::Disagree);
        }
    }

    #[test]
    fn test_tie_with_positive_threshold_is_agree() {
        assert_eq!(choice(5.0, 5.0, 0.5).unwrap(), Choice::Agree);
    }

    #[test]
    fn test_tie_with_zero_threshold_is_strongly_agree() {
        // With threshold 0 the strong rule fires first on any tie.
        assert_eq!(choice(5.0, 5.0, 0.0).unwrap(), Choice::StronglyAgree);
    }

    #[test]
    fn test_margin_below_threshold_is_weak() {
        assert_eq!(choice(5.5, 5.0, 1.0).unwrap(), Choice::Agree);
        assert_eq!(choice(5.0, 5.5, 1.0).unwrap(), Choice::Disagree);
    }

    #[test]
    fn test_margin_exactly_at_threshold_is_strong() {
        assert_eq!(choice(6.0, 5.0, 1.0).unwrap(), Choice::StronglyAgree);
        assert_eq!(choice(5.0, 6.0, 1.0).unwrap(), Choice::StronglyDisagree);
    }

    #[test]
    fn test_mass_pairs_from_classifier() {
        assert_eq!(choice(0.9, 0.1, 0.5).unwrap(), Choice::StronglyAgree);
        assert_eq!(choice(0.3, 0.7, 0.5).unwrap(), Choice::StronglyDisagree);
        assert_eq!(choice(0.6, 0.4, 0.5).unwrap(), Choice::Agree);
        assert_eq!(choice(0.4, 0.6, 0.5).unwrap(), Choice::Disagree);
    }

    #[test]
    fn test_totality_over_grid() {
        // The invariant branch must be unreachable for ordinary reals.
        let values = [0.0, 0.01, 0.1, 0.3, 0.5, 0.7, 0.9, 1.0, 5.0, 100.0];
        for &agree in &values {
            for &disagree in &values {
                for threshold in [0.1, 0.5, 1.0] {
                    let c = choice(agree, disagree, threshold).unwrap();
                    assert!(c.index() <= 3);
                }
            }
        }
    }

    #[test]
    fn test_nan_hits_invariant_branch() {
        let err = choice(f64::NAN, 0.5, 0.5).unwrap_err();
        assert!(matches!(err, ProbeError::InvariantViolation(_)));
    }

    #[test]
    fn test_choice_indices() {
        assert_eq!(Choice::StronglyDisagree.index(), 0);
        assert_eq!(Choice::Disagree.index(), 1);
        assert_eq!(Choice::Agree.index(), 2);
        assert_eq!(Choice::StronglyAgree.index(), 3);
    }

    #[test]
    fn test_score_line_display() {
        let line = ScoreLine {
            index: 0,
            agree: 0.9,
            disagree: 0.1,
        };
        assert_eq!(line.to_string(), "0 agree: 0.9 disagree: 0.1");
    }

    #[test]
    fn test_score_line_round_trip() {
        let original = ScoreLine {
            index: 17,
            agree: 0.7432109876,
            disagree: 0.2567890124,
        };
        let parsed: ScoreLine = original.to_string().parse().unwrap();
        assert_eq!(parsed.index, original.index);
        assert!((parsed.agree - original.agree).abs() < 1e-12);
        assert!((parsed.disagree - original.disagree).abs() < 1e-12);
    }

    #[test]
    fn test_score_line_round_trip_inexact_masses() {
        // Masses derived as 1.0 - confidence carry float noise; the text
        // format must preserve them exactly.
        let original = ScoreLine {
            index: 3,
            agree: 1.0 - 0.9,
            disagree: 0.9,
        };
        let parsed: ScoreLine = original.to_string().parse().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_score_line_parse_errors() {
        for bad in [
            "",
            "0 agree: 0.9",
            "0 agree 0.9 disagree 0.1",
            "x agree: 0.9 disagree: 0.1",
            "0 agree: x disagree: 0.1",
            "0 agree: 0.9 disagree: y",
            "0 agree: 0.9 disagree: 0.1 extra",
        ] {
            let err = bad.parse::<ScoreLine>().unwrap_err();
            assert!(matches!(err, ProbeError::MalformedInput(_)), "{bad:?}");
        }
    }
}
