//! Career pyramids.
//!
//! A candidate's tier resolves to an ordered list of acceptable tiers, most
//! specific first. Prompt selection uses the list as an eligibility filter so
//! that scarce matches degrade towards junior tiers instead of failing closed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse candidate track selecting which pyramid applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    #[default]
    Elite,
    Operational,
}

impl Segment {
    /// Anything other than `operational` is the elite track.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "operational" => Segment::Operational,
            _ => Segment::Elite,
        }
    }

    /// Leaf tier used when a profile carries no tier or an unknown one.
    pub fn default_tier(self) -> CareerTier {
        match self {
            Segment::Elite => CareerTier::Student,
            Segment::Operational => CareerTier::OpEntry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareerTier {
    Exec,
    Manager,
    Professional,
    Graduate,
    Student,
    OpSupervisor,
    OpExperienced,
    OpJunior,
    OpEntry,
}

const ELITE: [CareerTier; 5] = [
    CareerTier::Exec,
    CareerTier::Manager,
    CareerTier::Professional,
    CareerTier::Graduate,
    CareerTier::Student,
];

const OPERATIONAL: [CareerTier; 4] = [
    CareerTier::OpSupervisor,
    CareerTier::OpExperienced,
    CareerTier::OpJunior,
    CareerTier::OpEntry,
];

impl CareerTier {
    pub fn parse(label: &str) -> Option<Self> {
        let tier = match label.trim().to_lowercase().as_str() {
            "exec" => CareerTier::Exec,
            "manager" => CareerTier::Manager,
            "professional" => CareerTier::Professional,
            "graduate" => CareerTier::Graduate,
            "student" => CareerTier::Student,
            "op_supervisor" => CareerTier::OpSupervisor,
            "op_experienced" => CareerTier::OpExperienced,
            "op_junior" => CareerTier::OpJunior,
            "op_entry" => CareerTier::OpEntry,
            _ => return None,
        };
        Some(tier)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CareerTier::Exec => "exec",
            CareerTier::Manager => "manager",
            CareerTier::Professional => "professional",
            CareerTier::Graduate => "graduate",
            CareerTier::Student => "student",
            CareerTier::OpSupervisor => "op_supervisor",
            CareerTier::OpExperienced => "op_experienced",
            CareerTier::OpJunior => "op_junior",
            CareerTier::OpEntry => "op_entry",
        }
    }

    pub fn segment(self) -> Segment {
        if OPERATIONAL.contains(&self) {
            Segment::Operational
        } else {
            Segment::Elite
        }
    }
}

impl fmt::Display for CareerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a tier label within a segment to its eligibility pyramid.
///
/// The result always starts with the resolved tier itself and walks down the
/// segment's ladder. Labels that are unknown, empty, or belong to the other
/// segment resolve to the segment's default leaf.
pub fn pyramid(label: &str, segment: Segment) -> Vec<CareerTier> {
    let ladder: &[CareerTier] = match segment {
        Segment::Elite => &ELITE,
        Segment::Operational => &OPERATIONAL,
    };
    let tier = CareerTier::parse(label)
        .filter(|t| t.segment() == segment)
        .unwrap_or_else(|| segment.default_tier());

    ladder
        .iter()
        .skip_while(|t| **t != tier)
        .copied()
        .collect()
}

/// Same as [`pyramid`], rendered as the string labels stored on prompts.
pub fn pyramid_labels(label: &str, segment: Segment) -> Vec<String> {
    pyramid(label, segment)
        .into_iter()
        .map(|t| t.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_resolves_down_the_elite_ladder() {
        assert_eq!(
            pyramid("manager", Segment::Elite),
            vec![
                CareerTier::Manager,
                CareerTier::Professional,
                CareerTier::Graduate,
                CareerTier::Student
            ]
        );
    }

    #[test]
    fn leaf_tier_is_its_own_pyramid() {
        assert_eq!(pyramid("student", Segment::Elite), vec![CareerTier::Student]);
        assert_eq!(
            pyramid("op_entry", Segment::Operational),
            vec![CareerTier::OpEntry]
        );
    }

    #[test]
    fn unknown_or_empty_tier_defaults_to_segment_leaf() {
        assert_eq!(pyramid("astronaut", Segment::Elite), vec![CareerTier::Student]);
        assert_eq!(pyramid("", Segment::Operational), vec![CareerTier::OpEntry]);
    }

    #[test]
    fn tier_from_other_segment_is_treated_as_unknown() {
        assert_eq!(
            pyramid("manager", Segment::Operational),
            vec![CareerTier::OpEntry]
        );
    }

    #[test]
    fn labels_are_case_and_whitespace_insensitive() {
        assert_eq!(
            pyramid_labels("  Op_Junior ", Segment::parse("OPERATIONAL")),
            vec!["op_junior".to_string(), "op_entry".to_string()]
        );
    }
}
