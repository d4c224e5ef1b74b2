//! Scorer inputs: a candidate profile and the job it is matched against.
//!
//! Every field is optional. A dimension with missing data on either side
//! scores zero instead of failing the whole analysis.

use serde::{Deserialize, Serialize};

/// What the candidate brings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    /// Declared skills, free text.
    pub skills: Vec<String>,

    /// Years of professional experience.
    pub experience_years: Option<u32>,

    /// Sector of the candidate's experience.
    pub sector: Option<String>,

    /// Highest degree obtained.
    pub education: Option<Education>,

    /// Where the candidate lives.
    pub location: Option<Location>,

    /// When the candidate can start.
    pub availability: Option<Availability>,
}

/// What the job asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobTarget {
    /// Required skills, free text.
    pub required_skills: Vec<String>,

    /// Required years of experience.
    pub required_years: Option<u32>,

    /// Sector of the position.
    pub sector: Option<String>,

    /// Minimum degree, optionally in a given field.
    pub education: Option<EducationRequirement>,

    /// Where the position is located.
    pub location: Option<Location>,
}

/// Degree levels, lowest first.
///
/// Accepts the French names used by the CV import (`bac`, `licence`,
/// `doctorat`) as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegreeLevel {
    /// Secondary school diploma.
    #[serde(alias = "bac")]
    Secondary,
    /// Bachelor's degree.
    #[serde(alias = "licence")]
    Bachelor,
    /// Master's degree.
    Master,
    /// Doctorate.
    #[serde(alias = "doctorat")]
    Doctorate,
}

/// A degree held by a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Education {
    /// Degree level.
    pub level: DegreeLevel,

    /// Field of study.
    #[serde(default)]
    pub field: Option<String>,
}

/// The degree a job requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationRequirement {
    /// Minimum level.
    pub level: DegreeLevel,

    /// Required field, if any.
    #[serde(default)]
    pub field: Option<String>,
}

/// A city and the region it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    /// City name.
    pub city: Option<String>,

    /// Region name.
    pub region: Option<String>,
}

/// When a candidate can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// Can start now.
    Immediate,
    /// Can start after a notice period, in days.
    WithinDays(u32),
    /// Not looking.
    Unavailable,
}

/// Normalize a free-text label for comparison: trimmed and case-folded.
///
/// Returns `None` for blank input.
pub(crate) fn normalize(label: &str) -> Option<String> {
    let trimmed = label.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

/// Case-insensitive equality of two optional labels. Missing or blank never matches.
pub(crate) fn same_label(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.and_then(normalize), b.and_then(normalize)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degree_levels_are_ordered() {
        assert!(DegreeLevel::Secondary < DegreeLevel::Bachelor);
        assert!(DegreeLevel::Bachelor < DegreeLevel::Master);
        assert!(DegreeLevel::Master < DegreeLevel::Doctorate);
    }

    #[test]
    fn french_degree_names_are_accepted() {
        let level: DegreeLevel = serde_json::from_str("\"licence\"").unwrap();
        assert_eq!(level, DegreeLevel::Bachelor);
        let level: DegreeLevel = serde_json::from_str("\"doctorat\"").unwrap();
        assert_eq!(level, DegreeLevel::Doctorate);
    }

    #[test]
    fn labels_compare_case_insensitively() {
        assert!(same_label(Some(" Lyon "), Some("lyon")));
        assert!(!same_label(Some("Lyon"), None));
        assert!(!same_label(Some("  "), Some("  ")));
    }

    #[test]
    fn partial_profiles_deserialize() {
        let candidate: CandidateProfile =
            serde_json::from_str(r#"{"skills": ["Rust"], "availability": {"within_days": 30}}"#)
                .unwrap();
        assert_eq!(candidate.skills, vec!["Rust".to_string()]);
        assert_eq!(candidate.availability, Some(Availability::WithinDays(30)));
        assert!(candidate.education.is_none());
    }
}
