//! Candidate/job compatibility scoring.
//!
//! [`score`] is a pure function: a weighted sum over five capped dimensions,
//! plus a textual explanation derived only from the dimension scores.
//!
//! | Dimension    | Max |
//! |--------------|-----|
//! | Skills       | 35  |
//! | Experience   | 25  |
//! | Education    | 20  |
//! | Location     | 10  |
//! | Availability | 10  |
//!
//! Ranking several candidates is the caller's job; ties are left as-is.

mod explain;
pub mod profile;
mod scorer;

use serde::{Deserialize, Serialize};

pub use profile::{
    Availability, CandidateProfile, DegreeLevel, Education, EducationRequirement, JobTarget,
    Location,
};
pub use scorer::{
    score, AVAILABILITY_MAX, EDUCATION_MAX, EXPERIENCE_MAX, LOCATION_MAX, SKILLS_MAX,
};

/// Result of scoring one candidate against one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchAnalysis {
    /// Sum of the dimension scores, `0..=100`.
    pub overall_score: u32,

    /// Bucket of the overall score.
    pub category: MatchCategory,

    /// Individual dimension scores.
    pub dimension_scores: DimensionScores,

    /// Dimensions at or above 80% of their maximum.
    pub strengths: Vec<String>,

    /// Dimensions at or below 40% of their maximum.
    pub gaps: Vec<String>,

    /// Suggestions derived from the gaps.
    pub recommendations: Vec<String>,

    /// Required skills the candidate has, normalized.
    pub matched_skills: Vec<String>,

    /// Required skills the candidate lacks, normalized.
    pub missing_skills: Vec<String>,
}

/// Score per dimension, each capped at its own maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionScores {
    /// Skills, max 35.
    pub skills: u32,
    /// Experience, max 25.
    pub experience: u32,
    /// Education, max 20.
    pub education: u32,
    /// Location, max 10.
    pub location: u32,
    /// Availability, max 10.
    pub availability: u32,
}

impl DimensionScores {
    /// Sum of all dimensions.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.skills + self.experience + self.education + self.location + self.availability
    }

    /// Score of one dimension.
    #[must_use]
    pub const fn get(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Skills => self.skills,
            Dimension::Experience => self.experience,
            Dimension::Education => self.education,
            Dimension::Location => self.location,
            Dimension::Availability => self.availability,
        }
    }
}

/// A scored dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Required skills coverage.
    Skills,
    /// Years and sector of experience.
    Experience,
    /// Degree level and field.
    Education,
    /// City or region.
    Location,
    /// Start date.
    Availability,
}

impl Dimension {
    /// Every dimension, in reporting order.
    pub const ALL: [Self; 5] = [
        Self::Skills,
        Self::Experience,
        Self::Education,
        Self::Location,
        Self::Availability,
    ];

    /// Maximum points for the dimension.
    #[must_use]
    pub const fn max(self) -> u32 {
        match self {
            Self::Skills => SKILLS_MAX,
            Self::Experience => EXPERIENCE_MAX,
            Self::Education => EDUCATION_MAX,
            Self::Location => LOCATION_MAX,
            Self::Availability => AVAILABILITY_MAX,
        }
    }

    const fn strength_label(self) -> &'static str {
        match self {
            Self::Skills => "Strong skills match",
            Self::Experience => "Relevant experience",
            Self::Education => "Education fits the requirements",
            Self::Location => "Well located for the position",
            Self::Availability => "Available quickly",
        }
    }

    const fn gap_label(self) -> &'static str {
        match self {
            Self::Skills => "Few required skills",
            Self::Experience => "Limited relevant experience",
            Self::Education => "Education below the requirements",
            Self::Location => "Far from the position",
            Self::Availability => "Late or unknown availability",
        }
    }
}

/// Coarse bucket of an overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCategory {
    /// 75 and above.
    Excellent,
    /// 50 to 74.
    Potential,
    /// Below 50.
    Weak,
}

impl MatchCategory {
    /// Bucket an overall score.
    #[must_use]
    pub const fn from_score(score: u32) -> Self {
        if score >= 75 {
            Self::Excellent
        } else if score >= 50 {
            Self::Potential
        } else {
            Self::Weak
        }
    }
}

/// Counts over a batch of analyses (e.g. every applicant to one job).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Number of analyses.
    pub total: usize,
    /// Analyses in [`MatchCategory::Excellent`].
    pub excellent: usize,
    /// Analyses in [`MatchCategory::Potential`].
    pub potential: usize,
    /// Analyses in [`MatchCategory::Weak`].
    pub weak: usize,
    /// Floor of the mean overall score, 0 for an empty batch.
    pub average_score: u32,
}

/// Summarize a batch of analyses.
#[must_use]
pub fn summarize(analyses: &[MatchAnalysis]) -> MatchSummary {
    let mut summary = MatchSummary {
        total: analyses.len(),
        ..MatchSummary::default()
    };

    let mut sum: u64 = 0;
    for analysis in analyses {
        sum += u64::from(analysis.overall_score);
        match analysis.category {
            MatchCategory::Excellent => summary.excellent += 1,
            MatchCategory::Potential => summary.potential += 1,
            MatchCategory::Weak => summary.weak += 1,
        }
    }

    if let Ok(total) = u64::try_from(analyses.len()) {
        if total > 0 {
            summary.average_score = u32::try_from(sum / total).unwrap_or(u32::MAX);
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_boundaries() {
        assert_eq!(MatchCategory::from_score(100), MatchCategory::Excellent);
        assert_eq!(MatchCategory::from_score(75), MatchCategory::Excellent);
        assert_eq!(MatchCategory::from_score(74), MatchCategory::Potential);
        assert_eq!(MatchCategory::from_score(50), MatchCategory::Potential);
        assert_eq!(MatchCategory::from_score(49), MatchCategory::Weak);
        assert_eq!(MatchCategory::from_score(0), MatchCategory::Weak);
    }

    #[test]
    fn maxima_sum_to_100() {
        let total: u32 = Dimension::ALL.iter().map(|d| d.max()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn summarize_counts_categories() {
        let target = JobTarget {
            required_skills: vec!["rust".into()],
            ..JobTarget::default()
        };
        let strong = CandidateProfile {
            skills: vec!["rust".into()],
            experience_years: Some(4),
            availability: Some(Availability::Immediate),
            ..CandidateProfile::default()
        };

        let analyses = vec![
            score(&strong, &target),
            score(&CandidateProfile::default(), &target),
        ];
        let summary = summarize(&analyses);

        assert_eq!(summary.total, 2);
        // 35 + 20 + 10 = 65
        assert_eq!(summary.potential, 1);
        assert_eq!(summary.weak, 1);
        assert_eq!(summary.average_score, 32);
    }

    #[test]
    fn summarize_empty_batch() {
        assert_eq!(summarize(&[]), MatchSummary::default());
    }
}
