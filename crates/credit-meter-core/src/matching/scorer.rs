//! Per-dimension scoring rules.

use std::collections::BTreeSet;

use super::explain;
use super::profile::{normalize, same_label, Availability, CandidateProfile, JobTarget};
use super::{DimensionScores, MatchAnalysis, MatchCategory};

/// Maximum points for skills.
pub const SKILLS_MAX: u32 = 35;
/// Maximum points for experience.
pub const EXPERIENCE_MAX: u32 = 25;
/// Maximum points for education.
pub const EDUCATION_MAX: u32 = 20;
/// Maximum points for location.
pub const LOCATION_MAX: u32 = 10;
/// Maximum points for availability.
pub const AVAILABILITY_MAX: u32 = 10;

const EXTRA_SKILL_BONUS: u32 = 2;
const EXPERIENCE_PROPORTIONAL_MAX: u32 = 20;
const SECTOR_BONUS: u32 = 5;
const EDUCATION_LEVEL_ONLY: u32 = 12;
const SAME_REGION: u32 = 5;

/// Score a candidate against a job.
///
/// Pure and deterministic: the same inputs always produce the same analysis.
#[must_use]
pub fn score(candidate: &CandidateProfile, target: &JobTarget) -> MatchAnalysis {
    let skills = SkillMatch::compute(&candidate.skills, &target.required_skills);

    let dimension_scores = DimensionScores {
        skills: skills.points,
        experience: experience_points(candidate, target),
        education: education_points(candidate, target),
        location: location_points(candidate, target),
        availability: availability_points(candidate.availability),
    };
    let overall_score = dimension_scores.total();

    let strengths = explain::strengths(&dimension_scores);
    let gaps = explain::gaps(&dimension_scores);
    let recommendations = explain::recommendations(&dimension_scores, &skills.missing);

    MatchAnalysis {
        overall_score,
        category: MatchCategory::from_score(overall_score),
        dimension_scores,
        strengths,
        gaps,
        recommendations,
        matched_skills: skills.matched,
        missing_skills: skills.missing,
    }
}

struct SkillMatch {
    points: u32,
    matched: Vec<String>,
    missing: Vec<String>,
}

impl SkillMatch {
    fn compute(candidate: &[String], required: &[String]) -> Self {
        let have: BTreeSet<String> = candidate.iter().filter_map(|s| normalize(s)).collect();
        let want: BTreeSet<String> = required.iter().filter_map(|s| normalize(s)).collect();

        let (matched, missing): (Vec<String>, Vec<String>) =
            want.iter().cloned().partition(|skill| have.contains(skill));

        if want.is_empty() || matched.is_empty() {
            return Self {
                points: 0,
                matched,
                missing,
            };
        }

        let matched_count = len64(matched.len());
        let base = u64::from(SKILLS_MAX) * matched_count / len64(want.len());
        let extra = len64(have.len()).saturating_sub(matched_count);
        let points = clamp(
            base.saturating_add(u64::from(EXTRA_SKILL_BONUS).saturating_mul(extra)),
            SKILLS_MAX,
        );

        Self {
            points,
            matched,
            missing,
        }
    }
}

fn len64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

/// Narrow a widened intermediate back to points, capped at `max`.
fn clamp(points: u64, max: u32) -> u32 {
    u32::try_from(points.min(u64::from(max))).unwrap_or(max)
}

fn experience_points(candidate: &CandidateProfile, target: &JobTarget) -> u32 {
    let proportional = match (candidate.experience_years, target.required_years) {
        (None, _) => 0,
        (Some(years), Some(required)) if required > 0 => clamp(
            u64::from(EXPERIENCE_PROPORTIONAL_MAX) * u64::from(years.min(required))
                / u64::from(required),
            EXPERIENCE_PROPORTIONAL_MAX,
        ),
        (Some(years), _) if years > 0 => EXPERIENCE_PROPORTIONAL_MAX,
        (Some(_), _) => 0,
    };

    let sector = if same_label(candidate.sector.as_deref(), target.sector.as_deref()) {
        SECTOR_BONUS
    } else {
        0
    };

    (proportional + sector).min(EXPERIENCE_MAX)
}

fn education_points(candidate: &CandidateProfile, target: &JobTarget) -> u32 {
    let (Some(held), Some(required)) = (&candidate.education, &target.education) else {
        return 0;
    };

    if held.level < required.level {
        return 0;
    }

    match &required.field {
        None => EDUCATION_MAX,
        Some(field) if same_label(held.field.as_deref(), Some(field)) => EDUCATION_MAX,
        Some(_) => EDUCATION_LEVEL_ONLY,
    }
}

fn location_points(candidate: &CandidateProfile, target: &JobTarget) -> u32 {
    let (Some(here), Some(there)) = (&candidate.location, &target.location) else {
        return 0;
    };

    if same_label(here.city.as_deref(), there.city.as_deref()) {
        LOCATION_MAX
    } else if same_label(here.region.as_deref(), there.region.as_deref()) {
        SAME_REGION
    } else {
        0
    }
}

fn availability_points(availability: Option<Availability>) -> u32 {
    match availability {
        Some(Availability::Immediate | Availability::WithinDays(0)) => AVAILABILITY_MAX,
        Some(Availability::WithinDays(days)) if days <= 30 => 7,
        Some(Availability::WithinDays(days)) if days <= 90 => 5,
        Some(Availability::WithinDays(_) | Availability::Unavailable) | None => 0,
    }
}
