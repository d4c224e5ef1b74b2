//! Strengths, gaps and recommendations derived from dimension scores.

use super::{Dimension, DimensionScores};

/// Dimensions scoring at least 80% of their maximum.
pub(crate) fn strengths(scores: &DimensionScores) -> Vec<String> {
    Dimension::ALL
        .iter()
        .filter(|d| is_strength(scores.get(**d), d.max()))
        .map(|d| format!("{} ({}/{})", d.strength_label(), scores.get(*d), d.max()))
        .collect()
}

/// Dimensions scoring at most 40% of their maximum.
pub(crate) fn gaps(scores: &DimensionScores) -> Vec<String> {
    Dimension::ALL
        .iter()
        .filter(|d| is_gap(scores.get(**d), d.max()))
        .map(|d| format!("{} ({}/{})", d.gap_label(), scores.get(*d), d.max()))
        .collect()
}

/// One recommendation per gap, in dimension order.
pub(crate) fn recommendations(scores: &DimensionScores, missing_skills: &[String]) -> Vec<String> {
    Dimension::ALL
        .iter()
        .filter(|d| is_gap(scores.get(**d), d.max()))
        .map(|d| match d {
            Dimension::Skills if !missing_skills.is_empty() => format!(
                "Develop or highlight the missing skills: {}",
                missing_skills.join(", ")
            ),
            Dimension::Skills => "List your technical skills on your profile".to_string(),
            Dimension::Experience => {
                "Detail your professional experience and the sectors you worked in".to_string()
            }
            Dimension::Education => {
                "Add your degrees or relevant certifications to your profile".to_string()
            }
            Dimension::Location => {
                "Indicate your mobility or openness to remote work".to_string()
            }
            Dimension::Availability => "Specify when you can start".to_string(),
        })
        .collect()
}

fn is_strength(score: u32, max: u32) -> bool {
    score * 5 >= max * 4
}

fn is_gap(score: u32, max: u32) -> bool {
    score * 5 <= max * 2
}
