//! Service cost catalog types.
//!
//! This module defines the price of each metered feature in credits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CreditError, Result};
use crate::{ChangeId, ServiceCode};

/// Service codes of the features sold on the platform.
pub mod services {
    /// AI-generated CV.
    pub const AI_CV_GENERATION: &str = "ai_cv_generation";
    /// AI-generated cover letter.
    pub const AI_COVER_LETTER: &str = "ai_cover_letter";
    /// Candidate/job compatibility analysis.
    pub const AI_MATCHING: &str = "ai_matching";
    /// Interview simulation and coaching.
    pub const AI_COACH: &str = "ai_coach";
    /// Career path planning.
    pub const AI_CAREER_PLAN: &str = "ai_career_plan";
    /// Profile visibility boost in the CV marketplace.
    pub const PROFILE_VISIBILITY_BOOST: &str = "profile_visibility_boost";
    /// Featured job application.
    pub const FEATURED_APPLICATION: &str = "featured_application";
}

/// Price of one service in credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCost {
    /// Unique service code.
    pub service_code: ServiceCode,

    /// Display name.
    pub service_name: String,

    /// Grouping used when listing the catalog.
    pub category: String,

    /// Base cost in credits. Always positive.
    pub cost: i64,

    /// Inactive services cannot be purchased.
    pub active: bool,

    /// Running promotion, if any.
    pub promotion: Option<Promotion>,

    /// When the price was last changed.
    pub updated_at: DateTime<Utc>,
}

impl ServiceCost {
    /// Create an active service cost without promotion.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidAmount` if `cost` is not positive.
    pub fn new(
        service_code: ServiceCode,
        service_name: impl Into<String>,
        category: impl Into<String>,
        cost: i64,
    ) -> Result<Self> {
        if cost <= 0 {
            return Err(CreditError::InvalidAmount(cost));
        }

        Ok(Self {
            service_code,
            service_name: service_name.into(),
            category: category.into(),
            cost,
            active: true,
            promotion: None,
            updated_at: Utc::now(),
        })
    }

    /// Attach a promotion.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidDiscount` unless `1 <= discount_percent <= 100`.
    pub fn with_promotion(mut self, discount_percent: u8) -> Result<Self> {
        self.promotion = Some(Promotion::new(discount_percent)?);
        Ok(self)
    }

    /// Mark the service inactive.
    #[must_use]
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// The price actually charged, after any promotion.
    ///
    /// The discount is rounded down and the result never drops below one
    /// credit: a promotion cannot make a paid service free.
    #[must_use]
    pub fn effective_cost(&self) -> i64 {
        match &self.promotion {
            Some(promotion) => {
                let cost = i128::from(self.cost);
                let discounted = cost - cost * i128::from(promotion.discount_percent) / 100;
                i64::try_from(discounted).unwrap_or(self.cost).max(1)
            }
            None => self.cost,
        }
    }

    /// The purchasable price, or `None` if the service is inactive.
    #[must_use]
    pub fn price(&self) -> Option<Price> {
        self.active.then(|| Price {
            service_code: self.service_code.clone(),
            base_cost: self.cost,
            cost: self.effective_cost(),
        })
    }
}

/// A percentage discount on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Discount in percent, `1..=100`.
    pub discount_percent: u8,
}

impl Promotion {
    /// Create a promotion.
    ///
    /// # Errors
    ///
    /// Returns `CreditError::InvalidDiscount` unless `1 <= discount_percent <= 100`.
    pub fn new(discount_percent: u8) -> Result<Self> {
        if (1..=100).contains(&discount_percent) {
            Ok(Self { discount_percent })
        } else {
            Err(CreditError::InvalidDiscount(discount_percent))
        }
    }
}

/// A resolved, purchasable price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// The service being priced.
    pub service_code: ServiceCode,

    /// Catalog cost before promotion.
    pub base_cost: i64,

    /// Credits to charge.
    pub cost: i64,
}

// ============================================================================
// Cost history
// ============================================================================

/// The priced terms of a service at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTerms {
    /// Base cost in credits.
    pub cost: i64,
    /// Whether the service could be purchased.
    pub active: bool,
    /// Promotion discount, if one was running.
    pub discount_percent: Option<u8>,
}

impl From<&ServiceCost> for CostTerms {
    fn from(cost: &ServiceCost) -> Self {
        Self {
            cost: cost.cost,
            active: cost.active,
            discount_percent: cost.promotion.map(|p| p.discount_percent),
        }
    }
}

/// Whether a change introduced a service or modified one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostChangeKind {
    /// First cost recorded for the service.
    Created,
    /// Replacement of an existing cost.
    Updated,
}

impl CostChangeKind {
    /// The stored name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }

    /// Parse a stored kind name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

/// One append-only record of a service cost write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCostChange {
    /// Time-ordered change ID.
    pub id: ChangeId,

    /// The service whose cost was written.
    pub service_code: ServiceCode,

    /// Display name after the change.
    pub service_name: String,

    /// Created or updated.
    pub kind: CostChangeKind,

    /// Terms before the change, `None` when the service was created.
    pub previous: Option<CostTerms>,

    /// Terms after the change.
    pub current: CostTerms,

    /// Operator (admin ID) or `system` for seeding.
    pub changed_by: String,

    /// Free-form reason given by the operator.
    pub reason: Option<String>,

    /// When the change was written.
    pub changed_at: DateTime<Utc>,
}

impl ServiceCostChange {
    /// Record the write of `current` over `previous`.
    #[must_use]
    pub fn between(
        previous: Option<&ServiceCost>,
        current: &ServiceCost,
        changed_by: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: ChangeId::generate(),
            service_code: current.service_code.clone(),
            service_name: current.service_name.clone(),
            kind: if previous.is_some() {
                CostChangeKind::Updated
            } else {
                CostChangeKind::Created
            },
            previous: previous.map(CostTerms::from),
            current: CostTerms::from(current),
            changed_by: changed_by.into(),
            reason,
            changed_at: Utc::now(),
        }
    }

    /// Whether the change altered what buyers pay or can buy.
    #[must_use]
    pub fn changes_terms(&self) -> bool {
        self.previous != Some(self.current)
    }
}

/// The catalog a fresh deployment starts with.
#[must_use]
pub fn default_catalog() -> Vec<ServiceCost> {
    const DEFAULTS: [(&str, &str, &str, i64); 7] = [
        (services::AI_CV_GENERATION, "AI CV generation", "documents", 30),
        (services::AI_COVER_LETTER, "AI cover letter", "documents", 20),
        (services::AI_MATCHING, "Profile / job matching", "matching", 50),
        (services::AI_COACH, "Interview simulation", "coaching", 40),
        (services::AI_CAREER_PLAN, "Career plan", "coaching", 40),
        (services::PROFILE_VISIBILITY_BOOST, "Profile visibility boost", "visibility", 100),
        (services::FEATURED_APPLICATION, "Featured application", "visibility", 25),
    ];

    DEFAULTS
        .iter()
        .filter_map(|(code, name, category, cost)| {
            let code = ServiceCode::new(*code).ok()?;
            ServiceCost::new(code, *name, *category, *cost).ok()
        })
        .collect()
}
