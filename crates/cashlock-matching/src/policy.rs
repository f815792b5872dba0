//! # Matching Policy
//!
//! Tolerances and tier switches, scoped per entity and optionally per
//! currency. Resolution order: entity + currency, then entity, then the
//! book's default. Policies are passed explicitly into each run.

use serde::{Deserialize, Serialize};

use cashlock_core::{Currency, EntityId};

use crate::error::MatchingError;

/// Which tiers may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierToggles {
    /// Tier 1.
    pub deterministic: bool,
    /// Tier 2.
    pub rules: bool,
    /// Tier 3.
    pub suggested: bool,
}

impl Default for TierToggles {
    fn default() -> Self {
        Self {
            deterministic: true,
            rules: true,
            suggested: true,
        }
    }
}

/// Tolerances and switches for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingPolicy {
    /// Tier 2 amount tolerance in minor units.
    pub amount_tolerance_minor: i64,
    /// Tier 2 window between booking date and due date.
    pub date_window_days: i64,
    /// Enabled tiers.
    pub tiers: TierToggles,
    /// Whether Tier 2 matches allocate without approval.
    pub tier2_auto_approve: bool,
    /// Minimum Tier 3 score for a suggestion.
    pub suggest_min_score: f64,
    /// Tier 3 considers invoices within this percentage of the amount.
    pub suggest_amount_band_pct: u32,
    /// Tier 3 scores at most this many invoices, nearest amounts first.
    pub max_suggest_candidates: usize,
    /// Suggestions kept per transaction.
    pub max_suggestions_per_transaction: usize,
    /// Maximum days between the two legs of a wash pair.
    pub wash_window_days: i64,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            amount_tolerance_minor: 100,
            date_window_days: 5,
            tiers: TierToggles::default(),
            tier2_auto_approve: true,
            suggest_min_score: 0.70,
            suggest_amount_band_pct: 10,
            max_suggest_candidates: 25,
            max_suggestions_per_transaction: 3,
            wash_window_days: 3,
        }
    }
}

impl MatchingPolicy {
    /// Reject nonsensical values.
    pub fn validate(&self) -> Result<(), MatchingError> {
        let bad = |m: &str| Err(MatchingError::InvalidPolicy(m.to_string()));
        if self.amount_tolerance_minor < 0 {
            return bad("amount_tolerance_minor must not be negative");
        }
        if self.date_window_days < 0 || self.wash_window_days < 0 {
            return bad("day windows must not be negative");
        }
        if !(0.0..=1.0).contains(&self.suggest_min_score) {
            return bad("suggest_min_score must lie in 0..=1");
        }
        if self.suggest_amount_band_pct > 100 {
            return bad("suggest_amount_band_pct must not exceed 100");
        }
        if self.max_suggest_candidates == 0 || self.max_suggestions_per_transaction == 0 {
            return bad("candidate limits must be positive");
        }
        Ok(())
    }
}

/// A policy bound to an entity and optionally a currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopedPolicy {
    /// Entity.
    pub entity_id: EntityId,
    /// Currency, or `None` for every currency of the entity.
    #[serde(default)]
    pub currency: Option<Currency>,
    /// The policy.
    pub policy: MatchingPolicy,
}

/// Default policy plus scoped overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyBook {
    /// Applies when no scope matches.
    pub default: MatchingPolicy,
    /// Scoped overrides.
    pub scoped: Vec<ScopedPolicy>,
}

impl PolicyBook {
    /// Book with only a default.
    pub fn new(default: MatchingPolicy) -> Self {
        Self {
            default,
            scoped: Vec::new(),
        }
    }

    /// The policy that applies to `entity` in `currency`.
    pub fn resolve(&self, entity: &EntityId, currency: &Currency) -> &MatchingPolicy {
        self.get(entity, Some(currency))
            .or_else(|| self.get(entity, None))
            .unwrap_or(&self.default)
    }

    /// The policy stored for exactly this scope.
    pub fn get(&self, entity: &EntityId, currency: Option<&Currency>) -> Option<&MatchingPolicy> {
        self.scoped
            .iter()
            .find(|s| s.entity_id == *entity && s.currency.as_ref() == currency)
            .map(|s| &s.policy)
    }

    /// Insert or replace the policy for a scope.
    pub fn set(
        &mut self,
        entity: EntityId,
        currency: Option<Currency>,
        policy: MatchingPolicy,
    ) -> Result<(), MatchingError> {
        policy.validate()?;
        match self
            .scoped
            .iter_mut()
            .find(|s| s.entity_id == entity && s.currency == currency)
        {
            Some(existing) => existing.policy = policy,
            None => self.scoped.push(ScopedPolicy {
                entity_id: entity,
                currency,
                policy,
            }),
        }
        Ok(())
    }

    /// Validate every policy in the book.
    pub fn validate(&self) -> Result<(), MatchingError> {
        self.default.validate()?;
        self.scoped.iter().try_for_each(|s| s.policy.validate())
    }
}
