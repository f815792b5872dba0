//! # Intercompany Wash Detection
//!
//! A wash is a debit from one entity and a credit of the same amount and
//! currency into another entity of the same group, booked within the wash
//! window. Each transaction joins at most one pair.
//!
//! ## Design
//!
//! Credits are bucketed by (currency, amount). Debits are visited in
//! canonical order (booking date, id) and take the closest unused credit,
//! ties broken by earlier booking date and then id, so the result does not
//! depend on the order the transactions were loaded in.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use cashlock_core::{
    BankTransaction, Currency, Direction, EntityId, TransactionId, WashId, WashPair, WashStatus,
};

/// Entities that move money between each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntercompanyGroup {
    /// Group name.
    pub name: String,
    /// Member entities.
    pub entities: Vec<EntityId>,
}

/// Every configured group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntercompanyGroups(Vec<IntercompanyGroup>);

impl IntercompanyGroups {
    /// Wrap a list of groups.
    pub fn new(groups: Vec<IntercompanyGroup>) -> Self {
        Self(groups)
    }

    /// The configured groups.
    pub fn groups(&self) -> &[IntercompanyGroup] {
        &self.0
    }

    /// The group containing `entity`.
    pub fn group_of(&self, entity: &EntityId) -> Option<&IntercompanyGroup> {
        self.0.iter().find(|g| g.entities.contains(entity))
    }

    /// Whether `a` and `b` are distinct members of one group.
    pub fn same_group(&self, a: &EntityId, b: &EntityId) -> bool {
        a != b
            && self
                .0
                .iter()
                .any(|g| g.entities.contains(a) && g.entities.contains(b))
    }
}

/// Pair debits with credits across entities of the same group.
///
/// `window_days` gives the wash window for the debit's entity and currency.
pub fn detect_washes<F>(
    candidates: &[&BankTransaction],
    groups: &IntercompanyGroups,
    window_days: F,
) -> Vec<WashPair>
where
    F: Fn(&BankTransaction) -> i64,
{
    if groups.groups().is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<&BankTransaction> = candidates.to_vec();
    ordered.sort_by(|a, b| (a.booking_date, &a.id).cmp(&(b.booking_date, &b.id)));

    let mut credits: BTreeMap<(Currency, i64), Vec<&BankTransaction>> = BTreeMap::new();
    for tx in ordered.iter().filter(|t| t.direction == Direction::Credit) {
        credits
            .entry((tx.currency.clone(), tx.amount_minor))
            .or_default()
            .push(tx);
    }

    let mut used: HashSet<&TransactionId> = HashSet::new();
    let mut pairs = Vec::new();
    for debit in ordered.iter().filter(|t| t.direction == Direction::Debit) {
        let Some(bucket) = credits.get(&(debit.currency.clone(), debit.amount_minor)) else {
            continue;
        };
        let window = window_days(debit);
        let best = bucket
            .iter()
            .filter(|c| !used.contains(&c.id))
            .filter(|c| groups.same_group(&debit.entity_id, &c.entity_id))
            .map(|c| ((c.booking_date - debit.booking_date).num_days().abs(), *c))
            .filter(|(gap, _)| *gap <= window)
            .min_by(|(ga, a), (gb, b)| (ga, a.booking_date, &a.id).cmp(&(gb, b.booking_date, &b.id)));

        if let Some((day_gap, credit)) = best {
            used.insert(&credit.id);
            pairs.push(WashPair {
                id: WashId::new(),
                outgoing: debit.id.clone(),
                incoming: credit.id.clone(),
                from_entity: debit.entity_id.clone(),
                to_entity: credit.entity_id.clone(),
                amount_minor: debit.amount_minor,
                currency: debit.currency.clone(),
                day_gap,
                status: WashStatus::Pending,
                confirmed_by: None,
            });
        }
    }
    pairs
}
