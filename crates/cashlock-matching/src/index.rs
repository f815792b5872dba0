//! # Invoice Index
//!
//! Open invoices partitioned by pool (entity, currency, kind) and ordered by
//! open amount. Tier 1 looks up exact amounts, Tier 2 a tolerance range and
//! Tier 3 walks outward from the transaction amount, nearest first. No tier
//! scans the full invoice pool.
//!
//! Open amounts shrink as the run allocates; [`InvoiceIndex::reduce`] keeps
//! the ordering current so later transactions see the remaining amount.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;

use cashlock_core::{Currency, EntityId, Invoice, InvoiceKind};

use crate::text::{normalize_name, normalize_reference};

/// Partition of the invoice pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Owning entity.
    pub entity_id: EntityId,
    /// Invoice currency.
    pub currency: Currency,
    /// Receivable or payable.
    pub kind: InvoiceKind,
}

/// An indexed invoice.
#[derive(Debug)]
pub struct Slot<'a> {
    /// The invoice.
    pub invoice: &'a Invoice,
    /// Amount still open.
    pub open_minor: i64,
    /// Normalized document number.
    pub document_norm: String,
    /// Normalized customer or supplier name.
    pub customer_norm: String,
}

/// Amount-ordered index over open invoices.
#[derive(Debug, Default)]
pub struct InvoiceIndex<'a> {
    slots: Vec<Slot<'a>>,
    pools: HashMap<PoolKey, BTreeSet<(i64, usize)>>,
}

impl<'a> InvoiceIndex<'a> {
    /// Index invoices with a positive open amount. On-hold invoices are left
    /// out. Slots are assigned in invoice-id order so ties break the same
    /// way whatever the load order.
    pub fn build<I, F>(invoices: I, open_amount: F) -> Self
    where
        I: IntoIterator<Item = &'a Invoice>,
        F: Fn(&Invoice) -> i64,
    {
        let mut eligible: Vec<(&'a Invoice, i64)> = invoices
            .into_iter()
            .filter(|inv| !inv.on_hold)
            .map(|inv| (inv, open_amount(inv)))
            .filter(|(_, open)| *open > 0)
            .collect();
        eligible.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        let mut index = Self::default();
        for (inv, open) in eligible {
            let slot = index.slots.len();
            index
                .pools
                .entry(Self::key_of(inv))
                .or_default()
                .insert((open, slot));
            index.slots.push(Slot {
                invoice: inv,
                open_minor: open,
                document_norm: normalize_reference(&inv.document_number),
                customer_norm: normalize_name(&inv.customer),
            });
        }
        index
    }

    fn key_of(inv: &Invoice) -> PoolKey {
        PoolKey {
            entity_id: inv.entity_id.clone(),
            currency: inv.currency.clone(),
            kind: inv.kind,
        }
    }

    /// Number of indexed invoices.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot at `i`.
    pub fn slot(&self, i: usize) -> &Slot<'a> {
        &self.slots[i]
    }

    /// Slots whose open amount lies in `lo..=hi`, ascending by amount.
    pub fn range(&self, key: &PoolKey, lo: i64, hi: i64) -> Vec<usize> {
        if lo > hi {
            return Vec::new();
        }
        self.pools.get(key).map_or_else(Vec::new, |set| {
            set.range((lo, 0)..=(hi, usize::MAX))
                .map(|&(_, i)| i)
                .collect()
        })
    }

    /// Slots whose open amount equals `amount`.
    pub fn exact(&self, key: &PoolKey, amount: i64) -> Vec<usize> {
        self.range(key, amount, amount)
    }

    /// Up to `limit` slots within `lo..=hi`, nearest to `amount` first. Ties
    /// in distance prefer the lower amount.
    pub fn nearest(&self, key: &PoolKey, amount: i64, lo: i64, hi: i64, limit: usize) -> Vec<usize> {
        if lo > amount || amount > hi {
            return Vec::new();
        }
        let Some(set) = self.pools.get(key) else {
            return Vec::new();
        };
        let mut below = set
            .range((Bound::Included((lo, 0)), Bound::Excluded((amount, 0))))
            .rev()
            .peekable();
        let mut above = set
            .range((Bound::Included((amount, 0)), Bound::Included((hi, usize::MAX))))
            .peekable();
        let mut out = Vec::with_capacity(limit);
        while out.len() < limit {
            let pick_below = match (below.peek(), above.peek()) {
                (Some(b), Some(a)) => amount - b.0 <= a.0 - amount,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if pick_below { below.next() } else { above.next() };
            if let Some(&(_, i)) = next {
                out.push(i);
            }
        }
        out
    }

    /// Lower the open amount of slot `i` after an allocation.
    pub fn reduce(&mut self, i: usize, by: i64) {
        let key = Self::key_of(self.slots[i].invoice);
        let old = self.slots[i].open_minor;
        let new = old - by;
        if let Some(set) = self.pools.get_mut(&key) {
            set.remove(&(old, i));
            if new > 0 {
                set.insert((new, i));
            }
        }
        self.slots[i].open_minor = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashlock_core::InvoiceId;

    fn inv(id: &str, amount: i64) -> Invoice {
        Invoice {
            id: InvoiceId::new(id),
            entity_id: EntityId::new("E"),
            document_number: format!("doc-{id}"),
            customer: "C".into(),
            kind: InvoiceKind::Receivable,
            amount_minor: amount,
            currency: Currency::new("EUR").unwrap(),
            base_amount_minor: amount,
            due_date: None,
            country: String::new(),
            payment_date: None,
            on_hold: false,
        }
    }

    fn key() -> PoolKey {
        PoolKey {
            entity_id: EntityId::new("E"),
            currency: Currency::new("EUR").unwrap(),
            kind: InvoiceKind::Receivable,
        }
    }

    fn ids(index: &InvoiceIndex<'_>, slots: &[usize]) -> Vec<String> {
        slots
            .iter()
            .map(|&i| index.slot(i).invoice.id.to_string())
            .collect()
    }

    #[test]
    fn exact_and_range_queries() {
        let invoices = vec![inv("a", 100), inv("b", 150), inv("c", 100), inv("d", 400)];
        let index = InvoiceIndex::build(&invoices, |i| i.amount_minor);
        assert_eq!(ids(&index, &index.exact(&key(), 100)), vec!["a", "c"]);
        assert_eq!(ids(&index, &index.range(&key(), 90, 160)), vec!["a", "c", "b"]);
        assert!(index.range(&key(), 500, 400).is_empty());
    }

    #[test]
    fn nearest_walks_outward() {
        let invoices = vec![inv("a", 90), inv("b", 108), inv("c", 100), inv("d", 130), inv("e", 60)];
        let index = InvoiceIndex::build(&invoices, |i| i.amount_minor);
        assert_eq!(ids(&index, &index.nearest(&key(), 100, 50, 150, 3)), vec!["c", "b", "a"]);
        assert_eq!(ids(&index, &index.nearest(&key(), 100, 95, 105, 10)), vec!["c"]);
    }

    #[test]
    fn reduce_moves_or_drops_the_slot() {
        let invoices = vec![inv("a", 100)];
        let mut index = InvoiceIndex::build(&invoices, |i| i.amount_minor);
        index.reduce(0, 40);
        assert!(index.exact(&key(), 100).is_empty());
        assert_eq!(index.exact(&key(), 60), vec![0]);
        index.reduce(0, 60);
        assert!(index.range(&key(), 0, 1_000).is_empty());
    }

    #[test]
    fn held_and_settled_invoices_are_not_indexed() {
        let mut held = inv("h", 100);
        held.on_hold = true;
        let invoices = vec![held, inv("p", 100)];
        let index = InvoiceIndex::build(&invoices, |i| if i.id.as_str() == "p" { 0 } else { 100 });
        assert!(index.is_empty());
    }
}
