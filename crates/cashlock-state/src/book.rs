//! Keyed record book: insertion-ordered `Vec` plus a hash index.
//!
//! Serializes as a plain sequence; the index is rebuilt on deserialization.
//! If a persisted document carries two records with the same key, the index
//! points at the first and both stay in `items()` so integrity checks can
//! see them.

use std::collections::HashMap;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use cashlock_core::{BankTransaction, Invoice, InvoiceId, TransactionId};

/// A record with a unique key.
pub trait Keyed {
    /// Key type.
    type Key: Eq + Hash + Clone + std::fmt::Debug;
    /// The record's key.
    fn key(&self) -> &Self::Key;
}

impl Keyed for BankTransaction {
    type Key = TransactionId;
    fn key(&self) -> &TransactionId {
        &self.id
    }
}

impl Keyed for Invoice {
    type Key = InvoiceId;
    fn key(&self) -> &InvoiceId {
        &self.id
    }
}

/// Insertion-ordered records with O(1) lookup by key.
#[derive(Debug, Clone)]
pub struct Book<T: Keyed> {
    items: Vec<T>,
    index: HashMap<T::Key, usize>,
}

impl<T: Keyed> Default for Book<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed> Book<T> {
    /// Build from records, keeping every record.
    pub fn from_items(items: Vec<T>) -> Self {
        let mut index = HashMap::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            index.entry(item.key().clone()).or_insert(i);
        }
        Self { items, index }
    }

    /// Insert a record unless its key is present. Returns whether it was
    /// inserted.
    pub fn insert(&mut self, item: T) -> bool {
        if self.index.contains_key(item.key()) {
            return false;
        }
        self.index.insert(item.key().clone(), self.items.len());
        self.items.push(item);
        true
    }

    /// Insert or replace by key. Returns the replaced record.
    pub fn upsert(&mut self, item: T) -> Option<T> {
        if let Some(&i) = self.index.get(item.key()) {
            return Some(std::mem::replace(&mut self.items[i], item));
        }
        self.insert(item);
        None
    }

    /// Look up by key.
    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.index.get(key).map(|&i| &self.items[i])
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Whether a key is present.
    pub fn contains(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    /// Records in insertion order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the book is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Keyed + PartialEq> PartialEq for Book<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl<T: Keyed + Serialize> Serialize for Book<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.items)
    }
}

impl<'de, T: Keyed + DeserializeOwned> Deserialize<'de> for Book<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(Self::from_items)
    }
}
