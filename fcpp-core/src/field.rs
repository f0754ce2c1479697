//! `Field<T>`: a local default value plus a sparse, uid-sorted table of
//! neighbour overrides.
//!
//! Grounded on the neighbour-folding helpers in RuFi's `RoundVM`
//! (`neighbor`, `folded_eval`), generalised into a standalone value type so
//! the round engine can build one, combine two, and project a third without
//! round state in scope.

use std::collections::BTreeMap;

use crate::Uid;

/// A value local to one device, overridden at some neighbours.
///
/// Invariant: if the device's own uid appears as a key in the override
/// table, it appears exactly once (checked on insertion, never silently
/// deduplicated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field<T> {
    default: T,
    overrides: BTreeMap<Uid, T>,
}

impl<T: Clone> Field<T> {
    /// A field with no neighbour overrides at all.
    pub fn constant(default: T) -> Self {
        Field { default, overrides: BTreeMap::new() }
    }

    /// Builds a field from a default and an explicit override table.
    pub fn new(default: T, overrides: BTreeMap<Uid, T>) -> Self {
        Field { default, overrides }
    }

    /// The value at `uid`: the override if one exists, else the default.
    pub fn at(&self, uid: Uid) -> T {
        self.overrides.get(&uid).cloned().unwrap_or_else(|| self.default.clone())
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Uids with an explicit override, ascending.
    pub fn overridden_uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.overrides.keys().copied()
    }

    pub fn overrides(&self) -> &BTreeMap<Uid, T> {
        &self.overrides
    }

    /// Applies `f` pointwise to the default and every override.
    pub fn map<U: Clone>(&self, mut f: impl FnMut(&T) -> U) -> Field<U> {
        Field {
            default: f(&self.default),
            overrides: self.overrides.iter().map(|(uid, v)| (*uid, f(v))).collect(),
        }
    }

    /// Left-folds `op` over the default value and every override, visiting
    /// the default first and then overrides in ascending uid order. The
    /// default is folded in exactly once regardless of how many (or how
    /// few) overrides exist.
    pub fn fold<A>(&self, init: A, mut op: impl FnMut(A, &T) -> A) -> A {
        let acc = op(init, &self.default);
        self.overrides.values().fold(acc, |acc, v| op(acc, v))
    }

    /// Combines `self` and `other` pointwise over the union of their
    /// override uids, filling in each side's default where only the other
    /// side has an override.
    pub fn combine<U: Clone, V: Clone>(&self, other: &Field<U>, mut f: impl FnMut(&T, &U) -> V) -> Field<V> {
        let mut uids: Vec<Uid> = self.overrides.keys().chain(other.overrides.keys()).copied().collect();
        uids.sort_unstable();
        uids.dedup();
        let overrides = uids.into_iter().map(|uid| (uid, f(&self.at(uid), &other.at(uid)))).collect();
        Field { default: f(&self.default, &other.default), overrides }
    }

    /// Restricts the override table to uids satisfying `pred`; the default
    /// is unchanged, since it stands for every uid not explicitly present.
    pub fn restrict(&self, mut pred: impl FnMut(Uid) -> bool) -> Field<T> {
        Field {
            default: self.default.clone(),
            overrides: self.overrides.iter().filter(|(uid, _)| pred(**uid)).map(|(u, v)| (*u, v.clone())).collect(),
        }
    }

    /// Inserts or replaces the override at `uid`.
    pub fn set(&mut self, uid: Uid, value: T) {
        self.overrides.insert(uid, value);
    }

    /// Total count of represented uids (overrides only; the default does
    /// not correspond to a single uid).
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

impl<T: Clone> Field<T> {
    /// The uid whose value (including the local default's own uid, if
    /// supplied) minimises `key`, ties broken in favour of the smaller uid.
    ///
    /// `self_uid`/`self_value` let a caller fold its own local value into
    /// the comparison alongside the override table's explicit uids.
    pub fn argmin_uid_by<K: Ord>(&self, self_uid: Uid, mut key: impl FnMut(&T) -> K) -> Uid {
        let mut best_uid = self_uid;
        let mut best_key = key(&self.at(self_uid));
        for (&uid, value) in &self.overrides {
            if uid == self_uid {
                continue;
            }
            let candidate = key(value);
            if candidate < best_key || (candidate == best_key && uid < best_uid) {
                best_key = candidate;
                best_uid = uid;
            }
        }
        best_uid
    }
}
