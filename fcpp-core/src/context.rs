//! `Context`: one device's view of its neighbourhood for the round in
//! progress.
//!
//! Maps each neighbour uid to the most recent `(reception time, export)`
//! pair received from it, always including the device's own uid (read from
//! its own previous export) as in RuFi's `RoundVM::neighbor`/`local_sense`
//! split between self and others. Stale entries are dropped by
//! `retain_window`, called once per round before projection.

use std::collections::BTreeMap;

use crate::export::{AggregateValue, Export};
use crate::field::Field;
use crate::trace::Trace;
use crate::{ProtocolError, Time, Uid};

/// The neighbourhood a device sees while running one round.
#[derive(Debug, Clone)]
pub struct Context {
    self_uid: Uid,
    self_export: Export,
    neighbors: BTreeMap<Uid, (Time, Export)>,
}

impl Context {
    pub fn new(self_uid: Uid, self_export: Export) -> Self {
        Context { self_uid, self_export, neighbors: BTreeMap::new() }
    }

    pub fn self_uid(&self) -> Uid {
        self.self_uid
    }

    /// Replaces the export this context reads the self-default from.
    /// Called once at the start of each round with the device's previous
    /// round's sealed export.
    pub fn set_self_export(&mut self, export: Export) {
        self.self_export = export;
    }

    /// Records or refreshes a neighbour's most recently received export.
    /// A later call for the same uid replaces the earlier one, even if its
    /// reception time is earlier (out-of-order arrival): the newest sample
    /// wins.
    pub fn insert(&mut self, uid: Uid, time: Time, export: Export) {
        self.neighbors.insert(uid, (time, export));
    }

    /// Drops neighbour entries whose reception time is older than
    /// `now.0 - window`. Call once per round before projecting.
    pub fn retain_window(&mut self, now: Time, window: f64) {
        self.neighbors.retain(|_, (time, _)| now.0 - time.0 <= window);
    }

    pub fn neighbor_uids(&self) -> impl Iterator<Item = Uid> + '_ {
        self.neighbors.keys().copied()
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    /// The device's own previous value at `trace`, or `default` if it was
    /// never exported. Used directly by the round engine's `old` primitive,
    /// and indirectly (via `project`/`project_excluding_self`) as the
    /// self/default value for `nbr` and `share`.
    pub fn self_previous<T: AggregateValue>(&self, trace: Trace, default: &T) -> Result<T, ProtocolError> {
        Ok(self.self_export.get::<T>(trace)?.unwrap_or_else(|| default.clone()))
    }

    /// Projects the neighbourhood to a field at `trace`, including the
    /// device's own uid as an override equal to its previous value at
    /// `trace` (or `default` if it has none). Used by `share`.
    pub fn project<T: AggregateValue>(&self, trace: Trace, default: T) -> Result<Field<T>, ProtocolError> {
        let mut field = self.project_excluding_self(trace, default.clone())?;
        let self_value = self.self_previous(trace, &default)?;
        field.set(self.self_uid, self_value);
        Ok(field)
    }

    /// Projects the neighbourhood to a field at `trace`, whose default is
    /// the device's own previous value at `trace` (or `default`) but whose
    /// override table holds only actual neighbours, never the self uid.
    /// Used by `nbr`.
    pub fn project_excluding_self<T: AggregateValue>(&self, trace: Trace, default: T) -> Result<Field<T>, ProtocolError> {
        let local_default = self.self_previous(trace, &default)?;
        let mut field = Field::constant(local_default);
        for (&uid, (_, export)) in &self.neighbors {
            if uid == self.self_uid {
                continue;
            }
            if let Some(value) = export.get::<T>(trace)? {
                field.set(uid, value);
            }
        }
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportBuilder;

    fn export_with(trace: Trace, value: i64) -> Export {
        let mut b = ExportBuilder::new();
        b.put(trace, value);
        b.seal()
    }

    #[test]
    fn project_always_includes_self() {
        let mut ctx = Context::new(1, export_with(10, 7));
        ctx.insert(2, Time(0.0), export_with(10, 20));
        let field = ctx.project::<i64>(10, 0).unwrap();
        assert_eq!(field.at(1), 7);
        assert_eq!(field.at(2), 20);
    }

    #[test]
    fn project_excluding_self_has_no_self_override() {
        let ctx = Context::new(1, export_with(10, 7));
        let field = ctx.project_excluding_self::<i64>(10, 0).unwrap();
        assert_eq!(field.at(1), 7, "default still reflects self's previous value");
        assert!(!field.overrides().contains_key(&1), "self must not appear as an explicit override");
    }

    #[test]
    fn missing_trace_falls_back_to_default() {
        let ctx = Context::new(1, Export::empty());
        let field = ctx.project::<i64>(99, 5).unwrap();
        assert_eq!(field.at(1), 5);
    }

    #[test]
    fn retain_window_evicts_stale_neighbors() {
        let mut ctx = Context::new(1, Export::empty());
        ctx.insert(2, Time(0.0), Export::empty());
        ctx.insert(3, Time(9.0), Export::empty());
        ctx.retain_window(Time(10.0), 5.0);
        let remaining: Vec<Uid> = ctx.neighbor_uids().collect();
        assert_eq!(remaining, vec![3]);
    }

    #[test]
    fn newest_sample_replaces_older_for_same_uid() {
        let mut ctx = Context::new(1, Export::empty());
        ctx.insert(2, Time(0.0), export_with(1, 100));
        ctx.insert(2, Time(1.0), export_with(1, 200));
        let field = ctx.project_excluding_self::<i64>(1, 0).unwrap();
        assert_eq!(field.at(2), 200);
    }
}
