//! The round engine: `old`, `nbr`, `share`, and branch-scoped alignment.
//!
//! Grounded on RuFi's `RoundVM` (`local_sense`/`nbr_sense`/`folded_eval`/
//! `nest`): one engine instance lives for exactly one device's one round,
//! wrapping a [`Context`] (read) and an [`ExportBuilder`] (write) behind the
//! current [`TraceStack`] position. A device that never enters a branch
//! writes nothing under that branch's traces, which is what gives branch
//! alignment for free — a non-entering neighbour's projected field simply
//! has no override there, falling back to whatever default the entering
//! devices supplied.

use crate::context::Context;
use crate::export::{AggregateValue, Export, ExportBuilder};
use crate::field::Field;
use crate::trace::TraceStack;
use crate::{Invariant, ProtocolError};

/// Runs exactly one device's one round: reads from a [`Context`], writes
/// into an [`ExportBuilder`], keyed throughout by the current [`TraceStack`]
/// position.
pub struct RoundEngine {
    context: Context,
    export: ExportBuilder,
    trace: TraceStack,
}

impl RoundEngine {
    pub fn new(context: Context) -> Self {
        RoundEngine { context, export: ExportBuilder::new(), trace: TraceStack::new() }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Reads the device's own previous value at the current trace (or
    /// `init` if it has none), applies `update`, and writes the result back
    /// at the current trace as this round's value.
    pub fn old<T: AggregateValue>(&mut self, init: T, update: impl FnOnce(T) -> T) -> Result<T, ProtocolError> {
        let trace = self.trace.current();
        let previous = self.context.self_previous(trace, &init)?;
        let next = update(previous);
        self.export.put(trace, next.clone());
        Ok(next)
    }

    /// Projects the neighbourhood (excluding self) to a field at the current
    /// trace, whose default is the device's own previous value (or `init`),
    /// calls `combine`, and writes its result as this round's value.
    pub fn nbr<T: AggregateValue>(&mut self, init: T, combine: impl FnOnce(Field<T>) -> T) -> Result<T, ProtocolError> {
        let trace = self.trace.current();
        let field = self.context.project_excluding_self(trace, init)?;
        let result = combine(field);
        self.export.put(trace, result.clone());
        Ok(result)
    }

    /// `old` and `nbr` fused: projects the neighbourhood at the current
    /// trace with the device's own uid included as an override equal to its
    /// previous value (or `init`), calls `combine`, and writes its result.
    pub fn share<T: AggregateValue>(&mut self, init: T, combine: impl FnOnce(Field<T>) -> T) -> Result<T, ProtocolError> {
        let trace = self.trace.current();
        let field = self.context.project(trace, init)?;
        let result = combine(field);
        self.export.put(trace, result.clone());
        Ok(result)
    }

    /// Enters a branch tagged `tag` only when `taken`, running `body` under
    /// a freshly pushed trace frame that is popped on every exit path
    /// (`body` returning normally, returning an error, or panicking).
    /// Devices for which `taken` is false run nothing here and so write
    /// nothing under this branch's traces, which is exactly what keeps them
    /// from polluting or consuming branch-local exports.
    pub fn branch<T>(&mut self, tag: u64, taken: bool, body: impl FnOnce(&mut Self) -> T) -> Option<T> {
        if !taken {
            return None;
        }
        self.trace.push(tag);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(self)));
        self.trace.pop();
        match result {
            Ok(value) => Some(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Seals the export built over the course of this round. Fails with
    /// [`Invariant::TraceStackLeaked`] if a `branch` call somehow left the
    /// trace stack non-empty (a push without a matching pop), which means
    /// the engine's own bookkeeping is broken rather than anything the
    /// program being run did wrong.
    pub fn finish(self) -> Result<(Context, Export), Invariant> {
        if !self.trace.is_empty() {
            return Err(Invariant::TraceStackLeaked(self.trace.depth()));
        }
        Ok((self.context, self.export.seal()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportBuilder as Builder;
    use crate::Time;

    fn engine_with_self_export(uid: u32, export: Export) -> RoundEngine {
        RoundEngine::new(Context::new(uid, export))
    }

    #[test]
    fn old_defaults_to_init_on_first_round() {
        let mut engine = engine_with_self_export(1, Export::empty());
        let value = engine.old(0i64, |v| v + 1).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn old_reads_previous_round_value() {
        let mut prev = Builder::new();
        prev.put(0, 5i64);
        let mut engine = engine_with_self_export(1, prev.seal());
        let value = engine.old(0i64, |v| v + 1).unwrap();
        assert_eq!(value, 6);
    }

    #[test]
    fn nbr_combines_across_neighbors_excluding_self_override() {
        let mut engine = engine_with_self_export(1, Export::empty());
        let mut nbr_export = Builder::new();
        nbr_export.put(0, 10i64);
        engine.context_mut().insert(2, Time(0.0), nbr_export.seal());
        let value = engine.nbr(0i64, |field| field.fold(0, |acc, v| acc + v)).unwrap();
        assert_eq!(value, 10, "self default (0) plus neighbour's 10");
        assert!(!engine.context().neighbor_uids().any(|_| false));
    }

    #[test]
    fn share_includes_self_as_explicit_override() {
        let mut prev = Builder::new();
        prev.put(0, 3i64);
        let mut engine = engine_with_self_export(1, prev.seal());
        let value = engine.share(0i64, |field| field.at(1)).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn non_entering_device_writes_nothing_under_branch() {
        let mut engine = engine_with_self_export(1, Export::empty());
        let result = engine.branch(99, false, |e| e.old(0i64, |v| v + 1).unwrap());
        assert_eq!(result, None);
        let (_, export) = engine.finish().unwrap();
        assert!(export.is_empty());
    }

    #[test]
    fn entering_device_writes_under_branch_trace_distinct_from_root() {
        let mut engine = engine_with_self_export(1, Export::empty());
        let root_value = engine.old(0i64, |v| v + 1).unwrap();
        let branch_value = engine.branch(99, true, |e| e.old(0i64, |v| v + 100).unwrap()).unwrap();
        assert_eq!(root_value, 1);
        assert_eq!(branch_value, 100);
        let (_, export) = engine.finish().unwrap();
        assert_eq!(export.len(), 2);
    }
}
