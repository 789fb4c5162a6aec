//! Fan-in of per-unit outputs into a single ordered list.

use super::{IterationDomain, OutputRef, UnitId};
use crate::errors::JoinIncompleteError;
use std::collections::HashMap;

/// The per-unit producers of a join port, in domain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinBinding {
    sources: Vec<(UnitId, OutputRef)>,
}

impl JoinBinding {
    /// Producers with their unit, in domain order.
    #[must_use]
    pub fn sources(&self) -> &[(UnitId, OutputRef)] {
        &self.sources
    }

    /// Units in domain order.
    pub fn units(&self) -> impl Iterator<Item = &UnitId> {
        self.sources.iter().map(|(unit, _)| unit)
    }
}

/// Builds and resolves join bindings.
///
/// The order of a join is always the iteration domain's declaration
/// order. Completion order of the producers never affects it.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinAggregator;

impl JoinAggregator {
    /// Orders per-unit producers by the domain.
    ///
    /// # Errors
    ///
    /// Returns [`JoinIncompleteError`] listing every unit of the domain that
    /// has no producer. Producers for units outside the domain are ignored.
    pub fn join<I>(
        join: &str,
        domain: &IterationDomain,
        per_unit: I,
    ) -> Result<JoinBinding, JoinIncompleteError>
    where
        I: IntoIterator<Item = (UnitId, OutputRef)>,
    {
        let mut by_unit: HashMap<UnitId, OutputRef> = per_unit.into_iter().collect();
        let mut sources = Vec::with_capacity(domain.len());
        let mut missing = Vec::new();

        for unit in domain {
            match by_unit.remove(unit) {
                Some(output) => sources.push((unit.clone(), output)),
                None => missing.push(unit.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(JoinBinding { sources })
        } else {
            Err(JoinIncompleteError {
                join: join.to_string(),
                missing_units: missing,
            })
        }
    }

    /// Resolves every producer of a join through `resolve`, preserving order.
    ///
    /// # Errors
    ///
    /// Returns [`JoinIncompleteError`] listing every unit whose producer
    /// could not be resolved.
    pub fn collect<T, F>(
        join: &str,
        binding: &JoinBinding,
        mut resolve: F,
    ) -> Result<Vec<T>, JoinIncompleteError>
    where
        F: FnMut(&OutputRef) -> Option<T>,
    {
        let mut values = Vec::with_capacity(binding.sources.len());
        let mut missing = Vec::new();

        for (unit, source) in &binding.sources {
            match resolve(source) {
                Some(value) => values.push(value),
                None => missing.push(unit.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(values)
        } else {
            Err(JoinIncompleteError {
                join: join.to_string(),
                missing_units: missing,
            })
        }
    }
}
