//! Iteration units and domains.

use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identifier of one independent unit of work, e.g. a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Creates a unit id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Ordered, duplicate-free set of units a pipeline is replicated over.
///
/// The declaration order is the canonical order of every join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<UnitId>", into = "Vec<UnitId>")]
pub struct IterationDomain {
    units: Vec<UnitId>,
}

impl IterationDomain {
    /// Creates a domain.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EmptyDomain`] or [`GraphError::DuplicateUnit`].
    pub fn new<I, U>(units: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = U>,
        U: Into<UnitId>,
    {
        let units: Vec<UnitId> = units.into_iter().map(Into::into).collect();
        if units.is_empty() {
            return Err(GraphError::EmptyDomain);
        }
        let mut seen = HashSet::with_capacity(units.len());
        for unit in &units {
            if !seen.insert(unit) {
                return Err(GraphError::DuplicateUnit {
                    unit: unit.to_string(),
                });
            }
        }
        Ok(Self { units })
    }

    /// Units in declaration order.
    #[must_use]
    pub fn units(&self) -> &[UnitId] {
        &self.units
    }

    /// Iterates units in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, UnitId> {
        self.units.iter()
    }

    /// Number of units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Always false; a domain has at least one unit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Position of a unit in the canonical order.
    #[must_use]
    pub fn position(&self, unit: &UnitId) -> Option<usize> {
        self.units.iter().position(|u| u == unit)
    }

    /// Returns true if the unit belongs to the domain.
    #[must_use]
    pub fn contains(&self, unit: &UnitId) -> bool {
        self.position(unit).is_some()
    }
}

impl TryFrom<Vec<UnitId>> for IterationDomain {
    type Error = GraphError;

    fn try_from(units: Vec<UnitId>) -> Result<Self, Self::Error> {
        Self::new(units)
    }
}

impl From<IterationDomain> for Vec<UnitId> {
    fn from(domain: IterationDomain) -> Self {
        domain.units
    }
}

impl<'a> IntoIterator for &'a IterationDomain {
    type Item = &'a UnitId;
    type IntoIter = std::slice::Iter<'a, UnitId>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
