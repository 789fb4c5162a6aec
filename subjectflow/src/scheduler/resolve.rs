//! Resolution of a node's input bindings against upstream results.

use crate::core::{Artifact, ArtifactId};
use crate::errors::JoinIncompleteError;
use crate::expand::{Binding, JoinAggregator, Node, OutputRef};
use crate::invoke::InputValue;
use std::collections::BTreeMap;

/// Why a node's inputs could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InputGap {
    /// A per-unit producer of a join port has no result.
    Join(JoinIncompleteError),
    /// A regular producer has no result.
    Missing(OutputRef),
}

/// Resolves every bound port of `node` through `lookup`, keeping binding order.
pub(crate) fn resolve_bindings<T, F>(
    node: &Node,
    mut lookup: F,
) -> Result<BTreeMap<String, (bool, Vec<T>)>, InputGap>
where
    F: FnMut(&OutputRef) -> Option<T>,
{
    let mut resolved = BTreeMap::new();
    for (port, binding) in node.inputs() {
        let entry = match binding {
            Binding::One(source) => {
                let value = lookup(source).ok_or_else(|| InputGap::Missing(source.clone()))?;
                (false, vec![value])
            }
            Binding::Many(sources) => {
                let values = sources
                    .iter()
                    .map(|s| lookup(s).ok_or_else(|| InputGap::Missing(s.clone())))
                    .collect::<Result<Vec<_>, _>>()?;
                (true, values)
            }
            Binding::Join(join) => {
                let values = JoinAggregator::collect(&node.label(), join, &mut lookup)
                    .map_err(InputGap::Join)?;
                (true, values)
            }
        };
        resolved.insert(port.clone(), entry);
    }
    Ok(resolved)
}

/// Artifact ids per port, for fingerprinting.
pub(crate) fn artifact_ids(
    resolved: &BTreeMap<String, (bool, Vec<Artifact>)>,
) -> BTreeMap<String, Vec<ArtifactId>> {
    resolved
        .iter()
        .map(|(port, (_, artifacts))| {
            (port.clone(), artifacts.iter().map(|a| a.id.clone()).collect())
        })
        .collect()
}

/// Input locations per port, for the invoker.
pub(crate) fn input_values(
    resolved: &BTreeMap<String, (bool, Vec<Artifact>)>,
) -> BTreeMap<String, InputValue> {
    resolved
        .iter()
        .filter_map(|(port, (many, artifacts))| {
            let value = if *many {
                InputValue::Many(artifacts.iter().map(|a| a.location.clone()).collect())
            } else {
                InputValue::One(artifacts.first()?.location.clone())
            };
            Some((port.clone(), value))
        })
        .collect()
}
