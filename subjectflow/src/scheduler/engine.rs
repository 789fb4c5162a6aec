//! Declared graph to finished run in one call.

use super::{plan, Plan, RunContext, RunReport, Scheduler};
use crate::errors::SubjectflowError;
use crate::expand::{ExpandedGraph, IterableExpander};
use crate::graph::Graph;
use crate::inputs::RunInputs;
use tracing::debug;

/// A declared graph together with the names of its iterated nodes.
///
/// Runs validate, expand over the context's domain and execute.
#[derive(Debug, Clone)]
pub struct Engine {
    graph: Graph,
    iterated: Vec<String>,
    scheduler: Scheduler,
}

impl Engine {
    /// Creates an engine for `graph`.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Graph`] if the graph is invalid.
    pub fn new<S: AsRef<str>>(
        graph: Graph,
        iterated: &[S],
        scheduler: Scheduler,
    ) -> Result<Self, SubjectflowError> {
        graph.validate()?;
        Ok(Self {
            graph,
            iterated: iterated.iter().map(|s| s.as_ref().to_string()).collect(),
            scheduler,
        })
    }

    /// The declared graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Names of the iterated nodes.
    #[must_use]
    pub fn iterated(&self) -> &[String] {
        &self.iterated
    }

    /// Expands the graph over the context's domain.
    ///
    /// # Errors
    ///
    /// Returns [`SubjectflowError::Graph`] for boundary violations.
    pub fn expand(&self, ctx: &RunContext) -> Result<ExpandedGraph, SubjectflowError> {
        let expanded = IterableExpander::expand(&self.graph, ctx.domain(), &self.iterated)?;
        debug!(
            graph = self.graph.name(),
            declared = self.graph.len(),
            expanded = expanded.len(),
            "Expanded graph"
        );
        Ok(expanded)
    }

    /// Expands and runs the graph.
    ///
    /// # Errors
    ///
    /// Returns expansion errors and the run-level errors of
    /// [`Scheduler::run`].
    pub async fn run(
        &self,
        ctx: &RunContext,
        inputs: &RunInputs,
    ) -> Result<RunReport, SubjectflowError> {
        let expanded = self.expand(ctx)?;
        self.scheduler.run(&expanded, ctx, inputs).await
    }

    /// Expands the graph and plans a run without invoking anything.
    ///
    /// # Errors
    ///
    /// Returns expansion errors and the errors of [`plan`].
    pub async fn plan(&self, ctx: &RunContext, inputs: &RunInputs) -> Result<Plan, SubjectflowError> {
        let expanded = self.expand(ctx)?;
        plan(&expanded, inputs, ctx.cache()).await
    }
}
