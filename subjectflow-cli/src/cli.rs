//! CLI definition and command handling

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use subjectflow::config::{EngineConfig, PipelineDefinition};
use subjectflow::events::LoggingEventSink;
use subjectflow::prelude::{
    ArtifactCache, CancellationToken, Engine, FailurePolicy, Graph, IterableExpander,
    IterationDomain, InvocationContract, InvokerRegistry, RunContext, Scheduler,
};

use crate::exit_codes;

/// Subjectflow - run per-subject processing pipelines
#[derive(Debug, Parser)]
#[command(name = "subjectflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Report format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Report format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

/// Failure policy flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyArg {
    /// Stop dispatching after the first failure
    FailFast,
    /// Keep running units unaffected by failures
    BestEffort,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::FailFast => Self::FailFast,
            PolicyArg::BestEffort => Self::BestEffort,
        }
    }
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a pipeline over a set of subjects
    Run(RunCommand),

    /// Check a pipeline file without running it
    Validate(PipelineArgs),

    /// Print the pipeline graph in Graphviz DOT format
    Graph(GraphCommand),

    /// Show which nodes a run would invoke and which are cached
    Plan(RunCommand),
}

/// The pipeline file
#[derive(Debug, Args)]
pub struct PipelineArgs {
    /// Pipeline definition (JSON)
    #[arg(short, long)]
    pub pipeline: PathBuf,
}

/// Subject selection
#[derive(Debug, Args)]
pub struct SubjectArgs {
    /// Comma separated subject ids, in processing order
    #[arg(short, long, value_delimiter = ',', conflicts_with = "subjects_file")]
    pub subjects: Vec<String>,

    /// File with one subject id per line
    #[arg(long)]
    pub subjects_file: Option<PathBuf>,
}

impl SubjectArgs {
    fn domain(&self) -> anyhow::Result<IterationDomain> {
        let subjects = match &self.subjects_file {
            Some(path) => read_subjects(path)?,
            None => self.subjects.clone(),
        };
        if subjects.is_empty() {
            bail!("no subjects given; use --subjects or --subjects-file");
        }
        Ok(IterationDomain::new(subjects)?)
    }
}

fn read_subjects(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read subjects file {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

/// Engine settings
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Engine configuration (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Concurrent node executions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Failure policy
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Working directory root
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Persistent cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Export directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

impl EngineArgs {
    /// Config file, then environment, then flags.
    fn load(&self) -> anyhow::Result<EngineConfig> {
        let config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("cannot load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        let mut config = config.with_env_overrides()?;

        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(policy) = self.policy {
            config.failure_policy = policy.into();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir.clone_from(dir);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = Some(dir.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Arguments of `run` and `plan`
#[derive(Debug, Args)]
pub struct RunCommand {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[command(flatten)]
    pub subjects: SubjectArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Directory the pipeline's input templates are relative to
    #[arg(short, long, default_value = ".")]
    pub input_dir: PathBuf,
}

/// Arguments of `graph`
#[derive(Debug, Args)]
pub struct GraphCommand {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Render the graph expanded over the given subjects
    #[arg(long)]
    pub expanded: bool,

    #[command(flatten)]
    pub subjects: SubjectArgs,
}

fn load_pipeline(args: &PipelineArgs) -> anyhow::Result<(PipelineDefinition, Graph)> {
    let definition = PipelineDefinition::from_json_file(&args.pipeline)
        .with_context(|| format!("cannot load pipeline {}", args.pipeline.display()))?;
    let graph = definition.build_graph()?;
    Ok((definition, graph))
}

impl Cli {
    /// Execute the CLI command and return the process exit code
    pub async fn execute(self) -> anyhow::Result<u8> {
        match &self.command {
            Commands::Run(cmd) => self.run(cmd).await,
            Commands::Validate(args) => Self::validate(args),
            Commands::Graph(cmd) => Self::graph(cmd),
            Commands::Plan(cmd) => self.plan(cmd).await,
        }
    }

    fn validate(args: &PipelineArgs) -> anyhow::Result<u8> {
        let (definition, graph) = load_pipeline(args)?;
        for task in &definition.tasks {
            if let InvocationContract::Named { invoker } = task.spec.contract() {
                warn!(
                    task = task.spec.name(),
                    invoker = %invoker,
                    "Task needs an invoker the CLI does not provide"
                );
            }
        }
        println!(
            "Pipeline '{}' is valid: {} tasks, {} exports",
            graph.name(),
            graph.len(),
            graph.exports().len()
        );
        Ok(exit_codes::SUCCESS)
    }

    fn graph(cmd: &GraphCommand) -> anyhow::Result<u8> {
        let (definition, graph) = load_pipeline(&cmd.pipeline)?;
        if cmd.expanded {
            let domain = cmd.subjects.domain()?;
            let expanded = IterableExpander::expand(&graph, &domain, &definition.iterated)?;
            print!("{}", expanded.to_dot());
        } else {
            print!("{}", graph.to_dot());
        }
        Ok(exit_codes::SUCCESS)
    }

    fn prepare(
        cmd: &RunCommand,
    ) -> anyhow::Result<(PipelineDefinition, Graph, EngineConfig, IterationDomain)> {
        let (definition, graph) = load_pipeline(&cmd.pipeline)?;
        let config = cmd.engine.load()?;
        let domain = cmd.subjects.domain()?;
        Ok((definition, graph, config, domain))
    }

    async fn plan(&self, cmd: &RunCommand) -> anyhow::Result<u8> {
        let (definition, graph, config, domain) = Self::prepare(cmd)?;
        let inputs = definition.resolve_inputs(&cmd.input_dir, &domain).await?;
        let cache = Arc::new(config.open_cache().await?);
        let ctx = config.context_builder(domain).with_cache(cache).build();

        let engine = Engine::new(
            graph,
            &definition.iterated,
            Scheduler::from_shared(Arc::new(InvokerRegistry::new()), config.output_sink()),
        )?;
        let plan = engine.plan(&ctx, &inputs).await?;
        match self.format {
            OutputFormat::Text => print!("{plan}"),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        }
        Ok(exit_codes::SUCCESS)
    }

    async fn run(&self, cmd: &RunCommand) -> anyhow::Result<u8> {
        let (definition, graph, config, domain) = Self::prepare(cmd)?;
        let inputs = definition.resolve_inputs(&cmd.input_dir, &domain).await?;
        let cache: Arc<ArtifactCache> = Arc::new(config.open_cache().await?);

        let token = Arc::new(CancellationToken::new());
        let on_signal = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; waiting for running nodes to finish");
                on_signal.cancel("interrupted");
            }
        });

        let ctx: RunContext = config
            .context_builder(domain)
            .with_cache(cache)
            .with_cancellation(token)
            .with_events(Arc::new(LoggingEventSink::debug()))
            .build();
        info!(
            run_id = %ctx.run_id(),
            pipeline = %definition.name,
            subjects = ctx.domain().len(),
            workers = config.workers,
            "Running pipeline"
        );

        let engine = Engine::new(
            graph,
            &definition.iterated,
            Scheduler::from_shared(Arc::new(InvokerRegistry::new()), config.output_sink()),
        )?;
        let report = engine.run(&ctx, &inputs).await?;

        match self.format {
            OutputFormat::Text => print!("{report}"),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.summary())?),
        }
        Ok(u8::try_from(report.exit_code()).unwrap_or(exit_codes::RUN_INCOMPLETE))
    }
}
