//! CLI entry point for the face clustering engine.
//!
//! Provides commands for importing embeddings, clustering an event,
//! building its approximate index and matching a query face.

use anyhow::{Context, anyhow};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use facecluster::config::PolicyKind;
use facecluster::io::{ExitCode, OutputFormat, OutputManager};
use facecluster::matching::primary_embedding;
use facecluster::{
    ApproxIndex, ClusterError, ClusteringOutcome, ClusteringRun, EmbeddingSet, EmbeddingStore,
    MatchResolver, Settings, VectorDimension,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Quick start section appended to the help output
fn create_quick_start() -> String {
    use console::style;

    let mut help = String::new();
    help.push_str(&format!("{}\n", style("Quick Start:").cyan().bold()));
    help.push_str("  $ facecluster import faces.json events/42      # Store extractor output\n");
    help.push_str("  $ facecluster cluster events/42                # Write clustered_faces.json\n");
    help.push_str("  $ facecluster index events/42                  # Build the approximate index\n");
    help.push_str("  $ facecluster match events/42 --query me.json  # Find a selfie's cluster\n");
    help
}

/// Face embedding clustering and matching
#[derive(Parser)]
#[command(
    name = "facecluster",
    version = env!("CARGO_PKG_VERSION"),
    about = "Cluster face embeddings per event and match faces against them",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = create_quick_start()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Set up .facecluster directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Convert the extractor's JSON mapping into the embedding artifact
    Import {
        /// JSON file mapping image file names to embeddings
        source: PathBuf,

        /// Event directory or artifact path to merge into
        destination: PathBuf,
    },

    /// Cluster an event's embeddings and write the cluster map
    Cluster {
        /// Event directory or embedding artifact
        path: PathBuf,

        /// Clustering policy: threshold or density
        #[arg(long)]
        policy: Option<PolicyKind>,

        /// Similarity a face must exceed to join a seed
        #[arg(long)]
        threshold: Option<f64>,

        /// Centroid similarity at which clusters merge
        #[arg(long)]
        merge_threshold: Option<f64>,

        /// Skip the centroid merge pass
        #[arg(long)]
        no_merge: bool,

        /// Move faces to the cluster of their most similar face
        #[arg(long)]
        refine: bool,

        /// Smallest cluster the density policy reports
        #[arg(long)]
        min_cluster_size: Option<usize>,

        /// Density policy: do not split clusters below this distance
        #[arg(long)]
        epsilon: Option<f64>,
    },

    /// Build the approximate index for an event
    Index {
        /// Event directory
        event: PathBuf,

        /// Number of inverted lists (overrides config)
        #[arg(long)]
        lists: Option<usize>,
    },

    /// Match a query face against an event
    Match {
        /// Event directory
        event: PathBuf,

        /// Query embedding: an embedding artifact or extractor JSON
        #[arg(short, long)]
        query: PathBuf,

        /// Use the approximate index when it exists and index.enabled is set
        #[arg(long)]
        approx: bool,
    },
}

#[derive(Debug, Serialize)]
struct ImportSummary {
    destination: PathBuf,
    imported: usize,
    dimension: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Imported {} embeddings ({}-d) into {}",
            self.imported,
            self.dimension,
            self.destination.display()
        )
    }
}

#[derive(Debug, Serialize)]
struct IndexSummary {
    path: PathBuf,
    vectors: usize,
    lists: usize,
    nprobe: usize,
}

impl fmt::Display for IndexSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Indexed {} embeddings in {} lists (nprobe {}) at {}",
            self.vectors,
            self.lists,
            self.nprobe,
            self.path.display()
        )
    }
}

fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            std::process::exit(ExitCode::ConfigError.into());
        }
    };

    init_logging(cli.verbose || settings.debug);

    let mut output = OutputManager::new(OutputFormat::from_json_flag(cli.json));
    let code = match run(cli.command, settings, &mut output) {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<ClusterError>() {
            Some(error) => output
                .error(error)
                .unwrap_or_else(|_| ExitCode::from_error(error)),
            None => {
                eprintln!("Error: {e:#}");
                ExitCode::GeneralError
            }
        },
    };
    std::process::exit(code.into());
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("loading {}", path.display()))?,
        None => Settings::load().map_err(|e| anyhow!("{e}"))?,
    };
    settings.validate()?;
    Ok(settings)
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands, mut settings: Settings, output: &mut OutputManager) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Init { force } => {
            let path = Settings::init_config_file(force).map_err(|e| anyhow!("{e}"))?;
            Ok(output.success(format!("Created configuration file at: {}", path.display()))?)
        }

        Commands::Config => {
            let toml_str = toml::to_string_pretty(&settings)?;
            println!("{toml_str}");
            Ok(ExitCode::Success)
        }

        Commands::Import {
            source,
            destination,
        } => {
            let dimension = VectorDimension::new(settings.dimension)?;
            let set = EmbeddingStore::import_json(&source, dimension)?;
            let destination = import_destination(destination, &settings);
            EmbeddingStore::save(&set, &destination)?;
            Ok(output.success(ImportSummary {
                destination,
                imported: set.len(),
                dimension: dimension.get(),
            })?)
        }

        Commands::Cluster {
            path,
            policy,
            threshold,
            merge_threshold,
            no_merge,
            refine,
            min_cluster_size,
            epsilon,
        } => {
            // Override config with CLI args
            let clustering = &mut settings.clustering;
            if let Some(policy) = policy {
                clustering.policy = policy;
            }
            if let Some(threshold) = threshold {
                clustering.threshold = threshold;
            }
            if let Some(merge_threshold) = merge_threshold {
                clustering.merge_threshold = merge_threshold;
            }
            if let Some(size) = min_cluster_size {
                clustering.min_cluster_size = size;
            }
            if let Some(epsilon) = epsilon {
                clustering.cluster_selection_epsilon = epsilon;
            }
            clustering.merge &= !no_merge;
            clustering.refine |= refine;

            let run = ClusteringRun::from_settings(&settings)?;
            output.progress(&format!(
                "Clustering {} with the {} policy",
                path.display(),
                run.policy().name()
            ))?;

            let outcome = run.run(&path)?;
            let code = match &outcome {
                ClusteringOutcome::Clustered { .. } => output.success(&outcome)?,
                ClusteringOutcome::NoClusterData { .. } => {
                    output.no_data(&outcome, "Clustering produced no cluster data")?
                }
            };
            Ok(code)
        }

        Commands::Index { event, lists } => {
            if let Some(lists) = lists {
                settings.index.n_lists = lists;
            }
            let set = EmbeddingStore::load(settings.storage.embeddings_path(&event))?;
            let mut index = ApproxIndex::new(settings.index.clone());
            index.build(&set)?;

            let path = settings.storage.index_path(&event);
            index.save(&path)?;
            Ok(output.success(IndexSummary {
                path,
                vectors: index.len(),
                lists: settings.index.n_lists,
                nprobe: settings.index.nprobe,
            })?)
        }

        Commands::Match {
            event,
            query,
            approx,
        } => {
            settings.index.enabled &= approx;
            let resolver = MatchResolver::open(&event, &settings)?;

            let queries = load_query(&query, VectorDimension::new(settings.dimension)?)?;
            let (query_id, embedding) = primary_embedding(&queries)?;
            if queries.len() > 1 {
                output.progress(&format!(
                    "Query artifact holds {} embeddings, using '{query_id}'",
                    queries.len()
                ))?;
            }

            let outcome = resolver.resolve(embedding)?;
            Ok(output.success(&outcome)?)
        }
    }
}

/// Resolves the `import` destination to an embedding artifact path.
///
/// An existing file or a path with an extension is the artifact itself.
/// Anything else names an event directory, created on save if needed.
fn import_destination(destination: PathBuf, settings: &Settings) -> PathBuf {
    if destination.is_file() || destination.extension().is_some() {
        destination
    } else {
        settings.storage.embeddings_path(&destination)
    }
}

/// Loads a query artifact, JSON from the extractor or a binary artifact.
fn load_query(path: &Path, dimension: VectorDimension) -> Result<EmbeddingSet, ClusterError> {
    if path.extension().is_some_and(|ext| ext == "json") {
        EmbeddingStore::import_json(path, dimension)
    } else {
        EmbeddingStore::load(path)
    }
}
