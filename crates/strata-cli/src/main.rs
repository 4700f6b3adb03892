use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use strata_core::config::{Config, DEFAULT_SEARCH_LIMIT};
use strata_core::ingest::{GitAcquirer, LocalSource, RepositorySource};
use strata_core::knowledge::{
    create_embedder, EmbeddingGenerator, GraphDb, IndexStats, OntologyRepair, VerificationReport,
};
use strata_core::{ClearScope, IngestRequest, Ingestor, KnowledgeGraph, KnowledgeStore, Stage};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Ingest code repositories into a searchable knowledge graph", long_about = None)]
struct Cli {
    /// Config file (defaults to ./strata.toml, then ~/.config/strata/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RepoArgs {
    /// Repository URL (or directory path with --local)
    url: String,

    /// Branch; defaults to the known or remote default branch
    #[arg(short, long)]
    branch: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a repository
    Ingest {
        #[command(flatten)]
        repo: RepoArgs,

        /// Description stored on the repository
        #[arg(short, long)]
        description: Option<String>,

        /// Reprocess every file even when the commit is unchanged
        #[arg(short, long)]
        force: bool,

        /// Treat the URL as a plain directory instead of a git remote
        #[arg(long)]
        local: bool,

        /// Detect services from code directories and deployment manifests;
        /// stays on for later runs
        #[arg(long)]
        services: bool,
    },
    /// Show the status of a repository or job
    Status {
        /// Repository URL
        #[arg(required_unless_present = "job")]
        url: Option<String>,

        #[arg(short, long)]
        branch: Option<String>,

        /// Job id returned by ingest
        #[arg(long, conflicts_with = "url")]
        job: Option<String>,
    },
    /// Report containment health of a repository
    Verify {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Reattach misplaced chunks and restore containment edges
    Repair {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// Remove a repository, its vectors, or some of its files
    Clear {
        #[command(flatten)]
        repo: RepoArgs,

        /// Drop vectors only
        #[arg(long, conflicts_with = "path")]
        embeddings: bool,

        /// Drop these files' subtrees
        #[arg(long)]
        path: Vec<String>,
    },
    /// Semantic search over a repository's chunks
    Search {
        #[command(flatten)]
        repo: RepoArgs,

        /// Natural-language query
        #[arg(required = true)]
        query: Vec<String>,

        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// List functions declared in a file
    Functions {
        #[command(flatten)]
        repo: RepoArgs,

        /// Repository-relative file path
        file: String,
    },
    /// List classes inheriting from a class or interface
    Subclasses {
        #[command(flatten)]
        repo: RepoArgs,

        /// Base class or interface name
        class: String,
    },
    /// List services detected in a repository
    Services {
        #[command(flatten)]
        repo: RepoArgs,
    },
    /// List ingested repositories
    Repos,
    /// Show graph statistics
    Stats {
        /// Limit to one repository
        url: Option<String>,

        #[arg(short, long)]
        branch: Option<String>,
    },
    /// Print the effective configuration
    Config,
    /// Drop all vectors and recreate the index with the configured dimension
    RebuildIndex,
}

/// Store, embedding provider and configuration shared by commands.
struct App {
    config: Config,
    db: Arc<GraphDb>,
    generator: Arc<EmbeddingGenerator>,
}

impl App {
    async fn open(config: Config) -> Result<Self> {
        let db = GraphDb::connect(&config.graph)
            .await
            .wrap_err_with(|| format!("failed to open graph store at {}", config.graph.endpoint))?;
        let embedder = create_embedder(&config.embedding)?;
        let generator = EmbeddingGenerator::new(embedder, &config.embedding);
        debug!(
            endpoint = %config.graph.endpoint,
            model = %generator.model_name(),
            dimensions = generator.dimensions(),
            "Opened graph store"
        );
        Ok(Self {
            config,
            db: Arc::new(db),
            generator: Arc::new(generator),
        })
    }

    fn ingestor(&self, local: bool) -> Arc<Ingestor> {
        let source: Arc<dyn RepositorySource> = if local {
            Arc::new(LocalSource::new(self.config.ingestion.exclude_dirs.clone()))
        } else {
            Arc::new(GitAcquirer::new(
                self.config.ingestion.workspace_path(),
                self.config.ingestion.clone_timeout(),
            ))
        };
        Arc::new(Ingestor::new(
            self.config.ingestion.clone(),
            Arc::clone(&self.db),
            Arc::clone(&self.generator),
            source,
        ))
    }

    fn knowledge(&self) -> KnowledgeGraph {
        KnowledgeGraph::new(Arc::clone(&self.db), Arc::clone(&self.generator))
    }

    /// Repository key for a URL and optional branch.
    async fn repo_key(&self, args: &RepoArgs) -> Result<String> {
        let url = match std::fs::canonicalize(&args.url) {
            Ok(path) if path.is_dir() => path.to_string_lossy().to_string(),
            _ => args.url.clone(),
        };
        let repo = self
            .ingestor(false)
            .resolve_ref(&url, args.branch.as_deref())
            .await?;
        Ok(repo.key())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .wrap_err_with(|| format!("failed to load {}", path.display()))?,
        None => Config::load()?,
    };
    init_tracing(&config.logging.level, cli.verbose);

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let app = App::open(config).await?;
    let json = cli.json;

    match cli.command {
        Commands::Ingest {
            repo,
            description,
            force,
            local,
            services,
        } => {
            let url = if local {
                std::fs::canonicalize(&repo.url)
                    .wrap_err_with(|| format!("{} is not a readable directory", repo.url))?
                    .to_string_lossy()
                    .to_string()
            } else {
                repo.url.clone()
            };
            let mut request = IngestRequest::new(url).force(force).services(services);
            request.branch = repo.branch;
            request.description = description;
            ingest(&app, request, local, cli.verbose).await?;
        }
        Commands::Status { url, branch, job } => {
            let ingestor = app.ingestor(false);
            if let Some(job_id) = job {
                let status = ingestor.status(&job_id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                } else {
                    println!("Job {}", status.job_id);
                    println!("  Repository: {}", status.repository);
                    println!("  Status:     {} ({})", status.status, status.stage);
                    println!("  Progress:   {}%", status.progress_percent);
                    if let Some(error) = &status.error {
                        println!("  Error:      {}", error);
                    }
                }
                return Ok(());
            }
            let url = url.ok_or_else(|| eyre!("a repository URL or --job is required"))?;
            let key = app.repo_key(&RepoArgs { url, branch }).await?;
            let repository = app
                .db
                .get_repository(&key)
                .await?
                .ok_or_else(|| eyre!("repository {} has not been ingested", key))?;
            let latest = ingestor.latest_job(&key).await?;
            if json {
                let value = serde_json::json!({
                    "repository": repository,
                    "job": latest.map(|j| j.to_status()),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", repository.key);
                println!("  Status:       {}", repository.status);
                println!(
                    "  Last commit:  {}",
                    repository.last_indexed_commit.as_deref().unwrap_or("-")
                );
                if let Some(at) = repository.last_indexed_at {
                    println!("  Indexed at:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                if let Some(error) = &repository.error {
                    println!("  Error:        {}", error);
                }
                if let Some(job) = latest {
                    println!(
                        "  Latest job:   {} ({}, {}%)",
                        job.id, job.stage, job.progress_percent
                    );
                }
            }
        }
        Commands::Verify { repo } => {
            let key = app.repo_key(&repo).await?;
            let report = OntologyRepair::new(Arc::clone(&app.db)).verify(&key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_verification(&report);
            }
        }
        Commands::Repair { repo } => {
            let key = app.repo_key(&repo).await?;
            let report = OntologyRepair::new(Arc::clone(&app.db)).repair(&key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.changed() {
                println!("Repaired {}", key);
                println!("  Chunks reattached:       {}", report.reattached_chunks);
                println!("  Fallback edges removed:  {}", report.fallback_edges_removed);
                println!("  Nodes relinked:          {}", report.relinked_nodes);
                println!("  Dangling edges removed:  {}", report.dangling_edges_removed);
                println!("  Fallback edges left:     {}", report.remaining_fallback_edges);
            } else {
                println!("Nothing to repair in {}", key);
            }
        }
        Commands::Clear {
            repo,
            embeddings,
            path,
        } => {
            let key = app.repo_key(&repo).await?;
            let scope = if embeddings {
                ClearScope::Embeddings
            } else if !path.is_empty() {
                ClearScope::Paths(path)
            } else {
                ClearScope::All
            };
            let description = match &scope {
                ClearScope::All => "repository".to_string(),
                ClearScope::Embeddings => "embeddings".to_string(),
                ClearScope::Paths(paths) => format!("{} file(s)", paths.len()),
            };
            app.ingestor(false).clear(&key, scope).await?;
            println!("Cleared {} of {}", description, key);
        }
        Commands::Search { repo, query, limit } => {
            let key = app.repo_key(&repo).await?;
            let query = query.join(" ");
            let hits = app.knowledge().search(&key, &query, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!("{:>2}. {} ({:.3}) {}", i + 1, hit.citation(), hit.score, hit.owner);
                    for line in hit.preview.lines().take(3) {
                        println!("      {}", line);
                    }
                }
            }
        }
        Commands::Functions { repo, file } => {
            let key = app.repo_key(&repo).await?;
            let functions = app.knowledge().functions_in_file(&key, &file).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&functions)?);
            } else if functions.is_empty() {
                println!("No functions in {}", file);
            } else {
                for f in functions {
                    println!("{:>5}-{:<5} {}", f.start_line, f.end_line, f.signature);
                }
            }
        }
        Commands::Subclasses { repo, class } => {
            let key = app.repo_key(&repo).await?;
            let classes = app.knowledge().subclasses_of(&key, &class).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&classes)?);
            } else if classes.is_empty() {
                println!("No classes inherit from {}", class);
            } else {
                for c in classes {
                    println!("{} {} ({}:{})", c.kind, c.name, c.file_path, c.start_line);
                }
            }
        }
        Commands::Services { repo } => {
            let key = app.repo_key(&repo).await?;
            let services = app.knowledge().services(&key).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&services)?);
            } else if services.is_empty() {
                println!("No services detected in {} (ingest with --services)", key);
            } else {
                for s in services {
                    println!(
                        "{:<24} {:<12} {:>5} files  {}",
                        s.name,
                        s.language.as_deref().unwrap_or("-"),
                        s.file_count,
                        s.directory.as_deref().or(s.manifest.as_deref()).unwrap_or("-")
                    );
                    if !s.depends_on.is_empty() {
                        println!("  depends on: {}", s.depends_on.join(", "));
                    }
                }
            }
        }
        Commands::Repos => {
            let repos = app.knowledge().list_repositories().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&repos)?);
            } else if repos.is_empty() {
                println!("No repositories ingested.");
            } else {
                for r in repos {
                    let commit = r
                        .last_indexed_commit
                        .as_deref()
                        .map(|c| c.get(..12).unwrap_or(c))
                        .unwrap_or("-");
                    println!("{:<10} {:<12} {}", r.status, commit, r.key);
                }
            }
        }
        Commands::Stats { url, branch } => {
            let key = match url {
                Some(url) => Some(app.repo_key(&RepoArgs { url, branch }).await?),
                None => None,
            };
            let stats = app.knowledge().stats(key.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::RebuildIndex => {
            app.ingestor(false).rebuild_index().await?;
            println!(
                "Rebuilt vector index with {} dimensions; every chunk is pending re-embedding",
                app.generator.dimensions()
            );
        }
        Commands::Config => {}
    }

    Ok(())
}

/// Submit an ingestion and follow it until it finishes. Ctrl-C cancels.
async fn ingest(app: &App, request: IngestRequest, local: bool, verbose: bool) -> Result<()> {
    let ingestor = app.ingestor(local);
    let job_id = ingestor.submit(request).await?;

    let pb = if verbose {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(100)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")?
            .progress_chars("█▓░"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if !ingestor.cancel(&job_id) {
                    warn!(job = %job_id, "Job is no longer running");
                }
                pb.set_message("cancelling...");
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
        let status = ingestor.status(&job_id).await?;
        pb.set_position(status.progress_percent as u64);
        pb.set_message(match &status.message {
            Some(message) => format!("{}: {}", status.stage, message),
            None => status.stage.to_string(),
        });
        if status.stage.is_terminal() {
            break status;
        }
    };
    pb.finish_and_clear();

    if status.stage == Stage::Failed {
        bail!(
            "ingestion of {} failed: {}",
            status.repository,
            status.error.as_deref().unwrap_or("unknown error")
        );
    }

    if status.skipped {
        println!("{} is already indexed at the latest commit", status.repository);
        return Ok(());
    }
    println!("Ingested {}", status.repository);
    if let Some(message) = &status.message {
        println!("  {}", message);
    }
    let stats = app.knowledge().stats(Some(&status.repository)).await?;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &IndexStats) {
    for (label, count) in &stats.nodes {
        println!("  {:<14} {}", label, count);
    }
    println!("  {:<14} {}", "edges", stats.edges);
    println!("  {:<14} {}", "vectors", stats.vectors);
    if stats.pending_embeddings > 0 || stats.failed_embeddings > 0 {
        println!(
            "  {:<14} {} pending, {} failed",
            "embeddings", stats.pending_embeddings, stats.failed_embeddings
        );
    }
}

fn print_verification(report: &VerificationReport) {
    let verdict = if report.is_healthy() { "healthy" } else { "needs repair" };
    println!("{} ({})", report.repository, verdict);
    for (label, pct) in &report.connected_pct_by_type {
        let total = report.totals.get(label).copied().unwrap_or(0);
        println!("  {:<14} {:>6} nodes, {:>6.2}% connected", label, total, pct);
    }
    println!("  Orphans:            {}", report.orphan_count);
    for key in &report.orphans {
        println!("    {}", key);
    }
    println!("  Fallback edges:     {}", report.fallback_edge_count);
    println!("  Dangling edges:     {}", report.dangling_edge_count);
    println!("  Unresolved imports: {}", report.unresolved_imports);
}

fn init_tracing(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
