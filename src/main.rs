//! chart-keeper CLI
//!
//! Entry point for the `chart-keeper` command-line tool.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

use chart_keeper::archive::{ArchiveComparator, ArchiveError};
use chart_keeper::cancel::{CancelToken, EXIT_CODE_CANCELLED};
use chart_keeper::config::{ConfigError, EffectiveConfig, Settings};
use chart_keeper::error::{EXIT_CODE_CONSISTENCY, EXIT_CODE_IO, EXIT_CODE_VALIDATION};
use chart_keeper::images::{collect_images, DenyList, DiscoveryError, ImageDiscovery, SyncManifest};
use chart_keeper::index::{IndexError, IndexGenerator, RepositoryIndex};
use chart_keeper::logging::{self, Profile};
use chart_keeper::pool::WorkerPool;
use chart_keeper::release::{
    ChartPackager, DriftChecker, FilePackage, ReleaseError, ReleaseGate, ReleasePipeline,
};
use chart_keeper::repo::{Filesystem, GitCli, HttpArchiveFetcher, LocalFilesystem, TgzChartLoader};
use chart_keeper::sync::{
    jobs_from_manifests, EnvCredentials, HttpRegistryClient, RegistryHosts, RegistrySynchronizer,
    RetryPolicy, SyncError, SyncOutcome,
};
use chart_keeper::BatchError;
use keeper_oci::RegistryError;

#[derive(Parser)]
#[command(name = "chart-keeper")]
#[command(about = "Never-overwrite publishing of Helm charts and their images", version)]
struct Cli {
    /// Chart repository root
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Config file (default: <repo>/.chart-keeper.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Concurrent jobs (overrides release.workers)
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Human)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two chart archives by content
    Compare {
        /// Local archive
        left: PathBuf,

        /// Archive to compare against (default: the upstream release of the same name)
        right: Option<PathBuf>,

        /// Upstream chart repository URL (overrides release.upstream_url)
        #[arg(long)]
        upstream: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Regenerate index.yaml from the packaged assets
    Index {
        /// Report pending changes without writing
        #[arg(long)]
        check: bool,
    },

    /// Release packaged charts into the asset store, update the index and commit
    Release {
        /// Directory of `helm package` output
        #[arg(long)]
        packages: PathBuf,
    },

    /// Find chart images and rewrite the sync manifests
    ScanImages {
        /// Print the partition without writing manifests
        #[arg(long)]
        dry_run: bool,
    },

    /// Copy the images listed in the sync manifests to the prime registry
    Sync {
        /// List the jobs without copying
        #[arg(long)]
        dry_run: bool,
    },

    /// Print versions in release order, newest first
    SortVersions {
        #[arg(required = true)]
        versions: Vec<String>,
    },

    /// Print the effective configuration with its sources
    Config,
}

/// Failures surfaced to the user, grouped by exit code
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("{0}")]
    Sync(BatchError<SyncError>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        CliError::Io {
            context: context.to_string(),
            source,
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Usage(_) => EXIT_CODE_VALIDATION,
            CliError::Index(e) if e.is_consistency_violation() => EXIT_CODE_CONSISTENCY,
            CliError::Index(e) if e.is_validation() => EXIT_CODE_VALIDATION,
            CliError::Release(e) if e.is_consistency_violation() => EXIT_CODE_CONSISTENCY,
            CliError::Release(ReleaseError::Cancelled) | CliError::Discovery(DiscoveryError::Cancelled) => {
                EXIT_CODE_CANCELLED
            }
            CliError::Discovery(DiscoveryError::DenyPattern { .. }) => EXIT_CODE_VALIDATION,
            CliError::Sync(batch) if batch.failures().iter().any(|(_, e)| e.is_consistency_violation()) => {
                EXIT_CODE_CONSISTENCY
            }
            _ => EXIT_CODE_IO,
        }
    }
}

type CliResult<T> = Result<T, CliError>;

/// Everything a subcommand needs from the environment
struct Context {
    root: PathBuf,
    effective: EffectiveConfig,
    cancel: CancelToken,
}

impl Context {
    fn fs(&self) -> LocalFilesystem {
        LocalFilesystem::new(&self.root)
    }

    fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.effective.settings.release.workers, self.cancel.clone())
    }
}

fn main() {
    let cli = Cli::parse();

    logging::init(match cli.log_format {
        LogFormat::Human => Profile::Human,
        LogFormat::Json => Profile::Json,
    });

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_handler() {
        tracing::warn!(error = %e, "cannot install interrupt handler");
    }

    let run_id = ulid::Ulid::new();
    let span = tracing::info_span!("run", id = %run_id);
    let _entered = span.enter();

    let code = match execute(cli, cancel.clone()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };

    if cancel.is_cancelled() {
        process::exit(EXIT_CODE_CANCELLED);
    }
    process::exit(code);
}

fn execute(cli: Cli, cancel: CancelToken) -> CliResult<i32> {
    let overrides = cli.workers.map(|w| json!({ "release": { "workers": w } }));
    let effective = load_config(&cli.repo, cli.config.as_deref(), overrides)?;
    let ctx = Context {
        root: cli.repo.clone(),
        effective,
        cancel,
    };

    match cli.command {
        Commands::Compare {
            left,
            right,
            upstream,
            json,
        } => run_compare(&ctx, &left, right.as_deref(), upstream, json),
        Commands::Index { check } => run_index(&ctx, check),
        Commands::Release { packages } => run_release(&ctx, &packages),
        Commands::ScanImages { dry_run } => run_scan_images(&ctx, dry_run),
        Commands::Sync { dry_run } => run_sync(&ctx, dry_run),
        Commands::Config => run_config(&ctx),
        Commands::SortVersions { versions } => Ok(run_sort_versions(&ctx.effective.settings, &versions)),
    }
}

fn load_config(root: &Path, explicit: Option<&Path>, overrides: Option<Value>) -> CliResult<EffectiveConfig> {
    let effective = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::Usage(format!("config file not found: {}", path.display())));
            }
            EffectiveConfig::build(Some(path), overrides)?
        }
        None => EffectiveConfig::for_repository(root, overrides)?,
    };
    for source in &effective.sources {
        tracing::debug!(source = ?source.origin, path = ?source.path, "config layer");
    }
    Ok(effective)
}

fn run_sort_versions(settings: &Settings, versions: &[String]) -> i32 {
    for version in settings.ordering().sorted(versions) {
        println!("{}", version);
    }
    0
}

fn run_config(ctx: &Context) -> CliResult<i32> {
    let out = ctx
        .effective
        .to_json()
        .map_err(|e| CliError::Usage(format!("cannot render config: {}", e)))?;
    println!("{}", out);
    Ok(0)
}

fn run_compare(
    ctx: &Context,
    left: &Path,
    right: Option<&Path>,
    upstream: Option<String>,
    json: bool,
) -> CliResult<i32> {
    let report = match right {
        Some(right) => {
            let l = fs::File::open(left).map_err(|e| CliError::io(left.display(), e))?;
            let r = fs::File::open(right).map_err(|e| CliError::io(right.display(), e))?;
            ArchiveComparator::new().compare(l, r)?
        }
        None => {
            let base = upstream
                .or_else(|| ctx.effective.settings.release.upstream_url.clone())
                .ok_or_else(|| {
                    CliError::Usage("no archive to compare against: pass RIGHT or --upstream".to_string())
                })?;
            let fetcher = HttpArchiveFetcher::new(&base, ctx.effective.settings.registries.timeout())
                .map_err(ReleaseError::from)?;
            let local = fs::read(left).map_err(|e| CliError::io(left.display(), e))?;
            let name = left
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| CliError::Usage(format!("not a file: {}", left.display())))?;
            match DriftChecker::new(&fetcher).check(&name, &local)? {
                Some(report) => report,
                None => {
                    println!("{} is not released upstream", name);
                    return Ok(0);
                }
            }
        }
    };

    if json {
        let out = json!({
            "equal": report.is_equal(),
            "discrepancies": report.lines(),
        });
        println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
    } else {
        println!("{}", report);
    }
    Ok(if report.is_equal() { 0 } else { 1 })
}

fn run_index(ctx: &Context, check: bool) -> CliResult<i32> {
    let fs = ctx.fs();
    let paths = &ctx.effective.settings.paths;
    let reconciler = ctx.effective.settings.reconciler();
    let generated = IndexGenerator::new(&fs, &TgzChartLoader).generate(&paths.assets_dir, Utc::now())?;

    if check {
        let stored = RepositoryIndex::read(&fs, &paths.index_file)?.unwrap_or_else(|| RepositoryIndex::new(Utc::now()));
        let reconciliation = reconciler.reconcile(&stored, &generated)?;
        println!("{}", reconciliation.changes);
        return Ok(if reconciliation.up_to_date { 0 } else { 1 });
    }

    let update = reconciler.update_file(&fs, &paths.index_file, &generated)?;
    println!("{}", update);
    Ok(0)
}

fn run_release(ctx: &Context, packages_dir: &Path) -> CliResult<i32> {
    let fs = ctx.fs();
    let loader = TgzChartLoader;
    let packages = LocalFilesystem::new(packages_dir);
    let files = packages
        .walk(Path::new("."))
        .map_err(|e| CliError::io(packages_dir.display(), e))?;

    let mut packagers: Vec<Box<dyn ChartPackager>> = Vec::new();
    for rel in files.iter().filter(|p| p.extension().is_some_and(|e| e == "tgz")) {
        let path = packages_dir.join(rel);
        let package = FilePackage::open(&path, &loader)
            .map_err(|e| CliError::Usage(format!("cannot read package: {}", e)))?;
        packagers.push(Box::new(package));
    }
    if packagers.is_empty() {
        println!("no packages in {}", packages_dir.display());
        return Ok(0);
    }

    let paths = &ctx.effective.settings.paths;
    let release = &ctx.effective.settings.release;
    let reconciler = ctx.effective.settings.reconciler();
    let git = GitCli::new(&ctx.root);
    let gate = ReleaseGate::new(&fs, &paths.assets_dir)
        .with_branch_line(release.branch_line)
        .with_republish(&release.republish);
    let pipeline = ReleasePipeline::new(
        &fs,
        &loader,
        &git,
        gate,
        &reconciler,
        &paths.assets_dir,
        &paths.index_file,
    );

    let report = pipeline.run(&ctx.pool(), packagers)?;
    for outcome in &report.outcomes {
        println!("{} {}: {}", outcome.chart, outcome.version, outcome.decision);
    }
    println!("{}", report.index);
    if report.committed {
        println!("committed");
    }
    Ok(0)
}

fn run_scan_images(ctx: &Context, dry_run: bool) -> CliResult<i32> {
    let fs = ctx.fs();
    let settings = &ctx.effective.settings;
    let deny = DenyList::new(&settings.images.deny_list)?;
    let wanted = collect_images(
        &fs,
        &TgzChartLoader,
        &settings.paths.assets_dir,
        &settings.images.repository_prefixes,
    )?;

    let client = http_client(settings)?;
    let discovery = ImageDiscovery::new(
        &client,
        RegistryHosts::from(&settings.registries),
        deny,
        RetryPolicy::from(&settings.registries),
    );
    let partition = discovery.partition(&ctx.pool(), &wanted)?;

    for (label, manifest) in [
        ("docker -> prime", &partition.docker_to_prime),
        ("staging -> prime", &partition.staging_to_prime),
        ("missing", &partition.missing),
        ("denied", &partition.denied),
    ] {
        for (repository, tag) in manifest.iter() {
            println!("{:<17} {}:{}", label, repository, tag);
        }
    }

    if !dry_run {
        partition.write_manifests(&fs, &settings.paths.docker_manifest, &settings.paths.staging_manifest)?;
    }
    Ok(if partition.missing.is_empty() { 0 } else { 1 })
}

fn run_sync(ctx: &Context, dry_run: bool) -> CliResult<i32> {
    let fs = ctx.fs();
    let settings = &ctx.effective.settings;
    let staging = SyncManifest::load(&fs, &settings.paths.staging_manifest)?;
    let docker = SyncManifest::load(&fs, &settings.paths.docker_manifest)?;
    let jobs = jobs_from_manifests(&staging, &docker, &RegistryHosts::from(&settings.registries));

    if jobs.is_empty() {
        println!("nothing to sync");
        return Ok(0);
    }
    if dry_run {
        for job in &jobs {
            println!("{}", job);
        }
        return Ok(0);
    }

    let synchronizer = RegistrySynchronizer::new(http_client(settings)?, RetryPolicy::from(&settings.registries));
    let done = synchronizer.sync_all(&ctx.pool(), jobs).map_err(CliError::Sync)?;
    for (job, outcome) in &done {
        match outcome {
            SyncOutcome::NotFoundAtSource => println!("{}: not found at source", job),
            SyncOutcome::AlreadyAtDestination => println!("{}: already at destination", job),
            SyncOutcome::Copied { pushed, skipped } => {
                println!("{}: copied {} artifact(s), {} already present", job, pushed.len(), skipped.len())
            }
        }
    }
    Ok(0)
}

fn http_client(settings: &Settings) -> CliResult<HttpRegistryClient> {
    let credentials = EnvCredentials::from(&settings.registries);
    Ok(HttpRegistryClient::new(
        settings.registries.timeout(),
        Box::new(credentials),
    )?)
}
