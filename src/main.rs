/*!
 * Exodus CLI
 *
 * Thin orchestration over the library's composable entry points:
 * `run` drives preflight → provisioning → transfer → verify with
 * rollback on fatal failure; `verify`, `status`, and `cleanup` expose
 * the remaining operational surfaces.
 */

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use exodus::error::{ExodusError, Result, EXIT_SUCCESS};
use exodus::events::{read_events, Event};
use exodus::kv::KvStore;
use exodus::recovery::{ABANDONED_NAMESPACE, RECOVERY_NAMESPACE};
use exodus::store::{LocalStore, ObjectStore};
use exodus::{logging, MigrationConfig, MigrationPipeline, StatePaths};

#[derive(Parser)]
#[command(name = "exodus")]
#[command(version, about = "Bucket-to-bucket storage migration with preflight checks, resumable transfers, and crash-safe rollback", long_about = None)]
struct Cli {
    /// Migration configuration document (JSON)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: PathBuf,

    /// Source bucket: a local directory root or s3://bucket
    #[arg(short = 's', long = "source", value_name = "URI")]
    source: String,

    /// Target bucket: a local directory root or s3://bucket
    #[arg(short = 't', long = "target", value_name = "URI")]
    target: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full migration pipeline
    Run,

    /// Verify a finished migration without transferring anything
    Verify,

    /// Summarize run progress, metrics, and the recovery queue
    Status,

    /// Remove transient provisioning markers and prune old backups
    Cleanup,
}

fn open_store(uri: &str, name: &str) -> Result<Arc<dyn ObjectStore>> {
    if let Some(bucket) = uri.strip_prefix("s3://") {
        #[cfg(feature = "s3-native")]
        {
            let options = exodus::store::s3::S3Options {
                bucket: bucket.to_string(),
                ..Default::default()
            };
            return Ok(Arc::new(exodus::store::S3Store::new(options, name)?));
        }
        #[cfg(not(feature = "s3-native"))]
        {
            let _ = bucket;
            return Err(ExodusError::Config(
                "s3:// stores require the s3-native feature".to_string(),
            ));
        }
    }
    Ok(Arc::new(LocalStore::new(uri, name)?))
}

fn phase_spinner(message: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .expect("static template is valid"),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn run_migration(pipeline: &MigrationPipeline) -> Result<()> {
    let spinner = phase_spinner("preflight checks");
    let preflight = pipeline.run_preflight_checks()?;
    spinner.finish_with_message("preflight passed");
    for check in &preflight.checks {
        println!("  {:12} {}", check.name, check.detail);
    }
    if let Some(hour) = preflight.suggested_hour {
        println!("  suggested run window: {:02}:00 UTC", hour);
    }

    let spinner = phase_spinner("provisioning directory structure");
    pipeline.setup_directory_structure()?;
    spinner.finish_with_message("directory structure provisioned");

    let spinner = phase_spinner("transferring objects");
    let transfer = pipeline.process_transfer_queue()?;
    spinner.finish_with_message("transfer complete");
    println!(
        "  {} transferred, {} failed, {} requeued, {} bytes moved",
        transfer.transferred, transfer.failed, transfer.requeued, transfer.bytes_moved
    );

    let spinner = phase_spinner("verifying migration");
    let (verify, recovery) = pipeline.verify_migration()?;
    spinner.finish_with_message("verification complete");
    println!(
        "  {} verified, {} failed of {} objects",
        verify.verified, verify.failed, verify.total
    );
    for warning in &verify.structure_warnings {
        println!("  warning: {}", warning);
    }
    if recovery.recovered + recovery.abandoned > 0 {
        println!(
            "  recovery queue: {} recovered, {} abandoned",
            recovery.recovered, recovery.abandoned
        );
    }

    let counters = pipeline.recovery().counters();
    if !counters.is_empty() {
        println!("errors by kind:");
        for (kind, count) in &counters {
            println!("  {:14} {}", kind.to_string(), count);
        }
    }
    Ok(())
}

fn command_run(pipeline: &MigrationPipeline) -> i32 {
    match run_migration(pipeline) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("migration failed: {}", e);
            if e.is_fatal() || pipeline.cancel_token().is_cancelled() {
                eprintln!("rolling back to preflight snapshot...");
                match pipeline.initiate_rollback() {
                    Ok(report) => eprintln!(
                        "rollback: {} deleted, {} kept, {} missing, {} failures",
                        report.deleted, report.kept, report.missing, report.failures
                    ),
                    Err(rollback_err) => eprintln!("rollback failed: {}", rollback_err),
                }
            }
            e.exit_code()
        }
    }
}

fn command_verify(pipeline: &MigrationPipeline) -> i32 {
    let spinner = phase_spinner("verifying migration");
    match pipeline.verify_migration() {
        Ok((verify, _)) => {
            spinner.finish_with_message("verification complete");
            println!(
                "{} verified, {} failed of {} objects",
                verify.verified, verify.failed, verify.total
            );
            if verify.failed > 0 {
                exodus::error::EXIT_INTEGRITY
            } else {
                EXIT_SUCCESS
            }
        }
        Err(e) => {
            spinner.abandon();
            eprintln!("verification failed: {}", e);
            e.exit_code()
        }
    }
}

fn command_status(config: &MigrationConfig) -> i32 {
    let paths = StatePaths::new(&config.state_dir);

    if let Some(event_log) = &config.event_log {
        match read_events(event_log) {
            Ok(events) => {
                let mut metrics = 0usize;
                let mut bytes = 0u64;
                let mut last_phase = None;
                for event in &events {
                    match event {
                        Event::TransferMetric(m) if m.success => {
                            metrics += 1;
                            bytes += m.size;
                        }
                        Event::Progress { phase, percent } => {
                            last_phase = Some((*phase, *percent));
                        }
                        _ => {}
                    }
                }
                println!("{} events recorded", events.len());
                println!("{} successful transfers, {} bytes", metrics, bytes);
                if let Some((phase, percent)) = last_phase {
                    println!("last progress: {:?} at {:.0}%", phase, percent);
                }
            }
            Err(e) => eprintln!("cannot read event log: {}", e),
        }
    } else {
        println!("no event log configured");
    }

    match KvStore::open(paths.kv_root()) {
        Ok(kv) => {
            let pending = kv.keys(RECOVERY_NAMESPACE).map(|k| k.len()).unwrap_or(0);
            let abandoned = kv.keys(ABANDONED_NAMESPACE).map(|k| k.len()).unwrap_or(0);
            println!(
                "recovery queue: {} pending, {} abandoned",
                pending, abandoned
            );
        }
        Err(e) => eprintln!("cannot open state store: {}", e),
    }
    EXIT_SUCCESS
}

fn command_cleanup(pipeline: &MigrationPipeline, config: &MigrationConfig) -> i32 {
    match pipeline.cleanup() {
        Ok(removed) => {
            println!("{} transient markers removed", removed);
        }
        Err(e) => {
            eprintln!("cleanup failed: {}", e);
            return e.exit_code();
        }
    }

    let paths = StatePaths::new(&config.state_dir);
    match exodus::preflight::backup::prune_backups(
        &paths.backups_dir(),
        config.preflight.backup_retention_days,
    ) {
        Ok(pruned) => println!("{} old backups pruned", pruned),
        Err(e) => eprintln!("backup pruning failed: {}", e),
    }
    EXIT_SUCCESS
}

fn main() {
    let cli = Cli::parse();

    let config = match MigrationConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            exit(e.exit_code());
        }
    };

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("{}", e);
        exit(e.exit_code());
    }

    let code = match build_and_dispatch(&cli, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    };
    exit(code);
}

fn build_and_dispatch(cli: &Cli, config: MigrationConfig) -> Result<i32> {
    if matches!(cli.command, Commands::Status) {
        return Ok(command_status(&config));
    }

    let source = open_store(&cli.source, "source")?;
    let target = open_store(&cli.target, "target")?;

    // A directory-backed target doubles as the mount for the space check
    let target_mount = if cli.target.starts_with("s3://") {
        None
    } else {
        Some(PathBuf::from(&cli.target))
    };

    let mut pipeline = MigrationPipeline::new(config.clone(), source, target)?;
    if let Some(mount) = target_mount {
        pipeline = pipeline.with_target_mount(mount);
    }

    Ok(match cli.command {
        Commands::Run => command_run(&pipeline),
        Commands::Verify => command_verify(&pipeline),
        Commands::Cleanup => command_cleanup(&pipeline, &config),
        Commands::Status => unreachable!("handled above"),
    })
}
