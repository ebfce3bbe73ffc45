//! romport: keeps a multi-system ROM library tidy.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use romport_cache::Database;
use romport_catalog::SystemId;
use romport_config::Config;
use romport_library::conflicts::{self, ConflictSource, ConflictSourceHandle, DirectoryRescan};
use romport_library::controller::{HudState, LibraryUpdatesController};
use romport_library::import::{GameImporter, HttpArtworkFetcher, ImportSummary};
use romport_library::queue::ImportQueue;
use romport_library::{Context, scan};
use romport_storage::BackendHandle;
use romport_storage::backend::LocalBackend;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "romport")]
#[command(about = "Import pipeline for a multi-system emulator game library")]
#[command(version)]
struct Cli {
    /// Configuration file, merged over the platform config directory
    #[arg(short, long, global = true, env = "ROMPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the files waiting in the import folder, then exit
    Import,
    /// Watch the import folder until Ctrl-C
    Watch,
    /// List files waiting for a system to be picked
    Conflicts,
    /// Import a conflicted file for the given system
    Resolve {
        /// Path relative to the library root, as listed by `conflicts`
        path: PathBuf,
        system: String,
    },
    /// Delete a conflicted file instead of importing it
    DeleteConflict {
        /// Path relative to the library root, as listed by `conflicts`
        path: PathBuf,
    },
    /// Import ROMs found in the ROM folders that the database does not know
    Rescan,
    /// List the configured systems
    Systems,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "{}", *e);
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    if let Commands::Systems = cli.command {
        for system in &config.systems {
            let extensions: Vec<&str> = system.extensions.iter().map(String::as_str).collect();
            println!("{:<12} {:<28} {}", system.id, system.name, extensions.join(", "));
        }
        return Ok(());
    }

    let root = &config.library.root;
    for (_, folder) in config.library.layout.folders() {
        tokio::fs::create_dir_all(root.join(folder)).await.or_raise(|| ErrorKind::Setup)?;
    }
    let backend: BackendHandle = Arc::new(LocalBackend::new("library", root).or_raise(|| ErrorKind::Setup)?);
    let catalog = Arc::new(config.catalog().or_raise(|| ErrorKind::Config)?);
    let db = Database::connect(config.database_path()).await.or_raise(|| ErrorKind::Database)?;
    let ctx = Context::new(backend, catalog, config.library.layout.clone(), (&db).into())
        .with_options(config.importer.clone());
    let source: ConflictSourceHandle = Arc::new(DirectoryRescan::from_context(&ctx));
    let mut importer = GameImporter::new(ctx.clone(), Arc::new(ImportQueue::new()));
    if config.importer.download_artwork {
        importer = importer.with_fetcher(Arc::new(HttpArtworkFetcher::default()));
    }
    let importer = Arc::new(importer);

    let result = match cli.command {
        Commands::Import => {
            let files = scan::waiting_imports(ctx.backend.as_ref(), &ctx.layout).await.or_raise(|| ErrorKind::Library)?;
            let summary = importer.get_rom_info_for_files(files, None).await.or_raise(|| ErrorKind::Library)?;
            report(&summary);
            Ok(())
        },
        Commands::Watch => watch(Arc::clone(&importer), &config, source).await,
        Commands::Conflicts => {
            for conflict in source.conflicts().await.or_raise(|| ErrorKind::Library)? {
                let candidates: Vec<&str> = conflict.candidates.iter().map(SystemId::as_str).collect();
                println!("{}: {}", conflict.path.display(), candidates.join(", "));
            }
            Ok(())
        },
        Commands::Resolve { path, system } => {
            let solutions = HashMap::from([(path, SystemId::from(system))]);
            let summary = importer.resolve_conflicts(solutions).await.or_raise(|| ErrorKind::Library)?;
            report(&summary);
            Ok(())
        },
        Commands::DeleteConflict { path } => conflicts::delete(&ctx, &path).await.or_raise(|| ErrorKind::Library),
        Commands::Rescan => {
            let summary = importer.import_rom_directories().await.or_raise(|| ErrorKind::Library)?;
            report(&summary);
            Ok(())
        },
        Commands::Systems => Ok(()),
    };
    importer.wait_for_artwork().await;
    db.close().await;
    result
}

async fn watch(importer: Arc<GameImporter>, config: &Config, source: ConflictSourceHandle) -> Result<()> {
    let controller =
        LibraryUpdatesController::start(importer, &config.library.root, &config.watcher, &config.hud, source)
            .await
            .or_raise(|| ErrorKind::Library)?;
    let mut hud = controller.hud_state();
    let mut conflicts = controller.conflicts();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Ok(()) = hud.changed() => match &*hud.borrow_and_update() {
                HudState::Hidden => {},
                HudState::Title(title) => println!("{}", title.replace('\n', " ")),
                HudState::TitleAndProgress(title, progress) => {
                    println!("{} ({:.0}%)", title.replace('\n', " "), progress * 100.0);
                },
            },
            Ok(()) = conflicts.changed() => {
                let current = conflicts.borrow_and_update().clone();
                if !current.is_empty() {
                    println!("{} file(s) need a system, see `romport conflicts`", current.len());
                }
            },
        }
    }
    tracing::info!("shutting down");
    controller.shutdown().await;
    Ok(())
}

fn report(summary: &ImportSummary) {
    for path in &summary.imported {
        println!("imported  {}", path.display());
    }
    for path in &summary.conflicts {
        println!("conflict  {}", path.display());
    }
    for path in &summary.failed {
        println!("failed    {}", path.display());
    }
    if summary.is_empty() {
        println!("nothing to import");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["romport", "import"])]
    #[case(&["romport", "-v", "watch"])]
    #[case(&["romport", "resolve", "Conflicts/game.bin", "genesis"])]
    #[case(&["romport", "delete-conflict", "Conflicts/game.bin", "--config", "/etc/romport.toml"])]
    fn test_parses(#[case] args: &[&str]) {
        assert!(Cli::try_parse_from(args).is_ok());
    }

    #[test]
    fn test_resolve_needs_a_system() {
        assert!(Cli::try_parse_from(["romport", "resolve", "Conflicts/game.bin"]).is_err());
    }
}
