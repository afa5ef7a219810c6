//! tilecache - a metatiling map tile cache.
//!
//! This binary loads the configuration file, then either serves tiles over
//! HTTP or seeds a tileset.

use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tilecache::{
    config::{Cli, Command, SeedConfig, ServeConfig},
    registry::Registry,
    seed::SeedSession,
    server::{create_router, RouterConfig},
};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config),
        Command::Seed(config) => run_seed(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    // Sources hold blocking HTTP clients, so the registry is built, and
    // finally dropped, outside the async runtime.
    let registry = match Registry::load(&config.config) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("tilecache v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config.config.display());
    for name in registry.tileset_names() {
        info!("  Tileset: {}", name);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let router = create_router(Arc::clone(&registry), build_router_config(&config));
    let addr = config.bind_address();
    let code = runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                return ExitCode::FAILURE;
            }
        };

        info!("Server listening on: http://{}", addr);
        info!("  curl http://{}/health", addr);
        info!("  curl http://{}/tilesets", addr);

        let shutdown = async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
            }
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Server error: {}", e);
            return ExitCode::FAILURE;
        }
        ExitCode::SUCCESS
    });

    drop(runtime);
    drop(registry);
    code
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tilecache=debug,tower_http=debug"
    } else {
        "tilecache=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);
    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    router_config
}

// =============================================================================
// Seed Command
// =============================================================================

fn run_seed(config: SeedConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let registry = match Registry::load(&config.config) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let tileset = match registry.tileset(&config.tileset) {
        Ok(tileset) => Arc::clone(tileset),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let grid = match &config.grid {
        Some(grid) => grid.clone(),
        None => match tileset.grid_links().first() {
            Some(link) => link.grid().name().to_string(),
            None => {
                error!("Tileset {} has no grid", tileset.name());
                return ExitCode::FAILURE;
            }
        },
    };

    let mut session = match SeedSession::new(tileset, &grid) {
        Ok(session) => session.threads(config.threads).force(config.force),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    // Both were checked by validate()
    if let Ok(Some((min_z, max_z))) = config.zoom_range() {
        session = session.zoom_range(min_z, max_z);
    }
    if let Ok(Some(extent)) = config.parsed_extent() {
        session = session.extent(extent);
    }

    watch_interrupt(session.cancel_flag());
    let report = session.run();

    println!(
        "rendered {} metatiles, skipped {}, failed {} in {:.1}s{}",
        report.rendered,
        report.skipped,
        report.failed,
        report.elapsed.as_secs_f64(),
        if report.cancelled { " (interrupted)" } else { "" }
    );
    if report.failed > 0 || report.cancelled {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Raise `cancel` on Ctrl-C.
fn watch_interrupt(cancel: Arc<AtomicBool>) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot watch for interrupts: {}", e);
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("Interrupted, finishing metatiles in progress");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}
