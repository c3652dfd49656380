mod cli;

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use cli::{CliArgs, Command, USAGE};
use pmobroadcast::{BroadcastConfigExt, BroadcastServerExt, IcyListener, Station};
use pmoconfig::Config;
use pmoserver::{LoggingOptions, ServerBuilder};
use tracing::{error, info, warn};

/// Erreur de démarrage, avec le code de sortie associé
enum Failure {
    Usage(String),
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Self::Fatal(e)
    }
}

impl From<pmobroadcast::Error> for Failure {
    fn from(e: pmobroadcast::Error) -> Self {
        Self::Fatal(e.into())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match cli::parse(std::env::args().skip(1)) {
        Ok(Command::Run(cli)) => cli,
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("pmoradio: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure::Usage(msg)) => {
            eprintln!("pmoradio: {}\n\n{}", msg, USAGE);
            ExitCode::from(2)
        }
        Err(Failure::Fatal(e)) => {
            error!("❌ {:#}", e);
            eprintln!("pmoradio: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliArgs) -> Result<(), Failure> {
    // ========== PHASE 1 : Configuration et logs ==========

    let config = Config::load_config(cli.config_dir.as_deref().unwrap_or(""))
        .context("Cannot load configuration")?;

    let mut builder = ServerBuilder::from_config("PMORadio", &config)?;
    if let Some(port) = cli.port {
        builder = builder.http_port(port);
    }
    if let Some(bind) = cli.bind {
        builder = builder.bind_address(bind);
    }
    let mut server = builder.build();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await;

    info!("📂 Configuration loaded from {}", config.directory());

    // ========== PHASE 2 : Station ==========

    let mut options = config.broadcast_options()?;
    if let Some(playlist) = cli.playlist {
        options.playlist = Some(playlist);
    }
    if let Some(icy_port) = cli.icy_port {
        options.icy_enabled = true;
        options.icy_port = icy_port;
    }
    if options.playlist.is_none() {
        return Err(Failure::Usage(
            "no playlist given (use --playlist or radio.playlist)".to_string(),
        ));
    }

    info!("📻 Starting station {}...", options.name);
    let station = Station::from_options(options).await?;

    server.init_broadcast(station.clone()).await?;
    server
        .add_route("/info", || async {
            serde_json::json!({
                "name": "PMORadio",
                "version": env!("CARGO_PKG_VERSION"),
            })
        })
        .await;

    let icy = if station.options().icy_enabled {
        let ip = server
            .info()
            .bind_address
            .parse()
            .context("Invalid bind address")?;
        let addr = SocketAddr::new(ip, station.options().icy_port);
        match IcyListener::bind(addr, station.clone()).await {
            Ok(listener) => Some(listener),
            Err(e) => {
                station.shutdown().await;
                return Err(e.into());
            }
        }
    } else {
        None
    };

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    let addr = match server.start().await {
        Ok(addr) => addr,
        Err(e) => {
            station.shutdown().await;
            return Err(e.into());
        }
    };

    let shutdown = server.shutdown_token();
    if let Some(icy) = icy {
        tokio::spawn(icy.serve(shutdown.child_token()));
    }

    info!(
        "✅ PMORadio is on air at http://{}{}",
        addr,
        station.options().mount
    );
    info!("Press Ctrl+C to stop...");

    shutdown.cancelled().await;

    // Les flux HTTP restent ouverts tant que les files des auditeurs le sont
    info!("Stopping station...");
    station.shutdown().await;
    server.wait().await;

    let listeners = station.registry().snapshot();
    if listeners.current != 0 {
        warn!(current = listeners.current, "Listeners still registered at exit");
    }
    info!(
        total_served = listeners.total_served,
        peak = listeners.peak,
        "👋 PMORadio stopped"
    );

    Ok(())
}
