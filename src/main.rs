// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `modbusd`: runs the configured TCP and RTU servers against one shared
//! datastore until interrupted, auto-saving a snapshot on the configured
//! interval and on shutdown.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::broadcast;

use modbusd::config::Config;
use modbusd::datastore::{snapshot::Snapshot, Datastore, SlaveSizes};
use modbusd::engine::Engine;
use modbusd::error::{Error, Result};
use modbusd::logging;
use modbusd::notify::Notifier;
use modbusd::server;

#[derive(Parser)]
#[command(name = "modbusd", version, about = "Multi-slave Modbus TCP/RTU server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the TCP and/or RTU servers until interrupted.
    Server {
        /// Path to a YAML configuration file; defaults are used if absent.
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Server { config } => run(config).await,
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = if config_path.exists() { Config::load(&config_path)? } else { Config::default() };
    logging::init(&config.logging)?;
    info!("starting modbusd");

    let history_size = if config.data.history_enabled { config.data.history_max_size } else { 0 };
    let datastore = Arc::new(Datastore::new(history_size));
    for slave in &config.slaves {
        datastore.initialize_slave(
            slave.id,
            SlaveSizes {
                coils: slave.coils,
                discrete_inputs: slave.discrete_inputs,
                holding_registers: slave.holding_registers,
                input_registers: slave.input_registers,
            },
        );
    }

    if config.data.auto_save {
        restore_snapshot(&datastore, &config.data.data_file);
    }

    let engine = Arc::new(Engine::new(datastore.clone(), Notifier::new(64)));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    if config.server.tcp.enabled {
        let addr: SocketAddr = format!("{}:{}", config.server.tcp.host, config.server.tcp.port)
            .parse()
            .map_err(|err| Error::Config(format!("invalid TCP bind address: {err}")))?;
        // Bind synchronously so a failure here (e.g. the port is already in
        // use) is a fatal startup error rather than a log line from inside a
        // spawned task whose result nobody inspects.
        let server = server::tcp::Server::bind(addr)?;
        let engine = engine.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            server
                .serve_until(engine, async {
                    let _ = shutdown.recv().await;
                })
                .await;
        }));
        info!("TCP server enabled on {addr}");
    }

    if config.server.rtu.enabled {
        let rtu_cfg = config.server.rtu.clone();
        // An invalid bytesize/parity/stopbits value is malformed
        // configuration, fatal regardless of whether TCP is enabled.
        let (data_bits, parity, stop_bits) =
            match (rtu_cfg.data_bits(), rtu_cfg.parity(), rtu_cfg.stop_bits()) {
                (Ok(d), Ok(p), Ok(s)) => (d, p, s),
                (d, p, s) => return Err(d.err().or(p.err()).or(s.err()).unwrap()),
            };

        match server::rtu::Server::new_from_path(&rtu_cfg.port, rtu_cfg.baudrate, data_bits, parity, stop_bits) {
            Ok(server) => {
                let engine = engine.clone();
                let mut shutdown = shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    server
                        .serve_until(engine, async {
                            let _ = shutdown.recv().await;
                        })
                        .await;
                }));
                info!("RTU server enabled on {}", rtu_cfg.port);
            }
            // A failed serial-port open is only fatal when RTU is the sole
            // enabled transport; with TCP also enabled, the server carries on
            // TCP-only.
            Err(err) if !config.server.tcp.enabled => {
                return Err(Error::Io(err));
            }
            Err(err) => error!("failed to open RTU serial port {}: {err}", rtu_cfg.port),
        }
    }

    if config.data.auto_save {
        let datastore = datastore.clone();
        let data_file = config.data.data_file.clone();
        let interval = Duration::from_secs(config.data.save_interval.max(1));
        let mut shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            auto_save_loop(datastore, data_file, interval, &mut shutdown).await;
        }));
    }

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for task in tasks {
        let _ = task.await;
    }

    if config.data.auto_save {
        save_snapshot(&datastore, &config.data.data_file);
    }
    Ok(())
}

fn restore_snapshot(datastore: &Datastore, data_file: &str) {
    match std::fs::read_to_string(data_file) {
        Ok(data) => match Snapshot::from_json(&data) {
            Ok(snapshot) => {
                datastore.restore(&snapshot);
                info!("restored datastore snapshot from {data_file}");
            }
            Err(err) => warn!("ignoring unparsable snapshot {data_file}: {err}"),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("could not read snapshot {data_file}: {err}"),
    }
}

fn save_snapshot(datastore: &Datastore, data_file: &str) {
    let snapshot = datastore.snapshot();
    match snapshot.to_json() {
        Ok(json) => {
            if let Err(err) = std::fs::write(data_file, json) {
                error!("failed to write snapshot to {data_file}: {err}");
            }
        }
        Err(err) => error!("failed to serialize snapshot: {err}"),
    }
}

async fn auto_save_loop(
    datastore: Arc<Datastore>,
    data_file: String,
    interval: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if datastore.take_modified() {
                    save_snapshot(&datastore, &data_file);
                }
            }
            _ = shutdown.recv() => return,
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
