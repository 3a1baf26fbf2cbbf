//! ferry: layer-4 TCP load balancer entry point.

mod control;

use std::{io, process, sync::Arc};

use clap::Parser;
use log::{error, info};

use ferry_config::validator::validate as validate_config;
use ferry_edge::InstanceSlot;

#[derive(Parser)]
#[command(version, about = "Layer-4 TCP load balancer", long_about = None)]
struct Cli {
    // Sets a custom config file
    #[arg(short, long, default_value = "./config/config.yaml")]
    config: String,

    // Runs until Ctrl-C instead of reading commands from stdin
    #[arg(long)]
    no_interactive: bool,
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("cannot listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ferry_config::loader::read_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Error loading config: {}", err);
            process::exit(1);
        }
    };

    ferry_utils::logger::init_logger(&config.log.level, config.log.file.as_deref());

    if let Err(err) = validate_config(&config) {
        error!("Configuration validation failed: {}. Exiting...", err);
        process::exit(1);
    }

    let slot = InstanceSlot::new();
    let balancer = match slot.set_instance(&config) {
        Ok(balancer) => balancer,
        Err(err) => {
            error!("Cannot create load balancer: {}", err);
            process::exit(1);
        }
    };

    info!("ferry is starting");
    if let Err(err) = balancer.start_work() {
        error!("Cannot start load balancer: {}", err);
        process::exit(1);
    }

    if cli.no_interactive {
        wait_for_ctrl_c().await;
    } else {
        let console = Arc::clone(&balancer);
        let control = tokio::task::spawn_blocking(move || {
            control::run(&console, io::stdin().lock(), io::stdout())
        });

        tokio::select! {
            finished = control => match finished {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("control loop failed: {}", err),
                Err(err) => error!("control loop panicked: {}", err),
            },
            _ = wait_for_ctrl_c() => {}
        }
    }

    info!("ferry is shutting down");
    let stopping = Arc::clone(&balancer);
    let stopped = tokio::task::spawn_blocking(move || {
        if stopping.is_active() {
            stopping.stop_work()
        } else {
            Ok(())
        }
    })
    .await;
    match stopped {
        Ok(Ok(())) => info!("ferry stopped"),
        Ok(Err(err)) => error!("stop failed: {}", err),
        Err(err) => error!("stop panicked: {}", err),
    }

    // a stdin read may still be pending on the blocking pool
    process::exit(0);
}
