use clap::Parser;
use log::{error, info};
use server::config::SimConfig;
use server::engine::Engine;
use server::net;
use std::sync::Arc;
use tokio::net::TcpListener;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value = "41069")]
    port: u16,

    /// WebSocket route path
    #[clap(long, default_value = "/ws")]
    ws_path: String,

    /// Tick rate (simulation updates per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,

    /// World width in cells
    #[clap(long, default_value = "2800")]
    world_width: u32,

    /// World height in cells
    #[clap(long, default_value = "2800")]
    world_height: u32,

    /// Number of simulated particles
    #[clap(long, default_value = "2500000")]
    particles: usize,

    /// Maximum concurrent clients
    #[clap(long, default_value = "1000")]
    max_clients: usize,

    /// Per-frame friction base
    #[clap(long, default_value = "0.988")]
    friction: f32,

    /// Squared touch attraction radius
    #[clap(long, default_value = "936000")]
    pull_dist_sq: f32,

    /// Touch attraction strength
    #[clap(long, default_value = "6")]
    gravity_power: f32,

    /// Ticks between particle position resets
    #[clap(long, default_value = "18000")]
    reset_period: u64,

    /// Simulation worker threads (default: cores - 1, capped at 8)
    #[clap(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let config = SimConfig {
        world_width: args.world_width,
        world_height: args.world_height,
        particle_count: args.particles,
        max_clients: args.max_clients,
        tick_hz: args.tick_rate,
        friction: args.friction,
        pull_dist_sq: args.pull_dist_sq,
        gravity_power: args.gravity_power,
        reset_period_ticks: args.reset_period,
        worker_threads: args.workers.unwrap_or_else(SimConfig::default_worker_threads),
    };

    info!(
        "Starting particle-field server on ws://{}:{}{}",
        args.host, args.port, args.ws_path
    );
    info!(
        "{} particles, {}x{} world, {} workers, {} Hz, {} client slots",
        config.particle_count,
        config.world_width,
        config.world_height,
        config.worker_threads,
        config.tick_hz,
        config.max_clients
    );

    let engine = Engine::new(&config);
    let registry = Arc::clone(&engine.registry);
    let tables = Arc::clone(&engine.tables);
    let (mut driver, _broadcaster) = engine.spawn();

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    info!("listening on {}", listener.local_addr()?);

    let serve = net::serve(
        listener,
        args.ws_path,
        registry,
        tables,
        config.world_width,
        config.world_height,
    );

    tokio::select! {
        _ = serve => unreachable!("accept loop never returns"),
        result = &mut driver => {
            let stopped = result?;
            error!("simulation stopped: {:?}", stopped.err());
            Err("simulation stopped".into())
        }
    }
}
