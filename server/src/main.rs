use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use shared::Tuning;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Maximum concurrent players
    #[arg(short = 'm', long, default_value = "8")]
    max_clients: usize,

    /// Kills needed to win a match
    #[arg(short = 'k', long, default_value = "10")]
    kills_to_win: u32,

    /// Projectiles preallocated at startup
    #[arg(long, default_value = "30")]
    pool_size: usize,

    /// Session name reported to joining clients
    #[arg(short = 'n', long, default_value = "arena")]
    session_name: String,

    /// Fixed seed for spawn points and generated names
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let tuning = Tuning {
        tick_rate: args.tick_rate.max(1),
        kills_to_win: args.kills_to_win.max(1),
        pool_size: args.pool_size,
        ..Tuning::default()
    };
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        session_name: args.session_name,
        tuning,
        seed: args.seed,
        ..ServerConfig::default()
    };

    info!(
        "Starting server on {} at {}Hz, first to {} kills",
        config.bind_addr, config.tuning.tick_rate, config.tuning.kills_to_win
    );

    let mut server = Server::new(config).await?;
    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
