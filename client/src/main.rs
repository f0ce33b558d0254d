use clap::{Parser, ValueEnum};
use client::input::WanderInput;
use client::network::Client;
use client::session::{create_session, leave_channel, SessionConfig, SessionMode};
use log::info;
use shared::{Bus, BusEvent, Tuning};
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Host,
    Join,
    Auto,
}

impl From<Mode> for SessionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Host => SessionMode::Host,
            Mode::Join => SessionMode::Client,
            Mode::Auto => SessionMode::AutoHostOrClient,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Host, join, or join and fall back to hosting
    #[arg(short = 'm', long, value_enum, default_value = "auto")]
    mode: Mode,

    /// Player name shown to others
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Maximum players when hosting
    #[arg(long, default_value = "8")]
    max_players: usize,

    /// Kills needed to win when hosting
    #[arg(short = 'k', long, default_value = "10")]
    kills_to_win: u32,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Leave after this many seconds (runs until Ctrl-C if omitted)
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Seed for the wandering bot input
    #[arg(long, default_value = "1")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let tuning = Tuning {
        kills_to_win: args.kills_to_win.max(1),
        ..Tuning::default()
    };

    let config = SessionConfig {
        mode: args.mode.into(),
        player_name: args.name,
        max_players: args.max_players,
        server_addr: args.server.clone(),
        host_bind: args.server,
        tuning: tuning.clone(),
        ..SessionConfig::default()
    };

    info!("Starting headless client ({:?})", config.mode);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let (leave, mut listener) = leave_channel();
    let duration = args.duration.map(Duration::from_secs);
    tokio::spawn(async move {
        match duration {
            Some(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
        leave.leave();
    });

    let mut bus = Bus::new();
    let session = create_session(&config, &mut bus, &mut listener).await?;

    let mut client = Client::new(session, tuning, Duration::from_millis(args.fake_ping));
    let mut events = client.subscribe();
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                BusEvent::StatusText(text) => info!("{}", text),
                BusEvent::GameOver { winner, kills } => {
                    info!("Game over: '{}' with {} kills", winner, kills)
                }
                BusEvent::Fact(fact) => log::debug!("Fact: {:?}", fact),
                _ => {}
            }
        }
    });

    let stats = client
        .run(&mut WanderInput::new(args.seed), listener)
        .await?;
    info!(
        "Session over after {} ticks: {} snapshots, {} facts, {} reconciliations",
        stats.ticks, stats.snapshots, stats.facts, stats.reconciliations
    );

    client.leave().await;
    logger.abort();
    Ok(())
}
