//! Tourguard update simulator
//!
//! Sends synthetic tourist location/vitals updates to a running tourguard
//! instance over the NDJSON TCP ingest protocol.
//!
//! Usage:
//!   cargo run --bin sim -- --addr 127.0.0.1:27600 --tourists 5
//!   cargo run --bin sim -- --panic-tourist 2 --panic-after 10

use clap::Parser;
use serde_json::json;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sim")]
#[command(about = "Tourguard update simulator - NDJSON TCP injection")]
struct Args {
    /// Listener address of the tourguard instance
    #[arg(long, default_value = "127.0.0.1:27600")]
    addr: String,

    /// Number of simulated tourists
    #[arg(long, default_value = "5")]
    tourists: u32,

    /// Milliseconds between update rounds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Number of update rounds to send (0 = run until interrupted)
    #[arg(long, default_value = "60")]
    rounds: u64,

    /// Tourist index that sends a panic signal (none by default)
    #[arg(long)]
    panic_tourist: Option<u32>,

    /// Round after which the panic signal is sent
    #[arg(long, default_value = "10")]
    panic_after: u64,

    /// Center latitude for the simulated walk
    #[arg(long, default_value = "40.7580")]
    lat: f64,

    /// Center longitude for the simulated walk
    #[arg(long, default_value = "-73.9855")]
    lon: f64,
}

/// Small deterministic PRNG so runs are reproducible
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let mut stream = TcpStream::connect(&args.addr).await?;
    info!(addr = %args.addr, tourists = %args.tourists, "sim_connected");

    let mut rng = Lcg(0x5eed);
    let mut panic_sent = false;
    let mut round = 0u64;

    loop {
        if args.rounds > 0 && round >= args.rounds {
            break;
        }
        round += 1;
        let now = epoch_ms();

        for i in 0..args.tourists {
            // Random walk of roughly ±50 m per round around the center
            let lat = args.lat + (rng.next_f64() - 0.5) * 0.001 * (i as f64 + 1.0);
            let lon = args.lon + (rng.next_f64() - 0.5) * 0.001 * (i as f64 + 1.0);
            let heart_rate = 60.0 + rng.next_f64() * 40.0;

            let update = json!({
                "id": format!("tourist-{i}"),
                "type": "location",
                "lat": lat,
                "lon": lon,
                "ts": now,
                "accuracy_m": 5.0,
                "vitals": {
                    "heart_rate": heart_rate,
                    "battery_pct": 90.0 - round as f64,
                    "last_sync_ms": now,
                },
            });
            stream.write_all(format!("{update}\n").as_bytes()).await?;
        }

        if let Some(panic_idx) = args.panic_tourist {
            if !panic_sent && round > args.panic_after {
                let panic = json!({"id": format!("tourist-{panic_idx}"), "type": "panic"});
                stream.write_all(format!("{panic}\n").as_bytes()).await?;
                warn!(tourist = %panic_idx, round = %round, "sim_panic_sent");
                panic_sent = true;
            }
        }

        stream.flush().await?;
        tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
    }

    info!(rounds = %round, "sim_finished");
    Ok(())
}
