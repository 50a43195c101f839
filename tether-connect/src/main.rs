//! Connect to a DC, ping it and report what the session learned.
//!
//! # What this does
//!
//! 1. Load the session file, or negotiate a new auth key if there is none
//! 2. Send `ping` (sleeping through `FLOOD_WAIT` if asked to)
//! 3. Print the round trip, server salt and clock offset
//! 4. Save the session so the next run skips the key exchange
//!
//! # Run
//! ```text
//! TETHER_ADDR=149.154.167.40:80 TETHER_TRANSPORT=intermediate cargo run -p tether-connect
//! ```
//!
//! | Variable           | Default               |
//! |--------------------|-----------------------|
//! | `TETHER_ADDR`      | `149.154.167.51:443`  |
//! | `TETHER_DC`        | `2`                   |
//! | `TETHER_TRANSPORT` | `abridged`            |
//! | `TETHER_OBFUSCATE` | unset                 |
//! | `TETHER_SESSION`   | `tether.session`      |

use std::sync::Arc;
use std::time::Instant;

use tether::tl::{enums, functions};
use tether::{AutoSleep, BinaryFileBackend, Config, Obfuscation, Sender, TransportKind};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("tether_sender=info,tether_mtproto=info"),
    )
    .init();

    if let Err(e) = run().await {
        eprintln!("✗ {e}");
        std::process::exit(1);
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn config_from_env() -> Result<Config> {
    let addr = env_or("TETHER_ADDR", "149.154.167.51:443");
    let (host, port) = addr.rsplit_once(':').ok_or("TETHER_ADDR must be host:port")?;

    let transport = match env_or("TETHER_TRANSPORT", "abridged").as_str() {
        "abridged" => TransportKind::Abridged,
        "intermediate" => TransportKind::Intermediate,
        "full" => TransportKind::Full,
        other => return Err(format!("unknown transport {other:?}").into()),
    };

    Ok(Config {
        dc_id: env_or("TETHER_DC", "2").parse()?,
        server_address: host.to_string(),
        port: port.parse()?,
        transport,
        obfuscation: std::env::var_os("TETHER_OBFUSCATE").map(|_| Obfuscation::Plain),
        session_backend: Arc::new(BinaryFileBackend::new(env_or("TETHER_SESSION", "tether.session"))),
        ..Config::default()
    })
}

async fn run() -> Result<()> {
    let config = config_from_env()?;
    println!("Connecting to {}:{} over {:?} …", config.server_address, config.port, config.transport);

    let (sender, _updates) = Sender::connect(config).await?;
    println!("✓ session ready");

    let ping_id = i64::from_le_bytes(tether::crypto::random_array());
    let started = Instant::now();
    let enums::Pong::Pong(pong) = sender
        .invoke_with_retry(&functions::Ping { ping_id }, &AutoSleep::default())
        .await?;
    if pong.ping_id != ping_id {
        return Err(format!("pong carries ping_id {:#x}, expected {ping_id:#x}", pong.ping_id).into());
    }
    println!("✓ pong in {:?}", started.elapsed());

    let session = sender.snapshot().await?;
    println!("  server salt  : {:#018x}", session.salt);
    println!("  clock offset : {}s", session.time_offset);

    sender.save_session().await?;
    println!("✓ session saved");
    sender.disconnect();
    Ok(())
}
