//! Session log inspector.
//!
//! Reads the durable event store written by the runtime and exposes it
//! for debugging:
//!
//!   relay sessions                    list sessions with a stream
//!   relay replay <session> [offset]   print a session's envelopes
//!   relay verify <session>            check the log is gap-free

use std::path::PathBuf;
use std::process::ExitCode;

use relay_core::{RelayConfig, SqliteStreamStore};
use relay_protocol::{verify_sequence_hints, Envelope};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay=info")),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("relay: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let store = open_store()?;

    match args.first().map(String::as_str) {
        Some("sessions") => {
            for session_id in store.sessions()? {
                println!("{session_id}");
            }
            Ok(())
        }
        Some("replay") => {
            let session_id = args.get(1).ok_or("usage: relay replay <session> [offset]")?;
            let offset = match args.get(2) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|_| format!("invalid offset: {raw}"))?,
                None => 0,
            };
            for event in store.replay_from(session_id, offset)? {
                let line =
                    serde_json::to_string(&event).map_err(|e| format!("encode event: {e}"))?;
                println!("{line}");
            }
            Ok(())
        }
        Some("verify") => {
            let session_id = args.get(1).ok_or("usage: relay verify <session>")?;
            let log = load_envelopes(&store, session_id)?;
            verify_sequence_hints(&log).map_err(|e| format!("log for {session_id}: {e}"))?;
            println!("{session_id}: {} envelopes, no gaps", log.len());
            Ok(())
        }
        _ => Err("usage: relay <sessions|replay|verify> ...".to_string()),
    }
}

fn load_envelopes(store: &SqliteStreamStore, session_id: &str) -> Result<Vec<Envelope>, String> {
    store
        .replay_from(session_id, 0)?
        .into_iter()
        .map(|value| {
            serde_json::from_value(value).map_err(|e| format!("decode stored envelope: {e}"))
        })
        .collect()
}

/// `RELAY_DB_PATH` overrides the configured store location.
fn open_store() -> Result<SqliteStreamStore, String> {
    let path = match std::env::var("RELAY_DB_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => RelayConfig::load()?.db_path()?,
    };
    tracing::debug!(path = %path.display(), "opening event store");
    SqliteStreamStore::open(&path)
}
