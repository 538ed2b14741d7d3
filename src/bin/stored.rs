use std::env;
use std::sync::Arc;

use clap::Parser;
use roster_store::engine::{FileSnapshotter, Roster, Snapshotter};
use roster_store::server::Router;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen address, e.g. 127.0.0.1:7070
    #[arg(short, long)]
    addr: Option<String>,

    /// Path to the JSON snapshot file
    #[arg(short, long)]
    data_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let addr = args
        .addr
        .or_else(|| env::var("ROSTER_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1:7070".to_string());

    let data_file = args
        .data_file
        .or_else(|| env::var("ROSTER_DATA").ok())
        .unwrap_or_else(|| "data/roster.json".to_string());

    let snapshotter = Arc::new(FileSnapshotter::new(&data_file)?);
    let initial = snapshotter.load()?;
    let roster = Arc::new(Roster::new(initial, Some(snapshotter)));

    let router = Router::new(roster.clone());

    println!("Starting Roster Store daemon...");
    println!("Loaded {} records from {}.", roster.len(), data_file);
    println!("Listening on {addr} (TCP)");

    tokio::select! {
        res = router.listen(&addr) => {
            if let Err(e) = res {
                eprintln!("TCP server failed: {e}");
            }
        }
        _ = signal::ctrl_c() => {
            println!("\nShutdown signal received. Writing final snapshot...");
            if let Err(e) = roster.flush() {
                eprintln!("Final snapshot failed: {e}");
            } else {
                println!("Snapshot complete. Exiting.");
            }
        }
    }

    Ok(())
}
