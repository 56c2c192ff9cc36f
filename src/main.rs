//! Stratum - an embedded, snapshot-isolated MVCC document store
//!
//! This binary is a thin demonstration shell around the `stratum` library:
//! it opens a database, runs a couple of transactions against it, and exits.
//! Real callers are expected to depend on the library crate directly rather
//! than shell out to a process per operation.

use std::path::PathBuf;
use std::time::Duration;

use log::info;
use serde_json::json;

use stratum::{Config, Db, FsyncPolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                if i + 1 < args.len() {
                    config.data_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--page-size" => {
                if i + 1 < args.len() {
                    config.page_size = args[i + 1].parse()?;
                    i += 1;
                }
            }
            "--fsync" => {
                if i + 1 < args.len() {
                    config.wal_fsync = match args[i + 1].as_str() {
                        "always" => FsyncPolicy::Always,
                        "never" => FsyncPolicy::Never,
                        "batched" => FsyncPolicy::Batched {
                            max_unfsynced_bytes: 1 << 20,
                            max_delay_ms: 50,
                        },
                        other => {
                            eprintln!("unknown --fsync value {:?}, keeping default", other);
                            config.wal_fsync
                        }
                    };
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stratum - an embedded MVCC document store");
                println!();
                println!("Usage: stratum [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --data-dir DIR    Data directory (default: ./data)");
                println!("      --page-size N     Page size in bytes (default: 4096)");
                println!("      --fsync POLICY    always | batched | never (default: always)");
                println!("  -h, --help            Show this help");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!("opening stratum database at {:?}", config.data_dir);
    let db = Db::open(config).await?;
    let _maintenance = db.spawn_maintenance_ticker(Duration::from_secs(30));

    let mut tx = db.begin();
    tx.insert("widgets", &json!({"name": "bolt", "count": 100}), Some(1))?;
    tx.commit()?;

    let reader = db.begin();
    if let Some(doc) = reader.get_by_id("widgets", 1)? {
        info!("read back widgets/1: {}", doc);
    }

    Ok(())
}
