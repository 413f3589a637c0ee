use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use incentive_ledger::csv::{read_operations, write_wallets};
use incentive_ledger::{Config, Engine, InMemoryStore, LedgerStore, Replay};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let Some(path) = env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: incentive-ledger <operations.csv>");
        return ExitCode::FAILURE;
    };

    if path.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %path.display(), "input file seems to not be a csv file");
    }

    let operations = match read_operations(&path) {
        Ok(operations) => operations,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let store = InMemoryStore::open();
    let mut replay = Replay::new(Engine::new(store.clone(), config));
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(op) => {
                    if op_sender.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    replay.run(ReceiverStream::new(op_receiver)).await;

    let written = match replay.wallet_rows().await {
        Ok(rows) => write_wallets(io::stdout().lock(), rows).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    store.close().await;

    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
