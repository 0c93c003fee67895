//! A small demo binary exercising a live univedo server: `ping` and `query`
//! subcommands against a driver URL (spec.md §6 "Driver URL shape").
//!
//! Not part of the library surface — a thin consumer, in the idiom of the
//! teacher's `clap::Parser`/`Subcommand` CLI, showing how the pieces compose.

use clap::{Parser, Subcommand};
use tracing::info;
use univedo_client::{ClientError, Connection, Value};

#[derive(Parser, Debug)]
#[command(name = "univedo-cli", about = "Talk to a univedo server")]
struct Cli {
    #[command(flatten)]
    shared: SharedOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
struct SharedOpts {
    /// Driver URL, e.g. wss://host:port/<bucket-uuid>/<perspective-uuid>?token=...
    #[arg(long, env = "UNIVEDO_URL")]
    url: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Round-trips a value through the session's ping call.
    Ping {
        #[arg(default_value = "hello")]
        message: String,
    },
    /// Prepares and executes a SQL statement, printing rows as they arrive.
    Query {
        sql: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let (_connection, session, perspective) = Connection::open(&cli.shared.url).await?;
    info!(session_id = session.id(), perspective_id = perspective.id(), "connected");

    match cli.command {
        Command::Ping { message } => {
            let echoed = session.ping(Value::Text(message)).await?;
            println!("{echoed:?}");
        }
        Command::Query { sql } => {
            let query = perspective.query().await?;
            let statement = query.prepare(sql).await?;
            let result = statement.execute(Default::default()).await?;
            let columns = statement.columns().await?;
            println!("columns: {columns:?}");
            while let Some(row) = result.next_row().await? {
                println!("{row:?}");
            }
        }
    }

    Ok(())
}
