use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use vox_node::ipc::DEFAULT_SOCKET;
use vox_node::{send_command, ControlMessage, Intent};

/// Control a running vox daemon
#[derive(Parser)]
#[command(name = "vox-ctl", version, about)]
struct Cli {
    /// Control socket path
    #[arg(short, long, env = "VOX_SOCKET", default_value = DEFAULT_SOCKET)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a listening session; fails unless the daemon has a speech pipeline (stock vox-daemon has none)
    Trigger,
    /// Cancel the active listening session
    Stop,
    /// Dispatch an intent without speech, e.g. `dispatch turn_on -e device=lamp`
    Dispatch {
        /// Intent name
        intent: String,
        /// Entity as key=value, repeatable
        #[arg(short, long = "entity", value_parser = parse_entity)]
        entities: Vec<(String, String)>,
    },
}

fn parse_entity(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let message = match cli.command {
        Command::Trigger => ControlMessage::Trigger,
        Command::Stop => ControlMessage::Stop,
        Command::Dispatch { intent, entities } => ControlMessage::Dispatch {
            intent: entities
                .into_iter()
                .fold(Intent::new(intent), |intent, (k, v)| intent.with_entity(k, v)),
        },
    };

    match send_command(&cli.socket, &message).await {
        Ok(reply) if reply.ok => {
            println!("{}", reply.message);
            ExitCode::SUCCESS
        }
        Ok(reply) => {
            eprintln!("error: {}", reply.message);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("cannot reach daemon at {}: {e}", cli.socket.display());
            ExitCode::FAILURE
        }
    }
}
