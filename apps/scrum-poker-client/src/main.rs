mod terminal;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use scrum_poker_client::config::DEFAULT_SERVER_URL;
use scrum_poker_client::logging::{self, LogConfig, LogLevel};
use scrum_poker_client::{
    ConnectionConfig, ConnectionManager, ConnectionState, IdentityStore, InputError, SessionApi,
    SessionClient, ServerEndpoint,
};
use scrum_poker_core::SessionId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::terminal::{Celebration, Command};

#[derive(Parser, Debug)]
#[command(name = "scrum-poker", version, about = "Planning poker from the terminal")]
struct Cli {
    /// Base URL of the scrum-poker server.
    #[arg(long, env = "SCRUM_POKER_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Where the client id and cached name are kept.
    #[arg(long, env = "SCRUM_POKER_IDENTITY_FILE")]
    identity_file: Option<PathBuf>,

    #[arg(long, value_enum, env = "SCRUM_POKER_LOG_LEVEL", default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Write logs to daily files in this directory instead of stderr.
    #[arg(long, env = "SCRUM_POKER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new session and print its id.
    Create,
    /// Check whether a session exists.
    Check { session: String },
    /// Join a session interactively.
    Join {
        session: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        dir: cli.log_dir.clone(),
    })
    .context("initialize logging")?;

    let endpoint = ServerEndpoint::parse(&cli.server).context("parse server url")?;
    let api = SessionApi::new(endpoint.clone());

    match cli.command {
        Commands::Create => {
            let session_id = api.create_session().await.context("create session")?;
            println!("{session_id}");
        }
        Commands::Check { session } => {
            let session_id = SessionId::from(session);
            api.check_session(&session_id)
                .await
                .with_context(|| format!("check session {session_id}"))?;
            println!("session {session_id} is open");
        }
        Commands::Join { session, name } => {
            let session_id = SessionId::from(session);
            api.check_session(&session_id)
                .await
                .with_context(|| format!("check session {session_id}"))?;
            let identity = match &cli.identity_file {
                Some(path) => IdentityStore::open(path),
                None => IdentityStore::open_default(),
            };
            run_session(&endpoint, session_id, identity, name).await?;
        }
    }
    Ok(())
}

async fn run_session(
    endpoint: &ServerEndpoint,
    session_id: SessionId,
    identity: IdentityStore,
    name: Option<String>,
) -> Result<()> {
    let manager = ConnectionManager::new(ConnectionConfig::default());
    let client = SessionClient::connect(&manager, endpoint, session_id.clone(), identity)
        .context("start session connection")?;
    client.add_observer(Box::new(Celebration));
    if let Some(name) = name {
        client.set_display_name(&name).context("set display name")?;
    }
    info!(%session_id, client_id = %client.client_id(), "joined session");

    let mut views = client.subscribe();
    let mut statuses = client.status_updates();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("joined {session_id}; {}", terminal::HELP);

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else {
                    break Ok(());
                };
                match terminal::parse_command(&line) {
                    Ok(Some(Command::Quit)) => break Ok(()),
                    Ok(Some(command)) => execute(&client, command),
                    Ok(None) => {}
                    Err(message) => eprintln!("{message}"),
                }
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let view = views.borrow_and_update().clone();
                print!("{}", terminal::render(&view));
            }
            changed = statuses.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = *statuses.borrow_and_update();
                eprintln!("{}", terminal::describe_status(state));
                if state == ConnectionState::FatalError {
                    break Err(anyhow!("lost session {session_id}"));
                }
            }
        }
    };
    client.stop();
    outcome
}

fn execute(client: &SessionClient, command: Command) {
    // these are replayed by the client after a reconnect
    let replayed = matches!(
        command,
        Command::Vote(_) | Command::Name(_) | Command::Sit | Command::Stand
    );
    let sent: Result<bool, InputError> = match command {
        Command::Vote(value) => client.cast_vote(value),
        Command::Name(name) => client.set_display_name(&name),
        Command::Options(raw) => client.set_vote_options(&raw),
        Command::Clear => Ok(client.clear_votes()),
        Command::Show => Ok(client.reveal_votes()),
        Command::Sit => Ok(client.join_vote()),
        Command::Stand => Ok(client.leave_vote()),
        Command::Help => {
            println!("{}", terminal::HELP);
            return;
        }
        Command::Quit => return,
    };
    match sent {
        Ok(true) => {}
        Ok(false) if replayed => eprintln!("not connected; will be sent on reconnect"),
        Ok(false) => eprintln!("not connected; try again once the connection is back"),
        Err(err) => eprintln!("{err}"),
    }
}
