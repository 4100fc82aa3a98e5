// Judge client entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout is for command output)
// 2. Load config
// 3. Open the session database
// 4. Build the HTTP gateway and judging session
// 5. Restore the session from stored credentials
// 6. Run the requested command
// 7. Dispose the session

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use openhack_judge::config::{self, Config};
use openhack_judge::credentials::CredentialStore;
use openhack_judge::error::{ApiError, JudgmentError};
use openhack_judge::flags::FlagPoller;
use openhack_judge::gateway::HttpGateway;
use openhack_judge::model::{Judge, RotationSignal, Team};
use openhack_judge::session::{JudgingSession, SessionOptions, TeamChoice};
use openhack_judge::storage::SqliteStore;

#[derive(Parser, Debug)]
#[command(name = "openhack-judge", version, about = "Hackathon judging client")]
struct Cli {
    /// Override `api.base_url` from config/client.toml.
    #[arg(long, env = "OPENHACK_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Exchange a QR login token for a judge session.
    Login { token: String },
    /// Show the judge, the team slots and the rotation state.
    Status,
    /// Request the first team of the rotation.
    Start,
    /// Advance the rotation without recording a judgment.
    Next,
    /// Record a judgment: `current`, `previous`, or a team id wins.
    Judge {
        winner: String,
        /// Loser to use when the opposite slot is empty.
        #[arg(long)]
        loser: Option<String>,
    },
    /// Poll feature flags and print each snapshot.
    Flags {
        #[arg(long, default_value_t = 3)]
        for_secs: u64,
    },
    /// Clear judging state, keeping the login token.
    Reset,
    /// Clear judging state and the login token.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    let log_path = init_tracing()?;
    let cli = Cli::parse();
    info!(
        command = ?cli.command,
        log = %log_path.display(),
        "Judge client starting up"
    );

    // 2. Load config
    let mut config = config::load_config().context("failed to load configuration")?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
    }
    info!(
        "Config loaded: api={}, min_loading={}ms",
        config.api.base_url, config.session.min_loading_ms
    );

    // 3. Open the session database
    let credentials = open_credentials(&config);

    // 4. Build the gateway and session
    let gateway = Arc::new(
        HttpGateway::from_config(&config, credentials.clone())
            .context("failed to build HTTP client")?,
    );
    let session = JudgingSession::new(
        gateway.clone(),
        credentials,
        SessionOptions {
            min_loading: config.min_loading(),
        },
    );

    // 5. Restore, the same as a page reload would
    let report = session.restore_session().await;
    info!(
        refresh = ?report.refresh,
        current_team = ?report.current_team,
        previous_team = ?report.previous_team,
        "Restore finished"
    );

    // 6. Run the command
    let result = run(cli.command, &session, gateway, &config).await;
    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }

    // 7. Cleanup
    session.dispose();
    info!("Judge client shut down cleanly");
    result
}

async fn run(
    command: Command,
    session: &JudgingSession,
    gateway: Arc<HttpGateway>,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Command::Login { token } => {
            let judge = session.upgrade(&token).await.context("login failed")?;
            println!("Logged in as {} ({})", judge.name, judge.id);
            print_status(session);
        }
        Command::Status => print_status(session),
        Command::Start => {
            require_login(session)?;
            report_rotation(session, session.start_judging().await)?;
        }
        Command::Next => {
            require_login(session)?;
            report_rotation(session, session.get_next_team().await)?;
        }
        Command::Judge { winner, loser } => {
            require_login(session)?;
            let choice = TeamChoice::parse(&winner);
            match session
                .record_judgment(choice, loser.as_deref().unwrap_or_default())
                .await
            {
                Ok(judgment) => {
                    println!(
                        "Recorded judgment {}: {} beat {}",
                        judgment.id, judgment.winning_team_id, judgment.losing_team_id
                    );
                    print_status(session);
                }
                Err(e) if e.is_judging_finished() => {
                    if let Some(judgment) = e.recorded() {
                        println!("Recorded judgment {}", judgment.id);
                    }
                    println!("Judging is finished. Thank you!");
                }
                Err(JudgmentError::Advance { judgment, source }) => {
                    println!("Recorded judgment {}", judgment.id);
                    bail!("could not fetch the next team: {source}");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Flags { for_secs } => {
            let poller = FlagPoller::new(gateway);
            let mut updates = poller.subscribe();
            poller.start(config.poll_interval());
            let deadline = tokio::time::sleep(Duration::from_secs(for_secs));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = updates.borrow_and_update().clone();
                        println!("{}", serde_json::to_string(&snapshot)?);
                    }
                }
            }
            poller.stop();
        }
        Command::Reset => {
            session.reset();
            println!("Judging state cleared");
        }
        Command::Logout => {
            session.logout();
            println!("Logged out");
        }
    }
    Ok(())
}

/// Report a rotation call. Finished judging is a normal outcome.
fn report_rotation(
    session: &JudgingSession,
    result: Result<RotationSignal, ApiError>,
) -> anyhow::Result<()> {
    match result {
        Ok(RotationSignal::Assigned(team)) => {
            println!("Next team: {}", describe_team(&team));
            print_status(session);
            Ok(())
        }
        Ok(RotationSignal::Resting(message)) => {
            println!("No team assigned yet: {message}");
            Ok(())
        }
        Ok(RotationSignal::Unknown) => {
            println!("No team assigned yet");
            Ok(())
        }
        Err(e) if e.is_judging_finished() => {
            println!("Judging is finished. Thank you!");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("failed to advance the rotation")),
    }
}

fn require_login(session: &JudgingSession) -> anyhow::Result<()> {
    if session.judge().is_none() {
        bail!("not logged in; run `openhack-judge login <token>` first");
    }
    Ok(())
}

fn print_status(session: &JudgingSession) {
    match session.judge() {
        Some(judge) => println!("Judge: {}", describe_judge(&judge)),
        None => println!("Judge: not logged in"),
    }
    let slots = session.team_slots();
    let slot = |team: &Option<Team>| team.as_ref().map_or("-".to_string(), describe_team);
    println!("Current team:  {}", slot(&slots.current));
    println!("Previous team: {}", slot(&slots.previous));
    if session.is_judging_finished() {
        println!("Judging is finished.");
    }
    if let Some(error) = session.error() {
        println!("Error: {error}");
    }
}

fn describe_judge(judge: &Judge) -> String {
    let cursor = if judge.is_finished() {
        "finished".to_string()
    } else if judge.has_started() {
        format!("team #{}", judge.current_team)
    } else {
        "not started".to_string()
    };
    match judge.next_team_at() {
        Some(at) => format!("{} ({}), {cursor}, next team at {at}", judge.name, judge.id),
        None => format!("{} ({}), {cursor}", judge.name, judge.id),
    }
}

fn describe_team(team: &Team) -> String {
    match &team.table {
        Some(table) => format!("{} [{}] at table {table}", team.name, team.id),
        None => format!("{} [{}]", team.name, team.id),
    }
}

/// Open the SQLite-backed credential store. A store that cannot be opened
/// degrades to no persistence rather than aborting.
fn open_credentials(config: &Config) -> CredentialStore {
    let path = config.storage_path();
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!("Failed to create {}: {}", parent.display(), e);
        }
    }
    match SqliteStore::open(&path) {
        Ok(store) => {
            info!("Session database opened at {}", path.display());
            CredentialStore::new(Arc::new(store))
        }
        Err(e) => {
            error!("Failed to open session database at {}: {}", path.display(), e);
            CredentialStore::unavailable()
        }
    }
}

const LOG_FILE: &str = "openhack-judge.log";
const DEFAULT_LOG_FILTER: &str = "openhack_judge=info,warn";

/// Route tracing to `logs/openhack-judge.log`, appending across runs.
/// Stdout is reserved for command output.
fn init_tracing() -> anyhow::Result<PathBuf> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let log_path = std::env::current_dir()?.join("logs").join(LOG_FILE);
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("cannot open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let file_layer = fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .context("failed to set tracing subscriber")?;

    Ok(log_path)
}
