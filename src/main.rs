use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use talkback::db::{self, KeyStore, SessionRepo};
use talkback::stream::{StreamClient, StreamEvent};
use talkback::voice::{
    ConsoleRecognizer, ConsoleSynthesizer, SpeechPlayer, VoiceInput, VoiceSession, VoiceState,
};
use talkback::{ChatFlow, Config, DbPool};

/// Talkback - streaming AI chat with a hands-free voice mode
#[derive(Parser)]
#[command(name = "talkback", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive text chat
    Chat {
        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Ask a single question and print the streamed answer
    Ask {
        /// Question text
        text: String,
    },
    /// Hands-free voice conversation (typed lines stand in for speech)
    Voice {
        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Manage stored chat sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
    /// Store the API key
    SetKey {
        /// Remove the stored key instead
        #[arg(long)]
        remove: bool,
    },
}

#[derive(Subcommand)]
enum SessionsCommand {
    /// List sessions, newest first
    List,
    /// Print a session transcript
    Show { id: String },
    /// Change a session's topic
    Rename { id: String, topic: String },
    /// Delete a session and its messages
    Delete { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,talkback=info",
        1 => "info,talkback=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let pool = db::init(&config.db_path)?;

    match cli.command {
        Command::Chat { session } => chat(&config, &pool, session.as_deref()).await,
        Command::Ask { text } => ask(&config, &pool, &text).await,
        Command::Voice { session } => voice(&config, &pool, session.as_deref()).await,
        Command::Sessions { action } => sessions(&pool, action),
        Command::SetKey { remove } => {
            let store = KeyStore::new(pool);
            if remove {
                talkback::setup::run_remove_key(&store)
            } else {
                talkback::setup::run_set_key(&store)
            }
        }
    }
}

fn chat_flow(config: &Config, pool: &DbPool) -> anyhow::Result<ChatFlow> {
    let key = config.resolve_api_key(&KeyStore::new(pool.clone()))?;
    let client = StreamClient::new(key)
        .with_base_url(config.base_url.clone())
        .with_policy(config.chunk_policy);
    Ok(ChatFlow::new(
        SessionRepo::new(pool.clone()),
        client,
        config.chat_settings(),
    ))
}

/// Print a response as it streams; Ctrl-C stops it
async fn stream_answer(flow: &mut ChatFlow) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            event = flow.next_event() => match event {
                Some(StreamEvent::Chunk(chunk)) => {
                    write!(stdout, "{}", chunk.source)?;
                    stdout.flush()?;
                }
                Some(StreamEvent::Finished) | None => {
                    writeln!(stdout)?;
                    return Ok(());
                }
                Some(StreamEvent::Failed(e)) => {
                    writeln!(stdout)?;
                    eprintln!("{}", e.user_message());
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                flow.stop();
                writeln!(stdout, " [stopped]")?;
                return Ok(());
            }
        }
    }
}

async fn ask(config: &Config, pool: &DbPool, text: &str) -> anyhow::Result<()> {
    let mut flow = chat_flow(config, pool)?;
    flow.send(text)?;
    stream_answer(&mut flow).await
}

async fn chat(config: &Config, pool: &DbPool, session: Option<&str>) -> anyhow::Result<()> {
    let mut flow = chat_flow(config, pool)?;
    if let Some(id) = session {
        flow.load(id)?;
        for message in flow.history() {
            println!("{:?}: {}", message.role, message.content);
        }
    }

    println!("Type a message, or /quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        flow.send(line)?;
        stream_answer(&mut flow).await?;
    }
    Ok(())
}

async fn voice(config: &Config, pool: &DbPool, session: Option<&str>) -> anyhow::Result<()> {
    let mut flow = chat_flow(config, pool)?;
    if let Some(id) = session {
        flow.load(id)?;
    }

    let (recognizer, mut heard) = ConsoleRecognizer::new();
    let recognizer = Arc::new(recognizer);
    let (synthesizer, mut spoken) = ConsoleSynthesizer::new();
    let player = SpeechPlayer::new(Arc::new(synthesizer), config.voice.speech_options());
    let mut session = VoiceSession::new(recognizer.clone(), player, config.voice.locale.clone());

    println!("Voice mode. Type what you would say; /pause toggles pause, /quit exits.");
    let mut state = session.open(&mut flow);
    announce(VoiceState::Idle, state, &session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let previous = state;
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/pause" => state = session.handle(VoiceInput::TogglePause, &mut flow),
                    text => {
                        if !recognizer.hear(text) {
                            println!("  (not listening)");
                        }
                    }
                }
            }
            Some(event) = heard.recv() => {
                state = session.handle(VoiceInput::Recognition(event), &mut flow);
            }
            Some(event) = spoken.recv() => {
                state = session.handle(VoiceInput::Synthesis(event), &mut flow);
            }
            Some(_) = flow.next_event(), if flow.is_loading() => {
                state = session.handle(VoiceInput::Host(flow.snapshot()), &mut flow);
            }
        }
        if state != previous {
            announce(previous, state, &session);
        }
    }

    session.close();
    flow.stop();
    Ok(())
}

fn announce(previous: VoiceState, state: VoiceState, session: &VoiceSession) {
    tracing::debug!(from = %previous, to = %state, "voice state");
    match state {
        VoiceState::Listening => println!("[listening]"),
        VoiceState::Sending => println!("[thinking]"),
        VoiceState::Error => println!(
            "[error] {}",
            session.last_error().unwrap_or("voice mode failed")
        ),
        _ => {}
    }
}

fn sessions(pool: &DbPool, action: SessionsCommand) -> anyhow::Result<()> {
    let repo = SessionRepo::new(pool.clone());
    match action {
        SessionsCommand::List => {
            let sessions = repo.list()?;
            if sessions.is_empty() {
                println!("No sessions yet.");
            }
            for s in sessions {
                println!("{}  {}  {}", s.id, s.created_at.format("%Y-%m-%d %H:%M"), s.topic);
            }
        }
        SessionsCommand::Show { id } => {
            let loaded = repo.with_messages(&id)?;
            println!("# {}\n", loaded.session.topic);
            for m in loaded.messages {
                println!("{:?}: {}\n", m.role, m.content);
            }
        }
        SessionsCommand::Rename { id, topic } => {
            repo.rename(&id, &topic)?;
            println!("Renamed.");
        }
        SessionsCommand::Delete { id } => {
            repo.delete(&id)?;
            println!("Deleted.");
        }
    }
    Ok(())
}
