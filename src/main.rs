use std::io::Write;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod handler;
mod tui;
mod ui;

use sse_chat::app::{App, StreamUpdate};
use sse_chat::completions::CompletionsClient;
use sse_chat::config::Config;
use sse_chat::csrf;
use sse_chat::state::ChatRole;
use tui::AppEvent;

#[derive(Parser)]
#[command(name = "sse-chat", version)]
#[command(about = "Chat with a streaming completions endpoint")]
struct Cli {
    #[command(flatten)]
    endpoint: EndpointArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct EndpointArgs {
    /// Backend that serves /api/csrf-token
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Streaming chat completions URL
    #[arg(long, global = true)]
    completions_url: Option<String>,
    /// Model name sent with each request
    #[arg(short, long, global = true)]
    model: Option<String>,
    /// Skip the CSRF token fetch
    #[arg(long, global = true)]
    no_csrf: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Send one message and print the reply as it streams
    Ask {
        /// Your message
        prompt: String,
    },
    /// Save the given --base-url/--completions-url/--model as defaults
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    let overrides = Config {
        base_url: cli.endpoint.base_url.clone(),
        completions_url: cli.endpoint.completions_url.clone(),
        model: cli.endpoint.model.clone(),
    };
    let config = Config::load()?.merge(overrides);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let client = connect(&config, cli.endpoint.no_csrf).await;
            run_tui(App::new(client)).await
        }
        Commands::Ask { prompt } => {
            let client = connect(&config, cli.endpoint.no_csrf).await;
            ask(App::new(client), prompt).await
        }
        Commands::Config => {
            config.save()?;
            println!("Saved {}", Config::get_config_path()?.display());
            Ok(())
        }
    }
}

/// Log to a daily file; stdout and stderr belong to the chat.
fn init_logging() -> Result<WorkerGuard> {
    let log_dir = dirs::data_dir()
        .map(|dir| dir.join("sse-chat"))
        .unwrap_or_else(|| std::env::temp_dir().join("sse-chat"))
        .join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "sse-chat.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .init();

    Ok(guard)
}

/// Fetch the CSRF token once and bind it to the completions client.
async fn connect(config: &Config, no_csrf: bool) -> CompletionsClient {
    let token = if no_csrf {
        None
    } else {
        csrf::fetch_csrf_token_or_none(&reqwest::Client::new(), config.base_url()).await
    };

    let client = CompletionsClient::new(config.completions_url(), config.model(), token);
    info!(
        url = client.url(),
        model = client.model(),
        csrf = client.has_csrf_token(),
        "chat client ready"
    );
    client
}

enum Next {
    Terminal(Option<AppEvent>),
    Stream(StreamUpdate),
}

async fn run_tui(mut app: App) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            let next = tokio::select! {
                event = events.next() => Next::Terminal(event),
                update = app.next_stream_update() => Next::Stream(update),
            };

            match next {
                Next::Terminal(Some(event)) => handler::handle_event(&mut app, event),
                Next::Terminal(None) => app.should_quit = true,
                Next::Stream(update) => app.apply_stream_update(update),
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    app.cancel();
    tui::restore()?;
    result
}

async fn ask(mut app: App, prompt: String) -> Result<()> {
    app.input = prompt;
    app.send();
    if app.messages.is_empty() {
        return Err(anyhow!("Nothing to send"));
    }

    let mut stdout = std::io::stdout();
    let mut printed = 0;

    while app.is_streaming() {
        let update = app.next_stream_update().await;
        app.apply_stream_update(update);

        if let Some(last) = app.messages.last().filter(|m| m.role == ChatRole::Assistant) {
            if last.content.len() > printed {
                write!(stdout, "{}", &last.content[printed..])?;
                stdout.flush()?;
                printed = last.content.len();
            }
        }
    }
    writeln!(stdout)?;

    match app.error {
        Some(error) => Err(anyhow!(error)),
        None => Ok(()),
    }
}
