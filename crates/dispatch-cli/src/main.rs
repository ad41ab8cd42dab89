#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dispatch_client::{
    ActiveView, AlertSink, ClientConfig, DispatchSession, HostPlatform, HostUser, HttpBackend,
    InitDataHost, Message, SendError, Sender, SessionUpdate, SocketIoChannel, StaticHost,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const ALERT_EMPTY_MESSAGE: &str = "Cannot send empty message or missing user.";

#[derive(Parser, Debug)]
#[command(name = "dispatch-link", about = "Chat with dispatch from the terminal")]
struct Args {
    /// Backend base URL. Overrides DISPATCH_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Driver username, used when no init data is given.
    #[arg(long)]
    username: Option<String>,

    /// Telegram WebApp initData query string.
    #[arg(long)]
    init_data: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn host_from_args(args: &Args) -> Arc<dyn HostPlatform> {
    let sink: AlertSink = Arc::new(|message: &str| eprintln!("alert: {message}"));
    match (&args.init_data, &args.username) {
        (Some(init_data), _) => Arc::new(InitDataHost::parse(init_data, sink)),
        (None, Some(username)) => {
            Arc::new(StaticHost::new(Some(HostUser::with_username(username)), sink))
        }
        (None, None) => Arc::new(StaticHost::new(None, sink)),
    }
}

fn render(message: &Message) {
    let who = match message.sender() {
        Sender::Driver => "you",
        Sender::Dispatcher => "dispatch",
    };
    println!(
        "[{}] {who}: {}",
        message.timestamp().format("%Y-%m-%d %H:%M"),
        message.text()
    );
}

fn render_view(view: ActiveView) {
    match view {
        ActiveView::Composer => println!("-- composer --"),
        ActiveView::Status => println!("-- status --"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = ClientConfig::from_env().context("load DISPATCH_* configuration")?;
    if let Some(base_url) = &args.base_url {
        config.base_url.clone_from(base_url);
    }
    let backend = HttpBackend::new(&config).context("build backend client")?;
    let channel = SocketIoChannel::from_client_config(&config).context("build live channel")?;
    let mut session = DispatchSession::new(Some(host_from_args(&args)), backend, channel);

    if let Err(err) = session.start().await {
        session.teardown().await;
        return Err(err).context("start session");
    }
    info!(base_url = %config.base_url, "connected to dispatch");
    for message in session.timeline() {
        render(message);
    }
    render_view(session.active_view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                match line.trim() {
                    "/status" => {
                        session.focus_status();
                        render_view(session.active_view());
                    }
                    "/compose" => {
                        session.focus_composer();
                        render_view(session.active_view());
                    }
                    text => match session.send(text) {
                        Ok(()) => {
                            if let Some(message) = session.timeline().last() {
                                render(message);
                            }
                        }
                        Err(SendError::EmptyMessage | SendError::NotReady) => {
                            eprintln!("{ALERT_EMPTY_MESSAGE}");
                        }
                        Err(SendError::TornDown) => break,
                    },
                }
            }
            update = session.next_update() => match update {
                None => break,
                Some(SessionUpdate::MessageAppended { view_changed }) => {
                    if let Some(message) = session.timeline().last() {
                        render(message);
                    }
                    if view_changed {
                        render_view(session.active_view());
                    }
                }
                Some(SessionUpdate::Connected) => eprintln!("live channel connected"),
                Some(SessionUpdate::Disconnected { reason }) => {
                    eprintln!("live channel disconnected: {reason}");
                }
                Some(SessionUpdate::Reconnecting { attempt, delay }) => {
                    eprintln!("reconnecting (attempt {attempt}) in {}ms", delay.as_millis());
                }
                Some(SessionUpdate::ReconnectExhausted { attempts }) => {
                    eprintln!("gave up reconnecting after {attempts} attempts");
                }
            },
        }
    }

    session.teardown().await;
    Ok(())
}
