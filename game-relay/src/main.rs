mod actions;
mod completion;
mod config;
mod conversation;
mod openai;
mod protocol;
mod queue;
mod schema;
mod server;
mod session;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use completion::{CompletionClient, CompletionError, CompletionRequest, CompletionResponse};
use config::RelayConfig;
use openai::OpenAiClient;
use server::{ConnectionHub, Inbound};
use session::Session;

type CompletionResult = Result<CompletionResponse, CompletionError>;

/// Run the completion call off the main loop; the result comes back on `done`.
fn spawn_invocation(
    client: Arc<dyn CompletionClient>,
    request: CompletionRequest,
    done: mpsc::Sender<CompletionResult>,
) {
    tokio::spawn(async move {
        let result = client.complete(request).await;
        if done.send(result).await.is_err() {
            tracing::warn!("Run loop gone, dropping completion result");
        }
    });
}

async fn run(
    session: &mut Session,
    client: Arc<dyn CompletionClient>,
    mut inbound: mpsc::Receiver<Inbound>,
    think_interval: Duration,
) -> anyhow::Result<()> {
    let (done_tx, mut done_rx) = mpsc::channel::<CompletionResult>(1);
    let mut think = tokio::time::interval(think_interval);
    think.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    think.tick().await;

    loop {
        if let Some(reason) = session.exit_reason() {
            anyhow::bail!("session ended: {}", reason);
        }

        let request = tokio::select! {
            msg = inbound.recv() => {
                let Some(Inbound { connection, text }) = msg else {
                    tracing::info!("Inbound stream closed");
                    break;
                };
                match protocol::decode(&text) {
                    Ok(message) => {
                        tracing::debug!(
                            "{} from {} while {} (game {:?}, {} actions, {} queued)",
                            message.kind(),
                            connection,
                            session.state_name(),
                            session.game(),
                            session.actions().len(),
                            session.queued_len()
                        );
                        session.receive(message)
                    }
                    Err(e) => {
                        tracing::error!("Protocol error from {}: {}", connection, e);
                        None
                    }
                }
            }

            Some(result) = done_rx.recv() => session.on_completion(result),

            _ = think.tick() => session.think(),
        };

        if let Some(request) = request {
            spawn_invocation(client.clone(), request, done_tx.clone());
            think.reset();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("game_relay=info")),
        )
        .init();

    let config = RelayConfig::from_env()?;

    let client: Arc<dyn CompletionClient> = Arc::new(
        OpenAiClient::new(
            &config.base_url,
            config.api_key.clone(),
            config.model.clone(),
            config.request_timeout,
        )
        .context("failed to build HTTP client")?,
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    tracing::info!(
        "Relay listening on ws://{}:{} (model {}, think every {}s)",
        config.host,
        config.port,
        config.model,
        config.think_interval.as_secs()
    );

    let hub = ConnectionHub::new();
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    tokio::spawn(server::serve(listener, hub.clone(), inbound_tx));

    let mut session = Session::new(config.session_options(), Box::new(hub));
    let result = run(&mut session, client, inbound_rx, config.think_interval).await;

    tracing::info!(
        "Relay shutting down ({} turns in conversation)",
        session.conversation().len()
    );
    tracing::debug!("Final session state: {:?}", session.state());
    result
}
