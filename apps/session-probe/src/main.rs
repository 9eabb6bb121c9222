use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use aab_orchestrator::{
    AuthToken, ChannelMessage, ChannelType, ConversationName, Credentials, LocalMessageService,
    MessageChannel, ReqwestConnector, SessionConfig, SessionDeps, SessionReport, SessionState,
    SharedConnector, TokenManager, TranscriptEntry, UiConnector, WidgetEventTarget,
    identity::normalize_phone, spawn_session,
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use url::Url;

mod host;

use host::{StdoutClipboard, StdoutWidgetHost, TerminalDesktop};

#[derive(Parser, Debug)]
#[command(author, version, about = "Agent assist session probe")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one session; stdin lines are published as conversation messages
    Run(RunArgs),
    /// Publish the phone to conversation mapping a voice session polls for
    Bind {
        #[command(flatten)]
        connector: ConnectorArgs,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        conversation_name: ConversationName,
    },
    /// Delete the phone to conversation mapping
    Release {
        #[command(flatten)]
        connector: ConnectorArgs,
        #[arg(long)]
        phone: String,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    record_id: Option<String>,
    #[arg(long)]
    channel: Option<ChannelType>,
    #[arg(long)]
    contact_phone: Option<String>,
    /// Enable the event dragnet and transcript surface
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    poll_interval_secs: Option<u64>,
    #[arg(long)]
    max_retries: Option<u32>,
    /// JSON array of `{role, content}` entries served as the CRM transcript
    #[arg(long)]
    transcript: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ConnectorArgs {
    #[arg(long, env = "AAB_ENDPOINT")]
    endpoint: Url,
    #[arg(long, env = "AAB_CONSUMER_KEY")]
    consumer_key: String,
    #[arg(long, env = "AAB_CONSUMER_SECRET", hide_env_values = true)]
    consumer_secret: String,
}

impl ConnectorArgs {
    fn connector(&self) -> SharedConnector {
        Arc::new(ReqwestConnector::new(reqwest::Client::new(), &self.endpoint))
    }

    async fn token(&self, connector: &SharedConnector) -> Result<AuthToken> {
        let credentials = Credentials::new(&self.consumer_key, &self.consumer_secret);
        let mut tokens = TokenManager::new(Arc::clone(connector));
        Ok(tokens.acquire(&credentials).await?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    aab_telemetry::install("aab-session-probe", env!("CARGO_PKG_VERSION"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Bind {
            connector,
            phone,
            conversation_name,
        } => {
            let phone = normalize_phone(&phone).ok_or_else(|| anyhow!("invalid phone number"))?;
            let client = connector.connector();
            let token = connector.token(&client).await?;
            client
                .bind_conversation_name(&token, &phone, &conversation_name)
                .await?;
            println!("bound {phone} -> {conversation_name}");
            Ok(())
        }
        Commands::Release { connector, phone } => {
            let phone = normalize_phone(&phone).ok_or_else(|| anyhow!("invalid phone number"))?;
            let client = connector.connector();
            let token = connector.token(&client).await?;
            client.release_conversation_name(&token, &phone).await?;
            println!("released {phone}");
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = session_config(&args)?;
    let transcript = match &args.transcript {
        Some(path) => load_transcript(path).await?,
        None => Vec::new(),
    };
    let record_id = config.record_id.clone();

    let messages = LocalMessageService::shared();
    let deps = SessionDeps {
        connector: Arc::new(ReqwestConnector::new(reqwest::Client::new(), &config.endpoint)),
        messages: messages.clone(),
        widget_events: WidgetEventTarget::shared(),
        widget_host: Arc::new(StdoutWidgetHost),
        desktop: Arc::new(TerminalDesktop::new(transcript)),
        clipboard: Arc::new(StdoutClipboard),
    };

    let session = spawn_session(config, deps);
    info!(session_id = session.id(), record_id = %record_id, "session spawned");

    let settled = tokio::select! {
        state = session.wait_settled() => state,
        _ = tokio::signal::ctrl_c() => session.state(),
    };
    if let SessionState::Failed(err) = &settled {
        session.teardown();
        session.join().await?;
        bail!("{err}");
    }

    if settled == SessionState::Active {
        println!("session active; type messages (`agent: ...`, `end`), Ctrl-C to stop");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line(), if stdin_open => match line? {
                    Some(line) => publish_line(&messages, &record_id, &line),
                    None => stdin_open = false,
                },
            }
        }
    }

    session.teardown();
    let report = session.join().await?;
    print_report(&report);
    Ok(())
}

fn session_config(args: &RunArgs) -> Result<SessionConfig> {
    let mut config = SessionConfig::from_env().context("loading AAB_* settings")?;
    if let Some(record_id) = &args.record_id {
        config.record_id = record_id.clone();
    }
    if let Some(channel) = args.channel {
        config.channel = channel;
    }
    if let Some(phone) = &args.contact_phone {
        config.contact_phone = Some(phone.clone());
    }
    if args.debug {
        config.debug = true;
    }
    if let Some(secs) = args.poll_interval_secs {
        config.poll.interval = Duration::from_secs(secs.max(1));
    }
    if args.max_retries.is_some() {
        config.poll.max_retries = args.max_retries;
    }
    Ok(config)
}

async fn load_transcript(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading transcript {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing transcript {}", path.display()))
}

fn publish_line(messages: &LocalMessageService, record_id: &str, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (channel, content) = if line.eq_ignore_ascii_case("end") {
        (MessageChannel::ConversationEnded, "")
    } else if let Some(text) = line.strip_prefix("agent:") {
        (MessageChannel::AgentSend, text.trim())
    } else {
        (
            MessageChannel::EndUserMessage,
            line.strip_prefix("user:").map(str::trim).unwrap_or(line),
        )
    };
    let delivered = messages.publish(channel, &ChannelMessage::new(record_id, content));
    info!(channel = channel.api_name(), delivered, "message published");
}

fn print_report(report: &SessionReport) {
    println!("session report:");
    if let Some(name) = &report.conversation_name {
        println!("  conversation       : {name}");
    }
    println!("  token requests     : {}", report.token_requests);
    println!("  lookup attempts    : {}", report.lookup_attempts);
    println!("  retries            : {}", report.retries);
    println!("  participants       : {}", report.participants.len());
    if let Some(outcome) = report.reconciled {
        println!("  replayed messages  : {}", outcome.replayed);
    }
    println!("  suggestions        : {}", report.suggestions_inserted);
    println!("  clipboard writes   : {}", report.clipboard_writes);
    println!("  subscriptions freed: {}", report.subscriptions_released);
    println!("  listeners discarded: {}", report.listeners_discarded);
    if let Some(err) = &report.load_error {
        println!("  load error         : {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aab_orchestrator::{MessageService, SubscriptionScope};
    use std::sync::Mutex;

    #[test]
    fn stdin_lines_are_routed_by_prefix() {
        let messages = LocalMessageService::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for channel in MessageChannel::ALL {
            let sink = Arc::clone(&seen);
            messages.subscribe(
                channel,
                SubscriptionScope::Application,
                Arc::new(move |message: &ChannelMessage| {
                    sink.lock().unwrap().push((channel, message.content.clone()));
                }),
            );
        }

        publish_line(&messages, "001xyz", "agent: Hello there");
        publish_line(&messages, "001xyz", "user: hi");
        publish_line(&messages, "001xyz", "where is my parcel");
        publish_line(&messages, "001xyz", "   ");
        publish_line(&messages, "001xyz", "END");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (MessageChannel::AgentSend, "Hello there".to_string()),
                (MessageChannel::EndUserMessage, "hi".to_string()),
                (MessageChannel::EndUserMessage, "where is my parcel".to_string()),
                (MessageChannel::ConversationEnded, String::new()),
            ]
        );
    }
}
