//! Session lifecycle controller.
//!
//! One tokio task owns all state of a session and processes one input at a
//! time: host commands, widget commands and the voice retry timer.

use std::{
    future::{self, Future},
    pin::Pin,
    sync::Arc,
};

use metrics::counter;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Sleep, sleep},
};
use tracing::{Instrument, Span, debug, info, warn};
use uuid::Uuid;

use crate::{
    bridge::{BridgeContext, SessionGate, initialization_event, summarization_event},
    channels::SharedMessageService,
    config::{ChannelType, SessionConfig},
    connector::SharedConnector,
    desktop::{SharedAgentDesktop, SharedClipboard},
    error::{LoadError, SessionError},
    identity::{ConversationName, IdentityError, IdentityRequest, IdentityResolver, Resolution},
    messaging_bridge::MessagingBridge,
    reconcile::{ReconcileOutcome, reconcile_conversation_log},
    telemetry::{record_state, span_for_session},
    token::TokenManager,
    widget::{SharedWidgetEvents, SharedWidgetHost, WidgetConfig},
    widget_bridge::{ConversationParticipant, WidgetBridge, WidgetCommand},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityPhase {
    Pending { retries: u32 },
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AcquiringToken,
    ResolvingIdentity(IdentityPhase),
    Active,
    TornDown,
    Failed(LoadError),
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AcquiringToken => "acquiring_token",
            SessionState::ResolvingIdentity(IdentityPhase::Pending { .. }) => "resolving_pending",
            SessionState::ResolvingIdentity(IdentityPhase::Resolved) => "resolving_resolved",
            SessionState::Active => "active",
            SessionState::TornDown => "torn_down",
            SessionState::Failed(_) => "failed",
        }
    }

    /// Active or terminal; nothing further happens without host input.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SessionState::Active | SessionState::TornDown | SessionState::Failed(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::TornDown | SessionState::Failed(_))
    }
}

/// Host collaborators a session runs against.
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: SharedConnector,
    pub messages: SharedMessageService,
    pub widget_events: SharedWidgetEvents,
    pub widget_host: SharedWidgetHost,
    pub desktop: SharedAgentDesktop,
    pub clipboard: SharedClipboard,
}

/// Summary returned when the session task finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub token_requests: u32,
    pub lookup_attempts: u32,
    pub retries: u32,
    pub conversation_name: Option<ConversationName>,
    pub participants: Vec<ConversationParticipant>,
    pub reconciled: Option<ReconcileOutcome>,
    pub suggestions_inserted: u32,
    pub clipboard_writes: u32,
    pub mapping_released: bool,
    pub load_error: Option<LoadError>,
    pub subscriptions_released: usize,
    pub listeners_discarded: usize,
}

#[derive(Debug)]
enum HostCommand {
    Teardown,
}

pub struct SessionHandle {
    id: String,
    commands: mpsc::UnboundedSender<HostCommand>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Resolves with the first state matching `predicate`, or the last state
    /// once the session task has finished.
    pub async fn wait_until<F>(&self, mut predicate: F) -> SessionState
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut state = self.state.clone();
        let matched = state
            .wait_for(|current| predicate(current))
            .await
            .map(|current| current.clone());
        match matched {
            Ok(current) => current,
            Err(_) => state.borrow().clone(),
        }
    }

    pub async fn wait_settled(&self) -> SessionState {
        self.wait_until(SessionState::is_settled).await
    }

    /// Requests teardown. Safe to call any number of times.
    pub fn teardown(&self) {
        let _ = self.commands.send(HostCommand::Teardown);
    }

    pub async fn join(self) -> Result<SessionReport, SessionError> {
        Ok(self.task.await?)
    }
}

/// Starts a session on the current tokio runtime.
pub fn spawn_session(config: SessionConfig, deps: SessionDeps) -> SessionHandle {
    let id = Uuid::new_v4().to_string();
    let (state_tx, state_rx) = watch::channel(SessionState::Idle);
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let span = span_for_session(&id, &config);
    let controller =
        SessionController::new(id.clone(), config, deps, state_tx, host_rx, span.clone());
    let task = tokio::spawn(controller.run().instrument(span));
    SessionHandle {
        id,
        commands: host_tx,
        state: state_rx,
        task,
    }
}

struct SessionController {
    id: String,
    config: SessionConfig,
    deps: SessionDeps,
    state: watch::Sender<SessionState>,
    host: mpsc::UnboundedReceiver<HostCommand>,
    span: Span,
    tokens: TokenManager,
    resolver: IdentityResolver,
    retry: Option<Pin<Box<Sleep>>>,
    gate: SessionGate,
    context: Option<Arc<BridgeContext>>,
    messaging: Option<MessagingBridge>,
    widget: Option<WidgetBridge>,
    widget_tx: mpsc::UnboundedSender<WidgetCommand>,
    widget_rx: mpsc::UnboundedReceiver<WidgetCommand>,
    report: SessionReport,
    torn_down: bool,
}

impl SessionController {
    fn new(
        id: String,
        config: SessionConfig,
        deps: SessionDeps,
        state: watch::Sender<SessionState>,
        host: mpsc::UnboundedReceiver<HostCommand>,
        span: Span,
    ) -> Self {
        let (widget_tx, widget_rx) = mpsc::unbounded_channel();
        Self {
            id,
            tokens: TokenManager::new(Arc::clone(&deps.connector)),
            resolver: IdentityResolver::new(Arc::clone(&deps.connector)),
            config,
            deps,
            state,
            host,
            span,
            retry: None,
            gate: SessionGate::new(),
            context: None,
            messaging: None,
            widget: None,
            widget_tx,
            widget_rx,
            report: SessionReport::default(),
            torn_down: false,
        }
    }

    async fn run(mut self) -> SessionReport {
        self.start().await;
        while !self.torn_down {
            tokio::select! {
                biased;
                command = self.host.recv() => match command {
                    Some(HostCommand::Teardown) | None => self.teardown(),
                },
                () = retry_elapsed(&mut self.retry) => self.on_retry().await,
                Some(command) = self.widget_rx.recv() => self.on_widget_command(command).await,
            }
        }
        self.report
    }

    async fn start(&mut self) {
        info!(session_id = %self.id, "session starting");
        self.transition(SessionState::AcquiringToken);
        if self.config.credentials.is_complete() {
            self.report.token_requests += 1;
        }
        let acquired = unless_torn_down(
            &mut self.host,
            self.tokens.acquire(&self.config.credentials),
        )
        .await;
        match acquired {
            None => self.teardown(),
            Some(Err(err)) => self.fail(LoadError::authorization(&err)),
            Some(Ok(_)) => self.resolve_identity().await,
        }
    }

    async fn resolve_identity(&mut self) {
        self.transition(SessionState::ResolvingIdentity(IdentityPhase::Pending {
            retries: self.report.retries,
        }));
        if self.config.channel == ChannelType::Voice {
            self.report.lookup_attempts += 1;
            counter!("assist_identity_lookups_total").increment(1);
        }

        let outcome = {
            let request = IdentityRequest {
                channel: self.config.channel,
                record_id: &self.config.record_id,
                conversation_profile: &self.config.conversation_profile,
                token: self.tokens.current(),
                contact_phone: self.config.contact_phone.as_deref(),
            };
            unless_torn_down(&mut self.host, self.resolver.resolve(&request)).await
        };
        let Some(outcome) = outcome else {
            self.teardown();
            return;
        };

        match outcome {
            Ok(Resolution::Resolved(name)) => {
                self.transition(SessionState::ResolvingIdentity(IdentityPhase::Resolved));
                self.activate(name);
            }
            Ok(Resolution::Pending) => self.schedule_retry(),
            Err(IdentityError::Lookup(err)) => {
                warn!(error = %err, "conversation lookup failed");
                self.schedule_retry();
            }
            Err(IdentityError::Configuration(reason)) => {
                let err = LoadError::invalid_profile(&self.config.conversation_profile, reason);
                self.fail(err);
            }
            Err(IdentityError::MissingContactPhone) => self.fail(LoadError::MissingContactPhone),
            Err(err @ IdentityError::MissingToken) => {
                self.fail(LoadError::Authorization(err.to_string()))
            }
        }
    }

    /// Arms the single retry timer, or fails once the retry budget is spent.
    fn schedule_retry(&mut self) {
        let retries = self.report.retries;
        if self.config.poll.max_retries.is_some_and(|max| retries >= max) {
            self.fail(LoadError::IdentityUnavailable { retries });
            return;
        }
        debug!(
            attempt = retries + 1,
            interval = ?self.config.poll.interval,
            "conversation not yet available, retry scheduled"
        );
        self.retry = Some(Box::pin(sleep(self.config.poll.interval)));
    }

    async fn on_retry(&mut self) {
        self.retry = None;
        self.report.retries += 1;
        counter!("assist_identity_retries_total").increment(1);
        self.resolve_identity().await;
    }

    fn activate(&mut self, name: ConversationName) {
        self.retry = None;
        let Some(token) = self.tokens.current().cloned() else {
            self.fail(LoadError::Authorization("no token available".into()));
            return;
        };

        if self.config.debug {
            if let Err(err) = self.deps.widget_host.attach_transcript(&self.config.record_id) {
                warn!(error = %format!("{err:#}"), "transcript surface unavailable");
            }
        }

        let ctx = Arc::new(BridgeContext {
            record_id: self.config.record_id.clone(),
            conversation_name: name.clone(),
            features: self.config.features.clone(),
            debug: self.config.debug,
            gate: self.gate.clone(),
            events: Arc::clone(&self.deps.widget_events),
            owner: self.id.clone(),
        });
        self.gate.open();
        self.widget = Some(WidgetBridge::activate(
            Arc::clone(&ctx),
            self.config.channel,
            self.widget_tx.clone(),
        ));
        self.messaging = Some(MessagingBridge::activate(
            Arc::clone(&self.deps.messages),
            Arc::clone(&ctx),
        ));
        self.context = Some(ctx);

        let widget = WidgetConfig::build(&self.config, &name, token);
        if let Err(err) = self.deps.widget_host.activate(&widget) {
            self.release_bridges();
            self.fail(LoadError::Widget(format!("{err:#}")));
            return;
        }

        counter!(
            "assist_sessions_activated_total",
            "channel" => self.config.channel.as_str()
        )
        .increment(1);
        info!(conversation = %name, "session active");
        self.report.conversation_name = Some(name);
        self.transition(SessionState::Active);
    }

    async fn on_widget_command(&mut self, command: WidgetCommand) {
        let Some(ctx) = self.context.clone() else {
            return;
        };
        if !ctx.gate.is_open() {
            return;
        }
        match command {
            WidgetCommand::Bootstrap => {
                ctx.dispatch(initialization_event(ctx.namespace(), &ctx.conversation_name));
            }
            WidgetCommand::ConversationInitialized { participants } => {
                debug!(participants = participants.len(), "conversation initialized");
                self.report.participants = participants;
                if self.config.channel == ChannelType::Chat {
                    self.reconcile(&ctx).await;
                }
            }
            WidgetCommand::InsertSuggestion { source, text } => {
                let inserted = unless_torn_down(
                    &mut self.host,
                    self.deps
                        .desktop
                        .set_agent_input(&self.config.record_id, &text),
                )
                .await;
                match inserted {
                    None => self.teardown(),
                    Some(Ok(())) => self.report.suggestions_inserted += 1,
                    Some(Err(err)) => {
                        warn!(?source, error = %format!("{err:#}"), "could not insert suggestion")
                    }
                }
            }
            WidgetCommand::CopyToClipboard { text } => {
                let written =
                    unless_torn_down(&mut self.host, self.deps.clipboard.write_text(&text)).await;
                match written {
                    None => self.teardown(),
                    Some(Ok(())) => self.report.clipboard_writes += 1,
                    Some(Err(err)) => warn!(error = %format!("{err:#}"), "clipboard write failed"),
                }
            }
            WidgetCommand::ConversationCompleted => {
                ctx.dispatch(summarization_event(ctx.namespace(), &ctx.conversation_name));
                self.release_mapping().await;
            }
        }
    }

    async fn reconcile(&mut self, ctx: &BridgeContext) {
        let Some(token) = self.tokens.current().cloned() else {
            return;
        };
        let reconciled = unless_torn_down(
            &mut self.host,
            reconcile_conversation_log(ctx, &self.deps.desktop, &self.deps.connector, &token),
        )
        .await;
        match reconciled {
            None => self.teardown(),
            Some(Ok(outcome)) => self.report.reconciled = Some(outcome),
            Some(Err(err)) => warn!(error = %err, "conversation log reconciliation failed"),
        }
    }

    async fn release_mapping(&mut self) {
        let (Some(token), Some(phone)) = (self.tokens.current(), self.config.contact_phone.as_deref())
        else {
            return;
        };
        let released = unless_torn_down(&mut self.host, self.resolver.release(token, phone)).await;
        match released {
            None => self.teardown(),
            Some(Ok(())) => {
                info!("conversation mapping released");
                self.report.mapping_released = true;
            }
            Some(Err(err)) => warn!(error = %err, "conversation mapping release failed"),
        }
    }

    /// Cancels the retry timer, then releases the messaging subscriptions and
    /// the widget registrations. Only the first call has any effect.
    fn teardown(&mut self) {
        if std::mem::replace(&mut self.torn_down, true) {
            return;
        }
        self.gate.close();
        self.retry = None;
        self.release_bridges();
        self.context = None;
        self.tokens.clear();
        counter!("assist_session_teardowns_total").increment(1);
        info!(
            subscriptions = self.report.subscriptions_released,
            listeners = self.report.listeners_discarded,
            "session torn down"
        );
        let failed = matches!(*self.state.borrow(), SessionState::Failed(_));
        if !failed {
            self.transition(SessionState::TornDown);
        }
    }

    fn release_bridges(&mut self) {
        self.gate.close();
        if let Some(mut messaging) = self.messaging.take() {
            self.report.subscriptions_released += messaging.unsubscribe();
        }
        if let Some(mut widget) = self.widget.take() {
            self.report.listeners_discarded += widget.discard();
        }
    }

    /// Records the single load error; later failures are ignored.
    fn fail(&mut self, err: LoadError) {
        self.retry = None;
        if self.report.load_error.is_some() {
            return;
        }
        counter!("assist_session_failures_total").increment(1);
        warn!(error = %err, "session failed to load");
        self.report.load_error = Some(err.clone());
        self.transition(SessionState::Failed(err));
    }

    fn transition(&self, next: SessionState) {
        record_state(&self.span, next.label());
        debug!(state = next.label(), "session state");
        self.state.send_replace(next);
    }
}

/// Drives `step` unless the host asks for teardown first, in which case the
/// step is dropped and `None` is returned.
async fn unless_torn_down<F: Future>(
    host: &mut mpsc::UnboundedReceiver<HostCommand>,
    step: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = host.recv() => None,
        output = step => Some(output),
    }
}

async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}
