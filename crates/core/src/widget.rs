use std::cell::RefCell;
use std::rc::Rc;

use chatdock_storage::{SessionField, SessionStore};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use snafu::{Snafu, ensure};

use crate::bootstrap::{Bootstrapper, SessionSource, initialize_session, persist_credentials};
use crate::client::{ClientResult, MessagingClient, SessionToken};
use crate::config::WidgetConfig;
use crate::credentials::{CredentialError, Credentials, validate_credentials};
use crate::machine::{
    ConversationIdentity, ConversationMachine, ConversationPhase, PrimaryTransition,
    TransitionRejection, Visibility,
};

pub const MINIMIZE_TITLE: &str = "Minimize chat";
pub const END_CONVERSATION_TITLE: &str = "End conversation";
pub const CLOSE_WINDOW_TITLE: &str = "Close window";

/// Message the host should surface to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Notice {
    InvalidCredentials(String),
    ConnectionFailed(String),
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WidgetError {
    #[snafu(display("{source}"))]
    InvalidCredentials { source: CredentialError },
    #[snafu(display("a messaging session is already established on this page"))]
    SessionEstablished,
}

pub type WidgetResult<T> = Result<T, WidgetError>;

/// Snapshot the host renders from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WidgetState {
    pub visibility: Visibility,
    pub busy: bool,
    pub form_visible: bool,
    pub button_visible: bool,
    pub button_enabled: bool,
    pub has_existing_conversation: bool,
    pub conversation_closed: bool,
    pub conversation_identity: Option<ConversationIdentity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderTitles {
    pub minimize: &'static str,
    pub close: &'static str,
}

/// A conversation start the host must drive to completion.
pub struct ConversationStart {
    pub identity: ConversationIdentity,
    pub pending: LocalBoxFuture<'static, ClientResult<SessionToken>>,
}

impl ConversationStart {
    /// Awaits the client and applies the result. The widget is not borrowed
    /// while the client works.
    pub async fn settle(self, widget: &RefCell<Widget>) -> bool {
        let Self { identity, pending } = self;
        let result = pending.await;
        widget.borrow_mut().conversation_started(identity, result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredReason {
    NoSession,
    /// The client rejected the credentials again; nothing was started.
    ClientNotInitialized,
    Rejected(TransitionRejection),
}

pub enum PrimaryAction {
    Opening(ConversationStart),
    Restored(ConversationIdentity),
    Minimized(ConversationIdentity),
    Ignored(IgnoredReason),
}

/// Widget controller: owns the session store, the machine, and the client handle.
///
/// Every event runs to completion on one thread. Client work is returned as a
/// future that only calls the client once polled, so the client is never invoked
/// while the widget is borrowed; its result comes back through
/// [`Widget::conversation_started`].
pub struct Widget {
    bootstrapper: Bootstrapper,
    store: Option<SessionStore>,
    client: Rc<dyn MessagingClient>,
    credentials: Option<Credentials>,
    source: SessionSource,
    machine: ConversationMachine,
    client_initialized: bool,
    // Ready signals that arrived while the widget was already borrowed.
    deferred_ready: Rc<RefCell<Vec<ConversationIdentity>>>,
    auto_open_pending: bool,
    notice: Option<Notice>,
}

impl Widget {
    pub fn new(
        config: WidgetConfig,
        store: Option<SessionStore>,
        client: Rc<dyn MessagingClient>,
    ) -> Self {
        match store.as_ref() {
            Some(store) => tracing::info!("session storage backend: {}", store.backend_name()),
            None => tracing::warn!("no usable session storage; sessions will not survive a reload"),
        }

        Self {
            bootstrapper: Bootstrapper::new(config),
            store,
            client,
            credentials: None,
            source: SessionSource::Fresh,
            machine: ConversationMachine::new(),
            client_initialized: false,
            deferred_ready: Rc::new(RefCell::new(Vec::new())),
            auto_open_pending: false,
            notice: None,
        }
    }

    /// Routes ready signals from the client back into `widget`.
    ///
    /// A signal raised while the widget is busy handling another event is queued
    /// and applied by the next event.
    pub fn connect_ready(widget: &Rc<RefCell<Self>>) {
        let (client, deferred) = {
            let widget = widget.borrow();
            (Rc::clone(&widget.client), Rc::clone(&widget.deferred_ready))
        };
        let weak = Rc::downgrade(widget);
        client.on_ready(Box::new(move |identity| {
            let Some(widget) = weak.upgrade() else {
                return;
            };
            let Ok(mut widget) = widget.try_borrow_mut() else {
                tracing::debug!("deferring ready signal for conversation {}", identity);
                deferred.borrow_mut().push(identity);
                return;
            };
            widget.conversation_ready(identity);
        }));
    }

    /// Adopts a session at page load. Returns the start to drive when a persisted
    /// conversation is resumed.
    pub fn bootstrap(&mut self) -> Option<ConversationStart> {
        let outcome = self
            .bootstrapper
            .run(self.store.as_mut(), self.client.as_ref());

        self.credentials = outcome.credentials;
        self.source = outcome.source;
        self.client_initialized = outcome.client_initialized;
        if outcome.notice.is_some() {
            self.notice = outcome.notice;
        }
        self.auto_open_pending =
            outcome.source == SessionSource::AutoConnect && !outcome.has_existing_conversation;

        if !outcome.has_existing_conversation {
            return None;
        }
        if !self.ensure_client_initialized() {
            tracing::warn!(
                "not resuming the persisted conversation; the messaging client is not initialized"
            );
            return None;
        }

        match self.machine.resume() {
            Ok(identity) => {
                tracing::info!("resuming persisted conversation as {}", identity);
                Some(self.start(identity))
            }
            Err(rejection) => {
                tracing::debug!("resume ignored: {:?}", rejection);
                None
            }
        }
    }

    /// Handles the credential form. Invalid input leaves every state untouched.
    pub fn submit_credentials(&mut self, credentials: Credentials) -> WidgetResult<()> {
        ensure!(self.credentials.is_none(), SessionEstablishedSnafu);

        let credentials = credentials.normalized();
        if let Err(source) = validate_credentials(&credentials) {
            self.notice = Some(Notice::InvalidCredentials(source.to_string()));
            return Err(WidgetError::InvalidCredentials { source });
        }

        let initialized =
            initialize_session(self.store.as_mut(), self.client.as_ref(), &credentials);
        self.client_initialized = initialized.is_ok();
        if let Err(error) = initialized {
            tracing::warn!("messaging client rejected credentials: {}", error);
            self.notice = Some(Notice::ConnectionFailed(error.to_string()));
        }

        tracing::info!(
            "session established for deployment '{}'",
            credentials.deployment_developer_name
        );
        self.credentials = Some(credentials);
        self.source = SessionSource::Submitted;
        Ok(())
    }

    pub fn primary_action(&mut self) -> PrimaryAction {
        if self.credentials.is_none() {
            return PrimaryAction::Ignored(IgnoredReason::NoSession);
        }
        self.auto_open_pending = false;
        self.apply_deferred_ready();

        if self.machine.primary_action_opens() && !self.ensure_client_initialized() {
            return PrimaryAction::Ignored(IgnoredReason::ClientNotInitialized);
        }

        match self.machine.primary_action() {
            Ok(PrimaryTransition::Opening(identity)) => {
                tracing::info!("opening conversation {}", identity);
                PrimaryAction::Opening(self.start(identity))
            }
            Ok(PrimaryTransition::Restored(identity)) => PrimaryAction::Restored(identity),
            Ok(PrimaryTransition::Minimized(identity)) => {
                tracing::debug!("minimized conversation {}", identity);
                PrimaryAction::Minimized(identity)
            }
            Err(rejection) => {
                tracing::debug!("primary action ignored: {:?}", rejection);
                PrimaryAction::Ignored(IgnoredReason::Rejected(rejection))
            }
        }
    }

    /// Header minimize control. The conversation keeps running.
    pub fn minimize_request(&mut self) -> Option<ConversationIdentity> {
        self.apply_deferred_ready();
        match self.machine.minimize() {
            Ok(identity) => Some(identity),
            Err(rejection) => {
                tracing::debug!("minimize ignored: {:?}", rejection);
                None
            }
        }
    }

    /// Header close control. Returns the remote end call to drive when a
    /// conversation was live; its failure is logged and never blocks the close.
    pub fn close_request(&mut self) -> Option<LocalBoxFuture<'static, ()>> {
        self.apply_deferred_ready();
        let outcome = self.machine.close();
        self.auto_open_pending = false;
        self.clear_conversation();

        if !outcome.was_live {
            tracing::debug!("closed with no live conversation");
            return None;
        }

        let identity = outcome.identity;
        let client = Rc::clone(&self.client);
        Some(
            async move {
                match client.end_conversation().await {
                    Ok(()) => tracing::info!("ended conversation {:?}", identity),
                    Err(error) => {
                        tracing::warn!("failed to end conversation {:?}: {}", identity, error)
                    }
                }
            }
            .boxed_local(),
        )
    }

    pub fn conversation_ready(&mut self, identity: ConversationIdentity) -> bool {
        match self.machine.ready(identity) {
            Ok(()) => true,
            Err(rejection) => {
                tracing::debug!("ready signal ignored: {:?}", rejection);
                false
            }
        }
    }

    /// Applies a start result. Results for a superseded conversation are dropped.
    pub fn conversation_started(
        &mut self,
        identity: ConversationIdentity,
        result: ClientResult<SessionToken>,
    ) -> bool {
        self.apply_deferred_ready();
        if !self.machine.is_live(identity) {
            tracing::debug!("dropping start result for superseded conversation {}", identity);
            return false;
        }

        match result {
            Ok(token) => {
                if let Some(store) = self.store.as_ref()
                    && let Err(error) = store.set(SessionField::SessionToken, token.as_str())
                {
                    tracing::warn!("failed to persist session token: {}", error);
                }
            }
            Err(error) => {
                tracing::warn!("conversation {} failed to start: {}", identity, error);
                if let Err(rejection) = self.machine.start_failed(identity) {
                    tracing::debug!("start failure ignored: {:?}", rejection);
                }
                self.notice = Some(Notice::ConnectionFailed(error.to_string()));
            }
        }
        true
    }

    /// The service ended the conversation; a reload must not resume it.
    pub fn conversation_ended(&mut self, identity: ConversationIdentity) -> bool {
        self.apply_deferred_ready();
        if let Err(rejection) = self.machine.remote_ended(identity) {
            tracing::debug!("end signal ignored: {:?}", rejection);
            return false;
        }

        if let Some(store) = self.store.as_ref()
            && let Err(error) = store.unset(SessionField::SessionToken)
        {
            tracing::warn!("failed to clear session token: {}", error);
        }
        true
    }

    /// The launcher button finished loading. Auto-connected sessions open once.
    pub fn button_ready(&mut self) -> Option<ConversationStart> {
        if !self.auto_open_pending || self.machine.phase() != ConversationPhase::NotStarted {
            return None;
        }
        self.auto_open_pending = false;

        match self.primary_action() {
            PrimaryAction::Opening(start) => Some(start),
            _ => None,
        }
    }

    pub fn state(&self) -> WidgetState {
        let phase = self.machine.phase();
        let session_ready = self.credentials.is_some();
        WidgetState {
            visibility: phase.visibility(),
            busy: phase.is_busy(),
            form_visible: !session_ready,
            button_visible: session_ready,
            button_enabled: session_ready && !phase.is_busy(),
            has_existing_conversation: self.machine.has_live_conversation(),
            conversation_closed: self.machine.conversation_closed(),
            conversation_identity: phase.identity(),
        }
    }

    pub fn header_titles(&self) -> HeaderTitles {
        HeaderTitles {
            minimize: MINIMIZE_TITLE,
            close: if self.machine.has_live_conversation() {
                END_CONVERSATION_TITLE
            } else {
                CLOSE_WINDOW_TITLE
            },
        }
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn source(&self) -> SessionSource {
        self.source
    }

    pub fn phase(&self) -> ConversationPhase {
        self.machine.phase()
    }

    pub fn store(&self) -> Option<&SessionStore> {
        self.store.as_ref()
    }

    fn start(&mut self, identity: ConversationIdentity) -> ConversationStart {
        self.notice = None;
        let client = Rc::clone(&self.client);
        ConversationStart {
            identity,
            pending: async move { client.start_conversation(identity).await }.boxed_local(),
        }
    }

    // Retries a client initialization that failed earlier.
    fn ensure_client_initialized(&mut self) -> bool {
        if self.client_initialized {
            return true;
        }
        let Some(credentials) = self.credentials.clone() else {
            return false;
        };

        match initialize_session(self.store.as_mut(), self.client.as_ref(), &credentials) {
            Ok(()) => {
                tracing::info!("messaging client initialized on retry");
                self.client_initialized = true;
                true
            }
            Err(error) => {
                tracing::warn!("messaging client still rejects credentials: {}", error);
                self.notice = Some(Notice::ConnectionFailed(error.to_string()));
                false
            }
        }
    }

    fn apply_deferred_ready(&mut self) {
        let pending: Vec<ConversationIdentity> =
            self.deferred_ready.borrow_mut().drain(..).collect();
        for identity in pending {
            self.conversation_ready(identity);
        }
    }

    // Drops the payload, token included, and writes the deployment identity back.
    fn clear_conversation(&mut self) {
        let (Some(store), Some(credentials)) = (self.store.as_mut(), self.credentials.as_ref())
        else {
            return;
        };

        if let Err(error) = store.remove() {
            tracing::warn!("failed to remove session payload: {}", error);
            return;
        }
        if let Err(error) = persist_credentials(store, credentials) {
            tracing::warn!("failed to restore session credentials: {}", error);
        }
    }
}
