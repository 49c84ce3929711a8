use std::cell::{Cell, RefCell};
use std::fmt;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::credentials::Credentials;
use crate::machine::ConversationIdentity;

/// Opaque token the messaging service hands out for a live conversation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("SessionToken(..)")
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
pub type ReadyCallback = Box<dyn FnMut(ConversationIdentity)>;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("failed to initialize messaging client on `{stage}`: {details}"))]
    Initialize {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to start conversation {identity} on `{stage}`: {details}"))]
    StartConversation {
        stage: &'static str,
        identity: ConversationIdentity,
        details: String,
    },
    #[snafu(display("failed to end conversation on `{stage}`: {details}"))]
    EndConversation {
        stage: &'static str,
        details: String,
    },
}

/// Boundary to the messaging service. The widget only calls it.
///
/// Futures are local: the browser promises behind them are not `Send`, and the
/// widget runs on a single event loop.
pub trait MessagingClient {
    fn initialize(&self, credentials: &Credentials) -> ClientResult<()>;
    fn start_conversation(
        &self,
        identity: ConversationIdentity,
    ) -> LocalBoxFuture<'static, ClientResult<SessionToken>>;
    fn end_conversation(&self) -> LocalBoxFuture<'static, ClientResult<()>>;
    /// Registers the callback the rendered conversation UI invokes once it is usable.
    fn on_ready(&self, callback: ReadyCallback);
}

/// One recorded call made against a [`LoopbackClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Initialize(Credentials),
    StartConversation(ConversationIdentity),
    EndConversation,
}

/// In-process client that answers immediately and records every call.
///
/// Used by native hosts without a messaging backend and by the QA runner.
#[derive(Default)]
pub struct LoopbackClient {
    calls: RefCell<Vec<ClientCall>>,
    ready_callbacks: RefCell<Vec<ReadyCallback>>,
    fail_initialize: Cell<bool>,
    fail_start: Cell<bool>,
    fail_end: Cell<bool>,
    ready_on_start: Cell<bool>,
}

impl LoopbackClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.set(fail);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.set(fail);
    }

    pub fn fail_end(&self, fail: bool) {
        self.fail_end.set(fail);
    }

    /// Fires the ready callbacks from inside `start_conversation`, before it returns.
    pub fn ready_on_start(&self, enabled: bool) {
        self.ready_on_start.set(enabled);
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, call: &ClientCall) -> usize {
        self.calls.borrow().iter().filter(|made| *made == call).count()
    }

    pub fn end_calls(&self) -> usize {
        self.count(&ClientCall::EndConversation)
    }

    /// Invokes every registered ready callback, as a rendered conversation UI would.
    pub fn fire_ready(&self, identity: ConversationIdentity) {
        for callback in self.ready_callbacks.borrow_mut().iter_mut() {
            callback(identity);
        }
    }
}

impl MessagingClient for LoopbackClient {
    fn initialize(&self, credentials: &Credentials) -> ClientResult<()> {
        self.calls
            .borrow_mut()
            .push(ClientCall::Initialize(credentials.clone()));
        if self.fail_initialize.get() {
            return InitializeSnafu {
                stage: "loopback-initialize",
                details: "initialization disabled".to_string(),
            }
            .fail();
        }
        Ok(())
    }

    fn start_conversation(
        &self,
        identity: ConversationIdentity,
    ) -> LocalBoxFuture<'static, ClientResult<SessionToken>> {
        self.calls
            .borrow_mut()
            .push(ClientCall::StartConversation(identity));
        let result = if self.fail_start.get() {
            StartConversationSnafu {
                stage: "loopback-start-conversation",
                identity,
                details: "service unreachable".to_string(),
            }
            .fail()
        } else {
            Ok(SessionToken::new(format!("loopback-token-{identity}")))
        };
        if self.ready_on_start.get() {
            self.fire_ready(identity);
        }
        async move { result }.boxed_local()
    }

    fn end_conversation(&self) -> LocalBoxFuture<'static, ClientResult<()>> {
        self.calls.borrow_mut().push(ClientCall::EndConversation);
        let result = if self.fail_end.get() {
            EndConversationSnafu {
                stage: "loopback-end-conversation",
                details: "service unreachable".to_string(),
            }
            .fail()
        } else {
            Ok(())
        };
        async move { result }.boxed_local()
    }

    fn on_ready(&self, callback: ReadyCallback) {
        self.ready_callbacks.borrow_mut().push(callback);
    }
}
