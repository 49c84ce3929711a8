use std::cell::RefCell;

use chatdock_core::{
    ClientError, ClientResult, ConversationIdentity, Credentials, MessagingClient, ReadyCallback,
    SessionToken,
};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::storage::describe;

#[wasm_bindgen]
extern "C" {
    /// Messaging client object supplied by the embedding page.
    pub type JsMessagingClient;

    #[wasm_bindgen(method, catch)]
    fn initialize(this: &JsMessagingClient, credentials: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = startConversation)]
    fn start_conversation(
        this: &JsMessagingClient,
        identity: f64,
    ) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(method, catch, js_name = endConversation)]
    fn end_conversation(this: &JsMessagingClient) -> Result<js_sys::Promise, JsValue>;

    #[wasm_bindgen(method, js_name = onReady)]
    fn on_ready(this: &JsMessagingClient, callback: &js_sys::Function);
}

// Largest integer a JS number represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Converts an identity handed over by the page. Values that are not
/// non-negative whole numbers are logged and dropped.
pub(crate) fn identity_from_js(raw: f64) -> Option<ConversationIdentity> {
    if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 || raw > MAX_SAFE_INTEGER {
        log::warn!("ignoring invalid conversation identity from the page: {}", raw);
        return None;
    }
    Some(ConversationIdentity::new(raw as u64))
}

/// Adapts the page's client object to [`MessagingClient`].
pub struct BridgeClient {
    inner: JsMessagingClient,
    // Kept alive for as long as the page may call them.
    ready_closures: RefCell<Vec<Closure<dyn FnMut(f64)>>>,
}

impl BridgeClient {
    pub fn new(inner: JsMessagingClient) -> Self {
        Self {
            inner,
            ready_closures: RefCell::new(Vec::new()),
        }
    }
}

impl MessagingClient for BridgeClient {
    fn initialize(&self, credentials: &Credentials) -> ClientResult<()> {
        let value =
            serde_wasm_bindgen::to_value(credentials).map_err(|error| ClientError::Initialize {
                stage: "bridge-encode-credentials",
                details: error.to_string(),
            })?;

        self.inner
            .initialize(value)
            .map_err(|error| ClientError::Initialize {
                stage: "bridge-initialize",
                details: describe(&error),
            })
    }

    fn start_conversation(
        &self,
        identity: ConversationIdentity,
    ) -> LocalBoxFuture<'static, ClientResult<SessionToken>> {
        let started = self.inner.start_conversation(identity.get() as f64);
        async move {
            let promise = started.map_err(|error| ClientError::StartConversation {
                stage: "bridge-start-conversation",
                identity,
                details: describe(&error),
            })?;

            let resolved =
                JsFuture::from(promise)
                    .await
                    .map_err(|error| ClientError::StartConversation {
                        stage: "bridge-start-conversation-await",
                        identity,
                        details: describe(&error),
                    })?;

            resolved
                .as_string()
                .map(SessionToken::new)
                .ok_or_else(|| ClientError::StartConversation {
                    stage: "bridge-start-conversation-token",
                    identity,
                    details: "startConversation resolved without a token string".to_string(),
                })
        }
        .boxed_local()
    }

    fn end_conversation(&self) -> LocalBoxFuture<'static, ClientResult<()>> {
        let ended = self.inner.end_conversation();
        async move {
            let promise = ended.map_err(|error| ClientError::EndConversation {
                stage: "bridge-end-conversation",
                details: describe(&error),
            })?;

            JsFuture::from(promise)
                .await
                .map(|_| ())
                .map_err(|error| ClientError::EndConversation {
                    stage: "bridge-end-conversation-await",
                    details: describe(&error),
                })
        }
        .boxed_local()
    }

    fn on_ready(&self, mut callback: ReadyCallback) {
        let closure = Closure::wrap(Box::new(move |identity: f64| {
            if let Some(identity) = identity_from_js(identity) {
                callback(identity);
            }
        }) as Box<dyn FnMut(f64)>);

        self.inner.on_ready(closure.as_ref().unchecked_ref());
        self.ready_closures.borrow_mut().push(closure);
    }
}
