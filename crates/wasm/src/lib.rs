use std::cell::RefCell;
use std::rc::Rc;

use chatdock_core::{ConversationStart, Credentials, PrimaryAction, Widget, WidgetConfig};
use serde::Deserialize;
use wasm_bindgen::prelude::*;

mod client;
mod storage;

use client::identity_from_js;

pub use client::{BridgeClient, JsMessagingClient};
pub use storage::{BrowserStorage, BrowserStorageKind, open_session_store};

/// Values typed into the credential form.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialForm {
    #[serde(default)]
    organization_id: String,
    #[serde(default)]
    deployment_developer_name: String,
    #[serde(default)]
    messaging_url: String,
}

impl From<CredentialForm> for Credentials {
    fn from(form: CredentialForm) -> Self {
        Credentials::new(
            form.organization_id,
            form.deployment_developer_name,
            form.messaging_url,
        )
    }
}

/// Initialize WASM module
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("chatdock widget module initialized");
}

/// True when every form field has a non-blank value, i.e. submit may be enabled.
#[wasm_bindgen(js_name = isSubmittable)]
pub fn is_submittable(form: JsValue) -> bool {
    serde_wasm_bindgen::from_value::<CredentialForm>(form)
        .map(|form| Credentials::from(form).normalized().is_complete())
        .unwrap_or(false)
}

/// Widget instance bound to one page.
#[wasm_bindgen]
pub struct EmbeddedWidget {
    widget: Rc<RefCell<Widget>>,
}

#[wasm_bindgen]
impl EmbeddedWidget {
    /// `embed` is the page-level configuration object, or `undefined`.
    #[wasm_bindgen(constructor)]
    pub fn new(embed: JsValue, client: JsMessagingClient) -> Result<EmbeddedWidget, JsValue> {
        let config: WidgetConfig = if embed.is_undefined() || embed.is_null() {
            WidgetConfig::default()
        } else {
            serde_wasm_bindgen::from_value(embed)?
        };

        let widget = Rc::new(RefCell::new(Widget::new(
            config,
            open_session_store(),
            Rc::new(BridgeClient::new(client)),
        )));
        Widget::connect_ready(&widget);
        Ok(Self { widget })
    }

    /// Runs once at page load, after the constructor.
    pub fn bootstrap(&self) {
        let start = self.widget.borrow_mut().bootstrap();
        self.drive(start);
    }

    /// Validation failures are thrown as the user-facing message.
    #[wasm_bindgen(js_name = submitCredentials)]
    pub fn submit_credentials(&self, form: JsValue) -> Result<(), JsValue> {
        let form: CredentialForm = serde_wasm_bindgen::from_value(form)?;
        self.widget
            .borrow_mut()
            .submit_credentials(form.into())
            .map_err(|error| JsValue::from_str(&error.to_string()))
    }

    #[wasm_bindgen(js_name = primaryAction)]
    pub fn primary_action(&self) {
        let action = self.widget.borrow_mut().primary_action();
        if let PrimaryAction::Opening(start) = action {
            self.drive(Some(start));
        }
    }

    pub fn minimize(&self) {
        self.widget.borrow_mut().minimize_request();
    }

    pub fn close(&self) {
        let pending = self.widget.borrow_mut().close_request();
        if let Some(pending) = pending {
            wasm_bindgen_futures::spawn_local(pending);
        }
    }

    /// Returns false for a stale or malformed identity.
    #[wasm_bindgen(js_name = conversationReady)]
    pub fn conversation_ready(&self, identity: f64) -> bool {
        identity_from_js(identity)
            .is_some_and(|identity| self.widget.borrow_mut().conversation_ready(identity))
    }

    #[wasm_bindgen(js_name = conversationEnded)]
    pub fn conversation_ended(&self, identity: f64) -> bool {
        identity_from_js(identity)
            .is_some_and(|identity| self.widget.borrow_mut().conversation_ended(identity))
    }

    #[wasm_bindgen(js_name = buttonReady)]
    pub fn button_ready(&self) {
        let start = self.widget.borrow_mut().button_ready();
        self.drive(start);
    }

    pub fn state(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.widget.borrow().state())?)
    }

    #[wasm_bindgen(js_name = headerTitles)]
    pub fn header_titles(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(
            &self.widget.borrow().header_titles(),
        )?)
    }

    #[wasm_bindgen(js_name = takeNotice)]
    pub fn take_notice(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(
            &self.widget.borrow_mut().take_notice(),
        )?)
    }

    fn drive(&self, start: Option<ConversationStart>) {
        let Some(start) = start else {
            return;
        };

        let widget = Rc::clone(&self.widget);
        wasm_bindgen_futures::spawn_local(async move {
            if !start.settle(&widget).await {
                log::debug!("start result arrived after its conversation was superseded");
            }
        });
    }
}
