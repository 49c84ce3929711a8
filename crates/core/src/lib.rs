pub mod bootstrap;
pub mod client;
pub mod config;
pub mod credentials;
pub mod machine;
pub mod widget;

pub use bootstrap::{BootstrapOutcome, Bootstrapper, SessionSource, initialize_session};
pub use client::{
    ClientCall, ClientError, ClientResult, LoopbackClient, MessagingClient, ReadyCallback,
    SessionToken,
};
pub use config::{ConfigError, ConfigResult, WidgetConfig};
pub use credentials::{
    CredentialError, Credentials, is_valid_deployment_name, is_valid_messaging_url,
    is_valid_organization_id, validate_credentials,
};
pub use machine::{
    CloseOutcome, ConversationIdentity, ConversationMachine, ConversationPhase,
    PrimaryTransition, TransitionRejection, TransitionResult, Visibility,
};
pub use widget::{
    ConversationStart, HeaderTitles, IgnoredReason, Notice, PrimaryAction, Widget, WidgetError,
    WidgetResult, WidgetState,
};
