use std::cell::RefCell;
use std::env;
use std::path::Path;
use std::rc::Rc;

use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use chatdock_core::{
    Credentials, LoopbackClient, PrimaryAction, SessionSource, Visibility, Widget, WidgetConfig,
    WidgetError,
};
use chatdock_storage::{
    KeyValueStorage, MemoryStorage, SessionField, SessionStore, SqliteStorage, StorageError,
    WEB_STORAGE_KEY_PREFIX,
};

const ORG_ID: &str = "00D000000000001";
const DEPLOYMENT: &str = "Web_Deployment";
const MESSAGING_URL: &str = "https://acme.my.salesforce-scrt.com";

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
    config_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    StorageRoundtrip,
    CorruptRecovery,
    InitializerIdempotent,
    Lifecycle,
    Reopen,
    AutoConnect,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "storage_roundtrip" => Some(Self::StorageRoundtrip),
            "corrupt_recovery" => Some(Self::CorruptRecovery),
            "initializer_idempotent" => Some(Self::InitializerIdempotent),
            "lifecycle" => Some(Self::Lifecycle),
            "reopen" => Some(Self::Reopen),
            "auto_connect" => Some(Self::AutoConnect),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::StorageRoundtrip => "storage_roundtrip",
            Self::CorruptRecovery => "corrupt_recovery",
            Self::InitializerIdempotent => "initializer_idempotent",
            Self::Lifecycle => "lifecycle",
            Self::Reopen => "reopen",
            Self::AutoConnect => "auto_connect",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("storage operation failed: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("widget rejected input: {source}"))]
    Widget {
        stage: &'static str,
        source: WidgetError,
    },
    #[snafu(display("messaging client failed: {source}"))]
    Client {
        stage: &'static str,
        source: chatdock_core::ClientError,
    },
    #[snafu(display("widget config failed to load: {source}"))]
    Config {
        stage: &'static str,
        source: chatdock_core::ConfigError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

/// Backend every scenario runs against; clones observe the same items, so
/// opening a second store over one acts as a page reload.
#[derive(Clone)]
enum Backend {
    Memory(MemoryStorage),
    Sqlite(SqliteStorage),
}

impl Backend {
    fn boxed(&self) -> Box<dyn KeyValueStorage> {
        match self {
            Self::Memory(storage) => Box::new(storage.clone()),
            Self::Sqlite(storage) => Box::new(storage.clone()),
        }
    }

    fn store(&self) -> RunnerResult<SessionStore> {
        SessionStore::open(self.boxed()).context(StorageSnafu {
            stage: "open-session-store",
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());
    if let Some(db_path) = args.db_path.as_deref() {
        println!("db_path={db_path}");
    }

    match args.scenario {
        Scenario::StorageRoundtrip => run_storage_roundtrip(&open_backend(&args).await?)?,
        Scenario::CorruptRecovery => run_corrupt_recovery(&open_backend(&args).await?)?,
        Scenario::InitializerIdempotent => {
            run_initializer_idempotent(&open_backend(&args).await?, &LoopbackClient::new())?
        }
        Scenario::Lifecycle => run_lifecycle(&open_backend(&args).await?).await?,
        Scenario::Reopen => run_reopen(&open_backend(&args).await?).await?,
        Scenario::AutoConnect => run_auto_connect(&args, &open_backend(&args).await?).await?,
        Scenario::All => {
            run_storage_roundtrip(&open_backend(&args).await?)?;
            run_corrupt_recovery(&open_backend(&args).await?)?;
            run_initializer_idempotent(&open_backend(&args).await?, &LoopbackClient::new())?;
            run_lifecycle(&open_backend(&args).await?).await?;
            run_reopen(&open_backend(&args).await?).await?;
            run_auto_connect(&args, &open_backend(&args).await?).await?;
        }
    }

    println!("runner_ok=true");
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut config_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            "--config" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                config_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
        config_path,
    })
}

/// Opens sqlite when `--db` is given, memory otherwise, and clears leftover payloads.
async fn open_backend(args: &RunnerArgs) -> RunnerResult<Backend> {
    let backend = match args.db_path.as_deref() {
        Some(db_path) => Backend::Sqlite(SqliteStorage::open(db_path).await.context(
            StorageSnafu {
                stage: "open-sqlite-backend",
            },
        )?),
        None => Backend::Memory(MemoryStorage::new()),
    };

    let storage = backend.boxed();
    let keys = storage.keys().context(StorageSnafu {
        stage: "clear-backend-keys",
    })?;
    for key in keys.iter().filter(|key| key.starts_with(WEB_STORAGE_KEY_PREFIX)) {
        storage.remove_item(key).context(StorageSnafu {
            stage: "clear-backend-remove",
        })?;
    }

    Ok(backend)
}

fn run_storage_roundtrip(backend: &Backend) -> RunnerResult<()> {
    let mut store = backend.store()?;
    store.initialize(ORG_ID).context(StorageSnafu {
        stage: "roundtrip-initialize",
    })?;
    store
        .set(SessionField::SessionToken, "roundtrip-token")
        .context(StorageSnafu {
            stage: "roundtrip-set",
        })?;

    let reloaded = backend.store()?;
    let token = reloaded
        .get(SessionField::SessionToken)
        .context(StorageSnafu {
            stage: "roundtrip-get",
        })?;
    println!("payload_key={}", reloaded.payload_key().unwrap_or_default());
    println!("token_survives_reload={}", token.is_some());

    check(
        "storage_roundtrip",
        token.as_deref() == Some("roundtrip-token"),
        "token did not survive reopening the store",
    )
}

fn run_corrupt_recovery(backend: &Backend) -> RunnerResult<()> {
    backend
        .boxed()
        .set_item(
            &SessionStore::payload_key_for("not-an-org"),
            r#"{"ORGANIZATION_ID":"not-an-org","JWT":"stale"}"#,
        )
        .context(StorageSnafu {
            stage: "corrupt-seed",
        })?;

    let widget = new_widget(WidgetConfig::default(), backend)?;
    widget.borrow_mut().bootstrap();
    let state = widget.borrow().state();
    let payload_removed = !backend.store()?.has_payload();

    println!("form_visible={}", state.form_visible);
    println!("payload_removed={payload_removed}");
    check(
        "corrupt_recovery",
        state.form_visible && payload_removed,
        "corrupt payload was adopted instead of removed",
    )
}

fn run_initializer_idempotent(backend: &Backend, client: &LoopbackClient) -> RunnerResult<()> {
    let mut store = backend.store()?;
    let credentials = credentials();
    let raw_payload = |store: &SessionStore| -> RunnerResult<Option<String>> {
        backend
            .boxed()
            .get_item(store.payload_key().unwrap_or_default())
            .context(StorageSnafu {
                stage: "idempotent-read",
            })
    };

    chatdock_core::initialize_session(Some(&mut store), client, &credentials).context(
        ClientSnafu {
            stage: "idempotent-initialize-first",
        },
    )?;
    let once = raw_payload(&store)?;
    chatdock_core::initialize_session(Some(&mut store), client, &credentials).context(
        ClientSnafu {
            stage: "idempotent-initialize-second",
        },
    )?;
    let twice = raw_payload(&store)?;

    println!("payload_unchanged={}", once == twice);
    check(
        "initializer_idempotent",
        once.is_some() && once == twice,
        "second initialization changed the payload",
    )
}

async fn run_lifecycle(backend: &Backend) -> RunnerResult<()> {
    let client = Rc::new(LoopbackClient::new());
    let widget = new_widget_with(WidgetConfig::default(), backend, client.clone())?;
    widget.borrow_mut().bootstrap();
    widget
        .borrow_mut()
        .submit_credentials(credentials())
        .context(WidgetSnafu {
            stage: "lifecycle-submit",
        })?;

    let identity = open(&widget, "lifecycle").await?;
    client.fire_ready(identity);
    let ready = widget.borrow().state();
    println!("opened_identity={identity}");
    println!("ready_button_enabled={}", ready.button_enabled);

    widget.borrow_mut().minimize_request();
    let minimized = widget.borrow().state().visibility == Visibility::Minimized;
    let restored = matches!(
        widget.borrow_mut().primary_action(),
        PrimaryAction::Restored(restored) if restored == identity
    );
    close(&widget).await;
    let closed = widget.borrow().state();

    println!("minimized={minimized}");
    println!("restored={restored}");
    println!("closed={}", closed.conversation_closed);
    println!("end_calls={}", client.end_calls());

    check(
        "lifecycle",
        ready.button_enabled
            && minimized
            && restored
            && closed.visibility == Visibility::Hidden
            && client.end_calls() == 1,
        "lifecycle did not follow open, minimize, restore, close",
    )
}

async fn run_reopen(backend: &Backend) -> RunnerResult<()> {
    let client = Rc::new(LoopbackClient::new());
    let widget = new_widget_with(WidgetConfig::default(), backend, client.clone())?;
    widget
        .borrow_mut()
        .submit_credentials(credentials())
        .context(WidgetSnafu {
            stage: "reopen-submit",
        })?;

    let first = open(&widget, "reopen").await?;
    client.fire_ready(first);
    close(&widget).await;
    let second = open(&widget, "reopen").await?;

    client.fire_ready(first);
    let stale_ignored = widget.borrow().state().busy;
    client.fire_ready(second);
    let second_ready = !widget.borrow().state().busy;

    println!("first_identity={first}");
    println!("second_identity={second}");
    println!("stale_ready_ignored={stale_ignored}");
    check(
        "reopen",
        first != second && stale_ignored && second_ready,
        "reopened conversation reused or accepted a stale identity",
    )
}

async fn run_auto_connect(args: &RunnerArgs, backend: &Backend) -> RunnerResult<()> {
    let config = match args.config_path.as_deref() {
        Some(path) => WidgetConfig::load(Some(Path::new(path))).context(ConfigSnafu {
            stage: "auto-connect-load-config",
        })?,
        None => WidgetConfig {
            organization_id: Some(ORG_ID.to_string()),
            deployment_developer_name: Some(DEPLOYMENT.to_string()),
            messaging_url: Some(MESSAGING_URL.to_string()),
            auto_connect: true,
        },
    };

    let widget = new_widget(config, backend)?;
    widget.borrow_mut().bootstrap();
    let source = widget.borrow().source();
    let start = widget.borrow_mut().button_ready();
    let auto_opened = start.is_some();
    if let Some(start) = start {
        start.settle(&widget).await;
    }

    println!("session_source={source:?}");
    println!("auto_opened={auto_opened}");
    check(
        "auto_connect",
        source == SessionSource::AutoConnect && auto_opened,
        "auto-connect did not adopt the configured session and open",
    )
}

fn credentials() -> Credentials {
    Credentials::new(ORG_ID, DEPLOYMENT, MESSAGING_URL)
}

fn new_widget(config: WidgetConfig, backend: &Backend) -> RunnerResult<Rc<RefCell<Widget>>> {
    new_widget_with(config, backend, Rc::new(LoopbackClient::new()))
}

fn new_widget_with(
    config: WidgetConfig,
    backend: &Backend,
    client: Rc<LoopbackClient>,
) -> RunnerResult<Rc<RefCell<Widget>>> {
    let widget = Rc::new(RefCell::new(Widget::new(
        config,
        Some(backend.store()?),
        client,
    )));
    Widget::connect_ready(&widget);
    Ok(widget)
}

async fn open(
    widget: &Rc<RefCell<Widget>>,
    scenario: &'static str,
) -> RunnerResult<chatdock_core::ConversationIdentity> {
    let action = widget.borrow_mut().primary_action();
    let PrimaryAction::Opening(start) = action else {
        return ScenarioFailedSnafu {
            stage: "open-conversation",
            scenario,
            reason: "primary action did not start a conversation".to_string(),
        }
        .fail();
    };

    let identity = start.identity;
    start.settle(widget).await;
    Ok(identity)
}

async fn close(widget: &Rc<RefCell<Widget>>) {
    let pending = widget.borrow_mut().close_request();
    if let Some(pending) = pending {
        pending.await;
    }
}

fn check(scenario: &'static str, passed: bool, reason: &str) -> RunnerResult<()> {
    println!("{scenario}={passed}");
    if passed {
        return Ok(());
    }

    ScenarioFailedSnafu {
        stage: "scenario-check",
        scenario,
        reason: reason.to_string(),
    }
    .fail()
}
