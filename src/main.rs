use std::{
    io::{self, Write},
    process,
    sync::Arc,
    time::Duration,
};

use pagewire::{
    cache::{
        self, CacheConfig, CacheStore, DurableStorage, FileStorage, MemoryStorage, QueryParams,
        SystemClock,
    },
    client::{
        CacheManager, CacheOptions, CachedApiClient, ClientOptions, PagesApi, ReqwestTransport,
        pages::{PageData, PageDataOptions},
    },
    config::{self, Command, GetArgs, PageArgs, Settings},
    error::AppError,
    infra::{error::InfraError, telemetry},
    swr::{FetchState, SwrController, SwrOptions},
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

struct AppContext {
    cache_config: CacheConfig,
    store: Arc<CacheStore>,
    client: CachedApiClient,
    manager: CacheManager,
    pages: PagesApi,
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let app = build_application_context(&settings)?;
    info!(
        base_url = app.client.base_url(),
        entries = app.store.size(),
        persist = settings.storage.persist,
        "Cache opened"
    );

    let housekeeping = cache::housekeeping::spawn(
        Arc::clone(&app.store),
        app.cache_config.housekeeping_interval,
    );

    let result = match cli_args.command {
        Command::Get(args) => run_get(&app, args).await,
        Command::Page(args) => run_page(&app, &settings, args).await,
        Command::Stats => print_json(&app.manager.cache_stats()),
        Command::Clear => {
            app.manager.clear_cache();
            Ok(())
        }
        Command::Prune => {
            let removed = app.manager.clear_expired_cache();
            print_json(&json!({ "removed": removed, "remaining": app.manager.cache_size() }))
        }
        Command::InvalidatePage(args) => {
            app.manager.invalidate_page(&args.slug);
            Ok(())
        }
    };

    housekeeping.abort();
    let _ = housekeeping.await;

    result
}

fn build_application_context(settings: &Settings) -> Result<AppContext, AppError> {
    let storage: Arc<dyn DurableStorage> = if settings.storage.persist {
        Arc::new(FileStorage::open(&settings.storage.directory).map_err(InfraError::from)?)
    } else {
        Arc::new(MemoryStorage::new())
    };

    let cache_config = CacheConfig::from(settings);
    let store = Arc::new(CacheStore::open(
        &cache_config,
        storage,
        Arc::new(SystemClock),
    ));

    let transport =
        ReqwestTransport::new().map_err(|err| InfraError::http_client(err.to_string()))?;
    let client = CachedApiClient::new(
        ClientOptions::from(&settings.client),
        Arc::new(transport),
        Arc::clone(&store),
    )?;

    Ok(AppContext {
        cache_config,
        store,
        manager: CacheManager::new(client.clone()),
        pages: PagesApi::new(client.clone()),
        client,
    })
}

async fn run_get(app: &AppContext, args: GetArgs) -> Result<(), AppError> {
    validate_endpoint(&args.endpoint)?;
    let params: Option<QueryParams> = (!args.params.is_empty()).then(|| {
        args.params
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect()
    });

    let mut options = if args.bypass {
        CacheOptions::bypass()
    } else {
        CacheOptions::default()
    };
    if let Some(ttl_ms) = args.ttl_ms {
        options = options.with_ttl(Duration::from_millis(ttl_ms));
    }

    let body = app
        .client
        .get_value(&args.endpoint, params.as_ref(), &options)
        .await?;
    print_json(&body)
}

async fn run_page(app: &AppContext, settings: &Settings, args: PageArgs) -> Result<(), AppError> {
    let controller = app.pages.page_data(
        Some(&args.slug),
        PageDataOptions {
            initial_data: None,
            swr: SwrOptions::from(&settings.swr),
        },
    );
    let mut updates = controller.subscribe();

    controller.refetch(args.force).await;
    let state = updates.borrow_and_update().clone();
    print_json(&state)?;

    if args.watch {
        watch_until_settled(&controller, &mut updates, state).await?;
    } else {
        // Let a pending background refresh land in the cache before exiting.
        controller.settled().await;
    }

    match controller.state() {
        FetchState {
            data: None,
            error: Some(message),
            ..
        } => Err(AppError::unexpected(format!(
            "page `{}` could not be loaded: {message}",
            args.slug
        ))),
        _ => Ok(()),
    }
}

async fn watch_until_settled(
    controller: &SwrController<PageData>,
    updates: &mut tokio::sync::watch::Receiver<FetchState<PageData>>,
    mut state: FetchState<PageData>,
) -> Result<(), AppError> {
    while !state.is_settled() {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                state = updates.borrow_and_update().clone();
                print_json(&state)?;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; leaving background refresh unfinished");
                return Ok(());
            }
        }
    }
    info!(
        status = ?controller.state().cache_status,
        "Page state settled"
    );
    Ok(())
}

/// Endpoints are paths joined onto the configured base URL.
fn validate_endpoint(endpoint: &str) -> Result<(), AppError> {
    if !endpoint.starts_with('/') {
        return Err(AppError::validation(format!(
            "endpoint `{endpoint}` must start with `/`"
        )));
    }
    if endpoint.contains("://") {
        return Err(AppError::validation(format!(
            "endpoint `{endpoint}` must be a path, not a URL"
        )));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    writeln!(io::stdout().lock(), "{out}").map_err(InfraError::from)?;
    Ok(())
}
