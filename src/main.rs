use std::{process, sync::Arc, time::Duration};

use presto::{
    application::{error::AppError, render::FileRenderer},
    cache::{
        AssetCacheState, CacheLayout, CachePolicy, CacheState, CacheStats, CacheTrigger,
        EligibilityGate, EventQueue, FsStore, InvalidationEngine, NoticeBus, PageCache,
        is_cache_working,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
    transform::TransformPipeline,
};
use tokio::{sync::watch, try_join};
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

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Clear(_) => run_clear(settings).await,
        config::Command::Stats(_) => run_stats(settings).await,
        config::Command::Check(_) => run_check(settings).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
    }
}

/// Cache components wired from settings.
struct CacheContext {
    cache: Arc<PageCache>,
    trigger: Arc<CacheTrigger>,
    layout: CacheLayout,
}

async fn build_cache_context(settings: &config::Settings) -> Result<CacheContext, AppError> {
    let store = FsStore::open(settings.cache.directory.clone()).await?;
    let layout = store.layout().clone();

    let policy = Arc::new(CachePolicy::from(&settings.cache));
    let gate = EligibilityGate::new(policy);
    let cache = Arc::new(PageCache::new(gate, Arc::new(store)).with_notices(NoticeBus::new()));
    let engine = Arc::new(InvalidationEngine::new(cache.clone()));
    let trigger = Arc::new(CacheTrigger::new(Arc::new(EventQueue::new()), engine));

    Ok(CacheContext {
        cache,
        trigger,
        layout,
    })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let context = build_cache_context(&settings).await?;

    info!(
        target = "presto::serve",
        cache_enabled = settings.cache.enabled,
        cache_directory = %context.layout.root().display(),
        content_directory = %settings.content.directory.display(),
        lifetime_seconds = settings.cache.lifetime.as_secs(),
        "starting presto"
    );

    let renderer = Arc::new(FileRenderer::new(settings.content.directory.clone()));
    let cache_state = settings.cache.enabled.then(|| CacheState {
        cache: context.cache.clone(),
        pipeline: Arc::new(TransformPipeline::from_settings(&settings.optimize)),
    });

    let public_router = http::build_router(
        HttpState::new(renderer),
        cache_state,
        AssetCacheState::from(&settings.browser_cache),
    );
    let admin_router = http::build_admin_router(AdminState::new(
        context.cache,
        context.trigger,
        context.layout,
    ));

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "presto::serve",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "presto::serve", error = %err, "failed to listen for shutdown signal");
            // Keep the sender alive so the servers are not told to stop.
            std::future::pending::<()>().await;
        }
        info!(target = "presto::serve", "shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = async { try_join!(public_server, admin_server) } => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = shutdown_deadline(shutdown_rx, grace) => {
            warn!(
                target = "presto::serve",
                grace_seconds = grace.as_secs(),
                "graceful shutdown timed out; closing open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_deadline(rx: watch::Receiver<bool>, grace: Duration) {
    shutdown_requested(rx).await;
    tokio::time::sleep(grace).await;
}

async fn run_clear(settings: config::Settings) -> Result<(), AppError> {
    let context = build_cache_context(&settings).await?;
    let removed = context.trigger.engine().clear_all().await?;
    println!("removed {removed} cached file(s) from {}", context.layout.root().display());
    Ok(())
}

async fn run_stats(settings: config::Settings) -> Result<(), AppError> {
    let context = build_cache_context(&settings).await?;
    let stats = CacheStats::collect(&context.layout).await?;
    println!("cache directory: {}", context.layout.root().display());
    println!("files:           {}", stats.files);
    println!("  html:          {}", stats.html_files);
    println!("  css:           {}", stats.css_files);
    println!("  js:            {}", stats.js_files);
    println!("size:            {}", stats.size_human());
    Ok(())
}

async fn run_check(settings: config::Settings) -> Result<(), AppError> {
    let context = build_cache_context(&settings).await?;
    if !is_cache_working(&context.layout).await {
        return Err(AppError::unexpected(format!(
            "cache self-test failed under {}",
            context.layout.root().display()
        )));
    }
    println!("cache OK: {}", context.layout.root().display());
    Ok(())
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let context = build_cache_context(&settings).await?;
    let report = context.trigger.engine().on_content_changed(&args.urls).await;

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to render report: {err}")))?;
    println!("{rendered}");

    if !report.is_clean() {
        return Err(AppError::unexpected(format!(
            "{} cache entries could not be removed",
            report.failures.len()
        )));
    }
    Ok(())
}
