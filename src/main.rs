use std::{io::Write, process, sync::Arc};

use livemark::{
    application::{
        error::AppError,
        lifecycle::PreviewCoordinator,
        render::{RenderMode, RenderPipeline, RendererRegistry},
        throttle::{Dispatcher, InlineDispatcher, RuntimeDispatcher, ThrottleScheduler},
    },
    cache::RenderCache,
    config::{self, CliArgs, DispatchMode, Settings},
    domain::{Document, DocumentId},
    infra::{
        browser::SystemBrowser,
        documents::InMemoryDocuments,
        error::InfraError,
        http::{self, HttpState, PreviewServer},
        telemetry,
        watch::spawn_file_watcher,
    },
};
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .clone()
        .unwrap_or_else(|| config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(args) => run_serve(&cli_args, settings, args).await,
        config::Command::Export(args) => run_export(settings, args),
        config::Command::Render(args) => run_render(settings, args),
    }
}

fn build_pipeline(settings: &Settings) -> RenderPipeline {
    let registry = RendererRegistry::with_builtins(&settings.renderers.ignored);
    RenderPipeline::new(Arc::new(registry), Arc::new(RenderCache::new()))
}

fn build_dispatcher(mode: DispatchMode) -> Arc<dyn Dispatcher> {
    match mode {
        DispatchMode::Inline => Arc::new(InlineDispatcher),
        DispatchMode::Runtime => match RuntimeDispatcher::current() {
            Some(dispatcher) => Arc::new(dispatcher),
            None => {
                warn!(
                    target = "livemark::main",
                    "No tokio runtime available; falling back to inline dispatch"
                );
                Arc::new(InlineDispatcher)
            }
        },
    }
}

fn build_coordinator(
    settings: &Settings,
    documents: Arc<InMemoryDocuments>,
    dispatch: DispatchMode,
) -> Result<Arc<PreviewCoordinator>, AppError> {
    let pipeline = build_pipeline(settings);
    let scheduler = ThrottleScheduler::start(
        pipeline.clone(),
        documents.clone(),
        build_dispatcher(dispatch),
    )
    .map_err(InfraError::from)?;
    let browser = Arc::new(SystemBrowser::new(&settings.browser));

    Ok(Arc::new(PreviewCoordinator::new(
        documents, pipeline, scheduler, browser, settings,
    )))
}

async fn run_serve(
    cli_args: &CliArgs,
    settings: Settings,
    args: config::ServeArgs,
) -> Result<(), AppError> {
    let documents = Arc::new(InMemoryDocuments::new());
    let mut opened = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let document = documents.open_file(path).map_err(|err| {
            AppError::validation(format!("failed to open {}: {err}", path.display()))
        })?;
        opened.push(document.id);
    }

    let coordinator = build_coordinator(&settings, documents.clone(), settings.preview.dispatch)?;
    let router = http::build_router(HttpState {
        coordinator: coordinator.clone(),
        documents: documents.clone(),
    });
    let mut server = PreviewServer::new(router, settings.server.graceful_shutdown);
    let addr = server.bind(settings.server.addr).await?;
    coordinator.set_view_base(addr);

    for id in opened {
        let job = coordinator.clone();
        let open_browser = args.overrides.open;
        let launched = tokio::task::spawn_blocking(move || {
            if open_browser {
                job.preview(id).map(|outcome| Some(outcome.url))
            } else {
                job.on_saved(id);
                Ok(None)
            }
        })
        .await
        .map_err(|err| AppError::unexpected(format!("startup render failed: {err}")))?;

        match launched {
            Ok(Some(url)) => info!(target = "livemark::main", url = %url, "Preview opened"),
            Ok(None) => info!(
                target = "livemark::main",
                url = %coordinator.view_url(id),
                "Preview available"
            ),
            Err(err) => warn!(
                target = "livemark::main",
                document_id = %id,
                error = %err,
                "Document cannot be previewed"
            ),
        }
    }

    let watcher = settings.watch.enabled.then(|| {
        spawn_file_watcher(
            documents.clone(),
            coordinator.clone(),
            settings.watch.interval,
        )
    });

    let mut signals = ControlSignals::install()?;
    let mut current_addr = settings.server.addr;
    loop {
        match signals.next().await {
            Control::Shutdown => break,
            Control::Reload => match config::load(cli_args) {
                Ok(reloaded) => {
                    let restart_required = coordinator.update_settings(&reloaded);
                    if reloaded.server.addr != current_addr || !server.is_running() {
                        match server.reconfigure(reloaded.server.addr).await {
                            Ok(bound) => coordinator.set_view_base(bound),
                            Err(err) => error!(
                                target = "livemark::main",
                                error = %err,
                                "Preview server left unbound until the next reload"
                            ),
                        }
                        current_addr = reloaded.server.addr;
                    }
                    info!(
                        target = "livemark::main",
                        restart_required = ?restart_required,
                        "Configuration reloaded"
                    );
                }
                Err(err) => warn!(
                    target = "livemark::main",
                    error = %err,
                    "Configuration reload failed; keeping current settings"
                ),
            },
        }
    }

    info!(target = "livemark::main", "Shutting down");
    if let Some(handle) = watcher {
        handle.abort();
        let _ = handle.await;
    }
    server.stop().await;
    coordinator.shutdown();
    Ok(())
}

fn run_export(settings: Settings, args: config::ExportArgs) -> Result<(), AppError> {
    let documents = Arc::new(InMemoryDocuments::new());
    let document = documents.open_file(&args.file).map_err(|err| {
        AppError::validation(format!("failed to open {}: {err}", args.file.display()))
    })?;

    let coordinator = build_coordinator(&settings, documents, DispatchMode::Inline)?;
    let result = coordinator.export(document.id, args.output.as_deref());
    coordinator.shutdown();
    let outcome = result?;

    if outcome.clipboard.is_some() {
        info!(
            target = "livemark::export",
            "Clipboard copy is only performed by an editor host"
        );
    }
    println!("{}", outcome.path.display());
    Ok(())
}

fn run_render(settings: Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let text = std::fs::read_to_string(&args.file).map_err(InfraError::from)?;
    let mut document = Document::new(DocumentId::new(1), text).with_path(&args.file);
    document.syntax = args.syntax;

    let html = build_pipeline(&settings).render_document(&document, RenderMode::Preview)?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(html.as_bytes())
        .and_then(|()| stdout.flush())
        .map_err(InfraError::from)?;
    Ok(())
}

enum Control {
    Shutdown,
    Reload,
}

/// Ctrl-C stops the server; on unix, SIGHUP reloads configuration.
struct ControlSignals {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ControlSignals {
    fn install() -> Result<Self, AppError> {
        Ok(Self {
            #[cfg(unix)]
            hangup: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
                .map_err(InfraError::from)?,
        })
    }

    #[cfg(unix)]
    async fn next(&mut self) -> Control {
        tokio::select! {
            result = tokio::signal::ctrl_c() => shutdown_on(result),
            _ = self.hangup.recv() => Control::Reload,
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> Control {
        shutdown_on(tokio::signal::ctrl_c().await)
    }
}

fn shutdown_on(result: std::io::Result<()>) -> Control {
    if let Err(err) = result {
        error!(
            target = "livemark::main",
            error = %err,
            "Failed to listen for ctrl-c; shutting down"
        );
    }
    Control::Shutdown
}
