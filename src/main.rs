use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderName, Method};
use chrono::Utc;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use notifier::auth::JwtVerifier;
use notifier::config::{self, Config, StoreBackend};
use notifier::metrics::DeliveryMetrics;
use notifier::models::notification::{NewNotification, NotificationKind, UserId};
use notifier::notification::broadcast::BroadcastTemplate;
use notifier::notification::Notifier;
use notifier::realtime::registry::ConnectionRegistry;
use notifier::store::memory::MemoryStore;
use notifier::store::postgres::PgStore;
use notifier::store::NotificationStore;
use notifier::{api, cli, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cmd) => handle_command(cmd, cfg).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export is opt-in: only when a collector endpoint is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "booth-notifier"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let fmt_layer = match std::env::var("BOOTH_LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt::layer().json().boxed(),
        _ => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "notifier=debug,booth_notifier=debug,tower_http=debug".into()),
        ))
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn build_store(cfg: &Config) -> anyhow::Result<Arc<dyn NotificationStore>> {
    match cfg.store {
        StoreBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db = PgStore::connect(&cfg.database_url).await?;
            tracing::info!("Running migrations...");
            db.migrate().await?;
            Ok(Arc::new(db))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory notification store; nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_notifier(cfg: &Config) -> anyhow::Result<Notifier> {
    let store = build_store(cfg).await?;
    let metrics = Arc::new(DeliveryMetrics::new().context("failed to register metrics")?);
    Ok(Notifier::new(
        store,
        ConnectionRegistry::new(),
        cfg.notifier(),
        metrics,
    ))
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let notifier = build_notifier(&cfg).await?;
    let verifier = Arc::new(JwtVerifier::new(&cfg.jwt_secret));

    let state = Arc::new(AppState {
        notifier,
        verifier,
        config: cfg,
    });

    let app = api::router(state).layer({
        let app_origin = std::env::var("BOOTH_APP_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(move |origin, _| {
                let origin_str = origin.to_str().unwrap_or("");
                origin_str == app_origin
                    || origin_str.starts_with("http://localhost:")
                    || origin_str.starts_with("http://127.0.0.1:")
            }))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers([
                HeaderName::from_static("content-type"),
                HeaderName::from_static("authorization"),
                HeaderName::from_static("x-admin-key"),
            ])
            .allow_credentials(true)
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("booth notifier listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn handle_command(cmd: cli::Commands, cfg: Config) -> anyhow::Result<()> {
    let notifier = build_notifier(&cfg).await?;

    match cmd {
        cli::Commands::Notify {
            recipient,
            kind,
            title,
            message,
            sender,
        } => {
            let kind: NotificationKind = kind.parse()?;
            let sender = sender.unwrap_or_else(|| recipient.clone());
            let new = NewNotification::new(recipient, sender, kind, title, message);
            let receipt = notifier.deliver(new).await?;
            println!(
                "Notification stored:\n  ID:        {}\n  Recipient: {}\n  Type:      {}\n  Push:      {}",
                receipt.notification.id,
                receipt.notification.recipient_id,
                receipt.notification.kind,
                receipt.push.label()
            );
        }
        cli::Commands::Broadcast {
            recipients,
            title,
            message,
            sender,
            expires_in_hours,
        } => {
            let mut template = BroadcastTemplate::new(sender, title, message);
            if let Some(hours) = expires_in_hours {
                template = template.expiring_in_hours(Utc::now(), hours)?;
            }
            let recipients: Vec<UserId> = recipients.into_iter().map(UserId::new).collect();
            let stats = notifier.broadcast(&template, &recipients).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            if !stats.all_succeeded() {
                anyhow::bail!("{} of {} deliveries failed", stats.failed, stats.total_recipients);
            }
        }
        cli::Commands::Unread { user } => {
            let count = notifier.unread_count(&UserId::new(user)).await?;
            println!("{}", count);
        }
        cli::Commands::Serve { .. } => anyhow::bail!("serve is not a one-shot command"),
    }
    Ok(())
}
