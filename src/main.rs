//! `flightwatch` binary.
//!
//! Loads `.env` and the environment, opens the history store (PostgreSQL
//! when `DATABASE_URL` is set, the CSV file otherwise) and wires the search
//! client, notifier and alert rules into a [`Scanner`]. With
//! `SCAN_INTERVAL_SECS=0` it scans once and exits; otherwise it serves the
//! read API and rescans on that interval. Variables are listed in
//! `config.rs`; logging is tuned with `FLIGHTWATCH_LOG_LEVEL` and
//! `FLIGHTWATCH_SPAN_EVENTS`.
use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use flightwatch::alerts::{AlertEngine, AlertRule};
use flightwatch::notify::{Notifier, TelegramNotifier};
use flightwatch::provider::{AmadeusClient, SearchOptions};
use flightwatch::routes::{self, AppState};
use flightwatch::scan::{plan_targets, OfferFilter, Scanner};
use flightwatch::scorer::Scorer;
use flightwatch::store::{CsvHistoryStore, HistoryStore, PgHistoryStore};
use flightwatch::trend::TrendClassifier;
use flightwatch::{config, Config};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let store = open_store(&cfg).await?;
    let scorer = Scorer::new(cfg.calibration);
    let mut scanner = build_scanner(&cfg, store.clone(), scorer)?;
    scanner.restore_state().await;

    let targets = plan_targets(
        &cfg.origins,
        &cfg.destination,
        cfg.search_start_date,
        cfg.days_to_scan,
        cfg.stay_days,
    );

    if cfg.scan_interval_secs == 0 {
        let summary = scanner.run(&targets).await;
        tracing::info!("Scan summary: {}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    // Read API runs alongside the periodic scans
    let app: Router = routes::router(AppState { store, scorer });
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

    let mut interval = tokio::time::interval(Duration::from_secs(u64::from(cfg.scan_interval_secs)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let summary = scanner.run(&targets).await;
                tracing::info!("Scan summary: {}", serde_json::to_string(&summary)?);
            }
            result = &mut server => {
                result??;
                return Ok(());
            }
        }
    }
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn HistoryStore>> {
    // ---
    match &cfg.database_url {
        Some(url) => {
            let store = PgHistoryStore::connect(url, cfg.db_pool_max).await?;
            Ok(Arc::new(store))
        }
        None => {
            let store = CsvHistoryStore::open(&cfg.history_csv_path).await?;
            Ok(Arc::new(store))
        }
    }
}

fn build_scanner(cfg: &Config, store: Arc<dyn HistoryStore>, scorer: Scorer) -> Result<Scanner> {
    // ---
    let source = AmadeusClient::new(
        cfg.amadeus_base_url.clone(),
        cfg.amadeus_api_key.clone(),
        cfg.amadeus_api_secret.clone(),
        SearchOptions {
            currency: cfg.currency.clone(),
            max_offers: cfg.max_offers,
            adults: 1,
        },
        cfg.http_timeout,
    )?;

    let mut rules = vec![AlertRule::trend_new_or_drop()];
    if let Some(ceiling) = cfg.price_ceiling {
        rules.push(AlertRule::price_below(ceiling));
    }
    if let Some(hours) = cfg.duration_ceiling_hours {
        rules.push(AlertRule::duration_at_most(hours));
    }
    if let Some(floor) = cfg.score_floor {
        rules.push(AlertRule::score_at_least(floor));
    }
    tracing::info!(rules = ?rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), "Alert rules");

    let mut scanner = Scanner::new(
        Arc::new(source),
        store,
        TrendClassifier::new(cfg.trend_threshold),
        scorer,
        AlertEngine::new(rules),
    )
    .with_filter(OfferFilter {
        max_duration_hours: cfg.max_duration_hours,
        max_price: cfg.max_price,
    })
    .with_link_base(cfg.deep_link_base.clone())
    .with_state_path(cfg.alert_state_path.clone());

    match &cfg.telegram {
        Some((token, chat_id)) => {
            let http = reqwest::Client::builder().timeout(cfg.http_timeout).build()?;
            let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(http, token.clone(), chat_id.clone()));
            scanner = scanner.with_notifier(notifier);
        }
        None => tracing::warn!("TELEGRAM_TOKEN/TELEGRAM_CHAT_ID not set; notifications disabled"),
    }

    Ok(scanner)
}

// ---

/// Compact fmt subscriber with file/line locations. `FORCE_COLOR` overrides
/// TTY detection for ANSI output; `FLIGHTWATCH_SPAN_EVENTS=full|enter_exit`
/// adds span events beyond CLOSE (the `scan` span carries the scan id).
/// `RUST_LOG` wins over `FLIGHTWATCH_LOG_LEVEL`.
fn init_tracing() {
    // ---
    let span_events = match env::var("FLIGHTWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("FLIGHTWATCH_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,hyper=info,reqwest=info"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
