//! Market maker
//!
//! Accepts client connections, streams a random-walk price for every
//! configured instrument and fills each order at the current price.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use fix_price_simulator::config::CliOverrides;
use fix_price_simulator::metrics::install_prometheus;
use fix_price_simulator::utils::{format_price, init_tracing};
use fix_price_simulator::{
    spawn_tcp_session, ChannelTransport, EventSink, FanoutSink, MatchingEngine, MetricsReporter,
    PriceBook, Role, SessionEngine, SimulatorMetrics, TracingSink,
};

#[derive(Parser, Debug)]
#[command(name = "market_maker", version, about = "FIX price simulator: market maker")]
struct Cli {
    #[command(flatten)]
    overrides: CliOverrides,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("info");
    let settings = Cli::parse().overrides.load()?;

    info!("Starting market maker...");

    let metrics = Arc::new(SimulatorMetrics::new());
    let sink: Arc<dyn EventSink> = Arc::new(
        FanoutSink::default()
            .with(Arc::new(TracingSink))
            .with(metrics.clone()),
    );

    if let Some(addr) = &settings.metrics_addr {
        let addr: SocketAddr = addr.parse()?;
        install_prometheus(addr)?;
    }

    let reporter = MetricsReporter::new(metrics.clone(), settings.metrics_report_interval());
    tokio::spawn(async move {
        reporter.run().await;
    });

    let (book, generator) =
        PriceBook::spawn(settings.instruments(), settings.tick_interval(), sink.clone());
    for (symbol, price) in book.snapshot() {
        info!("Quoting {} from {}", symbol, format_price(price));
    }

    let listener = TcpListener::bind(settings.session.address()).await?;
    info!(
        "Market maker is listening on {}. Press Ctrl+C to stop.",
        listener.local_addr()?
    );

    let accept_loop = {
        let book = Arc::clone(&book);
        let sink = sink.clone();
        let settings = settings.clone();
        async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        continue;
                    }
                };
                info!("Connection from {}", peer);

                let (transport, frames) = ChannelTransport::new();
                let matching = Arc::new(MatchingEngine::new(Arc::clone(&book), sink.clone()));
                let session = Arc::new(
                    SessionEngine::new(
                        settings.session.market_maker_session_id(),
                        Role::MarketMaker,
                        Box::new(transport),
                        matching,
                        sink.clone(),
                    )
                    .with_heartbeat_interval(settings.session.heartbeat_interval_secs),
                );
                spawn_tcp_session(stream, session, frames);
            }
        }
    };

    tokio::select! {
        _ = accept_loop => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    info!("Shutting down market maker...");
    book.stop();
    generator.await?;

    for (symbol, price) in book.snapshot() {
        info!("Final price for {}: {}", symbol, format_price(price));
    }
    info!(
        "Filled {} orders, notional {:.2}",
        metrics.orders_filled(),
        metrics.total_notional()
    );

    Ok(())
}
