//! Trading client
//!
//! Logs on to the market maker and routes orders typed on stdin:
//!
//! ```text
//! buy EUR/USD 1000
//! sell GBP/USD 500 limit 2799.5
//! prices
//! quit
//! ```

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

use fix_price_simulator::config::CliOverrides;
use fix_price_simulator::simulator::parse_quantity;
use fix_price_simulator::utils::{format_price, init_tracing};
use fix_price_simulator::{
    spawn_tcp_session, ChannelSink, ChannelTransport, ClientApplication, EventSink, FanoutSink,
    OrderRouter, OrderType, PriceBook, Role, SessionEngine, SimEvent, SimulatorMetrics, Side,
};

#[derive(Parser, Debug)]
#[command(name = "client", version, about = "FIX price simulator: trading client")]
struct Cli {
    #[command(flatten)]
    overrides: CliOverrides,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Order {
        side: Side,
        symbol: String,
        quantity: String,
        limit_price: Option<String>,
    },
    Prices,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["prices"] => Ok(Command::Prices),
        ["quit"] | ["exit"] => Ok(Command::Quit),
        [side, symbol, quantity, rest @ ..] if matches!(*side, "buy" | "sell") => {
            let side = if *side == "buy" { Side::Buy } else { Side::Sell };
            let limit_price = match rest {
                [] => None,
                ["limit", price] => Some(price.to_string()),
                ["limit"] => Some(String::new()),
                _ => return Err(format!("unexpected trailing input: {}", rest.join(" "))),
            };
            Ok(Command::Order {
                side,
                symbol: symbol.to_string(),
                quantity: quantity.to_string(),
                limit_price,
            })
        }
        _ => Err(format!("unknown command: {}", line.trim())),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  buy|sell <symbol> <qty> [limit <px>]");
    println!("  prices");
    println!("  quit");
}

fn render(event: &SimEvent) {
    match event {
        SimEvent::OrderPlaced { order } => println!("-> placed {}", order),
        SimEvent::OrderFilled { execution } => println!(
            "<- filled {} {} at {} (notional {})",
            execution.executed_quantity,
            execution.symbol,
            format_price(execution.executed_price),
            format_price(execution.notional)
        ),
        SimEvent::SessionStateChanged { session_id, state } => {
            println!("** session {} is {}", session_id, state)
        }
        SimEvent::Warning { warning } => println!("!! {}", warning),
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing("warn");
    let settings = Cli::parse().overrides.load()?;

    let (channel_sink, mut events) = ChannelSink::new();
    let metrics = Arc::new(SimulatorMetrics::new());
    let sink: Arc<dyn EventSink> = Arc::new(
        FanoutSink::default()
            .with(Arc::new(channel_sink))
            .with(metrics.clone()),
    );

    // Streams its own walk; fills overwrite a symbol with the executed LastPx
    let (book, generator) =
        PriceBook::spawn(settings.instruments(), settings.tick_interval(), sink.clone());
    let (transport, frames) = ChannelTransport::new();
    let session = Arc::new(
        SessionEngine::new(
            settings.session.client_session_id(),
            Role::Client,
            Box::new(transport),
            Arc::new(ClientApplication::new(Arc::clone(&book), sink.clone())),
            sink.clone(),
        )
        .with_heartbeat_interval(settings.session.heartbeat_interval_secs),
    );

    let address = settings.session.address();
    let stream = TcpStream::connect(&address).await?;
    info!("Connected to {}", address);
    let connection = spawn_tcp_session(stream, Arc::clone(&session), frames);
    session.connect()?;

    let router = OrderRouter::new(Arc::clone(&session), sink);
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events.recv() => render(&event),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Prices) => {
                        for (symbol, price) in book.snapshot() {
                            println!("   {} {}", symbol, format_price(price));
                        }
                        println!("   ({} ticks)", book.tick_count());
                    }
                    Ok(Command::Order { side, symbol, quantity, limit_price }) => {
                        let order_type = if limit_price.is_some() {
                            OrderType::Limit
                        } else {
                            OrderType::Market
                        };
                        let placed = parse_quantity(&quantity).and_then(|quantity| {
                            router.place_order(
                                &symbol,
                                side,
                                quantity,
                                order_type,
                                limit_price.as_deref(),
                            )
                        });
                        if let Err(e) = placed {
                            println!("!! order rejected: {}", e);
                        }
                    }
                    Err(e) => {
                        println!("!! {}", e);
                        print_help();
                    }
                }
            }
        }
    }

    book.stop();
    session.disconnect()?;
    if tokio::time::timeout(Duration::from_secs(5), connection)
        .await
        .is_err()
    {
        warn!("Market maker did not acknowledge logout");
    }
    while let Ok(event) = events.try_recv() {
        render(&event);
    }
    generator.await?;
    println!(
        "Placed {} orders, {} filled, {} price updates",
        metrics.orders_placed(),
        metrics.orders_filled(),
        metrics.price_updates()
    );

    Ok(())
}
