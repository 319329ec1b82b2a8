use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

use crate::events::EventSink;
use crate::session::state::{Role, SessionId, SessionState};
use crate::simulator::error::{SimulatorError, SimulatorResult};
use crate::simulator::types::{ExecutionResult, Order, Price};
use crate::utils::time::LatencyTimer;

/// Unanswered orders tracked for fill latency; the oldest is evicted beyond this
pub const MAX_IN_FLIGHT: usize = 4096;

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn install_prometheus(addr: SocketAddr) -> SimulatorResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SimulatorError::Config(format!("prometheus exporter: {}", e)))?;

    info!("Prometheus metrics available at http://{}/metrics", addr);
    gauge!("simulator_up").set(1.0);
    Ok(())
}

/// Event sink that keeps running totals and mirrors them into `metrics`
#[derive(Debug)]
pub struct SimulatorMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    orders_placed: AtomicU64,
    orders_filled: AtomicU64,
    price_updates: AtomicU64,
    warnings: AtomicU64,
    active_sessions: AtomicU64,

    // f64 bits
    total_notional: AtomicU64,

    // Order placed -> fill observed, keyed by ClOrdID; value carries the
    // placement sequence for eviction
    in_flight: Mutex<HashMap<String, (u64, LatencyTimer)>>,
    fill_latency: LatencyTracker,
}

impl SimulatorMetrics {
    pub fn new() -> Self {
        describe_counter!("simulator_messages_total", "Wire messages by direction");
        describe_counter!("simulator_orders_total", "Orders placed and filled");
        describe_counter!("simulator_warnings_total", "Dropped messages and rejected operations");
        describe_gauge!("simulator_price", "Latest price per instrument");
        describe_gauge!("simulator_sessions_active", "Sessions currently logged on");
        describe_histogram!(
            "simulator_fill_latency_seconds",
            "Time from order placement to fill"
        );

        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            orders_placed: AtomicU64::new(0),
            orders_filled: AtomicU64::new(0),
            price_updates: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            active_sessions: AtomicU64::new(0),
            total_notional: AtomicU64::new(0f64.to_bits()),
            in_flight: Mutex::new(HashMap::new()),
            fill_latency: LatencyTracker::new(),
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn orders_placed(&self) -> u64 {
        self.orders_placed.load(Ordering::Relaxed)
    }

    pub fn orders_filled(&self) -> u64 {
        self.orders_filled.load(Ordering::Relaxed)
    }

    pub fn price_updates(&self) -> u64 {
        self.price_updates.load(Ordering::Relaxed)
    }

    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn total_notional(&self) -> f64 {
        f64::from_bits(self.total_notional.load(Ordering::Relaxed))
    }

    pub fn fill_latency(&self) -> LatencyStats {
        self.fill_latency.get_stats()
    }

    /// Orders placed whose fill has not been seen, up to `MAX_IN_FLIGHT`
    pub fn in_flight_orders(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn add_notional(&self, notional: f64) {
        let mut current = self.total_notional.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + notional).to_bits();
            match self.total_notional.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for SimulatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for SimulatorMetrics {
    fn on_message_sent(&self, _raw: &[u8], role: Role) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        counter!("simulator_messages_total", "direction" => "sent", "role" => role.to_string())
            .increment(1);
    }

    fn on_message_received(&self, _raw: &[u8], role: Role) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        counter!("simulator_messages_total", "direction" => "received", "role" => role.to_string())
            .increment(1);
    }

    fn on_price_changed(&self, symbol: &str, price: Price) {
        self.price_updates.fetch_add(1, Ordering::Relaxed);
        gauge!("simulator_price", "symbol" => symbol.to_string()).set(price);
    }

    fn on_order_placed(&self, order: &Order) {
        let placed = self.orders_placed.fetch_add(1, Ordering::Relaxed);
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.len() >= MAX_IN_FLIGHT {
                // Rejected orders are never answered
                let oldest = in_flight
                    .iter()
                    .min_by_key(|(_, (seq, _))| *seq)
                    .map(|(id, _)| id.clone());
                if let Some(id) = oldest {
                    in_flight.remove(&id);
                }
            }
            in_flight.insert(order.cl_ord_id.clone(), (placed, LatencyTimer::start()));
        }
        counter!("simulator_orders_total", "event" => "placed").increment(1);
    }

    fn on_order_filled(&self, execution: &ExecutionResult) {
        self.orders_filled.fetch_add(1, Ordering::Relaxed);
        self.add_notional(execution.notional);
        counter!("simulator_orders_total", "event" => "filled").increment(1);

        let timer = execution
            .cl_ord_id
            .as_ref()
            .and_then(|id| self.in_flight.lock().remove(id));
        if let Some((_, timer)) = timer {
            self.fill_latency.record_latency(timer.elapsed());
        }
    }

    fn on_session_state_changed(&self, _session_id: &SessionId, state: SessionState) {
        // Every Active session eventually passes through Disconnected
        let active = match state {
            SessionState::Active => self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1,
            SessionState::Disconnected => {
                let _ = self.active_sessions.fetch_update(
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                    |n| n.checked_sub(1),
                );
                self.active_sessions()
            }
            _ => return,
        };
        gauge!("simulator_sessions_active").set(active as f64);
    }

    fn on_warning(&self, warning: &SimulatorError) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        counter!("simulator_warnings_total", "kind" => warning_kind(warning)).increment(1);
    }
}

fn warning_kind(warning: &SimulatorError) -> &'static str {
    match warning {
        SimulatorError::MalformedMessage(_) => "malformed",
        SimulatorError::FieldNotFound(_) => "field_not_found",
        SimulatorError::InvalidQuantity => "invalid_quantity",
        SimulatorError::InvalidPrice => "invalid_price",
        SimulatorError::SessionNotActive => "session_not_active",
        SimulatorError::ConnectivityLost(_) => "connectivity_lost",
        SimulatorError::UnknownInstrument(_) => "unknown_instrument",
        SimulatorError::SequenceMismatch { .. } => "sequence_mismatch",
        SimulatorError::UnsupportedMessage(_) => "unsupported",
        SimulatorError::Config(_) => "config",
    }
}

#[derive(Debug)]
struct LatencyTracker {
    samples: AtomicU64,
    total_nanos: AtomicU64,
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl LatencyTracker {
    fn new() -> Self {
        Self {
            samples: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
        }
    }

    fn record_latency(&self, duration: Duration) {
        let nanos = duration.as_nanos() as u64;

        self.samples.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.min_nanos.fetch_min(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);

        histogram!("simulator_fill_latency_seconds").record(duration.as_secs_f64());
    }

    fn get_stats(&self) -> LatencyStats {
        let samples = self.samples.load(Ordering::Relaxed);
        let total = self.total_nanos.load(Ordering::Relaxed);
        let min = self.min_nanos.load(Ordering::Relaxed);

        LatencyStats {
            samples,
            avg_nanos: if samples > 0 { total / samples } else { 0 },
            min_nanos: if min == u64::MAX { 0 } else { min },
            max_nanos: self.max_nanos.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyStats {
    pub samples: u64,
    pub avg_nanos: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,
}

impl LatencyStats {
    pub fn avg_micros(&self) -> f64 {
        self.avg_nanos as f64 / 1_000.0
    }

    pub fn max_micros(&self) -> f64 {
        self.max_nanos as f64 / 1_000.0
    }
}

/// Background metrics reporter
pub struct MetricsReporter {
    metrics: Arc<SimulatorMetrics>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<SimulatorMetrics>, interval: Duration) -> Self {
        Self { metrics, interval }
    }

    pub async fn run(&self) {
        let mut interval = interval(self.interval);

        loop {
            interval.tick().await;

            let latency = self.metrics.fill_latency();
            info!(
                "Simulator metrics - Sessions: {} | Msgs: out {} in {} | Orders: {} placed {} filled | Notional: {:.2} | Ticks: {} | Warnings: {} | Fill latency (μs): avg={:.2} max={:.2}",
                self.metrics.active_sessions(),
                self.metrics.messages_sent(),
                self.metrics.messages_received(),
                self.metrics.orders_placed(),
                self.metrics.orders_filled(),
                self.metrics.total_notional(),
                self.metrics.price_updates(),
                self.metrics.warnings(),
                latency.avg_micros(),
                latency.max_micros()
            );
        }
    }
}
