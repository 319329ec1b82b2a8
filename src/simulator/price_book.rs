use parking_lot::Mutex;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::events::EventSink;
use crate::simulator::error::{SimulatorError, SimulatorResult};
use crate::simulator::types::{Instrument, Price};

/// Authoritative symbol -> price map shared by the generator and readers.
///
/// All access goes through one mutex: a tick mutates every instrument while
/// holding it, so readers see either the whole tick or none of it.
pub struct PriceBook {
    prices: Mutex<BTreeMap<String, Price>>,
    running: AtomicBool,
    ticks: AtomicU64,
    sink: Arc<dyn EventSink>,
}

impl PriceBook {
    /// A book without a generator; prices move only via `tick`/`update`.
    pub fn new(instruments: Vec<Instrument>, sink: Arc<dyn EventSink>) -> Self {
        info!("Creating price book for {} instruments", instruments.len());

        let prices = instruments
            .into_iter()
            .map(|instrument| (instrument.symbol, instrument.price))
            .collect();

        Self {
            prices: Mutex::new(prices),
            running: AtomicBool::new(true),
            ticks: AtomicU64::new(0),
            sink,
        }
    }

    /// Build a book and start its background generator on the current
    /// runtime. The generator runs until `stop` is observed at a tick
    /// boundary.
    pub fn spawn(
        instruments: Vec<Instrument>,
        tick_interval: Duration,
        sink: Arc<dyn EventSink>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let book = Arc::new(Self::new(instruments, sink));
        let handle = tokio::spawn(Arc::clone(&book).run_generator(tick_interval));
        (book, handle)
    }

    async fn run_generator(self: Arc<Self>, tick_interval: Duration) {
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick of a tokio interval completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            self.tick();
        }

        info!("Price generator stopped after {} ticks", self.tick_count());
    }

    /// Move every instrument by a uniform delta in [-1, 1].
    pub fn tick(&self) {
        self.tick_with(&mut rand::thread_rng());
    }

    pub fn tick_with<R: Rng + ?Sized>(&self, rng: &mut R) {
        let changes: Vec<(String, Price)> = {
            let mut prices = self.prices.lock();
            prices
                .iter_mut()
                .map(|(symbol, price)| {
                    *price += rng.gen_range(-1.0..=1.0);
                    (symbol.clone(), *price)
                })
                .collect()
        };

        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Tick {} applied to {} instruments", tick, changes.len());

        for (symbol, price) in &changes {
            self.sink.on_price_changed(symbol, *price);
        }
    }

    pub fn get(&self, symbol: &str) -> SimulatorResult<Price> {
        self.prices
            .lock()
            .get(symbol)
            .copied()
            .ok_or_else(|| SimulatorError::UnknownInstrument(symbol.to_string()))
    }

    /// Point-in-time copy of every price, taken from a single tick
    pub fn snapshot(&self) -> BTreeMap<String, Price> {
        self.prices.lock().clone()
    }

    /// Overwrite (or start tracking) one instrument's price
    pub fn update(&self, symbol: &str, price: Price) {
        self.prices.lock().insert(symbol.to_string(), price);
        self.sink.on_price_changed(symbol, price);
    }

    /// Tracked symbols in ascending order
    pub fn symbols(&self) -> Vec<String> {
        self.prices.lock().keys().cloned().collect()
    }

    /// Ask the generator to finish; honoured at the next tick boundary.
    pub fn stop(&self) {
        info!("Stopping price generator");
        self.running.store(false, Ordering::Relaxed);
    }

    /// False once `stop` has been called
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Generator ticks applied so far. `update` calls are not counted.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PriceBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceBook")
            .field("prices", &*self.prices.lock())
            .field("running", &self.is_running())
            .field("ticks", &self.tick_count())
            .finish()
    }
}
