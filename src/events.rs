//! Observer contract through which sessions, the router, the matching
//! engine and the price book publish what they do.
//!
//! Sinks are injected as `Arc<dyn EventSink>` at construction; every method
//! has a no-op default so consumers implement only what they render.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::fix::codec::SOH;
use crate::session::state::{Role, SessionId, SessionState};
use crate::simulator::error::SimulatorError;
use crate::simulator::types::{ExecutionResult, Order, Price};

pub trait EventSink: Send + Sync {
    fn on_message_sent(&self, _raw: &[u8], _role: Role) {}

    fn on_message_received(&self, _raw: &[u8], _role: Role) {}

    fn on_price_changed(&self, _symbol: &str, _price: Price) {}

    fn on_order_placed(&self, _order: &Order) {}

    fn on_order_filled(&self, _execution: &ExecutionResult) {}

    fn on_session_state_changed(&self, _session_id: &SessionId, _state: SessionState) {}

    /// A message or operation was dropped; carries the triggering error
    fn on_warning(&self, _warning: &SimulatorError) {}
}

/// Render raw wire bytes with `|` in place of SOH.
pub fn printable(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| if *b == SOH { '|' } else { *b as char })
        .collect()
}

/// Owned form of every sink callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    MessageSent { raw: Vec<u8>, role: Role },
    MessageReceived { raw: Vec<u8>, role: Role },
    PriceChanged { symbol: String, price: Price },
    OrderPlaced { order: Order },
    OrderFilled { execution: ExecutionResult },
    SessionStateChanged { session_id: SessionId, state: SessionState },
    Warning { warning: SimulatorError },
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_message_sent(&self, raw: &[u8], role: Role) {
        debug!("[{}] sent: {}", role, printable(raw));
    }

    fn on_message_received(&self, raw: &[u8], role: Role) {
        debug!("[{}] received: {}", role, printable(raw));
    }

    fn on_price_changed(&self, symbol: &str, price: Price) {
        debug!("Price update: {} is now {:.2}", symbol, price);
    }

    fn on_order_placed(&self, order: &Order) {
        info!("Order placed: {}", order);
    }

    fn on_order_filled(&self, execution: &ExecutionResult) {
        info!(
            "Order executed: {} of {} at {} (notional {:.2})",
            execution.executed_quantity,
            execution.symbol,
            execution.executed_price,
            execution.notional
        );
    }

    fn on_session_state_changed(&self, session_id: &SessionId, state: SessionState) {
        info!("Session {} is now {}", session_id, state);
    }

    fn on_warning(&self, warning: &SimulatorError) {
        warn!("{}", warning);
    }
}

/// Captures events in memory; used by tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SimEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().clone()
    }

    pub fn warnings(&self) -> Vec<SimulatorError> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SimEvent::Warning { warning } => Some(warning.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn fills(&self) -> Vec<ExecutionResult> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SimEvent::OrderFilled { execution } => Some(execution.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SimEvent::MessageSent { raw, .. } => Some(raw.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SimEvent::SessionStateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SimEvent) {
        self.events.lock().push(event);
    }
}

impl EventSink for RecordingSink {
    fn on_message_sent(&self, raw: &[u8], role: Role) {
        self.push(SimEvent::MessageSent {
            raw: raw.to_vec(),
            role,
        });
    }

    fn on_message_received(&self, raw: &[u8], role: Role) {
        self.push(SimEvent::MessageReceived {
            raw: raw.to_vec(),
            role,
        });
    }

    fn on_price_changed(&self, symbol: &str, price: Price) {
        self.push(SimEvent::PriceChanged {
            symbol: symbol.to_string(),
            price,
        });
    }

    fn on_order_placed(&self, order: &Order) {
        self.push(SimEvent::OrderPlaced {
            order: order.clone(),
        });
    }

    fn on_order_filled(&self, execution: &ExecutionResult) {
        self.push(SimEvent::OrderFilled {
            execution: execution.clone(),
        });
    }

    fn on_session_state_changed(&self, session_id: &SessionId, state: SessionState) {
        self.push(SimEvent::SessionStateChanged {
            session_id: session_id.clone(),
            state,
        });
    }

    fn on_warning(&self, warning: &SimulatorError) {
        self.push(SimEvent::Warning {
            warning: warning.clone(),
        });
    }
}

/// Forwards events to an async consumer such as a CLI render loop.
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SimEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SimEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SimEvent) {
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_message_sent(&self, raw: &[u8], role: Role) {
        self.forward(SimEvent::MessageSent {
            raw: raw.to_vec(),
            role,
        });
    }

    fn on_message_received(&self, raw: &[u8], role: Role) {
        self.forward(SimEvent::MessageReceived {
            raw: raw.to_vec(),
            role,
        });
    }

    fn on_price_changed(&self, symbol: &str, price: Price) {
        self.forward(SimEvent::PriceChanged {
            symbol: symbol.to_string(),
            price,
        });
    }

    fn on_order_placed(&self, order: &Order) {
        self.forward(SimEvent::OrderPlaced {
            order: order.clone(),
        });
    }

    fn on_order_filled(&self, execution: &ExecutionResult) {
        self.forward(SimEvent::OrderFilled {
            execution: execution.clone(),
        });
    }

    fn on_session_state_changed(&self, session_id: &SessionId, state: SessionState) {
        self.forward(SimEvent::SessionStateChanged {
            session_id: session_id.clone(),
            state,
        });
    }

    fn on_warning(&self, warning: &SimulatorError) {
        self.forward(SimEvent::Warning {
            warning: warning.clone(),
        });
    }
}

/// Broadcasts to several sinks in order
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn on_message_sent(&self, raw: &[u8], role: Role) {
        self.sinks.iter().for_each(|s| s.on_message_sent(raw, role));
    }

    fn on_message_received(&self, raw: &[u8], role: Role) {
        self.sinks
            .iter()
            .for_each(|s| s.on_message_received(raw, role));
    }

    fn on_price_changed(&self, symbol: &str, price: Price) {
        self.sinks
            .iter()
            .for_each(|s| s.on_price_changed(symbol, price));
    }

    fn on_order_placed(&self, order: &Order) {
        self.sinks.iter().for_each(|s| s.on_order_placed(order));
    }

    fn on_order_filled(&self, execution: &ExecutionResult) {
        self.sinks.iter().for_each(|s| s.on_order_filled(execution));
    }

    fn on_session_state_changed(&self, session_id: &SessionId, state: SessionState) {
        self.sinks
            .iter()
            .for_each(|s| s.on_session_state_changed(session_id, state));
    }

    fn on_warning(&self, warning: &SimulatorError) {
        self.sinks.iter().for_each(|s| s.on_warning(warning));
    }
}
