use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::EventSink;
use crate::fix::message::{Message, MsgType};
use crate::fix::tags;
use crate::session::engine::{SessionApplication, SessionEngine};
use crate::session::state::SessionId;
use crate::simulator::error::{SimulatorError, SimulatorResult};
use crate::simulator::price_book::PriceBook;
use crate::simulator::types::{ExecutionResult, Quantity};

/// Market-maker side: fills every order in full at the current book price.
///
/// There is no resting liquidity; the book price is the execution price.
pub struct MatchingEngine {
    book: Arc<PriceBook>,
    sink: Arc<dyn EventSink>,
}

impl MatchingEngine {
    pub fn new(book: Arc<PriceBook>, sink: Arc<dyn EventSink>) -> Self {
        Self { book, sink }
    }

    /// Book shared with the generator and every other session
    pub fn book(&self) -> &Arc<PriceBook> {
        &self.book
    }

    /// Price an inbound NewOrderSingle and reply on the session it came in on.
    pub fn on_order(
        &self,
        message: &Message,
        session: &SessionEngine,
    ) -> SimulatorResult<ExecutionResult> {
        let execution = self.execute(message)?;
        session.send(Self::execution_message(&execution))?;

        info!(
            "Filled {} {} at {} for {}",
            execution.executed_quantity,
            execution.symbol,
            execution.executed_price,
            session.session_id()
        );
        self.sink.on_order_filled(&execution);
        Ok(execution)
    }

    /// Compute the fill without sending anything
    pub fn execute(&self, message: &Message) -> SimulatorResult<ExecutionResult> {
        let symbol = message.get_field(tags::SYMBOL)?;
        let quantity: Quantity = message.get_parsed(tags::ORDER_QTY)?;
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(SimulatorError::FieldNotFound(tags::ORDER_QTY));
        }
        let price = self.book.get(symbol)?;
        let cl_ord_id = message.get_field(tags::CL_ORD_ID).ok().map(str::to_string);

        debug!(
            "Matching {:?} for {} {} at book price {}",
            cl_ord_id, quantity, symbol, price
        );

        Ok(ExecutionResult::new(
            cl_ord_id,
            symbol.to_string(),
            quantity,
            price,
        ))
    }

    /// Market data response: AvgPx carries the notional value
    pub fn execution_message(execution: &ExecutionResult) -> Message {
        let mut message = Message::new(MsgType::MarketDataSnapshot)
            .with_field(tags::SYMBOL, &execution.symbol)
            .with_field(tags::LAST_PX, execution.executed_price)
            .with_field(tags::ORDER_QTY, execution.executed_quantity)
            .with_field(tags::AVG_PX, execution.notional);
        if let Some(cl_ord_id) = &execution.cl_ord_id {
            message.set_field(tags::CL_ORD_ID, cl_ord_id);
        }
        message
    }
}

impl SessionApplication for MatchingEngine {
    fn on_logon(&self, session_id: &SessionId) {
        info!("Counterparty logged on: {}", session_id);
    }

    fn on_logout(&self, session_id: &SessionId) {
        info!("Counterparty logged out: {}", session_id);
    }

    fn on_inbound_message(&self, session: &SessionEngine, message: &Message) {
        match message.msg_type() {
            MsgType::NewOrderSingle => {
                if let Err(e) = self.on_order(message, session) {
                    // send() has already reported its own failures
                    if !matches!(
                        e,
                        SimulatorError::SessionNotActive | SimulatorError::ConnectivityLost(_)
                    ) {
                        warn!("Order not filled: {}", e);
                        self.sink.on_warning(&e);
                    }
                }
            }
            other => {
                let e = SimulatorError::UnsupportedMessage(other.to_string());
                warn!("Unprocessed message from {}: {}", session.session_id(), message);
                self.sink.on_warning(&e);
            }
        }
    }
}

impl std::fmt::Debug for MatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingEngine")
            .field("book", &self.book)
            .finish()
    }
}
