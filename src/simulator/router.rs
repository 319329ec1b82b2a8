use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::EventSink;
use crate::fix::message::{Message, MsgType};
use crate::fix::tags;
use crate::session::engine::{SessionApplication, SessionEngine};
use crate::session::state::SessionId;
use crate::simulator::error::{SimulatorError, SimulatorResult};
use crate::simulator::price_book::PriceBook;
use crate::simulator::types::{ExecutionResult, Order, OrderType, Price, Quantity, Side};
use crate::utils::time::fix_timestamp;

/// Parse user-entered quantity text
pub fn parse_quantity(input: &str) -> SimulatorResult<Quantity> {
    input
        .trim()
        .parse::<Quantity>()
        .map_err(|_| SimulatorError::InvalidQuantity)
}

fn parse_limit_price(input: Option<&str>) -> SimulatorResult<Price> {
    let price = input
        .ok_or(SimulatorError::InvalidPrice)?
        .trim()
        .parse::<Price>()
        .map_err(|_| SimulatorError::InvalidPrice)?;
    if !price.is_finite() {
        return Err(SimulatorError::InvalidPrice);
    }
    Ok(price)
}

/// Client side: validates user orders and sends them as NewOrderSingle.
pub struct OrderRouter {
    session: Arc<SessionEngine>,
    sink: Arc<dyn EventSink>,
    id_prefix: String,
    next_id: AtomicU64,
}

impl OrderRouter {
    /// ClOrdIDs are `<8 hex chars of a v4 uuid>-<6-digit counter>`, so ids
    /// from separate runs against the same market maker do not collide.
    pub fn new(session: Arc<SessionEngine>, sink: Arc<dyn EventSink>) -> Self {
        let mut id_prefix = Uuid::new_v4().simple().to_string();
        id_prefix.truncate(8);

        Self {
            session,
            sink,
            id_prefix,
            next_id: AtomicU64::new(1),
        }
    }

    /// Session orders are sent on
    pub fn session(&self) -> &Arc<SessionEngine> {
        &self.session
    }

    /// Validate, stamp and send one order. Nothing goes on the wire when
    /// validation fails.
    pub fn place_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Quantity,
        order_type: OrderType,
        limit_price: Option<&str>,
    ) -> SimulatorResult<Order> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err(SimulatorError::InvalidQuantity);
        }

        let price = match order_type {
            OrderType::Limit => Some(parse_limit_price(limit_price)?),
            OrderType::Market => None,
        };

        let cl_ord_id = self.next_cl_ord_id();
        let order = match price {
            Some(price) => Order::new_limit(cl_ord_id, symbol.to_string(), side, price, quantity),
            None => Order::new_market(cl_ord_id, symbol.to_string(), side, quantity),
        };

        debug!("Routing order {}", order);
        self.session.send(Self::order_message(&order))?;

        info!("Order placed: {}", order);
        self.sink.on_order_placed(&order);
        Ok(order)
    }

    /// NewOrderSingle body for `order`. Price (44) only appears on limit
    /// orders; the session adds the header.
    pub fn order_message(order: &Order) -> Message {
        let mut message = Message::new(MsgType::NewOrderSingle)
            .with_field(tags::CL_ORD_ID, &order.cl_ord_id)
            .with_field(tags::SYMBOL, &order.symbol)
            .with_field(tags::SIDE, order.side.fix_code())
            .with_field(tags::ORDER_QTY, order.quantity)
            .with_field(tags::ORD_TYPE, order.order_type.fix_code());
        if let Some(price) = order.price {
            message.set_field(tags::PRICE, price);
        }
        message.with_field(tags::TRANSACT_TIME, fix_timestamp(order.transact_time))
    }

    fn next_cl_ord_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{:06}", self.id_prefix, n)
    }
}

impl std::fmt::Debug for OrderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRouter")
            .field("session", self.session.session_id())
            .field("id_prefix", &self.id_prefix)
            .finish()
    }
}

/// Client-side handler for market-maker replies. Each fill's LastPx is
/// mirrored into the client's own price book.
pub struct ClientApplication {
    book: Arc<PriceBook>,
    sink: Arc<dyn EventSink>,
}

impl ClientApplication {
    pub fn new(book: Arc<PriceBook>, sink: Arc<dyn EventSink>) -> Self {
        Self { book, sink }
    }

    /// Book that fills are mirrored into
    pub fn book(&self) -> &Arc<PriceBook> {
        &self.book
    }

    /// Read a fill out of a W/8 reply. AvgPx, when present, is taken as the
    /// notional value as sent.
    pub fn execution_from_message(message: &Message) -> SimulatorResult<ExecutionResult> {
        let symbol = message.get_field(tags::SYMBOL)?;
        let price: Price = message.get_parsed(tags::LAST_PX)?;
        let quantity: Quantity = message.get_parsed(tags::ORDER_QTY)?;
        let cl_ord_id = message.get_field(tags::CL_ORD_ID).ok().map(str::to_string);

        let mut execution = ExecutionResult::new(cl_ord_id, symbol.to_string(), quantity, price);
        if message.has_field(tags::AVG_PX) {
            execution.notional = message.get_parsed(tags::AVG_PX)?;
        }
        Ok(execution)
    }

    fn on_fill(&self, message: &Message) -> SimulatorResult<()> {
        let execution = Self::execution_from_message(message)?;
        self.book
            .update(&execution.symbol, execution.executed_price);
        self.sink.on_order_filled(&execution);
        Ok(())
    }
}

impl SessionApplication for ClientApplication {
    fn on_logon(&self, session_id: &SessionId) {
        info!("Logged on to market maker: {}", session_id);
    }

    fn on_logout(&self, session_id: &SessionId) {
        info!("Logged out: {}", session_id);
    }

    fn on_inbound_message(&self, _session: &SessionEngine, message: &Message) {
        let result = match message.msg_type() {
            MsgType::MarketDataSnapshot | MsgType::ExecutionReport => self.on_fill(message),
            other => Err(SimulatorError::UnsupportedMessage(other.to_string())),
        };

        if let Err(e) = result {
            warn!("Dropped reply {}: {}", message, e);
            self.sink.on_warning(&e);
        }
    }
}
