//! # FIX Price Simulator
//!
//! A two-party trading simulator speaking a FIX-style tag=value protocol.
//! A market maker keeps a randomly walking book of instrument prices and
//! fills every incoming order at the current price; a client logs on,
//! routes market or limit orders, and observes the fills.
//!
//! ## Layers
//! - [`fix`]: message model and wire codec (BodyLength, CheckSum, framing)
//! - [`session`]: logon/logout state machine, sequence numbers, transports
//! - [`simulator`]: price book, order router and matching engine
//! - [`events`]: the observer contract every component publishes through
//! - [`metrics`], [`config`]: runtime counters and settings
//!
//! ## Example
//! ```rust,no_run
//! use fix_price_simulator::{PriceBook, SimulatorSettings, TracingSink};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let settings = SimulatorSettings::default();
//! let (book, _generator) =
//!     PriceBook::spawn(settings.instruments(), settings.tick_interval(), Arc::new(TracingSink));
//! println!("EUR/USD = {:?}", book.get("EUR/USD"));
//! # }
//! ```

pub mod config;
pub mod events;
pub mod fix;
pub mod metrics;
pub mod session;
pub mod simulator;
pub mod utils;

pub use config::{InstrumentSettings, SessionSettings, SimulatorSettings};
pub use events::{ChannelSink, EventSink, FanoutSink, RecordingSink, SimEvent, TracingSink};
pub use fix::{Message, MessageCodec, MsgType};
pub use metrics::{MetricsReporter, SimulatorMetrics};
pub use session::{
    spawn_tcp_session, ChannelTransport, Role, SessionApplication, SessionEngine, SessionId,
    SessionState, Transport,
};
pub use simulator::{
    ClientApplication, ExecutionResult, Instrument, MatchingEngine, Order, OrderRouter, OrderType,
    PriceBook, Side, SimulatorError, SimulatorResult,
};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::fix::tags;
    use crate::session::OutboundFrames;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn default_instruments() -> Vec<Instrument> {
        SimulatorSettings::default().instruments()
    }

    struct Endpoint {
        session: Arc<SessionEngine>,
        frames: OutboundFrames,
        sink: Arc<RecordingSink>,
    }

    fn client_endpoint(settings: &SessionSettings) -> (Endpoint, Arc<ClientApplication>) {
        let sink = Arc::new(RecordingSink::new());
        let book = Arc::new(PriceBook::new(default_instruments(), sink.clone()));
        let app = Arc::new(ClientApplication::new(book, sink.clone()));
        let (transport, frames) = ChannelTransport::new();
        let session = Arc::new(SessionEngine::new(
            settings.client_session_id(),
            Role::Client,
            Box::new(transport),
            app.clone(),
            sink.clone(),
        ));
        (
            Endpoint {
                session,
                frames,
                sink,
            },
            app,
        )
    }

    fn market_maker_endpoint(settings: &SessionSettings, book: Arc<PriceBook>) -> Endpoint {
        let sink = Arc::new(RecordingSink::new());
        let matching = Arc::new(MatchingEngine::new(book, sink.clone()));
        let (transport, frames) = ChannelTransport::new();
        let session = Arc::new(SessionEngine::new(
            settings.market_maker_session_id(),
            Role::MarketMaker,
            Box::new(transport),
            matching,
            sink.clone(),
        ));
        Endpoint {
            session,
            frames,
            sink,
        }
    }

    /// Shuttle frames between the two endpoints until both sides are quiet
    fn pump(a: &mut Endpoint, b: &mut Endpoint) {
        loop {
            let mut moved = false;
            while let Ok(frame) = a.frames.try_recv() {
                b.session.on_receive(&frame);
                moved = true;
            }
            while let Ok(frame) = b.frames.try_recv() {
                a.session.on_receive(&frame);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }

    #[test]
    fn test_end_to_end_fill_in_memory() {
        let settings = SessionSettings::default();
        let mm_book = Arc::new(PriceBook::new(
            default_instruments(),
            Arc::new(RecordingSink::new()),
        ));
        let (mut client, client_app) = client_endpoint(&settings);
        let mut market_maker = market_maker_endpoint(&settings, mm_book);

        client.session.connect().unwrap();
        pump(&mut client, &mut market_maker);
        assert_eq!(client.session.state(), SessionState::Active);
        assert_eq!(market_maker.session.state(), SessionState::Active);

        let router = OrderRouter::new(client.session.clone(), client.sink.clone());
        let order = router
            .place_order("GBP/USD", Side::Buy, 500.0, OrderType::Market, None)
            .unwrap();
        pump(&mut client, &mut market_maker);

        // The reply as it crossed the wire
        let codec = MessageCodec::default();
        let reply = market_maker
            .sink
            .sent()
            .last()
            .map(|raw| codec.decode(raw).unwrap())
            .unwrap();
        assert_eq!(reply.msg_type(), &MsgType::MarketDataSnapshot);
        assert_eq!(reply.get_field(tags::LAST_PX), Ok("2800"));
        assert_eq!(reply.get_field(tags::ORDER_QTY), Ok("500"));
        assert_eq!(reply.get_field(tags::AVG_PX), Ok("1400000"));
        assert_eq!(reply.get_field(tags::CL_ORD_ID), Ok(order.cl_ord_id.as_str()));

        let fills = client.sink.fills();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].executed_price, 2800.0);
        assert_eq!(fills[0].executed_quantity, 500.0);
        assert_eq!(fills[0].notional, 1_400_000.0);
        assert_eq!(client_app.book().get("GBP/USD"), Ok(2800.0));
        assert_eq!(market_maker.sink.fills().len(), 1);
        assert!(client.sink.warnings().is_empty());
        assert!(market_maker.sink.warnings().is_empty());
    }

    #[test]
    fn test_unknown_instrument_round_trip() {
        let settings = SessionSettings::default();
        let mm_book = Arc::new(PriceBook::new(
            default_instruments(),
            Arc::new(RecordingSink::new()),
        ));
        let (mut client, _) = client_endpoint(&settings);
        let mut market_maker = market_maker_endpoint(&settings, mm_book);

        client.session.connect().unwrap();
        pump(&mut client, &mut market_maker);

        let router = OrderRouter::new(client.session.clone(), client.sink.clone());
        router
            .place_order("AUD/CAD", Side::Sell, 10.0, OrderType::Market, None)
            .unwrap();
        pump(&mut client, &mut market_maker);

        assert!(client.sink.fills().is_empty());
        assert_eq!(
            market_maker.sink.warnings(),
            vec![SimulatorError::UnknownInstrument("AUD/CAD".to_string())]
        );
        // Sequence numbers stay in step for the next order
        router
            .place_order("EUR/USD", Side::Sell, 10.0, OrderType::Market, None)
            .unwrap();
        pump(&mut client, &mut market_maker);
        assert_eq!(client.sink.fills().len(), 1);
    }

    #[test]
    fn test_logout_handshake_in_memory() {
        let settings = SessionSettings::default();
        let mm_book = Arc::new(PriceBook::new(
            default_instruments(),
            Arc::new(RecordingSink::new()),
        ));
        let (mut client, _) = client_endpoint(&settings);
        let mut market_maker = market_maker_endpoint(&settings, mm_book);

        client.session.connect().unwrap();
        pump(&mut client, &mut market_maker);
        client.session.disconnect().unwrap();
        pump(&mut client, &mut market_maker);

        for endpoint in [&client, &market_maker] {
            assert_eq!(endpoint.session.state(), SessionState::Disconnected);
            assert!(endpoint.session.has_logged_out());
        }
        assert_eq!(
            client.session.send(Message::new(MsgType::NewOrderSingle)),
            Err(SimulatorError::SessionNotActive)
        );
    }

    async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<SimEvent>, mut predicate: F) -> SimEvent
    where
        F: FnMut(&SimEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("sink closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_end_to_end_fill_over_tcp() {
        let settings = SessionSettings::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mm_settings = settings.clone();
        let acceptor = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mm_sink: Arc<dyn EventSink> = Arc::new(TracingSink);
            let book = Arc::new(PriceBook::new(default_instruments(), mm_sink.clone()));
            let (transport, frames) = ChannelTransport::new();
            let session = Arc::new(SessionEngine::new(
                mm_settings.market_maker_session_id(),
                Role::MarketMaker,
                Box::new(transport),
                Arc::new(MatchingEngine::new(book, mm_sink.clone())),
                mm_sink,
            ));
            spawn_tcp_session(stream, session, frames).await.unwrap();
        });

        let (channel_sink, mut events) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(channel_sink);
        let book = Arc::new(PriceBook::new(default_instruments(), sink.clone()));
        let (transport, frames) = ChannelTransport::new();
        let session = Arc::new(SessionEngine::new(
            settings.client_session_id(),
            Role::Client,
            Box::new(transport),
            Arc::new(ClientApplication::new(book, sink.clone())),
            sink.clone(),
        ));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let connection = spawn_tcp_session(stream, session.clone(), frames);
        session.connect().unwrap();
        next_matching(&mut events, |e| {
            matches!(e, SimEvent::SessionStateChanged { state: SessionState::Active, .. })
        })
        .await;

        let router = OrderRouter::new(session.clone(), sink);
        router
            .place_order("GBP/USD", Side::Buy, 500.0, OrderType::Market, None)
            .unwrap();
        let fill = next_matching(&mut events, |e| matches!(e, SimEvent::OrderFilled { .. })).await;
        match fill {
            SimEvent::OrderFilled { execution } => {
                assert_eq!(execution.symbol, "GBP/USD");
                assert_eq!(execution.executed_price, 2800.0);
                assert_eq!(execution.notional, 1_400_000.0);
            }
            other => panic!("unexpected event {:?}", other),
        }

        session.disconnect().unwrap();
        tokio::time::timeout(Duration::from_secs(5), connection)
            .await
            .expect("client connection did not close")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), acceptor)
            .await
            .expect("market maker connection did not close")
            .unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.has_logged_out());
    }

    #[tokio::test]
    async fn test_peer_drop_is_connectivity_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let settings = SessionSettings::default();

        let (channel_sink, mut events) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(channel_sink);
        let (transport, frames) = ChannelTransport::new();
        let session = Arc::new(SessionEngine::new(
            settings.client_session_id(),
            Role::Client,
            Box::new(transport),
            Arc::new(ClientApplication::new(
                Arc::new(PriceBook::new(default_instruments(), sink.clone())),
                sink.clone(),
            )),
            sink,
        ));

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        let connection = spawn_tcp_session(stream, session.clone(), frames);
        session.connect().unwrap();
        drop(peer);

        let warning = next_matching(&mut events, |e| matches!(e, SimEvent::Warning { .. })).await;
        assert!(matches!(
            warning,
            SimEvent::Warning {
                warning: SimulatorError::ConnectivityLost(_)
            }
        ));
        connection.await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_oversized_body_length_is_skipped_over_tcp() {
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let settings = SessionSettings::default();

        let (channel_sink, mut events) = ChannelSink::new();
        let sink: Arc<dyn EventSink> = Arc::new(channel_sink);
        let book = Arc::new(PriceBook::new(default_instruments(), sink.clone()));
        let (transport, frames) = ChannelTransport::new();
        let session = Arc::new(SessionEngine::new(
            settings.market_maker_session_id(),
            Role::MarketMaker,
            Box::new(transport),
            Arc::new(MatchingEngine::new(book, sink.clone())),
            sink,
        ));

        let mut peer = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let connection = spawn_tcp_session(stream, session.clone(), frames);

        let client_id = settings.client_session_id();
        let codec = MessageCodec::default();
        let from_client = |msg_type: MsgType, seq: u64| {
            codec.encode(
                &Message::new(msg_type)
                    .with_field(tags::SENDER_COMP_ID, &client_id.sender_comp_id)
                    .with_field(tags::TARGET_COMP_ID, &client_id.target_comp_id)
                    .with_field(tags::MSG_SEQ_NUM, seq),
            )
        };

        peer.write_all(&from_client(MsgType::Logon, 1)).await.unwrap();
        next_matching(&mut events, |e| {
            matches!(e, SimEvent::SessionStateChanged { state: SessionState::Active, .. })
        })
        .await;

        // usize::MAX BodyLength followed by a well-formed Heartbeat
        let mut hostile = b"8=FIX.4.4\x019=18446744073709551615\x0135=0\x01".to_vec();
        hostile.extend_from_slice(&from_client(MsgType::Heartbeat, 2));
        peer.write_all(&hostile).await.unwrap();

        let warning = next_matching(&mut events, |e| matches!(e, SimEvent::Warning { .. })).await;
        assert!(matches!(
            warning,
            SimEvent::Warning {
                warning: SimulatorError::MalformedMessage(_)
            }
        ));

        drop(peer);
        let warning = next_matching(&mut events, |e| matches!(e, SimEvent::Warning { .. })).await;
        assert!(matches!(
            warning,
            SimEvent::Warning {
                warning: SimulatorError::ConnectivityLost(_)
            }
        ));
        connection.await.unwrap();

        assert_eq!(session.next_inbound_seq(), 3);
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
