use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::events::{printable, EventSink};
use crate::fix::codec::MessageCodec;
use crate::fix::message::{Message, MsgType};
use crate::fix::tags;
use crate::session::state::{Role, SessionId, SessionState};
use crate::session::transport::Transport;
use crate::simulator::error::{SimulatorError, SimulatorResult};
use crate::utils::time::fix_timestamp;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u32 = 30;

/// Text (58) carried on a Logout we initiate
pub const LOGOUT_TEXT: &str = "Logout requested";

/// Capabilities a session participant (order router, matching engine)
/// plugs into a `SessionEngine`.
pub trait SessionApplication: Send + Sync {
    fn on_session_created(&self, _session_id: &SessionId) {}

    fn on_logon(&self, _session_id: &SessionId) {}

    fn on_logout(&self, _session_id: &SessionId) {}

    /// Application-level message accepted by an active session. Replies go
    /// back through `session.send`.
    fn on_inbound_message(&self, session: &SessionEngine, message: &Message);

    fn on_outbound_message(&self, _session_id: &SessionId, _message: &Message) {}
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    next_outbound_seq: u64,
    next_inbound_seq: u64,
    logged_out: bool,
}

/// What an inbound message asks of the session once its lock is released
enum Dispatch {
    Reject(SimulatorError),
    Ignore,
    Application(Message),
    Admin {
        transitions: Vec<SessionState>,
        reply: Option<(Message, Bytes)>,
        logged_on: bool,
        logged_out: bool,
    },
    TransportLost(SimulatorError),
}

/// Protocol state for one connection: logon/logout sequencing, sequence
/// numbers and the encode/decode boundary.
///
/// State and sequence numbers sit behind one mutex. Sink and application
/// callbacks always run after it is released, so an application may call
/// `send` from `on_inbound_message`.
pub struct SessionEngine {
    session_id: SessionId,
    role: Role,
    codec: MessageCodec,
    heartbeat_interval: u32,
    inner: Mutex<SessionInner>,
    transport: Box<dyn Transport>,
    application: Arc<dyn SessionApplication>,
    sink: Arc<dyn EventSink>,
}

impl SessionEngine {
    pub fn new(
        session_id: SessionId,
        role: Role,
        transport: Box<dyn Transport>,
        application: Arc<dyn SessionApplication>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        info!("Session created: {} ({})", session_id, role);
        application.on_session_created(&session_id);

        Self {
            codec: MessageCodec::new(session_id.begin_string.clone()),
            session_id,
            role,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            inner: Mutex::new(SessionInner {
                state: SessionState::Disconnected,
                next_outbound_seq: 1,
                next_inbound_seq: 1,
                logged_out: false,
            }),
            transport,
            application,
            sink,
        }
    }

    pub fn with_heartbeat_interval(mut self, secs: u32) -> Self {
        self.heartbeat_interval = secs;
        self
    }

    /// Identity stamped on every outbound header (49/56, BeginString)
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state; a snapshot, it may change as soon as the lock drops
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// True once a Logout exchange has completed
    pub fn has_logged_out(&self) -> bool {
        self.inner.lock().logged_out
    }

    /// MsgSeqNum the next accepted send will carry
    pub fn next_outbound_seq(&self) -> u64 {
        self.inner.lock().next_outbound_seq
    }

    /// MsgSeqNum expected from the counterparty
    pub fn next_inbound_seq(&self) -> u64 {
        self.inner.lock().next_inbound_seq
    }

    /// Initiate: Disconnected -> LogonPending, sending Logon with seq 1.
    pub fn connect(&self) -> SimulatorResult<()> {
        let shipped = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Disconnected {
                warn!(
                    "connect() ignored: session {} is {}",
                    self.session_id, inner.state
                );
                return Ok(());
            }

            inner.next_outbound_seq = 1;
            inner.next_inbound_seq = 1;
            inner.logged_out = false;
            inner.state = SessionState::LogonPending;

            let mut logon = self.logon_message();
            self.stamp_and_ship(&mut inner, &mut logon)
                .map(|frame| (logon, frame))
        };

        self.publish_state(SessionState::LogonPending);
        match shipped {
            Ok((logon, frame)) => {
                self.after_send(&logon, &frame);
                Ok(())
            }
            Err(e) => {
                self.on_transport_lost(&e.to_string());
                Err(e)
            }
        }
    }

    /// Send an application message; only legal while Active.
    /// Returns the MsgSeqNum assigned to it.
    pub fn send(&self, mut message: Message) -> SimulatorResult<u64> {
        let shipped = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Active {
                drop(inner);
                let err = SimulatorError::SessionNotActive;
                self.report(err.clone());
                return Err(err);
            }
            let seq = inner.next_outbound_seq;
            self.stamp_and_ship(&mut inner, &mut message)
                .map(|frame| (seq, frame))
        };

        match shipped {
            Ok((seq, frame)) => {
                self.after_send(&message, &frame);
                Ok(seq)
            }
            Err(e) => {
                self.on_transport_lost(&e.to_string());
                Err(e)
            }
        }
    }

    /// Begin logging out. Completion is observed when the counterparty's
    /// Logout arrives or the connection closes.
    pub fn disconnect(&self) -> SimulatorResult<()> {
        let outcome = {
            let mut inner = self.inner.lock();
            match inner.state {
                SessionState::Active => {
                    inner.state = SessionState::LogoutPending;
                    let mut logout =
                        Message::new(MsgType::Logout).with_field(tags::TEXT, LOGOUT_TEXT);
                    Some(
                        self.stamp_and_ship(&mut inner, &mut logout)
                            .map(|frame| (SessionState::LogoutPending, Some((logout, frame)))),
                    )
                }
                SessionState::LogonPending => {
                    inner.state = SessionState::Disconnected;
                    inner.logged_out = true;
                    Some(Ok((SessionState::Disconnected, None)))
                }
                _ => None,
            }
        };

        match outcome {
            None => Ok(()),
            Some(Ok((state, sent))) => {
                self.publish_state(state);
                match sent {
                    Some((logout, frame)) => self.after_send(&logout, &frame),
                    // Never logged on: nothing to wait for
                    None => self.close_transport(),
                }
                Ok(())
            }
            Some(Err(e)) => {
                self.on_transport_lost(&e.to_string());
                Err(e)
            }
        }
    }

    /// Handle one complete inbound frame.
    pub fn on_receive(&self, raw: &[u8]) {
        self.sink.on_message_received(raw, self.role);
        debug!("[{}] received: {}", self.role, printable(raw));

        let message = match self.codec.decode(raw) {
            Ok(message) => message,
            Err(e) => return self.report(e),
        };
        let seq = match message.seq_num() {
            Ok(seq) => seq,
            Err(e) => return self.report(e),
        };

        let dispatch = {
            let mut inner = self.inner.lock();
            if seq != inner.next_inbound_seq {
                Dispatch::Reject(SimulatorError::SequenceMismatch {
                    expected: inner.next_inbound_seq,
                    received: seq,
                })
            } else {
                self.dispatch(&mut inner, message)
            }
        };

        match dispatch {
            Dispatch::Reject(e) => self.report(e),
            Dispatch::Ignore => {}
            Dispatch::Application(message) => {
                self.application.on_inbound_message(self, &message);
            }
            Dispatch::Admin {
                transitions,
                reply,
                logged_on,
                logged_out,
            } => {
                for state in transitions {
                    self.publish_state(state);
                }
                if let Some((message, frame)) = reply {
                    self.after_send(&message, &frame);
                }
                if logged_on {
                    info!("Logon successful: {}", self.session_id);
                    self.application.on_logon(&self.session_id);
                }
                if logged_out {
                    info!("Logout: {}", self.session_id);
                    self.application.on_logout(&self.session_id);
                }
            }
            Dispatch::TransportLost(e) => self.on_transport_lost(&e.to_string()),
        }
    }

    /// The connection is gone. Forces Disconnected; unless a logout was
    /// already under way this is reported as `ConnectivityLost`.
    pub fn on_transport_lost(&self, reason: &str) {
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.state = SessionState::Disconnected;
            if previous == SessionState::LogoutPending {
                inner.logged_out = true;
            }
            previous
        };

        match previous {
            SessionState::Disconnected => {
                debug!("Transport for {} closed: {}", self.session_id, reason)
            }
            SessionState::LogoutPending => {
                info!("Transport for {} closed during logout", self.session_id);
                self.publish_state(SessionState::Disconnected);
                self.application.on_logout(&self.session_id);
            }
            _ => {
                error!("Session {} lost connectivity: {}", self.session_id, reason);
                self.publish_state(SessionState::Disconnected);
                self.sink
                    .on_warning(&SimulatorError::ConnectivityLost(reason.to_string()));
            }
        }
    }

    /// Log and publish a non-fatal problem with an inbound message.
    pub fn report(&self, error: SimulatorError) {
        warn!("[{}] {}: {}", self.role, self.session_id, error);
        self.sink.on_warning(&error);
    }

    /// Close the outbound side so the writer task can finish
    pub fn close_transport(&self) {
        self.transport.close();
    }

    fn dispatch(&self, inner: &mut SessionInner, message: Message) -> Dispatch {
        if message.msg_type().is_admin() {
            return self.dispatch_admin(inner, &message);
        }
        if inner.state != SessionState::Active {
            return Dispatch::Reject(SimulatorError::SessionNotActive);
        }
        inner.next_inbound_seq += 1;
        Dispatch::Application(message)
    }

    /// Logon, Logout and Heartbeat never reach the application
    fn dispatch_admin(&self, inner: &mut SessionInner, message: &Message) -> Dispatch {
        match message.msg_type() {
            MsgType::Logon => {
                if let Err(e) = self.verify_counterparty(message) {
                    return Dispatch::Reject(e);
                }
                match inner.state {
                    SessionState::LogonPending => {
                        inner.next_inbound_seq += 1;
                        inner.state = SessionState::Active;
                        Dispatch::Admin {
                            transitions: vec![SessionState::Active],
                            reply: None,
                            logged_on: true,
                            logged_out: false,
                        }
                    }
                    SessionState::Disconnected => {
                        // Acceptor side: acknowledge with our own Logon
                        inner.next_inbound_seq += 1;
                        inner.next_outbound_seq = 1;
                        inner.logged_out = false;
                        let mut logon = self.logon_message();
                        match self.stamp_and_ship(inner, &mut logon) {
                            Ok(frame) => {
                                inner.state = SessionState::Active;
                                Dispatch::Admin {
                                    transitions: vec![
                                        SessionState::LogonPending,
                                        SessionState::Active,
                                    ],
                                    reply: Some((logon, frame)),
                                    logged_on: true,
                                    logged_out: false,
                                }
                            }
                            Err(e) => Dispatch::TransportLost(e),
                        }
                    }
                    state => Dispatch::Reject(SimulatorError::UnsupportedMessage(format!(
                        "{} while {}",
                        message.msg_type(),
                        state
                    ))),
                }
            }
            MsgType::Logout => {
                if let Ok(text) = message.get_field(tags::TEXT) {
                    info!("Logout from {}: {}", self.session_id.target_comp_id, text);
                }
                self.dispatch_logout(inner, message)
            }
            // Heartbeat
            _ => {
                inner.next_inbound_seq += 1;
                Dispatch::Ignore
            }
        }
    }

    fn dispatch_logout(&self, inner: &mut SessionInner, message: &Message) -> Dispatch {
        match inner.state {
            SessionState::Active => {
                inner.next_inbound_seq += 1;
                inner.state = SessionState::LogoutPending;
                let mut ack = Message::new(MsgType::Logout);
                let reply = self.stamp_and_ship(inner, &mut ack).ok().map(|f| (ack, f));
                inner.state = SessionState::Disconnected;
                inner.logged_out = true;
                Dispatch::Admin {
                    transitions: vec![SessionState::LogoutPending, SessionState::Disconnected],
                    reply,
                    logged_on: false,
                    logged_out: true,
                }
            }
            SessionState::LogoutPending => {
                inner.next_inbound_seq += 1;
                inner.state = SessionState::Disconnected;
                inner.logged_out = true;
                Dispatch::Admin {
                    transitions: vec![SessionState::Disconnected],
                    reply: None,
                    logged_on: false,
                    logged_out: true,
                }
            }
            state => Dispatch::Reject(SimulatorError::UnsupportedMessage(format!(
                "{} while {}",
                message.msg_type(),
                state
            ))),
        }
    }

    /// Logon must come from our target, addressed to us
    fn verify_counterparty(&self, message: &Message) -> SimulatorResult<()> {
        let sender = message.get_field(tags::SENDER_COMP_ID)?;
        let target = message.get_field(tags::TARGET_COMP_ID)?;
        if sender != self.session_id.target_comp_id || target != self.session_id.sender_comp_id {
            return Err(SimulatorError::MalformedMessage(format!(
                "Logon from {}->{} does not match session {}",
                sender, target, self.session_id
            )));
        }
        Ok(())
    }

    fn logon_message(&self) -> Message {
        Message::new(MsgType::Logon)
            .with_field(tags::ENCRYPT_METHOD, 0)
            .with_field(tags::HEART_BT_INT, self.heartbeat_interval)
    }

    /// Fill in the standard header, encode and hand to the transport.
    /// The sequence number is consumed only if the transport accepted it.
    fn stamp_and_ship(
        &self,
        inner: &mut SessionInner,
        message: &mut Message,
    ) -> SimulatorResult<Bytes> {
        message.set_field(tags::SENDER_COMP_ID, &self.session_id.sender_comp_id);
        message.set_field(tags::TARGET_COMP_ID, &self.session_id.target_comp_id);
        message.set_field(tags::MSG_SEQ_NUM, inner.next_outbound_seq);
        message.set_field(tags::SENDING_TIME, fix_timestamp(Utc::now()));

        let frame = self.codec.encode(message);
        self.transport.send_bytes(frame.clone())?;
        inner.next_outbound_seq += 1;
        Ok(frame)
    }

    fn after_send(&self, message: &Message, frame: &Bytes) {
        debug!("[{}] sent: {}", self.role, printable(frame));
        self.application
            .on_outbound_message(&self.session_id, message);
        self.sink.on_message_sent(frame, self.role);
    }

    fn publish_state(&self, state: SessionState) {
        debug!("Session {} -> {}", self.session_id, state);
        self.sink.on_session_state_changed(&self.session_id, state);
    }
}

impl std::fmt::Debug for SessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEngine")
            .field("session_id", &self.session_id)
            .field("role", &self.role)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}
