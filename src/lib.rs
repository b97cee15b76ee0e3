//! An opinionated FIX session-engine library for the buy-side.
//!
//! fixoxide implements the FIX session layer (versions 4.0 through 4.4, and FIXT.1.1) which
//! allows users to connect to brokers or exchanges to send and receive messages: sequencing,
//! the logon/logout handshake, heartbeats and test requests, gap detection and resend, duplicate
//! handling, and a configurable session-time schedule.
//!
//! ## Terminology
//! * `FIX Connection` -- A single connection to a FIX Session. A network connection is made over TCP,
//! then a FIX logon handshake is performed to establish the FIX connection. The FIX connection
//! ends properly with a FIX logout, but is considered ended if the TCP connection breaks.
//!     * Note, the term 'connection' is overloaded and can also mean TCP connection. When unclear, a
//! 'connection' will be specified as TCP or FIX.
//!
//! * `FIX Session` -- A conceptual construct that represents the bidirectional stream of ordered
//! messages between two peers. A FIX Session can live across multiple instances of a FIX
//! connection.
//!
//! * `FIX Engine` -- A sub-process running in the background that manages a single FIX connection
//! to a FIX Session. The engine starts, runs, and ends the FIX connection as defined by the FIX
//! protocol, and manages all resources that support the connection.
//!
//! ## Examples
//!
//! ### Asynchronous API
//! ```no_run
//! use fixoxide::{
//!     SessionSettings, FixApplicationHandle, FixApplicationInitiator, ApplicationError,
//!     Application, application_handle,
//! };
//!
//! struct MyApplication;
//! impl Application for MyApplication {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ApplicationError> {
//!
//!     // build session settings
//!     let settings = SessionSettings::builder()
//!         .with_sender_comp_id("my_id")
//!         .with_target_comp_id("peer_id")
//!         .with_store_path("./store".into())
//!         .with_log_dir("./log".into())
//!         .with_socket_addr("127.0.0.1:0".parse().unwrap())
//!         .build()?;
//!
//!     // create a FIX engine and intiate TCP connection
//!     let (fix_handle, mut event_receiver) =
//!         FixApplicationInitiator::build(settings, application_handle(MyApplication))?
//!             .initiate()
//!             .await?;
//!
//!     // handle incoming messages in the background...
//!     tokio::spawn(async move {
//!         while let Some(msg) = event_receiver.recv().await {
//!             println!("got an application message: {}", msg);
//!         }
//!     });
//!
//!     // start the FIX connection
//!     fix_handle.start_async().await?;
//!
//!     // send messages here...
//!
//!     // end the FIX connection
//!     fix_handle.end_async().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Synchronous API*
//! ```no_run
//! use fixoxide::{
//!     SessionSettings, FixApplicationHandle, FixApplicationInitiator, ApplicationError,
//!     Application, application_handle,
//! };
//!
//! struct MyApplication;
//! impl Application for MyApplication {}
//!
//! fn main() -> Result<(), ApplicationError> {
//!
//!     let settings = SessionSettings::builder()
//!         .with_sender_comp_id("my_id")
//!         .with_target_comp_id("peer_id")
//!         .with_store_path("./store".into())
//!         .with_log_dir("./log".into())
//!         .with_socket_addr("127.0.0.1:0".parse().unwrap())
//!         .build()?;
//!
//!     let (fix_handle, mut event_receiver) =
//!         FixApplicationInitiator::build(settings, application_handle(MyApplication))?
//!             .initiate_sync()?;
//!
//!     std::thread::spawn(move || {
//!         while let Some(msg) = event_receiver.blocking_recv() {
//!             println!("got an application message: {}", msg);
//!         }
//!     });
//!
//!     fix_handle.start_sync()?;
//!
//!     // send messages here...
//!
//!     fix_handle.end_sync()?;
//!     
//!     Ok(())
//! }
//! ```
//! *When using synchronous API, a tokio runtime is still created internally (see
//! [`FixApplicationInitiator`])

pub mod fix;
pub mod registry;
use fix::encode::MessageBuilder;
use fix::mem::MsgBuf;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};

use chrono::naive::NaiveTime;
use chrono::Weekday;
use chrono_tz::Tz;

use rtrb::{Consumer, Producer, RingBuffer};

/// Identifies a FIX session as an ordered pair of counterparties over a given `BeginString`.
///
/// Two connections belong to the same session if, and only if, all four fields match. A
/// `SessionID` is the key used by [`registry::SessionRegistry`] to look up the engine handling a
/// given counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionID {
    pub begin_string: String,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub qualifier: Option<String>,
}

impl SessionID {
    pub fn new(
        begin_string: &str,
        sender_comp_id: &str,
        target_comp_id: &str,
        qualifier: Option<&str>,
    ) -> Self {
        SessionID {
            begin_string: begin_string.to_string(),
            sender_comp_id: sender_comp_id.to_string(),
            target_comp_id: target_comp_id.to_string(),
            qualifier: qualifier.map(String::from),
        }
    }
}

impl std::fmt::Display for SessionID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.begin_string, self.sender_comp_id, self.target_comp_id
        )?;
        if let Some(q) = &self.qualifier {
            write!(f, "/{}", q)?;
        }
        Ok(())
    }
}

/// Application-level callbacks invoked by a running FIX engine.
///
/// Implementations are expected to be cheap to call and non-blocking; any slow work (persistence,
/// downstream network calls) should be handed off to another task. `to_app` may veto an outgoing
/// application message by returning [`DoNotSend`], which aborts the send before a sequence number
/// is assigned. `from_admin` may reject an inbound `Logon<A>` by returning
/// [`ApplicationError::RejectLogon`], which causes the engine to send a `Logout<5>` with the given
/// reason and disconnect.
///
/// A single boxed `Application` is shared (behind an [`ApplicationHandle`]) across every
/// reconnect of a given [`FixApplicationInitiator`]/[`FixApplicationAcceptor`], so state
/// accumulated in an implementation (e.g. order books) survives a dropped TCP connection.
pub trait Application: Send {
    /// Called once when the engine is created, before any network activity.
    fn on_create(&mut self, session_id: &SessionID) {
        let _ = session_id;
    }
    /// Called when the session transitions into the logged-on state.
    fn on_logon(&mut self, session_id: &SessionID) {
        let _ = session_id;
    }
    /// Called when the session leaves the logged-on state, for any reason.
    fn on_logout(&mut self, session_id: &SessionID) {
        let _ = session_id;
    }
    /// Called with every administrative (session-level) message immediately before it is sent.
    fn to_admin(&mut self, builder: MessageBuilder, session_id: &SessionID) -> MessageBuilder {
        let _ = session_id;
        builder
    }
    /// Called with every administrative message as it is received, before session processing.
    fn from_admin(&mut self, msg: &MsgBuf, session_id: &SessionID) -> Result<(), ApplicationError> {
        let _ = (msg, session_id);
        Ok(())
    }
    /// Called with every application-level message immediately before it is sent. Returning
    /// `Err(DoNotSend)` aborts the send before a sequence number is consumed.
    fn to_app(
        &mut self,
        builder: MessageBuilder,
        session_id: &SessionID,
    ) -> Result<MessageBuilder, DoNotSend> {
        let _ = session_id;
        Ok(builder)
    }
    /// Called with every application-level message as it is received.
    fn from_app(&mut self, msg: &MsgBuf, session_id: &SessionID) -> Result<(), ApplicationError> {
        let _ = (msg, session_id);
        Ok(())
    }
}

/// Returned from [`Application::to_app`] to veto an outgoing application message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoNotSend;

/// A shared, reconnect-durable handle to a caller-supplied [`Application`].
///
/// The same handle is passed to every engine instance an [`InitiatorSupervisor`] or
/// [`AcceptorSupervisor`] spawns, so `on_create`/`on_logon`/`on_logout` fire against a single
/// long-lived implementation rather than a fresh one per TCP connection.
///
/// [`InitiatorSupervisor`]: crate::registry::InitiatorSupervisor
/// [`AcceptorSupervisor`]: crate::registry::AcceptorSupervisor
pub type ApplicationHandle = Arc<std::sync::Mutex<Box<dyn Application>>>;

/// Wraps `app` in an [`ApplicationHandle`] suitable for [`FixApplicationInitiator::build`] or
/// [`FixApplicationAcceptor::build`].
pub fn application_handle(app: impl Application + 'static) -> ApplicationHandle {
    Arc::new(std::sync::Mutex::new(Box::new(app)))
}

enum Request {
    Logon {
        resp_sender: oneshot::Sender<bool>,
    },
    SendMessage {
        resp_sender: oneshot::Sender<bool>,
        builder: MessageBuilder,
    },
    Logout {
        resp_sender: oneshot::Sender<bool>,
    },
}

/// Errors that can occur while running a fixoxide session.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("An I/O error occured: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Session ended unexpectedly")]
    SessionEnded,
    #[error("Logon has failed")]
    LogonFailed,
    #[error("Logout has failed")]
    LogoutFailed,
    #[error("MessageSend has failed")]
    SendMessageFailed,
    #[error("setting `{0}` is required")]
    SettingRequired(String),
    #[error("Logon was rejected by the application: {0}")]
    RejectLogon(String),
}

/// Which [`fix::MessageStore`](crate::fix) implementation backs a session's persisted sequence
/// numbers and resend history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    /// A `sqlite` database at [`SessionSettings::with_store_path`]. Requires the `sqlite` feature
    /// (enabled by default).
    #[default]
    Sqlite,
    /// An in-process store with no disk persistence; resend history and sequence numbers are lost
    /// when the engine is dropped. Always available.
    Memory,
}

/// A collection of settings used to configurate a FIX session.
///
/// `SessionSettings` can be constructed using the [`SessionSettingsBuilder`], or can be constructed explicitly.
#[derive(Clone)]
pub struct SessionSettings {
    begin_string: Arc<String>,
    engine_type: FixEngineType,
    sender_comp_id: String,
    target_comp_id: String,
    pub(crate) sender_sub_id: Option<String>,
    pub(crate) sender_location_id: Option<String>,
    pub(crate) target_sub_id: Option<String>,
    pub(crate) target_location_id: Option<String>,
    pub(crate) default_appl_ver_id: Option<String>,
    addr: SocketAddr,
    epoch: Arc<String>,
    store_path: PathBuf,
    log_dir: PathBuf,
    heartbeat_timeout: Duration,
    pub(crate) start_time: NaiveTime,
    pub(crate) end_time: Option<NaiveTime>,
    pub(crate) start_day: Option<Weekday>,
    pub(crate) end_day: Option<Weekday>,
    pub(crate) time_zone: Tz,
    pub(crate) non_stop_session: bool,
    pub(crate) store_backend: StoreBackend,
    pub(crate) ignore_poss_dup_resend_requests: bool,
    pub(crate) reconnect_interval: Duration,
    pub(crate) logon_timeout: Duration,
    pub(crate) logout_timeout: Duration,
    pub(crate) check_latency: bool,
    pub(crate) max_latency: chrono::Duration,
    pub(crate) check_comp_id: bool,
    pub(crate) persist_messages: bool,
    pub(crate) validate_length_and_checksum: bool,
    pub(crate) reset_on_logon: bool,
    pub(crate) reset_on_logout: bool,
    pub(crate) reset_on_disconnect: bool,
    pub(crate) refresh_on_logon: bool,
    pub(crate) send_redundant_resend_requests: bool,
    pub(crate) resend_session_level_rejects: bool,
    pub(crate) requires_orig_sending_time: bool,
    pub(crate) enable_last_msg_seq_num_processed: bool,
    pub(crate) send_logout_before_disconnect_from_timeout: bool,
    pub(crate) max_messages_in_resend_request: u32,
}

/// A builder for easily configuring all the fields of a [`SessionSettings`]
///
/// The following settings are required to be set:
/// * sender comp id
/// * target comp id
/// * addr
/// * store path
/// * log dir
#[derive(Default)]
pub struct SessionSettingsBuilder {
    sender_comp_id: Option<String>,
    target_comp_id: Option<String>,
    sender_sub_id: Option<String>,
    sender_location_id: Option<String>,
    target_sub_id: Option<String>,
    target_location_id: Option<String>,
    default_appl_ver_id: Option<String>,
    addr: Option<SocketAddr>,
    begin_string: Option<String>,
    epoch: Option<String>,
    store_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    heartbeat_timeout: Option<Duration>,
    start_time: Option<NaiveTime>,
    end_time: Option<NaiveTime>,
    start_day: Option<Weekday>,
    end_day: Option<Weekday>,
    time_zone: Option<Tz>,
    non_stop_session: Option<bool>,
    store_backend: Option<StoreBackend>,
    ignore_poss_dup_resend_requests: Option<bool>,
    reconnect_interval: Option<Duration>,
    logon_timeout: Option<Duration>,
    logout_timeout: Option<Duration>,
    check_latency: Option<bool>,
    max_latency: Option<chrono::Duration>,
    check_comp_id: Option<bool>,
    persist_messages: Option<bool>,
    validate_length_and_checksum: Option<bool>,
    reset_on_logon: Option<bool>,
    reset_on_logout: Option<bool>,
    reset_on_disconnect: Option<bool>,
    refresh_on_logon: Option<bool>,
    send_redundant_resend_requests: Option<bool>,
    resend_session_level_rejects: Option<bool>,
    requires_orig_sending_time: Option<bool>,
    enable_last_msg_seq_num_processed: Option<bool>,
    send_logout_before_disconnect_from_timeout: Option<bool>,
    max_messages_in_resend_request: Option<u32>,
}

impl SessionSettingsBuilder {
    pub fn new() -> SessionSettingsBuilder {
        Default::default()
    }

    /// The time the FIX session starts each day.
    pub fn with_start_time(mut self, start_time: NaiveTime) -> Self {
        self.set_start_time(start_time);
        self
    }
    pub fn set_start_time(&mut self, start_time: NaiveTime) {
        self.start_time = Some(start_time);
    }

    /// The `SenderCompID(49)` that will be included in each message.
    pub fn with_sender_comp_id(mut self, sender_comp_id: &str) -> Self {
        self.set_sender_comp_id(sender_comp_id);
        self
    }
    pub fn set_sender_comp_id(&mut self, sender_comp_id: &str) {
        self.sender_comp_id = Some(sender_comp_id.to_string());
    }

    /// The `TargetCompID(56)` that will be included in each message.
    pub fn with_target_comp_id(mut self, target_comp_id: &str) -> Self {
        self.set_target_comp_id(target_comp_id);
        self
    }
    pub fn set_target_comp_id(&mut self, target_comp_id: &str) {
        self.target_comp_id = Some(target_comp_id.to_string());
    }

    /// The address to initiate a connection to, or accept connections on.
    pub fn with_socket_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }
    pub fn set_socket_addr(&mut self, addr: SocketAddr) {
        self.addr = Some(addr);
    }

    /// The `BeginString(8)` that will be included in each message.
    pub fn with_begin_string(mut self, begin_string: &str) -> Self {
        self.set_begin_string(begin_string);
        self
    }
    pub fn set_begin_string(&mut self, begin_string: &str) {
        self.begin_string = Some(begin_string.to_string());
    }

    /// A local unique identifier for this FIX session.
    pub fn with_epoch(mut self, epoch: &str) -> Self {
        self.set_epoch(epoch);
        self
    }
    pub fn set_epoch(&mut self, epoch: &str) {
        self.epoch = Some(epoch.to_string());
    }

    /// The file that should be used as the sqlite database file.
    pub fn with_store_path(mut self, store_path: PathBuf) -> Self {
        self.set_store_path(store_path);
        self
    }
    pub fn set_store_path(&mut self, store_path: PathBuf) {
        self.store_path = Some(store_path);
    }

    /// The directory that should be used to create log files.
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.set_log_dir(log_dir);
        self
    }
    pub fn set_log_dir(&mut self, log_dir: PathBuf) {
        self.log_dir = Some(log_dir);
    }

    /// The timeout length used for sending `Heartbeat<0>` messages.
    pub fn with_heartbeat_timeout(mut self, hb_timeout: Duration) -> Self {
        self.set_heartbeat_timeout(hb_timeout);
        self
    }
    pub fn set_heartbeat_timeout(&mut self, hb_timeout: Duration) {
        self.heartbeat_timeout = Some(hb_timeout);
    }

    /// The `SenderSubID(50)` that will be included in each message, if set.
    pub fn with_sender_sub_id(mut self, sender_sub_id: &str) -> Self {
        self.sender_sub_id = Some(sender_sub_id.to_string());
        self
    }

    /// The `SenderLocationID(142)` that will be included in each message, if set.
    pub fn with_sender_location_id(mut self, sender_location_id: &str) -> Self {
        self.sender_location_id = Some(sender_location_id.to_string());
        self
    }

    /// The `TargetSubID(57)` that will be included in each message, if set.
    pub fn with_target_sub_id(mut self, target_sub_id: &str) -> Self {
        self.target_sub_id = Some(target_sub_id.to_string());
        self
    }

    /// The `TargetLocationID(143)` that will be included in each message, if set.
    pub fn with_target_location_id(mut self, target_location_id: &str) -> Self {
        self.target_location_id = Some(target_location_id.to_string());
        self
    }

    /// The `DefaultApplVerID(1137)` used when `BeginString` is `FIXT.1.1`.
    pub fn with_default_appl_ver_id(mut self, appl_ver_id: &str) -> Self {
        self.default_appl_ver_id = Some(appl_ver_id.to_string());
        self
    }

    /// The time of day, in the session's local timezone, that the session's logical day ends.
    /// Together with the start time set by [`with_start_time`], this defines the session's
    /// trading window; if unset the session runs continuously (`NonStopSession`).
    ///
    /// [`with_start_time`]: SessionSettingsBuilder::with_start_time
    pub fn with_end_time(mut self, end_time: NaiveTime) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Disables the daily session-time boundary entirely: the session never resets sequence
    /// numbers or forcibly disconnects at a scheduled time.
    pub fn with_non_stop_session(mut self, non_stop: bool) -> Self {
        self.non_stop_session = Some(non_stop);
        self
    }

    /// The day of the week the session's trading week begins, paired with [`with_end_day`]. If
    /// unset the session's schedule repeats every day.
    ///
    /// [`with_end_day`]: SessionSettingsBuilder::with_end_day
    pub fn with_start_day(mut self, start_day: Weekday) -> Self {
        self.start_day = Some(start_day);
        self
    }

    /// The day of the week the session's trading week ends. See [`with_start_day`].
    ///
    /// [`with_start_day`]: SessionSettingsBuilder::with_start_day
    pub fn with_end_day(mut self, end_day: Weekday) -> Self {
        self.end_day = Some(end_day);
        self
    }

    /// The IANA timezone that [`with_start_time`]/[`with_end_time`]/[`with_start_day`]/
    /// [`with_end_day`] are interpreted in. Default UTC.
    ///
    /// [`with_start_time`]: SessionSettingsBuilder::with_start_time
    /// [`with_end_time`]: SessionSettingsBuilder::with_end_time
    /// [`with_start_day`]: SessionSettingsBuilder::with_start_day
    /// [`with_end_day`]: SessionSettingsBuilder::with_end_day
    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = Some(time_zone);
        self
    }

    /// Which [`StoreBackend`] persists sequence numbers and resend history. Default
    /// [`StoreBackend::Sqlite`].
    pub fn with_store_backend(mut self, backend: StoreBackend) -> Self {
        self.store_backend = Some(backend);
        self
    }

    /// Whether a `ResendRequest<2>` carrying `PossDupFlag(43)=Y` is serviced or silently ignored.
    /// Default `false`: possibly-duplicate resend requests are serviced like any other.
    pub fn with_ignore_poss_dup_resend_requests(mut self, ignore: bool) -> Self {
        self.ignore_poss_dup_resend_requests = Some(ignore);
        self
    }

    /// How long an initiator waits between reconnect attempts after a disconnect.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = Some(interval);
        self
    }

    /// How long to wait for the peer's `Logon<A>` before disconnecting. Default 10s.
    pub fn with_logon_timeout(mut self, timeout: Duration) -> Self {
        self.logon_timeout = Some(timeout);
        self
    }

    /// How long to wait for the peer's `Logout<5>` acknowledgement before disconnecting. Default 2s.
    pub fn with_logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = Some(timeout);
        self
    }

    /// Whether `SendingTime(52)` is checked against local clock skew. Default `true`.
    pub fn with_check_latency(mut self, check: bool) -> Self {
        self.check_latency = Some(check);
        self
    }

    /// The maximum allowed clock skew when `CheckLatency` is enabled. Default 120s.
    pub fn with_max_latency(mut self, max_latency: chrono::Duration) -> Self {
        self.max_latency = Some(max_latency);
        self
    }

    /// Whether `SenderCompID`/`TargetCompID` are validated on every inbound message. Default `true`.
    pub fn with_check_comp_id(mut self, check: bool) -> Self {
        self.check_comp_id = Some(check);
        self
    }

    /// Whether outgoing/incoming messages are persisted to the message store for resend. Default `true`.
    pub fn with_persist_messages(mut self, persist: bool) -> Self {
        self.persist_messages = Some(persist);
        self
    }

    /// Whether `BodyLength(9)`/`CheckSum(10)` are validated on every inbound message. Default `true`.
    pub fn with_validate_length_and_checksum(mut self, validate: bool) -> Self {
        self.validate_length_and_checksum = Some(validate);
        self
    }

    /// Whether sequence numbers reset to 1 whenever a `Logon<A>` is sent or received. Default `false`.
    pub fn with_reset_on_logon(mut self, reset: bool) -> Self {
        self.reset_on_logon = Some(reset);
        self
    }

    /// Whether sequence numbers reset to 1 whenever a `Logout<5>` is sent or received. Default `false`.
    pub fn with_reset_on_logout(mut self, reset: bool) -> Self {
        self.reset_on_logout = Some(reset);
        self
    }

    /// Whether sequence numbers reset to 1 whenever the TCP connection drops. Default `false`.
    pub fn with_reset_on_disconnect(mut self, reset: bool) -> Self {
        self.reset_on_disconnect = Some(reset);
        self
    }

    /// Whether the message store is refreshed from persistent storage on every `Logon<A>`. Default `false`.
    pub fn with_refresh_on_logon(mut self, refresh: bool) -> Self {
        self.refresh_on_logon = Some(refresh);
        self
    }

    /// Whether a redundant `ResendRequest<2>` is sent if one is already outstanding. Default `false`.
    pub fn with_send_redundant_resend_requests(mut self, send: bool) -> Self {
        self.send_redundant_resend_requests = Some(send);
        self
    }

    /// Whether session-level `Reject<3>` messages are included in resend gap-fill ranges
    /// rather than retransmitted verbatim. Default `true`.
    pub fn with_resend_session_level_rejects(mut self, resend: bool) -> Self {
        self.resend_session_level_rejects = Some(resend);
        self
    }

    /// Whether `OrigSendingTime(122)` is required on every `PossDupFlag(43)=Y` message. Default `true`.
    pub fn with_requires_orig_sending_time(mut self, required: bool) -> Self {
        self.requires_orig_sending_time = Some(required);
        self
    }

    /// Whether outgoing messages carry `NextExpectedMsgSeqNum(789)` on `Logon<A>` (FIXT.1.1). Default `false`.
    pub fn with_enable_last_msg_seq_num_processed(mut self, enable: bool) -> Self {
        self.enable_last_msg_seq_num_processed = Some(enable);
        self
    }

    /// Whether a `Logout<5>` is sent before disconnecting due to a timeout. Default `true`.
    pub fn with_send_logout_before_disconnect_from_timeout(mut self, send: bool) -> Self {
        self.send_logout_before_disconnect_from_timeout = Some(send);
        self
    }

    /// The maximum number of messages serviced by a single `ResendRequest<2>` before the
    /// remainder is gap-filled. Default unlimited (`u32::MAX`).
    pub fn with_max_messages_in_resend_request(mut self, max: u32) -> Self {
        self.max_messages_in_resend_request = Some(max);
        self
    }

    /// Build the [`SessionSettings`] struct.
    ///
    /// Returns an `Err(ApplicationError::SettingRequired)` if not all of the required fields
    /// were set.
    pub fn build(self) -> Result<SessionSettings, ApplicationError> {
        let sender_comp_id = self
            .sender_comp_id
            .ok_or(ApplicationError::SettingRequired(
                "sender_comp_id".to_string(),
            ))?;
        let target_comp_id = self
            .target_comp_id
            .ok_or(ApplicationError::SettingRequired(
                "target_comp_id".to_string(),
            ))?;
        let addr = self
            .addr
            .ok_or(ApplicationError::SettingRequired("addr".to_string()))?;
        let store_path = self
            .store_path
            .ok_or(ApplicationError::SettingRequired("store_path".to_string()))?;
        let log_dir = self
            .log_dir
            .ok_or(ApplicationError::SettingRequired("log_dir".to_string()))?;
        let store_backend = self.store_backend.unwrap_or_default();
        #[cfg(not(feature = "sqlite"))]
        if store_backend == StoreBackend::Sqlite {
            return Err(ApplicationError::SettingRequired(
                "store_backend: sqlite feature is not enabled".to_string(),
            ));
        }

        Ok(SessionSettings {
            engine_type: FixEngineType::Client,
            begin_string: Arc::new(self.begin_string.unwrap_or(String::from("FIX.4.2"))),
            epoch: Arc::new(
                self.epoch
                    .unwrap_or(format!("{}_{}", &sender_comp_id, &target_comp_id)),
            ),
            heartbeat_timeout: self.heartbeat_timeout.unwrap_or(Duration::from_secs(30)),
            start_time: self.start_time.unwrap_or_default(),
            end_time: self.end_time,
            start_day: self.start_day,
            end_day: self.end_day,
            time_zone: self.time_zone.unwrap_or(chrono_tz::UTC),
            sender_sub_id: self.sender_sub_id,
            sender_location_id: self.sender_location_id,
            target_sub_id: self.target_sub_id,
            target_location_id: self.target_location_id,
            default_appl_ver_id: self.default_appl_ver_id,
            non_stop_session: self.non_stop_session.unwrap_or(false),
            store_backend,
            ignore_poss_dup_resend_requests: self
                .ignore_poss_dup_resend_requests
                .unwrap_or(false),
            reconnect_interval: self.reconnect_interval.unwrap_or(Duration::from_secs(30)),
            logon_timeout: self.logon_timeout.unwrap_or(Duration::from_secs(10)),
            logout_timeout: self.logout_timeout.unwrap_or(Duration::from_secs(2)),
            check_latency: self.check_latency.unwrap_or(true),
            max_latency: self.max_latency.unwrap_or(chrono::Duration::seconds(120)),
            check_comp_id: self.check_comp_id.unwrap_or(true),
            persist_messages: self.persist_messages.unwrap_or(true),
            validate_length_and_checksum: self.validate_length_and_checksum.unwrap_or(true),
            reset_on_logon: self.reset_on_logon.unwrap_or(false),
            reset_on_logout: self.reset_on_logout.unwrap_or(false),
            reset_on_disconnect: self.reset_on_disconnect.unwrap_or(false),
            refresh_on_logon: self.refresh_on_logon.unwrap_or(false),
            send_redundant_resend_requests: self.send_redundant_resend_requests.unwrap_or(false),
            resend_session_level_rejects: self.resend_session_level_rejects.unwrap_or(true),
            requires_orig_sending_time: self.requires_orig_sending_time.unwrap_or(true),
            enable_last_msg_seq_num_processed: self
                .enable_last_msg_seq_num_processed
                .unwrap_or(false),
            send_logout_before_disconnect_from_timeout: self
                .send_logout_before_disconnect_from_timeout
                .unwrap_or(true),
            max_messages_in_resend_request: self
                .max_messages_in_resend_request
                .unwrap_or(u32::MAX),
            sender_comp_id,
            target_comp_id,
            addr,
            store_path,
            log_dir,
        })
    }
}

impl SessionSettings {
    /// Creates a new [`SessionSettingsBuilder`]
    pub fn builder() -> SessionSettingsBuilder {
        SessionSettingsBuilder::new()
    }

    fn expected_sender_comp_id(&self) -> &str {
        &self.target_comp_id
    }

    fn expected_target_comp_id(&self) -> &str {
        &self.sender_comp_id
    }

    /// The configured `BeginString(8)` for this session.
    pub fn begin_string(&self) -> &str {
        &self.begin_string
    }

    /// The configured `SenderCompID(49)` for this session.
    pub fn sender_comp_id(&self) -> &str {
        &self.sender_comp_id
    }

    /// The configured `TargetCompID(56)` for this session.
    pub fn target_comp_id(&self) -> &str {
        &self.target_comp_id
    }

    /// The [`SessionID`] this configuration identifies.
    pub fn session_id(&self) -> SessionID {
        SessionID::new(
            &self.begin_string,
            &self.sender_comp_id,
            &self.target_comp_id,
            None,
        )
    }
}

/// A handle on a FIX engine instance.
///
/// The [`FixApplicationHandle`] allows for requesting the basic operations of starting the FIX connection, sending
/// a message to the peer, and ending the connection.
///
/// The handle offers asynchronous and synchronous APIs for these operations. As well as functions
/// that return immedietly with a [`oneshot::Receiver`] that will eventually return the result of the
/// operation.
///
/// The underlying engine could stop running at any moment for a variety of reasons. Only until you
/// attempt an operation, will you learn the engine has stopped by receiving an
/// [`ApplicationError::SessionEnded`].
///
/// [`FixApplicationHandle`] `impl`'s [`Clone`], [`Send`] and [`Sync`] and therefore multiple
/// copies of the handle can be made and passed to different threads that can all request messages
/// to be sent. Only one thread has to call [`end`] for the engine to terminate the connection.
///
/// [`oneshot::Receiver`]: https://docs.rs/tokio/latest/tokio/sync/oneshot/struct.Receiver.html
/// [`end`]: FixApplicationHandle::end
///
/// # Example - Multiple Threads
///
///```no_run
/// use fixoxide::{
///     SessionSettings, FixApplicationInitiator, ApplicationError, Application, application_handle,
/// };
/// use fixoxide::fix::{encode::MessageBuilder, generated::MsgType};
/// # use anyhow::Result;
/// struct MyApplication;
/// impl Application for MyApplication {}
/// # #[tokio::main]
/// # async fn main() -> Result<()> {
/// #    let settings = SessionSettings::builder()
/// #        .with_sender_comp_id("my_id")
/// #        .with_target_comp_id("peer_id")
/// #        .with_store_path("./store".into())
/// #        .with_log_dir("./log".into())
/// #        .with_socket_addr("127.0.0.1:0".parse().unwrap())
/// #        .build()?;
///
/// let (handle, mut receiver) = FixApplicationInitiator::build(settings, application_handle(MyApplication))?
///     .initiate()
///     .await?;
/// receiver.close();
///
/// // FixApplicationHandle can be cloned
/// let handle1 = handle.clone();
/// let handle2 = handle.clone();
///
/// // FixApplicationHandle clones can be sent across threads and tasks
/// let h1 = tokio::spawn(async move {
///
///     // thread logic here...
///
///     let builder = MessageBuilder::new(
///         &handle1.begin_string(),
///         MsgType::ORDER_SINGLE.into()
///     );
///     handle1.send_message_async(builder).await
///
///     // ...
/// });
///
/// // send to multiple tasks...
/// let h2 = tokio::spawn(async move {
///     let builder = MessageBuilder::new(
///         &handle2.begin_string(),
///         MsgType::ORDER_SINGLE.into()
///     );
///     handle2.send_message_async(builder).await
/// });
///
/// // wait for all threads to finish...
/// let (res1, res2) = tokio::join!(h1, h2);
/// res1??;
/// res2??;
///     
/// // end the FIX connection
/// handle.end_async().await?;
///  #   Ok(())
/// # }
///
///```
#[derive(Clone)]
pub struct FixApplicationHandle {
    request_sender: mpsc::UnboundedSender<Request>,
    begin_string: Arc<String>,
}

impl FixApplicationHandle {
    /// Send a request to the engine to start the connection and return immediately.
    ///
    /// The receiver will eventually yield `true` if a connection was successfully established, or
    /// `false` othersize.
    pub fn start(&self) -> Result<oneshot::Receiver<bool>, ApplicationError> {
        if self.request_sender.is_closed() {
            return Err(ApplicationError::SessionEnded);
        }
        let (resp_sender, resp_receiver) = oneshot::channel();
        let logon_request = Request::Logon { resp_sender };
        let _ = self.request_sender.send(logon_request);
        Ok(resp_receiver)
    }
    /// Send a request to the engine to start the connection and await asynchronously.
    pub async fn start_async(&self) -> Result<(), ApplicationError> {
        let resp_sender = self.start()?;
        if Ok(true) != resp_sender.await {
            return Err(ApplicationError::LogonFailed);
        }
        Ok(())
    }
    /// Send a request to the engine to start a connection, and block until a result is returned.
    pub fn start_sync(&self) -> Result<(), ApplicationError> {
        let resp_receiver = self.start()?;
        if Ok(true) != resp_receiver.blocking_recv() {
            return Err(ApplicationError::LogonFailed);
        }
        Ok(())
    }

    /// Send a request to the engine to send the message in the [`MessageBuilder`] to the peer, and return immediately.
    ///
    /// If the request was successfully sent to the engine, a [`oneshot::Receiver`] will be
    /// returned.
    ///
    /// The receiver will yield `true` once the message has successfully sent over the TCP
    /// connection. It will yeild `false` if a message cannot be sent.
    ///
    /// [`oneshot::Receiver`]: https://docs.rs/tokio/latest/tokio/sync/oneshot/struct.Receiver.html
    pub fn send_message(
        &self,
        builder: MessageBuilder,
    ) -> Result<oneshot::Receiver<bool>, ApplicationError> {
        if self.request_sender.is_closed() {
            return Err(ApplicationError::SessionEnded);
        }
        let (resp_sender, resp_receiver) = oneshot::channel();
        let send_message_request = Request::SendMessage {
            resp_sender,
            builder,
        };
        let _ = self.request_sender.send(send_message_request);
        Ok(resp_receiver)
    }
    /// Send a request to the engine to send the message in `builder` and await asynchronously.
    pub async fn send_message_async(
        &self,
        builder: MessageBuilder,
    ) -> Result<(), ApplicationError> {
        let resp_sender = self.send_message(builder)?;
        if Ok(true) != resp_sender.await {
            return Err(ApplicationError::SendMessageFailed);
        }
        Ok(())
    }
    /// Send a request to the engine to send the message in `builder` and block until a result is
    /// returned.
    pub fn send_message_sync(&self, builder: MessageBuilder) -> Result<(), ApplicationError> {
        let resp_receiver = self.send_message(builder)?;
        if Ok(true) != resp_receiver.blocking_recv() {
            return Err(ApplicationError::SendMessageFailed);
        }
        Ok(())
    }

    /// Send a request to the engine to end the FIX connection, and return immediately.
    ///
    /// If the request was successfully send to the engine, a [`oneshot::Receiver`] will be
    /// returned.
    ///
    /// The receiver will yield `true` is the FIX connection is over, and ended without any issues.
    /// Otherwise it will be `false`.
    ///
    /// [`oneshot::Receiver`]: https://docs.rs/tokio/latest/tokio/sync/oneshot/struct.Receiver.html
    pub fn end(&self) -> Result<oneshot::Receiver<bool>, ApplicationError> {
        let (resp_sender, resp_receiver) = oneshot::channel();
        let logout_request = Request::Logout { resp_sender };
        let _ = self.request_sender.send(logout_request);
        Ok(resp_receiver)
    }
    /// Send a request to the engine to end the FIX connection, and await asynchronously.
    pub async fn end_async(&self) -> Result<(), ApplicationError> {
        let resp_sender = self.end()?;
        if Ok(true) != resp_sender.await {
            return Err(ApplicationError::LogoutFailed);
        }
        Ok(())
    }
    /// Send a request to the engine to end the FIX connection, and block until a result is
    /// returned.
    pub fn end_sync(&self) -> Result<(), ApplicationError> {
        let resp_receiver = self.end()?;
        if Ok(true) != resp_receiver.blocking_recv() {
            return Err(ApplicationError::LogoutFailed);
        }
        Ok(())
    }

    /// Get the `BeginString(8)` of this FIX Session. Should generally be `"FIX.4.2"`.
    pub fn begin_string(&self) -> Arc<String> {
        Arc::clone(&self.begin_string)
    }

    /// Returns `true` once the underlying engine task has stopped and can no longer accept
    /// requests. A [`SessionRegistry`]-driven supervisor polls this to decide when to reconnect.
    ///
    /// [`SessionRegistry`]: crate::registry::SessionRegistry
    pub fn is_ended(&self) -> bool {
        self.request_sender.is_closed()
    }
}

/// A struct that can initiate the TCP connection to the peer and create a FIX engine instance.
pub struct FixApplicationInitiator {
    settings: SessionSettings,
    stream_factory: StreamFactory,
    app: ApplicationHandle,
}

impl FixApplicationInitiator {
    /// Build a `FixApplicationInitiator` that will create a FIX engine using `settings`, driving
    /// the callbacks of `app`.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        mut settings: SessionSettings,
        app: ApplicationHandle,
    ) -> Result<FixApplicationInitiator, ApplicationError> {
        settings.engine_type = FixEngineType::Client;
        let stream_factory = StreamFactory::build(&settings)?;
        let fix_app_client = FixApplicationInitiator {
            settings,
            stream_factory,
            app,
        };
        Ok(fix_app_client)
    }

    /// Initiate a TCP connection and start the FIX engine with the current asynchronous runtime.
    ///
    /// If the connection is successfully made, a [`FixApplicationHandle`] will be returned, and an
    /// `UnboundedReceiver<Arc<MsgBuf>>` will be returned.
    ///
    /// The application handle can be used to start the FIX connection, send messages and end the
    /// connection.
    ///
    /// The receiver is a channel where all incoming, valid application messages can be received.
    /// If you do not want to use the channel, it is recommended you call [`close`].
    ///
    /// [`close`]: tokio::sync::mpsc::UnboundedReceiver::close
    pub async fn initiate(
        self,
    ) -> Result<(FixApplicationHandle, Consumer<Arc<MsgBuf>>), ApplicationError> {
        let stream = self.stream_factory.stream().await?;
        let (request_sender, request_receiver) = mpsc::unbounded_channel::<Request>();
        let begin_string = Arc::clone(&self.settings.begin_string);

        let (app_message_event_sender, app_message_event_receiver) = RingBuffer::new(1000);

        self.app.lock().unwrap().on_create(&self.settings.session_id());

        tokio::spawn(async move {
            if let Err(e) = fix::spin_session(
                stream,
                request_receiver,
                app_message_event_sender,
                self.settings,
                self.app,
            )
            .await
            {
                eprintln!("{e:?}");
            }
        });

        let handle = FixApplicationHandle {
            request_sender,
            begin_string,
        };

        Ok((handle, app_message_event_receiver))
    }

    /// Initiate a TCP connection and start the FIX engine that will be driven by `runtime`.
    pub fn initiate_with_runtime(
        self,
        runtime: tokio::runtime::Runtime,
    ) -> Result<(FixApplicationHandle, Consumer<Arc<MsgBuf>>), ApplicationError> {
        let (request_sender, request_receiver) = mpsc::unbounded_channel::<Request>();
        let (app_message_event_sender, app_message_event_receiver) = RingBuffer::new(1000);
        let begin_string = Arc::clone(&self.settings.begin_string);
        let stream = runtime.block_on(self.stream_factory.stream())?;

        self.app.lock().unwrap().on_create(&self.settings.session_id());

        std::thread::spawn(move || {
            if let Err(e) = runtime.block_on(fix::spin_session(
                stream,
                request_receiver,
                app_message_event_sender,
                self.settings,
                self.app,
            )) {
                eprintln!("{e:?}");
            }
        });
        let handle = FixApplicationHandle {
            request_sender,
            begin_string,
        };

        Ok((handle, app_message_event_receiver))
    }

    /// Initiate a TCP connection, and a runtime will be created internally to drive the engine.
    pub fn initiate_sync(
        self,
    ) -> Result<(FixApplicationHandle, Consumer<Arc<MsgBuf>>), ApplicationError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        self.initiate_with_runtime(runtime)
    }
}

/// A struct that can accept TCP connections, and create a FIX engine instance for each connection.
pub struct FixApplicationAcceptor {
    settings: SessionSettings,
    stream_factory: StreamFactory,
    app: ApplicationHandle,
}

impl FixApplicationAcceptor {
    /// Build a `FixApplicationAcceptor` from `settings`, driving the callbacks of `app`.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        mut settings: SessionSettings,
        app: ApplicationHandle,
    ) -> Result<FixApplicationAcceptor, ApplicationError> {
        settings.engine_type = FixEngineType::Server;
        let stream_factory = StreamFactory::build(&settings)?;
        let fix_app_server = FixApplicationAcceptor {
            settings,
            stream_factory,
            app,
        };
        Ok(fix_app_server)
    }

    /// Accept an incoming TCP connection and create a FIX engine.
    ///
    /// Returns the handle to the created engine, and a channel to receive all valid, incoming application
    /// messages.
    pub async fn accept(
        &mut self,
    ) -> Result<(FixApplicationHandle, Consumer<Arc<MsgBuf>>), ApplicationError> {
        let stream = self.stream_factory.stream().await?;
        let settings = self.settings.clone();
        let (request_sender, request_receiver) = mpsc::unbounded_channel::<Request>();
        let (app_message_event_sender, app_message_event_receiver) = RingBuffer::new(1000);
        let begin_string = Arc::clone(&self.settings.begin_string);
        let app = Arc::clone(&self.app);

        app.lock().unwrap().on_create(&settings.session_id());

        tokio::task::spawn(async move {
            if let Err(e) = fix::spin_session(
                stream,
                request_receiver,
                app_message_event_sender,
                settings,
                app,
            )
            .await
            {
                eprintln!("{e:?}");
            }
        });

        let handle = FixApplicationHandle {
            request_sender,
            begin_string,
        };

        Ok((handle, app_message_event_receiver))
    }
}

#[derive(Clone)]
enum FixEngineType {
    Client,
    Server,
}

enum StreamFactory {
    Server(TcpListener),
    Client(std::net::SocketAddr),
}

impl StreamFactory {
    fn build(settings: &SessionSettings) -> Result<Self, std::io::Error> {
        match settings.engine_type {
            FixEngineType::Client => Ok(StreamFactory::Client(settings.addr)),
            FixEngineType::Server => {
                let socket = TcpSocket::new_v4()?;
                socket.bind(settings.addr)?;
                let listener = socket.listen(1024)?;
                Ok(StreamFactory::Server(listener))
            }
        }
    }
    async fn stream(&self) -> Result<TcpStream, std::io::Error> {
        match self {
            StreamFactory::Server(listener) => {
                let (mut stream, _from_addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            StreamFactory::Client(addr) => {
                let socket = TcpSocket::new_v4()?;
                let mut stream = socket.connect(*addr).await?;
                stream.set_nodelay(true)?;
                Ok(stream)
            }
        }
    }
}
