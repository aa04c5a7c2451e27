use std::net::SocketAddr;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::commands::{CommandQueue, DeviceStateCache};
use crate::config::{Config, Timing};
use crate::diff::diff_fields;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    decode_bytes, delete_message, discovery_message, encode_message, getzoneinfo_message,
    is_post_ack, postzoneinfo_message,
};
use crate::retry::{Attempt, AttemptFuture, RetryPolicy, retry_unless_protocol, with_retries};
use crate::scheduler::{Deferred, Scheduler};
use crate::transport::{Connection, Transport};
use crate::types::*;
use crate::{Error, Result};

/// Bytes read per receive; zone-info frames fit comfortably.
const RECEIVE_BUFFER_BYTES: usize = 512;

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;

pub struct ClimateClientBuilder {
    pub(crate) config: Config,
    pub(crate) timing: Timing,
    event_callbacks: Vec<EventCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl ClimateClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            timing: Timing::default(),
            event_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn remote(mut self, addr: SocketAddr) -> Self {
        self.config.remote_address = addr.ip();
        self.config.remote_port = addr.port();
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    /// Build a session over caller-supplied transport and scheduler.
    pub fn build_session<T: Transport, S: Scheduler>(
        self,
        transport: T,
        scheduler: S,
    ) -> Result<Session<T, S>> {
        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        Ok(Session {
            config: self.config,
            timing: self.timing,
            transport,
            scheduler,
            state: SessionState::Idle,
            connection: None,
            callback: None,
            connected: false,
            pending_teardowns: 0,
            commands: CommandQueue::default(),
            cache: DeviceStateCache::default(),
            event_callbacks: self.event_callbacks,
            logger,
        })
    }
}

/// The device session state machine.
///
/// Owns the only connection to the controller, the command queue and the
/// state cache. Every entry point takes `&mut self`, so callers that share a
/// session must serialize access (see [`crate::ClimateClient`]).
pub struct Session<T: Transport, S: Scheduler> {
    config: Config,
    timing: Timing,
    transport: T,
    scheduler: S,
    state: SessionState,
    /// Outbound data channel.
    connection: Option<T::Conn>,
    /// Controller's callback from discovery; held until teardown.
    callback: Option<T::Conn>,
    connected: bool,
    pending_teardowns: usize,
    commands: CommandQueue,
    cache: DeviceStateCache,
    event_callbacks: Vec<EventCallback>,
    logger: Option<MessageLogger>,
}

impl<T: Transport, S: Scheduler> Session<T, S> {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Gate for command posting.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn pending_teardowns(&self) -> usize {
        self.pending_teardowns
    }

    pub fn cache(&self) -> &DeviceStateCache {
        &self.cache
    }

    pub fn commands(&self) -> &CommandQueue {
        &self.commands
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    // -- Cycle --

    /// Discovery, connect and (unless a command is pending) a zone query.
    ///
    /// Refused with `Error::Busy` while a connection is open or a teardown is
    /// still scheduled. Stage failures have already been folded into the
    /// published status when this returns `Err`.
    pub async fn run_cycle(&mut self) -> Result<()> {
        if self.connection.is_some() || self.pending_teardowns > 0 {
            debug!(
                state = ?self.state,
                pending_teardowns = self.pending_teardowns,
                "session busy, skipping cycle"
            );
            return Err(Error::Busy);
        }

        self.connected = false;
        let started = Instant::now();

        self.transition(SessionState::Discovering);
        if let Err(e) = self.discover().await {
            self.fail_stage(Stage::Discovery, &e);
            return Err(e);
        }

        self.transition(SessionState::Connecting);
        if let Err(e) = self.connect().await {
            self.fail_stage(Stage::Connect, &e);
            self.release_callback().await;
            return Err(e);
        }

        if self.commands.is_pending() {
            // the post that follows refreshes the zone info itself
            debug!("command pending, skipping zone query");
            self.transition(SessionState::Connected);
            self.publish_status(ConnectivityStatus::Connected);
        } else {
            self.transition(SessionState::QueryingZone);
            if let Err(e) = self.query_zone().await {
                self.fail_with_teardown(Stage::QueryZone, &e);
                return Err(e);
            }
            self.transition(SessionState::Connected);
        }

        self.activate(started);
        Ok(())
    }

    async fn discover(&mut self) -> Result<()> {
        let payload = encode_message(&discovery_message(&self.config.local_address.to_string()));
        let policy = RetryPolicy {
            stage: Stage::Discovery,
            max_attempts: self.timing.max_attempts,
            timeout: self.timing.discovery_timeout,
        };
        let conn = with_retries(
            self,
            policy,
            payload,
            Self::discovery_attempt,
            retry_unless_protocol,
        )
        .await?;
        self.callback = Some(conn);
        Ok(())
    }

    fn discovery_attempt<'a>(
        &'a mut self,
        attempt: Attempt,
        payload: String,
    ) -> AttemptFuture<'a, T::Conn> {
        Box::pin(async move {
            if attempt.number > 1 {
                debug!(attempt = attempt.number, "discovery attempt");
            }
            self.publish_status(ConnectivityStatus::Connecting(attempt.number));
            self.transport.broadcast_discovery(payload.as_bytes()).await?;
            self.log_send("discovery", &payload);
            self.transport.await_inbound_connection(attempt.timeout).await
        })
    }

    async fn connect(&mut self) -> Result<()> {
        let remote = self.config.remote();
        let policy = RetryPolicy {
            stage: Stage::Connect,
            max_attempts: self.timing.max_attempts,
            timeout: self.timing.connect_timeout,
        };
        let conn = with_retries(
            self,
            policy,
            remote,
            Self::connect_attempt,
            retry_unless_protocol,
        )
        .await?;
        self.connection = Some(conn);
        if let Some(logger) = self.logger.as_mut() {
            let id = logger.start_session();
            debug!(session = %id, "message log session started");
        }
        info!(peer = %remote, "connected to controller");
        Ok(())
    }

    fn connect_attempt<'a>(
        &'a mut self,
        attempt: Attempt,
        remote: SocketAddr,
    ) -> AttemptFuture<'a, T::Conn> {
        Box::pin(async move {
            if attempt.number > 1 {
                debug!(attempt = attempt.number, "connection attempt");
            }
            // dots continue on from the three discovery attempts
            self.publish_status(ConnectivityStatus::Connecting(attempt.number + 3));
            self.transport.dial_remote(remote, attempt.timeout).await
        })
    }

    async fn query_zone(&mut self) -> Result<()> {
        let policy = RetryPolicy {
            stage: Stage::QueryZone,
            max_attempts: self.timing.max_attempts,
            timeout: self.timing.connect_timeout,
        };
        with_retries(self, policy, (), Self::query_attempt, retry_unless_protocol).await
    }

    fn query_attempt<'a>(&'a mut self, attempt: Attempt, _: ()) -> AttemptFuture<'a, ()> {
        Box::pin(async move {
            self.publish_status(ConnectivityStatus::Receiving(attempt.number));
            let request = encode_message(&getzoneinfo_message());
            let bytes = self.exchange(&request, "getzoneinfo", attempt).await?;
            let msg = decode_bytes(&bytes)?;
            self.publish_status(ConnectivityStatus::Connected);
            self.apply_zone_info(&msg);
            Ok(())
        })
    }

    fn activate(&mut self, started: Instant) {
        self.connected = true;
        let elapsed = started.elapsed();
        let remaining = self.timing.session_budget.saturating_sub(elapsed);
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            disconnect_in_s = remaining.as_secs(),
            "session active"
        );
        self.schedule_disconnect(remaining);
    }

    // -- Commands --

    /// Queue a command and echo it immediately.
    pub fn submit_command(&mut self, field: Field, value: &str) -> Result<()> {
        trace!(%field, value, "command received");
        self.commands.submit(field, value, Instant::now())?;
        self.publish(Event::FieldChanged {
            field,
            value: value.to_string(),
        });
        self.publish_status(ConnectivityStatus::WaitingForCommands);
        Ok(())
    }

    /// Periodic debounce check. Returns true when a batch was handed to the
    /// scheduler.
    pub fn debounce_tick(&mut self) -> bool {
        if !self.connected
            || !self
                .commands
                .is_quiet(Instant::now(), self.timing.debounce_window)
        {
            return false;
        }

        debug!("building command");
        self.publish_status(ConnectivityStatus::SendingCommand(0));
        // cleared before the send; a failed post is not requeued
        let batch = self.commands.take_batch(&self.cache);
        self.scheduler
            .schedule(self.timing.dispatch_delay, Deferred::PostCommand(batch));
        true
    }

    /// Send a batched command, then refresh the zone info on acknowledgement.
    pub async fn post_command(&mut self, batch: FieldMap) -> Result<()> {
        if !self.connected {
            warn!("dropping command batch, not connected");
            return Err(Error::NotConnected);
        }

        self.transition(SessionState::PostingCommand);
        let frame = encode_message(&postzoneinfo_message(batch));
        let policy = RetryPolicy {
            stage: Stage::PostCommand,
            max_attempts: self.timing.max_attempts,
            timeout: self.timing.connect_timeout,
        };
        let result = with_retries(
            self,
            policy,
            frame,
            Self::post_attempt,
            retry_unless_protocol,
        )
        .await;

        match result {
            Ok(()) => {
                self.transition(SessionState::QueryingZone);
                if let Err(e) = self.query_zone().await {
                    self.fail_with_teardown(Stage::QueryZone, &e);
                    return Err(e);
                }
                self.transition(SessionState::Connected);
                Ok(())
            }
            Err(Error::Protocol(reason)) => {
                warn!(%reason, "controller rejected command");
                self.transition(SessionState::Connected);
                self.publish_status(ConnectivityStatus::Connected);
                Err(Error::Protocol(reason))
            }
            Err(e) => {
                self.fail_with_teardown(Stage::PostCommand, &e);
                Err(e)
            }
        }
    }

    fn post_attempt<'a>(&'a mut self, attempt: Attempt, frame: String) -> AttemptFuture<'a, ()> {
        Box::pin(async move {
            debug!(attempt = attempt.number, "posting zone info");
            self.publish_status(ConnectivityStatus::SendingCommand(attempt.number));
            let bytes = self.exchange(&frame, "postzoneinfo", attempt).await?;
            if is_post_ack(&bytes) {
                Ok(())
            } else {
                // the controller answered, so another attempt will not help
                Err(Error::Protocol(format!(
                    "unexpected reply: {}",
                    String::from_utf8_lossy(&bytes)
                )))
            }
        })
    }

    // -- Deferred work and teardown --

    pub async fn run_deferred(&mut self, task: Deferred) -> Result<()> {
        match task {
            Deferred::Disconnect => {
                self.pending_teardowns = self.pending_teardowns.saturating_sub(1);
                self.disconnect().await;
                Ok(())
            }
            Deferred::PostCommand(batch) => self.post_command(batch).await,
        }
    }

    /// Best-effort delete request, then close everything. Safe to repeat.
    pub async fn disconnect(&mut self) {
        self.transition(SessionState::Disconnecting);

        if let Some(mut conn) = self.connection.take() {
            debug!("sending delete request");
            let frame = encode_message(&delete_message());
            match conn.send(frame.as_bytes()).await {
                Ok(()) => self.log_send("delete", &frame),
                Err(e) => trace!("delete request failed: {e}"),
            }
            conn.close_gracefully().await;
        }
        self.release_callback().await;

        if let Some(logger) = self.logger.as_mut() {
            logger.end_session();
        }
        self.publish_status(ConnectivityStatus::Disconnected);
        self.connected = false;
        self.transition(SessionState::Idle);
    }

    async fn release_callback(&mut self) {
        if let Some(mut conn) = self.callback.take() {
            conn.close_gracefully().await;
        }
    }

    fn schedule_disconnect(&mut self, delay: std::time::Duration) {
        self.pending_teardowns += 1;
        self.scheduler.schedule(delay, Deferred::Disconnect);
    }

    fn fail_stage(&mut self, stage: Stage, err: &Error) {
        warn!(%stage, "{err}, aborting");
        self.transition(SessionState::Idle);
        self.connected = false;
        self.publish_status(ConnectivityStatus::Disconnected);
    }

    /// Stage failure with a connection that may still be open; it is torn
    /// down later so the failing call returns promptly.
    fn fail_with_teardown(&mut self, stage: Stage, err: &Error) {
        self.fail_stage(stage, err);
        self.schedule_disconnect(self.timing.teardown_delay);
    }

    // -- Zone info --

    /// Store a zone-info response and publish the derived values.
    ///
    /// Frames without `system` are not zone info and are ignored, as are
    /// frames missing any of the other required fields. In fan mode the
    /// controller has no set point, so none is read or published.
    pub fn apply_zone_info(&mut self, msg: &DeviceMessage) -> bool {
        if msg.field(Field::System).is_none() {
            debug!(kind = ?msg.kind, "not a zone-info response");
            return false;
        }
        let (Some(system), Some(kind), Some(zone_list), Some(mode), Some(room_temp)) = (
            msg.field(Field::System),
            msg.field(Field::Type),
            msg.field(Field::ZoneList),
            msg.field(Field::Mode),
            msg.field(Field::RoomTemp),
        ) else {
            warn!(fields = ?msg.fields.keys().collect::<Vec<_>>(), "malformed zone info, skipping update");
            return false;
        };

        let previous = self.cache.values().clone();
        self.cache.update(Field::System, system);
        self.cache.update(Field::Type, kind);
        self.cache.update(Field::ZoneList, zone_list);
        self.cache.update(Field::Mode, mode);
        self.cache.update(Field::RoomTemp, room_temp);

        if system == "off" {
            self.publish_field(Field::Type, "off");
            self.refresh_set_point(msg);
        } else if mode == "fan" {
            self.publish_field(Field::Type, "fan_only");
            self.publish_field(Field::Mode, "off");
        } else {
            self.publish_field(Field::Type, kind);
            self.publish_field(Field::Mode, mode);
            self.refresh_set_point(msg);
        }
        self.publish_field(Field::ZoneList, zone_list);
        self.publish_field(Field::RoomTemp, room_temp);

        for change in diff_fields(&previous, self.cache.values()) {
            debug!(field = %change.field, old = ?change.old, new = ?change.new, "device field changed");
        }
        if let Some(logger) = self.logger.as_mut() {
            logger.log_zone_info(self.cache.values());
        }
        true
    }

    fn refresh_set_point(&mut self, msg: &DeviceMessage) {
        match msg.field(Field::SetPoint) {
            Some(set_point) => {
                self.cache.update(Field::SetPoint, set_point);
                self.publish_field(Field::SetPoint, set_point);
            }
            None => warn!("zone info without setPoint"),
        }
    }

    // -- Helpers --

    /// Send `frame` and wait for one reply. Zero bytes or no reply within the
    /// attempt's bound is `Error::Timeout`.
    async fn exchange(&mut self, frame: &str, kind: &str, attempt: Attempt) -> Result<Vec<u8>> {
        let conn = self.connection.as_mut().ok_or(Error::NotConnected)?;
        conn.send(frame.as_bytes()).await?;
        self.log_send(kind, frame);

        let conn = self.connection.as_mut().ok_or(Error::NotConnected)?;
        match conn.receive(RECEIVE_BUFFER_BYTES, attempt.timeout).await {
            Ok(bytes) if !bytes.is_empty() => {
                self.log_receive(&bytes);
                Ok(bytes)
            }
            Ok(_) | Err(Error::Timeout) => {
                debug!(kind, attempt = attempt.number, "no data");
                if let Some(logger) = self.logger.as_mut() {
                    logger.log_no_data(kind);
                }
                Err(Error::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "unexpected state transition");
        }
        trace!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn log_send(&mut self, kind: &str, raw: &str) {
        if self.config.verbose {
            debug!(kind, raw, "tx");
        } else {
            trace!(kind, raw, "tx");
        }
        if let Some(logger) = self.logger.as_mut() {
            logger.log_send(kind, raw);
        }
    }

    fn log_receive(&mut self, bytes: &[u8]) {
        let raw = String::from_utf8_lossy(bytes);
        if self.config.verbose {
            debug!(raw = %raw, "rx");
        } else {
            trace!(raw = %raw, "rx");
        }
        if let Some(logger) = self.logger.as_mut() {
            logger.log_receive(&raw);
        }
    }

    fn publish_field(&self, field: Field, value: &str) {
        self.publish(Event::FieldChanged {
            field,
            value: value.to_string(),
        });
    }

    fn publish_status(&self, status: ConnectivityStatus) {
        trace!(%status, "status");
        self.publish(Event::StatusChanged(status));
    }

    fn publish(&self, event: Event) {
        for cb in &self.event_callbacks {
            cb(&event);
        }
    }
}
