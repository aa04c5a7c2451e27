#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use myclimate::{
    ClimateClient, Config, Connection, Deferred, Error, Event, Field, Result, Scheduler, Session,
    Transport,
};

/// What the fake controller does when the session reads.
#[derive(Debug, Clone)]
pub enum Reply {
    Frame(String),
    /// Nothing arrives before the read bound.
    Silence,
    /// The controller closed its side; the read returns zero bytes.
    Eof,
    Reset,
}

#[derive(Default)]
pub struct Script {
    /// `true` accepts a callback connection, `false` times out.
    pub accepts: VecDeque<bool>,
    /// `true` connects, `false` is refused.
    pub dials: VecDeque<bool>,
    pub replies: VecDeque<Reply>,
    /// Time a successful accept takes.
    pub accept_delay: Duration,

    pub broadcasts: Vec<String>,
    pub accept_calls: usize,
    pub dial_calls: usize,
    pub sent: Vec<String>,
    pub closes: usize,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    pub fn new(accepts: &[bool], dials: &[bool], replies: Vec<Reply>) -> Self {
        let transport = Self::default();
        {
            let mut s = transport.script.lock().unwrap();
            s.accepts = accepts.iter().copied().collect();
            s.dials = dials.iter().copied().collect();
            s.replies = replies.into();
        }
        transport
    }

    pub fn push_replies(&self, replies: Vec<Reply>) {
        self.script.lock().unwrap().replies.extend(replies);
    }

    pub fn sent(&self) -> Vec<String> {
        self.script.lock().unwrap().sent.clone()
    }
}

pub struct FakeConnection {
    script: Arc<Mutex<Script>>,
    outbound: bool,
    closed: bool,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        if self.outbound {
            let frame = String::from_utf8_lossy(bytes).into_owned();
            self.script.lock().unwrap().sent.push(frame);
        }
        Ok(())
    }

    async fn receive(&mut self, _max_bytes: usize, wait: Duration) -> Result<Vec<u8>> {
        let reply = self.script.lock().unwrap().replies.pop_front();
        match reply {
            Some(Reply::Frame(frame)) => Ok(frame.into_bytes()),
            Some(Reply::Eof) => Ok(Vec::new()),
            Some(Reply::Reset) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            ))),
            Some(Reply::Silence) | None => {
                tokio::time::sleep(wait).await;
                Err(Error::Timeout)
            }
        }
    }

    async fn close_gracefully(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.lock().unwrap().closes += 1;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Conn = FakeConnection;

    async fn broadcast_discovery(&self, payload: &[u8]) -> Result<()> {
        let frame = String::from_utf8_lossy(payload).into_owned();
        self.script.lock().unwrap().broadcasts.push(frame);
        Ok(())
    }

    async fn await_inbound_connection(&self, wait: Duration) -> Result<FakeConnection> {
        let (accept, delay) = {
            let mut s = self.script.lock().unwrap();
            s.accept_calls += 1;
            (s.accepts.pop_front().unwrap_or(false), s.accept_delay)
        };
        if accept {
            tokio::time::sleep(delay).await;
            Ok(FakeConnection {
                script: self.script.clone(),
                outbound: false,
                closed: false,
            })
        } else {
            tokio::time::sleep(wait).await;
            Err(Error::Timeout)
        }
    }

    async fn dial_remote(&self, _addr: SocketAddr, _wait: Duration) -> Result<FakeConnection> {
        let dial = {
            let mut s = self.script.lock().unwrap();
            s.dial_calls += 1;
            s.dials.pop_front().unwrap_or(false)
        };
        if dial {
            Ok(FakeConnection {
                script: self.script.clone(),
                outbound: true,
                closed: false,
            })
        } else {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingScheduler {
    pub tasks: Arc<Mutex<Vec<(Duration, Deferred)>>>,
}

impl RecordingScheduler {
    pub fn take(&self) -> Vec<(Duration, Deferred)> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, delay: Duration, task: Deferred) {
        self.tasks.lock().unwrap().push((delay, task));
    }
}

pub type Events = Arc<Mutex<Vec<Event>>>;

pub fn session(
    transport: FakeTransport,
) -> (Session<FakeTransport, RecordingScheduler>, RecordingScheduler, Events) {
    let scheduler = RecordingScheduler::default();
    let events: Events = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();
    let session = ClimateClient::builder(Config::default())
        .on_event(move |event| events_clone.lock().unwrap().push(event.clone()))
        .build_session(transport, scheduler.clone())
        .expect("session should build");
    (session, scheduler, events)
}

pub fn zone_info(system: &str, kind: &str, mode: &str, set_point: &str) -> String {
    format!(
        "<myclimate><response>getzoneinfo</response><system>{system}</system><type>{kind}</type>\
         <zoneList>1,2</zoneList><mode>{mode}</mode><setPoint>{set_point}</setPoint>\
         <roomTemp>19</roomTemp></myclimate>"
    )
}

pub const ACK: &str = "<myclimate><response>postzoneinfo</response><result>ok</result></myclimate>";
pub const NACK: &str =
    "<myclimate><response>postzoneinfo</response><result>error</result></myclimate>";
pub const DELETE: &str = "<myclimate><delete>connection</delete></myclimate>";
pub const GETZONEINFO: &str =
    "<myclimate><get>getzoneinfo</get><zoneList>1,2</zoneList></myclimate>";

pub fn statuses(events: &Events) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::StatusChanged(s) => Some(s.to_string()),
            _ => None,
        })
        .collect()
}

pub fn field_values(events: &Events, field: Field) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::FieldChanged { field: f, value } if *f == field => Some(value.clone()),
            _ => None,
        })
        .collect()
}

pub fn last_field(events: &Events, field: Field) -> Option<String> {
    field_values(events, field).pop()
}

pub fn last_status(events: &Events) -> Option<String> {
    statuses(events).pop()
}
