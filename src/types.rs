use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Fields carried by zone-info and postzoneinfo frames.
///
/// Values are passed through verbatim in both directions; nothing here
/// validates that `setPoint` is numeric or that `mode` is a known mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Field {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "type")]
    Type,
    #[serde(rename = "zoneList")]
    ZoneList,
    #[serde(rename = "mode")]
    Mode,
    #[serde(rename = "setPoint")]
    SetPoint,
    #[serde(rename = "roomTemp")]
    RoomTemp,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::System,
        Field::Type,
        Field::ZoneList,
        Field::Mode,
        Field::SetPoint,
        Field::RoomTemp,
    ];

    /// Fields sent in a postzoneinfo frame, in wire order.
    pub const WRITABLE: [Field; 5] = [
        Field::System,
        Field::Type,
        Field::ZoneList,
        Field::Mode,
        Field::SetPoint,
    ];

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Field::System => "system",
            Field::Type => "type",
            Field::ZoneList => "zoneList",
            Field::Mode => "mode",
            Field::SetPoint => "setPoint",
            Field::RoomTemp => "roomTemp",
        }
    }

    pub fn from_wire_str(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Field::System),
            "type" => Some(Field::Type),
            "zoneList" => Some(Field::ZoneList),
            "mode" => Some(Field::Mode),
            "setPoint" => Some(Field::SetPoint),
            "roomTemp" => Some(Field::RoomTemp),
            _ => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Field::RoomTemp)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

pub type FieldMap = BTreeMap<Field, String>;

/// Message kind, taken from the header element that opens every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Discovery,
    Delete,
    GetZoneInfo,
    PostZoneInfo,
    /// `<response>{subject}</response>`; the device answers a post with
    /// `subject == "postzoneinfo"`.
    Response(String),
}

impl MessageKind {
    /// Header element name and its text.
    pub fn header(&self) -> (&'static str, &str) {
        match self {
            MessageKind::Discovery => ("get", "discovery"),
            MessageKind::Delete => ("delete", "connection"),
            MessageKind::GetZoneInfo => ("get", "getzoneinfo"),
            MessageKind::PostZoneInfo => ("post", "postzoneinfo"),
            MessageKind::Response(subject) => ("response", subject),
        }
    }

    pub fn from_header(tag: &str, text: &str) -> Option<Self> {
        match (tag, text) {
            ("get", "discovery") => Some(MessageKind::Discovery),
            ("delete", _) => Some(MessageKind::Delete),
            ("get", "getzoneinfo") => Some(MessageKind::GetZoneInfo),
            ("post", "postzoneinfo") => Some(MessageKind::PostZoneInfo),
            ("response", subject) => Some(MessageKind::Response(subject.to_string())),
            _ => None,
        }
    }

    pub fn is_header_tag(tag: &str) -> bool {
        matches!(tag, "get" | "post" | "delete" | "response")
    }
}

/// A decoded frame: known fields plus any other child elements in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceMessage {
    pub kind: Option<MessageKind>,
    pub fields: FieldMap,
    pub extras: Vec<(String, String)>,
}

impl DeviceMessage {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, field: Field, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn with_extra(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.push((tag.into(), value.into()));
        self
    }

    pub fn field(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn extra(&self, tag: &str) -> Option<&str> {
        self.extras
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }
}

/// Stages that run under a bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Connect,
    QueryZone,
    PostCommand,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Discovery => "discovery",
            Stage::Connect => "connect",
            Stage::QueryZone => "getzoneinfo",
            Stage::PostCommand => "postzoneinfo",
        })
    }
}

/// Human-facing connectivity indicator. The dot count is the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Disconnected,
    Connecting(u8),
    Receiving(u8),
    SendingCommand(u8),
    Connected,
    WaitingForCommands,
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, dots) = match self {
            ConnectivityStatus::Disconnected => ("Disconnected", 0),
            ConnectivityStatus::Connecting(n) => ("Connecting", *n),
            ConnectivityStatus::Receiving(n) => ("Receiving Data", *n),
            ConnectivityStatus::SendingCommand(n) => ("Sending Command", *n),
            ConnectivityStatus::Connected => ("Connected", 0),
            ConnectivityStatus::WaitingForCommands => ("Waiting For More Commands", 0),
        };
        write!(f, "{label}{}", ".".repeat(dots as usize))
    }
}

/// Published side effects of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A field value, either echoed from a submitted command or reported by
    /// the device.
    FieldChanged { field: Field, value: String },
    StatusChanged(ConnectivityStatus),
}

/// Explicit session states.
///
/// ```text
/// Idle ─▶ Discovering ─▶ Connecting ─▶ QueryingZone ─▶ Connected ─▶ Disconnecting ─▶ Idle
///                                  └──── (command pending) ────▶ │  ▲
///                                                     PostingCommand
/// ```
///
/// A failure in any stage goes straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Discovering,
    Connecting,
    QueryingZone,
    Connected,
    PostingCommand,
    Disconnecting,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            // teardown is reachable from anywhere, and failures drop to Idle
            (_, Disconnecting) | (_, Idle) => true,
            (Idle, Discovering) => true,
            (Discovering, Connecting) => true,
            (Connecting, QueryingZone | Connected) => true,
            (QueryingZone, Connected) => true,
            (Connected, PostingCommand) => true,
            (PostingCommand, QueryingZone | Connected) => true,
            _ => false,
        }
    }
}
