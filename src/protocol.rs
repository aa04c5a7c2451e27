use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::types::*;
use crate::{Error, Result};

pub const ROOT_TAG: &str = "myclimate";
pub const PLATFORM: &str = "android";
pub const PROTOCOL_VERSION: &str = "1.0.0";
pub const ZONE_LIST: &str = "1,2";

const POST_SUBJECT: &str = "postzoneinfo";

pub fn discovery_message(local_address: &str) -> DeviceMessage {
    DeviceMessage::new(MessageKind::Discovery)
        .with_extra("ip", local_address)
        .with_extra("platform", PLATFORM)
        .with_extra("version", PROTOCOL_VERSION)
}

pub fn delete_message() -> DeviceMessage {
    DeviceMessage::new(MessageKind::Delete)
}

pub fn getzoneinfo_message() -> DeviceMessage {
    DeviceMessage::new(MessageKind::GetZoneInfo).with_field(Field::ZoneList, ZONE_LIST)
}

pub fn postzoneinfo_message(fields: FieldMap) -> DeviceMessage {
    DeviceMessage {
        kind: Some(MessageKind::PostZoneInfo),
        fields,
        extras: Vec::new(),
    }
}

pub fn post_ack_message() -> DeviceMessage {
    DeviceMessage::new(MessageKind::Response(POST_SUBJECT.to_string())).with_extra("result", "ok")
}

/// True only for the canonical acknowledgement frame, byte for byte apart
/// from trailing NUL padding.
pub fn is_post_ack(raw: &[u8]) -> bool {
    match std::str::from_utf8(raw) {
        Ok(text) => text.trim_end_matches('\0') == encode_message(&post_ack_message()),
        Err(_) => false,
    }
}

/// Encode `fields` under a `kind` header. Fields are emitted in `Field` order.
pub fn encode(kind: &MessageKind, fields: &FieldMap) -> String {
    let mut out = String::with_capacity(64 + fields.len() * 24);
    out.push('<');
    out.push_str(ROOT_TAG);
    out.push('>');
    let (tag, text) = kind.header();
    push_element(&mut out, tag, text);
    for (field, value) in fields {
        push_element(&mut out, field.as_wire_str(), value);
    }
    out.push_str("</");
    out.push_str(ROOT_TAG);
    out.push('>');
    out
}

pub fn encode_message(msg: &DeviceMessage) -> String {
    let mut out = String::with_capacity(128);
    out.push('<');
    out.push_str(ROOT_TAG);
    out.push('>');
    if let Some(kind) = &msg.kind {
        let (tag, text) = kind.header();
        push_element(&mut out, tag, text);
    }
    for (field, value) in &msg.fields {
        push_element(&mut out, field.as_wire_str(), value);
    }
    for (tag, value) in &msg.extras {
        push_element(&mut out, tag, value);
    }
    out.push_str("</");
    out.push_str(ROOT_TAG);
    out.push('>');
    out
}

fn push_element(out: &mut String, tag: &str, text: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(text));
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

pub fn decode_bytes(raw: &[u8]) -> Result<DeviceMessage> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))?;
    // the device pads some frames with NULs
    decode(text.trim_end_matches('\0'))
}

/// Parse one frame. Only well-formedness is checked here: a frame without
/// any zone-info fields still decodes.
pub fn decode(raw: &str) -> Result<DeviceMessage> {
    let mut reader = Reader::from_str(raw);
    reader.trim_text(false);

    let mut msg = DeviceMessage::default();
    let mut depth = 0usize;
    let mut saw_root = false;
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 => open_root(&name, &mut saw_root)?,
                    1 => current = Some((name, String::new())),
                    _ => return Err(Error::Decode(format!("nested element <{name}>"))),
                }
                depth += 1;
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match depth {
                    0 => open_root(&name, &mut saw_root)?,
                    1 => store(&mut msg, name, String::new()),
                    _ => return Err(Error::Decode(format!("nested element <{name}>"))),
                }
            }
            Event::Text(t) => match current.as_mut() {
                Some((_, value)) => value.push_str(&t.unescape()?),
                None if t.iter().all(u8::is_ascii_whitespace) => {}
                None => return Err(Error::Decode("text outside of a field".into())),
            },
            Event::CData(c) => match current.as_mut() {
                Some((_, value)) => value.push_str(&String::from_utf8_lossy(&c.into_inner())),
                None => return Err(Error::Decode("CDATA outside of a field".into())),
            },
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1
                    && let Some((name, value)) = current.take()
                {
                    store(&mut msg, name, value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(Error::Decode(format!("missing <{ROOT_TAG}> root element")));
    }
    if depth != 0 {
        return Err(Error::Decode("unterminated element".into()));
    }
    Ok(msg)
}

fn open_root(name: &str, saw_root: &mut bool) -> Result<()> {
    if *saw_root {
        return Err(Error::Decode("more than one root element".into()));
    }
    if name != ROOT_TAG {
        return Err(Error::Decode(format!("unexpected root element <{name}>")));
    }
    *saw_root = true;
    Ok(())
}

fn store(msg: &mut DeviceMessage, tag: String, value: String) {
    if msg.kind.is_none()
        && MessageKind::is_header_tag(&tag)
        && let Some(kind) = MessageKind::from_header(&tag, &value)
    {
        msg.kind = Some(kind);
        return;
    }
    match Field::from_wire_str(&tag) {
        Some(field) => {
            msg.fields.insert(field, value);
        }
        None => msg.extras.push((tag, value)),
    }
}
