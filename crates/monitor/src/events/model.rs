//! Typed runtime events consumed by the ingestion pipeline.

use std::collections::HashMap;

use bollard::models::{EventMessage, EventMessageTypeEnum};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Volume,
    Container,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Volume => "volume",
            EventKind::Container => "container",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Remove,
    Start,
    Stop,
    Die,
    Destroy,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Remove => "remove",
            EventAction::Start => "start",
            EventAction::Stop => "stop",
            EventAction::Die => "die",
            EventAction::Destroy => "destroy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub kind: EventKind,
    /// Runtime object id — the volume name or the container id.
    pub id: String,
    pub name: String,
    pub action: EventAction,
    pub time: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
}

/// Map a raw daemon event into a typed event.
///
/// Returns `None` for every (type, action) pair the service does not consume;
/// those events are silently ignored.
pub fn map_event(msg: &EventMessage) -> Option<RuntimeEvent> {
    let action = msg.action.as_deref()?;
    let (kind, action) = match (msg.typ.as_ref()?, action) {
        (EventMessageTypeEnum::VOLUME, "create") => (EventKind::Volume, EventAction::Create),
        (EventMessageTypeEnum::VOLUME, "remove") => (EventKind::Volume, EventAction::Remove),
        (EventMessageTypeEnum::CONTAINER, "start") => (EventKind::Container, EventAction::Start),
        (EventMessageTypeEnum::CONTAINER, "stop") => (EventKind::Container, EventAction::Stop),
        (EventMessageTypeEnum::CONTAINER, "die") => (EventKind::Container, EventAction::Die),
        (EventMessageTypeEnum::CONTAINER, "destroy") => {
            (EventKind::Container, EventAction::Destroy)
        }
        _ => return None,
    };

    let actor = msg.actor.as_ref();
    let id = actor.and_then(|a| a.id.clone()).unwrap_or_default();
    if id.is_empty() {
        return None;
    }
    let attributes = actor
        .and_then(|a| a.attributes.clone())
        .unwrap_or_default();
    let name = attributes.get("name").cloned().unwrap_or_else(|| id.clone());
    let time = msg
        .time
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now);

    Some(RuntimeEvent {
        kind,
        id,
        name,
        action,
        time,
        attributes,
    })
}
