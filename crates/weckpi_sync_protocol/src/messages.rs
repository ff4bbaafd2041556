//! Protocol messages for state synchronization.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weckpi_state::FieldPath;

/// Event carrying a [`PatchMessage`], in both directions.
pub const PATCH_EVENT: &str = "appStatePatch";
/// Event used to request and deliver a [`Snapshot`].
pub const SNAPSHOT_EVENT: &str = "initialAppState";
/// Event carrying an [`ActionMessage`] from client to server.
pub const ACTION_EVENT: &str = "action";

/// How field paths are rendered in outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStyle {
    /// `music.volume`
    #[default]
    Dotted,
    /// `/music/volume`
    Pointer,
}

impl PathStyle {
    /// Renders `path` in this style.
    pub fn render(&self, path: &FieldPath) -> String {
        match self {
            PathStyle::Dotted => path.to_dotted(),
            PathStyle::Pointer => path.to_pointer(),
        }
    }
}

/// A single-field replacement.
///
/// Older servers name the path field `prop`; it is accepted on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchMessage {
    /// Address of the field, dotted or JSON pointer.
    #[serde(alias = "prop")]
    pub path: String,
    /// The new value of the field.
    pub value: Value,
}

impl PatchMessage {
    /// Creates a patch for `path` rendered in `style`.
    pub fn new(path: &FieldPath, value: Value, style: PathStyle) -> Self {
        Self {
            path: style.render(path),
            value,
        }
    }

    /// Parses the path carried by this message.
    pub fn field_path(&self) -> ProtocolResult<FieldPath> {
        Ok(FieldPath::parse(&self.path)?)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A named fire-and-forget command, e.g. `music.nextSong`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionMessage {
    /// Name of the action.
    pub name: String,
}

impl ActionMessage {
    /// Creates an action message.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The full state tree as sent by the server during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot(Value);

impl Snapshot {
    /// Wraps a JSON object.
    pub fn new(value: Value) -> ProtocolResult<Self> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(ProtocolError::InvalidSnapshot(format!(
                "expected an object, got {value}"
            )))
        }
    }

    /// Returns the snapshot tree.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Unwraps the snapshot tree.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Self::new(serde_json::from_slice(bytes)?)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    /// Field replacement.
    Patch(PatchMessage),
    /// Client request for the full tree; carries no data.
    SnapshotRequest,
    /// Snapshot delivered in response to a snapshot request.
    Snapshot(Snapshot),
    /// Named command.
    Action(ActionMessage),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl SyncMessage {
    /// Returns the event name this message travels under.
    pub fn event_name(&self) -> &'static str {
        match self {
            SyncMessage::Patch(_) => PATCH_EVENT,
            SyncMessage::SnapshotRequest | SyncMessage::Snapshot(_) => SNAPSHOT_EVENT,
            SyncMessage::Action(_) => ACTION_EVENT,
        }
    }

    /// Encodes as a `{event, data}` JSON envelope.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let data = match self {
            SyncMessage::Patch(patch) => serde_json::to_value(patch)?,
            SyncMessage::SnapshotRequest => Value::Null,
            SyncMessage::Snapshot(snapshot) => snapshot.as_value().clone(),
            SyncMessage::Action(action) => serde_json::to_value(action)?,
        };
        let envelope = Envelope {
            event: self.event_name().to_string(),
            data,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decodes a `{event, data}` JSON envelope.
    ///
    /// A snapshot event without data is a request, one with data a response.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        match envelope.event.as_str() {
            PATCH_EVENT => Ok(SyncMessage::Patch(serde_json::from_value(envelope.data)?)),
            SNAPSHOT_EVENT if envelope.data.is_null() => Ok(SyncMessage::SnapshotRequest),
            SNAPSHOT_EVENT => Ok(SyncMessage::Snapshot(Snapshot::new(envelope.data)?)),
            ACTION_EVENT => Ok(SyncMessage::Action(serde_json::from_value(envelope.data)?)),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn patch_wire_shape() {
        let path = FieldPath::parse("music.volume").unwrap();
        let patch = PatchMessage::new(&path, json!(70), PathStyle::Dotted);
        let encoded: Value = serde_json::from_slice(&patch.encode().unwrap()).unwrap();
        assert_eq!(encoded, json!({"path": "music.volume", "value": 70}));

        let pointer = PatchMessage::new(&path, json!(70), PathStyle::Pointer);
        assert_eq!(pointer.path, "/music/volume");
        assert_eq!(pointer.field_path().unwrap(), path);
    }

    #[test]
    fn patch_accepts_legacy_prop_key() {
        let patch = PatchMessage::decode(br#"{"prop": "/music/position", "value": 12.5}"#).unwrap();
        assert_eq!(patch.path, "/music/position");
        assert_eq!(
            patch.field_path().unwrap(),
            FieldPath::parse("music.position").unwrap()
        );
    }

    #[test]
    fn patch_with_bad_path() {
        let patch = PatchMessage::decode(br#"{"path": "music..volume", "value": 1}"#).unwrap();
        assert!(matches!(
            patch.field_path(),
            Err(ProtocolError::InvalidPath(_))
        ));
    }

    #[test]
    fn snapshot_must_be_object() {
        assert!(Snapshot::new(json!({"music": {}})).is_ok());
        assert!(matches!(
            Snapshot::new(json!([1, 2, 3])),
            Err(ProtocolError::InvalidSnapshot(_))
        ));
        assert!(Snapshot::decode(b"42").is_err());
    }

    #[test]
    fn envelope_dispatch() {
        let message = SyncMessage::Action(ActionMessage::new("music.nextSong"));
        let bytes = message.encode().unwrap();
        let envelope: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            envelope,
            json!({"event": "action", "data": {"name": "music.nextSong"}})
        );
        assert_eq!(SyncMessage::decode(&bytes).unwrap(), message);

        let snapshot = SyncMessage::Snapshot(Snapshot::new(json!({"initialized": true})).unwrap());
        assert_eq!(snapshot.event_name(), "initialAppState");
        assert_eq!(
            SyncMessage::decode(&snapshot.encode().unwrap()).unwrap(),
            snapshot
        );
    }

    #[test]
    fn snapshot_request_has_no_data() {
        let bytes = SyncMessage::SnapshotRequest.encode().unwrap();
        let envelope: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope, json!({"event": "initialAppState", "data": null}));
        assert_eq!(
            SyncMessage::decode(br#"{"event": "initialAppState"}"#).unwrap(),
            SyncMessage::SnapshotRequest
        );
        assert!(SyncMessage::decode(br#"{"event": "initialAppState", "data": 3}"#).is_err());
    }

    #[test]
    fn envelope_unknown_event() {
        let err = SyncMessage::decode(br#"{"event": "ping", "data": null}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownEvent(name) if name == "ping"));
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = SyncMessage::decode(&bytes);
            let _ = PatchMessage::decode(&bytes);
        }
    }
}
