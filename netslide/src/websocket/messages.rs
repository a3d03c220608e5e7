use serde::{de::Error as _, Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::Value;

// Every frame is a JSON text message of the form
// `{"event": "<name>", "data": { ... }}`.

const REGISTER_EVENT: &str = "multiplex-register";
const STATE_CHANGED_EVENT: &str = "multiplex-statechanged";

#[derive(Deserialize)]
struct InboundFrame<'a> {
    event: String,
    #[serde(borrow)]
    data: &'a RawValue,
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    event: &'a str,
    data: &'a RawValue,
}

// Client → Relay Messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register(RegisterPayload),
    StateChanged(StatePayload),
}

impl ClientEvent {
    pub fn parse(text: &str) -> crate::error::Result<Self> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        match frame.event.as_str() {
            REGISTER_EVENT => {
                ensure_object(frame.data)?;
                Ok(Self::Register(serde_json::from_str(frame.data.get())?))
            }
            STATE_CHANGED_EVENT => Ok(Self::StateChanged(StatePayload::from_raw(
                frame.data.to_owned(),
            )?)),
            other => Err(serde_json::Error::unknown_variant(
                other,
                &[REGISTER_EVENT, STATE_CHANGED_EVENT],
            )
            .into()),
        }
    }
}

// Relay → Client Messages
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StateChanged(StatePayload),
}

impl Serialize for ServerEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerEvent::StateChanged(payload) => OutboundFrame {
                event: STATE_CHANGED_EVENT,
                data: &payload.raw,
            }
            .serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(default)]
    pub secret: String,
}

/// Presentation state as sent by the presenter.
///
/// Only `secret` means anything to the relay. The object is kept as the
/// exact text the presenter sent, so slide indices, fragment state and
/// whatever else the presentation framework puts in here go out byte for
/// byte.
#[derive(Debug, Clone)]
pub struct StatePayload {
    raw: Box<RawValue>,
    secret: Option<String>,
}

#[derive(Deserialize)]
struct SecretField {
    #[serde(default)]
    secret: Option<Value>,
}

impl StatePayload {
    /// Wrap a JSON object. Anything other than an object is rejected.
    pub fn from_raw(raw: Box<RawValue>) -> serde_json::Result<Self> {
        ensure_object(&raw)?;
        let secret = match serde_json::from_str::<SecretField>(raw.get())?.secret {
            Some(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        };
        Ok(Self { raw, secret })
    }

    /// The secret this state is published under, if it is a non-empty string.
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    /// The payload exactly as received.
    pub fn get(&self) -> &str {
        self.raw.get()
    }
}

impl PartialEq for StatePayload {
    fn eq(&self, other: &Self) -> bool {
        self.raw.get() == other.raw.get()
    }
}

fn ensure_object(raw: &RawValue) -> serde_json::Result<()> {
    if raw.get().trim_start().starts_with('{') {
        Ok(())
    } else {
        Err(serde_json::Error::custom("event data must be a JSON object"))
    }
}
