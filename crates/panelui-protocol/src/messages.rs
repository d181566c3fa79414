//! Protocol message types for the control channel.
//!
//! Inbound: a minimal envelope `{"pkg": "post", "data": {...}}` carrying one
//! key/value submission. Outbound: value frames (flat key/value updates) and
//! interface frames (typed control records describing the UI).
//!
//! Messages are serialized as JSON over WebSocket text frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound package discriminator for a key/value submission.
pub const PKG_POST: &str = "post";
/// Outbound package discriminator for a value update frame.
pub const PKG_VALUE: &str = "value";
/// Outbound package discriminator for an interface description frame.
pub const PKG_INTERFACE: &str = "interface";

/// Raw inbound envelope. The `pkg` field selects the message type; unknown
/// values are preserved so the channel adapter can ignore them explicitly.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub pkg: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// A key/value submission to dispatch.
    Post(Submission),
    /// A well-formed envelope with an unrecognized package discriminator.
    Unknown(String),
}

/// The decoded key/value payload of one inbound client message.
///
/// Key order is the client's submission order and drives both the echo loop
/// and section matching, so it is preserved exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Submission(serde_json::Map<String, Value>);

impl Submission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Value as plain text: strings verbatim, other scalars in JSON form.
    ///
    /// Returns `None` for absent keys and for the null sentinel, so callers
    /// persisting submitted values skip "present but not persisted" entries
    /// for free.
    pub fn get_str(&self, key: &str) -> Option<String> {
        let value = self.0.get(key)?;
        if is_null_sentinel(value) {
            return None;
        }
        Some(match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for Submission {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The "present but not persisted/echoed" marker.
///
/// Browsers submit the literal string `"null"` for controls without a value;
/// a JSON `null` is treated the same way.
pub fn is_null_sentinel(value: &Value) -> bool {
    value.is_null() || value.as_str() == Some("null")
}

/// One key/value pair inside a value frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub key: String,
    pub value: Value,
    /// Whether the client should keep this value across frame replacement
    /// instead of treating it as a one-shot notification.
    #[serde(default)]
    pub retain: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// One typed control record inside an interface frame.
///
/// The `html` discriminator tells the client which widget to render; `name`
/// is the stable key the widget submits under, `label` the display text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "html", rename_all = "lowercase")]
pub enum Control {
    /// Opens the navigation menu container; `Option` records inside it are
    /// the menu items. Closed by `SectionEnd`.
    Menu,

    /// Opens a named UI region. Closed by `SectionEnd`.
    Section {
        name: String,
        label: String,
        /// Collapsed sub-section, expanded on demand by the client.
        #[serde(default, skip_serializing_if = "is_false")]
        hidden: bool,
    },

    #[serde(rename = "section_end")]
    SectionEnd,

    /// A selectable item inside a `Menu` or `Select` container.
    Option { value: String, label: String },

    Text {
        name: String,
        value: String,
        label: String,
    },

    /// Never carries the current value on the wire.
    Password { name: String, label: String },

    Number {
        name: String,
        value: String,
        label: String,
    },

    Checkbox {
        name: String,
        value: String,
        label: String,
    },

    /// Opens an option list container. Closed by `SectionEnd`.
    Select {
        name: String,
        value: String,
        label: String,
    },

    File {
        name: String,
        action: String,
        label: String,
    },

    Button {
        name: String,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },

    /// Button that submits its enclosing section's inputs under `section`.
    #[serde(rename = "button_submit")]
    ButtonSubmit {
        section: String,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },

    /// Static explanatory text.
    Comment { label: String },

    /// Visual gap, optionally labeled.
    Spacer {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        label: String,
    },
}

impl Control {
    /// Whether this record opens a container that a `SectionEnd` must close.
    pub fn opens_section(&self) -> bool {
        matches!(
            self,
            Control::Menu | Control::Section { .. } | Control::Select { .. }
        )
    }
}
