//! Frame builder.
//!
//! A [`FrameBuilder`] incrementally assembles one outbound frame, either an
//! interface description or a flat value update, for a single destination,
//! then reaches exactly one terminal state: `flush()` (encode into
//! bounded-size wire messages and hand them to the hub) or `clear()`
//! (discard). Everything before flush is pure buffer mutation; only flush
//! performs I/O, and a destination that disconnected in the meantime makes
//! flush a silent no-op at the hub.
//!
//! Misuse (appending in the wrong mode, unbalanced section nesting) is
//! latched as a defect and turned into an error at flush time, so a buggy
//! handler aborts its frame instead of emitting malformed output.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{error, warn};

use panelui_core::BoundedStore;
use panelui_protocol::{
    codec::{encode_interface_frames, encode_value_frames},
    Control, ValueRecord,
};

use crate::hub::{ClientHub, Destination};

/// Byte budget for acknowledgement and publish value frames.
pub const ACK_FRAME_SIZE: usize = 512;
/// Byte budget for full interface descriptions.
pub const UI_FRAME_SIZE: usize = 2048;

/// Frame construction errors. All of them indicate a programming defect in
/// the calling handler, not a runtime condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("'{0}' called before a frame was opened")]
    NotOpen(&'static str),

    #[error("'{op}' is invalid in {mode} mode")]
    WrongMode {
        op: &'static str,
        mode: &'static str,
    },

    #[error("frame already reached a terminal state")]
    Finished,

    #[error("{open} section(s) left open at flush")]
    UnbalancedSections { open: usize },

    #[error("section_end without a matching open")]
    StraySectionEnd,

    #[error("frame encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug)]
enum Body {
    Idle,
    Values(Vec<ValueRecord>),
    Interface {
        title: Option<String>,
        records: Vec<Control>,
        depth: usize,
    },
    Flushed,
    Cleared,
}

impl Body {
    fn mode(&self) -> &'static str {
        match self {
            Body::Idle => "idle",
            Body::Values(_) => "value",
            Body::Interface { .. } => "interface",
            Body::Flushed | Body::Cleared => "terminal",
        }
    }
}

/// Stateful writer for one outbound frame, bound to one destination and one
/// output size budget.
pub struct FrameBuilder {
    hub: Arc<ClientHub>,
    dest: Destination,
    budget: usize,
    store: Arc<Mutex<BoundedStore>>,
    body: Body,
    defect: Option<FrameError>,
}

impl FrameBuilder {
    pub fn new(
        hub: Arc<ClientHub>,
        dest: Destination,
        budget: usize,
        store: Arc<Mutex<BoundedStore>>,
    ) -> Self {
        Self {
            hub,
            dest,
            budget,
            store,
            body: Body::Idle,
            defect: None,
        }
    }

    pub fn destination(&self) -> Destination {
        self.dest
    }

    /// Begin a UI description. `title` is context for the first screen only.
    pub fn interface_frame(&mut self, title: Option<&str>) -> &mut Self {
        match self.body {
            Body::Idle => {
                self.body = Body::Interface {
                    title: title.map(String::from),
                    records: Vec::new(),
                    depth: 0,
                };
            }
            _ => self.fail(FrameError::WrongMode {
                op: "interface_frame",
                mode: self.body.mode(),
            }),
        }
        self
    }

    /// Begin a flat key/value update batch.
    pub fn value_frame(&mut self) -> &mut Self {
        match self.body {
            Body::Idle => self.body = Body::Values(Vec::new()),
            _ => self.fail(FrameError::WrongMode {
                op: "value_frame",
                mode: self.body.mode(),
            }),
        }
        self
    }

    // ------------------------------------------------------------------
    // Value mode
    // ------------------------------------------------------------------

    /// Append one key/value pair. `retain` asks the client to keep the value
    /// across frame replacement.
    pub fn value(&mut self, key: &str, value: Value, retain: bool) -> &mut Self {
        if self.defect.is_some() {
            return self;
        }
        let err = match &mut self.body {
            Body::Values(records) => {
                records.push(ValueRecord {
                    key: key.to_string(),
                    value,
                    retain,
                });
                None
            }
            Body::Idle => Some(FrameError::NotOpen("value")),
            Body::Interface { .. } => Some(FrameError::WrongMode {
                op: "value",
                mode: "interface",
            }),
            _ => Some(FrameError::Finished),
        };
        if let Some(e) = err {
            self.fail(e);
        }
        self
    }

    // ------------------------------------------------------------------
    // Interface mode
    // ------------------------------------------------------------------

    /// Open the navigation menu container. Items are added with
    /// [`FrameBuilder::option`]; close with [`FrameBuilder::section_end`].
    pub fn menu_section(&mut self) -> &mut Self {
        self.push_control(Control::Menu)
    }

    /// Open a named UI region; close with [`FrameBuilder::section_end`].
    pub fn section(&mut self, name: &str, label: &str) -> &mut Self {
        self.push_control(Control::Section {
            name: name.to_string(),
            label: label.to_string(),
            hidden: false,
        })
    }

    /// Open a collapsed sub-section the client expands on demand.
    pub fn hidden_section(&mut self, name: &str, label: &str) -> &mut Self {
        self.push_control(Control::Section {
            name: name.to_string(),
            label: label.to_string(),
            hidden: true,
        })
    }

    pub fn section_end(&mut self) -> &mut Self {
        self.push_control(Control::SectionEnd)
    }

    /// Item inside a menu or select container.
    pub fn option(&mut self, value: &str, label: &str) -> &mut Self {
        self.push_control(Control::Option {
            value: value.to_string(),
            label: label.to_string(),
        })
    }

    /// Text input prefilled with the variable's current value.
    pub fn text(&mut self, name: &str, label: &str) -> &mut Self {
        let value = self.param(name);
        self.text_value(name, &value, label)
    }

    /// Text input with an explicit value.
    pub fn text_value(&mut self, name: &str, value: &str, label: &str) -> &mut Self {
        self.push_control(Control::Text {
            name: name.to_string(),
            value: value.to_string(),
            label: label.to_string(),
        })
    }

    /// Password input. The current value never goes out on the wire.
    pub fn password(&mut self, name: &str, label: &str) -> &mut Self {
        self.push_control(Control::Password {
            name: name.to_string(),
            label: label.to_string(),
        })
    }

    /// Numeric input prefilled with the variable's current value.
    pub fn number(&mut self, name: &str, label: &str) -> &mut Self {
        let value = self.param(name);
        self.push_control(Control::Number {
            name: name.to_string(),
            value,
            label: label.to_string(),
        })
    }

    /// Checkbox prefilled with the variable's current value.
    pub fn checkbox(&mut self, name: &str, label: &str) -> &mut Self {
        let value = self.param(name);
        self.push_control(Control::Checkbox {
            name: name.to_string(),
            value,
            label: label.to_string(),
        })
    }

    /// Open a select control prefilled with the current value; add choices
    /// with [`FrameBuilder::option`] and close with
    /// [`FrameBuilder::section_end`].
    pub fn select(&mut self, name: &str, label: &str) -> &mut Self {
        let value = self.param(name);
        self.push_control(Control::Select {
            name: name.to_string(),
            value,
            label: label.to_string(),
        })
    }

    /// File upload control posting to `action`.
    pub fn file(&mut self, name: &str, action: &str, label: &str) -> &mut Self {
        self.push_control(Control::File {
            name: name.to_string(),
            action: action.to_string(),
            label: label.to_string(),
        })
    }

    /// Plain button submitting its own name.
    pub fn button(&mut self, name: &str, label: &str) -> &mut Self {
        self.push_control(Control::Button {
            name: name.to_string(),
            label: label.to_string(),
            color: None,
        })
    }

    /// Button submitting the enclosing section's inputs.
    pub fn button_submit(&mut self, section: &str, label: &str, color: Option<&str>) -> &mut Self {
        self.push_control(Control::ButtonSubmit {
            section: section.to_string(),
            label: label.to_string(),
            color: color.map(String::from),
        })
    }

    /// Static explanatory text.
    pub fn comment(&mut self, label: &str) -> &mut Self {
        self.push_control(Control::Comment {
            label: label.to_string(),
        })
    }

    /// Visual gap, optionally labeled.
    pub fn spacer(&mut self, label: &str) -> &mut Self {
        self.push_control(Control::Spacer {
            label: label.to_string(),
        })
    }

    // ------------------------------------------------------------------
    // Terminal states
    // ------------------------------------------------------------------

    /// Serialize everything buffered into bounded-size wire messages and
    /// hand them to the hub.
    ///
    /// Fails fast on a latched defect or unbalanced section nesting; the
    /// buffer is discarded in that case, nothing is transmitted.
    pub fn flush(&mut self) -> Result<(), FrameError> {
        if let Some(defect) = self.defect.take() {
            self.body = Body::Cleared;
            error!(%defect, "aborting defective frame");
            return Err(defect);
        }

        let frames = match std::mem::replace(&mut self.body, Body::Flushed) {
            Body::Values(records) => encode_value_frames(&records, self.budget),
            Body::Interface {
                title,
                records,
                depth,
            } => {
                if depth != 0 {
                    self.body = Body::Cleared;
                    let err = FrameError::UnbalancedSections { open: depth };
                    error!(%err, "aborting unbalanced interface frame");
                    return Err(err);
                }
                encode_interface_frames(title.as_deref(), &records, self.budget)
            }
            Body::Idle => {
                self.body = Body::Cleared;
                return Err(FrameError::NotOpen("flush"));
            }
            terminal => {
                self.body = terminal;
                return Err(FrameError::Finished);
            }
        }
        .map_err(|e| FrameError::Encode(e.to_string()))?;

        for text in frames {
            self.hub.send(self.dest, text);
        }
        Ok(())
    }

    /// Discard everything buffered without transmitting.
    pub fn clear(&mut self) {
        self.defect = None;
        self.body = Body::Cleared;
    }

    fn param(&self, key: &str) -> String {
        self.store
            .lock()
            .unwrap()
            .get(key)
            .unwrap_or_default()
            .to_string()
    }

    fn push_control(&mut self, control: Control) -> &mut Self {
        if self.defect.is_some() {
            return self;
        }
        let err = match &mut self.body {
            Body::Interface { records, depth, .. } => {
                if matches!(control, Control::SectionEnd) {
                    if *depth == 0 {
                        Some(FrameError::StraySectionEnd)
                    } else {
                        *depth -= 1;
                        records.push(control);
                        None
                    }
                } else {
                    if control.opens_section() {
                        *depth += 1;
                    }
                    records.push(control);
                    None
                }
            }
            Body::Idle => Some(FrameError::NotOpen("control")),
            Body::Values(_) => Some(FrameError::WrongMode {
                op: "control",
                mode: "value",
            }),
            _ => Some(FrameError::Finished),
        };
        if let Some(e) = err {
            self.fail(e);
        }
        self
    }

    fn fail(&mut self, err: FrameError) {
        warn!(%err, "frame misuse latched");
        if self.defect.is_none() {
            self.defect = Some(err);
        }
    }
}

impl Drop for FrameBuilder {
    fn drop(&mut self) {
        if matches!(self.body, Body::Values(_) | Body::Interface { .. }) {
            warn!("frame dropped without flush or clear; buffer discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Arc<ClientHub>, Arc<Mutex<BoundedStore>>) {
        let mut store = BoundedStore::new(1024);
        store.create_if_absent("hostname", "panel-1").unwrap();
        (Arc::new(ClientHub::new()), Arc::new(Mutex::new(store)))
    }

    fn builder(
        hub: &Arc<ClientHub>,
        store: &Arc<Mutex<BoundedStore>>,
        dest: Destination,
    ) -> FrameBuilder {
        FrameBuilder::new(hub.clone(), dest, UI_FRAME_SIZE, store.clone())
    }

    #[test]
    fn test_value_frame_flush_sends_to_client() {
        let (hub, store) = setup();
        let (id, mut rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.value_frame();
        frame.value("pTime", json!("12:30"), true);
        frame.flush().unwrap();

        let text = rx.try_recv().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["pkg"], "value");
        assert_eq!(parsed["set"][0]["key"], "pTime");
        assert_eq!(parsed["set"][0]["retain"], true);
    }

    #[test]
    fn test_clear_transmits_nothing() {
        let (hub, store) = setup();
        let (id, mut rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.value_frame();
        frame.value("k", json!("v"), false);
        frame.clear();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_interface_frame_with_balanced_sections() {
        let (hub, store) = setup();
        let (id, mut rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.interface_frame(Some("Device Panel"));
        frame.menu_section();
        frame.option("settings", "Settings");
        frame.section_end();
        frame.section("netw", "Network");
        frame.text("hostname", "Hostname");
        frame.password("wifi_pass", "Password");
        frame.button_submit("netw", "Save", Some("gray"));
        frame.section_end();
        frame.flush().unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(parsed["pkg"], "interface");
        assert_eq!(parsed["title"], "Device Panel");
        let content = parsed["content"].as_array().unwrap();
        assert_eq!(content[0]["html"], "menu");
        // Prefill pulled the current store value.
        let text = content
            .iter()
            .find(|c| c["html"] == "text")
            .expect("text control present");
        assert_eq!(text["value"], "panel-1");
    }

    #[test]
    fn test_unbalanced_section_aborts_flush() {
        let (hub, store) = setup();
        let (id, mut rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.interface_frame(None);
        frame.section("netw", "Network");
        // No section_end.
        let err = frame.flush().unwrap_err();
        assert_eq!(err, FrameError::UnbalancedSections { open: 1 });
        assert!(rx.try_recv().is_err(), "nothing may be transmitted");
    }

    #[test]
    fn test_stray_section_end_is_latched() {
        let (hub, store) = setup();
        let (id, mut rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.interface_frame(None);
        frame.section_end();
        let err = frame.flush().unwrap_err();
        assert_eq!(err, FrameError::StraySectionEnd);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wrong_mode_is_latched() {
        let (hub, store) = setup();
        let (id, mut rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.value_frame();
        frame.comment("does not belong here");
        assert!(matches!(
            frame.flush().unwrap_err(),
            FrameError::WrongMode { .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_append_after_flush_fails() {
        let (hub, store) = setup();
        let (id, _rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.value_frame();
        frame.flush().unwrap();
        frame.value("late", json!("1"), false);
        assert!(matches!(frame.flush().unwrap_err(), FrameError::Finished));
    }

    #[test]
    fn test_flush_to_disconnected_destination_is_noop() {
        let (hub, store) = setup();
        let (id, rx) = hub.register();
        drop(rx);
        hub.unregister(id);

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.value_frame();
        frame.value("k", json!("v"), false);
        // Data is dropped, not queued; flush itself still succeeds.
        frame.flush().unwrap();
    }

    #[test]
    fn test_select_participates_in_nesting() {
        let (hub, store) = setup();
        let (id, _rx) = hub.register();

        let mut frame = builder(&hub, &store, Destination::Client(id));
        frame.interface_frame(None);
        frame.select("language", "Language");
        frame.option("0", "Rus");
        frame.option("1", "Eng");
        // Select left open: flush must refuse.
        assert_eq!(
            frame.flush().unwrap_err(),
            FrameError::UnbalancedSections { open: 1 }
        );
    }
}
