//! Section registry and submission dispatch.
//!
//! Sections register a name (optionally wildcard-suffixed) and a handler at
//! startup. Dispatch echoes every submitted non-null value back to the
//! originating client as an acknowledgement, resolves the first key that
//! matches any registered section in registration order, and invokes at most
//! that one handler with a fresh broadcast frame builder.
//!
//! The acknowledgement is deliberately decoupled from the handler: by the
//! time a handler runs, the client has already been told its keys arrived.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info, warn};

use panelui_core::{BoundedStore, PatternError, SectionPattern, StoreError};
use panelui_protocol::{is_null_sentinel, Submission};

use crate::frame::{FrameBuilder, FrameError, ACK_FRAME_SIZE, UI_FRAME_SIZE};
use crate::hub::{ClientHub, ClientId, Destination};

/// Shared application state handed to every handler.
///
/// One explicit context object instead of ambient singletons: the document
/// store, the connected-client hub and the reboot flag all live here, behind
/// a single mutual-exclusion domain each.
#[derive(Clone)]
pub struct PanelContext {
    store: Arc<Mutex<BoundedStore>>,
    hub: Arc<ClientHub>,
    reboot: Arc<AtomicBool>,
    /// Autosave countdown origin; handlers reset it on heavy UI rebuilds.
    last_save: Arc<Mutex<Instant>>,
}

impl PanelContext {
    pub fn new(store_capacity: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(BoundedStore::new(store_capacity))),
            hub: Arc::new(ClientHub::new()),
            reboot: Arc::new(AtomicBool::new(false)),
            last_save: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn store(&self) -> &Arc<Mutex<BoundedStore>> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }

    /// Current value of a persisted variable.
    pub fn param(&self, key: &str) -> Option<String> {
        self.store.lock().unwrap().get(key).map(String::from)
    }

    /// Declare a variable with its default, idempotently. Capacity failures
    /// at declaration time are logged and swallowed; a store too small for
    /// its own declarations is a wiring bug, not a runtime condition.
    pub fn declare_variable(&self, key: &str, default: &str) {
        if let Err(e) = self.store.lock().unwrap().create_if_absent(key, default) {
            warn!(key, %e, "variable declaration failed");
        }
    }

    /// Persist a value into a previously declared variable.
    pub fn write_variable(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.store.lock().unwrap().set(key, value, false)
    }

    /// Persist a submitted value, if present and not the null sentinel.
    /// Failures are logged; a refused write never aborts the handler.
    pub fn save_param(&self, data: &Submission, key: &str) {
        if let Some(value) = data.get_str(key) {
            if let Err(e) = self.write_variable(key, &value) {
                warn!(key, %e, "submitted value not persisted");
            }
        }
    }

    /// Build a frame bound to `dest` with the given byte budget.
    pub fn frame(&self, dest: Destination, budget: usize) -> FrameBuilder {
        FrameBuilder::new(self.hub.clone(), dest, budget, self.store.clone())
    }

    pub fn request_reboot(&self) {
        self.reboot.store(true, Ordering::Relaxed);
    }

    pub fn reboot_requested(&self) -> bool {
        self.reboot.load(Ordering::Relaxed)
    }

    /// Restart the autosave countdown from now.
    pub fn autosave_reset(&self) {
        *self.last_save.lock().unwrap() = Instant::now();
    }

    pub(crate) fn since_last_save(&self) -> std::time::Duration {
        self.last_save.lock().unwrap().elapsed()
    }
}

/// A registered section's submit handler.
///
/// Handlers run synchronously inside dispatch; they must be non-blocking and
/// fast, and must bring their frame to a terminal state before returning.
pub trait SectionHandler: Send + Sync {
    fn handle(
        &self,
        ctx: &PanelContext,
        frame: &mut FrameBuilder,
        data: &Submission,
    ) -> Result<(), FrameError>;
}

impl<F> SectionHandler for F
where
    F: Fn(&PanelContext, &mut FrameBuilder, &Submission) -> Result<(), FrameError> + Send + Sync,
{
    fn handle(
        &self,
        ctx: &PanelContext,
        frame: &mut FrameBuilder,
        data: &Submission,
    ) -> Result<(), FrameError> {
        self(ctx, frame, data)
    }
}

struct SectionEntry {
    pattern: SectionPattern,
    handler: Box<dyn SectionHandler>,
}

/// Ordered table of registered sections. Uniqueness is not enforced: the
/// first registered entry that matches wins at dispatch time.
#[derive(Default)]
pub struct SectionRegistry {
    entries: Vec<SectionEntry>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a section under a literal or wildcard-suffixed name.
    pub fn register(
        &mut self,
        name: &str,
        handler: impl SectionHandler + 'static,
    ) -> Result<(), PatternError> {
        let pattern = SectionPattern::parse(name)?;
        info!(section = %pattern, "section registered");
        self.entries.push(SectionEntry {
            pattern,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// First registered entry matching the key, by registration order.
    fn find(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.pattern.matches(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Routes one decoded submission: acknowledgement first, then at most one
/// section handler.
pub struct Dispatcher {
    ctx: PanelContext,
    registry: SectionRegistry,
}

impl Dispatcher {
    pub fn new(ctx: PanelContext, registry: SectionRegistry) -> Self {
        Self { ctx, registry }
    }

    pub fn ctx(&self) -> &PanelContext {
        &self.ctx
    }

    /// Dispatch one submission from `client`.
    ///
    /// Every non-null value is echoed into an acknowledgement value frame
    /// for the submitting client; the frame is flushed only if it carries
    /// anything, cleared otherwise. Section matching runs over the same key
    /// iteration and stops at the first key that selects a section; that
    /// section's handler then gets a broadcast frame builder and the full
    /// submission.
    pub fn dispatch(&self, client: ClientId, data: &Submission) {
        let mut ack = self.ctx.frame(Destination::Client(client), ACK_FRAME_SIZE);
        ack.value_frame();

        let mut matched: Option<usize> = None;
        let mut echoed = 0usize;

        for (key, value) in data.iter() {
            if !is_null_sentinel(value) {
                ack.value(key, value.clone(), false);
                echoed += 1;
            }
            if matched.is_none() {
                matched = self.registry.find(key);
            }
        }

        if echoed > 0 {
            if let Err(e) = ack.flush() {
                warn!(client, %e, "acknowledgement frame dropped");
            }
        } else {
            ack.clear();
        }

        match matched {
            Some(idx) => {
                let entry = &self.registry.entries[idx];
                info!(client, section = %entry.pattern, "section dispatch");
                let mut frame = self.ctx.frame(Destination::Broadcast, UI_FRAME_SIZE);
                if let Err(e) = entry.handler.handle(&self.ctx, &mut frame, data) {
                    warn!(section = %entry.pattern, %e, "section handler failed");
                }
            }
            None => debug!(client, "no section matched submission"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::error::TryRecvError;

    /// Handler that records its name and pushes a marker frame.
    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl SectionHandler for Recording {
        fn handle(
            &self,
            _ctx: &PanelContext,
            frame: &mut FrameBuilder,
            _data: &Submission,
        ) -> Result<(), FrameError> {
            self.log.lock().unwrap().push(self.name);
            frame.value_frame();
            frame.value("handled_by", json!(self.name), false);
            frame.flush()
        }
    }

    fn submission(json: &str) -> Submission {
        serde_json::from_str(json).unwrap()
    }

    fn setup(
        sections: &[&'static str],
    ) -> (Dispatcher, Arc<Mutex<Vec<&'static str>>>, PanelContext) {
        let ctx = PanelContext::new(1024);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SectionRegistry::new();
        for name in sections {
            registry
                .register(
                    name,
                    Recording {
                        name,
                        log: log.clone(),
                    },
                )
                .unwrap();
        }
        (Dispatcher::new(ctx.clone(), registry), log, ctx)
    }

    #[test]
    fn test_ack_echoes_all_non_null_keys() {
        let (dispatcher, _log, ctx) = setup(&["wifi*"]);
        let (id, mut rx) = ctx.hub().register();

        dispatcher.dispatch(id, &submission(r#"{"wifi_set": "go", "x": "1"}"#));

        let ack: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(ack["pkg"], "value");
        let keys: Vec<&str> = ack["set"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, ["wifi_set", "x"]);
    }

    #[test]
    fn test_first_registered_wins_over_literal() {
        // "wifi*" registered before the literal "wifi_set": the wildcard
        // wins regardless of specificity.
        let (dispatcher, log, ctx) = setup(&["wifi*", "wifi_set"]);
        let (id, _rx) = ctx.hub().register();

        dispatcher.dispatch(id, &submission(r#"{"wifi_set": "go", "x": "1"}"#));
        assert_eq!(*log.lock().unwrap(), ["wifi*"]);
    }

    #[test]
    fn test_registration_order_reversed() {
        let (dispatcher, log, ctx) = setup(&["wifi_set", "wifi*"]);
        let (id, _rx) = ctx.hub().register();

        dispatcher.dispatch(id, &submission(r#"{"wifi_set": "go"}"#));
        assert_eq!(*log.lock().unwrap(), ["wifi_set"]);
    }

    #[test]
    fn test_single_handler_per_submission() {
        let (dispatcher, log, ctx) = setup(&["alpha", "beta"]);
        let (id, _rx) = ctx.hub().register();

        // Both keys name a registered section; only the first key's match
        // fires.
        dispatcher.dispatch(id, &submission(r#"{"alpha": "1", "beta": "2"}"#));
        assert_eq!(*log.lock().unwrap(), ["alpha"]);
    }

    #[test]
    fn test_null_only_submission_clears_ack() {
        let (dispatcher, log, ctx) = setup(&["settings"]);
        let (id, mut rx) = ctx.hub().register();

        dispatcher.dispatch(id, &submission(r#"{"settings": "null"}"#));

        // No acknowledgement; the matched handler still runs and its marker
        // frame is the only traffic.
        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["set"][0]["key"], "handled_by");
        assert_eq!(rx.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(*log.lock().unwrap(), ["settings"]);
    }

    #[test]
    fn test_null_keys_still_drive_matching() {
        let (dispatcher, log, _ctx) = setup(&["settings"]);
        let ctx = dispatcher.ctx().clone();
        let (id, _rx) = ctx.hub().register();

        dispatcher.dispatch(id, &submission(r#"{"settings": null}"#));
        assert_eq!(*log.lock().unwrap(), ["settings"]);
    }

    #[test]
    fn test_unmatched_submission_acks_only() {
        let (dispatcher, log, ctx) = setup(&["settings"]);
        let (id, mut rx) = ctx.hub().register();

        dispatcher.dispatch(id, &submission(r#"{"unrelated": "1"}"#));

        let ack: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(ack["set"][0]["key"], "unrelated");
        assert!(rx.try_recv().is_err());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_broadcasts_to_all_clients() {
        let (dispatcher, _log, ctx) = setup(&["settings"]);
        let (submitter, mut rx_a) = ctx.hub().register();
        let (_watcher, mut rx_b) = ctx.hub().register();

        dispatcher.dispatch(submitter, &submission(r#"{"settings": "open"}"#));

        // Submitter sees ack + broadcast; the other client only the
        // broadcast.
        let ack: serde_json::Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(ack["set"][0]["key"], "settings");
        let b: serde_json::Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(b["set"][0]["key"], "handled_by");
    }

    #[test]
    fn test_save_param_skips_sentinel_and_undeclared() {
        let ctx = PanelContext::new(1024);
        ctx.declare_variable("hostname", "panel");

        let data = submission(r#"{"hostname": "renamed", "ghost": "1", "skip": "null"}"#);
        ctx.save_param(&data, "hostname");
        ctx.save_param(&data, "ghost");
        ctx.save_param(&data, "skip");

        assert_eq!(ctx.param("hostname"), Some("renamed".to_string()));
        assert_eq!(ctx.param("ghost"), None);
        assert_eq!(ctx.param("skip"), None);
    }
}
