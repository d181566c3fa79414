//! # panelui-server
//!
//! Control-panel server runtime: the frame builder, section registry and
//! dispatcher, the WebSocket channel adapter and the housekeeping loop
//! (periodic publish, autosave, dead-connection cleanup).

pub mod dispatch;
pub mod frame;
pub mod http;
pub mod hub;
pub mod server;
pub mod storage;

pub use dispatch::{Dispatcher, PanelContext, SectionHandler, SectionRegistry};
pub use frame::{FrameBuilder, FrameError, ACK_FRAME_SIZE, UI_FRAME_SIZE};
pub use hub::{ClientHub, ClientId, Destination};
pub use server::{PanelServer, ServerConfig, ServerEvent};
pub use storage::FileStorage;

pub use panelui_core::{BoundedStore, SectionPattern, StoreError};
pub use panelui_protocol::Submission;
