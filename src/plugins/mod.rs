//! Plugin registry and event dispatch.
//!
//! Plugins are JSON manifests discovered under a plugins root. Loading one
//! registers its handlers tagged with the plugin's module identity, so
//! unloading is a removal by owner. Handlers dispatch newest-first.

mod dispatch;
mod handler;
mod manifest;
mod registry;
mod table;

pub use dispatch::{Dispatch, Dispatcher};
pub use handler::{
    EventFilter, Handler, HandlerContext, HandlerError, MessageEvent, Outcome, RebootRequest,
    format_uptime,
};
pub use manifest::{HandlerSpec, PluginManifest};
pub use registry::{
    CUSTOM_DIR, PLUGIN_EXTENSION, PluginEntry, PluginError, PluginHandle, PluginRegistry,
};
pub use table::{HandlerId, HandlerTable, Registration};
