//! In-process event bus for the PlugHost Engine
//!
//! This crate provides the shared messaging backbone used by the plugin
//! runtime and its hosts:
//! - Publish/Subscribe with exact-match and `prefix.*` glob patterns
//! - Synchronous, registration-ordered delivery
//! - Handler failures are isolated: an erroring handler never blocks
//!   delivery to the remaining subscribers
//!
//! There is no persistence or replay: subscribers added after an event is
//! published never see it.
//!
//! # Example
//!
//! ```rust
//! use events_bus::{Event, EventBus};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! bus.subscribe("plugin.*", Arc::new(|event| {
//!     println!("received {}", event.event_type);
//!     Ok(())
//! }));
//!
//! bus.publish(&Event::new("plugin.loaded", serde_json::json!({"pluginId": "p1"})));
//! ```

pub mod bus;
pub mod error;
pub mod event;

pub use bus::*;
pub use error::*;
pub use event::*;
