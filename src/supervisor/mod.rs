//! Process supervision core.
//!
//! Covers the process registry, the lifecycle event bus, and the per-process
//! spawner/exit monitor that feeds exits back into the registry.

pub mod event_bus;
pub mod handle;
pub mod registry;
pub mod spawner;

pub use event_bus::{Delivery, EventBus, Subscription};
pub use handle::ProcessHandle;
pub use registry::ProcessRegistry;
