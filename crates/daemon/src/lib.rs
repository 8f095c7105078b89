// Spool Daemon - Composition Root (ADR-001)
// Wires the core queues to their stores, loads settings and installs logging

pub mod factory;
pub mod logging;
pub mod settings;

pub use factory::QueueFactory;
pub use logging::{init_logging, LogFormat, LogGuard};
pub use settings::{QueueSettings, Settings};
