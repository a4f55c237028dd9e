//! Translate LLM provider wire formats through one intermediate representation.
//!
//! The [`translate`] module is the conversion core and performs no I/O. The
//! [`proxy`] and [`server`] modules put it behind an HTTP front end.

pub mod config;
pub mod error;
pub mod providers;
pub mod proxy;
pub mod server;
pub mod translate;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use providers::ProviderKind;
pub use server::{build_router, AppState};
pub use translate::{ConversionPipeline, ProviderRegistry};
