//! Image gateway engine: reference resolution, provider dispatch and
//! asynchronous task orchestration.

pub mod codec;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod gateway;
pub mod net_guard;
pub mod orchestrator;
pub mod providers;
pub mod resolver;
pub mod transport;

mod util;

#[cfg(test)]
mod testing;

pub use config::GatewayConfig;
pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::{GatewayResponse, ImageGateway};
pub use orchestrator::{Sleeper, TaskOrchestrator, TaskOutcome, TaskSettings, TokioSleeper};
pub use providers::{ImageProvider, ImageProviderRegistry, ProviderRequest, ProviderResponse};
pub use resolver::{ImageResolver, ResolveOptions};
pub use transport::{HttpTransport, ReqwestTransport};
