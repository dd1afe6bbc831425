pub mod config;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use registry::{Client, ClientId, ClientRegistry};
pub use server::{build_router, start, AppState, ServerHandle};
