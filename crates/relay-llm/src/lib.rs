pub mod dispatch;
pub mod mock;
pub mod provider;

pub use dispatch::{DispatchError, Dispatcher, HttpDispatcher, DISPATCH_TIMEOUT};
pub use mock::{MockDispatcher, MockReply};
pub use provider::{ProviderConfig, ProviderKind};
