pub mod types;

pub use types::{BackgroundMessage, ConnectionState, MessageResponse, ProviderError};
