//! Backend Collaborators
//!
//! Typed seams between the conversation core and the outside world:
//! - `error` - the [`ApiError`] taxonomy
//! - `traits` - collaborator traits the controller depends on
//! - `retry` - the one-shot token refresh wrapper
//! - `http` - the bundled REST implementation

mod error;
mod http;
mod retry;
mod traits;

pub use error::{ApiError, ErrorCode};
pub use http::{HttpBackend, TokenStore};
pub use retry::TokenRetry;
pub use traits::{
    AccountService, Agreement, ConversationService, Device, HistoryDataSource, InvocationResult,
    NoRefresh, TokenRefresher, Vocalizer,
};
