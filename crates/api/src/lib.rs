pub mod caller;
pub mod error;
pub mod request;
pub mod retry;
pub mod session;

pub use {
    caller::ApiCaller, error::ApiError, request::ApiRequestSpec, retry::RetryPolicy,
    session::Session,
};
