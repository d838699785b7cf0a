//! Routers for the three API families.

pub mod compute;
pub mod iam;
pub mod storage;

use stratus_core::OpContext;

/// Context for one request. Handlers are cancelled by the client closing
/// the connection; the token here is for the service pipeline stages.
pub(crate) fn request_ctx() -> OpContext {
    OpContext::background().with_timeout(std::time::Duration::from_secs(120))
}
