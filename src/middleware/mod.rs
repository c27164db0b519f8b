//! Request security middleware: CSRF protection, the check pipeline and its
//! HTTP adapter

pub mod csrf;
pub mod http;
pub mod pipeline;

pub use csrf::{CsrfError, CsrfProtection, CsrfToken};
pub use http::{
    security_layer, security_request, AuthenticatedUser, SecurityLayerState, SESSION_HEADER,
};
pub use pipeline::{
    schema_for_field, RequestClass, RequestContext, RequestLimiters, SecurityDecision,
    SecurityMiddleware, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET, HEADER_RETRY_AFTER,
};
