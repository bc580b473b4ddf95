//! HTTP read adapter and the routes built on it.

mod adapter;
mod error;
mod middleware;
mod router;
mod validator;

pub use adapter::{HttpOptions, ViewRoute, serve_view};
pub use error::{
    CODE_BAD_REQUEST, CODE_INTERNAL, CODE_NOT_FOUND, ErrorEnvelope, ErrorReport, HttpError,
    INTERNAL_SERVER_ERROR,
};
pub use middleware::{RequestContext, log_responses, set_request_context};
pub use router::{AppState, FamilyEndpoint, InvalidateRequest, ViewEndpoint, build_router};
pub use validator::{ValidatorScheme, content_etag, if_none_match, time_bucket_etag};
