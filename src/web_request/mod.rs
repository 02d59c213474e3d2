//! `webRequest` interception.
//!
//! The host application calls [`crate::host::ExtensionsHost::intercept`] from
//! its network hooks; the pipeline fans the request out to the extension
//! listeners registered for that stage and folds their answers into one
//! [`InterceptOutcome`].

mod pipeline;
mod types;

pub use pipeline::{ListenerRegistration, WebRequestPipeline};
pub use types::{
    merge_headers, normalize_resource_type, BlockingResponse, CompiledFilter, Decision,
    HttpHeader, InterceptOutcome, RequestDetails, RequestFilter, Stage,
};
