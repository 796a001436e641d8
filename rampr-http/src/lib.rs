#![forbid(unsafe_code)]

mod check;
mod client;
mod error;
mod multipart;
mod types;
mod workload;

pub use http::Method;

pub use check::{Expectation, ResponseCheck, lookup};
pub use client::HttpClient;
pub use error::{Error, Result, TransportErrorKind};
pub use multipart::{BOUNDARY, FilePart, MultipartForm};
pub use types::{HttpRequest, HttpResponse};
pub use workload::{HttpWorkload, RequestBody, RequestSpec, request_trend_name};
