pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpGateway, RemoteCall, ServiceUrls};
pub use error::CallError;
pub use types::{Endpoint, FormField, Method, Payload, ResponseBody, Service, TimeoutClass, TimeoutPolicy};
