//! Storage capability: service façade and staged requests.
//!
//! A [`StorageRequest`] is composed in two steps: `stage(path)` selects the
//! target, then exactly one action (`write_bytes`, `write_text`, `remove`,
//! `fetch_url`) issues the backend call. The outcome arrives asynchronously
//! through the bridge and is announced with [`RequestEvent::Completed`].
//!
//! [`RequestEvent::Completed`]: crate::request::RequestEvent::Completed

pub mod request;
pub mod service;

pub use request::{StorageAction, StorageRequest};
pub use service::StorageService;
