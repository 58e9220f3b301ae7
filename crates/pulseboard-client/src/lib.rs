mod client;

pub use client::{ApiClient, ClientError, EventByteStream};
