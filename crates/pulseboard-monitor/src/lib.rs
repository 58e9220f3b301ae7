pub mod config;
pub mod detail;
pub mod event_stream;
pub mod poller;
pub mod sources;
pub mod tasks;
