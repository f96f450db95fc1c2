pub mod config;
pub mod error;
pub mod handler;
pub mod notifier;
pub mod openapi;
pub mod smtpclient;
pub mod store;
pub mod submission;
