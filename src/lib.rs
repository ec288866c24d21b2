pub mod api;
pub mod cleanup;
pub mod config;
pub mod image_input;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod question;
pub mod server;
pub mod textutil;
pub mod worker;
