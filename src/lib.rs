pub type Result<T = ()> = anyhow::Result<T>;
pub type Error = anyhow::Error;

pub mod api;
pub mod cmd;
pub mod export;
pub mod jobs;
pub mod messenger;
pub mod promo;
pub mod server;
pub mod settings;
