#![forbid(unsafe_code)]

pub mod server;

pub use server::{build_router, init_tracing, AppConfig};
