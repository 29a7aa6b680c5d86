//! Integration layer between an application frontend and a headless CMS
//! backend: reactive data composables, shared auth state, translation
//! sync, a reverse proxy and schema-driven type generation.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod items;
pub mod middleware;
pub mod module;
pub mod server;
pub mod shared;
pub mod translations;
pub mod typegen;
