//! # Galleria Backend Library
//!
//! Backend of a personal photo gallery: albums, uploaded images, on-the-fly image
//! transforms, album archives and a small user system, exposed as a JSON API.
//!
//! ## Architecture
//!
//! - **Axum**: HTTP server, routing and multipart uploads
//! - **SQLx**: SQLite persistence
//! - **Tokio**: async runtime, worker processes and scheduled tasks
//! - **image** / **zip**: media processing and archives
//!
//! ## Core Components
//!
//! - [`cluster`]: supervisor and worker processes
//! - [`server`]: router composition and the listener
//! - [`routes`]: HTTP API endpoint handlers
//! - [`database`]: data access layer, the only place issuing SQL
//! - [`db`]: schema initialization
//! - [`tasks`]: scheduled maintenance (covers, archives, metadata)
//! - [`imaging`], [`archive`], [`storage`]: media on disk
//! - [`auth`], [`middleware`]: tokens, passwords and request guards
//! - [`analytics`]: site analytics reports
//! - [`config`], [`error`], [`logging`], [`metrics`], [`state`], [`types`]

pub mod analytics;
pub mod archive;
pub mod auth;
pub mod cluster;
pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod extract;
pub mod imaging;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod types;

#[cfg(test)]
mod tests;
