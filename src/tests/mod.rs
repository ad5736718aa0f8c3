//! Integration and unit tests for the Galleria backend.
//!
//! ## Test Modules
//!
//! - **support**: shared fixtures (temporary database and storage, users, images, multipart bodies)
//! - **config_tests**: configuration defaults, validation and loading
//! - **db_tests**: schema and data access layer
//! - **error_tests**: error mapping and response bodies
//! - **health_api_tests**: health, version, metrics, sitemap and analytics endpoints
//! - **albums_api_tests**: album CRUD, covers and archive downloads
//! - **files_api_tests**: uploads, transforms, downloads and deletions
//! - **users_auth_api_tests**: login, token verification and user management
//! - **tasks_tests**: scheduled maintenance tasks
//!
//! Individual test modules can be run with:
//! ```bash
//! cargo test albums_api_tests
//! ```

pub mod support;

pub mod db_tests;
pub mod health_api_tests;
pub mod users_auth_api_tests;
