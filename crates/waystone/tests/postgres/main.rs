//! Integration tests against PostgreSQL.
//!
//! Requires `TEST_ADMIN_DATABASE_URL`; see `test_utils::db`.

mod runtime;
mod support;
mod world;
