//! Shared helpers for waystone integration tests.

pub mod db;
