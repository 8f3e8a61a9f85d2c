//! Integration tests against the in-memory world.

mod hooks;
mod queue;
mod replay;
mod service;
mod sleep;
mod steps;
mod support;
