//! Compile-time half of Waystone.
//!
//! Rewrites JavaScript modules whose functions carry a `"use step"` or
//! `"use workflow"` directive so the [`waystone`] runtime can find them by
//! stable identifier:
//!
//! ```text
//! source ──lexer──► tokens ──parser──► AST ──analysis──► directive functions
//!                                                              │
//!                          code + manifest ◄──lowering (mode)──┘
//! ```
//!
//! The rewrite splices the original text instead of re-printing the tree,
//! so everything outside a directive function is left byte-for-byte intact.
//!
//! ```ignore
//! use waystone_transform::{Mode, TransformConfig, transform};
//!
//! let output = transform(source, &TransformConfig::new(Mode::Step, "./src/orders.js"))?;
//! println!("{}", output.code);
//! ```

pub mod analysis;
pub mod ast;
pub mod config;
mod emit;
pub mod error;
pub mod lexer;
pub mod naming;
pub mod parser;
pub mod scope;
pub mod span;
mod transform;

pub use config::{Mode, TransformConfig};
pub use error::{Diagnostic, DiagnosticKind, Result, SyntaxError, TransformError};
pub use transform::{TransformOutput, transform};
