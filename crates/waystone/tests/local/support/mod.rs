pub mod helpers;
pub mod workflows;
