pub mod helpers;
#[path = "../../local/support/workflows.rs"]
pub mod workflows;
