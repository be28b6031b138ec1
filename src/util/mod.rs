//! General utility code that didn't fit anywhere else
// (c) 2026 Dolt Authors

mod tracing;
pub(crate) use tracing::{is_initialized as tracing_is_initialised, setup as setup_tracing};
