//! Termination on faults the plugin cannot recover from.
//!
//! Restarting is left to the process supervisor (the DaemonSet controller in
//! a cluster), so a fatal fault logs its cause and exits immediately.
//! Background tasks raise faults through a [`FatalHandler`], which terminates
//! unless an embedder installs its own reaction.

use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

/// exit status used for fatal faults
pub const FATAL_EXIT_CODE: i32 = 1;

/// Log a fatal fault for `resource_name` and terminate the process.
pub fn terminate(resource_name: &str, cause: impl Display) -> ! {
    tracing::error!(resource_name, "fatal device plugin fault: {cause}");
    std::process::exit(FATAL_EXIT_CODE)
}

type FatalFn = dyn Fn(&str, &str) + Send + Sync;

/// Reaction to a fatal fault raised by a background task.
///
/// The task that raised the fault ends right after the handler returns.
#[derive(Clone)]
pub struct FatalHandler(Arc<FatalFn>);

impl FatalHandler {
    /// Handler called with the resource name and the fault's cause.
    pub fn new(handler: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    pub fn raise(&self, resource_name: &str, cause: impl Display) {
        (self.0)(resource_name, &cause.to_string());
    }
}

impl Default for FatalHandler {
    fn default() -> Self {
        Self::new(|resource_name, cause| terminate(resource_name, cause))
    }
}

impl fmt::Debug for FatalHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FatalHandler")
    }
}
