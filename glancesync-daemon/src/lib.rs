//! glancesync daemon: API-triggered region syncs over a Unix socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod tasks;

pub use error::DaemonError;
pub use protocol::{
    request_forget, request_status, request_stop, request_sync, request_task, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking, DaemonContext};
pub use tasks::{Task, TaskStatus, TaskTracker};
