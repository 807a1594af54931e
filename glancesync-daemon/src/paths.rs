use std::path::{Path, PathBuf};

use glancesync_core::config::glancesync_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.glancesync/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    glancesync_root(home).join(DAEMON_SOCKET)
}
