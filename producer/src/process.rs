use std::{
    ffi::OsStr,
    io,
    path::PathBuf,
    process::{Child, Command},
};

use log::info;

/// Executable name of the companion viewer.
pub const VIEWER_EXECUTABLE: &str = "limn-show";

/// A spawned companion process (normally the viewer).
///
/// Dropping the handle leaves the process running: a viewer deliberately
/// outlives the producer that spawned it so the final scene stays on screen.
pub struct CompanionProcess {
    child: Child,
}

impl CompanionProcess {
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let child = Command::new(program).args(args).spawn()?;
        Ok(Self { child })
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Block until the process exits and return its exit code (-1 when
    /// terminated by a signal).
    pub fn join(&mut self) -> io::Result<i32> {
        let status = self.child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }

    pub fn terminate(&mut self) {
        let _ = self.child.kill();
    }
}

/// Locate the viewer executable: prefer a sibling of the running producer
/// binary, fall back to PATH lookup.
pub(crate) fn viewer_executable() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(VIEWER_EXECUTABLE);
            if candidate.exists() {
                info!("Using viewer at {}", candidate.display());
                return candidate;
            }
        }
    }
    PathBuf::from(VIEWER_EXECUTABLE)
}
