//! Platform hooks for graceful termination and liveness probing.

#[cfg(unix)]
pub(crate) fn send_graceful_termination(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};

    let pid = to_unix_pid(pid)?;
    kill(pid, Signal::SIGTERM).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
pub(crate) fn send_graceful_termination(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "graceful termination signals are unavailable on this platform",
    ))
}

/// Signal-0 probe. A permission error still proves the pid exists.
#[cfg(unix)]
pub(crate) fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let Ok(pid) = to_unix_pid(pid) else {
        return false;
    };
    match kill(pid, None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub(crate) fn is_process_alive(_pid: u32) -> bool {
    true
}

#[cfg(unix)]
fn to_unix_pid(pid: u32) -> std::io::Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("pid {pid} is out of range"),
            )
        })
}
