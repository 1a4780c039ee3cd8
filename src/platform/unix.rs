use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::io;
use tokio::process::Command;
use tracing::debug;

/// Put the worker in its own process group and tie its lifetime to ours.
pub fn prepare_command(cmd: &mut Command) -> io::Result<()> {
    // SAFETY: only async-signal-safe libc calls run between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if set_process_group() != 0 {
                return Err(io::Error::last_os_error());
            }

            #[cfg(target_os = "linux")]
            {
                if set_parent_death_signal() != 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            Ok(())
        });
    }

    Ok(())
}

pub fn process_alive(pid: u32) -> bool {
    match kill(to_pid(pid), None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM,
    }
}

/// Graceful stop: SIGTERM to the worker only.
pub fn request_stop(pid: u32) -> io::Result<()> {
    match kill(to_pid(pid), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Forced stop: SIGKILL to the worker's whole process group.
pub fn terminate_group(pid: u32) -> io::Result<()> {
    match killpg(to_pid(pid), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pid, "sent SIGKILL to worker process group");
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as libc::pid_t)
}

unsafe fn set_process_group() -> libc::c_int {
    unsafe { libc::setpgid(0, 0) }
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> libc::c_int {
    unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) }
}
