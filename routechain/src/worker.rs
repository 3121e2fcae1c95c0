//! One worker per CPU: pinned to a distinct core, each owns a single TUN
//! queue fd and blocks on it forever, synthesising replies in place and
//! writing them straight back onto the same queue.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::thread;

use thiserror::Error;
use tracing::{error, trace};

use crate::buffer::PacketBuffer;
use crate::packet::{self, Action};
use crate::prefix::PrefixTable;

#[derive(Debug, Error)]
pub enum Error {
    #[error("reading from queue {0}: {1}")]
    Read(RawFd, io::Error),
    #[error("queue {0} closed (read returned 0)")]
    Eof(RawFd),
    #[error("writing to queue {0}: {1}")]
    Write(RawFd, io::Error),
    #[error("pinning worker to cpu {0}: {1}")]
    Affinity(usize, io::Error),
}

/// Number of worker threads to spawn: one per online CPU, at least one.
pub fn worker_count() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n <= 0 {
        1
    } else {
        n as usize
    }
}

/// Pin the calling thread to `cpu` via `sched_setaffinity`.
pub fn pin_to_cpu(cpu: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let ret = libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(Error::Affinity(cpu, io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Run the blocking read/synthesise/write loop for a single queue fd. Never
/// returns on success; a read error or EOF is fatal, matching the reference
/// tool's "any queue dying takes the process down" behaviour — there is no
/// per-worker recovery because a half-dead queue set is worse than a crash.
pub fn run(cpu: usize, fd: RawFd, prefixes: &PrefixTable) -> Result<(), Error> {
    pin_to_cpu(cpu)?;

    let mut buf = PacketBuffer::new();
    loop {
        let n = unsafe {
            libc::read(
                fd,
                buf.read_region().as_mut_ptr() as *mut libc::c_void,
                buf.read_region().len(),
            )
        };
        if n < 0 {
            return Err(Error::Read(fd, io::Error::last_os_error()));
        }
        if n == 0 {
            return Err(Error::Eof(fd));
        }

        match packet::synthesize(&mut buf, n as usize, prefixes) {
            Action::Reply { offset, len } => {
                let written = unsafe {
                    libc::write(
                        fd,
                        buf.as_slice()[offset..offset + len].as_ptr() as *const libc::c_void,
                        len,
                    )
                };
                if written < 0 {
                    return Err(Error::Write(fd, io::Error::last_os_error()));
                }
                trace!(cpu, fd, len, "replied");
            }
            Action::Drop => {
                trace!(cpu, fd, n, "dropped");
            }
        }
    }
}

/// Spawn one worker thread per queue fd, each pinned to its own CPU. Each
/// thread borrows `prefixes` for its entire lifetime; the caller is
/// expected to join (or simply block on) the returned handles forever.
pub fn spawn_all(
    queues: Vec<RawFd>,
    prefixes: &'static PrefixTable,
) -> Vec<thread::JoinHandle<Result<(), Error>>> {
    queues
        .into_iter()
        .enumerate()
        .map(|(cpu, fd)| {
            thread::Builder::new()
                .name(format!("routechain-cpu{cpu}"))
                .spawn(move || run(cpu, fd, prefixes))
                .expect("failed to spawn worker thread")
        })
        .collect()
}

pub fn log_worker_failure(cpu: usize, err: &Error) {
    error!(cpu, error = %err, "worker thread terminated");
}
