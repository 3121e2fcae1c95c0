//! TUN interface provisioning: opening the multi-queue device, bringing it
//! up, and assigning addresses, via the same ioctl/netlink primitives the
//! kernel expects any userspace tool to use — no netlink client crate, just
//! `libc` and a hand-built request buffer.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use thiserror::Error;

use crate::prefix::Family;

#[derive(Debug, Error)]
pub enum Error {
    #[error("opening /dev/net/tun: {0}")]
    OpenTun(io::Error),
    #[error("TUNSETIFF ioctl: {0}")]
    SetIff(io::Error),
    #[error("opening control socket: {0}")]
    ControlSocket(io::Error),
    #[error("SIOCSIFFLAGS ioctl: {0}")]
    SetFlags(io::Error),
    #[error("SIOCGIFINDEX ioctl: {0}")]
    GetIndex(io::Error),
    #[error("opening netlink socket: {0}")]
    NetlinkSocket(io::Error),
    #[error("sending netlink request: {0}")]
    NetlinkSend(io::Error),
}

const IFNAMSIZ: usize = 16;
const IFF_TUN: i16 = 0x0001;
const IFF_NO_PI: i16 = 0x1000;
const IFF_MULTI_QUEUE: i16 = 0x0100;

/// A provisioned multi-queue TUN interface: one open fd per queue, all
/// sharing the one kernel-assigned interface name.
pub struct Interface {
    name: [u8; IFNAMSIZ],
    queues: Vec<File>,
}

#[repr(C)]
struct IfReqFlags {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: i16,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfReqIndex {
    ifr_name: [u8; IFNAMSIZ],
    ifr_ifindex: i32,
    _pad: [u8; 20],
}

impl Interface {
    /// Open `n_queues` independent handles to the same freshly-created
    /// `IFF_TUN | IFF_NO_PI | IFF_MULTI_QUEUE` device. The kernel picks the
    /// interface name on the first `TUNSETIFF` call; every subsequent queue
    /// must request that same name back to join the device instead of
    /// creating a second one.
    pub fn create(n_queues: usize) -> Result<Interface, Error> {
        let mut queues = Vec::with_capacity(n_queues);
        let mut name = [0u8; IFNAMSIZ];

        let first = open_queue(&name)?;
        name = first.0;
        queues.push(first.1);

        for _ in 1..n_queues {
            let (_, fd) = open_queue(&name)?;
            queues.push(fd);
        }

        Ok(Interface { name, queues })
    }

    pub fn queue_fds(&self) -> Vec<RawFd> {
        self.queues.iter().map(|f| f.as_raw_fd()).collect()
    }

    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Bring the interface administratively up via `SIOCSIFFLAGS`, over a
    /// throwaway `AF_INET`/`SOCK_DGRAM` control socket (the ioctl itself is
    /// address-family agnostic; this just needs *a* socket fd to issue it
    /// on, matching how the kernel documents the call).
    pub fn bring_up(&self) -> Result<(), Error> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::ControlSocket(io::Error::last_os_error()));
        }
        let mut req = IfReqFlags {
            ifr_name: self.name,
            ifr_flags: (libc::IFF_UP | libc::IFF_RUNNING) as i16,
            _pad: [0; 22],
        };
        let ret = unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS, &mut req) };
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        if ret < 0 {
            return Err(Error::SetFlags(err));
        }
        Ok(())
    }

    /// Look up the kernel-assigned ifindex via `SIOCGIFINDEX`.
    pub fn index(&self) -> Result<i32, Error> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(Error::ControlSocket(io::Error::last_os_error()));
        }
        let mut req = IfReqIndex {
            ifr_name: self.name,
            ifr_ifindex: 0,
            _pad: [0; 20],
        };
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFINDEX, &mut req) };
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        if ret < 0 {
            return Err(Error::GetIndex(err));
        }
        Ok(req.ifr_ifindex)
    }

    /// Assign `addr` (`/prefix_len`) to the interface by sending a single
    /// `RTM_NEWADDR` over a raw `NETLINK_ROUTE` socket. The kernel's ack is
    /// deliberately never read back; the request is fire-and-forget, same
    /// as the tool this one succeeds.
    pub fn add_address(&self, family: Family, addr: &[u8], prefix_len: u8) -> Result<(), Error> {
        let index = self.index()?;
        let af = match family {
            Family::V4 => libc::AF_INET as u8,
            Family::V6 => libc::AF_INET6 as u8,
        };

        let mut req = netlink_newaddr_request(af, prefix_len, index as u32, addr);

        let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW, libc::NETLINK_ROUTE) };
        if fd < 0 {
            return Err(Error::NetlinkSocket(io::Error::last_os_error()));
        }
        let ret = unsafe {
            libc::send(
                fd,
                req.as_mut_ptr() as *const libc::c_void,
                req.len(),
                0,
            )
        };
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        if ret < 0 {
            return Err(Error::NetlinkSend(err));
        }
        Ok(())
    }
}

fn open_queue(existing_name: &[u8; IFNAMSIZ]) -> Result<([u8; IFNAMSIZ], File), Error> {
    let path = CString::new("/dev/net/tun").unwrap();
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if fd < 0 {
        return Err(Error::OpenTun(io::Error::last_os_error()));
    }

    let mut req = IfReqFlags {
        ifr_name: *existing_name,
        ifr_flags: IFF_TUN | IFF_NO_PI | IFF_MULTI_QUEUE,
        _pad: [0; 22],
    };
    let ret = unsafe { libc::ioctl(fd, TUNSETIFF, &mut req) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(Error::SetIff(err));
    }

    let file = unsafe { File::from_raw_fd(fd) };
    Ok((req.ifr_name, file))
}

#[cfg(target_pointer_width = "64")]
const TUNSETIFF: u64 = 0x400454ca;
#[cfg(target_pointer_width = "32")]
const TUNSETIFF: u32 = 0x400454ca;

const NETLINK_ALIGN: usize = 4;

fn nlmsg_align(len: usize) -> usize {
    (len + NETLINK_ALIGN - 1) & !(NETLINK_ALIGN - 1)
}

/// Build a single `RTM_NEWADDR` netlink message: header, `ifaddrmsg`, and
/// one `IFA_LOCAL` attribute carrying the address bytes. Sized by hand
/// rather than through `#[repr(C)]` structs laid end to end, since the
/// rtattr payload's length varies between v4 (4 bytes) and v6 (16 bytes).
fn netlink_newaddr_request(af: u8, prefix_len: u8, index: u32, addr: &[u8]) -> Vec<u8> {
    const NLMSGHDR_LEN: usize = 16;
    const IFADDRMSG_LEN: usize = 8;
    const RTATTR_HDR_LEN: usize = 4;

    let header_len = NLMSGHDR_LEN + IFADDRMSG_LEN;
    let aligned_header_len = nlmsg_align(header_len);
    let attr_len = RTATTR_HDR_LEN + addr.len();
    let total_len = aligned_header_len + attr_len;

    let mut buf = vec![0u8; nlmsg_align(total_len)];

    // nlmsghdr
    buf[0..4].copy_from_slice(&(total_len as u32).to_ne_bytes());
    buf[4..6].copy_from_slice(&(libc::RTM_NEWADDR as u16).to_ne_bytes());
    let flags = (libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_REQUEST | libc::NLM_F_ACK) as u16;
    buf[6..8].copy_from_slice(&flags.to_ne_bytes());
    // sequence number and pid left at zero; the ack is never read back.

    // ifaddrmsg
    let m = NLMSGHDR_LEN;
    buf[m] = af;
    buf[m + 1] = prefix_len;
    buf[m + 2] = 0; // ifa_flags
    buf[m + 3] = 0; // ifa_scope
    buf[m + 4..m + 8].copy_from_slice(&index.to_ne_bytes());

    // rtattr: IFA_LOCAL
    let r = aligned_header_len;
    buf[r..r + 2].copy_from_slice(&(attr_len as u16).to_ne_bytes());
    buf[r + 2..r + 4].copy_from_slice(&(libc::IFA_LOCAL as u16).to_ne_bytes());
    buf[r + 4..r + 4 + addr.len()].copy_from_slice(addr);

    buf.truncate(total_len);
    buf
}
