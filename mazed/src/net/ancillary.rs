//! `SCM_RIGHTS` control messages.

use libc::{CMSG_LEN, CMSG_SPACE, SCM_RIGHTS, SOL_SOCKET, c_int, cmsghdr};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::{mem, ptr};

/// Size of the buffer used to receive control messages.
pub const CONTROL_CAPACITY: usize = 512;

/// Why a received control message was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AncillaryError {
    /// Not an `SOL_SOCKET`/`SCM_RIGHTS` message.
    #[error("unknown ancillary message")]
    Unknown,

    /// An `SCM_RIGHTS` message carrying other than exactly one descriptor.
    #[error("ancillary message with unexpected length")]
    UnexpectedLength,
}

/// Length of a control message carrying one descriptor.
fn fd_message_len() -> usize {
    unsafe { CMSG_LEN(mem::size_of::<c_int>() as u32) as usize }
}

/// Offset of the payload within a control message.
fn data_offset() -> usize {
    unsafe { CMSG_LEN(0) as usize }
}

/// Raw control-message bytes, either to be sent with `sendmsg` or as
/// received by `recvmsg`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ancillary {
    control: Vec<u8>,
}

impl Ancillary {
    /// Builds a message passing one descriptor.
    ///
    /// The descriptor is not owned: it must stay open until the message
    /// has been handed to the kernel.
    pub fn pass_fd(fd: RawFd) -> Self {
        let space = unsafe { CMSG_SPACE(mem::size_of::<c_int>() as u32) } as usize;
        let mut control = vec![0u8; space];

        let mut header: cmsghdr = unsafe { mem::zeroed() };
        header.cmsg_level = SOL_SOCKET;
        header.cmsg_type = SCM_RIGHTS;
        header.cmsg_len = fd_message_len() as _;

        unsafe {
            ptr::write_unaligned(control.as_mut_ptr() as *mut cmsghdr, header);
            ptr::write_unaligned(control.as_mut_ptr().add(data_offset()) as *mut c_int, fd);
        }

        Self { control }
    }

    /// Wraps control bytes received from the kernel.
    pub(crate) fn from_received(control: &[u8]) -> Option<Self> {
        if control.is_empty() {
            return None;
        }
        Some(Self {
            control: control.to_vec(),
        })
    }

    /// The raw control bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.control
    }

    /// Takes ownership of the single descriptor this message carries.
    ///
    /// Only the first control message is inspected, matching what a
    /// single-descriptor sender produces.
    pub fn into_fd(self) -> Result<OwnedFd, AncillaryError> {
        if self.control.len() < mem::size_of::<cmsghdr>() {
            return Err(AncillaryError::Unknown);
        }

        let header: cmsghdr =
            unsafe { ptr::read_unaligned(self.control.as_ptr() as *const cmsghdr) };

        if header.cmsg_level != SOL_SOCKET || header.cmsg_type != SCM_RIGHTS {
            return Err(AncillaryError::Unknown);
        }
        if header.cmsg_len as usize != fd_message_len() || self.control.len() < fd_message_len() {
            return Err(AncillaryError::UnexpectedLength);
        }

        let fd = unsafe {
            ptr::read_unaligned(self.control.as_ptr().add(data_offset()) as *const c_int)
        };

        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }
}
