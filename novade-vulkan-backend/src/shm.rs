//! System V shared-memory segments used as the staging area for pixmaps the
//! driver cannot import directly.

use std::io;
use std::ptr::NonNull;

use crate::error::{BackendError, Result};

/// A private SysV segment attached to this process.
///
/// Dropping it detaches the local mapping and removes the segment. The X
/// server's attachment must be released before that.
#[derive(Debug)]
pub struct ShmSegment {
    id: i32,
    address: NonNull<libc::c_void>,
    size: usize,
}

impl ShmSegment {
    /// Creates and attaches a zero-filled segment of `size` bytes.
    pub fn create(size: usize) -> Result<Self> {
        let id = unsafe {
            libc::shmget(
                libc::IPC_PRIVATE,
                size,
                libc::IPC_CREAT | libc::IPC_EXCL | 0o600,
            )
        };
        if id == -1 {
            return Err(BackendError::SharedMemory(io::Error::last_os_error()));
        }

        let address = unsafe { libc::shmat(id, std::ptr::null(), 0) };
        // shmat reports failure as (void *) -1.
        if address as isize == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
            return Err(BackendError::SharedMemory(err));
        }

        let Some(address) = NonNull::new(address) else {
            unsafe { libc::shmctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
            return Err(BackendError::SharedMemory(io::Error::new(
                io::ErrorKind::Other,
                "shmat returned a null address",
            )));
        };

        tracing::trace!(shmid = id, size, "Attached shared memory segment");
        Ok(Self { id, address, size })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn as_ptr(&self) -> *mut libc::c_void {
        self.address.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if unsafe { libc::shmdt(self.address.as_ptr()) } == -1 {
            tracing::error!(
                shmid = self.id,
                error = %io::Error::last_os_error(),
                "Failed to detach shared memory segment"
            );
        }
        if unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) } == -1 {
            tracing::error!(
                shmid = self.id,
                error = %io::Error::last_os_error(),
                "Failed to remove shared memory segment"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_is_writable_and_detaches_on_drop() {
        // Sandboxes without SysV IPC cannot run this; nothing else to check then.
        let segment = match ShmSegment::create(4096) {
            Ok(segment) => segment,
            Err(e) => {
                eprintln!("skipping: {e}");
                return;
            }
        };
        assert_eq!(segment.size(), 4096);
        let bytes =
            unsafe { std::slice::from_raw_parts_mut(segment.as_ptr() as *mut u8, segment.size()) };
        assert!(bytes.iter().all(|&b| b == 0));
        bytes[4095] = 0xff;
        assert_eq!(bytes[4095], 0xff);
    }
}
