//! POSIX message queues and shared memory.
//!
//! Both kinds of object are created exclusively under a `/`-prefixed name
//! and unlinked again when the creating handle drops. A forked child
//! inherits the open descriptors and the mapping and must leave through
//! `_exit` so it never runs those destructors.

use crate::error::{Result, SqwError};
use std::ffi::{c_char, c_long, CString};

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| SqwError::Ipc(format!("invalid name {:?}", name)))
}

/// A message queue with fixed-size records.
pub struct MessageQueue {
    mqd: libc::mqd_t,
    name: CString,
    msg_size: usize,
}

impl MessageQueue {
    /// Create `name` holding at most `max_msg` records of `msg_size` bytes.
    pub fn create(name: &str, max_msg: usize, msg_size: usize) -> Result<Self> {
        let name = c_name(name)?;
        let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
        attr.mq_maxmsg = max_msg as c_long;
        attr.mq_msgsize = msg_size as c_long;

        let mqd = unsafe {
            libc::mq_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
                &mut attr as *mut libc::mq_attr,
            )
        };
        if mqd == -1 as libc::mqd_t {
            return Err(SqwError::last_os("mq_open"));
        }
        Ok(Self { mqd, name, msg_size })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    /// Send one record. `T` must be plain data without padding.
    pub fn send<T: Copy>(&self, msg: &T) -> Result<()> {
        let len = std::mem::size_of::<T>();
        if len > self.msg_size {
            return Err(SqwError::Ipc(format!("message of {} bytes exceeds {}", len, self.msg_size)));
        }
        loop {
            let rc = unsafe { libc::mq_send(self.mqd, (msg as *const T).cast::<c_char>(), len, 0) };
            if rc == 0 {
                return Ok(());
            }
            if std::io::Error::last_os_error().kind() != std::io::ErrorKind::Interrupted {
                return Err(SqwError::last_os("mq_send"));
            }
        }
    }

    /// Block until a record arrives. `T` must be plain data valid for any
    /// bit pattern.
    pub fn receive<T: Copy>(&self) -> Result<T> {
        let mut buf = vec![0u8; self.msg_size];
        let got = loop {
            let n = unsafe {
                libc::mq_receive(self.mqd, buf.as_mut_ptr().cast::<c_char>(), buf.len(), std::ptr::null_mut())
            };
            if n >= 0 {
                break n as usize;
            }
            if std::io::Error::last_os_error().kind() != std::io::ErrorKind::Interrupted {
                return Err(SqwError::last_os("mq_receive"));
            }
        };
        if got != std::mem::size_of::<T>() {
            return Err(SqwError::Ipc(format!(
                "message size mismatch: got {}, expected {}",
                got,
                std::mem::size_of::<T>()
            )));
        }
        Ok(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<T>()) })
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        unsafe {
            libc::mq_close(self.mqd);
            libc::mq_unlink(self.name.as_ptr());
        }
    }
}

/// A shared, fixed-size byte region.
pub struct SharedMemory {
    ptr: *mut u8,
    len: usize,
    name: CString,
}

// Access is serialised by the owner; the region itself is plain bytes.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let name = c_name(name)?;
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
            )
        };
        if fd < 0 {
            return Err(SqwError::last_os("shm_open"));
        }

        let mapped = unsafe {
            if libc::ftruncate(fd, len as libc::off_t) != 0 {
                Err(SqwError::last_os("ftruncate"))
            } else {
                let p = libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    fd,
                    0,
                );
                if p == libc::MAP_FAILED {
                    Err(SqwError::last_os("mmap"))
                } else {
                    Ok(p.cast::<u8>())
                }
            }
        };
        unsafe { libc::close(fd) };

        match mapped {
            Ok(ptr) => Ok(Self { ptr, len, name }),
            Err(e) => {
                unsafe { libc::shm_unlink(name.as_ptr()) };
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `s` into the region, truncated to its size. Returns the number
    /// of bytes written.
    pub fn write_str(&self, s: &str) -> usize {
        let n = s.len().min(self.len);
        unsafe { std::ptr::copy_nonoverlapping(s.as_ptr(), self.ptr, n) };
        n
    }

    /// The first `len` bytes as text.
    pub fn read_str(&self, len: usize) -> String {
        let n = len.min(self.len);
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, n) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
            libc::shm_unlink(self.name.as_ptr());
        }
    }
}
