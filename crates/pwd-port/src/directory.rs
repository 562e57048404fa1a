//! Account directory access.
//!
//! [`SystemDirectory`] goes through the C library, so every NSS source the
//! host is configured for (files, NIS, LDAP...) is visible. Lookups use the
//! re-entrant `getpw*_r` calls; enumeration uses `setpwent`/`getpwent`/
//! `endpwent`, whose cursor is process-global.

use std::ffi::{CStr, c_char, c_int};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{fmt, mem, ptr};

use pwd_protocol::AccountRecord;
use tracing::{debug, warn};

/// Source of passwd entries.
pub trait AccountDirectory {
    /// One-pass iterator over every entry.
    type Entries<'a>: Iterator<Item = AccountRecord>
    where
        Self: 'a;

    fn lookup_by_uid(&self, uid: u32) -> Option<AccountRecord>;

    fn lookup_by_name(&self, name: &CStr) -> Option<AccountRecord>;

    /// Start a fresh enumeration. Dropping the iterator ends it.
    fn enumerate_all(&self) -> Self::Entries<'_>;
}

/// Initial scratch size when `sysconf` has no answer.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Scratch buffers never grow past this.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Held for the lifetime of every enumeration in this process.
static ENUMERATION: Mutex<()> = Mutex::new(());

/// The C library's passwd database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDirectory;

impl SystemDirectory {
    pub fn new() -> Self {
        Self
    }
}

impl AccountDirectory for SystemDirectory {
    type Entries<'a> = PasswdEntries;

    fn lookup_by_uid(&self, uid: u32) -> Option<AccountRecord> {
        lookup(format_args!("uid {uid}"), |pwd, buf, result| {
            // SAFETY: every pointer refers to live, correctly sized storage.
            unsafe { libc::getpwuid_r(uid, pwd, buf.as_mut_ptr(), buf.len(), result) }
        })
    }

    fn lookup_by_name(&self, name: &CStr) -> Option<AccountRecord> {
        lookup(
            format_args!("name {}", name.to_string_lossy()),
            |pwd, buf, result| {
                // SAFETY: `name` is NUL-terminated and the rest as above.
                unsafe {
                    libc::getpwnam_r(name.as_ptr(), pwd, buf.as_mut_ptr(), buf.len(), result)
                }
            },
        )
    }

    fn enumerate_all(&self) -> PasswdEntries {
        PasswdEntries::open()
    }
}

/// Run a `getpw*_r` call, growing the scratch buffer on `ERANGE`.
///
/// Anything other than a hit is reported as not found.
fn lookup<F>(what: fmt::Arguments<'_>, mut call: F) -> Option<AccountRecord>
where
    F: FnMut(&mut libc::passwd, &mut [c_char], &mut *mut libc::passwd) -> c_int,
{
    let mut size = initial_buffer_size();
    loop {
        let mut buf: Vec<c_char> = Vec::new();
        if buf.try_reserve_exact(size).is_err() {
            warn!("couldn't allocate {size} byte lookup buffer for {what}");
            return None;
        }
        buf.resize(size, 0);

        // SAFETY: `passwd` is plain old data; all-zero is a valid value.
        let mut pwd: libc::passwd = unsafe { mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();

        match call(&mut pwd, &mut buf, &mut result) {
            0 if result.is_null() => return None,
            // SAFETY: on success `pwd` points into `buf`, which is still alive.
            0 => return Some(unsafe { record_from_passwd(&pwd) }),
            libc::ERANGE if size < MAX_BUFFER_SIZE => {
                size = (size * 2).min(MAX_BUFFER_SIZE);
                debug!("growing lookup buffer to {size} bytes for {what}");
            }
            libc::ENOENT | libc::ESRCH | libc::EBADF | libc::EPERM => {
                debug!("lookup of {what} reported not found");
                return None;
            }
            errno => {
                warn!(
                    "lookup of {what} failed: {}",
                    std::io::Error::from_raw_os_error(errno)
                );
                return None;
            }
        }
    }
}

fn initial_buffer_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let hint = unsafe { libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX) };
    usize::try_from(hint)
        .ok()
        .filter(|&size| size > 0)
        .unwrap_or(DEFAULT_BUFFER_SIZE)
        .min(MAX_BUFFER_SIZE)
}

/// Copy an entry out of C library storage.
///
/// # Safety
///
/// The string pointers in `pwd` must be null or valid C strings.
unsafe fn record_from_passwd(pwd: &libc::passwd) -> AccountRecord {
    // SAFETY: forwarded from the caller.
    unsafe {
        AccountRecord {
            name: c_bytes(pwd.pw_name),
            passwd: c_bytes(pwd.pw_passwd),
            uid: pwd.pw_uid,
            gid: pwd.pw_gid,
        }
    }
}

unsafe fn c_bytes(ptr: *const c_char) -> Vec<u8> {
    if ptr.is_null() {
        return Vec::new();
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(ptr) }.to_bytes().to_vec()
}

/// Open enumeration cursor over the system passwd database.
///
/// Opening takes a process-wide lock, so a second enumeration in the same
/// process waits until the first iterator is dropped. Never open two on the
/// same thread.
pub struct PasswdEntries {
    _lock: MutexGuard<'static, ()>,
    exhausted: bool,
}

impl PasswdEntries {
    fn open() -> Self {
        let lock = ENUMERATION.lock().unwrap_or_else(PoisonError::into_inner);
        // SAFETY: the cursor is only touched while the lock is held.
        unsafe { libc::setpwent() };
        Self {
            _lock: lock,
            exhausted: false,
        }
    }
}

impl Iterator for PasswdEntries {
    type Item = AccountRecord;

    fn next(&mut self) -> Option<AccountRecord> {
        if self.exhausted {
            return None;
        }

        // SAFETY: the lock is held; the returned entry stays valid until the
        // next getpwent call, and it is copied before that.
        let entry = unsafe { libc::getpwent() };
        if entry.is_null() {
            self.exhausted = true;
            return None;
        }
        // SAFETY: non-null entries from getpwent are fully initialised.
        Some(unsafe { record_from_passwd(&*entry) })
    }
}

impl Drop for PasswdEntries {
    fn drop(&mut self) {
        // SAFETY: pairs with the setpwent in `open`, still under the lock.
        unsafe { libc::endpwent() };
    }
}

impl fmt::Debug for PasswdEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswdEntries")
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
