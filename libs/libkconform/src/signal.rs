//! sigaction and sigset helpers.

use std::mem;

use crate::errno::Errno;
use crate::error::Error;

/// Handler taking only the signal number.
pub type Handler = extern "C" fn(libc::c_int);

/// `SA_SIGINFO` handler.
pub type InfoHandler = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

/// Builder over `struct sigaction`.
#[derive(Clone, Copy)]
pub struct SigAction {
    raw: libc::sigaction,
}

impl SigAction {
    fn with_handler(handler: libc::sighandler_t, flags: libc::c_int) -> SigAction {
        let mut raw: libc::sigaction = unsafe { mem::zeroed() };
        raw.sa_sigaction = handler;
        raw.sa_flags = flags;
        unsafe { libc::sigemptyset(&mut raw.sa_mask) };
        SigAction { raw }
    }

    pub fn handler(f: Handler) -> SigAction {
        SigAction::with_handler(f as libc::sighandler_t, 0)
    }

    pub fn siginfo_handler(f: InfoHandler) -> SigAction {
        SigAction::with_handler(f as libc::sighandler_t, libc::SA_SIGINFO)
    }

    pub fn ignore() -> SigAction {
        SigAction::with_handler(libc::SIG_IGN, 0)
    }

    pub fn default() -> SigAction {
        SigAction::with_handler(libc::SIG_DFL, 0)
    }

    /// Add `SA_*` flags.
    pub fn flags(mut self, flags: libc::c_int) -> SigAction {
        self.raw.sa_flags |= flags;
        self
    }

    /// Block `mask` while the handler runs.
    pub fn mask(mut self, mask: SigSet) -> SigAction {
        self.raw.sa_mask = mask.raw;
        self
    }

    pub fn handler_address(&self) -> libc::sighandler_t {
        self.raw.sa_sigaction
    }

    pub fn sa_flags(&self) -> libc::c_int {
        self.raw.sa_flags
    }

    /// Install for `sig`, returning the previous action.
    pub fn install(&self, sig: libc::c_int) -> Result<SigAction, Error> {
        let mut old: libc::sigaction = unsafe { mem::zeroed() };
        let ret = unsafe { libc::sigaction(sig, &self.raw, &mut old) };
        if ret < 0 {
            return Err(Error::Os {
                call: format!("sigaction({})", sig),
                errno: Errno::last(),
            });
        }
        Ok(SigAction { raw: old })
    }

    /// Current action for `sig`.
    pub fn query(sig: libc::c_int) -> Result<SigAction, Error> {
        let mut old: libc::sigaction = unsafe { mem::zeroed() };
        let ret = unsafe { libc::sigaction(sig, std::ptr::null(), &mut old) };
        Error::from_ret("sigaction(query)", ret as i64)?;
        Ok(SigAction { raw: old })
    }

    pub fn restore(sig: libc::c_int, old: SigAction) -> Result<(), Error> {
        old.install(sig).map(|_| ())
    }

    pub fn as_raw(&self) -> &libc::sigaction {
        &self.raw
    }
}

impl std::fmt::Debug for SigAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handler = match self.raw.sa_sigaction {
            libc::SIG_DFL => "SIG_DFL".to_string(),
            libc::SIG_IGN => "SIG_IGN".to_string(),
            addr => format!("{:#x}", addr),
        };
        f.debug_struct("SigAction")
            .field("handler", &format_args!("{}", handler))
            .field("flags", &format_args!("{:#x}", self.raw.sa_flags))
            .field("mask", &SigSet { raw: self.raw.sa_mask })
            .finish()
    }
}

/// Value type around `sigset_t`.
#[derive(Clone, Copy)]
pub struct SigSet {
    raw: libc::sigset_t,
}

impl SigSet {
    pub fn empty() -> SigSet {
        let mut raw: libc::sigset_t = unsafe { mem::zeroed() };
        unsafe { libc::sigemptyset(&mut raw) };
        SigSet { raw }
    }

    pub fn with(mut self, sig: libc::c_int) -> SigSet {
        unsafe { libc::sigaddset(&mut self.raw, sig) };
        self
    }

    pub fn contains(&self, sig: libc::c_int) -> bool {
        unsafe { libc::sigismember(&self.raw, sig) == 1 }
    }

    pub fn as_ptr(&self) -> *const libc::sigset_t {
        &self.raw
    }

    pub fn as_mut_ptr(&mut self) -> *mut libc::sigset_t {
        &mut self.raw
    }

    /// Signals among `1..=64` that are members, in order.
    pub fn members(&self) -> Vec<libc::c_int> {
        (1..=64).filter(|&s| self.contains(s)).collect()
    }

    /// Apply `how` (`SIG_BLOCK`, ...) to the thread mask; returns the old mask.
    pub fn proc_mask(how: libc::c_int, set: Option<&SigSet>) -> Result<SigSet, Error> {
        let mut old = SigSet::empty();
        let new = set.map_or(std::ptr::null(), |s| s.as_ptr());
        let ret = unsafe { libc::pthread_sigmask(how, new, old.as_mut_ptr()) };
        if ret != 0 {
            return Err(Error::Os {
                call: "pthread_sigmask".to_string(),
                errno: Errno(ret),
            });
        }
        Ok(old)
    }

    /// Current thread mask.
    pub fn current() -> Result<SigSet, Error> {
        SigSet::proc_mask(libc::SIG_BLOCK, None)
    }
}

impl PartialEq for SigSet {
    fn eq(&self, other: &SigSet) -> bool {
        self.members() == other.members()
    }
}

impl std::fmt::Debug for SigSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.members()).finish()
    }
}
