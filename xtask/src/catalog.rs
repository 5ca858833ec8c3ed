//! Host-side conformance catalog.
//!
//! One row per program in `userspace/tests`. Each row is the conformance
//! statement for that program: the syscalls it drives, what must hold
//! before it runs, what it asserts, and the error codes it expects to see.
//! Kept in sync with the `[[bin]]` list by the tests at the bottom.

use serde::Serialize;

use libkconform::harness::{marker, Outcome};

/// Area of the kernel a program exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Memory,
    Signal,
    Process,
    Thread,
    Ipc,
    Network,
    Security,
    Device,
    Filesystem,
    Logging,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Memory => "memory",
            Category::Signal => "signal",
            Category::Process => "process",
            Category::Thread => "thread",
            Category::Ipc => "ipc",
            Category::Network => "network",
            Category::Security => "security",
            Category::Device => "device",
            Category::Filesystem => "filesystem",
            Category::Logging => "logging",
        }
    }
}

/// Architectures a program can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchReq {
    Any,
    X86_64,
}

/// A catalog entry.
#[derive(Debug, Serialize)]
pub struct ProgramDef {
    pub name: &'static str,
    pub category: Category,
    pub syscalls: &'static [&'static str],
    pub preconditions: &'static [&'static str],
    pub postconditions: &'static [&'static str],
    /// Symbolic errno names, e.g. `"EINVAL"`.
    pub errnos: &'static [&'static str],
    pub arch: ArchReq,
    /// Some cases skip without root; the program still runs.
    pub needs_root: bool,
}

/// The three marker lines a program may end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub passed: String,
    pub failed: String,
    pub skipped: String,
}

impl Markers {
    pub fn for_program(name: &str) -> Markers {
        Markers {
            passed: marker(name, Outcome::Passed),
            failed: marker(name, Outcome::Failed),
            skipped: marker(name, Outcome::Skipped),
        }
    }

    /// True if any of the three markers appears in `output`.
    pub fn any_in(&self, output: &str) -> bool {
        output.contains(&self.passed) || output.contains(&self.failed) || output.contains(&self.skipped)
    }
}

impl ProgramDef {
    pub fn markers(&self) -> Markers {
        Markers::for_program(self.name)
    }
}

/// Complete catalog, in `[[bin]]` order.
pub static CATALOG: &[ProgramDef] = &[
    // Memory
    ProgramDef {
        name: "mmap_test",
        category: Category::Memory,
        syscalls: &["mmap", "munmap", "mprotect", "mremap", "fork"],
        preconditions: &["anonymous mmap available"],
        postconditions: &[
            "private anonymous mapping is copy-on-write across fork",
            "shared anonymous mapping is visible to the parent after a child write",
            "fresh anonymous memory reads zero",
            "access after munmap or under PROT_NONE kills the accessing child with SIGSEGV",
            "mremap growth preserves contents and zero-fills the tail",
            "MAP_FIXED replaces, MAP_FIXED_NOREPLACE refuses",
        ],
        errnos: &["EINVAL", "EBADF", "EEXIST"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "sysv_shm_test",
        category: Category::Memory,
        syscalls: &["shmget", "shmat", "shmdt", "shmctl", "mprotect", "munmap", "mremap"],
        preconditions: &["System V shared memory available"],
        postconditions: &[
            "shm_nattch tracks attach, detach, fork and partial munmap",
            "forked children share writes through the segment",
            "IPC_RMID hides the key but keeps existing attachments alive",
            "the last detach of a removed segment destroys it",
            "SHM_RDONLY attachments fault on write and cannot be upgraded",
        ],
        errnos: &["EINVAL", "ENOENT", "EEXIST", "EACCES", "EIDRM"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    // Signals, processes and threads
    ProgramDef {
        name: "signal_test",
        category: Category::Signal,
        syscalls: &["rt_sigprocmask", "rt_sigaction", "rt_sigpending", "kill", "sigaltstack"],
        preconditions: &[],
        postconditions: &[
            "mask transitions BLOCK/SETMASK/UNBLOCK report the old set",
            "SIGKILL and SIGSTOP can never be blocked",
            "SA_NODEFER allows handler recursion",
            "a blocked signal stays pending until unblocked",
            "SIGSEGV and SIGFPE handlers run for hardware faults",
            "SIGCHLD arrives when a child exits",
            "a handler on the alternate stack sees SS_ONSTACK",
        ],
        errnos: &["EINVAL", "ENOMEM"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "pthread_test",
        category: Category::Thread,
        syscalls: &["clone", "futex", "gettid", "set_robust_list"],
        preconditions: &[],
        postconditions: &[
            "3 threads x 1000 locked increments yield 3000",
            "thread ids are distinct and differ from the pid except for the main thread",
            "a robust mutex whose owner died reports EOWNERDEAD until made consistent",
            "an inconsistent robust mutex unlocked without repair is ENOTRECOVERABLE",
            "a condvar broadcast wakes every waiter",
            "FUTEX_WAIT checks the word and honours its timeout",
        ],
        errnos: &["EOWNERDEAD", "ENOTRECOVERABLE", "EAGAIN", "ETIMEDOUT", "EINVAL"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "clone3_test",
        category: Category::Process,
        syscalls: &["clone3", "waitpid", "poll"],
        preconditions: &["clone3 implemented"],
        postconditions: &[
            "fork-like clone3 returns the child pid and the exit code is observed",
            "the exit signal is delivered to the parent",
            "CLONE_PIDFD returns a pidfd that polls readable on exit",
        ],
        errnos: &["EINVAL", "E2BIG"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "ptrace_test",
        category: Category::Process,
        syscalls: &["ptrace", "waitpid", "kill"],
        preconditions: &["ptrace implemented"],
        postconditions: &[
            "a PTRACE_TRACEME child stops on SIGSTOP",
            "PEEKDATA reads and POKEDATA writes the tracee's memory only",
            "PTRACE_CONT resumes the tracee, which observes the poked value",
            "attach, a second attach, and detach behave",
        ],
        errnos: &["ESRCH", "EIO", "EPERM"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "execve_test",
        category: Category::Process,
        syscalls: &["execve", "ptrace"],
        preconditions: &["writable scratch directory"],
        postconditions: &[
            "a hand-built minimal ET_EXEC or ET_DYN image runs and dies by SIGILL",
            "a corrupted ELF header is rejected before the point of no return",
            "PT_INTERP errors come back from execve",
            "segment layout errors after the point of no return are fatal",
        ],
        errnos: &["ENOEXEC", "ENOENT", "EIO", "EINVAL", "EACCES", "ELIBBAD", "EOVERFLOW", "ENOMEM", "EPERM", "EFAULT"],
        arch: ArchReq::X86_64,
        needs_root: false,
    },
    // Security
    ProgramDef {
        name: "capability_test",
        category: Category::Security,
        syscalls: &["capget", "capset", "prctl"],
        preconditions: &[],
        postconditions: &[
            "capget with the v3 header succeeds",
            "an unknown version fails and reports the preferred one",
            "capabilities cannot be raised beyond the permitted set",
            "PR_CAPBSET_READ answers 0 or 1 up to cap_last_cap",
        ],
        errnos: &["EINVAL", "ESRCH", "EPERM"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "ipc_ns_sem_test",
        category: Category::Security,
        syscalls: &["semget", "semctl", "semop", "unshare", "clone"],
        preconditions: &["System V semaphores available"],
        postconditions: &[
            "a semaphore set is shared within one IPC namespace",
            "a new IPC namespace starts empty and is isolated both ways",
            "sets created in a namespace vanish with it",
        ],
        errnos: &["ENOENT", "EEXIST", "EINVAL", "ERANGE", "EAGAIN"],
        arch: ArchReq::Any,
        needs_root: true,
    },
    ProgramDef {
        name: "proc_nsfs_test",
        category: Category::Security,
        syscalls: &["open", "readlink", "ioctl", "setns", "clone3", "mount"],
        preconditions: &["/proc/self/ns present"],
        postconditions: &[
            "nsfs files open read-only and refuse read, write and seek",
            "readlink reports type:[inode]",
            "NS_GET_* ioctls report type, owner and parent",
            "a namespace outlives its last process while a handle is open",
        ],
        errnos: &["EPERM", "EINVAL", "EBADF", "ESPIPE", "ENOENT", "EFAULT"],
        arch: ArchReq::Any,
        needs_root: true,
    },
    // Network
    ProgramDef {
        name: "tcp_err_test",
        category: Category::Network,
        syscalls: &["socket", "bind", "listen", "connect", "accept", "getsockname", "getpeername", "send", "recv"],
        preconditions: &["AF_INET SOCK_STREAM available", "loopback up"],
        postconditions: &[
            "getsockname and getpeername follow the socket state",
            "connect, listen and accept reject calls in the wrong state",
            "a non-blocking connect is in progress until accepted",
        ],
        errnos: &[
            "ENOTCONN",
            "EPIPE",
            "EINVAL",
            "EISCONN",
            "EADDRINUSE",
            "EINPROGRESS",
            "EALREADY",
            "EAGAIN",
            "ECONNREFUSED",
        ],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "udp_err_test",
        category: Category::Network,
        syscalls: &["socket", "bind", "connect", "sendto", "recvfrom", "getsockname", "getpeername"],
        preconditions: &["AF_INET SOCK_DGRAM available", "loopback up"],
        postconditions: &[
            "an unconnected send needs a destination",
            "sendto and recvfrom round-trip with the source address",
            "SO_REUSEADDR does not allow a double bind",
        ],
        errnos: &["EDESTADDRREQ", "EAGAIN", "EINVAL", "EADDRINUSE", "ENOTCONN", "EAFNOSUPPORT"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "unix_socket_test",
        category: Category::Network,
        syscalls: &["socket", "socketpair", "bind", "listen", "connect", "accept", "sendto", "recvfrom"],
        preconditions: &["AF_UNIX available", "writable scratch directory"],
        postconditions: &[
            "address lengths are validated",
            "abstract and pathname addresses bind and connect",
            "socketpair and datagram sockets exchange data",
            "datagram sockets reject listen and accept and truncate short reads",
            "a datagram sender sees EPIPE, then ECONNREFUSED, then ENOTCONN as its peer goes away",
        ],
        errnos: &[
            "EINVAL",
            "ECONNREFUSED",
            "ENOENT",
            "EADDRINUSE",
            "EISCONN",
            "ENOTCONN",
            "EACCES",
            "EOPNOTSUPP",
            "EAGAIN",
            "EPIPE",
        ],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "raw_err_test",
        category: Category::Network,
        syscalls: &["socket", "bind", "connect", "setsockopt", "sendto", "recvfrom", "sendmsg", "recvmsg", "poll"],
        preconditions: &["CAP_NET_RAW", "loopback up"],
        postconditions: &[
            "getsockname and getpeername follow the socket state",
            "listen and accept are not supported on raw sockets",
            "received datagrams carry the IP header, with or without IP_HDRINCL",
        ],
        errnos: &["ENOTCONN", "EDESTADDRREQ", "EAGAIN", "EINVAL", "EOPNOTSUPP"],
        arch: ArchReq::Any,
        needs_root: true,
    },
    ProgramDef {
        name: "netlink_route_test",
        category: Category::Network,
        syscalls: &["socket", "bind", "sendto", "recvfrom", "getsockname"],
        preconditions: &["AF_NETLINK NETLINK_ROUTE available"],
        postconditions: &[
            "if_nameindex lists lo",
            "an RTM_GETLINK dump lists the loopback interface with IFF_LOOPBACK",
            "an RTM_GETADDR dump lists 127.0.0.1",
            "invalid requests are answered with an error ack",
        ],
        errnos: &["EAGAIN", "EINVAL", "EOPNOTSUPP"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    // Files, devices, logging
    ProgramDef {
        name: "pipe_test",
        category: Category::Filesystem,
        syscalls: &["pipe2", "read", "write", "close", "fcntl", "dup"],
        preconditions: &[],
        postconditions: &[
            "data round-trips through the pipe",
            "a full or empty non-blocking pipe reports EAGAIN",
            "writing with no readers fails with EPIPE or raises SIGPIPE",
            "EOF once the last writer closes",
            "O_CLOEXEC is reported by F_GETFD",
        ],
        errnos: &["EAGAIN", "EPIPE", "EINVAL", "EFAULT", "EBADF", "ESPIPE"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "inotify_test",
        category: Category::Filesystem,
        syscalls: &["inotify_init1", "inotify_add_watch", "inotify_rm_watch", "read"],
        preconditions: &["inotify available", "writable scratch directory"],
        postconditions: &[
            "IN_CREATE, IN_MODIFY and IN_DELETE carry the entry name",
            "removing a watch queues IN_IGNORED",
            "re-adding a path returns the same watch descriptor",
        ],
        errnos: &["EAGAIN", "EINVAL", "ENOENT", "EBADF"],
        arch: ArchReq::Any,
        needs_root: false,
    },
    ProgramDef {
        name: "syslog_test",
        category: Category::Logging,
        syscalls: &["syslog"],
        preconditions: &["CAP_SYSLOG for the privileged cases"],
        postconditions: &[
            "zero-length reads return 0",
            "CLEAR empties the ring without touching the unread count",
            "READ_ALL and READ_CLEAR do not consume unread data",
            "unprivileged callers are refused",
        ],
        errnos: &["EINVAL", "EPERM"],
        arch: ArchReq::Any,
        needs_root: true,
    },
    ProgramDef {
        name: "framebuffer_test",
        category: Category::Device,
        syscalls: &["open", "ioctl", "mmap", "pread"],
        preconditions: &["/dev/fb0 present"],
        postconditions: &[
            "FBIOGET_VSCREENINFO and FBIOGET_FSCREENINFO report sane geometry",
            "line_length >= xres * bpp / 8",
            "a pixel written through the mapping reads back",
        ],
        errnos: &["EINVAL", "ENOTTY", "EFAULT"],
        arch: ArchReq::Any,
        needs_root: true,
    },
];

/// Look up a program by name.
pub fn find(name: &str) -> Option<&'static ProgramDef> {
    CATALOG.iter().find(|def| def.name == name)
}

pub fn by_category(category: Category) -> Vec<&'static ProgramDef> {
    CATALOG.iter().filter(|def| def.category == category).collect()
}

/// Programs whose name contains any of `patterns`, like a `cargo test`
/// filter. No patterns selects everything.
pub fn filter(patterns: &[String]) -> Vec<&'static ProgramDef> {
    CATALOG
        .iter()
        .filter(|def| patterns.is_empty() || patterns.iter().any(|p| def.name.contains(p.as_str())))
        .collect()
}

/// Catalog rendering for `xtask catalog`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CatalogFormat {
    Table,
    Markdown,
    Json,
}

pub fn render(format: CatalogFormat) -> anyhow::Result<String> {
    Ok(match format {
        CatalogFormat::Table => render_table(),
        CatalogFormat::Markdown => render_markdown(),
        CatalogFormat::Json => serde_json::to_string_pretty(CATALOG)?,
    })
}

fn render_table() -> String {
    let mut out = format!("{:<20} {:<11} {:<6} {}\n", "PROGRAM", "CATEGORY", "ARCH", "SYSCALLS");
    for def in CATALOG {
        let arch = match def.arch {
            ArchReq::Any => "any",
            ArchReq::X86_64 => "x86_64",
        };
        out.push_str(&format!(
            "{:<20} {:<11} {:<6} {}\n",
            def.name,
            def.category.label(),
            arch,
            def.syscalls.join(", ")
        ));
    }
    out
}

fn render_markdown() -> String {
    let mut out = String::from(
        "| Program | Syscalls | Preconditions | Postconditions | Expected errnos |\n|---|---|---|---|---|\n",
    );
    for def in CATALOG {
        let pre = if def.preconditions.is_empty() {
            "-".to_string()
        } else {
            def.preconditions.join("; ")
        };
        out.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            def.name,
            def.syscalls.join(", "),
            pre,
            def.postconditions.join("; "),
            def.errnos.join(", ")
        ));
    }
    out
}
