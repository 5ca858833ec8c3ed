//! System V shared memory
//!
//! Attach accounting (shm_nattch) across shmat, shmdt, fork and partial
//! munmap; IPC_RMID semantics for live mappings and keys; SHM_RDONLY and
//! mprotect enforcement; shmat/shmdt address validation.

use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use libc::{c_int, c_void};
use libkconform::harness::{Case, Suite};
use libkconform::mem::{self, Access};
use libkconform::process::{fork_child, run_in_child, wait_for, WaitStatus};
use libkconform::{check, test_errno, test_res, test_succ, Errno};

const SEGMENT_PAGES: usize = 4;
const FAILED_ATTACH: *mut c_void = !0usize as *mut c_void;
/// `shm_perm.mode` bit for a segment removed while still attached.
const SHM_DEST: c_int = 0o1000;

static SALT: AtomicU32 = AtomicU32::new(0);

fn next_key() -> libc::key_t {
    let pid = unsafe { libc::getpid() } as u32;
    (0x2468_0000 ^ pid ^ SALT.fetch_add(1, Ordering::Relaxed)) as libc::key_t
}

fn page() -> usize {
    mem::page_size()
}

fn segment_size() -> usize {
    page() * SEGMENT_PAGES
}

/// A segment id, removed on drop if the test did not remove it itself.
struct Segment {
    id: c_int,
}

impl Segment {
    fn create(t: &mut Case, key: libc::key_t, size: usize) -> Option<Segment> {
        let id = unsafe {
            test_succ!(t, libc::shmget(key, size, libc::IPC_CREAT | libc::IPC_EXCL | 0o600))
        };
        (id >= 0).then(|| Segment { id: id as c_int })
    }

    fn private(t: &mut Case, size: usize) -> Option<Segment> {
        Segment::create(t, libc::IPC_PRIVATE, size)
    }

    fn attach(&self, t: &mut Case, addr: *const c_void, flags: c_int) -> Option<*mut u8> {
        let id = self.id;
        let p = unsafe { libc::shmat(id, addr, flags) };
        if p == FAILED_ATTACH {
            let errno = Errno::last();
            t.fail(&format!("shmat({}, {:p}, {:#x})", id, addr, flags), errno);
            return None;
        }
        t.pass(&format!("shmat({}) -> {:p}", id, p));
        Some(p.cast())
    }

    fn stat(&self) -> Option<libc::shmid_ds> {
        let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::shmctl(self.id, libc::IPC_STAT, &mut ds) };
        (ret == 0).then_some(ds)
    }

    fn nattch(&self) -> Option<u64> {
        self.stat().map(|ds| ds.shm_nattch as u64)
    }

    fn expect_nattch(&self, t: &mut Case, label: &str, expected: u64) {
        let got = self.nattch();
        log::debug!("{}: nattch {:?}", label, got);
        if got == Some(expected) {
            t.pass(&format!("{}: shm_nattch == {}", label, expected));
        } else {
            t.fail(label, format_args!("shm_nattch {:?}, expected {}", got, expected));
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe { libc::shmctl(self.id, libc::IPC_RMID, ptr::null_mut()) };
    }
}

fn anon_map(len: usize, prot: c_int) -> *mut u8 {
    let p = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            prot,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if p == libc::MAP_FAILED {
        ptr::null_mut()
    } else {
        p.cast()
    }
}

fn expect_fault(t: &mut Case, what: &str, addr: *mut u8, access: Access) {
    match mem::probe(addr, access) {
        Ok(status) => t.expect(&format!("{} faults ({:?})", what, status), mem::is_fault(status)),
        Err(e) => {
            t.fail(what, e);
            false
        }
    };
}

fn expect_no_fault(t: &mut Case, what: &str, addr: *mut u8, access: Access) {
    match mem::probe(addr, access) {
        Ok(status) => t.expect(
            &format!("{} does not fault ({:?})", what, status),
            status == WaitStatus::Exited(mem::EXIT_NO_FAULT),
        ),
        Err(e) => {
            t.fail(what, e);
            false
        }
    };
}

fn main() {
    let mut suite = Suite::new("sysv_shm_test");

    suite.setup("sysv_shm_available", || {
        let id = check!(unsafe { libc::shmget(libc::IPC_PRIVATE, page(), libc::IPC_CREAT | 0o600) })?;
        check!(unsafe { libc::shmctl(id as c_int, libc::IPC_RMID, ptr::null_mut()) })
    });

    suite.test("shmget_errors", |t| {
        let key = next_key();
        unsafe {
            test_errno!(t, libc::shmget(libc::IPC_PRIVATE, 0, libc::IPC_CREAT | 0o600), Errno::EINVAL);
            test_errno!(t, libc::shmget(key, page(), 0o600), Errno::ENOENT);
        }
        let Some(seg) = Segment::create(t, key, page()) else {
            return;
        };
        unsafe {
            test_errno!(
                t,
                libc::shmget(key, page(), libc::IPC_CREAT | libc::IPC_EXCL | 0o600),
                Errno::EEXIST
            );
            test_res!(t, libc::shmget(key, page(), 0o600), |ret| ret == seg.id as i64);
            test_res!(t, libc::shmget(key, 0, 0o600), |ret| ret == seg.id as i64);
            test_errno!(t, libc::shmctl(-1, libc::IPC_RMID, ptr::null_mut()), Errno::EINVAL);
        }
    });

    suite.test("shmget_size_increase_einval", |t| {
        let key = next_key();
        let Some(seg) = Segment::create(t, key, page()) else {
            return;
        };
        let size = seg.stat().map(|ds| ds.shm_segsz);
        t.expect("IPC_STAT reports the requested size", size == Some(page()));
        unsafe {
            test_errno!(t, libc::shmget(key, page() * 2, libc::IPC_CREAT | 0o600), Errno::EINVAL);
        }
    });

    suite.test("ipc_rmid_existing_mapping", |t| {
        let key = next_key();
        let Some(seg) = Segment::create(t, key, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        unsafe {
            *addr = 0x5a;
            test_succ!(t, libc::shmctl(seg.id, libc::IPC_RMID, ptr::null_mut()));
            *addr.add(1) = 0xa5;
            t.expect(
                "mapping stays usable after IPC_RMID",
                *addr == 0x5a && *addr.add(1) == 0xa5,
            );
            test_errno!(t, libc::shmget(key, 0, 0o600), Errno::ENOENT);
            let ds = seg.stat();
            t.expect(
                "IPC_STAT shows SHM_DEST while still attached",
                ds.map_or(false, |ds| ds.shm_perm.mode as c_int & SHM_DEST != 0),
            );
            test_succ!(t, libc::shmdt(addr.cast()));
            let mut ds: libc::shmid_ds = std::mem::zeroed();
            test_errno!(t, libc::shmctl(seg.id, libc::IPC_STAT, &mut ds), Errno::EINVAL);
        }
    });

    suite.test("fork_shared_writes", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        let word = addr.cast::<u32>();
        unsafe { ptr::write_volatile(word, 0) };
        let shared = word as usize;
        let status = run_in_child(move || {
            unsafe { ptr::write_volatile(shared as *mut u32, 0x1234_5678) };
            0
        });
        t.expect("child exited", matches!(status, Ok(WaitStatus::Exited(0))));
        t.expect(
            "parent sees the child's write",
            unsafe { ptr::read_volatile(word) } == 0x1234_5678,
        );
        unsafe {
            test_succ!(t, libc::shmdt(addr.cast()));
        }
    });

    suite.test("fork_refcnt_multi_attach", |t| {
        let Some(seg) = Segment::private(t, page()) else {
            return;
        };
        let mut addrs = Vec::new();
        for _ in 0..3 {
            match seg.attach(t, ptr::null(), 0) {
                Some(p) => addrs.push(p),
                None => return,
            }
        }
        t.expect(
            "attachments have distinct addresses",
            addrs[0] != addrs[1] && addrs[0] != addrs[2] && addrs[1] != addrs[2],
        );
        seg.expect_nattch(t, "before fork", 3);

        let mut to_parent = [0; 2];
        let mut to_child = [0; 2];
        unsafe {
            if test_succ!(t, libc::pipe(to_parent.as_mut_ptr())) < 0
                || test_succ!(t, libc::pipe(to_child.as_mut_ptr())) < 0
            {
                return;
            }
        }
        let id = seg.id;
        let raw: Vec<usize> = addrs.iter().map(|&p| p as usize).collect();
        let child = fork_child(move || {
            let nattch = |id: c_int| {
                let mut ds: libc::shmid_ds = unsafe { std::mem::zeroed() };
                if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) } < 0 {
                    return u8::MAX;
                }
                ds.shm_nattch as u8
            };
            unsafe {
                let after_fork = nattch(id);
                libc::write(to_parent[1], (&after_fork as *const u8).cast(), 1);
                let mut go = 0u8;
                libc::read(to_child[0], (&mut go as *mut u8).cast(), 1);
                for &p in &raw {
                    if libc::shmdt(p as *const c_void) < 0 {
                        return 1;
                    }
                }
                let after_detach = nattch(id);
                libc::write(to_parent[1], (&after_detach as *const u8).cast(), 1);
            }
            0
        });
        let pid = match child {
            Ok(pid) => pid,
            Err(e) => return t.fail("fork", e),
        };
        let mut reported = [0u8; 2];
        unsafe {
            libc::read(to_parent[0], reported.as_mut_ptr().cast(), 1);
            t.expect("child sees nattch 6 after fork", reported[0] == 6);
            seg.expect_nattch(t, "parent after fork", 6);
            libc::write(to_child[1], b"D".as_ptr().cast(), 1);
            libc::read(to_parent[0], reported[1..].as_mut_ptr().cast(), 1);
            t.expect("child sees nattch 3 after detaching its copies", reported[1] == 3);
        }
        let status = wait_for(pid);
        t.expect("child exited cleanly", matches!(status, Ok(WaitStatus::Exited(0))));
        seg.expect_nattch(t, "after child detach and exit", 3);
        for p in addrs {
            unsafe {
                test_succ!(t, libc::shmdt(p.cast()));
            }
        }
        seg.expect_nattch(t, "after parent detaches all", 0);
        for fd in to_parent.iter().chain(to_child.iter()) {
            unsafe { libc::close(*fd) };
        }
    });

    suite.test("readonly_attach_no_upgrade", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), libc::SHM_RDONLY) else {
            return;
        };
        unsafe {
            test_errno!(
                t,
                libc::mprotect(addr.cast(), segment_size(), libc::PROT_READ | libc::PROT_WRITE),
                Errno::EACCES
            );
        }
        expect_no_fault(t, "read of SHM_RDONLY attach", addr, Access::Read);
        expect_fault(t, "write to SHM_RDONLY attach", addr, Access::Write);
        unsafe {
            test_succ!(t, libc::shmdt(addr.cast()));
        }
    });

    suite.test("mprotect_downgrade_faults", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        let len = segment_size();
        unsafe {
            ptr::write_bytes(addr, 0xab, len);
            test_succ!(t, libc::mprotect(addr.cast(), len, libc::PROT_READ));
        }
        expect_fault(t, "write after PROT_READ", addr, Access::Write);
        unsafe {
            test_succ!(t, libc::mprotect(addr.cast(), len, libc::PROT_NONE));
        }
        expect_fault(t, "read after PROT_NONE", addr, Access::Read);
        unsafe {
            test_succ!(t, libc::mprotect(addr.cast(), len, libc::PROT_READ | libc::PROT_WRITE));
            *addr = 0x5a;
            t.expect("write after restoring PROT_WRITE", *addr == 0x5a && *addr.add(1) == 0xab);
            test_succ!(t, libc::shmdt(addr.cast()));
        }
    });

    suite.test("key_reuse_after_rmid", |t| {
        let key = next_key();
        let Some(old) = Segment::create(t, key, segment_size()) else {
            return;
        };
        let Some(old_addr) = old.attach(t, ptr::null(), 0) else {
            return;
        };
        unsafe {
            *old_addr = 0x11;
            test_succ!(t, libc::shmctl(old.id, libc::IPC_RMID, ptr::null_mut()));
        }
        if let Some(new) = Segment::create(t, key, segment_size()) {
            t.expect("the key gets a fresh id", new.id != old.id);
            if let Some(new_addr) = new.attach(t, ptr::null(), 0) {
                unsafe {
                    *new_addr = 0x22;
                    t.expect("old and new segments are distinct", *old_addr == 0x11);
                    libc::shmdt(new_addr.cast());
                }
            }
        }
        unsafe {
            test_succ!(t, libc::shmdt(old_addr.cast()));
        }
    });

    suite.test("final_detach_destroys_removed_segment", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        unsafe {
            test_succ!(t, libc::shmctl(seg.id, libc::IPC_RMID, ptr::null_mut()));
        }
        let shared = addr as usize;
        let dirty = move || {
            for i in 0..SEGMENT_PAGES {
                unsafe { ptr::write_volatile((shared as *mut u8).add(i * page()), i as u8) };
            }
        };
        let status = run_in_child(move || {
            dirty();
            0
        });
        dirty();
        t.expect("child dirtied every page", matches!(status, Ok(WaitStatus::Exited(0))));
        seg.expect_nattch(t, "before final detach", 1);
        unsafe {
            test_succ!(t, libc::shmdt(addr.cast()));
            let mut ds: libc::shmid_ds = std::mem::zeroed();
            test_errno!(t, libc::shmctl(seg.id, libc::IPC_STAT, &mut ds), Errno::EINVAL);
        }
    });

    suite.test("shmat_address_validation", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let len = segment_size();
        let occupied = anon_map(len * 2, libc::PROT_READ | libc::PROT_WRITE);
        if occupied.is_null() {
            return t.fail("mmap scratch", Errno::last());
        }
        unsafe {
            test_errno!(t, libc::shmat(seg.id, occupied.cast(), 0), Errno::EINVAL);
            test_errno!(t, libc::shmat(seg.id, occupied.add(1).cast(), 0), Errno::EINVAL);
            // SHM_REMAP replaces the existing mapping.
            if let Some(p) = seg.attach(t, occupied.cast(), libc::SHM_REMAP) {
                t.expect("SHM_REMAP attaches at the requested address", p == occupied);
                libc::shmdt(p.cast());
            }
            test_errno!(t, libc::shmat(-1, ptr::null(), 0), Errno::EINVAL);
            libc::munmap(occupied.cast(), len * 2);
        }
    });

    suite.test("shmdt_address_validation", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        let other = anon_map(page(), libc::PROT_READ);
        unsafe {
            test_errno!(t, libc::shmdt(addr.add(page()).cast()), Errno::EINVAL);
            if !other.is_null() {
                test_errno!(t, libc::shmdt(other.cast()), Errno::EINVAL);
                libc::munmap(other.cast(), page());
            }
            test_succ!(t, libc::shmdt(addr.cast()));
            test_errno!(t, libc::shmdt(addr.cast()), Errno::EINVAL);
        }
    });

    suite.test("munmap_vs_shmdt", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        seg.expect_nattch(t, "before munmap", 1);
        unsafe {
            test_succ!(t, libc::munmap(addr.cast(), segment_size()));
        }
        seg.expect_nattch(t, "after munmap", 0);
        unsafe {
            test_errno!(t, libc::shmdt(addr.cast()), Errno::EINVAL);
        }
    });

    suite.test("partial_munmap_refcnt_split", |t| {
        let Some(seg) = Segment::private(t, page() * 3) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        seg.expect_nattch(t, "after shmat", 1);
        let middle = unsafe { addr.add(page()) };
        let last = unsafe { addr.add(page() * 2) };
        unsafe {
            test_succ!(t, libc::munmap(middle.cast(), page()));
        }
        seg.expect_nattch(t, "after munmap of the middle page", 2);
        expect_fault(t, "read of the unmapped middle page", middle, Access::Read);
        expect_no_fault(t, "read of the first page", addr, Access::Read);
        expect_no_fault(t, "read of the last page", last, Access::Read);

        unsafe {
            test_succ!(t, libc::shmdt(addr.cast()));
        }
        seg.expect_nattch(t, "after shmdt", 0);
        expect_fault(t, "read of the first page after shmdt", addr, Access::Read);
        expect_fault(t, "read of the last page after shmdt", last, Access::Read);
    });

    suite.test("mremap_move_keeps_attachment", |t| {
        let Some(seg) = Segment::private(t, segment_size()) else {
            return;
        };
        let Some(addr) = seg.attach(t, ptr::null(), 0) else {
            return;
        };
        let len = segment_size();
        let target = anon_map(len * 2, libc::PROT_NONE);
        if target.is_null() {
            return t.fail("mmap scratch", Errno::last());
        }
        unsafe {
            *addr = 0x77;
            libc::munmap(target.cast(), len * 2);
            let moved = libc::mremap(
                addr.cast(),
                len,
                len,
                libc::MREMAP_MAYMOVE | libc::MREMAP_FIXED,
                target.cast::<c_void>(),
            );
            if moved == libc::MAP_FAILED {
                t.fail("mremap(MREMAP_FIXED)", Errno::last());
                libc::shmdt(addr.cast());
                return;
            }
            t.pass("mremap(MREMAP_FIXED)");
            let moved: *mut u8 = moved.cast();
            t.expect("contents move with the mapping", *moved == 0x77);
            seg.expect_nattch(t, "after move", 1);
            test_errno!(t, libc::shmdt(addr.cast()), Errno::EINVAL);
            test_succ!(t, libc::shmdt(moved.cast()));
        }
        seg.expect_nattch(t, "after detaching the moved mapping", 0);
    });

    suite.finish();
}
