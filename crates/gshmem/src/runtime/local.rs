//! Single-node runtime backend: PEs are threads of one process.
//!
//! Every PE owns a symmetric heap region of identical length; offsets are
//! handed out by one shared allocator, so the same offset denotes a
//! comparable object at every PE — which also makes the IPC pointer deltas
//! exact (`peer_base - my_base`). Collectives move bytes through a staging
//! buffer bracketed by a process-wide barrier.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex, OnceLock};

use crate::config::Attr;
use crate::err::{Result, ShmemError};
use crate::heap::{HeapRegion, OffsetAllocator};
use crate::runtime::{Runtime, RuntimeKind, RuntimeTeam};

/// Sentinel published when a collective allocation fails.
const ALLOC_FAILED: usize = usize::MAX;

/// Shared state of one simulated node.
pub struct LocalWorld {
    n_pes: i32,
    heap_length: usize,
    heaps: Vec<OnceLock<HeapRegion>>,
    alloc: OffsetAllocator,
    /// Offset agreed on by the current collective allocation.
    alloc_result: AtomicUsize,
    barrier: Barrier,
    /// Exchange area for bcast/fcollect. Collectives are globally ordered
    /// by the barrier, so one buffer serves them all.
    staging: Mutex<Vec<u8>>,
    next_team: AtomicI32,
}

impl LocalWorld {
    pub fn new(n_pes: usize, heap_length: usize) -> Arc<Self> {
        assert!(n_pes > 0, "a world needs at least one PE");
        Arc::new(Self {
            n_pes: n_pes as i32,
            heap_length,
            heaps: (0..n_pes).map(|_| OnceLock::new()).collect(),
            alloc: OffsetAllocator::new(heap_length),
            alloc_result: AtomicUsize::new(0),
            barrier: Barrier::new(n_pes),
            staging: Mutex::new(Vec::new()),
            next_team: AtomicI32::new(16),
        })
    }

    /// Handle for one PE.
    pub fn runtime(self: &Arc<Self>, pe: i32) -> LocalRuntime {
        assert!(pe >= 0 && pe < self.n_pes);
        LocalRuntime {
            world: Arc::clone(self),
            pe,
        }
    }

    /// Spawn one thread per PE, initialize a [`crate::Pe`] on each, run
    /// `body`, and finalize. The harness used by tests and drivers.
    pub fn launch<F>(n_pes: usize, attr: Attr, body: F)
    where
        F: Fn(&mut crate::pe::Pe) + Send + Sync,
    {
        let world = Self::new(n_pes, attr.heap_length);
        let body = &body;
        std::thread::scope(|scope| {
            for pe in 0..n_pes {
                let world = Arc::clone(&world);
                let attr = attr.clone().with_runtime(RuntimeKind::Local);
                scope.spawn(move || {
                    let runtime: Arc<dyn Runtime> = Arc::new(world.runtime(pe as i32));
                    let mut handle = match crate::pe::Pe::init(runtime, attr) {
                        Ok(handle) => handle,
                        Err(err) => panic!("PE {pe} failed to initialize: {err}"),
                    };
                    body(&mut handle);
                    handle.finalize();
                });
            }
        });
    }

    fn heap(&self, pe: i32) -> &HeapRegion {
        self.heaps[pe as usize]
            .get()
            .expect("heap accessed before creation")
    }
}

/// One PE's view of the shared world.
pub struct LocalRuntime {
    world: Arc<LocalWorld>,
    pe: i32,
}

impl LocalRuntime {
    fn sync_point(&self) {
        self.world.barrier.wait();
    }
}

impl Runtime for LocalRuntime {
    fn fini(&self) {
        // Heaps live until the world drops; nothing to tear down per PE.
    }

    fn get_rank(&self) -> i32 {
        self.pe
    }

    fn get_size(&self) -> i32 {
        self.world.n_pes
    }

    fn get_node_rank(&self, pe: i32) -> i32 {
        if pe >= 0 && pe < self.world.n_pes {
            pe
        } else {
            -1
        }
    }

    fn get_node_size(&self) -> i32 {
        self.world.n_pes
    }

    fn is_local(&self, pe: i32) -> bool {
        pe >= 0 && pe < self.world.n_pes
    }

    fn is_symmetric_address(&self, addr: usize) -> bool {
        let heap = self.world.heap(self.pe);
        addr >= heap.base() && addr < heap.base() + heap.length()
    }

    fn heap_create(&self, length: usize) -> Result<usize> {
        debug_assert_eq!(length, self.world.heap_length);
        let region = self.world.heaps[self.pe as usize]
            .get_or_init(|| HeapRegion::new(self.world.heap_length));
        Ok(region.base())
    }

    fn malloc(&self, size: usize) -> Result<usize> {
        self.sync_point();
        if self.pe == 0 {
            let offset = self
                .world
                .alloc
                .reserve(size, 64)
                .unwrap_or(ALLOC_FAILED);
            self.world.alloc_result.store(offset, Ordering::SeqCst);
        }
        self.sync_point();
        let offset = self.world.alloc_result.load(Ordering::SeqCst);
        if offset == ALLOC_FAILED {
            return Err(ShmemError::Transport(format!(
                "symmetric heap exhausted allocating {size} bytes"
            )));
        }
        Ok(self.world.heap(self.pe).base() + offset)
    }

    fn calloc(&self, count: usize, size: usize) -> Result<usize> {
        let bytes = count.checked_mul(size).ok_or_else(|| {
            ShmemError::Transport("calloc size overflow".to_string())
        })?;
        let addr = self.malloc(bytes)?;
        // Safety: the address was just carved from this PE's own heap.
        unsafe {
            std::ptr::write_bytes(addr as *mut u8, 0, bytes);
        }
        Ok(addr)
    }

    fn free(&self, addr: usize) {
        // The offset allocator is monotone; released blocks are not reused.
        tracing::trace!(addr, "symmetric free (no-op)");
    }

    fn team_sync(&self, _team: RuntimeTeam) {
        self.barrier_all();
    }

    fn team_predefined_set(&self, _team: RuntimeTeam) {}

    fn team_split_strided(
        &self,
        _parent: RuntimeTeam,
        _start: i32,
        _stride: i32,
        _size: i32,
    ) -> RuntimeTeam {
        self.world.next_team.fetch_add(1, Ordering::SeqCst)
    }

    fn team_destroy(&self, _team: RuntimeTeam) {}

    fn bcast(&self, addr: usize, nbytes: usize, root: i32) {
        self.sync_point();
        if self.pe == root {
            let mut staging = self.world.staging.lock().expect("staging poisoned");
            staging.resize(nbytes, 0);
            // Safety: `addr` is caller-owned readable memory of `nbytes`.
            unsafe {
                std::ptr::copy_nonoverlapping(addr as *const u8, staging.as_mut_ptr(), nbytes);
            }
        }
        self.sync_point();
        if self.pe != root {
            let staging = self.world.staging.lock().expect("staging poisoned");
            // Safety: `addr` is caller-owned writable memory of `nbytes`.
            unsafe {
                std::ptr::copy_nonoverlapping(staging.as_ptr(), addr as *mut u8, nbytes);
            }
        }
    }

    fn node_bcast(&self, addr: usize, nbytes: usize, root: i32) {
        self.bcast(addr, nbytes, root);
    }

    fn fcollect(&self, dst: usize, src: usize, nbytes: usize) {
        let total = nbytes * self.world.n_pes as usize;
        self.sync_point();
        {
            let mut staging = self.world.staging.lock().expect("staging poisoned");
            if staging.len() < total {
                staging.resize(total, 0);
            }
            // Safety: each PE writes its own disjoint stripe.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src as *const u8,
                    staging.as_mut_ptr().add(self.pe as usize * nbytes),
                    nbytes,
                );
            }
        }
        self.sync_point();
        {
            let staging = self.world.staging.lock().expect("staging poisoned");
            // Safety: `dst` is caller-owned writable memory of `total`.
            unsafe {
                std::ptr::copy_nonoverlapping(staging.as_ptr(), dst as *mut u8, total);
            }
        }
    }

    fn node_fcollect(&self, dst: usize, src: usize, nbytes: usize) {
        self.fcollect(dst, src, nbytes);
    }

    fn barrier_all(&self) {
        self.quiet();
        self.sync_point();
    }

    fn node_barrier(&self) {
        self.sync_point();
    }

    fn fence(&self) {
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    fn quiet(&self) {
        // Delivery is in-process; a full fence covers ordering.
        std::sync::atomic::fence(Ordering::SeqCst);
    }

    fn sync(&self) {
        self.sync_point();
    }

    fn uchar_and_reduce(&self, _team: RuntimeTeam, dst: &mut [u8], src: &[u8]) {
        debug_assert_eq!(dst.len(), src.len());
        let n = src.len();
        let mut gathered = vec![0u8; n * self.world.n_pes as usize];
        self.fcollect(gathered.as_mut_ptr() as usize, src.as_ptr() as usize, n);
        for (i, out) in dst.iter_mut().enumerate() {
            *out = gathered
                .chunks_exact(n)
                .map(|chunk| chunk[i])
                .fold(u8::MAX, |acc, v| acc & v);
        }
    }

    fn int_max_reduce(&self, _team: RuntimeTeam, dst: &mut [i32], src: &[i32]) {
        debug_assert_eq!(dst.len(), src.len());
        let n = src.len();
        let nbytes = n * std::mem::size_of::<i32>();
        let mut gathered = vec![0i32; n * self.world.n_pes as usize];
        self.fcollect(
            gathered.as_mut_ptr() as usize,
            src.as_ptr() as usize,
            nbytes,
        );
        for (i, out) in dst.iter_mut().enumerate() {
            *out = gathered
                .chunks_exact(n)
                .map(|chunk| chunk[i])
                .fold(i32::MIN, i32::max);
        }
    }

    fn progress(&self) {
        std::thread::yield_now();
    }

    fn abort(&self, status: i32, msg: &str) -> ! {
        tracing::error!(status, pe = self.pe, "runtime abort: {msg}");
        panic!("PE {} aborted (status {status}): {msg}", self.pe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spawn_pes<F, R>(world: &Arc<LocalWorld>, f: F) -> Vec<R>
    where
        F: Fn(LocalRuntime) -> R + Send + Sync,
        R: Send,
    {
        let n = world.n_pes as usize;
        let f = &f;
        let mut out = Vec::new();
        thread::scope(|scope| {
            let handles: Vec<_> = (0..n)
                .map(|pe| {
                    let rt = world.runtime(pe as i32);
                    scope.spawn(move || f(rt))
                })
                .collect();
            for h in handles {
                out.push(h.join().unwrap());
            }
        });
        out
    }

    #[test]
    fn test_collective_malloc_agrees_on_offset() {
        let world = LocalWorld::new(3, 1 << 16);
        let offsets = spawn_pes(&world, |rt| {
            let base = rt.heap_create(1 << 16).unwrap();
            let addr = rt.malloc(128).unwrap();
            addr - base
        });
        assert!(offsets.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_bcast_replicates_root_buffer() {
        let world = LocalWorld::new(4, 1 << 16);
        let results = spawn_pes(&world, |rt| {
            let mut buf = if rt.get_rank() == 2 {
                [7u8, 8, 9, 10]
            } else {
                [0u8; 4]
            };
            rt.bcast(buf.as_mut_ptr() as usize, 4, 2);
            buf
        });
        for buf in results {
            assert_eq!(buf, [7, 8, 9, 10]);
        }
    }

    #[test]
    fn test_fcollect_concatenates_in_rank_order() {
        let world = LocalWorld::new(4, 1 << 16);
        let results = spawn_pes(&world, |rt| {
            let mine = [rt.get_rank() as u8; 2];
            let mut all = [0u8; 8];
            rt.fcollect(all.as_mut_ptr() as usize, mine.as_ptr() as usize, 2);
            all
        });
        for all in results {
            assert_eq!(all, [0, 0, 1, 1, 2, 2, 3, 3]);
        }
    }

    #[test]
    fn test_reductions() {
        let world = LocalWorld::new(4, 1 << 16);
        let results = spawn_pes(&world, |rt| {
            let pe = rt.get_rank();
            let mut and_out = [0u8; 1];
            rt.uchar_and_reduce(0, &mut and_out, &[0b1110 | pe as u8]);
            let mut max_out = [0i32; 1];
            rt.int_max_reduce(0, &mut max_out, &[pe * 10]);
            (and_out[0], max_out[0])
        });
        for (and_v, max_v) in results {
            assert_eq!(and_v, 0b1110);
            assert_eq!(max_v, 30);
        }
    }
}
