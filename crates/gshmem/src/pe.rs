//! The per-PE handle: bootstrap, the device-side entry points, and
//! teardown.
//!
//! One `Pe` represents one processing element for the lifetime of the
//! session (init to finalize). Initialization creates the symmetric heap,
//! discovers PE locality, exchanges heap bases to build the IPC delta
//! table, agrees on `only_intra_node`, builds the ring and dispatch table,
//! and starts the proxy thread. All public operations are thin adapters
//! over the generic cores in `amo`, `rma`, `sync`, and `collectives`.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::collectives;
use crate::completion::RetValue;
use crate::config::Attr;
use crate::dispatch::{DispatchTable, ProxyCtx};
use crate::err::{self, validate_initialized, Result, ShmemError};
use crate::group::WorkGroup;
use crate::info::GlobalInfo;
use crate::ordering;
use crate::proxy;
use crate::record::{
    AtomicArith, AtomicBits, AtomicBitwise, BaseType, Cmp, Op, OpValue, Request, RingValue,
    SignalOp,
};
use crate::ring::{SendRing, RING_SIZE};
use crate::runtime::{Runtime, RuntimeKind};
use crate::team::{Team, TeamId, TEAM_INVALID};
use crate::{amo, rma, sync};

/// One processing element's handle to the library.
pub struct Pe {
    attr: Attr,
    info: Arc<GlobalInfo>,
    ring: Arc<SendRing>,
    table: Arc<DispatchTable>,
    runtime: Arc<dyn Runtime>,
    ctx: ProxyCtx,
    proxy: Option<JoinHandle<()>>,
    finalized: bool,
}

/// Initialize against the backend selected by `attr.runtime`.
///
/// Only backends shipped in this tree can be constructed here; `Local`
/// worlds are built through [`crate::runtime::LocalWorld::launch`], which
/// owns the shared node state.
pub fn init(attr: Attr) -> Result<Pe> {
    match attr.runtime {
        RuntimeKind::Local => Err(ShmemError::Transport(
            "the local backend is constructed through LocalWorld::launch".to_string(),
        )),
        kind => Err(ShmemError::Transport(format!(
            "runtime backend {kind:?} is not available in this build"
        ))),
    }
}

impl Pe {
    /// Bootstrap one PE on an already-constructed runtime.
    pub fn init(runtime: Arc<dyn Runtime>, attr: Attr) -> Result<Self> {
        let attr = attr.clamped();
        let my_pe = runtime.get_rank();
        let n_pes = runtime.get_size();
        let heap_base = runtime.heap_create(attr.heap_length)?;

        // Locality table: node rank + 1, with 0 reserved for "not local".
        let mut local_pes = vec![0u8; n_pes as usize];
        for pe in 0..n_pes {
            if runtime.is_local(pe) {
                let node_rank = runtime.get_node_rank(pe);
                if node_rank >= 0 {
                    local_pes[pe as usize] = (node_rank + 1) as u8;
                }
            }
        }

        // Exchange heap bases; the delta table turns a symmetric address
        // into this process's mapping of a peer heap.
        let my_base = heap_base as u64;
        let mut bases = vec![0u64; n_pes as usize];
        runtime.fcollect(
            bases.as_mut_ptr() as usize,
            std::ptr::addr_of!(my_base) as usize,
            std::mem::size_of::<u64>(),
        );
        let node_size = runtime.get_node_size().max(0) as usize;
        let mut deltas = vec![0isize; node_size + 2];
        for pe in 0..n_pes as usize {
            let local_index = local_pes[pe];
            if local_index != 0 {
                deltas[local_index as usize] = bases[pe] as isize - heap_base as isize;
            }
        }

        // All PEs must agree before anyone takes the fast path.
        let everyone_local = u8::from(local_pes.iter().all(|&l| l != 0));
        let mut agreed = [0u8];
        runtime.uchar_and_reduce(0, &mut agreed, &[everyone_local]);
        let only_intra_node = attr.enable_ipc && agreed[0] != 0;

        let info = Arc::new(GlobalInfo::new(
            my_pe,
            n_pes,
            heap_base,
            attr.heap_length,
            only_intra_node,
            local_pes.into_boxed_slice(),
            deltas.into_boxed_slice(),
        ));
        let ring = Arc::new(SendRing::new());
        let table = Arc::new(DispatchTable::new());
        let ctx = ProxyCtx {
            info: Arc::clone(&info),
            runtime: Arc::clone(&runtime),
            stack_print_limit: attr.stack_print_limit,
        };

        let proxy = if attr.gpu {
            Some(proxy::spawn(
                Arc::clone(&ring),
                Arc::clone(&table),
                ProxyCtx {
                    info: Arc::clone(&info),
                    runtime: Arc::clone(&runtime),
                    stack_print_limit: attr.stack_print_limit,
                },
            ))
        } else {
            None
        };

        info.mark_initialized();
        runtime.barrier_all();
        tracing::debug!(my_pe, n_pes, only_intra_node, "PE initialized");

        Ok(Self {
            attr,
            info,
            ring,
            table,
            runtime,
            ctx,
            proxy,
            finalized: false,
        })
    }

    /// Collective teardown: quiesce, synchronize, stop the proxy, release
    /// the transport. Idempotent.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        ordering::quiet(self);
        self.runtime.barrier_all();
        if let Some(handle) = self.proxy.take() {
            let mut req = Request::new(Op::Exit, BaseType::Void);
            self.ring.sendwait(&mut req);
            if handle.join().is_err() {
                tracing::error!(pe = self.info.my_pe(), "proxy thread panicked");
            }
        }
        self.info.mark_finalized();
        if self.attr.initialize_runtime {
            // An adopted runtime belongs to whoever initialized it.
            self.runtime.fini();
        }
        tracing::debug!(pe = self.info.my_pe(), "PE finalized");
    }

    // ---------------------------------------------------------------------
    // INTERNAL PLUMBING
    // ---------------------------------------------------------------------

    pub(crate) fn info(&self) -> &GlobalInfo {
        &self.info
    }

    pub(crate) fn ring(&self) -> &SendRing {
        &self.ring
    }

    pub(crate) fn runtime(&self) -> &dyn Runtime {
        self.runtime.as_ref()
    }

    /// Whether calls run device-side (fast path plus ring) as opposed to
    /// dispatching handlers directly in the caller.
    #[inline]
    pub(crate) fn device_side(&self) -> bool {
        self.attr.gpu
    }

    /// Run a validation closure when checking is enabled; failures are
    /// fatal.
    #[inline]
    pub(crate) fn validate<F>(&self, check: F)
    where
        F: FnOnce() -> Result<()>,
    {
        if self.attr.error_checking {
            if let Err(error) = check() {
                self.fatal(&error);
            }
        }
    }

    pub(crate) fn fatal(&self, error: &ShmemError) -> ! {
        err::fatal(self.runtime.as_ref(), self.attr.stack_print_limit, error)
    }

    /// Fast-path translation: the adjusted target address when `target_pe`
    /// is reachable over IPC and the job is all-intra-node.
    #[inline]
    pub(crate) fn fast_local(&self, addr: usize, target_pe: i32) -> Option<usize> {
        if !self.attr.gpu || !self.info.only_intra_node() {
            return None;
        }
        let local_index = self.info.local_index(target_pe);
        if local_index == 0 {
            return None;
        }
        Some(self.info.adjust(addr, local_index))
    }

    /// Blocking request with no return value.
    pub(crate) fn invoke_blocking(&self, req: &mut Request) {
        if self.attr.gpu {
            self.ring.sendwait(req);
            return;
        }
        if let Err(error) = self.table.dispatch(&self.ctx, req) {
            self.fatal(&error);
        }
    }

    /// Blocking request returning a typed value through the built-in
    /// completion.
    pub(crate) fn invoke_blocking_return<T: RingValue>(&self, req: &mut Request) -> T {
        if self.attr.gpu {
            req.completion = 0;
            let sequence = self.ring.send(req);
            let slot = usize::from(sequence) & (RING_SIZE - 1);
            let ret = self.ring.completions.wait_return(slot, sequence);
            return T::from_bits(ret.value);
        }
        match self.table.dispatch(&self.ctx, req) {
            Ok(Some(ret)) => T::from_bits(ret.value),
            Ok(None) => T::from_bits(OpValue::ZERO),
            Err(error) => self.fatal(&error),
        }
    }

    /// Fire-and-forget request; completion is covered by a later quiet.
    pub(crate) fn invoke_nonblocking(&self, req: &mut Request) {
        if self.attr.gpu {
            self.ring.send(req);
            return;
        }
        if let Err(error) = self.table.dispatch(&self.ctx, req) {
            self.fatal(&error);
        }
    }

    // ---------------------------------------------------------------------
    // QUERIES AND MEMORY
    // ---------------------------------------------------------------------

    pub fn my_pe(&self) -> i32 {
        self.info.my_pe()
    }

    pub fn n_pes(&self) -> i32 {
        self.info.n_pes()
    }

    /// Collective symmetric allocation; every PE receives the same offset.
    pub fn malloc(&self, size: usize) -> Result<*mut u8> {
        validate_initialized(&self.info)?;
        Ok(self.runtime.malloc(size)? as *mut u8)
    }

    /// Collective zeroed symmetric allocation.
    pub fn calloc(&self, count: usize, size: usize) -> Result<*mut u8> {
        validate_initialized(&self.info)?;
        Ok(self.runtime.calloc(count, size)? as *mut u8)
    }

    /// Collective symmetric release.
    pub fn free(&self, addr: *mut u8) {
        self.runtime.free(addr as usize);
    }

    /// Direct pointer to `dest` on `target_pe` when reachable over IPC.
    pub fn ptr<T>(&self, dest: *const T, target_pe: i32) -> Option<*mut T> {
        let local_index = self.info.local_index(target_pe);
        if local_index == 0 {
            return None;
        }
        Some(self.info.adjust(dest as usize, local_index) as *mut T)
    }

    /// Assist the proxy from this thread; returns requests consumed.
    pub fn progress(&self) -> usize {
        proxy::try_progress(&self.ring, &self.table, &self.ctx)
    }

    // ---------------------------------------------------------------------
    // RMA
    // ---------------------------------------------------------------------

    pub fn put<T: RingValue>(&self, dest: *mut T, src: *const T, nelems: usize, pe: i32) {
        rma::put(self, dest, src, nelems, pe);
    }

    pub fn put_nbi<T: RingValue>(&self, dest: *mut T, src: *const T, nelems: usize, pe: i32) {
        rma::put_nbi(self, dest, src, nelems, pe);
    }

    pub fn get<T: RingValue>(&self, dest: *mut T, src: *const T, nelems: usize, pe: i32) {
        rma::get(self, dest, src, nelems, pe);
    }

    pub fn get_nbi<T: RingValue>(&self, dest: *mut T, src: *const T, nelems: usize, pe: i32) {
        rma::get_nbi(self, dest, src, nelems, pe);
    }

    pub fn p<T: AtomicBits>(&self, dest: *mut T, value: T, pe: i32) {
        rma::p(self, dest, value, pe);
    }

    pub fn g<T: AtomicBits>(&self, src: *const T, pe: i32) -> T {
        rma::g(self, src, pe)
    }

    pub fn iput<T: RingValue>(
        &self,
        dest: *mut T,
        src: *const T,
        dst_stride: isize,
        src_stride: isize,
        nelems: usize,
        pe: i32,
    ) {
        rma::iput(self, dest, src, dst_stride, src_stride, nelems, pe);
    }

    pub fn iget<T: RingValue>(
        &self,
        dest: *mut T,
        src: *const T,
        dst_stride: isize,
        src_stride: isize,
        nelems: usize,
        pe: i32,
    ) {
        rma::iget(self, dest, src, dst_stride, src_stride, nelems, pe);
    }

    pub fn ibput<T: RingValue>(
        &self,
        dest: *mut T,
        src: *const T,
        dst_stride: isize,
        src_stride: isize,
        bsize: usize,
        nblocks: usize,
        pe: i32,
    ) {
        rma::ibput(self, dest, src, dst_stride, src_stride, bsize, nblocks, pe);
    }

    pub fn ibget<T: RingValue>(
        &self,
        dest: *mut T,
        src: *const T,
        dst_stride: isize,
        src_stride: isize,
        bsize: usize,
        nblocks: usize,
        pe: i32,
    ) {
        rma::ibget(self, dest, src, dst_stride, src_stride, bsize, nblocks, pe);
    }

    pub fn put_signal<T: RingValue>(
        &self,
        dest: *mut T,
        src: *const T,
        nelems: usize,
        sig_addr: *mut u64,
        signal: u64,
        sig_op: SignalOp,
        pe: i32,
    ) {
        rma::put_signal(self, dest, src, nelems, sig_addr, signal, sig_op, pe);
    }

    pub fn put_signal_nbi<T: RingValue>(
        &self,
        dest: *mut T,
        src: *const T,
        nelems: usize,
        sig_addr: *mut u64,
        signal: u64,
        sig_op: SignalOp,
        pe: i32,
    ) {
        rma::put_signal_nbi(self, dest, src, nelems, sig_addr, signal, sig_op, pe);
    }

    // ---------------------------------------------------------------------
    // AMO
    // ---------------------------------------------------------------------

    pub fn atomic_fetch<T: AtomicBits>(&self, source: *const T, pe: i32) -> T {
        amo::fetch(self, source, pe)
    }

    pub fn atomic_set<T: AtomicBits>(&self, dest: *mut T, value: T, pe: i32) {
        amo::set(self, dest, value, pe);
    }

    pub fn atomic_compare_swap<T: AtomicBits>(
        &self,
        dest: *mut T,
        cond: T,
        value: T,
        pe: i32,
    ) -> T {
        amo::compare_swap(self, dest, cond, value, pe)
    }

    pub fn atomic_swap<T: AtomicBits>(&self, dest: *mut T, value: T, pe: i32) -> T {
        amo::swap(self, dest, value, pe)
    }

    pub fn atomic_fetch_inc<T: AtomicArith>(&self, dest: *mut T, pe: i32) -> T {
        amo::fetch_inc(self, dest, pe)
    }

    pub fn atomic_inc<T: AtomicArith>(&self, dest: *mut T, pe: i32) {
        amo::inc(self, dest, pe);
    }

    pub fn atomic_fetch_add<T: AtomicArith>(&self, dest: *mut T, value: T, pe: i32) -> T {
        amo::fetch_add(self, dest, value, pe)
    }

    pub fn atomic_add<T: AtomicArith>(&self, dest: *mut T, value: T, pe: i32) {
        amo::add(self, dest, value, pe);
    }

    pub fn atomic_fetch_and<T: AtomicBitwise>(&self, dest: *mut T, value: T, pe: i32) -> T {
        amo::fetch_and(self, dest, value, pe)
    }

    pub fn atomic_and<T: AtomicBitwise>(&self, dest: *mut T, value: T, pe: i32) {
        amo::and(self, dest, value, pe);
    }

    pub fn atomic_fetch_or<T: AtomicBitwise>(&self, dest: *mut T, value: T, pe: i32) -> T {
        amo::fetch_or(self, dest, value, pe)
    }

    pub fn atomic_or<T: AtomicBitwise>(&self, dest: *mut T, value: T, pe: i32) {
        amo::or(self, dest, value, pe);
    }

    pub fn atomic_fetch_xor<T: AtomicBitwise>(&self, dest: *mut T, value: T, pe: i32) -> T {
        amo::fetch_xor(self, dest, value, pe)
    }

    pub fn atomic_xor<T: AtomicBitwise>(&self, dest: *mut T, value: T, pe: i32) {
        amo::xor(self, dest, value, pe);
    }

    pub fn atomic_fetch_nbi<T: AtomicBits>(&self, fetch: *mut T, source: *const T, pe: i32) {
        amo::fetch_nbi(self, fetch, source, pe);
    }

    pub fn atomic_compare_swap_nbi<T: AtomicBits>(
        &self,
        fetch: *mut T,
        dest: *mut T,
        cond: T,
        value: T,
        pe: i32,
    ) {
        amo::compare_swap_nbi(self, fetch, dest, cond, value, pe);
    }

    pub fn atomic_swap_nbi<T: AtomicBits>(&self, fetch: *mut T, dest: *mut T, value: T, pe: i32) {
        amo::swap_nbi(self, fetch, dest, value, pe);
    }

    pub fn atomic_fetch_inc_nbi<T: AtomicArith>(&self, fetch: *mut T, dest: *mut T, pe: i32) {
        amo::fetch_inc_nbi(self, fetch, dest, pe);
    }

    pub fn atomic_fetch_add_nbi<T: AtomicArith>(
        &self,
        fetch: *mut T,
        dest: *mut T,
        value: T,
        pe: i32,
    ) {
        amo::fetch_add_nbi(self, fetch, dest, value, pe);
    }

    pub fn atomic_fetch_and_nbi<T: AtomicBitwise>(
        &self,
        fetch: *mut T,
        dest: *mut T,
        value: T,
        pe: i32,
    ) {
        amo::fetch_and_nbi(self, fetch, dest, value, pe);
    }

    pub fn atomic_fetch_or_nbi<T: AtomicBitwise>(
        &self,
        fetch: *mut T,
        dest: *mut T,
        value: T,
        pe: i32,
    ) {
        amo::fetch_or_nbi(self, fetch, dest, value, pe);
    }

    pub fn atomic_fetch_xor_nbi<T: AtomicBitwise>(
        &self,
        fetch: *mut T,
        dest: *mut T,
        value: T,
        pe: i32,
    ) {
        amo::fetch_xor_nbi(self, fetch, dest, value, pe);
    }

    // ---------------------------------------------------------------------
    // POINT-TO-POINT SYNCHRONIZATION
    // ---------------------------------------------------------------------

    pub fn test<T: AtomicBits>(&self, ivar: *mut T, cmp: Cmp, cmp_value: T) -> bool {
        sync::test(self, ivar, cmp, cmp_value)
    }

    pub fn test_all<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> bool {
        sync::test_all(self, ivars, nelems, status, cmp, cmp_value)
    }

    pub fn test_any<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> usize {
        sync::test_any(self, ivars, nelems, status, cmp, cmp_value)
    }

    pub fn test_some<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        indices: &mut [usize],
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> usize {
        sync::test_some(self, ivars, nelems, indices, status, cmp, cmp_value)
    }

    pub fn test_all_vector<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_values: &[T],
    ) -> bool {
        sync::test_all_vector(self, ivars, nelems, status, cmp, cmp_values)
    }

    pub fn test_any_vector<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_values: &[T],
    ) -> usize {
        sync::test_any_vector(self, ivars, nelems, status, cmp, cmp_values)
    }

    pub fn test_some_vector<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        indices: &mut [usize],
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_values: &[T],
    ) -> usize {
        sync::test_some_vector(self, ivars, nelems, indices, status, cmp, cmp_values)
    }

    pub fn wait_until<T: AtomicBits>(&self, ivar: *mut T, cmp: Cmp, cmp_value: T) {
        sync::wait_until(self, ivar, cmp, cmp_value);
    }

    pub fn wait_until_all<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) {
        sync::wait_until_all(self, ivars, nelems, status, cmp, cmp_value);
    }

    pub fn wait_until_any<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> usize {
        sync::wait_until_any(self, ivars, nelems, status, cmp, cmp_value)
    }

    pub fn wait_until_some<T: AtomicBits>(
        &self,
        ivars: *mut T,
        nelems: usize,
        indices: &mut [usize],
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> usize {
        sync::wait_until_some(self, ivars, nelems, indices, status, cmp, cmp_value)
    }

    pub fn signal_wait_until(&self, sig_addr: *mut u64, cmp: Cmp, cmp_value: u64) -> u64 {
        sync::signal_wait_until(self, sig_addr, cmp, cmp_value)
    }

    // Work-group variants: the leader checks, the group observes.

    pub fn test_work_group<T: AtomicBits>(
        &self,
        grp: &WorkGroup,
        member: usize,
        ivar: *mut T,
        cmp: Cmp,
        cmp_value: T,
    ) -> bool {
        grp.broadcast::<i32>(member, || i32::from(self.test(ivar, cmp, cmp_value))) != 0
    }

    pub fn test_all_work_group<T: AtomicBits>(
        &self,
        grp: &WorkGroup,
        member: usize,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> bool {
        let mut local = true;
        for i in grp.partition(member, nelems) {
            if status.is_some_and(|s| s[i] != 0) {
                continue;
            }
            // Safety: i < nelems over a caller-validated array.
            local &= self.test(unsafe { ivars.add(i) }, cmp, cmp_value);
        }
        grp.all(member, local)
    }

    pub fn test_any_work_group<T: AtomicBits>(
        &self,
        grp: &WorkGroup,
        member: usize,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) -> usize {
        grp.broadcast::<usize>(member, || {
            self.test_any(ivars, nelems, status, cmp, cmp_value)
        })
    }

    pub fn wait_until_work_group<T: AtomicBits>(
        &self,
        grp: &WorkGroup,
        member: usize,
        ivar: *mut T,
        cmp: Cmp,
        cmp_value: T,
    ) {
        grp.sync();
        if grp.is_leader(member) {
            self.wait_until(ivar, cmp, cmp_value);
        }
        grp.sync();
    }

    pub fn wait_until_all_work_group<T: AtomicBits>(
        &self,
        grp: &WorkGroup,
        member: usize,
        ivars: *mut T,
        nelems: usize,
        status: Option<&[i32]>,
        cmp: Cmp,
        cmp_value: T,
    ) {
        grp.sync();
        for i in grp.partition(member, nelems) {
            if status.is_some_and(|s| s[i] != 0) {
                continue;
            }
            // Safety: i < nelems over a caller-validated array.
            self.wait_until(unsafe { ivars.add(i) }, cmp, cmp_value);
        }
        grp.sync();
    }

    // ---------------------------------------------------------------------
    // ORDERING AND COLLECTIVES
    // ---------------------------------------------------------------------

    pub fn fence(&self) {
        ordering::fence(self);
    }

    pub fn quiet(&self) {
        ordering::quiet(self);
    }

    pub fn barrier_all(&self) {
        collectives::barrier_all(self);
    }

    pub fn sync_all(&self) {
        collectives::sync_all(self);
    }

    pub fn broadcast<T: RingValue>(&self, dest: *mut T, src: *const T, nelems: usize, root: i32) {
        collectives::broadcast(self, dest, src, nelems, root);
    }

    pub fn fcollect<T: RingValue>(&self, dest: *mut T, src: *const T, nelems: usize) {
        collectives::fcollect(self, dest, src, nelems);
    }

    pub fn sum_reduce<T>(&self, team: TeamId, dest: *mut T, src: *const T, nreduce: usize)
    where
        T: RingValue + std::ops::Add<Output = T>,
    {
        collectives::sum_reduce(self, team, dest, src, nreduce);
    }

    // ---------------------------------------------------------------------
    // TEAMS
    // ---------------------------------------------------------------------

    pub fn team_my_pe(&self, team: TeamId) -> i32 {
        self.info.team(team).map_or(-1, |t| t.my_pe())
    }

    pub fn team_n_pes(&self, team: TeamId) -> i32 {
        self.info.team(team).map_or(-1, |t| t.size())
    }

    pub fn team_translate_pe(&self, src_team: TeamId, src_pe: i32, dest_team: TeamId) -> i32 {
        match (self.info.team(src_team), self.info.team(dest_team)) {
            (Some(src), Some(dest)) => src.translate(src_pe, &dest),
            _ => -1,
        }
    }

    /// Collective: carve a strided team out of `parent`.
    pub fn team_split_strided(
        &self,
        parent: TeamId,
        start: i32,
        stride: i32,
        size: i32,
    ) -> TeamId {
        let Some(parent_team) = self.info.team(parent) else {
            return TEAM_INVALID;
        };
        if start < 0 || stride <= 0 || size <= 0 || start + (size - 1) * stride >= parent_team.size()
        {
            return TEAM_INVALID;
        }
        // Compose onto world coordinates.
        let world_start = parent_team.start() + start * parent_team.stride();
        let world_stride = stride * parent_team.stride();
        self.runtime.team_split_strided(parent, start, stride, size);
        let team = Team::new(world_start, world_stride, size, self.info.my_pe());
        self.info.install_team(team)
    }

    pub fn team_sync(&self, team: TeamId) {
        collectives::team_sync(self, team);
    }

    pub fn team_destroy(&self, team: TeamId) {
        self.runtime.team_destroy(team);
        self.info.remove_team(team);
    }

    // ---------------------------------------------------------------------
    // SERVICE
    // ---------------------------------------------------------------------

    /// Host timestamp (nanoseconds, monotonic) through the proxy.
    pub fn timestamp(&self) -> u64 {
        let mut req = Request::new(Op::Timestamp, BaseType::Void);
        self.invoke_blocking_return::<usize>(&mut req) as u64
    }

    /// Non-blocking timestamp: the value arrives in an allocated
    /// completion; collect it with [`TimestampHandle::wait`].
    pub fn timestamp_nbi(&self) -> TimestampHandle {
        if !self.attr.gpu {
            let mut req = Request::new(Op::Timestamp, BaseType::Void);
            let value = self.invoke_blocking_return::<usize>(&mut req) as u64;
            return TimestampHandle {
                ring: Arc::clone(&self.ring),
                state: HandleState::Ready(value),
            };
        }
        let index = self.ring.completions.allocate();
        let mut req = Request::new(Op::Timestamp, BaseType::Void);
        req.completion = index;
        let sequence = self.ring.send(&mut req);
        TimestampHandle {
            ring: Arc::clone(&self.ring),
            state: HandleState::Pending { index, sequence },
        }
    }

    /// Route a device-originated diagnostic line through the proxy.
    pub fn device_print(&self, text: &str) {
        let Some(index) = self.info.claim_message(text) else {
            // Pool exhausted; log host-side rather than dropping the text.
            tracing::info!(target: "gshmem::device", pe = self.info.my_pe(), "{text}");
            return;
        };
        let mut req = Request::new(Op::Print, BaseType::Void);
        req.root = index as i32;
        self.invoke_nonblocking(&mut req);
    }
}

impl Drop for Pe {
    fn drop(&mut self) {
        self.finalize();
    }
}

enum HandleState {
    Pending { index: u16, sequence: u16 },
    Ready(u64),
    Collected,
}

/// Scoped handle to an allocated completion carrying a timestamp. The
/// completion is released on collection or drop, never leaked.
pub struct TimestampHandle {
    ring: Arc<SendRing>,
    state: HandleState,
}

impl TimestampHandle {
    /// Block until the proxy delivers the value, then release the
    /// allocated completion.
    pub fn wait(mut self) -> u64 {
        match std::mem::replace(&mut self.state, HandleState::Collected) {
            HandleState::Pending { index, sequence } => {
                let ret: RetValue = self.ring.completions.wait_return(usize::from(index), sequence);
                self.ring.completions.free(usize::from(index));
                usize::from_bits(ret.value) as u64
            }
            HandleState::Ready(value) => value,
            HandleState::Collected => 0,
        }
    }
}

impl Drop for TimestampHandle {
    fn drop(&mut self) {
        if let HandleState::Pending { index, sequence } = self.state {
            // Drain the pending value so the slot is reusable.
            self.ring.completions.wait(usize::from(index), sequence);
            self.ring.completions.free(usize::from(index));
        }
    }
}
