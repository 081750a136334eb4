//! Process-wide (per-PE) global info: heap bounds, locality tables, and the
//! ancillary pools device code references.
//!
//! Assigned once by initialization and read-only thereafter, except for the
//! few fields the running system genuinely mutates (`is_initialized`, the
//! test-any rotor, the team pool, message-slot locks), which use interior
//! synchronization.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::team::{Team, TeamId, TEAM_NODE, TEAM_SHARED, TEAM_WORLD};

/// Number of device-originated diagnostic message slots.
pub const NUM_MESSAGES: usize = 32;

/// Capacity of one diagnostic message, bytes.
pub const MESSAGE_CAPACITY: usize = 224;

/// One diagnostic message slot. A device thread claims the lock, writes the
/// text, and enqueues a print upcall carrying the slot index; the proxy
/// logs the text and releases the lock.
pub(crate) struct MessageSlot {
    lock: AtomicU32,
    len: UnsafeCell<usize>,
    text: UnsafeCell<[u8; MESSAGE_CAPACITY]>,
}

// Safety: `len`/`text` are written only while `lock` is held (claimed with
// an acquire swap, released with a release store) and read only by the
// proxy between the upcall's publication and the lock release.
unsafe impl Send for MessageSlot {}
unsafe impl Sync for MessageSlot {}

impl MessageSlot {
    fn new() -> Self {
        Self {
            lock: AtomicU32::new(0),
            len: UnsafeCell::new(0),
            text: UnsafeCell::new([0; MESSAGE_CAPACITY]),
        }
    }

    pub(crate) fn try_claim(&self, text: &str) -> bool {
        if self.lock.swap(1, Ordering::Acquire) != 0 {
            return false;
        }
        let bytes = text.as_bytes();
        let len = bytes.len().min(MESSAGE_CAPACITY);
        // Safety: the lock was 0 and is now held by this thread.
        unsafe {
            (&mut *self.text.get())[..len].copy_from_slice(&bytes[..len]);
            *self.len.get() = len;
        }
        true
    }

    /// Read the text and release the slot. Proxy side.
    pub(crate) fn take(&self) -> String {
        // Safety: called only by the proxy while the lock is held; the
        // upcall's publication ordered the writes before this read.
        let text = unsafe {
            let len = *self.len.get();
            String::from_utf8_lossy(&(&*self.text.get())[..len]).into_owned()
        };
        self.lock.store(0, Ordering::Release);
        text
    }
}

/// Device-visible global state for one PE.
pub struct GlobalInfo {
    is_initialized: AtomicBool,
    my_pe: i32,
    n_pes: i32,
    heap_base: usize,
    heap_length: usize,
    /// True when every PE is reachable through IPC; gates the fast path.
    only_intra_node: bool,
    /// Per-PE index into the IPC table; 0 means "not local".
    local_pes: Box<[u8]>,
    /// Per-local-index pointer delta translating a symmetric-heap address
    /// into this process's mapping of that PE's heap. Entry 0 unused.
    ipc_buffer_delta: Box<[isize]>,
    /// Rotor for the test-any fairness scan.
    sync_last_idx_checked: AtomicUsize,
    /// Team pool; predefined teams installed at init, split teams appended.
    teams: RwLock<Vec<Option<Team>>>,
    messages: Box<[MessageSlot]>,
}

impl GlobalInfo {
    pub(crate) fn new(
        my_pe: i32,
        n_pes: i32,
        heap_base: usize,
        heap_length: usize,
        only_intra_node: bool,
        local_pes: Box<[u8]>,
        ipc_buffer_delta: Box<[isize]>,
    ) -> Self {
        let world = Team::new(0, 1, n_pes, my_pe);
        // Single-node rendering: SHARED and NODE coincide with WORLD.
        let teams = vec![Some(world), Some(world), Some(world)];
        let messages = (0..NUM_MESSAGES).map(|_| MessageSlot::new()).collect();
        Self {
            is_initialized: AtomicBool::new(false),
            my_pe,
            n_pes,
            heap_base,
            heap_length,
            only_intra_node,
            local_pes,
            ipc_buffer_delta,
            sync_last_idx_checked: AtomicUsize::new(0),
            teams: RwLock::new(teams),
            messages,
        }
    }

    /// Minimal info for unit tests: single node, no peers mapped.
    #[cfg(test)]
    pub(crate) fn for_tests(my_pe: i32, n_pes: i32, heap_base: usize, heap_length: usize) -> Self {
        let local_pes = vec![0u8; n_pes as usize].into_boxed_slice();
        let deltas = vec![0isize; n_pes as usize + 1].into_boxed_slice();
        let mut info = Self::new(my_pe, n_pes, heap_base, heap_length, false, local_pes, deltas);
        info.is_initialized = AtomicBool::new(true);
        info
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.is_initialized.store(true, Ordering::Release);
    }

    pub(crate) fn mark_finalized(&self) {
        self.is_initialized.store(false, Ordering::Release);
    }

    #[inline]
    pub fn my_pe(&self) -> i32 {
        self.my_pe
    }

    #[inline]
    pub fn n_pes(&self) -> i32 {
        self.n_pes
    }

    #[inline]
    pub fn heap_bounds(&self) -> (usize, usize) {
        (self.heap_base, self.heap_length)
    }

    #[inline]
    pub fn only_intra_node(&self) -> bool {
        self.only_intra_node
    }

    /// IPC table index for `pe`; 0 when the PE is not reachable locally.
    #[inline]
    pub(crate) fn local_index(&self, pe: i32) -> u8 {
        self.local_pes[pe as usize]
    }

    /// Translate a symmetric-heap address into this process's mapping of
    /// the local peer identified by `local_index` (nonzero).
    #[inline]
    pub(crate) fn adjust(&self, addr: usize, local_index: u8) -> usize {
        debug_assert_ne!(local_index, 0);
        addr.wrapping_add_signed(self.ipc_buffer_delta[local_index as usize])
    }

    /// Rotor state for the test-any fairness scan.
    #[inline]
    pub(crate) fn sync_rotor(&self) -> &AtomicUsize {
        &self.sync_last_idx_checked
    }

    // ---------------------------------------------------------------------
    // TEAMS
    // ---------------------------------------------------------------------

    pub(crate) fn team(&self, id: TeamId) -> Option<Team> {
        let teams = self.teams.read().ok()?;
        teams.get(id as usize).copied().flatten()
    }

    pub(crate) fn install_team(&self, team: Team) -> TeamId {
        let mut teams = self.teams.write().expect("team pool poisoned");
        teams.push(Some(team));
        (teams.len() - 1) as TeamId
    }

    pub(crate) fn remove_team(&self, id: TeamId) {
        // Predefined teams are permanent.
        if id == TEAM_WORLD || id == TEAM_SHARED || id == TEAM_NODE {
            return;
        }
        if let Ok(mut teams) = self.teams.write() {
            if let Some(entry) = teams.get_mut(id as usize) {
                *entry = None;
            }
        }
    }

    // ---------------------------------------------------------------------
    // MESSAGES
    // ---------------------------------------------------------------------

    /// Claim a message slot for `text`; returns its index.
    pub(crate) fn claim_message(&self, text: &str) -> Option<usize> {
        self.messages.iter().position(|slot| slot.try_claim(text))
    }

    pub(crate) fn message(&self, index: usize) -> &MessageSlot {
        &self.messages[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_applies_delta() {
        let local_pes = vec![1u8, 2u8].into_boxed_slice();
        let deltas = vec![0isize, 0, 0x1000].into_boxed_slice();
        let info = GlobalInfo::new(0, 2, 0x10000, 0x1000, true, local_pes, deltas);
        assert_eq!(info.local_index(1), 2);
        assert_eq!(info.adjust(0x10040, 2), 0x11040);
    }

    #[test]
    fn test_predefined_teams_cover_world() {
        let info = GlobalInfo::for_tests(1, 4, 0, 0x1000);
        for id in [TEAM_WORLD, TEAM_SHARED, TEAM_NODE] {
            let team = info.team(id).unwrap();
            assert_eq!(team.size(), 4);
            assert_eq!(team.my_pe(), 1);
        }
        assert!(info.team(99).is_none());
    }

    #[test]
    fn test_split_team_install_remove() {
        let info = GlobalInfo::for_tests(0, 4, 0, 0x1000);
        let id = info.install_team(Team::new(0, 2, 2, 0));
        assert_eq!(info.team(id).unwrap().size(), 2);
        info.remove_team(id);
        assert!(info.team(id).is_none());
        // Predefined teams cannot be removed.
        info.remove_team(TEAM_WORLD);
        assert!(info.team(TEAM_WORLD).is_some());
    }

    #[test]
    fn test_message_slot_claim_and_take() {
        let info = GlobalInfo::for_tests(0, 1, 0, 0x1000);
        let index = info.claim_message("hello from the device").unwrap();
        assert_eq!(info.message(index).take(), "hello from the device");
        // Released slot is claimable again.
        let again = info.claim_message("second").unwrap();
        assert_eq!(info.message(again).take(), "second");
    }
}
