//! The runtime plug-in contract.
//!
//! The underlying transport (bootstrap, symmetric memory, host collectives,
//! ordering) is abstracted behind [`Runtime`]. Proxy handlers that target
//! non-local PEs delegate to these methods; the in-tree [`local`] backend
//! renders a single node with PE threads.

mod local;

pub use local::{LocalRuntime, LocalWorld};

use std::str::FromStr;

use crate::err::Result;

/// Selects the transport backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Mpi,
    OpenShmem,
    Pmi,
    /// In-process single-node backend (PE threads).
    Local,
}

impl FromStr for RuntimeKind {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.to_ascii_lowercase().as_str() {
            "mpi" => Ok(RuntimeKind::Mpi),
            "openshmem" => Ok(RuntimeKind::OpenShmem),
            "pmi" => Ok(RuntimeKind::Pmi),
            "local" => Ok(RuntimeKind::Local),
            _ => Err(()),
        }
    }
}

/// Identifies a team to the runtime.
pub type RuntimeTeam = i32;

/// Transport contract consumed by the core.
///
/// One instance per PE. Collective methods must be entered by every member
/// PE; addresses are raw because they may point into the symmetric heap or
/// into host scratch memory.
pub trait Runtime: Send + Sync {
    /// Tear down the transport. Called once from finalize.
    fn fini(&self);

    // --- Query APIs ---
    fn get_rank(&self) -> i32;
    fn get_size(&self) -> i32;
    /// Node-local rank of `pe`, or -1 when `pe` is on another node.
    fn get_node_rank(&self, pe: i32) -> i32;
    fn get_node_size(&self) -> i32;
    fn is_local(&self, pe: i32) -> bool;
    fn is_symmetric_address(&self, addr: usize) -> bool;

    // --- Memory APIs (collective) ---
    /// Create this PE's symmetric heap; returns its base address.
    fn heap_create(&self, length: usize) -> Result<usize>;
    fn malloc(&self, size: usize) -> Result<usize>;
    fn calloc(&self, count: usize, size: usize) -> Result<usize>;
    fn free(&self, addr: usize);

    // --- Team APIs ---
    fn team_sync(&self, team: RuntimeTeam);
    fn team_predefined_set(&self, team: RuntimeTeam);
    fn team_split_strided(&self, parent: RuntimeTeam, start: i32, stride: i32, size: i32)
        -> RuntimeTeam;
    fn team_destroy(&self, team: RuntimeTeam);

    // --- Bulk collectives ---
    /// Replicate root's `nbytes` at `addr` into every PE's `addr`.
    fn bcast(&self, addr: usize, nbytes: usize, root: i32);
    fn node_bcast(&self, addr: usize, nbytes: usize, root: i32);
    /// Concatenate every PE's `nbytes` at `src` into each PE's `dst`.
    fn fcollect(&self, dst: usize, src: usize, nbytes: usize);
    fn node_fcollect(&self, dst: usize, src: usize, nbytes: usize);
    fn barrier_all(&self);
    fn node_barrier(&self);

    // --- Ordering ---
    fn fence(&self);
    fn quiet(&self);
    fn sync(&self);

    // --- Internal reductions ---
    fn uchar_and_reduce(&self, team: RuntimeTeam, dst: &mut [u8], src: &[u8]);
    fn int_max_reduce(&self, team: RuntimeTeam, dst: &mut [i32], src: &[i32]);

    /// Blocking progress on the transport.
    fn progress(&self);

    /// Terminate the program with a diagnostic. Never returns.
    fn abort(&self, status: i32, msg: &str) -> !;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!("mpi".parse::<RuntimeKind>().unwrap(), RuntimeKind::Mpi);
        assert_eq!("MPI".parse::<RuntimeKind>().unwrap(), RuntimeKind::Mpi);
        assert_eq!(
            "openshmem".parse::<RuntimeKind>().unwrap(),
            RuntimeKind::OpenShmem
        );
        assert_eq!("pmi".parse::<RuntimeKind>().unwrap(), RuntimeKind::Pmi);
        assert_eq!("local".parse::<RuntimeKind>().unwrap(), RuntimeKind::Local);
        assert!("fabric".parse::<RuntimeKind>().is_err());
    }
}
