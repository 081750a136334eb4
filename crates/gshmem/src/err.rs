//! Error taxonomy, argument validation, and the fatal-diagnostic path.
//!
//! Validation is bracketed by `Attr::error_checking`: when enabled, every
//! entry point validates its arguments before any ring interaction; when
//! disabled the core trusts its callers. Errors classified as fatal surface
//! through a diagnostic printer (message plus an optional stack trace
//! clamped to the configured depth) followed by `Runtime::abort`.

use thiserror::Error;

use crate::info::GlobalInfo;
use crate::record::{BaseType, Op};
use crate::runtime::Runtime;

/// Everything that can go wrong beneath the public API.
#[derive(Debug, Clone, Error)]
pub enum ShmemError {
    #[error("library is not initialized")]
    Uninitialized,

    #[error("invalid PE {pe} (valid range 0..{n_pes})")]
    InvalidPe { pe: i32, n_pes: i32 },

    #[error("address {addr:#x} is not in the device symmetric heap")]
    NotSymmetric { addr: usize },

    #[error("object at {addr:#x} spanning {size} bytes exceeds the symmetric heap")]
    ExceedsHeap { addr: usize, size: usize },

    #[error("source and destination overlap on the issuing PE")]
    Overlap,

    #[error("invalid stride {stride} for block size {bsize}")]
    InvalidStride { stride: isize, bsize: usize },

    #[error("operation {op:?} is unsupported for type {base:?}")]
    Unsupported { op: Op, base: BaseType },

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, ShmemError>;

pub(crate) fn validate_initialized(info: &GlobalInfo) -> Result<()> {
    if info.is_initialized() {
        Ok(())
    } else {
        Err(ShmemError::Uninitialized)
    }
}

pub(crate) fn validate_pe(info: &GlobalInfo, pe: i32) -> Result<()> {
    if pe < 0 || pe >= info.n_pes() {
        return Err(ShmemError::InvalidPe {
            pe,
            n_pes: info.n_pes(),
        });
    }
    Ok(())
}

/// The object must lie entirely within the symmetric heap. Zero-sized
/// objects are accepted unchecked.
pub(crate) fn validate_symmetric(info: &GlobalInfo, addr: usize, size: usize) -> Result<()> {
    if size == 0 {
        return Ok(());
    }
    let (lo_heap, len) = info.heap_bounds();
    let hi_heap = lo_heap + len - 1;
    let hi = addr + size - 1;
    if addr < lo_heap || addr > hi_heap {
        return Err(ShmemError::NotSymmetric { addr });
    }
    if hi > hi_heap {
        return Err(ShmemError::ExceedsHeap { addr, size });
    }
    Ok(())
}

/// Overlap is fatal only on the issuing PE; remote overlap is unchecked.
pub(crate) fn validate_no_overlap(
    info: &GlobalInfo,
    pe: i32,
    a: usize,
    size_a: usize,
    b: usize,
    size_b: usize,
) -> Result<()> {
    if pe != info.my_pe() || size_a == 0 || size_b == 0 {
        return Ok(());
    }
    let hi_a = a + size_a - 1;
    let hi_b = b + size_b - 1;
    if a <= hi_b && b <= hi_a {
        return Err(ShmemError::Overlap);
    }
    Ok(())
}

pub(crate) fn validate_stride(stride: isize, bsize: usize) -> Result<()> {
    if stride <= 0 || (stride as usize) < bsize {
        return Err(ShmemError::InvalidStride { stride, bsize });
    }
    Ok(())
}

/// Print the diagnostic (with a clamped backtrace) and abort through the
/// runtime. Never returns.
pub(crate) fn fatal(runtime: &dyn Runtime, stack_print_limit: usize, err: &ShmemError) -> ! {
    tracing::error!(%err, "fatal error");
    let backtrace = std::backtrace::Backtrace::force_capture().to_string();
    for line in backtrace.lines().take(stack_print_limit) {
        tracing::error!(target: "gshmem::backtrace", "{line}");
    }
    runtime.abort(1, &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::GlobalInfo;

    fn test_info() -> GlobalInfo {
        GlobalInfo::for_tests(0, 2, 0x10000, 0x1000)
    }

    #[test]
    fn test_pe_range() {
        let info = test_info();
        assert!(validate_pe(&info, 0).is_ok());
        assert!(validate_pe(&info, 1).is_ok());
        assert!(matches!(
            validate_pe(&info, 2),
            Err(ShmemError::InvalidPe { pe: 2, n_pes: 2 })
        ));
        assert!(validate_pe(&info, -1).is_err());
    }

    #[test]
    fn test_symmetric_bounds() {
        let info = test_info();
        assert!(validate_symmetric(&info, 0x10000, 16).is_ok());
        assert!(validate_symmetric(&info, 0x10ff0, 16).is_ok());
        assert!(matches!(
            validate_symmetric(&info, 0x10ff8, 16),
            Err(ShmemError::ExceedsHeap { .. })
        ));
        assert!(matches!(
            validate_symmetric(&info, 0x500, 8),
            Err(ShmemError::NotSymmetric { .. })
        ));
        // Zero-length objects never fail validation.
        assert!(validate_symmetric(&info, 0x500, 0).is_ok());
    }

    #[test]
    fn test_overlap_only_on_issuing_pe() {
        let info = test_info();
        assert!(matches!(
            validate_no_overlap(&info, 0, 0x100, 32, 0x110, 32),
            Err(ShmemError::Overlap)
        ));
        // Same ranges targeting a remote PE are unchecked.
        assert!(validate_no_overlap(&info, 1, 0x100, 32, 0x110, 32).is_ok());
        // Adjacent but disjoint is fine.
        assert!(validate_no_overlap(&info, 0, 0x100, 16, 0x110, 16).is_ok());
    }

    #[test]
    fn test_stride() {
        assert!(validate_stride(4, 4).is_ok());
        assert!(validate_stride(8, 4).is_ok());
        assert!(validate_stride(0, 1).is_err());
        assert!(validate_stride(-1, 1).is_err());
        assert!(validate_stride(2, 4).is_err());
    }
}
