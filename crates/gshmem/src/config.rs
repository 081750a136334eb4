//! Library attributes: defaults, environment overrides, clamping.

use crate::runtime::RuntimeKind;

/// Lower clamp for the diagnostic stack-trace depth.
pub const STACK_PRINT_MIN: usize = 10;
/// Upper clamp for the diagnostic stack-trace depth.
pub const STACK_PRINT_MAX: usize = 50;

/// Initialization attributes.
///
/// Populated from defaults, then from the environment via
/// [`Attr::from_env`]:
///
/// - `GSHMEM_RUNTIME` — `mpi` (default), `openshmem`, `pmi`, or `local`
/// - `GSHMEM_INITIALIZE_RUNTIME` — bootstrap the underlying runtime or
///   adopt an already-initialized one (default true)
/// - `GSHMEM_GPU` — whether operations target a device (default true);
///   when false, every call dispatches directly in the caller
/// - `GSHMEM_ENABLE_IPC` — allow the intra-node fast path (default true)
/// - `GSHMEM_ERROR_CHECKING` — validate arguments at every entry point
/// - `GSHMEM_STACK_PRINT_LIMIT` — diagnostic backtrace depth, clamped to
///   `[10, 50]`
/// - `GSHMEM_HEAP_LENGTH` — symmetric heap bytes per PE
#[derive(Debug, Clone)]
pub struct Attr {
    pub runtime: RuntimeKind,
    pub initialize_runtime: bool,
    pub gpu: bool,
    pub enable_ipc: bool,
    pub error_checking: bool,
    pub stack_print_limit: usize,
    pub heap_length: usize,
}

impl Default for Attr {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Mpi,
            initialize_runtime: true,
            gpu: true,
            enable_ipc: true,
            error_checking: cfg!(debug_assertions),
            stack_print_limit: 20,
            heap_length: 1 << 20,
        }
    }
}

impl Attr {
    /// Defaults overridden by whatever is present in the environment.
    pub fn from_env() -> Self {
        let mut attr = Self::default();
        if let Some(kind) = env_str("GSHMEM_RUNTIME").and_then(|s| s.parse().ok()) {
            attr.runtime = kind;
        }
        if let Some(v) = env_bool("GSHMEM_INITIALIZE_RUNTIME") {
            attr.initialize_runtime = v;
        }
        if let Some(v) = env_bool("GSHMEM_GPU") {
            attr.gpu = v;
        }
        if let Some(v) = env_bool("GSHMEM_ENABLE_IPC") {
            attr.enable_ipc = v;
        }
        if let Some(v) = env_bool("GSHMEM_ERROR_CHECKING") {
            attr.error_checking = v;
        }
        if let Some(v) = env_str("GSHMEM_STACK_PRINT_LIMIT").and_then(|s| s.parse::<usize>().ok()) {
            attr.stack_print_limit = v;
        }
        if let Some(v) = env_str("GSHMEM_HEAP_LENGTH").and_then(|s| s.parse::<usize>().ok()) {
            attr.heap_length = v;
        }
        attr.clamped()
    }

    /// Enforce attribute bounds.
    pub fn clamped(mut self) -> Self {
        self.stack_print_limit = self.stack_print_limit.clamp(STACK_PRINT_MIN, STACK_PRINT_MAX);
        self
    }

    /// Builder-style runtime selection.
    pub fn with_runtime(mut self, kind: RuntimeKind) -> Self {
        self.runtime = kind;
        self
    }

    /// Builder-style fast-path control.
    pub fn with_ipc(mut self, enable: bool) -> Self {
        self.enable_ipc = enable;
        self
    }

    /// Builder-style device-mode control.
    pub fn with_gpu(mut self, gpu: bool) -> Self {
        self.gpu = gpu;
        self
    }

    /// Builder-style heap sizing.
    pub fn with_heap_length(mut self, bytes: usize) -> Self {
        self.heap_length = bytes;
        self
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name).map(|s| {
        matches!(
            s.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
