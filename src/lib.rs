//! Find and replace a byte string in the heap of a running Linux process.
//!
//! The heap bounds come from `/proc/<pid>/maps`, its contents are read from and
//! written back to `/proc/<pid>/mem`. Replacements never change the length of
//! the patched bytes: shorter ones are padded with zero bytes.

#[cfg(not(target_os = "linux"))]
compile_error!("rwheap needs /proc/<pid>/maps and /proc/<pid>/mem and only builds on Linux");

pub mod common;
pub mod error;
pub mod patch;
pub mod process;

pub use error::{Error, ErrorKind, Result};
pub use patch::{patch_heap, HeapPatcher, PatchReport, PatchRequest, PatchStage};
pub use process::{MemoryAccess, MemorySegment, ProcMemory, ProcessId};
