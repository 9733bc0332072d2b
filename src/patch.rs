//! Search-and-replace of a byte string inside the heap of a running process.
//!
//! The patch is a single pass: locate the heap, read it once, find the first
//! occurrence of the search string and overwrite it once. Nothing is retried.
//!
//! The target keeps running while this happens. It may move or overwrite the
//! matched bytes between the read and the write, and the write lands at the
//! address the bytes had at read time regardless. The target is not stopped
//! for the duration of the patch.

#[rustfmt::skip]
use {
    crate::common,
    crate::error::{Error, ErrorKind, Result},
    crate::process::{MemoryAccess, MemorySegment, ProcMemory, ProcessId},
    std::cell::Cell,
    std::fmt,
    std::io,
    tracing::{debug, info},
};

/// A validated request to replace `search` with `replace` in the heap of `pid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pid: ProcessId,
    search: Vec<u8>,
    replace: Vec<u8>,
    verify: bool,
}

impl PatchRequest {
    /// Fails with `InvalidArgument` if `replace` is longer than `search`
    pub fn new(pid: ProcessId, search: Vec<u8>, replace: Vec<u8>) -> Result<PatchRequest> {
        check_lengths(&search, &replace)?;
        Ok(PatchRequest {
            pid,
            search,
            replace,
            verify: false,
        })
    }

    /// Re-read the patched bytes after writing and compare them
    pub fn verify(mut self, verify: bool) -> PatchRequest {
        self.verify = verify;
        self
    }
}

/// Progress of one patch, a failing stage jumps straight to `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStage {
    Start,
    SegmentLocated,
    Read,
    Matched,
    Patched,
    Done,
    Failed(ErrorKind),
}

impl fmt::Display for PatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchStage::Start => f.write_str("start"),
            PatchStage::SegmentLocated => f.write_str("segment located"),
            PatchStage::Read => f.write_str("read"),
            PatchStage::Matched => f.write_str("matched"),
            PatchStage::Patched => f.write_str("patched"),
            PatchStage::Done => f.write_str("done"),
            PatchStage::Failed(kind) => write!(f, "failed ({:?})", kind),
        }
    }
}

/// Where a successful patch landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub pid: ProcessId,
    pub segment: MemorySegment,
    pub offset: u64,
    pub address: u64,
    pub written: Vec<u8>,
}

impl fmt::Display for PatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Patched {} bytes at {:#x} (heap offset {:#x}) in process {}",
            self.written.len(),
            self.address,
            self.offset,
            self.pid
        )
    }
}

/// Drives one patch against any memory backend
pub struct HeapPatcher<M> {
    memory: M,
    stage: Cell<PatchStage>,
}

impl<M: MemoryAccess> HeapPatcher<M> {
    pub fn new(memory: M) -> HeapPatcher<M> {
        HeapPatcher {
            memory,
            stage: Cell::new(PatchStage::Start),
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Where the last patch ended, `Done` or `Failed` once it returned
    pub fn stage(&self) -> PatchStage {
        self.stage.get()
    }

    /// Runs the whole patch, writing only if every earlier stage succeeded
    pub fn patch(&self, request: &PatchRequest) -> Result<PatchReport> {
        self.stage.set(PatchStage::Start);
        match self.run(request) {
            Ok(report) => {
                self.advance(PatchStage::Done);
                info!("{}", report);
                Ok(report)
            }
            Err(err) => {
                debug!(
                    "Patch of process {} failed after stage {}: {}",
                    request.pid,
                    self.stage(),
                    err
                );
                self.advance(PatchStage::Failed(err.kind()));
                Err(err)
            }
        }
    }

    fn run(&self, request: &PatchRequest) -> Result<PatchReport> {
        let pid = request.pid;
        let padded = check_lengths(&request.search, &request.replace)?;

        let segment = self.memory.locate_heap(pid)?;
        self.advance(PatchStage::SegmentLocated);

        let heap = self
            .memory
            .read_range(pid, segment.start(), segment.end())?;
        debug!(
            "Read {} of {} heap bytes from process {}",
            heap.len(),
            segment.len(),
            pid
        );
        self.advance(PatchStage::Read);

        let offset = common::find_pattern(&heap, &request.search).ok_or_else(|| {
            Error::PatternNotFound {
                pid: pid.as_raw(),
                pattern: request.search.clone(),
            }
        })?;
        drop(heap);
        let offset = offset as u64;
        // The match lies inside the bytes read, which never exceed the segment
        let address = segment
            .absolute_address(offset)
            .ok_or_else(|| Error::ReadFailure {
                pid: pid.as_raw(),
                resource: "mem",
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("match at offset {:#x} lies outside heap {}", offset, segment),
                ),
            })?;
        debug!("Match at heap offset {:#x}, address {:#x}", offset, address);
        self.advance(PatchStage::Matched);

        self.memory.write_at(pid, address, &padded)?;
        self.advance(PatchStage::Patched);

        if request.verify {
            let found = self
                .memory
                .read_range(pid, address, address + padded.len() as u64)?;
            if found != padded {
                return Err(Error::VerificationFailed {
                    pid: pid.as_raw(),
                    address,
                    expected: padded,
                    found,
                });
            }
            debug!("Verified {} bytes at {:#x}", padded.len(), address);
        }

        Ok(PatchReport {
            pid,
            segment,
            offset,
            address,
            written: padded,
        })
    }

    fn advance(&self, next: PatchStage) {
        debug!("Patch stage {} -> {}", self.stage(), next);
        self.stage.set(next);
    }
}

/// Patches the heap of a live process through `/proc`
pub fn patch_heap(request: &PatchRequest) -> Result<PatchReport> {
    HeapPatcher::new(ProcMemory::new()).patch(request)
}

fn check_lengths(search: &[u8], replace: &[u8]) -> Result<Vec<u8>> {
    common::pad_replacement(replace, search.len()).ok_or_else(|| {
        Error::invalid_argument(format!(
            "Replacement string too long ({} > {})",
            replace.len(),
            search.len()
        ))
    })
}
