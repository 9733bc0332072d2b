#[rustfmt::skip]
use {
    crate::error::{Error, Result},
    crate::process::ProcessId,
    procfs::process::{MMapPath, MemoryMap, MemoryMaps, Process as LinuxProcess},
    procfs::{FromBufRead, ProcError},
    std::fmt,
    std::io::{self, BufRead},
    tracing::debug,
};

/// Half-open address range `[start, end)` of a mapping in a target process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySegment {
    start: u64,
    end: u64,
}

impl MemorySegment {
    /// Creates a segment, `None` unless `start < end`
    pub fn new(start: u64, end: u64) -> Option<MemorySegment> {
        if start < end {
            Some(MemorySegment { start, end })
        } else {
            None
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always false, a segment spans at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Finds the total address of an offset into the segment
    pub fn absolute_address(&self, offset: u64) -> Option<u64> {
        let total = self.start.checked_add(offset)?;
        if total > self.end {
            return None;
        }
        Some(total)
    }
}

impl fmt::Display for MemorySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// Reads `/proc/<pid>/maps` and returns the bounds of the `[heap]` mapping
pub fn locate_heap(pid: ProcessId) -> Result<MemorySegment> {
    let process = LinuxProcess::new(pid.as_raw()).map_err(|err| maps_error(pid, err))?;
    let maps = process.maps().map_err(|err| maps_error(pid, err))?;
    let segment = heap_segment_from_maps(pid, maps)?;
    debug!("Heap of process {} spans {}", pid, segment);
    Ok(segment)
}

/// Parses a maps listing from any reader and returns its heap bounds
pub fn parse_heap_segment<R: BufRead>(pid: ProcessId, reader: R) -> Result<MemorySegment> {
    let maps = MemoryMaps::from_buf_read(reader).map_err(|err| maps_error(pid, err))?;
    heap_segment_from_maps(pid, maps)
}

/// Picks the first mapping labeled `[heap]`
pub fn heap_segment_from_maps<I>(pid: ProcessId, maps: I) -> Result<MemorySegment>
where
    I: IntoIterator<Item = MemoryMap>,
{
    let map = maps
        .into_iter()
        .find(|map| map.pathname == MMapPath::Heap)
        .ok_or(Error::SegmentNotFound { pid: pid.as_raw() })?;
    let (start, end) = map.address;
    MemorySegment::new(start, end).ok_or_else(|| Error::ReadFailure {
        pid: pid.as_raw(),
        resource: "maps",
        source: io::Error::new(
            io::ErrorKind::InvalidData,
            format!("heap range {:#x}-{:#x} is empty", start, end),
        ),
    })
}

fn maps_error(pid: ProcessId, err: ProcError) -> Error {
    let pid = pid.as_raw();
    match err {
        ProcError::NotFound(_) => Error::ProcessNotFound { pid },
        ProcError::PermissionDenied(_) => Error::AccessDenied {
            pid,
            resource: "maps",
        },
        ProcError::Io(source, _) => Error::ReadFailure {
            pid,
            resource: "maps",
            source,
        },
        other => Error::ReadFailure {
            pid,
            resource: "maps",
            source: io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        },
    }
}
