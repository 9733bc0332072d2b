#[rustfmt::skip]
use {
    crate::error::{Error, Result},
    nix::errno::Errno,
    nix::libc::off_t,
    nix::sys::uio,
    nix::unistd,
    std::fmt,
    std::fs::{File, OpenOptions},
    std::io,
    std::str::FromStr,
    sysinfo::{Pid as SysPid, System},
    tracing::{debug, trace},
};

pub use segment::*;

pub mod segment;

/// Identifier of a live process, always positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(i32);

impl ProcessId {
    pub fn new(raw: i32) -> Result<ProcessId> {
        if raw <= 0 {
            return Err(Error::invalid_argument("PID must be a positive integer"));
        }
        Ok(ProcessId(raw))
    }

    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<ProcessId> {
        let raw = s
            .trim()
            .parse::<i32>()
            .map_err(|_| Error::invalid_argument("PID must be a positive integer"))?;
        ProcessId::new(raw)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks whether a process with this id is currently running
pub fn process_exists(pid: ProcessId) -> bool {
    let mut system = System::new();
    system.refresh_process(SysPid::from(pid.as_raw() as usize))
}

/// Writing into foreign processes generally needs an effective uid of 0
pub fn is_privileged() -> bool {
    unistd::geteuid().is_root()
}

/// Access to the address space of other processes.
///
/// Every call opens and closes its own handles, nothing is cached between calls.
pub trait MemoryAccess {
    /// Finds the heap segment of the process
    fn locate_heap(&self, pid: ProcessId) -> Result<MemorySegment>;

    /// Reads `[start, end)`, the result is only shorter if the range ends early
    fn read_range(&self, pid: ProcessId, start: u64, end: u64) -> Result<Vec<u8>>;

    /// Writes all of `data` starting at `address`
    fn write_at(&self, pid: ProcessId, address: u64, data: &[u8]) -> Result<()>;
}

/// Kernel backed access through `/proc/<pid>/maps` and `/proc/<pid>/mem`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemory;

impl ProcMemory {
    pub fn new() -> ProcMemory {
        ProcMemory
    }
}

impl MemoryAccess for ProcMemory {
    fn locate_heap(&self, pid: ProcessId) -> Result<MemorySegment> {
        segment::locate_heap(pid)
    }

    fn read_range(&self, pid: ProcessId, start: u64, end: u64) -> Result<Vec<u8>> {
        let read_error = |source: io::Error| Error::ReadFailure {
            pid: pid.as_raw(),
            resource: "mem",
            source,
        };
        if end < start {
            return Err(read_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range {:#x}-{:#x} is inverted", start, end),
            )));
        }
        let len = usize::try_from(end - start)
            .map_err(|err| read_error(io::Error::new(io::ErrorKind::InvalidInput, err)))?;

        let file = open_mem(pid, false, read_error)?;
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let offset = to_offset(start + filled as u64).map_err(read_error)?;
            match uio::pread(&file, &mut buffer[filled..], offset) {
                Ok(0) => {
                    debug!(
                        "Read of process {} stopped at {:#x}, {} of {} bytes",
                        pid,
                        start + filled as u64,
                        filled,
                        len
                    );
                    break;
                }
                Ok(count) => {
                    trace!("Read {} bytes at {:#x}", count, start + filled as u64);
                    filled += count;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EACCES) | Err(Errno::EPERM) => {
                    return Err(Error::AccessDenied {
                        pid: pid.as_raw(),
                        resource: "mem",
                    })
                }
                Err(errno) => return Err(read_error(io::Error::from(errno))),
            }
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    fn write_at(&self, pid: ProcessId, address: u64, data: &[u8]) -> Result<()> {
        let write_error = |address: u64, source: io::Error| Error::WriteFailure {
            pid: pid.as_raw(),
            address,
            source,
        };

        let file = open_mem(pid, true, |source| write_error(address, source))?;
        let mut written = 0;
        while written < data.len() {
            let at = address + written as u64;
            let offset = to_offset(at).map_err(|err| write_error(at, err))?;
            match uio::pwrite(&file, &data[written..], offset) {
                Ok(0) => {
                    return Err(write_error(
                        at,
                        io::Error::new(
                            io::ErrorKind::WriteZero,
                            format!("short write, {} of {} bytes", written, data.len()),
                        ),
                    ))
                }
                Ok(count) => {
                    trace!("Wrote {} bytes at {:#x}", count, at);
                    written += count;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EACCES) | Err(Errno::EPERM) => {
                    return Err(Error::AccessDenied {
                        pid: pid.as_raw(),
                        resource: "mem",
                    })
                }
                Err(errno) => return Err(write_error(at, io::Error::from(errno))),
            }
        }
        Ok(())
    }
}

/// Opens the memory image, the handle is closed when dropped
fn open_mem<F>(pid: ProcessId, write: bool, otherwise: F) -> Result<File>
where
    F: FnOnce(io::Error) -> Error,
{
    OpenOptions::new()
        .read(true)
        .write(write)
        .open(format!("/proc/{}/mem", pid))
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => Error::ProcessNotFound { pid: pid.as_raw() },
            io::ErrorKind::PermissionDenied => Error::AccessDenied {
                pid: pid.as_raw(),
                resource: "mem",
            },
            _ if source.raw_os_error() == Some(Errno::ESRCH as i32) => {
                Error::ProcessNotFound { pid: pid.as_raw() }
            }
            _ => otherwise(source),
        })
}

fn to_offset(address: u64) -> io::Result<off_t> {
    off_t::try_from(address).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("address {:#x} is out of range", address),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn own_pid() -> ProcessId {
        ProcessId::new(std::process::id() as i32).unwrap()
    }

    #[test]
    fn test_process_id_parsing() {
        assert_eq!("42".parse::<ProcessId>().unwrap().as_raw(), 42);
        assert_eq!(" 7 ".parse::<ProcessId>().unwrap().as_raw(), 7);
        for bad in &["0", "-5", "abc", "", "1.5", "99999999999"] {
            let err = bad.parse::<ProcessId>().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "input {:?}", bad);
        }
    }

    #[test]
    fn test_process_exists() {
        assert!(process_exists(own_pid()));
        assert!(!process_exists(ProcessId::new(i32::MAX).unwrap()));
    }

    #[test]
    fn test_read_own_memory() {
        let buffer = std::hint::black_box(b"hello-world".to_vec());
        let start = buffer.as_ptr() as u64;
        let end = start + buffer.len() as u64;
        let read = ProcMemory::new().read_range(own_pid(), start, end).unwrap();
        assert_eq!(read, b"hello-world");
    }

    #[test]
    fn test_write_then_read_own_memory() {
        let mut buffer = std::hint::black_box(b"secret-data".to_vec());
        let address = buffer.as_mut_ptr() as u64;
        let memory = ProcMemory::new();

        memory.write_at(own_pid(), address, b"x\0\0\0\0\0").unwrap();
        let read = memory.read_range(own_pid(), address, address + 6).unwrap();
        assert_eq!(read, b"x\0\0\0\0\0");

        let contents: Vec<u8> = (0..buffer.len())
            .map(|i| unsafe { std::ptr::read_volatile(buffer.as_ptr().add(i)) })
            .collect();
        assert_eq!(contents, b"x\0\0\0\0\0-data");
    }

    #[test]
    fn test_read_unmapped_memory_fails() {
        // The zero page is never mapped
        let err = ProcMemory::new().read_range(own_pid(), 0, 16).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
    }

    #[test]
    fn test_write_unmapped_memory_fails() {
        let err = ProcMemory::new()
            .write_at(own_pid(), 0, b"data")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailure);
    }

    #[test]
    fn test_missing_process() {
        let pid = ProcessId::new(i32::MAX).unwrap();
        let memory = ProcMemory::new();
        assert_eq!(
            memory.read_range(pid, 0x1000, 0x2000).unwrap_err().kind(),
            ErrorKind::ProcessNotFound
        );
        assert_eq!(
            memory.write_at(pid, 0x1000, b"x").unwrap_err().kind(),
            ErrorKind::ProcessNotFound
        );
    }

    #[test]
    fn test_empty_range() {
        let buffer = std::hint::black_box(vec![1u8; 4]);
        let start = buffer.as_ptr() as u64;
        let read = ProcMemory::new().read_range(own_pid(), start, start).unwrap();
        assert!(read.is_empty());
    }
}
