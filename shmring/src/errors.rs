use std::{fmt, io};

#[derive(Debug)]
pub enum RingError {
    SharedMemory(shared_memory::ShmemError),
    Lock(Box<dyn std::error::Error + 'static>),
    Semaphore(io::Error),
    Io(io::Error),
    Invariant(String),
    Interrupted,
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::SharedMemory(e) => write!(f, "Shared memory error: {}", e),
            RingError::Lock(e) => write!(f, "Lock error: {}", e),
            RingError::Semaphore(e) => write!(f, "Semaphore error: {}", e),
            RingError::Io(e) => write!(f, "IO error: {}", e),
            RingError::Invariant(s) => write!(f, "Invariant violation: {}", s),
            RingError::Interrupted => write!(f, "Interrupted by shutdown signal"),
        }
    }
}

impl std::error::Error for RingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RingError::SharedMemory(e) => Some(e),
            RingError::Lock(e) => Some(e.as_ref()),
            RingError::Semaphore(e) => Some(e),
            RingError::Io(e) => Some(e),
            RingError::Invariant(_) => None,
            RingError::Interrupted => None,
        }
    }
}

impl From<shared_memory::ShmemError> for RingError {
    fn from(err: shared_memory::ShmemError) -> Self {
        RingError::SharedMemory(err)
    }
}

impl From<io::Error> for RingError {
    fn from(err: io::Error) -> Self {
        RingError::Io(err)
    }
}
