//! Collective communication and funneling of file access through a single I/O process.
//!
//! Truth-level data may be distributed over several processes. Every process takes part in the
//! same sequence of collective calls, but only the I/O process touches the file system; its
//! results are broadcast so that all processes observe the same state.
use eyre::eyre;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// The collective operations required from a process group.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Replaces `bytes` on every process with the contents of `bytes` on `root`.
    fn broadcast_bytes(&self, root: usize, bytes: &mut Vec<u8>);

    /// Sums `values` entrywise over all processes, leaving the result on every process.
    fn all_reduce_sum(&self, values: &mut [f64]);

    fn barrier(&self);
}

/// A process group consisting of the current process only.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, _root: usize, _bytes: &mut Vec<u8>) {}

    fn all_reduce_sum(&self, _values: &mut [f64]) {}

    fn barrier(&self) {}
}

#[cfg(feature = "mpi")]
mod mpi_impl {
    use super::Communicator;
    use mpi::collective::SystemOperation;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{Communicator as MpiCommunicator, CommunicatorCollectives, Root};

    impl Communicator for SimpleCommunicator {
        fn rank(&self) -> usize {
            MpiCommunicator::rank(self) as usize
        }

        fn size(&self) -> usize {
            MpiCommunicator::size(self) as usize
        }

        fn broadcast_bytes(&self, root: usize, bytes: &mut Vec<u8>) {
            let root_process = self.process_at_rank(root as i32);
            let mut len = bytes.len() as u64;
            root_process.broadcast_into(&mut len);
            bytes.resize(len as usize, 0);
            root_process.broadcast_into(&mut bytes[..]);
        }

        fn all_reduce_sum(&self, values: &mut [f64]) {
            let send = values.to_vec();
            self.all_reduce_into(&send[..], values, SystemOperation::sum());
        }

        fn barrier(&self) {
            CommunicatorCollectives::barrier(self);
        }
    }
}

/// The designated I/O process of a process group.
///
/// Replaces per-process printing and file access: closures passed to [`IoProcess::run`] are
/// only executed on the I/O rank and their result is broadcast to all ranks.
#[derive(Clone, Copy)]
pub struct IoProcess<'a> {
    comm: &'a dyn Communicator,
    root: usize,
}

impl fmt::Debug for IoProcess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoProcess")
            .field("rank", &self.comm.rank())
            .field("size", &self.comm.size())
            .field("root", &self.root)
            .finish()
    }
}

impl IoProcess<'static> {
    pub fn serial() -> Self {
        Self {
            comm: &SerialCommunicator,
            root: 0,
        }
    }
}

impl<'a> IoProcess<'a> {
    pub fn new(comm: &'a dyn Communicator, root: usize) -> Self {
        assert!(root < comm.size(), "I/O root must be a valid rank.");
        Self { comm, root }
    }

    pub fn communicator(&self) -> &'a dyn Communicator {
        self.comm
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn is_io_process(&self) -> bool {
        self.comm.rank() == self.root
    }

    /// Runs `f` on the I/O process and broadcasts its result (or error message) to all processes.
    pub fn run<R, F>(&self, f: F) -> eyre::Result<R>
    where
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> eyre::Result<R>,
    {
        if self.comm.size() == 1 {
            return f();
        }

        if self.is_io_process() {
            let result = f();
            let shared: Result<&R, String> = result.as_ref().map_err(|err| format!("{:#}", err));
            let mut bytes = serde_json::to_vec(&shared)?;
            self.comm.broadcast_bytes(self.root, &mut bytes);
            result
        } else {
            let mut bytes = Vec::new();
            self.comm.broadcast_bytes(self.root, &mut bytes);
            let shared: Result<R, String> = serde_json::from_slice(&bytes)?;
            shared.map_err(|msg| eyre!("I/O process failed: {}", msg))
        }
    }

    /// Checks on the I/O process whether `path` exists.
    pub fn file_exists(&self, path: &Path) -> eyre::Result<bool> {
        self.run(|| Ok(path.exists()))
    }

    /// Emits a log record on the I/O process only.
    pub fn log(&self, level: log::Level, args: fmt::Arguments) {
        if self.is_io_process() {
            log::log!(level, "{}", args);
        }
    }
}
