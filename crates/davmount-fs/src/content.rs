//! In-memory file content.
//!
//! A file's full content lives in its node once it has been read or staged
//! for writing. [`ContentBuffer`] applies reads, writes and size changes to
//! that buffer and keeps the node's `file_size` and `allocation_size` in step
//! with it.
//!
//! The vector length is the logical file size. The allocation size is
//! bookkeeping reported to the host; growing it reserves capacity so that an
//! allocation failure surfaces as `InsufficientResources` instead of an abort.

use davmount_cache::NodeState;
use davmount_cache::node::round_allocation;

use crate::error::{FsError, FsResult};

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    /// Offset the bytes were written at (the old size for append writes).
    pub offset: u64,
    pub transferred: u64,
}

/// Mutable view over a node's content buffer.
///
/// Creating the view materializes an empty buffer when the node has none,
/// so callers must load remote content first for files that are not empty.
pub struct ContentBuffer<'a> {
    state: &'a mut NodeState,
    max_file_size: u64,
}

impl<'a> ContentBuffer<'a> {
    pub fn new(state: &'a mut NodeState, max_file_size: u64) -> Self {
        if state.content.is_none() {
            state.content = Some(Vec::new());
            state.info.file_size = 0;
        }
        Self {
            state,
            max_file_size,
        }
    }

    fn data(&self) -> &[u8] {
        self.state.content.as_deref().unwrap_or_default()
    }

    fn data_mut(&mut self) -> &mut Vec<u8> {
        self.state.content.get_or_insert_with(Vec::new)
    }

    /// Logical size in bytes.
    pub fn len(&self) -> u64 {
        self.data().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    pub fn content(&self) -> &[u8] {
        self.data()
    }

    /// Copies up to `length` bytes starting at `offset`.
    ///
    /// Short-reads at the end of the file; an offset at or past the end is
    /// `EndOfFile`.
    pub fn read(&self, offset: u64, length: u64) -> FsResult<Vec<u8>> {
        let data = self.data();
        let size = data.len() as u64;
        if offset >= size {
            return Err(FsError::EndOfFile);
        }
        let end = offset.saturating_add(length).min(size);
        #[allow(clippy::cast_possible_truncation)]
        let range = offset as usize..end as usize;
        Ok(data[range].to_vec())
    }

    /// Writes `bytes` at `offset`.
    ///
    /// With `write_to_end` the offset is replaced by the current size. A
    /// `constrained` write never grows the file: it is clipped to the current
    /// size and transfers nothing when it starts at or past the end.
    pub fn write(
        &mut self,
        offset: u64,
        bytes: &[u8],
        write_to_end: bool,
        constrained: bool,
    ) -> FsResult<Written> {
        let size = self.len();
        let length = bytes.len() as u64;

        let (offset, end) = if constrained {
            if offset >= size {
                return Ok(Written {
                    offset,
                    transferred: 0,
                });
            }
            (offset, offset.saturating_add(length).min(size))
        } else {
            let offset = if write_to_end { size } else { offset };
            let end = offset.saturating_add(length);
            if end > size {
                self.set_file_size(end)?;
            }
            (offset, end)
        };

        let transferred = end - offset;
        #[allow(clippy::cast_possible_truncation)]
        let (start, stop, count) = (offset as usize, end as usize, transferred as usize);
        self.data_mut()[start..stop].copy_from_slice(&bytes[..count]);
        Ok(Written {
            offset,
            transferred,
        })
    }

    /// Sets the allocation size, truncating the content if it is larger.
    pub fn set_allocation_size(&mut self, allocation: u64) -> FsResult<()> {
        if self.state.info.allocation_size == allocation {
            return Ok(());
        }
        if allocation > self.max_file_size {
            return Err(FsError::DiskFull {
                max: self.max_file_size,
            });
        }
        let wanted = usize::try_from(allocation).map_err(|_| FsError::InsufficientResources {
            requested: allocation,
        })?;

        let data = self.data_mut();
        if wanted < data.len() {
            data.truncate(wanted);
            data.shrink_to(wanted);
        } else if wanted > data.capacity() {
            let additional = wanted - data.len();
            data.try_reserve_exact(additional)
                .map_err(|_| FsError::InsufficientResources {
                    requested: allocation,
                })?;
        }
        let size = data.len() as u64;
        self.state.info.allocation_size = allocation;
        self.state.info.file_size = size;
        Ok(())
    }

    /// Sets the logical size. Growth is zero-filled and rounds the
    /// allocation up to the allocation unit when it no longer fits.
    pub fn set_file_size(&mut self, size: u64) -> FsResult<()> {
        if size == self.len() {
            return Ok(());
        }
        if size > self.max_file_size {
            return Err(FsError::DiskFull {
                max: self.max_file_size,
            });
        }
        if self.state.info.allocation_size < size {
            let allocation = round_allocation(size).min(self.max_file_size);
            self.set_allocation_size(allocation)?;
        }
        #[allow(clippy::cast_possible_truncation)]
        let new_len = size as usize;
        self.data_mut().resize(new_len, 0);
        self.state.info.file_size = size;
        Ok(())
    }

    /// Applies `set_size` semantics: `is_allocation` selects which size.
    pub fn set_size(&mut self, size: u64, is_allocation: bool) -> FsResult<()> {
        if is_allocation {
            self.set_allocation_size(size)
        } else {
            self.set_file_size(size)
        }
    }
}
