//! Arena workspace backing every allocation of a compression context.
//!
//! A workspace is one contiguous buffer carved into ordered regions:
//!
//! ```text
//! [objects][tables ->]        free space        [<- aligned][<- buffers]
//! ^start   ^object_end ^table_end   ^alloc_start                    ^end
//! ```
//!
//! Objects are reserved first and survive [`Workspace::clear`]. Tables grow
//! forward from the objects, aligned buffers and plain buffers grow backward
//! from the end. Reservations hand out [`Region`] handles (byte offsets)
//! instead of references, so the owner can later split the arena into
//! disjoint mutable views with [`Workspace::split_mut`].
//!
//! A failed reservation never panics: it returns an empty region and sets a
//! sticky flag that the owner checks with [`Workspace::reserve_failed`].

use oxizstd_core::{Result, ZstdError};

/// Alignment of tables and aligned buffers.
pub const TABLE_ALIGN: usize = 64;

/// Alignment of objects.
const OBJECT_ALIGN: usize = 8;

/// A workspace may stay oversized this many resets before it is shrunk.
const OVERSIZED_MAX_DURATION: u32 = 128;

/// A workspace is oversized when it is this many times larger than needed.
const OVERSIZED_FACTOR: usize = 3;

/// Round `size` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Space consumed by a table reservation of `bytes`.
pub const fn table_space(bytes: usize) -> usize {
    align_up(bytes, TABLE_ALIGN)
}

/// Space consumed by an aligned buffer reservation of `bytes`.
pub const fn aligned_space(bytes: usize) -> usize {
    align_up(bytes, TABLE_ALIGN)
}

/// Space consumed by an object reservation of `bytes`.
pub const fn object_space(bytes: usize) -> usize {
    align_up(bytes, OBJECT_ALIGN)
}

/// Space consumed by a plain buffer reservation of `bytes`.
pub const fn buffer_space(bytes: usize) -> usize {
    bytes
}

/// Internal alignment cost of moving from objects to the tail phases.
pub const fn slack_space() -> usize {
    2 * TABLE_ALIGN
}

/// Allocation phase. Monotonically non-decreasing between two clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Only objects may be reserved.
    Objects,
    /// Tables and aligned buffers may be reserved.
    Aligned,
    /// Only tables and plain buffers may be reserved.
    Buffers,
}

/// Byte range inside a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    /// Byte offset from the workspace start.
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
}

impl Region {
    /// Empty region.
    pub const EMPTY: Region = Region { offset: 0, len: 0 };

    /// One past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Bump allocator over a single owned buffer.
#[derive(Debug)]
pub struct Workspace {
    mem: Vec<u64>,
    object_end: usize,
    table_end: usize,
    table_valid_end: usize,
    alloc_start: usize,
    phase: Phase,
    alloc_failed: bool,
    oversized_duration: u32,
}

impl Workspace {
    /// Allocate a workspace of at least `size` bytes.
    pub fn create(size: usize) -> Result<Self> {
        let words = align_up(size, OBJECT_ALIGN) / OBJECT_ALIGN;
        let mut mem = Vec::new();
        mem.try_reserve_exact(words)
            .map_err(|_| ZstdError::memory_allocation(size))?;
        mem.resize(words, 0u64);
        let end = words * OBJECT_ALIGN;
        Ok(Self {
            mem,
            object_end: 0,
            table_end: 0,
            table_valid_end: 0,
            alloc_start: end,
            phase: Phase::Objects,
            alloc_failed: false,
            oversized_duration: 0,
        })
    }

    /// Workspace with no backing memory.
    pub fn empty() -> Self {
        Self {
            mem: Vec::new(),
            object_end: 0,
            table_end: 0,
            table_valid_end: 0,
            alloc_start: 0,
            phase: Phase::Objects,
            alloc_failed: false,
            oversized_duration: 0,
        }
    }

    /// Release the backing buffer.
    pub fn free(&mut self) {
        *self = Self::empty();
    }

    /// Total size in bytes.
    pub fn size(&self) -> usize {
        self.mem.len() * OBJECT_ALIGN
    }

    /// Free bytes between the table region and the tail.
    pub fn available(&self) -> usize {
        self.alloc_start - self.table_end
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.table_end + (self.size() - self.alloc_start)
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether any reservation failed since the last clear.
    pub fn reserve_failed(&self) -> bool {
        self.alloc_failed
    }

    /// Whether `needed` more bytes fit.
    pub fn check_available(&self, needed: usize) -> bool {
        self.available() >= needed
    }

    /// Whether a workspace of the current size is acceptable for a context
    /// that needs `needed` bytes in total.
    pub fn size_within_bounds(&self, needed: usize) -> bool {
        self.size() >= needed
            && (self.size() <= needed * OVERSIZED_FACTOR
                || self.oversized_duration < OVERSIZED_MAX_DURATION)
    }

    /// Track how long the workspace has been much larger than needed.
    pub fn bump_oversized_duration(&mut self, needed: usize) {
        if self.size() > needed * OVERSIZED_FACTOR {
            self.oversized_duration += 1;
        } else {
            self.oversized_duration = 0;
        }
    }

    fn advance_phase(&mut self, phase: Phase) -> bool {
        debug_assert!(phase >= self.phase, "workspace phase must not go back");
        if phase <= self.phase {
            return true;
        }
        if self.phase == Phase::Objects {
            // Align the forward and backward boundaries of the table region.
            let tables_start = align_up(self.object_end, TABLE_ALIGN);
            let tail = self.alloc_start & !(TABLE_ALIGN - 1);
            if tables_start > tail {
                self.alloc_failed = true;
                return false;
            }
            self.object_end = tables_start;
            self.table_end = tables_start;
            self.table_valid_end = self.table_valid_end.max(tables_start);
            self.alloc_start = tail;
        }
        self.phase = phase;
        true
    }

    /// Reserve an object. Only valid in the objects phase.
    pub fn reserve_object(&mut self, bytes: usize) -> Region {
        let bytes = object_space(bytes);
        if self.phase != Phase::Objects || self.object_end + bytes > self.alloc_start {
            self.alloc_failed = true;
            return Region::EMPTY;
        }
        let region = Region {
            offset: self.object_end,
            len: bytes,
        };
        self.object_end += bytes;
        self.table_end = self.object_end;
        self.table_valid_end = self.object_end;
        region
    }

    /// Reserve a 64-byte aligned table growing forward.
    pub fn reserve_table(&mut self, bytes: usize) -> Region {
        let target = if self.phase == Phase::Objects {
            Phase::Aligned
        } else {
            self.phase
        };
        if !self.advance_phase(target) {
            return Region::EMPTY;
        }
        let bytes = table_space(bytes);
        if self.table_end + bytes > self.alloc_start {
            self.alloc_failed = true;
            return Region::EMPTY;
        }
        let region = Region {
            offset: self.table_end,
            len: bytes,
        };
        self.table_end += bytes;
        region
    }

    fn reserve_tail(&mut self, bytes: usize, phase: Phase) -> Region {
        if !self.advance_phase(phase) {
            return Region::EMPTY;
        }
        if bytes > self.alloc_start || self.alloc_start - bytes < self.table_end {
            self.alloc_failed = true;
            return Region::EMPTY;
        }
        self.alloc_start -= bytes;
        self.table_valid_end = self.table_valid_end.min(self.alloc_start);
        Region {
            offset: self.alloc_start,
            len: bytes,
        }
    }

    /// Reserve a 64-byte aligned buffer from the tail.
    pub fn reserve_aligned(&mut self, bytes: usize) -> Region {
        if self.phase > Phase::Aligned {
            self.alloc_failed = true;
            return Region::EMPTY;
        }
        self.reserve_tail(aligned_space(bytes), Phase::Aligned)
    }

    /// Reserve an unaligned buffer from the tail.
    pub fn reserve_buffer(&mut self, bytes: usize) -> Region {
        self.reserve_tail(buffer_space(bytes), Phase::Buffers)
    }

    /// Table memory must be zeroed again before it is trusted.
    pub fn mark_tables_dirty(&mut self) {
        self.table_valid_end = self.object_end;
    }

    /// All currently reserved table memory holds valid (zeroed) data.
    pub fn mark_tables_clean(&mut self) {
        self.table_valid_end = self.table_valid_end.max(self.table_end);
    }

    /// Zero the part of the table region that is not known to be clean.
    pub fn clean_tables(&mut self) {
        if self.table_valid_end < self.table_end {
            let (from, to) = (self.table_valid_end, self.table_end);
            self.bytes_all_mut()[from..to].fill(0);
            self.table_valid_end = to;
        }
    }

    /// Drop tables, keep objects and tail reservations.
    pub fn clear_tables(&mut self) {
        self.table_end = self.object_end;
    }

    /// Rewind to just past the objects without releasing memory.
    pub fn clear(&mut self) {
        self.table_end = self.object_end;
        self.alloc_start = self.size() & !(TABLE_ALIGN - 1);
        self.alloc_failed = false;
        if self.phase > Phase::Aligned {
            self.phase = Phase::Aligned;
        }
    }

    fn bytes_all_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.mem)
    }

    /// Immutable view of a region.
    pub fn bytes(&self, region: Region) -> &[u8] {
        let all: &[u8] = bytemuck::cast_slice(&self.mem);
        &all[region.offset..region.end()]
    }

    /// Mutable view of a region.
    pub fn bytes_mut(&mut self, region: Region) -> &mut [u8] {
        &mut self.bytes_all_mut()[region.offset..region.end()]
    }

    /// Split the workspace into disjoint mutable views, one per region.
    ///
    /// Regions must not overlap; they may be given in any order.
    pub fn split_mut<const N: usize>(&mut self, regions: [Region; N]) -> [&mut [u8]; N] {
        let mut order: [usize; N] = std::array::from_fn(|i| i);
        order.sort_by_key(|&i| regions[i].offset);

        let mut slots: [Option<&mut [u8]>; N] = std::array::from_fn(|_| None);
        let mut rest: &mut [u8] = self.bytes_all_mut();
        let mut consumed = 0usize;
        for &i in &order {
            let region = regions[i];
            if region.len == 0 {
                continue;
            }
            debug_assert!(region.offset >= consumed, "overlapping regions");
            let tail = std::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut(region.offset - consumed);
            let (mine, tail) = tail.split_at_mut(region.len);
            slots[i] = Some(mine);
            rest = tail;
            consumed = region.end();
        }
        std::array::from_fn(|i| slots[i].take().unwrap_or_default())
    }

    /// Check the ordering invariant of the boundaries.
    pub fn is_consistent(&self) -> bool {
        self.object_end <= self.table_end
            && self.table_end <= self.alloc_start
            && self.alloc_start <= self.size()
    }
}

/// View a table region as `u32` cells.
#[inline]
pub fn as_u32s_mut(bytes: &mut [u8]) -> &mut [u32] {
    if bytes.is_empty() {
        return &mut [];
    }
    bytemuck::cast_slice_mut(bytes)
}

/// View a table region as `u32` cells.
#[inline]
pub fn as_u32s(bytes: &[u8]) -> &[u32] {
    if bytes.is_empty() {
        return &[];
    }
    bytemuck::cast_slice(bytes)
}

/// View an aligned buffer as `u16` cells.
#[inline]
pub fn as_u16s_mut(bytes: &mut [u8]) -> &mut [u16] {
    if bytes.is_empty() {
        return &mut [];
    }
    bytemuck::cast_slice_mut(bytes)
}

/// View an aligned buffer as cells of `T`.
#[inline]
pub fn as_cells_mut<T: bytemuck::Pod>(bytes: &mut [u8]) -> &mut [T] {
    if bytes.is_empty() {
        return &mut [];
    }
    bytemuck::cast_slice_mut(bytes)
}
