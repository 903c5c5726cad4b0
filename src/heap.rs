//! # Stack Heap
//!
//! The kernel only consumes an allocator through [`KernelHeap`]:
//! allocation either yields a usable block or fails, freeing never
//! disturbs other live blocks, and usage queries are O(1).
//!
//! [`StackPool`] is the allocator shipped with the kernel: a fixed-block
//! pool carved from one caller-provided region, tracked with a single
//! occupancy bitmap. Every block has the same size, so allocation and
//! release are a bit scan and a bit flip.

use core::ptr::NonNull;

use crate::error::{KernelError, KernelResult};

/// Allocation contract used for task stacks. Sizes are in 32-bit words.
pub trait KernelHeap {
    /// Allocate at least `words` words, or `None` when the request cannot
    /// be satisfied.
    fn alloc(&mut self, words: usize) -> Option<NonNull<u32>>;

    /// Return a block obtained from [`alloc`](Self::alloc). Blocks this
    /// heap did not hand out are rejected with [`KernelError::NotInHeap`].
    fn free(&mut self, block: NonNull<u32>) -> KernelResult<()>;

    /// Words currently handed out.
    fn used_words(&self) -> usize;

    /// Words still available.
    fn free_words(&self) -> usize;
}

/// Fixed-block pool of up to 32 equally sized stacks.
pub struct StackPool {
    base: *mut u32,
    block_words: usize,
    blocks: usize,
    used_mask: u32,
    used_blocks: usize,
}

// Safety: the pool is only touched inside the kernel critical section.
unsafe impl Send for StackPool {}

impl StackPool {
    /// A pool with no backing memory; every allocation fails until
    /// [`attach`](Self::attach) is called.
    pub const fn empty() -> Self {
        Self {
            base: core::ptr::null_mut(),
            block_words: 0,
            blocks: 0,
            used_mask: 0,
            used_blocks: 0,
        }
    }

    /// Carve `region` into blocks of `block_words` words each. Anything
    /// past the 32nd block, or a trailing partial block, is left unused.
    pub fn new(region: &'static mut [u32], block_words: usize) -> Self {
        let mut pool = Self::empty();
        pool.attach(region, block_words);
        pool
    }

    pub fn attach(&mut self, region: &'static mut [u32], block_words: usize) {
        let block_words = block_words.max(1);
        self.base = region.as_mut_ptr();
        self.block_words = block_words;
        self.blocks = (region.len() / block_words).min(32);
        self.used_mask = 0;
        self.used_blocks = 0;
        debug!(
            "stack pool: {} blocks of {} words",
            self.blocks,
            self.block_words
        );
    }

    #[inline]
    pub fn block_words(&self) -> usize {
        self.block_words
    }

    #[inline]
    pub fn capacity_blocks(&self) -> usize {
        self.blocks
    }

    #[inline]
    fn all_blocks_mask(&self) -> u32 {
        if self.blocks >= 32 {
            u32::MAX
        } else {
            (1u32 << self.blocks) - 1
        }
    }
}

impl KernelHeap for StackPool {
    fn alloc(&mut self, words: usize) -> Option<NonNull<u32>> {
        if words == 0 || words > self.block_words {
            return None;
        }
        let free = !self.used_mask & self.all_blocks_mask();
        if free == 0 {
            return None;
        }
        let index = free.trailing_zeros() as usize;
        self.used_mask |= 1 << index;
        self.used_blocks += 1;
        NonNull::new(self.base.wrapping_add(index * self.block_words))
    }

    fn free(&mut self, block: NonNull<u32>) -> KernelResult<()> {
        let addr = block.as_ptr() as usize;
        let base = self.base as usize;
        let block_bytes = self.block_words * core::mem::size_of::<u32>();
        if self.base.is_null() || addr < base || block_bytes == 0 {
            return Err(KernelError::NotInHeap);
        }
        let offset = addr - base;
        if offset % block_bytes != 0 {
            return Err(KernelError::NotInHeap);
        }
        let index = offset / block_bytes;
        if index >= self.blocks || self.used_mask & (1 << index) == 0 {
            return Err(KernelError::NotInHeap);
        }
        self.used_mask &= !(1 << index);
        self.used_blocks -= 1;
        Ok(())
    }

    fn used_words(&self) -> usize {
        self.used_blocks * self.block_words
    }

    fn free_words(&self) -> usize {
        (self.blocks - self.used_blocks) * self.block_words
    }
}
