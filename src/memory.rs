//! External interfaces for turning trampoline bytes into running code:
//! allocating executable memory near a target, toggling a patch site's
//! protection to apply an overwrite, and flushing the instruction cache
//! afterwards.
//!
//! Grounded on the teacher's `arch/memory.rs` (the shared `ThreadAllocator`
//! pool behind a `lazy_static`) and `arch/detour.rs::toggle` (the
//! `region::protect_with_handle` RAII pattern around a patch write).

use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing::trace;

use crate::alloc::{ExecutableMemory, ThreadAllocator};
use crate::backend::X64_JUMP_RANGE;
use crate::error::Result;

lazy_static! {
  /// Shared allocator for every hook installed in this process.
  static ref POOL: Mutex<ThreadAllocator> = Mutex::new(ThreadAllocator::new(X64_JUMP_RANGE));
}

/// Allocates the executable memory backing a trampoline.
pub trait CodeManager: Send + Sync {
  /// Allocates `size` bytes of read-write-execute memory, ideally within
  /// jump range of `origin`.
  fn allocate(&self, origin: *const (), size: usize) -> Result<ExecutableMemory>;
}

/// The default [`CodeManager`]: a process-wide pool of memory maps shared
/// across every installed hook, so nearby hooks can share a page.
#[derive(Default)]
pub struct PooledCodeManager;

impl CodeManager for PooledCodeManager {
  fn allocate(&self, origin: *const (), size: usize) -> Result<ExecutableMemory> {
    POOL.lock().unwrap().allocate(origin, size)
  }
}

/// One patch-site overwrite: the address to write at and the bytes to
/// write there.
pub struct PatchWrite {
  pub address: usize,
  pub bytes: Vec<u8>,
}

/// Applies patch-site overwrites, handling the protection dance around
/// each write.
pub trait MemoryModifier: Send + Sync {
  /// Applies every write in `writes`, returning how many succeeded. A
  /// write that fails is skipped rather than aborting the rest of the
  /// batch.
  fn apply(&self, writes: &[PatchWrite]) -> usize;
}

/// The default [`MemoryModifier`], using `region`'s scoped protection
/// handle to temporarily make the patch site writable.
#[derive(Default)]
pub struct RegionMemoryModifier;

impl MemoryModifier for RegionMemoryModifier {
  fn apply(&self, writes: &[PatchWrite]) -> usize {
    writes.iter().filter(|write| apply_one(write).is_ok()).count()
  }
}

fn apply_one(write: &PatchWrite) -> Result<()> {
  let _handle = region::protect_with_handle(
    write.address as *const _,
    write.bytes.len(),
    region::Protection::READ_WRITE_EXECUTE,
  )?;

  unsafe {
    std::slice::from_raw_parts_mut(write.address as *mut u8, write.bytes.len())
      .copy_from_slice(&write.bytes);
  }
  trace!(address = write.address, len = write.bytes.len(), "patched site");
  Ok(())
}

/// Flushes the instruction cache over a freshly written code range, so
/// instruction fetch can't race a stale cache line.
pub trait CacheFlush: Send + Sync {
  fn flush(&self, address: usize, len: usize);
}

/// The default [`CacheFlush`]: a no-op. Correct on x86-64, where the
/// instruction cache is kept coherent with data writes by hardware. A
/// real ARM deployment should supply an implementation backed by
/// `__clear_cache` (see the `TODO` this replaces in the teacher's
/// `arch/mod.rs`).
#[derive(Default)]
pub struct NoopCacheFlush;

impl CacheFlush for NoopCacheFlush {
  fn flush(&self, _address: usize, _len: usize) {}
}
