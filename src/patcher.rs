//! Produces the byte-exact overwrite that redirects a patch site into its
//! trampoline, alongside a backup of the bytes it replaces.
//!
//! Grounded on the teacher's `arch/x86/patcher.rs` for the overall shape
//! (save the original bytes up front, build one fixed-size replacement
//! sequence), adapted to the trait-based `Backend` and to the batch
//! `install_hooks` entry point, which never needs to unpatch.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::memory::PatchWrite;

/// The original bytes at a patch site, saved before they are overwritten,
/// and the write that installs the hook.
pub struct Patch {
  pub address: usize,
  pub original: Vec<u8>,
  pub install: PatchWrite,
}

/// Builds the patch for an entry whose trampoline has already been placed
/// at `trampoline_entry` (the hook body's address; on x86-64, preceded by
/// an absolute-address slot at `slot_addr`).
pub fn build(backend: &dyn Backend, code_point: usize, trampoline_entry: usize, slot_addr: usize) -> Result<Patch> {
  if !backend.is_reachable(code_point, trampoline_entry) {
    return Err(Error::JumpTooFar);
  }

  let len = backend.patch_site_len(code_point);
  let address = code_point & !1usize;
  let original = unsafe { std::slice::from_raw_parts(address as *const u8, len) }.to_vec();
  let bytes = backend.patch_site_bytes(code_point, trampoline_entry, slot_addr);
  debug_assert_eq!(bytes.len(), len, "patch-site encoding length must match patch_site_len");

  Ok(Patch {
    address,
    original,
    install: PatchWrite { address, bytes },
  })
}
