//! Assembles a trampoline: a freshly allocated block of executable memory
//! that runs the hook body, then the relocated original prologue, then
//! jumps back into the target past the overwritten region.
//!
//! Grounded on the teacher's `arch/memory.rs::allocate_pic` (allocate near
//! the origin, emit into the obtained address, copy in) for the
//! allocation shape, and on `pic::CodeEmitter` for composing the pieces
//! into one position-independent blob.

use crate::backend::{self, Backend};
use crate::check::CheckCodeResult;
use crate::error::Result;
use crate::hookbody::HookBody;
use crate::memory::CodeManager;
use crate::pic::{CodeEmitter, Thunkable};

/// Where a newly built trampoline lives and the two addresses other
/// components need: the patch site's jump target, and (skipping the hook
/// body) the address an embedder can call to run the original logic.
pub struct Trampoline {
  /// Backing executable memory. Dropped -- and released back to its pool
  /// -- when the owning `CodeContext` is.
  pub memory: crate::alloc::ExecutableMemory,
  /// Address the patch site should branch to: the hook body's entry (or,
  /// on x86-64, the absolute-address slot immediately before it).
  pub patch_target: usize,
  /// Address that runs the relocated prologue directly, skipping the
  /// hook body -- the trampoline's callable address.
  pub callable_address: usize,
}

/// Builds a trampoline for a prologue already accepted by
/// [`Backend::inspect_prologue`].
pub fn build(
  backend: &dyn Backend,
  code_manager: &dyn CodeManager,
  hook_body: &dyn HookBody,
  result: &CheckCodeResult,
  original: &[u8],
  ctx_addr: usize,
  entry_callback: usize,
) -> Result<Trampoline> {
  let code_point = result.code_point;
  let continuation = (code_point & !1usize) + result.code_len_to_replace;

  let hook_thunk = hook_body.emit(ctx_addr, entry_callback);
  let hook_len = hook_thunk.len();
  let prologue = backend::build_relocated_prologue(backend, result, original);
  let jump_back = backend.emit_jump_back(code_point, continuation);

  let mut body = CodeEmitter::new();
  body.add_thunk(hook_thunk);
  body.add_thunk(Box::new(prologue));
  body.add_thunk(jump_back);

  let slot_len = backend.slot_len();
  let total_len = slot_len + body.len();

  let mut memory = code_manager.allocate(code_point as *const (), total_len)?;

  let entry_addr = memory.as_ptr() as usize + slot_len;
  let code = body.emit(entry_addr as *const ());
  memory[slot_len..].copy_from_slice(&code);

  if slot_len > 0 {
    memory[..slot_len].copy_from_slice(&(entry_addr as u64).to_le_bytes()[..slot_len]);
  }

  Ok(Trampoline {
    memory,
    patch_target: entry_addr,
    callable_address: entry_addr + hook_len,
  })
}
