//! Per-architecture behavior, expressed as a trait implemented by a small,
//! closed set of backends (`ArmBackend`, `X64Backend`) rather than as
//! dynamic string-keyed dispatch or compile-time `cfg` branching.

mod arm;
mod x64;

pub use self::arm::ArmBackend;
pub use self::x64::X64Backend;

use crate::check::{CheckCodeResult, CheckStatus, RelocDescriptor};
use crate::disasm::InstructionDecoder;
use crate::hookbody::HookBody;
use crate::pic::CodeEmitter;

/// The furthest distance between a patch site and its trampoline that the
/// architecture's jump encoding can reach. ARM/Thumb patch sites always
/// use an absolute jump, so this only constrains x86-64 placement.
pub const X64_JUMP_RANGE: usize = 0x8000_0000;

/// Selects which [`Backend`] an [`crate::engine::Engine`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
  /// ARM, A32 and T32 (Thumb) interworking.
  Arm,
  /// x86-64.
  X64,
}

impl Architecture {
  /// Constructs the backend for this architecture.
  pub fn backend(self) -> Box<dyn Backend> {
    match self {
      Architecture::Arm => Box::new(ArmBackend),
      Architecture::X64 => Box::new(X64Backend),
    }
  }
}

/// Per-architecture behavior consumed by the installation pipeline.
///
/// A `Backend` is stateless: every method takes the data it needs as
/// arguments, so one instance is shared across every hook installed for a
/// process.
pub trait Backend: Send + Sync {
  /// The minimum number of bytes of prologue that must be relocated for
  /// an entry at `code_point` (Thumb bit included), per §3's per-mode
  /// table.
  fn min_overwrite_len(&self, code_point: usize) -> usize;

  /// Walks instructions from `code_point`, classifying each as
  /// copy-verbatim, relocatable (producing a [`RelocDescriptor`]), or
  /// unsupported. Stops as soon as `code_len_to_replace` reaches
  /// [`Backend::min_overwrite_len`], or on the first unsupported
  /// instruction.
  fn inspect_prologue(
    &self,
    decoder: &mut dyn InstructionDecoder,
    code_point: usize,
  ) -> CheckCodeResult;

  /// Scans the region immediately following the prologue for addresses
  /// that land inside `[code_point, code_point + code_len_to_replace)`.
  fn check_back_edge(
    &self,
    decoder: &mut dyn InstructionDecoder,
    code_point: usize,
    code_len_to_replace: usize,
  ) -> CheckStatus;

  /// Emits the replacement sequence for one relocation descriptor (§4.5).
  /// `code_point` is the original entry (Thumb bit included), needed
  /// because ARM/Thumb replacement sequences use different instruction
  /// encodings depending on the prologue's mode. `original` is the
  /// prologue's raw bytes, used by variants that still need to read the
  /// displaced instruction's non-address bits.
  fn emit_relocation(
    &self,
    code_point: usize,
    descriptor: &RelocDescriptor,
    original: &[u8],
  ) -> Box<dyn crate::pic::Thunkable>;

  /// Emits the jump back from the end of the trampoline's relocated
  /// prologue to `continuation` (the first original instruction past the
  /// overwritten region, Thumb bit included on ARM).
  fn emit_jump_back(&self, code_point: usize, continuation: usize) -> Box<dyn crate::pic::Thunkable>;

  /// Returns the byte length of the patch-site overwrite for an entry at
  /// `code_point`. Varies on ARM/Thumb with alignment; fixed on x86-64.
  fn patch_site_len(&self, code_point: usize) -> usize;

  /// Builds the bytes to place at `code_point` so that it jumps into the
  /// trampoline at `trampoline_entry` (§4.6). `slot_addr` is the address
  /// of an 8-byte absolute-address slot the x86-64 backend expects the
  /// trampoline builder to have reserved immediately before
  /// `trampoline_entry`; ARM/Thumb backends ignore it.
  fn patch_site_bytes(&self, code_point: usize, trampoline_entry: usize, slot_addr: usize) -> Vec<u8>;

  /// Returns `true` if a patch at `code_point` can reach `trampoline_entry`
  /// with this architecture's jump encoding.
  fn is_reachable(&self, code_point: usize, trampoline_entry: usize) -> bool;

  /// A minimal default implementation of the out-of-scope hook body (see
  /// `crate::hookbody`).
  fn default_hook_body(&self) -> Box<dyn HookBody>;

  /// Bytes the trampoline builder must reserve immediately before
  /// `trampoline_entry` for this architecture's patch-site encoding.
  /// x86-64's `jmp [rip+disp]` indirects through an absolute-address slot
  /// here; ARM/Thumb's literal loads need nothing extra.
  fn slot_len(&self) -> usize {
    0
  }
}

/// Assembles the trampoline's relocated-prologue segment by walking
/// `result.relocations` and alternating verbatim copies with
/// backend-emitted replacement thunks. Shared by every backend so the
/// control shape (copy-between-descriptors) is not duplicated.
pub fn build_relocated_prologue(
  backend: &dyn Backend,
  result: &CheckCodeResult,
  original: &[u8],
) -> CodeEmitter {
  let mut emitter = CodeEmitter::new();
  let mut cursor = 0usize;

  for reloc in &result.relocations {
    if reloc.offset > cursor {
      emitter.add_thunk(Box::new(original[cursor..reloc.offset].to_vec()));
    }
    emitter.add_thunk(backend.emit_relocation(result.code_point, reloc, original));
    cursor = reloc.offset + reloc.instr_size;
  }

  if cursor < result.code_len_to_replace {
    emitter.add_thunk(Box::new(original[cursor..result.code_len_to_replace].to_vec()));
  }

  emitter
}
