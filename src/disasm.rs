//! The disassembler adapter: an external collaborator interface.
//!
//! This crate never bundles a production x86/ARM decoder. The inspector
//! and back-edge checker are written against [`InstructionDecoder`] only;
//! callers supply a real decoder (e.g. wrapping `iced-x86` or a vendor
//! library for ARM), and this crate's own tests supply [`FixtureDecoder`].

use std::collections::HashMap;

/// One decoded instruction.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
  /// The decoder's textual mnemonic/operand rendering. The inspector
  /// matches this with substring/prefix checks only — no formal parse —
  /// so implementations must produce a stable, lowercase form such as
  /// `"ldr r3, [pc, #8]"`.
  pub text: String,
  /// Length of the instruction, in bytes.
  pub size: usize,
  /// The absolute address this instruction references, if it is a branch
  /// or other PC-relative form the decoder resolved. `None` for
  /// instructions with no address operand.
  pub pc_rel_target: Option<usize>,
}

/// Decodes one instruction at a time from a target address space.
///
/// Implementations may assume `addr` always increases monotonically
/// within a single inspection pass, but must not otherwise assume
/// anything about call order (the back-edge checker and the inspector
/// each drive their own pass).
pub trait InstructionDecoder {
  /// Decodes the instruction at `addr`. Returns `None` if `addr` does not
  /// contain a decodable instruction (e.g. past the end of mapped code).
  fn decode(&mut self, addr: usize) -> Option<DecodedInstruction>;
}

/// A deterministic, address-keyed decoder for tests.
///
/// Construct with [`FixtureDecoder::new`] and register instructions with
/// [`FixtureDecoder::insert`]; addresses not registered decode to `None`,
/// which inspectors treat as "ran off the end of the known prologue".
#[derive(Debug, Default)]
pub struct FixtureDecoder {
  instructions: HashMap<usize, DecodedInstruction>,
}

impl FixtureDecoder {
  pub fn new() -> Self {
    FixtureDecoder {
      instructions: HashMap::new(),
    }
  }

  /// Registers a decoded instruction at `addr`.
  pub fn insert(&mut self, addr: usize, text: &str, size: usize, pc_rel_target: Option<usize>) {
    self.instructions.insert(
      addr,
      DecodedInstruction {
        text: text.to_string(),
        size,
        pc_rel_target,
      },
    );
  }
}

impl InstructionDecoder for FixtureDecoder {
  fn decode(&mut self, addr: usize) -> Option<DecodedInstruction> {
    self.instructions.get(&addr).cloned()
  }
}
