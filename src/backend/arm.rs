//! ARM (A32) and Thumb (T32) prologue inspection, relocation, and
//! patching.
//!
//! Grounded on `original_source/arm/arm_target_client.cpp::check_code` for
//! the allow-list, `ip`-clobber tracking, PC-operand handling, and branch
//! classification, and on `::copy_original_code`/`::modify_code` for the
//! replacement encodings and patch-site forms. The teacher library's own
//! `src/arch/arm/thunk/{arm.rs,thumb.rs}` are non-compiling stubs and were
//! not usable beyond suggesting names.

use crate::check::{CheckCodeResult, CheckStatus, RelocDescriptor, RelocKind};
use crate::disasm::InstructionDecoder;
use crate::hookbody::HookBody;
use crate::pic::{CodeEmitter, Thunkable, UnsafeThunk};

use super::Backend;

const ALLOWED_MNEMONICS: &[&str] = &[
  "mov", "push", "pop", "ldr", "str", "stm", "ldm", "add", "sub", "mul", "div", "xor", "or",
  "and", "not", "cmp", "lsl", "lsr", "asr", "asl", "tst", "mvn", "vpush", "vld", "vmov",
];

const MAX_SCAN_LEN: usize = 32;

fn is_thumb(code_point: usize) -> bool {
  code_point & 1 == 1
}

fn strip_thumb_bit(code_point: usize) -> usize {
  code_point & !1
}

/// Per-mode minimum overwrite length, per SPEC_FULL.md §3.
fn min_overwrite_len(code_point: usize) -> usize {
  if is_thumb(code_point) {
    if strip_thumb_bit(code_point) % 4 == 0 {
      8
    } else {
      10
    }
  } else {
    8
  }
}

fn cond_from_suffix(suffix: &str) -> Option<u8> {
  Some(match suffix {
    "eq" => 0,
    "ne" => 1,
    "cs" => 2,
    "cc" => 3,
    "mi" => 4,
    "pl" => 5,
    "vs" => 6,
    "vc" => 7,
    "hi" => 8,
    "ls" => 9,
    "ge" => 10,
    "lt" => 11,
    "gt" => 12,
    "le" => 13,
    _ => return None,
  })
}

/// Splits a decoder's rendered text into its mnemonic (width suffix
/// `.n`/`.w` stripped) and the remainder of the operand text.
fn mnemonic_and_ops(text: &str) -> (&str, &str) {
  let text = text.trim();
  let (mnem, rest) = match text.find(char::is_whitespace) {
    Some(idx) => (&text[..idx], text[idx..].trim_start()),
    None => (text, ""),
  };
  let mnem = mnem.trim_end_matches(".n").trim_end_matches(".w");
  (mnem, rest)
}

fn reg_num(tok: &str) -> Option<u8> {
  let tok = tok.trim().trim_end_matches(',');
  match tok {
    "ip" => Some(12),
    "sp" => Some(13),
    "lr" => Some(14),
    "pc" => Some(15),
    _ => tok.strip_prefix('r').and_then(|n| n.parse().ok()),
  }
}

/// Parses the immediate out of an `#imm` token, decimal or `0x`-prefixed.
fn parse_immediate(ops: &str) -> Option<i64> {
  let hash = ops.find('#')?;
  let rest = &ops[hash + 1..];
  let end = rest
    .find(|c: char| c != '-' && !c.is_alphanumeric())
    .unwrap_or(rest.len());
  let token = &rest[..end];
  if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
    i64::from_str_radix(hex, 16).ok()
  } else if let Some(hex) = token.strip_prefix("-0x").or_else(|| token.strip_prefix("-0X")) {
    i64::from_str_radix(hex, 16).ok().map(|v: i64| -v)
  } else {
    token.parse().ok()
  }
}

fn operand_is_register(ops: &str) -> bool {
  let first = ops.split(',').next().unwrap_or("").trim();
  !first.is_empty() && !first.starts_with('#') && !first.starts_with("0x") && reg_num(first).is_some()
}

fn mentions_ip(ops: &str) -> bool {
  ops.split(|c: char| !c.is_alphanumeric())
    .any(|tok| tok == "ip")
}

pub struct ArmBackend;

impl Backend for ArmBackend {
  fn min_overwrite_len(&self, code_point: usize) -> usize {
    min_overwrite_len(code_point)
  }

  fn inspect_prologue(
    &self,
    decoder: &mut dyn InstructionDecoder,
    code_point: usize,
  ) -> CheckCodeResult {
    let min_len = min_overwrite_len(code_point);
    let mut len = 0usize;
    let mut addr = strip_thumb_bit(code_point);
    let mut relocations = Vec::new();
    let mut ip_clobbered = false;

    loop {
      if len >= min_len {
        let lowered = lowered_len(len, &relocations);
        return CheckCodeResult {
          code_point,
          status: CheckStatus::Ok,
          code_len_to_replace: len,
          lowered_original_code_len: lowered,
          relocations,
        };
      }

      let instr = match decoder.decode(addr) {
        Some(instr) => instr,
        None => {
          let lowered = lowered_len(len, &relocations);
          return CheckCodeResult {
            code_point,
            status: CheckStatus::TooSmall,
            code_len_to_replace: len,
            lowered_original_code_len: lowered,
            relocations,
          };
        }
      };

      let text = instr.text.to_lowercase();
      let (mnem, ops) = mnemonic_and_ops(&text);

      let reject = |len, relocations: Vec<RelocDescriptor>| CheckCodeResult {
        code_point,
        status: CheckStatus::NotAccepted,
        code_len_to_replace: len,
        lowered_original_code_len: lowered_len(len, &relocations),
        relocations,
      };

      // Unconditional call (`bl`/`blx <label>`); register forms fall
      // through to the verbatim-copy branch below.
      if (mnem == "bl" || mnem == "blx") && !operand_is_register(ops) {
        if ip_clobbered {
          return reject(len, relocations);
        }
        let target = match instr.pc_rel_target {
          Some(t) => t,
          None => return reject(len, relocations),
        };
        if target < strip_thumb_bit(code_point) + min_len {
          return reject(len, relocations);
        }
        relocations.push(RelocDescriptor {
          offset: len,
          addr: target,
          instr_size: instr.size,
          offset_add_end: if is_thumb(code_point) { 10 } else { 12 },
          kind: RelocKind::Bl { is_blx: mnem == "blx" },
        });
        len += instr.size;
        addr += instr.size;
        continue;
      }

      // `cbz`/`cbnz Rn, <label>` (Thumb only).
      if let Some(reg_tok) = ops.split(',').next() {
        if mnem.starts_with("cb") && (mnem == "cbz" || mnem == "cbnz") {
          let reg = match reg_num(reg_tok) {
            Some(r) => r,
            None => return reject(len, relocations),
          };
          let target = match instr.pc_rel_target {
            Some(t) => t,
            None => return reject(len, relocations),
          };
          if target < strip_thumb_bit(code_point) + min_len {
            return reject(len, relocations);
          }
          relocations.push(RelocDescriptor {
            offset: len,
            addr: target,
            instr_size: instr.size,
            offset_add_end: 12,
            kind: RelocKind::Cb {
              reg,
              not_zero: mnem == "cbnz",
            },
          });
          len += instr.size;
          addr += instr.size;
          continue;
        }
      }

      // `bx`/`blx Rm` register-indirect: copy verbatim, no descriptor.
      if (mnem == "bx" || mnem == "blx") && operand_is_register(ops) {
        len += instr.size;
        addr += instr.size;
        continue;
      }

      // `b<cond> <label>`.
      if mnem.starts_with('b') && mnem != "bx" {
        let suffix = &mnem[1..];
        let cond = if suffix.is_empty() {
          14
        } else {
          match cond_from_suffix(suffix) {
            Some(c) => c,
            None => return reject(len, relocations),
          }
        };
        let target = match instr.pc_rel_target {
          Some(t) => t,
          None => return reject(len, relocations),
        };
        // "Short branch" rejection faithfully reproduces the original's
        // use of the architecture-wide minimum overwrite length here
        // rather than the actual accumulated `len` (SPEC_FULL.md §9).
        if target < strip_thumb_bit(code_point) + min_len {
          return reject(len, relocations);
        }
        relocations.push(RelocDescriptor {
          offset: len,
          addr: target,
          instr_size: instr.size,
          offset_add_end: if is_thumb(code_point) { 14 } else { 16 },
          kind: RelocKind::B { cond },
        });
        len += instr.size;
        addr += instr.size;
        continue;
      }

      // Non-branch instructions that reference `pc`.
      if ops.split(|c: char| !c.is_alphanumeric()).any(|tok| tok == "pc") {
        if mnem == "ldr" {
          let dest = match ops.split(',').next().and_then(reg_num) {
            Some(r) if r <= 9 => r,
            _ => return reject(len, relocations),
          };
          let addr_val = match instr.pc_rel_target {
            Some(a) => a,
            None => return reject(len, relocations),
          };
          relocations.push(RelocDescriptor {
            offset: len,
            addr: addr_val,
            instr_size: instr.size,
            offset_add_end: 12,
            kind: RelocKind::LdrPc { reg: dest },
          });
          len += instr.size;
          addr += instr.size;
          continue;
        } else if mnem == "add" {
          let mut parts = ops.split(',').map(str::trim);
          let dest = parts.next().and_then(reg_num);
          let second = parts.next();
          let third = parts.next();
          let dest = match dest {
            Some(r) => r,
            None => return reject(len, relocations),
          };
          if second != Some("pc") {
            return reject(len, relocations);
          }
          // `add Rn, pc, Rm` (register form, no `#`): the original
          // computes the address while ignoring `Rm`, a latent bug. This
          // port rejects the form outright rather than reproduce it
          // (SPEC_FULL.md §9).
          let imm = third.and_then(parse_immediate);
          let imm = match imm {
            Some(i) => i,
            None => return reject(len, relocations),
          };
          let pc_bias = if is_thumb(code_point) { 4 } else { 8 };
          let instr_addr = strip_thumb_bit(code_point) + len;
          let addr_val = ((instr_addr + pc_bias) as i64 + imm) as usize & !0b11;
          relocations.push(RelocDescriptor {
            offset: len,
            addr: addr_val,
            instr_size: instr.size,
            offset_add_end: 8,
            kind: RelocKind::MovAddr { reg: dest },
          });
          len += instr.size;
          addr += instr.size;
          continue;
        } else {
          return reject(len, relocations);
        }
      }

      if mentions_ip(ops) {
        ip_clobbered = true;
      }

      if !ALLOWED_MNEMONICS.contains(&mnem) {
        return reject(len, relocations);
      }

      len += instr.size;
      addr += instr.size;
    }
  }

  fn check_back_edge(
    &self,
    decoder: &mut dyn InstructionDecoder,
    code_point: usize,
    code_len_to_replace: usize,
  ) -> CheckStatus {
    let base = strip_thumb_bit(code_point);
    let region = base..(base + code_len_to_replace);
    let mut addr = base + code_len_to_replace;
    let end = base + code_len_to_replace + MAX_SCAN_LEN;

    while addr < end {
      match decoder.decode(addr) {
        Some(instr) => {
          if let Some(target) = instr.pc_rel_target {
            if region.contains(&target) {
              return CheckStatus::BackEdge;
            }
          }
          addr += instr.size;
        }
        None => break,
      }
    }

    CheckStatus::Ok
  }

  fn emit_relocation(
    &self,
    code_point: usize,
    descriptor: &RelocDescriptor,
    _original: &[u8],
  ) -> Box<dyn Thunkable> {
    let thumb = is_thumb(code_point);
    match descriptor.kind {
      RelocKind::Bl { is_blx } => emit_bl(thumb, descriptor.addr, is_blx),
      RelocKind::Cb { reg, not_zero } => emit_cb(descriptor.addr, reg, not_zero),
      RelocKind::B { cond } => emit_b(thumb, descriptor.addr, cond),
      RelocKind::AddPc { reg } | RelocKind::MovAddr { reg } => emit_mov_addr(thumb, reg, descriptor.addr),
      RelocKind::LdrPc { reg } => emit_ldr_pc(thumb, reg, descriptor.addr),
    }
  }

  fn emit_jump_back(&self, code_point: usize, continuation: usize) -> Box<dyn Thunkable> {
    let thumb = is_thumb(code_point);
    unsafe {
      if thumb {
        Box::new(UnsafeThunk::new(
          move |base| thumb_ldr_pc_literal(base, continuation | 1),
          10,
        ))
      } else {
        Box::new(UnsafeThunk::new(
          move |base| arm_ldr_pc_literal(base, continuation),
          8,
        ))
      }
    }
  }

  fn patch_site_len(&self, code_point: usize) -> usize {
    min_overwrite_len(code_point)
  }

  fn patch_site_bytes(&self, code_point: usize, trampoline_entry: usize, _slot_addr: usize) -> Vec<u8> {
    if is_thumb(code_point) {
      if strip_thumb_bit(code_point) % 4 == 0 {
        thumb_ldr_pc_literal(strip_thumb_bit(code_point), trampoline_entry | 1)
      } else {
        thumb_movw_movt_bx(strip_thumb_bit(code_point), 12, trampoline_entry | 1)
      }
    } else {
      arm_ldr_pc_literal(strip_thumb_bit(code_point), trampoline_entry)
    }
  }

  fn is_reachable(&self, _code_point: usize, _trampoline_entry: usize) -> bool {
    // Both patch-site forms load an absolute 32-bit literal, so placement
    // is never range-constrained.
    true
  }

  fn default_hook_body(&self) -> Box<dyn HookBody> {
    Box::new(ArmHookBody)
  }
}

fn lowered_len(code_len: usize, relocations: &[RelocDescriptor]) -> usize {
  relocations
    .iter()
    .fold(code_len, |sum, r| sum + r.offset_add_end - r.instr_size)
}

// ---- Thumb-2 / ARM instruction encoders -----------------------------

/// Thumb-2 MOVW (T3, imm16 split across two halfwords) / MOVT (T1).
fn thumb_movw_movt(rd: u8, imm16: u16, is_movt: bool) -> [u8; 4] {
  let imm4 = ((imm16 >> 12) & 0xf) as u16;
  let i = ((imm16 >> 11) & 0x1) as u16;
  let imm3 = ((imm16 >> 8) & 0x7) as u16;
  let imm8 = (imm16 & 0xff) as u16;
  let op: u16 = if is_movt { 0b10_1100 } else { 0b10_0100 };

  let hw1: u16 = (0b1111_0 << 11) | (i << 10) | (op << 4) | imm4;
  let hw2: u16 = (imm3 << 12) | ((rd as u16) << 8) | imm8;

  let b1 = hw1.to_le_bytes();
  let b2 = hw2.to_le_bytes();
  [b1[0], b1[1], b2[0], b2[1]]
}

/// ARM A1 MOVW/MOVT (always-unconditional, cond = 0xE).
fn arm_movw_movt(rd: u8, imm16: u16, is_movt: bool) -> [u8; 4] {
  let imm4 = (imm16 >> 12) as u32 & 0xf;
  let imm12 = imm16 as u32 & 0xfff;
  let opcode: u32 = if is_movt { 0x0340_0000 } else { 0x0300_0000 };
  let word = 0xE000_0000u32 | opcode | (imm4 << 16) | ((rd as u32) << 12) | imm12;
  word.to_le_bytes()
}

fn split_imm32(value: u32) -> (u16, u16) {
  ((value & 0xffff) as u16, ((value >> 16) & 0xffff) as u16)
}

fn emit_movw_movt(thumb: bool, reg: u8, value: u32) -> CodeEmitter {
  let (lo, hi) = split_imm32(value);
  let mut emitter = CodeEmitter::new();
  if thumb {
    emitter.add_thunk(Box::new(thumb_movw_movt(reg, lo, false).to_vec()));
    emitter.add_thunk(Box::new(thumb_movw_movt(reg, hi, true).to_vec()));
  } else {
    emitter.add_thunk(Box::new(arm_movw_movt(reg, lo, false).to_vec()));
    emitter.add_thunk(Box::new(arm_movw_movt(reg, hi, true).to_vec()));
  }
  emitter
}

/// `movw ip,#lo(addr'); movt ip,#hi(addr'); b[l]x ip`. In Thumb mode, bit 0
/// of `addr'` is set unless this is a `blx` to ARM code; in ARM mode the
/// sense is reversed, since there the interworking instruction is always
/// `blx`/`bx` and bit 0 only needs to be set when the call is itself a
/// `blx` (switching to Thumb at the callee).
fn emit_bl(thumb: bool, addr: usize, is_blx: bool) -> Box<dyn Thunkable> {
  let target_bit0: u32 = if thumb {
    if is_blx {
      0
    } else {
      1
    }
  } else if is_blx {
    1
  } else {
    0
  };
  let addr = (addr as u32 & !1) | target_bit0;

  let mut out = CodeEmitter::new();
  out.add_thunk(Box::new(emit_movw_movt(thumb, 12, addr)));
  if thumb {
    out.add_thunk(Box::new(thumb_blx_ip().to_vec()));
  } else {
    out.add_thunk(Box::new(arm_blx_ip().to_vec()));
  }
  Box::new(out)
}

/// Thumb-1 `blx ip` (16-bit, BLX register encoding T1: `0100 0111 1 Rm(4) 000`).
fn thumb_blx_ip() -> [u8; 2] {
  let rm: u16 = 12;
  let hw: u16 = 0b0100_0111_1000_0000 | (rm << 3);
  hw.to_le_bytes()
}

/// ARM `blx ip` (A1 register form).
fn arm_blx_ip() -> [u8; 4] {
  let word = 0xE12F_FF30u32 | 12;
  word.to_le_bytes()
}

/// `movw Rn,#lo; movt Rn,#hi; ldr Rn, [Rn]`.
fn emit_ldr_pc(thumb: bool, reg: u8, addr: usize) -> Box<dyn Thunkable> {
  let mut emitter = CodeEmitter::new();
  emitter.add_thunk(Box::new(emit_movw_movt(thumb, reg, addr as u32)));
  emitter.add_thunk(Box::new(emit_ldr_indirect(thumb, reg)));
  Box::new(emitter)
}

fn emit_ldr_indirect(thumb: bool, reg: u8) -> Vec<u8> {
  if thumb {
    // ldr Rt, [Rn] (T1 encoding restricted to low registers; for reg <=7
    // this matches the inspector's own `reg <= 9` acceptance window only
    // loosely -- r8/r9 fall back to the T3 32-bit encoding with #0 offset.
    if reg <= 7 {
      let hw: u16 = 0b0110_1_00000_000_000 | ((reg as u16) << 3) | (reg as u16);
      hw.to_le_bytes().to_vec()
    } else {
      let hw1: u16 = 0b1111_1000_1101_0000 | (reg as u16);
      let hw2: u16 = (reg as u16) << 12;
      let mut out = hw1.to_le_bytes().to_vec();
      out.extend_from_slice(&hw2.to_le_bytes());
      out
    }
  } else {
    let word = 0xE590_0000u32 | ((reg as u32) << 16) | ((reg as u32) << 12);
    word.to_le_bytes().to_vec()
  }
}

/// `movw Rn,#lo; movt Rn,#hi` only (no load) -- used for `AddPc`/`MovAddr`.
fn emit_mov_addr(thumb: bool, reg: u8, addr: usize) -> Box<dyn Thunkable> {
  Box::new(emit_movw_movt(thumb, reg, addr as u32))
}

/// `cb{!n}z Rn, .+8; ldr.w pc, [pc, #0][; nop]; <literal>` (12 bytes).
///
/// The condition sense is inverted from the original `cbz`/`cbnz`: the cb
/// instruction here skips the `ldr.w pc` sequence when the *original*
/// condition does not hold, and falls through into it (loading `pc` and
/// branching to `addr`) when the original condition does hold. This avoids
/// an extra bridging unconditional branch.
fn emit_cb(addr: usize, reg: u8, not_zero: bool) -> Box<dyn Thunkable> {
  unsafe {
    Box::new(UnsafeThunk::new(
      move |base| {
        let mut out = Vec::with_capacity(12);
        // Encoding T1: 1011 0 op 1 i imm5 Rn (op at bit10, i at bit8,
        // imm5 at bit7:3). imm32 = 8 always: the ldr.w pc sequence that
        // follows is a fixed 10 bytes, biased by the cb instruction's
        // own +4 pc lookahead (2 (this instr) + 10 (ldr.w pc seq) - 4).
        let op: u16 = if !not_zero { 1 } else { 0 };
        let imm32: u16 = 8;
        let i = (imm32 >> 6) & 1;
        let imm5 = (imm32 >> 1) & 0x1f;
        let hw: u16 = 0xB200 | (op << 10) | (i << 8) | (imm5 << 3) | ((reg as u16) & 0x7);
        out.extend_from_slice(&hw.to_le_bytes());
        // `addr | 1`: the ldr.w pc load interworks on bit 0, and this
        // replaces a Thumb-only branch, so the resumed mode must be Thumb.
        out.extend_from_slice(&thumb_ldr_pc_literal(base + 2, addr | 1));
        out
      },
      12,
    ))
  }
}

/// `b<cond> .+k; ...; ldr[.w] pc, [pc, #k]; <literal>`.
///
/// Every shape is padded with trailing nops to the architecture/mode's
/// fixed `offset_add_end` (14 Thumb / 16 ARM, matching the conditional
/// bridge form), so `CheckCodeResult::is_consistent` holds regardless of
/// `cond`. Thumb literal loads carry the interworking bit (`addr | 1`):
/// `ldr pc, [...]` resumes in whatever mode bit 0 encodes, and this
/// replaces a Thumb-only branch.
fn emit_b(thumb: bool, addr: usize, cond: u8) -> Box<dyn Thunkable> {
  unsafe {
    if thumb {
      if cond == 14 {
        Box::new(UnsafeThunk::new(
          move |base| {
            let mut out = thumb_ldr_pc_literal(base, addr | 1);
            out.extend_from_slice(&[0x00, 0xbf, 0x00, 0xbf]); // nop x2, padding to 14 bytes
            out
          },
          14,
        ))
      } else {
        Box::new(UnsafeThunk::new(
          move |base| {
            let mut out = Vec::with_capacity(14);
            // b<cond> .+4 over an unconditional `b` that skips the
            // literal load when the condition is false.
            let hw: u16 = 0b1101_0000_00000010 | ((cond as u16) << 8);
            out.extend_from_slice(&hw.to_le_bytes());
            // unconditional `b .+10`: taken when the condition is false,
            // jumping over the 10-byte ldr.w pc + literal below.
            out.extend_from_slice(&0xE004u16.to_le_bytes());
            out.extend_from_slice(&thumb_ldr_pc_literal(base + 4, addr | 1));
            out
          },
          14,
        ))
      }
    } else if cond == 14 {
      Box::new(UnsafeThunk::new(
        move |base| {
          let mut out = arm_ldr_pc_literal(base, addr);
          // nop x2, padding to 16 bytes
          out.extend_from_slice(&0xE1A0_0000u32.to_le_bytes());
          out.extend_from_slice(&0xE1A0_0000u32.to_le_bytes());
          out
        },
        16,
      ))
    } else {
      Box::new(UnsafeThunk::new(
        move |base| {
          let mut out = Vec::with_capacity(16);
          out.extend_from_slice(&arm_branch(cond, false, 2));
          out.extend_from_slice(&arm_branch(14, false, 1));
          out.extend_from_slice(&arm_ldr_pc_literal(base + 8, addr));
          out
        },
        16,
      ))
    }
  }
}

/// ARM `b<cond>`/`bl<cond>` with a word-granularity displacement
/// (`imm24` counts words, biased by the pipeline's 8-byte lookahead).
fn arm_branch(cond: u8, link: bool, words: i32) -> [u8; 4] {
  let imm24 = (words - 2) as u32 & 0x00ff_ffff;
  let l: u32 = if link { 1 } else { 0 };
  let word = ((cond as u32) << 28) | (0b101 << 25) | (l << 24) | imm24;
  word.to_le_bytes()
}

/// `ldr.w pc, [pc, #0]` (or `#4` with a bridging nop) followed by the
/// literal word, aligned so the literal sits on a 4-byte boundary.
///
/// Always 10 bytes: the emitter needs a thunk's declared length to hold
/// regardless of the base address it ends up placed at, so the branch
/// that doesn't need a bridging nop for alignment still carries one,
/// trailing, as filler.
fn thumb_ldr_pc_literal(base: usize, target: usize) -> Vec<u8> {
  let after_instr = base + 4;
  let aligned = after_instr % 4 == 0;
  let mut out = Vec::with_capacity(10);
  if aligned {
    out.extend_from_slice(&[0xdf, 0xf8, 0x00, 0xf0]);
    out.extend_from_slice(&(target as u32).to_le_bytes());
    out.extend_from_slice(&[0x00, 0xbf]); // nop, filler to keep the length constant
  } else {
    out.extend_from_slice(&[0xdf, 0xf8, 0x04, 0xf0]);
    out.extend_from_slice(&[0x00, 0xbf]); // nop, bridges to 4-byte alignment
    out.extend_from_slice(&(target as u32).to_le_bytes());
  }
  out
}

/// `ldr pc, [pc, #-4]` followed by the literal word (ARM is always
/// 4-byte aligned, so no bridging nop is needed).
fn arm_ldr_pc_literal(_base: usize, target: usize) -> Vec<u8> {
  let mut out = Vec::with_capacity(8);
  out.extend_from_slice(&0xE51F_F004u32.to_le_bytes());
  out.extend_from_slice(&(target as u32).to_le_bytes());
  out
}

/// `movw ip,#lo; movt ip,#hi; bx ip` (10 bytes), used at unaligned Thumb
/// patch sites.
fn thumb_movw_movt_bx(_base: usize, reg: u8, target: usize) -> Vec<u8> {
  let (lo, hi) = split_imm32(target as u32);
  let mut out = Vec::with_capacity(10);
  out.extend_from_slice(&thumb_movw_movt(reg, lo, false));
  out.extend_from_slice(&thumb_movw_movt(reg, hi, true));
  let rm: u16 = reg as u16;
  let hw: u16 = 0b0100_0111_0000_0000 | (rm << 3);
  out.extend_from_slice(&hw.to_le_bytes());
  out
}

/// A minimal reference hook body for ARM/Thumb. Does not preserve
/// caller-saved registers -- see `crate::hookbody` module docs.
pub struct ArmHookBody;

impl HookBody for ArmHookBody {
  fn emit(&self, ctx_addr: usize, entry_callback: usize) -> Box<dyn Thunkable> {
    unsafe {
      Box::new(UnsafeThunk::new(
        move |_base| {
          let mut emitter = CodeEmitter::new();
          emitter.add_thunk(Box::new(emit_movw_movt(true, 0, ctx_addr as u32)));
          emitter.add_thunk(Box::new(emit_movw_movt(true, 12, entry_callback as u32)));
          emitter.add_thunk(Box::new(thumb_blx_ip().to_vec()));
          emitter.emit(0 as *const ())
        },
        18,
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::disasm::FixtureDecoder;

  fn backend() -> ArmBackend {
    ArmBackend
  }

  #[test]
  fn thumb_aligned_entry_needs_eight_bytes() {
    assert_eq!(min_overwrite_len(0x1001), 8);
  }

  #[test]
  fn thumb_unaligned_entry_needs_ten_bytes() {
    assert_eq!(min_overwrite_len(0x1003), 10);
  }

  #[test]
  fn arm_entry_needs_eight_bytes() {
    assert_eq!(min_overwrite_len(0x1000), 8);
  }

  #[test]
  fn relocates_a_bl_in_a_thumb_prologue() {
    let code_point = 0x1001usize;
    let mut decoder = FixtureDecoder::new();
    decoder.insert(0x1000, "bl #0x2000", 4, Some(0x2000));
    decoder.insert(0x1004, "mov r0, r0", 2, None);
    decoder.insert(0x1006, "mov r0, r0", 2, None);

    let result = backend().inspect_prologue(&mut decoder, code_point);
    assert_eq!(result.status, CheckStatus::Ok);
    assert_eq!(result.relocations.len(), 1);
    assert_matches!(result.relocations[0].kind, RelocKind::Bl { is_blx: false });
    assert!(result.is_consistent());
  }

  #[test]
  fn relocates_a_cbz_in_a_thumb_prologue() {
    let code_point = 0x1001usize;
    let mut decoder = FixtureDecoder::new();
    decoder.insert(0x1000, "cbz r2, #0x2000", 2, Some(0x2000));
    decoder.insert(0x1002, "mov r0, r0", 2, None);
    decoder.insert(0x1004, "mov r0, r0", 2, None);
    decoder.insert(0x1006, "mov r0, r0", 2, None);

    let result = backend().inspect_prologue(&mut decoder, code_point);
    assert_eq!(result.status, CheckStatus::Ok);
    assert_matches!(
      result.relocations[0].kind,
      RelocKind::Cb {
        reg: 2,
        not_zero: false
      }
    );
    assert!(result.is_consistent());
  }

  #[test]
  fn relocates_a_literal_pool_load() {
    let code_point = 0x1000usize;
    let mut decoder = FixtureDecoder::new();
    decoder.insert(0x1000, "ldr r3, [pc, #8]", 4, Some(0x1010));
    decoder.insert(0x1004, "mov r0, r0", 4, None);

    let result = backend().inspect_prologue(&mut decoder, code_point);
    assert_eq!(result.status, CheckStatus::Ok);
    assert_matches!(result.relocations[0].kind, RelocKind::LdrPc { reg: 3 });
  }

  #[test]
  fn short_branch_uses_architecture_minimum() {
    let code_point = 0x1000usize;
    let mut decoder = FixtureDecoder::new();
    decoder.insert(0x1000, "b #0xfc0", 4, Some(0xfc0));

    let result = backend().inspect_prologue(&mut decoder, code_point);
    assert_eq!(result.status, CheckStatus::NotAccepted);
  }

  #[test]
  fn detects_back_edge_into_overwritten_region() {
    let code_point = 0x1000usize;
    let mut decoder = FixtureDecoder::new();
    decoder.insert(0x1008, "b #0x1000", 4, Some(0x1000));

    let status = backend().check_back_edge(&mut decoder, code_point, 8);
    assert_eq!(status, CheckStatus::BackEdge);
  }

  #[test]
  fn thumb_ldr_pc_literal_is_always_ten_bytes_either_alignment() {
    assert_eq!(thumb_ldr_pc_literal(0x1000, 0x9000).len(), 10);
    assert_eq!(thumb_ldr_pc_literal(0x1002, 0x9000).len(), 10);
  }

  #[test]
  fn emit_cb_thunk_declares_its_actual_length() {
    let thunk = emit_cb(0x9000, 2, false);
    let code = thunk.generate(0x2000);
    assert_eq!(code.len(), thunk.len());
  }

  #[test]
  fn emit_b_conditional_thumb_thunk_declares_its_actual_length() {
    let thunk = emit_b(true, 0x9000, 0 /* eq */);
    let code = thunk.generate(0x2000);
    assert_eq!(code.len(), thunk.len());
  }

  #[test]
  fn unaligned_thumb_patch_site_uses_movw_movt_bx() {
    let bytes = thumb_movw_movt_bx(0x1003, 12, 0x9001);
    assert_eq!(bytes.len(), 10);
  }

  #[test]
  fn arm_mode_bl_relocation_keeps_interworking_bit_clear_for_arm_target() {
    // A relocated `bl label` (is_blx: false) in ARM mode calls an ARM
    // callee: the assembled `ip` must NOT carry the Thumb bit.
    let descriptor = RelocDescriptor {
      offset: 0,
      addr: 0x9000,
      instr_size: 4,
      offset_add_end: 12,
      kind: RelocKind::Bl { is_blx: false },
    };
    let thunk = backend().emit_relocation(0x1000, &descriptor, &[]);
    let code = thunk.generate(0x5000);
    assert_eq!(code.len(), 12);

    let (lo, hi) = split_imm32(0x9000);
    let mut expected = Vec::with_capacity(12);
    expected.extend_from_slice(&arm_movw_movt(12, lo, false));
    expected.extend_from_slice(&arm_movw_movt(12, hi, true));
    expected.extend_from_slice(&arm_blx_ip());
    assert_eq!(code, expected);
  }

  #[test]
  fn arm_mode_blx_relocation_sets_interworking_bit_for_thumb_target() {
    // A relocated `blx label` (is_blx: true) in ARM mode calls a Thumb
    // callee: `ip` must carry the Thumb bit.
    let descriptor = RelocDescriptor {
      offset: 0,
      addr: 0x9000,
      instr_size: 4,
      offset_add_end: 12,
      kind: RelocKind::Bl { is_blx: true },
    };
    let thunk = backend().emit_relocation(0x1000, &descriptor, &[]);
    let code = thunk.generate(0x5000);

    let (lo, hi) = split_imm32(0x9001);
    assert_eq!(&code[0..4], &arm_movw_movt(12, lo, false));
    assert_eq!(&code[4..8], &arm_movw_movt(12, hi, true));
  }

  #[test]
  fn thumb_cbz_relocation_round_trips_inverted_sense_and_interworking_bit() {
    let descriptor = RelocDescriptor {
      offset: 0,
      addr: 0x9000,
      instr_size: 2,
      offset_add_end: 12,
      kind: RelocKind::Cb {
        reg: 2,
        not_zero: false,
      },
    };
    let thunk = backend().emit_relocation(0x1001, &descriptor, &[]);
    assert_eq!(thunk.len(), 12);
    let code = thunk.generate(0x2000);

    let hw = u16::from_le_bytes([code[0], code[1]]);
    let op = (hw >> 10) & 1;
    let i = (hw >> 8) & 1;
    let imm5 = (hw >> 3) & 0x1f;
    let reg = hw & 0x7;
    // Original was cbz (not_zero: false); the replacement must use cbnz
    // (op == 1) so it falls through into the pc load exactly when the
    // original cbz condition (reg == 0) held.
    assert_eq!(op, 1);
    assert_eq!(reg, 2);
    assert_eq!((i << 6) | (imm5 << 1), 8);

    // The pc load immediately follows the 2-byte cb instruction, and the
    // literal carries the Thumb interworking bit.
    assert_eq!(&code[2..12], &thumb_ldr_pc_literal(0x2002, 0x9001)[..]);
  }

  #[test]
  fn thumb_unconditional_b_relocation_is_padded_to_fourteen_bytes() {
    let thunk = emit_b(true, 0x9000, 14);
    assert_eq!(thunk.len(), 14);
    let code = thunk.generate(0x2000);
    assert_eq!(code.len(), 14);
    assert_eq!(&code[0..10], &thumb_ldr_pc_literal(0x2000, 0x9001)[..]);
  }

  #[test]
  fn arm_unconditional_b_relocation_is_padded_to_sixteen_bytes() {
    let thunk = emit_b(false, 0x9000, 14);
    assert_eq!(thunk.len(), 16);
    let code = thunk.generate(0x2000);
    assert_eq!(&code[0..8], &arm_ldr_pc_literal(0x2000, 0x9000)[..]);
  }
}
