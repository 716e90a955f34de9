//! A native-code hooking and trampoline-relocation engine for ARM (A32/T32)
//! and x86-64.
//!
//! ## Intro
//!
//! This crate inspects a function's prologue, relocates the displaced
//! instructions into freshly allocated executable memory, and overwrites the
//! prologue with a jump into that trampoline. The trampoline runs a hook
//! body, then the relocated prologue, then jumps back into the target past
//! the overwritten region.
//!
//! Unlike a disassembler-bundling hooking library, this crate treats
//! instruction decoding as an external collaborator: implement
//! [`disasm::InstructionDecoder`] against whatever decoder your target
//! platform already has, and this crate handles inspection, relocation, and
//! patching on top of it.
//!
//! Handled edge cases:
//!
//! - PC-relative branches and loads (`bl`, `b`, `cbz`/`cbnz`, `ldr pc,[pc,#n]`,
//!   `add rn, pc, #n`) on ARM/Thumb, relocated with position-independent
//!   replacement sequences.
//! - ARM/Thumb interworking, including the Thumb-bit convention and the two
//!   alignment-dependent patch-site encodings.
//! - `rip`-relative operands on x86-64, rejected rather than relocated.
//! - Back-edges: code immediately following the prologue that branches back
//!   into the overwritten region.
//!
//! ## Architecture
//!
//! Per-architecture behavior lives behind the [`backend::Backend`] trait,
//! implemented by [`backend::ArmBackend`] and [`backend::X64Backend`].
//! [`engine::Engine`] ties a `Backend` together with the pluggable
//! collaborators it needs: an [`disasm::InstructionDecoder`], a
//! [`memory::CodeManager`] to allocate trampoline memory, a
//! [`memory::MemoryModifier`] to apply the patch, and a [`memory::CacheFlush`]
//! to invalidate the instruction cache afterwards.
//!
//! ## Scope
//!
//! This crate has no uninstall path: once [`engine::Engine::install_hooks`]
//! succeeds for a request, the trampoline and its [`context::CodeContext`]
//! are leaked for the process lifetime. Register preservation across the
//! hook body, symbol resolution, and a return-address trampoline are
//! embedder concerns — see [`hookbody`].

#[cfg(test)]
#[macro_use]
extern crate matches;

#[macro_use]
extern crate lazy_static;

// Re-exports
pub use backend::{Architecture, Backend};
pub use context::{CodeContext, HookRequest};
pub use disasm::{DecodedInstruction, FixtureDecoder, InstructionDecoder};
pub use engine::{Engine, HookLogger, NoopHookLogger};
pub use error::Error;

// Modules
mod alloc;
mod backend;
mod check;
mod context;
mod disasm;
mod engine;
mod error;
mod hookbody;
mod memory;
mod patcher;
mod pic;
mod trampoline;
mod util;
