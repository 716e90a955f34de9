//! The fixed hook-body template: the machine code a trampoline runs
//! before falling through into the relocated prologue, responsible for
//! invoking the caller's entry callback (and, on the return path, the
//! return callback).
//!
//! Explicitly out of scope per the behavioral spec (§1): register
//! preservation across arbitrary target calling conventions, symbol
//! resolution, and the return-address trampoline are embedder concerns.
//! This module only defines the seam (`HookBody`) that the trampoline
//! builder consumes, plus a minimal reference implementation per
//! architecture so the crate is runnable end to end without requiring
//! every embedder to supply one.

use crate::pic::Thunkable;

/// Emits the machine code that invokes the entry callback with the
/// installed [`crate::context::CodeContext`]'s address as its sole
/// argument, following the architecture's plain C calling convention.
pub trait HookBody: Send + Sync {
  /// Builds the thunk. `ctx_addr` is the address of the `CodeContext`;
  /// `entry_callback` is the caller-supplied function to invoke.
  fn emit(&self, ctx_addr: usize, entry_callback: usize) -> Box<dyn Thunkable>;
}
