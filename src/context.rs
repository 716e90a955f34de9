//! Per-hook state that outlives the installation pipeline.

/// A single hook request handed to [`crate::engine::Engine::install_hooks`].
#[derive(Debug, Clone)]
pub struct HookRequest {
  /// Human-readable name used in logs and `CodeContext::name`.
  pub name: String,
  /// The function's entry address. Bit 0 encodes the ARM Thumb state;
  /// on x86-64 it must always be clear.
  pub code_point: usize,
  /// An optional hint for how many bytes of prologue the caller expects
  /// to be relocatable. Purely advisory — the inspector always decides
  /// for itself.
  pub size_hint: Option<usize>,
}

/// Context for one installed (or attempted) hook.
///
/// Created by the engine once a [`crate::check::CheckCodeResult`] with
/// `status == Ok` has been produced, and kept alive for the process
/// lifetime: this engine does not support uninstalling a hook.
#[derive(Debug)]
pub struct CodeContext {
  /// Name carried over from the originating [`HookRequest`].
  pub name: String,
  /// The original function's entry address (Thumb bit preserved).
  pub code_point: usize,
  /// The trampoline's entry address (Thumb bit preserved), filled in once
  /// the trampoline builder has placed it in executable memory.
  pub trampoline_addr: usize,
  /// Address of the caller-supplied entry callback.
  pub entry_callback: usize,
  /// Address of the caller-supplied return callback.
  pub return_callback: usize,
}

impl CodeContext {
  pub(crate) fn new(
    name: String,
    code_point: usize,
    entry_callback: usize,
    return_callback: usize,
  ) -> Self {
    CodeContext {
      name,
      code_point,
      trampoline_addr: 0,
      entry_callback,
      return_callback,
    }
  }
}
