//! The installation pipeline: inspect a prologue, check for back edges,
//! build a trampoline, patch the target. Ties the architecture `Backend`
//! together with the external collaborators (`InstructionDecoder`,
//! `CodeManager`, `MemoryModifier`, `CacheFlush`).
//!
//! Grounded on the teacher's `arch/detour.rs` (`Detour::new`'s sequencing
//! of allocation-then-patch, and its `POOL`-guarded `toggle`) for the
//! overall shape, generalized from "one detour" to a batch entry point
//! that never unpatches.

use tracing::{debug, warn};

use crate::backend::{Architecture, Backend};
use crate::check::CheckStatus;
use crate::context::{CodeContext, HookRequest};
use crate::disasm::InstructionDecoder;
use crate::error::Error;
use crate::hookbody::HookBody;
use crate::memory::{CacheFlush, CodeManager, MemoryModifier, NoopCacheFlush, PooledCodeManager, RegionMemoryModifier};
use crate::{patcher, trampoline};

/// Receives per-hook failures during a batch installation. Never aborts
/// the batch; purely observational.
pub trait HookLogger {
  fn log_failure(&self, request: &HookRequest, error: &Error);
}

/// A `HookLogger` that discards every failure. Installation failures are
/// still visible through `tracing` regardless of whether a logger is
/// supplied (see SPEC_FULL.md §7).
pub struct NoopHookLogger;

impl HookLogger for NoopHookLogger {
  fn log_failure(&self, _request: &HookRequest, _error: &Error) {}
}

/// Owns the collaborators an installation pipeline needs and exposes the
/// batch entry point. Stateless beyond its collaborators -- every
/// `CodeContext` it produces is independent and outlives the `Engine`.
pub struct Engine {
  backend: Box<dyn Backend>,
  code_manager: Box<dyn CodeManager>,
  memory_modifier: Box<dyn MemoryModifier>,
  cache_flush: Box<dyn CacheFlush>,
  hook_body: Box<dyn HookBody>,
}

impl Engine {
  /// Builds an engine using this crate's default collaborators (the
  /// proximity `CodeManager`, the `region`-backed `MemoryModifier`, a
  /// no-op `CacheFlush`, and the architecture's minimal reference hook
  /// body).
  pub fn new(architecture: Architecture) -> Self {
    let backend = architecture.backend();
    let hook_body = backend.default_hook_body();
    Engine {
      backend,
      code_manager: Box::new(PooledCodeManager),
      memory_modifier: Box::new(RegionMemoryModifier),
      cache_flush: Box::new(NoopCacheFlush),
      hook_body,
    }
  }

  /// Substitutes one of the default collaborators. Intended for tests
  /// and for embedders that need a custom `CodeManager`/`MemoryModifier`/
  /// `CacheFlush`/`HookBody`.
  pub fn with_collaborators(
    architecture: Architecture,
    code_manager: Box<dyn CodeManager>,
    memory_modifier: Box<dyn MemoryModifier>,
    cache_flush: Box<dyn CacheFlush>,
    hook_body: Box<dyn HookBody>,
  ) -> Self {
    Engine {
      backend: architecture.backend(),
      code_manager,
      memory_modifier,
      cache_flush,
      hook_body,
    }
  }

  /// Runs the installation pipeline for every request, returning the
  /// number that succeeded. `entry_callback`/`return_callback` are
  /// invoked by the hook body template; their ABI is fixed by it.
  pub fn install_hooks(
    &self,
    decoder: &mut dyn InstructionDecoder,
    requests: &[HookRequest],
    entry_callback: usize,
    return_callback: usize,
    logger: &dyn HookLogger,
  ) -> usize {
    let mut installed = 0usize;

    for request in requests {
      match self.install_one(decoder, request, entry_callback, return_callback) {
        Ok(()) => {
          installed += 1;
        }
        Err(error) => {
          warn!(code_point = request.code_point, name = %request.name, error = %error, "hook rejected");
          logger.log_failure(request, &error);
        }
      }
    }

    installed
  }

  fn install_one(
    &self,
    decoder: &mut dyn InstructionDecoder,
    request: &HookRequest,
    entry_callback: usize,
    return_callback: usize,
  ) -> Result<(), Error> {
    let code_point = request.code_point;

    if !crate::util::is_executable_address((code_point & !1usize) as *const ())? {
      return Err(Error::NotExecutable);
    }

    let result = self.backend.inspect_prologue(decoder, code_point);
    if let Some(error) = Error::from_check_status(result.status) {
      return Err(error);
    }
    debug_assert!(result.is_consistent(), "inspector produced an inconsistent CheckCodeResult");
    debug!(code_point = code_point, name = %request.name, len = result.code_len_to_replace, "prologue accepted");

    let back_edge = self
      .backend
      .check_back_edge(decoder, code_point, result.code_len_to_replace);
    if back_edge != CheckStatus::Ok {
      if let Some(error) = Error::from_check_status(back_edge) {
        return Err(error);
      }
    }

    let original = unsafe { std::slice::from_raw_parts(code_point as *const u8, result.code_len_to_replace) };

    // Boxed and leaked below: a `CodeContext` lives for the process
    // lifetime (this engine never uninstalls), and the hook body bakes
    // its address into the trampoline as a literal, so it must never
    // move or be freed once installation succeeds.
    let mut context = Box::new(CodeContext::new(
      request.name.clone(),
      code_point,
      entry_callback,
      return_callback,
    ));
    let ctx_addr = context.as_ref() as *const CodeContext as usize;

    let built = trampoline::build(
      self.backend.as_ref(),
      self.code_manager.as_ref(),
      self.hook_body.as_ref(),
      &result,
      original,
      ctx_addr,
      entry_callback,
    )?;

    let patch = patcher::build(self.backend.as_ref(), code_point, built.patch_target, built.memory.as_ptr() as usize)?;

    self.cache_flush.flush(built.memory.as_ptr() as usize, built.memory.len());

    if self.memory_modifier.apply(&[patch.install]) != 1 {
      return Err(Error::NoPatchArea);
    }

    context.trampoline_addr = built.callable_address;
    // Keep the trampoline's backing memory and the context itself alive
    // for the process lifetime by leaking them.
    Box::leak(context);
    Box::leak(Box::new(built.memory));
    Ok(())
  }
}
