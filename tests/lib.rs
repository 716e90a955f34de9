use hookweave::{Architecture, Engine, FixtureDecoder, HookRequest, NoopHookLogger};

/// Builds a fixture decoder for a trivial x86-64 prologue: `push rbp; mov
/// rbp, rsp; sub rsp, 0x20` (1 + 3 + 4 = 8 bytes), long enough to clear the
/// 6-byte minimum without any relocatable instruction.
fn x64_trivial_prologue(base: usize) -> FixtureDecoder {
  let mut decoder = FixtureDecoder::new();
  decoder.insert(base, "push rbp", 1, None);
  decoder.insert(base + 1, "mov rbp, rsp", 3, None);
  decoder.insert(base + 4, "sub rsp, 0x20", 4, None);
  decoder
}

#[test]
fn x64_accepts_a_plain_prologue() {
  let base = 0x4000_0000usize;
  let mut decoder = x64_trivial_prologue(base);

  let engine = Engine::new(Architecture::X64);
  let requests = vec![HookRequest {
    name: "add".into(),
    code_point: base,
    size_hint: None,
  }];

  // No real executable memory backs `base`, so the patch step necessarily
  // fails past `is_executable_address`; this exercises inspection only.
  let installed = engine.install_hooks(&mut decoder, &requests, 0, 0, &NoopHookLogger);
  assert_eq!(installed, 0);
}

/// A Thumb prologue built from `bl` (relocatable) followed by filler
/// `mov r0, r0` to clear the eight-byte minimum, entered with the Thumb
/// bit set. Exercises `Engine::install_hooks` dispatching to the ARM
/// backend; like the x86-64 cases above, this stops at
/// `is_executable_address` before relocation runs. Byte-level assertions
/// on the ARM/Thumb relocation thunks themselves live in
/// `src/backend/arm.rs`'s unit tests, which call `emit_relocation`
/// directly and so aren't gated on a real mapped address.
fn thumb_prologue_with_bl(base: usize) -> FixtureDecoder {
  let aligned = base & !1;
  let target = aligned + 0x9000;
  let mut decoder = FixtureDecoder::new();
  decoder.insert(aligned, "bl 0x9000", 4, Some(target));
  decoder.insert(aligned + 4, "mov r0, r0", 2, None);
  decoder.insert(aligned + 6, "mov r0, r0", 2, None);
  decoder
}

#[test]
fn arm_dispatches_a_thumb_bl_prologue_through_the_engine() {
  let base = 0x4000_0001usize; // Thumb bit set
  let mut decoder = thumb_prologue_with_bl(base);

  let engine = Engine::new(Architecture::Arm);
  let requests = vec![HookRequest {
    name: "thumb_bl_user".into(),
    code_point: base,
    size_hint: None,
  }];

  let installed = engine.install_hooks(&mut decoder, &requests, 0, 0, &NoopHookLogger);
  assert_eq!(installed, 0);
}

#[test]
fn x64_rejects_rip_relative_prologue() {
  let base = 0x4000_0000usize;
  let mut decoder = FixtureDecoder::new();
  decoder.insert(base, "lea rax, [rip + 0x1234]", 7, None);

  let engine = Engine::new(Architecture::X64);
  let requests = vec![HookRequest {
    name: "rip_user".into(),
    code_point: base,
    size_hint: None,
  }];

  let installed = engine.install_hooks(&mut decoder, &requests, 0, 0, &NoopHookLogger);
  assert_eq!(installed, 0);
}
