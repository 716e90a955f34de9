//! Error types and utilities.

use thiserror::Error;

use crate::check::CheckStatus;

/// The result of an engine operation.
pub type Result<T> = std::result::Result<T, Error>;

/// A representation of all possible errors.
#[derive(Debug, Error)]
pub enum Error {
  /// The address for the target and detour are identical.
  #[error("target and detour address are identical")]
  SameAddress,
  /// The target's prologue could not be fully relocated.
  #[error("prologue contains an instruction this engine cannot relocate")]
  NotAccepted,
  /// Code following the prologue branches back into the overwritten region.
  #[error("code following the prologue branches back into the overwritten region")]
  BackEdge,
  /// The prologue ended before the architecture's minimum overwrite length.
  #[error("prologue is shorter than the minimum overwrite length")]
  TooSmall,
  /// Reserved status for early-exit conditions during inspection.
  #[error("inspection stopped on a child-exit condition")]
  ChildExit,
  /// Reserved status for architecture-specific rejections.
  #[error("rejected by an architecture-specific rule")]
  ArchDefined2,
  /// The address has no available area for patching.
  #[error("cannot find an inline patch area")]
  NoPatchArea,
  /// The address is not executable memory.
  #[error("address is not executable")]
  NotExecutable,
  /// The system is out of executable memory.
  #[error("cannot allocate executable memory near the target")]
  OutOfMemory,
  /// No reachable encoding exists between the patch site and the trampoline.
  #[error("trampoline is not reachable from the patch site")]
  JumpTooFar,
  /// A memory operation failed.
  #[error(transparent)]
  RegionFailure(#[from] region::Error),
}

impl Error {
  /// Maps a non-`Ok` [`CheckStatus`] to its corresponding error.
  ///
  /// Returns `None` for `CheckStatus::Ok`, since that status does not
  /// represent a failure.
  pub fn from_check_status(status: CheckStatus) -> Option<Error> {
    match status {
      CheckStatus::Ok => None,
      CheckStatus::NotAccepted => Some(Error::NotAccepted),
      CheckStatus::BackEdge => Some(Error::BackEdge),
      CheckStatus::TooSmall => Some(Error::TooSmall),
      CheckStatus::ChildExit => Some(Error::ChildExit),
      CheckStatus::ArchDefined2 => Some(Error::ArchDefined2),
    }
  }
}
