// This module defines the error types of the code generation driver using the thiserror
// crate. TargetError covers triple resolution (unknown target, machine creation declined),
// CodegenInitError is returned by a target machine that cannot schedule file emission,
// EmitError covers everything that can go wrong once emission starts (opening the output,
// verification, code generation, writing), and IrGenError is the driver-level error every
// other kind converts into. Each driver error maps onto one diagnostic identifier so the
// driver can report it exactly once; Upstream is the exception, since the front end has
// already reported it.

//! Error types for the code generation driver.

use crate::diagnostics::{DiagId, Diagnostic};
use crate::ir::{BitcodeError, VerifyError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to resolve a triple into a target machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("no target for triple '{triple}': {reason}")]
    UnknownTarget { triple: String, reason: String },

    #[error("target '{target}' cannot create a machine for '{triple}': {reason}")]
    MachineCreation {
        target: String,
        triple: String,
        reason: String,
    },
}

/// The target machine cannot schedule passes for the requested file type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("target '{target}' cannot emit {file_type} files")]
pub struct CodegenInitError {
    pub target: String,
    pub file_type: String,
}

/// Failure while running the pipeline or emitting the artifact.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("error opening '{}' for output: {source}", .path.display())]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Verification(#[from] VerifyError),

    #[error(transparent)]
    CodegenInit(#[from] CodegenInitError),

    #[error("code generation failed for @{function}: {reason}")]
    Codegen { function: String, reason: String },

    #[error("cannot write output: {0}")]
    Write(#[from] io::Error),

    #[error(transparent)]
    Bitcode(#[from] BitcodeError),

    #[error("cannot build object file: {0}")]
    Object(#[from] object::write::Error),
}

pub type EmitResult<T> = Result<T, EmitError>;

/// Driver-level error; terminates the invocation.
#[derive(Error, Debug)]
pub enum IrGenError {
    #[error("no target for triple '{triple}': {reason}")]
    UnknownTarget { triple: String, reason: String },

    #[error("cannot create target machine for '{triple}': {reason}")]
    MachineCreation { triple: String, reason: String },

    #[error("error opening '{}' for output: {source}", .path.display())]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("module verification failed: {0}")]
    Verification(VerifyError),

    #[error("cannot initialize code generation: {0}")]
    CodegenInit(CodegenInitError),

    #[error("emission failed: {reason}")]
    Emission { reason: String },

    /// The translation unit carries front-end errors that were already reported.
    #[error("translation unit has front-end errors")]
    Upstream,
}

pub type IrGenResult<T> = Result<T, IrGenError>;

impl IrGenError {
    pub fn diag_id(&self) -> Option<DiagId> {
        match self {
            IrGenError::UnknownTarget { .. } => Some(DiagId::NoTarget),
            IrGenError::MachineCreation { .. } => Some(DiagId::NoTargetMachine),
            IrGenError::OutputOpen { .. } => Some(DiagId::ErrorOpeningOutput),
            IrGenError::Verification(_) => Some(DiagId::VerificationFailed),
            IrGenError::CodegenInit(_) => Some(DiagId::CodegenInitFailed),
            IrGenError::Emission { .. } => Some(DiagId::EmissionFailed),
            IrGenError::Upstream => None,
        }
    }

    /// The diagnostic to report, or `None` when it was already reported upstream.
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        self.diag_id().map(|id| Diagnostic::error(id, self.to_string()))
    }
}

impl From<TargetError> for IrGenError {
    fn from(err: TargetError) -> Self {
        match err {
            TargetError::UnknownTarget { triple, reason } => {
                IrGenError::UnknownTarget { triple, reason }
            }
            TargetError::MachineCreation { triple, reason, .. } => {
                IrGenError::MachineCreation { triple, reason }
            }
        }
    }
}

impl From<EmitError> for IrGenError {
    fn from(err: EmitError) -> Self {
        match err {
            EmitError::OutputOpen { path, source } => IrGenError::OutputOpen { path, source },
            EmitError::Verification(err) => IrGenError::Verification(err),
            EmitError::CodegenInit(err) => IrGenError::CodegenInit(err),
            other => IrGenError::Emission {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_is_not_reported() {
        assert!(IrGenError::Upstream.to_diagnostic().is_none());
    }

    #[test]
    fn test_output_open_mentions_path() {
        let err = IrGenError::from(EmitError::OutputOpen {
            path: PathBuf::from("/no/such/dir/out.o"),
            source: io::Error::new(io::ErrorKind::NotFound, "not found"),
        });
        let diag = err.to_diagnostic().unwrap();
        assert_eq!(diag.id, DiagId::ErrorOpeningOutput);
        assert!(diag.message.contains("/no/such/dir/out.o"));
    }

    #[test]
    fn test_target_error_keeps_triple() {
        let err = IrGenError::from(TargetError::UnknownTarget {
            triple: "bogus".into(),
            reason: "unrecognized architecture".into(),
        });
        assert_eq!(err.diag_id(), Some(DiagId::NoTarget));
        assert!(err.to_string().contains("'bogus'"));
    }
}
