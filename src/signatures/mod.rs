// SPDX-License-Identifier: PMPL-1.0-or-later

//! Anomaly signatures matched against subject output.
//!
//! The set is a compile-time table: it is never mutated, so every session
//! reader can consult it without synchronisation.

use serde::{Deserialize, Serialize};

/// Fault family a matching line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    Sanitizer,
    UseAfterFree,
    BufferOverflow,
    DoubleFree,
    Segfault,
    Abort,
}

/// A substring that marks a line as a serious fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalySignature {
    pub pattern: &'static str,
    pub kind: AnomalyKind,
}

const fn sig(pattern: &'static str, kind: AnomalyKind) -> AnomalySignature {
    AnomalySignature { pattern, kind }
}

/// Ordered most-specific first so `classify` reports the narrowest kind.
pub const ANOMALY_SIGNATURES: &[AnomalySignature] = &[
    sig("heap-use-after-free", AnomalyKind::UseAfterFree),
    sig("heap-buffer-overflow", AnomalyKind::BufferOverflow),
    sig("stack-buffer-overflow", AnomalyKind::BufferOverflow),
    sig("double-free", AnomalyKind::DoubleFree),
    sig("ERROR: AddressSanitizer", AnomalyKind::Sanitizer),
    sig("AddressSanitizer", AnomalyKind::Sanitizer),
    sig("ASAN:", AnomalyKind::Sanitizer),
    sig("SEGV", AnomalyKind::Segfault),
    sig("SIGABRT", AnomalyKind::Abort),
];

/// Returns the first signature contained in `line`, if any.
pub fn classify(line: &str) -> Option<&'static AnomalySignature> {
    ANOMALY_SIGNATURES
        .iter()
        .find(|signature| line.contains(signature.pattern))
}
