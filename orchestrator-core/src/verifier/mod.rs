//! Verification Strategy: pluggable validators run against a project after
//! an agent iteration. See spec §4.3.

pub mod kinds;
pub mod pipeline;

pub use kinds::{
    create_composite, create_verifier, CompositeOptions, CompositeVerifier, LintVerifier,
    NoneVerifier, SecurityVerifier, TestVerifier, Verifier, VerifierContext,
};
