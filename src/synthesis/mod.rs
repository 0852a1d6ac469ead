//! Capability synthesis: static validation plus the pipeline.

pub mod generator;
pub mod validator;

pub use generator::{SynthesisOutcome, SynthesisPipeline, SynthesisStatus};
pub use validator::{StaticValidator, TypeChecker, ValidationFinding, ValidationReport};
