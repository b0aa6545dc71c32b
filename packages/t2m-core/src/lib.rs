//! Shared domain model for the T2M benchmark: the IR instruction set, its
//! validator, the memory record shape, and the generated-sample types that
//! `t2m-engine` and `t2m-bench` build on.

pub mod duration;
pub mod error;
pub mod ir;
pub mod record;
pub mod sample;
pub mod validate;

pub use duration::parse_iso_duration;
pub use error::{Error, Result};
pub use ir::{Ir, IrArgs, Stage, TargetSpec};
pub use record::MemoryRecord;
pub use sample::GenerationSample;
pub use validate::validate_ir;
