//! Probe contract and the built-in probe bodies.

pub mod cpu;
pub mod factory;
pub mod memory;
pub mod traits;

pub use cpu::{CpuSampleProbe, StackSource};
pub use factory::ProbeKind;
pub use memory::MemoryProbe;
pub use traits::{Probe, ProbeError};
