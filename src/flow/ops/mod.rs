//! Poll-driven flow operators.
//!
//! One file per combinator family, each a [`FlowStream`](super::FlowStream)
//! adapter composed by the [`Flow`](super::Flow) methods.

pub mod buffer;
pub mod catch;
pub mod combine;
pub mod debounce;
pub mod distinct;
pub mod flat_map;
pub mod lifecycle;
pub mod map;
pub mod merge;
pub mod scan;
pub mod skip;
pub mod take;
pub mod zip;
