//! Task declarations: ports, parameters and invocation contracts.

mod spec;

pub use crate::core::ArtifactKind;
pub use spec::{
    CommandContract, InputPort, InvocationContract, OutputPort, ParamValue, TaskSpec,
};
