//! 能力层：注册表、执行器与内置能力（echo / bash_executor / python_executor / file_editor）

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod python;
pub mod registry;
pub mod shell;

pub use echo::EchoCapability;
pub use executor::CapabilityExecutor;
pub use filesystem::{FileEditor, SafeFs};
pub use python::PythonExecutor;
pub use registry::{Capability, CapabilityRegistry, InvocationContext};
pub use shell::BashExecutor;
