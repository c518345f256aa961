//! Sandboxed execution of block actions.
//!
//! An action is a module plus a binding descriptor. The descriptor maps the
//! module's raw exports onto the `GET`, `POST` and `INFO` entry points;
//! modules published without one are never invoked.
//!
//! - [`ModuleExecutor`] looks an action up, fetches and verifies its module,
//!   and runs one call on a blocking thread under a timeout.
//! - [`WasmtimeSandbox`] is the production [`ModuleSandbox`], with fuel
//!   metering and a memory ceiling.

pub mod binding;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod wasm;

pub use binding::{BindingDescriptor, EntryExports, EntryPoint, ABI_VERSION};
pub use config::{ExecutorConfig, SandboxLimits};
pub use error::{SandboxError, SandboxResult};
pub use executor::{ActionCall, ExecutionResult, ModuleExecutor};
pub use host::{ModuleInstance, ModuleSandbox};
pub use wasm::{WasmtimeSandbox, HOST_MODULE};
