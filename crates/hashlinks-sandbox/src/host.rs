use crate::binding::BindingDescriptor;
use crate::error::SandboxResult;

/// Compiles and instantiates action modules.
///
/// Implementations are synchronous; the executor drives them on a blocking
/// thread.
pub trait ModuleSandbox: Send + Sync {
    fn instantiate(
        &self,
        module: &[u8],
        binding: &BindingDescriptor,
    ) -> SandboxResult<Box<dyn ModuleInstance>>;
}

/// One live module instance, bound through its descriptor.
///
/// Every call returns the module's JSON-encoded string result.
pub trait ModuleInstance: Send {
    fn info(&mut self) -> SandboxResult<String>;

    fn get(&mut self, action: &str, params: &str, network: &str) -> SandboxResult<String>;

    fn post(
        &mut self,
        action: &str,
        params: &str,
        network: &str,
        memo: &str,
    ) -> SandboxResult<String>;

    /// Free instance-side resources. Always called once, after the last
    /// call.
    fn release(&mut self) -> SandboxResult<()>;
}
