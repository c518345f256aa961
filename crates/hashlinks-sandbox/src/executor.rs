use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use hashlinks_crypto::{verify_hash, HashAlgorithm, IntegrityError};
use hashlinks_types::{
    merge_attributes, ActionRegistry, Attributes, CollaboratorError, ContentResolver,
    ResolveOptions, ResolvedContent,
};

use crate::binding::{BindingDescriptor, EntryPoint};
use crate::config::ExecutorConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::host::{ModuleInstance, ModuleSandbox};

/// Outcome of one action call. Execution faults never escape as errors.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionResult {
    Success(Value),
    Failure { error: String },
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure { error } => Some(error),
        }
    }

    /// The result as reported to callers: the module's own document, or
    /// `{ "success": false, "error": ... }`.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::Failure { error } => json!({ "success": false, "error": error }),
        }
    }

    /// Interpret a module's raw string output.
    ///
    /// Non-JSON output is wrapped as `{ "value": <raw> }`. A document that
    /// says `"success": false` is a failure.
    pub fn from_output(raw: &str) -> Self {
        let value: Value =
            serde_json::from_str(raw).unwrap_or_else(|_| json!({ "value": raw }));
        if value.get("success") == Some(&Value::Bool(false)) {
            let error = value
                .get("error")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("action reported failure");
            return Self::failure(error);
        }
        Self::Success(value)
    }
}

/// One call to an action's entry point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionCall {
    /// Operation name handed to the module.
    pub action: String,
    pub entry: EntryPoint,
    pub params: Attributes,
    /// Current block-state attributes. Explicit params win on collision.
    pub state: Attributes,
    pub memo: Option<String>,
}

impl ActionCall {
    pub fn get(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entry: EntryPoint::Get,
            ..Self::default()
        }
    }

    pub fn post(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entry: EntryPoint::Post,
            ..Self::default()
        }
    }

    pub fn info() -> Self {
        Self {
            entry: EntryPoint::Info,
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Attributes) -> Self {
        self.params = params;
        self
    }

    pub fn with_state(mut self, state: Attributes) -> Self {
        self.state = state;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// State attributes overlaid with the explicit params, as JSON.
    fn params_json(&self) -> SandboxResult<String> {
        let mut merged = self.state.clone();
        merge_attributes(&mut merged, &self.params);
        serde_json::to_string(&merged).map_err(|e| SandboxError::Abi(e.to_string()))
    }
}

/// Looks up, verifies, and runs action modules.
pub struct ModuleExecutor {
    registry: Arc<dyn ActionRegistry>,
    content: Arc<dyn ContentResolver>,
    sandbox: Arc<dyn ModuleSandbox>,
    config: ExecutorConfig,
}

impl ModuleExecutor {
    pub fn new(
        registry: Arc<dyn ActionRegistry>,
        content: Arc<dyn ContentResolver>,
        sandbox: Arc<dyn ModuleSandbox>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            content,
            sandbox,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `call` against the action registered under `action_reference`.
    pub async fn execute(&self, action_reference: &str, call: &ActionCall) -> ExecutionResult {
        match self.try_execute(action_reference, call).await {
            Ok(raw) => {
                debug!(action = %action_reference, entry = %call.entry, "action completed");
                ExecutionResult::from_output(&raw)
            }
            Err(e) => {
                warn!(action = %action_reference, entry = %call.entry, error = %e, "action failed");
                ExecutionResult::failure(e.to_string())
            }
        }
    }

    /// Call the action's `INFO` entry point.
    pub async fn info(&self, action_reference: &str) -> ExecutionResult {
        self.execute(action_reference, &ActionCall::info()).await
    }

    async fn try_execute(&self, action_reference: &str, call: &ActionCall) -> SandboxResult<String> {
        let registration = self
            .bounded(self.registry.get_action_by_reference(action_reference))
            .await
            .map_err(|e| fetch_error(action_reference, e))?
            .ok_or_else(|| SandboxError::ActionNotFound(action_reference.to_string()))?;

        // The descriptor defines the calling convention; without one there is
        // nothing safe to call.
        let wrapper = registration
            .wrapper_reference
            .as_deref()
            .ok_or_else(|| SandboxError::MissingWrapper(action_reference.to_string()))?;

        let module = self
            .fetch(&registration.module_reference, ResolveOptions::raw(self.config.network))
            .await?;
        if let Some(expected) = &registration.module_hash {
            let algorithm = if expected.len() == HashAlgorithm::Blake3_512.hex_len() {
                HashAlgorithm::Blake3_512
            } else {
                HashAlgorithm::Blake3
            };
            if !verify_hash(&module.content, expected, algorithm) {
                return Err(IntegrityError::ContentHashMismatch {
                    id: registration.module_reference.clone(),
                    expected: expected.clone(),
                }
                .into());
            }
        }

        let descriptor = self
            .fetch(wrapper, ResolveOptions::new(self.config.network))
            .await?;
        let binding = BindingDescriptor::parse(&descriptor.content)?;

        let invocation = Invocation {
            entry: call.entry,
            action: call.action.clone(),
            params: call.params_json()?,
            network: self.config.network.to_string(),
            memo: call.memo.clone().unwrap_or_default(),
        };
        let sandbox = Arc::clone(&self.sandbox);
        let code = module.content;

        // The blocking task keeps running after a timeout until its fuel
        // runs out; the caller is not held up by it.
        let task = tokio::task::spawn_blocking(move || {
            let mut instance = sandbox.instantiate(&code, &binding)?;
            let output = invocation.run(&mut *instance);
            if let Err(e) = instance.release() {
                warn!(error = %e, "module release failed");
            }
            output
        });
        match tokio::time::timeout(self.config.timeout(), task).await {
            Err(_) => Err(SandboxError::Timeout),
            Ok(Err(join)) => Err(SandboxError::Panicked(join.to_string())),
            Ok(Ok(output)) => output,
        }
    }

    async fn fetch(&self, reference: &str, options: ResolveOptions) -> SandboxResult<ResolvedContent> {
        self.bounded(self.content.resolve(reference, &options))
            .await
            .map_err(|e| fetch_error(reference, e))
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        match tokio::time::timeout(self.config.timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout),
        }
    }
}

fn fetch_error(reference: &str, error: CollaboratorError) -> SandboxError {
    match error {
        CollaboratorError::Timeout => SandboxError::Timeout,
        source => SandboxError::Fetch {
            reference: reference.to_string(),
            source,
        },
    }
}

/// Everything a blocking call needs, owned.
struct Invocation {
    entry: EntryPoint,
    action: String,
    params: String,
    network: String,
    memo: String,
}

impl Invocation {
    fn run(&self, instance: &mut dyn ModuleInstance) -> SandboxResult<String> {
        match self.entry {
            EntryPoint::Info => instance.info(),
            EntryPoint::Get => instance.get(&self.action, &self.params, &self.network),
            EntryPoint::Post => {
                instance.post(&self.action, &self.params, &self.network, &self.memo)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use hashlinks_crypto::hash;
    use hashlinks_types::{ActionRegistration, InMemoryActionRegistry, InMemoryContentResolver};

    /// Instance whose calls echo their inputs as JSON.
    struct ScriptedInstance {
        released: Arc<AtomicUsize>,
        fail: bool,
        stall: Option<Duration>,
    }

    impl ModuleInstance for ScriptedInstance {
        fn info(&mut self) -> SandboxResult<String> {
            Ok(r#"{"name":"counter","version":"1.0.0"}"#.into())
        }

        fn get(&mut self, action: &str, _params: &str, network: &str) -> SandboxResult<String> {
            if let Some(stall) = self.stall {
                std::thread::sleep(stall);
            }
            Ok(format!("{action}@{network}"))
        }

        fn post(
            &mut self,
            action: &str,
            params: &str,
            _network: &str,
            memo: &str,
        ) -> SandboxResult<String> {
            if self.fail {
                return Err(SandboxError::Trap("unreachable executed".into()));
            }
            let params: Value = serde_json::from_str(params).unwrap();
            Ok(json!({ "success": true, "action": action, "memo": memo, "data": params }).to_string())
        }

        fn release(&mut self) -> SandboxResult<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedSandbox {
        instantiated: AtomicUsize,
        released: Arc<AtomicUsize>,
        fail: bool,
        stall: Option<Duration>,
    }

    impl ModuleSandbox for ScriptedSandbox {
        fn instantiate(
            &self,
            _module: &[u8],
            binding: &BindingDescriptor,
        ) -> SandboxResult<Box<dyn ModuleInstance>> {
            assert_eq!(binding.abi, crate::binding::ABI_VERSION);
            self.instantiated.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedInstance {
                released: Arc::clone(&self.released),
                fail: self.fail,
                stall: self.stall,
            }))
        }
    }

    const MODULE: &[u8] = b"\0asm\x01\0\0\0";

    struct Fixture {
        registry: Arc<InMemoryActionRegistry>,
        sandbox: Arc<ScriptedSandbox>,
        executor: ModuleExecutor,
    }

    fn fixture(sandbox: ScriptedSandbox, config: ExecutorConfig) -> Fixture {
        let registry = Arc::new(InMemoryActionRegistry::new());
        let content = Arc::new(InMemoryContentResolver::new());
        content.insert_binary("0.0.500", "application/wasm", MODULE.to_vec());
        content.insert_text(
            "0.0.501",
            "application/json",
            &serde_json::to_string(&BindingDescriptor::standard()).unwrap(),
        );
        registry.register(ActionRegistration::new("0.0.77", "0.0.500").with_wrapper("0.0.501"));

        let sandbox = Arc::new(sandbox);
        let executor = ModuleExecutor::new(registry.clone(), content, sandbox.clone(), config);
        Fixture {
            registry,
            sandbox,
            executor,
        }
    }

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn post_merges_state_beneath_params() {
        let f = fixture(ScriptedSandbox::default(), ExecutorConfig::default());
        let call = ActionCall::post("increment")
            .with_state(attrs(json!({ "count": 1, "label": "x" })))
            .with_params(attrs(json!({ "count": 5 })))
            .with_memo("bump");

        let result = f.executor.execute("0.0.77", &call).await;
        let value = result.value().unwrap();
        assert_eq!(value["data"], json!({ "count": 5, "label": "x" }));
        assert_eq!(value["memo"], "bump");
        assert_eq!(f.sandbox.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_json_output_is_wrapped() {
        let f = fixture(ScriptedSandbox::default(), ExecutorConfig::default());
        let result = f.executor.execute("0.0.77", &ActionCall::get("count")).await;
        assert_eq!(result, ExecutionResult::Success(json!({ "value": "count@testnet" })));
    }

    #[tokio::test]
    async fn info_needs_no_state() {
        let f = fixture(ScriptedSandbox::default(), ExecutorConfig::default());
        let result = f.executor.info("0.0.77").await;
        assert_eq!(result.value().unwrap()["name"], "counter");
    }

    #[tokio::test]
    async fn wrapperless_action_is_rejected_before_instantiation() {
        let f = fixture(ScriptedSandbox::default(), ExecutorConfig::default());
        f.registry.register(ActionRegistration::new("0.0.78", "0.0.500"));

        let result = f.executor.execute("0.0.78", &ActionCall::get("count")).await;
        assert!(result.error().unwrap().contains("no wrapper module"));
        assert_eq!(f.sandbox.instantiated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_action_is_a_failure_result() {
        let f = fixture(ScriptedSandbox::default(), ExecutorConfig::default());
        let result = f.executor.execute("0.0.999", &ActionCall::get("x")).await;
        assert_eq!(result.error(), Some("action not found: 0.0.999"));
        assert_eq!(
            result.to_value(),
            json!({ "success": false, "error": "action not found: 0.0.999" })
        );
    }

    #[tokio::test]
    async fn module_hash_mismatch_blocks_execution() {
        let f = fixture(ScriptedSandbox::default(), ExecutorConfig::default());
        let wrong = hash(b"other module", HashAlgorithm::Blake3).to_hex();
        f.registry.register(
            ActionRegistration::new("0.0.79", "0.0.500")
                .with_wrapper("0.0.501")
                .with_module_hash(wrong),
        );

        let result = f.executor.execute("0.0.79", &ActionCall::get("x")).await;
        assert!(result.error().unwrap().contains("content hash mismatch"));
        assert_eq!(f.sandbox.instantiated.load(Ordering::SeqCst), 0);

        let right = hash(MODULE, HashAlgorithm::Blake3).to_hex();
        f.registry.register(
            ActionRegistration::new("0.0.80", "0.0.500")
                .with_wrapper("0.0.501")
                .with_module_hash(right),
        );
        assert!(f.executor.execute("0.0.80", &ActionCall::get("x")).await.is_success());
    }

    #[tokio::test]
    async fn failed_call_still_releases() {
        let f = fixture(
            ScriptedSandbox {
                fail: true,
                ..ScriptedSandbox::default()
            },
            ExecutorConfig::default(),
        );
        let result = f.executor.execute("0.0.77", &ActionCall::post("increment")).await;
        assert!(result.error().unwrap().contains("unreachable executed"));
        assert_eq!(f.sandbox.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_module_times_out() {
        let f = fixture(
            ScriptedSandbox {
                stall: Some(Duration::from_millis(300)),
                ..ScriptedSandbox::default()
            },
            ExecutorConfig {
                timeout_ms: 20,
                ..ExecutorConfig::default()
            },
        );
        let result = f.executor.execute("0.0.77", &ActionCall::get("count")).await;
        assert_eq!(result, ExecutionResult::failure("timeout"));
    }

    #[test]
    fn reported_failure_is_a_failure() {
        assert_eq!(
            ExecutionResult::from_output(r#"{"success":false,"message":"insufficient balance"}"#),
            ExecutionResult::failure("insufficient balance")
        );
        assert!(ExecutionResult::from_output(r#"{"success":true}"#).is_success());
    }
}
