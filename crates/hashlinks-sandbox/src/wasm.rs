//! Wasmtime host for action modules.

use tracing::{debug, warn};
use wasmtime::{
    Caller, Config, Engine, Instance, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, Trap, TypedFunc,
};

use crate::binding::{BindingDescriptor, EntryPoint};
use crate::config::SandboxLimits;
use crate::error::{SandboxError, SandboxResult};
use crate::host::{ModuleInstance, ModuleSandbox};

/// Module name of the host import surface.
pub const HOST_MODULE: &str = "hashlinks_v1";

/// Longest guest log line kept, in bytes.
const MAX_LOG_BYTES: usize = 4096;

struct HostState {
    limits: StoreLimits,
    logs: Vec<String>,
}

/// Runs modules in wasmtime with fuel metering and a memory ceiling.
///
/// Each instantiation gets its own store; nothing is shared between calls
/// except the compiled engine.
pub struct WasmtimeSandbox {
    engine: Engine,
    limits: SandboxLimits,
}

impl WasmtimeSandbox {
    pub fn new(limits: SandboxLimits) -> SandboxResult<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).map_err(|e| SandboxError::Compile(e.to_string()))?;
        Ok(Self { engine, limits })
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    fn linker(&self, memory_name: &str) -> SandboxResult<Linker<HostState>> {
        let mut linker = Linker::new(&self.engine);
        let memory_name = memory_name.to_string();
        linker
            .func_wrap(
                HOST_MODULE,
                "log",
                move |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                    let len = (len as u32 as usize).min(MAX_LOG_BYTES);
                    let Some(memory) = caller
                        .get_export(&memory_name)
                        .and_then(|export| export.into_memory())
                    else {
                        return;
                    };
                    let mut buf = vec![0u8; len];
                    if memory.read(&caller, ptr as u32 as usize, &mut buf).is_ok() {
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        debug!(target: "hashlinks::module", "{line}");
                        caller.data_mut().logs.push(line);
                    }
                },
            )
            .map_err(|e| SandboxError::Instantiate(e.to_string()))?;
        Ok(linker)
    }
}

impl ModuleSandbox for WasmtimeSandbox {
    fn instantiate(
        &self,
        module: &[u8],
        binding: &BindingDescriptor,
    ) -> SandboxResult<Box<dyn ModuleInstance>> {
        let module =
            Module::new(&self.engine, module).map_err(|e| SandboxError::Compile(e.to_string()))?;
        let linker = self.linker(&binding.memory)?;

        let state = HostState {
            limits: StoreLimitsBuilder::new()
                .memory_size(self.limits.memory_bytes)
                .instances(1)
                .build(),
            logs: Vec::new(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        store
            .set_fuel(self.limits.fuel)
            .map_err(|e| SandboxError::Instantiate(e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| SandboxError::Instantiate(e.to_string()))?;
        let memory = instance
            .get_memory(&mut store, &binding.memory)
            .ok_or_else(|| SandboxError::MissingExport(binding.memory.clone()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, &binding.alloc)
            .map_err(|_| SandboxError::MissingExport(binding.alloc.clone()))?;

        Ok(Box::new(WasmtimeInstance {
            store,
            instance,
            memory,
            alloc,
            binding: binding.clone(),
            fuel: self.limits.fuel,
            released: false,
        }))
    }
}

struct WasmtimeInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    binding: BindingDescriptor,
    fuel: u64,
    released: bool,
}

impl WasmtimeInstance {
    fn trap(&self, error: wasmtime::Error) -> SandboxError {
        if matches!(error.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
            SandboxError::FuelExhausted { limit: self.fuel }
        } else {
            SandboxError::Trap(error.to_string())
        }
    }

    fn check_live(&self) -> SandboxResult<()> {
        if self.released {
            Err(SandboxError::Abi("instance already released".into()))
        } else {
            Ok(())
        }
    }

    fn write_str(&mut self, s: &str) -> SandboxResult<(i32, i32)> {
        let len = i32::try_from(s.len())
            .map_err(|_| SandboxError::Abi(format!("argument of {} bytes is too large", s.len())))?;
        let ptr = self
            .alloc
            .call(&mut self.store, len)
            .map_err(|e| self.trap(e))?;
        self.memory
            .write(&mut self.store, ptr as u32 as usize, s.as_bytes())
            .map_err(|e| SandboxError::Abi(format!("alloc returned unusable memory: {e}")))?;
        Ok((ptr, len))
    }

    fn read_result(&mut self, packed: i64) -> SandboxResult<String> {
        let packed = packed as u64;
        let ptr = (packed >> 32) as u32;
        let len = (packed & 0xffff_ffff) as u32;
        let mut buf = vec![0u8; len as usize];
        self.memory
            .read(&self.store, ptr as usize, &mut buf)
            .map_err(|e| SandboxError::Abi(format!("result out of bounds: {e}")))?;

        if let Some(dealloc) = self.binding.dealloc.clone() {
            let free = self
                .instance
                .get_typed_func::<(i32, i32), ()>(&mut self.store, &dealloc)
                .map_err(|_| SandboxError::MissingExport(dealloc))?;
            free.call(&mut self.store, (ptr as i32, len as i32))
                .map_err(|e| self.trap(e))?;
        }

        String::from_utf8(buf).map_err(|_| SandboxError::Abi("result is not UTF-8".into()))
    }

    fn entry<Params, Results>(&mut self, entry: EntryPoint) -> SandboxResult<TypedFunc<Params, Results>>
    where
        Params: wasmtime::WasmParams,
        Results: wasmtime::WasmResults,
    {
        let name = self.binding.export(entry)?.to_string();
        self.instance
            .get_typed_func::<Params, Results>(&mut self.store, &name)
            .map_err(|_| SandboxError::MissingExport(format!("{entry} as `{name}`")))
    }
}

impl ModuleInstance for WasmtimeInstance {
    fn info(&mut self) -> SandboxResult<String> {
        self.check_live()?;
        let func = self.entry::<(), i64>(EntryPoint::Info)?;
        let packed = func.call(&mut self.store, ()).map_err(|e| self.trap(e))?;
        self.read_result(packed)
    }

    fn get(&mut self, action: &str, params: &str, network: &str) -> SandboxResult<String> {
        self.check_live()?;
        let func = self.entry::<(i32, i32, i32, i32, i32, i32), i64>(EntryPoint::Get)?;
        let (a, al) = self.write_str(action)?;
        let (p, pl) = self.write_str(params)?;
        let (n, nl) = self.write_str(network)?;
        let packed = func
            .call(&mut self.store, (a, al, p, pl, n, nl))
            .map_err(|e| self.trap(e))?;
        self.read_result(packed)
    }

    fn post(
        &mut self,
        action: &str,
        params: &str,
        network: &str,
        memo: &str,
    ) -> SandboxResult<String> {
        self.check_live()?;
        let func =
            self.entry::<(i32, i32, i32, i32, i32, i32, i32, i32), i64>(EntryPoint::Post)?;
        let (a, al) = self.write_str(action)?;
        let (p, pl) = self.write_str(params)?;
        let (n, nl) = self.write_str(network)?;
        let (m, ml) = self.write_str(memo)?;
        let packed = func
            .call(&mut self.store, (a, al, p, pl, n, nl, m, ml))
            .map_err(|e| self.trap(e))?;
        self.read_result(packed)
    }

    fn release(&mut self) -> SandboxResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        for line in self.store.data_mut().logs.drain(..) {
            debug!(target: "hashlinks::module", released = true, "{line}");
        }
        let Some(name) = self.binding.release.clone() else {
            return Ok(());
        };
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, &name)
            .map_err(|_| SandboxError::MissingExport(name))?;
        // Release runs even after the call budget is spent.
        if let Err(e) = self.store.set_fuel(self.fuel) {
            warn!(error = %e, "could not refuel module for release");
        }
        func.call(&mut self.store, ()).map_err(|e| self.trap(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A bump-allocating module: `info` returns a fixed JSON document,
    /// `post` logs the action name and echoes the params, `get` echoes the
    /// network and `spin` never returns.
    const ECHO_WAT: &str = r#"
        (module
          (import "hashlinks_v1" "log" (func $log (param i32 i32)))
          (memory (export "memory") 1)
          (global $next (mut i32) (i32.const 1024))
          (global $released (mut i32) (i32.const 0))
          (data (i32.const 0) "{\"name\":\"counter\",\"version\":\"1.0.0\"}")
          (func (export "hl_alloc") (param $len i32) (result i32)
            (local $ptr i32)
            global.get $next
            local.set $ptr
            global.get $next
            local.get $len
            i32.add
            global.set $next
            local.get $ptr)
          (func (export "hl_release")
            i32.const 1
            global.set $released)
          (func (export "info") (result i64)
            i64.const 36)
          (func (export "get") (param i32 i32 i32 i32 i32 i32) (result i64)
            local.get 4
            i64.extend_i32_u
            i64.const 32
            i64.shl
            local.get 5
            i64.extend_i32_u
            i64.or)
          (func (export "post") (param i32 i32 i32 i32 i32 i32 i32 i32) (result i64)
            (call $log (local.get 0) (local.get 1))
            local.get 2
            i64.extend_i32_u
            i64.const 32
            i64.shl
            local.get 3
            i64.extend_i32_u
            i64.or)
          (func (export "spin") (result i64)
            (loop $forever
              br $forever)
            i64.const 0))
    "#;

    fn sandbox() -> WasmtimeSandbox {
        WasmtimeSandbox::new(SandboxLimits::default()).unwrap()
    }

    fn binding() -> BindingDescriptor {
        BindingDescriptor {
            release: Some("hl_release".into()),
            ..BindingDescriptor::standard()
        }
    }

    #[test]
    fn info_reads_packed_result() {
        let mut instance = sandbox().instantiate(ECHO_WAT.as_bytes(), &binding()).unwrap();
        assert_eq!(
            instance.info().unwrap(),
            r#"{"name":"counter","version":"1.0.0"}"#
        );
        instance.release().unwrap();
    }

    #[test]
    fn strings_cross_the_boundary() {
        let mut instance = sandbox().instantiate(ECHO_WAT.as_bytes(), &binding()).unwrap();
        let echoed = instance
            .post("increment", r#"{"count":2}"#, "testnet", "")
            .unwrap();
        assert_eq!(echoed, r#"{"count":2}"#);
        assert_eq!(instance.get("count", "{}", "mainnet").unwrap(), "mainnet");
        instance.release().unwrap();
    }

    #[test]
    fn runaway_module_exhausts_fuel() {
        let sandbox = WasmtimeSandbox::new(SandboxLimits {
            fuel: 10_000,
            ..SandboxLimits::default()
        })
        .unwrap();
        let mut binding = binding();
        binding.exports.info = Some("spin".into());
        let mut instance = sandbox.instantiate(ECHO_WAT.as_bytes(), &binding).unwrap();
        assert_eq!(
            instance.info().unwrap_err(),
            SandboxError::FuelExhausted { limit: 10_000 }
        );
        // Release still gets a fresh budget.
        instance.release().unwrap();
    }

    #[test]
    fn missing_exports_are_reported() {
        let mut binding = binding();
        binding.exports.get = Some("nope".into());
        let mut instance = sandbox().instantiate(ECHO_WAT.as_bytes(), &binding).unwrap();
        assert!(matches!(
            instance.get("a", "{}", "testnet"),
            Err(SandboxError::MissingExport(_))
        ));

        binding.alloc = "malloc".into();
        assert!(matches!(
            sandbox().instantiate(ECHO_WAT.as_bytes(), &binding),
            Err(SandboxError::MissingExport(name)) if name == "malloc"
        ));
    }

    #[test]
    fn garbage_module_fails_to_compile() {
        assert!(matches!(
            sandbox().instantiate(b"not wasm", &binding()),
            Err(SandboxError::Compile(_))
        ));
    }

    #[test]
    fn calls_after_release_are_rejected() {
        let mut instance = sandbox().instantiate(ECHO_WAT.as_bytes(), &binding()).unwrap();
        instance.release().unwrap();
        assert!(matches!(instance.info(), Err(SandboxError::Abi(_))));
        assert!(instance.release().is_ok());
    }
}
