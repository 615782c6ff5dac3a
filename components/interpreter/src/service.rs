//! Host service shared by every interpreter of a process
//!
//! Holds the module registry, the module loader and the native-module
//! callback table behind one mutex. Interpreters keep an `Arc<Service>`;
//! nothing else they own is shared.

use crate::loader::ModuleLoader;
use crate::vm::Vm;
use bytecode_system::ModuleRecord;
use core_types::{VmError, VmResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback that binds the native functions of a module
pub type NativeModuleFn = Arc<dyn Fn(&mut Vm) -> VmResult<()> + Send + Sync>;

/// Native half of a module
#[derive(Clone)]
pub struct NativeModule {
    /// Checksum of the script definitions the natives were written against
    pub checksum: u64,
    /// Binds the natives into a freshly loaded module
    pub callback: NativeModuleFn,
}

impl fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeModule").field("checksum", &self.checksum).finish()
    }
}

#[derive(Default)]
struct Registry {
    modules: HashMap<String, Arc<ModuleRecord>>,
    natives: HashMap<String, NativeModule>,
    loader: Option<Arc<dyn ModuleLoader>>,
}

/// Process-wide module and native registry
#[derive(Default)]
pub struct Service {
    registry: Mutex<Registry>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("Service")
            .field("modules", &registry.modules.len())
            .field("natives", &registry.natives.len())
            .field("loader", &registry.loader.is_some())
            .finish()
    }
}

impl Service {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service that resolves unknown modules through `loader`
    pub fn with_loader(loader: Arc<dyn ModuleLoader>) -> Self {
        let service = Self::new();
        service.registry.lock().loader = Some(loader);
        service
    }

    /// Registers a module record under its name, replacing any earlier one.
    pub fn register_module(&self, record: ModuleRecord) {
        let name = record.name.clone();
        self.registry.lock().modules.insert(name, Arc::new(record));
    }

    /// Registers the native half of a module.
    pub fn register_native(&self, name: impl Into<String>, checksum: u64, callback: NativeModuleFn) {
        self.registry
            .lock()
            .natives
            .insert(name.into(), NativeModule { checksum, callback });
    }

    /// Finds a module, asking the loader when it is not registered yet.
    ///
    /// # Returns
    ///
    /// The record, or an `IOError` when no one knows the module.
    pub fn module(&self, name: &str) -> VmResult<Arc<ModuleRecord>> {
        let loader = {
            let registry = self.registry.lock();
            if let Some(record) = registry.modules.get(name) {
                return Ok(record.clone());
            }
            registry.loader.clone()
        };
        let loader = loader.ok_or_else(|| VmError::io(format!("Can't find module \"{}\"", name)))?;
        let record = Arc::new(loader.load(name)?);
        log::debug!("loaded module record {} version {}", record.name, record.version);
        self.registry
            .lock()
            .modules
            .insert(name.to_string(), record.clone());
        Ok(record)
    }

    /// Native half of a module, if one is registered
    pub fn native(&self, name: &str) -> Option<NativeModule> {
        self.registry.lock().natives.get(name).cloned()
    }

    /// Names of the registered modules, sorted
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().modules.keys().cloned().collect();
        names.sort();
        names
    }
}
