//! Module loading
//!
//! A module record is turned into live types, functions and globals in
//! three passes: every definition is allocated (types unlinked), the
//! types are fixed up once their bases are, and finally the native half
//! of the module is bound and the module initializer runs. Everything a
//! module creates lives in the eternal generation.

use crate::error::{ExecResult, Exception};
use crate::object::{FunctionBody, ObjectKind, Trait};
use crate::types::TypeSpec;
use crate::vm::Vm;
use bytecode_system::{ClassDef, Code, Constant, Definition, FunctionDef, ModuleRecord, TypeRef};
use core_types::{QualifiedName, TraitAttributes, TypeAttributes, Value, ValueId, VmError, VmResult};
use memory_manager::Generation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::rc::Rc;

/// Source of module records the service does not know yet
pub trait ModuleLoader: Send + Sync {
    /// Finds and decodes the module `name`.
    fn load(&self, name: &str) -> VmResult<ModuleRecord>;
}

/// Loader serving records added at runtime
#[derive(Debug, Default)]
pub struct MemoryModuleLoader {
    modules: Mutex<HashMap<String, ModuleRecord>>,
}

impl MemoryModuleLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record
    pub fn add(&self, record: ModuleRecord) {
        self.modules.lock().insert(record.name.clone(), record);
    }
}

impl ModuleLoader for MemoryModuleLoader {
    fn load(&self, name: &str) -> VmResult<ModuleRecord> {
        self.modules
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::io(format!("Can't find module \"{}\"", name)))
    }
}

/// Type waiting for its base to be linked
struct PendingFixup {
    type_id: ValueId,
    base: Option<TypeRef>,
    interfaces: Vec<TypeRef>,
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Undefined => Value::Undefined,
        Constant::Null => Value::Null,
        Constant::Boolean(b) => Value::Boolean(*b),
        Constant::Number(n) => Value::Number(*n),
        Constant::String(s) => Value::from(s.as_str()),
    }
}

/// Body of a module function; bodies without a pool share the module's.
fn module_code(record: &ModuleRecord, code: &Code) -> Rc<Code> {
    let mut code = code.clone();
    if code.constants.is_empty() {
        code.constants = record.constants.clone();
    }
    Rc::new(code)
}

impl Vm {
    /// Loads a module and, first, the modules it depends on.
    ///
    /// Loading an already loaded module does nothing.
    ///
    /// # Arguments
    ///
    /// * `name` - Module name, resolved through the service
    ///
    /// # Returns
    ///
    /// An `IOError` when the module or a dependency can't be found or
    /// doesn't match the version it was compiled against.
    pub fn load_module(&mut self, name: &str) -> VmResult<()> {
        let mut loading = Vec::new();
        self.load_module_inner(name, &mut loading)
            .map_err(|e| self.host_error(e))
    }

    fn load_module_inner(&mut self, name: &str, loading: &mut Vec<String>) -> ExecResult<()> {
        if self.loaded.contains_key(name) {
            return Ok(());
        }
        if loading.iter().any(|m| m == name) {
            return Err(VmError::io(format!(
                "Can't load module {}. It depends on itself through {}",
                name,
                loading.join(" -> ")
            ))
            .into());
        }
        let record = self.service.module(name)?;
        loading.push(name.to_string());
        for dependency in &record.dependencies {
            self.load_module_inner(&dependency.name, loading)?;
            let compatible = self.loaded.get(&dependency.name).is_some_and(|loaded| {
                dependency.accepts(loaded.version)
                    && (dependency.checksum == 0 || dependency.checksum == loaded.compute_checksum())
            });
            if !compatible {
                return Err(VmError::io(format!(
                    "Can't load module {}. It was compiled using a different version of module {}.",
                    record.name, dependency.name
                ))
                .into());
            }
        }
        loading.pop();

        record.validate()?;
        let checksum = record.compute_checksum();
        if record.checksum != 0 && record.checksum != checksum {
            return Err(VmError::io(format!("Module {} is corrupt: checksum mismatch", record.name)).into());
        }
        let native = self.service.native(&record.name);
        if let Some(native) = &native {
            if native.checksum != checksum {
                return Err(VmError::io(format!(
                    "Can't load module {}. Its native code was built for a different version.",
                    record.name
                ))
                .into());
            }
        }

        let previous = self.heap.set_alloc_generation(Generation::Eternal);
        let created = self.define_module(&record);
        self.heap.set_alloc_generation(previous);
        let created = created?;

        if let Some(native) = native {
            (native.callback)(self)?;
        }
        for function in created {
            let data = self.function_data(function)?;
            if matches!(data.body, FunctionBody::Unbound) {
                return Err(VmError::internal(format!("Native function {} is not implemented", data.name)).into());
            }
        }
        self.loaded.insert(record.name.clone(), record.clone());
        log::debug!("module {} version {} loaded", record.name, record.version);

        if let Some(initializer) = &record.initializer {
            log::info!("running initializer of module {}", record.name);
            let code = module_code(&record, &initializer.code);
            let global = self.global;
            let function = self.make_function(initializer, code, None, Some(global))?;
            self.invoke(&Value::Ref(function), &Value::Ref(global), &[])?;
        }
        Ok(())
    }

    /// Creates every definition of `record` and links its types.
    ///
    /// # Returns
    ///
    /// Every function created, for the unbound-native check.
    fn define_module(&mut self, record: &ModuleRecord) -> ExecResult<Vec<ValueId>> {
        let mut created = Vec::new();
        let mut pending = Vec::new();
        let global = self.global;
        for definition in &record.definitions {
            match definition {
                Definition::Class(class) => {
                    let type_id = self.define_class(record, class, &mut created)?;
                    pending.push(PendingFixup {
                        type_id,
                        base: class.base.clone(),
                        interfaces: class.interfaces.clone(),
                    });
                }
                Definition::Function(def) => {
                    let code = module_code(record, &def.code);
                    let function = self.make_function(def, code, None, Some(global))?;
                    created.push(function);
                    let slot = self.define_global(&def.name, def.slot, Value::Ref(function))?;
                    self.function_data_mut(function)?.slot_num = Some(slot);
                }
                Definition::Variable(variable) => {
                    self.define_global(&variable.name, variable.slot, constant_value(&variable.value))?;
                }
            }
        }
        self.fixup_pending(pending)?;
        Ok(created)
    }

    fn define_global(&mut self, name: &QualifiedName, slot: Option<u32>, value: Value) -> ExecResult<usize> {
        let global = self.global;
        let object = self.object_mut(global)?;
        Ok(match slot {
            Some(slot) => {
                let slot = slot as usize;
                object.slots.set(slot, value);
                object.slots.set_name(slot, name.clone());
                slot
            }
            None => object.slots.define(name.clone(), value),
        })
    }

    /// Allocates an unlinked type and its members.
    ///
    /// Own static slots are laid out as constructor, static initializer,
    /// static properties, then methods. Inherited slots are inserted in
    /// front of them at fixup.
    fn define_class(&mut self, record: &ModuleRecord, class: &ClassDef, created: &mut Vec<ValueId>) -> ExecResult<ValueId> {
        let mut attributes = class.attributes;
        if class.constructor.is_some() {
            attributes.insert(TypeAttributes::HAS_CONSTRUCTOR);
        }
        if class.static_initializer.is_some() {
            attributes.insert(TypeAttributes::HAS_STATIC_INITIALIZER);
        }
        if class.initializer.is_some() {
            attributes.insert(TypeAttributes::HAS_INITIALIZER);
        }
        let spec = TypeSpec::new(class.name.clone()).with_attributes(attributes);
        let meta = self.core.type_type;
        let type_id = self.allocate_type(&spec, meta)?;
        self.type_data_mut(type_id)?.need_fixup = true;
        self.define_global(&class.name, class.slot, Value::Ref(type_id))?;

        let mut slot = 0;
        if let Some(constructor) = &class.constructor {
            let function = self.class_function(record, constructor, type_id, slot, constructor.attributes)?;
            self.function_data_mut(function)?.is_constructor = true;
            created.push(function);
            slot += 1;
        }
        if let Some(initializer) = &class.static_initializer {
            let function = self.class_function(record, initializer, type_id, slot, TraitAttributes::STATIC)?;
            created.push(function);
            slot += 1;
        }
        for property in &class.static_properties {
            let declared = property.type_ref.as_ref().and_then(|t| self.resolve_type_ref(t).ok());
            let object = self.object_mut(type_id)?;
            object.slots.set(slot, constant_value(&property.value));
            object.slots.set_name(slot, property.name.clone());
            if let Some(block) = object.block_mut() {
                block.set_trait(
                    slot,
                    Trait {
                        type_id: declared,
                        attributes: property.attributes | TraitAttributes::STATIC,
                    },
                );
            }
            slot += 1;
        }

        let mut methods = Vec::with_capacity(class.methods.len());
        for method in &class.methods {
            let function = self.class_function(record, method, type_id, slot, method.attributes)?;
            created.push(function);
            methods.push((slot, method));
            slot += 1;
        }
        for &(slot, method) in &methods {
            let getter = methods.iter().find(|(other, def)| {
                *other != slot && def.name == method.name && def.attributes.contains(TraitAttributes::GETTER)
            });
            match getter {
                Some(&(getter_slot, _)) if method.attributes.contains(TraitAttributes::SETTER) => {
                    let getter = self.object(type_id)?.slots.get(getter_slot).and_then(Value::as_ref_id);
                    if let Some(getter) = getter {
                        self.function_data_mut(getter)?.next_slot = Some(slot);
                    }
                }
                _ => self.object_mut(type_id)?.slots.set_name(slot, method.name.clone()),
            }
        }

        if !class.instance_properties.is_empty() {
            let block = self.create_instance_block(type_id, class.instance_properties.len())?;
            let traits: Vec<Trait> = class
                .instance_properties
                .iter()
                .map(|p| Trait {
                    type_id: p.type_ref.as_ref().and_then(|t| self.resolve_type_ref(t).ok()),
                    attributes: p.attributes,
                })
                .collect();
            let object = self.object_mut(block)?;
            for (slot, (property, attributes)) in class.instance_properties.iter().zip(traits).enumerate() {
                object.slots.set(slot, constant_value(&property.value));
                object.slots.set_name(slot, property.name.clone());
                if let Some(block) = object.block_mut() {
                    block.set_trait(slot, attributes);
                }
            }
        }

        if let Some(initializer) = &class.initializer {
            let code = module_code(record, &initializer.code);
            let function = self.make_function(initializer, code, Some(type_id), Some(type_id))?;
            created.push(function);
            self.type_data_mut(type_id)?.initializer = Some(function);
        }
        log::trace!("defined class {} with {} static slots", class.name, slot);
        Ok(type_id)
    }

    /// Creates a member function of `type_id` in static slot `slot`.
    fn class_function(
        &mut self,
        record: &ModuleRecord,
        def: &FunctionDef,
        type_id: ValueId,
        slot: usize,
        attributes: TraitAttributes,
    ) -> ExecResult<ValueId> {
        let code = module_code(record, &def.code);
        let function = self.make_function(def, code, Some(type_id), Some(type_id))?;
        self.function_data_mut(function)?.slot_num = Some(slot);
        let object = self.object_mut(type_id)?;
        object.slots.set(slot, Value::Ref(function));
        if let Some(block) = object.block_mut() {
            block.set_trait(slot, Trait::new(attributes));
        }
        Ok(function)
    }

    /// Fixes up types in dependency order; bases may be defined later in
    /// the module than the types extending them.
    fn fixup_pending(&mut self, mut pending: Vec<PendingFixup>) -> ExecResult<()> {
        while !pending.is_empty() {
            let mut waiting = Vec::new();
            let mut last_error: Option<Exception> = None;
            let before = pending.len();
            for item in pending {
                let resolved = (|| -> ExecResult<(ValueId, Vec<ValueId>)> {
                    let base = match &item.base {
                        Some(base) => self.resolve_type_ref(base)?,
                        None => self.core.object,
                    };
                    let interfaces = item
                        .interfaces
                        .iter()
                        .map(|t| self.resolve_type_ref(t))
                        .collect::<ExecResult<Vec<_>>>()?;
                    Ok((base, interfaces))
                })();
                match resolved {
                    Ok((base, interfaces)) => {
                        let ready = std::iter::once(base)
                            .chain(interfaces.iter().copied())
                            .all(|t| self.heap.get(t).and_then(|o| o.type_data()).is_some_and(|d| d.fixup_done));
                        if ready {
                            self.fixup_type(item.type_id, Some(base), &interfaces, true)?;
                        } else {
                            waiting.push(item);
                        }
                    }
                    Err(error) => {
                        last_error = Some(error);
                        waiting.push(item);
                    }
                }
            }
            if waiting.len() == before {
                let names: Vec<String> = waiting.iter().map(|p| self.qualified_type_name(p.type_id)).collect();
                return Err(last_error.unwrap_or_else(|| {
                    VmError::reference(format!("Can't resolve base types of {}", names.join(", "))).into()
                }));
            }
            pending = waiting;
        }
        Ok(())
    }

    /// Binds the implementation of a declared native function.
    ///
    /// Native module callbacks use this to fill in the functions their
    /// module declares with the native attribute.
    ///
    /// # Arguments
    ///
    /// * `class` - Owning class, or `None` for a global function
    /// * `name` - Public function name
    /// * `body` - Implementation
    pub fn bind_native<F>(&mut self, class: Option<&str>, name: &str, body: F) -> VmResult<()>
    where
        F: Fn(&mut Vm, &Value, &[Value]) -> ExecResult<Value> + 'static,
    {
        let result = (|| -> ExecResult<()> {
            let holder = match class {
                Some(class) => {
                    let value = self
                        .get_global(class)
                        .ok_or_else(|| VmError::reference(format!("Can't find class {}", class)))?;
                    self.type_id_of(&value)?
                }
                None => self.global,
            };
            let object = self.object(holder)?;
            let function = object
                .slots
                .lookup(&QualifiedName::public(name))
                .and_then(|slot| object.slots.get(slot))
                .and_then(Value::as_ref_id)
                .filter(|id| self.heap.get(*id).is_some_and(|o| o.is_function()))
                .ok_or_else(|| VmError::reference(format!("Can't find native function \"{}\"", name)))?;
            if let ObjectKind::Function(data) = &mut self.object_mut(function)?.kind {
                data.body = FunctionBody::Native(Rc::new(body));
            }
            Ok(())
        })();
        result.map_err(|e| self.host_error(e))
    }
}
