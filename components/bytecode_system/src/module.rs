//! Module records
//!
//! A module is a named, versioned unit of class, function and variable
//! definitions plus an optional initializer. Records travel between the
//! compiler and the engine as `bincode` bytes.

use crate::code::{ConstantPool, FunctionDef, TypeRef};
use core_types::{QualifiedName, TraitAttributes, TypeAttributes, VmError, VmResult};
use serde::{Deserialize, Serialize};

/// Literal initial value of a property or variable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Constant {
    /// `undefined`
    Undefined,
    /// `null`
    #[default]
    Null,
    /// A boolean literal
    Boolean(bool),
    /// A number literal
    Number(f64),
    /// A string literal
    String(String),
}

/// A data member of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Member name
    pub name: QualifiedName,
    /// Trait attributes
    pub attributes: TraitAttributes,
    /// Declared type
    pub type_ref: Option<TypeRef>,
    /// Initial value
    pub value: Constant,
}

impl PropertyDef {
    /// A public, untyped member initialized to null
    pub fn new(name: impl Into<QualifiedName>) -> Self {
        Self {
            name: name.into(),
            attributes: TraitAttributes::NONE,
            type_ref: None,
            value: Constant::Null,
        }
    }

    /// Sets the initial value
    pub fn with_value(mut self, value: Constant) -> Self {
        self.value = value;
        self
    }
}

/// A class or interface definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassDef {
    /// Qualified class name
    pub name: QualifiedName,
    /// Type attributes
    pub attributes: TypeAttributes,
    /// Global slot for the class, if fixed by the compiler
    pub slot: Option<u32>,
    /// Base class
    pub base: Option<TypeRef>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeRef>,
    /// Static data members
    pub static_properties: Vec<PropertyDef>,
    /// Methods, getters and setters (static ones flagged `STATIC`)
    pub methods: Vec<FunctionDef>,
    /// Per-instance data members
    pub instance_properties: Vec<PropertyDef>,
    /// Constructor
    pub constructor: Option<FunctionDef>,
    /// Instance initializer run before the constructor
    pub initializer: Option<FunctionDef>,
    /// Static initializer run once before first use
    pub static_initializer: Option<FunctionDef>,
}

impl ClassDef {
    /// A class with no members
    pub fn new(name: impl Into<QualifiedName>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Number of static block traits declared by this class itself
    pub fn static_trait_count(&self) -> usize {
        self.static_properties.len()
            + self.methods.len()
            + usize::from(self.constructor.is_some())
            + usize::from(self.static_initializer.is_some())
    }

    /// Number of instance traits declared by this class itself
    pub fn instance_trait_count(&self) -> usize {
        self.instance_properties.len()
    }
}

/// A module-level variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    /// Variable name
    pub name: QualifiedName,
    /// Trait attributes
    pub attributes: TraitAttributes,
    /// Global slot, if fixed by the compiler
    pub slot: Option<u32>,
    /// Declared type
    pub type_ref: Option<TypeRef>,
    /// Initial value
    pub value: Constant,
}

/// One top-level definition of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Definition {
    /// Class or interface
    Class(ClassDef),
    /// Global function
    Function(FunctionDef),
    /// Global variable
    Variable(VariableDef),
}

/// A module this one was compiled against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Module name
    pub name: String,
    /// Checksum of the module when this one was compiled (0 skips the check)
    pub checksum: u64,
    /// Oldest compatible version
    pub min_version: u32,
    /// Newest compatible version
    pub max_version: u32,
}

impl Dependency {
    /// Returns true if `version` lies in the compatible range.
    pub fn accepts(&self, version: u32) -> bool {
        version >= self.min_version && version <= self.max_version
    }
}

/// A compiled module.
///
/// # Examples
///
/// ```
/// use bytecode_system::{ClassDef, Definition, ModuleRecord};
///
/// let mut module = ModuleRecord::new("shapes", 1);
/// module.definitions.push(Definition::Class(ClassDef::new("Circle")));
/// module.seal();
///
/// let bytes = module.to_bytes().unwrap();
/// let restored = ModuleRecord::from_bytes(&bytes).unwrap();
/// assert_eq!(restored.checksum, module.compute_checksum());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Module name
    pub name: String,
    /// Module version
    pub version: u32,
    /// Modules that must load first
    pub dependencies: Vec<Dependency>,
    /// Pool shared by every function body that carries no pool of its own
    pub constants: ConstantPool,
    /// Module initializer, run once after the definitions are in place
    pub initializer: Option<FunctionDef>,
    /// Top-level definitions in declaration order
    pub definitions: Vec<Definition>,
    /// Recorded checksum
    pub checksum: u64,
}

impl ModuleRecord {
    /// Create an empty module
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            dependencies: Vec::new(),
            constants: ConstantPool::new(),
            initializer: None,
            definitions: Vec::new(),
            checksum: 0,
        }
    }

    /// Records the current checksum.
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Additive checksum over names and structural counts.
    ///
    /// Only a load-time sanity check: name characters and slot/trait counts
    /// are summed, so reordering members goes unnoticed.
    pub fn compute_checksum(&self) -> u64 {
        let mut sum = name_sum(&self.name);
        for definition in &self.definitions {
            sum = sum.wrapping_add(match definition {
                Definition::Class(class) => class_sum(class),
                Definition::Function(function) => function_sum(function),
                Definition::Variable(variable) => qname_sum(&variable.name)
                    .wrapping_add(u64::from(variable.slot.unwrap_or(0))),
            });
        }
        sum
    }

    /// Serializes the record
    pub fn to_bytes(&self) -> VmResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| VmError::io(format!("Can't write module {}: {}", self.name, e)))
    }

    /// Deserializes a record
    pub fn from_bytes(bytes: &[u8]) -> VmResult<Self> {
        bincode::deserialize(bytes).map_err(|e| VmError::io(format!("Can't read module: {}", e)))
    }

    /// Checks every function body of the module.
    ///
    /// Bodies without a constant pool are checked against the module's.
    pub fn validate(&self) -> VmResult<()> {
        let functions = self.definitions.iter().flat_map(|definition| {
            let list: Vec<&FunctionDef> = match definition {
                Definition::Class(class) => class
                    .methods
                    .iter()
                    .chain(class.constructor.iter())
                    .chain(class.initializer.iter())
                    .chain(class.static_initializer.iter())
                    .collect(),
                Definition::Function(function) => vec![function],
                Definition::Variable(_) => Vec::new(),
            };
            list
        });
        for function in functions.chain(self.initializer.iter()) {
            let result = if function.code.constants.is_empty() && !self.constants.is_empty() {
                let mut code = function.code.clone();
                code.constants = self.constants.clone();
                code.validate()
            } else {
                function.code.validate()
            };
            result.map_err(|e| {
                VmError::new(
                    e.kind,
                    format!("{} in function {} of module {}", e.message, function.name, self.name),
                )
            })?;
        }
        Ok(())
    }
}

fn name_sum(name: &str) -> u64 {
    name.chars().fold(0u64, |sum, c| sum.wrapping_add(c as u64))
}

fn qname_sum(name: &QualifiedName) -> u64 {
    name_sum(&name.name)
}

fn function_sum(function: &FunctionDef) -> u64 {
    qname_sum(&function.name)
        .wrapping_add(u64::from(function.slot.unwrap_or(0)))
        .wrapping_add(u64::from(function.num_args))
        .wrapping_add(function.locals.len() as u64)
        .wrapping_add(function.code.handlers.len() as u64)
}

fn class_sum(class: &ClassDef) -> u64 {
    let mut sum = qname_sum(&class.name)
        .wrapping_add(u64::from(class.slot.unwrap_or(0)))
        .wrapping_add(class.static_trait_count() as u64)
        .wrapping_add(class.instance_trait_count() as u64)
        .wrapping_add(class.interfaces.len() as u64);
    for property in class.static_properties.iter().chain(&class.instance_properties) {
        sum = sum.wrapping_add(qname_sum(&property.name));
    }
    for function in class
        .methods
        .iter()
        .chain(class.constructor.iter())
        .chain(class.initializer.iter())
        .chain(class.static_initializer.iter())
    {
        sum = sum.wrapping_add(function_sum(function));
    }
    sum
}
