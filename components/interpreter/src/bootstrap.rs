//! Creation of the core types and the global object
//!
//! `Object`, `Block` and `Type` refer to each other, so they are allocated
//! by hand with a placeholder type and patched once `Type` exists. Every
//! later type goes through the regular factory.

use crate::error::ExecResult;
use crate::helpers::{ArrayHelpers, BlockHelpers, ErrorHelpers, FunctionHelpers, Helpers, ObjectHelpers, TypeHelpers};
use crate::object::{HeapObject, ObjectKind};
use crate::primitives::{BooleanHelpers, NullHelpers, NumberHelpers, StringHelpers, VoidHelpers};
use crate::types::TypeSpec;
use crate::vm::Vm;
use core_types::{ErrorKind, QualifiedName, TypeAttributes, Value, ValueId};
use memory_manager::{Generation, SlotTable};
use std::rc::Rc;

impl Vm {
    pub(crate) fn bootstrap(&mut self) -> ExecResult<()> {
        let previous = self.heap.set_alloc_generation(Generation::Eternal);

        let object = self.allocate_type(
            &TypeSpec::new("Object")
                .with_attributes(TypeAttributes::DYNAMIC_INSTANCE)
                .with_helpers(Rc::new(ObjectHelpers)),
            ValueId::default(),
        )?;
        let block = self.allocate_type(
            &TypeSpec::new("Block").with_helpers(Rc::new(BlockHelpers)),
            ValueId::default(),
        )?;
        let type_type = self.allocate_type(
            &TypeSpec::new("Type")
                .with_helpers(Rc::new(TypeHelpers))
                .without_pool(),
            ValueId::default(),
        )?;
        for id in [object, block, type_type] {
            self.object_mut(id)?.type_id = type_type;
        }
        self.core.object = object;
        self.core.block = block;
        self.core.type_type = type_type;
        self.fixup_type(object, None, &[], false)?;
        self.fixup_type(block, Some(object), &[], true)?;
        self.fixup_type(type_type, Some(object), &[], true)?;

        self.core.function = self.core_type("Function", Rc::new(FunctionHelpers))?;
        self.core.array = self.core_type("Array", Rc::new(ArrayHelpers))?;
        self.core.void = self.core_type("Void", Rc::new(VoidHelpers))?;
        self.core.null = self.core_type("Null", Rc::new(NullHelpers))?;
        self.core.boolean = self.core_type("Boolean", Rc::new(BooleanHelpers))?;
        self.core.number = self.core_type("Number", Rc::new(NumberHelpers))?;
        self.core.string = self.core_type("String", Rc::new(StringHelpers))?;
        self.core.iterator = self.core_type("Iterator", Rc::new(ObjectHelpers))?;
        self.core.error = self.make_type(
            &TypeSpec::new("Error")
                .with_base(object)
                .with_attributes(TypeAttributes::DYNAMIC_INSTANCE)
                .with_helpers(Rc::new(ErrorHelpers)),
        )?;
        for (index, kind) in ErrorKind::ALL.iter().enumerate() {
            self.core.errors[index] = self.make_type(&TypeSpec::new(kind.name()).with_base(self.core.error))?;
        }

        let mut global = HeapObject::new(object, SlotTable::new(), ObjectKind::Object);
        global.flags.dynamic = true;
        global.flags.builtin = true;
        self.global = self.alloc(global)?;

        let mut core = vec![
            object,
            block,
            type_type,
            self.core.function,
            self.core.array,
            self.core.void,
            self.core.null,
            self.core.boolean,
            self.core.number,
            self.core.string,
            self.core.iterator,
            self.core.error,
        ];
        core.extend(self.core.errors);
        for type_id in core {
            let name = self.type_data(type_id)?.qname.clone();
            let type_object = self.object_mut(type_id)?;
            type_object.flags.builtin = true;
            let global = self.global;
            self.object_mut(global)?.slots.define(name, Value::Ref(type_id));
        }
        let global = self.global;
        self.object_mut(global)?
            .slots
            .define(QualifiedName::public("global"), Value::Ref(global));

        self.heap.make_eternal_permanent();
        self.heap.set_alloc_generation(previous);
        log::debug!(
            "bootstrap created {} core values, {} types",
            self.heap.live_count(),
            self.next_type_id - 1
        );
        Ok(())
    }

    fn core_type(&mut self, name: &str, helpers: Rc<dyn Helpers>) -> ExecResult<ValueId> {
        let object = self.core.object;
        self.make_type(&TypeSpec::new(name).with_base(object).with_helpers(helpers))
    }
}
