//! The class arena.
//!
//! Classes reference each other freely (base links, attribute types, method
//! signatures), so they live in a flat table indexed by [`ClassId`] rather
//! than owning each other. The built-in classes occupy fixed ids and are
//! synthesized before any source class is added.

use smol_str::SmolStr;

use crate::{
    ast::AccessRight,
    token::Position,
};

/// A stable handle into the [`ClassTable`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Word 0 of every object holds the address of its class's VMT.
pub const HEADER_SIZE: i32 = 1;

/// The root of the inheritance forest.
pub const OBJECT: ClassId = ClassId(0);
/// The boxed integer class; objects carry the payload at offset 1.
pub const INTEGER: ClassId = ClassId(1);
/// The boxed boolean class; objects carry the payload at offset 1.
pub const BOOLEAN: ClassId = ClassId(2);
/// The unboxed integer type. Internal; source programs cannot name it.
pub const INT: ClassId = ClassId(3);
/// The unboxed boolean type. Internal.
pub const BOOL: ClassId = ClassId(4);
/// The type of method calls without a return type. Internal.
pub const VOID: ClassId = ClassId(5);
/// The type of the NULL literal, assignable to any reference type.
pub const NULL_TYPE: ClassId = ClassId(6);

pub const BUILTIN_COUNT: usize = 7;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Preparation {
    Unprepared,
    /// Layout computation has started; meeting this state again while
    /// resolving base classes means the inheritance graph has a cycle.
    InProgress,
    Prepared,
}

#[derive(Debug)]
pub struct ClassInfo {
    pub name: SmolStr,
    pub position: Position,
    pub base: Option<ClassId>,
    /// Object size in words, including the VMT pointer at word 0.
    pub size: i32,
    /// Attributes declared by this class itself (inherited ones live with
    /// their defining class).
    pub attributes: Vec<AttributeInfo>,
    /// Methods declared by this class itself.
    pub methods: Vec<MethodInfo>,
    /// The full virtual method table, inherited slots included.
    pub vmt: Vec<MethodRef>,
    pub prepared: Preparation,
    /// Internal types (Int, Bool, Void, NullType) cannot be named by source
    /// programs and never have instances.
    pub internal: bool,
}

#[derive(Debug)]
pub struct AttributeInfo {
    pub name: SmolStr,
    pub ty: ClassId,
    /// Offset inside the object, starting at the base class size.
    pub offset: i32,
    pub access: AccessRight,
    pub position: Position,
}

#[derive(Debug)]
pub struct MethodInfo {
    pub name: SmolStr,
    pub params: Vec<ClassId>,
    /// [`VOID`] for methods without a return type.
    pub return_type: ClassId,
    pub vmt_index: usize,
    pub access: AccessRight,
    pub position: Position,
}

/// A VMT slot: the class that provides the implementation plus the method's
/// index within that class.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MethodRef {
    pub class: ClassId,
    pub method: usize,
}

/// A member found by walking a class's inheritance chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Member {
    Attribute(ClassId, usize),
    Method(ClassId, usize),
}

pub struct ClassTable {
    classes: Vec<ClassInfo>,
}

impl ClassTable {
    /// Creates a table holding exactly the built-in classes.
    pub fn with_builtins() -> ClassTable {
        let builtin = |name: &str, base: Option<ClassId>, size: i32, internal: bool| ClassInfo {
            name: SmolStr::new(name),
            position: Position::default(),
            base,
            size,
            attributes: Vec::new(),
            methods: Vec::new(),
            vmt: Vec::new(),
            prepared: Preparation::Prepared,
            internal,
        };
        let classes = vec![
            builtin("Object", None, HEADER_SIZE, false),
            builtin("Integer", Some(OBJECT), HEADER_SIZE + 1, false),
            builtin("Boolean", Some(OBJECT), HEADER_SIZE + 1, false),
            builtin("Int", None, 0, true),
            builtin("Bool", None, 0, true),
            builtin("Void", None, 0, true),
            builtin("NullType", None, 0, true),
        ];
        debug_assert_eq!(classes.len(), BUILTIN_COUNT);
        ClassTable { classes }
    }

    pub fn add(&mut self, info: ClassInfo) -> ClassId {
        let id = ClassId(u32::try_from(self.classes.len()).expect("class table overflow"));
        self.classes.push(info);
        id
    }

    pub fn get(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.index()]
    }

    pub fn get_mut(&mut self, id: ClassId) -> &mut ClassInfo {
        &mut self.classes[id.index()]
    }

    pub fn name(&self, id: ClassId) -> &SmolStr {
        &self.get(id).name
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.classes.len() as u32).map(ClassId)
    }

    /// Looks a source-visible class up by name.
    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.ids()
            .find(|&id| !self.get(id).internal && self.get(id).name == name)
    }

    /// A reference type is one whose values are object addresses: every
    /// class except the internal types.
    pub fn is_reference(&self, id: ClassId) -> bool {
        !self.get(id).internal
    }

    /// The *isA* relation of the type lattice.
    ///
    /// Every type is a subtype of itself; classes follow their base chain;
    /// `NullType` is assignable to every reference type; the unboxed `Int`
    /// and `Bool` are subtypes of their boxing classes, in that direction
    /// only.
    pub fn is_a(&self, a: ClassId, b: ClassId) -> bool {
        if a == b {
            return true;
        }
        match a {
            NULL_TYPE => self.is_reference(b),
            INT => b == INTEGER,
            BOOL => b == BOOLEAN,
            _ => {
                let mut current = a;
                while let Some(base) = self.get(current).base {
                    if base == b {
                        return true;
                    }
                    current = base;
                }
                false
            }
        }
    }

    /// Finds an attribute or method by name, walking the inheritance chain
    /// from `class` upwards (deepest class first).
    pub fn find_member(&self, class: ClassId, name: &str) -> Option<Member> {
        let mut current = Some(class);
        while let Some(id) = current {
            let info = self.get(id);
            if let Some(i) = info.attributes.iter().position(|a| a.name == name) {
                return Some(Member::Attribute(id, i));
            }
            if let Some(i) = info.methods.iter().position(|m| m.name == name) {
                return Some(Member::Method(id, i));
            }
            current = info.base;
        }
        None
    }

    pub fn find_method(&self, class: ClassId, name: &str) -> Option<(ClassId, usize)> {
        match self.find_member(class, name) {
            Some(Member::Method(class, index)) => Some((class, index)),
            _ => None,
        }
    }

    /// The label of a method's entry point in the emitted assembly.
    pub fn method_label(&self, method: MethodRef) -> String {
        let class = self.get(method.class);
        format!("{}_{}", class.name, class.methods[method.method].name)
    }

    /// The label of a class's virtual method table.
    pub fn vmt_label(&self, id: ClassId) -> String {
        format!("_{}_VMT", self.name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn define(table: &mut ClassTable, name: &str, base: ClassId) -> ClassId {
        table.add(ClassInfo {
            name: SmolStr::new(name),
            position: Position::default(),
            base: Some(base),
            size: table.get(base).size,
            attributes: Vec::new(),
            methods: Vec::new(),
            vmt: Vec::new(),
            prepared: Preparation::Prepared,
            internal: false,
        })
    }

    #[test]
    fn is_a() {
        //               /---- Shape ---- Circle
        //    Object ----+
        //               \---- Door
        let table = &mut ClassTable::with_builtins();
        let shape = define(table, "Shape", OBJECT);
        let circle = define(table, "Circle", shape);
        let door = define(table, "Door", OBJECT);

        assert!(table.is_a(OBJECT, OBJECT));
        assert!(!table.is_a(OBJECT, shape));

        assert!(table.is_a(shape, OBJECT));
        assert!(table.is_a(shape, shape));
        assert!(!table.is_a(shape, circle));
        assert!(!table.is_a(shape, door));

        assert!(table.is_a(circle, OBJECT));
        assert!(table.is_a(circle, shape));
        assert!(table.is_a(circle, circle));
        assert!(!table.is_a(circle, door));

        assert!(table.is_a(door, OBJECT));
        assert!(!table.is_a(door, shape));
    }

    #[test]
    fn null_and_boxing_lattice() {
        let table = &mut ClassTable::with_builtins();
        let shape = define(table, "Shape", OBJECT);

        // NULL is assignable to every reference type, and nothing else.
        assert!(table.is_a(NULL_TYPE, OBJECT));
        assert!(table.is_a(NULL_TYPE, INTEGER));
        assert!(table.is_a(NULL_TYPE, shape));
        assert!(!table.is_a(NULL_TYPE, INT));
        assert!(!table.is_a(OBJECT, NULL_TYPE));

        // Unboxed values are subtypes of their boxing classes, one way only.
        assert!(table.is_a(INT, INTEGER));
        assert!(!table.is_a(INTEGER, INT));
        assert!(table.is_a(BOOL, BOOLEAN));
        assert!(!table.is_a(BOOLEAN, BOOL));
        assert!(!table.is_a(INT, BOOL));
    }

    #[test]
    fn builtin_sizes() {
        let table = ClassTable::with_builtins();
        assert_eq!(table.get(OBJECT).size, 1);
        assert_eq!(table.get(INTEGER).size, 2);
        assert_eq!(table.get(BOOLEAN).size, 2);
    }

    #[test]
    fn lookup_skips_internal_types() {
        let table = ClassTable::with_builtins();
        assert_eq!(table.lookup("Object"), Some(OBJECT));
        assert_eq!(table.lookup("Integer"), Some(INTEGER));
        assert_eq!(table.lookup("Int"), None);
        assert_eq!(table.lookup("Void"), None);
        assert_eq!(table.lookup("NullType"), None);
    }
}
