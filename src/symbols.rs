//! Symbol table and per-symbol resolve info.
//!
//! Each symbol carries a `Reserved` flag set recording which backend
//! resources (GOT slot, PLT entry, dynamic relocation) have already been
//! allocated for it, so duplicate relocations against the same symbol stay
//! idempotent.

use std::collections::HashMap;
use std::ops::BitOr;

use crate::module::FragmentRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolType {
    NoType,
    Object,
    Function,
    ThreadLocal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolDesc {
    Undefined,
    Define,
    Common,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    Global,
    Weak,
    Local,
    /// Linker-defined value not tied to any section.
    Absolute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    Default,
    Internal,
    Hidden,
    Protected,
}

/// Named flag set over the symbol reservation mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reserved(u8);

impl Reserved {
    pub const NONE: Reserved = Reserved(0);
    /// An in-place dynamic relocation was reserved.
    pub const REL: Reserved = Reserved(0x1);
    /// A GOT slot was reserved, link-time resolvable.
    pub const GOT: Reserved = Reserved(0x2);
    /// A GOT slot was reserved together with a dynamic relocation.
    pub const GOT_REL: Reserved = Reserved(0x4);
    /// A PLT entry (and its paired GOT slot) was reserved.
    pub const PLT: Reserved = Reserved(0x8);

    pub fn contains_any(self, other: Reserved) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Reserved) {
        self.0 |= other.0;
    }
}

impl BitOr for Reserved {
    type Output = Reserved;
    fn bitor(self, rhs: Reserved) -> Reserved {
        Reserved(self.0 | rhs.0)
    }
}

#[derive(Clone, Debug)]
pub struct SymbolInfo {
    pub name: String,
    pub ty: SymbolType,
    pub desc: SymbolDesc,
    pub binding: Binding,
    pub visibility: Visibility,
    pub size: u32,
    /// Raw symbol value. Function symbols keep the Thumb bit in bit 0.
    pub value: u32,
    /// Defined in a shared library seen at link time.
    pub is_dyn: bool,
    /// Exported to the output dynamic symbol table.
    pub in_dynamic: bool,
    /// Appeared in some input (name table or relocation).
    pub referenced: bool,
    pub reserved: Reserved,
    /// Defining location in the output, once known.
    pub frag_ref: Option<FragmentRef>,
    /// Scanner-assigned GOT slot (index within the scanner class).
    pub got_index: Option<usize>,
    /// PLT1 slot in reservation order.
    pub plt_index: Option<usize>,
}

impl SymbolInfo {
    pub fn is_local(&self) -> bool {
        self.binding == Binding::Local
    }

    pub fn is_global(&self) -> bool {
        self.binding == Binding::Global
    }

    pub fn is_weak(&self) -> bool {
        self.binding == Binding::Weak
    }

    pub fn is_absolute(&self) -> bool {
        self.binding == Binding::Absolute
    }

    pub fn is_undef(&self) -> bool {
        self.desc == SymbolDesc::Undefined
    }

    pub fn is_define(&self) -> bool {
        self.desc == SymbolDesc::Define
    }

    /// Null symbol: the empty-name placeholder at index 0.
    pub fn is_null(&self) -> bool {
        self.name.is_empty()
    }

    /// ARM ELF marks Thumb functions with bit 0 of the value.
    pub fn is_thumb_func(&self) -> bool {
        self.ty == SymbolType::Function && self.value & 1 != 0
    }
}

#[derive(Default)]
pub struct SymbolTable {
    infos: Vec<SymbolInfo>,
    by_name: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        let mut table = SymbolTable::default();
        // index 0 is the null symbol
        table.infos.push(SymbolInfo {
            name: String::new(),
            ty: SymbolType::NoType,
            desc: SymbolDesc::Undefined,
            binding: Binding::Local,
            visibility: Visibility::Default,
            size: 0,
            value: 0,
            is_dyn: false,
            in_dynamic: false,
            referenced: false,
            reserved: Reserved::NONE,
            frag_ref: None,
            got_index: None,
            plt_index: None,
        });
        table
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn get(&self, id: usize) -> &SymbolInfo {
        &self.infos[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut SymbolInfo {
        &mut self.infos[id]
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Register a symbol coming from an input object. Existing entries are
    /// refreshed rather than duplicated (generic resolution happens outside
    /// the backend; here last-definition-wins is enough for backend inputs).
    #[allow(clippy::too_many_arguments)]
    pub fn add_input_symbol(
        &mut self,
        name: &str,
        ty: SymbolType,
        desc: SymbolDesc,
        binding: Binding,
        size: u32,
        value: u32,
        frag_ref: Option<FragmentRef>,
    ) -> usize {
        let id = match self.by_name.get(name) {
            Some(&id) => id,
            None => {
                let id = self.infos.len();
                self.infos.push(SymbolInfo {
                    name: name.to_string(),
                    ty,
                    desc,
                    binding,
                    visibility: Visibility::Default,
                    size,
                    value,
                    is_dyn: false,
                    in_dynamic: false,
                    referenced: true,
                    reserved: Reserved::NONE,
                    frag_ref,
                    got_index: None,
                    plt_index: None,
                });
                self.by_name.insert(name.to_string(), id);
                return id;
            }
        };
        let info = &mut self.infos[id];
        info.referenced = true;
        if desc == SymbolDesc::Define && info.desc != SymbolDesc::Define {
            info.ty = ty;
            info.desc = desc;
            info.binding = binding;
            info.size = size;
            info.value = value;
            info.frag_ref = frag_ref;
        }
        id
    }

    /// Define a symbol only if some input already referenced the name
    /// (the as-referred mode of the IR builder). Returns the id on success.
    #[allow(clippy::too_many_arguments)]
    pub fn add_as_referred(
        &mut self,
        name: &str,
        ty: SymbolType,
        binding: Binding,
        visibility: Visibility,
        size: u32,
        value: u32,
        frag_ref: Option<FragmentRef>,
    ) -> Option<usize> {
        let id = self.by_name.get(name).copied()?;
        let info = &mut self.infos[id];
        info.ty = ty;
        info.desc = SymbolDesc::Define;
        info.binding = binding;
        info.visibility = visibility;
        info.size = size;
        info.value = value;
        info.frag_ref = frag_ref;
        Some(id)
    }

    /// Define a symbol unconditionally, creating or overwriting.
    #[allow(clippy::too_many_arguments)]
    pub fn add_force(
        &mut self,
        name: &str,
        ty: SymbolType,
        binding: Binding,
        visibility: Visibility,
        size: u32,
        value: u32,
        frag_ref: Option<FragmentRef>,
    ) -> usize {
        if let Some(&id) = self.by_name.get(name) {
            let info = &mut self.infos[id];
            info.ty = ty;
            info.desc = SymbolDesc::Define;
            info.binding = binding;
            info.visibility = visibility;
            info.size = size;
            info.value = value;
            info.frag_ref = frag_ref;
            return id;
        }
        let id = self.infos.len();
        self.infos.push(SymbolInfo {
            name: name.to_string(),
            ty,
            desc: SymbolDesc::Define,
            binding,
            visibility,
            size,
            value,
            is_dyn: false,
            in_dynamic: false,
            referenced: false,
            reserved: Reserved::NONE,
            frag_ref,
            got_index: None,
            plt_index: None,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Promote a local symbol into the output dynamic symbol table.
    pub fn change_local_to_dynamic(&mut self, id: usize) {
        self.infos[id].in_dynamic = true;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &SymbolInfo)> {
        self.infos.iter().enumerate()
    }
}
