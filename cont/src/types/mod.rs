//! The type value model
//!
//! Types are immutable values compared by structural content, except
//! type variables, which compare by identity and only live while one
//! declared signature is being matched against a call site.
//!
//! The abstract operand stack holds `Option<Type>`: `None` is the
//! match-anything wildcard the checker synthesizes for untyped values.
//! Wildcards match anything positionally but have no size; asking for
//! the size of a wildcard or an unresolved type variable is a checker
//! error, never a silent default.

pub mod subst;
pub mod unify;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{CheckError, Result};
use crate::ir::ProcId;

/// Size in bytes of every word-sized value (`int`, pointers, proc addresses)
pub const WORD_SIZE: usize = 8;

/// Index of a `StructDef` in the [`StructTable`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructId(pub usize);

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(0);

/// A fresh identity for a type variable.
///
/// Variables compare by this id, not by name: two `T`s from different
/// signatures must not unify with each other.
pub fn fresh_var_id() -> u64 {
    NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed)
}

/// A type as seen by the checker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    /// 64-bit integer
    Int,
    /// Machine pointer; `None` pointee is the untyped-pointer wildcard
    Ptr(Option<Box<Type>>),
    /// Fixed-length run of elements; unknown length or element type
    /// only ever appears in checker-synthesized types
    Array {
        len: Option<usize>,
        elem: Option<Box<Type>>,
    },
    /// First-class procedure address with its signature
    Addr {
        in_types: Vec<Type>,
        out_types: Vec<Type>,
    },
    /// Type variable; valid only during signature matching
    Var { name: String, id: u64 },
    /// Nominal record type in the struct arena
    Struct(StructId),
}

impl Type {
    pub fn ptr_to(t: Type) -> Type {
        Type::Ptr(Some(Box::new(t)))
    }

    pub fn ptr_any() -> Type {
        Type::Ptr(None)
    }

    pub fn array_of(len: usize, elem: Type) -> Type {
        Type::Array {
            len: Some(len),
            elem: Some(Box::new(elem)),
        }
    }

    pub fn var(name: impl Into<String>) -> Type {
        Type::Var {
            name: name.into(),
            id: fresh_var_id(),
        }
    }

    /// Positional type equality, used for exact-position stack checks.
    ///
    /// Wildcards (`Ptr(None)`, arrays of unknown length or element) match
    /// anything in that position, in either direction. Struct equality is
    /// one-directional: `self` matches `expected` when `expected` is the
    /// same struct or one of `self`'s ancestors, so a derived struct
    /// passes where a base struct is expected but not vice versa.
    pub fn matches(&self, expected: &Type, structs: &StructTable) -> bool {
        match (self, expected) {
            (Type::Int, Type::Int) => true,
            (Type::Ptr(a), Type::Ptr(b)) => match (a, b) {
                (None, _) | (_, None) => true,
                (Some(x), Some(y)) => x.matches(y, structs),
            },
            (
                Type::Array { len: la, elem: ea },
                Type::Array { len: lb, elem: eb },
            ) => {
                let len_ok = match (la, lb) {
                    (None, _) | (_, None) => true,
                    (Some(x), Some(y)) => x == y,
                };
                let elem_ok = match (ea, eb) {
                    (None, _) | (_, None) => true,
                    (Some(x), Some(y)) => x.matches(y, structs),
                };
                len_ok && elem_ok
            }
            (
                Type::Addr {
                    in_types: ia,
                    out_types: oa,
                },
                Type::Addr {
                    in_types: ib,
                    out_types: ob,
                },
            ) => {
                ia.len() == ib.len()
                    && oa.len() == ob.len()
                    && ia.iter().zip(ib).all(|(x, y)| x.matches(y, structs))
                    && oa.iter().zip(ob).all(|(x, y)| x.matches(y, structs))
            }
            (Type::Var { id: a, .. }, Type::Var { id: b, .. }) => a == b,
            (Type::Struct(a), Type::Struct(b)) => a == b || structs.is_ancestor(*b, *a),
            _ => false,
        }
    }

    /// Byte size of a concrete type.
    ///
    /// Errors on wildcards and unresolved type variables; codegen must
    /// never see a size guessed for an unknown type.
    pub fn size(&self, structs: &StructTable) -> Result<usize> {
        match self {
            Type::Int | Type::Ptr(_) | Type::Addr { .. } => Ok(WORD_SIZE),
            Type::Array {
                len: Some(len),
                elem: Some(elem),
            } => Ok(len * elem.size(structs)?),
            Type::Array { .. } => Err(CheckError::layout(
                "cannot take the size of an array of unknown length or element type",
            )),
            Type::Var { name, .. } => Err(CheckError::layout(format!(
                "cannot take the size of unresolved type variable {name}"
            ))),
            Type::Struct(id) => structs.size_of(*id),
        }
    }

    /// Human-readable rendering for diagnostics.
    pub fn render(&self, structs: &StructTable) -> String {
        match self {
            Type::Int => "int".to_string(),
            Type::Ptr(None) => "ptr".to_string(),
            Type::Ptr(Some(inner)) => format!("*{}", inner.render(structs)),
            Type::Array { len, elem } => {
                let len = match len {
                    Some(n) => n.to_string(),
                    None => "?".to_string(),
                };
                let elem = match elem {
                    Some(t) => t.render(structs),
                    None => "any".to_string(),
                };
                format!("[{len}] {elem}")
            }
            Type::Addr {
                in_types,
                out_types,
            } => format!(
                "addr ({} -> {})",
                render_types(in_types, structs),
                render_types(out_types, structs)
            ),
            Type::Var { name, .. } => name.clone(),
            Type::Struct(id) => structs.get(*id).name.clone(),
        }
    }
}

/// Positional equality over stack slots, where `None` matches anything.
pub fn types_match(got: &Option<Type>, expected: &Option<Type>, structs: &StructTable) -> bool {
    match (got, expected) {
        (None, _) | (_, None) => true,
        (Some(a), Some(b)) => a.matches(b, structs),
    }
}

/// Positional check of a stack slot against a required concrete type.
pub fn slot_matches(got: &Option<Type>, expected: &Type, structs: &StructTable) -> bool {
    match got {
        None => true,
        Some(t) => t.matches(expected, structs),
    }
}

/// Render a stack slot, `any` for the wildcard.
pub fn render_slot(slot: &Option<Type>, structs: &StructTable) -> String {
    match slot {
        Some(t) => t.render(structs),
        None => "any".to_string(),
    }
}

fn render_types(types: &[Type], structs: &StructTable) -> String {
    types
        .iter()
        .map(|t| t.render(structs))
        .collect::<Vec<_>>()
        .join(" ")
}

/// A nominal struct definition.
///
/// The member table (`fields`) is built copy-on-extend: a child starts
/// from a copy of its parent's table and appends its own fields after
/// the inherited ones, so a base struct's layout is a byte-prefix of
/// every derived struct's layout and upcasting stays pointer-safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    /// Full member table: inherited fields first, own fields after
    pub fields: Vec<(String, Type)>,
    pub parent: Option<StructId>,
    pub methods: HashMap<String, ProcId>,
    pub static_methods: HashMap<String, ProcId>,
    /// Field index -> default integer value; defaulted fields are
    /// elided from pack arguments
    pub defaults: HashMap<usize, i64>,
    pub unpackable: bool,
}

/// Arena of struct definitions.
///
/// `parent` links are indices into the same arena; the hierarchy is a
/// tree built by the parser strictly before checking starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructTable {
    defs: Vec<StructDef>,
    by_name: HashMap<String, StructId>,
}

impl StructTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a struct, extending `parent`'s member table if given.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        parent: Option<StructId>,
        own_fields: Vec<(String, Type)>,
    ) -> StructId {
        let name = name.into();
        let mut fields = match parent {
            Some(p) => self.get(p).fields.clone(),
            None => Vec::new(),
        };
        let methods = match parent {
            Some(p) => self.get(p).methods.clone(),
            None => HashMap::new(),
        };
        let static_methods = match parent {
            Some(p) => self.get(p).static_methods.clone(),
            None => HashMap::new(),
        };
        fields.extend(own_fields);
        let id = StructId(self.defs.len());
        self.by_name.insert(name.clone(), id);
        self.defs.push(StructDef {
            name,
            fields,
            parent,
            methods,
            static_methods,
            defaults: HashMap::new(),
            unpackable: false,
        });
        id
    }

    pub fn get(&self, id: StructId) -> &StructDef {
        &self.defs[id.0]
    }

    pub fn get_mut(&mut self, id: StructId) -> &mut StructDef {
        &mut self.defs[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<StructId> {
        self.by_name.get(name).copied()
    }

    /// Walk the parent chain of `id`, including `id` itself.
    pub fn ancestors(&self, id: StructId) -> Vec<StructId> {
        let mut chain = vec![id];
        let mut cur = id;
        while let Some(p) = self.get(cur).parent {
            chain.push(p);
            cur = p;
        }
        chain
    }

    /// Whether `base` is `derived` or one of `derived`'s ancestors.
    pub fn is_ancestor(&self, base: StructId, derived: StructId) -> bool {
        self.ancestors(derived).contains(&base)
    }

    /// Sum of the member-table field sizes.
    pub fn size_of(&self, id: StructId) -> Result<usize> {
        let mut total = 0;
        for (_, typ) in &self.get(id).fields {
            total += typ.size(self)?;
        }
        Ok(total)
    }

    /// Byte offset of a field: the running sum of the sizes of the
    /// fields preceding it in member-table order.
    pub fn field_offset(&self, id: StructId, field: &str) -> Result<Option<(usize, Type)>> {
        let mut offset = 0;
        for (name, typ) in &self.get(id).fields {
            if name == field {
                return Ok(Some((offset, typ.clone())));
            }
            offset += typ.size(self)?;
        }
        Ok(None)
    }

    /// Resolve a method, walking the parent chain.
    pub fn find_method(&self, id: StructId, name: &str) -> Option<ProcId> {
        for ancestor in self.ancestors(id) {
            if let Some(&pid) = self.get(ancestor).methods.get(name) {
                return Some(pid);
            }
        }
        None
    }

    /// All field and method names of a struct, for typo suggestions.
    pub fn member_names(&self, id: StructId) -> Vec<String> {
        let mut names: Vec<String> = self
            .get(id)
            .fields
            .iter()
            .map(|(n, _)| n.clone())
            .collect();
        for ancestor in self.ancestors(id) {
            names.extend(self.get(ancestor).methods.keys().cloned());
            names.extend(self.get(ancestor).static_methods.keys().cloned());
        }
        names
    }
}
