//! Per-call-site resolution of declared type variables
//!
//! A procedure may declare argument and return types containing type
//! variables. At every call site the checker matches the declared input
//! types against the concrete stack contents, collects a substitution,
//! and instantiates both sides of the signature with it. No explicit
//! instantiation syntax exists; nothing survives the call site.

use std::collections::HashMap;

use super::Type;

/// Bindings collected while matching one signature
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    bindings: HashMap<u64, Type>,
}

/// Instantiation hit a variable with no binding; the call site did not
/// determine it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnboundVar {
    pub name: String,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, id: u64, typ: Type) {
        // Last write wins: rebinding the same variable against a
        // different concrete type is not detected.
        self.bindings.insert(id, typ);
    }

    pub fn get(&self, id: u64) -> Option<&Type> {
        self.bindings.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Structurally walk `declared`, recording a binding wherever a type
/// variable lines up with a concrete actual. Recurses through pointers
/// and arrays when the actual has the same shape; contributes nothing
/// otherwise.
pub fn match_var(declared: &Type, actual: &Option<Type>, subst: &mut Substitution) {
    match declared {
        Type::Var { id, .. } => {
            if let Some(t) = actual {
                subst.bind(*id, t.clone());
            }
        }
        Type::Ptr(Some(inner)) => {
            if let Some(Type::Ptr(Some(actual_inner))) = actual {
                match_var(inner, &Some((**actual_inner).clone()), subst);
            }
        }
        Type::Array {
            elem: Some(elem), ..
        } => {
            if let Some(Type::Array {
                elem: Some(actual_elem),
                ..
            }) = actual
            {
                match_var(elem, &Some((**actual_elem).clone()), subst);
            }
        }
        _ => {}
    }
}

/// Collect a substitution by matching a declared input list against the
/// top of the stack. The caller has already checked that the stack is
/// deep enough.
pub fn solve(declared: &[Type], stack: &[Option<Type>]) -> Substitution {
    let mut subst = Substitution::new();
    let offset = stack.len() - declared.len();
    for (decl, actual) in declared.iter().zip(&stack[offset..]) {
        match_var(decl, actual, &mut subst);
    }
    subst
}

/// Replace every type-variable leaf with its binding.
///
/// This is the only place an unresolved variable is a hard error: after
/// instantiation the signature must be fully concrete.
pub fn instantiate(typ: &Type, subst: &Substitution) -> Result<Type, UnboundVar> {
    match typ {
        Type::Var { name, id } => match subst.get(*id) {
            Some(t) => Ok(t.clone()),
            None => Err(UnboundVar { name: name.clone() }),
        },
        Type::Ptr(Some(inner)) => Ok(Type::ptr_to(instantiate(inner, subst)?)),
        Type::Array {
            len,
            elem: Some(elem),
        } => Ok(Type::Array {
            len: *len,
            elem: Some(Box::new(instantiate(elem, subst)?)),
        }),
        Type::Addr {
            in_types,
            out_types,
        } => Ok(Type::Addr {
            in_types: in_types
                .iter()
                .map(|t| instantiate(t, subst))
                .collect::<Result<_, _>>()?,
            out_types: out_types
                .iter()
                .map(|t| instantiate(t, subst))
                .collect::<Result<_, _>>()?,
        }),
        other => Ok(other.clone()),
    }
}
