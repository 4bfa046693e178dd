//! Type unification across control-flow paths
//!
//! When two paths join (the arms of an `if`, or a loop body against its
//! entry), every stack slot must be narrowed to a single type both
//! paths are compatible with. `down_cast` computes that type or fails;
//! it never silently picks an unrelated one.

use super::{StructTable, Type};

/// Failure to unify two types, rendered for the final diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifyError {
    pub left: String,
    pub right: String,
}

impl UnifyError {
    fn new(a: &Option<Type>, b: &Option<Type>, structs: &StructTable) -> Self {
        Self {
            left: super::render_slot(a, structs),
            right: super::render_slot(b, structs),
        }
    }
}

/// Most specific type compatible with both `a` and `b`.
///
/// The wildcard slot (`None`) is the neutral element on either side.
/// Two structs unify to the nearest ancestor of `b` whose name appears
/// in `a`'s ancestor chain, which allows a descendant on one path to
/// widen to a shared base from the other path.
pub fn down_cast(
    a: &Option<Type>,
    b: &Option<Type>,
    structs: &StructTable,
) -> Result<Option<Type>, UnifyError> {
    let (x, y) = match (a, b) {
        (None, other) | (other, None) => return Ok(other.clone()),
        (Some(x), Some(y)) => (x, y),
    };

    match (x, y) {
        (Type::Struct(sa), Type::Struct(sb)) => {
            let chain = structs.ancestors(*sa);
            for candidate in structs.ancestors(*sb) {
                if chain.contains(&candidate) {
                    return Ok(Some(Type::Struct(candidate)));
                }
            }
            Err(UnifyError::new(a, b, structs))
        }
        (Type::Ptr(pa), Type::Ptr(pb)) => match (pa, pb) {
            (None, _) | (_, None) => Ok(Some(Type::Ptr(None))),
            (Some(ia), Some(ib)) => {
                let inner = down_cast(
                    &Some((**ia).clone()),
                    &Some((**ib).clone()),
                    structs,
                )?;
                Ok(Some(match inner {
                    Some(t) => Type::ptr_to(t),
                    None => Type::Ptr(None),
                }))
            }
        },
        (
            Type::Array { len: la, elem: ea },
            Type::Array { len: lb, elem: eb },
        ) => {
            if la != lb {
                return Err(UnifyError::new(a, b, structs));
            }
            let elem = down_cast(
                &ea.as_deref().cloned(),
                &eb.as_deref().cloned(),
                structs,
            )?;
            Ok(Some(Type::Array {
                len: *la,
                elem: elem.map(Box::new),
            }))
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
            if ia.len() != ib.len() || oa.len() != ob.len() {
                return Err(UnifyError::new(a, b, structs));
            }
            let mut in_types = Vec::with_capacity(ia.len());
            for (l, r) in ia.iter().zip(ib) {
                match down_cast(&Some(l.clone()), &Some(r.clone()), structs)? {
                    Some(t) => in_types.push(t),
                    None => return Err(UnifyError::new(a, b, structs)),
                }
            }
            let mut out_types = Vec::with_capacity(oa.len());
            for (l, r) in oa.iter().zip(ob) {
                match down_cast(&Some(l.clone()), &Some(r.clone()), structs)? {
                    Some(t) => out_types.push(t),
                    None => return Err(UnifyError::new(a, b, structs)),
                }
            }
            Ok(Some(Type::Addr {
                in_types,
                out_types,
            }))
        }
        _ => {
            // Int against Int, and the cross-variant wildcard cases:
            // keep whichever side is not a wildcard.
            if x.matches(y, structs) {
                Ok(Some(y.clone()))
            } else if y.matches(x, structs) {
                Ok(Some(x.clone()))
            } else {
                Err(UnifyError::new(a, b, structs))
            }
        }
    }
}

/// Unify two same-length stacks slot by slot.
pub fn down_cast_stacks(
    a: &[Option<Type>],
    b: &[Option<Type>],
    structs: &StructTable,
) -> Result<Vec<Option<Type>>, UnifyError> {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| down_cast(x, y, structs))
        .collect()
}
