//! Struct member resolution, packing, and upcasting
//!
//! Field access arrives from the parser by name; the checker resolves
//! it against the struct's (possibly inherited) member table, computes
//! the byte offset, and rewrites the op so the backends only ever see
//! offsets. Method access rewrites into a plain call.

use crate::error::{CheckError, Result};
use crate::ir::{Op, OpType, Operand, Program};
use crate::types::{render_slot, slot_matches, Type};
use crate::util::{find_similar_name, suggestion_hint};

use super::{struct_ptr, Checker, Emit};

impl Checker<'_> {
    /// `PushField`/`PushFieldPtr`: member access on a `*Struct`.
    pub(crate) fn check_push_field(
        &mut self,
        mut op: Op,
        program: &Program,
        ptr_result: bool,
    ) -> Result<Emit> {
        let Operand::Str(name) = op.operand.clone() else {
            return Err(CheckError::stack_shape(
                format!("malformed operand for {:?}", op.typ),
                &op.loc,
            ));
        };
        let top = self.peek().ok_or_else(|| {
            CheckError::stack_shape("stack is too short for field access", &op.loc)
        })?;
        let Some(sid) = struct_ptr(top) else {
            return Err(CheckError::stack_shape(
                format!(
                    "field access requires a pointer to a struct, got {}",
                    render_slot(top, &program.structs)
                ),
                &op.loc,
            ));
        };

        if let Some((offset, field_type)) = program.structs.field_offset(sid, &name)? {
            self.pop(&op.loc, "field access")?;
            op.operand = Operand::Int(offset as i64);
            if ptr_result {
                self.push(Some(Type::ptr_to(field_type)));
            } else {
                self.push(Some(field_type));
            }
            return Ok(Emit::Keep(op));
        }

        if let Some(method) = program.structs.find_method(sid, &name) {
            if ptr_result {
                return Err(CheckError::name_resolution(
                    format!("cannot take a pointer to method {name}"),
                    &op.loc,
                ));
            }
            // the receiver stays on the stack for the call to validate
            return Ok(Emit::Many(vec![Op::new(
                OpType::Call,
                Operand::Proc(method),
                op.loc,
            )]));
        }

        let candidates = program.structs.member_names(sid);
        let hint = suggestion_hint(find_similar_name(&name, &candidates, 2));
        Err(CheckError::name_resolution(
            format!(
                "struct {} has no member {name}{hint}",
                program.structs.get(sid).name
            ),
            &op.loc,
        ))
    }

    /// `PackStruct`: construct a struct value, through its `__init__`
    /// constructor when one exists, otherwise field by field with
    /// defaulted fields elided.
    pub(crate) fn check_pack(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let Operand::Struct(sid) = op.operand else {
            return Err(CheckError::stack_shape(
                "malformed operand for PackStruct",
                &op.loc,
            ));
        };
        let name = program.structs.get(sid).name.clone();
        if !self.malloc_ok() {
            let message = if self.config.struct_malloc {
                format!(
                    "packing struct {name} requires an allocator: define malloc with signature int -> ptr"
                )
            } else {
                format!("packing struct {name} requires the struct allocator, which is disabled")
            };
            return Err(CheckError::allocator(message));
        }

        if let Some(init) = program.structs.find_method(sid, "__init__") {
            let proc = program.proc(init).clone();
            // the freshly allocated object is the implicit receiver,
            // supplied by the pack lowering itself
            let args = match proc.in_stack.split_last() {
                Some((Type::Ptr(_), args)) => args,
                _ => {
                    return Err(CheckError::stack_shape(
                        format!("constructor of {name} must take the new struct pointer last"),
                        &op.loc,
                    ))
                }
            };
            self.apply_signature(
                &format!("{name} constructor"),
                args,
                &[],
                program,
                &op.loc,
            )?;
        } else {
            let fields = program.structs.get(sid).fields.clone();
            let defaults = program.structs.get(sid).defaults.clone();
            for (index, (field_name, field_type)) in fields.iter().enumerate().rev() {
                if defaults.contains_key(&index) {
                    continue;
                }
                let got = self.pop(&op.loc, format!("packing {name}").as_str())?;
                if !slot_matches(&got, field_type, &program.structs) {
                    return Err(CheckError::stack_shape(
                        format!(
                            "expected type {} for field {field_name} of {name}, got {}",
                            field_type.render(&program.structs),
                            render_slot(&got, &program.structs)
                        ),
                        &op.loc,
                    ));
                }
            }
        }
        self.push(Some(Type::ptr_to(Type::Struct(sid))));
        Ok(Emit::Keep(op))
    }

    /// `UnpackStruct`: spread an unpackable struct's fields onto the stack.
    pub(crate) fn check_unpack(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let got = self.pop(&op.loc, "unpack")?;
        let Some(sid) = struct_ptr(&got) else {
            return Err(CheckError::stack_shape(
                format!(
                    "unpack requires a pointer to a struct, got {}",
                    render_slot(&got, &program.structs)
                ),
                &op.loc,
            ));
        };
        let def = program.structs.get(sid);
        if !def.unpackable {
            return Err(CheckError::stack_shape(
                format!("struct {} cannot be unpacked", def.name),
                &op.loc,
            ));
        }
        for (_, field_type) in def.fields.clone() {
            self.push(Some(field_type));
        }
        Ok(Emit::Keep(op))
    }

    /// `MoveStruct`: copy a struct between two pointers; the source
    /// family must match the destination.
    pub(crate) fn check_move(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let dst = self.pop(&op.loc, "struct move")?;
        let src = self.pop(&op.loc, "struct move")?;
        if struct_ptr(&dst).is_none() || struct_ptr(&src).is_none() {
            return Err(CheckError::stack_shape(
                format!(
                    "struct move requires two struct pointers, got {} and {}",
                    render_slot(&src, &program.structs),
                    render_slot(&dst, &program.structs)
                ),
                &op.loc,
            ));
        }
        if !slot_matches(&src, &dst.clone().expect("checked above"), &program.structs) {
            return Err(CheckError::stack_shape(
                format!(
                    "cannot move {} into {}",
                    render_slot(&src, &program.structs),
                    render_slot(&dst, &program.structs)
                ),
                &op.loc,
            ));
        }
        Ok(Emit::Keep(op))
    }

    /// `Upcast`: turn a base-struct pointer into a pointer to one of
    /// its descendants, materializing the descendant's trailing fields
    /// from the stack.
    ///
    /// Because a base struct's layout is a byte-prefix of every
    /// descendant's, exactly the size difference's worth of extra
    /// field values is required.
    pub(crate) fn check_upcast(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let Operand::Struct(target) = op.operand else {
            return Err(CheckError::stack_shape(
                "malformed operand for Upcast",
                &op.loc,
            ));
        };
        let got = self.pop(&op.loc, "upcast")?;
        let Some(source) = struct_ptr(&got) else {
            return Err(CheckError::stack_shape(
                format!(
                    "upcast requires a pointer to a struct, got {}",
                    render_slot(&got, &program.structs)
                ),
                &op.loc,
            ));
        };
        if !program.structs.is_ancestor(source, target) {
            return Err(CheckError::stack_shape(
                format!(
                    "cannot upcast {} to unrelated struct {}",
                    program.structs.get(source).name,
                    program.structs.get(target).name
                ),
                &op.loc,
            ));
        }
        let target_fields = program.structs.get(target).fields.clone();
        let source_len = program.structs.get(source).fields.len();
        let target_name = program.structs.get(target).name.clone();
        for (field_name, field_type) in target_fields[source_len..].iter().rev() {
            let value = self.pop(&op.loc, format!("upcast to {target_name}").as_str())?;
            if !slot_matches(&value, field_type, &program.structs) {
                return Err(CheckError::stack_shape(
                    format!(
                        "expected type {} for field {field_name} of {target_name}, got {}",
                        field_type.render(&program.structs),
                        render_slot(&value, &program.structs)
                    ),
                    &op.loc,
                ));
            }
        }
        self.push(Some(Type::ptr_to(Type::Struct(target))));
        Ok(Emit::Keep(op))
    }
}
