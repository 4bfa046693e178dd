//! Operator checking and overload rewriting
//!
//! Arithmetic and comparisons are primitive on ints. When both operands
//! are pointers into the same struct family and the family defines the
//! matching dunder method, the operator is rewritten into a method call
//! instead; the backends never see an overloaded operator.

use crate::error::{CheckError, Result};
use crate::ir::{Op, OpType, Operand, Operator, Program};
use crate::types::{render_slot, slot_matches, Type, WORD_SIZE};

use super::{struct_ptr, Checker, Emit};

impl Checker<'_> {
    pub(crate) fn check_operator(&mut self, op: Op, program: &mut Program) -> Result<Emit> {
        let Operand::Operator(operator) = op.operand else {
            return Err(CheckError::stack_shape(
                "malformed operand for Operator",
                &op.loc,
            ));
        };
        match operator {
            Operator::Add
            | Operator::Sub
            | Operator::Mul
            | Operator::Div
            | Operator::Lt
            | Operator::Gt
            | Operator::Eq
            | Operator::Le
            | Operator::Ge
            | Operator::Ne => self.check_binary(operator, op, program),
            Operator::Dup => {
                let a = self.pop(&op.loc, "dup")?;
                self.push(a.clone());
                self.push(a);
                Ok(Emit::Keep(op))
            }
            Operator::Drop => {
                self.pop(&op.loc, "drop")?;
                Ok(Emit::Keep(op))
            }
            Operator::Swap => {
                let b = self.pop(&op.loc, "swap")?;
                let a = self.pop(&op.loc, "swap")?;
                self.push(b);
                self.push(a);
                Ok(Emit::Keep(op))
            }
            Operator::Rot => {
                let c = self.pop(&op.loc, "rot")?;
                let b = self.pop(&op.loc, "rot")?;
                let a = self.pop(&op.loc, "rot")?;
                self.push(b);
                self.push(c);
                self.push(a);
                Ok(Emit::Keep(op))
            }
            Operator::Store => self.check_store(op, program),
            Operator::Store8 => {
                self.pop_pointer(&op, program)?;
                self.pop_expect(&Type::Int, program, &op.loc, "!8")?;
                Ok(Emit::Keep(op))
            }
            Operator::Load => self.check_load(op, program),
            Operator::Load8 => {
                self.pop_pointer(&op, program)?;
                self.push(Some(Type::Int));
                Ok(Emit::Keep(op))
            }
            Operator::Print => {
                self.pop_expect(&Type::Int, program, &op.loc, "print")?;
                Ok(Emit::Keep(op))
            }
        }
    }

    /// Primitive binary operator, or a dunder rewrite when both
    /// operands are pointers to the same struct family.
    fn check_binary(&mut self, operator: Operator, op: Op, program: &mut Program) -> Result<Emit> {
        if self.stack.len() >= 2 {
            let rhs = struct_ptr(&self.stack[self.stack.len() - 1]);
            let lhs = struct_ptr(&self.stack[self.stack.len() - 2]);
            if let (Some(lhs), Some(rhs)) = (lhs, rhs) {
                return self.rewrite_overload(operator, op, lhs, rhs, program);
            }
        }
        self.pop_expect(&Type::Int, program, &op.loc, operator.name())?;
        self.pop_expect(&Type::Int, program, &op.loc, operator.name())?;
        self.push(Some(Type::Int));
        Ok(Emit::Keep(op))
    }

    fn rewrite_overload(
        &mut self,
        operator: Operator,
        op: Op,
        lhs: crate::types::StructId,
        rhs: crate::types::StructId,
        program: &Program,
    ) -> Result<Emit> {
        let structs = &program.structs;
        let related = structs.is_ancestor(lhs, rhs) || structs.is_ancestor(rhs, lhs);
        if !related {
            return Err(CheckError::name_resolution(
                format!(
                    "operator {} is not defined between {} and {}",
                    operator.name(),
                    structs.get(lhs).name,
                    structs.get(rhs).name
                ),
                &op.loc,
            ));
        }
        let dunder = operator
            .dunder()
            .expect("only overloadable operators reach rewrite_overload");
        let Some(method) = structs.find_method(lhs, dunder) else {
            return Err(CheckError::name_resolution(
                format!(
                    "struct {} does not define {} for operator {}",
                    structs.get(lhs).name,
                    dunder,
                    operator.name()
                ),
                &op.loc,
            ));
        };
        // Methods take their receiver on top; the rewritten call is
        // validated like any other when it comes back through the pass.
        Ok(Emit::Many(vec![
            Op::operator(Operator::Swap, op.loc.clone()),
            Op::new(OpType::Call, Operand::Proc(method), op.loc),
        ]))
    }

    fn check_store(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let pointee = self.pop_pointer(&op, program)?;
        let value = self.pop(&op.loc, "!")?;
        if let Some(t) = pointee {
            if !slot_matches(&value, &t, &program.structs) {
                return Err(CheckError::stack_shape(
                    format!(
                        "cannot store {} through a pointer to {}",
                        render_slot(&value, &program.structs),
                        t.render(&program.structs)
                    ),
                    &op.loc,
                ));
            }
        }
        Ok(Emit::Keep(op))
    }

    fn check_load(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let pointee = self.pop_pointer(&op, program)?;
        match pointee {
            None => self.push(Some(Type::Int)),
            Some(t) => {
                if t.size(&program.structs)? != WORD_SIZE {
                    return Err(CheckError::stack_shape(
                        format!(
                            "cannot load a value of type {} with @",
                            t.render(&program.structs)
                        ),
                        &op.loc,
                    ));
                }
                self.push(Some(t));
            }
        }
        Ok(Emit::Keep(op))
    }

    /// Pop a pointer slot; returns its pointee when one is known.
    fn pop_pointer(&mut self, op: &Op, program: &Program) -> Result<Option<Type>> {
        let got = self.pop(&op.loc, "a memory access")?;
        match got {
            None | Some(Type::Ptr(None)) => Ok(None),
            Some(Type::Ptr(Some(inner))) => Ok(Some(*inner)),
            other => Err(CheckError::stack_shape(
                format!(
                    "expected a pointer, got {}",
                    render_slot(&other, &program.structs)
                ),
                &op.loc,
            )),
        }
    }
}
