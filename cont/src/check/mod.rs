//! The abstract stack interpreter
//!
//! One left-to-right pass over the op sequence. The operand stack holds
//! `Option<Type>` slots; a stack of route snapshots tracks nested
//! structured blocks so branch arms and loop bodies can be reconciled.
//! Each op is validated against the live stack and either kept,
//! rewritten in place, or replaced by a desugared sequence that is fed
//! back through the same pass.
//!
//! The pass is single-threaded and fail-fast: the first error aborts
//! checking, since the abstract stack is not sound past a mismatch.

pub mod member;
pub mod operator;

use std::collections::VecDeque;

use crate::config::{Config, Target};
use crate::error::{CheckError, Result};
use crate::ir::{BlockId, BlockType, Loc, Op, OpType, Operand, Operator, ProcId, Program};
use crate::types::{render_slot, slot_matches, StructId, Type};
use crate::types::subst::{instantiate, solve, Substitution};
use crate::types::unify::down_cast_stacks;

/// What a handler produced for one input op.
pub(crate) enum Emit {
    /// Validated; append to the output sequence as-is (possibly with a
    /// rewritten operand)
    Keep(Op),
    /// Replaced by a desugared sequence, which is re-checked from the
    /// front of the queue
    Many(Vec<Op>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    If,
    Else,
    While,
    Proc,
}

/// Saved state for one open structured block.
struct Route {
    kind: RouteKind,
    /// Stack snapshot whose meaning depends on `kind`: the pre-branch
    /// stack for `If`/`While`, the then-arm result for `Else`, the
    /// caller's stack for `Proc`
    saved: Vec<Option<Type>>,
    /// Depth of the stack when the block was opened, for arm-effect
    /// bookkeeping
    pre_len: usize,
    /// The currently live arm hit an unconditional exit
    exited: bool,
    /// A sibling arm (the then-arm, seen from an else-arm) exited
    sibling_exited: bool,
    block: Option<BlockId>,
}

pub(crate) struct Checker<'cfg> {
    stack: Vec<Option<Type>>,
    routes: Vec<Route>,
    bind_stack: Vec<Option<Type>>,
    current_proc: Option<ProcId>,
    runtime_locs: Vec<String>,
    config: &'cfg Config,
    malloc_ok: bool,
}

/// Run the checking pass over a whole program.
///
/// On success the program's ops have been validated and rewritten in
/// place, every block carries its arm stack effects, and the returned
/// value is the final abstract stack, which the driver uses to insert
/// implicit cleanup for leftover values.
pub fn type_check(program: &mut Program, config: &Config) -> Result<Vec<Option<Type>>> {
    let mut checker = Checker::new(config);
    checker.resolve_allocator(program)?;

    let mut pending: VecDeque<Op> = std::mem::take(&mut program.ops).into();
    let mut out: Vec<Op> = Vec::with_capacity(pending.len());

    while let Some(op) = pending.pop_front() {
        match checker.check_op(op, program)? {
            Emit::Keep(op) => {
                // Desugaring shifts addresses, so block addresses are
                // assigned from the output sequence, not the input.
                let index = out.len();
                if let Operand::Block(b) = op.operand {
                    match op.typ {
                        OpType::If | OpType::While => program.block_mut(b).start = index,
                        OpType::EndIf | OpType::EndWhile => program.block_mut(b).end = index,
                        _ => {}
                    }
                }
                out.push(op);
            }
            Emit::Many(ops) => {
                for op in ops.into_iter().rev() {
                    pending.push_front(op);
                }
            }
        }
    }

    if !checker.routes.is_empty() {
        return Err(CheckError::route_merge(
            "unclosed block at the end of the program",
            &Loc::generated(),
        ));
    }

    program.ops = out;
    program.runtime_locs.append(&mut checker.runtime_locs);
    Ok(checker.stack)
}

/// The struct id behind a `*Struct` stack slot, if that is what it is.
pub(crate) fn struct_ptr(slot: &Option<Type>) -> Option<StructId> {
    if let Some(Type::Ptr(Some(inner))) = slot {
        if let Type::Struct(id) = **inner {
            return Some(id);
        }
    }
    None
}

impl<'cfg> Checker<'cfg> {
    fn new(config: &'cfg Config) -> Self {
        Self {
            stack: Vec::new(),
            routes: Vec::new(),
            bind_stack: Vec::new(),
            current_proc: None,
            runtime_locs: Vec::new(),
            config,
            malloc_ok: false,
        }
    }

    /// Check the struct allocator once, structurally, before the pass.
    ///
    /// A missing allocator disables struct packing; a present but
    /// malformed one aborts checking.
    fn resolve_allocator(&mut self, program: &Program) -> Result<()> {
        if !self.config.struct_malloc {
            return Ok(());
        }
        let Some(pid) = program.lookup_proc("malloc") else {
            return Ok(());
        };
        let proc = program.proc(pid);
        let sig_ok = proc.in_stack == vec![Type::Int]
            && proc.out_stack.len() == 1
            && matches!(proc.out_stack[0], Type::Ptr(_));
        if !sig_ok {
            return Err(CheckError::allocator(
                "malloc must have the signature int -> ptr to be used as the struct allocator",
            ));
        }
        self.malloc_ok = true;
        Ok(())
    }

    pub(crate) fn malloc_ok(&self) -> bool {
        self.malloc_ok
    }

    // ====================================================================
    // Stack primitives
    // ====================================================================

    pub(crate) fn push(&mut self, slot: Option<Type>) {
        self.stack.push(slot);
    }

    pub(crate) fn peek(&self) -> Option<&Option<Type>> {
        self.stack.last()
    }

    pub(crate) fn pop(&mut self, loc: &Loc, what: &str) -> Result<Option<Type>> {
        self.stack.pop().ok_or_else(|| {
            CheckError::stack_shape(format!("stack is too short for {what}"), loc)
        })
    }

    pub(crate) fn pop_expect(
        &mut self,
        expected: &Type,
        program: &Program,
        loc: &Loc,
        what: &str,
    ) -> Result<Option<Type>> {
        let got = self.pop(loc, what)?;
        if !slot_matches(&got, expected, &program.structs) {
            return Err(CheckError::stack_shape(
                format!(
                    "expected type {}, got {} for {what}",
                    expected.render(&program.structs),
                    render_slot(&got, &program.structs)
                ),
                loc,
            ));
        }
        Ok(got)
    }

    fn next_runtime_loc(&mut self, loc: &Loc) -> i64 {
        let id = self.runtime_locs.len() as i64;
        self.runtime_locs.push(loc.to_string());
        id
    }

    // ====================================================================
    // Dispatch
    // ====================================================================

    fn check_op(&mut self, op: Op, program: &mut Program) -> Result<Emit> {
        match op.typ {
            OpType::PushInt => {
                self.push(Some(Type::Int));
                Ok(Emit::Keep(op))
            }
            OpType::PushStr => {
                // length + data pointer
                self.push(Some(Type::Int));
                self.push(Some(Type::ptr_any()));
                Ok(Emit::Keep(op))
            }
            OpType::PushNullStr => {
                self.push(Some(Type::ptr_any()));
                Ok(Emit::Keep(op))
            }
            OpType::PushMemory | OpType::PushLocalMem => {
                self.push(Some(Type::ptr_any()));
                Ok(Emit::Keep(op))
            }
            OpType::PushVar => {
                let typ = self.var_type(&op, program)?;
                self.push(Some(typ));
                Ok(Emit::Keep(op))
            }
            OpType::PushVarPtr => {
                let typ = self.var_type(&op, program)?;
                self.push(Some(Type::ptr_to(typ)));
                Ok(Emit::Keep(op))
            }
            OpType::PushBind => self.check_push_bind(op),
            OpType::PushProc => {
                let pid = expect_proc_operand(&op)?;
                let proc = program.proc(pid);
                self.push(Some(Type::Addr {
                    in_types: proc.in_stack.clone(),
                    out_types: proc.out_stack.clone(),
                }));
                Ok(Emit::Keep(op))
            }
            OpType::If => self.check_if(op, program),
            OpType::Else => self.check_else(op, program),
            OpType::EndIf => self.check_endif(op, program),
            OpType::While => self.check_while(op, program),
            OpType::EndWhile => self.check_endwhile(op, program),
            OpType::For => self.check_for(op, program),
            OpType::EndFor => self.check_endfor(op),
            OpType::Bind => self.check_bind(op),
            OpType::Unbind => self.check_unbind(op),
            OpType::Call => {
                let pid = expect_proc_operand(&op)?;
                let proc = program.proc(pid).clone();
                self.apply_signature(&proc.name, &proc.in_stack, &proc.out_stack, program, &op.loc)?;
                Ok(Emit::Keep(op))
            }
            OpType::CallAddr => self.check_call_addr(op, program),
            OpType::Proc => self.check_proc(op, program),
            OpType::EndProc => self.check_endproc(op, program),
            OpType::Return => self.check_return(op, program),
            OpType::Operator => self.check_operator(op, program),
            OpType::Syscall => self.check_syscall(op, program),
            OpType::PackStruct => self.check_pack(op, program),
            OpType::UnpackStruct => self.check_unpack(op, program),
            OpType::MoveStruct => self.check_move(op, program),
            OpType::PushField => self.check_push_field(op, program, false),
            OpType::PushFieldPtr => self.check_push_field(op, program, true),
            OpType::Upcast => self.check_upcast(op, program),
            OpType::AutoInit => self.check_auto_init(op, program),
            OpType::SizeOf => {
                let Operand::Type(typ) = &op.operand else {
                    return Err(malformed(&op));
                };
                let size = typ.size(&program.structs)?;
                Ok(Emit::Many(vec![Op::new(
                    OpType::PushInt,
                    Operand::Int(size as i64),
                    op.loc,
                )]))
            }
            OpType::CastPtr => {
                let Operand::Type(typ) = op.operand.clone() else {
                    return Err(malformed(&op));
                };
                if !matches!(typ, Type::Ptr(_)) {
                    return Err(CheckError::stack_shape(
                        format!(
                            "cast target must be a pointer type, got {}",
                            typ.render(&program.structs)
                        ),
                        &op.loc,
                    ));
                }
                self.pop(&op.loc, "pointer cast")?;
                self.push(Some(typ));
                Ok(Emit::Keep(op))
            }
            OpType::CastInt => {
                self.pop(&op.loc, "integer cast")?;
                self.push(Some(Type::Int));
                Ok(Emit::Keep(op))
            }
            OpType::Asm => self.check_asm(op, program),
            OpType::Index => self.check_index(op, program, false),
            OpType::IndexPtr => self.check_index(op, program, true),
            OpType::Nop => Ok(Emit::Keep(op)),
        }
    }

    fn var_type(&self, op: &Op, program: &Program) -> Result<Type> {
        let Operand::Var(v) = op.operand else {
            return Err(malformed(op));
        };
        Ok(program.vars[v.0].typ.clone())
    }

    // ====================================================================
    // Control flow
    // ====================================================================

    fn check_if(&mut self, op: Op, program: &Program) -> Result<Emit> {
        self.pop_expect(&Type::Int, program, &op.loc, "if condition")?;
        self.routes.push(Route {
            kind: RouteKind::If,
            saved: self.stack.clone(),
            pre_len: self.stack.len(),
            exited: false,
            sibling_exited: false,
            block: block_operand(&op),
        });
        Ok(Emit::Keep(op))
    }

    fn check_else(&mut self, op: Op, program: &mut Program) -> Result<Emit> {
        let route = self.pop_route(RouteKind::If, "else without a matching if", &op.loc)?;
        self.record_arm_effect(&route, program);
        // The else arm starts from the pre-branch stack; the then-arm
        // result is parked on the new route for the merge at endif.
        let then_stack = std::mem::replace(&mut self.stack, route.saved);
        self.routes.push(Route {
            kind: RouteKind::Else,
            saved: then_stack,
            pre_len: route.pre_len,
            exited: false,
            sibling_exited: route.exited,
            block: route.block,
        });
        Ok(Emit::Keep(op))
    }

    fn check_endif(&mut self, op: Op, program: &mut Program) -> Result<Emit> {
        let route = match self.routes.last() {
            Some(r) if r.kind == RouteKind::If || r.kind == RouteKind::Else => {
                self.routes.pop().unwrap()
            }
            _ => {
                return Err(CheckError::route_merge(
                    "endif without a matching if",
                    &op.loc,
                ))
            }
        };
        self.record_arm_effect(&route, program);

        // For a bare if the other "arm" is the fall-through path, which
        // is always reachable.
        let other_exited = match route.kind {
            RouteKind::If => false,
            _ => route.sibling_exited,
        };
        let live_exited = route.exited;
        let other = route.saved;

        if live_exited && !other_exited {
            self.stack = other;
        } else if !live_exited && !other_exited {
            if self.stack.len() != other.len() {
                return Err(CheckError::route_merge(
                    "different stack shapes in the routes of if",
                    &op.loc,
                ));
            }
            self.stack = down_cast_stacks(&self.stack, &other, &program.structs).map_err(|e| {
                CheckError::route_merge(
                    format!(
                        "different types in the routes of if: {} vs {}",
                        e.left, e.right
                    ),
                    &op.loc,
                )
            })?;
        }
        // Both arms diverging leaves the live stack as-is; everything
        // after this point is itself unreachable until the route above
        // is merged.
        Ok(Emit::Keep(op))
    }

    fn check_while(&mut self, op: Op, program: &Program) -> Result<Emit> {
        self.pop_expect(&Type::Int, program, &op.loc, "while condition")?;
        self.routes.push(Route {
            kind: RouteKind::While,
            saved: self.stack.clone(),
            pre_len: self.stack.len(),
            exited: false,
            sibling_exited: false,
            block: block_operand(&op),
        });
        Ok(Emit::Keep(op))
    }

    fn check_endwhile(&mut self, op: Op, program: &mut Program) -> Result<Emit> {
        let route = self.pop_route(RouteKind::While, "endwhile without a matching while", &op.loc)?;
        self.record_arm_effect(&route, program);

        if route.exited {
            self.stack = route.saved;
            return Ok(Emit::Keep(op));
        }
        // Loops must be shape-invariant across iterations.
        if self.stack.len() != route.saved.len() {
            return Err(CheckError::route_merge(
                "different types/shapes in different routes of while",
                &op.loc,
            ));
        }
        self.stack =
            down_cast_stacks(&self.stack, &route.saved, &program.structs).map_err(|e| {
                CheckError::route_merge(
                    format!(
                        "different types/shapes in different routes of while: {} vs {}",
                        e.left, e.right
                    ),
                    &op.loc,
                )
            })?;
        Ok(Emit::Keep(op))
    }

    /// Lower `for` over a pointer-to-array into a counted `while`.
    ///
    /// The array pointer and the current element pointer are parked on
    /// the bind stack (two slots the parser accounts for when resolving
    /// body names); the index lives on the operand stack.
    fn check_for(&mut self, op: Op, program: &mut Program) -> Result<Emit> {
        let Some(block) = block_operand(&op) else {
            return Err(malformed(&op));
        };
        let top = self.peek().ok_or_else(|| {
            CheckError::stack_shape("stack is too short for for", &op.loc)
        })?;
        let (len, _elem) = match top {
            Some(Type::Ptr(Some(inner))) => match &**inner {
                Type::Array {
                    len: Some(len),
                    elem: Some(elem),
                } => (*len, (**elem).clone()),
                _ => {
                    return Err(CheckError::stack_shape(
                        format!(
                            "for expects a pointer to an array, got {}",
                            render_slot(top, &program.structs)
                        ),
                        &op.loc,
                    ))
                }
            },
            _ => {
                return Err(CheckError::stack_shape(
                    format!(
                        "for expects a pointer to an array, got {}",
                        render_slot(top, &program.structs)
                    ),
                    &op.loc,
                ))
            }
        };

        program.block_mut(block).typ = BlockType::While;
        let arr_slot = self.bind_stack.len();
        let loc = op.loc;
        Ok(Emit::Many(vec![
            Op::new(OpType::Bind, Operand::Int(1), loc.clone()),
            Op::new(OpType::PushInt, Operand::Int(0), loc.clone()),
            Op::operator(Operator::Dup, loc.clone()),
            Op::new(OpType::PushInt, Operand::Int(len as i64), loc.clone()),
            Op::operator(Operator::Lt, loc.clone()),
            Op::new(OpType::While, Operand::Block(block), loc.clone()),
            Op::operator(Operator::Dup, loc.clone()),
            Op::new(OpType::PushBind, Operand::Int(arr_slot as i64), loc.clone()),
            Op::operator(Operator::Swap, loc.clone()),
            Op::new(OpType::IndexPtr, Operand::None, loc.clone()),
            Op::new(OpType::Bind, Operand::Int(1), loc),
        ]))
    }

    fn check_endfor(&mut self, op: Op) -> Result<Emit> {
        let Some(block) = block_operand(&op) else {
            return Err(malformed(&op));
        };
        let loc = op.loc;
        Ok(Emit::Many(vec![
            Op::new(OpType::Unbind, Operand::Int(1), loc.clone()),
            Op::new(OpType::PushInt, Operand::Int(1), loc.clone()),
            Op::operator(Operator::Add, loc.clone()),
            Op::new(OpType::EndWhile, Operand::Block(block), loc.clone()),
            Op::operator(Operator::Drop, loc.clone()),
            Op::new(OpType::Unbind, Operand::Int(1), loc),
        ]))
    }

    fn check_proc(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let pid = expect_proc_operand(&op)?;
        let proc = program.proc(pid);
        let saved = std::mem::take(&mut self.stack);
        self.routes.push(Route {
            kind: RouteKind::Proc,
            pre_len: saved.len(),
            saved,
            exited: false,
            sibling_exited: false,
            block: None,
        });
        self.stack = proc.in_stack.iter().cloned().map(Some).collect();
        self.current_proc = Some(pid);
        Ok(Emit::Keep(op))
    }

    fn check_endproc(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let route = self.pop_route(
            RouteKind::Proc,
            "end of procedure with an unclosed block inside",
            &op.loc,
        )?;
        if !route.exited {
            self.check_proc_outputs(program, &op.loc)?;
        }
        self.stack = route.saved;
        self.current_proc = None;
        Ok(Emit::Keep(op))
    }

    fn check_return(&mut self, op: Op, program: &Program) -> Result<Emit> {
        if self.current_proc.is_none() {
            return Err(CheckError::stack_shape(
                "return outside of a procedure",
                &op.loc,
            ));
        }
        self.check_proc_outputs(program, &op.loc)?;
        if let Some(route) = self.routes.last_mut() {
            route.exited = true;
        }
        Ok(Emit::Keep(op))
    }

    /// The live stack must match the current proc's declared outputs
    /// exactly; there is no unification slack at procedure exits.
    fn check_proc_outputs(&mut self, program: &Program, loc: &Loc) -> Result<()> {
        let pid = self.current_proc.expect("checked by callers");
        let proc = program.proc(pid);
        if self.stack.len() != proc.out_stack.len() {
            return Err(CheckError::stack_shape(
                format!(
                    "wrong stack shape at exit from {}: declared {} output values, found {}",
                    proc.name,
                    proc.out_stack.len(),
                    self.stack.len()
                ),
                loc,
            ));
        }
        for (i, (got, expected)) in self.stack.iter().zip(&proc.out_stack).enumerate() {
            if !slot_matches(got, expected, &program.structs) {
                return Err(CheckError::stack_shape(
                    format!(
                        "expected type {}, got {} for output {} of {}",
                        expected.render(&program.structs),
                        render_slot(got, &program.structs),
                        i + 1,
                        proc.name
                    ),
                    loc,
                ));
            }
        }
        Ok(())
    }

    fn pop_route(&mut self, kind: RouteKind, msg: &str, loc: &Loc) -> Result<Route> {
        match self.routes.last() {
            Some(r) if r.kind == kind => Ok(self.routes.pop().unwrap()),
            _ => Err(CheckError::route_merge(msg, loc)),
        }
    }

    fn record_arm_effect(&self, route: &Route, program: &mut Program) {
        if let Some(block) = route.block {
            let effect = self.stack.len() as i64 - route.pre_len as i64;
            program.block_mut(block).arm_effects.push(effect);
        }
    }

    // ====================================================================
    // Binds, calls, misc
    // ====================================================================

    fn check_bind(&mut self, op: Op) -> Result<Emit> {
        let count = expect_int_operand(&op)? as usize;
        if self.stack.len() < count {
            return Err(CheckError::stack_shape(
                format!("stack is too short to bind {count} values"),
                &op.loc,
            ));
        }
        let split = self.stack.len() - count;
        self.bind_stack.extend(self.stack.drain(split..));
        Ok(Emit::Keep(op))
    }

    fn check_unbind(&mut self, op: Op) -> Result<Emit> {
        let count = expect_int_operand(&op)? as usize;
        if self.bind_stack.len() < count {
            return Err(CheckError::stack_shape(
                format!("cannot unbind {count} values"),
                &op.loc,
            ));
        }
        self.bind_stack.truncate(self.bind_stack.len() - count);
        Ok(Emit::Keep(op))
    }

    fn check_push_bind(&mut self, op: Op) -> Result<Emit> {
        let index = expect_int_operand(&op)? as usize;
        let Some(slot) = self.bind_stack.get(index) else {
            return Err(CheckError::stack_shape(
                format!("bind index {index} is out of range"),
                &op.loc,
            ));
        };
        self.push(slot.clone());
        Ok(Emit::Keep(op))
    }

    /// The call-site contract shared by named calls and calls through a
    /// procedure address: solve the declared inputs against the live
    /// stack, pop and validate the instantiated inputs, push the
    /// instantiated outputs.
    pub(crate) fn apply_signature(
        &mut self,
        name: &str,
        in_types: &[Type],
        out_types: &[Type],
        program: &Program,
        loc: &Loc,
    ) -> Result<()> {
        if self.stack.len() < in_types.len() {
            return Err(CheckError::stack_shape(
                format!(
                    "stack is too short to call {name}: expected {} values, found {}",
                    in_types.len(),
                    self.stack.len()
                ),
                loc,
            ));
        }
        let subst = solve(in_types, &self.stack);
        for (i, decl) in in_types.iter().enumerate().rev() {
            let want = self.instantiate_for(name, decl, &subst, loc)?;
            let got = self.stack.pop().expect("depth checked above");
            if !slot_matches(&got, &want, &program.structs) {
                return Err(CheckError::stack_shape(
                    format!(
                        "expected type {}, got {} for argument {} of {name}",
                        want.render(&program.structs),
                        render_slot(&got, &program.structs),
                        i + 1
                    ),
                    loc,
                ));
            }
        }
        for out in out_types {
            let typ = self.instantiate_for(name, out, &subst, loc)?;
            self.push(Some(typ));
        }
        Ok(())
    }

    fn instantiate_for(
        &self,
        name: &str,
        typ: &Type,
        subst: &Substitution,
        loc: &Loc,
    ) -> Result<Type> {
        instantiate(typ, subst).map_err(|e| {
            CheckError::generic_resolution(
                format!("cannot resolve type variable {} in call to {name}", e.name),
                loc,
            )
        })
    }

    fn check_call_addr(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let target = self.pop(&op.loc, "call through an address")?;
        let Some(Type::Addr {
            in_types,
            out_types,
        }) = target
        else {
            return Err(CheckError::stack_shape(
                format!(
                    "can only call a procedure address, got {}",
                    render_slot(&target, &program.structs)
                ),
                &op.loc,
            ));
        };
        self.apply_signature("proc address", &in_types, &out_types, program, &op.loc)?;
        Ok(Emit::Keep(op))
    }

    fn check_syscall(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let count = expect_int_operand(&op)?;
        if !(0..=6).contains(&count) {
            return Err(CheckError::stack_shape(
                format!("syscall takes 0 to 6 arguments, got {count}"),
                &op.loc,
            ));
        }
        // syscall number plus its arguments, each an int or a pointer
        for _ in 0..=count {
            let got = self.pop(&op.loc, "syscall")?;
            let ok = matches!(got, None | Some(Type::Int) | Some(Type::Ptr(_)));
            if !ok {
                return Err(CheckError::stack_shape(
                    format!(
                        "syscall arguments must be ints or pointers, got {}",
                        render_slot(&got, &program.structs)
                    ),
                    &op.loc,
                ));
            }
        }
        self.push(Some(Type::Int));
        Ok(Emit::Keep(op))
    }

    fn check_asm(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let Operand::Asm(block) = &op.operand else {
            return Err(malformed(&op));
        };
        let (in_types, out_types) = (block.in_types.clone(), block.out_types.clone());
        for decl in in_types.iter().rev() {
            self.pop_expect(decl, program, &op.loc, "inline assembly")?;
        }
        for out in out_types {
            self.push(Some(out));
        }
        Ok(Emit::Keep(op))
    }

    fn check_auto_init(&mut self, op: Op, program: &Program) -> Result<Emit> {
        let Operand::Var(v) = op.operand else {
            return Err(malformed(&op));
        };
        let typ = &program.vars[v.0].typ;
        if !matches!(typ, Type::Array { .. } | Type::Struct(_)) {
            return Err(CheckError::stack_shape(
                format!(
                    "auto-init requires an array or struct variable, got {}",
                    typ.render(&program.structs)
                ),
                &op.loc,
            ));
        }
        // the region must have a known size to be zero-initialized
        typ.size(&program.structs)?;
        Ok(Emit::Keep(op))
    }

    fn check_index(&mut self, mut op: Op, program: &Program, ptr_result: bool) -> Result<Emit> {
        self.pop_expect(&Type::Int, program, &op.loc, "array index")?;
        let arr = self.pop(&op.loc, "array indexing")?;
        let elem = match &arr {
            None => None,
            Some(Type::Ptr(Some(inner))) => match &**inner {
                Type::Array {
                    elem: Some(elem), ..
                } => Some((**elem).clone()),
                _ => {
                    return Err(CheckError::stack_shape(
                        format!(
                            "can only index a pointer to an array, got {}",
                            render_slot(&arr, &program.structs)
                        ),
                        &op.loc,
                    ))
                }
            },
            _ => {
                return Err(CheckError::stack_shape(
                    format!(
                        "can only index a pointer to an array, got {}",
                        render_slot(&arr, &program.structs)
                    ),
                    &op.loc,
                ))
            }
        };
        let Some(elem) = elem else {
            return Err(CheckError::stack_shape(
                "cannot index an array of unknown element type",
                &op.loc,
            ));
        };
        if ptr_result {
            self.push(Some(Type::ptr_to(elem)));
        } else {
            self.push(Some(elem));
        }
        // The fasm backend traps with a source location on a failed
        // bounds check; wat64 traps natively.
        if self.config.re_enabled && self.config.target == Target::FasmX86_64Linux {
            op.operand = Operand::Int(self.next_runtime_loc(&op.loc));
        }
        Ok(Emit::Keep(op))
    }
}

fn block_operand(op: &Op) -> Option<BlockId> {
    match op.operand {
        Operand::Block(b) => Some(b),
        _ => None,
    }
}

fn expect_proc_operand(op: &Op) -> Result<ProcId> {
    match op.operand {
        Operand::Proc(p) => Ok(p),
        _ => Err(malformed(op)),
    }
}

fn expect_int_operand(op: &Op) -> Result<i64> {
    match op.operand {
        Operand::Int(n) => Ok(n),
        _ => Err(malformed(op)),
    }
}

fn malformed(op: &Op) -> CheckError {
    CheckError::stack_shape(
        format!("malformed operand for {:?}", op.typ),
        &op.loc,
    )
}
