//! The x86-64 code generator.
//!
//! Walks the finished, typed object table in declaration order and emits
//! Intel-syntax assembly plus the relocation table. Expression lowering
//! follows a strict post-order with an rax/xmm0 accumulator and an
//! operand stack: evaluate the left operand, push it, evaluate the
//! right, pop, apply. Pointer arithmetic is already scaled in the AST,
//! and every node carries its type, so lowering never re-derives
//! semantic facts.
//!
//! Calling convention: System V AMD64. Integer-class arguments go to
//! rdi/rsi/rdx/rcx/r8/r9, floating-point to xmm0..7, overflow to the
//! stack in declared order. Struct-by-value classification is a fixed
//! size table: up to 16 bytes travels in one or two GP registers as
//! 8-byte chunks, anything larger is passed by hidden reference and
//! copied into the callee's frame at entry.

use std::collections::HashMap;
use std::fmt::Write;

use log::debug;

use crate::backend::object::{LocalSlot, Obj, ObjKind, ObjectTable};
use crate::frontend::ast::{
    BinaryOp, Expr, ExprKind, LabelId, LocalId, Stmt, StmtKind, UnaryOp, VarRef,
};
use crate::frontend::types::{align_to, TypeArena, TypeId, TypeKind};
use crate::Context;

/// One row of the emitted relocation table:
/// patch `symbol + offset` with the address of `target + addend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationRow {
    pub symbol: String,
    pub offset: usize,
    pub target: String,
    pub addend: i64,
}

/// The code generator's output for one compilation unit.
#[derive(Debug)]
pub struct CodegenOutput {
    pub asm: String,
    pub relocations: Vec<RelocationRow>,
}

const ARG_GP64: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
const ARG_GP32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
const ARG_GP16: [&str; 6] = ["di", "si", "dx", "cx", "r8w", "r9w"];
const ARG_GP8: [&str; 6] = ["dil", "sil", "dl", "cl", "r8b", "r9b"];

/// The stack alignment the ABI requires at every call site, and the
/// boundary every frame size is rounded up to.
const STACK_ALIGN: usize = 16;

/// How one parameter or argument travels to a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgPass {
    /// Scalar integer/pointer in the numbered GP register.
    Gp(usize),
    /// Float/double in the numbered XMM register.
    Fp(usize),
    /// Struct of up to 16 bytes in `nregs` consecutive GP registers.
    GpChunks { first: usize, nregs: usize },
    /// Struct larger than 16 bytes: its address in a GP register, the
    /// callee copies the bytes into its own frame.
    RefInReg(usize),
    /// As above, but the address itself overflowed to the stack.
    RefOnStack { slot: usize },
    /// Value on the stack at `[rsp + 8*slot]`, occupying `slots` slots.
    Stack { slot: usize, slots: usize },
}

/// Classify a parameter/argument list against the fixed register banks.
/// Returns the passing mode per argument plus the number of XMM
/// registers and stack slots used.
fn classify_args(types: &TypeArena, tys: &[TypeId]) -> (Vec<ArgPass>, usize, usize) {
    let mut gp = 0usize;
    let mut fp = 0usize;
    let mut slot = 0usize;
    let mut out = Vec::with_capacity(tys.len());
    for &ty in tys {
        let pass = match types.kind(ty) {
            TypeKind::Float | TypeKind::Double => {
                if fp < 8 {
                    fp += 1;
                    ArgPass::Fp(fp - 1)
                } else {
                    slot += 1;
                    ArgPass::Stack {
                        slot: slot - 1,
                        slots: 1,
                    }
                }
            }
            TypeKind::Struct(_) | TypeKind::Union(_) => {
                let size = types.size(ty);
                if size > 16 {
                    if gp < 6 {
                        gp += 1;
                        ArgPass::RefInReg(gp - 1)
                    } else {
                        slot += 1;
                        ArgPass::RefOnStack { slot: slot - 1 }
                    }
                } else {
                    let nregs = size.div_ceil(8).max(1);
                    if gp + nregs <= 6 {
                        gp += nregs;
                        ArgPass::GpChunks {
                            first: gp - nregs,
                            nregs,
                        }
                    } else {
                        slot += nregs;
                        ArgPass::Stack {
                            slot: slot - nregs,
                            slots: nregs,
                        }
                    }
                }
            }
            _ => {
                if gp < 6 {
                    gp += 1;
                    ArgPass::Gp(gp - 1)
                } else {
                    slot += 1;
                    ArgPass::Stack {
                        slot: slot - 1,
                        slots: 1,
                    }
                }
            }
        };
        out.push(pass);
    }
    (out, fp, slot)
}

/// Assign a stack offset to every local of every function.
///
/// Register-passed parameters, by-reference aggregate parameters, and
/// all body locals get slots below rbp, each aligned to its own type's
/// alignment, walked in declaration order. Stack-passed parameters
/// already live above rbp at `16 + 8*slot`. The frame size is the
/// below-rbp total rounded up to the 16-byte stack alignment. The walk
/// is a pure function of the local list, so repeating it reproduces
/// identical offsets.
pub fn assign_frame_layout(types: &TypeArena, objects: &mut ObjectTable) {
    let ids: Vec<_> = objects.ids().collect();
    for id in ids {
        let obj = objects.get_mut(id);
        let ObjKind::Function {
            params,
            locals,
            body,
            stack_size,
            ..
        } = &mut obj.kind
        else {
            continue;
        };
        if body.is_none() {
            continue;
        }

        let param_tys: Vec<TypeId> = params.iter().map(|p| locals[p.0 as usize].ty).collect();
        let (passes, _, _) = classify_args(types, &param_tys);

        // Stack-passed parameters stay where the caller put them.
        for (i, pass) in passes.iter().enumerate() {
            if let ArgPass::Stack { slot, .. } = pass {
                locals[i].offset = (16 + 8 * slot) as i32;
            }
        }

        let mut offset = 0usize;
        for (i, local) in locals.iter_mut().enumerate() {
            if matches!(passes.get(i), Some(ArgPass::Stack { .. })) {
                continue;
            }
            let size = types.size(local.ty).max(1);
            let align = types.align(local.ty);
            offset = align_to(offset + size, align);
            local.offset = -(offset as i32);
        }
        *stack_size = align_to(offset, STACK_ALIGN);
    }
}

/// Generate assembly and the relocation table for a whole compilation.
pub fn generate(ctx: &mut Context) -> CodegenOutput {
    assign_frame_layout(&ctx.types, &mut ctx.objects);
    let mut gen = CodeGen {
        types: &ctx.types,
        objects: &ctx.objects,
        label_counter: &mut ctx.label_counter,
        out: String::new(),
        relocations: Vec::new(),
        depth: 0,
        cur_locals: &[],
        cur_labels: None,
        return_label: LabelId(0),
    };
    gen.run();
    CodegenOutput {
        asm: gen.out,
        relocations: gen.relocations,
    }
}

struct CodeGen<'a> {
    types: &'a TypeArena,
    objects: &'a ObjectTable,
    label_counter: &'a mut u32,
    out: String,
    relocations: Vec<RelocationRow>,
    /// Operand-stack depth in 8-byte units; used to keep calls 16-byte
    /// aligned.
    depth: usize,
    cur_locals: &'a [LocalSlot],
    cur_labels: Option<&'a HashMap<String, LabelId>>,
    return_label: LabelId,
}

impl<'a> CodeGen<'a> {
    fn run(&mut self) {
        self.line(".intel_syntax noprefix");
        let objects = self.objects;
        for (_, obj) in objects.iter() {
            if !obj.is_definition {
                continue;
            }
            match &obj.kind {
                ObjKind::Global { init } => self.emit_global(obj, init.as_ref()),
                ObjKind::Function { .. } => self.emit_function(obj),
            }
        }
    }

    fn emit(&mut self, insn: impl AsRef<str>) {
        let _ = writeln!(self.out, "  {}", insn.as_ref());
    }

    fn line(&mut self, s: impl AsRef<str>) {
        let _ = writeln!(self.out, "{}", s.as_ref());
    }

    fn new_label(&mut self) -> LabelId {
        let id = LabelId(*self.label_counter);
        *self.label_counter += 1;
        id
    }

    fn lbl(&self, l: LabelId) -> String {
        format!(".L{}", l.0)
    }

    fn place(&mut self, l: LabelId) {
        let name = self.lbl(l);
        self.line(format!("{}:", name));
    }

    // --- data ------------------------------------------------------------

    fn emit_global(&mut self, obj: &Obj, init: Option<&crate::backend::object::GlobalInit>) {
        let size = self.types.size(obj.ty).max(1);
        let align = self.types.align(obj.ty);
        match init {
            None => {
                self.line(".bss");
                if !obj.is_static {
                    self.line(format!(".globl {}", obj.name));
                }
                self.line(format!(".align {}", align));
                self.line(format!("{}:", obj.name));
                self.emit(format!(".zero {}", size));
            }
            Some(image) => {
                self.line(".data");
                if !obj.is_static {
                    self.line(format!(".globl {}", obj.name));
                }
                self.line(format!(".align {}", align));
                self.line(format!("{}:", obj.name));

                // Relocated quadwords interleave with plain bytes;
                // designated initializers may record them out of order.
                let mut relocs = image.relocs.clone();
                relocs.sort_by_key(|r| r.offset);
                let mut next = relocs.iter().peekable();
                let mut pos = 0usize;
                while pos < image.data.len() {
                    if let Some(r) = next.peek() {
                        if r.offset == pos {
                            let r = next.next().unwrap();
                            if r.addend == 0 {
                                self.emit(format!(".quad {}", r.target));
                            } else {
                                self.emit(format!(".quad {}{:+}", r.target, r.addend));
                            }
                            self.relocations.push(RelocationRow {
                                symbol: obj.name.clone(),
                                offset: r.offset,
                                target: r.target.clone(),
                                addend: r.addend,
                            });
                            pos += 8;
                            continue;
                        }
                    }
                    self.emit(format!(".byte {}", image.data[pos]));
                    pos += 1;
                }
            }
        }
    }

    // --- functions -------------------------------------------------------

    fn emit_function(&mut self, obj: &'a Obj) {
        let ObjKind::Function {
            params,
            locals,
            body: Some(body),
            labels,
            stack_size,
        } = &obj.kind
        else {
            return;
        };
        debug!("emitting '{}': frame size {}", obj.name, stack_size);

        self.cur_locals = locals;
        self.cur_labels = Some(labels);
        self.return_label = self.new_label();

        self.line(".text");
        if !obj.is_static {
            self.line(format!(".globl {}", obj.name));
        }
        self.line(format!("{}:", obj.name));
        self.emit("push rbp");
        self.emit("mov rbp, rsp");
        if *stack_size > 0 {
            self.emit(format!("sub rsp, {}", stack_size));
        }

        self.spill_params(params, locals);
        self.gen_stmt(body);
        debug_assert_eq!(self.depth, 0, "operand stack not drained");

        // Fall-through returns share the epilogue with `return`.
        self.place(self.return_label);
        self.emit("mov rsp, rbp");
        self.emit("pop rbp");
        self.emit("ret");
    }

    /// Store incoming parameters into their frame slots.
    fn spill_params(&mut self, params: &[LocalId], locals: &[LocalSlot]) {
        let param_tys: Vec<TypeId> = params.iter().map(|p| locals[p.0 as usize].ty).collect();
        let (passes, _, _) = classify_args(self.types, &param_tys);
        for (i, pass) in passes.iter().enumerate() {
            let slot = &locals[params[i].0 as usize];
            let size = self.types.size(slot.ty);
            match *pass {
                ArgPass::Gp(r) => self.store_gp(r, slot.offset, size),
                ArgPass::Fp(r) => match size {
                    4 => self.emit(format!(
                        "movss DWORD PTR [rbp{:+}], xmm{}",
                        slot.offset, r
                    )),
                    8 => self.emit(format!(
                        "movsd QWORD PTR [rbp{:+}], xmm{}",
                        slot.offset, r
                    )),
                    _ => unreachable!("floating parameter of size {}", size),
                },
                ArgPass::GpChunks { first, nregs } => {
                    for chunk in 0..nregs {
                        let bytes = (size - 8 * chunk).min(8);
                        self.store_gp_bytes(first + chunk, slot.offset + 8 * chunk as i32, bytes);
                    }
                }
                ArgPass::RefInReg(r) => {
                    self.emit(format!("mov rax, {}", ARG_GP64[r]));
                    self.copy_to_slot(slot.offset, size);
                }
                ArgPass::RefOnStack { slot: s } => {
                    self.emit(format!("mov rax, QWORD PTR [rbp+{}]", 16 + 8 * s));
                    self.copy_to_slot(slot.offset, size);
                }
                ArgPass::Stack { .. } => {} // already in place above rbp
            }
        }
    }

    fn store_gp(&mut self, r: usize, offset: i32, size: usize) {
        match size {
            1 => self.emit(format!("mov BYTE PTR [rbp{:+}], {}", offset, ARG_GP8[r])),
            2 => self.emit(format!("mov WORD PTR [rbp{:+}], {}", offset, ARG_GP16[r])),
            4 => self.emit(format!("mov DWORD PTR [rbp{:+}], {}", offset, ARG_GP32[r])),
            8 => self.emit(format!("mov QWORD PTR [rbp{:+}], {}", offset, ARG_GP64[r])),
            _ => unreachable!("scalar of size {}", size),
        }
    }

    /// Store the low `bytes` (1..=8) of an argument register, shifting
    /// the register down as bytes are peeled off. Used for the tail
    /// chunk of a small struct whose size is not a multiple of 8.
    fn store_gp_bytes(&mut self, r: usize, offset: i32, bytes: usize) {
        if matches!(bytes, 1 | 2 | 4 | 8) {
            self.store_gp(r, offset, bytes);
            return;
        }
        for i in 0..bytes {
            self.emit(format!(
                "mov BYTE PTR [rbp{:+}], {}",
                offset + i as i32,
                ARG_GP8[r]
            ));
            self.emit(format!("shr {}, 8", ARG_GP64[r]));
        }
    }

    /// Copy `size` bytes from the address in rax into the frame slot.
    fn copy_to_slot(&mut self, offset: i32, size: usize) {
        for i in 0..size {
            self.emit(format!("mov r10b, BYTE PTR [rax+{}]", i));
            self.emit(format!("mov BYTE PTR [rbp{:+}], r10b", offset + i as i32));
        }
    }

    // --- statements ------------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::ExprStmt(e) => self.gen_expr(e),
            StmtKind::Block(stmts) => {
                for s in stmts {
                    self.gen_stmt(s);
                }
            }
            StmtKind::Return(e) => {
                if let Some(e) = e {
                    self.gen_expr(e);
                }
                self.emit(format!("jmp {}", self.lbl(self.return_label)));
            }
            StmtKind::If { cond, then, els } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.gen_expr(cond);
                self.cmp_zero(cond.ty);
                self.emit(format!("je {}", self.lbl(else_label)));
                self.gen_stmt(then);
                self.emit(format!("jmp {}", self.lbl(end_label)));
                self.place(else_label);
                if let Some(els) = els {
                    self.gen_stmt(els);
                }
                self.place(end_label);
            }
            StmtKind::For {
                init,
                cond,
                inc,
                body,
                break_label,
                continue_label,
            } => {
                let begin = self.new_label();
                if let Some(init) = init {
                    self.gen_stmt(init);
                }
                self.place(begin);
                if let Some(cond) = cond {
                    self.gen_expr(cond);
                    self.cmp_zero(cond.ty);
                    self.emit(format!("je {}", self.lbl(*break_label)));
                }
                self.gen_stmt(body);
                self.place(*continue_label);
                if let Some(inc) = inc {
                    self.gen_expr(inc);
                }
                self.emit(format!("jmp {}", self.lbl(begin)));
                self.place(*break_label);
            }
            StmtKind::DoWhile {
                body,
                cond,
                break_label,
                continue_label,
            } => {
                let begin = self.new_label();
                self.place(begin);
                self.gen_stmt(body);
                self.place(*continue_label);
                self.gen_expr(cond);
                self.cmp_zero(cond.ty);
                self.emit(format!("jne {}", self.lbl(begin)));
                self.place(*break_label);
            }
            StmtKind::Switch {
                cond,
                body,
                cases,
                default_label,
                break_label,
            } => {
                self.gen_expr(cond);
                // A sequential chain of equality tests, then the default
                // (or the end) when nothing matched.
                let wide = self.types.size(cond.ty) == 8;
                for case in cases {
                    if wide {
                        if i32::try_from(case.value).is_ok() {
                            self.emit(format!("cmp rax, {}", case.value));
                        } else {
                            self.emit(format!("mov rdi, {}", case.value));
                            self.emit("cmp rax, rdi");
                        }
                    } else {
                        self.emit(format!("cmp eax, {}", case.value as i32));
                    }
                    self.emit(format!("je {}", self.lbl(case.label)));
                }
                match default_label {
                    Some(l) => self.emit(format!("jmp {}", self.lbl(*l))),
                    None => self.emit(format!("jmp {}", self.lbl(*break_label))),
                }
                self.gen_stmt(body);
                self.place(*break_label);
            }
            StmtKind::Case { label, body } | StmtKind::DefaultCase { label, body } => {
                self.place(*label);
                self.gen_stmt(body);
            }
            StmtKind::Jump { label } => {
                self.emit(format!("jmp {}", self.lbl(*label)));
            }
            StmtKind::Goto { name } => {
                let labels = self.cur_labels.expect("goto outside of a function");
                let label = labels[name];
                self.emit(format!("jmp {}", self.lbl(label)));
            }
            StmtKind::Label { label, body, .. } => {
                self.place(*label);
                self.gen_stmt(body);
            }
        }
    }

    // --- expressions -----------------------------------------------------

    fn push(&mut self) {
        self.emit("push rax");
        self.depth += 1;
    }

    fn pop(&mut self, reg: &str) {
        self.emit(format!("pop {}", reg));
        self.depth -= 1;
    }

    fn pushf(&mut self) {
        self.emit("sub rsp, 8");
        self.emit("movsd QWORD PTR [rsp], xmm0");
        self.depth += 1;
    }

    fn popf(&mut self, reg: usize) {
        self.emit(format!("movsd xmm{}, QWORD PTR [rsp]", reg));
        self.emit("add rsp, 8");
        self.depth -= 1;
    }

    /// Compare the accumulator against zero, setting flags.
    fn cmp_zero(&mut self, ty: TypeId) {
        match self.types.kind(ty) {
            TypeKind::Float => {
                self.emit("xorps xmm1, xmm1");
                self.emit("ucomiss xmm0, xmm1");
            }
            TypeKind::Double => {
                self.emit("xorpd xmm1, xmm1");
                self.emit("ucomisd xmm0, xmm1");
            }
            _ => {
                // Pointer-like values (including decayed arrays) are
                // full 8-byte addresses regardless of the nominal size.
                if self.types.size(ty) <= 4 && self.types.base_of(ty).is_none() {
                    self.emit("cmp eax, 0");
                } else {
                    self.emit("cmp rax, 0");
                }
            }
        }
    }

    /// Leave the address of an lvalue in rax.
    fn gen_addr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Var(VarRef::Local(l)) => {
                let offset = self.cur_locals[l.0 as usize].offset;
                self.emit(format!("lea rax, [rbp{:+}]", offset));
            }
            ExprKind::Var(VarRef::Global(id)) => {
                let name = &self.objects.get(*id).name;
                self.emit(format!("lea rax, [rip+{}]", name));
            }
            ExprKind::Deref(inner) => self.gen_expr(inner),
            ExprKind::Member { base, offset, .. } => {
                self.gen_addr(base);
                if *offset != 0 {
                    self.emit(format!("add rax, {}", offset));
                }
            }
            ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs);
                self.gen_addr(rhs);
            }
            _ => unreachable!("not an lvalue: {:?}", e.kind),
        }
    }

    /// Load the value at the address in rax, according to its type.
    /// Aggregates, arrays, and functions evaluate to their address.
    fn load(&mut self, ty: TypeId) {
        match self.types.kind(ty) {
            TypeKind::Array { .. }
            | TypeKind::Struct(_)
            | TypeKind::Union(_)
            | TypeKind::Func { .. } => return,
            TypeKind::Float => {
                self.emit("movss xmm0, DWORD PTR [rax]");
                return;
            }
            TypeKind::Double => {
                self.emit("movsd xmm0, QWORD PTR [rax]");
                return;
            }
            _ => {}
        }
        // Sub-int loads widen to int immediately, so the low 32 bits of
        // rax always hold a correct value for int-sized operations.
        let insn = if self.types.is_unsigned(ty) { "movzx" } else { "movsx" };
        match self.types.size(ty) {
            1 => self.emit(format!("{} eax, BYTE PTR [rax]", insn)),
            2 => self.emit(format!("{} eax, WORD PTR [rax]", insn)),
            4 => self.emit("mov eax, DWORD PTR [rax]"),
            _ => self.emit("mov rax, QWORD PTR [rax]"),
        }
    }

    /// Store the accumulator through the address on the operand stack.
    fn store(&mut self, ty: TypeId) {
        self.pop("rdi");
        match self.types.kind(ty) {
            TypeKind::Struct(_) | TypeKind::Union(_) => {
                for i in 0..self.types.size(ty) {
                    self.emit(format!("mov r8b, BYTE PTR [rax+{}]", i));
                    self.emit(format!("mov BYTE PTR [rdi+{}], r8b", i));
                }
                return;
            }
            TypeKind::Float => {
                self.emit("movss DWORD PTR [rdi], xmm0");
                return;
            }
            TypeKind::Double => {
                self.emit("movsd QWORD PTR [rdi], xmm0");
                return;
            }
            _ => {}
        }
        match self.types.size(ty) {
            1 => self.emit("mov BYTE PTR [rdi], al"),
            2 => self.emit("mov WORD PTR [rdi], ax"),
            4 => self.emit("mov DWORD PTR [rdi], eax"),
            _ => self.emit("mov QWORD PTR [rdi], rax"),
        }
    }

    fn gen_expr(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Num(v) => {
                self.emit(format!("mov rax, {}", v));
            }
            ExprKind::Float(v) => match self.types.kind(e.ty) {
                TypeKind::Float => {
                    self.emit(format!(
                        "mov eax, {}  # float {}",
                        (*v as f32).to_bits(),
                        v
                    ));
                    self.emit("movd xmm0, eax");
                }
                _ => {
                    self.emit(format!("mov rax, {}  # double {}", v.to_bits(), v));
                    self.emit("movq xmm0, rax");
                }
            },
            ExprKind::Var(_) | ExprKind::Member { .. } => {
                self.gen_addr(e);
                self.load(e.ty);
            }
            ExprKind::Deref(inner) => {
                self.gen_expr(inner);
                self.load(e.ty);
            }
            ExprKind::Addr(inner) => self.gen_addr(inner),
            ExprKind::Assign { lhs, rhs } => {
                self.gen_addr(lhs);
                self.push();
                self.gen_expr(rhs);
                self.store(e.ty);
            }
            ExprKind::Cast(inner) => {
                self.gen_expr(inner);
                self.cast(inner.ty, e.ty);
            }
            ExprKind::Comma { lhs, rhs } => {
                self.gen_expr(lhs);
                self.gen_expr(rhs);
            }
            ExprKind::Cond { cond, then, els } => {
                let else_label = self.new_label();
                let end_label = self.new_label();
                self.gen_expr(cond);
                self.cmp_zero(cond.ty);
                self.emit(format!("je {}", self.lbl(else_label)));
                self.gen_expr(then);
                self.emit(format!("jmp {}", self.lbl(end_label)));
                self.place(else_label);
                self.gen_expr(els);
                self.place(end_label);
            }
            ExprKind::Unary { op, operand } => self.gen_unary(*op, operand, e.ty),
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs),
            ExprKind::Call {
                name,
                func_ty,
                args,
            } => self.gen_call(name, *func_ty, args, e.ty),
        }
    }

    fn gen_unary(&mut self, op: UnaryOp, operand: &Expr, ty: TypeId) {
        self.gen_expr(operand);
        match op {
            UnaryOp::Neg => match self.types.kind(ty) {
                TypeKind::Float => {
                    self.emit("mov eax, 2147483648"); // sign bit of a float
                    self.emit("movd xmm1, eax");
                    self.emit("xorps xmm0, xmm1");
                }
                TypeKind::Double => {
                    self.emit("mov rax, -9223372036854775808"); // sign bit of a double
                    self.emit("movq xmm1, rax");
                    self.emit("xorpd xmm0, xmm1");
                }
                _ => self.emit("neg rax"),
            },
            UnaryOp::Not => {
                self.cmp_zero(operand.ty);
                self.emit("sete al");
                self.emit("movzx eax, al");
            }
            UnaryOp::BitNot => self.emit("not rax"),
        }
    }

    fn gen_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        // Short-circuit operators control evaluation, not just value.
        match op {
            BinaryOp::LogAnd => {
                let false_label = self.new_label();
                let end_label = self.new_label();
                self.gen_expr(lhs);
                self.cmp_zero(lhs.ty);
                self.emit(format!("je {}", self.lbl(false_label)));
                self.gen_expr(rhs);
                self.cmp_zero(rhs.ty);
                self.emit(format!("je {}", self.lbl(false_label)));
                self.emit("mov eax, 1");
                self.emit(format!("jmp {}", self.lbl(end_label)));
                self.place(false_label);
                self.emit("mov eax, 0");
                self.place(end_label);
                return;
            }
            BinaryOp::LogOr => {
                let true_label = self.new_label();
                let end_label = self.new_label();
                self.gen_expr(lhs);
                self.cmp_zero(lhs.ty);
                self.emit(format!("jne {}", self.lbl(true_label)));
                self.gen_expr(rhs);
                self.cmp_zero(rhs.ty);
                self.emit(format!("jne {}", self.lbl(true_label)));
                self.emit("mov eax, 0");
                self.emit(format!("jmp {}", self.lbl(end_label)));
                self.place(true_label);
                self.emit("mov eax, 1");
                self.place(end_label);
                return;
            }
            _ => {}
        }

        if self.types.is_flonum(lhs.ty) {
            self.gen_float_binary(op, lhs, rhs);
            return;
        }

        // Left-to-right: evaluate lhs, park it, evaluate rhs, then move
        // the rhs aside and restore the lhs into the accumulator.
        self.gen_expr(lhs);
        self.push();
        self.gen_expr(rhs);
        self.emit("mov rdi, rax");
        self.pop("rax");

        // Operands share a type after the usual arithmetic conversion;
        // 8-byte types use the full registers, the rest the low halves.
        let wide = self.types.size(lhs.ty) == 8;
        let (ax, di) = if wide { ("rax", "rdi") } else { ("eax", "edi") };
        let unsigned = self.types.is_unsigned(lhs.ty);

        match op {
            BinaryOp::Add => self.emit(format!("add {}, {}", ax, di)),
            BinaryOp::Sub => self.emit(format!("sub {}, {}", ax, di)),
            BinaryOp::Mul => self.emit(format!("imul {}, {}", ax, di)),
            BinaryOp::Div | BinaryOp::Mod => {
                if unsigned {
                    self.emit(format!("mov {}, 0", if wide { "rdx" } else { "edx" }));
                    self.emit(format!("div {}", di));
                } else {
                    self.emit(if wide { "cqo" } else { "cdq" });
                    self.emit(format!("idiv {}", di));
                }
                if op == BinaryOp::Mod {
                    self.emit(format!("mov {}, {}", ax, if wide { "rdx" } else { "edx" }));
                }
            }
            BinaryOp::BitAnd => self.emit(format!("and {}, {}", ax, di)),
            BinaryOp::BitOr => self.emit(format!("or {}, {}", ax, di)),
            BinaryOp::BitXor => self.emit(format!("xor {}, {}", ax, di)),
            BinaryOp::Shl => {
                self.emit("mov rcx, rdi");
                self.emit(format!("shl {}, cl", ax));
            }
            BinaryOp::Shr => {
                self.emit("mov rcx, rdi");
                if unsigned {
                    self.emit(format!("shr {}, cl", ax));
                } else {
                    self.emit(format!("sar {}, cl", ax));
                }
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
                self.emit(format!("cmp {}, {}", ax, di));
                let set = match (op, unsigned) {
                    (BinaryOp::Eq, _) => "sete",
                    (BinaryOp::Ne, _) => "setne",
                    (BinaryOp::Lt, false) => "setl",
                    (BinaryOp::Lt, true) => "setb",
                    (BinaryOp::Le, false) => "setle",
                    (BinaryOp::Le, true) => "setbe",
                    _ => unreachable!(),
                };
                self.emit(format!("{} al", set));
                self.emit("movzx eax, al");
            }
            BinaryOp::LogAnd | BinaryOp::LogOr => unreachable!("handled above"),
        }
    }

    fn gen_float_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        self.gen_expr(lhs);
        self.pushf();
        self.gen_expr(rhs);
        self.emit("movaps xmm1, xmm0");
        self.popf(0);

        let single = matches!(self.types.kind(lhs.ty), TypeKind::Float);
        let suffix = if single { "ss" } else { "sd" };
        match op {
            BinaryOp::Add => self.emit(format!("add{} xmm0, xmm1", suffix)),
            BinaryOp::Sub => self.emit(format!("sub{} xmm0, xmm1", suffix)),
            BinaryOp::Mul => self.emit(format!("mul{} xmm0, xmm1", suffix)),
            BinaryOp::Div => self.emit(format!("div{} xmm0, xmm1", suffix)),
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
                self.emit(format!("ucomi{} xmm0, xmm1", suffix));
                let set = match op {
                    BinaryOp::Eq => "sete",
                    BinaryOp::Ne => "setne",
                    BinaryOp::Lt => "setb",
                    BinaryOp::Le => "setbe",
                    _ => unreachable!(),
                };
                self.emit(format!("{} al", set));
                self.emit("movzx eax, al");
            }
            _ => unreachable!("invalid floating-point operator {:?}", op),
        }
    }

    // --- calls -----------------------------------------------------------

    fn gen_call(&mut self, name: &str, func_ty: TypeId, args: &[Expr], ret: TypeId) {
        let arg_tys: Vec<TypeId> = args.iter().map(|a| a.ty).collect();
        let (passes, fp_count, stack_slots) = classify_args(self.types, &arg_tys);

        // Keep rsp 16-byte aligned at the call instruction.
        let pad = (self.depth + stack_slots) % 2 == 1;
        if pad {
            self.emit("sub rsp, 8");
            self.depth += 1;
        }

        // Push stack-class arguments first, last argument first, so the
        // first overflow argument ends up at [rsp]. Then push the
        // register-class values the same way and pop them into their
        // registers in order.
        for (arg, pass) in args.iter().zip(&passes).rev() {
            if matches!(pass, ArgPass::Stack { .. } | ArgPass::RefOnStack { .. }) {
                self.push_arg(arg, pass);
            }
        }
        for (arg, pass) in args.iter().zip(&passes).rev() {
            if !matches!(pass, ArgPass::Stack { .. } | ArgPass::RefOnStack { .. }) {
                self.push_arg(arg, pass);
            }
        }
        for pass in &passes {
            match *pass {
                ArgPass::Gp(r) | ArgPass::RefInReg(r) => self.pop(ARG_GP64[r]),
                ArgPass::Fp(r) => self.popf(r),
                ArgPass::GpChunks { first, nregs } => {
                    for chunk in 0..nregs {
                        self.pop(ARG_GP64[first + chunk]);
                    }
                }
                ArgPass::Stack { .. } | ArgPass::RefOnStack { .. } => {}
            }
        }

        // Variadic callees read al as the number of vector registers.
        let variadic = matches!(
            self.types.kind(func_ty),
            TypeKind::Func { variadic: true, .. }
        );
        if variadic {
            self.emit(format!("mov al, {}", fp_count));
        }
        self.emit(format!("call {}", name));

        let cleanup = stack_slots + pad as usize;
        if cleanup > 0 {
            self.emit(format!("add rsp, {}", 8 * cleanup));
            self.depth -= cleanup;
        }

        // The ABI leaves garbage in the upper bits of sub-int returns.
        match self.types.kind(ret) {
            TypeKind::Bool => self.emit("movzx eax, al"),
            TypeKind::Char | TypeKind::Short => {
                let insn = if self.types.is_unsigned(ret) { "movzx" } else { "movsx" };
                let src = if self.types.size(ret) == 1 { "al" } else { "ax" };
                self.emit(format!("{} eax, {}", insn, src));
            }
            _ => {}
        }
    }

    /// Evaluate one argument and push its value (or chunks, or address)
    /// onto the operand stack.
    fn push_arg(&mut self, arg: &Expr, pass: &ArgPass) {
        match self.types.kind(arg.ty) {
            TypeKind::Struct(_) | TypeKind::Union(_) => {
                // A struct-valued expression evaluates to its address.
                let size = self.types.size(arg.ty);
                self.gen_expr(arg);
                match pass {
                    ArgPass::RefInReg(_) | ArgPass::RefOnStack { .. } => self.push(),
                    _ => {
                        // By value: 8-byte chunks, highest first, so the
                        // lowest chunk ends up nearest the stack top.
                        let chunks = size.div_ceil(8).max(1);
                        for chunk in (0..chunks).rev() {
                            self.emit(format!("push QWORD PTR [rax+{}]", 8 * chunk));
                            self.depth += 1;
                        }
                    }
                }
            }
            TypeKind::Float | TypeKind::Double => {
                self.gen_expr(arg);
                self.pushf();
            }
            _ => {
                self.gen_expr(arg);
                self.push();
            }
        }
    }

    // --- conversions -----------------------------------------------------

    /// Emit the conversion from `from` to `to`, both scalars. The
    /// instruction sequences form a fixed from/to matrix over the eight
    /// integer shapes and two floating widths.
    fn cast(&mut self, from: TypeId, to: TypeId) {
        if matches!(self.types.kind(to), TypeKind::Void) {
            return;
        }
        if matches!(self.types.kind(to), TypeKind::Bool) {
            self.cmp_zero(from);
            self.emit("setne al");
            self.emit("movzx eax, al");
            return;
        }
        let from = type_class(self.types, from);
        let to = type_class(self.types, to);
        let seq = CAST_TABLE[from as usize][to as usize];
        if !seq.is_empty() {
            for insn in seq.split('\n') {
                self.emit(insn);
            }
        }
    }
}

/// Register-shape classes for the cast matrix.
#[derive(Clone, Copy)]
enum TypeClass {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

fn type_class(types: &TypeArena, ty: TypeId) -> TypeClass {
    let unsigned = types.is_unsigned(ty);
    match types.kind(ty) {
        TypeKind::Bool => TypeClass::U8,
        TypeKind::Char => {
            if unsigned {
                TypeClass::U8
            } else {
                TypeClass::I8
            }
        }
        TypeKind::Short => {
            if unsigned {
                TypeClass::U16
            } else {
                TypeClass::I16
            }
        }
        TypeKind::Int | TypeKind::Enum { .. } => {
            if unsigned {
                TypeClass::U32
            } else {
                TypeClass::I32
            }
        }
        TypeKind::Float => TypeClass::F32,
        TypeKind::Double => TypeClass::F64,
        _ => {
            if unsigned {
                TypeClass::U64
            } else {
                TypeClass::I64
            }
        }
    }
}

// Conversion sequences; the value travels in rax/xmm0.
const I32I8: &str = "movsx eax, al";
const I32U8: &str = "movzx eax, al";
const I32I16: &str = "movsx eax, ax";
const I32U16: &str = "movzx eax, ax";
const I32I64: &str = "movsxd rax, eax";
const U32I64: &str = "mov eax, eax";
const I32F32: &str = "cvtsi2ss xmm0, eax";
const I32F64: &str = "cvtsi2sd xmm0, eax";
const U32F32: &str = "mov eax, eax\ncvtsi2ss xmm0, rax";
const U32F64: &str = "mov eax, eax\ncvtsi2sd xmm0, rax";
const I64F32: &str = "cvtsi2ss xmm0, rax";
const I64F64: &str = "cvtsi2sd xmm0, rax";
const F32I8: &str = "cvttss2si eax, xmm0\nmovsx eax, al";
const F32U8: &str = "cvttss2si eax, xmm0\nmovzx eax, al";
const F32I16: &str = "cvttss2si eax, xmm0\nmovsx eax, ax";
const F32U16: &str = "cvttss2si eax, xmm0\nmovzx eax, ax";
const F32I32: &str = "cvttss2si eax, xmm0";
const F32I64: &str = "cvttss2si rax, xmm0";
const F32F64: &str = "cvtss2sd xmm0, xmm0";
const F64I8: &str = "cvttsd2si eax, xmm0\nmovsx eax, al";
const F64U8: &str = "cvttsd2si eax, xmm0\nmovzx eax, al";
const F64I16: &str = "cvttsd2si eax, xmm0\nmovsx eax, ax";
const F64U16: &str = "cvttsd2si eax, xmm0\nmovzx eax, ax";
const F64I32: &str = "cvttsd2si eax, xmm0";
const F64I64: &str = "cvttsd2si rax, xmm0";
const F64F32: &str = "cvtsd2ss xmm0, xmm0";
const NOP: &str = "";

/// cast_table[from][to]; rows and columns in `TypeClass` order.
const CAST_TABLE: [[&str; 10]; 10] = [
    // from i8
    [NOP, NOP, NOP, I32I64, I32U8, NOP, NOP, I32I64, I32F32, I32F64],
    // from i16
    [I32I8, NOP, NOP, I32I64, I32U8, I32U16, NOP, I32I64, I32F32, I32F64],
    // from i32
    [I32I8, I32I16, NOP, I32I64, I32U8, I32U16, NOP, I32I64, I32F32, I32F64],
    // from i64
    [I32I8, I32I16, NOP, NOP, I32U8, I32U16, NOP, NOP, I64F32, I64F64],
    // from u8
    [I32I8, NOP, NOP, I32I64, NOP, NOP, NOP, I32I64, I32F32, I32F64],
    // from u16
    [I32I8, I32I16, NOP, I32I64, I32U8, NOP, NOP, I32I64, I32F32, I32F64],
    // from u32
    [I32I8, I32I16, NOP, U32I64, I32U8, I32U16, NOP, U32I64, U32F32, U32F64],
    // from u64
    [I32I8, I32I16, NOP, NOP, I32U8, I32U16, NOP, NOP, I64F32, I64F64],
    // from f32
    [F32I8, F32I16, F32I32, F32I64, F32U8, F32U16, F32I64, F32I64, NOP, F32F64],
    // from f64
    [F64I8, F64I16, F64I32, F64I64, F64U8, F64U16, F64I64, F64I64, F64F32, NOP],
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{lexer, parser};

    fn context_for(src: &str) -> Context {
        let tokens = lexer::lex(src).unwrap();
        let mut ctx = Context::new();
        parser::parse(&tokens, &mut ctx).unwrap();
        ctx
    }

    fn compile(src: &str) -> CodegenOutput {
        let mut ctx = context_for(src);
        generate(&mut ctx)
    }

    fn local_offsets(ctx: &Context) -> Vec<(String, i32, usize)> {
        let mut out = Vec::new();
        for (_, obj) in ctx.objects.iter() {
            if let ObjKind::Function {
                locals, stack_size, ..
            } = &obj.kind
            {
                for l in locals {
                    out.push((l.name.clone(), l.offset, *stack_size));
                }
            }
        }
        out
    }

    #[test]
    fn add_function_lowers_to_an_add() {
        let out = compile("int add(int a, int b) { return a + b; }");
        assert!(out.asm.contains(".globl add"));
        assert!(out.asm.contains("add:"));
        assert!(out.asm.contains("add eax, edi"));
        assert!(out.relocations.is_empty());
    }

    #[test]
    fn frame_layout_is_deterministic() {
        // The same local list must produce the same offsets and the same
        // 16-byte-rounded frame size every time.
        let src = "int f(int a) { int b; char c; long d; return 0; }";
        let mut ctx = context_for(src);
        assign_frame_layout(&ctx.types, &mut ctx.objects);
        let first = local_offsets(&ctx);
        assign_frame_layout(&ctx.types, &mut ctx.objects);
        let second = local_offsets(&ctx);
        assert_eq!(first, second);
        for (_, _, stack_size) in &first {
            assert_eq!(stack_size % 16, 0);
        }
    }

    #[test]
    fn frame_is_rounded_to_sixteen() {
        let out = compile("int f() { int a; return 0; }");
        assert!(out.asm.contains("sub rsp, 16"));
    }

    #[test]
    fn locals_are_aligned_to_their_types() {
        let mut ctx = context_for("int f() { char c; long l; return 0; }");
        assign_frame_layout(&ctx.types, &mut ctx.objects);
        for (name, offset, _) in local_offsets(&ctx) {
            if name == "l" {
                assert_eq!(offset.rem_euclid(8), 0, "long local misaligned: {}", offset);
            }
        }
    }

    #[test]
    fn labels_never_collide_across_functions() {
        // Two functions with identical source structure still get
        // distinct branch labels from the shared counter.
        let out = compile(
            "int f(int x) { if (x) return 1; return 0; }\n\
             int g(int x) { if (x) return 1; return 0; }",
        );
        let mut seen = std::collections::HashSet::new();
        for line in out.asm.lines() {
            let line = line.trim();
            if let Some(label) = line.strip_suffix(':') {
                if label.starts_with(".L") {
                    assert!(seen.insert(label.to_string()), "duplicate label {}", label);
                }
            }
        }
        assert!(seen.len() >= 4);
    }

    #[test]
    fn constant_global_emits_bytes() {
        let out = compile("int g = 3;");
        assert!(out.asm.contains(".globl g"));
        assert!(out.asm.contains("g:"));
        assert!(out.asm.contains(".byte 3"));
        assert!(out.relocations.is_empty());
    }

    #[test]
    fn uninitialized_global_is_zero_filled() {
        let out = compile("int z;");
        assert!(out.asm.contains(".bss"));
        assert!(out.asm.contains(".zero 4"));
    }

    #[test]
    fn address_initializer_emits_relocation_row() {
        let out = compile("int g; int *p = &g;");
        assert!(out.asm.contains(".quad g"));
        assert_eq!(
            out.relocations,
            vec![RelocationRow {
                symbol: "p".to_string(),
                offset: 0,
                target: "g".to_string(),
                addend: 0,
            }]
        );
    }

    #[test]
    fn relocation_addend_is_printed_and_reported() {
        let out = compile("int a[4]; int *p = a + 2;");
        assert!(out.asm.contains(".quad a+8"));
        assert_eq!(out.relocations[0].addend, 8);
    }

    #[test]
    fn static_globals_are_not_exported() {
        let out = compile("static int hidden = 1; int shown = 2;");
        assert!(!out.asm.contains(".globl hidden"));
        assert!(out.asm.contains(".globl shown"));
    }

    #[test]
    fn objects_emit_in_declaration_order() {
        let out = compile("int first; int second() { return 0; } int third;");
        let a = out.asm.find("first:").unwrap();
        let b = out.asm.find("second:").unwrap();
        let c = out.asm.find("third:").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn switch_lowers_to_a_comparison_chain() {
        let out = compile(
            "int f(int x) { switch (x) { case 1: return 10; case 2: return 20; default: return 0; } }",
        );
        assert!(out.asm.contains("cmp eax, 1"));
        assert!(out.asm.contains("cmp eax, 2"));
        // one je per case
        assert_eq!(out.asm.matches("je .L").count(), 2);
    }

    #[test]
    fn pointer_arithmetic_scales_by_element_size() {
        let out = compile("int f(int *p) { return *(p + 2); }");
        // the index 2 is multiplied by sizeof(int)
        assert!(out.asm.contains("mov rax, 4"));
        assert!(out.asm.contains("imul rax, rdi"));
    }

    #[test]
    fn string_literal_becomes_an_internal_object() {
        let out = compile("char *s = \"hi\";");
        assert!(out.asm.contains(".L.str.0:"));
        assert!(!out.asm.contains(".globl .L.str.0"));
        assert!(out.asm.contains(".quad .L.str.0"));
        assert_eq!(out.relocations[0].target, ".L.str.0");
    }

    #[test]
    fn float_arguments_use_xmm_registers() {
        let out = compile(
            "double hypot2(double a, double b) { return a * a + b * b; }",
        );
        assert!(out.asm.contains("movsd QWORD PTR [rbp-8], xmm0"));
        assert!(out.asm.contains("movsd QWORD PTR [rbp-16], xmm1"));
        assert!(out.asm.contains("mulsd xmm0, xmm1"));
    }

    #[test]
    fn small_struct_parameters_arrive_in_gp_registers() {
        let out = compile(
            "struct P { int x; int y; }; int get(struct P p) { return p.x; }",
        );
        // 8-byte struct: one GP register stored to the slot
        assert!(out.asm.contains("mov QWORD PTR [rbp-8], rdi"));
    }

    #[test]
    fn large_struct_parameters_are_copied_from_a_reference() {
        let out = compile(
            "struct B { long a; long b; long c; }; long get(struct B b) { return b.c; }",
        );
        // pointer arrives in rdi, bytes copied into the frame
        assert!(out.asm.contains("mov rax, rdi"));
        assert!(out.asm.contains("mov r10b, BYTE PTR [rax+0]"));
    }

    #[test]
    fn variadic_call_sets_vector_count() {
        let out = compile(
            "int printf(char *fmt, ...); int f() { return printf(\"%f\", 1.5); }",
        );
        assert!(out.asm.contains("mov al, 1"));
    }

    #[test]
    fn fall_through_shares_the_epilogue() {
        let out = compile("int f() { return 7; }");
        assert_eq!(out.asm.matches("ret").count(), 1);
        assert!(out.asm.contains("mov rsp, rbp"));
        assert!(out.asm.contains("pop rbp"));
    }

    #[test]
    fn emitted_assembly_is_intel_syntax() {
        let out = compile("int main() { return 0; }");
        assert!(out.asm.starts_with(".intel_syntax noprefix"));
    }
}
