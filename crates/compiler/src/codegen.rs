//! AST → bytecode.
//!
//! Invariant maintained throughout: after compiling a statement the stack is
//! back at its pre-statement height (except the retained final top-level
//! expression statement); after compiling an expression, exactly one value
//! has been added to the stack.
//!
//! Forward jumps (`if`/`while`/`for`/`break`/`continue`) are emitted with a
//! placeholder address and backpatched once the target is known (see
//! [`CodeGen::patch`]).

use crate::ast::*;
use crate::error::CompileError;
use crate::symbol_table::SymbolTable;
use crate::token::Span;
use stepc_core::{Instruction, Opcode, Operand, Value};

/// Where a loop's `continue` should jump. `while` knows its target the
/// moment the loop header is compiled; `for` only knows it once the
/// increment block has been emitted after the body, so its continues start
/// out as pending patches.
enum ContinueTarget {
    Known(usize),
    Pending(Vec<usize>),
}

struct LoopContext {
    break_jumps: Vec<usize>,
    continue_target: ContinueTarget,
}

pub struct CodeGen {
    instructions: Vec<Instruction>,
    symbols: SymbolTable,
    loops: Vec<LoopContext>,
}

fn stmt_kind(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Expr(_) => "expr",
        Stmt::Block(_) => "block",
        Stmt::Empty => "empty",
        Stmt::VarDecl(_) => "var_decl",
        Stmt::If { .. } => "if",
        Stmt::While { .. } => "while",
        Stmt::For { .. } => "for",
        Stmt::Break(_) => "break",
        Stmt::Continue(_) => "continue",
    }
}

impl CodeGen {
    fn new() -> Self {
        CodeGen {
            instructions: Vec::new(),
            symbols: SymbolTable::new(),
            loops: Vec::new(),
        }
    }

    /// Compile a whole program to bytecode. Resets all compile-time state,
    /// so multiple calls never interfere with each other.
    pub fn generate(program: &Program) -> Result<Vec<Instruction>, CompileError> {
        let mut cg = CodeGen::new();
        cg.compile_program(program)?;
        Ok(cg.instructions)
    }

    // -- emission helpers -----------------------------------------------------

    fn emit(&mut self, op: Opcode, operand: Operand) -> usize {
        self.instructions.push(Instruction::new(op, operand));
        self.instructions.len() - 1
    }

    fn emit_simple(&mut self, op: Opcode) -> usize {
        self.emit(op, Operand::None)
    }

    fn here(&self) -> usize {
        self.instructions.len()
    }

    fn patch(&mut self, idx: usize, target: usize) {
        self.instructions[idx].operand = Operand::Addr(target);
    }

    fn resolve(&self, name: &str, span: Span) -> Result<usize, CompileError> {
        self.symbols
            .resolve(name)
            .ok_or_else(|| CompileError::new(format!("unresolved identifier '{name}'"), span))
    }

    fn binary_opcode(op: BinaryOp) -> Opcode {
        match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Percent => Opcode::Percent,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Neq => Opcode::Neq,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Lte => Opcode::Lte,
            BinaryOp::Gte => Opcode::Gte,
            BinaryOp::And | BinaryOp::Or => {
                unreachable!("short-circuit operators are lowered separately")
            }
        }
    }

    fn literal_value(lit: Literal) -> Value {
        match lit {
            Literal::Integer(n) => Value::Integer(n),
            Literal::Double(d) => Value::Double(d),
            Literal::Boolean(b) => Value::Boolean(b),
        }
    }

    // -- statements -------------------------------------------------------------

    /// Compile every statement. The final statement, if it is a bare
    /// expression statement, keeps its value on the stack instead of
    /// popping it: a convenience for REPL-style usage so the VM's result
    /// is the program's last expression.
    fn compile_program(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for (i, stmt) in stmts.iter().enumerate() {
            if i == stmts.len() - 1 {
                if let Stmt::Expr(expr) = stmt {
                    self.compile_expr(expr)?;
                    continue;
                }
            }
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        tracing::debug!(kind = stmt_kind(stmt), ip = self.here(), "compiling statement");
        match stmt {
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit_simple(Opcode::Pop);
            }
            Stmt::Block(stmts) => {
                self.symbols.enter_scope();
                for s in stmts {
                    self.compile_stmt(s)?;
                }
                let n = self.symbols.exit_scope();
                if n > 0 {
                    self.emit(Opcode::PopN, Operand::Count(n));
                }
            }
            Stmt::Empty => {}
            Stmt::VarDecl(decl) => self.compile_var_decl(decl)?,
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.compile_if(cond, then_branch, else_branch.as_deref())?,
            Stmt::While { cond, body } => self.compile_while(cond, body)?,
            Stmt::For {
                init,
                cond,
                increment,
                body,
            } => self.compile_for(init.as_ref(), cond.as_ref(), increment.as_ref(), body)?,
            Stmt::Break(span) => {
                if self.loops.is_empty() {
                    return Err(CompileError::new("'break' outside of any loop", *span));
                }
                let idx = self.emit(Opcode::Jump, Operand::Addr(0));
                self.loops.last_mut().unwrap().break_jumps.push(idx);
            }
            Stmt::Continue(span) => {
                if self.loops.is_empty() {
                    return Err(CompileError::new("'continue' outside of any loop", *span));
                }
                let known = match &self.loops.last().unwrap().continue_target {
                    ContinueTarget::Known(addr) => Some(*addr),
                    ContinueTarget::Pending(_) => None,
                };
                match known {
                    Some(addr) => {
                        self.emit(Opcode::Jump, Operand::Addr(addr));
                    }
                    None => {
                        let idx = self.emit(Opcode::Jump, Operand::Addr(0));
                        match &mut self.loops.last_mut().unwrap().continue_target {
                            ContinueTarget::Pending(v) => v.push(idx),
                            ContinueTarget::Known(_) => unreachable!(),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), CompileError> {
        self.compile_expr(cond)?;
        let then_jump = self.emit(Opcode::JumpIfFalse, Operand::Addr(0));
        self.compile_stmt(then_branch)?;
        if let Some(else_branch) = else_branch {
            let else_jump = self.emit(Opcode::Jump, Operand::Addr(0));
            self.patch(then_jump, self.here());
            self.compile_stmt(else_branch)?;
            self.patch(else_jump, self.here());
        } else {
            self.patch(then_jump, self.here());
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &Stmt) -> Result<(), CompileError> {
        let loop_start = self.here();
        self.loops.push(LoopContext {
            break_jumps: Vec::new(),
            continue_target: ContinueTarget::Known(loop_start),
        });
        self.compile_expr(cond)?;
        let exit_jump = self.emit(Opcode::JumpIfFalse, Operand::Addr(0));
        self.compile_stmt(body)?;
        self.emit(Opcode::Jump, Operand::Addr(loop_start));
        self.patch(exit_jump, self.here());
        let ctx = self.loops.pop().unwrap();
        let end = self.here();
        for b in ctx.break_jumps {
            self.patch(b, end);
        }
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&ForInit>,
        cond: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        self.symbols.enter_scope();

        if let Some(init) = init {
            match init {
                ForInit::VarDecl(decl) => self.compile_var_decl(decl)?,
                ForInit::Expr(expr) => {
                    self.compile_expr(expr)?;
                    self.emit_simple(Opcode::Pop);
                }
            }
        }

        let loop_start = self.here();
        let exit_jump = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.emit(Opcode::JumpIfFalse, Operand::Addr(0)))
            }
            None => None,
        };

        self.loops.push(LoopContext {
            break_jumps: Vec::new(),
            continue_target: ContinueTarget::Pending(Vec::new()),
        });

        self.compile_stmt(body)?;

        let increment_start = self.here();
        let ctx = self.loops.last_mut().unwrap();
        let continue_jumps = match &mut ctx.continue_target {
            ContinueTarget::Pending(v) => std::mem::take(v),
            ContinueTarget::Known(_) => unreachable!(),
        };
        for c in continue_jumps {
            self.patch(c, increment_start);
        }

        if let Some(increment) = increment {
            self.compile_expr(increment)?;
            self.emit_simple(Opcode::Pop);
        }
        self.emit(Opcode::Jump, Operand::Addr(loop_start));

        if let Some(ej) = exit_jump {
            self.patch(ej, self.here());
        }

        let ctx = self.loops.pop().unwrap();
        let end = self.here();
        for b in ctx.break_jumps {
            self.patch(b, end);
        }

        let n = self.symbols.exit_scope();
        if n > 0 {
            self.emit(Opcode::PopN, Operand::Count(n));
        }
        Ok(())
    }

    fn compile_var_decl(&mut self, decl: &VarDecl) -> Result<(), CompileError> {
        for declarator in &decl.declarators {
            if declarator.is_array() {
                self.compile_array_declarator(decl, declarator)?;
            } else {
                match &declarator.initializer {
                    Some(Initializer::Expr(e)) => self.compile_expr(e)?,
                    None => {
                        self.emit(Opcode::Push, Operand::Value(Value::Uninitialized));
                    }
                    Some(Initializer::List(_)) => {
                        unreachable!("parser rejects initializer lists on non-array declarators")
                    }
                }
                self.symbols.define(&declarator.name, declarator.name_span)?;
            }
        }
        Ok(())
    }

    fn compile_array_declarator(
        &mut self,
        decl: &VarDecl,
        declarator: &Declarator,
    ) -> Result<(), CompileError> {
        let list_len = match &declarator.initializer {
            Some(Initializer::List(items)) => Some(items.len()),
            _ => None,
        };

        match &declarator.size {
            ArraySize::Explicit(size_expr) => {
                if let (Expr::Literal { value: Literal::Integer(n), .. }, Some(len)) =
                    (size_expr, list_len)
                {
                    if len > *n as usize {
                        return Err(CompileError::new(
                            format!(
                                "initializer list length {len} exceeds array size {n}"
                            ),
                            declarator.name_span,
                        ));
                    }
                }
                self.compile_expr(size_expr)?;
            }
            ArraySize::Implicit => {
                let len = list_len.expect("parser guarantees implicit-size arrays carry a list");
                self.emit(Opcode::Push, Operand::Value(Value::Integer(len as i64)));
            }
            ArraySize::Scalar => unreachable!("is_array() already excluded this"),
        }

        self.emit(
            Opcode::AllocArr,
            Operand::ElemKind(decl.type_keyword.element_kind()),
        );
        self.symbols.define(&declarator.name, declarator.name_span)?;

        if let Some(Initializer::List(items)) = &declarator.initializer {
            for (i, elem) in items.iter().enumerate() {
                self.emit_simple(Opcode::Dup);
                self.emit(Opcode::Push, Operand::Value(Value::Integer(i as i64)));
                self.compile_expr(elem)?;
                self.emit_simple(Opcode::StoreIdx);
                self.emit_simple(Opcode::Pop);
            }
        }
        Ok(())
    }

    // -- expressions --------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal { value, .. } => {
                self.emit(Opcode::Push, Operand::Value(Self::literal_value(*value)));
            }
            Expr::Identifier { name, span } => {
                let slot = self.resolve(name, *span)?;
                self.emit(Opcode::Load, Operand::Slot(slot));
            }
            Expr::Unary { op, expr, .. } => {
                self.compile_expr(expr)?;
                match op {
                    UnaryOp::Negate => self.emit_simple(Opcode::Negate),
                    UnaryOp::Not => self.emit_simple(Opcode::Not),
                };
            }
            Expr::Binary {
                left,
                op: BinaryOp::And,
                right,
                ..
            } => self.compile_short_circuit(left, right, true)?,
            Expr::Binary {
                left,
                op: BinaryOp::Or,
                right,
                ..
            } => self.compile_short_circuit(left, right, false)?,
            Expr::Binary { left, op, right, .. } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit_simple(Self::binary_opcode(*op));
            }
            Expr::Assign { target, op, value, .. } => self.compile_assign(target, *op, value)?,
            Expr::Update { op, target, prefix, .. } => self.compile_update(*op, target, *prefix)?,
            Expr::Subscript { object, index, .. } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit_simple(Opcode::LoadIdx);
            }
            Expr::InitList { .. } => {
                unreachable!("initializer lists only appear as declarator initializers")
            }
        }
        Ok(())
    }

    fn compile_short_circuit(
        &mut self,
        left: &Expr,
        right: &Expr,
        is_and: bool,
    ) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        let end_jump = if is_and {
            self.emit(Opcode::JumpIfFalsePeek, Operand::Addr(0))
        } else {
            self.emit(Opcode::JumpIfTruePeek, Operand::Addr(0))
        };
        self.emit_simple(Opcode::Pop);
        self.compile_expr(right)?;
        self.patch(end_jump, self.here());
        Ok(())
    }

    fn compile_assign(
        &mut self,
        target: &Expr,
        op: AssignOp,
        value: &Expr,
    ) -> Result<(), CompileError> {
        match target {
            Expr::Identifier { name, span } => {
                let slot = self.resolve(name, *span)?;
                match op.binary_op() {
                    None => {
                        self.compile_expr(value)?;
                        self.emit(Opcode::Store, Operand::Slot(slot));
                    }
                    Some(bin) => {
                        self.emit(Opcode::Load, Operand::Slot(slot));
                        self.compile_expr(value)?;
                        self.emit_simple(Self::binary_opcode(bin));
                        self.emit(Opcode::Store, Operand::Slot(slot));
                    }
                }
            }
            Expr::Subscript { object, index, .. } => match op.binary_op() {
                None => {
                    self.compile_expr(object)?;
                    self.compile_expr(index)?;
                    self.compile_expr(value)?;
                    self.emit_simple(Opcode::StoreIdx);
                }
                Some(bin) => {
                    // Address to write, staged first...
                    self.compile_expr(object)?;
                    self.compile_expr(index)?;
                    // ...and a second evaluation of (object, index) to read
                    // the current value through. The VM never needs to know
                    // about lvalues; this duplication is the price of that.
                    self.compile_expr(object)?;
                    self.compile_expr(index)?;
                    self.emit_simple(Opcode::LoadIdx);
                    self.compile_expr(value)?;
                    self.emit_simple(Self::binary_opcode(bin));
                    self.emit_simple(Opcode::StoreIdx);
                }
            },
            _ => unreachable!("parser guarantees assignment targets are lvalues"),
        }
        Ok(())
    }

    fn compile_update(
        &mut self,
        op: UpdateOp,
        target: &Expr,
        prefix: bool,
    ) -> Result<(), CompileError> {
        let bin = match op {
            UpdateOp::Increment => Opcode::Add,
            UpdateOp::Decrement => Opcode::Sub,
        };
        let inverse = match op {
            UpdateOp::Increment => Opcode::Sub,
            UpdateOp::Decrement => Opcode::Add,
        };

        match target {
            Expr::Identifier { name, span } => {
                let slot = self.resolve(name, *span)?;
                if prefix {
                    self.emit(Opcode::Load, Operand::Slot(slot));
                    self.emit(Opcode::Push, Operand::Value(Value::Integer(1)));
                    self.emit_simple(bin);
                    self.emit(Opcode::Store, Operand::Slot(slot));
                } else {
                    self.emit(Opcode::Load, Operand::Slot(slot)); // pre-update value (the result)
                    self.emit_simple(Opcode::Dup);
                    self.emit(Opcode::Push, Operand::Value(Value::Integer(1)));
                    self.emit_simple(bin);
                    self.emit(Opcode::Store, Operand::Slot(slot));
                    self.emit_simple(Opcode::Pop); // discard the new value; pre-update value remains
                }
            }
            Expr::Subscript { object, index, .. } => {
                // Address to write, then a second evaluation to read the
                // current value through `load_idx`: exactly two copies of
                // (object, index), matching the identifier case's two
                // accesses of the slot.
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit_simple(Opcode::LoadIdx);
                self.emit(Opcode::Push, Operand::Value(Value::Integer(1)));
                self.emit_simple(bin);
                self.emit_simple(Opcode::StoreIdx); // leaves the new value on top
                if !prefix {
                    // Recover the pre-update value algebraically instead of
                    // re-reading the heap: old = new - delta. Avoids needing
                    // a third (object, index) evaluation or a stack-rotate
                    // opcode the ISA doesn't have.
                    self.emit(Opcode::Push, Operand::Value(Value::Integer(1)));
                    self.emit_simple(inverse);
                }
            }
            _ => unreachable!("parser guarantees update targets are lvalues"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile(src: &str) -> Vec<Instruction> {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        CodeGen::generate(&program).unwrap()
    }

    fn compile_err(src: &str) -> CompileError {
        let tokens = Lexer::new(src).tokenize().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        CodeGen::generate(&program).unwrap_err()
    }

    #[test]
    fn final_expression_statement_keeps_its_value() {
        let code = compile("1 + 2;");
        assert_eq!(code.last().unwrap().op, Opcode::Add);
    }

    #[test]
    fn non_final_expression_statement_pops() {
        let code = compile("1 + 2; 3;");
        // The first statement's Add is followed by a Pop before the second
        // statement's Push.
        let add_idx = code.iter().position(|i| i.op == Opcode::Add).unwrap();
        assert_eq!(code[add_idx + 1].op, Opcode::Pop);
    }

    #[test]
    fn break_outside_loop_is_a_compile_error() {
        let err = compile_err("break;");
        assert!(err.message.contains("'break'"));
    }

    #[test]
    fn continue_outside_loop_is_a_compile_error() {
        let err = compile_err("continue;");
        assert!(err.message.contains("'continue'"));
    }

    #[test]
    fn unresolved_identifier_is_a_compile_error() {
        let err = compile_err("x;");
        assert!(err.message.contains("unresolved"));
    }

    #[test]
    fn initializer_list_overflow_is_a_compile_error() {
        let err = compile_err("int a[2] = {1, 2, 3};");
        assert!(err.message.contains("exceeds array size"));
    }

    #[test]
    fn shadowing_reuses_slot_zero_after_block_exit() {
        let code = compile("int x = 1; { int x = 2; } x;");
        // Both declarations load/store slot 0: the inner one is popped by
        // the block's pop_n before the outer is read again.
        assert!(code.iter().any(|i| i.op == Opcode::PopN));
    }

    #[test]
    fn block_with_no_locals_emits_no_pop_n() {
        let code = compile("{ 1; }");
        assert!(!code.iter().any(|i| i.op == Opcode::PopN));
    }
}
