//! Code generation: lower the parsed AST into NASM-style x86-64 assembly.
//!
//! The emitter is a single pass over the tree driven by a stack discipline:
//! every expression leaves exactly one 64-bit value on the machine stack,
//! and the same stack stores locals. A variable's `rsp`-relative offset
//! therefore moves as the expression stack grows and must be recomputed from
//! the virtual stack size at every reference, never cached at declaration.

use crate::error::{CompileError, CompileResult};
use crate::parser::{BinOp, Expr, IfPred, Program, Scope, Stmt, Term};
use crate::tokenizer::token_text;

/// Lower a whole program to assembly text.
pub fn generate(prog: &Program) -> CompileResult<String> {
  let mut codegen = Codegen::new();
  codegen.gen_prog(prog)?;
  Ok(codegen.output)
}

/// A declared local: its name and the stack word it lives in, counted from
/// the base of the frame at `_start`.
struct Var {
  name: String,
  stack_loc: usize,
}

/// Emitter state shared by every generation routine: the output buffer, the
/// virtual stack size, the variable table, the scope stack and the label
/// counter.
struct Codegen {
  output: String,
  stack_size: usize,
  vars: Vec<Var>,
  scopes: Vec<usize>,
  label_count: usize,
}

impl Codegen {
  fn new() -> Self {
    Self {
      output: String::new(),
      stack_size: 0,
      vars: Vec::new(),
      scopes: Vec::new(),
      label_count: 0,
    }
  }

  fn gen_prog(&mut self, prog: &Program) -> CompileResult<()> {
    self.output.push_str("global _start\n_start:\n");

    // The top level is itself a scope, so locals declared there are
    // released before the fall-through exit and the stack balances.
    self.begin_scope();
    for stmt in &prog.stmts {
      self.gen_stmt(stmt)?;
    }
    self.end_scope();

    // Fallback exit for programs that run off the end.
    self.emit("mov rax, 60");
    self.emit("mov rdi, 0");
    self.emit("syscall");

    self.output.push_str(PRINT_INT);
    Ok(())
  }

  fn gen_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::Exit(expr) => {
        self.gen_expr(expr)?;
        self.emit("mov rax, 60");
        self.pop("rdi");
        self.emit("syscall");
      }
      Stmt::Let { name, value } => {
        let ident = token_text(name);
        if self.declared_in_current_scope(ident) {
          return Err(CompileError::IdentAlreadyUsed {
            name: ident.to_string(),
          });
        }
        // Register the slot first: the value the initialiser leaves on the
        // stack becomes the variable's storage.
        self.vars.push(Var {
          name: ident.to_string(),
          stack_loc: self.stack_size,
        });
        self.gen_expr(value)?;
      }
      Stmt::Assign { name, value } => {
        let ident = token_text(name);
        let Some(stack_loc) = self.lookup(ident) else {
          return Err(CompileError::UndeclaredIdent {
            name: ident.to_string(),
          });
        };
        self.gen_expr(value)?;
        self.pop("rax");
        let Some(offset) = self.slot_offset(stack_loc) else {
          return Err(CompileError::UndeclaredIdent {
            name: ident.to_string(),
          });
        };
        self.emit(&format!("mov [rsp + {offset}], rax"));
      }
      Stmt::Scope(scope) => {
        self.emit(";; scope");
        self.gen_scope(scope)?;
        self.emit(";; /scope");
      }
      Stmt::If { cond, then, pred } => {
        self.gen_expr(cond)?;
        self.pop("rax");
        let label = self.create_label();
        self.emit("test rax, rax");
        self.emit(&format!("jz {label}"));
        self.gen_scope(then)?;
        match pred {
          Some(pred) => {
            let end_label = self.create_label();
            self.emit(&format!("jmp {end_label}"));
            self.write_label(&label);
            self.gen_if_pred(pred, &end_label)?;
            self.write_label(&end_label);
          }
          None => self.write_label(&label),
        }
      }
      Stmt::Print(expr) => {
        self.gen_expr(expr)?;
        self.pop("rdi");
        self.emit("call print_int");
      }
    }
    Ok(())
  }

  fn gen_if_pred(&mut self, pred: &IfPred, end_label: &str) -> CompileResult<()> {
    match pred {
      IfPred::Elif { cond, then, pred } => {
        self.emit(";; elif");
        self.gen_expr(cond)?;
        self.pop("rax");
        let label = self.create_label();
        self.emit("test rax, rax");
        self.emit(&format!("jz {label}"));
        self.gen_scope(then)?;
        self.emit(&format!("jmp {end_label}"));
        // The skip label is emitted even for the last clause so every jump
        // target in the chain is defined.
        self.write_label(&label);
        if let Some(pred) = pred {
          self.gen_if_pred(pred, end_label)?;
        }
      }
      IfPred::Else(scope) => {
        self.gen_scope(scope)?;
      }
    }
    Ok(())
  }

  fn gen_scope(&mut self, scope: &Scope) -> CompileResult<()> {
    self.begin_scope();
    for stmt in &scope.stmts {
      self.gen_stmt(stmt)?;
    }
    self.end_scope();
    Ok(())
  }

  fn gen_expr(&mut self, expr: &Expr) -> CompileResult<()> {
    match expr {
      Expr::Term(term) => self.gen_term(term),
      Expr::Bin { op, lhs, rhs } => self.gen_bin_expr(*op, lhs, rhs),
    }
  }

  /// Both operands are evaluated right-to-left so the left value ends up on
  /// top of the stack, then popped into `rax` (lhs) and `rbx` (rhs).
  fn gen_bin_expr(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> CompileResult<()> {
    self.gen_expr(rhs)?;
    self.gen_expr(lhs)?;
    self.pop("rax");
    self.pop("rbx");
    match op {
      BinOp::Add => self.emit("add rax, rbx"),
      BinOp::Sub => self.emit("sub rax, rbx"),
      BinOp::Mul => self.emit("imul rax, rbx"),
      BinOp::Div => {
        // Signed division: rdx must hold the sign extension of rax.
        self.emit("cqo");
        self.emit("idiv rbx");
      }
      BinOp::Gt => self.cmp_set("setg"),
      BinOp::Ge => self.cmp_set("setge"),
      BinOp::Lt => self.cmp_set("setl"),
      BinOp::Le => self.cmp_set("setle"),
      BinOp::EqEq => self.cmp_set("sete"),
    }
    self.push("rax");
    Ok(())
  }

  fn cmp_set(&mut self, set_instr: &str) {
    self.emit("cmp rax, rbx");
    self.emit(&format!("{set_instr} al"));
    self.emit("movzx rax, al");
  }

  fn gen_term(&mut self, term: &Term) -> CompileResult<()> {
    match term {
      Term::IntLit(token) => {
        self.emit(&format!("mov rax, {}", token_text(token)));
        self.push("rax");
      }
      Term::Ident(token) => {
        let name = token_text(token);
        let offset = self
          .lookup(name)
          .and_then(|stack_loc| self.slot_offset(stack_loc))
          .ok_or_else(|| CompileError::UndeclaredIdent {
            name: name.to_string(),
          })?;
        self.push(&format!("QWORD [rsp + {offset}]"));
      }
      Term::Paren(expr) => self.gen_expr(expr)?,
      Term::Neg(term) => {
        self.gen_term(term)?;
        self.pop("rax");
        self.emit("neg rax");
        self.push("rax");
      }
    }
    Ok(())
  }

  // ----- Emission helpers -----

  fn emit(&mut self, instr: &str) {
    self.output.push_str("    ");
    self.output.push_str(instr);
    self.output.push('\n');
  }

  fn write_label(&mut self, label: &str) {
    self.output.push_str(label);
    self.output.push_str(":\n");
  }

  /// Every `push` the emitter writes goes through here so the virtual stack
  /// size stays in lock-step with the emitted code.
  fn push(&mut self, operand: &str) {
    self.emit(&format!("push {operand}"));
    self.stack_size += 1;
  }

  fn pop(&mut self, reg: &str) {
    self.emit(&format!("pop {reg}"));
    self.stack_size -= 1;
  }

  /// Byte offset of a live slot from the current `rsp`. `None` when the slot
  /// is not below the stack top, which only happens when an initialiser
  /// refers to the variable it is initialising.
  fn slot_offset(&self, stack_loc: usize) -> Option<usize> {
    self
      .stack_size
      .checked_sub(stack_loc + 1)
      .map(|words| words * 8)
  }

  fn begin_scope(&mut self) {
    self.scopes.push(self.vars.len());
  }

  /// Release the locals the scope introduced with a single stack adjustment.
  fn end_scope(&mut self) {
    let base = self.scopes.pop().unwrap_or(0);
    let pop_count = self.vars.len() - base;
    self.emit(&format!("add rsp, {}", pop_count * 8));
    self.stack_size -= pop_count;
    self.vars.truncate(base);
  }

  fn create_label(&mut self) -> String {
    let label = format!("label{}", self.label_count);
    self.label_count += 1;
    label
  }

  /// Innermost declaration wins: scan from the back so an inner shadow hides
  /// the outer entry until its scope exits.
  fn lookup(&self, name: &str) -> Option<usize> {
    self
      .vars
      .iter()
      .rev()
      .find(|var| var.name == name)
      .map(|var| var.stack_loc)
  }

  fn declared_in_current_scope(&self, name: &str) -> bool {
    let base = self.scopes.last().copied().unwrap_or(0);
    self.vars[base..].iter().any(|var| var.name == name)
  }
}

/// Runtime print routine appended to every program: prints `rdi` in base 10
/// with an optional leading `-` and a trailing newline via `write` syscalls,
/// using a 32-byte conversion buffer filled backward.
const PRINT_INT: &str = "\
print_int:
    push rbp
    mov rbp, rsp
    sub rsp, 32
    test rdi, rdi
    jns .positive
    mov byte [rsp], '-'
    mov rax, 1
    mov rsi, rsp
    mov rdx, 1
    push rdi
    mov rdi, 1
    syscall
    pop rdi
    neg rdi
.positive:
    test rdi, rdi
    jnz .non_zero
    mov byte [rsp], '0'
    mov rsi, rsp
    mov rcx, 1
    jmp .print
.non_zero:
    mov rax, rdi
    lea rsi, [rsp + 31]
    mov rcx, 0
.convert_loop:
    xor rdx, rdx
    mov r10, 10
    div r10
    add dl, '0'
    dec rsi
    mov [rsi], dl
    inc rcx
    test rax, rax
    jnz .convert_loop
.print:
    mov rax, 1
    mov rdi, 1
    mov rdx, rcx
    syscall
    mov byte [rsp], 10
    mov rax, 1
    mov rdi, 1
    mov rsi, rsp
    mov rdx, 1
    syscall
    mov rsp, rbp
    pop rbp
    ret
";

#[cfg(test)]
mod test {
  use super::*;
  use crate::parser::parse;
  use crate::tokenizer::tokenize;

  fn gen_source(source: &str) -> String {
    generate(&parse(tokenize(source).unwrap()).unwrap()).unwrap()
  }

  fn gen_err(source: &str) -> CompileError {
    generate(&parse(tokenize(source).unwrap()).unwrap()).unwrap_err()
  }

  /// The program body: everything before the inlined print routine.
  fn body(asm: &str) -> &str {
    asm.split("print_int:").next().unwrap_or(asm)
  }

  /// Net words pushed across the program body. Zero for every valid program:
  /// each push is matched by a pop or a scope-exit `add rsp`.
  fn stack_words(asm: &str) -> i64 {
    let mut words = 0;
    for line in body(asm).lines() {
      let line = line.trim();
      if line.starts_with("push ") {
        words += 1;
      } else if line.starts_with("pop ") {
        words -= 1;
      } else if let Some(bytes) = line.strip_prefix("add rsp, ") {
        words -= bytes.parse::<i64>().unwrap() / 8;
      }
    }
    words
  }

  fn assert_labels_defined_once(asm: &str) {
    let body = body(asm);
    let referenced: Vec<&str> = body
      .lines()
      .filter_map(|line| {
        let line = line.trim();
        line.strip_prefix("jz ").or_else(|| line.strip_prefix("jmp "))
      })
      .collect();
    assert!(!referenced.is_empty());
    for label in referenced {
      let definitions = body
        .lines()
        .filter(|line| line.trim() == format!("{label}:"))
        .count();
      assert_eq!(definitions, 1, "label {label} must be defined exactly once");
    }
  }

  #[test]
  fn exit_emits_exit_syscall() {
    let asm = gen_source("exit(0);");
    assert!(asm.starts_with(
      "global _start\n\
       _start:\n    \
       mov rax, 0\n    \
       push rax\n    \
       mov rax, 60\n    \
       pop rdi\n    \
       syscall\n"
    ));
  }

  #[test]
  fn program_falls_through_to_default_exit() {
    let asm = gen_source("print(1);");
    assert!(body(&asm).ends_with(
      "    mov rax, 60\n    \
       mov rdi, 0\n    \
       syscall\n"
    ));
    assert_eq!(asm.matches("print_int:").count(), 1);
  }

  #[test]
  fn binary_ops_evaluate_rhs_first() {
    let asm = gen_source("exit(1 - 2);");
    assert!(asm.contains(
      "    mov rax, 2\n    \
       push rax\n    \
       mov rax, 1\n    \
       push rax\n    \
       pop rax\n    \
       pop rbx\n    \
       sub rax, rbx\n    \
       push rax\n"
    ));
  }

  #[test]
  fn comparison_lowers_to_setcc() {
    let asm = gen_source("exit(1 < 2);");
    assert!(asm.contains(
      "    cmp rax, rbx\n    \
       setl al\n    \
       movzx rax, al\n"
    ));
  }

  #[test]
  fn division_sign_extends() {
    let asm = gen_source("exit(8 / 2);");
    assert!(asm.contains("    cqo\n    idiv rbx\n"));
  }

  #[test]
  fn unary_negation_lowers_to_neg() {
    let asm = gen_source("exit(-(3));");
    assert!(asm.contains("    neg rax\n"));
  }

  #[test]
  fn identifier_offset_tracks_the_expression_stack() {
    // With the literal 1 already pushed, x's slot sits one word down.
    let asm = gen_source("let x = 2; exit(x + 1);");
    assert!(asm.contains("push QWORD [rsp + 8]"));
  }

  #[test]
  fn let_reference_reads_its_slot() {
    let asm = gen_source("let x = 5; exit(x);");
    assert!(asm.contains("push QWORD [rsp + 0]"));
  }

  #[test]
  fn assignment_writes_back_to_the_slot() {
    let asm = gen_source("let x = 1; x = 2; exit(x);");
    assert!(asm.contains("    mov [rsp + 0], rax\n"));
  }

  #[test]
  fn scopes_are_marked_and_release_their_locals() {
    let asm = gen_source("let a = 10; { let a = 1; } exit(a);");
    assert!(asm.contains("    ;; scope\n"));
    assert!(asm.contains("    ;; /scope\n"));
    assert!(asm.contains("    add rsp, 8\n"));
    // The outer `a` is visible again after the inner scope exits.
    assert!(asm.contains("push QWORD [rsp + 0]"));
  }

  #[test]
  fn shadowing_is_per_scope() {
    let err = gen_err("let x = 1; let x = 2;");
    assert_eq!(err.to_string(), "Identifier already used: x");

    let err = gen_err("let x = 1; { let y = 2; let y = 3; }");
    assert_eq!(err.to_string(), "Identifier already used: y");

    // An inner scope may shadow, and the name is free again afterwards.
    gen_source("let x = 1; { let x = 2; } { let x = 3; } exit(x);");
  }

  #[test]
  fn undeclared_identifiers_are_rejected() {
    let err = gen_err("exit(y);");
    assert_eq!(err.to_string(), "Undeclared identifier: y");

    let err = gen_err("y = 1;");
    assert_eq!(err.to_string(), "Undeclared identifier: y");

    // A scope's locals are dead once it exits.
    let err = gen_err("{ let x = 1; } exit(x);");
    assert_eq!(err.to_string(), "Undeclared identifier: x");
  }

  #[test]
  fn initialiser_cannot_read_its_own_slot() {
    let err = gen_err("let x = x;");
    assert_eq!(err.to_string(), "Undeclared identifier: x");
  }

  #[test]
  fn if_without_predicate_skips_over_the_scope() {
    let asm = gen_source("let x = 1; if (x) { exit(1); }");
    assert!(asm.contains("    test rax, rax\n    jz label0\n"));
    assert_labels_defined_once(&asm);
  }

  #[test]
  fn if_elif_else_shares_one_end_label() {
    let asm = gen_source(
      "let x = 1; if (x == 2) { exit(2); } elif (x == 1) { exit(1); } else { exit(0); }",
    );
    assert!(asm.contains("    ;; elif\n"));
    // Both taken branches jump to the shared end label.
    assert_eq!(asm.matches("jmp label1").count(), 2);
    assert_labels_defined_once(&asm);
  }

  #[test]
  fn trailing_elif_still_defines_its_skip_label() {
    let asm = gen_source("if (1) { print(1); } elif (2) { print(2); }");
    assert_labels_defined_once(&asm);
  }

  #[test]
  fn print_hands_the_value_to_the_runtime() {
    let asm = gen_source("print(3);");
    assert!(asm.contains("    pop rdi\n    call print_int\n"));
  }

  #[test]
  fn virtual_stack_balances_for_valid_programs() {
    let sources = [
      "exit(0);",
      "let x = 2; let y = 3; exit(x + y * 4);",
      "let a = 10; { let a = 1; } exit(a);",
      "let x = 5; if (x > 3) { print(1); } else { print(0); } exit(0);",
      "let n = -7; print(n); exit(0);",
      "let x = 1; if (x == 2) { exit(2); } elif (x == 1) { exit(1); } else { exit(0); }",
      "{ { let a = 1; let b = a; { print(b); } } }",
    ];
    for source in sources {
      assert_eq!(stack_words(&gen_source(source)), 0, "unbalanced: {source}");
    }
  }
}
