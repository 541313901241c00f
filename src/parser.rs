//! Recursive-descent parser producing the statement and expression AST.
//!
//! Statements are dispatched on a fixed lookahead of at most three tokens so
//! `let x = …` declarations, `x = …` assignments and the keyword statements
//! never backtrack. All infix operators go through a single
//! precedence-climbing routine, so the operator table lives in one place;
//! unary minus binds tighter than any infix operator because it is only
//! produced inside `parse_term`.

use crate::error::{CompileError, CompileResult};
use crate::tokenizer::{Token, TokenKind};

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Gt,
  Ge,
  Lt,
  Le,
  EqEq,
}

impl BinOp {
  fn from_kind(kind: TokenKind) -> Option<Self> {
    match kind {
      TokenKind::Plus => Some(BinOp::Add),
      TokenKind::Minus => Some(BinOp::Sub),
      TokenKind::Star => Some(BinOp::Mul),
      TokenKind::Slash => Some(BinOp::Div),
      TokenKind::Gt => Some(BinOp::Gt),
      TokenKind::Ge => Some(BinOp::Ge),
      TokenKind::Lt => Some(BinOp::Lt),
      TokenKind::Le => Some(BinOp::Le),
      TokenKind::EqEq => Some(BinOp::EqEq),
      _ => None,
    }
  }
}

/// Atomic expression: the operand level below every infix operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
  IntLit(Token),
  Ident(Token),
  Paren(Box<Expr>),
  Neg(Box<Term>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Term(Term),
  Bin {
    op: BinOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
  Exit(Expr),
  Let { name: Token, value: Expr },
  Assign { name: Token, value: Expr },
  Scope(Scope),
  If {
    cond: Expr,
    then: Scope,
    pred: Option<IfPred>,
  },
  Print(Expr),
}

/// Brace-delimited statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
  pub stmts: Vec<Stmt>,
}

/// Continuation of an `if`: an `elif` chain or a final `else`.
#[derive(Debug, Clone, PartialEq)]
pub enum IfPred {
  Elif {
    cond: Expr,
    then: Scope,
    pred: Option<Box<IfPred>>,
  },
  Else(Scope),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  pub stmts: Vec<Stmt>,
}

/// Parse the token stream into a program.
pub fn parse(tokens: Vec<Token>) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens);
  let mut stmts = Vec::new();

  while stream.peek().is_some() {
    match parse_stmt(&mut stream)? {
      Some(stmt) => stmts.push(stmt),
      None => return Err(stream.expected("statement")),
    }
  }

  Ok(Program { stmts })
}

// ----- Statement parsing -----

/// Parse one statement, or `None` when the lookahead cannot start one
/// (which terminates the containing statement list).
fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Option<Stmt>> {
  if stream.peek_kind(0) == Some(TokenKind::Exit)
    && stream.peek_kind(1) == Some(TokenKind::OpenParen)
  {
    stream.advance();
    stream.advance();
    let expr = require_expr(stream)?;
    stream.expect(TokenKind::CloseParen)?;
    stream.expect(TokenKind::Semi)?;
    return Ok(Some(Stmt::Exit(expr)));
  }

  if stream.peek_kind(0) == Some(TokenKind::Let)
    && stream.peek_kind(1) == Some(TokenKind::Ident)
    && stream.peek_kind(2) == Some(TokenKind::Eq)
  {
    stream.advance();
    let name = stream.expect(TokenKind::Ident)?;
    stream.expect(TokenKind::Eq)?;
    let value = require_expr(stream)?;
    stream.expect(TokenKind::Semi)?;
    return Ok(Some(Stmt::Let { name, value }));
  }

  if stream.peek_kind(0) == Some(TokenKind::Ident) && stream.peek_kind(1) == Some(TokenKind::Eq) {
    let name = stream.expect(TokenKind::Ident)?;
    stream.expect(TokenKind::Eq)?;
    let value = require_expr(stream)?;
    stream.expect(TokenKind::Semi)?;
    return Ok(Some(Stmt::Assign { name, value }));
  }

  if stream.peek_kind(0) == Some(TokenKind::OpenCurly) {
    let scope = require_scope(stream)?;
    return Ok(Some(Stmt::Scope(scope)));
  }

  if stream.try_consume(TokenKind::If).is_some() {
    stream.expect(TokenKind::OpenParen)?;
    let cond = require_expr(stream)?;
    stream.expect(TokenKind::CloseParen)?;
    let then = require_scope(stream)?;
    let pred = parse_if_pred(stream)?;
    return Ok(Some(Stmt::If { cond, then, pred }));
  }

  if stream.peek_kind(0) == Some(TokenKind::Print)
    && stream.peek_kind(1) == Some(TokenKind::OpenParen)
  {
    stream.advance();
    stream.advance();
    let expr = require_expr(stream)?;
    stream.expect(TokenKind::CloseParen)?;
    stream.expect(TokenKind::Semi)?;
    return Ok(Some(Stmt::Print(expr)));
  }

  Ok(None)
}

fn parse_scope(stream: &mut TokenStream) -> CompileResult<Option<Scope>> {
  if stream.try_consume(TokenKind::OpenCurly).is_none() {
    return Ok(None);
  }

  let mut stmts = Vec::new();
  while let Some(stmt) = parse_stmt(stream)? {
    stmts.push(stmt);
  }
  stream.expect(TokenKind::CloseCurly)?;

  Ok(Some(Scope { stmts }))
}

fn require_scope(stream: &mut TokenStream) -> CompileResult<Scope> {
  match parse_scope(stream)? {
    Some(scope) => Ok(scope),
    None => Err(stream.expected("scope")),
  }
}

fn parse_if_pred(stream: &mut TokenStream) -> CompileResult<Option<IfPred>> {
  if stream.try_consume(TokenKind::Elif).is_some() {
    stream.expect(TokenKind::OpenParen)?;
    let cond = require_expr(stream)?;
    stream.expect(TokenKind::CloseParen)?;
    let then = require_scope(stream)?;
    let pred = parse_if_pred(stream)?.map(Box::new);
    return Ok(Some(IfPred::Elif { cond, then, pred }));
  }

  if stream.try_consume(TokenKind::Else).is_some() {
    let scope = require_scope(stream)?;
    return Ok(Some(IfPred::Else(scope)));
  }

  Ok(None)
}

// ----- Expression parsing -----

fn require_expr(stream: &mut TokenStream) -> CompileResult<Expr> {
  match parse_expr(stream, 0)? {
    Some(expr) => Ok(expr),
    None => Err(stream.expected("expression")),
  }
}

/// Precedence climbing: fold infix operators of at least `min_prec` onto the
/// left-hand side. `prec + 1` as the recursive minimum makes every operator
/// left-associative.
fn parse_expr(stream: &mut TokenStream, min_prec: u8) -> CompileResult<Option<Expr>> {
  let Some(term) = parse_term(stream)? else {
    return Ok(None);
  };
  let mut lhs = Expr::Term(term);

  loop {
    let Some((kind, prec)) = stream
      .peek()
      .and_then(|token| Some((token.kind, token.kind.bin_prec()?)))
    else {
      break;
    };
    if prec < min_prec {
      break;
    }
    stream.advance();

    let Some(op) = BinOp::from_kind(kind) else {
      unreachable!("token kind with a precedence is always a binary operator");
    };
    let Some(rhs) = parse_expr(stream, prec + 1)? else {
      return Err(stream.expected("expression"));
    };
    lhs = Expr::Bin {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    };
  }

  Ok(Some(lhs))
}

fn parse_term(stream: &mut TokenStream) -> CompileResult<Option<Term>> {
  if let Some(int_lit) = stream.try_consume(TokenKind::IntLit) {
    return Ok(Some(Term::IntLit(int_lit)));
  }

  if let Some(ident) = stream.try_consume(TokenKind::Ident) {
    return Ok(Some(Term::Ident(ident)));
  }

  if stream.try_consume(TokenKind::OpenParen).is_some() {
    let expr = require_expr(stream)?;
    stream.expect(TokenKind::CloseParen)?;
    return Ok(Some(Term::Paren(Box::new(expr))));
  }

  if stream.try_consume(TokenKind::Minus).is_some() {
    let Some(term) = parse_term(stream)? else {
      return Err(stream.expected("term after unary '-'"));
    };
    return Ok(Some(Term::Neg(Box::new(term))));
  }

  Ok(None)
}

/// Lightweight cursor over the token vector.
struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
  last_line: usize,
}

impl TokenStream {
  fn new(tokens: Vec<Token>) -> Self {
    Self {
      tokens,
      pos: 0,
      last_line: 1,
    }
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self, offset: usize) -> Option<TokenKind> {
    self.tokens.get(self.pos + offset).map(|token| token.kind)
  }

  /// Consume the current token, remembering its line for diagnostics.
  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned()?;
    self.pos += 1;
    self.last_line = token.line;
    Some(token)
  }

  fn try_consume(&mut self, kind: TokenKind) -> Option<Token> {
    if self.peek_kind(0) == Some(kind) {
      self.advance()
    } else {
      None
    }
  }

  fn expect(&mut self, kind: TokenKind) -> CompileResult<Token> {
    match self.try_consume(kind) {
      Some(token) => Ok(token),
      None => Err(self.expected(kind.describe())),
    }
  }

  /// Parse error anchored at the line of the most recently consumed token.
  fn expected(&self, msg: impl Into<String>) -> CompileError {
    CompileError::expected(msg, self.last_line)
  }
}
