//! Shared error type for the compilation pipeline.
//!
//! Every stage reports failure as a `CompileError` value; the binary prints
//! the message to stderr and exits nonzero. The display strings are part of
//! the compiler's external contract and are asserted on by the test suite.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  /// A character the tokenizer has no rule for.
  #[snafu(display("Invalid token"))]
  InvalidToken { line: usize },

  /// Grammar violation. `line` is the line of the most recently consumed
  /// token, which is where the missing construct was expected.
  #[snafu(display("[Parse Error] Expected {msg} on line {line}"))]
  Expected { msg: String, line: usize },

  /// Reference to a name with no live declaration.
  #[snafu(display("Undeclared identifier: {name}"))]
  UndeclaredIdent { name: String },

  /// Second `let` for the same name within one scope.
  #[snafu(display("Identifier already used: {name}"))]
  IdentAlreadyUsed { name: String },
}

impl CompileError {
  /// Construct a parse error anchored at a source line.
  pub fn expected(msg: impl Into<String>, line: usize) -> Self {
    Self::Expected {
      msg: msg.into(),
      line,
    }
  }
}
