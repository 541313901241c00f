//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising keywords,
//! operators and numeric literals. Multi-character operators are matched
//! before single-character ones to avoid ambiguity, and comments are
//! discarded before `/` can be taken as the division operator.

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Exit,
  IntLit,
  Semi,
  OpenParen,
  CloseParen,
  Ident,
  Let,
  Eq,
  Plus,
  Star,
  Minus,
  Slash,
  OpenCurly,
  CloseCurly,
  If,
  Elif,
  Else,
  Print,
  Gt,
  Ge,
  EqEq,
  Lt,
  Le,
}

impl TokenKind {
  /// Precedence of a binary operator; `None` for anything else. Higher
  /// binds tighter, and every operator is left-associative.
  pub fn bin_prec(self) -> Option<u8> {
    match self {
      TokenKind::Plus
      | TokenKind::Minus
      | TokenKind::Gt
      | TokenKind::Ge
      | TokenKind::Lt
      | TokenKind::Le
      | TokenKind::EqEq => Some(0),
      TokenKind::Star | TokenKind::Slash => Some(1),
      _ => None,
    }
  }

  /// Fixed surface spelling of a keyword or punctuator; `None` for the two
  /// kinds that carry their own lexeme.
  pub fn literal(self) -> Option<&'static str> {
    match self {
      TokenKind::Exit => Some("exit"),
      TokenKind::Let => Some("let"),
      TokenKind::If => Some("if"),
      TokenKind::Elif => Some("elif"),
      TokenKind::Else => Some("else"),
      TokenKind::Print => Some("print"),
      TokenKind::Semi => Some(";"),
      TokenKind::OpenParen => Some("("),
      TokenKind::CloseParen => Some(")"),
      TokenKind::OpenCurly => Some("{"),
      TokenKind::CloseCurly => Some("}"),
      TokenKind::Eq => Some("="),
      TokenKind::Plus => Some("+"),
      TokenKind::Star => Some("*"),
      TokenKind::Minus => Some("-"),
      TokenKind::Slash => Some("/"),
      TokenKind::Gt => Some(">"),
      TokenKind::Ge => Some(">="),
      TokenKind::EqEq => Some("=="),
      TokenKind::Lt => Some("<"),
      TokenKind::Le => Some("<="),
      TokenKind::IntLit | TokenKind::Ident => None,
    }
  }

  /// Human-friendly description used in parse diagnostics.
  pub fn describe(self) -> &'static str {
    match self {
      TokenKind::Exit => "`exit`",
      TokenKind::IntLit => "int literal",
      TokenKind::Semi => "`;`",
      TokenKind::OpenParen => "`(`",
      TokenKind::CloseParen => "`)`",
      TokenKind::Ident => "identifier",
      TokenKind::Let => "`let`",
      TokenKind::Eq => "`=`",
      TokenKind::Plus => "`+`",
      TokenKind::Star => "`*`",
      TokenKind::Minus => "`-`",
      TokenKind::Slash => "`/`",
      TokenKind::OpenCurly => "`{`",
      TokenKind::CloseCurly => "`}`",
      TokenKind::If => "`if`",
      TokenKind::Elif => "`elif`",
      TokenKind::Else => "`else`",
      TokenKind::Print => "`print`",
      TokenKind::Gt => "`>`",
      TokenKind::Ge => "`>=`",
      TokenKind::EqEq => "`==`",
      TokenKind::Lt => "`<`",
      TokenKind::Le => "`<=`",
    }
  }
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub line: usize,
  pub value: Option<String>,
}

impl Token {
  /// Convenience constructor to keep the `tokenize` loop readable.
  pub fn new(kind: TokenKind, line: usize, value: Option<String>) -> Self {
    Self { kind, line, value }
  }
}

/// Return the surface text of a token: the fixed spelling for keywords and
/// punctuators, the lexeme for identifiers and integer literals. Re-lexing
/// the joined surface texts reproduces an equivalent token sequence.
pub fn token_text(token: &Token) -> &str {
  match token.kind.literal() {
    Some(text) => text,
    None => token.value.as_deref().unwrap_or(""),
  }
}

/// A `-` adjacent to a digit starts a negative literal only where an
/// expression cannot continue; after a value-like token it is subtraction.
fn ends_expression(last: Option<&Token>) -> bool {
  matches!(
    last.map(|token| token.kind),
    Some(TokenKind::IntLit | TokenKind::Ident | TokenKind::CloseParen)
  )
}

/// Lex the input into a flat vector of tokens.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens: Vec<Token> = Vec::new();
  let bytes = input.as_bytes();
  let mut line = 1;
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];

    if c.is_ascii_alphabetic() {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
        i += 1;
      }
      let word = &input[start..i];
      let kind = match word {
        "exit" => TokenKind::Exit,
        "let" => TokenKind::Let,
        "if" => TokenKind::If,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "print" => TokenKind::Print,
        _ => TokenKind::Ident,
      };
      let value = (kind == TokenKind::Ident).then(|| word.to_string());
      tokens.push(Token::new(kind, line, value));
      continue;
    }

    if c == b'-'
      && i + 1 < bytes.len()
      && bytes[i + 1].is_ascii_digit()
      && !ends_expression(tokens.last())
    {
      let start = i;
      i += 2;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      tokens.push(Token::new(
        TokenKind::IntLit,
        line,
        Some(input[start..i].to_string()),
      ));
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      tokens.push(Token::new(
        TokenKind::IntLit,
        line,
        Some(input[start..i].to_string()),
      ));
      continue;
    }

    if input[i..].starts_with("//") {
      i += 2;
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    if input[i..].starts_with("/*") {
      i += 2;
      while i < bytes.len() && !input[i..].starts_with("*/") {
        i += 1;
      }
      // An unterminated block comment silently ends at end of input.
      if i < bytes.len() {
        i += 2;
      }
      continue;
    }

    if let Some(kind) = [
      (">=", TokenKind::Ge),
      ("<=", TokenKind::Le),
      ("==", TokenKind::EqEq),
    ]
    .into_iter()
    .find_map(|(op, kind)| input[i..].starts_with(op).then_some(kind))
    {
      tokens.push(Token::new(kind, line, None));
      i += 2;
      continue;
    }

    let single = match c {
      b'(' => Some(TokenKind::OpenParen),
      b')' => Some(TokenKind::CloseParen),
      b'{' => Some(TokenKind::OpenCurly),
      b'}' => Some(TokenKind::CloseCurly),
      b';' => Some(TokenKind::Semi),
      b'+' => Some(TokenKind::Plus),
      b'*' => Some(TokenKind::Star),
      b'-' => Some(TokenKind::Minus),
      b'/' => Some(TokenKind::Slash),
      b'>' => Some(TokenKind::Gt),
      b'<' => Some(TokenKind::Lt),
      b'=' => Some(TokenKind::Eq),
      _ => None,
    };
    if let Some(kind) = single {
      tokens.push(Token::new(kind, line, None));
      i += 1;
      continue;
    }

    if c == b'\n' {
      line += 1;
      i += 1;
      continue;
    }
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    return Err(CompileError::InvalidToken { line });
  }

  Ok(tokens)
}

#[cfg(test)]
mod test {
  use super::TokenKind::*;
  use super::*;

  fn kinds(input: &str) -> Vec<TokenKind> {
    tokenize(input)
      .unwrap()
      .into_iter()
      .map(|token| token.kind)
      .collect()
  }

  #[test]
  fn tokenize_exit() {
    assert_eq!(
      tokenize("exit(0);").unwrap(),
      vec![
        Token::new(Exit, 1, None),
        Token::new(OpenParen, 1, None),
        Token::new(IntLit, 1, Some("0".to_string())),
        Token::new(CloseParen, 1, None),
        Token::new(Semi, 1, None),
      ]
    );
  }

  #[test]
  fn keywords_and_idents() {
    assert_eq!(
      kinds("let x = 1; if (x) { print(x); } elif (x) {} else {}"),
      vec![
        Let, Ident, Eq, IntLit, Semi, If, OpenParen, Ident, CloseParen, OpenCurly, Print,
        OpenParen, Ident, CloseParen, Semi, CloseCurly, Elif, OpenParen, Ident, CloseParen,
        OpenCurly, CloseCurly, Else, OpenCurly, CloseCurly,
      ]
    );
    // A keyword prefix does not stop an identifier run.
    assert_eq!(kinds("exits lets iffy"), vec![Ident, Ident, Ident]);
  }

  #[test]
  fn two_char_operators_win() {
    assert_eq!(
      kinds("a >= b <= c == d > e < f = g"),
      vec![Ident, Ge, Ident, Le, Ident, EqEq, Ident, Gt, Ident, Lt, Ident, Eq, Ident]
    );
  }

  #[test]
  fn negative_literal_folds_after_operator() {
    let tokens = tokenize("let n = -7;").unwrap();
    assert_eq!(tokens[3], Token::new(IntLit, 1, Some("-7".to_string())));
    let tokens = tokenize("(-7)").unwrap();
    assert_eq!(tokens[1], Token::new(IntLit, 1, Some("-7".to_string())));
    let tokens = tokenize("1 + -7").unwrap();
    assert_eq!(tokens[2], Token::new(IntLit, 1, Some("-7".to_string())));
  }

  #[test]
  fn minus_after_value_is_subtraction() {
    assert_eq!(kinds("a-5"), vec![Ident, Minus, IntLit]);
    assert_eq!(kinds("1-5"), vec![IntLit, Minus, IntLit]);
    assert_eq!(kinds("(1)-5"), vec![OpenParen, IntLit, CloseParen, Minus, IntLit]);
  }

  #[test]
  fn line_numbers_start_at_one() {
    let tokens = tokenize("let x = 1;\nexit(x);\n").unwrap();
    assert_eq!(tokens.first().map(|token| token.line), Some(1));
    assert_eq!(tokens.last().map(|token| token.line), Some(2));
  }

  #[test]
  fn comments_are_discarded() {
    assert_eq!(kinds("1 // trailing\n+ 2"), vec![IntLit, Plus, IntLit]);
    assert_eq!(kinds("1 /* in\nline */ + 2"), vec![IntLit, Plus, IntLit]);
    assert_eq!(kinds("/* unterminated"), vec![]);
  }

  #[test]
  fn line_comment_leaves_newline_for_the_counter() {
    let tokens = tokenize("// first\nexit(0);").unwrap();
    assert_eq!(tokens[0].line, 2);
  }

  #[test]
  fn block_comment_swallows_its_newlines() {
    let tokens = tokenize("/* a\nb */ exit(0);").unwrap();
    assert_eq!(tokens[0].line, 1);
  }

  #[test]
  fn invalid_character_is_rejected() {
    let err = tokenize("let x = 1;\n$").unwrap_err();
    assert_eq!(err.to_string(), "Invalid token");
    match err {
      CompileError::InvalidToken { line } => assert_eq!(line, 2),
      other => panic!("expected invalid-token error, got {other:?}"),
    }
  }

  #[test]
  fn surface_text_round_trips() {
    let source = "let x = 2; if (x >= -1) { print(x * 3 - 4); }";
    let tokens = tokenize(source).unwrap();
    let rendered = tokens.iter().map(token_text).collect::<Vec<_>>().join(" ");
    let relexed = tokenize(&rendered).unwrap();
    assert_eq!(tokens.len(), relexed.len());
    for (before, after) in tokens.iter().zip(relexed.iter()) {
      assert_eq!(before.kind, after.kind);
      assert_eq!(before.value, after.value);
    }
  }
}
