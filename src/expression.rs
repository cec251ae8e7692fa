//! Boolean combinations of named pointcuts, like `logged && !cflow(inTransaction)`.
//!
//! ```text
//! or      = and (("||" | "OR") and)*
//! and     = unary (("&&" | "AND") unary)*
//! unary   = ("!" | "NOT") unary | primary
//! primary = "(" or ")" | "cflow" "(" name ")" | name
//! ```
//! The keywords are accepted in upper and lower case.

use std::fmt::{Display, Formatter};
use anyhow::{anyhow, bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
	/// A reference to a named pointcut.
	Ref(String),
	/// True while the current thread is in the control flow of the named pointcut.
	Cflow(String),
	Not(Box<Expression>),
	And(Box<Expression>, Box<Expression>),
	Or(Box<Expression>, Box<Expression>),
}

/// A three valued boolean, for matching before cflow is known.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tri {
	True,
	False,
	Unknown,
}

impl Tri {
	fn and(self, other: Tri) -> Tri {
		match (self, other) {
			(Tri::False, _) | (_, Tri::False) => Tri::False,
			(Tri::True, Tri::True) => Tri::True,
			_ => Tri::Unknown,
		}
	}

	fn or(self, other: Tri) -> Tri {
		match (self, other) {
			(Tri::True, _) | (_, Tri::True) => Tri::True,
			(Tri::False, Tri::False) => Tri::False,
			_ => Tri::Unknown,
		}
	}

	fn not(self) -> Tri {
		match self {
			Tri::True => Tri::False,
			Tri::False => Tri::True,
			Tri::Unknown => Tri::Unknown,
		}
	}

	/// Anything not definitely false could match.
	pub fn could_match(self) -> bool {
		self != Tri::False
	}
}

impl From<bool> for Tri {
	fn from(value: bool) -> Self {
		if value { Tri::True } else { Tri::False }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
	And,
	Or,
	Not,
	Open,
	Close,
	Cflow,
	Name(String),
}

fn is_name_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '.' | '-')
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
	let mut tokens = Vec::new();
	let mut chars = source.char_indices().peekable();
	while let Some((start, c)) = chars.next() {
		match c {
			c if c.is_whitespace() => {},
			'(' => tokens.push(Token::Open),
			')' => tokens.push(Token::Close),
			'!' => tokens.push(Token::Not),
			'&' | '|' => {
				if chars.next().map(|(_, next)| next) != Some(c) {
					bail!("expected `{c}{c}` at position {start}");
				}
				tokens.push(if c == '&' { Token::And } else { Token::Or });
			},
			c if is_name_char(c) => {
				let mut end = start + c.len_utf8();
				while let Some(&(i, next)) = chars.peek() {
					if !is_name_char(next) {
						break;
					}
					end = i + next.len_utf8();
					chars.next();
				}
				let word = &source[start..end];
				let followed_by_open = source[end..].trim_start().starts_with('(');
				tokens.push(match word {
					"AND" | "and" => Token::And,
					"OR" | "or" => Token::Or,
					"NOT" | "not" => Token::Not,
					"cflow" if followed_by_open => Token::Cflow,
					name => Token::Name(name.to_owned()),
				});
			},
			c => bail!("unexpected character {c:?} at position {start}"),
		}
	}
	Ok(tokens)
}

struct Parser {
	tokens: Vec<Token>,
	position: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.position)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.position).cloned();
		self.position += 1;
		token
	}

	fn expect(&mut self, expected: Token) -> Result<()> {
		match self.next() {
			Some(token) if token == expected => Ok(()),
			Some(token) => bail!("expected {expected:?}, got {token:?}"),
			None => bail!("expected {expected:?}, got the end of the expression"),
		}
	}

	fn or(&mut self) -> Result<Expression> {
		let mut left = self.and()?;
		while self.peek() == Some(&Token::Or) {
			self.next();
			let right = self.and()?;
			left = Expression::Or(Box::new(left), Box::new(right));
		}
		Ok(left)
	}

	fn and(&mut self) -> Result<Expression> {
		let mut left = self.unary()?;
		while self.peek() == Some(&Token::And) {
			self.next();
			let right = self.unary()?;
			left = Expression::And(Box::new(left), Box::new(right));
		}
		Ok(left)
	}

	fn unary(&mut self) -> Result<Expression> {
		if self.peek() == Some(&Token::Not) {
			self.next();
			return Ok(Expression::Not(Box::new(self.unary()?)));
		}
		self.primary()
	}

	fn primary(&mut self) -> Result<Expression> {
		match self.next() {
			Some(Token::Open) => {
				let inner = self.or()?;
				self.expect(Token::Close)?;
				Ok(inner)
			},
			Some(Token::Cflow) => {
				self.expect(Token::Open)?;
				let name = match self.next() {
					Some(Token::Name(name)) => name,
					other => bail!("expected a pointcut name in cflow(), got {other:?}"),
				};
				self.expect(Token::Close)?;
				Ok(Expression::Cflow(name))
			},
			Some(Token::Name(name)) => Ok(Expression::Ref(name)),
			Some(token) => bail!("unexpected {token:?}"),
			None => bail!("unexpected end of the expression"),
		}
	}
}

impl Expression {
	pub fn parse(source: &str) -> Result<Expression> {
		let mut parser = Parser { tokens: tokenize(source)?, position: 0 };
		let expression = parser.or()?;
		if let Some(token) = parser.peek() {
			return Err(anyhow!("unexpected {token:?} after the end of the expression"));
		}
		Ok(expression)
	}

	/// Matches without knowing the control flow: `cflow(...)` is unknown.
	pub fn match_static(&self, leaf: &mut impl FnMut(&str) -> bool) -> Tri {
		match self {
			Expression::Ref(name) => Tri::from(leaf(name)),
			Expression::Cflow(_) => Tri::Unknown,
			Expression::Not(inner) => inner.match_static(leaf).not(),
			Expression::And(a, b) => {
				let a = a.match_static(leaf);
				if a == Tri::False {
					return Tri::False;
				}
				a.and(b.match_static(leaf))
			},
			Expression::Or(a, b) => {
				let a = a.match_static(leaf);
				if a == Tri::True {
					return Tri::True;
				}
				a.or(b.match_static(leaf))
			},
		}
	}

	pub fn match_runtime(&self, leaf: &mut impl FnMut(&str) -> bool, cflow: &mut impl FnMut(&str) -> bool) -> bool {
		match self {
			Expression::Ref(name) => leaf(name),
			Expression::Cflow(name) => cflow(name),
			Expression::Not(inner) => !inner.match_runtime(leaf, cflow),
			Expression::And(a, b) => a.match_runtime(leaf, cflow) && b.match_runtime(leaf, cflow),
			Expression::Or(a, b) => a.match_runtime(leaf, cflow) || b.match_runtime(leaf, cflow),
		}
	}

	/// The names of the pointcuts referenced in `cflow(...)`, in order of appearance.
	pub fn cflow_references(&self) -> Vec<&str> {
		let mut names = Vec::new();
		self.collect(&mut |e| if let Expression::Cflow(name) = e {
			names.push(name.as_str());
		});
		names
	}

	/// The names of the pointcuts referenced outside of `cflow(...)`, in order of appearance.
	pub fn pattern_references(&self) -> Vec<&str> {
		let mut names = Vec::new();
		self.collect(&mut |e| if let Expression::Ref(name) = e {
			names.push(name.as_str());
		});
		names
	}

	fn collect<'a>(&'a self, f: &mut impl FnMut(&'a Expression)) {
		f(self);
		match self {
			Expression::Ref(_) | Expression::Cflow(_) => {},
			Expression::Not(inner) => inner.collect(f),
			Expression::And(a, b) | Expression::Or(a, b) => {
				a.collect(f);
				b.collect(f);
			},
		}
	}
}

impl Display for Expression {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Expression::Ref(name) => f.write_str(name),
			Expression::Cflow(name) => write!(f, "cflow({name})"),
			Expression::Not(inner) => write!(f, "!{inner}"),
			Expression::And(a, b) => write!(f, "({a} && {b})"),
			Expression::Or(a, b) => write!(f, "({a} || {b})"),
		}
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use anyhow::Result;
	use crate::expression::{Expression, Tri};

	fn refs<'a>(names: &'a [&'a str]) -> impl FnMut(&str) -> bool + 'a {
		move |name| names.contains(&name)
	}

	#[test]
	fn precedence() -> Result<()> {
		let expression = Expression::parse("a || b && !c")?;
		assert_eq!(expression.to_string(), "(a || (b && !c))");

		let expression = Expression::parse("(a OR b) and not c")?;
		assert_eq!(expression.to_string(), "((a || b) && !c)");
		Ok(())
	}

	#[test]
	fn references() -> Result<()> {
		let expression = Expression::parse("log && cflow(tx) || !cflow(batch) && other")?;
		assert_eq!(expression.pattern_references(), ["log", "other"]);
		assert_eq!(expression.cflow_references(), ["tx", "batch"]);

		// `cflow` is only special in front of a parenthesis
		let expression = Expression::parse("cflow && x")?;
		assert_eq!(expression.pattern_references(), ["cflow", "x"]);
		Ok(())
	}

	#[test]
	fn three_valued() -> Result<()> {
		let expression = Expression::parse("a && cflow(c)")?;
		assert_eq!(expression.match_static(&mut refs(&["a"])), Tri::Unknown);
		assert_eq!(expression.match_static(&mut refs(&[])), Tri::False);

		let expression = Expression::parse("a || cflow(c)")?;
		assert_eq!(expression.match_static(&mut refs(&["a"])), Tri::True);
		assert_eq!(expression.match_static(&mut refs(&[])), Tri::Unknown);

		let expression = Expression::parse("a && !cflow(c)")?;
		assert!(expression.match_static(&mut refs(&["a"])).could_match());
		assert!(expression.match_runtime(&mut refs(&["a"]), &mut |_| false));
		assert!(!expression.match_runtime(&mut refs(&["a"]), &mut |_| true));
		Ok(())
	}

	#[test]
	fn malformed() {
		assert!(Expression::parse("").is_err());
		assert!(Expression::parse("a &&").is_err());
		assert!(Expression::parse("a & b").is_err());
		assert!(Expression::parse("(a || b").is_err());
		assert!(Expression::parse("a b").is_err());
		assert!(Expression::parse("cflow(a && b)").is_err());
		assert!(Expression::parse("a # b").is_err());
	}
}
