/*!

This module reads Prolog source text into `Clause`s.

The language is standard clause syntax:
```text
<program>   ::=  <clause>*
<clause>    ::=  <term> '.'                  a fact, or a rule if the term is `H :- B`
              |  '?-' <term> '.'            a query
              |  ':-' <term> '.'            a directive, read as a query
<term>      ::=  <primary> | <term> <infix> <term> | <prefix> <term>
<primary>   ::=  <number> | <variable> | <atom> | <atom> '(' <arguments> ')'
              |  '(' <term> ')' | '[' ']' | '[' <arguments> ( '|' <term> )? ']'
<atom>      ::=  <lowercase> <alphanumeric>* | <symbol-char>+ | '\'' <quoted> '\'' | '!' | ';'
<variable>  ::=  ( <uppercase> | '_' ) <alphanumeric>*
```

Operators and their priorities:

| Priority | Type | Operators                                                 |
|:--------:|:----:|:----------------------------------------------------------|
| 1200     | xfx  | `:-`                                                      |
| 1200     | fx   | `:-` `?-`                                                 |
| 1100     | xfy  | `;`                                                       |
| 1050     | xfy  | `->`                                                      |
| 1000     | xfy  | `,`                                                       |
| 900      | fy   | `\+`                                                      |
| 700      | xfx  | `=` `\=` `==` `\==` `is` `<` `>` `=<` `>=` `=:=` `=\=`    |
| 500      | yfx  | `+` `-`                                                   |
| 400      | yfx  | `*` `/` `//` `mod`                                        |
| 200      | fy   | `-`                                                       |

Special lexical forms, which are ignored:
```text
<eol_comment>     ::= '%' .* ('\n' | EOF)
<block_comment>   ::= '/*' .* '*/'
<whitespace>      ::= [ \t\r\n]+
```

Arguments are read at priority 999, so a conjunction or an `->` inside an argument needs
parentheses. Every `_` is a distinct variable. A clause with a syntax error is reported with its
position and skipped up to the next full stop; reading carries on with the next clause.

*/

use std::collections::HashMap;

use nom::{
  branch::alt,
  bytes::complete::{tag, take_until, take_while, take_while1},
  character::complete::{
    anychar,
    char as one_char,
    digit1,
    multispace1,
    none_of,
    one_of,
    satisfy
  },
  combinator::{map, opt, recognize, value},
  multi::many0,
  sequence::{delimited, pair, preceded, tuple},
  IResult
};

use crate::error::{CompileError, SourcePosition};
use crate::functor::NIL;
use crate::interner::Interner;
use crate::term::{Clause, Term, Var, Variable, SYMBOL_CHARS};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Associativity {
  Xfx,
  Xfy,
  Yfx,
  Fx,
  Fy,
}

lazy_static! {
  static ref INFIX_OPERATORS: HashMap<&'static str, (u32, Associativity)> = {
    use Associativity::*;
    let mut table = HashMap::new();
    table.insert(":-",  (1200, Xfx));
    table.insert(";",   (1100, Xfy));
    table.insert("->",  (1050, Xfy));
    table.insert(",",   (1000, Xfy));
    for name in ["=", "\\=", "==", "\\==", "is", "<", ">", "=<", ">=", "=:=", "=\\="].iter() {
      table.insert(*name, (700, Xfx));
    }
    table.insert("+",   (500, Yfx));
    table.insert("-",   (500, Yfx));
    for name in ["*", "/", "//", "mod"].iter() {
      table.insert(*name, (400, Yfx));
    }
    table
  };

  static ref PREFIX_OPERATORS: HashMap<&'static str, (u32, Associativity)> = {
    use Associativity::*;
    let mut table = HashMap::new();
    table.insert(":-",  (1200, Fx));
    table.insert("?-",  (1200, Fx));
    table.insert("\\+", (900, Fy));
    table.insert("-",   (200, Fy));
    table
  };
}

// region Lexemes

#[derive(Clone, Debug, PartialEq)]
enum Token {
  /// An unquoted atom, which may be an operator.
  Name(String),
  /// A quoted atom, never an operator.
  Quoted(String),
  Variable(String),
  Integer(i64),
  Float(f64),
  Punct(char),
  /// The full stop ending a clause.
  End,
}

#[derive(Clone, Debug)]
struct Lexeme {
  token         : Token,
  offset        : usize,
  layout_before : bool,
}

fn is_alphanumeric(c: char) -> bool {
  c.is_alphanumeric() || c == '_'
}

/// Whitespace and comments.
fn layout(input: &str) -> IResult<&str, &str> {
  recognize(many0(alt((
    multispace1,
    recognize(pair(one_char('%'), take_while(|c| c != '\n'))),
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
  ))))(input)
}

fn number(input: &str) -> IResult<&str, Token> {
  let (rest, text) = recognize(tuple((
    digit1,
    opt(pair(one_char('.'), digit1)),
    opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
  )))(input)?;

  let token =
    if text.contains(|c| c == '.' || c == 'e' || c == 'E') {
      text.parse::<f64>().ok().map(Token::Float)
    } else {
      text.parse::<i64>().ok().map(Token::Integer)
    };
  match token {
    Some(token) => Ok((rest, token)),
    None => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))),
  }
}

fn variable(input: &str) -> IResult<&str, Token> {
  map(
    recognize(pair(satisfy(|c| c.is_uppercase() || c == '_'), take_while(is_alphanumeric))),
    |name: &str| Token::Variable(name.to_string())
  )(input)
}

fn plain_name(input: &str) -> IResult<&str, Token> {
  map(
    recognize(pair(satisfy(|c| c.is_lowercase()), take_while(is_alphanumeric))),
    |name: &str| Token::Name(name.to_string())
  )(input)
}

fn quoted(input: &str) -> IResult<&str, Token> {
  map(
    delimited(
      one_char('\''),
      many0(alt((
        value("'".to_string(), tag("''")),
        map(preceded(one_char('\\'), anychar), |c| match c {
          'n'   => "\n".to_string(),
          't'   => "\t".to_string(),
          '\\'  => "\\".to_string(),
          '\''  => "'".to_string(),
          other => format!("\\{}", other),
        }),
        map(none_of("'\\"), |c| c.to_string()),
      ))),
      one_char('\'')
    ),
    |parts: Vec<String>| Token::Quoted(parts.concat())
  )(input)
}

fn symbolic(input: &str) -> IResult<&str, Token> {
  let (rest, name) = take_while1(|c| SYMBOL_CHARS.contains(c))(input)?;
  let ends_clause = name == "." && rest.chars().next().map_or(true, |c| c.is_whitespace() || c == '%');
  if ends_clause {
    Ok((rest, Token::End))
  } else {
    Ok((rest, Token::Name(name.to_string())))
  }
}

fn lexeme(input: &str) -> IResult<&str, Token> {
  alt((
    number,
    variable,
    plain_name,
    quoted,
    map(one_of("!;"), |c| Token::Name(c.to_string())),
    map(one_of("()[],|"), Token::Punct),
    symbolic,
  ))(input)
}

/// Skips past the next full stop, for recovery after an error.
fn skip_clause(input: &str) -> &str {
  let mut chars = input.char_indices().peekable();
  while let Some((i, c)) = chars.next() {
    if c == '.' && chars.peek().map_or(true, |(_, next)| next.is_whitespace() || *next == '%') {
      return &input[i + 1..];
    }
  }
  ""
}

fn position(text: &str, offset: usize) -> SourcePosition {
  let before = &text[..offset.min(text.len())];
  let line = before.matches('\n').count() + 1;
  let column = before.rsplit('\n').next().map_or(0, |last| last.chars().count()) + 1;
  SourcePosition{ line, column }
}

fn syntax_error(text: &str, offset: usize, message: impl Into<String>) -> CompileError {
  CompileError::SourceCode{ position: position(text, offset), message: message.into() }
}

/// The tokens of one clause.
struct ClauseTokens<'a> {
  lexemes    : Vec<Lexeme>,
  /// Offset of the full stop, or of the end of the text.
  end        : usize,
  terminated : bool,
  rest       : &'a str,
}

/// Reads the tokens up to and including the next full stop. `Ok(None)` at the end of the text.
fn tokenize_clause<'a>(text: &'a str, input: &'a str) -> Result<Option<ClauseTokens<'a>>, (CompileError, &'a str)> {
  let mut lexemes = Vec::new();
  let mut input = input;
  loop {
    let (after_layout, skipped) = match layout(input) {
      Ok(result) => result,
      Err(_)     => (input, ""),
    };
    let offset = text.len() - after_layout.len();
    if after_layout.is_empty() {
      if lexemes.is_empty() {
        return Ok(None);
      }
      return Ok(Some(ClauseTokens{ lexemes, end: offset, terminated: false, rest: after_layout }));
    }
    match lexeme(after_layout) {
      Ok((rest, Token::End)) => {
        return Ok(Some(ClauseTokens{ lexemes, end: offset, terminated: true, rest }));
      }
      Ok((rest, token)) => {
        lexemes.push(Lexeme{ token, offset, layout_before: !skipped.is_empty() });
        input = rest;
      }
      Err(_) => {
        let found = after_layout.chars().next().unwrap_or(' ');
        let error = syntax_error(text, offset, format!("unexpected character `{}`", found));
        return Err((error, skip_clause(after_layout)));
      }
    }
  }
}

// endregion

// region Terms

struct Cursor<'t> {
  text    : &'t str,
  lexemes : &'t [Lexeme],
  pos     : usize,
  end     : usize,
}

impl<'t> Cursor<'t> {
  fn peek(&self) -> Option<&Lexeme> {
    self.lexemes.get(self.pos)
  }

  fn advance(&mut self) -> Option<Lexeme> {
    let lexeme = self.lexemes.get(self.pos).cloned();
    if lexeme.is_some() {
      self.pos += 1;
    }
    lexeme
  }

  fn offset(&self) -> usize {
    self.peek().map_or(self.end, |lexeme| lexeme.offset)
  }

  fn error(&self, message: impl Into<String>) -> CompileError {
    syntax_error(self.text, self.offset(), message)
  }

  fn peek_punct(&self, punct: char) -> bool {
    matches!(self.peek(), Some(Lexeme{ token: Token::Punct(c), .. }) if *c == punct)
  }

  fn expect(&mut self, punct: char) -> Result<(), CompileError> {
    if self.peek_punct(punct) {
      self.pos += 1;
      Ok(())
    } else {
      Err(self.error(format!("expected `{}`", punct)))
    }
  }

  /// Whether the next token can begin a term, i.e. an operand of a prefix operator follows.
  fn at_term_start(&self) -> bool {
    match self.peek() {
      None => false,
      Some(Lexeme{ token: Token::Punct(c), .. }) => *c == '(' || *c == '[',
      Some(Lexeme{ token: Token::Name(name), .. }) => !INFIX_OPERATORS.contains_key(name.as_str()),
      Some(_) => true,
    }
  }
}

pub struct Reader<'i> {
  interner  : &'i mut Interner,
  /// The named variables of the clause being read.
  variables : HashMap<String, Var>,
  anonymous : usize,
}

impl<'i> Reader<'i> {

  pub fn new(interner: &'i mut Interner) -> Reader<'i> {
    Reader{ interner, variables: HashMap::new(), anonymous: 0 }
  }

  /// Reads every clause of `text`, collecting an error for each clause that cannot be read.
  pub fn read_clauses(&mut self, text: &str) -> (Vec<Clause>, Vec<CompileError>) {
    let mut clauses = Vec::new();
    let mut errors = Vec::new();
    let mut input = text;

    loop {
      match tokenize_clause(text, input) {
        Ok(None) => break,
        Ok(Some(tokens)) => {
          input = tokens.rest;
          if !tokens.terminated {
            errors.push(syntax_error(text, tokens.end, "expected `.` at the end of the clause"));
            break;
          }
          match self.clause(text, &tokens) {
            Ok(clause) => clauses.push(clause),
            Err(error) => errors.push(error),
          }
        }
        Err((error, rest)) => {
          errors.push(error);
          input = rest;
        }
      }
    }

    (clauses, errors)
  }

  pub fn read_program(&mut self, text: &str) -> Result<Vec<Clause>, Vec<CompileError>> {
    let (clauses, errors) = self.read_clauses(text);
    if errors.is_empty() {
      Ok(clauses)
    } else {
      Err(errors)
    }
  }

  /// Reads a single query. The leading `?-` and the final full stop are optional.
  pub fn read_query(&mut self, text: &str) -> Result<Clause, CompileError> {
    let tokens =
      match tokenize_clause(text, text) {
        Ok(Some(tokens)) => tokens,
        Ok(None)         => return Err(syntax_error(text, text.len(), "empty query")),
        Err((error, _))  => return Err(error),
      };
    if let Ok((rest, _)) = layout(tokens.rest) {
      if !rest.is_empty() {
        return Err(syntax_error(text, text.len() - rest.len(), "unexpected text after the query"));
      }
    }

    let clause = self.clause(text, &tokens)?;
    match clause.head {
      None       => Ok(clause),
      Some(head) => Ok(Clause::query(self.goals(head))),
    }
  }

  /// Reads one term, e.g. `f(X, [a])`, with an optional final full stop.
  pub fn read_term(&mut self, text: &str) -> Result<Term, CompileError> {
    let tokens =
      match tokenize_clause(text, text) {
        Ok(Some(tokens)) => tokens,
        Ok(None)         => return Err(syntax_error(text, text.len(), "empty term")),
        Err((error, _))  => return Err(error),
      };
    self.variables.clear();
    let mut cursor = Cursor{ text, lexemes: &tokens.lexemes, pos: 0, end: tokens.end };
    let (term, _) = self.parse(&mut cursor, 1200)?;
    if cursor.peek().is_some() {
      return Err(cursor.error("operator expected"));
    }
    Ok(term)
  }

  fn clause(&mut self, text: &str, tokens: &ClauseTokens) -> Result<Clause, CompileError> {
    self.variables.clear();
    let mut cursor = Cursor{ text, lexemes: &tokens.lexemes, pos: 0, end: tokens.end };
    let (term, _) = self.parse(&mut cursor, 1200)?;
    if cursor.peek().is_some() {
      return Err(cursor.error("operator expected"));
    }

    let neck = self.interner.intern_functor(":-", 2);
    let directive = self.interner.intern_functor(":-", 1);
    let query = self.interner.intern_functor("?-", 1);
    match term.functor() {
      Some((functor, 2)) if functor == neck => {
        let args = term.args();
        Ok(Clause::rule(args[0].clone(), self.goals(args[1].clone())))
      }
      Some((functor, 1)) if functor == directive || functor == query => {
        Ok(Clause::query(self.goals(term.args()[0].clone())))
      }
      _ => Ok(Clause::fact(term)),
    }
  }

  /// Splits a body at its top-level commas.
  fn goals(&mut self, body: Term) -> Vec<Term> {
    let comma = self.interner.intern_functor(",", 2);
    let mut goals = Vec::new();
    let mut rest = body;
    while let Some((functor, 2)) = rest.functor() {
      if functor != comma {
        break;
      }
      let args = rest.args();
      goals.push(args[0].clone());
      rest = args[1].clone();
    }
    goals.push(rest);
    goals
  }

  /// Reads a term of priority at most `max`, returning it with its priority.
  fn parse(&mut self, cursor: &mut Cursor, max: u32) -> Result<(Term, u32), CompileError> {
    let (mut left, mut left_priority) = self.parse_primary(cursor, max)?;

    loop {
      let name =
        match cursor.peek() {
          Some(Lexeme{ token: Token::Name(name), .. }) => name.clone(),
          Some(Lexeme{ token: Token::Punct(','), .. }) => ",".to_string(),
          _ => break,
        };
      let (priority, associativity) =
        match INFIX_OPERATORS.get(name.as_str()) {
          Some(operator) => *operator,
          None => break,
        };
      if priority > max {
        break;
      }
      let left_max = if associativity == Associativity::Yfx { priority } else { priority - 1 };
      if left_priority > left_max {
        break;
      }
      let right_max = if associativity == Associativity::Xfy { priority } else { priority - 1 };

      cursor.advance();
      let (right, _) = self.parse(cursor, right_max)?;
      let functor = self.interner.intern_functor(&name, 2);
      left = Term::structure(functor, vec![left, right]);
      left_priority = priority;
    }

    Ok((left, left_priority))
  }

  fn parse_primary(&mut self, cursor: &mut Cursor, max: u32) -> Result<(Term, u32), CompileError> {
    let lexeme = match cursor.advance() {
      Some(lexeme) => lexeme,
      None => return Err(cursor.error("unexpected end of clause")),
    };

    match lexeme.token {
      Token::Integer(i) => Ok((Term::Integer(i), 0)),
      Token::Float(x)   => Ok((Term::float(x), 0)),

      Token::Variable(name) => Ok((self.variable(&name), 0)),

      Token::Punct('(') => {
        let (term, _) = self.parse(cursor, 1200)?;
        cursor.expect(')')?;
        Ok((term, 0))
      }

      Token::Punct('[') => {
        if cursor.peek_punct(']') {
          cursor.advance();
          return Ok((Term::Atom(NIL), 0));
        }
        let items = self.arguments(cursor)?;
        let tail =
          if cursor.peek_punct('|') {
            cursor.advance();
            self.parse(cursor, 999)?.0
          } else {
            Term::nil()
          };
        cursor.expect(']')?;
        Ok((Term::list(items, tail), 0))
      }

      Token::Name(name) | Token::Quoted(name) if functional_notation(cursor) => {
        cursor.advance();
        let args = self.arguments(cursor)?;
        cursor.expect(')')?;
        let functor = self.interner.intern_functor(&name, args.len() as u32);
        Ok((Term::structure(functor, args), 0))
      }

      Token::Name(name) => {
        // A minus sign directly in front of a number is part of the number.
        if name == "-" {
          if let Some(Lexeme{ token, layout_before: false, .. }) = cursor.peek() {
            let negative =
              match token {
                Token::Integer(i) => Some(Term::Integer(-*i)),
                Token::Float(x)   => Some(Term::float(-*x)),
                _                 => None,
              };
            if let Some(number) = negative {
              cursor.advance();
              return Ok((number, 0));
            }
          }
        }

        if let Some((priority, associativity)) = PREFIX_OPERATORS.get(name.as_str()).copied() {
          if priority <= max && cursor.at_term_start() {
            let operand_max = if associativity == Associativity::Fy { priority } else { priority - 1 };
            let (operand, _) = self.parse(cursor, operand_max)?;
            let functor = self.interner.intern_functor(&name, 1);
            return Ok((Term::structure(functor, vec![operand]), priority));
          }
        }

        Ok((Term::Atom(self.interner.intern_atom(&name)), 0))
      }

      Token::Quoted(name) => Ok((Term::Atom(self.interner.intern_atom(&name)), 0)),

      Token::Punct(c) => Err(syntax_error(cursor.text, lexeme.offset, format!("unexpected `{}`", c))),

      Token::End => Err(syntax_error(cursor.text, lexeme.offset, "unexpected `.`")),
    }
  }

  /// A comma separated list of terms of priority 999.
  fn arguments(&mut self, cursor: &mut Cursor) -> Result<Vec<Term>, CompileError> {
    let mut args = vec![self.parse(cursor, 999)?.0];
    while cursor.peek_punct(',') {
      cursor.advance();
      args.push(self.parse(cursor, 999)?.0);
    }
    Ok(args)
  }

  fn variable(&mut self, name: &str) -> Term {
    if name == "_" {
      self.anonymous += 1;
      let id = self.interner.intern_variable(&format!("_#{}", self.anonymous));
      return Term::Variable(Variable::new(id));
    }
    if let Some(var) = self.variables.get(name) {
      return Term::Variable(var.clone());
    }
    let var = Variable::new(self.interner.intern_variable(name));
    self.variables.insert(name.to_string(), var.clone());
    Term::Variable(var)
  }
}

/// A name immediately followed by `(` is a compound term.
fn functional_notation(cursor: &Cursor) -> bool {
  matches!(cursor.peek(), Some(Lexeme{ token: Token::Punct('('), layout_before: false, .. }))
}

// endregion


#[cfg(test)]
mod tests {
  use super::*;
  use crate::interner::InternerView;
  use crate::term::ClauseKind;

  fn render(interner: &Interner, term: &Term) -> String {
    term.display(interner).to_string()
  }

  #[test]
  fn reads_facts_rules_and_queries() {
    let mut interner = Interner::new();
    let clauses = Reader::new(&mut interner).read_program(
      "parent(tom, bob).\n\
       % a comment\n\
       grandparent(X, Z) :- parent(X, Y), /* inline */ parent(Y, Z).\n\
       ?- grandparent(tom, W)."
    ).unwrap();

    assert_eq!(clauses.len(), 3);
    assert_eq!(clauses[0].kind, ClauseKind::Fact);
    assert_eq!(clauses[1].kind, ClauseKind::Rule);
    assert_eq!(clauses[1].body.len(), 2);
    assert_eq!(clauses[2].kind, ClauseKind::Query);
    assert_eq!(render(&interner, &clauses[2].body[0]), "grandparent(tom, W)");

    // Variables of one clause are shared.
    let head_x = &clauses[1].head.as_ref().unwrap().args()[0];
    let body_x = &clauses[1].body[0].args()[0];
    assert!(head_x.structural_eq(body_x));
  }

  #[test]
  fn operators_follow_their_priorities() {
    let mut interner = Interner::new();
    let mut reader = Reader::new(&mut interner);
    let term = reader.read_term("X is 1 + 2 * 3 - -4").unwrap();
    let minus = reader.interner.lookup_functor("-", 2).unwrap();
    let is = reader.interner.lookup_functor("is", 2).unwrap();
    assert_eq!(term.functor(), Some((is, 2)));
    let sum = &term.args()[1];
    assert_eq!(sum.functor(), Some((minus, 2)));
    assert_eq!(sum.args()[1], Term::Integer(-4));
    drop(reader);
    assert_eq!(render(&interner, &term.args()[1]), "-(+(1, *(2, 3)), -4)");
  }

  #[test]
  fn control_constructs_nest_as_expected() {
    let mut interner = Interner::new();
    let query = Reader::new(&mut interner).read_query("?- ( a -> b ; c ), \\+ d.").unwrap();
    assert_eq!(query.body.len(), 2);
    let disjunction = interner.lookup_functor(";", 2).unwrap();
    let if_then = interner.lookup_functor("->", 2).unwrap();
    let not = interner.lookup_functor("\\+", 1).unwrap();
    assert_eq!(query.body[0].functor(), Some((disjunction, 2)));
    assert_eq!(query.body[0].args()[0].functor(), Some((if_then, 2)));
    assert_eq!(query.body[1].functor(), Some((not, 1)));
  }

  #[test]
  fn lists_quoted_atoms_and_anonymous_variables() {
    let mut interner = Interner::new();
    let mut reader = Reader::new(&mut interner);
    let term = reader.read_term("f([1, 2.5 | T], 'hello world', _, _, [])").unwrap();
    let args = term.args();
    assert!(!args[2].structural_eq(&args[3]));
    drop(reader);
    assert_eq!(render(&interner, &args[0]), "[1, 2.5 | T]");
    assert_eq!(render(&interner, &args[1]), "hello world");
    assert_eq!(args[4], Term::nil());
    assert!(interner.variable_name(args[2].variables()[0].id).unwrap().starts_with('_'));
  }

  #[test]
  fn errors_carry_positions_and_reading_resumes() {
    let mut interner = Interner::new();
    let (clauses, errors) = Reader::new(&mut interner).read_clauses("p(a).\nq(b c).\nr(d).");
    assert_eq!(clauses.len(), 2);
    assert_eq!(errors.len(), 1);
    match &errors[0] {
      CompileError::SourceCode{ position, .. } => assert_eq!(*position, SourcePosition{ line: 2, column: 5 }),
      other => panic!("unexpected error {}", other),
    }
  }

  #[test]
  fn a_missing_full_stop_is_an_error() {
    let mut interner = Interner::new();
    let result = Reader::new(&mut interner).read_program("p(a)");
    assert!(result.is_err());
    let query = Reader::new(&mut interner).read_query("p(a)");
    assert!(query.is_ok());
  }
}
