//! Macro parsing and expansion for package descriptors.
//!
//! Descriptor values reference macros that are only known once the caller's
//! build configuration and the descriptor's own definitions are combined. This
//! module parses macro references out of a string and expands them against a
//! [`MacroEnv`].
//!
//! # Macro Forms
//!
//! - `%name` / `%{name}` - value of `name`, an error if undefined
//! - `%{?name}` - value of `name`, or nothing if undefined
//! - `%{?name:text}` - `text` if `name` is defined, otherwise nothing
//! - `%{!?name:text}` - `text` if `name` is undefined, otherwise nothing
//! - `%%` - a literal `%`
//!
//! Expanded text is final: it is not meant to be expanded again. Most values
//! come back unchanged if it is, but a `%` produced by `%%` would start a new
//! reference on a second pass.
//!
//! A `%` that is not followed by an identifier character or `{` passes through
//! unchanged, so `50%` or `%-` survive expansion.
//!
//! # Expansion
//!
//! Expansion is lazy: a macro body is only expanded when it is referenced, so
//! the order in which macros were defined never changes the result. A macro
//! that (directly or indirectly) references itself is reported as
//! [`MacroError::Cyclic`] instead of looping, and nesting deeper than
//! [`MAX_EXPANSION_DEPTH`] is treated the same way.
//!
//! # Example
//!
//! ```
//! use planex_lib::macros::MacroEnv;
//!
//! let mut env = MacroEnv::new();
//! env.define("_topdir", "_build");
//! env.define("_sourcedir", "%_topdir/SOURCES/%name");
//! env.define("name", "ocaml-cohttp");
//!
//! assert_eq!(env.expand("%{_sourcedir}/x.tar.gz").unwrap(), "_build/SOURCES/ocaml-cohttp/x.tar.gz");
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

/// Maximum nesting of macro references before expansion is abandoned.
pub const MAX_EXPANSION_DEPTH: usize = 64;

/// A parsed macro reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroRef {
  /// `%name` or `%{name}`
  Value(String),

  /// `%{?name}` - empty when undefined
  Optional(String),

  /// `%{?name:text}`
  IfDefined { name: String, body: Vec<Segment> },

  /// `%{!?name:text}`
  IfUndefined { name: String, body: Vec<Segment> },
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no macros)
  Literal(String),

  /// A macro to be expanded
  Macro(MacroRef),
}

/// Errors that can occur during macro parsing or expansion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroError {
  #[error("unclosed macro reference at position {0}")]
  Unclosed(usize),

  #[error("empty macro name at position {0}")]
  EmptyName(usize),

  #[error("undefined macro '%{{{0}}}'")]
  Undefined(String),

  #[error("cyclic macro expansion: {}", chain.join(" -> "))]
  Cyclic { chain: Vec<String> },
}

/// A key -> value macro environment.
///
/// Values are stored unexpanded; [`MacroEnv::expand`] resolves references on
/// demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroEnv {
  values: BTreeMap<String, String>,
}

impl MacroEnv {
  /// Create an empty environment.
  pub fn new() -> Self {
    Self::default()
  }

  /// Define (or redefine) a macro. The body is stored unexpanded.
  pub fn define(&mut self, name: impl Into<String>, body: impl Into<String>) {
    self.values.insert(name.into(), body.into());
  }

  /// Remove a macro definition.
  pub fn undefine(&mut self, name: &str) -> Option<String> {
    self.values.remove(name)
  }

  /// Raw (unexpanded) body of a macro.
  pub fn get(&self, name: &str) -> Option<&str> {
    self.values.get(name).map(String::as_str)
  }

  pub fn is_defined(&self, name: &str) -> bool {
    self.values.contains_key(name)
  }

  /// Iterate over raw definitions in name order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Layer `other` on top of this environment; its definitions win.
  pub fn extend(&mut self, other: &MacroEnv) {
    for (name, body) in &other.values {
      self.values.insert(name.clone(), body.clone());
    }
  }

  /// Fully expand `input` against this environment.
  ///
  /// # Errors
  ///
  /// Returns an error if the input is malformed, references an undefined
  /// macro, or expands cyclically.
  pub fn expand(&self, input: &str) -> Result<String, MacroError> {
    let mut active = Vec::new();
    self.expand_str(input, &mut active)
  }

  /// Fully expand the named macro.
  pub fn expand_macro(&self, name: &str) -> Result<String, MacroError> {
    let mut active = Vec::new();
    self.expand_named(name, &mut active)
  }

  fn expand_str(&self, input: &str, active: &mut Vec<String>) -> Result<String, MacroError> {
    let segments = parse(input)?;
    self.expand_segments(&segments, active)
  }

  fn expand_segments(&self, segments: &[Segment], active: &mut Vec<String>) -> Result<String, MacroError> {
    let mut result = String::new();

    for segment in segments {
      match segment {
        Segment::Literal(s) => result.push_str(s),
        Segment::Macro(m) => match m {
          MacroRef::Value(name) => result.push_str(&self.expand_named(name, active)?),
          MacroRef::Optional(name) => {
            if self.is_defined(name) {
              result.push_str(&self.expand_named(name, active)?);
            }
          }
          MacroRef::IfDefined { name, body } => {
            if self.is_defined(name) {
              result.push_str(&self.expand_segments(body, active)?);
            }
          }
          MacroRef::IfUndefined { name, body } => {
            if !self.is_defined(name) {
              result.push_str(&self.expand_segments(body, active)?);
            }
          }
        },
      }
    }

    Ok(result)
  }

  fn expand_named(&self, name: &str, active: &mut Vec<String>) -> Result<String, MacroError> {
    if active.iter().any(|a| a == name) || active.len() >= MAX_EXPANSION_DEPTH {
      let mut chain = active.clone();
      chain.push(name.to_string());
      return Err(MacroError::Cyclic { chain });
    }

    let body = self
      .values
      .get(name)
      .ok_or_else(|| MacroError::Undefined(name.to_string()))?;

    active.push(name.to_string());
    let expanded = self.expand_str(body, active);
    active.pop();
    expanded
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MacroEnv {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut env = MacroEnv::new();
    for (k, v) in iter {
      env.define(k, v);
    }
    env
  }
}

fn is_name_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_'
}

/// Parse a string containing macro references into segments.
///
/// # Errors
///
/// Returns an error if a braced reference is unclosed or names nothing.
pub fn parse(input: &str) -> Result<Vec<Segment>, MacroError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '%' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '%')) => {
        chars.next();
        literal.push('%');
      }
      Some((_, '{')) => {
        chars.next();

        // Braces may nest inside conditional bodies
        let mut depth = 1;
        let mut content = String::new();
        for (_, c) in chars.by_ref() {
          match c {
            '{' => depth += 1,
            '}' => {
              depth -= 1;
              if depth == 0 {
                break;
              }
            }
            _ => {}
          }
          content.push(c);
        }

        if depth != 0 {
          return Err(MacroError::Unclosed(pos));
        }

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Macro(parse_braced(&content, pos)?));
      }
      Some(&(_, c)) if is_name_char(c) => {
        let mut name = String::new();
        while let Some(&(_, c)) = chars.peek() {
          if !is_name_char(c) {
            break;
          }
          name.push(c);
          chars.next();
        }

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Macro(MacroRef::Value(name)));
      }
      _ => literal.push('%'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content inside `%{` and `}`.
fn parse_braced(content: &str, pos: usize) -> Result<MacroRef, MacroError> {
  let (negated, rest) = match content.strip_prefix("!?") {
    Some(rest) => (true, Some(rest)),
    None => (false, content.strip_prefix('?')),
  };

  let Some(rest) = rest else {
    let name = content.trim();
    if name.is_empty() {
      return Err(MacroError::EmptyName(pos));
    }
    return Ok(MacroRef::Value(name.to_string()));
  };

  let (name, body) = match rest.split_once(':') {
    Some((name, body)) => (name.trim(), Some(body)),
    None => (rest.trim(), None),
  };

  if name.is_empty() {
    return Err(MacroError::EmptyName(pos));
  }

  match (negated, body) {
    (false, None) => Ok(MacroRef::Optional(name.to_string())),
    (false, Some(body)) => Ok(MacroRef::IfDefined {
      name: name.to_string(),
      body: parse(body)?,
    }),
    // `%{!?name}` expands to nothing either way
    (true, None) => Ok(MacroRef::IfUndefined {
      name: name.to_string(),
      body: Vec::new(),
    }),
    (true, Some(body)) => Ok(MacroRef::IfUndefined {
      name: name.to_string(),
      body: parse(body)?,
    }),
  }
}
