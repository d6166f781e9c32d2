use std::{collections::HashMap, ops::Range, path::Path};

use log::trace;

use crate::source::{Location, MacroInstance};

/// A `#define`d macro. Undefined macros are kept with `undefined` set so that their history
/// remains available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    /// Parameter names of a function-like macro, excluding the variadic one.
    pub params: Option<Vec<String>>,
    /// Name bound to trailing arguments: `__VA_ARGS__` for `...`, or `name` for `name...`.
    pub variadic: Option<String>,
    pub value: String,
    pub location: Location,
    pub undefined: bool,
}

impl Macro {
    pub fn object(name: impl Into<String>, value: impl Into<String>, location: Location) -> Self {
        Self {
            name: name.into(),
            params: None,
            variadic: None,
            value: value.into(),
            location,
            undefined: false,
        }
    }

    pub fn is_function(&self) -> bool {
        self.params.is_some()
    }

    /// Whether two definitions are interchangeable, ignoring where they were made.
    pub fn same_definition(&self, other: &Macro) -> bool {
        self.params == other.params && self.variadic == other.variadic && self.value == other.value
    }

    fn param(&self, name: &str) -> Option<usize> {
        self.params.as_ref()?.iter().position(|p| p == name)
    }
}

/// The result of expanding one line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub text: String,
    pub instances: Vec<MacroInstance>,
    /// Problems found while expanding, keyed by the byte range of the invocation.
    pub warnings: Vec<(Range<usize>, String)>,
}

/// Where a line being expanded comes from, for `__FILE__` and `__LINE__`.
#[derive(Debug, Clone, Copy)]
pub struct Origin<'a> {
    pub file: &'a Path,
    pub line: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a macro that is currently defined.
    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name).filter(|m| !m.undefined)
    }

    /// Look up a macro, including ones that have been undefined.
    pub fn history(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Define a macro, returning the live definition it replaced, if any.
    pub fn define(&mut self, m: Macro) -> Option<Macro> {
        self.macros
            .insert(m.name.clone(), m)
            .filter(|prev| !prev.undefined)
    }

    /// Mark a macro as undefined. Returns false if it wasn't defined.
    pub fn undefine(&mut self, name: &str) -> bool {
        match self.macros.get_mut(name) {
            Some(m) if !m.undefined => {
                m.undefined = true;
                true
            }
            _ => false,
        }
    }

    /// Iterate over the currently defined macros.
    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.values().filter(|m| !m.undefined)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand all macros in a line, recording each top-level substitution.
    ///
    /// `in_comment` carries block comment state across lines; nothing inside comments or string
    /// literals is expanded.
    pub fn expand_line(&self, text: &str, origin: Origin, in_comment: &mut bool) -> Expansion {
        let mut expansion = Expansion::default();
        let mut exclude = Vec::new();

        expansion.text = self.expand_text(
            text,
            origin,
            &mut exclude,
            in_comment,
            Some(&mut expansion.instances),
            &mut expansion.warnings,
        );

        expansion
    }

    /// Expand all macros in a piece of text, without tracking substitutions.
    pub fn expand(&self, text: &str, origin: Origin) -> String {
        let mut warnings = Vec::new();
        self.expand_text(text, origin, &mut Vec::new(), &mut false, None, &mut warnings)
    }

    fn expand_text(
        &self,
        text: &str,
        origin: Origin,
        exclude: &mut Vec<String>,
        in_comment: &mut bool,
        mut instances: Option<&mut Vec<MacroInstance>>,
        warnings: &mut Vec<(Range<usize>, String)>,
    ) -> String {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut i = 0;

        while i < bytes.len() {
            if *in_comment {
                if bytes[i..].starts_with(b"*/") {
                    *in_comment = false;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            match bytes[i] {
                b'"' | b'\'' => i = skip_literal(bytes, i),
                b'/' if bytes.get(i + 1) == Some(&b'/') => break,
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    *in_comment = true;
                    i += 2;
                }
                c if is_ident_start(c) && (i == 0 || !is_ident_char(bytes[i - 1])) => {
                    let start = i;
                    while i < bytes.len() && is_ident_char(bytes[i]) {
                        i += 1;
                    }

                    let name = &text[start..i];
                    if let Some((replacement, end)) =
                        self.substitute(name, text, start..i, origin, exclude, warnings)
                    {
                        trace!("{}: {} -> {}", origin.line + 1, &text[start..end], replacement);

                        out.push_str(&text[copied..start]);
                        out.push_str(&replacement);
                        if let Some(instances) = instances.as_deref_mut() {
                            instances.push(MacroInstance {
                                name: name.to_string(),
                                range: start..end,
                                raw: text[start..end].to_string(),
                                inserted: replacement,
                            });
                        }
                        i = end;
                        copied = end;
                    }
                }
                _ => i += 1,
            }
        }

        out.push_str(&text[copied..]);
        out
    }

    /// Compute the replacement for the identifier at `range`, returning it together with the end
    /// of the invocation in `text`.
    fn substitute(
        &self,
        name: &str,
        text: &str,
        range: Range<usize>,
        origin: Origin,
        exclude: &mut Vec<String>,
        warnings: &mut Vec<(Range<usize>, String)>,
    ) -> Option<(String, usize)> {
        match name {
            "__LINE__" => return Some(((origin.line + 1).to_string(), range.end)),
            "__FILE__" => return Some((format!("\"{}\"", origin.file.display()), range.end)),
            _ => {}
        }

        if exclude.iter().any(|e| e == name) {
            return None;
        }
        let m = self.get(name)?;

        if !m.is_function() {
            exclude.push(m.name.clone());
            let value = self.expand_text(&m.value, origin, exclude, &mut false, None, warnings);
            exclude.pop();
            return Some((value, range.end));
        }

        // A function-like macro name without an argument list is left alone.
        let open = range.end + (text[range.end..].len() - text[range.end..].trim_start().len());
        if text.as_bytes().get(open) != Some(&b'(') {
            return None;
        }

        let Some((args, close)) = split_arguments(text, open) else {
            warnings.push((
                range.start..text.len(),
                format!("Unterminated argument list for macro {}", name),
            ));
            return None;
        };

        let arity = m.params.as_ref().map_or(0, Vec::len);
        let args = if arity == 0 && args.len() == 1 && args[0].trim().is_empty() {
            Vec::new()
        } else {
            args
        };

        if args.len() < arity || (args.len() > arity && m.variadic.is_none()) {
            warnings.push((
                range.start..close + 1,
                format!(
                    "Macro {} expects {} arguments, got {}",
                    name,
                    arity,
                    args.len()
                ),
            ));
        }

        let body = self.apply(m, &args, origin, exclude, warnings);

        exclude.push(m.name.clone());
        let value = self.expand_text(&body, origin, exclude, &mut false, None, warnings);
        exclude.pop();

        Some((value, close + 1))
    }

    /// Bind arguments into a function-like macro body, handling `#` and `##`.
    fn apply(
        &self,
        m: &Macro,
        args: &[&str],
        origin: Origin,
        exclude: &mut Vec<String>,
        warnings: &mut Vec<(Range<usize>, String)>,
    ) -> String {
        let arity = m.params.as_ref().map_or(0, Vec::len);

        // Raw (unexpanded) text bound to a parameter name.
        let raw = |name: &str| -> Option<String> {
            if let Some(idx) = m.param(name) {
                return Some(args.get(idx).map_or(String::new(), |a| a.trim().to_string()));
            }
            if m.variadic.as_deref() == Some(name) {
                return Some(if args.len() > arity {
                    args[arity..].join(",").trim().to_string()
                } else {
                    String::new()
                });
            }
            None
        };

        let tokens = tokenize(&m.value);
        let mut out: Vec<String> = Vec::with_capacity(tokens.len());
        let mut idx = 0;

        while idx < tokens.len() {
            match tokens[idx] {
                Token::Hash => {
                    let next = skip_space(&tokens, idx + 1);
                    match tokens.get(next).and_then(|t| t.ident()).and_then(raw) {
                        Some(arg) => {
                            out.push(stringify(&arg));
                            idx = next + 1;
                        }
                        None => {
                            out.push("#".into());
                            idx += 1;
                        }
                    }
                }
                Token::Paste => {
                    let next = skip_space(&tokens, idx + 1);
                    let name = tokens.get(next).and_then(|t| t.ident());
                    let after_comma = out
                        .iter()
                        .rev()
                        .find(|t| !t.trim().is_empty())
                        .map_or(false, |t| t.trim() == ",");

                    // GNU extension: `, ## __VA_ARGS__` drops the comma when no arguments follow.
                    if after_comma && name.is_some() && m.variadic.as_deref() == name {
                        let arg = name.and_then(raw).unwrap_or_default();
                        if arg.is_empty() {
                            while out.last().map_or(false, |t| t.trim().is_empty()) {
                                out.pop();
                            }
                            out.pop();
                        } else {
                            out.push(arg);
                        }
                        idx = next + 1;
                        continue;
                    }

                    while out.last().map_or(false, |t| t.trim().is_empty()) {
                        out.pop();
                    }

                    match (name.and_then(raw), tokens.get(next)) {
                        (Some(arg), _) => out.push(arg),
                        (None, Some(token)) => out.push(token.text().to_string()),
                        (None, None) => {}
                    }
                    idx = next + 1;
                }
                Token::Ident(name) => {
                    let pasted = matches!(tokens.get(skip_space(&tokens, idx + 1)), Some(Token::Paste));

                    match raw(name) {
                        Some(arg) if pasted => out.push(arg),
                        Some(arg) => out.push(self.expand_text(
                            &arg,
                            origin,
                            exclude,
                            &mut false,
                            None,
                            warnings,
                        )),
                        None => out.push(name.to_string()),
                    }
                    idx += 1;
                }
                ref token => {
                    out.push(token.text().to_string());
                    idx += 1;
                }
            }
        }

        out.concat()
    }
}

/// Lexical pieces of a macro body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Hash,
    Paste,
    Space(&'a str),
    Other(&'a str),
}

impl<'a> Token<'a> {
    fn ident(&self) -> Option<&'a str> {
        match self {
            Token::Ident(s) => Some(s),
            _ => None,
        }
    }

    fn text(&self) -> &'a str {
        match self {
            Token::Ident(s) | Token::Space(s) | Token::Other(s) => s,
            Token::Hash => "#",
            Token::Paste => "##",
        }
    }
}

fn tokenize(body: &str) -> Vec<Token> {
    let bytes = body.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let token = match bytes[i] {
            b'#' if bytes.get(i + 1) == Some(&b'#') => {
                i += 2;
                Token::Paste
            }
            b'#' => {
                i += 1;
                Token::Hash
            }
            c if c.is_ascii_whitespace() => {
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                Token::Space(&body[start..i])
            }
            c if is_ident_start(c) => {
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                Token::Ident(&body[start..i])
            }
            c if c.is_ascii_digit() => {
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                Token::Other(&body[start..i])
            }
            b'"' | b'\'' => {
                i = skip_literal(bytes, i);
                Token::Other(&body[start..i])
            }
            _ => {
                i += body[i..].chars().next().map_or(1, char::len_utf8);
                Token::Other(&body[start..i])
            }
        };
        tokens.push(token);
    }

    tokens
}

fn skip_space(tokens: &[Token], mut idx: usize) -> usize {
    while let Some(Token::Space(_)) = tokens.get(idx) {
        idx += 1;
    }
    idx
}

fn stringify(arg: &str) -> String {
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Split a parenthesized argument list starting at `open`, returning the arguments and the index
/// of the closing parenthesis. Commas only separate arguments at the outermost nesting level.
pub(crate) fn split_arguments(text: &str, open: usize) -> Option<(Vec<&str>, usize)> {
    let bytes = text.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0;
    let mut start = open + 1;
    let mut i = open;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_literal(bytes, i);
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    args.push(&text[start..i]);
                    return Some((args, i));
                }
            }
            b',' if depth == 1 => {
                args.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// Return the index just past the string or character literal starting at `start`.
pub(crate) fn skip_literal(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }

    bytes.len()
}

pub(crate) fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

pub(crate) fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}
