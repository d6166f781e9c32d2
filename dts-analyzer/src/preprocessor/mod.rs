//! A small C preprocessor for devicetree sources.
//!
//! Lines are pulled from a queue that included files are spliced into, so the output is a flat
//! list of expanded [`Line`]s in the order the parser should see them.

mod macros;

use std::{
    collections::{HashSet, VecDeque},
    ops::Range,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, trace};

pub use self::macros::{Expansion, Macro, MacroTable, Origin};
pub(crate) use self::macros::{is_ident_char, is_ident_start, skip_literal};

use crate::{
    diagnostic::Diagnostic,
    expr,
    source::{normalize, Line, Location, SourceProvider},
};

/// Includes nested deeper than this are assumed to be recursive.
pub const MAX_INCLUDE_DEPTH: usize = 32;

const DIRECTIVES: &[&str] = &[
    "define", "undef", "include", "if", "ifdef", "ifndef", "elif", "else", "endif", "error",
    "warning", "pragma", "line",
];

/// An `#include` or `/include/` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeStatement {
    /// The file name as written.
    pub raw: String,
    /// The resolved file, if it was found.
    pub path: Option<PathBuf>,
    /// Location of the file name.
    pub location: Location,
    /// Whether the name was written in angle brackets.
    pub system: bool,
}

/// The output of preprocessing one file and everything it includes.
#[derive(Debug, Default, Clone)]
pub struct Preprocessed {
    pub lines: Vec<Line>,
    pub macros: MacroTable,
    pub includes: Vec<IncludeStatement>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug)]
struct RawLine {
    file: Arc<Path>,
    number: usize,
    text: String,
    depth: usize,
}

impl RawLine {
    fn location(&self, columns: Range<usize>) -> Location {
        Location::on_line(self.file.clone(), self.number, columns)
    }

    fn origin(&self) -> Origin {
        Origin {
            file: &self.file,
            line: self.number,
        }
    }
}

#[derive(Debug)]
struct Condition {
    /// Whether lines in the current branch are emitted.
    active: bool,
    /// Whether any branch of this conditional has been taken.
    taken: bool,
    /// Whether the enclosing region is active.
    parent: bool,
    else_seen: bool,
    location: Location,
}

/// A directive line split into keyword and arguments.
struct Directive<'a> {
    keyword: &'a str,
    args: &'a str,
    /// Byte offset of `args` in the line.
    offset: usize,
    /// Byte offset of the `#`.
    start: usize,
}

pub struct Preprocessor<'a> {
    provider: &'a dyn SourceProvider,
    include_paths: &'a [PathBuf],
    macros: MacroTable,
    queue: VecDeque<RawLine>,
    conditions: Vec<Condition>,
    once: HashSet<PathBuf>,
    in_comment: bool,
    lines: Vec<Line>,
    includes: Vec<IncludeStatement>,
    diagnostics: Vec<Diagnostic>,
}

/// Preprocess `text` as the contents of `path`, starting from the given macro table.
pub fn preprocess(
    path: &Path,
    text: &str,
    macros: MacroTable,
    provider: &dyn SourceProvider,
    include_paths: &[PathBuf],
) -> Preprocessed {
    Preprocessor::new(provider, include_paths, macros).run(path, text)
}

impl<'a> Preprocessor<'a> {
    pub fn new(
        provider: &'a dyn SourceProvider,
        include_paths: &'a [PathBuf],
        macros: MacroTable,
    ) -> Self {
        Self {
            provider,
            include_paths,
            macros,
            queue: VecDeque::new(),
            conditions: Vec::new(),
            once: HashSet::new(),
            in_comment: false,
            lines: Vec::new(),
            includes: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn run(mut self, path: &Path, text: &str) -> Preprocessed {
        self.push_file(Arc::from(path), text, 0);

        while let Some(line) = self.queue.pop_front() {
            self.process(line);
        }

        for condition in self.conditions.drain(..) {
            self.diagnostics.push(Diagnostic::error(
                condition.location,
                "Unterminated conditional directive",
            ));
        }

        Preprocessed {
            lines: self.lines,
            macros: self.macros,
            includes: self.includes,
            diagnostics: self.diagnostics,
        }
    }

    /// Queue the lines of a file in front of everything else, joining continued lines.
    fn push_file(&mut self, file: Arc<Path>, text: &str, depth: usize) {
        let mut lines = Vec::new();
        let mut pending: Option<RawLine> = None;

        for (number, text) in text.lines().enumerate() {
            let (text, continued) = match text.strip_suffix('\\') {
                Some(text) => (text, true),
                None => (text, false),
            };

            let line = match pending.take() {
                Some(mut line) => {
                    line.text.push_str(text);
                    line
                }
                None => RawLine {
                    file: file.clone(),
                    number,
                    text: text.to_string(),
                    depth,
                },
            };

            if continued {
                pending = Some(line);
            } else {
                lines.push(line);
            }
        }
        lines.extend(pending);

        for line in lines.into_iter().rev() {
            self.queue.push_front(line);
        }
    }

    fn active(&self) -> bool {
        self.conditions.last().map_or(true, |c| c.active)
    }

    fn process(&mut self, line: RawLine) {
        if !self.in_comment {
            if let Some(directive) = directive(&line.text) {
                self.directive(&line, directive);
                return;
            }
        }

        if !self.active() {
            skip_comments(&line.text, &mut self.in_comment);
            return;
        }

        if !self.in_comment {
            if let Some(rest) = line.text.trim_start().strip_prefix("/include/") {
                let offset = line.text.len() - rest.len();
                let start = offset - "/include/".len();
                self.include(&line, rest, offset, start);
                return;
            }
        }

        let expansion = self
            .macros
            .expand_line(&line.text, line.origin(), &mut self.in_comment);

        for (range, message) in expansion.warnings {
            self.diagnostics
                .push(Diagnostic::warning(line.location(range), message));
        }

        self.lines.push(Line {
            file: line.file,
            number: line.number,
            raw: line.text,
            text: expansion.text,
            macros: expansion.instances,
        });
    }

    fn directive(&mut self, line: &RawLine, directive: Directive) {
        let Directive {
            keyword,
            args,
            offset,
            start,
        } = directive;

        let mut in_comment = self.in_comment;
        let args = strip_comments(args, &mut in_comment);
        self.in_comment = in_comment;

        let location = line.location(start..line.text.len());
        let active = self.active();

        match keyword {
            "if" | "ifdef" | "ifndef" => {
                let value = active && self.condition(line, keyword, &args, offset);
                self.conditions.push(Condition {
                    active: value,
                    taken: value,
                    parent: active,
                    else_seen: false,
                    location,
                });
            }
            "elif" => {
                let state = self
                    .conditions
                    .last()
                    .map(|c| (c.parent && !c.taken, c.else_seen));

                match state {
                    None => self
                        .diagnostics
                        .push(Diagnostic::error(location, "#elif without #if")),
                    Some((_, true)) => self
                        .diagnostics
                        .push(Diagnostic::error(location, "#elif after #else")),
                    Some((enabled, false)) => {
                        let value = enabled && self.condition(line, keyword, &args, offset);
                        if let Some(c) = self.conditions.last_mut() {
                            c.active = value;
                            c.taken |= value;
                        }
                    }
                }
            }
            "else" => match self.conditions.last_mut() {
                None => self
                    .diagnostics
                    .push(Diagnostic::error(location, "#else without #if")),
                Some(c) if c.else_seen => self
                    .diagnostics
                    .push(Diagnostic::error(location, "Duplicate #else")),
                Some(c) => {
                    c.active = c.parent && !c.taken;
                    c.taken = true;
                    c.else_seen = true;
                }
            },
            "endif" => {
                if self.conditions.pop().is_none() {
                    self.diagnostics
                        .push(Diagnostic::error(location, "#endif without #if"));
                }
            }
            _ if !active => {}
            "define" => self.define(line, &args, offset),
            "undef" => match identifier(&args) {
                Some(name) => {
                    self.macros.undefine(name);
                }
                None => self
                    .diagnostics
                    .push(Diagnostic::error(location, "Missing macro name")),
            },
            "include" => self.include(line, &args, offset, start),
            "error" => self
                .diagnostics
                .push(Diagnostic::error(location, args.trim())),
            "warning" => self
                .diagnostics
                .push(Diagnostic::warning(location, args.trim())),
            "pragma" => {
                if args.trim() == "once" {
                    self.pragma_once(line);
                } else {
                    debug!("{}: ignoring #pragma {}", location, args.trim());
                }
            }
            _ => {}
        }
    }

    /// Evaluate the condition of an `#if`, `#ifdef`, `#ifndef` or `#elif`.
    fn condition(&mut self, line: &RawLine, keyword: &str, args: &str, offset: usize) -> bool {
        let location = line.location(offset..offset + args.len());

        if keyword == "ifdef" || keyword == "ifndef" {
            return match identifier(args) {
                Some(name) => self.macros.is_defined(name) == (keyword == "ifdef"),
                None => {
                    self.diagnostics
                        .push(Diagnostic::error(location, "Missing macro name"));
                    false
                }
            };
        }

        if args.trim().is_empty() {
            self.diagnostics
                .push(Diagnostic::error(location, "Missing condition"));
            return false;
        }

        let text = replace_defined(args, &self.macros);
        let text = self.macros.expand(&text, line.origin());
        let text = replace_identifiers(&text);

        match expr::evaluate(&text) {
            Ok(value) => {
                trace!("{}: #{} {} -> {}", location, keyword, args.trim(), value);
                value != 0
            }
            Err(e) => {
                self.diagnostics.push(Diagnostic::error(location, e.to_string()));
                false
            }
        }
    }

    fn define(&mut self, line: &RawLine, args: &str, offset: usize) {
        let lead = args.len() - args.trim_start().len();
        let Some(name) = identifier(args) else {
            self.diagnostics.push(Diagnostic::error(
                line.location(offset..offset + args.len()),
                "Missing macro name",
            ));
            return;
        };

        let name_start = offset + lead;
        let location = line.location(name_start..name_start + name.len());
        let rest = &args[lead + name.len()..];

        // Parameters only exist if the parenthesis immediately follows the name.
        let (params, variadic, value) = match rest.strip_prefix('(') {
            Some(rest) => {
                let Some(close) = rest.find(')') else {
                    self.diagnostics.push(Diagnostic::error(
                        location,
                        "Unterminated macro parameter list",
                    ));
                    return;
                };

                let mut params = Vec::new();
                let mut variadic = None;

                for param in rest[..close].split(',').map(str::trim) {
                    if param.is_empty() && close == 0 {
                        continue;
                    } else if param == "..." {
                        variadic = Some("__VA_ARGS__".to_string());
                    } else if let Some(named) = param.strip_suffix("...") {
                        variadic = Some(named.trim().to_string());
                    } else if identifier(param) == Some(param) && variadic.is_none() {
                        params.push(param.to_string());
                    } else {
                        self.diagnostics.push(Diagnostic::error(
                            location,
                            format!("Invalid macro parameter \"{}\"", param),
                        ));
                        return;
                    }
                }

                (Some(params), variadic, rest[close + 1..].trim())
            }
            None => (None, None, rest.trim()),
        };

        let m = Macro {
            params,
            variadic,
            ..Macro::object(name, value, location.clone())
        };

        if let Some(prev) = self.macros.define(m.clone()) {
            if !prev.same_definition(&m) {
                self.diagnostics.push(
                    Diagnostic::warning(location, format!("Duplicate definition of {}", name))
                        .with_related(prev.location, "Previous definition"),
                );
            }
        }
    }

    fn include(&mut self, line: &RawLine, args: &str, offset: usize, start: usize) {
        let lead = args.len() - args.trim_start().len();
        let args = args.trim();

        let (name, system) = match args.chars().next() {
            Some('"') => (args[1..].split('"').next(), false),
            Some('<') => (args[1..].split('>').next().filter(|_| args.contains('>')), true),
            _ => (None, false),
        };

        let Some(name) = name.filter(|n| !n.is_empty()) else {
            self.diagnostics.push(Diagnostic::error(
                line.location(start..line.text.len()),
                "Invalid include statement",
            ));
            return;
        };

        let name_start = offset + lead + 1;
        let location = line.location(name_start..name_start + name.len());

        let dir = line.file.parent().map(Path::to_path_buf).unwrap_or_default();
        let path = std::iter::once(dir)
            .chain(self.include_paths.iter().cloned())
            .map(|dir| normalize(&dir.join(name)))
            .find(|candidate| self.provider.exists(candidate));

        self.includes.push(IncludeStatement {
            raw: name.to_string(),
            path: path.clone(),
            location: location.clone(),
            system,
        });

        let Some(path) = path else {
            self.diagnostics.push(Diagnostic::warning(
                location,
                format!("Unable to resolve include file \"{}\"", name),
            ));
            return;
        };

        if line.depth >= MAX_INCLUDE_DEPTH {
            self.diagnostics
                .push(Diagnostic::error(location, "Includes nested too deeply"));
            return;
        }

        match self.provider.read(&path) {
            Ok(text) => {
                debug!("{}: including {}", location, path.display());
                self.push_file(Arc::from(path.as_path()), &text, line.depth + 1);
            }
            Err(e) => self.diagnostics.push(Diagnostic::error(
                location,
                format!("Unable to read {}: {}", path.display(), e),
            )),
        }
    }

    fn pragma_once(&mut self, line: &RawLine) {
        if self.once.insert(normalize(&line.file)) {
            return;
        }

        debug!("skipping second inclusion of {}", line.file.display());
        while self
            .queue
            .front()
            .map_or(false, |next| next.file == line.file && next.depth == line.depth)
        {
            self.queue.pop_front();
        }
    }
}

/// Recognize a preprocessor directive. Lines like `#address-cells = <1>;` are not directives.
fn directive(text: &str) -> Option<Directive> {
    let start = text.len() - text.trim_start().len();
    let after_hash = text[start..].strip_prefix('#')?;
    let keyword_start = text.len() - after_hash.trim_start().len();

    let keyword = identifier(&text[keyword_start..])?;
    let end = keyword_start + keyword.len();

    if !DIRECTIVES.contains(&keyword) || text[end..].starts_with('-') {
        return None;
    }

    Some(Directive {
        keyword,
        args: &text[end..],
        offset: end,
        start,
    })
}

/// The identifier at the start of `text`, after leading whitespace.
fn identifier(text: &str) -> Option<&str> {
    let text = text.trim_start();
    let bytes = text.as_bytes();

    if !bytes.first().map_or(false, |&c| is_ident_start(c)) {
        return None;
    }

    let end = bytes
        .iter()
        .position(|&c| !is_ident_char(c))
        .unwrap_or(bytes.len());
    Some(&text[..end])
}

/// Remove comments from a directive's argument text, tracking unterminated block comments.
fn strip_comments(text: &str, in_comment: &mut bool) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_literal(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                out.push_str(&text[copied..i]);
                return out;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.push_str(&text[copied..i]);
                match text[i + 2..].find("*/") {
                    Some(end) => {
                        out.push(' ');
                        i += end + 4;
                        copied = i;
                    }
                    None => {
                        *in_comment = true;
                        return out;
                    }
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&text[copied..]);
    out
}

/// Track block comments on a line that is not emitted.
fn skip_comments(text: &str, in_comment: &mut bool) {
    let mut rest = text;

    loop {
        if *in_comment {
            match rest.find("*/") {
                Some(end) => {
                    *in_comment = false;
                    rest = &rest[end + 2..];
                }
                None => return,
            }
        } else {
            strip_comments(rest, in_comment);
            return;
        }
    }
}

/// Replace `defined(X)` and `defined X` with `1` or `0`.
fn replace_defined(text: &str, macros: &MacroTable) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(idx) = find_identifier(rest, "defined") {
        out.push_str(&rest[..idx]);
        let after = rest[idx + "defined".len()..].trim_start();

        let (name, after) = match after.strip_prefix('(') {
            Some(inner) => {
                let name = identifier(inner);
                let close = inner.find(')').map_or(inner.len(), |c| c + 1);
                (name, &inner[close..])
            }
            None => {
                let name = identifier(after);
                let skip = name.map_or(0, str::len) + (after.len() - after.trim_start().len());
                (name, &after[skip..])
            }
        };

        let defined = name.map_or(false, |n| macros.is_defined(n));
        out.push_str(if defined { "1" } else { "0" });
        rest = after;
    }

    out.push_str(rest);
    out
}

/// Find a whole-word identifier in `text`.
fn find_identifier(text: &str, word: &str) -> Option<usize> {
    let bytes = text.as_bytes();

    text.match_indices(word).map(|(idx, _)| idx).find(|&idx| {
        let before = idx == 0 || !is_ident_char(bytes[idx - 1]);
        let after = bytes
            .get(idx + word.len())
            .map_or(true, |&c| !is_ident_char(c));
        before && after
    })
}

/// Replace identifiers left after macro expansion with `0`, as C does in `#if`.
fn replace_identifiers(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if is_ident_start(c) && (i == 0 || !is_ident_char(bytes[i - 1])) {
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            out.push('0');
        } else if c == b'\'' {
            let end = skip_literal(bytes, i);
            out.push_str(&text[i..end]);
            i = end;
        } else if is_ident_char(c) {
            // Numeric literals, including suffixes and hex digits.
            let start = i;
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            out.push_str(&text[start..i]);
        } else {
            let len = text[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&text[i..i + len]);
            i += len;
        }
    }

    out
}
