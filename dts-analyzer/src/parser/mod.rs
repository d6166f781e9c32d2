//! Builds node entries from a preprocessed line stream.
//!
//! Terminals are recognized with the `nom` combinators in [`syntax`]. The driver in this module
//! walks the expanded text one construct at a time and always makes progress, so a malformed
//! construct produces a diagnostic without hiding the rest of the file.

mod errors;
mod syntax;

use std::{mem, ops::Range, path::Path, sync::Arc};

use log::trace;
use nom::{
    character::complete::char,
    combinator::consumed,
    sequence::{preceded, terminated, tuple},
    Slice,
};

pub use self::errors::ParseState;
use self::{
    errors::{expect, ToRange},
    syntax::{IResult, Span},
};
use crate::{
    ast::{EntryId, FileId, NodeId, PHandle, Property, PropertyValue, Value},
    context::{Context, MemReserve, NodeEntry, PropertyDeletion},
    diagnostic::Diagnostic,
    expr,
    source::{Line, Location, Position},
};

/// Parse the lines of `file` into entries of `ctx`, returning the syntax diagnostics.
pub(crate) fn parse_lines(ctx: &mut Context, file: FileId, lines: &[Line]) -> Vec<Diagnostic> {
    let mut text = String::new();
    let mut starts = Vec::with_capacity(lines.len());
    for line in lines {
        starts.push(text.len());
        text.push_str(&line.text);
        text.push('\n');
    }

    let fallback = match ctx.file(file) {
        Some(f) => f.path.clone(),
        None => Arc::from(Path::new("")),
    };

    let state = ParseState::default();
    let parser = Parser {
        ctx,
        file,
        lines,
        starts,
        input: Span::new_extra(&text, &state),
        pos: 0,
        stack: Vec::new(),
        labels: Vec::new(),
        semicolon: None,
        diagnostics: Vec::new(),
        fallback,
    };

    parser.run()
}

struct Parser<'c, 't> {
    ctx: &'c mut Context,
    file: FileId,
    lines: &'t [Line],
    /// Offset of each line in the expanded text.
    starts: Vec<usize>,
    input: Span<'t>,
    pos: usize,
    /// Open entries, innermost last.
    stack: Vec<EntryId>,
    /// Labels waiting for the node or property they belong to.
    labels: Vec<(String, Location)>,
    /// End of a construct that must be followed by a semicolon.
    semicolon: Option<usize>,
    diagnostics: Vec<Diagnostic>,
    fallback: Arc<Path>,
}

impl<'c, 't> Parser<'c, 't> {
    fn run(mut self) -> Vec<Diagnostic> {
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                break;
            };

            if let Some(end) = self.semicolon.take() {
                if c == ';' {
                    self.pos += 1;
                    continue;
                }
                self.error(end.saturating_sub(1)..end, "Missing semicolon");
            }

            self.statement(c);
        }

        if let Some(end) = self.semicolon.take() {
            self.error(end.saturating_sub(1)..end, "Missing semicolon");
        }

        while let Some(id) = self.stack.pop() {
            let end = self.location(self.pos..self.pos);
            if let Some(entry) = self.ctx.entry_mut(id) {
                let location = entry.name_location.clone();
                entry.location = entry.location.to(&end);
                self.diagnostics
                    .push(Diagnostic::error(location, "Unterminated node"));
            }
        }

        for errors::Error(range, message) in self.input.extra.take_errors() {
            let location = self.location(range);
            self.diagnostics.push(Diagnostic::error(location, message));
        }

        self.diagnostics
    }

    /// Parse one top-level or node-level construct starting with `c`.
    fn statement(&mut self, c: char) {
        if let Some((label, range)) = self.accept(syntax::label) {
            let location = self.location(range);
            self.labels.push((label.fragment().to_string(), location));
            return;
        }

        if c == '/' {
            if let Some((_, range)) = self.accept(syntax::version_keyword) {
                self.semicolon = Some(range.end);
                return;
            }
            if self.accept(syntax::memreserve_keyword).is_some() {
                return self.memreserve();
            }
            if let Some((_, range)) = self.accept(syntax::delete_node_keyword) {
                return self.delete_node(range);
            }
            if let Some((_, range)) = self.accept(syntax::delete_property_keyword) {
                return self.delete_property(range);
            }
            if self.accept(syntax::omit_if_no_ref_keyword).is_some() {
                // `/omit-if-no-ref/ &label;` at the top level stands on its own.
                if let Some((_, range)) = self.accept(preceded(syntax::ws, syntax::reference)) {
                    self.semicolon = Some(range.end);
                }
                return;
            }
            if let Some((_, range)) = self.accept(syntax::root_open) {
                return self.open_root(range);
            }
        }

        if c == '&' {
            let open = tuple((consumed(syntax::reference), syntax::ws, char('{')));
            if let Some((((span, phandle), _, _), _)) = self.accept(open) {
                let start = span.location_offset();
                return self.open_reference(phandle, start..start + span.fragment().len());
            }
        }

        let open = terminated(syntax::node_name, tuple((syntax::ws, char('{'))));
        if let Some((name, _)) = self.accept(open) {
            let start = name.location_offset();
            return self.open_node(name.fragment(), start..start + name.fragment().len());
        }

        if let Some((name, range)) = self.accept(syntax::prop_name) {
            return self.property(name.fragment(), range);
        }

        if c == '}' {
            return self.close();
        }

        let range = self.rest().to_range();
        let message = if c == ';' {
            "Unexpected ';'"
        } else {
            "Unexpected token"
        };
        self.error(range.clone(), message);
        self.pos = range.end.max(self.pos + c.len_utf8());
    }

    /* === Nodes === */

    fn open_root(&mut self, range: Range<usize>) {
        if !self.stack.is_empty() {
            self.error(range.clone(), "Root node must be at the top level");
        }

        let node = self.ctx.create_node(None, "");
        self.open_entry(node, range.start..range.start + 1, None);
    }

    fn open_reference(&mut self, phandle: PHandle, range: Range<usize>) {
        if !self.stack.is_empty() {
            self.error(range.clone(), "Node references must be at the top level");
        }

        let node = match self.ctx.lookup(&phandle) {
            Some(node) => node,
            None => {
                let message = if phandle.is_label {
                    format!("Unknown label {}", phandle)
                } else {
                    format!("Unknown node path {}", phandle.target)
                };
                self.error(range.clone(), message);
                self.ctx.placeholder(&phandle)
            }
        };

        self.open_entry(node, range, Some(phandle));
    }

    fn open_node(&mut self, name: &str, range: Range<usize>) {
        let parent = match self.current_node() {
            Some(parent) => parent,
            None => {
                self.error(range.clone(), "Node outside of root node");
                self.ctx.create_node(None, "")
            }
        };

        let node = self.ctx.create_node(Some(parent), name);
        self.open_entry(node, range, None);
    }

    fn open_entry(&mut self, node: NodeId, range: Range<usize>, reference: Option<PHandle>) {
        let id = self.ctx.next_entry_id();
        let location = self.location(range);
        let labels = mem::take(&mut self.labels);

        for (label, label_location) in &labels {
            if let Some(prev) = self.ctx.add_label(label, node, label_location.clone()) {
                self.diagnostics.push(
                    Diagnostic::error(
                        label_location.clone(),
                        format!("Duplicate label {}", label),
                    )
                    .with_related(prev, "Previous definition"),
                );
            }
        }

        trace!("{}: open entry {:?}", location, id);
        self.ctx.add_entry(NodeEntry {
            id,
            node,
            file: self.file,
            parent: self.stack.last().copied(),
            children: Vec::new(),
            properties: Vec::new(),
            deletions: Vec::new(),
            labels: labels.into_iter().map(|(label, _)| label).collect(),
            location: location.clone(),
            name_location: location,
            reference,
        });
        self.stack.push(id);
    }

    fn close(&mut self) {
        let start = self.pos;
        self.pos += 1;

        match self.stack.pop() {
            Some(id) => {
                let end = self.location(start..self.pos);
                if let Some(entry) = self.ctx.entry_mut(id) {
                    entry.location = entry.location.to(&end);
                }
                self.semicolon = Some(self.pos);
            }
            None => self.error(start..self.pos, "Unexpected '}'"),
        }
    }

    fn current_node(&self) -> Option<NodeId> {
        let id = self.stack.last()?;
        self.ctx.entry(*id).map(|e| e.node)
    }

    /* === Directives === */

    fn memreserve(&mut self) {
        let address = self.accept(preceded(syntax::ws, syntax::number));
        let size = self.accept(preceded(syntax::ws, syntax::number));
        let start = address.as_ref().map_or(self.pos, |(_, r)| r.start);

        let values = address.zip(size).and_then(|((a, _), (s, _))| {
            Some((
                expr::literal_value(a.fragment().trim())?.0,
                expr::literal_value(s.fragment().trim())?.0,
            ))
        });

        match values {
            Some((address, size)) => {
                let location = self.location(start..self.pos);
                self.ctx.add_memreserve(
                    self.file,
                    MemReserve {
                        address,
                        size,
                        location,
                    },
                );
            }
            None => {
                let range = self.rest().to_range();
                self.error(range, "Expected address and size");
            }
        }

        self.semicolon = Some(self.pos);
    }

    fn delete_node(&mut self, keyword: Range<usize>) {
        self.skip_ws();

        if let Some((phandle, range)) = self.accept(syntax::reference) {
            match self.ctx.lookup(&phandle) {
                Some(node) => {
                    let location = self.location(keyword.start..range.end);
                    self.ctx.delete_node(node, self.file, location);
                }
                None => self.error(range, format!("Unknown label {}", phandle)),
            }
        } else if let Some((name, range)) = self.accept(syntax::node_name) {
            let target = self.current_node().and_then(|parent| {
                let parent = self.ctx.node_ref(parent)?;
                let path = match parent.path() {
                    "/" => format!("/{}", name.fragment()),
                    p => format!("{}/{}", p, name.fragment()),
                };
                self.ctx.node_by_path(&path).map(|n| n.id())
            });

            match target {
                Some(node) => {
                    let location = self.location(keyword.start..range.end);
                    self.ctx.delete_node(node, self.file, location);
                }
                None if self.stack.is_empty() => {
                    self.error(range, "Deleting a node by name must happen inside its parent")
                }
                None => self.error(range, format!("Unknown node {}", name.fragment())),
            }
        } else {
            let range = self.rest().to_range();
            self.error(range, "Expected node name or reference");
        }

        self.semicolon = Some(self.pos);
    }

    fn delete_property(&mut self, keyword: Range<usize>) {
        self.skip_ws();

        match self.accept(syntax::prop_name) {
            Some((name, range)) => {
                let location = self.location(keyword.start..range.end);
                match self.stack.last().copied() {
                    Some(id) => {
                        if let Some(entry) = self.ctx.entry_mut(id) {
                            entry.deletions.push(PropertyDeletion {
                                name: name.fragment().to_string(),
                                location,
                                index: entry.properties.len(),
                            });
                        }
                    }
                    None => self.error(range, "Deleting a property must happen inside a node"),
                }
            }
            None => {
                let range = self.rest().to_range();
                self.error(range, "Expected property name");
            }
        }

        self.semicolon = Some(self.pos);
    }

    /* === Properties === */

    fn property(&mut self, name: &str, range: Range<usize>) {
        let labels = mem::take(&mut self.labels);
        let name_location = self.location(range.clone());

        self.skip_ws();
        let (values, end) = if self.peek() == Some('=') {
            self.pos += 1;
            self.values()
        } else {
            let value = PropertyValue::new(Value::Boolean, name_location.clone());
            (vec![value], range.end)
        };
        let end = end.max(range.end);

        let location = self.location(range.start..end);
        self.semicolon = Some(end);

        let Some(id) = self.stack.last().copied() else {
            self.error(range, "Property outside of node");
            return;
        };

        if let Some(entry) = self.ctx.entry_mut(id) {
            entry.properties.push(Property {
                name: name.to_string(),
                values,
                labels: labels.into_iter().map(|(label, _)| label).collect(),
                entry: id,
                location,
                name_location,
            });
        }
    }

    /// Parse a comma separated list of values, returning them with the end of the last one.
    fn values(&mut self) -> (Vec<PropertyValue>, usize) {
        let mut values = Vec::new();
        let mut end = self.pos;

        loop {
            self.skip_ws();

            match self.value() {
                Some(value) => {
                    values.push(value);
                    end = self.pos;
                }
                None => {
                    self.recover();
                    end = end.max(self.pos);
                }
            }

            self.skip_ws();
            if self.peek() == Some(',') {
                self.pos += 1;
            } else {
                break;
            }
        }

        (values, end)
    }

    fn value(&mut self) -> Option<PropertyValue> {
        let start = self.pos;

        let value = match self.peek() {
            Some('<') => return self.cells(None),
            Some('[') => return self.bytes(),
            Some('"') => {
                let Some((s, _)) = self.accept(syntax::string_literal) else {
                    let range = self.rest().to_range();
                    self.error(range, "Unterminated string");
                    return None;
                };
                Value::String(syntax::unescape(s.fragment()))
            }
            Some('&') => {
                let Some((phandle, _)) = self.accept(syntax::reference) else {
                    let range = self.rest().to_range();
                    self.error(range, "Expected label or path after '&'");
                    return None;
                };
                Value::PHandle(phandle)
            }
            Some('/') if self.rest().fragment().starts_with("/bits/") => return self.bits(),
            _ => {
                let range = self.rest().to_range();
                self.error(range, "Invalid property value");
                return None;
            }
        };

        Some(PropertyValue::new(value, self.location(start..self.pos)))
    }

    /// Parse `/bits/ N < ... >`.
    fn bits(&mut self) -> Option<PropertyValue> {
        self.accept(syntax::bits_keyword)?;

        let bits = match self.accept(preceded(syntax::ws, syntax::number)) {
            Some((n, range)) => match expr::literal_value(n.fragment()) {
                Some((n @ (8 | 16 | 32 | 64), _)) => n as u32,
                _ => {
                    self.error(range, "Bit width must be 8, 16, 32 or 64");
                    32
                }
            },
            None => {
                let range = self.rest().to_range();
                self.error(range, "Expected bit width");
                return None;
            }
        };

        self.skip_ws();
        if self.peek() != Some('<') {
            let range = self.rest().to_range();
            self.error(range, "Expected '<'");
            return None;
        }

        self.cells(Some(bits))
    }

    /// Parse a `< ... >` cell array.
    fn cells(&mut self, bits: Option<u32>) -> Option<PropertyValue> {
        let start = self.pos;
        self.pos += 1;

        let mut cells = Vec::new();
        loop {
            self.skip_ws();

            let cell = if let Some((phandle, range)) = self.accept(syntax::reference) {
                (Value::PHandle(phandle), range)
            } else if let Some((raw, range)) = self.accept(syntax::parens) {
                let inner = &raw.fragment()[1..raw.fragment().len() - 1];
                let value = match expr::evaluate(inner) {
                    Ok(value) => value,
                    Err(e) => {
                        self.error(range.clone(), e.to_string());
                        0
                    }
                };
                let raw = inner.trim().to_string();
                (Value::Expression { raw, value }, range)
            } else if let Some((n, range)) = self.accept(syntax::number) {
                match expr::literal_value(n.fragment()) {
                    Some((value, hex)) => (Value::Integer { value, hex }, range),
                    None => {
                        self.error(range.clone(), format!("Invalid number {}", n.fragment()));
                        (Value::Integer { value: 0, hex: false }, range)
                    }
                }
            } else if let Some((c, range)) = self.accept(syntax::char_literal) {
                let value = syntax::unescape(c.fragment())
                    .chars()
                    .next()
                    .map_or(0, |c| c as i64);
                (Value::Integer { value, hex: false }, range)
            } else {
                break;
            };

            // Cells are 32 bits wide unless `/bits/` says otherwise.
            let width = bits.unwrap_or(32);
            if let Some(value) = cell.0.as_int() {
                if width < 64 && (value < -(1 << (width - 1)) || value >= (1 << width)) {
                    self.error(cell.1.clone(), format!("Value does not fit in {} bits", width));
                }
            }

            let location = self.location(cell.1);
            cells.push(PropertyValue::new(cell.0, location));
        }

        match self.peek() {
            Some('>') | Some(';') | Some('}') | None => {
                self.accept(expect(char('>'), "Expected '>'"));
            }
            Some(_) => {
                let range = self.rest().to_range();
                self.error(range, "Invalid cell");
                return None;
            }
        }

        let location = self.location(start..self.pos);
        Some(PropertyValue::new(Value::CellArray(cells), location))
    }

    /// Parse a `[ ... ]` byte string.
    fn bytes(&mut self) -> Option<PropertyValue> {
        let start = self.pos;
        self.pos += 1;

        let mut bytes = Vec::new();
        loop {
            self.skip_ws();
            match self.accept(syntax::hex_byte) {
                Some((byte, _)) => bytes.push(byte),
                None => break,
            }
        }

        match self.peek() {
            Some(']') | Some(';') | Some('}') | None => {
                self.accept(expect(char(']'), "Expected ']'"));
            }
            Some(_) => {
                let range = self.rest().to_range();
                self.error(range, "Invalid byte");
                return None;
            }
        }

        let location = self.location(start..self.pos);
        Some(PropertyValue::new(Value::ByteString(bytes), location))
    }

    /// Skip the rest of a broken value, up to the next `,`, `;` or `}`.
    fn recover(&mut self) {
        let rest = self.rest();
        let skip = rest
            .fragment()
            .find(|c: char| c == ',' || c == ';' || c == '}')
            .unwrap_or(rest.fragment().len());
        self.pos += skip;
    }

    /* === Input handling === */

    fn rest(&self) -> Span<'t> {
        self.input.slice(self.pos..)
    }

    fn peek(&self) -> Option<char> {
        self.rest().fragment().chars().next()
    }

    /// Run `parser` at the current position, advancing past what it consumed if it succeeds.
    fn accept<O>(
        &mut self,
        mut parser: impl FnMut(Span<'t>) -> IResult<'t, O>,
    ) -> Option<(O, Range<usize>)> {
        let start = self.pos;
        let (rest, output) = parser(self.rest()).ok()?;
        self.pos = rest.location_offset();
        Some((output, start..self.pos))
    }

    fn skip_ws(&mut self) {
        self.accept(syntax::ws);

        if self.rest().fragment().starts_with("/*") {
            self.error(self.pos..self.pos + 2, "Unterminated comment");
            self.pos = self.input.fragment().len();
        }
    }

    fn error(&mut self, range: Range<usize>, message: impl Into<String>) {
        let location = self.location(range);
        self.diagnostics.push(Diagnostic::error(location, message));
    }

    /// Line index and column of an offset in the expanded text.
    fn position(&self, offset: usize) -> (usize, usize) {
        let idx = self
            .starts
            .partition_point(|&s| s <= offset)
            .saturating_sub(1);
        (idx, offset - self.starts[idx])
    }

    /// Map a range in the expanded text back to the source the user wrote.
    fn location(&self, range: Range<usize>) -> Location {
        if self.lines.is_empty() {
            return Location::file_start(self.fallback.clone());
        }

        let (start_idx, start_col) = self.position(range.start);
        let (end_idx, end_col) = if range.end > range.start {
            let (idx, col) = self.position(range.end - 1);
            (idx, col + 1)
        } else {
            (start_idx, start_col)
        };

        let first = &self.lines[start_idx];
        let last = &self.lines[end_idx];

        let start = Position::new(first.number, first.raw_column(start_col, false));
        let end = if last.file == first.file && last.number >= first.number {
            Position::new(last.number, last.raw_column(end_col, true))
        } else {
            Position::new(first.number, first.raw.len())
        };

        Location::new(first.file.clone(), start, end.max(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{ast::ValueType, config::Config, source::MemoryProvider};

    fn parse(text: &str) -> (Context, Vec<Diagnostic>) {
        let provider = MemoryProvider::new().with("test.dts", text);
        let mut ctx = Context::with_provider(Config::default(), Box::new(provider));
        ctx.set_board("test.dts");
        let diagnostics = ctx.parse();
        (ctx, diagnostics)
    }

    fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn parse_nodes_and_properties() {
        let (ctx, diagnostics) = parse(
            "/dts-v1/;\n\
             / {\n\
             \t#address-cells = <1>;\n\
             \tmodel = \"Board\";\n\
             \tsoc {\n\
             \t\tuart0: uart@4000 {\n\
             \t\t\treg = <0x4000 0x100>;\n\
             \t\t\tstatus = \"okay\";\n\
             \t\t\tbytes = [01 0203];\n\
             \t\t\tcurrent-speed = <(115200 * 2)>;\n\
             \t\t\twakeup-source;\n\
             \t\t};\n\
             \t};\n\
             };\n",
        );

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let uart = ctx.node("&uart0").unwrap();
        assert_eq!(uart.path(), "/soc/uart@4000");
        assert_eq!(uart.address(), Some("4000"));
        assert_eq!(uart.unit_address(), Some(0x4000));
        assert_eq!(uart.labels(), vec!["uart0"]);

        for (name, expected) in [
            ("reg", ValueType::Array),
            ("status", ValueType::String),
            ("bytes", ValueType::Uint8Array),
            ("current-speed", ValueType::Int),
            ("wakeup-source", ValueType::Boolean),
        ] {
            assert_eq!(uart.property(name).map(Property::value_type), Some(expected), "{name}");
        }

        assert_eq!(uart.property("current-speed").and_then(Property::number), Some(230400));
        assert_eq!(
            uart.property("bytes").map(|p| p.values[0].value.clone()),
            Some(Value::ByteString(vec![1, 2, 3]))
        );

        let reg = uart.property("reg").unwrap();
        assert_eq!(reg.name_location.start, Position::new(6, 3));
        assert_eq!(reg.name_location.end, Position::new(6, 6));

        let entry = uart.entries()[0];
        assert_eq!(entry.location.start, Position::new(5, 9));
        assert_eq!(entry.location.end, Position::new(11, 3));
    }

    #[test]
    fn parse_references_and_extensions() {
        let (ctx, diagnostics) = parse(
            "/ {\n\
             \tgpio0: gpio@1000 { #gpio-cells = <2>; };\n\
             \tled { gpios = <&gpio0 3 0>, <&{/gpio@1000} 4 1>; label = &gpio0; };\n\
             };\n\
             &gpio0 { ngpios = <16>; };\n\
             &{/led} { extra; };\n",
        );

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let gpio = ctx.node("/gpio@1000").unwrap();
        assert_eq!(gpio.entries().len(), 2);
        assert_eq!(gpio.property("ngpios").and_then(Property::number), Some(16));

        let led = ctx.node("/led").unwrap();
        let gpios = led.property("gpios").unwrap();
        assert_eq!(gpios.value_type(), ValueType::PHandleArray);
        assert_eq!(
            gpios.phandles().into_iter().map(|(p, _)| p.clone()).collect::<Vec<_>>(),
            vec![PHandle::label("gpio0"), PHandle::path("/gpio@1000")]
        );
        assert_eq!(led.property("label").map(Property::value_type), Some(ValueType::PHandle));
        assert!(led.has_property("extra"));
    }

    #[test]
    fn report_syntax_errors() {
        let (ctx, diagnostics) = parse(
            "/ {\n\
             \ta = <1 2>\n\
             \tb = <1 foo 2>, \"ok\";\n\
             \tc = <(1 / 0)>;\n\
             \td = [0g];\n\
             \t@@@\n\
             };\n\
             &missing { x; };\n\
             / {\n\
             \tnode {\n",
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Missing semicolon",
                "Invalid cell",
                "Division by zero",
                "Invalid byte",
                "Unexpected token",
                "Unknown label &missing",
                "Unterminated node",
                "Unterminated node",
            ]
        );

        // Parsing continued after each error.
        let root = ctx.root().unwrap();
        assert!(root.has_property("a"));
        assert!(root.has_property("d"));
        assert!(ctx.node("&{/node}").is_some());

        let missing = ctx.nodes().find(|n| n.node().placeholder).unwrap();
        assert_eq!(missing.path(), "&missing");
        assert!(missing.has_property("x"));
    }

    #[test]
    fn duplicate_labels() {
        let (_, diagnostics) = parse("/ {\n\tl: a {};\n\tl: b {};\n\tm: a {};\n};\n");

        assert_eq!(messages(&diagnostics), vec!["Duplicate label l"]);
        assert_eq!(diagnostics[0].location.start.line, 2);
        assert_eq!(diagnostics[0].related[0].location.start.line, 1);
    }

    #[test]
    fn delete_nodes_and_properties() {
        let (ctx, diagnostics) = parse(
            "/ {\n\
             \tl: a { x; y; /delete-property/ x; z; };\n\
             \tb { };\n\
             \tc { };\n\
             \t/delete-node/ b;\n\
             };\n\
             /delete-node/ &l;\n\
             / { c { /delete-property/ unknown; }; };\n",
        );

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert!(ctx.node("/a").unwrap().is_deleted());
        assert!(ctx.node("/b").unwrap().is_deleted());
        assert!(!ctx.node("/c").unwrap().is_deleted());

        let names: Vec<&str> = ctx
            .node("/a")
            .unwrap()
            .unique_properties()
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["y", "z"]);

        let children: Vec<&str> = ctx.root().unwrap().children().iter().map(|c| c.name()).collect();
        assert_eq!(children, vec!["c"]);
    }

    #[test]
    fn bits_and_memreserve() {
        let (ctx, diagnostics) = parse(
            "/memreserve/ 0x1000 0x100;\n\
             / {\n\
             \ta = /bits/ 8 <0x12 0x34>;\n\
             \tb = /bits/ 8 <0x1234>;\n\
             \tc = /bits/ 12 <1>;\n\
             \td = <0xffffffff 0x100000000>;\n\
             \te = /bits/ 64 <0x100000000>;\n\
             };\n",
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Value does not fit in 8 bits",
                "Bit width must be 8, 16, 32 or 64",
                "Value does not fit in 32 bits",
            ]
        );
        assert_eq!(diagnostics[2].location.start.line, 5);
        assert_eq!(ctx.files()[0].memreserves.len(), 1);
        assert_eq!(ctx.files()[0].memreserves[0].address, 0x1000);
        assert_eq!(
            ctx.root().unwrap().property("a").and_then(Property::numbers),
            Some(vec![0x12, 0x34])
        );
    }

    #[test]
    fn locations_follow_macros() {
        let (ctx, diagnostics) = parse(
            "#define BASE 0x40001000\n\
             #define SIZE(n) ((n) * 0x100)\n\
             / {\n\
             \tn@40001000 { reg = <BASE SIZE(4)>; };\n\
             };\n",
        );

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);

        let reg = ctx.node("/n@40001000").unwrap().property("reg").unwrap();
        assert_eq!(reg.numbers(), Some(vec![0x40001000, 0x400]));

        let cells: Vec<&PropertyValue> = reg.cells().collect();
        assert_eq!(cells[0].location.start, Position::new(3, 21));
        assert_eq!(cells[0].location.end, Position::new(3, 25));
        assert_eq!(cells[1].location.start, Position::new(3, 26));
        assert_eq!(cells[1].location.end, Position::new(3, 33));
    }
}
