//! Semantic checks over a parsed and typed context.
//!
//! ## Rules
//!
//! - **Entries**: references must resolve, phandle-array specifiers must have the cell count the
//!   referenced node declares, properties must be declared by the node's type with a matching
//!   value type and satisfy `enum`/`const`, shadowed definitions are hints, empty `&label { };`
//!   extensions are hints.
//! - **Nodes**: `reg` layout and unit address, `compatible`, `interrupts` vs
//!   `interrupts-extended`, `#<name>-cells` ranges, `ranges`, specifier maps, `-names` lengths,
//!   `aliases`/`chosen`/`cpus` placement, unit addresses without `reg`, sibling address
//!   collisions, bus placement, SPI chip selects and required properties.
//! - **GPIO**: pins used by more than one node.
//!
//! Checks that depend on the node type are skipped for nodes whose type didn't resolve.

mod address;
mod gpio;
mod nexus;

use log::info;

use crate::{
    ast::{PHandle, Property, Value, ValueType},
    context::{Context, NodeRef, MAX_CELLS},
    diagnostic::Diagnostic,
    source::Location,
    types::{NodeType, Scalar},
};

/// Run every check over `ctx`, attaching pin tables to GPIO controllers.
pub fn lint(ctx: &mut Context) -> Vec<Diagnostic> {
    let order = ctx.walk();

    let mut linter = Linter {
        ctx: &*ctx,
        diagnostics: Vec::new(),
    };
    for id in &order {
        if let Some(node) = linter.ctx.node_ref(*id) {
            linter.check_entries(node);
            linter.check_node(node);
        }
    }
    let mut diagnostics = linter.diagnostics;

    let pins = gpio::assign_pins(ctx, &order, &mut diagnostics);
    for (controller, table) in pins {
        if let Some(node) = ctx.node_mut(controller) {
            node.pins = table;
        }
    }

    info!("lint: {} diagnostics", diagnostics.len());
    diagnostics
}

struct Linter<'a> {
    ctx: &'a Context,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Linter<'a> {
    fn error(&mut self, location: &Location, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(location.clone(), message));
    }

    fn warning(&mut self, location: &Location, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(location.clone(), message));
    }

    fn info(&mut self, location: &Location, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::info(location.clone(), message));
    }

    fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// The type of `node`, unless it failed to resolve.
    fn node_type(node: NodeRef<'a>) -> Option<&'a NodeType> {
        node.node_type().map(|t| t.as_ref())
    }

    /* === Entry checks === */

    fn check_entries(&mut self, node: NodeRef<'a>) {
        let exempt = self.ctx.config.is_exempt(node.name());

        for entry in node.entries() {
            for prop in &entry.properties {
                self.check_references(prop);
                nexus::check_specifiers(self, node, prop);

                if !exempt {
                    if let Some(ty) = Self::node_type(node) {
                        self.check_declaration(ty, prop);
                    }
                }
            }

            let empty = entry.properties.is_empty()
                && entry.children.is_empty()
                && entry.deletions.is_empty();
            if let (true, Some(reference)) = (empty, &entry.reference) {
                self.push(Diagnostic::hint(
                    entry.location.clone(),
                    format!("Empty extension of {}", reference),
                ));
            }
        }

        for (shadowed, by) in node.fold().shadowed {
            self.push(
                Diagnostic::hint(
                    shadowed.location.clone(),
                    format!("Redundant definition of {}", shadowed.name),
                )
                .with_related(by.location.clone(), "Overridden here"),
            );
        }
    }

    fn check_references(&mut self, prop: &Property) {
        for (phandle, location) in prop.phandles() {
            if self.ctx.lookup(phandle).is_none() {
                self.error(location, unknown_reference(phandle));
            }
        }
    }

    fn check_declaration(&mut self, ty: &NodeType, prop: &Property) {
        let Some(declared) = ty.property(&prop.name) else {
            self.warning(
                &prop.name_location,
                format!("Property {} is not declared by {}", prop.name, ty.name),
            );
            return;
        };

        if declared.deprecated {
            self.warning(
                &prop.name_location,
                format!("Property {} is deprecated", prop.name),
            );
        }

        let actual = prop.value_type();
        if !declared.types.is_empty() && !declared.types.iter().any(|t| t.accepts(actual)) {
            let expected: Vec<String> = declared.types.iter().map(ToString::to_string).collect();
            self.error(
                &prop.location,
                format!(
                    "Property {} has type {}, expected {}",
                    prop.name,
                    actual,
                    expected.join(" or ")
                ),
            );
            return;
        }

        let value = match (prop.number(), prop.string()) {
            (Some(n), _) => Scalar::Int(n),
            (None, Some(s)) => Scalar::Str(s.to_string()),
            _ => return,
        };

        if let Some(allowed) = &declared.enumeration {
            if !allowed.contains(&value) {
                let allowed: Vec<String> = allowed.iter().map(ToString::to_string).collect();
                self.error(
                    &prop.location,
                    format!("Value {} is not one of {}", value, allowed.join(", ")),
                );
            }
        }

        if let Some(constant) = &declared.constant {
            if *constant != value {
                self.error(&prop.location, format!("Value must be {}", constant));
            }
        }
    }

    /* === Node checks === */

    fn check_node(&mut self, node: NodeRef<'a>) {
        let Some(location) = node.location() else {
            return;
        };

        address::check_reg(self, node);
        address::check_ranges(self, node);
        address::check_collisions(self, node);
        nexus::check_maps(self, node);
        self.check_compatible(node);
        self.check_interrupts(node);
        self.check_cell_counts(node);
        self.check_names(node);
        self.check_special_nodes(node, location);
        self.check_unit_address(node);

        if Self::node_type(node).is_some() {
            self.check_bus(node, location);
            self.check_required(node, location);
        }
    }

    fn check_compatible(&mut self, node: NodeRef<'a>) {
        let Some(prop) = node.property("compatible") else {
            return;
        };

        if prop.strings().is_none() {
            self.error(&prop.location, "compatible must be a list of strings");
            return;
        }

        let resolved = Self::node_type(node).is_some();
        for value in &prop.values {
            let Value::String(compatible) = &value.value else {
                continue;
            };

            let broken = node.node().broken_bindings.iter().find(|(c, _)| c == compatible);
            if let Some((_, reason)) = broken {
                let message = if resolved {
                    format!("Binding for {} failed to load: {}", compatible, reason)
                } else {
                    format!("Unknown node type {}: {}", compatible, reason)
                };
                self.error(&value.location, message);
                continue;
            }

            if !node.node().unknown_compatibles.contains(compatible) {
                continue;
            }

            if resolved {
                self.info(&value.location, format!("No binding for {}", compatible));
            } else {
                self.error(&value.location, format!("Unknown node type {}", compatible));
            }
        }
    }

    fn check_interrupts(&mut self, node: NodeRef<'a>) {
        if let (Some(_), Some(extended)) = (
            node.property("interrupts"),
            node.property("interrupts-extended"),
        ) {
            self.error(
                &extended.name_location,
                "interrupts and interrupts-extended are mutually exclusive",
            );
        }
    }

    /// `#<name>-cells` must be a small count.
    fn check_cell_counts(&mut self, node: NodeRef<'a>) {
        for prop in node.unique_properties() {
            if !(prop.name.starts_with('#') && prop.name.ends_with("-cells")) {
                continue;
            }
            let Some(count) = prop.number() else {
                continue;
            };

            if node.cells(&prop.name).is_none() {
                self.error(
                    &prop.location,
                    format!(
                        "Invalid {} {}, expected 0 to {}",
                        prop.name, count, MAX_CELLS
                    ),
                );
            }
        }
    }

    /// `<id>-names` must name every entry of its counterpart.
    fn check_names(&mut self, node: NodeRef<'a>) {
        for prop in node.unique_properties() {
            let Some(id) = prop.name.strip_suffix("-names") else {
                continue;
            };
            let Some(names) = prop.strings() else {
                continue;
            };

            let Some((counterpart, entries)) = self.named_entries(node, id) else {
                continue;
            };

            if names.len() != entries {
                self.error(
                    &prop.location,
                    format!(
                        "{} has {} names, but {} has {} entries",
                        prop.name,
                        names.len(),
                        counterpart,
                        entries
                    ),
                );
            }
        }
    }

    /// The property `<id>-names` describes, and its number of entries.
    fn named_entries(&self, node: NodeRef<'a>, id: &str) -> Option<(String, usize)> {
        // pinctrl-0, pinctrl-1, ...
        let numbered = (0..)
            .take_while(|n| node.has_property(&format!("{}-{}", id, n)))
            .count();
        if numbered > 0 {
            return Some((format!("{}-0..{}", id, numbered - 1), numbered));
        }

        let prop = node
            .property(&format!("{}s", id))
            .or_else(|| node.property(id))?;

        let phandles = prop.phandles().len();
        if phandles > 0 {
            return Some((prop.name.clone(), phandles));
        }

        let cells = prop.numbers()?.len();
        let per_entry = if prop.name == "reg" {
            let parent = node.parent()?;
            parent.address_cells() + parent.size_cells()
        } else {
            self.specifier_parent(node, id)?
                .cells(&format!("#{}-cells", id))
                .unwrap_or(1)
        };

        if per_entry == 0 {
            return None;
        }
        Some((prop.name.clone(), cells / per_entry))
    }

    /// The node named by `<id>-parent` on `node` or its closest ancestor that has one.
    fn specifier_parent(&self, node: NodeRef<'a>, id: &str) -> Option<NodeRef<'a>> {
        let name = format!("{}-parent", id);
        let mut current = Some(node);

        while let Some(n) = current {
            if let Some(phandle) = n.property(&name).and_then(Property::phandle) {
                return self.ctx.lookup(phandle).and_then(|id| self.ctx.node_ref(id));
            }
            current = n.parent();
        }

        None
    }

    fn check_special_nodes(&mut self, node: NodeRef<'a>, location: &Location) {
        let at_root = node.parent().map_or(false, |p| p.path() == "/");

        match node.name() {
            "cpus" if !at_root => {
                self.error(location, "cpus must be a child of the root node");
            }
            name @ ("aliases" | "chosen") => {
                if !at_root {
                    self.error(location, format!("{} must be a child of the root node", name));
                }

                for child in node.children() {
                    if let Some(child_location) = child.location() {
                        self.error(child_location, format!("{} can't have child nodes", name));
                    }
                }

                for prop in node.unique_properties() {
                    self.check_node_reference(prop);
                }
            }
            _ => {}
        }
    }

    /// Properties of `aliases` and `chosen` each reference a single node.
    fn check_node_reference(&mut self, prop: &Property) {
        match prop.values.as_slice() {
            [value] => match &value.value {
                Value::PHandle(_) => {}
                Value::String(path) => {
                    if self.ctx.node(path).is_none() {
                        self.error(&value.location, format!("Unknown node {}", path));
                    }
                }
                _ => self.error(&prop.location, "Expected a reference to a node"),
            },
            _ => self.error(&prop.location, "Expected a single reference to a node"),
        }
    }

    fn check_unit_address(&mut self, node: NodeRef<'a>) {
        let Some(address) = node.address() else {
            return;
        };
        if node.has_property("reg") || node.has_property("ranges") {
            return;
        }

        // Point at the `@address` part of the first named entry.
        let Some(entry) = node.entries().into_iter().find(|e| e.reference.is_none()) else {
            return;
        };
        let name = &entry.name_location;
        let end = name.end.column;
        let start = end.saturating_sub(address.len() + 1);
        let suffix = Location::on_line(name.file.clone(), name.start.line, start..end);

        self.push(
            Diagnostic::warning(
                name.clone(),
                "Node has a unit address, but no reg or ranges property",
            )
            .with_fix(suffix, ""),
        );
    }

    fn check_bus(&mut self, node: NodeRef<'a>, location: &Location) {
        let parent = node.parent();
        let parent_type = parent.and_then(Self::node_type);

        if let Some(bus) = Self::node_type(node).and_then(|t| t.on_bus.as_ref()) {
            if !parent_type.map_or(false, |t| t.is_bus(bus)) {
                let parent = parent.map_or("/", |p| p.path());
                self.error(
                    location,
                    format!("Node must be on a {} bus, but {} isn't a {} controller", bus, parent, bus),
                );
            }
        }

        if let (Some(parent), Some(true)) = (parent, parent_type.map(|t| t.is_bus("spi"))) {
            self.check_chip_select(node, parent, location);
        }
    }

    /// SPI devices select their chip select line with `reg`.
    fn check_chip_select(&mut self, node: NodeRef<'a>, parent: NodeRef<'a>, location: &Location) {
        let Some(reg) = node.property("reg") else {
            self.error(location, "SPI devices need a reg property with their chip select");
            return;
        };
        let Some(cs) = reg.numbers().and_then(|n| n.first().copied()) else {
            self.error(&reg.location, "Chip select must be a number");
            return;
        };

        let available = parent
            .property("cs-gpios")
            .map_or(0, |p| p.phandles().len());
        if cs < 0 || cs as usize >= available {
            self.error(
                &reg.location,
                format!(
                    "Chip select {} has no entry in cs-gpios of {} ({} entries)",
                    cs,
                    parent.path(),
                    available
                ),
            );
        }
    }

    fn check_required(&mut self, node: NodeRef<'a>, location: &Location) {
        let Some(ty) = Self::node_type(node) else {
            return;
        };

        let enabled = node.enabled();
        for prop in ty.properties.iter().filter(|p| p.required) {
            if node.has_property(&prop.name) {
                continue;
            }

            let message = format!("Missing required property {}", prop.name);
            if enabled {
                self.error(location, message);
            } else {
                self.info(location, message);
            }
        }
    }
}

fn unknown_reference(phandle: &PHandle) -> String {
    if phandle.is_label {
        format!("Unknown label {}", phandle)
    } else {
        format!("Unknown node path {}", phandle.target)
    }
}

/// The `#<specifier>-cells` specifier of a phandle-array property name.
fn specifier(name: &str) -> Option<String> {
    match name {
        "gpios" => return Some("gpio".to_string()),
        "interrupts-extended" => return Some("interrupt".to_string()),
        _ if name.ends_with("-gpios") => return Some("gpio".to_string()),
        _ => {}
    }

    let singular = name
        .strip_suffix("es")
        .filter(|s| s.ends_with('x') || s.ends_with("sh") || s.ends_with("ch"))
        .or_else(|| name.strip_suffix('s'))?;
    Some(singular.to_string())
}

/// Whether `value_type` can carry specifiers.
fn has_specifiers(value_type: ValueType) -> bool {
    matches!(value_type, ValueType::PHandleArray)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        config::Config,
        diagnostic::Severity,
        source::MemoryProvider,
        types::{resolve_types, TypeLoader},
    };

    pub(super) fn run(text: &str, bindings: &[(&str, &str)]) -> (Context, Vec<Diagnostic>) {
        let provider = MemoryProvider::new().with("board.dts", text);
        let mut ctx = Context::with_provider(Config::default(), Box::new(provider));
        ctx.set_board("board.dts");
        let parse_errors = ctx.parse();
        assert!(parse_errors.is_empty(), "{:?}", parse_errors);

        let mut loader = TypeLoader::new();
        for (name, text) in bindings {
            loader.add_binding_str(name, *text);
        }
        resolve_types(&mut ctx, &mut loader);

        let diagnostics = lint(&mut ctx);
        (ctx, diagnostics)
    }

    /// Messages, without warnings about undeclared properties.
    pub(super) fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics
            .iter()
            .map(|d| d.message.as_str())
            .filter(|m| !m.contains("is not declared"))
            .collect()
    }

    #[test]
    fn property_specifiers() {
        for (name, expected) in [
            ("gpios", Some("gpio")),
            ("cs-gpios", Some("gpio")),
            ("pwms", Some("pwm")),
            ("clocks", Some("clock")),
            ("mboxes", Some("mbox")),
            ("interrupts-extended", Some("interrupt")),
            ("phys", Some("phy")),
            ("reg", None),
        ] {
            assert_eq!(specifier(name).as_deref(), expected, "{name}");
        }
    }

    #[test]
    fn shadowed_properties() {
        let (_, diagnostics) = run("/ {\n\tn { a = <1>; };\n\tn { a = <2>; b = <3>; };\n};\n", &[]);

        let hints: Vec<&Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Hint)
            .collect();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].message, "Redundant definition of a");
        assert_eq!(hints[0].location.start.line, 1);
        assert_eq!(hints[0].related[0].location.start.line, 2);
    }

    #[test]
    fn declarations_and_values() {
        let binding = "compatible: vnd,dev\nproperties:\n  \
                       mode:\n    type: int\n    enum: [1, 2]\n  \
                       name:\n    type: string\n    const: dev\n  \
                       clock-frequency:\n    type: int\n    required: true\n";

        let (_, diagnostics) = run(
            "/ {\n\
             \ta { compatible = \"vnd,dev\"; mode = <3>; name = \"other\"; extra; \
             clock-frequency = \"fast\"; };\n\
             \tb { compatible = \"vnd,dev\"; status = \"disabled\"; };\n\
             \tc { compatible = \"vnd,dev\"; status = \"broken\"; clock-frequency = <1>; };\n\
             \td { compatible = \"vnd,missing\"; anything; };\n\
             \te { compatible = \"vnd,dev\"; };\n\
             };\n",
            &[("vnd,dev", binding)],
        );

        let all: Vec<&str> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(
            all,
            vec![
                "Value 3 is not one of 1, 2",
                "Value must be \"dev\"",
                "Property extra is not declared by vnd,dev",
                "Property clock-frequency has type string, expected int",
                "Missing required property clock-frequency",
                "Value \"broken\" is not one of \"okay\", \"ok\", \"disabled\", \"reserved\", \
                 \"fail\", \"fail-sss\"",
                "Unknown node type vnd,missing",
                "Missing required property clock-frequency",
            ]
        );

        let missing: Vec<Severity> = diagnostics
            .iter()
            .filter(|d| d.message.starts_with("Missing required"))
            .map(|d| d.severity)
            .collect();
        assert_eq!(missing, vec![Severity::Information, Severity::Error]);
    }

    #[test]
    fn broken_bindings() {
        let (_, diagnostics) = run(
            "/ {\n\
             \ta { compatible = \"vnd,bad\"; };\n\
             \tb { compatible = \"vnd,bad\", \"vnd,ok\"; };\n\
             };\n",
            &[("vnd,bad", "compatible: ["), ("vnd,ok", "compatible: vnd,ok\n")],
        );

        let broken: Vec<(&str, Severity, usize)> = diagnostics
            .iter()
            .filter(|d| d.message.contains("vnd,bad"))
            .map(|d| (d.message.as_str(), d.severity, d.location.start.line))
            .collect();
        assert_eq!(broken.len(), 2, "{:?}", diagnostics);

        for ((message, severity, line), (prefix, expected_line)) in broken.into_iter().zip([
            ("Unknown node type vnd,bad: invalid binding vnd,bad.yaml", 1),
            ("Binding for vnd,bad failed to load: invalid binding vnd,bad.yaml", 2),
        ]) {
            assert!(message.starts_with(prefix), "{message}");
            assert_eq!(severity, Severity::Error);
            assert_eq!(line, expected_line);
        }
    }

    #[test]
    fn references_and_extensions() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tl: a { #interrupt-cells = <1>; };\n\
             \tb { x = <&l>; y = <&nope>; z = &{/missing}; };\n\
             \tc { interrupts = <1>; interrupts-extended = <&l 1>; };\n\
             };\n\
             &l { };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Empty extension of &l",
                "Unknown label &nope",
                "Unknown node path /missing",
                "interrupts and interrupts-extended are mutually exclusive",
            ]
        );
    }

    #[test]
    fn names_match_entries() {
        let (_, diagnostics) = run(
            "/ {\n\
             \t#address-cells = <1>;\n\
             \t#size-cells = <1>;\n\
             \tintc: intc { #interrupt-cells = <2>; };\n\
             \tn@1000 {\n\
             \t\treg = <0x1000 0x10 0x2000 0x10>;\n\
             \t\treg-names = \"a\";\n\
             \t\tinterrupt-parent = <&intc>;\n\
             \t\tinterrupts = <1 2 3 4>;\n\
             \t\tinterrupt-names = \"x\", \"y\";\n\
             \t\tpinctrl-0 = <&intc>;\n\
             \t\tpinctrl-1 = <&intc>;\n\
             \t\tpinctrl-names = \"default\", \"sleep\", \"extra\";\n\
             \t};\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "reg-names has 1 names, but reg has 2 entries",
                "pinctrl-names has 3 names, but pinctrl-0..1 has 2 entries",
            ]
        );
    }

    #[test]
    fn special_nodes() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tl: a { };\n\
             \taliases { good = &l; path = \"/a\"; bad = \"/nope\"; num = <1>; sub { }; };\n\
             \tsoc { cpus { }; chosen { }; };\n\
             \tn@1000 { };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "aliases can't have child nodes",
                "Unknown node /nope",
                "Expected a reference to a node",
                "cpus must be a child of the root node",
                "chosen must be a child of the root node",
                "Node has a unit address, but no reg or ranges property",
            ]
        );

        let fix = diagnostics.last().unwrap().fix.as_ref().unwrap();
        assert_eq!(fix.location.start.column, 2);
        assert_eq!(fix.location.end.column, 7);
        assert_eq!(fix.replacement, "");
    }

    #[test]
    fn bus_placement() {
        let bindings = [
            ("vnd,spi", "compatible: vnd,spi\nbus: spi\n"),
            ("vnd,i2c", "compatible: vnd,i2c\nbus: i2c\n"),
            ("vnd,flash", "compatible: vnd,flash\non-bus: spi\n"),
        ];

        let (_, diagnostics) = run(
            "/ {\n\
             \tgpio0: gpio { gpio-controller; #gpio-cells = <2>; };\n\
             \tspi {\n\
             \t\tcompatible = \"vnd,spi\";\n\
             \t\t#address-cells = <1>;\n\
             \t\t#size-cells = <0>;\n\
             \t\tcs-gpios = <&gpio0 1 0>;\n\
             \t\tflash@0 { compatible = \"vnd,flash\"; reg = <0>; };\n\
             \t\tflash@1 { compatible = \"vnd,flash\"; reg = <1>; };\n\
             \t};\n\
             \ti2c { compatible = \"vnd,i2c\"; flash { compatible = \"vnd,flash\"; }; };\n\
             };\n",
            &bindings,
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Chip select 1 has no entry in cs-gpios of /spi (1 entries)",
                "Node must be on a spi bus, but /i2c isn't a spi controller",
            ]
        );
    }
}
