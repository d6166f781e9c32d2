//! Phandle-array specifiers and the `<specifier>-map` tables of nexus nodes.

use std::collections::HashMap;

use super::{has_specifiers, specifier, Linter};
use crate::{
    ast::{PHandle, Property, PropertyValue, Value, ValueType},
    context::NodeRef,
    diagnostic::Diagnostic,
    source::Location,
};

/// One `&target arg arg ...` group of a phandle-array.
pub(super) struct Specifier<'p> {
    pub phandle: &'p PHandle,
    pub location: &'p Location,
    pub args: Vec<&'p PropertyValue>,
}

impl Specifier<'_> {
    /// From the phandle to the last argument.
    fn location(&self) -> Location {
        match self.args.last() {
            Some(last) => self.location.to(&last.location),
            None => self.location.clone(),
        }
    }
}

/// Split the cells of `prop` at each phandle. Cells before the first phandle are skipped.
pub(super) fn specifiers(prop: &Property) -> Vec<Specifier> {
    let mut out: Vec<Specifier> = Vec::new();

    for cell in prop.cells() {
        match &cell.value {
            Value::PHandle(phandle) => out.push(Specifier {
                phandle,
                location: &cell.location,
                args: Vec::new(),
            }),
            _ => {
                if let Some(current) = out.last_mut() {
                    current.args.push(cell);
                }
            }
        }
    }

    out
}

/// Whether `prop` is declared or written as a phandle-array.
fn is_phandle_array(node: NodeRef, prop: &Property) -> bool {
    has_specifiers(prop.value_type())
        || node
            .node_type()
            .and_then(|t| t.property(&prop.name))
            .map_or(false, |p| p.types.contains(&ValueType::PHandleArray))
}

/// The specifier space of a property of `node` that holds specifiers, if it is one. Plain
/// phandle lists count when their name maps to a space, as in `clocks = <&osc>;`.
pub(super) fn specifier_space(node: NodeRef, prop: &Property) -> Option<String> {
    if prop.name.ends_with("-map") {
        return None;
    }

    if is_phandle_array(node, prop) {
        return node
            .node_type()
            .and_then(|t| t.property(&prop.name))
            .and_then(|p| p.specifier_space.clone())
            .or_else(|| specifier(&prop.name));
    }

    match prop.value_type() {
        ValueType::PHandle | ValueType::PHandles => specifier(&prop.name),
        _ => None,
    }
}

/// Cells of one specifier in the `specifier` space of `node`. Interrupt specifiers are prefixed
/// by a unit address.
fn specifier_cells(node: NodeRef, specifier: &str) -> Option<usize> {
    let cells = node.cells(&format!("#{}-cells", specifier))?;

    let address = match specifier {
        "interrupt" => node.cells("#address-cells").unwrap_or(0),
        _ => 0,
    };

    Some(cells + address)
}

/// Each specifier must have as many cells as its target declares.
pub(super) fn check_specifiers(linter: &mut Linter, node: NodeRef, prop: &Property) {
    let Some(space) = specifier_space(node, prop) else {
        return;
    };
    let cells_name = format!("#{}-cells", space);

    for spec in specifiers(prop) {
        let Some(target) = linter
            .ctx
            .lookup(spec.phandle)
            .and_then(|id| linter.ctx.node_ref(id))
        else {
            continue;
        };

        let Some(expected) = target.property(&cells_name).and_then(Property::number) else {
            // A plain phandle list may point at nodes that take no specifier at all.
            if !is_phandle_array(node, prop) {
                continue;
            }
            linter.error(
                spec.location,
                format!("{} has no {} property", target.path(), cells_name),
            );
            continue;
        };

        if spec.args.len() as i64 != expected {
            linter.error(
                &spec.location(),
                format!(
                    "{} expects {} cells, found {}",
                    spec.phandle,
                    expected,
                    spec.args.len()
                ),
            );
        }
    }
}

/// Validate every `<specifier>-map` of `node`: record layout, mask sizes and duplicate inputs.
pub(super) fn check_maps(linter: &mut Linter, node: NodeRef) {
    for prop in node.unique_properties() {
        let Some(space) = prop.name.strip_suffix("-map") else {
            continue;
        };

        let Some(input) = specifier_cells(node, space) else {
            linter.error(
                &prop.name_location,
                format!("{} needs a #{}-cells property", prop.name, space),
            );
            continue;
        };

        let mut mask = None;
        for suffix in ["-map-mask", "-map-pass-thru"] {
            let Some(p) = node.property(&format!("{}{}", space, suffix)) else {
                continue;
            };
            match p.numbers() {
                Some(cells) if cells.len() == input => {
                    if suffix == "-map-mask" {
                        mask = Some(cells);
                    }
                }
                _ => linter.error(
                    &p.location,
                    format!("{} must have {} cells", p.name, input),
                ),
            }
        }

        check_map(linter, prop, space, input, mask.as_deref());
    }
}

fn check_map(
    linter: &mut Linter,
    prop: &Property,
    space: &str,
    input: usize,
    mask: Option<&[i64]>,
) {
    let cells: Vec<&PropertyValue> = prop.cells().collect();
    let mut seen: HashMap<Vec<i64>, Location> = HashMap::new();
    let mut i = 0;

    while i < cells.len() {
        let start = i;

        if i + input >= cells.len() {
            linter.error(&cells[i].location, "Incomplete map entry");
            return;
        }

        let mut key = Vec::with_capacity(input);
        for (k, cell) in cells[i..i + input].iter().enumerate() {
            let Some(value) = cell.value.as_int() else {
                linter.error(&cell.location, "Expected a number");
                return;
            };
            key.push(value & mask.map_or(-1, |m| m[k]));
        }
        i += input;

        let Some(phandle) = cells[i].value.as_phandle() else {
            linter.error(&cells[i].location, "Expected a phandle");
            return;
        };
        // Unknown targets are reported with the other references.
        let Some(target) = linter
            .ctx
            .lookup(phandle)
            .and_then(|id| linter.ctx.node_ref(id))
        else {
            return;
        };
        let Some(output) = specifier_cells(target, space) else {
            linter.error(
                &cells[i].location,
                format!("{} has no #{}-cells property", target.path(), space),
            );
            return;
        };
        i += 1;

        let found = cells[i..]
            .iter()
            .take(output)
            .take_while(|c| c.value.as_int().is_some())
            .count();
        let end = i + found;
        let location = cells[start].location.to(&cells[end - 1].location);

        if found < output {
            linter.error(
                &location,
                format!(
                    "{} expects {} output cells, found {}",
                    phandle, output, found
                ),
            );
            return;
        }
        i = end;

        match seen.get(&key) {
            Some(first) => linter.push(
                Diagnostic::error(location, "Duplicate map entry")
                    .with_related(first.clone(), "First entry with the same input"),
            ),
            None => {
                seen.insert(key, location);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{messages, run};

    #[test]
    fn specifier_cell_counts() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tctrl: ctrl { #pwm-cells = <2>; };\n\
             \tgpio0: gpio { #gpio-cells = <2>; };\n\
             \tbare: bare { };\n\
             \ta { pwms = <&ctrl 1 2 3>; };\n\
             \tb { pwms = <&ctrl 1 2>, <&ctrl 3 4>; led-gpios = <&gpio0 1 0 &gpio0 2>; };\n\
             \tc { clocks = <&bare 1>; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "&ctrl expects 2 cells, found 3",
                "&gpio0 expects 2 cells, found 1",
                "/bare has no #clock-cells property",
            ]
        );
        assert_eq!(diagnostics.iter().filter(|d| d.message.contains("expects 2")).count(), 2);
    }

    #[test]
    fn plain_phandle_lists() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tosc: osc { #clock-cells = <1>; };\n\
             \tfixed: fixed { #clock-cells = <0>; };\n\
             \tsram: sram { };\n\
             \ta { clocks = <&osc>; };\n\
             \tb { clocks = <&fixed &osc 3>; };\n\
             \tc { clocks = <&fixed>, <&fixed>; memory-regions = <&sram>; };\n\
             \td { clocks = <&osc 1>; };\n\
             };\n",
            &[],
        );

        assert_eq!(messages(&diagnostics), vec!["&osc expects 1 cells, found 0"]);
        let error = diagnostics.iter().find(|d| d.message.contains("expects")).unwrap();
        assert_eq!(error.location.start.line, 4);
    }

    #[test]
    fn duplicate_map_entries() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tgpio0: gpio { #gpio-cells = <2>; };\n\
             \tconn {\n\
             \t\t#gpio-cells = <2>;\n\
             \t\tgpio-map-mask = <0xffffffff 0xfffffff0>;\n\
             \t\tgpio-map = <0 0x10 &gpio0 1 0>,\n\
             \t\t\t<0 0x11 &gpio0 2 0>,\n\
             \t\t\t<1 0x10 &gpio0 3 0>;\n\
             \t};\n\
             };\n",
            &[],
        );

        assert_eq!(messages(&diagnostics), vec!["Duplicate map entry"]);
        assert_eq!(diagnostics.iter().filter(|d| d.message.contains("Duplicate")).count(), 1);

        let duplicate = diagnostics
            .iter()
            .find(|d| d.message == "Duplicate map entry")
            .unwrap();
        assert_eq!(duplicate.location.start.line, 6);
        assert_eq!(duplicate.related[0].location.start.line, 5);
    }

    #[test]
    fn huge_specifier_cells() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tintc: intc { #interrupt-cells = /bits/ 64 <0x7fffffffffffffff>; };\n\
             \ta {\n\
             \t\t#interrupt-cells = <1>;\n\
             \t\t#address-cells = /bits/ 64 <0x7fffffffffffffff>;\n\
             \t\tinterrupt-map = <1 &intc 2>;\n\
             \t};\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Invalid #interrupt-cells 9223372036854775807, expected 0 to 32",
                "/intc has no #interrupt-cells property",
                "Invalid #address-cells 9223372036854775807, expected 0 to 32",
            ]
        );
    }

    #[test]
    fn map_layout() {
        let (_, diagnostics) = run(
            "/ {\n\
             \tintc: intc { #interrupt-cells = <1>; #address-cells = <0>; };\n\
             \tgpio0: gpio { #gpio-cells = <2>; };\n\
             \ta {\n\
             \t\t#interrupt-cells = <1>;\n\
             \t\t#address-cells = <1>;\n\
             \t\tinterrupt-map = <0x100 1 &intc 5>, <0x200 1 &intc>;\n\
             \t};\n\
             \tb {\n\
             \t\t#gpio-cells = <2>;\n\
             \t\tgpio-map-mask = <0xff>;\n\
             \t\tgpio-map-pass-thru = <0 0>;\n\
             \t\tgpio-map = <0 &gpio0 &gpio0 1 0>;\n\
             \t};\n\
             \tc { pwm-map = <1 &gpio0 1>; };\n\
             \td { #gpio-cells = <1>; gpio-map = <1 &gpio0 1 0>, <2>; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "&intc expects 1 output cells, found 0",
                "gpio-map-mask must have 2 cells",
                "Expected a number",
                "pwm-map needs a #pwm-cells property",
                "Incomplete map entry",
            ]
        );
    }
}
