//! Checks on `reg`, `ranges` and the address space they describe.

use std::collections::HashSet;

use super::Linter;
use crate::{
    ast::{Property, PropertyValue},
    context::NodeRef,
    diagnostic::Diagnostic,
};

/// `reg` must be a whole number of address/size pairs, and start at the unit address.
pub(super) fn check_reg(linter: &mut Linter, node: NodeRef) {
    let Some(reg) = node.property("reg") else {
        return;
    };
    let Some(parent) = node.parent() else {
        return;
    };
    let Some(cells) = reg.numbers() else {
        linter.error(&reg.location, "reg must only contain numbers");
        return;
    };

    let (address_cells, size_cells) = (parent.address_cells(), parent.size_cells());
    let stride = address_cells + size_cells;

    if cells.is_empty() || stride == 0 || cells.len() % stride != 0 {
        linter.error(
            &reg.location,
            format!(
                "reg expects a multiple of {} cells ({} address, {} size), found {}",
                stride,
                address_cells,
                size_cells,
                cells.len()
            ),
        );
        return;
    }

    if address_cells == 1 {
        if let Some(unit) = node.unit_address() {
            if unit != cells[0] {
                linter.warning(
                    &reg.location,
                    format!(
                        "Unit address 0x{:x} doesn't match reg address 0x{:x}",
                        unit, cells[0]
                    ),
                );
            }
        }
    }
}

struct Range<'p> {
    child: i64,
    length: i64,
    cells: &'p [&'p PropertyValue],
}

impl Range<'_> {
    fn end(&self) -> i64 {
        self.child.wrapping_add(self.length)
    }

    fn contains(&self, address: i64) -> bool {
        self.child <= address && address < self.end()
    }
}

/// Decode `ranges` for the 1/1 address layout. Child ranges must not overlap, and children must
/// sit inside one of them.
pub(super) fn check_ranges(linter: &mut Linter, node: NodeRef) {
    let Some(ranges) = node.property("ranges") else {
        return;
    };
    if ranges.is_boolean() {
        return;
    }

    let Some(parent) = node.parent() else {
        return;
    };
    if node.address_cells() != 1 || node.size_cells() != 1 || parent.address_cells() != 1 {
        return;
    }

    let cells: Vec<&PropertyValue> = ranges.cells().collect();
    let Some(values) = cells.iter().map(|c| c.value.as_int()).collect::<Option<Vec<_>>>() else {
        linter.error(&ranges.location, "ranges must only contain numbers");
        return;
    };

    if values.len() % 3 != 0 {
        linter.error(
            &ranges.location,
            format!(
                "ranges expects a multiple of 3 cells (child address, parent address, length), \
                 found {}",
                values.len()
            ),
        );
        return;
    }

    let decoded: Vec<Range> = values
        .chunks_exact(3)
        .zip(cells.chunks_exact(3))
        .map(|(v, cells)| Range {
            child: v[0],
            length: v[2],
            cells,
        })
        .collect();

    for (i, range) in decoded.iter().enumerate() {
        for other in &decoded[..i] {
            if range.child < other.end() && other.child < range.end() {
                let location = range.cells[0].location.to(&range.cells[2].location);
                linter.push(
                    Diagnostic::error(
                        location,
                        format!(
                            "Range 0x{:x}..0x{:x} overlaps with 0x{:x}..0x{:x}",
                            range.child,
                            range.end(),
                            other.child,
                            other.end()
                        ),
                    )
                    .with_related(
                        other.cells[0].location.to(&other.cells[2].location),
                        "Overlapping range",
                    ),
                );
            }
        }
    }

    for child in node.children() {
        let Some(reg) = child.property("reg") else {
            continue;
        };
        let Some(address) = reg.numbers().and_then(|n| n.first().copied()) else {
            continue;
        };

        if !decoded.iter().any(|r| r.contains(address)) {
            linter.error(
                &reg.location,
                format!(
                    "Address 0x{:x} is outside the ranges of {}",
                    address,
                    node.path()
                ),
            );
        }
    }
}

/// Sibling `reg` blocks must not overlap when children use one address and one size cell.
pub(super) fn check_collisions(linter: &mut Linter, node: NodeRef) {
    if node.address_cells() != 1 || node.size_cells() != 1 {
        return;
    }

    let mut blocks: Vec<(i64, i64, NodeRef, &Property)> = Vec::new();
    for child in node.children().into_iter().filter(|c| c.enabled()) {
        let Some(reg) = child.property("reg") else {
            continue;
        };
        let Some(cells) = reg.numbers() else {
            continue;
        };
        for pair in cells.chunks_exact(2) {
            blocks.push((pair[0], pair[1], child, reg));
        }
    }

    blocks.sort_by_key(|(start, ..)| *start);

    let mut reported = HashSet::new();
    for (i, (start, _, child, reg)) in blocks.iter().enumerate() {
        for (other_start, other_size, other, _) in &blocks[..i] {
            let end = other_start.wrapping_add(*other_size);
            if other.id() == child.id() || *start >= end {
                continue;
            }
            if reported.insert((child.id(), other.id())) {
                linter.error(
                    &reg.location,
                    format!(
                        "Address range collides with {} (ends at 0x{:x})",
                        other.path(),
                        end
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{messages, run};
    use crate::diagnostic::Severity;

    #[test]
    fn reg_layout() {
        let (_, diagnostics) = run(
            "/ {\n\
             \t#address-cells = <1>;\n\
             \t#size-cells = <1>;\n\
             \ta@1000 { reg = <0x1000 0x10>; };\n\
             \tb@2000 { reg = <0x2000>; };\n\
             \tc@3000 { reg = <0x3100 0x10>; };\n\
             \td@4000 { reg = \"x\"; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "reg expects a multiple of 2 cells (1 address, 1 size), found 1",
                "Unit address 0x3000 doesn't match reg address 0x3100",
                "Property reg has type string, expected array",
                "reg must only contain numbers",
            ]
        );

        let mismatch = diagnostics
            .iter()
            .find(|d| d.message.starts_with("Unit address"))
            .unwrap();
        assert_eq!(mismatch.severity, Severity::Warning);
    }

    #[test]
    fn huge_cell_counts() {
        let (ctx, diagnostics) = run(
            "/ {\n\
             \t#address-cells = /bits/ 64 <0x7fffffffffffffff>;\n\
             \t#size-cells = <1>;\n\
             \tn { reg = <1 2>; };\n\
             \tm { #size-cells = <(-1)>; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Invalid #address-cells 9223372036854775807, expected 0 to 32",
                "reg expects a multiple of 3 cells (2 address, 1 size), found 2",
                "Invalid #size-cells -1, expected 0 to 32",
            ]
        );

        let root = ctx.root().unwrap();
        assert_eq!((root.address_cells(), root.size_cells()), (2, 1));
        assert_eq!(ctx.node("/m").unwrap().size_cells(), 1);
    }

    #[test]
    fn sibling_collisions() {
        let (_, diagnostics) = run(
            "/ {\n\
             \t#address-cells = <1>;\n\
             \t#size-cells = <1>;\n\
             \ta@1000 { reg = <0x1000 0x100>; };\n\
             \tb@1050 { reg = <0x1050 0x100>; };\n\
             \tc@2000 { reg = <0x2000 0x100>; };\n\
             \td@2000 { reg = <0x2000 0x100>; status = \"disabled\"; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec!["Address range collides with /a@1000 (ends at 0x1100)"]
        );
        assert_eq!(diagnostics[0].location.start.line, 4);
    }

    #[test]
    fn decode_ranges() {
        let (_, diagnostics) = run(
            "/ {\n\
             \t#address-cells = <1>;\n\
             \t#size-cells = <1>;\n\
             \tsoc {\n\
             \t\t#address-cells = <1>;\n\
             \t\t#size-cells = <1>;\n\
             \t\tranges = <0x0 0x40000000 0x1000>, <0x800 0x50000000 0x1000>, \
             <0x2000 0x60000000 0x100>;\n\
             \t\tin@100 { reg = <0x100 0x10>; };\n\
             \t\tout@3000 { reg = <0x3000 0x10>; };\n\
             \t};\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Range 0x800..0x1800 overlaps with 0x0..0x1000",
                "Address 0x3000 is outside the ranges of /soc",
            ]
        );
    }
}
