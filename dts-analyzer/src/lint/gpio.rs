//! GPIO pin ownership across the tree.
//!
//! Every GPIO controller gets a table of `ngpios` slots. Pins are claimed by phandle-array
//! specifiers that point at a controller, by raw `*-pin` numbers and by the `psels` of the
//! pinctrl states a node selects. Raw and pinctrl pin numbers are global: controllers are
//! numbered consecutively in tree order.

use super::nexus::{specifier_space, specifiers};
use crate::{
    ast::{NodeId, Property},
    context::{Context, NodeRef, PinAssignment},
    diagnostic::Diagnostic,
    source::Location,
};

/// Largest `ngpios` a controller may declare.
const MAX_NGPIOS: usize = 1024;

/// Pin field of an nRF `psels` cell.
const PSEL_PIN_MASK: i64 = 0x1FF;
const PSEL_DISCONNECTED: i64 = 0x1FF;

struct Controller<'a> {
    node: NodeRef<'a>,
    offset: usize,
    pins: Vec<Option<PinAssignment>>,
}

struct Pins<'a> {
    controllers: Vec<Controller<'a>>,
    diagnostics: &'a mut Vec<Diagnostic>,
}

impl<'a> Pins<'a> {
    fn controller_index(&self, node: NodeId) -> Option<usize> {
        self.controllers.iter().position(|c| c.node.id() == node)
    }

    /// The controller and local pin of a global pin number.
    fn global(&self, pin: i64) -> Option<(usize, usize)> {
        let pin = usize::try_from(pin).ok()?;
        self.controllers.iter().enumerate().find_map(|(i, c)| {
            let local = pin.checked_sub(c.offset)?;
            (local < c.pins.len()).then_some((i, local))
        })
    }

    fn assign(
        &mut self,
        controller: usize,
        pin: i64,
        owner: NodeRef,
        property: &str,
        location: &Location,
    ) {
        let Controller { node: ctrl, pins, .. } = &mut self.controllers[controller];
        let count = pins.len();

        let Some(slot) = usize::try_from(pin).ok().and_then(|p| pins.get_mut(p)) else {
            self.diagnostics.push(Diagnostic::warning(
                location.clone(),
                format!("Pin {} is out of range for {} ({} pins)", pin, ctrl.path(), count),
            ));
            return;
        };

        if let Some(previous) = slot.as_ref() {
            if previous.node != owner.id() {
                let previous_path = ctrl
                    .context()
                    .node_ref(previous.node)
                    .map_or("?", |n| n.path());
                self.diagnostics.push(
                    Diagnostic::info(
                        location.clone(),
                        format!(
                            "Pin {} of {} is already assigned to {} ({})",
                            pin,
                            ctrl.path(),
                            previous_path,
                            previous.property
                        ),
                    )
                    .with_related(previous.location.clone(), "Previously assigned here"),
                );
            }
            return;
        }

        *slot = Some(PinAssignment {
            node: owner.id(),
            property: property.to_string(),
            location: location.clone(),
        });
    }

    fn assign_global(&mut self, pin: i64, owner: NodeRef, property: &str, location: &Location) {
        if let Some((controller, local)) = self.global(pin) {
            self.assign(controller, local as i64, owner, property, location);
        }
    }

    /// `<name>-pin = <global pin>;`
    fn raw_pins(&mut self, node: NodeRef, prop: &Property) {
        for cell in prop.cells() {
            if let Some(pin) = cell.value.as_int() {
                self.assign_global(pin, node, &prop.name, &cell.location);
            }
        }
    }

    /// Specifiers pointing at a controller, using the `pin` cell of the controller's type.
    fn specifier_pins(&mut self, node: NodeRef, prop: &Property) {
        let Some(space) = specifier_space(node, prop) else {
            return;
        };
        let ctx = node.context();

        for spec in specifiers(prop) {
            let Some(target) = ctx.lookup(spec.phandle) else {
                continue;
            };
            let Some(controller) = self.controller_index(target) else {
                continue;
            };

            let layout = self.controllers[controller]
                .node
                .node_type()
                .and_then(|t| t.cell_names(&space));
            let index = match layout {
                Some(names) => names.iter().position(|n| n == "pin"),
                None if space == "gpio" => Some(0),
                None => None,
            };

            let Some(cell) = index.and_then(|i| spec.args.get(i)) else {
                continue;
            };
            if let Some(pin) = cell.value.as_int() {
                self.assign(controller, pin, node, &prop.name, &cell.location);
            }
        }
    }

    /// `pinctrl-N` states: every `psels` cell below the referenced nodes.
    fn pinctrl_pins(&mut self, node: NodeRef, prop: &Property) {
        let ctx = node.context();

        for (phandle, _) in prop.phandles() {
            let Some(state) = ctx.lookup(phandle).and_then(|id| ctx.node_ref(id)) else {
                continue;
            };

            let mut stack = vec![state];
            while let Some(group) = stack.pop() {
                if let Some(psels) = group.property("psels") {
                    for cell in psels.cells() {
                        let Some(value) = cell.value.as_int() else {
                            continue;
                        };
                        let pin = value & PSEL_PIN_MASK;
                        if pin != PSEL_DISCONNECTED {
                            self.assign_global(pin, node, &prop.name, &cell.location);
                        }
                    }
                }
                stack.extend(group.children().into_iter().rev());
            }
        }
    }
}

/// Fill the pin tables of all GPIO controllers, reporting pins claimed twice.
pub(super) fn assign_pins(
    ctx: &Context,
    order: &[NodeId],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<(NodeId, Vec<Option<PinAssignment>>)> {
    let nodes: Vec<NodeRef> = order.iter().filter_map(|id| ctx.node_ref(*id)).collect();

    let mut offset = 0;
    let mut controllers = Vec::new();
    let default_ngpios = ctx.config.default_ngpios.min(MAX_NGPIOS);
    for node in nodes.iter().filter(|n| n.has_property("gpio-controller")) {
        let ngpios = match node.property("ngpios") {
            Some(prop) => {
                let count = prop
                    .number()
                    .and_then(|n| usize::try_from(n).ok())
                    .filter(|n| *n <= MAX_NGPIOS);
                count.unwrap_or_else(|| {
                    diagnostics.push(Diagnostic::warning(
                        prop.location.clone(),
                        format!("ngpios must be a number from 0 to {}", MAX_NGPIOS),
                    ));
                    default_ngpios
                })
            }
            None => default_ngpios,
        };

        controllers.push(Controller {
            node: *node,
            offset,
            pins: vec![None; ngpios],
        });
        offset = offset.saturating_add(ngpios);
    }

    let mut pins = Pins {
        controllers,
        diagnostics,
    };

    for node in nodes.iter().filter(|n| n.enabled()) {
        for prop in node.unique_properties() {
            if prop.name.ends_with("-pin") {
                pins.raw_pins(*node, prop);
            } else if prop.name.starts_with("pinctrl-") && prop.name != "pinctrl-names" {
                pins.pinctrl_pins(*node, prop);
            } else {
                pins.specifier_pins(*node, prop);
            }
        }
    }

    pins.controllers
        .into_iter()
        .map(|c| (c.node.id(), c.pins))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::tests::{messages, run};
    use crate::diagnostic::{Diagnostic, Severity};

    #[test]
    fn overlapping_pins() {
        let (ctx, diagnostics) = run(
            "/ {\n\
             \tgpio0: gpio0 { gpio-controller; #gpio-cells = <2>; };\n\
             \tgpio1: gpio1 { gpio-controller; #gpio-cells = <2>; ngpios = <16>; };\n\
             \tled { gpios = <&gpio0 3 0>; };\n\
             \tbutton { gpios = <&gpio0 3 0>, <&gpio1 20 0>; };\n\
             \tuart { tx-pin = <35>; rx-pin = <3>; };\n\
             \toff { status = \"disabled\"; gpios = <&gpio0 4 0>; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Pin 3 of /gpio0 is already assigned to /led (gpios)",
                "Pin 20 is out of range for /gpio1 (16 pins)",
                "Pin 3 of /gpio0 is already assigned to /led (gpios)",
            ]
        );
        let pins: Vec<&Diagnostic> = diagnostics
            .iter()
            .filter(|d| d.message.starts_with("Pin"))
            .collect();
        let severities: Vec<Severity> = pins.iter().map(|d| d.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::Information, Severity::Warning, Severity::Information]
        );
        assert_eq!(pins[0].related[0].location.start.line, 3);

        let gpio0 = ctx.node("&gpio0").unwrap();
        assert_eq!(gpio0.node().pins.len(), 32);
        assert_eq!(
            gpio0.node().pins[3].as_ref().map(|p| p.node),
            ctx.node("/led").map(|n| n.id())
        );
        assert!(gpio0.node().pins[4].is_none());

        let gpio1 = ctx.node("&gpio1").unwrap();
        assert_eq!(gpio1.node().pins.len(), 16);
        let owner = gpio1.node().pins[3].as_ref().unwrap();
        assert_eq!(Some(owner.node), ctx.node("/uart").map(|n| n.id()));
        assert_eq!(owner.property, "tx-pin");
    }

    #[test]
    fn ngpios_bounds() {
        let (ctx, diagnostics) = run(
            "/ {\n\
             \tgpio0: gpio0 { gpio-controller; #gpio-cells = <2>; ngpios = <0xffffffff>; };\n\
             \tgpio1: gpio1 { gpio-controller; #gpio-cells = <2>; ngpios = <8>; };\n\
             \tgpio2: gpio2 { gpio-controller; #gpio-cells = <2>; ngpios = <(-1)>; };\n\
             \tuart { tx-pin = <33>; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "ngpios must be a number from 0 to 1024",
                "ngpios must be a number from 0 to 1024",
            ]
        );
        assert_eq!(diagnostics.iter().filter(|d| d.message.starts_with("ngpios")).count(), 2);

        for (controller, count) in [("&gpio0", 32), ("&gpio1", 8), ("&gpio2", 32)] {
            assert_eq!(ctx.node(controller).unwrap().node().pins.len(), count, "{controller}");
        }

        let owner = ctx.node("&gpio1").unwrap().node().pins[1].as_ref().unwrap();
        assert_eq!(Some(owner.node), ctx.node("/uart").map(|n| n.id()));
    }

    #[test]
    fn pinctrl_states() {
        let (ctx, diagnostics) = run(
            "/ {\n\
             \tgpio0: gpio0 { gpio-controller; #gpio-cells = <2>; };\n\
             \tgpio1: gpio1 { gpio-controller; #gpio-cells = <2>; };\n\
             \tpinctrl {\n\
             \t\tuart_default: uart_default {\n\
             \t\t\tgroup1 { psels = <0x01000006>, <0x02000025>; };\n\
             \t\t};\n\
             \t\tspi_default: spi_default {\n\
             \t\t\tgroup1 { psels = <0x040001ff>, <0x05000006>; };\n\
             \t\t};\n\
             \t};\n\
             \tuart { pinctrl-0 = <&uart_default>; pinctrl-names = \"default\"; };\n\
             \tspi { pinctrl-0 = <&spi_default>; pinctrl-names = \"default\"; };\n\
             \tled { gpios = <&gpio1 5 0>; };\n\
             };\n",
            &[],
        );

        assert_eq!(
            messages(&diagnostics),
            vec![
                "Pin 6 of /gpio0 is already assigned to /uart (pinctrl-0)",
                "Pin 5 of /gpio1 is already assigned to /uart (pinctrl-0)",
            ]
        );

        let gpio1 = ctx.node("&gpio1").unwrap();
        assert_eq!(gpio1.node().pins.iter().flatten().count(), 1);
    }
}
