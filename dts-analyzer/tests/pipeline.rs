use std::{fs, path::Path};

use dts_analyzer::{
    apply_edit, lint, parse, resolve_types, Config, Context, Diagnostic, Error, MemoryProvider,
    Property, Severity, TypeLoader,
};
use tempfile::TempDir;

const SOC: &str = r#"#define UART_BASE 0x4000

/ {
	#address-cells = <1>;
	#size-cells = <1>;

	uart0: uart@4000 {
		compatible = "vnd,uart";
		reg = <UART_BASE 0x100>;
		status = "disabled";
	};

	i2c0: i2c@5000 {
		compatible = "vnd,i2c";
		reg = <0x5000 0x100>;
		#address-cells = <1>;
		#size-cells = <0>;
	};
};
"#;

const BOARD: &str = r#"/dts-v1/;
#include "soc.dtsi"

/ {
	model = "Test board";
	chosen {
		zephyr,console = &uart0;
	};
};

&uart0 {
	status = "okay";
};

&i2c0 {
	temp@48 {
		compatible = "vnd,temp";
		reg = <0x48>;
	};
};
"#;

const BINDINGS: &[(&str, &str)] = &[
    (
        "base.yaml",
        "properties:\n  reg:\n    type: array\n  interrupts:\n    type: array\n",
    ),
    (
        "serial/vnd,uart.yaml",
        "description: UART\ncompatible: \"vnd,uart\"\ninclude: base.yaml\nproperties:\n  \
         current-speed:\n    type: int\n    required: true\n",
    ),
    (
        "i2c/vnd,i2c.yaml",
        "compatible: \"vnd,i2c\"\ninclude: base.yaml\nbus: i2c\nproperties:\n  \
         clock-frequency:\n    type: int\n",
    ),
    (
        "sensor/vnd,temp-i2c.yaml",
        "compatible: \"vnd,temp\"\ninclude: base.yaml\non-bus: i2c\nproperties:\n  \
         reg:\n    required: true\n",
    ),
];

fn write_tree(dir: &Path) {
    for (path, text) in BINDINGS {
        let path = dir.join("bindings").join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fs::create_dir_all(dir.join("boards")).unwrap();
    fs::write(dir.join("boards/soc.dtsi"), SOC).unwrap();
    fs::write(dir.join("boards/board.dts"), BOARD).unwrap();
}

fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics.iter().map(|d| d.message.as_str()).collect()
}

#[test]
fn board_with_bindings() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path());

    let mut loader = TypeLoader::new();
    assert_eq!(loader.add_binding_directory(dir.path().join("bindings")).unwrap(), 4);

    let mut ctx = Context::new(Config::default());
    ctx.set_board(dir.path().join("boards/board.dts"));
    let mut diagnostics = ctx.parse();
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    resolve_types(&mut ctx, &mut loader);
    diagnostics.extend(lint(&mut ctx));

    assert_eq!(
        messages(&diagnostics),
        vec![
            "Redundant definition of status",
            "Missing required property current-speed",
        ]
    );
    let severities: Vec<Severity> = diagnostics.iter().map(|d| d.severity).collect();
    assert_eq!(severities, vec![Severity::Hint, Severity::Error]);

    let uart = ctx.node("&uart0").unwrap();
    assert_eq!(uart.node_type().map(|t| t.name.as_str()), Some("vnd,uart"));
    assert_eq!(uart.property("reg").and_then(Property::numbers), Some(vec![0x4000, 0x100]));
    assert_eq!(uart.entries().len(), 2);

    let temp = ctx.node("/i2c@5000/temp@48").unwrap();
    assert_eq!(temp.node_type().map(|t| t.name.as_str()), Some("vnd,temp"));
    assert_eq!(ctx.files()[0].includes.len(), 1);
}

#[test]
fn edits_rerun_the_pipeline() {
    let dir = TempDir::new().unwrap();
    write_tree(dir.path());
    let board = dir.path().join("boards/board.dts");

    let mut loader = TypeLoader::new();
    loader.add_binding_directory(dir.path().join("bindings")).unwrap();
    let mut ctx = Context::new(Config::default());
    ctx.set_board(&board);

    let fixed = BOARD.replace(
        "status = \"okay\";",
        "status = \"okay\";\n\tcurrent-speed = <115200>;",
    );
    let diagnostics = apply_edit(&mut ctx, &mut loader, &board, &fixed);
    assert_eq!(messages(&diagnostics), vec!["Redundant definition of status"]);

    let moved = fixed.replace("reg = <0x48>;", "reg = <0x49>;");
    let diagnostics = apply_edit(&mut ctx, &mut loader, &board, &moved);
    assert_eq!(
        messages(&diagnostics),
        vec![
            "Redundant definition of status",
            "Unit address 0x48 doesn't match reg address 0x49",
        ]
    );
}

#[test]
fn missing_binding_directory() {
    let dir = TempDir::new().unwrap();
    let mut loader = TypeLoader::new();

    let result = loader.add_binding_directory(dir.path().join("nope"));
    assert!(matches!(result, Err(Error::Walk(_))), "{:?}", result);
}

#[test]
fn broken_binding_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("vnd,bad.yaml"), "compatible: [").unwrap();

    let mut loader = TypeLoader::new();
    assert_eq!(loader.add_binding_directory(dir.path()).unwrap(), 1);

    let provider =
        MemoryProvider::new().with("board.dts", "/ { n { compatible = \"vnd,bad\"; }; };\n");
    let mut ctx = Context::with_provider(Config::default(), Box::new(provider));
    ctx.set_board("board.dts");
    ctx.parse();
    resolve_types(&mut ctx, &mut loader);

    assert!(ctx.node("/n").unwrap().node_type().is_none());

    let diagnostics = lint(&mut ctx);
    let broken: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.message.starts_with("Unknown node type vnd,bad: invalid binding"))
        .collect();
    assert_eq!(broken.len(), 1, "{:?}", diagnostics);
    assert_eq!(broken[0].severity, Severity::Error);
    assert_eq!(broken[0].location.start.line, 0);
}

#[test]
fn macros_reach_property_values() {
    let config = Config::default().define("SPEED=9600");
    let mut ctx = Context::with_provider(config, Box::new(MemoryProvider::new()));

    let (_, diagnostics) = parse(
        "#define ADD(a,b) a+b\n\
         #define S(a) #a\n\
         #define TAIL(a, b, ...) __VA_ARGS__\n\
         #if 0\n\
         / { hidden; };\n\
         #endif\n\
         / {\n\
         \tsum = <(ADD(1,2))>;\n\
         \tname = S(hello);\n\
         \ttail = TAIL(1, 2, <3>, <4>);\n\
         \tspeed = <SPEED>;\n\
         };\n",
        "board.dts",
        &mut ctx,
    );
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    let root = ctx.root().unwrap();
    assert_eq!(root.property("sum").and_then(Property::number), Some(3));
    assert_eq!(root.property("name").and_then(Property::string), Some("hello"));
    assert_eq!(root.property("tail").and_then(Property::numbers), Some(vec![3, 4]));
    assert_eq!(root.property("speed").and_then(Property::number), Some(9600));
    assert!(!root.has_property("hidden"));
}

#[test]
fn reparsing_unchanged_text() {
    let text = "/ {\n\tl: a { x = <1>; };\n};\n&l { y = \"z\"; };\n";
    let mut ctx = Context::with_provider(Config::default(), Box::new(MemoryProvider::new()));

    let (file, first) = parse(text, "board.dts", &mut ctx);
    let dump = ctx.dump();
    let (again, second) = parse(text, "board.dts", &mut ctx);

    assert_eq!(file, again);
    assert_eq!(first, second);
    assert_eq!(ctx.dump(), dump);
    assert_eq!(ctx.walk().len(), 2);
}
