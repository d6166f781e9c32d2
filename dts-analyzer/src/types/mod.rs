//! Node types, loaded from binding files.
//!
//! A [`TypeLoader`] knows the binding files of one or more directories by name. Files are parsed
//! the first time a node needs them, and the resulting [`NodeType`]s are shared between all
//! nodes through `Arc`s.

mod binding;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, warn};
use walkdir::WalkDir;

pub use self::binding::{Binding, BindingError, FilteredInclude, PropertySpec, Scalar};
use crate::{
    ast::ValueType,
    context::{Context, NodeRef},
};

/// Bus names that may suffix a binding file name, as in `vnd,sensor-i2c.yaml`.
const BUS_SUFFIXES: &[&str] = &["i2c", "i3c", "spi", "uart", "can", "mdio", "espi", "w1"];

/// A property declared by a node type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyType {
    pub name: String,
    /// Empty when the binding doesn't say.
    pub types: Vec<ValueType>,
    pub required: bool,
    pub description: Option<String>,
    pub enumeration: Option<Vec<Scalar>>,
    pub constant: Option<Scalar>,
    pub default: Option<Scalar>,
    pub specifier_space: Option<String>,
    pub deprecated: bool,
}

impl PropertyType {
    pub fn new(name: &str, ty: ValueType) -> Self {
        Self {
            name: name.to_string(),
            types: vec![ty],
            required: false,
            description: None,
            enumeration: None,
            constant: None,
            default: None,
            specifier_space: None,
            deprecated: false,
        }
    }

    fn from_spec(name: &str, spec: &PropertySpec) -> Self {
        let types = spec
            .ty
            .as_deref()
            .and_then(|t| t.parse().ok())
            .into_iter()
            .collect();

        let default = spec.default.as_ref().and_then(|v| {
            v.as_i64()
                .map(Scalar::Int)
                .or_else(|| v.as_str().map(|s| Scalar::Str(s.to_string())))
        });

        Self {
            name: name.to_string(),
            types,
            required: spec.required,
            description: spec.description.clone(),
            enumeration: spec.enumeration.clone(),
            constant: spec.constant.clone(),
            default,
            specifier_space: spec.specifier_space.clone(),
            deprecated: spec.deprecated,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn one_of(mut self, values: &[&str]) -> Self {
        self.enumeration = Some(values.iter().map(|v| Scalar::Str(v.to_string())).collect());
        self
    }
}

/// The resolved shape of a class of nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeType {
    pub name: String,
    pub compatible: Option<String>,
    pub description: Option<String>,
    pub properties: Vec<PropertyType>,
    /// Buses this node provides to its children.
    pub bus: Vec<String>,
    /// The bus this node must sit on.
    pub on_bus: Option<String>,
    pub child_binding: Option<Arc<NodeType>>,
    /// Cell names per specifier, like `gpio: [pin, flags]`.
    pub cells: BTreeMap<String, Vec<String>>,
    pub file: Option<PathBuf>,
    pub builtin: bool,
}

impl NodeType {
    pub fn property(&self, name: &str) -> Option<&PropertyType> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Names of the cells of a `specifier` phandle-array entry.
    pub fn cell_names(&self, specifier: &str) -> Option<&[String]> {
        self.cells.get(specifier).map(Vec::as_slice)
    }

    pub fn is_bus(&self, bus: &str) -> bool {
        self.bus.iter().any(|b| b == bus)
    }

    /// Add the properties of `other` that this type doesn't declare itself. Declarations that
    /// exist in both keep ours, but become required if either one is.
    fn inherit(&mut self, other: &NodeType, filter: Option<&FilteredInclude>) {
        for prop in &other.properties {
            if !filter.map_or(true, |f| f.allows(&prop.name)) {
                continue;
            }

            match self.properties.iter_mut().find(|p| p.name == prop.name) {
                Some(own) => {
                    own.required |= prop.required;
                    if own.types.is_empty() {
                        own.types = prop.types.clone();
                    }
                    if own.description.is_none() {
                        own.description = prop.description.clone();
                    }
                }
                None => self.properties.push(prop.clone()),
            }
        }

        if self.bus.is_empty() {
            self.bus = other.bus.clone();
        }
        if self.on_bus.is_none() {
            self.on_bus = other.on_bus.clone();
        }
        if self.child_binding.is_none() {
            self.child_binding = other.child_binding.clone();
        }
        for (specifier, names) in &other.cells {
            self.cells
                .entry(specifier.clone())
                .or_insert_with(|| names.clone());
        }
    }

    /// Declare `#<specifier>-cells` for every cell list.
    fn declare_cells(&mut self) {
        let names: Vec<String> = self.cells.keys().map(|s| format!("#{}-cells", s)).collect();
        for name in names {
            if self.property(&name).is_none() {
                self.properties.push(PropertyType::new(&name, ValueType::Int));
            }
        }
    }
}

/// The properties every node may have.
fn base_type() -> NodeType {
    use ValueType::*;

    NodeType {
        name: "base".to_string(),
        properties: vec![
            PropertyType::new("#address-cells", Int),
            PropertyType::new("#size-cells", Int),
            PropertyType::new("compatible", StringArray),
            PropertyType::new("status", String).one_of(&[
                "okay", "ok", "disabled", "reserved", "fail", "fail-sss",
            ]),
            PropertyType::new("label", String),
            PropertyType::new("reg", Array),
            PropertyType::new("phandle", Int),
            PropertyType::new("model", String),
        ],
        builtin: true,
        ..Default::default()
    }
}

/// Types for nodes that are identified by their path rather than by a compatible.
fn builtin_types(base: &NodeType) -> HashMap<&'static str, Arc<NodeType>> {
    use ValueType::*;

    let builtin = |name: &str, properties: Vec<PropertyType>| {
        let mut ty = NodeType {
            name: name.to_string(),
            properties,
            builtin: true,
            ..Default::default()
        };
        ty.inherit(base, None);
        Arc::new(ty)
    };

    HashMap::from([
        (
            "/",
            builtin(
                "root",
                vec![
                    PropertyType::new("interrupt-parent", PHandle),
                    PropertyType::new("chassis-type", String),
                ],
            ),
        ),
        (
            "/cpus",
            builtin(
                "cpus",
                vec![
                    PropertyType::new("#address-cells", Int),
                    PropertyType::new("#size-cells", Int),
                ],
            ),
        ),
        (
            "/cpus/cpu",
            builtin(
                "cpu",
                vec![
                    PropertyType::new("device_type", String),
                    PropertyType::new("clock-frequency", Int),
                    PropertyType::new("cpu-power-states", PHandles),
                    PropertyType::new("next-level-cache", PHandle),
                ],
            ),
        ),
        ("/aliases", builtin("aliases", Vec::new())),
        ("/chosen", builtin("chosen", Vec::new())),
        ("/zephyr,user", builtin("zephyr,user", Vec::new())),
        (
            "/memory",
            builtin(
                "memory",
                vec![
                    PropertyType::new("device_type", String),
                    PropertyType::new("reg", Array).required(),
                ],
            ),
        ),
    ])
}

/// Properties added to types of interrupt controllers and interrupt generating nodes.
fn interrupt_properties(controller: bool) -> Vec<PropertyType> {
    use ValueType::*;

    if controller {
        vec![
            PropertyType::new("interrupt-controller", Boolean),
            PropertyType::new("#interrupt-cells", Int),
            PropertyType::new("interrupt-map", Compound),
            PropertyType::new("interrupt-map-mask", Array),
            PropertyType::new("interrupt-map-pass-thru", Array),
        ]
    } else {
        vec![
            PropertyType::new("interrupt-parent", PHandle),
            PropertyType::new("interrupts", Array),
            PropertyType::new("interrupts-extended", PHandleArray),
            PropertyType::new("interrupt-names", StringArray),
        ]
    }
}

/// `/soc/uart@4000` becomes `/soc/uart`.
fn strip_addresses(path: &str) -> String {
    match path {
        "/" => "/".to_string(),
        _ => path
            .split('/')
            .map(|segment| segment.split('@').next().unwrap_or(segment))
            .collect::<Vec<_>>()
            .join("/"),
    }
}

/// The outcome of type resolution for one node.
#[derive(Debug, Default)]
pub struct Resolution {
    pub node_type: Option<Arc<NodeType>>,
    /// Compatibles that don't name a registered binding.
    pub unknown: Vec<String>,
    /// Compatibles whose bindings failed to load, with the reason.
    pub broken: Vec<(String, String)>,
}

/// Loads node types from binding directories.
pub struct TypeLoader {
    /// Candidate binding files per type name.
    names: HashMap<String, Vec<PathBuf>>,
    /// Binding files by file name, for includes.
    files: HashMap<String, PathBuf>,
    /// Bindings added from memory rather than from a directory.
    texts: HashMap<PathBuf, String>,
    loaded: HashMap<PathBuf, Option<Arc<NodeType>>>,
    /// Why a binding file failed to load.
    failures: HashMap<PathBuf, String>,
    loading: HashSet<PathBuf>,
    derived: HashMap<(String, bool, bool), Arc<NodeType>>,
    base: Arc<NodeType>,
    builtins: HashMap<&'static str, Arc<NodeType>>,
}

impl Default for TypeLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLoader {
    pub fn new() -> Self {
        let base = base_type();
        let builtins = builtin_types(&base);

        Self {
            names: HashMap::new(),
            files: HashMap::new(),
            texts: HashMap::new(),
            loaded: HashMap::new(),
            failures: HashMap::new(),
            loading: HashSet::new(),
            derived: HashMap::new(),
            base: Arc::new(base),
            builtins,
        }
    }

    /// Register every `.yaml` file under `dir`, returning the number of files found. The files
    /// are not parsed until a node needs them.
    pub fn add_binding_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize, crate::Error> {
        let mut count = 0;

        for entry in WalkDir::new(dir.as_ref()).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().map_or(false, |e| e == "yaml") {
                self.register(path.to_path_buf());
                count += 1;
            }
        }

        debug!("{}: {} binding files", dir.as_ref().display(), count);
        Ok(count)
    }

    /// Register a binding from memory, as if it was read from `<name>.yaml`.
    pub fn add_binding_str(&mut self, name: &str, text: impl Into<String>) {
        let path = PathBuf::from(format!("{}.yaml", name));
        self.texts.insert(path.clone(), text.into());
        self.loaded.remove(&path);
        self.failures.remove(&path);
        self.register(path);
    }

    fn register(&mut self, path: PathBuf) {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            return;
        };

        if let Some(file_name) = path.file_name().and_then(|s| s.to_str()) {
            self.files.insert(file_name.to_string(), path.clone());
        }

        let exact = self.names.entry(stem.clone()).or_default();
        if !exact.contains(&path) {
            exact.insert(0, path.clone());
        }

        for bus in BUS_SUFFIXES {
            if let Some(alias) = stem.strip_suffix(&format!("-{}", bus)) {
                let candidates = self.names.entry(alias.to_string()).or_default();
                if !candidates.contains(&path) {
                    candidates.push(path.clone());
                }
            }
        }
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// The type without any compatible.
    pub fn base(&self) -> Arc<NodeType> {
        self.base.clone()
    }

    /// Load the type named `name`, preferring a binding for `bus` when there are several.
    pub fn get(&mut self, name: &str, buses: &[String]) -> Option<Arc<NodeType>> {
        let candidates = self.names.get(name)?.clone();

        let types: Vec<Arc<NodeType>> = candidates.iter().filter_map(|p| self.load(p)).collect();

        types
            .iter()
            .find(|t| t.on_bus.as_ref().map_or(false, |b| buses.contains(b)))
            .or_else(|| types.iter().find(|t| t.on_bus.is_none()))
            .or_else(|| types.first())
            .cloned()
    }

    /// Why none of the bindings registered for `name` loaded.
    pub fn failure(&mut self, name: &str) -> Option<String> {
        let candidates = self.names.get(name)?.clone();
        if candidates.iter().any(|p| self.load(p).is_some()) {
            return None;
        }
        candidates.iter().find_map(|p| self.failures.get(p).cloned())
    }

    fn read(&self, path: &Path) -> Result<Binding, BindingError> {
        match self.texts.get(path) {
            Some(text) => Binding::parse(text).map_err(|source| BindingError::Yaml {
                path: path.to_path_buf(),
                source,
            }),
            None => Binding::load(path),
        }
    }

    fn load(&mut self, path: &Path) -> Option<Arc<NodeType>> {
        if let Some(loaded) = self.loaded.get(path) {
            return loaded.clone();
        }
        if !self.loading.insert(path.to_path_buf()) {
            warn!("{}: recursive include", path.display());
            return None;
        }

        let result = match self.read(path) {
            Ok(binding) => {
                let name = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default()
                    .to_string();
                let mut ty = self.build(&name, &binding);
                ty.file = Some(path.to_path_buf());
                debug!("loaded type {} from {}", ty.name, path.display());
                Some(Arc::new(ty))
            }
            Err(e) => {
                warn!("{}", e);
                self.failures.insert(path.to_path_buf(), e.to_string());
                None
            }
        };

        self.loading.remove(path);
        self.loaded.insert(path.to_path_buf(), result.clone());
        result
    }

    fn build(&mut self, name: &str, binding: &Binding) -> NodeType {
        let mut ty = NodeType {
            name: binding.compatible.clone().unwrap_or_else(|| name.to_string()),
            compatible: binding.compatible.clone(),
            description: binding.description.clone(),
            properties: binding
                .properties
                .iter()
                .flatten()
                .map(|(name, spec)| PropertyType::from_spec(name, spec))
                .collect(),
            bus: binding.bus.as_ref().map(|b| b.to_vec()).unwrap_or_default(),
            on_bus: binding.on_bus.clone(),
            cells: binding.cells(),
            ..Default::default()
        };

        if let Some(child) = &binding.child_binding {
            ty.child_binding = Some(Arc::new(self.build(&format!("{} child", ty.name), child)));
        }

        for include in binding.includes() {
            let path = self
                .files
                .get(&include.name)
                .or_else(|| self.files.get(&format!("{}.yaml", include.name)))
                .cloned();

            match path.and_then(|p| self.load(&p)) {
                Some(parent) => ty.inherit(&parent, Some(&include)),
                None => warn!("{}: unable to include {}", name, include.name),
            }
        }

        ty.declare_cells();
        ty.inherit(&self.base, None);
        ty
    }

    /// `ty` with the interrupt properties a node of it may additionally carry.
    fn with_interrupts(&mut self, ty: Arc<NodeType>, controller: bool, parent: bool) -> Arc<NodeType> {
        if !controller && !parent {
            return ty;
        }

        let key = (ty.name.clone(), controller, parent);
        if let Some(derived) = self.derived.get(&key) {
            if derived.file == ty.file {
                return derived.clone();
            }
        }

        let mut derived = (*ty).clone();
        for role in [controller.then_some(true), parent.then_some(false)]
            .into_iter()
            .flatten()
        {
            let extra = NodeType {
                properties: interrupt_properties(role),
                ..Default::default()
            };
            derived.inherit(&extra, None);
        }

        let derived = Arc::new(derived);
        self.derived.insert(key, derived.clone());
        derived
    }

    /// Find the most specific type of `node`. The node's parent must already be resolved.
    pub fn resolve(&mut self, node: NodeRef) -> Resolution {
        let compatibles: Vec<String> = node
            .property("compatible")
            .and_then(|p| p.strings())
            .map(|c| c.into_iter().map(str::to_string).collect())
            .unwrap_or_default();

        let parent_type = node.parent().and_then(|p| p.node_type().cloned());
        let buses = parent_type.as_ref().map(|t| t.bus.clone()).unwrap_or_default();

        let unknown: Vec<String> = compatibles
            .iter()
            .filter(|c| !self.has_type(c))
            .cloned()
            .collect();

        let path = strip_addresses(node.path());
        let mut node_type = self.builtins.get(path.as_str()).cloned();

        if node_type.is_none() {
            node_type = compatibles.iter().find_map(|c| self.get(c, &buses));
        }
        if node_type.is_none() {
            node_type = parent_type.and_then(|t| t.child_binding.clone());
        }
        if node_type.is_none() && compatibles.is_empty() {
            node_type = Some(self.base.clone());
        }

        let node_type = node_type.map(|ty| {
            let controller = node.has_property("interrupt-controller");
            let parent = node.has_property("interrupt-parent");
            self.with_interrupts(ty, controller, parent)
        });

        let mut broken = Vec::new();
        for compatible in &compatibles {
            if let Some(reason) = self.failure(compatible) {
                broken.push((compatible.clone(), reason));
            }
        }

        Resolution {
            node_type,
            unknown,
            broken,
        }
    }
}

/// Resolve the type of every node in `ctx`, parents first.
pub fn resolve_types(ctx: &mut Context, loader: &mut TypeLoader) {
    for id in ctx.walk() {
        let Some(node) = ctx.node_ref(id) else {
            continue;
        };
        let resolution = loader.resolve(node);

        if let Some(node) = ctx.node_mut(id) {
            node.node_type = resolution.node_type;
            node.unknown_compatibles = resolution.unknown;
            node.broken_bindings = resolution.broken;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{config::Config, source::MemoryProvider};

    fn loader() -> TypeLoader {
        let mut loader = TypeLoader::new();
        loader.add_binding_str(
            "base",
            "properties:\n  pinctrl-0:\n    type: phandles\n  interrupts:\n    type: array\n",
        );
        loader.add_binding_str(
            "i2c-controller",
            "include: base.yaml\nbus: i2c\nproperties:\n  clock-frequency:\n    type: int\n",
        );
        loader.add_binding_str(
            "vnd,i2c",
            "compatible: vnd,i2c\ninclude: i2c-controller.yaml\nproperties:\n  \
             clock-frequency:\n    required: true\n",
        );
        loader.add_binding_str(
            "vnd,sensor-i2c",
            "compatible: vnd,sensor\non-bus: i2c\nproperties:\n  mode:\n    type: int\n",
        );
        loader.add_binding_str(
            "vnd,sensor-spi",
            "compatible: vnd,sensor\non-bus: spi\nproperties:\n  spi-mode:\n    type: int\n",
        );
        loader.add_binding_str(
            "vnd,gpio",
            "compatible: vnd,gpio\ninclude: [base.yaml]\ngpio-cells: [pin, flags]\n\
             child-binding:\n  properties:\n    line:\n      type: int\n",
        );
        loader
    }

    #[test]
    fn inherit_properties() {
        let mut loader = loader();
        let ty = loader.get("vnd,i2c", &[]).unwrap();

        assert_eq!(ty.bus, vec!["i2c"]);

        let clock = ty.property("clock-frequency").unwrap();
        assert!(clock.required);
        assert_eq!(clock.types, vec![ValueType::Int]);

        // Through the include chain and from the base type.
        assert!(ty.property("pinctrl-0").is_some());
        assert_eq!(
            ty.property("status").and_then(|p| p.enumeration.as_ref()).map(Vec::len),
            Some(6)
        );

        let gpio = loader.get("vnd,gpio", &[]).unwrap();
        assert_eq!(gpio.cell_names("gpio"), Some(&["pin".to_string(), "flags".to_string()][..]));
        assert!(gpio.property("#gpio-cells").is_some());
        assert!(gpio.child_binding.as_ref().unwrap().property("line").is_some());
    }

    #[test]
    fn select_by_bus() {
        let mut loader = loader();

        for (buses, expected) in [
            (vec!["i2c".to_string()], "mode"),
            (vec!["spi".to_string()], "spi-mode"),
        ] {
            let ty = loader.get("vnd,sensor", &buses).unwrap();
            assert!(ty.property(expected).is_some(), "{:?}", buses);
        }

        assert!(loader.get("vnd,unknown", &[]).is_none());
    }

    #[test]
    fn resolve_nodes() {
        let provider = MemoryProvider::new().with(
            "board.dts",
            "/ {\n\
             \tcpus { cpu@0 { }; };\n\
             \ti2c0: i2c@1000 {\n\
             \t\tcompatible = \"vnd,i2c\";\n\
             \t\tsensor@10 { compatible = \"vnd,sensor\"; };\n\
             \t};\n\
             \tgpio@2000 {\n\
             \t\tcompatible = \"vnd,gpio\";\n\
             \t\tinterrupt-controller;\n\
             \t\tline0 { };\n\
             \t};\n\
             \tmystery { compatible = \"vnd,missing\"; };\n\
             \tmixed { compatible = \"vnd,missing\", \"vnd,gpio\"; };\n\
             \tplain { };\n\
             };\n",
        );
        let mut ctx = Context::with_provider(Config::default(), Box::new(provider));
        ctx.set_board("board.dts");
        ctx.parse();

        let mut loader = loader();
        resolve_types(&mut ctx, &mut loader);

        let type_name = |path: &str| {
            ctx.node(path)
                .and_then(|n| n.node_type().map(|t| t.name.clone()))
        };

        for (path, expected) in [
            ("/", Some("root")),
            ("/cpus/cpu@0", Some("cpu")),
            ("/i2c@1000", Some("vnd,i2c")),
            ("/i2c@1000/sensor@10", Some("vnd,sensor")),
            ("/gpio@2000", Some("vnd,gpio")),
            ("/gpio@2000/line0", Some("vnd,gpio child")),
            ("/mystery", None),
            ("/mixed", Some("vnd,gpio")),
            ("/plain", Some("base")),
        ] {
            assert_eq!(type_name(path).as_deref(), expected, "{path}");
        }

        let sensor = ctx.node("/i2c@1000/sensor@10").unwrap();
        assert!(sensor.node_type().unwrap().property("mode").is_some());

        let gpio = ctx.node("/gpio@2000").unwrap();
        assert!(gpio.node_type().unwrap().property("#interrupt-cells").is_some());

        assert_eq!(ctx.node("/mystery").unwrap().node().unknown_compatibles, vec!["vnd,missing"]);
        assert_eq!(ctx.node("/mixed").unwrap().node().unknown_compatibles, vec!["vnd,missing"]);
    }

    #[test]
    fn interrupt_roles() {
        let provider = MemoryProvider::new().with(
            "board.dts",
            "/ {\n\
             \tintc: intc { interrupt-controller; #interrupt-cells = <1>; };\n\
             \tdev { interrupt-parent = <&intc>; interrupts = <1>; };\n\
             \tlone { interrupts = <1>; };\n\
             };\n",
        );
        let mut ctx = Context::with_provider(Config::default(), Box::new(provider));
        ctx.set_board("board.dts");
        ctx.parse();
        resolve_types(&mut ctx, &mut TypeLoader::new());

        let declares = |path: &str, property: &str| {
            ctx.node(path)
                .and_then(|n| n.node_type())
                .map_or(false, |t| t.property(property).is_some())
        };

        for (path, property, expected) in [
            ("/intc", "#interrupt-cells", true),
            ("/intc", "interrupts", false),
            ("/dev", "interrupts", true),
            ("/dev", "#interrupt-cells", false),
            ("/lone", "interrupts", false),
        ] {
            assert_eq!(declares(path, property), expected, "{path} {property}");
        }
    }

    #[test]
    fn broken_bindings() {
        let provider = MemoryProvider::new().with(
            "board.dts",
            "/ {\n\
             \tbad { compatible = \"vnd,bad\"; };\n\
             \tboth { compatible = \"vnd,bad\", \"vnd,gpio\"; };\n\
             };\n",
        );
        let mut ctx = Context::with_provider(Config::default(), Box::new(provider));
        ctx.set_board("board.dts");
        ctx.parse();

        let mut loader = loader();
        loader.add_binding_str("vnd,bad", "compatible: [");
        resolve_types(&mut ctx, &mut loader);

        let bad = ctx.node("/bad").unwrap();
        assert!(bad.node_type().is_none());
        assert!(bad.node().unknown_compatibles.is_empty());
        let (compatible, reason) = &bad.node().broken_bindings[0];
        assert_eq!(compatible, "vnd,bad");
        assert!(reason.starts_with("invalid binding vnd,bad.yaml"), "{reason}");

        let both = ctx.node("/both").unwrap();
        assert_eq!(both.node_type().map(|t| t.name.as_str()), Some("vnd,gpio"));
        assert_eq!(both.node().broken_bindings.len(), 1);

        assert!(loader.failure("vnd,gpio").is_none());
        assert!(loader.failure("vnd,unknown").is_none());

        // Replacing the text clears the failure.
        loader.add_binding_str("vnd,bad", "compatible: vnd,bad\n");
        assert!(loader.failure("vnd,bad").is_none());
    }
}
