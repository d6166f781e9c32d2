//! The node graph of a board and its overlays.
//!
//! Nodes and entries live in arenas keyed by [`NodeId`] and [`EntryId`]. A [`Node`] is a unique
//! path in the merged tree, while a [`NodeEntry`] is one textual occurrence of that node. Entries
//! reference their node and parent entry by id, so the graph has no ownership cycles and node
//! identity survives reparsing unrelated files.

use std::{
    collections::{HashMap, HashSet},
    fmt::Write as _,
    path::Path,
    sync::Arc,
};

use log::{debug, info};

use crate::{
    ast::{EntryId, FileId, NodeId, PHandle, Property},
    config::Config,
    diagnostic::Diagnostic,
    expr, parser,
    preprocessor::{self, IncludeStatement, Macro, MacroTable},
    source::{normalize, FsProvider, Line, Location, Position, SourceProvider},
    types::NodeType,
};

/// A `/delete-property/` inside an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDeletion {
    pub name: String,
    pub location: Location,
    /// Number of properties the entry defined before the deletion.
    pub index: usize,
}

/// One occurrence of a node in the source: a `name { ... }` block or a `&label { ... }`
/// extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: EntryId,
    pub node: NodeId,
    pub file: FileId,
    pub parent: Option<EntryId>,
    pub children: Vec<EntryId>,
    pub properties: Vec<Property>,
    pub deletions: Vec<PropertyDeletion>,
    pub labels: Vec<String>,
    /// From the name to the closing brace.
    pub location: Location,
    pub name_location: Location,
    /// The reference a `&label { ... }` entry was opened with.
    pub reference: Option<PHandle>,
}

/// A `/delete-node/` targeting a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDeletion {
    pub file: FileId,
    /// Position in the same sequence as entry ids.
    pub order: usize,
    pub location: Location,
}

/// The owner of a GPIO pin, recorded by the linter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinAssignment {
    pub node: NodeId,
    pub property: String,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub path: String,
    /// The last path segment, including the unit address. Empty for the root node.
    pub name: String,
    pub parent: Option<NodeId>,
    /// Sorted by file priority, then occurrence.
    pub entries: Vec<EntryId>,
    pub deletions: Vec<NodeDeletion>,
    /// Created for a reference that didn't resolve, so the entry still has somewhere to live.
    pub placeholder: bool,
    pub node_type: Option<Arc<NodeType>>,
    /// `compatible` strings without a registered binding.
    pub unknown_compatibles: Vec<String>,
    /// `compatible` strings whose binding failed to load, with the reason.
    pub broken_bindings: Vec<(String, String)>,
    /// Pin owners, for GPIO controllers.
    pub pins: Vec<Option<PinAssignment>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemReserve {
    pub address: i64,
    pub size: i64,
    pub location: Location,
}

/// One source document and its parse results.
#[derive(Debug, Clone)]
pub struct DtsFile {
    pub id: FileId,
    pub path: Arc<Path>,
    /// Text set by the caller. Files without it are read from the source provider.
    pub text: Option<String>,
    pub lines: Vec<Line>,
    pub includes: Vec<IncludeStatement>,
    /// Macros defined at the end of the file, inherited by the next file.
    pub macros: MacroTable,
    pub entries: Vec<EntryId>,
    pub roots: Vec<EntryId>,
    pub memreserves: Vec<MemReserve>,
    pub diagnostics: Vec<Diagnostic>,
    pub dirty: bool,
}

impl DtsFile {
    fn new(id: FileId, path: &Path) -> Self {
        Self {
            id,
            path: Arc::from(normalize(path).as_path()),
            text: None,
            lines: Vec::new(),
            includes: Vec::new(),
            macros: MacroTable::new(),
            entries: Vec::new(),
            roots: Vec::new(),
            memreserves: Vec::new(),
            diagnostics: Vec::new(),
            dirty: true,
        }
    }
}

pub struct Context {
    pub config: Config,
    provider: Box<dyn SourceProvider>,
    files: Vec<DtsFile>,
    nodes: HashMap<NodeId, Node>,
    entries: HashMap<EntryId, NodeEntry>,
    paths: HashMap<String, NodeId>,
    labels: HashMap<String, (NodeId, Location)>,
    next_node: usize,
    next_entry: usize,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self::with_provider(config, Box::new(FsProvider))
    }

    pub fn with_provider(config: Config, provider: Box<dyn SourceProvider>) -> Self {
        Self {
            config,
            provider,
            files: Vec::new(),
            nodes: HashMap::new(),
            entries: HashMap::new(),
            paths: HashMap::new(),
            labels: HashMap::new(),
            next_node: 0,
            next_entry: 0,
        }
    }

    pub fn provider(&self) -> &dyn SourceProvider {
        self.provider.as_ref()
    }

    /// Set the board file. Everything is reparsed on the next [`parse`](Self::parse).
    pub fn set_board(&mut self, path: impl AsRef<Path>) -> FileId {
        match self.files.first_mut() {
            Some(board) => {
                board.path = Arc::from(normalize(path.as_ref()).as_path());
                board.text = None;
            }
            None => self.files.push(DtsFile::new(FileId(0), path.as_ref())),
        }
        self.mark_dirty(FileId(0));

        FileId(0)
    }

    /// Add an overlay on top of the files already in the context.
    pub fn add_overlay(&mut self, path: impl AsRef<Path>) -> FileId {
        let id = FileId(self.files.len());
        self.files.push(DtsFile::new(id, path.as_ref()));
        id
    }

    /// Replace the text of a file, adding it as an overlay if it isn't part of the context yet.
    ///
    /// Later files may depend on labels of this one, so they are marked dirty too.
    pub fn set_text(&mut self, path: impl AsRef<Path>, text: impl Into<String>) -> FileId {
        let id = match self.file_id(path.as_ref()) {
            Some(id) => id,
            None if self.files.is_empty() => self.set_board(path.as_ref()),
            None => self.add_overlay(path.as_ref()),
        };

        self.files[id.0].text = Some(text.into());
        self.mark_dirty(id);
        id
    }

    fn mark_dirty(&mut self, id: FileId) {
        for file in self.files.iter_mut().skip(id.0) {
            file.dirty = true;
        }
    }

    pub fn files(&self) -> &[DtsFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> Option<&DtsFile> {
        self.files.get(id.0)
    }

    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        let path = normalize(path);
        self.files
            .iter()
            .find(|f| *f.path == *path)
            .map(|f| f.id)
    }

    /// Diagnostics of every file in the context.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.files
            .iter()
            .flat_map(|f| f.diagnostics.iter().cloned())
            .collect()
    }

    /// Reparse every dirty file, keeping the entries of clean files.
    pub fn parse(&mut self) -> Vec<Diagnostic> {
        self.reset();

        for idx in 0..self.files.len() {
            if self.files[idx].dirty {
                self.parse_file(FileId(idx));
            }
        }

        self.sort_entries();

        let diagnostics = self.diagnostics();
        info!(
            "parsed {} files: {} nodes, {} diagnostics",
            self.files.len(),
            self.nodes.len(),
            diagnostics.len()
        );
        diagnostics
    }

    fn parse_file(&mut self, id: FileId) {
        let path = self.files[id.0].path.clone();

        let text = match self.files[id.0].text.clone() {
            Some(text) => text,
            None => match self.provider.read(&path) {
                Ok(text) => text,
                Err(e) => {
                    let file = &mut self.files[id.0];
                    file.diagnostics = vec![Diagnostic::error(
                        Location::file_start(path.clone()),
                        format!("Unable to read {}: {}", path.display(), e),
                    )];
                    file.dirty = false;
                    return;
                }
            },
        };

        let macros = match id.0 {
            0 => self.predefined_macros(),
            n => self.files[n - 1].macros.clone(),
        };

        let pp = preprocessor::preprocess(
            &path,
            &text,
            macros,
            self.provider.as_ref(),
            &self.config.include_paths,
        );

        let mut diagnostics = pp.diagnostics;
        diagnostics.extend(parser::parse_lines(self, id, &pp.lines));

        let file = &mut self.files[id.0];
        file.lines = pp.lines;
        file.includes = pp.includes;
        file.macros = pp.macros;
        file.diagnostics = diagnostics;
        file.dirty = false;

        debug!(
            "{}: {} lines, {} entries",
            path.display(),
            file.lines.len(),
            file.entries.len()
        );
    }

    fn predefined_macros(&self) -> MacroTable {
        let origin: Arc<Path> = Arc::from(Path::new("<command-line>"));
        let mut macros = MacroTable::new();

        for (name, value) in &self.config.defines {
            macros.define(Macro::object(
                name.as_str(),
                value.as_str(),
                Location::file_start(origin.clone()),
            ));
        }

        macros
    }

    /// Drop the entries of dirty files, then rebuild the path and label tables from the clean
    /// files. Nodes that only dirty files referenced are removed.
    pub fn reset(&mut self) {
        let dirty: HashSet<FileId> = self
            .files
            .iter()
            .filter(|f| f.dirty)
            .map(|f| f.id)
            .collect();

        for id in &dirty {
            let file = &mut self.files[id.0];
            let removed = std::mem::take(&mut file.entries);
            file.roots.clear();
            file.memreserves.clear();
            file.diagnostics.clear();
            file.lines.clear();
            file.includes.clear();

            for eid in removed {
                if let Some(entry) = self.entries.remove(&eid) {
                    if let Some(node) = self.nodes.get_mut(&entry.node) {
                        node.entries.retain(|e| *e != eid);
                    }
                }
            }
        }

        for node in self.nodes.values_mut() {
            node.deletions.retain(|d| !dirty.contains(&d.file));
            node.node_type = None;
            node.unknown_compatibles.clear();
            node.broken_bindings.clear();
            node.pins.clear();
        }

        self.paths.clear();
        self.labels.clear();

        let mut adopted = HashSet::new();
        let clean: Vec<FileId> = self
            .files
            .iter()
            .filter(|f| !f.dirty)
            .map(|f| f.id)
            .collect();
        for id in clean {
            self.adopt_nodes(id, &mut adopted);
        }

        let before = self.nodes.len();
        self.nodes.retain(|id, _| adopted.contains(id));
        debug!(
            "reset: kept {} nodes, dropped {}",
            self.nodes.len(),
            before - self.nodes.len()
        );
    }

    /// Register the nodes and labels of an already parsed file.
    pub fn adopt_nodes(&mut self, file: FileId, adopted: &mut HashSet<NodeId>) {
        let Some(file) = self.files.get(file.0) else {
            return;
        };

        for eid in &file.entries {
            let Some(entry) = self.entries.get(eid) else {
                continue;
            };

            let mut next = Some(entry.node);
            while let Some(id) = next {
                if !adopted.insert(id) {
                    break;
                }
                let Some(node) = self.nodes.get(&id) else {
                    break;
                };
                self.paths.insert(node.path.clone(), id);
                next = node.parent;
            }

            for label in &entry.labels {
                self.labels
                    .entry(label.clone())
                    .or_insert_with(|| (entry.node, entry.name_location.clone()));
            }
        }
    }

    fn sort_entries(&mut self) {
        let entries = &self.entries;
        for node in self.nodes.values_mut() {
            node.entries
                .sort_by_key(|e| (entries.get(e).map(|e| e.file), *e));
        }
    }

    /* === Graph construction, used by the parser === */

    /// Get or create the node named `name` under `parent`. Without a parent this is the root.
    pub(crate) fn create_node(&mut self, parent: Option<NodeId>, name: &str) -> NodeId {
        let path = match parent.and_then(|p| self.nodes.get(&p)) {
            Some(p) if p.path == "/" => format!("/{}", name),
            Some(p) => format!("{}/{}", p.path, name),
            None => "/".to_string(),
        };

        if let Some(id) = self.paths.get(&path) {
            return *id;
        }

        let name = if parent.is_some() { name } else { "" };
        self.insert_node(path, name, parent, false)
    }

    /// Create a stand-in node for a reference that couldn't be resolved.
    pub(crate) fn placeholder(&mut self, reference: &PHandle) -> NodeId {
        let path = reference.to_string();
        if let Some(id) = self.paths.get(&path) {
            return *id;
        }

        let name = path.clone();
        self.insert_node(path, &name, None, true)
    }

    fn insert_node(
        &mut self,
        path: String,
        name: &str,
        parent: Option<NodeId>,
        placeholder: bool,
    ) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;

        debug!("new node {}", path);
        self.paths.insert(path.clone(), id);
        self.nodes.insert(
            id,
            Node {
                id,
                path,
                name: name.to_string(),
                parent,
                entries: Vec::new(),
                deletions: Vec::new(),
                placeholder,
                node_type: None,
                unknown_compatibles: Vec::new(),
                broken_bindings: Vec::new(),
                pins: Vec::new(),
            },
        );
        id
    }

    /// Allocate an entry id. Ids also order deletions relative to entries.
    pub(crate) fn next_entry_id(&mut self) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        id
    }

    /// Add a new entry to its node, parent entry and file.
    pub(crate) fn add_entry(&mut self, entry: NodeEntry) -> EntryId {
        let id = entry.id;

        if let Some(node) = self.nodes.get_mut(&entry.node) {
            node.entries.push(id);
        }
        match entry.parent.and_then(|p| self.entries.get_mut(&p)) {
            Some(parent) => parent.children.push(id),
            None => self.files[entry.file.0].roots.push(id),
        }
        self.files[entry.file.0].entries.push(id);
        self.entries.insert(id, entry);

        id
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> Option<&mut NodeEntry> {
        self.entries.get_mut(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub(crate) fn add_memreserve(&mut self, file: FileId, memreserve: MemReserve) {
        self.files[file.0].memreserves.push(memreserve);
    }

    /// Register a label. Returns the location of a previous definition on another node.
    pub(crate) fn add_label(
        &mut self,
        label: &str,
        node: NodeId,
        location: Location,
    ) -> Option<Location> {
        match self.labels.get(label) {
            Some((existing, _)) if *existing == node => None,
            Some((_, prev)) => Some(prev.clone()),
            None => {
                self.labels.insert(label.to_string(), (node, location));
                None
            }
        }
    }

    pub(crate) fn delete_node(&mut self, node: NodeId, file: FileId, location: Location) {
        let order = self.next_entry_id().0;
        if let Some(node) = self.nodes.get_mut(&node) {
            node.deletions.push(NodeDeletion {
                file,
                order,
                location,
            });
        }
    }

    /* === Queries === */

    pub fn node_ref(&self, id: NodeId) -> Option<NodeRef> {
        self.nodes.get(&id).map(|node| NodeRef { ctx: self, node })
    }

    pub fn entry(&self, id: EntryId) -> Option<&NodeEntry> {
        self.entries.get(&id)
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.node_by_path("/")
    }

    /// All nodes, including deleted and placeholder ones, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef> {
        self.nodes.values().map(move |node| NodeRef { ctx: self, node })
    }

    /// Resolve `&label`, `&{/path}` or a plain `/path`.
    pub fn node(&self, reference: &str) -> Option<NodeRef> {
        let reference = reference.trim();

        match reference.strip_prefix('&') {
            Some(rest) => match rest.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
                Some(path) => self.node_by_path(path),
                None => self.label(rest),
            },
            None => self.node_by_path(reference),
        }
    }

    pub fn label(&self, label: &str) -> Option<NodeRef> {
        self.labels.get(label).and_then(|(id, _)| self.node_ref(*id))
    }

    pub(crate) fn lookup(&self, phandle: &PHandle) -> Option<NodeId> {
        if phandle.is_label {
            self.labels.get(&phandle.target).map(|(id, _)| *id)
        } else {
            self.node_by_path(&phandle.target).map(|n| n.id())
        }
    }

    /// Find a node by path. Segments without a unit address match a child with one if there
    /// is exactly one such child.
    pub fn node_by_path(&self, path: &str) -> Option<NodeRef> {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };

        if let Some(id) = self.paths.get(trimmed) {
            return self.node_ref(*id);
        }
        if !trimmed.starts_with('/') {
            return None;
        }

        let mut current = self.root()?;
        for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
            let children = current.children();
            let exact = children.iter().find(|c| c.name() == segment);

            current = match exact {
                Some(child) => *child,
                None if !segment.contains('@') => {
                    let mut matches = children.iter().filter(|c| c.base_name() == segment);
                    match (matches.next(), matches.next()) {
                        (Some(child), None) => *child,
                        _ => return None,
                    }
                }
                None => return None,
            };
        }

        Some(current)
    }

    /// Node ids in depth-first order from the root, skipping deleted nodes.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack: Vec<NodeRef> = self.root().into_iter().filter(|r| !r.is_deleted()).collect();

        while let Some(node) = stack.pop() {
            order.push(node.id());
            stack.extend(node.children().into_iter().rev());
        }

        order
    }

    /// The innermost node with an entry in `file` covering `pos`.
    pub fn get_node_at(&self, pos: Position, file: &Path) -> Option<NodeRef> {
        let id = self.file_id(file)?;
        let path = self.files[id.0].path.clone();

        self.files[id.0]
            .entries
            .iter()
            .filter_map(|e| self.entries.get(e))
            .filter(|e| e.location.contains(&path, pos))
            .max_by_key(|e| e.location.start)
            .and_then(|e| self.node_ref(e.node))
    }

    /// The property in `file` covering `pos`, with the node it belongs to.
    pub fn get_property_at(&self, pos: Position, file: &Path) -> Option<(NodeRef, &Property)> {
        let id = self.file_id(file)?;
        let path = self.files[id.0].path.clone();

        self.files[id.0]
            .entries
            .iter()
            .filter_map(|e| self.entries.get(e))
            .find_map(|e| {
                e.properties
                    .iter()
                    .find(|p| p.location.contains(&path, pos))
                    .and_then(|p| Some((self.node_ref(e.node)?, p)))
            })
    }

    /// Find a node by `&reference`, label name or numeric `phandle` value.
    pub fn get_phandle_node(&self, handle: &str) -> Option<NodeRef> {
        let handle = handle.trim();

        if handle.starts_with('&') {
            return self.node(handle);
        }

        match expr::literal_value(handle) {
            Some((value, _)) => self.walk().into_iter().find_map(|id| {
                let node = self.node_ref(id)?;
                let phandle = node.property("phandle")?.number()?;
                (phandle == value).then(|| node)
            }),
            None => self.label(handle),
        }
    }

    /// Render the merged tree as devicetree source.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root().filter(|r| !r.is_deleted()) {
            dump_node(&mut out, root, 0);
        }
        out
    }
}

fn dump_node(out: &mut String, node: NodeRef, depth: usize) {
    let indent = "\t".repeat(depth);

    let _ = write!(out, "{}", indent);
    for label in node.labels() {
        let _ = write!(out, "{}: ", label);
    }
    let name = if node.path() == "/" { "/" } else { node.name() };
    let _ = writeln!(out, "{} {{", name);

    for prop in node.unique_properties() {
        let _ = writeln!(out, "{}\t{}", indent, prop);
    }
    for child in node.children() {
        dump_node(out, child, depth + 1);
    }

    let _ = writeln!(out, "{}}};", indent);
}

/// Properties of a node after folding its entries in priority order.
#[derive(Debug, Default)]
pub struct Fold<'a> {
    /// The effective properties, in order of first definition.
    pub properties: Vec<&'a Property>,
    /// Definitions overridden by a later one, paired with the one that overrode them.
    pub shadowed: Vec<(&'a Property, &'a Property)>,
}

/// Largest `#<name>-cells` count taken into account.
pub const MAX_CELLS: usize = 32;

/// A borrowed view of a node and its context.
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    ctx: &'a Context,
    node: &'a Node,
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    pub fn path(&self) -> &'a str {
        &self.node.path
    }

    pub fn name(&self) -> &'a str {
        &self.node.name
    }

    /// The name without its unit address.
    pub fn base_name(&self) -> &'a str {
        self.node.name.split('@').next().unwrap_or_default()
    }

    /// The unit address, as written.
    pub fn address(&self) -> Option<&'a str> {
        self.node.name.split_once('@').map(|(_, a)| a)
    }

    /// The unit address as a number, if it is plain hex.
    pub fn unit_address(&self) -> Option<i64> {
        let address = self.address()?;
        let first = address.split(',').next().unwrap_or(address);
        let first = first
            .strip_prefix("0x")
            .or_else(|| first.strip_prefix("0X"))
            .unwrap_or(first);
        i64::from_str_radix(first, 16).ok()
    }

    pub fn entries(&self) -> Vec<&'a NodeEntry> {
        self.node
            .entries
            .iter()
            .filter_map(|e| self.ctx.entries.get(e))
            .collect()
    }

    /// Fold entries in priority order. The last definition of a property wins, and
    /// `/delete-property/` removes earlier ones.
    pub fn fold(&self) -> Fold<'a> {
        let mut fold = Fold::default();

        for entry in self.entries() {
            let mut deletions = entry.deletions.iter().peekable();

            for (idx, prop) in entry.properties.iter().enumerate() {
                while let Some(d) = deletions.next_if(|d| d.index <= idx) {
                    fold.properties.retain(|p| p.name != d.name);
                }

                match fold.properties.iter_mut().find(|p| p.name == prop.name) {
                    Some(slot) => {
                        fold.shadowed.push((*slot, prop));
                        *slot = prop;
                    }
                    None => fold.properties.push(prop),
                }
            }

            for d in deletions {
                fold.properties.retain(|p| p.name != d.name);
            }
        }

        fold
    }

    pub fn unique_properties(&self) -> Vec<&'a Property> {
        self.fold().properties
    }

    pub fn property(&self, name: &str) -> Option<&'a Property> {
        self.fold().properties.into_iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// A `#<name>-cells` count. Counts above [`MAX_CELLS`] are treated as absent.
    pub fn cells(&self, name: &str) -> Option<usize> {
        self.property(name)
            .and_then(Property::number)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n <= MAX_CELLS)
    }

    /// `#address-cells` for this node's children.
    pub fn address_cells(&self) -> usize {
        self.cells("#address-cells").unwrap_or(2)
    }

    /// `#size-cells` for this node's children.
    pub fn size_cells(&self) -> usize {
        self.cells("#size-cells").unwrap_or(1)
    }

    /// Child nodes in order of first appearance, without deleted ones.
    pub fn children(&self) -> Vec<NodeRef<'a>> {
        let mut seen = HashSet::new();
        let mut children = Vec::new();

        for entry in self.entries() {
            for child in &entry.children {
                let Some(child) = self.ctx.entries.get(child) else {
                    continue;
                };
                if !seen.insert(child.node) {
                    continue;
                }
                if let Some(node) = self.ctx.node_ref(child.node) {
                    if !node.is_deleted() {
                        children.push(node);
                    }
                }
            }
        }

        children
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        self.ctx.node_ref(self.node.parent?)
    }

    pub fn node_type(&self) -> Option<&'a Arc<NodeType>> {
        self.node.node_type.as_ref()
    }

    pub fn labels(&self) -> Vec<&'a str> {
        let mut labels: Vec<&str> = Vec::new();
        for entry in self.entries() {
            for label in &entry.labels {
                if !labels.contains(&label.as_str()) {
                    labels.push(label);
                }
            }
        }
        labels
    }

    /// Whether `status` is absent, `okay` or `ok`.
    pub fn enabled(&self) -> bool {
        match self.property("status").and_then(Property::string) {
            None => true,
            Some(status) => status == "okay" || status == "ok",
        }
    }

    /// Whether a `/delete-node/` came after the last entry of this node or of an ancestor.
    pub fn is_deleted(&self) -> bool {
        let last = self
            .node
            .entries
            .last()
            .and_then(|e| self.ctx.entries.get(e))
            .map(|e| (e.file, e.id.0));

        let deleted = self
            .node
            .deletions
            .iter()
            .any(|d| last.map_or(true, |last| (d.file, d.order) > last));

        deleted || self.parent().map_or(false, |p| p.is_deleted())
    }

    /// Where the node was first named.
    pub fn location(&self) -> Option<&'a Location> {
        self.entries().first().map(|e| &e.name_location)
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeRef").field(&self.node.path).finish()
    }
}
