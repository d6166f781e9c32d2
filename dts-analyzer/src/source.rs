use std::{
    collections::HashMap,
    fmt, fs, io,
    ops::Range,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

/// A zero-based line/column pair. Columns are byte offsets into the line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// A byte range in a single source file, expressed as a start and end position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Arc<Path>,
    pub start: Position,
    pub end: Position,
}

impl Location {
    pub fn new(file: Arc<Path>, start: Position, end: Position) -> Self {
        Self { file, start, end }
    }

    /// A location covering a column range on a single line.
    pub fn on_line(file: Arc<Path>, line: usize, columns: Range<usize>) -> Self {
        Self {
            file,
            start: Position::new(line, columns.start),
            end: Position::new(line, columns.end),
        }
    }

    /// An empty location at the start of a file.
    pub fn file_start(file: Arc<Path>) -> Self {
        Self::on_line(file, 0, 0..0)
    }

    /// Whether `pos` in `file` falls inside this location. The end is inclusive so that a
    /// cursor placed right after a token still hits it.
    pub fn contains(&self, file: &Path, pos: Position) -> bool {
        *self.file == *file && self.start <= pos && pos <= self.end
    }

    /// Whether this location fully encloses `other`.
    pub fn encloses(&self, other: &Location) -> bool {
        self.file == other.file && self.start <= other.start && other.end <= self.end
    }

    /// Create a location spanning from the start of `self` to the end of `other`.
    pub fn to(&self, other: &Location) -> Location {
        Location {
            file: self.file.clone(),
            start: self.start,
            end: other.end.max(self.start),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.start.line + 1,
            self.start.column + 1
        )
    }
}

/// A single macro substitution on a source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroInstance {
    pub name: String,
    /// Byte range of the macro invocation in the raw line.
    pub range: Range<usize>,
    /// The raw invocation text, including any argument list.
    pub raw: String,
    /// The text the invocation was replaced with.
    pub inserted: String,
}

/// A physical source line after preprocessing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub file: Arc<Path>,
    /// Zero-based line number in `file`.
    pub number: usize,
    pub raw: String,
    pub text: String,
    pub macros: Vec<MacroInstance>,
}

impl Line {
    /// A line that went through preprocessing without any substitution.
    pub fn plain(file: Arc<Path>, number: usize, text: &str) -> Self {
        Self {
            file,
            number,
            raw: text.to_string(),
            text: text.to_string(),
            macros: Vec::new(),
        }
    }

    /// Map a column in the expanded text back to a column in the raw text.
    ///
    /// Columns inside a substitution map to the start of the invocation, or to its end when
    /// `end` is set, so that ranges stay anchored on the macro name the user wrote.
    pub fn raw_column(&self, column: usize, end: bool) -> usize {
        let mut delta: isize = 0;

        for m in &self.macros {
            let start = (m.range.start as isize + delta) as usize;
            if column < start || (end && column == start) {
                break;
            }

            let stop = start + m.inserted.len();
            if column < stop || (end && column == stop) {
                return if end { m.range.end } else { m.range.start };
            }

            delta += m.inserted.len() as isize - m.raw.len() as isize;
        }

        (column as isize - delta).max(0) as usize
    }

    /// The macro substitution covering the expanded column `column`, if any.
    pub fn macro_at(&self, column: usize) -> Option<&MacroInstance> {
        let mut delta: isize = 0;

        for m in &self.macros {
            let start = (m.range.start as isize + delta) as usize;
            if column >= start && column < start + m.inserted.len() {
                return Some(m);
            }
            delta += m.inserted.len() as isize - m.raw.len() as isize;
        }

        None
    }
}

/// Acquires source text from storage.
///
/// This is the only I/O boundary of the analyzer: everything after reading text is synchronous.
pub trait SourceProvider {
    fn read(&self, path: &Path) -> io::Result<String>;
    fn exists(&self, path: &Path) -> bool;
}

/// Reads sources from the file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProvider;

impl SourceProvider for FsProvider {
    fn read(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Serves sources from memory, keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    files: HashMap<PathBuf, String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), text.into());
    }

    pub fn with(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }
}

impl SourceProvider for MemoryProvider {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(&normalize(path))
    }
}

/// Lexically normalize a path, dropping `.` components and folding `..` into their parent.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            c => out.push(c.as_os_str()),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_with_macro() -> Line {
        // raw:      "reg = <SIZE>;"  SIZE -> 0x1000
        // expanded: "reg = <0x1000>;"
        Line {
            file: Arc::from(Path::new("a.dts")),
            number: 3,
            raw: "reg = <SIZE>;".into(),
            text: "reg = <0x1000>;".into(),
            macros: vec![MacroInstance {
                name: "SIZE".into(),
                range: 7..11,
                raw: "SIZE".into(),
                inserted: "0x1000".into(),
            }],
        }
    }

    #[test]
    fn raw_columns() {
        let line = line_with_macro();

        for (column, end, expected) in [
            (0, false, 0),
            (6, false, 6),
            (7, false, 7),
            (9, false, 7),
            (9, true, 11),
            (13, true, 11),
            (13, false, 11),
            (14, false, 12),
        ] {
            assert_eq!(line.raw_column(column, end), expected, "column {column}");
        }
    }

    #[test]
    fn macro_lookup() {
        let line = line_with_macro();

        assert_eq!(line.macro_at(8).map(|m| m.name.as_str()), Some("SIZE"));
        assert!(line.macro_at(2).is_none());
        assert!(line.macro_at(13).is_none());
    }

    #[test]
    fn normalize_paths() {
        for (input, expected) in [
            ("a/b/../c.dtsi", "a/c.dtsi"),
            ("./a/./b.h", "a/b.h"),
            ("/x/y/../../z", "/z"),
        ] {
            assert_eq!(normalize(Path::new(input)), PathBuf::from(expected));
        }
    }

    #[test]
    fn memory_provider_normalizes() {
        let provider = MemoryProvider::new().with("boards/../dts/a.dtsi", "/ { };");

        assert!(provider.exists(Path::new("dts/a.dtsi")));
        assert_eq!(provider.read(Path::new("./dts/a.dtsi")).unwrap(), "/ { };");
        assert!(provider.read(Path::new("dts/b.dtsi")).is_err());
    }
}
