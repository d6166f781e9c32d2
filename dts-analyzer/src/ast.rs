use std::{fmt, str::FromStr};

use crate::source::Location;

/// Index of a [`Node`](crate::context::Node) in its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Index of a [`NodeEntry`](crate::context::NodeEntry) in its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub usize);

/// Index of a file in its context. Also the file's priority: the board is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub usize);

/// A reference to another node, either `&label` or `&{/path}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PHandle {
    /// Label name or absolute path, without the `&` and braces.
    pub target: String,
    pub is_label: bool,
}

impl PHandle {
    pub fn label(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_label: true,
        }
    }

    pub fn path(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            is_label: false,
        }
    }
}

impl fmt::Display for PHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_label {
            write!(f, "&{}", self.target)
        } else {
            write!(f, "&{{{}}}", self.target)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A property without a value, like `gpio-controller;`.
    Boolean,
    Integer { value: i64, hex: bool },
    /// A parenthesized expression in a cell array.
    Expression { raw: String, value: i64 },
    String(String),
    ByteString(Vec<u8>),
    /// The cells of a `< ... >` array. Each is an integer, expression or phandle.
    CellArray(Vec<PropertyValue>),
    PHandle(PHandle),
}

impl Value {
    /// The numeric value of an integer or expression.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer { value, .. } | Value::Expression { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_phandle(&self) -> Option<&PHandle> {
        match self {
            Value::PHandle(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyValue {
    pub value: Value,
    pub location: Location,
}

impl PropertyValue {
    pub fn new(value: Value, location: Location) -> Self {
        Self { value, location }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::Boolean => Ok(()),
            Value::Integer { value, hex: true } => write!(f, "{:#x}", value),
            Value::Integer { value, hex: false } => write!(f, "{}", value),
            Value::Expression { raw, .. } => write!(f, "({})", raw),
            Value::String(s) => write!(f, "\"{}\"", s.escape_default()),
            Value::ByteString(bytes) => {
                let bytes: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                write!(f, "[{}]", bytes.join(" "))
            }
            Value::CellArray(cells) => {
                let cells: Vec<String> = cells.iter().map(ToString::to_string).collect();
                write!(f, "<{}>", cells.join(" "))
            }
            Value::PHandle(p) => write!(f, "{}", p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub values: Vec<PropertyValue>,
    pub labels: Vec<String>,
    pub entry: EntryId,
    /// The whole property, from name to the last value.
    pub location: Location,
    pub name_location: Location,
}

impl Property {
    /// Every cell of every cell array value, in order.
    pub fn cells(&self) -> impl Iterator<Item = &PropertyValue> {
        self.values.iter().flat_map(|v| match &v.value {
            Value::CellArray(cells) => cells.as_slice(),
            _ => &[][..],
        })
    }

    /// All cells as numbers, if every value is a cell array of numbers.
    pub fn numbers(&self) -> Option<Vec<i64>> {
        if !self
            .values
            .iter()
            .all(|v| matches!(v.value, Value::CellArray(_)))
        {
            return None;
        }
        self.cells().map(|c| c.value.as_int()).collect()
    }

    /// The value of a property holding a single number.
    pub fn number(&self) -> Option<i64> {
        match self.numbers()?.as_slice() {
            [n] => Some(*n),
            _ => None,
        }
    }

    /// The first string value.
    pub fn string(&self) -> Option<&str> {
        self.values.first()?.value.as_str()
    }

    /// All values as strings, if every value is a string.
    pub fn strings(&self) -> Option<Vec<&str>> {
        self.values.iter().map(|v| v.value.as_str()).collect()
    }

    /// The target of a property holding a single phandle, written bare or in a cell array.
    pub fn phandle(&self) -> Option<&PHandle> {
        match self.values.as_slice() {
            [v] => match &v.value {
                Value::PHandle(p) => Some(p),
                Value::CellArray(cells) if cells.len() == 1 => cells[0].value.as_phandle(),
                _ => None,
            },
            _ => None,
        }
    }

    /// Every phandle in the property, bare or inside cell arrays, with its location.
    pub fn phandles(&self) -> Vec<(&PHandle, &Location)> {
        let mut out = Vec::new();
        for v in &self.values {
            match &v.value {
                Value::PHandle(p) => out.push((p, &v.location)),
                Value::CellArray(cells) => out.extend(
                    cells
                        .iter()
                        .filter_map(|c| c.value.as_phandle().map(|p| (p, &c.location))),
                ),
                _ => {}
            }
        }
        out
    }

    pub fn is_boolean(&self) -> bool {
        self.values.iter().all(|v| v.value == Value::Boolean)
    }

    /// The type of the property, inferred from the shape of its values.
    pub fn value_type(&self) -> ValueType {
        let values = &self.values;

        if values.iter().all(|v| v.value == Value::Boolean) {
            return ValueType::Boolean;
        }

        if values.iter().all(|v| matches!(v.value, Value::String(_))) {
            return if values.len() == 1 {
                ValueType::String
            } else {
                ValueType::StringArray
            };
        }

        if values.iter().all(|v| matches!(v.value, Value::PHandle(_))) {
            return if values.len() == 1 {
                ValueType::PHandle
            } else {
                ValueType::PHandles
            };
        }

        if let [PropertyValue {
            value: Value::ByteString(_),
            ..
        }] = values.as_slice()
        {
            return ValueType::Uint8Array;
        }

        if values.iter().all(|v| matches!(v.value, Value::CellArray(_))) {
            let (mut ints, mut phandles) = (0, 0);
            for cell in self.cells() {
                match cell.value {
                    Value::PHandle(_) => phandles += 1,
                    _ => ints += 1,
                }
            }

            return match (ints, phandles) {
                (0, 0) => ValueType::Array,
                (1, 0) => ValueType::Int,
                (_, 0) => ValueType::Array,
                (0, 1) => ValueType::PHandle,
                (0, _) => ValueType::PHandles,
                _ => ValueType::PHandleArray,
            };
        }

        ValueType::Invalid
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_boolean() {
            return write!(f, "{};", self.name);
        }

        let values: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        write!(f, "{} = {};", self.name, values.join(", "))
    }
}

/// Property types, named as in binding files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    Int,
    Array,
    String,
    StringArray,
    Uint8Array,
    PHandle,
    PHandles,
    PHandleArray,
    Path,
    Compound,
    Invalid,
}

impl ValueType {
    /// Whether a value of type `actual` is acceptable where `self` is declared.
    pub fn accepts(self, actual: ValueType) -> bool {
        use ValueType::*;

        if self == actual || self == Compound {
            return true;
        }

        matches!(
            (self, actual),
            (String, StringArray)
                | (StringArray, String)
                | (PHandleArray, PHandles)
                | (PHandleArray, PHandle)
                | (PHandles, PHandleArray)
                | (PHandles, PHandle)
                | (PHandle, PHandles)
                | (PHandle, PHandleArray)
                | (Array, Int)
                | (Int, Array)
                | (Path, PHandle)
                | (Path, String)
        )
    }

    fn name(self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Int => "int",
            ValueType::Array => "array",
            ValueType::String => "string",
            ValueType::StringArray => "string-array",
            ValueType::Uint8Array => "uint8-array",
            ValueType::PHandle => "phandle",
            ValueType::PHandles => "phandles",
            ValueType::PHandleArray => "phandle-array",
            ValueType::Path => "path",
            ValueType::Compound => "compound",
            ValueType::Invalid => "invalid",
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "boolean" => ValueType::Boolean,
            "int" => ValueType::Int,
            "array" => ValueType::Array,
            "string" => ValueType::String,
            "string-array" => ValueType::StringArray,
            "uint8-array" => ValueType::Uint8Array,
            "phandle" => ValueType::PHandle,
            "phandles" => ValueType::PHandles,
            "phandle-array" => ValueType::PHandleArray,
            "path" => ValueType::Path,
            "compound" => ValueType::Compound,
            _ => return Err(format!("unknown property type \"{}\"", s)),
        })
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
