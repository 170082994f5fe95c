//! Runtime parameter values and lists.
//!
//! [`ParamValue`] is the closed sum over every primitive the hub understands.
//! Serialization keeps the variant discriminator (externally tagged), so
//! persisted values restore with the exact same type.

use std::cmp::Ordering;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primitive type tag for parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Uuid,
    String,
    StringList,
    Int,
    Uint,
    Double,
    Bool,
    Color,
    Time,
    Object,
    /// Accepts any value.
    Variant,
}

impl ParamKind {
    /// The neutral default a state of this kind starts out with.
    pub fn default_value(&self) -> ParamValue {
        match self {
            Self::Uuid => ParamValue::Uuid(Uuid::nil()),
            Self::String => ParamValue::String(String::new()),
            Self::StringList => ParamValue::StringList(Vec::new()),
            Self::Int => ParamValue::Int(0),
            Self::Uint => ParamValue::Uint(0),
            Self::Double => ParamValue::Double(0.0),
            Self::Bool => ParamValue::Bool(false),
            Self::Color => ParamValue::Color(Color::default()),
            Self::Time => ParamValue::Time(NaiveTime::MIN),
            Self::Object => ParamValue::Object(serde_json::Value::Null),
            Self::Variant => ParamValue::Variant(serde_json::Value::Null),
        }
    }
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uuid => "uuid",
            Self::String => "string",
            Self::StringList => "stringlist",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::Color => "color",
            Self::Time => "time",
            Self::Object => "object",
            Self::Variant => "variant",
        };
        write!(f, "{}", name)
    }
}

/// RGB color value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A tagged parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamValue {
    Uuid(Uuid),
    String(String),
    StringList(Vec<String>),
    Int(i64),
    Uint(u64),
    Double(f64),
    Bool(bool),
    Color(Color),
    Time(NaiveTime),
    Object(serde_json::Value),
    Variant(serde_json::Value),
}

impl ParamValue {
    /// The primitive kind of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Uuid(_) => ParamKind::Uuid,
            Self::String(_) => ParamKind::String,
            Self::StringList(_) => ParamKind::StringList,
            Self::Int(_) => ParamKind::Int,
            Self::Uint(_) => ParamKind::Uint,
            Self::Double(_) => ParamKind::Double,
            Self::Bool(_) => ParamKind::Bool,
            Self::Color(_) => ParamKind::Color,
            Self::Time(_) => ParamKind::Time,
            Self::Object(_) => ParamKind::Object,
            Self::Variant(_) => ParamKind::Variant,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Uint(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            Self::String(v) => Uuid::parse_str(v).ok(),
            _ => None,
        }
    }

    /// Convert this value into the given kind, if a lossless conversion
    /// exists. Numeric widening is allowed; strings and uuids convert into
    /// each other by parsing/formatting; `Variant` accepts everything.
    pub fn coerce_to(&self, kind: ParamKind) -> Option<ParamValue> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        match kind {
            ParamKind::Int => self.as_i64().map(ParamValue::Int),
            ParamKind::Uint => self.as_u64().map(ParamValue::Uint),
            ParamKind::Double => self.as_f64().map(ParamValue::Double),
            ParamKind::Uuid => self.as_uuid().map(ParamValue::Uuid),
            ParamKind::String => match self {
                Self::Uuid(v) => Some(ParamValue::String(v.to_string())),
                _ => None,
            },
            ParamKind::Variant => {
                serde_json::to_value(self).ok().map(ParamValue::Variant)
            }
            _ => None,
        }
    }

    /// Ordered comparison inside one primitive domain. Values of different,
    /// non-numeric kinds are unordered.
    pub fn compare(&self, other: &ParamValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Uint(a), Self::Uint(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Uuid(_) => "uuid",
            Self::String(_) => "string",
            Self::StringList(_) => "stringlist",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::Color(_) => "color",
            Self::Time(_) => "time",
            Self::Object(_) => "object",
            Self::Variant(_) => "variant",
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Uuid> for ParamValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An order-irrelevant mapping from parameter name to value with unique names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamList(Vec<Param>);

impl ParamList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the parameter with the given name.
    pub fn set(&mut self, param: Param) {
        if let Some(existing) = self.0.iter_mut().find(|p| p.name == param.name) {
            existing.value = param.value;
        } else {
            self.0.push(param);
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(Param::new(name, value));
        self
    }

    pub fn value(&self, name: &str) -> Option<&ParamValue> {
        self.0.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Param> for ParamList {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        let mut list = Self::new();
        for param in iter {
            list.set(param);
        }
        list
    }
}

impl<'a> IntoIterator for &'a ParamList {
    type Item = &'a Param;
    type IntoIter = std::slice::Iter<'a, Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl PartialEq for ParamList {
    /// Order-irrelevant equality over the name/value pairs.
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .all(|p| other.value(&p.name) == Some(&p.value))
    }
}
