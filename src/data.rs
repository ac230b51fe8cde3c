//! Data - the value type every translator converts to and from.
//!
//! `Data` is the only thing a storage backend ever persists. Domain values
//! reach it through a [`Translator`](crate::Translator), and its JSON form is
//! the default string encoding used for keys and on-disk files.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TranslationError;

/// A stored number.
///
/// Integers keep their exact `i64` representation so large identifiers
/// survive a round trip; everything else is an `f64`. An integer and a float
/// holding the same integral value are equal and hash the same.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integer view of the number. Out-of-range values clamp to
    /// `i64::MIN`/`i64::MAX`, fractions truncate toward zero and NaN is 0.
    pub fn as_i64(self) -> i64 {
        match self {
            Number::Integer(i) => i,
            Number::Float(f) => f as i64,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Number::Integer(_))
    }

    fn integral(self) -> Option<i64> {
        match self {
            Number::Integer(i) => Some(i),
            // i64::MAX as f64 rounds up to 2^63, which is already out of range.
            Number::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Some(f as i64)
            }
            Number::Float(_) => None,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self.integral(), other.integral()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => {
                let (a, b) = (self.as_f64(), other.as_f64());
                a == b || (a.is_nan() && b.is_nan())
            }
            _ => false,
        }
    }
}

impl Eq for Number {}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.integral() {
            Some(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            None => {
                1u8.hash(state);
                let f = self.as_f64();
                let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
                bits.hash(state);
            }
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(i) => write!(f, "{}", i),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Tagged union of everything a backend can store.
///
/// The tag of a value never changes once it is built; equality and hashing
/// are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Data {
    #[default]
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    List(Vec<Data>),
    Map(BTreeMap<String, Data>),
}

impl Data {
    /// Name of the tag, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Data::Null => "null",
            Data::Boolean(_) => "boolean",
            Data::Number(_) => "number",
            Data::String(_) => "string",
            Data::List(_) => "list",
            Data::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Data::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(Number::as_f64)
    }

    /// Saturating integer view; see [`Number::as_i64`].
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().map(Number::as_i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Data]> {
        match self {
            Data::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Data>> {
        match self {
            Data::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn expect_bool(&self) -> Result<bool, TranslationError> {
        self.as_bool()
            .ok_or_else(|| TranslationError::wrong_type("boolean", self.kind()))
    }

    pub fn expect_number(&self) -> Result<Number, TranslationError> {
        self.as_number()
            .ok_or_else(|| TranslationError::wrong_type("number", self.kind()))
    }

    pub fn expect_str(&self) -> Result<&str, TranslationError> {
        self.as_str()
            .ok_or_else(|| TranslationError::wrong_type("string", self.kind()))
    }

    pub fn expect_list(&self) -> Result<&[Data], TranslationError> {
        self.as_list()
            .ok_or_else(|| TranslationError::wrong_type("list", self.kind()))
    }

    pub fn expect_map(&self) -> Result<&BTreeMap<String, Data>, TranslationError> {
        self.as_map()
            .ok_or_else(|| TranslationError::wrong_type("map", self.kind()))
    }

    /// Look up a required attribute of a map value.
    pub fn field(&self, name: &str) -> Result<&Data, TranslationError> {
        self.expect_map()?
            .get(name)
            .ok_or_else(|| TranslationError::MissingField(name.to_string()))
    }

    /// Look up an optional attribute of a map value. `Null` counts as absent.
    pub fn optional_field(&self, name: &str) -> Result<Option<&Data>, TranslationError> {
        Ok(self.expect_map()?.get(name).filter(|d| !d.is_null()))
    }

    /// Whether every number inside this value is finite. NaN and the
    /// infinities have no JSON form, so they cannot be stored.
    pub fn is_finite(&self) -> bool {
        match self {
            Data::Number(Number::Float(f)) => f.is_finite(),
            Data::List(items) => items.iter().all(Data::is_finite),
            Data::Map(entries) => entries.values().all(Data::is_finite),
            _ => true,
        }
    }

    pub fn to_json_string(&self) -> Result<String, TranslationError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(text: &str) -> Result<Data, TranslationError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{}>", self.kind()),
        }
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Data::Boolean(value)
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Number(Number::Integer(value))
    }
}

impl From<i32> for Data {
    fn from(value: i32) -> Self {
        Data::Number(Number::Integer(value.into()))
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Number(Number::Float(value))
    }
}

impl From<Number> for Data {
    fn from(value: Number) -> Self {
        Data::Number(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::String(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::String(value)
    }
}

impl From<Vec<Data>> for Data {
    fn from(value: Vec<Data>) -> Self {
        Data::List(value)
    }
}

impl From<BTreeMap<String, Data>> for Data {
    fn from(value: BTreeMap<String, Data>) -> Self {
        Data::Map(value)
    }
}

// ============================================================================
// serde: untagged JSON shape
// ============================================================================

impl Serialize for Data {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Data::Null => serializer.serialize_unit(),
            Data::Boolean(b) => serializer.serialize_bool(*b),
            Data::Number(Number::Integer(i)) => serializer.serialize_i64(*i),
            Data::Number(Number::Float(f)) if !f.is_finite() => {
                Err(ser::Error::custom(format!("{} has no JSON representation", f)))
            }
            Data::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            Data::String(s) => serializer.serialize_str(s),
            Data::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Data::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

struct DataVisitor;

impl<'de> Visitor<'de> for DataVisitor {
    type Value = Data;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Data, E> {
        Ok(Data::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Data, E> {
        Ok(Data::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Data, D::Error> {
        Deserialize::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Data, E> {
        Ok(Data::Boolean(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Data, E> {
        Ok(Data::Number(Number::Integer(value)))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Data, E> {
        Ok(match i64::try_from(value) {
            Ok(i) => Data::Number(Number::Integer(i)),
            Err(_) => Data::Number(Number::Float(value as f64)),
        })
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Data, E> {
        Ok(Data::Number(Number::Float(value)))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Data, E> {
        Ok(Data::String(value.to_string()))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Data, E> {
        Ok(Data::String(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Data, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Data::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Data, A::Error> {
        let mut entries = BTreeMap::new();
        while let Some((key, value)) = map.next_entry::<String, Data>()? {
            entries.insert(key, value);
        }
        Ok(Data::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Data {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Data, D::Error> {
        deserializer.deserialize_any(DataVisitor)
    }
}
