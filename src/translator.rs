//! Translators - bidirectional conversion between domain values and [`Data`].
//!
//! A translator is a stateless (or configuration-only) strategy. Trees and
//! maps handed out by a [`Database`](crate::Database) are bound to one key
//! translator and one value translator for their whole life.
//!
//! ## Example
//!
//! ```ignore
//! use keypath_store::{ListTranslator, LongTranslator, Translator};
//!
//! let translator = ListTranslator::new(LongTranslator);
//! let data = translator.to_data(&vec![1, 2, 3])?;
//! assert_eq!(translator.from_data(&data)?, vec![1, 2, 3]);
//! ```

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::data::{Data, Number};
use crate::error::TranslationError;

/// Converts values of [`Translator::Value`] to and from [`Data`].
///
/// `from_data(to_data(v))` must equal `v` for every value this translator
/// produces. Malformed input is reported as a [`TranslationError`] naming the
/// check that failed.
pub trait Translator: Send + Sync + 'static {
    type Value;

    fn to_data(&self, value: &Self::Value) -> Result<Data, TranslationError>;

    fn from_data(&self, data: &Data) -> Result<Self::Value, TranslationError>;

    /// String form of a value. Defaults to the JSON text of its `Data`.
    fn encode(&self, value: &Self::Value) -> Result<String, TranslationError> {
        self.to_data(value)?.to_json_string()
    }

    /// Inverse of [`Translator::encode`].
    fn decode(&self, text: &str) -> Result<Self::Value, TranslationError> {
        self.from_data(&Data::from_json_str(text)?)
    }

    /// Translate `value` if it is a `Self::Value`, otherwise `None`.
    fn encode_any(&self, value: &dyn Any) -> Option<Result<Data, TranslationError>>
    where
        Self::Value: 'static,
    {
        value
            .downcast_ref::<Self::Value>()
            .map(|value| self.to_data(value))
    }
}

// ============================================================================
// Primitives
// ============================================================================

/// Identity translator for raw `Data` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataTranslator;

impl Translator for DataTranslator {
    type Value = Data;

    fn to_data(&self, value: &Data) -> Result<Data, TranslationError> {
        Ok(value.clone())
    }

    fn from_data(&self, data: &Data) -> Result<Data, TranslationError> {
        Ok(data.clone())
    }
}

/// Strings. The string encoding is the raw text, so string keys stay
/// readable in storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringTranslator;

impl Translator for StringTranslator {
    type Value = String;

    fn to_data(&self, value: &String) -> Result<Data, TranslationError> {
        Ok(Data::String(value.clone()))
    }

    fn from_data(&self, data: &Data) -> Result<String, TranslationError> {
        Ok(data.expect_str()?.to_string())
    }

    fn encode(&self, value: &String) -> Result<String, TranslationError> {
        Ok(value.clone())
    }

    fn decode(&self, text: &str) -> Result<String, TranslationError> {
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanTranslator;

impl Translator for BooleanTranslator {
    type Value = bool;

    fn to_data(&self, value: &bool) -> Result<Data, TranslationError> {
        Ok(Data::Boolean(*value))
    }

    fn from_data(&self, data: &Data) -> Result<bool, TranslationError> {
        data.expect_bool()
    }
}

/// A single character, stored as a one-character string.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTranslator;

impl Translator for CharTranslator {
    type Value = char;

    fn to_data(&self, value: &char) -> Result<Data, TranslationError> {
        Ok(Data::String(value.to_string()))
    }

    fn from_data(&self, data: &Data) -> Result<char, TranslationError> {
        let text = data.expect_str()?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(TranslationError::InvalidValue(format!(
                "expected a single character, found {:?}",
                text
            ))),
        }
    }
}

macro_rules! integer_translator {
    ($(#[$meta:meta])* $name:ident, $ty:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl Translator for $name {
            type Value = $ty;

            fn to_data(&self, value: &$ty) -> Result<Data, TranslationError> {
                Ok(Data::Number(Number::Integer(i64::from(*value))))
            }

            fn from_data(&self, data: &Data) -> Result<$ty, TranslationError> {
                let n = data.expect_number()?.as_i64();
                Ok(n.clamp(i64::from(<$ty>::MIN), i64::from(<$ty>::MAX)) as $ty)
            }
        }
    };
}

integer_translator!(
    /// `i64`. Stored numbers outside the range clamp to `i64::MIN`/`i64::MAX`.
    LongTranslator,
    i64
);
integer_translator!(
    /// `i32`, saturating.
    IntegerTranslator,
    i32
);
integer_translator!(
    /// `i16`, saturating.
    ShortTranslator,
    i16
);
integer_translator!(
    /// `i8`, saturating.
    ByteTranslator,
    i8
);

// NaN and the infinities have no stored form; refuse them on the way in.
fn finite(value: f64) -> Result<Data, TranslationError> {
    if value.is_finite() {
        Ok(Data::Number(Number::Float(value)))
    } else {
        Err(TranslationError::InvalidValue(format!("{} cannot be stored", value)))
    }
}

/// `f64`. Only finite values can be stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleTranslator;

impl Translator for DoubleTranslator {
    type Value = f64;

    fn to_data(&self, value: &f64) -> Result<Data, TranslationError> {
        finite(*value)
    }

    fn from_data(&self, data: &Data) -> Result<f64, TranslationError> {
        Ok(data.expect_number()?.as_f64())
    }
}

/// `f32`. Finite values beyond the `f32` range clamp to `f32::MIN`/`f32::MAX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatTranslator;

impl Translator for FloatTranslator {
    type Value = f32;

    fn to_data(&self, value: &f32) -> Result<Data, TranslationError> {
        finite(f64::from(*value))
    }

    fn from_data(&self, data: &Data) -> Result<f32, TranslationError> {
        let n = data.expect_number()?.as_f64();
        if n.is_finite() {
            Ok(n.clamp(f64::from(f32::MIN), f64::from(f32::MAX)) as f32)
        } else {
            Ok(n as f32)
        }
    }
}

// ============================================================================
// Collections
// ============================================================================

type Factory<C> = Arc<dyn Fn() -> C + Send + Sync>;

fn encode_items<E, C>(element: &E, items: &C) -> Result<Data, TranslationError>
where
    E: Translator,
    for<'a> &'a C: IntoIterator<Item = &'a E::Value>,
{
    let mut out = Vec::new();
    for item in items {
        out.push(element.to_data(item)?);
    }
    Ok(Data::List(out))
}

fn decode_items<E, C>(element: &E, factory: &Factory<C>, data: &Data) -> Result<C, TranslationError>
where
    E: Translator,
    C: Extend<E::Value>,
{
    let mut out = factory();
    for item in data.expect_list()? {
        out.extend(std::iter::once(element.from_data(item)?));
    }
    Ok(out)
}

/// Ordered sequences. Element order is preserved.
pub struct ListTranslator<E, C> {
    element: E,
    factory: Factory<C>,
}

impl<E: Translator> ListTranslator<E, Vec<E::Value>> {
    pub fn new(element: E) -> Self {
        Self::with_factory(element, Vec::new)
    }
}

impl<E: Translator, C> ListTranslator<E, C> {
    /// Decode into the container produced by `factory`.
    pub fn with_factory(element: E, factory: impl Fn() -> C + Send + Sync + 'static) -> Self {
        ListTranslator {
            element,
            factory: Arc::new(factory),
        }
    }
}

impl<E, C> Translator for ListTranslator<E, C>
where
    E: Translator,
    C: Extend<E::Value> + 'static,
    for<'a> &'a C: IntoIterator<Item = &'a E::Value>,
{
    type Value = C;

    fn to_data(&self, value: &C) -> Result<Data, TranslationError> {
        encode_items(&self.element, value)
    }

    fn from_data(&self, data: &Data) -> Result<C, TranslationError> {
        decode_items(&self.element, &self.factory, data)
    }
}

/// Sets. Stored as a list; no order is guaranteed.
pub struct SetTranslator<E, C> {
    element: E,
    factory: Factory<C>,
}

impl<E> SetTranslator<E, HashSet<E::Value>>
where
    E: Translator,
    E::Value: Eq + Hash,
{
    pub fn new(element: E) -> Self {
        Self::with_factory(element, HashSet::new)
    }
}

impl<E> SetTranslator<E, BTreeSet<E::Value>>
where
    E: Translator,
    E::Value: Ord,
{
    pub fn ordered(element: E) -> Self {
        Self::with_factory(element, BTreeSet::new)
    }
}

impl<E: Translator, C> SetTranslator<E, C> {
    pub fn with_factory(element: E, factory: impl Fn() -> C + Send + Sync + 'static) -> Self {
        SetTranslator {
            element,
            factory: Arc::new(factory),
        }
    }
}

impl<E, C> Translator for SetTranslator<E, C>
where
    E: Translator,
    C: Extend<E::Value> + 'static,
    for<'a> &'a C: IntoIterator<Item = &'a E::Value>,
{
    type Value = C;

    fn to_data(&self, value: &C) -> Result<Data, TranslationError> {
        encode_items(&self.element, value)
    }

    fn from_data(&self, data: &Data) -> Result<C, TranslationError> {
        decode_items(&self.element, &self.factory, data)
    }
}

/// Key/value maps. Keys are stored by their string encoding, so any key
/// translator works.
pub struct MapTranslator<KT, VT, M> {
    key: KT,
    value: VT,
    factory: Factory<M>,
}

impl<KT, VT> MapTranslator<KT, VT, HashMap<KT::Value, VT::Value>>
where
    KT: Translator,
    VT: Translator,
    KT::Value: Eq + Hash,
{
    pub fn new(key: KT, value: VT) -> Self {
        Self::with_factory(key, value, HashMap::new)
    }
}

impl<KT, VT> MapTranslator<KT, VT, BTreeMap<KT::Value, VT::Value>>
where
    KT: Translator,
    VT: Translator,
    KT::Value: Ord,
{
    pub fn ordered(key: KT, value: VT) -> Self {
        Self::with_factory(key, value, BTreeMap::new)
    }
}

impl<KT: Translator, VT: Translator, M> MapTranslator<KT, VT, M> {
    pub fn with_factory(key: KT, value: VT, factory: impl Fn() -> M + Send + Sync + 'static) -> Self {
        MapTranslator {
            key,
            value,
            factory: Arc::new(factory),
        }
    }
}

impl<KT, VT, M> Translator for MapTranslator<KT, VT, M>
where
    KT: Translator,
    VT: Translator,
    M: Extend<(KT::Value, VT::Value)> + 'static,
    for<'a> &'a M: IntoIterator<Item = (&'a KT::Value, &'a VT::Value)>,
{
    type Value = M;

    fn to_data(&self, value: &M) -> Result<Data, TranslationError> {
        let mut entries = BTreeMap::new();
        for (k, v) in value {
            entries.insert(self.key.encode(k)?, self.value.to_data(v)?);
        }
        Ok(Data::Map(entries))
    }

    fn from_data(&self, data: &Data) -> Result<M, TranslationError> {
        let mut out = (self.factory)();
        for (k, v) in data.expect_map()? {
            let entry = (self.key.decode(k)?, self.value.from_data(v)?);
            out.extend(std::iter::once(entry));
        }
        Ok(out)
    }
}

// ============================================================================
// Self-describing values
// ============================================================================

/// A domain object responsible for its own schema.
///
/// `from_data` populates a fresh instance created by the translator's
/// factory.
pub trait Storable: Send + Sync + 'static {
    fn to_data(&self) -> Result<Data, TranslationError>;

    fn from_data(&mut self, data: &Data) -> Result<(), TranslationError>;
}

pub struct StorableTranslator<T> {
    factory: Factory<T>,
}

impl<T: Storable> StorableTranslator<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        StorableTranslator {
            factory: Arc::new(factory),
        }
    }
}

impl<T: Storable + Default> Default for StorableTranslator<T> {
    fn default() -> Self {
        Self::new(T::default)
    }
}

impl<T: Storable> Translator for StorableTranslator<T> {
    type Value = T;

    fn to_data(&self, value: &T) -> Result<Data, TranslationError> {
        value.to_data()
    }

    fn from_data(&self, data: &Data) -> Result<T, TranslationError> {
        let mut target = (self.factory)();
        target.from_data(data)?;
        Ok(target)
    }
}

/// Any serde type, through its JSON representation.
pub struct SerdeTranslator<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeTranslator<T> {
    pub fn new() -> Self {
        SerdeTranslator {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeTranslator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Translator for SerdeTranslator<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    type Value = T;

    fn to_data(&self, value: &T) -> Result<Data, TranslationError> {
        Ok(serde_json::from_value(serde_json::to_value(value)?)?)
    }

    fn from_data(&self, data: &Data) -> Result<T, TranslationError> {
        Ok(serde_json::from_value(serde_json::to_value(data)?)?)
    }
}
