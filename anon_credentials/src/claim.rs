//! Claims are trees with string keys at every level. Leaves are strings, floats, booleans, JSON arrays or
//! opaque bytes. A claim usually has the shape `{"ctype": .., "contents": {..}}` but any map is accepted.

use crate::{error::CredentialError, escaping::split_path};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

pub const CTYPE_KEY: &str = "ctype";
pub const CONTENTS_KEY: &str = "contents";
/// Key of the serialized form of [`Bytes`]. Reserved, no claim map may use it.
pub const BYTES_KEY: &str = "$bytes";

/// Opaque bytes. Serialized as `{"$bytes": "<hex>"}` so that they are not confused with arrays or strings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bytes {
    #[serde(rename = "$bytes", with = "hex::serde")]
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    Bool(bool),
    Float(f64),
    String(String),
    /// Arbitrary JSON array, its elements are not flattened into attributes
    Array(Vec<Value>),
    Bytes(Bytes),
    Map(BTreeMap<String, ClaimValue>),
}

/// Serializes as its map. Deserialization fails when a map uses [`BYTES_KEY`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Claim(pub BTreeMap<String, ClaimValue>);

impl Serialize for Claim {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Claim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let claim = Self(BTreeMap::deserialize(deserializer)?);
        claim
            .validate()
            .map_err(|e| <D::Error as de::Error>::custom(format!("invalid claim: {:?}", e)))?;
        Ok(claim)
    }
}

impl From<&str> for ClaimValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ClaimValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for ClaimValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ClaimValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<u8>> for ClaimValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes { bytes })
    }
}

impl From<BTreeMap<String, ClaimValue>> for ClaimValue {
    fn from(m: BTreeMap<String, ClaimValue>) -> Self {
        Self::Map(m)
    }
}

impl ClaimValue {
    fn try_from_json(path: &str, value: Value) -> Result<Self, CredentialError> {
        match value {
            Value::Null => Err(CredentialError::UnsupportedClaimValue(path.to_string())),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => n
                .as_f64()
                .map(Self::Float)
                .ok_or_else(|| CredentialError::UnsupportedClaimValue(path.to_string())),
            Value::String(s) => Ok(Self::String(s)),
            Value::Array(a) => Ok(Self::Array(a)),
            Value::Object(o) => {
                let mut map = BTreeMap::new();
                for (k, v) in o {
                    let child = format!("{}/{}", path, k);
                    if k == BYTES_KEY {
                        return Err(CredentialError::UnsupportedClaimValue(child));
                    }
                    map.insert(k, Self::try_from_json(&child, v)?);
                }
                Ok(Self::Map(map))
            }
        }
    }

    /// Fails on the first map, at any depth, with the reserved key [`BYTES_KEY`]
    fn check_keys(&self, path: &str) -> Result<(), CredentialError> {
        match self {
            Self::Map(m) => check_map_keys(path, m),
            _ => Ok(()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            // Not finite floats have no JSON representation
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(a) => Value::Array(a.clone()),
            Self::Bytes(b) => Value::String(hex::encode(&b.bytes)),
            Self::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

fn check_map_keys(path: &str, map: &BTreeMap<String, ClaimValue>) -> Result<(), CredentialError> {
    for (k, v) in map {
        let child = format!("{}/{}", path, k);
        if k == BYTES_KEY {
            return Err(CredentialError::UnsupportedClaimValue(child));
        }
        v.check_keys(&child)?;
    }
    Ok(())
}

impl Claim {
    /// Claim of the form `{"ctype": ctype, "contents": contents}`
    pub fn new(ctype: impl Into<String>, contents: BTreeMap<String, ClaimValue>) -> Self {
        let mut m = BTreeMap::new();
        m.insert(CTYPE_KEY.to_string(), ClaimValue::String(ctype.into()));
        m.insert(CONTENTS_KEY.to_string(), ClaimValue::Map(contents));
        Self(m)
    }

    pub fn ctype(&self) -> Option<&str> {
        match self.0.get(CTYPE_KEY) {
            Some(ClaimValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn contents(&self) -> Option<&BTreeMap<String, ClaimValue>> {
        match self.0.get(CONTENTS_KEY) {
            Some(ClaimValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that no map uses the reserved key [`BYTES_KEY`]. Such a map would serialize exactly like a bytes
    /// leaf.
    pub fn validate(&self) -> Result<(), CredentialError> {
        check_map_keys("", &self.0)
    }

    /// Follow the unescaped `keys` from the root
    pub fn get_path<S: AsRef<str>>(&self, keys: &[S]) -> Option<&ClaimValue> {
        let (last, init) = keys.split_last()?;
        let mut m = &self.0;
        for k in init {
            match m.get(k.as_ref()) {
                Some(ClaimValue::Map(inner)) => m = inner,
                _ => return None,
            }
        }
        m.get(last.as_ref())
    }

    /// Look up a value by attribute name, i.e. escaped keys joined with the separator
    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.get_path(&split_path(name))
    }

    /// Write `value` at the attribute `name`, creating intermediate maps. Fails when the path passes through a
    /// value that is not a map or when the path is already set.
    pub fn set_nested_value(&mut self, name: &str, value: ClaimValue) -> Result<(), CredentialError> {
        let mut keys = split_path(name);
        if keys.iter().any(|k| k == BYTES_KEY) {
            return Err(CredentialError::UnsupportedClaimValue(name.to_string()));
        }
        value.check_keys(name)?;
        // split_path always yields at least one part
        let last = keys.pop().unwrap_or_default();
        let mut m = &mut self.0;
        for k in keys {
            let entry = m
                .entry(k)
                .or_insert_with(|| ClaimValue::Map(BTreeMap::new()));
            m = match entry {
                ClaimValue::Map(inner) => inner,
                _ => return Err(CredentialError::PathCollision(name.to_string())),
            };
        }
        if m.contains_key(&last) {
            return Err(CredentialError::DuplicatePath(name.to_string()));
        }
        m.insert(last, value);
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl TryFrom<Value> for Claim {
    type Error = CredentialError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match ClaimValue::try_from_json("", value)? {
            ClaimValue::Map(m) => Ok(Self(m)),
            _ => Err(CredentialError::ClaimNotAnObject),
        }
    }
}
