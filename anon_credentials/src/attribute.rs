//! Flattening of claims into attributes and back.
//!
//! A claim is walked breadth first and every leaf becomes an [`Attribute`] named by its escaped key path. The
//! attributes are sorted by name and that order decides the index at which each attribute is signed, so the
//! attester and the claimer agree on the index of every attribute without exchanging names. Index 0 is the
//! claimer secret and is never produced here.
//!
//! For signing, an attribute is marshalled as `0xFF | u64 len | name | u64 len | typename | u64 len | value`
//! (lengths big endian) and the bytes are hashed to a field element. The leading `0xFF` keeps the encoding
//! intact when it is read as a big endian integer.

use crate::{
    claim::{Bytes, Claim, ClaimValue},
    error::CredentialError,
    escaping::join_path,
};
use ark_bls12_381::Fr;
use ark_std::cfg_iter;
use blake2::Blake2b512;
use dock_crypto_utils::hashing_utils::field_elem_from_try_and_incr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// First byte of every binary attribute and of array values
pub const SENTINEL_BYTE: u8 = 0xFF;

const LENGTH_PREFIX_SIZE: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AttributeType {
    String,
    Float,
    Bool,
    Array,
    Bytes,
    /// Typename this crate does not know. Such values decode to a hex string.
    Other(String),
}

impl AttributeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Bytes => "bytes",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for AttributeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "string" => Self::String,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "array" => Self::Array,
            "bytes" => Self::Bytes,
            _ => Self::Other(s),
        }
    }
}

impl From<AttributeType> for String {
    fn from(t: AttributeType) -> Self {
        t.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Escaped keys of the path to the leaf joined with `.`
    pub name: String,
    pub typename: AttributeType,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Encode a leaf. Maps are not leaves.
    pub fn from_leaf(name: String, leaf: &ClaimValue) -> Result<Self, CredentialError> {
        let (typename, value) = match leaf {
            ClaimValue::String(s) => (AttributeType::String, s.as_bytes().to_vec()),
            ClaimValue::Float(f) => (AttributeType::Float, f.to_bits().to_be_bytes().to_vec()),
            ClaimValue::Bool(b) => (AttributeType::Bool, vec![*b as u8]),
            ClaimValue::Array(a) => {
                let mut value = vec![SENTINEL_BYTE];
                serde_json::to_writer(&mut value, a)?;
                (AttributeType::Array, value)
            }
            ClaimValue::Bytes(b) => (AttributeType::Bytes, b.bytes.clone()),
            ClaimValue::Map(_) => return Err(CredentialError::UnsupportedClaimValue(name)),
        };
        Ok(Self {
            name,
            typename,
            value,
        })
    }

    /// Decode the value according to the typename
    pub fn decode_value(&self) -> Result<ClaimValue, CredentialError> {
        let malformed = || {
            CredentialError::MalformedAttributeValue(
                self.name.clone(),
                self.typename.as_str().to_string(),
            )
        };
        match &self.typename {
            AttributeType::String => String::from_utf8(self.value.clone())
                .map(ClaimValue::String)
                .map_err(|_| malformed()),
            AttributeType::Float => {
                let bits: [u8; 8] = self.value.as_slice().try_into().map_err(|_| malformed())?;
                Ok(ClaimValue::Float(f64::from_bits(u64::from_be_bytes(bits))))
            }
            AttributeType::Bool => match self.value.as_slice() {
                [b] => Ok(ClaimValue::Bool(*b != 0)),
                _ => Err(malformed()),
            },
            AttributeType::Array => match self.value.split_first() {
                Some((&SENTINEL_BYTE, json)) => serde_json::from_slice(json)
                    .map(ClaimValue::Array)
                    .map_err(|_| malformed()),
                _ => Err(malformed()),
            },
            AttributeType::Bytes => Ok(ClaimValue::Bytes(Bytes {
                bytes: self.value.clone(),
            })),
            AttributeType::Other(_) => Ok(ClaimValue::String(hex::encode(&self.value))),
        }
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let typename = self.typename.as_str().as_bytes();
        let mut bytes = Vec::with_capacity(
            1 + 3 * LENGTH_PREFIX_SIZE + name.len() + typename.len() + self.value.len(),
        );
        bytes.push(SENTINEL_BYTE);
        for field in [name, typename, self.value.as_slice()] {
            bytes.extend_from_slice(&(field.len() as u64).to_be_bytes());
            bytes.extend_from_slice(field);
        }
        bytes
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Self, CredentialError> {
        let mut rest = match data.split_first() {
            Some((&SENTINEL_BYTE, rest)) => rest,
            _ => return Err(CredentialError::MissingSentinelByte),
        };
        let name = read_field(&mut rest)?;
        let typename = read_field(&mut rest)?;
        let value = read_field(&mut rest)?;
        if !rest.is_empty() {
            return Err(CredentialError::TrailingBytes(rest.len()));
        }
        let to_string = |b: &[u8]| {
            String::from_utf8(b.to_vec()).map_err(|_| CredentialError::NonUtf8AttributeField)
        };
        Ok(Self {
            name: to_string(name)?,
            typename: AttributeType::from(to_string(typename)?),
            value: value.to_vec(),
        })
    }

    /// The field element signed for this attribute. Binds name, typename and value together.
    pub fn to_message(&self) -> Fr {
        field_elem_from_try_and_incr::<Fr, Blake2b512>(&self.marshal_binary())
    }
}

/// Read one length prefixed field and advance `data` past it
fn read_field<'a>(data: &mut &'a [u8]) -> Result<&'a [u8], CredentialError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(CredentialError::TruncatedAttribute);
    }
    let (len, tail) = data.split_at(LENGTH_PREFIX_SIZE);
    let len: [u8; LENGTH_PREFIX_SIZE] = len
        .try_into()
        .map_err(|_| CredentialError::TruncatedAttribute)?;
    let len = usize::try_from(u64::from_be_bytes(len))
        .map_err(|_| CredentialError::TruncatedAttribute)?;
    if tail.len() < len {
        return Err(CredentialError::TruncatedAttribute);
    }
    let (field, tail) = tail.split_at(len);
    *data = tail;
    Ok(field)
}

impl Claim {
    /// Flatten the claim into attributes sorted by name
    pub fn to_attributes(&self) -> Result<Vec<Attribute>, CredentialError> {
        let mut attributes = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((String::new(), &self.0));
        while let Some((prefix, map)) = queue.pop_front() {
            for (key, value) in map {
                let name = join_path(&prefix, key);
                match value {
                    ClaimValue::Map(inner) => queue.push_back((name, inner)),
                    leaf => attributes.push(Attribute::from_leaf(name, leaf)?),
                }
            }
        }
        attributes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(attributes)
    }
}

/// Hash each attribute to the message signed for it
pub fn attributes_to_messages(attributes: &[Attribute]) -> Vec<Fr> {
    cfg_iter!(attributes).map(|a| a.to_message()).collect()
}

/// Rebuild the part of a claim given by disclosed attributes keyed by their signing index
pub fn reconstruct_claim(disclosed: &BTreeMap<usize, Attribute>) -> Result<Claim, CredentialError> {
    let mut claim = Claim::default();
    for (index, attribute) in disclosed {
        if *index == 0 {
            return Err(CredentialError::InvalidAttributeIndex(0));
        }
        claim.set_nested_value(&attribute.name, attribute.decode_value()?)?;
    }
    Ok(claim)
}

/// Pick the attributes at the given signing indices from the sorted attribute list. Attribute `i` of the list
/// is signed at index `i + 1`.
pub fn select_attributes(
    indices: &[usize],
    attributes: &[Attribute],
) -> Result<BTreeMap<usize, Attribute>, CredentialError> {
    indices
        .iter()
        .map(|&i| {
            i.checked_sub(1)
                .and_then(|pos| attributes.get(pos))
                .map(|a| (i, a.clone()))
                .ok_or(CredentialError::InvalidAttributeIndex(i))
        })
        .collect()
}

/// Sort the names and remove duplicates. The flag tells whether there were duplicates.
pub fn sort_and_deduplicate<S: AsRef<str>>(names: &[S]) -> (Vec<String>, bool) {
    let mut sorted = names
        .iter()
        .map(|n| n.as_ref().to_string())
        .collect::<Vec<_>>();
    sorted.sort();
    sorted.dedup();
    let had_duplicates = sorted.len() != names.len();
    (sorted, had_duplicates)
}

/// Signing indices of the requested attribute names, in sorted order of the names. Both lists are walked in
/// lockstep so `attributes` must be sorted by name as produced by [`Claim::to_attributes`].
pub fn attribute_indices<S: AsRef<str>>(
    requested: &[S],
    attributes: &[Attribute],
) -> Result<Vec<usize>, CredentialError> {
    let (requested, _) = sort_and_deduplicate(requested);
    let mut indices = Vec::with_capacity(requested.len());
    let mut pending = requested.iter().peekable();
    for (pos, attribute) in attributes.iter().enumerate() {
        match pending.peek() {
            Some(name) if **name == attribute.name => {
                indices.push(pos + 1);
                pending.next();
            }
            Some(_) => (),
            None => break,
        }
    }
    match pending.next() {
        Some(missing) => Err(CredentialError::AttributeNotFound(missing.clone())),
        None => Ok(indices),
    }
}
