//! # Reflection
//!
//! Every object type stored in the world is described by a
//! [`ClassDescriptor`]: an interned name, a byte size and an ordered table of
//! [`PropertyDescriptor`]s (name, kind, byte offset). Component payloads are
//! plain-old-data, so a property is read or written by copying bytes at its
//! offset. No constructor or downcast is involved.
//!
//! Property tables are written by hand next to the component, using
//! `core::mem::offset_of!`:
//!
//! ```rust,ignore
//! fn properties() -> Vec<PropertyDescriptor> {
//!     vec![
//!         PropertyDescriptor::new("x", PropertyKind::F32, offset_of!(Position, x)),
//!         PropertyDescriptor::new("y", PropertyKind::F32, offset_of!(Position, y)),
//!     ]
//! }
//! ```

mod registry;

pub use registry::{ComponentHooks, TypeRegistry};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// NAME
// ============================================================================

/// Interned type or property name with a precomputed FNV-1a hash.
///
/// Equality compares the hash first. Ordering is plain text order, so sorted
/// name lists are identical no matter in which order names were created.
#[derive(Clone)]
pub struct Name {
    text: Arc<str>,
    hash: u64,
}

impl Name {
    /// Interns a name.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: Arc::from(text),
            hash: const_fnv1a_hash::fnv1a_hash_str_64(text),
        }
    }

    /// Returns the text.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns the precomputed hash.
    #[inline]
    #[must_use]
    pub const fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.text == other.text
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.text)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Name {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::new(&text))
    }
}

// ============================================================================
// TYPE INDEX
// ============================================================================

/// Dense index of a registered type.
///
/// Index 0 is always the built-in entity type; component types follow in
/// registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeIndex(pub(crate) u16);

impl TypeIndex {
    /// The built-in entity type.
    pub const ENTITY: Self = Self(0);

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0 as usize
    }

    /// Whether this index names the entity type.
    #[inline]
    #[must_use]
    pub const fn is_entity(self) -> bool {
        self.0 == 0
    }

    /// Position of this type in the world's component arena list.
    #[inline]
    pub(crate) const fn arena(self) -> Option<usize> {
        match self.0 {
            0 => None,
            n => Some(n as usize - 1),
        }
    }
}

// ============================================================================
// PROPERTIES
// ============================================================================

/// Storage kind of a reflected property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `i32`
    I32,
    /// `u32`
    U32,
    /// `u8`
    U8,
    /// A `u8` field interpreted as a flag (non-zero is true).
    Bool,
    /// RGBA colour stored as `[u8; 4]`.
    Color,
}

impl PropertyKind {
    /// Width of the property in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::F32 | Self::I32 | Self::U32 | Self::Color => 4,
            Self::U8 | Self::Bool => 1,
        }
    }

    /// Decodes a value from the first [`size`](Self::size) bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than the property width. Descriptors are
    /// validated against the type size at registration, so offsets taken from
    /// a registered descriptor always fit.
    #[must_use]
    pub fn read(self, bytes: &[u8]) -> PropertyValue {
        let bytes = &bytes[..self.size()];
        match self {
            Self::F32 => PropertyValue::Float(f64::from(bytemuck::pod_read_unaligned::<f32>(bytes))),
            Self::F64 => PropertyValue::Float(bytemuck::pod_read_unaligned::<f64>(bytes)),
            Self::I32 => PropertyValue::Int(i64::from(bytemuck::pod_read_unaligned::<i32>(bytes))),
            Self::U32 => PropertyValue::Int(i64::from(bytemuck::pod_read_unaligned::<u32>(bytes))),
            Self::U8 => PropertyValue::Int(i64::from(bytes[0])),
            Self::Bool => PropertyValue::Bool(bytes[0] != 0),
            Self::Color => PropertyValue::Color([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encodes `value` into the first [`size`](Self::size) bytes.
    ///
    /// Returns `false` (leaving `bytes` untouched) when the value cannot be
    /// represented by this kind.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn write(self, value: &PropertyValue, bytes: &mut [u8]) -> bool {
        let out = &mut bytes[..self.size()];
        match (self, value) {
            (Self::F32, PropertyValue::Float(v)) => out.copy_from_slice(&(*v as f32).to_ne_bytes()),
            (Self::F32, PropertyValue::Int(v)) => out.copy_from_slice(&(*v as f32).to_ne_bytes()),
            (Self::F64, PropertyValue::Float(v)) => out.copy_from_slice(&v.to_ne_bytes()),
            (Self::F64, PropertyValue::Int(v)) => out.copy_from_slice(&(*v as f64).to_ne_bytes()),
            (Self::I32, PropertyValue::Int(v)) => match i32::try_from(*v) {
                Ok(v) => out.copy_from_slice(&v.to_ne_bytes()),
                Err(_) => return false,
            },
            (Self::U32, PropertyValue::Int(v)) => match u32::try_from(*v) {
                Ok(v) => out.copy_from_slice(&v.to_ne_bytes()),
                Err(_) => return false,
            },
            (Self::U8, PropertyValue::Int(v)) => match u8::try_from(*v) {
                Ok(v) => out[0] = v,
                Err(_) => return false,
            },
            (Self::Bool, PropertyValue::Bool(v)) => out[0] = u8::from(*v),
            (Self::Color, PropertyValue::Color(v)) => out.copy_from_slice(v),
            _ => return false,
        }
        true
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::U8 => "u8",
            Self::Bool => "bool",
            Self::Color => "color",
        };
        f.write_str(name)
    }
}

/// A decoded property value.
///
/// Serialized untagged, so snapshots carry plain JSON numbers, booleans and
/// `[r, g, b, a]` arrays. The declared [`PropertyKind`] decides how a value is
/// narrowed when written back.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// Any integer kind.
    Int(i64),
    /// Any float kind.
    Float(f64),
    /// RGBA colour.
    Color([u8; 4]),
}

/// One reflected field of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Field name.
    pub name: Name,
    /// Storage kind.
    pub kind: PropertyKind,
    /// Byte offset inside the instance.
    pub offset: usize,
}

impl PropertyDescriptor {
    /// Creates a descriptor.
    ///
    /// # Arguments
    ///
    /// * `name` - Field name as it appears in snapshots
    /// * `kind` - Storage kind
    /// * `offset` - Byte offset, usually `offset_of!(Type, field)`
    #[must_use]
    pub fn new(name: &str, kind: PropertyKind, offset: usize) -> Self {
        Self {
            name: Name::new(name),
            kind,
            offset,
        }
    }

    /// Byte range covered by this property.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.kind.size()
    }
}

// ============================================================================
// CLASS DESCRIPTOR
// ============================================================================

/// What kind of object a type describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// The built-in entity record.
    Entity,
    /// A plain-old-data component.
    Component,
}

/// Immutable description of a registered type.
#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    /// Interned type name.
    pub name: Name,
    /// Entity or component.
    pub kind: ObjectKind,
    /// Reflected properties, in declaration order.
    pub properties: Vec<PropertyDescriptor>,
    /// Instance size in bytes.
    pub size: usize,
    /// Instance alignment in bytes.
    pub align: usize,
    /// Whether iteration over this type must be deferred to the sync window.
    pub blocks_render: bool,
}

impl ClassDescriptor {
    /// Whether every property lies inside the instance and no two share a name.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.name.as_str().is_empty()
            && self.properties.iter().enumerate().all(|(i, p)| {
                p.range().end <= self.size
                    && self.properties[..i].iter().all(|q| q.name != p.name)
            })
    }

    /// Finds a property by name.
    #[must_use]
    pub fn property(&self, name: &Name) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| &p.name == name)
    }
}
