//! Variable memory pool and constant table.
//!
//! A [`VariableHandle`] is a byte index. Indices below the pool size address
//! mutable scratch values; indices at or above it address the graph's
//! immutable constant bytes. Values are stored little-endian with a fixed
//! footprint per type, so no per-variable type tag is kept at runtime.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte index into the pool, or into the constant table when `>= pool size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableHandle(pub u16);

impl VariableHandle {
    pub const INVALID: VariableHandle = VariableHandle(u16::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl Default for VariableHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Type tag of a variable or constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    Bool,
    Int,
    Float,
    Vector,
    Object,
}

impl VariableKind {
    pub fn size(self) -> usize {
        match self {
            VariableKind::Bool => bool::SIZE,
            VariableKind::Int => i32::SIZE,
            VariableKind::Float => f32::SIZE,
            VariableKind::Vector => Vec3::SIZE,
            VariableKind::Object => ObjectRef::SIZE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VariableKind::Bool => "bool",
            VariableKind::Int => "int",
            VariableKind::Float => "float",
            VariableKind::Vector => "vector",
            VariableKind::Object => "object",
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Weak reference to an externally owned object, by id. `0` is "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectRef(pub u64);

impl ObjectRef {
    pub const NONE: ObjectRef = ObjectRef(0);

    pub fn is_some(self) -> bool {
        self != Self::NONE
    }
}

/// A fixed-footprint scalar that can live in the pool.
pub trait PoolValue: Copy {
    const KIND: VariableKind;
    const SIZE: usize;

    /// `bytes.len() == Self::SIZE`.
    fn decode(bytes: &[u8]) -> Self;

    /// `out.len() == Self::SIZE`.
    fn encode(self, out: &mut [u8]);
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl PoolValue for bool {
    const KIND: VariableKind = VariableKind::Bool;
    const SIZE: usize = 1;

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn encode(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}

impl PoolValue for i32 {
    const KIND: VariableKind = VariableKind::Int;
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Self {
        i32::from_le_bytes(array(bytes))
    }

    fn encode(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
}

impl PoolValue for f32 {
    const KIND: VariableKind = VariableKind::Float;
    const SIZE: usize = 4;

    fn decode(bytes: &[u8]) -> Self {
        f32::from_le_bytes(array(bytes))
    }

    fn encode(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
}

impl PoolValue for Vec3 {
    const KIND: VariableKind = VariableKind::Vector;
    const SIZE: usize = 12;

    fn decode(bytes: &[u8]) -> Self {
        Vec3 {
            x: f32::decode(&bytes[0..4]),
            y: f32::decode(&bytes[4..8]),
            z: f32::decode(&bytes[8..12]),
        }
    }

    fn encode(self, out: &mut [u8]) {
        self.x.encode(&mut out[0..4]);
        self.y.encode(&mut out[4..8]);
        self.z.encode(&mut out[8..12]);
    }
}

impl PoolValue for ObjectRef {
    const KIND: VariableKind = VariableKind::Object;
    const SIZE: usize = 8;

    fn decode(bytes: &[u8]) -> Self {
        ObjectRef(u64::from_le_bytes(array(bytes)))
    }

    fn encode(self, out: &mut [u8]) {
        out.copy_from_slice(&self.0.to_le_bytes());
    }
}

/// A dynamically typed value used when declaring variables and constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum VariableValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vector(Vec3),
    Object(ObjectRef),
}

impl VariableValue {
    pub fn kind(&self) -> VariableKind {
        match self {
            VariableValue::Bool(_) => VariableKind::Bool,
            VariableValue::Int(_) => VariableKind::Int,
            VariableValue::Float(_) => VariableKind::Float,
            VariableValue::Vector(_) => VariableKind::Vector,
            VariableValue::Object(_) => VariableKind::Object,
        }
    }

    pub fn zero(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Bool => VariableValue::Bool(false),
            VariableKind::Int => VariableValue::Int(0),
            VariableKind::Float => VariableValue::Float(0.0),
            VariableKind::Vector => VariableValue::Vector(Vec3::default()),
            VariableKind::Object => VariableValue::Object(ObjectRef::NONE),
        }
    }

    fn encode(self, out: &mut [u8]) {
        match self {
            VariableValue::Bool(v) => v.encode(out),
            VariableValue::Int(v) => v.encode(out),
            VariableValue::Float(v) => v.encode(out),
            VariableValue::Vector(v) => v.encode(out),
            VariableValue::Object(v) => v.encode(out),
        }
    }

    /// Read a value of `kind` at `handle` through the pool/constant lookup.
    pub fn read(
        kind: VariableKind,
        pool: &VariablePool,
        constants: &ConstantTable,
        handle: VariableHandle,
    ) -> Option<Self> {
        Some(match kind {
            VariableKind::Bool => VariableValue::Bool(pool.try_get(constants, handle)?),
            VariableKind::Int => VariableValue::Int(pool.try_get(constants, handle)?),
            VariableKind::Float => VariableValue::Float(pool.try_get(constants, handle)?),
            VariableKind::Vector => VariableValue::Vector(pool.try_get(constants, handle)?),
            VariableKind::Object => VariableValue::Object(pool.try_get(constants, handle)?),
        })
    }
}

/// Immutable constant bytes addressed by handles `>= base`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConstantTable {
    base: u16,
    bytes: Vec<u8>,
}

impl ConstantTable {
    pub fn new(base: u16, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn contains(&self, handle: VariableHandle, size: usize) -> bool {
        handle.is_valid()
            && handle.0 >= self.base
            && usize::from(handle.0 - self.base) + size <= self.bytes.len()
    }

    pub fn get<T: PoolValue>(&self, handle: VariableHandle) -> Option<T> {
        if !self.contains(handle, T::SIZE) {
            return None;
        }
        let start = usize::from(handle.0 - self.base);
        Some(T::decode(&self.bytes[start..start + T::SIZE]))
    }
}

/// Per-instance mutable scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VariablePool {
    bytes: Vec<u8>,
}

impl VariablePool {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// In-pool check: the handle falls inside the pool and `size` bytes fit.
    pub fn contains(&self, handle: VariableHandle, size: usize) -> bool {
        handle.index() < self.bytes.len() && handle.index() + size <= self.bytes.len()
    }

    pub fn try_get<T: PoolValue>(
        &self,
        constants: &ConstantTable,
        handle: VariableHandle,
    ) -> Option<T> {
        if handle.index() < self.bytes.len() {
            if !self.contains(handle, T::SIZE) {
                return None;
            }
            let start = handle.index();
            return Some(T::decode(&self.bytes[start..start + T::SIZE]));
        }
        constants.get(handle)
    }

    /// Pool value, else constant at the handle, else `default`.
    pub fn get_value<T: PoolValue>(
        &self,
        constants: &ConstantTable,
        handle: VariableHandle,
        default: T,
    ) -> T {
        self.try_get(constants, handle).unwrap_or(default)
    }

    /// Writes in place; `false` for handles outside the pool (constants are immutable).
    pub fn set_value<T: PoolValue>(&mut self, handle: VariableHandle, value: T) -> bool {
        if !self.contains(handle, T::SIZE) {
            return false;
        }
        let start = handle.index();
        value.encode(&mut self.bytes[start..start + T::SIZE]);
        true
    }
}

/// One named entry in a [`VariableTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableEntry {
    pub name: String,
    pub handle: VariableHandle,
    pub kind: VariableKind,
    pub constant: bool,
}

/// Compiled variable/constant naming plus the initial pool and constant bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariableTable {
    entries: Vec<VariableEntry>,
    pool_defaults: Vec<u8>,
    constants: ConstantTable,
}

impl VariableTable {
    pub fn builder() -> VariableTableBuilder {
        VariableTableBuilder::default()
    }

    pub fn entries(&self) -> &[VariableEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&VariableEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn handle(&self, name: &str) -> Option<VariableHandle> {
        self.entry(name).map(|entry| entry.handle)
    }

    pub fn kind_of(&self, handle: VariableHandle) -> Option<VariableKind> {
        self.entries
            .iter()
            .find(|entry| entry.handle == handle)
            .map(|entry| entry.kind)
    }

    pub fn pool_size(&self) -> u16 {
        self.constants.base
    }

    pub fn pool_defaults(&self) -> &[u8] {
        &self.pool_defaults
    }

    pub fn constants(&self) -> &ConstantTable {
        &self.constants
    }
}

/// Assigns disjoint, contiguous byte ranges: variables first, then constants.
#[derive(Debug, Clone, Default)]
pub struct VariableTableBuilder {
    variables: Vec<(String, VariableValue)>,
    constants: Vec<(String, VariableValue)>,
}

impl VariableTableBuilder {
    pub fn variable(&mut self, name: impl Into<String>, default: VariableValue) -> &mut Self {
        self.variables.push((name.into(), default));
        self
    }

    pub fn constant(&mut self, name: impl Into<String>, value: VariableValue) -> &mut Self {
        self.constants.push((name.into(), value));
        self
    }

    pub fn finish(&self) -> Result<VariableTable, String> {
        let mut seen = HashSet::new();
        for (name, _) in self.variables.iter().chain(&self.constants) {
            if !seen.insert(name.as_str()) {
                return Err(format!("duplicate variable name '{name}'"));
            }
        }

        let pool_size: usize = self.variables.iter().map(|(_, v)| v.kind().size()).sum();
        let constant_size: usize = self.constants.iter().map(|(_, v)| v.kind().size()).sum();
        if pool_size + constant_size >= usize::from(u16::MAX) {
            return Err(format!(
                "variables need {} bytes, more than a handle can address",
                pool_size + constant_size
            ));
        }

        let mut entries = Vec::with_capacity(self.variables.len() + self.constants.len());
        let mut pool_defaults = vec![0u8; pool_size];
        let mut offset = 0usize;
        for (name, value) in &self.variables {
            let size = value.kind().size();
            value.encode(&mut pool_defaults[offset..offset + size]);
            entries.push(VariableEntry {
                name: name.clone(),
                handle: VariableHandle(offset as u16),
                kind: value.kind(),
                constant: false,
            });
            offset += size;
        }

        let mut constant_bytes = vec![0u8; constant_size];
        let mut offset = 0usize;
        for (name, value) in &self.constants {
            let size = value.kind().size();
            value.encode(&mut constant_bytes[offset..offset + size]);
            entries.push(VariableEntry {
                name: name.clone(),
                handle: VariableHandle((pool_size + offset) as u16),
                kind: value.kind(),
                constant: true,
            });
            offset += size;
        }

        Ok(VariableTable {
            entries,
            pool_defaults,
            constants: ConstantTable::new(pool_size as u16, constant_bytes),
        })
    }
}
