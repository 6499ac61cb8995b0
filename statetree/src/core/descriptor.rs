//! Per-record-type operation tables.
//!
//! A [`TypeDescriptor`] is a small vtable of function pointers generated once
//! per record type. The arena drives construction, destruction, copying and
//! comparison of raw slots exclusively through these tables, so no per-access
//! reflection is needed.

#![allow(unsafe_code)]

use std::any::{TypeId, type_name};
use std::fmt;

use bitflags::bitflags;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Marker for types that may live in an instance-data slot.
pub trait Record:
    Default + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Record for T where
    T: Default + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

bitflags! {
    /// Comparison flags forwarded to per-item and per-object comparison.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PortFlags: u32 {
        /// Compare heap instance objects by content instead of by identity.
        const DEEP_COMPARE_INSTANCES = 1 << 0;
    }
}

/// Operation table for one record type.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    size: usize,
    alignment: usize,
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    construct: unsafe fn(*mut u8),
    destruct: unsafe fn(*mut u8),
    copy: unsafe fn(*mut u8, *const u8),
    compare: unsafe fn(*const u8, *const u8, PortFlags) -> bool,
    to_json: unsafe fn(*const u8) -> Result<Value, String>,
    from_json: unsafe fn(*mut u8, &Value) -> Result<(), String>,
}

impl TypeDescriptor {
    pub fn of<T: Record>() -> Self {
        Self {
            size: size_of::<T>(),
            alignment: align_of::<T>(),
            type_id: TypeId::of::<T>,
            type_name: type_name::<T>,
            construct: construct_in_place::<T>,
            destruct: destruct_in_place::<T>,
            copy: copy_in_place::<T>,
            compare: compare_in_place::<T>,
            to_json: to_json_in_place::<T>,
            from_json: from_json_in_place::<T>,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    pub fn type_name(&self) -> &'static str {
        (self.type_name)()
    }

    pub fn is<T: Record>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }

    /// Default-construct a value at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `size()` bytes, aligned to
    /// `alignment()`, and must not hold a live value.
    pub unsafe fn construct(&self, ptr: *mut u8) {
        unsafe { (self.construct)(ptr) }
    }

    /// Drop the value at `ptr` in place.
    ///
    /// # Safety
    ///
    /// `ptr` must hold a live value of this descriptor's type. The slot is
    /// uninitialized afterwards.
    pub unsafe fn destruct(&self, ptr: *mut u8) {
        unsafe { (self.destruct)(ptr) }
    }

    /// Assign a deep copy of `src` over the live value at `dst`.
    ///
    /// # Safety
    ///
    /// Both pointers must hold live values of this descriptor's type and must
    /// not overlap.
    pub unsafe fn copy(&self, dst: *mut u8, src: *const u8) {
        unsafe { (self.copy)(dst, src) }
    }

    /// # Safety
    ///
    /// Both pointers must hold live values of this descriptor's type.
    pub unsafe fn compare(&self, a: *const u8, b: *const u8, flags: PortFlags) -> bool {
        unsafe { (self.compare)(a, b, flags) }
    }

    /// # Safety
    ///
    /// `ptr` must hold a live value of this descriptor's type.
    pub unsafe fn to_json(&self, ptr: *const u8) -> Result<Value, String> {
        unsafe { (self.to_json)(ptr) }
    }

    /// Decode `value` and assign it over the live value at `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must hold a live value of this descriptor's type.
    pub unsafe fn from_json(&self, dst: *mut u8, value: &Value) -> Result<(), String> {
        unsafe { (self.from_json)(dst, value) }
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id() == other.type_id()
            && self.size == other.size
            && self.alignment == other.alignment
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type", &self.type_name())
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .finish()
    }
}

unsafe fn construct_in_place<T: Record>(ptr: *mut u8) {
    unsafe { ptr.cast::<T>().write(T::default()) }
}

unsafe fn destruct_in_place<T: Record>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) }
}

unsafe fn copy_in_place<T: Record>(dst: *mut u8, src: *const u8) {
    let (dst, src) = unsafe { (&mut *dst.cast::<T>(), &*src.cast::<T>()) };
    dst.clone_from(src);
}

unsafe fn compare_in_place<T: Record>(a: *const u8, b: *const u8, _flags: PortFlags) -> bool {
    unsafe { *a.cast::<T>() == *b.cast::<T>() }
}

unsafe fn to_json_in_place<T: Record>(ptr: *const u8) -> Result<Value, String> {
    let value = unsafe { &*ptr.cast::<T>() };
    serde_json::to_value(value).map_err(|err| format!("{}: {}", type_name::<T>(), err))
}

unsafe fn from_json_in_place<T: Record>(dst: *mut u8, value: &Value) -> Result<(), String> {
    let decoded: T = serde_json::from_value(value.clone())
        .map_err(|err| format!("{}: {}", type_name::<T>(), err))?;
    unsafe { *dst.cast::<T>() = decoded };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, serde::Deserialize)]
    struct Sample {
        count: u32,
        label: String,
    }

    #[test]
    fn descriptor_reports_rust_layout() {
        let desc = TypeDescriptor::of::<u64>();
        assert_eq!(desc.size(), 8);
        assert_eq!(desc.alignment(), align_of::<u64>());
        assert!(desc.is::<u64>());
        assert!(!desc.is::<u32>());
    }

    #[test]
    fn descriptors_compare_by_type() {
        assert_eq!(TypeDescriptor::of::<Sample>(), TypeDescriptor::of::<Sample>());
        assert_ne!(TypeDescriptor::of::<u32>(), TypeDescriptor::of::<i32>());
    }

    /// Construct, copy, compare and destruct through the table on stack slots.
    #[test]
    fn operations_round_trip_through_raw_slots() {
        let desc = TypeDescriptor::of::<Sample>();
        let mut a = std::mem::MaybeUninit::<Sample>::uninit();
        let mut b = std::mem::MaybeUninit::<Sample>::uninit();
        let pa = a.as_mut_ptr().cast::<u8>();
        let pb = b.as_mut_ptr().cast::<u8>();
        unsafe {
            desc.construct(pa);
            desc.construct(pb);
            (*a.as_mut_ptr()).count = 7;
            (*a.as_mut_ptr()).label = "hello".to_string();
            assert!(!desc.compare(pa, pb, PortFlags::empty()));
            desc.copy(pb, pa);
            assert!(desc.compare(pa, pb, PortFlags::empty()));
            let json = desc.to_json(pb).expect("to json");
            assert_eq!(json["label"], "hello");
            desc.destruct(pa);
            desc.destruct(pb);
        }
    }
}
