//! Instance data arena: one aligned raw block per instance.
//!
//! The arena owns the bytes described by an [`InstanceDataLayout`] and a list
//! of heap instance objects. Every fixed slot is constructed on allocation and
//! destructed on reset, so no byte of the block is observed uninitialized.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::core::descriptor::{PortFlags, Record, TypeDescriptor};
use crate::core::layout::{InstanceDataLayout, LayoutItem};
use crate::core::types::Owner;

/// A heap-allocated record whose state does not fit the fixed block.
///
/// Objects are uniquely owned by one arena and duplicated, never shared, when
/// an arena is copied.
pub trait InstanceObject: Any + Send + Sync + fmt::Debug {
    /// Deep copy re-parented to `owner`.
    fn duplicate(&self, owner: &Owner) -> Box<dyn InstanceObject>;

    /// Content comparison used under [`PortFlags::DEEP_COMPARE_INSTANCES`].
    fn identical(&self, other: &dyn InstanceObject) -> bool;

    fn snapshot(&self) -> Value;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A typed default value for one slot, or an empty slot.
pub struct RecordValue {
    descriptor: Option<TypeDescriptor>,
    value: Option<Box<dyn Any + Send + Sync>>,
}

impl RecordValue {
    pub fn new<T: Record>(value: T) -> Self {
        Self {
            descriptor: Some(TypeDescriptor::of::<T>()),
            value: Some(Box::new(value)),
        }
    }

    /// Reserves an index slot with no fixed storage.
    pub fn empty() -> Self {
        Self {
            descriptor: None,
            value: None,
        }
    }

    pub fn descriptor(&self) -> Option<TypeDescriptor> {
        self.descriptor
    }
}

impl fmt::Debug for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordValue")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Serialized arena: fixed items in layout order, then heap objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub items: Vec<Option<Value>>,
    pub objects: Vec<Value>,
}

/// Owned, aligned allocation. Frees memory only; item lifetimes are managed by
/// [`InstanceData`].
struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    fn allocate(size: usize, alignment: usize) -> Self {
        let layout = Layout::from_size_align(size.max(1), alignment.max(1))
            .expect("record alignments are powers of two");
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }

    fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// SAFETY: RawBlock uniquely owns its allocation and exposes it only through
// InstanceData, whose slots hold `Send + Sync` record types.
unsafe impl Send for RawBlock {}
// SAFETY: shared access only yields `&T` for `Sync` records.
unsafe impl Sync for RawBlock {}

/// Read-only view of one constructed slot.
#[derive(Clone, Copy)]
pub struct StructRef<'a> {
    descriptor: TypeDescriptor,
    ptr: *const u8,
    _marker: PhantomData<&'a InstanceData>,
}

impl<'a> StructRef<'a> {
    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    pub fn get<T: Record>(&self) -> Option<&'a T> {
        if !self.descriptor.is::<T>() {
            return None;
        }
        // SAFETY: the slot holds a live T for as long as the arena borrow lasts.
        Some(unsafe { &*self.ptr.cast::<T>() })
    }

    pub fn to_json(&self) -> Result<Value, String> {
        // SAFETY: the slot holds a live value of the descriptor's type.
        unsafe { self.descriptor.to_json(self.ptr) }
    }
}

/// Mutable view of one constructed slot.
pub struct StructMut<'a> {
    descriptor: TypeDescriptor,
    ptr: *mut u8,
    _marker: PhantomData<&'a mut InstanceData>,
}

impl<'a> StructMut<'a> {
    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    pub fn into_mut<T: Record>(self) -> Option<&'a mut T> {
        if !self.descriptor.is::<T>() {
            return None;
        }
        // SAFETY: the arena is mutably borrowed and the slot holds a live T.
        Some(unsafe { &mut *self.ptr.cast::<T>() })
    }
}

/// One instance's working memory: an aligned block of typed records plus heap
/// instance objects.
#[derive(Default)]
pub struct InstanceData {
    layout: Option<Arc<InstanceDataLayout>>,
    block: Option<RawBlock>,
    objects: Vec<Box<dyn InstanceObject>>,
}

impl InstanceData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release any current contents, then allocate and default-construct every
    /// non-empty slot of `layout`.
    pub fn allocate(&mut self, layout: Arc<InstanceDataLayout>) {
        self.reset();
        let block = RawBlock::allocate(layout.size(), layout.min_alignment());
        for item in layout.items() {
            if let Some(descriptor) = item.descriptor {
                // SAFETY: offset + size lies within the block and is aligned for the item.
                unsafe { descriptor.construct(block.base().add(item.offset as usize)) };
            }
        }
        trace!(items = layout.len(), size = layout.size(), "instance data allocated");
        self.block = Some(block);
        self.layout = Some(layout);
    }

    /// Deep-copy `other`: values copied slot by slot, heap objects duplicated
    /// for `owner`. The layout is shared, never the storage.
    pub fn copy_from(&mut self, owner: &Owner, other: &InstanceData) {
        let Some(layout) = other.layout.clone() else {
            self.reset();
            return;
        };
        self.allocate(layout);
        if let (Some(layout), Some(dst), Some(src)) = (&self.layout, &self.block, &other.block) {
            for item in layout.items() {
                if let Some(descriptor) = item.descriptor {
                    let offset = item.offset as usize;
                    // SAFETY: both blocks share the layout and hold live values in every slot.
                    unsafe { descriptor.copy(dst.base().add(offset), src.base().add(offset)) };
                }
            }
        }
        self.objects = other
            .objects
            .iter()
            .map(|object| object.duplicate(owner))
            .collect();
    }

    /// Build a fresh layout from `values`, allocate it, and copy each value in.
    pub fn initialize(
        &mut self,
        owner: &Owner,
        values: &[RecordValue],
        objects: &[Box<dyn InstanceObject>],
    ) -> Result<(), String> {
        for (index, value) in values.iter().enumerate() {
            match (&value.descriptor, &value.value) {
                (Some(descriptor), Some(boxed)) => {
                    let actual = Any::type_id(boxed.as_ref());
                    if actual != descriptor.type_id() {
                        self.reset();
                        return Err(format!(
                            "record {index}: value does not match descriptor {}",
                            descriptor.type_name()
                        ));
                    }
                }
                (None, None) => {}
                _ => {
                    self.reset();
                    return Err(format!("record {index}: descriptor and value disagree"));
                }
            }
        }

        let layout = InstanceDataLayout::build(values.iter().map(RecordValue::descriptor));
        self.allocate(Arc::new(layout));
        if let (Some(layout), Some(block)) = (&self.layout, &self.block) {
            for (item, value) in layout.items().iter().zip(values) {
                if let (Some(descriptor), Some(boxed)) = (item.descriptor, &value.value) {
                    let src = (boxed.as_ref() as *const (dyn Any + Send + Sync)).cast::<u8>();
                    // SAFETY: type identity was checked above; dst slot is constructed.
                    unsafe { descriptor.copy(block.base().add(item.offset as usize), src) };
                }
            }
        }
        self.objects = objects.iter().map(|object| object.duplicate(owner)).collect();
        Ok(())
    }

    /// Destruct every slot and free the block. Safe on an unallocated arena.
    pub fn reset(&mut self) {
        if let (Some(layout), Some(block)) = (self.layout.take(), self.block.take()) {
            for item in layout.items() {
                if let Some(descriptor) = item.descriptor {
                    // SAFETY: every non-empty slot was constructed by `allocate`.
                    unsafe { descriptor.destruct(block.base().add(item.offset as usize)) };
                }
            }
        }
        self.objects.clear();
    }

    pub fn is_allocated(&self) -> bool {
        self.layout.is_some()
    }

    pub fn layout(&self) -> Option<&Arc<InstanceDataLayout>> {
        self.layout.as_ref()
    }

    pub fn num_items(&self) -> usize {
        self.layout.as_ref().map_or(0, |layout| layout.len())
    }

    pub fn size(&self) -> usize {
        self.layout.as_ref().map_or(0, |layout| layout.size())
    }

    fn slot(&self, index: usize) -> Option<(TypeDescriptor, *mut u8)> {
        let layout = self.layout.as_ref()?;
        let block = self.block.as_ref()?;
        let LayoutItem { offset, descriptor } = *layout.item(index)?;
        // SAFETY: offset lies within the allocated block.
        let ptr = unsafe { block.base().add(offset as usize) };
        Some((descriptor?, ptr))
    }

    /// Untyped view of slot `index`; `None` if out of range or empty.
    pub fn get_struct(&self, index: usize) -> Option<StructRef<'_>> {
        let (descriptor, ptr) = self.slot(index)?;
        Some(StructRef {
            descriptor,
            ptr,
            _marker: PhantomData,
        })
    }

    pub fn get_mutable_struct(&mut self, index: usize) -> Option<StructMut<'_>> {
        let (descriptor, ptr) = self.slot(index)?;
        Some(StructMut {
            descriptor,
            ptr,
            _marker: PhantomData,
        })
    }

    pub fn get<T: Record>(&self, index: usize) -> Option<&T> {
        self.get_struct(index)?.get::<T>()
    }

    pub fn get_mut<T: Record>(&mut self, index: usize) -> Option<&mut T> {
        self.get_mutable_struct(index)?.into_mut::<T>()
    }

    pub fn objects(&self) -> &[Box<dyn InstanceObject>] {
        &self.objects
    }

    pub fn object<T: InstanceObject>(&self, index: usize) -> Option<&T> {
        self.objects.get(index)?.as_any().downcast_ref::<T>()
    }

    pub fn object_mut<T: InstanceObject>(&mut self, index: usize) -> Option<&mut T> {
        self.objects.get_mut(index)?.as_any_mut().downcast_mut::<T>()
    }

    /// Total comparison: mismatched or half-allocated arenas are simply not
    /// identical.
    pub fn identical(&self, other: &InstanceData, flags: PortFlags) -> bool {
        let (layout, other_layout) = match (&self.layout, &other.layout) {
            (None, None) => return true,
            (Some(a), Some(b)) => (a, b),
            _ => return false,
        };
        if !Arc::ptr_eq(layout, other_layout) && !layout.is_compatible(other_layout) {
            return false;
        }
        let (Some(block), Some(other_block)) = (&self.block, &other.block) else {
            return false;
        };

        for item in layout.items() {
            if let Some(descriptor) = item.descriptor {
                let offset = item.offset as usize;
                // SAFETY: compatible layouts; both slots hold live values.
                let same = unsafe {
                    descriptor.compare(
                        block.base().add(offset),
                        other_block.base().add(offset),
                        flags,
                    )
                };
                if !same {
                    return false;
                }
            }
        }

        if self.objects.len() != other.objects.len() {
            return false;
        }
        self.objects
            .iter()
            .zip(&other.objects)
            .all(|(a, b)| objects_identical(a.as_ref(), b.as_ref(), flags))
    }

    pub fn serialize(&self) -> Result<InstanceSnapshot, String> {
        let mut items = Vec::with_capacity(self.num_items());
        for index in 0..self.num_items() {
            match self.get_struct(index) {
                Some(view) => items.push(Some(view.to_json()?)),
                None => items.push(None),
            }
        }
        let objects = self.objects.iter().map(|object| object.snapshot()).collect();
        Ok(InstanceSnapshot { items, objects })
    }

    /// Write snapshot item values back in exact layout order.
    pub fn restore_items(&mut self, snapshot: &InstanceSnapshot) -> Result<(), String> {
        let count = self.num_items();
        if !self.is_allocated() {
            return Err("cannot restore into unallocated instance data".to_string());
        }
        if snapshot.items.len() != count {
            return Err(format!(
                "snapshot has {} items, layout has {}",
                snapshot.items.len(),
                count
            ));
        }
        for (index, value) in snapshot.items.iter().enumerate() {
            match (self.slot(index), value) {
                (Some((descriptor, ptr)), Some(value)) => {
                    // SAFETY: slot is constructed and typed by its descriptor.
                    unsafe { descriptor.from_json(ptr, value) }
                        .map_err(|err| format!("item {index}: {err}"))?;
                }
                (None, None) => {}
                (Some(_), None) => return Err(format!("item {index}: missing value")),
                (None, Some(_)) => return Err(format!("item {index}: slot is empty")),
            }
        }
        Ok(())
    }
}

fn objects_identical(a: &dyn InstanceObject, b: &dyn InstanceObject, flags: PortFlags) -> bool {
    if Any::type_id(a.as_any()) != Any::type_id(b.as_any()) {
        return false;
    }
    if flags.contains(PortFlags::DEEP_COMPARE_INSTANCES) {
        a.identical(b)
    } else {
        std::ptr::addr_eq(a as *const dyn InstanceObject, b as *const dyn InstanceObject)
    }
}

impl Drop for InstanceData {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for InstanceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceData")
            .field("items", &self.num_items())
            .field("size", &self.size())
            .field("objects", &self.objects)
            .finish()
    }
}
