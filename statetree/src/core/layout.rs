//! Offset and alignment planning for instance data.

use crate::core::descriptor::TypeDescriptor;

/// One record slot: its byte offset and the operations for its type.
///
/// `descriptor == None` is the empty descriptor: the slot reserves an index but
/// no bytes (its state lives in a heap instance object).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutItem {
    pub offset: u32,
    pub descriptor: Option<TypeDescriptor>,
}

impl LayoutItem {
    pub fn size(&self) -> usize {
        self.descriptor.map_or(0, |desc| desc.size())
    }

    pub fn alignment(&self) -> usize {
        self.descriptor.map_or(0, |desc| desc.alignment())
    }

    pub fn is_empty(&self) -> bool {
        self.descriptor.is_none()
    }
}

/// Ordered record slots plus the total footprint of the block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceDataLayout {
    items: Vec<LayoutItem>,
    size: usize,
    min_alignment: usize,
}

impl InstanceDataLayout {
    /// Pack `descriptors` in order, aligning each slot to its own type.
    ///
    /// Deterministic: the same descriptor sequence always yields the same
    /// offsets, so instances of same-shaped graphs are layout compatible.
    pub fn build<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Option<TypeDescriptor>>,
    {
        let mut items = Vec::new();
        let mut offset = 0usize;
        let mut size = 0usize;
        let mut min_alignment = 0usize;

        for descriptor in descriptors {
            let (item_size, alignment) =
                descriptor.map_or((0, 0), |desc| (desc.size(), desc.alignment()));
            if alignment > 0 {
                offset = offset.next_multiple_of(alignment);
            }
            items.push(LayoutItem {
                offset: offset as u32,
                descriptor,
            });
            offset += item_size;
            size = offset;
            min_alignment = min_alignment.max(alignment);
        }

        Self {
            items,
            size,
            min_alignment,
        }
    }

    pub fn items(&self) -> &[LayoutItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> Option<&LayoutItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total bytes: last item's `offset + size`, 0 when empty.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Largest item alignment, 0 when empty.
    pub fn min_alignment(&self) -> usize {
        self.min_alignment
    }

    /// True when both layouts interpret a block's bytes identically.
    pub fn is_compatible(&self, other: &InstanceDataLayout) -> bool {
        self.size == other.size && self.items == other.items
    }
}
