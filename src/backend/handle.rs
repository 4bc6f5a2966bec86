//! Generation-checked resource handles
//!
//! Backends store their native objects in a [`ResourceTable`]. A handle is a
//! slot index plus the slot's generation at insertion time; releasing a slot
//! bumps its generation, so a handle kept past release resolves to `None`
//! instead of aliasing whatever reuses the slot.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed handle into a [`ResourceTable`]
pub struct ResourceHandle<K> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> K>,
}

impl<K> ResourceHandle<K> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index in the owning table
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<K> Clone for ResourceHandle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for ResourceHandle<K> {}

impl<K> PartialEq for ResourceHandle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<K> Eq for ResourceHandle<K> {}

impl<K> Hash for ResourceHandle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<K> fmt::Debug for ResourceHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = std::any::type_name::<K>().rsplit("::").next().unwrap_or("?");
        write!(f, "{}({}v{})", kind, self.index, self.generation)
    }
}

struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

/// Arena of backend resources addressed by [`ResourceHandle`]
pub struct ResourceTable<K, V> {
    slots: Vec<Slot<V>>,
    free: Vec<u32>,
    live: usize,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V> ResourceTable<K, V> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            _marker: PhantomData,
        }
    }

    pub fn insert(&mut self, value: V) -> ResourceHandle<K> {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ResourceHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ResourceHandle::new(index, 0)
    }

    pub fn get(&self, handle: ResourceHandle<K>) -> Option<&V> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: ResourceHandle<K>) -> Option<&mut V> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: ResourceHandle<K>) -> bool {
        self.get(handle).is_some()
    }

    /// Release a slot. Returns `None` for stale or already released handles.
    pub fn remove(&mut self, handle: ResourceHandle<K>) -> Option<V> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceHandle<K>, &V)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (ResourceHandle::new(index as u32, slot.generation), value))
        })
    }

    /// Release every live slot, invalidating all outstanding handles
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.live = 0;
    }
}

impl<K, V> Default for ResourceTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle kinds
pub mod kind {
    pub enum Buffer {}
    pub enum Texture {}
    pub enum TextureView {}
    pub enum Sampler {}
    pub enum BindGroupLayout {}
    pub enum BindGroup {}
    pub enum RenderPipeline {}
    pub enum ComputePipeline {}
}

/// Handle to a GPU buffer
pub type BufferHandle = ResourceHandle<kind::Buffer>;
/// Handle to a GPU texture
pub type TextureHandle = ResourceHandle<kind::Texture>;
/// Handle to a texture view
pub type TextureViewHandle = ResourceHandle<kind::TextureView>;
/// Handle to a sampler
pub type SamplerHandle = ResourceHandle<kind::Sampler>;
/// Handle to a bind group layout
pub type BindGroupLayoutHandle = ResourceHandle<kind::BindGroupLayout>;
/// Handle to a bind group
pub type BindGroupHandle = ResourceHandle<kind::BindGroup>;
/// Handle to a render pipeline
pub type RenderPipelineHandle = ResourceHandle<kind::RenderPipeline>;
/// Handle to a compute pipeline
pub type ComputePipelineHandle = ResourceHandle<kind::ComputePipeline>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_handle_is_stale() {
        let mut table: ResourceTable<kind::Buffer, &str> = ResourceTable::new();
        let a = table.insert("a");
        assert_eq!(table.get(a), Some(&"a"));
        assert_eq!(table.remove(a), Some("a"));
        assert_eq!(table.get(a), None);
        assert_eq!(table.remove(a), None);

        // The slot is reused but the old handle must not see the new value
        let b = table.insert("b");
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(table.get(a), None);
        assert_eq!(table.get(b), Some(&"b"));
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut table: ResourceTable<kind::Texture, u32> = ResourceTable::new();
        let handles: Vec<_> = (0..4).map(|i| table.insert(i)).collect();
        assert_eq!(table.len(), 4);
        table.clear();
        assert!(table.is_empty());
        assert!(handles.iter().all(|h| !table.contains(*h)));
        let fresh = table.insert(9);
        assert_eq!(table.iter().count(), 1);
        assert_eq!(table.get(fresh), Some(&9));
    }
}
