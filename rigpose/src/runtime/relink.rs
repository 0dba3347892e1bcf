use super::element::{ElementData, TransformSlots};
use super::hierarchy::RigHierarchy;
use super::storage::StorageLink;
use crate::{ElementKey, ElementKind, Transform, TransformStorageType, TransformType};

/// One entry of a batched [`RigHierarchy::relink_transform_storages`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageRelink {
    pub key: ElementKey,
    pub transform_type: TransformType,
    pub storage: TransformStorageType,
    pub transform: StorageLink,
    pub dirty: StorageLink,
}

impl RigHierarchy {
    fn slots_of(&self, key: &ElementKey, storage: TransformStorageType) -> Option<(usize, TransformSlots)> {
        let index = self.index_of(key)?;
        let slots = *self.elements[index].slots(storage)?;
        Some((index, slots))
    }

    /// Points one slot at new storage, carrying its value and dirty flag across.
    ///
    /// The old slot is returned to the pool when it was pool-backed. Returns false for
    /// unknown slots or when the slot already uses the given links.
    pub fn relink_transform_storage(
        &mut self,
        key: &ElementKey,
        transform_type: TransformType,
        storage: TransformStorageType,
        transform: StorageLink,
        dirty: StorageLink,
    ) -> bool {
        let freed = self.relink_slot(key, transform_type, storage, transform, dirty);
        let Some((freed_transform, freed_dirty)) = freed else {
            return false;
        };
        self.transforms.deallocate(&freed_transform.into_iter().collect::<Vec<_>>());
        self.dirty_states.deallocate(&freed_dirty.into_iter().collect::<Vec<_>>());
        true
    }

    /// Batched [`RigHierarchy::relink_transform_storage`]. Returns the number of relinked slots.
    pub fn relink_transform_storages(&mut self, relinks: &[StorageRelink]) -> usize {
        let mut freed_transforms = Vec::new();
        let mut freed_dirty = Vec::new();
        let mut relinked = 0;
        for relink in relinks {
            let Some((transform, dirty)) = self.relink_slot(
                &relink.key,
                relink.transform_type,
                relink.storage,
                relink.transform,
                relink.dirty,
            ) else {
                continue;
            };
            freed_transforms.extend(transform);
            freed_dirty.extend(dirty);
            relinked += 1;
        }
        self.transforms.deallocate(&freed_transforms);
        self.dirty_states.deallocate(&freed_dirty);
        relinked
    }

    /// Rewrites the links and copies the value. Returns the pool slots that are no longer used.
    fn relink_slot(
        &mut self,
        key: &ElementKey,
        transform_type: TransformType,
        storage: TransformStorageType,
        transform: StorageLink,
        dirty: StorageLink,
    ) -> Option<(Option<usize>, Option<usize>)> {
        let (index, slots) = self.slots_of(key, storage)?;
        let old_transform = slots.transform(transform_type);
        let old_dirty = slots.dirty(transform_type);
        if old_transform == transform && old_dirty == dirty {
            return None;
        }

        let value = self.read_transform(old_transform, transform_type);
        let is_dirty = self.read_dirty(old_dirty, transform_type);
        self.write_transform(transform, transform_type, value);
        self.write_dirty(dirty, transform_type, is_dirty);

        let slots = self.elements[index].slots_mut(storage)?;
        slots.transforms[transform_type.index()] = transform;
        slots.dirty[transform_type.index()] = dirty;

        Some((
            old_transform.pool_index().filter(|_| old_transform != transform),
            old_dirty.pool_index().filter(|_| old_dirty != dirty),
        ))
    }

    /// Moves one slot back into freshly allocated pool storage, keeping its value.
    /// Returns false if the slot is unknown or already pool-backed.
    pub fn restore_transform_storage(
        &mut self,
        key: &ElementKey,
        transform_type: TransformType,
        storage: TransformStorageType,
    ) -> bool {
        self.restore_transform_storages(&[(key.clone(), transform_type, storage)]) == 1
    }

    /// Batched [`RigHierarchy::restore_transform_storage`]. Pool slots are allocated in one go.
    pub fn restore_transform_storages(
        &mut self,
        slots: &[(ElementKey, TransformType, TransformStorageType)],
    ) -> usize {
        let pending: Vec<(usize, TransformType, TransformStorageType, TransformSlots)> = slots
            .iter()
            .filter_map(|(key, transform_type, storage)| {
                let (index, element_slots) = self.slots_of(key, *storage)?;
                let linked = !element_slots.transform(*transform_type).is_pool()
                    || !element_slots.dirty(*transform_type).is_pool();
                linked.then_some((index, *transform_type, *storage, element_slots))
            })
            .collect();
        if pending.is_empty() {
            return 0;
        }

        let transforms = self.transforms.allocate(pending.len(), Transform::IDENTITY);
        let dirty = self.dirty_states.allocate(pending.len(), false);
        for (slot, (index, transform_type, storage, element_slots)) in pending.iter().enumerate() {
            let old_transform = element_slots.transform(*transform_type);
            let old_dirty = element_slots.dirty(*transform_type);
            let value = self.read_transform(old_transform, *transform_type);
            let is_dirty = self.read_dirty(old_dirty, *transform_type);

            let new_transform = StorageLink::Pool(transforms[slot]);
            let new_dirty = StorageLink::Pool(dirty[slot]);
            self.write_transform(new_transform, *transform_type, value);
            self.write_dirty(new_dirty, *transform_type, is_dirty);
            if let Some(target) = self.elements[*index].slots_mut(*storage) {
                target.transforms[transform_type.index()] = new_transform;
                target.dirty[transform_type.index()] = new_dirty;
            }
            // A pool-backed half of a partially relinked slot is released.
            let released_transform: Vec<usize> = old_transform.pool_index().into_iter().collect();
            let released_dirty: Vec<usize> = old_dirty.pool_index().into_iter().collect();
            self.transforms.deallocate(&released_transform);
            self.dirty_states.deallocate(&released_dirty);
        }
        pending.len()
    }

    /// Points a curve's value at new storage, carrying the value across.
    pub fn relink_curve_storage(&mut self, key: &ElementKey, link: StorageLink) -> bool {
        let Some(index) = self.index_of(key) else {
            return false;
        };
        let Some(old) = self.elements[index].curve_link() else {
            return false;
        };
        if old == link {
            return false;
        }
        let value = self.curve_value(index).unwrap_or_default();
        if let ElementData::Curve { value: stored, .. } = &mut self.elements[index].data {
            *stored = link;
        }
        self.write_curve_value(link, value);
        if let StorageLink::Pool(slot) = old {
            self.curves.deallocate(&[slot]);
        }
        true
    }

    pub fn restore_curve_storage(&mut self, key: &ElementKey) -> bool {
        let Some(index) = self.index_of(key) else {
            return false;
        };
        let Some(StorageLink::Pose(_)) = self.elements[index].curve_link() else {
            return false;
        };
        let value = self.curve_value(index).unwrap_or_default();
        let link = StorageLink::Pool(self.curves.allocate_one(value));
        if let ElementData::Curve { value: stored, .. } = &mut self.elements[index].data {
            *stored = link;
        }
        true
    }

    fn write_curve_value(&mut self, link: StorageLink, value: f32) {
        let target = match link {
            StorageLink::Pool(slot) => self.curves.get_mut(slot),
            StorageLink::Pose(slot) => self
                .pose_adapter
                .as_mut()
                .and_then(|adapter| adapter.curves.get_mut(slot)),
        };
        if let Some(target) = target {
            *target = value;
        }
    }

    /// Reorders the pooled storage so every transform type forms one contiguous range, and
    /// within it elements are grouped by kind. Freed slots are dropped.
    pub fn sort_transform_storage(&mut self) {
        let mut transform_order = Vec::new();
        let mut dirty_order = Vec::new();
        for transform_type in TransformType::ALL {
            for kind in ElementKind::ALL {
                for &index in self.elements_of_kind(kind) {
                    for (_, slots) in self.elements[index].all_slots() {
                        transform_order.extend(slots.transform(transform_type).pool_index());
                        dirty_order.extend(slots.dirty(transform_type).pool_index());
                    }
                }
            }
        }
        self.compact_transform_storage(&transform_order, &dirty_order);
        tracing::debug!(
            hierarchy = self.id(),
            transforms = self.transforms.len(),
            "sorted transform storage"
        );
    }

    /// Drops freed pool slots while keeping the order of the live ones.
    pub fn shrink_transform_storage(&mut self) {
        let before = self.transforms.len();
        let mut transform_order = Vec::new();
        let mut dirty_order = Vec::new();
        for element in &self.elements {
            for (_, slots) in element.all_slots() {
                transform_order.extend(slots.transforms.iter().filter_map(|link| link.pool_index()));
                dirty_order.extend(slots.dirty.iter().filter_map(|link| link.pool_index()));
            }
        }
        transform_order.sort_unstable();
        dirty_order.sort_unstable();
        self.compact_transform_storage(&transform_order, &dirty_order);
        tracing::debug!(
            hierarchy = self.id(),
            before,
            after = self.transforms.len(),
            "shrank transform storage"
        );
    }

    fn compact_transform_storage(&mut self, transform_order: &[usize], dirty_order: &[usize]) {
        let transform_remap = self.transforms.compact(transform_order);
        let dirty_remap = self.dirty_states.compact(dirty_order);

        let mut curve_order: Vec<usize> = self
            .elements
            .iter()
            .filter_map(|element| element.curve_link().and_then(StorageLink::pool_index))
            .collect();
        curve_order.sort_unstable();
        let curve_remap = self.curves.compact(&curve_order);

        let remap = |link: &mut StorageLink, table: &[Option<usize>]| {
            if let StorageLink::Pool(slot) = link {
                if let Some(Some(moved)) = table.get(*slot) {
                    *slot = *moved;
                }
            }
        };
        for element in &mut self.elements {
            for storage in [
                TransformStorageType::Pose,
                TransformStorageType::Offset,
                TransformStorageType::Shape,
            ] {
                if let Some(slots) = element.slots_mut(storage) {
                    for link in &mut slots.transforms {
                        remap(link, &transform_remap);
                    }
                    for link in &mut slots.dirty {
                        remap(link, &dirty_remap);
                    }
                }
            }
            if let ElementData::Curve { value, .. } = &mut element.data {
                remap(value, &curve_remap);
            }
        }
    }
}
