use super::element::{Element, ElementData, ParentConstraint, TransformSlots};
use super::pose_adapter::PoseAdapter;
use super::storage::{ReusableStorage, StorageLink};
use crate::{
    BoneType, ControlSettings, ElementKey, ElementKind, ElementWeight, Error, Transform,
    TransformStorageType, TransformType,
};
use std::collections::HashMap;

const KIND_COUNT: usize = ElementKind::ALL.len();

/// Owns every element of a rig together with the pooled transform, dirty-flag and curve
/// storage the elements point into.
///
/// Structural edits bump [`RigHierarchy::topology_version`]; caches built against the
/// hierarchy compare that counter instead of re-deriving equality.
#[derive(Debug)]
pub struct RigHierarchy {
    id: u64,
    topology_version: u32,
    pub(crate) elements: Vec<Element>,
    index_lookup: HashMap<ElementKey, usize>,
    elements_per_kind: [Vec<usize>; KIND_COUNT],
    pub(crate) transforms: ReusableStorage<Transform>,
    pub(crate) dirty_states: ReusableStorage<bool>,
    pub(crate) curves: ReusableStorage<f32>,
    curve_defaults: HashMap<usize, Option<f32>>,
    pub(crate) pose_adapter: Option<PoseAdapter>,
}

impl Default for RigHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl RigHierarchy {
    pub fn new() -> Self {
        Self {
            id: crate::ids::next_hierarchy_id(),
            topology_version: 0,
            elements: Vec::new(),
            index_lookup: HashMap::new(),
            elements_per_kind: Default::default(),
            transforms: ReusableStorage::default(),
            dirty_states: ReusableStorage::default(),
            curves: ReusableStorage::default(),
            curve_defaults: HashMap::new(),
            pose_adapter: None,
        }
    }

    /// Process-unique identity of this hierarchy instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topology_version(&self) -> u32 {
        self.topology_version
    }

    pub(crate) fn increment_topology_version(&mut self) {
        self.topology_version = self.topology_version.wrapping_add(1);
        tracing::trace!(
            hierarchy = self.id,
            version = self.topology_version,
            "topology changed"
        );
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn get(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn find(&self, key: &ElementKey) -> Option<&Element> {
        self.index_of(key).and_then(|index| self.elements.get(index))
    }

    pub fn index_of(&self, key: &ElementKey) -> Option<usize> {
        self.index_lookup.get(key).copied()
    }

    pub fn contains(&self, key: &ElementKey) -> bool {
        self.index_lookup.contains_key(key)
    }

    pub fn parents(&self, index: usize) -> &[ParentConstraint] {
        self.elements
            .get(index)
            .map(|element| element.parents.as_slice())
            .unwrap_or(&[])
    }

    pub fn children(&self, index: usize) -> &[usize] {
        self.elements
            .get(index)
            .map(|element| element.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn elements_of_kind(&self, kind: ElementKind) -> &[usize] {
        &self.elements_per_kind[kind.index()]
    }

    /// Names the driving skeleton may map onto: bones, nulls and controls.
    pub fn mappable_bone_names(&self) -> impl Iterator<Item = &str> {
        [ElementKind::Bone, ElementKind::Null, ElementKind::Control]
            .into_iter()
            .flat_map(|kind| self.elements_of_kind(kind).iter())
            .map(|&index| self.elements[index].name())
    }

    /// Looks a transform element up by name, preferring bones over nulls over controls.
    pub fn find_transform_by_name(&self, name: &str) -> Option<usize> {
        [ElementKind::Bone, ElementKind::Null, ElementKind::Control]
            .into_iter()
            .find_map(|kind| self.index_of(&ElementKey::new(kind, name)))
    }

    /// Whether `ancestor` is reachable from `index` through parent links (or is `index`).
    pub fn is_parented_to(&self, index: usize, ancestor: usize) -> bool {
        let mut visited = vec![false; self.elements.len()];
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            if current == ancestor {
                return true;
            }
            let Some(element) = self.elements.get(current) else {
                continue;
            };
            if std::mem::replace(&mut visited[current], true) {
                continue;
            }
            stack.extend(element.parent_indices());
        }
        false
    }

    pub fn add_bone(
        &mut self,
        name: &str,
        parent: Option<&ElementKey>,
        initial_local: Transform,
        bone_type: BoneType,
    ) -> Result<usize, Error> {
        self.add_element(
            ElementKey::bone(name),
            ElementData::Bone { bone_type },
            parent,
            initial_local,
        )
    }

    pub fn add_null(
        &mut self,
        name: &str,
        parent: Option<&ElementKey>,
        initial_local: Transform,
    ) -> Result<usize, Error> {
        self.add_element(ElementKey::null(name), ElementData::Null, parent, initial_local)
    }

    pub fn add_control(
        &mut self,
        name: &str,
        parent: Option<&ElementKey>,
        settings: ControlSettings,
        initial_local: Transform,
    ) -> Result<usize, Error> {
        let offset = self.allocate_slots(settings.offset);
        let shape = self.allocate_slots(settings.shape);
        let data = ElementData::Control {
            animation_type: settings.animation_type,
            offset,
            shape,
        };
        self.add_element(ElementKey::control(name), data, parent, initial_local)
            .inspect_err(|_| {
                self.free_slots(&offset);
                self.free_slots(&shape);
            })
    }

    pub fn add_reference(
        &mut self,
        name: &str,
        parent: Option<&ElementKey>,
        initial_local: Transform,
    ) -> Result<usize, Error> {
        self.add_element(
            ElementKey::new(ElementKind::Reference, name),
            ElementData::Reference,
            parent,
            initial_local,
        )
    }

    pub fn add_connector(&mut self, name: &str, initial_local: Transform) -> Result<usize, Error> {
        self.add_element(
            ElementKey::new(ElementKind::Connector, name),
            ElementData::Connector,
            None,
            initial_local,
        )
    }

    pub fn add_socket(
        &mut self,
        name: &str,
        parent: Option<&ElementKey>,
        initial_local: Transform,
    ) -> Result<usize, Error> {
        self.add_element(
            ElementKey::new(ElementKind::Socket, name),
            ElementData::Socket,
            parent,
            initial_local,
        )
    }

    /// Adds a curve. `initial_value` of `None` leaves the curve unset.
    pub fn add_curve(&mut self, name: &str, initial_value: Option<f32>) -> Result<usize, Error> {
        let key = ElementKey::curve(name);
        self.validate_new_key(&key)?;
        let value = StorageLink::Pool(self.curves.allocate_one(initial_value.unwrap_or(0.0)));
        let index = self.push_element(Element {
            index: self.elements.len(),
            key,
            parents: Vec::new(),
            children: Vec::new(),
            pose: None,
            data: ElementData::Curve {
                value,
                is_set: initial_value.is_some(),
            },
        });
        self.curve_defaults.insert(index, initial_value);
        Ok(index)
    }

    fn validate_new_key(&self, key: &ElementKey) -> Result<(), Error> {
        if key.name.trim().is_empty() {
            return Err(Error::InvalidName {
                name: key.name.clone(),
            });
        }
        if self.contains(key) {
            return Err(Error::DuplicateElement { key: key.clone() });
        }
        Ok(())
    }

    fn add_element(
        &mut self,
        key: ElementKey,
        data: ElementData,
        parent: Option<&ElementKey>,
        initial_local: Transform,
    ) -> Result<usize, Error> {
        self.validate_new_key(&key)?;
        let parent_index = match parent {
            Some(parent) => Some(self.index_of(parent).ok_or_else(|| Error::UnknownParent {
                child: key.clone(),
                parent: parent.clone(),
            })?),
            None => None,
        };
        if let Some(parent_index) = parent_index {
            if !self.elements[parent_index].has_transforms() {
                return Err(Error::NotTransformElement {
                    key: self.elements[parent_index].key.clone(),
                });
            }
        }

        let pose = self.allocate_slots(initial_local);
        let index = self.push_element(Element {
            index: self.elements.len(),
            key,
            parents: parent_index
                .map(|parent| vec![ParentConstraint::new(parent, ElementWeight::FULL)])
                .unwrap_or_default(),
            children: Vec::new(),
            pose: Some(pose),
            data,
        });
        if let Some(parent_index) = parent_index {
            self.elements[parent_index].children.push(index);
        }
        Ok(index)
    }

    fn push_element(&mut self, element: Element) -> usize {
        let index = self.elements.len();
        debug_assert_eq!(element.index, index);
        tracing::trace!(hierarchy = self.id, key = %element.key, index, "add element");
        self.index_lookup.insert(element.key.clone(), index);
        self.elements_per_kind[element.kind().index()].push(index);
        self.elements.push(element);
        self.increment_topology_version();
        index
    }

    /// Allocates a transform stack whose local slots hold `local` and whose globals are dirty.
    fn allocate_slots(&mut self, local: Transform) -> TransformSlots {
        let transforms = self.transforms.allocate(4, Transform::IDENTITY);
        let dirty = self.dirty_states.allocate(4, false);
        for transform_type in TransformType::ALL {
            let slot = transform_type.index();
            if transform_type.is_local() {
                if let Some(value) = self.transforms.get_mut(transforms[slot]) {
                    *value = local.normalized();
                }
            } else if let Some(flag) = self.dirty_states.get_mut(dirty[slot]) {
                *flag = true;
            }
        }
        TransformSlots {
            transforms: std::array::from_fn(|slot| StorageLink::Pool(transforms[slot])),
            dirty: std::array::from_fn(|slot| StorageLink::Pool(dirty[slot])),
        }
    }

    fn free_slots(&mut self, slots: &TransformSlots) {
        let transforms: Vec<usize> = slots.transforms.iter().filter_map(|l| l.pool_index()).collect();
        let dirty: Vec<usize> = slots.dirty.iter().filter_map(|l| l.pool_index()).collect();
        self.transforms.deallocate(&transforms);
        self.dirty_states.deallocate(&dirty);
    }

    /// Removes an element. Its children are re-parented to its parents and keep their
    /// global transforms.
    pub fn remove_element(&mut self, key: &ElementKey) -> Result<(), Error> {
        let removed = self
            .index_of(key)
            .ok_or_else(|| Error::UnknownElement { key: key.clone() })?;

        let inherited = self.elements[removed].parents.clone();
        let children = self.elements[removed].children.clone();
        for child in children {
            let child_kind = self.elements[child].kind();
            let mut replacement: Vec<ParentConstraint> = inherited.clone();
            if !child_kind.supports_multiple_parents() {
                replacement.truncate(1);
            }
            self.reparent(
                child,
                |parents| {
                    let mut next: Vec<ParentConstraint> = Vec::with_capacity(parents.len());
                    for constraint in parents.drain(..) {
                        if constraint.parent == removed {
                            next.extend(replacement.iter().copied());
                        } else {
                            next.push(constraint);
                        }
                    }
                    let mut seen = Vec::new();
                    next.retain(|constraint| {
                        if seen.contains(&constraint.parent) {
                            false
                        } else {
                            seen.push(constraint.parent);
                            true
                        }
                    });
                    *parents = next;
                },
                true,
            );
        }

        let parents: Vec<usize> = self.elements[removed].parent_indices().collect();
        for parent in parents {
            self.elements[parent].children.retain(|&child| child != removed);
        }
        let element = self.elements.remove(removed);
        for (_, slots) in element.all_slots() {
            self.free_slots(slots);
        }
        if let Some(StorageLink::Pool(index)) = element.curve_link() {
            self.curves.deallocate(&[index]);
        }

        let shift = |index: usize| if index > removed { index - 1 } else { index };
        for element in &mut self.elements {
            element.index = shift(element.index);
            for constraint in &mut element.parents {
                constraint.parent = shift(constraint.parent);
            }
            for child in &mut element.children {
                *child = shift(*child);
            }
        }
        self.curve_defaults = std::mem::take(&mut self.curve_defaults)
            .into_iter()
            .filter(|(index, _)| *index != removed)
            .map(|(index, value)| (shift(index), value))
            .collect();
        self.rebuild_lookup();
        self.increment_topology_version();
        tracing::debug!(hierarchy = self.id, key = %key, "removed element");
        Ok(())
    }

    fn rebuild_lookup(&mut self) {
        self.index_lookup.clear();
        for list in &mut self.elements_per_kind {
            list.clear();
        }
        for element in &self.elements {
            self.index_lookup.insert(element.key.clone(), element.index);
            self.elements_per_kind[element.kind().index()].push(element.index);
        }
    }

    fn resolve_parent_key(&self, child: usize, parent: &ElementKey) -> Result<usize, Error> {
        let parent_index = self.index_of(parent).ok_or_else(|| Error::UnknownParent {
            child: self.elements[child].key.clone(),
            parent: parent.clone(),
        })?;
        if !self.elements[parent_index].has_transforms() {
            return Err(Error::NotTransformElement {
                key: parent.clone(),
            });
        }
        if self.is_parented_to(parent_index, child) {
            return Err(Error::CyclicParent {
                child: self.elements[child].key.clone(),
                parent: parent.clone(),
            });
        }
        Ok(parent_index)
    }

    fn transform_element_index(&self, key: &ElementKey) -> Result<usize, Error> {
        let index = self
            .index_of(key)
            .ok_or_else(|| Error::UnknownElement { key: key.clone() })?;
        if !self.elements[index].has_transforms() {
            return Err(Error::NotTransformElement { key: key.clone() });
        }
        Ok(index)
    }

    /// Replaces all parents of `child`. `None` parents it to the world.
    pub fn set_parent(
        &mut self,
        child: &ElementKey,
        parent: Option<&ElementKey>,
        maintain_global: bool,
    ) -> Result<(), Error> {
        let child_index = self.transform_element_index(child)?;
        let parent_index = match parent {
            Some(parent) => Some(self.resolve_parent_key(child_index, parent)?),
            None => None,
        };
        self.reparent(
            child_index,
            |parents| {
                *parents = parent_index
                    .map(|parent| vec![ParentConstraint::new(parent, ElementWeight::FULL)])
                    .unwrap_or_default();
            },
            maintain_global,
        );
        self.increment_topology_version();
        Ok(())
    }

    /// Adds another weighted parent. Only nulls and controls (or parentless elements) accept one.
    pub fn add_parent(
        &mut self,
        child: &ElementKey,
        parent: &ElementKey,
        weight: ElementWeight,
        maintain_global: bool,
    ) -> Result<(), Error> {
        let child_index = self.transform_element_index(child)?;
        let parent_index = self.resolve_parent_key(child_index, parent)?;
        let element = &self.elements[child_index];
        if element.parent_indices().any(|existing| existing == parent_index) {
            return Ok(());
        }
        if !element.parents.is_empty() && !element.kind().supports_multiple_parents() {
            return Err(Error::SingleParentOnly { key: child.clone() });
        }
        self.reparent(
            child_index,
            |parents| parents.push(ParentConstraint::new(parent_index, weight)),
            maintain_global,
        );
        self.increment_topology_version();
        Ok(())
    }

    /// Returns `Ok(false)` if `parent` was not a parent of `child`.
    pub fn remove_parent(
        &mut self,
        child: &ElementKey,
        parent: &ElementKey,
        maintain_global: bool,
    ) -> Result<bool, Error> {
        let child_index = self.transform_element_index(child)?;
        let Some(parent_index) = self.index_of(parent) else {
            return Ok(false);
        };
        if !self.elements[child_index]
            .parent_indices()
            .any(|existing| existing == parent_index)
        {
            return Ok(false);
        }
        self.reparent(
            child_index,
            |parents| parents.retain(|constraint| constraint.parent != parent_index),
            maintain_global,
        );
        self.increment_topology_version();
        Ok(true)
    }

    /// Applies `edit` to the parent list of `child` and fixes up children back-references.
    ///
    /// With `maintain_global` the child's parented stack keeps its global transform and its
    /// local becomes dirty; otherwise the local is kept and every dependent global is dirtied.
    pub(crate) fn reparent(
        &mut self,
        child: usize,
        edit: impl FnOnce(&mut Vec<ParentConstraint>),
        maintain_global: bool,
    ) {
        let node = self.parented_node(child);
        for initial in [true, false] {
            if maintain_global {
                self.resolve_global(node, initial);
            } else {
                self.prepare_global_invalidation(node, initial);
            }
        }

        let old_parents: Vec<usize> = self.elements[child].parent_indices().collect();
        edit(&mut self.elements[child].parents);
        let new_parents: Vec<usize> = self.elements[child].parent_indices().collect();
        for parent in old_parents.iter().filter(|p| !new_parents.contains(p)) {
            self.elements[*parent].children.retain(|&c| c != child);
        }
        for parent in new_parents.iter().filter(|p| !old_parents.contains(p)) {
            self.elements[*parent].children.push(child);
        }

        for initial in [true, false] {
            if maintain_global {
                self.set_node_dirty(node, TransformType::local(initial), true);
            } else {
                self.invalidate_globals(node, initial);
            }
        }
    }

    pub fn parent_weights(&self, child: usize, initial: bool) -> Vec<(usize, ElementWeight)> {
        self.parents(child)
            .iter()
            .map(|constraint| (constraint.parent, constraint.weight(initial)))
            .collect()
    }

    /// Changes the weight of an existing parent constraint. Returns false if `parent` is
    /// not a parent of `child`. Weight edits do not change topology.
    pub fn set_parent_weight(
        &mut self,
        child: usize,
        parent: usize,
        weight: ElementWeight,
        initial: bool,
        affect_children: bool,
    ) -> bool {
        let Some(position) = self
            .parents(child)
            .iter()
            .position(|constraint| constraint.parent == parent)
        else {
            return false;
        };
        self.edit_weights(child, initial, affect_children, |parents| {
            let constraint = &mut parents[position];
            if initial {
                constraint.initial_weight = weight;
            } else {
                constraint.weight = weight;
            }
        });
        if !initial {
            self.refresh_space_conversion(child);
        }
        true
    }

    /// Gives `parent` full weight and every other parent zero weight, adding `parent` first
    /// if needed. The child keeps its global transform.
    pub fn switch_to_parent(
        &mut self,
        child: &ElementKey,
        parent: &ElementKey,
        initial: bool,
    ) -> Result<(), Error> {
        let child_index = self.transform_element_index(child)?;
        let parent_index = self.resolve_parent_key(child_index, parent)?;
        if !self.elements[child_index]
            .parent_indices()
            .any(|existing| existing == parent_index)
        {
            if self.elements[child_index].kind().supports_multiple_parents() {
                self.add_parent(child, parent, ElementWeight::ZERO, true)?;
            } else {
                self.set_parent(child, Some(parent), true)?;
                return Ok(());
            }
        }

        let node = self.parented_node(child_index);
        self.resolve_global(node, initial);
        let weights = &mut self.elements[child_index].parents;
        for constraint in weights.iter_mut() {
            let weight = if constraint.parent == parent_index {
                ElementWeight::FULL
            } else {
                ElementWeight::ZERO
            };
            if initial {
                constraint.initial_weight = weight;
            } else {
                constraint.weight = weight;
            }
        }
        self.set_node_dirty(node, TransformType::local(initial), true);
        if !initial {
            self.refresh_space_conversion(child_index);
        }
        Ok(())
    }

    fn edit_weights(
        &mut self,
        child: usize,
        initial: bool,
        affect_children: bool,
        edit: impl FnOnce(&mut Vec<ParentConstraint>),
    ) {
        let node = self.parented_node(child);
        let direct = self.child_nodes(node);
        if affect_children {
            self.prepare_global_invalidation(node, initial);
        } else {
            self.resolve_local(node, initial);
            for dependent in &direct {
                self.resolve_global(*dependent, initial);
            }
        }
        edit(&mut self.elements[child].parents);
        if affect_children {
            self.invalidate_globals(node, initial);
        } else {
            self.set_node_dirty(node, TransformType::global(initial), true);
            for dependent in direct {
                self.set_node_dirty(dependent, TransformType::local(initial), true);
            }
        }
    }

    /// Copies every initial local transform into the current slot and resets curves.
    ///
    /// `kinds` restricts the reset; an empty slice resets everything.
    pub fn reset_pose_to_initial(&mut self, kinds: &[ElementKind]) {
        let selected = |kind: ElementKind| kinds.is_empty() || kinds.contains(&kind);
        for index in 0..self.elements.len() {
            let element = &self.elements[index];
            if !selected(element.kind()) {
                continue;
            }
            if element.curve_link().is_some() {
                let default = self.curve_defaults.get(&index).copied().flatten();
                match default {
                    Some(value) => {
                        self.set_curve_value(index, value);
                    }
                    None => {
                        self.unset_curve_value(index);
                    }
                }
                continue;
            }
            let stacks: Vec<TransformStorageType> =
                element.all_slots().map(|(storage, _)| storage).collect();
            for storage in stacks {
                let node = super::transforms::Node {
                    element: index,
                    storage,
                };
                self.resolve_local(node, true);
                self.prepare_global_invalidation(node, false);
                let local = self.node_value(node, TransformType::InitialLocal);
                self.set_node_value(node, TransformType::CurrentLocal, local);
                self.invalidate_globals(node, false);
            }
        }
    }

    pub fn curve_value(&self, index: usize) -> Option<f32> {
        let link = self.elements.get(index)?.curve_link()?;
        match link {
            StorageLink::Pool(slot) => self.curves.get(slot).copied(),
            StorageLink::Pose(slot) => self
                .pose_adapter
                .as_ref()
                .and_then(|adapter| adapter.curves.get(slot).copied()),
        }
    }

    pub fn is_curve_value_set(&self, index: usize) -> bool {
        matches!(
            self.elements.get(index).map(|element| &element.data),
            Some(ElementData::Curve { is_set: true, .. })
        )
    }

    /// Returns false if `index` is not a curve.
    pub fn set_curve_value(&mut self, index: usize, value: f32) -> bool {
        self.write_curve(index, value, true)
    }

    pub fn unset_curve_value(&mut self, index: usize) -> bool {
        self.write_curve(index, 0.0, false)
    }

    pub(crate) fn write_curve(&mut self, index: usize, value: f32, set: bool) -> bool {
        let Some(ElementData::Curve { value: link, is_set }) =
            self.elements.get_mut(index).map(|element| &mut element.data)
        else {
            return false;
        };
        *is_set = set;
        let link = *link;
        match link {
            StorageLink::Pool(slot) => {
                if let Some(stored) = self.curves.get_mut(slot) {
                    *stored = value;
                }
            }
            StorageLink::Pose(slot) => {
                if let Some(stored) = self
                    .pose_adapter
                    .as_mut()
                    .and_then(|adapter| adapter.curves.get_mut(slot))
                {
                    *stored = value;
                }
            }
        }
        true
    }

    /// Storage link of one slot, for inspection.
    pub fn storage_link(
        &self,
        index: usize,
        transform_type: TransformType,
        storage: TransformStorageType,
    ) -> Option<StorageLink> {
        self.elements
            .get(index)?
            .slots(storage)
            .map(|slots| slots.transform(transform_type))
    }

    pub fn curve_storage_link(&self, index: usize) -> Option<StorageLink> {
        self.elements.get(index)?.curve_link()
    }

    /// Number of slots in the pooled transform arena, including freed ones.
    pub fn pooled_transform_count(&self) -> usize {
        self.transforms.len()
    }

    pub fn free_transform_count(&self) -> usize {
        self.transforms.free_len()
    }
}
