//! Relinks the storage of mapped bones into flat pose arrays.
//!
//! While an adapter is linked, the current local and global slots of every mapped bone
//! (and the value of every mapped curve) live in the adapter's arrays instead of the
//! hierarchy's pool. Bulk pose transfer then writes those arrays directly, and the hierarchy
//! sees the values through its ordinary accessors.

use super::hierarchy::RigHierarchy;
use super::pose::{NameRemap, SkeletonDesc, active_remap};
use super::relink::StorageRelink;
use super::storage::StorageLink;
use super::transforms::Node;
use crate::{
    BoneType, ControlAnimationType, ElementKey, ElementWeight, Transform, TransformStorageType,
    TransformType,
};

/// A slot whose global must be treated as stale whenever the pose changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependent {
    pub key: ElementKey,
    pub index: usize,
    pub transform_type: TransformType,
    pub storage: TransformStorageType,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Visit {
    Unvisited,
    Mapped,
    Dependent,
    Independent,
}

/// Flat pose storage plus the mapping between pose indices and hierarchy elements.
#[derive(Clone, Debug)]
pub struct PoseAdapter {
    transfer_in_local_space: bool,
    skeleton: SkeletonDesc,
    remap: Option<NameRemap>,
    /// Hierarchy id and topology version the mapping was built against.
    mapped_for: Option<(u64, u32)>,
    linked: bool,
    pub(crate) local_pose: Vec<Transform>,
    pub(crate) global_pose: Vec<Transform>,
    pub(crate) local_dirty: Vec<bool>,
    pub(crate) global_dirty: Vec<bool>,
    pub(crate) curves: Vec<f32>,
    requires_hierarchy_for_space_conversion: Vec<bool>,
    pose_to_element: Vec<Option<usize>>,
    element_to_pose: Vec<Option<usize>>,
    curve_to_element: Vec<Option<usize>>,
    dependents: Vec<Dependent>,
    relinked_bones: Vec<ElementKey>,
    relinked_curves: Vec<ElementKey>,
}

impl PoseAdapter {
    pub fn new(skeleton: SkeletonDesc, transfer_in_local_space: bool) -> Self {
        let bones = skeleton.bones.len();
        let curves = skeleton.curves.len();
        Self {
            transfer_in_local_space,
            skeleton,
            remap: None,
            mapped_for: None,
            linked: false,
            local_pose: vec![Transform::IDENTITY; bones],
            global_pose: vec![Transform::IDENTITY; bones],
            local_dirty: vec![!transfer_in_local_space; bones],
            global_dirty: vec![transfer_in_local_space; bones],
            curves: vec![0.0; curves],
            requires_hierarchy_for_space_conversion: vec![false; bones],
            pose_to_element: vec![None; bones],
            element_to_pose: Vec::new(),
            curve_to_element: vec![None; curves],
            dependents: Vec::new(),
            relinked_bones: Vec::new(),
            relinked_curves: Vec::new(),
        }
    }

    pub fn skeleton(&self) -> &SkeletonDesc {
        &self.skeleton
    }

    pub fn remap(&self) -> Option<&NameRemap> {
        self.remap.as_ref()
    }

    pub fn transfer_in_local_space(&self) -> bool {
        self.transfer_in_local_space
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn len(&self) -> usize {
        self.skeleton.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skeleton.bones.is_empty()
    }

    /// Maps every pose bone to the hierarchy bone of the same (remapped) name.
    ///
    /// Pose bones without a counterpart stay unmapped. When two pose bones resolve to the same
    /// element, the first one keeps it.
    pub fn build_mapping(&mut self, hierarchy: &RigHierarchy, remap: Option<&NameRemap>) {
        self.remap = active_remap(remap).cloned();
        let resolve = |name: &str| -> String {
            match &self.remap {
                Some(remap) => remap.resolve(name).to_string(),
                None => name.to_string(),
            }
        };

        let mut element_to_pose = vec![None; hierarchy.len()];
        let mut pose_to_element = Vec::with_capacity(self.skeleton.bones.len());
        for (pose_index, bone) in self.skeleton.bones.iter().enumerate() {
            let element = hierarchy
                .index_of(&ElementKey::bone(resolve(&bone.name)))
                .filter(|&element| element_to_pose[element].is_none());
            if let Some(element) = element {
                element_to_pose[element] = Some(pose_index);
            }
            pose_to_element.push(element);
        }

        let requires_hierarchy = (0..self.skeleton.bones.len())
            .map(|pose_index| {
                !flat_parent_matches(hierarchy, &self.skeleton, &pose_to_element, pose_index)
            })
            .collect();

        let mut curve_to_element: Vec<Option<usize>> = Vec::with_capacity(self.skeleton.curves.len());
        for name in &self.skeleton.curves {
            let element = hierarchy
                .index_of(&ElementKey::curve(resolve(name)))
                .filter(|element| !curve_to_element.contains(&Some(*element)));
            curve_to_element.push(element);
        }

        self.pose_to_element = pose_to_element;
        self.element_to_pose = element_to_pose;
        self.requires_hierarchy_for_space_conversion = requires_hierarchy;
        self.curve_to_element = curve_to_element;
        self.mapped_for = Some((hierarchy.id(), hierarchy.topology_version()));
        tracing::debug!(
            hierarchy = hierarchy.id(),
            bones = self.skeleton.bones.len(),
            mapped = self.mapped_bone_count(),
            "built pose adapter mapping"
        );
    }

    /// True when linked to `hierarchy` and built against its current topology.
    pub fn is_update_to_date(&self, hierarchy: &RigHierarchy) -> bool {
        self.linked && self.mapped_for == Some((hierarchy.id(), hierarchy.topology_version()))
    }

    pub fn mapped_bone_count(&self) -> usize {
        self.pose_to_element.iter().flatten().count()
    }

    pub fn pose_to_element(&self, pose_index: usize) -> Option<usize> {
        self.pose_to_element.get(pose_index).copied().flatten()
    }

    pub fn element_to_pose(&self, element: usize) -> Option<usize> {
        self.element_to_pose.get(element).copied().flatten()
    }

    pub fn curve_to_element(&self, curve_index: usize) -> Option<usize> {
        self.curve_to_element.get(curve_index).copied().flatten()
    }

    /// Whether this bone's pose parent disagrees with its hierarchy parent, so space
    /// conversion has to go through the hierarchy.
    pub fn requires_hierarchy_for_space_conversion(&self, pose_index: usize) -> bool {
        self.requires_hierarchy_for_space_conversion
            .get(pose_index)
            .copied()
            .unwrap_or(false)
    }

    pub fn dependents(&self) -> &[Dependent] {
        &self.dependents
    }

    pub(crate) fn transform(&self, local: bool, slot: usize) -> Option<Transform> {
        if local {
            self.local_pose.get(slot).copied()
        } else {
            self.global_pose.get(slot).copied()
        }
    }

    pub(crate) fn transform_mut(&mut self, local: bool, slot: usize) -> Option<&mut Transform> {
        if local {
            self.local_pose.get_mut(slot)
        } else {
            self.global_pose.get_mut(slot)
        }
    }

    pub(crate) fn dirty(&self, local: bool, slot: usize) -> Option<bool> {
        if local {
            self.local_dirty.get(slot).copied()
        } else {
            self.global_dirty.get(slot).copied()
        }
    }

    pub(crate) fn dirty_mut(&mut self, local: bool, slot: usize) -> Option<&mut bool> {
        if local {
            self.local_dirty.get_mut(slot)
        } else {
            self.global_dirty.get_mut(slot)
        }
    }

    /// Marks the transfer space clean and the other space dirty for every pose entry.
    fn reset_dirty_states(&mut self) {
        let local_primary = self.transfer_in_local_space;
        self.local_dirty.iter_mut().for_each(|dirty| *dirty = !local_primary);
        self.global_dirty.iter_mut().for_each(|dirty| *dirty = local_primary);
    }
}

impl RigHierarchy {
    pub fn pose_adapter(&self) -> Option<&PoseAdapter> {
        self.pose_adapter.as_ref()
    }

    /// Whether pose-path transfer may be used. When false, callers use [`crate::PoseMapping`].
    pub fn is_pose_adapter_enabled_and_valid(&self) -> bool {
        self.pose_adapter
            .as_ref()
            .is_some_and(|adapter| adapter.is_update_to_date(self))
    }

    /// Access to the linked pose arrays, or `None` when no valid adapter is linked.
    pub fn linked_pose(&mut self) -> Option<LinkedPose<'_>> {
        self.is_pose_adapter_enabled_and_valid()
            .then_some(LinkedPose { hierarchy: self })
    }

    /// Links `adapter`, replacing any adapter linked before.
    ///
    /// Returns false, leaving nothing linked, when the adapter maps neither bones nor curves.
    pub fn link_pose_adapter(&mut self, mut adapter: PoseAdapter) -> bool {
        self.unlink_pose_adapter();
        if adapter.mapped_for != Some((self.id(), self.topology_version())) {
            let remap = adapter.remap.take();
            adapter.build_mapping(self, remap.as_ref());
        }
        if adapter.mapped_bone_count() == 0 && adapter.curve_to_element.iter().all(Option::is_none) {
            tracing::warn!(hierarchy = self.id(), "pose adapter maps no elements; not linked");
            return false;
        }

        self.sort_transform_storage();
        self.compute_all_transforms();
        adapter.dependents = self.compute_dependents(&adapter.element_to_pose);

        let mut relinks = Vec::new();
        let mut bones = Vec::new();
        for (pose_index, element) in adapter.pose_to_element.iter().enumerate() {
            let Some(element) = element else {
                continue;
            };
            let key = self.elements[*element].key.clone();
            for transform_type in [TransformType::CurrentLocal, TransformType::CurrentGlobal] {
                relinks.push(StorageRelink {
                    key: key.clone(),
                    transform_type,
                    storage: TransformStorageType::Pose,
                    transform: StorageLink::Pose(pose_index),
                    dirty: StorageLink::Pose(pose_index),
                });
            }
            bones.push(key);
        }
        let curves: Vec<(usize, ElementKey)> = adapter
            .curve_to_element
            .iter()
            .enumerate()
            .filter_map(|(curve, element)| Some((curve, self.elements[(*element)?].key.clone())))
            .collect();

        adapter.linked = true;
        self.pose_adapter = Some(adapter);
        let relinked = self.relink_transform_storages(&relinks);
        let mut relinked_curves = Vec::new();
        for (curve, key) in curves {
            if self.relink_curve_storage(&key, StorageLink::Pose(curve)) {
                relinked_curves.push(key);
            }
        }

        let dependent_count = match self.pose_adapter.as_mut() {
            Some(adapter) => {
                adapter.relinked_bones = bones;
                adapter.relinked_curves = relinked_curves;
                adapter.reset_dirty_states();
                adapter.dependents.len()
            }
            None => 0,
        };
        self.shrink_transform_storage();
        tracing::debug!(
            hierarchy = self.id(),
            slots = relinked,
            dependents = dependent_count,
            "linked pose adapter"
        );
        true
    }

    /// Moves relinked storage back into the pool and hands the adapter back.
    pub fn unlink_pose_adapter(&mut self) -> Option<PoseAdapter> {
        let adapter = self.pose_adapter.as_ref()?;
        let slots: Vec<(ElementKey, TransformType, TransformStorageType)> = adapter
            .relinked_bones
            .iter()
            .flat_map(|key| {
                [TransformType::CurrentLocal, TransformType::CurrentGlobal]
                    .map(|transform_type| (key.clone(), transform_type, TransformStorageType::Pose))
            })
            .collect();
        let curves = adapter.relinked_curves.clone();

        let restored = self.restore_transform_storages(&slots);
        for key in &curves {
            self.restore_curve_storage(key);
        }
        let mut adapter = self.pose_adapter.take()?;
        adapter.linked = false;
        adapter.relinked_bones.clear();
        adapter.relinked_curves.clear();
        adapter.dependents.clear();
        self.shrink_transform_storage();
        tracing::debug!(hierarchy = self.id(), slots = restored, "unlinked pose adapter");
        Some(adapter)
    }

    /// Finds every slot downstream of a mapped bone, walking parent links with a worklist.
    ///
    /// Imported bones only count when their direct parent is itself a dependent; animation
    /// channels never count.
    fn compute_dependents(&self, element_to_pose: &[Option<usize>]) -> Vec<Dependent> {
        let count = self.elements.len();
        let mut visits = vec![Visit::Unvisited; count];
        for (element, pose) in element_to_pose.iter().enumerate().take(count) {
            if pose.is_some() {
                visits[element] = Visit::Mapped;
            }
        }

        for start in 0..count {
            let mut stack = vec![start];
            while let Some(&top) = stack.last() {
                if visits[top] != Visit::Unvisited {
                    stack.pop();
                    continue;
                }
                let pending: Vec<usize> = self.elements[top]
                    .parent_indices()
                    .filter(|&parent| visits[parent] == Visit::Unvisited && !stack.contains(&parent))
                    .collect();
                if !pending.is_empty() {
                    stack.extend(pending);
                    continue;
                }
                stack.pop();
                visits[top] = self.classify_dependent(top, &visits);
            }
        }

        let mut dependents = Vec::new();
        for (index, visit) in visits.iter().enumerate() {
            if *visit != Visit::Dependent {
                continue;
            }
            let element = &self.elements[index];
            let storages: &[TransformStorageType] = if element.is_control() {
                &[
                    TransformStorageType::Offset,
                    TransformStorageType::Pose,
                    TransformStorageType::Shape,
                ]
            } else {
                &[TransformStorageType::Pose]
            };
            for &storage in storages {
                dependents.push(Dependent {
                    key: element.key.clone(),
                    index,
                    transform_type: TransformType::CurrentGlobal,
                    storage,
                });
            }
        }
        dependents
    }

    fn classify_dependent(&self, index: usize, visits: &[Visit]) -> Visit {
        let element = &self.elements[index];
        if !element.has_transforms()
            || element.control_animation_type() == Some(ControlAnimationType::AnimationChannel)
        {
            return Visit::Independent;
        }
        let depends = if element.bone_type() == Some(BoneType::Imported) {
            element
                .first_parent()
                .is_some_and(|parent| visits[parent] == Visit::Dependent)
        } else {
            element
                .parent_indices()
                .any(|parent| matches!(visits[parent], Visit::Mapped | Visit::Dependent))
        };
        if depends {
            Visit::Dependent
        } else {
            Visit::Independent
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct PoseEntry {
    parent: Option<usize>,
    element: Option<usize>,
    requires_hierarchy: bool,
    local_dirty: bool,
    global_dirty: bool,
}

/// Whether composing the flat pose parent with the local gives the hierarchy global.
///
/// That holds for a root without parents, or for a single full-weight parent that is the
/// element mapped to the earlier pose parent. Unmapped pose bones always match.
fn flat_parent_matches(
    hierarchy: &RigHierarchy,
    skeleton: &SkeletonDesc,
    pose_to_element: &[Option<usize>],
    pose_index: usize,
) -> bool {
    let (Some(bone), Some(Some(element))) =
        (skeleton.bones.get(pose_index), pose_to_element.get(pose_index))
    else {
        return true;
    };
    match (bone.parent, hierarchy.parents(*element)) {
        (None, []) => true,
        (Some(parent), [constraint]) => {
            parent < pose_index
                && constraint.weight(false) == ElementWeight::FULL
                && pose_to_element.get(parent).copied().flatten() == Some(constraint.parent)
        }
        _ => false,
    }
}

impl RigHierarchy {
    /// Re-derives the space conversion flag of the pose bone mapped to `element` once its
    /// current parent weights changed.
    pub(crate) fn refresh_space_conversion(&mut self, element: usize) {
        let Some(adapter) = self.pose_adapter.as_ref() else {
            return;
        };
        if adapter.mapped_for != Some((self.id(), self.topology_version())) {
            return;
        }
        let Some(pose_index) = adapter.element_to_pose(element) else {
            return;
        };
        let requires =
            !flat_parent_matches(self, &adapter.skeleton, &adapter.pose_to_element, pose_index);
        if let Some(flag) = self
            .pose_adapter
            .as_mut()
            .and_then(|adapter| adapter.requires_hierarchy_for_space_conversion.get_mut(pose_index))
        {
            *flag = requires;
        }
    }
}

/// Mutable view of a hierarchy whose pose adapter is linked and up to date.
///
/// Raw array writes (`set_local`, `local_pose_mut`, ...) do not touch dirty flags; call
/// [`LinkedPose::mark_dependents_dirty`] once the pose for the frame has been written.
pub struct LinkedPose<'a> {
    hierarchy: &'a mut RigHierarchy,
}

impl LinkedPose<'_> {
    fn adapter(&self) -> Option<&PoseAdapter> {
        self.hierarchy.pose_adapter.as_ref()
    }

    fn adapter_mut(&mut self) -> Option<&mut PoseAdapter> {
        self.hierarchy.pose_adapter.as_mut()
    }

    pub fn hierarchy(&mut self) -> &mut RigHierarchy {
        self.hierarchy
    }

    pub fn len(&self) -> usize {
        self.adapter().map(PoseAdapter::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn local(&self, pose_index: usize) -> Option<Transform> {
        self.adapter()?.transform(true, pose_index)
    }

    pub fn global(&self, pose_index: usize) -> Option<Transform> {
        self.adapter()?.transform(false, pose_index)
    }

    pub fn set_local(&mut self, pose_index: usize, value: Transform) -> bool {
        self.write(true, pose_index, value)
    }

    pub fn set_global(&mut self, pose_index: usize, value: Transform) -> bool {
        self.write(false, pose_index, value)
    }

    fn write(&mut self, local: bool, pose_index: usize, value: Transform) -> bool {
        match self
            .adapter_mut()
            .and_then(|adapter| adapter.transform_mut(local, pose_index))
        {
            Some(target) => {
                *target = value.normalized();
                true
            }
            None => false,
        }
    }

    pub fn local_pose(&self) -> &[Transform] {
        self.adapter()
            .map(|adapter| adapter.local_pose.as_slice())
            .unwrap_or(&[])
    }

    pub fn local_pose_mut(&mut self) -> &mut [Transform] {
        self.adapter_mut()
            .map(|adapter| adapter.local_pose.as_mut_slice())
            .unwrap_or_default()
    }

    pub fn global_pose(&self) -> &[Transform] {
        self.adapter()
            .map(|adapter| adapter.global_pose.as_slice())
            .unwrap_or(&[])
    }

    pub fn global_pose_mut(&mut self) -> &mut [Transform] {
        self.adapter_mut()
            .map(|adapter| adapter.global_pose.as_mut_slice())
            .unwrap_or_default()
    }

    pub fn curves(&self) -> &[f32] {
        self.adapter()
            .map(|adapter| adapter.curves.as_slice())
            .unwrap_or(&[])
    }

    /// Raw curve values. Writes here do not mark mapped curves as set.
    pub fn curves_mut(&mut self) -> &mut [f32] {
        self.adapter_mut()
            .map(|adapter| adapter.curves.as_mut_slice())
            .unwrap_or_default()
    }

    /// Value of a mapped curve, or `None` when the curve is unmapped or its element unset.
    pub fn curve_if_set(&self, curve_index: usize) -> Option<f32> {
        let element = self.adapter()?.curve_to_element(curve_index)?;
        if !self.hierarchy.is_curve_value_set(element) {
            return None;
        }
        self.hierarchy.curve_value(element)
    }

    /// Writes one curve value and marks the mapped curve element as set.
    pub fn set_curve(&mut self, curve_index: usize, value: f32) -> bool {
        let Some(adapter) = self.adapter() else {
            return false;
        };
        match adapter.curve_to_element(curve_index) {
            Some(element) => self.hierarchy.write_curve(element, value, true),
            None => match self.adapter_mut().and_then(|adapter| adapter.curves.get_mut(curve_index)) {
                Some(stored) => {
                    *stored = value;
                    true
                }
                None => false,
            },
        }
    }

    fn dependent_nodes(&self) -> Vec<Node> {
        self.adapter()
            .map(|adapter| {
                adapter
                    .dependents
                    .iter()
                    .map(|dependent| Node {
                        element: dependent.index,
                        storage: dependent.storage,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Declares the pose arrays freshly written in the transfer space.
    ///
    /// Dependent locals are resolved first, then every pose entry gets its transfer space
    /// marked clean and the other space dirty, and every dependent global is invalidated.
    pub fn mark_dependents_dirty(&mut self) {
        let dependents = self.dependent_nodes();
        for node in &dependents {
            self.hierarchy.resolve_local(*node, false);
        }
        if let Some(adapter) = self.adapter_mut() {
            adapter.reset_dirty_states();
        }
        for node in dependents {
            self.hierarchy
                .set_node_dirty(node, TransformType::CurrentGlobal, true);
        }
    }

    /// Resolves every dependent local so a later [`LinkedPose::mark_dependents_dirty`] loses
    /// nothing.
    pub fn update_dependents(&mut self) {
        for node in self.dependent_nodes() {
            self.hierarchy.resolve_local(node, false);
        }
    }

    fn entry(&self, pose_index: usize) -> Option<PoseEntry> {
        let adapter = self.adapter()?;
        Some(PoseEntry {
            parent: adapter
                .skeleton
                .bones
                .get(pose_index)?
                .parent
                .filter(|&parent| parent < adapter.len()),
            element: adapter.pose_to_element(pose_index),
            requires_hierarchy: adapter.requires_hierarchy_for_space_conversion(pose_index),
            local_dirty: *adapter.local_dirty.get(pose_index)?,
            global_dirty: *adapter.global_dirty.get(pose_index)?,
        })
    }

    /// Makes every pose global current.
    pub fn convert_to_global_pose(&mut self) {
        for pose_index in 0..self.len() {
            self.resolve_pose_global(pose_index);
        }
    }

    /// Makes every pose local current.
    pub fn convert_to_local_pose(&mut self) {
        for pose_index in 0..self.len() {
            self.resolve_pose_local(pose_index);
        }
    }

    fn resolve_pose_global(&mut self, pose_index: usize) -> Transform {
        let mut stack = vec![pose_index];
        while let Some(&top) = stack.last() {
            let Some(entry) = self.entry(top) else {
                stack.pop();
                continue;
            };
            if !entry.global_dirty {
                stack.pop();
                continue;
            }
            if let (true, Some(element)) = (entry.requires_hierarchy, entry.element) {
                self.hierarchy.resolve_global(Node::pose(element), false);
                stack.pop();
                continue;
            }
            if let Some(parent) = entry.parent {
                let parent_dirty = self.entry(parent).is_some_and(|parent| parent.global_dirty);
                if parent_dirty && !stack.contains(&parent) {
                    stack.push(parent);
                    continue;
                }
            }
            stack.pop();

            debug_assert!(!entry.local_dirty, "pose entry {top} has both spaces dirty");
            let parent = entry
                .parent
                .and_then(|parent| self.global(parent))
                .unwrap_or(Transform::IDENTITY);
            let local = self.local(top).unwrap_or(Transform::IDENTITY);
            if let Some(adapter) = self.adapter_mut() {
                adapter.global_pose[top] = (parent * local).normalized();
                adapter.global_dirty[top] = false;
            }
        }
        self.global(pose_index).unwrap_or(Transform::IDENTITY)
    }

    fn resolve_pose_local(&mut self, pose_index: usize) {
        let Some(entry) = self.entry(pose_index) else {
            return;
        };
        if !entry.local_dirty {
            return;
        }
        if let (true, Some(element)) = (entry.requires_hierarchy, entry.element) {
            self.hierarchy.resolve_local(Node::pose(element), false);
            return;
        }
        debug_assert!(!entry.global_dirty, "pose entry {pose_index} has both spaces dirty");
        let parent = match entry.parent {
            Some(parent) => self.resolve_pose_global(parent),
            None => Transform::IDENTITY,
        };
        let global = self.global(pose_index).unwrap_or(Transform::IDENTITY);
        if let Some(adapter) = self.adapter_mut() {
            adapter.local_pose[pose_index] = global.relative_to(&parent).normalized();
            adapter.local_dirty[pose_index] = false;
        }
    }
}
