//! Lazy local/global conversion and dirty-flag propagation.
//!
//! Every transform stack keeps a local and a global value per temporal state. Writing one
//! space marks the other dirty; reading a dirty space recomputes it from the clean one and
//! the (lazily resolved) parent transform. The two flags of a pair are never both set.

use super::hierarchy::RigHierarchy;
use super::storage::StorageLink;
use crate::math::normalize_rotation;
use crate::{DirtyState, ElementWeight, Transform, TransformStorageType, TransformType};
use glam::{Quat, Vec3};

/// One transform stack of one element: the unit the dependency graph is built from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Node {
    pub(crate) element: usize,
    pub(crate) storage: TransformStorageType,
}

impl Node {
    pub(crate) fn pose(element: usize) -> Self {
        Self {
            element,
            storage: TransformStorageType::Pose,
        }
    }
}

/// Blends parent globals by weight.
///
/// Translation and scale are weighted averages. Rotation is folded in parent order: the first
/// weighted parent seeds the running average, every later parent is slerped in with
/// `weight / accumulated_weight`.
pub(crate) fn blend_parents(parents: &[(Transform, ElementWeight)]) -> Transform {
    let mut translation = Vec3::ZERO;
    let mut translation_weight = 0.0;
    let mut scale = Vec3::ZERO;
    let mut scale_weight = 0.0;
    let mut rotation: Option<Quat> = None;
    let mut rotation_weight = 0.0;

    for (transform, weight) in parents {
        if weight.is_almost_zero() {
            continue;
        }
        if weight.translation > 0.0 {
            translation += transform.translation * weight.translation;
            translation_weight += weight.translation;
        }
        if weight.scale > 0.0 {
            scale += transform.scale * weight.scale;
            scale_weight += weight.scale;
        }
        if weight.rotation > 0.0 {
            rotation_weight += weight.rotation;
            rotation = Some(match rotation {
                None => transform.rotation,
                Some(accumulated) => normalize_rotation(
                    accumulated.slerp(transform.rotation, weight.rotation / rotation_weight),
                ),
            });
        }
    }

    Transform {
        translation: if translation_weight > 0.0 {
            translation / translation_weight
        } else {
            Vec3::ZERO
        },
        rotation: normalize_rotation(rotation.unwrap_or(Quat::IDENTITY)),
        scale: if scale_weight > 0.0 {
            scale / scale_weight
        } else {
            Vec3::ONE
        },
    }
}

impl RigHierarchy {
    pub(crate) fn node_slots(&self, node: Node) -> Option<&super::element::TransformSlots> {
        self.elements.get(node.element)?.slots(node.storage)
    }

    pub(crate) fn read_transform(&self, link: StorageLink, transform_type: TransformType) -> Transform {
        match link {
            StorageLink::Pool(slot) => self.transforms.get(slot).copied(),
            StorageLink::Pose(slot) => self
                .pose_adapter
                .as_ref()
                .and_then(|adapter| adapter.transform(transform_type.is_local(), slot)),
        }
        .unwrap_or(Transform::IDENTITY)
    }

    pub(crate) fn write_transform(
        &mut self,
        link: StorageLink,
        transform_type: TransformType,
        value: Transform,
    ) {
        let target = match link {
            StorageLink::Pool(slot) => self.transforms.get_mut(slot),
            StorageLink::Pose(slot) => self
                .pose_adapter
                .as_mut()
                .and_then(|adapter| adapter.transform_mut(transform_type.is_local(), slot)),
        };
        if let Some(target) = target {
            *target = value;
        }
    }

    pub(crate) fn read_dirty(&self, link: StorageLink, transform_type: TransformType) -> bool {
        match link {
            StorageLink::Pool(slot) => self.dirty_states.get(slot).copied(),
            StorageLink::Pose(slot) => self
                .pose_adapter
                .as_ref()
                .and_then(|adapter| adapter.dirty(transform_type.is_local(), slot)),
        }
        .unwrap_or(false)
    }

    pub(crate) fn write_dirty(&mut self, link: StorageLink, transform_type: TransformType, dirty: bool) {
        let target = match link {
            StorageLink::Pool(slot) => self.dirty_states.get_mut(slot),
            StorageLink::Pose(slot) => self
                .pose_adapter
                .as_mut()
                .and_then(|adapter| adapter.dirty_mut(transform_type.is_local(), slot)),
        };
        if let Some(target) = target {
            *target = dirty;
        }
    }

    pub(crate) fn node_value(&self, node: Node, transform_type: TransformType) -> Transform {
        match self.node_slots(node) {
            Some(slots) => self.read_transform(slots.transform(transform_type), transform_type),
            None => Transform::IDENTITY,
        }
    }

    pub(crate) fn set_node_value(&mut self, node: Node, transform_type: TransformType, value: Transform) {
        if let Some(link) = self.node_slots(node).map(|slots| slots.transform(transform_type)) {
            self.write_transform(link, transform_type, value);
        }
    }

    pub(crate) fn is_node_dirty(&self, node: Node, transform_type: TransformType) -> bool {
        match self.node_slots(node) {
            Some(slots) => self.read_dirty(slots.dirty(transform_type), transform_type),
            None => false,
        }
    }

    pub(crate) fn set_node_dirty(&mut self, node: Node, transform_type: TransformType, dirty: bool) {
        if let Some(link) = self.node_slots(node).map(|slots| slots.dirty(transform_type)) {
            self.write_dirty(link, transform_type, dirty);
        }
    }

    /// The stack of `element` that is directly attached to its parents.
    pub(crate) fn parented_node(&self, element: usize) -> Node {
        let storage = match self.elements.get(element) {
            Some(element) if element.is_control() => TransformStorageType::Offset,
            _ => TransformStorageType::Pose,
        };
        Node { element, storage }
    }

    /// Nodes whose globals feed into the parent transform of `node`.
    pub(crate) fn parent_nodes(&self, node: Node) -> Vec<Node> {
        let Some(element) = self.elements.get(node.element) else {
            return Vec::new();
        };
        match node.storage {
            TransformStorageType::Pose if element.is_control() => vec![Node {
                element: node.element,
                storage: TransformStorageType::Offset,
            }],
            TransformStorageType::Shape => vec![Node::pose(node.element)],
            TransformStorageType::Pose | TransformStorageType::Offset => {
                element.parent_indices().map(Node::pose).collect()
            }
        }
    }

    /// Nodes whose globals are computed directly from the global of `node`.
    pub(crate) fn child_nodes(&self, node: Node) -> Vec<Node> {
        let Some(element) = self.elements.get(node.element) else {
            return Vec::new();
        };
        let mut nodes = Vec::new();
        match node.storage {
            TransformStorageType::Offset => nodes.push(Node::pose(node.element)),
            TransformStorageType::Shape => {}
            TransformStorageType::Pose => {
                if element.is_control() {
                    nodes.push(Node {
                        element: node.element,
                        storage: TransformStorageType::Shape,
                    });
                }
                for &child in &element.children {
                    if self.elements[child].has_transforms() {
                        nodes.push(self.parented_node(child));
                    }
                }
            }
        }
        nodes
    }

    /// Every node transitively downstream of `node`, parents before children.
    pub(crate) fn collect_dependents(&self, node: Node) -> Vec<Node> {
        let mut visited = std::collections::HashSet::new();
        let mut order = Vec::new();
        let mut queue = std::collections::VecDeque::from(self.child_nodes(node));
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            order.push(next);
            queue.extend(self.child_nodes(next));
        }
        order
    }

    /// Parent transform of `node`; every parent global must already be clean.
    fn parent_transform_of_node(&self, node: Node, initial: bool) -> Transform {
        let global = TransformType::global(initial);
        let element = &self.elements[node.element];
        let attached_to_parents = match node.storage {
            TransformStorageType::Offset => true,
            TransformStorageType::Pose => !element.is_control(),
            TransformStorageType::Shape => false,
        };
        if !attached_to_parents {
            return self
                .parent_nodes(node)
                .first()
                .map(|parent| self.node_value(*parent, global))
                .unwrap_or(Transform::IDENTITY);
        }

        let parents: Vec<(Transform, ElementWeight)> = element
            .parents
            .iter()
            .map(|constraint| {
                (
                    self.node_value(Node::pose(constraint.parent), global),
                    constraint.weight(initial),
                )
            })
            .collect();
        match parents.as_slice() {
            [] => Transform::IDENTITY,
            [(parent, weight)] if *weight == ElementWeight::FULL => *parent,
            _ => blend_parents(&parents),
        }
    }

    /// Recomputes the global of `node` (and any dirty ancestor) from clean locals.
    pub(crate) fn resolve_global(&mut self, node: Node, initial: bool) {
        let global = TransformType::global(initial);
        let local = TransformType::local(initial);
        if !self.is_node_dirty(node, global) {
            return;
        }

        let mut stack = vec![node];
        while let Some(&top) = stack.last() {
            if !self.is_node_dirty(top, global) {
                stack.pop();
                continue;
            }
            let pending: Vec<Node> = self
                .parent_nodes(top)
                .into_iter()
                .filter(|parent| self.is_node_dirty(*parent, global))
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            stack.pop();

            debug_assert!(
                !self.is_node_dirty(top, local),
                "local and global of element {} are both dirty",
                top.element
            );
            let parent = self.parent_transform_of_node(top, initial);
            let value = (parent * self.node_value(top, local)).normalized();
            self.set_node_value(top, global, value);
            self.set_node_dirty(top, global, false);
        }
    }

    /// Recomputes the local of `node` from its clean global and its parents' globals.
    pub(crate) fn resolve_local(&mut self, node: Node, initial: bool) {
        let global = TransformType::global(initial);
        let local = TransformType::local(initial);
        if !self.is_node_dirty(node, local) {
            return;
        }
        debug_assert!(
            !self.is_node_dirty(node, global),
            "local and global of element {} are both dirty",
            node.element
        );
        for parent in self.parent_nodes(node) {
            self.resolve_global(parent, initial);
        }
        let parent = self.parent_transform_of_node(node, initial);
        let value = self.node_value(node, global).relative_to(&parent).normalized();
        self.set_node_value(node, local, value);
        self.set_node_dirty(node, local, false);
    }

    pub(crate) fn resolve_node(&mut self, node: Node, transform_type: TransformType) -> Transform {
        if transform_type.is_local() {
            self.resolve_local(node, transform_type.is_initial());
        } else {
            self.resolve_global(node, transform_type.is_initial());
        }
        self.node_value(node, transform_type)
    }

    /// Makes the local of `node` and of everything downstream clean, so their globals can
    /// be marked dirty without losing information.
    pub(crate) fn prepare_global_invalidation(&mut self, node: Node, initial: bool) {
        self.resolve_local(node, initial);
        for dependent in self.collect_dependents(node) {
            self.resolve_local(dependent, initial);
        }
    }

    /// Marks the global of `node` and of everything downstream dirty. Locals must be clean.
    pub(crate) fn invalidate_globals(&mut self, node: Node, initial: bool) {
        let global = TransformType::global(initial);
        self.set_node_dirty(node, global, true);
        for dependent in self.collect_dependents(node) {
            self.set_node_dirty(dependent, global, true);
        }
    }

    /// Writes one slot and propagates dirty state.
    ///
    /// With `affect_children` every downstream global is invalidated (their locals are
    /// resolved first). Without it the directly attached stacks keep their globals and have
    /// their locals marked dirty instead.
    pub(crate) fn set_node_transform(
        &mut self,
        node: Node,
        value: Transform,
        transform_type: TransformType,
        affect_children: bool,
    ) -> bool {
        if self.node_slots(node).is_none() {
            return false;
        }
        let initial = transform_type.is_initial();
        let value = value.normalized();

        if affect_children {
            let dependents = self.collect_dependents(node);
            for dependent in &dependents {
                self.resolve_local(*dependent, initial);
            }
            self.write_node(node, value, transform_type);
            let global = TransformType::global(initial);
            for dependent in dependents {
                self.set_node_dirty(dependent, global, true);
            }
        } else {
            let direct = self.child_nodes(node);
            for dependent in &direct {
                self.resolve_global(*dependent, initial);
            }
            self.write_node(node, value, transform_type);
            let local = TransformType::local(initial);
            for dependent in direct {
                self.set_node_dirty(dependent, local, true);
            }
        }
        true
    }

    fn write_node(&mut self, node: Node, value: Transform, transform_type: TransformType) {
        self.set_node_value(node, transform_type, value);
        self.set_node_dirty(node, transform_type, false);
        self.set_node_dirty(node, transform_type.flip_space(), true);
    }

    /// Resolves both spaces of every stack so all stored values are current.
    pub(crate) fn compute_all_transforms(&mut self) {
        for element in 0..self.elements.len() {
            let storages: Vec<TransformStorageType> = self.elements[element]
                .all_slots()
                .map(|(storage, _)| storage)
                .collect();
            for storage in storages {
                let node = Node { element, storage };
                for initial in [true, false] {
                    self.resolve_local(node, initial);
                    self.resolve_global(node, initial);
                }
            }
        }
    }

    pub fn transform(&mut self, index: usize, transform_type: TransformType) -> Transform {
        self.storage_transform(index, TransformStorageType::Pose, transform_type)
    }

    pub fn local_transform(&mut self, index: usize, initial: bool) -> Transform {
        self.transform(index, TransformType::local(initial))
    }

    pub fn global_transform(&mut self, index: usize, initial: bool) -> Transform {
        self.transform(index, TransformType::global(initial))
    }

    /// Reads any stack of an element. Unknown elements or missing stacks read as identity.
    pub fn storage_transform(
        &mut self,
        index: usize,
        storage: TransformStorageType,
        transform_type: TransformType,
    ) -> Transform {
        let node = Node {
            element: index,
            storage,
        };
        if self.node_slots(node).is_none() {
            return Transform::IDENTITY;
        }
        self.resolve_node(node, transform_type)
    }

    /// Weighted blend of the element's parents' globals (identity for root elements).
    pub fn parent_transform(&mut self, index: usize, initial: bool) -> Transform {
        if index >= self.elements.len() || !self.elements[index].has_transforms() {
            return Transform::IDENTITY;
        }
        let node = Node {
            element: index,
            storage: TransformStorageType::Offset,
        };
        for parent in self.elements[index].parent_indices().collect::<Vec<_>>() {
            self.resolve_global(Node::pose(parent), initial);
        }
        self.parent_transform_of_node(node, initial)
    }

    /// Returns false for unknown elements.
    pub fn set_transform(
        &mut self,
        index: usize,
        value: Transform,
        transform_type: TransformType,
        affect_children: bool,
    ) -> bool {
        self.set_node_transform(Node::pose(index), value, transform_type, affect_children)
    }

    pub fn set_local_transform(
        &mut self,
        index: usize,
        value: Transform,
        initial: bool,
        affect_children: bool,
    ) -> bool {
        self.set_transform(index, value, TransformType::local(initial), affect_children)
    }

    pub fn set_global_transform(
        &mut self,
        index: usize,
        value: Transform,
        initial: bool,
        affect_children: bool,
    ) -> bool {
        self.set_transform(index, value, TransformType::global(initial), affect_children)
    }

    pub fn control_offset_transform(&mut self, index: usize, transform_type: TransformType) -> Transform {
        self.storage_transform(index, TransformStorageType::Offset, transform_type)
    }

    pub fn set_control_offset_transform(
        &mut self,
        index: usize,
        value: Transform,
        transform_type: TransformType,
        affect_children: bool,
    ) -> bool {
        let node = Node {
            element: index,
            storage: TransformStorageType::Offset,
        };
        self.set_node_transform(node, value, transform_type, affect_children)
    }

    pub fn control_shape_transform(&mut self, index: usize, transform_type: TransformType) -> Transform {
        self.storage_transform(index, TransformStorageType::Shape, transform_type)
    }

    pub fn set_control_shape_transform(
        &mut self,
        index: usize,
        value: Transform,
        transform_type: TransformType,
    ) -> bool {
        let node = Node {
            element: index,
            storage: TransformStorageType::Shape,
        };
        self.set_node_transform(node, value, transform_type, true)
    }

    /// Dirty flags of one local/global pair, or `None` for unknown slots.
    pub fn dirty_state(
        &self,
        index: usize,
        storage: TransformStorageType,
        initial: bool,
    ) -> Option<DirtyState> {
        let node = Node {
            element: index,
            storage,
        };
        self.node_slots(node)?;
        Some(DirtyState {
            local: self.is_node_dirty(node, TransformType::local(initial)),
            global: self.is_node_dirty(node, TransformType::global(initial)),
        })
    }
}
