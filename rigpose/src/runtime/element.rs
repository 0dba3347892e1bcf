use super::storage::StorageLink;
use crate::{
    BoneType, ControlAnimationType, ElementKey, ElementKind, ElementWeight, TransformStorageType,
    TransformType,
};

/// Storage links of one transform stack: a value and a dirty flag per [`TransformType`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct TransformSlots {
    pub(crate) transforms: [StorageLink; 4],
    pub(crate) dirty: [StorageLink; 4],
}

impl TransformSlots {
    pub(crate) fn transform(&self, transform_type: TransformType) -> StorageLink {
        self.transforms[transform_type.index()]
    }

    pub(crate) fn dirty(&self, transform_type: TransformType) -> StorageLink {
        self.dirty[transform_type.index()]
    }
}

/// A weighted link from a child to one of its parents.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParentConstraint {
    pub parent: usize,
    pub weight: ElementWeight,
    pub initial_weight: ElementWeight,
}

impl ParentConstraint {
    pub fn new(parent: usize, weight: ElementWeight) -> Self {
        Self {
            parent,
            weight,
            initial_weight: weight,
        }
    }

    pub fn weight(&self, initial: bool) -> ElementWeight {
        if initial {
            self.initial_weight
        } else {
            self.weight
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ElementData {
    Bone {
        bone_type: BoneType,
    },
    Null,
    Control {
        animation_type: ControlAnimationType,
        offset: TransformSlots,
        shape: TransformSlots,
    },
    Curve {
        value: StorageLink,
        is_set: bool,
    },
    Reference,
    Connector,
    Socket,
}

/// A node of the rig hierarchy.
///
/// `index` is a slot in the hierarchy's element array. Relationships are stored as
/// indices, never as references.
#[derive(Clone, Debug)]
pub struct Element {
    pub(crate) index: usize,
    pub(crate) key: ElementKey,
    pub(crate) parents: Vec<ParentConstraint>,
    pub(crate) children: Vec<usize>,
    pub(crate) pose: Option<TransformSlots>,
    pub(crate) data: ElementData,
}

impl Element {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    pub fn kind(&self) -> ElementKind {
        self.key.kind
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn parents(&self) -> &[ParentConstraint] {
        &self.parents
    }

    pub fn parent_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.parents.iter().map(|constraint| constraint.parent)
    }

    /// The first parent, which is the only one for single-parent kinds.
    pub fn first_parent(&self) -> Option<usize> {
        self.parents.first().map(|constraint| constraint.parent)
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub fn has_transforms(&self) -> bool {
        self.pose.is_some()
    }

    pub fn bone_type(&self) -> Option<BoneType> {
        match self.data {
            ElementData::Bone { bone_type } => Some(bone_type),
            _ => None,
        }
    }

    pub fn control_animation_type(&self) -> Option<ControlAnimationType> {
        match self.data {
            ElementData::Control { animation_type, .. } => Some(animation_type),
            _ => None,
        }
    }

    pub(crate) fn is_control(&self) -> bool {
        matches!(self.data, ElementData::Control { .. })
    }

    pub(crate) fn slots(&self, storage: TransformStorageType) -> Option<&TransformSlots> {
        match (storage, &self.data) {
            (TransformStorageType::Pose, _) => self.pose.as_ref(),
            (TransformStorageType::Offset, ElementData::Control { offset, .. }) => Some(offset),
            (TransformStorageType::Shape, ElementData::Control { shape, .. }) => Some(shape),
            _ => None,
        }
    }

    pub(crate) fn slots_mut(&mut self, storage: TransformStorageType) -> Option<&mut TransformSlots> {
        match (storage, &mut self.data) {
            (TransformStorageType::Pose, _) => self.pose.as_mut(),
            (TransformStorageType::Offset, ElementData::Control { offset, .. }) => Some(offset),
            (TransformStorageType::Shape, ElementData::Control { shape, .. }) => Some(shape),
            _ => None,
        }
    }

    pub(crate) fn curve_link(&self) -> Option<StorageLink> {
        match self.data {
            ElementData::Curve { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Every transform stack of this element with its storage type.
    pub(crate) fn all_slots(&self) -> impl Iterator<Item = (TransformStorageType, &TransformSlots)> {
        [
            TransformStorageType::Pose,
            TransformStorageType::Offset,
            TransformStorageType::Shape,
        ]
        .into_iter()
        .filter_map(|storage| self.slots(storage).map(|slots| (storage, slots)))
    }
}
