use crate::Transform;
use std::collections::HashMap;

/// One bone of an external pose. `parent` indexes the pose's own bone list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoseBoneDesc {
    pub name: String,
    pub parent: Option<usize>,
}

/// Layout of the externally supplied pose: ordered bones plus named curves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SkeletonDesc {
    pub bones: Vec<PoseBoneDesc>,
    pub curves: Vec<String>,
}

impl SkeletonDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a bone parented to an already added bone. Returns its pose index.
    pub fn push_bone(&mut self, name: impl Into<String>, parent: Option<usize>) -> usize {
        self.bones.push(PoseBoneDesc {
            name: name.into(),
            parent,
        });
        self.bones.len() - 1
    }

    pub fn push_curve(&mut self, name: impl Into<String>) -> usize {
        self.curves.push(name.into());
        self.curves.len() - 1
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }
}

/// Maps external bone and curve names onto the names used inside the rig.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameRemap {
    sources: HashMap<String, String>,
}

impl NameRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, external: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(external.into(), source.into());
    }

    pub fn source_name(&self, external: &str) -> Option<&str> {
        self.sources.get(external).map(String::as_str)
    }

    /// Rig-side name of `external`, which is the name itself when it is not remapped.
    pub fn resolve<'a>(&'a self, external: &'a str) -> &'a str {
        self.source_name(external).unwrap_or(external)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NameRemap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut remap = Self::new();
        for (external, source) in iter {
            remap.insert(external, source);
        }
        remap
    }
}

/// Treats an empty remap table like no remap table.
pub(crate) fn active_remap(remap: Option<&NameRemap>) -> Option<&NameRemap> {
    remap.filter(|remap| !remap.is_empty())
}

/// Per-frame pose values in external bone order. Transforms are parent-relative.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseBuffer {
    pub locals: Vec<Transform>,
    pub curves: Vec<f32>,
}

impl PoseBuffer {
    /// A buffer holding identity transforms and zero curves for `skeleton`.
    pub fn for_skeleton(skeleton: &SkeletonDesc) -> Self {
        Self {
            locals: vec![Transform::IDENTITY; skeleton.bones.len()],
            curves: vec![0.0; skeleton.curves.len()],
        }
    }
}

/// Composes flat parent-relative pose transforms into globals using the pose's own parents.
///
/// Parents are usually listed before their children but this is not required.
pub fn local_to_global(skeleton: &SkeletonDesc, locals: &[Transform]) -> Vec<Transform> {
    let count = skeleton.bones.len().min(locals.len());
    let mut globals = vec![Transform::IDENTITY; count];
    let mut resolved = vec![false; count];
    for index in 0..count {
        let mut chain = Vec::new();
        let mut current = Some(index);
        while let Some(bone) = current {
            if bone >= count || resolved[bone] || chain.contains(&bone) {
                break;
            }
            chain.push(bone);
            current = skeleton.bones[bone].parent;
        }
        for &bone in chain.iter().rev() {
            let parent = skeleton.bones[bone]
                .parent
                .filter(|&parent| parent < count && resolved[parent])
                .map(|parent| globals[parent])
                .unwrap_or(Transform::IDENTITY);
            globals[bone] = (parent * locals[bone]).normalized();
            resolved[bone] = true;
        }
    }
    globals
}
