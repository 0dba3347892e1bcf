use super::hierarchy::RigHierarchy;
use super::pose::{NameRemap, PoseBuffer, SkeletonDesc, active_remap, local_to_global};
use crate::{ElementKey, Transform};
use std::collections::HashMap;

/// Correspondence for one transfer direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferMap {
    /// Rig-side name to external bone index. Resolved per frame.
    ByName(HashMap<String, usize>),
    /// `(element index, external bone index)` pairs sorted by external index.
    ByIndex(Vec<(usize, usize)>),
}

impl TransferMap {
    pub fn len(&self) -> usize {
        match self {
            Self::ByName(map) => map.len(),
            Self::ByIndex(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_index_based(&self) -> bool {
        matches!(self, Self::ByIndex(_))
    }

    /// Resolved `(element, external)` pairs in external order. Names that no longer resolve
    /// are skipped.
    fn pairs(&self, hierarchy: &RigHierarchy) -> Vec<(usize, usize)> {
        match self {
            Self::ByIndex(pairs) => pairs.clone(),
            Self::ByName(map) => {
                let mut pairs: Vec<(usize, usize)> = map
                    .iter()
                    .filter_map(|(name, &external)| {
                        Some((hierarchy.find_transform_by_name(name)?, external))
                    })
                    .collect();
                pairs.sort_unstable_by_key(|&(_, external)| external);
                pairs
            }
        }
    }
}

/// Name- or index-based bone and curve transfer, used when no pose adapter is linked.
///
/// A mapping is built once per topology or bone-set change and never patched in place.
#[derive(Clone, Debug)]
pub struct PoseMapping {
    hierarchy_id: u64,
    topology_version: u32,
    bone_names: Vec<String>,
    curve_names: Vec<String>,
    remapped: bool,
    input: TransferMap,
    output: TransferMap,
    curves: Vec<(usize, usize)>,
}

impl PoseMapping {
    /// Builds the transfer maps for `skeleton`.
    ///
    /// `input_filter` and `output_filter` restrict the participating external bones by name;
    /// the output direction inherits the input map when it has no filter of its own.
    pub fn build(
        hierarchy: &RigHierarchy,
        skeleton: &SkeletonDesc,
        remap: Option<&NameRemap>,
        input_filter: Option<&[String]>,
        output_filter: Option<&[String]>,
    ) -> Self {
        let remap = active_remap(remap);
        let mappable: std::collections::HashSet<&str> = hierarchy.mappable_bone_names().collect();

        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (external, bone) in skeleton.bones.iter().enumerate() {
            let source = match remap {
                Some(remap) => {
                    let source = remap.resolve(&bone.name);
                    if hierarchy.find_transform_by_name(source).is_none() {
                        tracing::trace!(bone = %bone.name, source, "remapped bone not found");
                        continue;
                    }
                    source
                }
                None => {
                    if !mappable.contains(bone.name.as_str()) {
                        tracing::trace!(bone = %bone.name, "bone not present in rig");
                        continue;
                    }
                    bone.name.as_str()
                }
            };
            by_name.entry(source.to_string()).or_insert(external);
        }

        let restrict = |filter: Option<&[String]>, map: &HashMap<String, usize>| match filter {
            Some(names) => map
                .iter()
                .filter(|&(_, &external)| names.contains(&skeleton.bones[external].name))
                .map(|(name, &external)| (name.clone(), external))
                .collect(),
            None => map.clone(),
        };
        let input_names = restrict(input_filter, &by_name);
        let output_names = match output_filter {
            Some(_) => restrict(output_filter, &by_name),
            None => input_names.clone(),
        };

        let (input, output) = if remap.is_none() {
            (
                upgrade_to_indices(hierarchy, input_names),
                upgrade_to_indices(hierarchy, output_names),
            )
        } else {
            (TransferMap::ByName(input_names), TransferMap::ByName(output_names))
        };

        let mut curves = Vec::new();
        for (external, name) in skeleton.curves.iter().enumerate() {
            let source = remap.map(|remap| remap.resolve(name)).unwrap_or(name);
            if let Some(element) = hierarchy.index_of(&ElementKey::curve(source)) {
                if !curves.iter().any(|&(existing, _)| existing == element) {
                    curves.push((element, external));
                }
            }
        }

        tracing::debug!(
            hierarchy = hierarchy.id(),
            input = input.len(),
            output = output.len(),
            input_by_index = input.is_index_based(),
            output_by_index = output.is_index_based(),
            curves = curves.len(),
            "built pose mapping"
        );
        Self {
            hierarchy_id: hierarchy.id(),
            topology_version: hierarchy.topology_version(),
            bone_names: skeleton.bones.iter().map(|bone| bone.name.clone()).collect(),
            curve_names: skeleton.curves.clone(),
            remapped: remap.is_some(),
            input,
            output,
            curves,
        }
    }

    /// False after any topology change of `hierarchy` or when `skeleton` lists other bones.
    pub fn is_update_to_date(&self, hierarchy: &RigHierarchy, skeleton: &SkeletonDesc) -> bool {
        self.hierarchy_id == hierarchy.id()
            && self.topology_version == hierarchy.topology_version()
            && self.curve_names == skeleton.curves
            && self
                .bone_names
                .iter()
                .eq(skeleton.bones.iter().map(|bone| &bone.name))
    }

    pub fn input(&self) -> &TransferMap {
        &self.input
    }

    pub fn output(&self) -> &TransferMap {
        &self.output
    }

    pub fn is_remapped(&self) -> bool {
        self.remapped
    }

    /// `(curve element, external curve index)` pairs.
    pub fn curves(&self) -> &[(usize, usize)] {
        &self.curves
    }

    /// Writes the source pose into the mapped elements' current transforms.
    ///
    /// In global mode the pose is first composed with its own parent indices.
    pub fn transfer_input(
        &self,
        hierarchy: &mut RigHierarchy,
        skeleton: &SkeletonDesc,
        input: &PoseBuffer,
        in_local_space: bool,
    ) {
        let globals;
        let source: &[Transform] = if in_local_space {
            &input.locals
        } else {
            globals = local_to_global(skeleton, &input.locals);
            &globals
        };
        for (element, external) in self.input.pairs(hierarchy) {
            let Some(value) = source.get(external) else {
                continue;
            };
            if in_local_space {
                hierarchy.set_local_transform(element, *value, false, true);
            } else {
                hierarchy.set_global_transform(element, *value, false, true);
            }
        }
    }

    /// Reads mapped elements' current local transforms into `output`. Unmapped bones are
    /// left as they are.
    pub fn transfer_output(&self, hierarchy: &mut RigHierarchy, output: &mut PoseBuffer) {
        for (element, external) in self.output.pairs(hierarchy) {
            if let Some(target) = output.locals.get_mut(external) {
                *target = hierarchy.local_transform(element, false);
            }
        }
    }

    pub fn transfer_input_curves(&self, hierarchy: &mut RigHierarchy, input: &PoseBuffer) {
        for &(element, external) in &self.curves {
            if let Some(value) = input.curves.get(external) {
                hierarchy.set_curve_value(element, *value);
            }
        }
    }

    /// Copies set curve values into `output`; unset curves keep the output's value.
    pub fn transfer_output_curves(&self, hierarchy: &RigHierarchy, output: &mut PoseBuffer) {
        for &(element, external) in &self.curves {
            if !hierarchy.is_curve_value_set(element) {
                continue;
            }
            if let (Some(target), Some(value)) =
                (output.curves.get_mut(external), hierarchy.curve_value(element))
            {
                *target = value;
            }
        }
    }
}

/// Swaps a name map for index pairs when every name resolves to a bone element. A single
/// miss keeps the whole direction name based.
fn upgrade_to_indices(hierarchy: &RigHierarchy, names: HashMap<String, usize>) -> TransferMap {
    let mut pairs = Vec::with_capacity(names.len());
    for (name, &external) in &names {
        match hierarchy.index_of(&ElementKey::bone(name.as_str())) {
            Some(element) => pairs.push((element, external)),
            None => return TransferMap::ByName(names),
        }
    }
    pairs.sort_unstable_by_key(|&(_, external)| external);
    TransferMap::ByIndex(pairs)
}
