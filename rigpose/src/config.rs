/// Settings for a [`crate::RigEvaluator`].
///
/// Passed explicitly at construction; there is no process-wide toggle.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Deserialize))]
#[cfg_attr(feature = "json", serde(default, rename_all = "camelCase"))]
pub struct RigConfig {
    /// Relink mapped bone storage into the pose instead of copying through the mapping.
    pub enable_pose_adapter: bool,
    /// Transfer bone transforms in local space. When false, global space is primary.
    pub transfer_in_local_space: bool,
    pub transfer_input_pose: bool,
    pub transfer_input_curves: bool,
    pub transfer_output_curves: bool,
    /// Bones that receive input. Empty means every mapped bone.
    pub input_bones: Vec<String>,
    /// Bones written back to the output pose. Empty means the input set.
    pub output_bones: Vec<String>,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            enable_pose_adapter: true,
            transfer_in_local_space: true,
            transfer_input_pose: true,
            transfer_input_curves: true,
            transfer_output_curves: true,
            input_bones: Vec::new(),
            output_bones: Vec::new(),
        }
    }
}

impl RigConfig {
    pub(crate) fn input_filter(&self) -> Option<&[String]> {
        (!self.input_bones.is_empty()).then_some(self.input_bones.as_slice())
    }

    pub(crate) fn output_filter(&self) -> Option<&[String]> {
        (!self.output_bones.is_empty()).then_some(self.output_bones.as_slice())
    }

    /// Inclusion lists force the mapping path: the pose adapter transfers every mapped bone.
    pub(crate) fn uses_pose_adapter(&self) -> bool {
        self.enable_pose_adapter && self.input_bones.is_empty() && self.output_bones.is_empty()
    }
}
