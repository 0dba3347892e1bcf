use super::hierarchy::RigHierarchy;
use super::mapping::PoseMapping;
use super::pose::{NameRemap, PoseBuffer, SkeletonDesc, local_to_global};
use super::pose_adapter::PoseAdapter;
use crate::RigConfig;
use parking_lot::Mutex;

/// The external step that computes new transform values.
///
/// A solver reads and writes elements through the ordinary hierarchy accessors and never
/// observes whether storage is pool- or pose-backed.
pub trait Solver {
    fn execute(&mut self, hierarchy: &mut RigHierarchy);
}

impl<F: FnMut(&mut RigHierarchy)> Solver for F {
    fn execute(&mut self, hierarchy: &mut RigHierarchy) {
        self(hierarchy)
    }
}

struct RigInstance {
    hierarchy: RigHierarchy,
    config: RigConfig,
    skeleton: Option<SkeletonDesc>,
    remap: Option<NameRemap>,
    mapping: Option<PoseMapping>,
    /// Hierarchy id and topology version of the last link attempt that mapped nothing.
    failed_link: Option<(u64, u32)>,
}

impl RigInstance {
    /// Brings the pose adapter or the fallback mapping up to date with the hierarchy.
    fn rebuild_if_stale(&mut self) {
        let Some(skeleton) = self.skeleton.as_ref() else {
            return;
        };
        if self.config.uses_pose_adapter() {
            let current = self.hierarchy.pose_adapter().is_some_and(|adapter| {
                adapter.is_update_to_date(&self.hierarchy) && adapter.skeleton() == skeleton
            });
            if current {
                return;
            }
            let attempt = (self.hierarchy.id(), self.hierarchy.topology_version());
            if self.failed_link != Some(attempt) {
                let stale = self.hierarchy.unlink_pose_adapter();
                let mut adapter = match stale {
                    Some(adapter) if adapter.skeleton() == skeleton => adapter,
                    _ => PoseAdapter::new(skeleton.clone(), self.config.transfer_in_local_space),
                };
                adapter.build_mapping(&self.hierarchy, self.remap.as_ref());
                if self.hierarchy.link_pose_adapter(adapter) {
                    self.failed_link = None;
                    self.mapping = None;
                    return;
                }
                self.failed_link = Some(attempt);
                tracing::warn!(
                    hierarchy = self.hierarchy.id(),
                    "pose adapter could not be linked; using pose mapping"
                );
            }
        }

        let current = self
            .mapping
            .as_ref()
            .is_some_and(|mapping| mapping.is_update_to_date(&self.hierarchy, skeleton));
        if !current {
            self.mapping = Some(PoseMapping::build(
                &self.hierarchy,
                skeleton,
                self.remap.as_ref(),
                self.config.input_filter(),
                self.config.output_filter(),
            ));
        }
    }

    fn transfer_input(&mut self, input: &PoseBuffer) {
        let config = &self.config;
        let Some(skeleton) = self.skeleton.as_ref() else {
            return;
        };
        if let Some(mut pose) = self.hierarchy.linked_pose() {
            if config.transfer_input_pose {
                if config.transfer_in_local_space {
                    copy_into(pose.local_pose_mut(), &input.locals);
                } else {
                    copy_into(pose.global_pose_mut(), &local_to_global(skeleton, &input.locals));
                }
                pose.mark_dependents_dirty();
            }
            if config.transfer_input_curves {
                for (curve, value) in input.curves.iter().enumerate() {
                    pose.set_curve(curve, *value);
                }
            }
            return;
        }

        let Some(mapping) = self.mapping.as_ref() else {
            return;
        };
        if config.transfer_input_pose {
            mapping.transfer_input(
                &mut self.hierarchy,
                skeleton,
                input,
                config.transfer_in_local_space,
            );
        }
        if config.transfer_input_curves {
            mapping.transfer_input_curves(&mut self.hierarchy, input);
        }
    }

    fn transfer_output(&mut self, output: &mut PoseBuffer) {
        let transfer_curves = self.config.transfer_output_curves;
        if let Some(mut pose) = self.hierarchy.linked_pose() {
            pose.convert_to_local_pose();
            copy_into(&mut output.locals, pose.local_pose());
            if transfer_curves {
                for (curve, value) in output.curves.iter_mut().enumerate() {
                    if let Some(set) = pose.curve_if_set(curve) {
                        *value = set;
                    }
                }
            }
            pose.update_dependents();
            return;
        }

        let Some(mapping) = self.mapping.as_ref() else {
            return;
        };
        mapping.transfer_output(&mut self.hierarchy, output);
        if transfer_curves {
            mapping.transfer_output_curves(&self.hierarchy, output);
        }
    }
}

fn copy_into<T: Copy>(target: &mut [T], source: &[T]) {
    let count = target.len().min(source.len());
    target[..count].copy_from_slice(&source[..count]);
}

/// Owns a rig hierarchy and drives it from an external pose.
///
/// Every operation takes one lock for its whole duration, so topology edits, storage
/// relinking and per-frame transfer never interleave.
pub struct RigEvaluator {
    instance: Mutex<RigInstance>,
}

impl RigEvaluator {
    pub fn new(hierarchy: RigHierarchy, config: RigConfig) -> Self {
        Self {
            instance: Mutex::new(RigInstance {
                hierarchy,
                config,
                skeleton: None,
                remap: None,
                mapping: None,
                failed_link: None,
            }),
        }
    }

    pub fn config(&self) -> RigConfig {
        self.instance.lock().config.clone()
    }

    /// Runs `f` with exclusive access to the hierarchy. Topology edits made here are picked
    /// up by the next [`RigEvaluator::evaluate`].
    pub fn with_hierarchy<R>(&self, f: impl FnOnce(&mut RigHierarchy) -> R) -> R {
        f(&mut self.instance.lock().hierarchy)
    }

    /// Records the external bone layout and rebuilds the pose adapter or mapping for it.
    pub fn cache_bones(&self, skeleton: &SkeletonDesc, remap: Option<&NameRemap>) {
        let mut instance = self.instance.lock();
        let changed = instance.skeleton.as_ref() != Some(skeleton) || instance.remap.as_ref() != remap;
        if changed {
            tracing::debug!(
                hierarchy = instance.hierarchy.id(),
                bones = skeleton.bones.len(),
                curves = skeleton.curves.len(),
                "caching bones"
            );
            instance.skeleton = Some(skeleton.clone());
            instance.remap = remap.cloned();
            instance.mapping = None;
            instance.failed_link = None;
            instance.hierarchy.unlink_pose_adapter();
        }
        instance.rebuild_if_stale();
    }

    /// Transfers `input` into the rig, runs `solver`, and writes the result into `output`.
    ///
    /// `output` is resized to the cached skeleton. Without a cached skeleton only the solver
    /// runs.
    pub fn evaluate(&self, input: &PoseBuffer, solver: &mut impl Solver, output: &mut PoseBuffer) {
        let mut instance = self.instance.lock();
        instance.rebuild_if_stale();
        if let Some(skeleton) = instance.skeleton.as_ref() {
            output.locals.resize(skeleton.bones.len(), crate::Transform::IDENTITY);
            output.curves.resize(skeleton.curves.len(), 0.0);
            copy_into(&mut output.locals, &input.locals);
            copy_into(&mut output.curves, &input.curves);
        }

        instance.transfer_input(input);
        solver.execute(&mut instance.hierarchy);
        instance.transfer_output(output);
    }

    #[cfg(test)]
    pub(crate) fn failed_link(&self) -> Option<(u64, u32)> {
        self.instance.lock().failed_link
    }

    /// Whether the last rebuild linked a pose adapter that is still valid.
    pub fn is_using_pose_adapter(&self) -> bool {
        self.instance.lock().hierarchy.is_pose_adapter_enabled_and_valid()
    }
}
