use crate::{BoneType, ElementKey, RigHierarchy, Transform, TransformStorageType};
use glam::Vec3;

pub(crate) fn assert_approx(actual: f32, expected: f32) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= 1.0e-4,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

pub(crate) fn assert_vec3(actual: Vec3, expected: Vec3) {
    let diff = (actual - expected).abs().max_element();
    assert!(
        diff <= 1.0e-4,
        "expected {expected:?}, got {actual:?} (diff {diff})"
    );
}

pub(crate) fn assert_transform(actual: Transform, expected: Transform) {
    assert!(
        actual.approx_eq(&expected, 1.0e-4),
        "expected {expected:?}, got {actual:?}"
    );
}

/// Adds an imported bone with a translation-only initial local transform.
pub(crate) fn add_bone(
    hierarchy: &mut RigHierarchy,
    name: &str,
    parent: Option<&str>,
    translation: [f32; 3],
) -> usize {
    let parent = parent.map(ElementKey::bone);
    hierarchy
        .add_bone(
            name,
            parent.as_ref(),
            Transform::from_translation(Vec3::from_array(translation)),
            BoneType::Imported,
        )
        .unwrap()
}

/// Checks that no local/global pair of any stack has both flags set.
pub(crate) fn assert_dirty_invariant(hierarchy: &RigHierarchy) {
    for element in hierarchy.elements() {
        for storage in [
            TransformStorageType::Pose,
            TransformStorageType::Offset,
            TransformStorageType::Shape,
        ] {
            for initial in [true, false] {
                let Some(state) = hierarchy.dirty_state(element.index(), storage, initial) else {
                    continue;
                };
                assert!(
                    !(state.local && state.global),
                    "{} {storage:?} (initial: {initial}) has both spaces dirty",
                    element.key()
                );
            }
        }
    }
}
