use super::test_support::{add_bone, assert_dirty_invariant, assert_transform, assert_vec3};
use super::transforms::blend_parents;
use crate::{
    ControlSettings, DirtyState, ElementKey, ElementWeight, RigHierarchy, Transform,
    TransformStorageType, TransformType,
};
use glam::{Quat, Vec3};
use std::f32::consts::{FRAC_PI_2, PI};

#[test]
fn moving_the_parent_moves_the_child_global() {
    let mut hierarchy = RigHierarchy::new();
    let root = add_bone(&mut hierarchy, "root", None, [0.0; 3]);
    let child = add_bone(&mut hierarchy, "child", Some("root"), [1.0, 0.0, 0.0]);
    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(1.0, 0.0, 0.0));

    assert!(hierarchy.set_local_transform(root, Transform::from_xyz(5.0, 0.0, 0.0), false, true));

    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(6.0, 0.0, 0.0));
    assert_vec3(hierarchy.local_transform(child, false).translation, Vec3::new(1.0, 0.0, 0.0));
    // The initial state is untouched.
    assert_vec3(hierarchy.global_transform(child, true).translation, Vec3::new(1.0, 0.0, 0.0));
    assert_dirty_invariant(&hierarchy);
}

#[test]
fn maintain_global_write_compensates_child_locals() {
    let mut hierarchy = RigHierarchy::new();
    let root = add_bone(&mut hierarchy, "root", None, [5.0, 0.0, 0.0]);
    let child = add_bone(&mut hierarchy, "child", Some("root"), [1.0, 0.0, 0.0]);
    let leaf = add_bone(&mut hierarchy, "leaf", Some("child"), [0.0, 1.0, 0.0]);
    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(6.0, 0.0, 0.0));

    hierarchy.set_local_transform(root, Transform::from_xyz(10.0, 0.0, 0.0), false, false);

    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(6.0, 0.0, 0.0));
    assert_vec3(hierarchy.local_transform(child, false).translation, Vec3::new(-4.0, 0.0, 0.0));
    assert_vec3(hierarchy.global_transform(leaf, false).translation, Vec3::new(6.0, 1.0, 0.0));
    assert_vec3(hierarchy.local_transform(leaf, false).translation, Vec3::new(0.0, 1.0, 0.0));
    assert_dirty_invariant(&hierarchy);
}

#[test]
fn global_write_round_trips_through_rotated_scaled_parent() {
    let mut hierarchy = RigHierarchy::new();
    let root = hierarchy
        .add_bone(
            "root",
            None,
            Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_z(FRAC_PI_2), Vec3::splat(2.0)),
            Default::default(),
        )
        .unwrap();
    let child = add_bone(&mut hierarchy, "child", Some("root"), [1.0, 0.0, 0.0]);
    let target = Transform::new(
        Vec3::new(4.0, 5.0, 6.0),
        Quat::from_rotation_x(0.3),
        Vec3::splat(2.0),
    );

    hierarchy.set_global_transform(child, target, false, true);

    let local = hierarchy.local_transform(child, false);
    let parent = hierarchy.global_transform(root, false);
    assert_transform(parent * local, target);
    assert_vec3(local.scale, Vec3::ONE);
    assert!(local.is_rotation_normalized());
    assert_transform(hierarchy.global_transform(child, false), target);
}

#[test]
fn writes_leave_exactly_the_opposite_space_dirty() {
    let mut hierarchy = RigHierarchy::new();
    let root = add_bone(&mut hierarchy, "root", None, [0.0; 3]);
    let child = add_bone(&mut hierarchy, "child", Some("root"), [1.0, 0.0, 0.0]);

    hierarchy.set_local_transform(root, Transform::from_xyz(2.0, 0.0, 0.0), false, true);
    assert_eq!(
        hierarchy.dirty_state(root, TransformStorageType::Pose, false),
        Some(DirtyState { local: false, global: true })
    );
    assert_eq!(
        hierarchy.dirty_state(child, TransformStorageType::Pose, false),
        Some(DirtyState { local: false, global: true })
    );

    hierarchy.set_global_transform(child, Transform::from_xyz(0.0, 4.0, 0.0), false, true);
    assert_eq!(
        hierarchy.dirty_state(child, TransformStorageType::Pose, false),
        Some(DirtyState { local: true, global: false })
    );
    assert_vec3(hierarchy.local_transform(child, false).translation, Vec3::new(-2.0, 4.0, 0.0));
    assert_eq!(hierarchy.dirty_state(child, TransformStorageType::Offset, false), None);
    assert_eq!(hierarchy.dirty_state(42, TransformStorageType::Pose, false), None);
    assert_dirty_invariant(&hierarchy);
}

#[test]
fn control_offset_and_shape_stacks_compose() {
    let mut hierarchy = RigHierarchy::new();
    add_bone(&mut hierarchy, "root", None, [10.0, 0.0, 0.0]);
    let control = hierarchy
        .add_control(
            "ctrl",
            Some(&ElementKey::bone("root")),
            ControlSettings {
                offset: Transform::from_xyz(1.0, 0.0, 0.0),
                shape: Transform::from_xyz(0.0, 1.0, 0.0),
                ..Default::default()
            },
            Transform::from_xyz(0.0, 0.0, 1.0),
        )
        .unwrap();
    let child = hierarchy
        .add_null("follow", Some(&ElementKey::control("ctrl")), Transform::IDENTITY)
        .unwrap();

    assert_vec3(
        hierarchy.control_offset_transform(control, TransformType::CurrentGlobal).translation,
        Vec3::new(11.0, 0.0, 0.0),
    );
    assert_vec3(hierarchy.global_transform(control, false).translation, Vec3::new(11.0, 0.0, 1.0));
    assert_vec3(
        hierarchy.control_shape_transform(control, TransformType::CurrentGlobal).translation,
        Vec3::new(11.0, 1.0, 1.0),
    );
    assert_vec3(hierarchy.parent_transform(control, false).translation, Vec3::new(10.0, 0.0, 0.0));

    assert!(hierarchy.set_control_offset_transform(
        control,
        Transform::from_xyz(2.0, 0.0, 0.0),
        TransformType::CurrentLocal,
        true,
    ));
    assert_vec3(hierarchy.global_transform(control, false).translation, Vec3::new(12.0, 0.0, 1.0));
    assert_vec3(
        hierarchy.control_shape_transform(control, TransformType::CurrentGlobal).translation,
        Vec3::new(12.0, 1.0, 1.0),
    );
    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(12.0, 0.0, 1.0));

    assert!(hierarchy.set_control_shape_transform(
        control,
        Transform::from_xyz(0.0, 0.0, 5.0),
        TransformType::CurrentGlobal,
    ));
    assert_vec3(
        hierarchy.control_shape_transform(control, TransformType::CurrentLocal).translation,
        Vec3::new(-12.0, 0.0, 4.0),
    );
    // Bones carry no offset stack.
    assert!(!hierarchy.set_control_offset_transform(
        0,
        Transform::IDENTITY,
        TransformType::CurrentLocal,
        true,
    ));
    assert_dirty_invariant(&hierarchy);
}

#[test]
fn multi_parent_translation_and_scale_are_weighted_averages() {
    let mut hierarchy = RigHierarchy::new();
    add_bone(&mut hierarchy, "a", None, [0.0; 3]);
    hierarchy
        .add_bone(
            "b",
            None,
            Transform::from_xyz(10.0, 0.0, 0.0).with_scale(Vec3::splat(3.0)),
            Default::default(),
        )
        .unwrap();
    let space = hierarchy
        .add_null("space", Some(&ElementKey::bone("a")), Transform::IDENTITY)
        .unwrap();
    hierarchy
        .add_parent(
            &ElementKey::null("space"),
            &ElementKey::bone("b"),
            ElementWeight::uniform(3.0),
            false,
        )
        .unwrap();

    let global = hierarchy.global_transform(space, false);
    assert_vec3(global.translation, Vec3::new(7.5, 0.0, 0.0));
    assert_vec3(global.scale, Vec3::splat(2.5));
    assert_transform(hierarchy.parent_transform(space, false), global);
}

#[test]
fn three_parent_rotation_blend_folds_in_parent_order() {
    let degrees = |angle: f32| angle.to_radians();
    let parents = [
        (Transform::from_rotation(Quat::from_rotation_z(0.0)), ElementWeight::FULL),
        (Transform::from_rotation(Quat::from_rotation_z(degrees(60.0))), ElementWeight::FULL),
        (Transform::from_rotation(Quat::from_rotation_z(degrees(120.0))), ElementWeight::uniform(2.0)),
    ];

    // 0 and 60 average to 30 with t = 1 / 2; 120 is then folded in with t = 2 / 4.
    let first_two = blend_parents(&parents[..2]);
    assert_transform(first_two, Transform::from_rotation(Quat::from_rotation_z(degrees(30.0))));
    let blended = blend_parents(&parents);
    assert_transform(blended, Transform::from_rotation(Quat::from_rotation_z(degrees(75.0))));
    assert!(blended.is_rotation_normalized());

    // A zero rotation weight skips the parent entirely.
    let mut skipped = parents;
    skipped[0].1 = ElementWeight::ZERO;
    assert_transform(
        blend_parents(&skipped),
        Transform::from_rotation(Quat::from_rotation_z(degrees(100.0))),
    );
}

#[test]
fn zero_weights_blend_to_identity() {
    let parents = [(Transform::from_xyz(5.0, 0.0, 0.0), ElementWeight::ZERO)];
    assert_transform(blend_parents(&parents), Transform::IDENTITY);
    assert_transform(blend_parents(&[]), Transform::IDENTITY);

    let negligible = [
        (Transform::from_xyz(1.0e5, 0.0, 0.0), ElementWeight::uniform(1.0e-5)),
        (Transform::from_xyz(1.0, 0.0, 0.0), ElementWeight::FULL),
    ];
    assert_vec3(blend_parents(&negligible).translation, Vec3::new(1.0, 0.0, 0.0));

    let mut hierarchy = RigHierarchy::new();
    let a = add_bone(&mut hierarchy, "a", None, [5.0, 0.0, 0.0]);
    let space = hierarchy
        .add_null(
            "space",
            Some(&ElementKey::bone("a")),
            Transform::from_xyz(1.0, 0.0, 0.0),
        )
        .unwrap();
    assert!(hierarchy.set_parent_weight(space, a, ElementWeight::ZERO, false, true));
    assert_vec3(hierarchy.global_transform(space, false).translation, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(hierarchy.parent_weights(space, false), vec![(a, ElementWeight::ZERO)]);
    assert_eq!(hierarchy.parent_weights(space, true), vec![(a, ElementWeight::FULL)]);
    assert!(!hierarchy.set_parent_weight(space, space, ElementWeight::ZERO, false, true));
}

#[test]
fn weight_change_without_affecting_children_keeps_child_globals() {
    let mut hierarchy = RigHierarchy::new();
    let a = add_bone(&mut hierarchy, "a", None, [4.0, 0.0, 0.0]);
    let space = hierarchy
        .add_null("space", Some(&ElementKey::bone("a")), Transform::IDENTITY)
        .unwrap();
    let child = hierarchy
        .add_null("child", Some(&ElementKey::null("space")), Transform::from_xyz(0.0, 1.0, 0.0))
        .unwrap();
    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(4.0, 1.0, 0.0));

    hierarchy.set_parent_weight(space, a, ElementWeight::ZERO, false, false);

    assert_vec3(hierarchy.global_transform(space, false).translation, Vec3::ZERO);
    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(4.0, 1.0, 0.0));
    assert_vec3(hierarchy.local_transform(child, false).translation, Vec3::new(4.0, 1.0, 0.0));
    assert_dirty_invariant(&hierarchy);
}

#[test]
fn switch_to_parent_keeps_the_global_transform() {
    let mut hierarchy = RigHierarchy::new();
    add_bone(&mut hierarchy, "a", None, [0.0; 3]);
    add_bone(&mut hierarchy, "b", None, [10.0, 0.0, 0.0]);
    let space = hierarchy
        .add_null(
            "space",
            Some(&ElementKey::bone("a")),
            Transform::from_xyz(1.0, 0.0, 0.0),
        )
        .unwrap();
    hierarchy
        .add_parent(&ElementKey::null("space"), &ElementKey::bone("b"), ElementWeight::ZERO, false)
        .unwrap();
    assert_vec3(hierarchy.global_transform(space, false).translation, Vec3::new(1.0, 0.0, 0.0));

    hierarchy
        .switch_to_parent(&ElementKey::null("space"), &ElementKey::bone("b"), false)
        .unwrap();

    assert_vec3(hierarchy.global_transform(space, false).translation, Vec3::new(1.0, 0.0, 0.0));
    assert_vec3(hierarchy.local_transform(space, false).translation, Vec3::new(-9.0, 0.0, 0.0));
    let b = hierarchy.index_of(&ElementKey::bone("b")).unwrap();
    assert_eq!(hierarchy.parent_weights(space, false)[1], (b, ElementWeight::FULL));
}

#[test]
fn rotated_parent_rotates_child_translation() {
    let mut hierarchy = RigHierarchy::new();
    let root = add_bone(&mut hierarchy, "root", None, [0.0; 3]);
    let child = add_bone(&mut hierarchy, "child", Some("root"), [1.0, 0.0, 0.0]);

    hierarchy.set_local_transform(
        root,
        Transform::from_rotation(Quat::from_rotation_z(PI)),
        false,
        true,
    );

    assert_vec3(hierarchy.global_transform(child, false).translation, Vec3::new(-1.0, 0.0, 0.0));
    let rotation = hierarchy.global_transform(child, false).rotation;
    assert!(rotation.dot(Quat::from_rotation_z(PI)).abs() > 0.9999);
}

#[test]
fn initial_writes_do_not_touch_current_values() {
    let mut hierarchy = RigHierarchy::new();
    let root = add_bone(&mut hierarchy, "root", None, [0.0; 3]);
    let child = add_bone(&mut hierarchy, "child", Some("root"), [1.0, 0.0, 0.0]);

    hierarchy.set_transform(root, Transform::from_xyz(3.0, 0.0, 0.0), TransformType::InitialLocal, true);

    assert_vec3(hierarchy.transform(child, TransformType::InitialGlobal).translation, Vec3::new(4.0, 0.0, 0.0));
    assert_vec3(hierarchy.transform(child, TransformType::CurrentGlobal).translation, Vec3::new(1.0, 0.0, 0.0));
    assert_dirty_invariant(&hierarchy);
}
