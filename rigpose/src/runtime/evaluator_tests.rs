use super::test_support::{add_bone, assert_vec3};
use crate::{
    BoneType, ElementKey, PoseBuffer, RigConfig, RigEvaluator, RigHierarchy, SkeletonDesc, Transform,
};
use glam::Vec3;

fn rig() -> RigHierarchy {
    let mut hierarchy = RigHierarchy::new();
    add_bone(&mut hierarchy, "root", None, [0.0; 3]);
    add_bone(&mut hierarchy, "child", Some("root"), [0.0, 1.0, 0.0]);
    hierarchy.add_curve("blink", Some(0.0)).unwrap();
    hierarchy
}

fn skeleton() -> SkeletonDesc {
    let mut skeleton = SkeletonDesc::new();
    let root = skeleton.push_bone("root", None);
    skeleton.push_bone("child", Some(root));
    skeleton.push_curve("blink");
    skeleton
}

fn input(root: [f32; 3], child: [f32; 3]) -> PoseBuffer {
    PoseBuffer {
        locals: vec![
            Transform::from_translation(Vec3::from_array(root)),
            Transform::from_translation(Vec3::from_array(child)),
        ],
        curves: vec![0.5],
    }
}

fn nudge_child(hierarchy: &mut RigHierarchy) {
    let child = hierarchy.index_of(&ElementKey::bone("child")).unwrap();
    let mut global = hierarchy.global_transform(child, false);
    global.translation.x += 1.0;
    hierarchy.set_global_transform(child, global, false, true);
}

fn evaluate_nudged(config: RigConfig) -> (PoseBuffer, bool) {
    let evaluator = RigEvaluator::new(rig(), config);
    evaluator.cache_bones(&skeleton(), None);
    let mut output = PoseBuffer::default();
    evaluator.evaluate(&input([0.0; 3], [0.0, 1.0, 0.0]), &mut nudge_child, &mut output);
    (output, evaluator.is_using_pose_adapter())
}

#[test]
fn pose_adapter_path_round_trips_solver_edits() {
    let (output, adapter) = evaluate_nudged(RigConfig::default());

    assert!(adapter);
    assert_eq!(output.locals.len(), 2);
    assert_vec3(output.locals[0].translation, Vec3::ZERO);
    assert_vec3(output.locals[1].translation, Vec3::new(1.0, 1.0, 0.0));
    assert_eq!(output.curves, vec![0.5]);
}

#[test]
fn mapping_path_matches_the_pose_adapter_path() {
    let config = RigConfig {
        enable_pose_adapter: false,
        ..RigConfig::default()
    };
    let (mapped, adapter) = evaluate_nudged(config);
    let (linked, _) = evaluate_nudged(RigConfig::default());

    assert!(!adapter);
    for (mapped, linked) in mapped.locals.iter().zip(&linked.locals) {
        assert!(mapped.approx_eq(linked, 1.0e-4), "{mapped:?} != {linked:?}");
    }
    assert_eq!(mapped.curves, linked.curves);
}

#[test]
fn topology_edits_rebuild_the_adapter_on_next_evaluate() {
    let evaluator = RigEvaluator::new(rig(), RigConfig::default());
    evaluator.cache_bones(&skeleton(), None);
    assert!(evaluator.is_using_pose_adapter());

    evaluator.with_hierarchy(|hierarchy| {
        let child = ElementKey::bone("child");
        hierarchy
            .add_bone("tip", Some(&child), Transform::from_xyz(0.0, 1.0, 0.0), BoneType::User)
            .unwrap();
    });
    assert!(!evaluator.is_using_pose_adapter());

    let mut tip_global = Vec3::ZERO;
    let mut output = PoseBuffer::default();
    let mut solver = |hierarchy: &mut RigHierarchy| {
        let tip = hierarchy.index_of(&ElementKey::bone("tip")).unwrap();
        tip_global = hierarchy.global_transform(tip, false).translation;
    };
    evaluator.evaluate(&input([2.0, 0.0, 0.0], [0.0, 1.0, 0.0]), &mut solver, &mut output);

    assert!(evaluator.is_using_pose_adapter());
    assert_vec3(tip_global, Vec3::new(2.0, 2.0, 0.0));
    assert_vec3(output.locals[0].translation, Vec3::new(2.0, 0.0, 0.0));
}

#[test]
fn inclusion_lists_restrict_transfer_to_named_bones() {
    let config = RigConfig {
        input_bones: vec!["child".to_string()],
        ..RigConfig::default()
    };
    let evaluator = RigEvaluator::new(rig(), config);
    evaluator.cache_bones(&skeleton(), None);
    assert!(!evaluator.is_using_pose_adapter());

    let mut root_local = Vec3::ONE;
    let mut solver = |hierarchy: &mut RigHierarchy| {
        root_local = hierarchy.local_transform(0, false).translation;
    };
    let mut output = PoseBuffer::default();
    evaluator.evaluate(&input([5.0, 0.0, 0.0], [0.0, 2.0, 0.0]), &mut solver, &mut output);

    // root never received input, but the output still carries the input value through
    assert_vec3(root_local, Vec3::ZERO);
    assert_vec3(output.locals[0].translation, Vec3::new(5.0, 0.0, 0.0));
    assert_vec3(output.locals[1].translation, Vec3::new(0.0, 2.0, 0.0));
}

#[test]
fn global_space_transfer_composes_the_input_pose() {
    let config = RigConfig {
        transfer_in_local_space: false,
        ..RigConfig::default()
    };
    let evaluator = RigEvaluator::new(rig(), config);
    evaluator.cache_bones(&skeleton(), None);
    assert!(evaluator.is_using_pose_adapter());

    let mut child_global = Vec3::ZERO;
    let mut solver = |hierarchy: &mut RigHierarchy| {
        child_global = hierarchy.global_transform(1, false).translation;
    };
    let mut output = PoseBuffer::default();
    evaluator.evaluate(&input([1.0, 0.0, 0.0], [0.0, 2.0, 0.0]), &mut solver, &mut output);

    assert_vec3(child_global, Vec3::new(1.0, 2.0, 0.0));
    assert_vec3(output.locals[0].translation, Vec3::new(1.0, 0.0, 0.0));
    assert_vec3(output.locals[1].translation, Vec3::new(0.0, 2.0, 0.0));
}

#[test]
fn curves_pass_through_the_solver() {
    for enable_pose_adapter in [true, false] {
        let config = RigConfig {
            enable_pose_adapter,
            ..RigConfig::default()
        };
        let evaluator = RigEvaluator::new(rig(), config);
        evaluator.cache_bones(&skeleton(), None);

        let mut solver = |hierarchy: &mut RigHierarchy| {
            let blink = hierarchy.index_of(&ElementKey::curve("blink")).unwrap();
            let value = hierarchy.curve_value(blink).unwrap();
            hierarchy.set_curve_value(blink, value * 2.0);
        };
        let mut output = PoseBuffer::default();
        evaluator.evaluate(&input([0.0; 3], [0.0; 3]), &mut solver, &mut output);
        assert_eq!(output.curves, vec![1.0], "pose adapter: {enable_pose_adapter}");
    }
}

#[test]
fn unmappable_skeleton_falls_back_to_copying_the_input() {
    let evaluator = RigEvaluator::new(rig(), RigConfig::default());
    let mut other = SkeletonDesc::new();
    other.push_bone("pelvis", None);
    evaluator.cache_bones(&other, None);
    assert!(!evaluator.is_using_pose_adapter());

    let input = PoseBuffer {
        locals: vec![Transform::from_xyz(4.0, 0.0, 0.0)],
        curves: Vec::new(),
    };
    let mut output = PoseBuffer::default();
    evaluator.evaluate(&input, &mut |_: &mut RigHierarchy| {}, &mut output);
    assert_eq!(output, input);
}

#[test]
fn failed_link_is_retried_only_after_a_topology_change() {
    let evaluator = RigEvaluator::new(rig(), RigConfig::default());
    let mut other = SkeletonDesc::new();
    other.push_bone("pelvis", None);
    evaluator.cache_bones(&other, None);

    let (id, version) = evaluator.with_hierarchy(|h| (h.id(), h.topology_version()));
    assert_eq!(evaluator.failed_link(), Some((id, version)));

    let input = PoseBuffer {
        locals: vec![Transform::from_xyz(1.0, 0.0, 0.0)],
        curves: Vec::new(),
    };
    for _ in 0..5 {
        let mut output = PoseBuffer::default();
        evaluator.evaluate(&input, &mut |_: &mut RigHierarchy| {}, &mut output);
        assert!(!evaluator.is_using_pose_adapter());
        assert_eq!(evaluator.failed_link(), Some((id, version)));
        assert_eq!(evaluator.with_hierarchy(|h| h.topology_version()), version);
    }

    evaluator.with_hierarchy(|hierarchy| add_bone(hierarchy, "pelvis", None, [0.0; 3]));
    let mut output = PoseBuffer::default();
    evaluator.evaluate(&input, &mut |_: &mut RigHierarchy| {}, &mut output);
    assert!(evaluator.is_using_pose_adapter());
    assert_eq!(evaluator.failed_link(), None);
    assert_vec3(output.locals[0].translation, Vec3::new(1.0, 0.0, 0.0));
}

#[test]
fn unset_curves_keep_the_input_value_on_both_paths() {
    for enable_pose_adapter in [true, false] {
        let config = RigConfig {
            enable_pose_adapter,
            transfer_input_curves: false,
            ..RigConfig::default()
        };
        let mut hierarchy = RigHierarchy::new();
        add_bone(&mut hierarchy, "root", None, [0.0; 3]);
        add_bone(&mut hierarchy, "child", Some("root"), [0.0, 1.0, 0.0]);
        hierarchy.add_curve("blink", None).unwrap();
        let evaluator = RigEvaluator::new(hierarchy, config);
        evaluator.cache_bones(&skeleton(), None);
        assert_eq!(evaluator.is_using_pose_adapter(), enable_pose_adapter);

        let mut input = input([0.0; 3], [0.0, 1.0, 0.0]);
        input.curves = vec![0.7];
        let mut output = PoseBuffer::default();
        evaluator.evaluate(&input, &mut |_: &mut RigHierarchy| {}, &mut output);
        assert_eq!(output.curves, vec![0.7], "pose adapter: {enable_pose_adapter}");
    }
}

#[test]
fn evaluate_without_cached_bones_only_runs_the_solver() {
    let evaluator = RigEvaluator::new(rig(), RigConfig::default());
    let mut ran = false;
    let mut output = PoseBuffer::default();
    evaluator.evaluate(
        &input([1.0, 0.0, 0.0], [0.0; 3]),
        &mut |_: &mut RigHierarchy| ran = true,
        &mut output,
    );
    assert!(ran);
    assert_eq!(output, PoseBuffer::default());
    assert_eq!(evaluator.config(), RigConfig::default());
}

#[test]
fn evaluations_from_several_threads_serialize() {
    let evaluator = RigEvaluator::new(rig(), RigConfig::default());
    evaluator.cache_bones(&skeleton(), None);

    std::thread::scope(|scope| {
        for offset in 0..4 {
            let evaluator = &evaluator;
            scope.spawn(move || {
                for _ in 0..16 {
                    let mut output = PoseBuffer::default();
                    let x = offset as f32;
                    evaluator.evaluate(
                        &input([x, 0.0, 0.0], [0.0, 1.0, 0.0]),
                        &mut nudge_child,
                        &mut output,
                    );
                    assert_vec3(output.locals[0].translation, Vec3::new(x, 0.0, 0.0));
                    assert_vec3(output.locals[1].translation, Vec3::new(1.0, 1.0, 0.0));
                }
            });
        }
    });
    assert!(evaluator.is_using_pose_adapter());
}
