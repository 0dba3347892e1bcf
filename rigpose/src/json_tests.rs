use crate::{
    BoneType, ControlAnimationType, ElementKey, ElementKind, ElementWeight, Error, RigConfig,
    RigHierarchy, TransformType,
};
use glam::Vec3;

const RIG: &str = r#"
{
  "elements": [
    { "kind": "bone", "name": "root", "transform": { "translation": [1, 0, 0] } },
    { "kind": "bone", "name": "spine", "parent": "root", "transform": { "translation": [0, 2, 0] } },
    { "kind": "bone", "name": "ik", "parent": "spine", "boneType": "user" },
    { "kind": "null", "name": "space", "parents": [
        { "key": "root", "weight": 0.5 },
        { "key": "bone:spine", "weight": { "translation": 1, "rotation": 0 } }
    ] },
    { "kind": "control", "name": "hand_ctrl", "parent": "null:space",
      "offset": { "translation": [0, 0, 1] },
      "shape": { "scale": [2, 2, 2] } },
    { "kind": "control", "name": "hand_blend", "parent": "control:hand_ctrl",
      "animationType": "animationChannel" },
    { "kind": "curve", "name": "blink", "value": 0.25 },
    { "kind": "curve", "name": "smile" }
  ]
}
"#;

#[test]
fn loads_elements_parents_and_settings() {
    let mut hierarchy = RigHierarchy::from_json_str(RIG).unwrap();
    assert_eq!(hierarchy.len(), 8);
    assert_eq!(hierarchy.elements_of_kind(ElementKind::Bone).len(), 3);

    let spine = hierarchy.index_of(&ElementKey::bone("spine")).unwrap();
    let global = hierarchy.transform(spine, TransformType::InitialGlobal);
    assert!(global.translation.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1.0e-5));

    let ik = hierarchy.find(&ElementKey::bone("ik")).unwrap();
    assert_eq!(ik.bone_type(), Some(BoneType::User));
    let blend = hierarchy.find(&ElementKey::control("hand_blend")).unwrap();
    assert_eq!(
        blend.control_animation_type(),
        Some(ControlAnimationType::AnimationChannel)
    );

    let space = hierarchy.index_of(&ElementKey::null("space")).unwrap();
    let root = hierarchy.index_of(&ElementKey::bone("root")).unwrap();
    let weights = hierarchy.parent_weights(space, false);
    assert_eq!(weights.len(), 2);
    assert_eq!(weights[0], (root, ElementWeight::uniform(0.5)));
    assert_eq!(
        weights[1].1,
        ElementWeight {
            translation: 1.0,
            rotation: 0.0,
            scale: 1.0,
        }
    );
    assert_eq!(hierarchy.parent_weights(space, true), weights);

    let ctrl = hierarchy.index_of(&ElementKey::control("hand_ctrl")).unwrap();
    let offset = hierarchy.control_offset_transform(ctrl, TransformType::InitialLocal);
    assert!(offset.translation.abs_diff_eq(Vec3::new(0.0, 0.0, 1.0), 1.0e-6));
    let shape = hierarchy.control_shape_transform(ctrl, TransformType::InitialLocal);
    assert!(shape.scale.abs_diff_eq(Vec3::splat(2.0), 1.0e-6));

    let blink = hierarchy.index_of(&ElementKey::curve("blink")).unwrap();
    let smile = hierarchy.index_of(&ElementKey::curve("smile")).unwrap();
    assert_eq!(hierarchy.curve_value(blink), Some(0.25));
    assert!(hierarchy.is_curve_value_set(blink));
    assert!(!hierarchy.is_curve_value_set(smile));
}

#[test]
fn unknown_kinds_are_reported_with_the_element_name() {
    let err = RigHierarchy::from_json_str(r#"{ "elements": [ { "kind": "light", "name": "sun" } ] }"#)
        .unwrap_err();
    match err {
        Error::JsonUnknownKind { name, value } => {
            assert_eq!(name, "sun");
            assert_eq!(value, "light");
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = RigHierarchy::from_json_str(
        r#"{ "elements": [ { "kind": "bone", "name": "a", "parent": "light:sun" } ] }"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::JsonUnknownKind { .. }));
}

#[test]
fn structural_errors_surface_from_the_hierarchy() {
    let err = RigHierarchy::from_json_str(
        r#"{ "elements": [ { "kind": "bone", "name": "a", "parent": "missing" } ] }"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownParent { .. }));

    let err = RigHierarchy::from_json_str(
        r#"{ "elements": [
            { "kind": "bone", "name": "a" },
            { "kind": "curve", "name": "c", "parent": "a" }
        ] }"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::NotTransformElement { .. }));

    let err = RigHierarchy::from_json_str("{ \"elements\": [").unwrap_err();
    assert!(matches!(err, Error::JsonParse { .. }));
}

#[test]
fn config_fills_missing_fields_with_defaults() {
    let config = RigConfig::from_json_str(
        r#"{ "enablePoseAdapter": false, "inputBones": ["spine"] }"#,
    )
    .unwrap();
    assert!(!config.enable_pose_adapter);
    assert_eq!(config.input_bones, vec!["spine".to_string()]);
    assert!(config.transfer_in_local_space);
    assert!(config.transfer_output_curves);
    assert!(config.output_bones.is_empty());

    assert_eq!(RigConfig::from_json_str("{}").unwrap(), RigConfig::default());
}
