use crate::{
    BoneType, ControlAnimationType, ControlSettings, ElementKey, ElementKind, ElementWeight, Error,
    RigConfig, RigHierarchy, Transform,
};
use glam::{Quat, Vec3};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Root {
    #[serde(default)]
    elements: Vec<ElementDef>,
}

#[derive(Debug, Deserialize)]
struct ElementDef {
    kind: String,
    name: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    parents: Vec<ParentDef>,
    #[serde(default)]
    transform: TransformDef,
    #[serde(default, rename = "boneType")]
    bone_type: Option<String>,
    #[serde(default, rename = "animationType")]
    animation_type: Option<String>,
    #[serde(default)]
    offset: TransformDef,
    #[serde(default)]
    shape: TransformDef,
    #[serde(default)]
    value: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ParentDef {
    key: String,
    #[serde(default)]
    weight: Option<WeightDef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WeightDef {
    Uniform(f32),
    Channels {
        #[serde(default = "default_one")]
        translation: f32,
        #[serde(default = "default_one")]
        rotation: f32,
        #[serde(default = "default_one")]
        scale: f32,
    },
}

impl WeightDef {
    fn to_weight(&self) -> ElementWeight {
        match *self {
            Self::Uniform(weight) => ElementWeight::uniform(weight),
            Self::Channels {
                translation,
                rotation,
                scale,
            } => ElementWeight {
                translation,
                rotation,
                scale,
            },
        }
    }
}

fn default_one() -> f32 {
    1.0
}

fn default_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_rotation() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

#[derive(Debug, Deserialize)]
struct TransformDef {
    #[serde(default)]
    translation: [f32; 3],
    /// Quaternion as `[x, y, z, w]`.
    #[serde(default = "default_rotation")]
    rotation: [f32; 4],
    #[serde(default = "default_scale")]
    scale: [f32; 3],
}

impl Default for TransformDef {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: default_rotation(),
            scale: default_scale(),
        }
    }
}

impl TransformDef {
    fn to_transform(&self) -> Transform {
        Transform::new(
            Vec3::from_array(self.translation),
            Quat::from_array(self.rotation),
            Vec3::from_array(self.scale),
        )
        .normalized()
    }
}

/// Parses `kind:name`; a bare name refers to a bone.
fn parse_key(element: &str, value: &str) -> Result<ElementKey, Error> {
    match value.split_once(':') {
        Some((kind, name)) => {
            let kind = ElementKind::from_name(kind).ok_or_else(|| Error::JsonUnknownKind {
                name: element.to_string(),
                value: kind.to_string(),
            })?;
            Ok(ElementKey::new(kind, name))
        }
        None => Ok(ElementKey::bone(value)),
    }
}

fn parse_bone_type(element: &str, value: Option<&str>) -> Result<BoneType, Error> {
    match value {
        None | Some("imported") => Ok(BoneType::Imported),
        Some("user") => Ok(BoneType::User),
        Some(other) => Err(Error::JsonParse {
            message: format!("unknown bone type '{other}' for element '{element}'"),
        }),
    }
}

fn parse_animation_type(element: &str, value: Option<&str>) -> Result<ControlAnimationType, Error> {
    match value {
        None | Some("animationControl") => Ok(ControlAnimationType::AnimationControl),
        Some("animationChannel") => Ok(ControlAnimationType::AnimationChannel),
        Some(other) => Err(Error::JsonParse {
            message: format!("unknown animation type '{other}' for element '{element}'"),
        }),
    }
}

impl RigHierarchy {
    /// Builds a hierarchy from its JSON description. Elements are added in document order,
    /// so parents must be listed before their children.
    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        let root: Root = serde_json::from_str(input).map_err(|e| Error::JsonParse {
            message: e.to_string(),
        })?;

        let mut hierarchy = RigHierarchy::new();
        for def in &root.elements {
            let kind = ElementKind::from_name(&def.kind).ok_or_else(|| Error::JsonUnknownKind {
                name: def.name.clone(),
                value: def.kind.clone(),
            })?;

            let mut parents: Vec<(ElementKey, ElementWeight)> = Vec::new();
            if let Some(parent) = &def.parent {
                parents.push((parse_key(&def.name, parent)?, ElementWeight::FULL));
            }
            for parent in &def.parents {
                let weight = parent
                    .weight
                    .as_ref()
                    .map(WeightDef::to_weight)
                    .unwrap_or(ElementWeight::FULL);
                parents.push((parse_key(&def.name, &parent.key)?, weight));
            }
            let first = parents.first().map(|(key, _)| key);
            let local = def.transform.to_transform();

            let index = match kind {
                ElementKind::Bone => hierarchy.add_bone(
                    &def.name,
                    first,
                    local,
                    parse_bone_type(&def.name, def.bone_type.as_deref())?,
                )?,
                ElementKind::Null => hierarchy.add_null(&def.name, first, local)?,
                ElementKind::Control => hierarchy.add_control(
                    &def.name,
                    first,
                    ControlSettings {
                        animation_type: parse_animation_type(
                            &def.name,
                            def.animation_type.as_deref(),
                        )?,
                        offset: def.offset.to_transform(),
                        shape: def.shape.to_transform(),
                    },
                    local,
                )?,
                ElementKind::Curve => {
                    if !parents.is_empty() {
                        return Err(Error::NotTransformElement {
                            key: ElementKey::curve(def.name.clone()),
                        });
                    }
                    hierarchy.add_curve(&def.name, def.value)?
                }
                ElementKind::Reference => hierarchy.add_reference(&def.name, first, local)?,
                ElementKind::Connector => hierarchy.add_connector(&def.name, local)?,
                ElementKind::Socket => hierarchy.add_socket(&def.name, first, local)?,
            };

            let key = hierarchy.elements()[index].key().clone();
            let first_weight = parents.first().map(|(_, weight)| *weight);
            if let (Some(weight), Some(parent)) = (first_weight, hierarchy.elements()[index].first_parent()) {
                if weight != ElementWeight::FULL {
                    hierarchy.set_parent_weight(index, parent, weight, true, true);
                    hierarchy.set_parent_weight(index, parent, weight, false, true);
                }
            }
            for (parent, weight) in parents.iter().skip(1) {
                hierarchy.add_parent(&key, parent, *weight, false)?;
            }
        }
        tracing::debug!(
            hierarchy = hierarchy.id(),
            elements = hierarchy.len(),
            "loaded rig hierarchy from JSON"
        );
        Ok(hierarchy)
    }
}

impl RigConfig {
    /// Parses a config object; missing fields keep their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        serde_json::from_str(input).map_err(|e| Error::JsonParse {
            message: e.to_string(),
        })
    }
}
