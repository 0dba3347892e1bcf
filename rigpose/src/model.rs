use std::fmt;

/// Closed set of element kinds stored in a [`crate::RigHierarchy`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Bone,
    Null,
    Control,
    Curve,
    Reference,
    Connector,
    Socket,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        Self::Bone,
        Self::Null,
        Self::Control,
        Self::Curve,
        Self::Reference,
        Self::Connector,
        Self::Socket,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Bone => 0,
            Self::Null => 1,
            Self::Control => 2,
            Self::Curve => 3,
            Self::Reference => 4,
            Self::Connector => 5,
            Self::Socket => 6,
        }
    }

    /// Every kind except curves carries transforms.
    pub fn has_transforms(self) -> bool {
        !matches!(self, Self::Curve)
    }

    /// Nulls and controls may blend several weighted parents.
    pub fn supports_multiple_parents(self) -> bool {
        matches!(self, Self::Null | Self::Control)
    }

    #[cfg(feature = "json")]
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name {
            "bone" => Some(Self::Bone),
            "null" => Some(Self::Null),
            "control" => Some(Self::Control),
            "curve" => Some(Self::Curve),
            "reference" => Some(Self::Reference),
            "connector" => Some(Self::Connector),
            "socket" => Some(Self::Socket),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bone => "bone",
            Self::Null => "null",
            Self::Control => "control",
            Self::Curve => "curve",
            Self::Reference => "reference",
            Self::Connector => "connector",
            Self::Socket => "socket",
        }
    }
}

/// External-facing identity of an element: kind plus name.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ElementKey {
    pub kind: ElementKind,
    pub name: String,
}

impl ElementKey {
    pub fn new(kind: ElementKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn bone(name: impl Into<String>) -> Self {
        Self::new(ElementKind::Bone, name)
    }

    pub fn null(name: impl Into<String>) -> Self {
        Self::new(ElementKind::Null, name)
    }

    pub fn control(name: impl Into<String>) -> Self {
        Self::new(ElementKind::Control, name)
    }

    pub fn curve(name: impl Into<String>) -> Self {
        Self::new(ElementKind::Curve, name)
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum BoneType {
    /// Bone that mirrors a bone of the driving skeleton.
    #[default]
    Imported,
    /// Bone authored on the rig itself.
    User,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ControlAnimationType {
    #[default]
    AnimationControl,
    /// Animatable value parented under another control; never a pose dependent.
    AnimationChannel,
}

#[derive(Clone, Debug, Default)]
pub struct ControlSettings {
    pub animation_type: ControlAnimationType,
    pub offset: crate::Transform,
    pub shape: crate::Transform,
}

/// One of the four transform slots of every transform stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TransformType {
    InitialLocal,
    CurrentLocal,
    InitialGlobal,
    CurrentGlobal,
}

impl TransformType {
    pub const ALL: [TransformType; 4] = [
        Self::InitialLocal,
        Self::CurrentLocal,
        Self::InitialGlobal,
        Self::CurrentGlobal,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::InitialLocal => 0,
            Self::CurrentLocal => 1,
            Self::InitialGlobal => 2,
            Self::CurrentGlobal => 3,
        }
    }

    pub fn local(initial: bool) -> Self {
        if initial {
            Self::InitialLocal
        } else {
            Self::CurrentLocal
        }
    }

    pub fn global(initial: bool) -> Self {
        if initial {
            Self::InitialGlobal
        } else {
            Self::CurrentGlobal
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Self::InitialLocal | Self::CurrentLocal)
    }

    pub fn is_initial(self) -> bool {
        matches!(self, Self::InitialLocal | Self::InitialGlobal)
    }

    /// The other space within the same temporal state.
    pub fn flip_space(self) -> Self {
        match self {
            Self::InitialLocal => Self::InitialGlobal,
            Self::CurrentLocal => Self::CurrentGlobal,
            Self::InitialGlobal => Self::InitialLocal,
            Self::CurrentGlobal => Self::CurrentLocal,
        }
    }
}

/// Which transform stack of an element a slot belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TransformStorageType {
    Pose,
    /// Control offset between the blended parents and the control's pose.
    Offset,
    /// Control shape placement relative to the control's pose.
    Shape,
}

/// Per-channel weight of one parent constraint.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ElementWeight {
    pub translation: f32,
    pub rotation: f32,
    pub scale: f32,
}

impl Default for ElementWeight {
    fn default() -> Self {
        Self::FULL
    }
}

impl ElementWeight {
    pub const FULL: Self = Self::uniform(1.0);
    pub const ZERO: Self = Self::uniform(0.0);

    pub const fn uniform(weight: f32) -> Self {
        Self {
            translation: weight,
            rotation: weight,
            scale: weight,
        }
    }

    pub fn is_almost_zero(&self) -> bool {
        const EPSILON: f32 = 1.0e-4;
        self.translation.abs() <= EPSILON
            && self.rotation.abs() <= EPSILON
            && self.scale.abs() <= EPSILON
    }
}

/// Dirty flags of one local/global pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct DirtyState {
    pub local: bool,
    pub global: bool,
}
