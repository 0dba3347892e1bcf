use crate::ElementKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("element already exists: {key}")]
    DuplicateElement { key: ElementKey },

    #[error("unknown element: {key}")]
    UnknownElement { key: ElementKey },

    #[error("unknown parent '{parent}' for element '{child}'")]
    UnknownParent { child: ElementKey, parent: ElementKey },

    #[error("parenting '{child}' under '{parent}' would create a cycle")]
    CyclicParent { child: ElementKey, parent: ElementKey },

    #[error("element '{key}' does not support multiple parents")]
    SingleParentOnly { key: ElementKey },

    #[error("element '{key}' cannot take part in parent relationships")]
    NotTransformElement { key: ElementKey },

    #[error("invalid element name: {name:?}")]
    InvalidName { name: String },

    #[cfg(feature = "json")]
    #[error("failed to parse rig JSON: {message}")]
    JsonParse { message: String },

    #[cfg(feature = "json")]
    #[error("unknown element kind '{value}' for element '{name}'")]
    JsonUnknownKind { name: String, value: String },
}
