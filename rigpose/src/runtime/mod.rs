mod element;
mod evaluator;
mod hierarchy;
mod mapping;
mod pose;
mod pose_adapter;
mod relink;
mod storage;
mod transforms;

pub use element::{Element, ParentConstraint};
pub use evaluator::{RigEvaluator, Solver};
pub use hierarchy::RigHierarchy;
pub use mapping::{PoseMapping, TransferMap};
pub use pose::{NameRemap, PoseBoneDesc, PoseBuffer, SkeletonDesc, local_to_global};
pub use pose_adapter::{Dependent, LinkedPose, PoseAdapter};
pub use relink::StorageRelink;
pub use storage::StorageLink;

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod transforms_tests;




#[cfg(test)]
mod evaluator_tests;
