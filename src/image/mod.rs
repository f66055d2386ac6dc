pub mod arch;
pub mod builder;
pub mod class;
pub mod copy;
pub mod label;
pub mod operation;
pub mod sniff;

pub use arch::ArchOperation;
pub use builder::{BimaImage, BuildState};
pub use class::ImageClass;
pub use copy::CopyOperation;
pub use label::LabelOperation;
pub use operation::{Operation, OperationKind};
pub use sniff::{detect_architecture, Architecture};
