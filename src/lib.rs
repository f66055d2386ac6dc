pub mod config;
pub mod constants;
pub mod containerfile;
pub mod error;
pub mod image;
pub mod import;
pub mod logging;
pub mod oci;
pub mod pipeline;

pub use error::{BimaError, Result};
pub use image::BimaImage;
