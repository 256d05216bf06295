pub mod engine;
pub mod preprocess;
#[cfg(feature = "ml")]
pub mod ml_model;
#[cfg(feature = "ml")]
pub mod training;
#[cfg(feature = "ml")]
pub mod inference;
#[cfg(feature = "ml")]
pub mod burn_engine;

pub use engine::{FitOptions, ModelShape, TensorEngine, TrainingSet};
pub use preprocess::{preprocess_image, ImageSource, ImageTensor, IMAGE_SIZE};
#[cfg(feature = "ml")]
pub use ml_model::{ConvClassifier, ModelConfig};
#[cfg(feature = "ml")]
pub use burn_engine::{BurnEngine, CpuBackend, GpuBackend};
