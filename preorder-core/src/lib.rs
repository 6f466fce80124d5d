pub mod alignment;
pub mod constraint;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod model;
pub mod options;
pub mod parser;
pub mod sentence;
pub mod trainer;

pub use constraint::Constraint;
pub use error::{Error, Result};
pub use model::Model;
pub use options::{ParseOptions, Strategy, TrainOptions};
pub use parser::{OutputFormat, Parser};
pub use sentence::{load_sentences, Sentence};
pub use trainer::{create_trainer, load_examples, Trainer, TrainingExample};
