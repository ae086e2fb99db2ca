pub mod admission;
pub mod controller;
pub mod cost;
pub mod distribution;
pub mod generator;
pub mod model;
pub mod repo;

pub use controller::{GenerationController, JobHandle, Preview, RecoveryReport};
pub use cost::{CostEstimate, CostModel};
pub use distribution::{AreaAllocation, AreaWeights};
pub use generator::{Candidate, GeneratedQuestion, GenerationTarget, HttpQuestionGenerator, QuestionGenerator};
pub use model::{
    AreaProgress, AreaStatus, GenerationJob, GenerationProgress, GenerationRequest, JobStatus,
    NewGenerationJob, ProgressSnapshot,
};
pub use repo::{GenerationRepo, ProgressDelta};
