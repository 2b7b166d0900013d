//! Shared wire types, collaborator trait interfaces, and error taxonomy for
//! both sides of Meadow: the extractor (E) and the transformer (T).
//!
//! Everything here is tenant-scoped data with no I/O of its own — the
//! concrete Kafka/Redis/Postgres implementations living behind these traits
//! are external collaborators.

pub mod binding;
pub mod context;
pub mod error;
pub mod event;
pub mod job;
pub mod mapping;
pub mod output;
pub mod plan;
pub mod repository;

pub use binding::{Binding, BindingFilter};
pub use context::{
    ContextTooLarge, ExecutionContext, ExecutionMeta, PersistentContext, MAX_CONTEXT_BYTES,
    MAX_FIELD_BYTES,
};
pub use error::{ErrorCategory, MeadowError};
pub use event::{InboundEvent, LifecycleEvent, LifecycleEventType, OrchidFields, StepBatchEvent};
pub use job::{Job, JobPayload, JobType};
pub use mapping::{ActionValueType, FieldSpec, Link, MappingDefinition, MappingStep, MappingStepKind};
pub use output::{ErrorRecordData, ErrorRecordInput, OutputRecord, OutputSource, OutputSourceType};
pub use plan::{BackoffType, BodyTemplate, Plan, RateLimitDescriptor, RetryPolicy, Step};
pub use repository::{
    AuthFlow, AuthFlowRepository, BindingRepository, ConfigRepository, DistributedLock,
    ExecutionRecord, ExecutionRepository, ExecutionStatus, LockGuard, MappingRepository,
    PlanConfig, PlanContextRepository, PlanRepository, Producer, StatisticsRepository,
};

#[cfg(feature = "test-util")]
pub use repository::{
    MockAuthFlowRepository, MockBindingRepository, MockConfigRepository, MockDistributedLock,
    MockExecutionRepository, MockMappingRepository, MockPlanContextRepository, MockPlanRepository,
    MockProducer, MockStatisticsRepository,
};
