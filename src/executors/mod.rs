// Module: Executors
// One executor per step variant (Param, ApiCall, Resource, Payload, Log).

pub mod api_call;
pub mod log;
pub mod param;
pub mod payload;
pub mod resource;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;
use crate::protocol::{Step, StepKind, StepResult};

/// Trait that defines the contract for any step executor.
///
/// Executors return a `StepResult` directly: every failure is a value
/// carrying a structured error, never a propagated exception. The trait
/// requires Send + Sync because distinct event invocations may share
/// the same executor set.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Checks if this executor is responsible for the given variant.
    fn can_handle(&self, kind: StepKind) -> bool;

    /// Executes the step against the context and returns the result.
    /// Bindings (step result, captures, resources) are applied to the
    /// context by the executor itself.
    async fn execute(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult;
}
