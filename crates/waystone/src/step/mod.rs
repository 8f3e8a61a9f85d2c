//! Step functions: retryable units of side-effecting work.
//!
//! A step is registered under its [`FunctionId`] and invoked by the step
//! worker when a job for it is claimed from the queue.

mod context;
mod error;
mod retry;

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

pub use context::StepContext;
pub use error::StepError;
pub use retry::RetryPolicy;

/// A durable step.
///
/// The runtime calls [`run`](Self::run) with at-least-once semantics; the
/// first terminal result is recorded and every later delivery of the same
/// call is discarded without invoking the step again.
///
/// # Example
///
/// ```ignore
/// struct ChargeCard { payments: PaymentClient }
///
/// #[async_trait]
/// impl StepFunction for ChargeCard {
///     const ID: &'static str = "step//orders.js//checkout/chargeCard";
///     type Input = Charge;
///     type Output = Receipt;
///
///     async fn run(&self, charge: Charge, ctx: &StepContext) -> Result<Receipt, StepError> {
///         match self.payments.charge(&charge, ctx.idempotency_key()).await {
///             Ok(receipt) => Ok(receipt),
///             Err(PaymentError::Declined(reason)) => Err(StepError::fatal(reason)),
///             Err(other) => Err(anyhow::Error::from(other).into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait StepFunction: Send + Sync + 'static {
    /// Identifier in `step//<source>//<path>` form.
    const ID: &'static str;

    type Input: Serialize + DeserializeOwned + Send;

    type Output: Serialize + DeserializeOwned + Send;

    /// Overrides the runtime's default retry policy for this step.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn run(&self, input: Self::Input, ctx: &StepContext) -> Result<Self::Output, StepError>;
}

/// Type-erased step for dynamic dispatch from the registry.
#[async_trait]
pub(crate) trait StepEntry: Send + Sync {
    async fn call(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError>;

    fn retry_policy(&self) -> Option<RetryPolicy>;
}

pub(crate) struct TypedStep<S>(pub(crate) S);

#[async_trait]
impl<S: StepFunction> StepEntry for TypedStep<S> {
    async fn call(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        let input: S::Input = serde_json::from_value(input)?;
        let output = self.0.run(input, ctx).await?;
        Ok(serde_json::to_value(output)?)
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.0.retry_policy()
    }
}

/// A step backed by an async closure over raw JSON.
///
/// Created with [`step_fn`]; useful when steps are registered from a
/// manifest rather than as individual types.
pub struct FnStep<F, Fut> {
    f: F,
    retry_policy: Option<RetryPolicy>,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnStep<F, Fut> {
    /// Override the runtime's default retry policy for this step.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}

/// Wrap an async closure as a step.
///
/// ```ignore
/// builder.step_fn(
///     "step//orders.js//checkout/chargeCard",
///     step_fn(|input, ctx| async move {
///         let count: u32 = ctx.closure_var("count")?;
///         Ok(json!(input["amount"].as_u64().unwrap_or(0) * count as u64))
///     }),
/// )
/// ```
pub fn step_fn<F, Fut>(f: F) -> FnStep<F, Fut>
where
    F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    FnStep {
        f,
        retry_policy: None,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> StepEntry for FnStep<F, Fut>
where
    F: Fn(Value, StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    async fn call(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        (self.f)(input, ctx.clone()).await
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy.clone()
    }
}
