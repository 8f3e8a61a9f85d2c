//! Sample steps and workflows shared by the scenarios.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use futures::TryStreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use waystone::{
    ClosureVars, FunctionId, HookDefinition, HookOptions, StepContext, StepError, StepFunction,
    WorkflowContext, WorkflowFunction, async_trait,
};

/// Counts executions across attempts and deliveries.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicU32>);

impl Counter {
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Steps
// =============================================================================

#[derive(Clone, Default)]
pub struct Add {
    pub calls: Counter,
}

#[async_trait]
impl StepFunction for Add {
    const ID: &'static str = "step//./src/math.js//add";
    type Input = (i64, i64);
    type Output = i64;

    async fn run(&self, (a, b): (i64, i64), _ctx: &StepContext) -> Result<i64, StepError> {
        self.calls.hit();
        Ok(a + b)
    }
}

/// Parks every call until the test releases it.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    pub calls: Counter,
}

#[async_trait]
impl StepFunction for Gate {
    const ID: &'static str = "step//./src/gate.js//hold";
    type Input = u32;
    type Output = u32;

    async fn run(&self, ticket: u32, _ctx: &StepContext) -> Result<u32, StepError> {
        self.calls.hit();
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ticket)
    }
}

/// Fails with a retryable error until `failures` attempts have been made.
#[derive(Clone, Default)]
pub struct Flaky {
    pub failures: u32,
    pub calls: Counter,
    pub last_attempt: Counter,
}

#[async_trait]
impl StepFunction for Flaky {
    const ID: &'static str = "step//./src/net.js//fetchQuote";
    type Input = String;
    type Output = String;

    async fn run(&self, symbol: String, ctx: &StepContext) -> Result<String, StepError> {
        let call = self.calls.hit();
        self.last_attempt.0.store(ctx.attempt(), Ordering::SeqCst);
        if call <= self.failures {
            return Err(anyhow::anyhow!("upstream timeout on call {call}").into());
        }
        Ok(format!("{symbol}:42"))
    }
}

pub struct Reject;

#[async_trait]
impl StepFunction for Reject {
    const ID: &'static str = "step//./src/payments.js//charge";
    type Input = u64;
    type Output = String;

    async fn run(&self, amount: u64, _ctx: &StepContext) -> Result<String, StepError> {
        Err(StepError::fatal(format!("card declined for {amount}")))
    }
}

/// Writes each item to the run's default stream.
pub struct Emit;

#[async_trait]
impl StepFunction for Emit {
    const ID: &'static str = "step//./src/report.js//emit";
    type Input = Vec<String>;
    type Output = usize;

    async fn run(&self, items: Vec<String>, ctx: &StepContext) -> Result<usize, StepError> {
        for item in &items {
            ctx.write(item).await?;
        }
        Ok(items.len())
    }
}

/// Flips a shared flag when it runs.
#[derive(Clone, Default)]
pub struct Toggle {
    pub flag: Arc<AtomicBool>,
}

#[async_trait]
impl StepFunction for Toggle {
    const ID: &'static str = "step//./src/flags.js//toggle";
    type Input = ();
    type Output = ();

    async fn run(&self, _: (), _ctx: &StepContext) -> Result<(), StepError> {
        self.flag.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub const SCALE_STEP: &str = "step//./src/math.js//scaled/scale";

// =============================================================================
// Workflows
// =============================================================================

/// Adds the inputs one step at a time.
pub struct Sum;

#[async_trait]
impl WorkflowFunction for Sum {
    const ID: &'static str = "workflow//./src/math.js//sum";
    type Input = Vec<i64>;
    type Output = i64;

    async fn run(&self, ctx: &WorkflowContext, values: Vec<i64>) -> waystone::Result<i64> {
        let mut total = 0;
        for value in values {
            total = ctx.step::<Add>(&(total, value)).await?;
        }
        Ok(total)
    }
}

/// Waits on a single gated step.
pub struct Held;

#[async_trait]
impl WorkflowFunction for Held {
    const ID: &'static str = "workflow//./src/gate.js//held";
    type Input = u32;
    type Output = u32;

    async fn run(&self, ctx: &WorkflowContext, ticket: u32) -> waystone::Result<u32> {
        ctx.step::<Gate>(&ticket).await
    }
}

/// Issues two steps before awaiting either.
pub struct Pair;

#[async_trait]
impl WorkflowFunction for Pair {
    const ID: &'static str = "workflow//./src/math.js//pair";
    type Input = i64;
    type Output = (i64, i64);

    async fn run(&self, ctx: &WorkflowContext, n: i64) -> waystone::Result<(i64, i64)> {
        let (left, right) = futures::join!(ctx.step::<Add>(&(n, 1)), ctx.step::<Add>(&(n, 2)));
        Ok((left?, right?))
    }
}

pub struct Quote;

#[async_trait]
impl WorkflowFunction for Quote {
    const ID: &'static str = "workflow//./src/net.js//quote";
    type Input = String;
    type Output = String;

    async fn run(&self, ctx: &WorkflowContext, symbol: String) -> waystone::Result<String> {
        ctx.step::<Flaky>(&symbol).await
    }
}

/// Charges a card; `recover` decides whether a decline fails the run.
pub struct Checkout;

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutInput {
    pub amount: u64,
    pub recover: bool,
}

#[async_trait]
impl WorkflowFunction for Checkout {
    const ID: &'static str = "workflow//./src/payments.js//checkout";
    type Input = CheckoutInput;
    type Output = String;

    async fn run(&self, ctx: &WorkflowContext, input: CheckoutInput) -> waystone::Result<String> {
        match ctx.step::<Reject>(&input.amount).await {
            Ok(receipt) => Ok(receipt),
            Err(waystone::Error::StepFailed { message, .. }) if input.recover => {
                Ok(format!("recovered: {message}"))
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Approval {
    pub amount: i64,
}

/// Sums approval amounts until a terminal event arrives.
pub struct Approvals;

#[async_trait]
impl WorkflowFunction for Approvals {
    const ID: &'static str = "workflow//./src/approvals.js//collect";
    type Input = String;
    type Output = i64;

    async fn run(&self, ctx: &WorkflowContext, token: String) -> waystone::Result<i64> {
        let definition = HookDefinition::<Approval>::from_type()?;
        let mut approvals = ctx.create_hook(&definition, HookOptions::token(token))?;
        let mut total = 0;
        while let Some(event) = approvals.try_next().await? {
            total += event.value.amount;
        }
        Ok(total)
    }
}

/// Sleeps, then adds.
pub struct Nap;

#[async_trait]
impl WorkflowFunction for Nap {
    const ID: &'static str = "workflow//./src/timers.js//nap";
    type Input = u64;
    type Output = i64;

    async fn run(&self, ctx: &WorkflowContext, millis: u64) -> waystone::Result<i64> {
        ctx.sleep(Duration::from_millis(millis)).await?;
        ctx.step::<Add>(&(20, 22)).await
    }
}

pub struct Report;

#[async_trait]
impl WorkflowFunction for Report {
    const ID: &'static str = "workflow//./src/report.js//report";
    type Input = Vec<String>;
    type Output = usize;

    async fn run(&self, ctx: &WorkflowContext, items: Vec<String>) -> waystone::Result<usize> {
        ctx.step::<Emit>(&items).await
    }
}

/// Calls a dynamically registered step with a captured variable.
pub struct Scaled;

#[async_trait]
impl WorkflowFunction for Scaled {
    const ID: &'static str = "workflow//./src/math.js//scaled";
    type Input = i64;
    type Output = i64;

    async fn run(&self, ctx: &WorkflowContext, value: i64) -> waystone::Result<i64> {
        let factor = 3;
        let step_id: FunctionId = SCALE_STEP.parse()?;
        let closure = ClosureVars::new().with("factor", &factor)?;
        ctx.invoke_with_closure(&step_id, serde_json::json!(value), closure)
            .await
    }
}

/// Calls a step no worker has registered.
pub struct Orphan;

#[async_trait]
impl WorkflowFunction for Orphan {
    const ID: &'static str = "workflow//./src/orphan.js//orphan";
    type Input = ();
    type Output = i64;

    async fn run(&self, ctx: &WorkflowContext, _: ()) -> waystone::Result<i64> {
        let missing: FunctionId = "step//./src/orphan.js//missing".parse()?;
        ctx.invoke(&missing, serde_json::json!(null)).await
    }
}

/// Takes a different first call once the flag flips.
pub struct Fickle {
    pub flag: Arc<AtomicBool>,
}

#[async_trait]
impl WorkflowFunction for Fickle {
    const ID: &'static str = "workflow//./src/flags.js//fickle";
    type Input = ();
    type Output = ();

    async fn run(&self, ctx: &WorkflowContext, _: ()) -> waystone::Result<()> {
        if self.flag.load(Ordering::SeqCst) {
            ctx.sleep(Duration::from_secs(1)).await
        } else {
            ctx.step::<Toggle>(&()).await
        }
    }
}

pub struct Explode;

#[async_trait]
impl WorkflowFunction for Explode {
    const ID: &'static str = "workflow//./src/explode.js//explode";
    type Input = ();
    type Output = ();

    async fn run(&self, _ctx: &WorkflowContext, _: ()) -> waystone::Result<()> {
        panic!("boom");
    }
}
