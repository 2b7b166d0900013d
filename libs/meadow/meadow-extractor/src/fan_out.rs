//! Fan-Out Executor: runs a step's `sub_steps` once per
//! element of `iterate_over`, bounded by the step's `concurrency`, and
//! merges per-item results back into the parent's original index order.

use crate::step_executor::{StepExecutor, StepExecutorOptions};
use meadow_core::{ExecutionContext, MeadowError, Step};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome for one `iterate_over` element.
#[derive(Debug)]
pub struct FanOutItemOutcome {
    pub index: usize,
    pub item: Value,
    pub context: ExecutionContext,
    pub api_calls: u32,
    pub should_abort: bool,
}

#[derive(Debug, Default)]
pub struct FanOutResult {
    /// One entry per successfully-started item, already sorted by `index`.
    pub items: Vec<FanOutItemOutcome>,
    /// Set once any item's sub-step chain hit `abort_on`.
    pub abort_triggered: bool,
    /// Count of items `iterate_over` produced.
    pub total_items: usize,
}

pub struct FanOutExecutor {
    step_executor: Arc<StepExecutor>,
}

impl FanOutExecutor {
    pub fn new(step_executor: Arc<StepExecutor>) -> Self {
        Self { step_executor }
    }

    /// Executes `step.sub_steps` for every element `step.iterate_over`
    /// evaluates to, bounded by `step.concurrency` concurrent workers.
    /// Nested fan-out sub-steps recurse (subject to `max_nesting_depth`).
    pub async fn execute(
        &self,
        step: &Step,
        parent_ctx: &ExecutionContext,
        opts: &StepExecutorOptions,
        max_nesting_depth: u32,
    ) -> Result<FanOutResult, MeadowError> {
        let iterate_expr = step
            .iterate_over
            .as_deref()
            .ok_or_else(|| MeadowError::Internal("fan-out step missing iterate_over".into()))?;

        let eval_tree = parent_ctx.to_eval_tree();
        let items = meadow_expr::evaluate_slice(iterate_expr, &eval_tree)
            .map_err(|e| MeadowError::BadExpression(e.to_string()))?;

        let total_items = items.len();
        if total_items == 0 {
            return Ok(FanOutResult {
                items: vec![],
                abort_triggered: false,
                total_items: 0,
            });
        }

        let next_nesting_level = parent_ctx.meta.nesting_level + 1;
        if next_nesting_level > max_nesting_depth {
            return Err(MeadowError::MaxLoopsExceeded(max_nesting_depth));
        }

        let concurrency = (step.concurrency as usize).min(total_items).max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let aborted = Arc::new(AtomicBool::new(false));
        let parent_path = parent_ctx.meta.step_path.clone();

        let mut join_set: JoinSet<(usize, Option<FanOutItemOutcome>)> = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let aborted = aborted.clone();
            let step_executor = self.step_executor.clone();
            let sub_steps = step.sub_steps.clone();
            let mut item_ctx = parent_ctx.clone();
            let opts = opts.clone();
            let parent_path = parent_path.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (index, None),
                };
                if aborted.load(Ordering::SeqCst) {
                    return (index, None);
                }

                item_ctx.item = Some(item.clone());
                item_ctx.item_index = Some(index);
                item_ctx.meta.step_path = format!("{parent_path}.fanout[{index}]");
                item_ctx.meta.nesting_level += 1;

                let outcome = run_sub_steps(
                    &step_executor,
                    &sub_steps,
                    &mut item_ctx,
                    &opts,
                    max_nesting_depth,
                )
                .await;

                if outcome.should_abort {
                    aborted.store(true, Ordering::SeqCst);
                }

                (
                    index,
                    Some(FanOutItemOutcome {
                        index,
                        item,
                        context: item_ctx,
                        api_calls: outcome.api_calls,
                        should_abort: outcome.should_abort,
                    }),
                )
            });
        }

        let mut collected: Vec<Option<FanOutItemOutcome>> = (0..total_items).map(|_| None).collect();
        let mut abort_triggered = false;
        while let Some(joined) = join_set.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                Err(_join_err) => continue,
            };
            if let Some(outcome) = &outcome {
                if outcome.should_abort {
                    abort_triggered = true;
                    join_set.abort_all();
                }
            }
            if index < collected.len() {
                collected[index] = outcome;
            }
        }

        let items: Vec<FanOutItemOutcome> = collected.into_iter().flatten().collect();

        Ok(FanOutResult {
            items,
            abort_triggered,
            total_items,
        })
    }
}

struct SubStepsOutcome {
    should_abort: bool,
    api_calls: u32,
}

/// Runs `sub_steps` sequentially against `ctx`, boxed so nested fan-out
/// (a sub-step that is itself a fan-out) can recurse without an `async fn`
/// self-reference cycle.
fn run_sub_steps<'a>(
    step_executor: &'a StepExecutor,
    sub_steps: &'a [Step],
    ctx: &'a mut ExecutionContext,
    opts: &'a StepExecutorOptions,
    max_nesting_depth: u32,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = SubStepsOutcome> + Send + 'a>> {
    Box::pin(async move {
        let mut api_calls = 0u32;

        for (i, sub_step) in sub_steps.iter().enumerate() {
            if sub_step.is_fan_out() {
                let nested = FanOutExecutor {
                    step_executor: Arc::new(step_executor.clone()),
                };
                match nested
                    .execute(sub_step, ctx, opts, max_nesting_depth)
                    .await
                {
                    Ok(fr) => {
                        api_calls += fr.total_items as u32;
                        let key = sub_step.step_id_or(&format!("sub_step_{i}"));
                        let items: Vec<Value> = fr
                            .items
                            .iter()
                            .map(|o| enrich_item(&o.item, &o.context.fanout))
                            .collect();
                        ctx.fanout.insert(key, Value::Array(items));
                        if fr.abort_triggered || fr.items.iter().any(|o| o.should_abort) {
                            return SubStepsOutcome {
                                should_abort: true,
                                api_calls,
                            };
                        }
                    }
                    Err(_) => {
                        ctx.fanout_policy_error = true;
                        return SubStepsOutcome {
                            should_abort: true,
                            api_calls,
                        };
                    }
                }
                continue;
            }

            let result = step_executor.execute(sub_step, ctx, opts).await;
            api_calls += 1;

            if let Some(resp) = &result.response {
                let key = sub_step.step_id_or(&format!("sub_step_{i}"));
                ctx.fanout.insert(key, resp.body.clone());

                if sub_step.abort_on.contains(&resp.status_code) {
                    ctx.fanout_policy_abort = true;
                    ctx.fanout_policy_error = true;
                } else if sub_step.ignore_on.contains(&resp.status_code) {
                    ctx.fanout_policy_error = true;
                }
            }

            if result.should_abort || ctx.fanout_policy_abort {
                return SubStepsOutcome {
                    should_abort: true,
                    api_calls,
                };
            }
        }

        SubStepsOutcome {
            should_abort: false,
            api_calls,
        }
    })
}

/// Builds the response-body element emitted for one fan-out item: the item
/// itself (wrapped as `{"value": item}` when it isn't an object) with any
/// captured sub-step bodies merged in as additional fields.
pub fn enrich_item(item: &Value, fanout: &std::collections::BTreeMap<String, Value>) -> Value {
    let mut map = match item {
        Value::Object(m) => m.clone(),
        other => {
            let mut m = Map::new();
            m.insert("value".to_string(), other.clone());
            m
        }
    };
    for (key, value) in fanout {
        map.insert(key.clone(), value.clone());
    }
    Value::Object(map)
}
