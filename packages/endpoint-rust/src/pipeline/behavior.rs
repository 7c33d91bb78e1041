//! Behaviors, the explicit continuation cursor, and stage execution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineError;

/// One step of a pipeline stage operating on context `C`.
///
/// A behavior either calls [`Next::run`] exactly once to continue the stage or
/// returns without calling it to short-circuit. Errors from downstream steps
/// come back out of `next.run`, where the behavior may observe or wrap them.
#[async_trait]
pub trait Behavior<C: Send + 'static>: Send + Sync {
    async fn invoke(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), PipelineError>;
}

/// Action run when a stage's cursor passes its last behavior.
///
/// Connector terminals derive the next stage's context and run that stage.
#[async_trait]
pub trait Terminal<C: Send + 'static>: Send + Sync {
    async fn complete(&self, ctx: &mut C) -> Result<(), PipelineError>;
}

/// Cursor over the behaviors that have not run yet.
///
/// `run` takes the cursor by value, so a behavior cannot continue twice.
pub struct Next<'a, C: Send + 'static> {
    remaining: &'a [Arc<dyn Behavior<C>>],
    terminal: &'a dyn Terminal<C>,
}

impl<'a, C: Send + 'static> Next<'a, C> {
    /// Number of behaviors still ahead of the terminal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }

    /// Runs the next behavior, or the terminal when none remain.
    ///
    /// # Errors
    ///
    /// Propagates the first error raised downstream.
    pub async fn run(self, ctx: &mut C) -> Result<(), PipelineError> {
        match self.remaining.split_first() {
            Some((behavior, rest)) => {
                behavior
                    .invoke(
                        ctx,
                        Next {
                            remaining: rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => self.terminal.complete(ctx).await,
        }
    }
}

/// Behaviors of one context type in resolved order plus the stage terminal.
pub struct Stage<C: Send + 'static> {
    behaviors: Vec<Arc<dyn Behavior<C>>>,
    terminal: Arc<dyn Terminal<C>>,
}

impl<C: Send + 'static> Stage<C> {
    #[must_use]
    pub fn new(behaviors: Vec<Arc<dyn Behavior<C>>>, terminal: Arc<dyn Terminal<C>>) -> Self {
        Self {
            behaviors,
            terminal,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }

    /// Runs the stage from its first behavior.
    ///
    /// # Errors
    ///
    /// Propagates the first error raised by a behavior or the terminal.
    pub async fn invoke(&self, ctx: &mut C) -> Result<(), PipelineError> {
        Next {
            remaining: &self.behaviors,
            terminal: self.terminal.as_ref(),
        }
        .run(ctx)
        .await
    }
}

#[async_trait]
impl<C: Send + 'static> Terminal<C> for Stage<C> {
    async fn complete(&self, ctx: &mut C) -> Result<(), PipelineError> {
        self.invoke(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        log: Vec<String>,
    }

    struct Record(&'static str);

    #[async_trait]
    impl Behavior<Trace> for Record {
        async fn invoke(&self, ctx: &mut Trace, next: Next<'_, Trace>) -> Result<(), PipelineError> {
            ctx.log.push(format!("enter {}", self.0));
            let result = next.run(ctx).await;
            ctx.log.push(format!("leave {}", self.0));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Behavior<Trace> for ShortCircuit {
        async fn invoke(&self, ctx: &mut Trace, _next: Next<'_, Trace>) -> Result<(), PipelineError> {
            ctx.log.push("stop".to_string());
            Ok(())
        }
    }

    struct Fail;

    #[async_trait]
    impl Behavior<Trace> for Fail {
        async fn invoke(&self, _ctx: &mut Trace, _next: Next<'_, Trace>) -> Result<(), PipelineError> {
            Err(anyhow::anyhow!("boom").into())
        }
    }

    struct Wrap;

    #[async_trait]
    impl Behavior<Trace> for Wrap {
        async fn invoke(&self, ctx: &mut Trace, next: Next<'_, Trace>) -> Result<(), PipelineError> {
            next.run(ctx).await.map_err(|e| {
                PipelineError::Processing(anyhow::anyhow!("wrapped: {e}"))
            })
        }
    }

    struct End;

    #[async_trait]
    impl Terminal<Trace> for End {
        async fn complete(&self, ctx: &mut Trace) -> Result<(), PipelineError> {
            ctx.log.push("terminal".to_string());
            Ok(())
        }
    }

    fn stage(behaviors: Vec<Arc<dyn Behavior<Trace>>>) -> Stage<Trace> {
        Stage::new(behaviors, Arc::new(End))
    }

    #[tokio::test]
    async fn runs_front_to_back_then_unwinds() {
        let s = stage(vec![Arc::new(Record("a")), Arc::new(Record("b"))]);
        let mut ctx = Trace::default();
        s.invoke(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.log,
            vec!["enter a", "enter b", "terminal", "leave b", "leave a"]
        );
    }

    #[tokio::test]
    async fn not_calling_next_short_circuits() {
        let s = stage(vec![
            Arc::new(Record("a")),
            Arc::new(ShortCircuit),
            Arc::new(Record("never")),
        ]);
        let mut ctx = Trace::default();
        s.invoke(&mut ctx).await.unwrap();
        assert_eq!(ctx.log, vec!["enter a", "stop", "leave a"]);
    }

    #[tokio::test]
    async fn failures_propagate_through_enclosing_steps() {
        let s = stage(vec![Arc::new(Wrap), Arc::new(Record("a")), Arc::new(Fail)]);
        let mut ctx = Trace::default();
        let err = s.invoke(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "processing failed: wrapped: processing failed: boom");
        assert_eq!(ctx.log, vec!["enter a", "leave a"]);
    }

    #[tokio::test]
    async fn empty_stage_runs_terminal() {
        let s = stage(Vec::new());
        assert!(s.is_empty());
        let mut ctx = Trace::default();
        s.invoke(&mut ctx).await.unwrap();
        assert_eq!(ctx.log, vec!["terminal"]);
    }

    #[tokio::test]
    async fn stages_nest_as_terminals() {
        let inner: Arc<dyn Terminal<Trace>> = Arc::new(stage(vec![Arc::new(Record("inner"))]));
        let outer = Stage::new(vec![Arc::new(Record("outer")) as Arc<dyn Behavior<Trace>>], inner);
        let mut ctx = Trace::default();
        outer.invoke(&mut ctx).await.unwrap();
        assert_eq!(
            ctx.log,
            vec!["enter outer", "enter inner", "terminal", "leave inner", "leave outer"]
        );
    }
}
