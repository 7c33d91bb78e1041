//! Step registration, replacement, and resolution into per-stage behavior lists.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use courier_core::{resolve_order, Dependency, OrderedStep};
use tracing::debug;

use super::behavior::Behavior;
use super::context::stage_name;
use crate::error::ConfigurationError;

type ErasedFactory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

/// Behavior factory with the context type it is bound to erased.
#[derive(Clone)]
struct BehaviorFactory {
    context: TypeId,
    context_name: &'static str,
    build: ErasedFactory,
}

impl BehaviorFactory {
    fn new<C, F>(factory: F) -> Self
    where
        C: Send + 'static,
        F: Fn() -> Arc<dyn Behavior<C>> + Send + Sync + 'static,
    {
        Self {
            context: TypeId::of::<C>(),
            context_name: short_type_name::<C>(),
            build: Arc::new(move || Box::new(factory()) as Box<dyn Any + Send>),
        }
    }

    fn from_instance<C, B>(behavior: B) -> Self
    where
        C: Send + 'static,
        B: Behavior<C> + 'static,
    {
        let shared: Arc<dyn Behavior<C>> = Arc::new(behavior);
        Self::new::<C, _>(move || Arc::clone(&shared))
    }

    fn build<C: Send + 'static>(&self) -> Option<Arc<dyn Behavior<C>>> {
        (self.build)()
            .downcast::<Arc<dyn Behavior<C>>>()
            .ok()
            .map(|boxed| *boxed)
    }
}

fn short_type_name<T>() -> &'static str {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

// ---------------------------------------------------------------------------
// StepRegistration
// ---------------------------------------------------------------------------

/// A registered pipeline step: id, description, ordering constraints, and the
/// factory producing its behavior.
#[derive(Clone)]
pub struct StepRegistration {
    id: String,
    description: String,
    dependencies: Vec<Dependency>,
    factory: BehaviorFactory,
}

impl StepRegistration {
    /// Creates a step sharing one behavior instance across every build.
    pub fn new<C, B>(id: impl Into<String>, behavior: B, description: impl Into<String>) -> Self
    where
        C: Send + 'static,
        B: Behavior<C> + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: Vec::new(),
            factory: BehaviorFactory::from_instance::<C, B>(behavior),
        }
    }

    /// Creates a step whose behavior is produced by `factory` at build time.
    pub fn with_factory<C, F>(
        id: impl Into<String>,
        factory: F,
        description: impl Into<String>,
    ) -> Self
    where
        C: Send + 'static,
        F: Fn() -> Arc<dyn Behavior<C>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: Vec::new(),
            factory: BehaviorFactory::new::<C, F>(factory),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Name of the context type this step is bound to.
    #[must_use]
    pub fn context_name(&self) -> &'static str {
        self.factory.context_name
    }

    /// Requires this step to run before `target`, which must exist.
    pub fn insert_before(&mut self, target: impl Into<String>) -> &mut Self {
        self.dependencies.push(Dependency::before(target, true));
        self
    }

    /// Requires this step to run after `target`, which must exist.
    pub fn insert_after(&mut self, target: impl Into<String>) -> &mut Self {
        self.dependencies.push(Dependency::after(target, true));
        self
    }

    /// Runs before `target` when it is registered; ignored otherwise.
    pub fn insert_before_if_exists(&mut self, target: impl Into<String>) -> &mut Self {
        self.dependencies.push(Dependency::before(target, false));
        self
    }

    /// Runs after `target` when it is registered; ignored otherwise.
    pub fn insert_after_if_exists(&mut self, target: impl Into<String>) -> &mut Self {
        self.dependencies.push(Dependency::after(target, false));
        self
    }

    /// Swaps in the replacement's behavior and, when non-blank, its
    /// description. Id and ordering constraints are kept.
    ///
    /// # Errors
    ///
    /// Fails if the replacement targets another id or binds another context.
    pub fn replace(&mut self, replacement: StepReplacement) -> Result<(), ConfigurationError> {
        if replacement.id != self.id {
            return Err(ConfigurationError::ReplacementIdMismatch {
                existing: self.id.clone(),
                replacement: replacement.id,
            });
        }
        if replacement.factory.context != self.factory.context {
            return Err(ConfigurationError::ReplacementContextMismatch {
                step: self.id.clone(),
                expected: self.factory.context_name,
                actual: replacement.factory.context_name,
            });
        }
        self.factory = replacement.factory;
        if let Some(description) = replacement.description.filter(|d| !d.trim().is_empty()) {
            self.description = description;
        }
        Ok(())
    }
}

impl OrderedStep for StepRegistration {
    fn step_id(&self) -> &str {
        &self.id
    }

    fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }
}

impl fmt::Debug for StepRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistration")
            .field("id", &self.id)
            .field("context", &self.factory.context_name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// New behavior (and optional description) for an existing step.
pub struct StepReplacement {
    id: String,
    description: Option<String>,
    factory: BehaviorFactory,
}

impl StepReplacement {
    pub fn new<C, B>(id: impl Into<String>, behavior: B) -> Self
    where
        C: Send + 'static,
        B: Behavior<C> + 'static,
    {
        Self {
            id: id.into(),
            description: None,
            factory: BehaviorFactory::from_instance::<C, B>(behavior),
        }
    }

    pub fn with_factory<C, F>(id: impl Into<String>, factory: F) -> Self
    where
        C: Send + 'static,
        F: Fn() -> Arc<dyn Behavior<C>> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            description: None,
            factory: BehaviorFactory::new::<C, F>(factory),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ---------------------------------------------------------------------------
// PipelineSettings
// ---------------------------------------------------------------------------

/// Registration surface for pipeline steps.
#[derive(Debug, Default, Clone)]
pub struct PipelineSettings {
    steps: Vec<StepRegistration>,
}

impl PipelineSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a behavior instance bound to context `C`.
    pub fn register<C, B>(
        &mut self,
        id: impl Into<String>,
        behavior: B,
        description: impl Into<String>,
    ) -> &mut StepRegistration
    where
        C: Send + 'static,
        B: Behavior<C> + 'static,
    {
        self.add(StepRegistration::new(id, behavior, description))
    }

    /// Registers a behavior factory bound to context `C`.
    pub fn register_with_factory<C, F>(
        &mut self,
        id: impl Into<String>,
        factory: F,
        description: impl Into<String>,
    ) -> &mut StepRegistration
    where
        C: Send + 'static,
        F: Fn() -> Arc<dyn Behavior<C>> + Send + Sync + 'static,
    {
        self.add(StepRegistration::with_factory(id, factory, description))
    }

    /// Adds a prepared registration.
    pub fn add(&mut self, registration: StepRegistration) -> &mut StepRegistration {
        self.steps.push(registration);
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    /// Replaces the behavior of the step with the replacement's id.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::StepNotFound`] if no such step is
    /// registered, or the error of [`StepRegistration::replace`].
    pub fn replace(&mut self, replacement: StepReplacement) -> Result<(), ConfigurationError> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == replacement.id)
            .ok_or_else(|| ConfigurationError::StepNotFound(replacement.id.clone()))?;
        step.replace(replacement)
    }

    #[must_use]
    pub fn steps(&self) -> &[StepRegistration] {
        &self.steps
    }

    /// Orders `leading` followed by the registered steps and checks every step
    /// is bound to a pipeline stage.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] for graph errors or unknown stages.
    pub fn resolve(&self, leading: Vec<StepRegistration>) -> Result<ResolvedSteps, ConfigurationError> {
        let mut all = leading;
        all.extend(self.steps.iter().cloned());

        if let Some(stray) = all.iter().find(|s| stage_name(s.factory.context).is_none()) {
            return Err(ConfigurationError::UnknownStage {
                step: stray.id.clone(),
                context: stray.factory.context_name,
            });
        }

        let order = resolve_order(&all)?;
        let mut slots: Vec<Option<StepRegistration>> = all.into_iter().map(Some).collect();
        let ordered: Vec<StepRegistration> = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();
        debug!(
            steps = ?ordered.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "pipeline steps resolved"
        );
        Ok(ResolvedSteps { ordered })
    }
}

/// Steps in resolved order, ready to be split into stages.
#[derive(Debug)]
pub struct ResolvedSteps {
    ordered: Vec<StepRegistration>,
}

impl ResolvedSteps {
    /// Step ids in execution order across all stages.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.ordered.iter().map(|s| s.id.as_str()).collect()
    }

    /// Builds the behaviors bound to context `C`, in resolved order.
    #[must_use]
    pub fn behaviors<C: Send + 'static>(&self) -> Vec<Arc<dyn Behavior<C>>> {
        self.ordered
            .iter()
            .filter(|s| s.factory.context == TypeId::of::<C>())
            .filter_map(|s| s.factory.build::<C>())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use courier_core::GraphError;

    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::behavior::Next;
    use crate::pipeline::context::{IncomingLogicalContext, OutgoingLogicalContext};

    struct Noop;

    #[async_trait]
    impl Behavior<IncomingLogicalContext> for Noop {
        async fn invoke(
            &self,
            ctx: &mut IncomingLogicalContext,
            next: Next<'_, IncomingLogicalContext>,
        ) -> Result<(), PipelineError> {
            next.run(ctx).await
        }
    }

    struct OutgoingNoop;

    #[async_trait]
    impl Behavior<OutgoingLogicalContext> for OutgoingNoop {
        async fn invoke(
            &self,
            ctx: &mut OutgoingLogicalContext,
            next: Next<'_, OutgoingLogicalContext>,
        ) -> Result<(), PipelineError> {
            next.run(ctx).await
        }
    }

    struct NotAStage;

    struct Stray;

    #[async_trait]
    impl Behavior<NotAStage> for Stray {
        async fn invoke(&self, ctx: &mut NotAStage, next: Next<'_, NotAStage>) -> Result<(), PipelineError> {
            next.run(ctx).await
        }
    }

    fn settings() -> PipelineSettings {
        let mut s = PipelineSettings::new();
        s.register::<IncomingLogicalContext, _>("A", Noop, "first");
        s.register::<IncomingLogicalContext, _>("B", Noop, "second")
            .insert_before("A");
        s.register::<IncomingLogicalContext, _>("C", Noop, "third");
        s
    }

    #[test]
    fn resolves_constraints_and_registration_order() {
        let resolved = settings().resolve(Vec::new()).unwrap();
        assert_eq!(resolved.ids(), vec!["B", "A", "C"]);
        assert_eq!(resolved.behaviors::<IncomingLogicalContext>().len(), 3);
        assert!(resolved.behaviors::<OutgoingLogicalContext>().is_empty());
    }

    #[test]
    fn leading_steps_are_valid_targets() {
        let mut s = PipelineSettings::new();
        s.register::<OutgoingLogicalContext, _>("Mine", OutgoingNoop, "")
            .insert_after("Builtin");
        let builtin = StepRegistration::new::<OutgoingLogicalContext, _>("Builtin", OutgoingNoop, "");
        let resolved = s.resolve(vec![builtin]).unwrap();
        assert_eq!(resolved.ids(), vec!["Builtin", "Mine"]);
    }

    #[test]
    fn missing_required_target_is_a_configuration_error() {
        let mut s = PipelineSettings::new();
        s.register::<IncomingLogicalContext, _>("A", Noop, "")
            .insert_after("Ghost");
        let err = s.resolve(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::StepGraph(GraphError::MissingDependency { ref target, .. }) if target == "Ghost"
        ));
    }

    #[test]
    fn optional_missing_target_is_ignored() {
        let mut s = PipelineSettings::new();
        s.register::<IncomingLogicalContext, _>("A", Noop, "")
            .insert_after_if_exists("Ghost")
            .insert_before_if_exists("Phantom");
        assert_eq!(s.resolve(Vec::new()).unwrap().ids(), vec!["A"]);
    }

    #[test]
    fn step_on_unknown_context_is_rejected() {
        let mut s = settings();
        s.register::<NotAStage, _>("Stray", Stray, "");
        let err = s.resolve(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::UnknownStage { ref step, context: "NotAStage" } if step == "Stray"
        ));
    }

    #[test]
    fn replace_keeps_position_and_updates_description() {
        let mut s = settings();
        let before = s.resolve(Vec::new()).unwrap().ids().join(",");
        s.replace(StepReplacement::new::<IncomingLogicalContext, _>("A", Noop).description("patched"))
            .unwrap();
        let after = s.resolve(Vec::new()).unwrap().ids().join(",");
        assert_eq!(before, after);
        let a = s.steps().iter().find(|r| r.id() == "A").unwrap();
        assert_eq!(a.description(), "patched");
    }

    #[test]
    fn blank_replacement_description_keeps_existing() {
        let mut s = settings();
        s.replace(StepReplacement::new::<IncomingLogicalContext, _>("C", Noop).description("  "))
            .unwrap();
        assert_eq!(s.steps()[2].description(), "third");
    }

    #[test]
    fn replace_unknown_step_fails() {
        let mut s = settings();
        let err = s
            .replace(StepReplacement::new::<IncomingLogicalContext, _>("Z", Noop))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::StepNotFound(ref id) if id == "Z"));
    }

    #[test]
    fn replace_with_mismatched_id_fails() {
        let mut registration = StepRegistration::new::<IncomingLogicalContext, _>("A", Noop, "");
        let err = registration
            .replace(StepReplacement::new::<IncomingLogicalContext, _>("B", Noop))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ReplacementIdMismatch { .. }));
    }

    #[test]
    fn replace_with_other_context_fails() {
        let mut s = settings();
        let err = s
            .replace(StepReplacement::new::<OutgoingLogicalContext, _>("A", OutgoingNoop))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ReplacementContextMismatch { .. }));
    }

    #[test]
    fn factory_runs_once_per_build() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut s = PipelineSettings::new();
        s.register_with_factory::<IncomingLogicalContext, _>(
            "F",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Arc::new(Noop) as Arc<dyn Behavior<IncomingLogicalContext>>
            },
            "",
        );
        let resolved = s.resolve(Vec::new()).unwrap();
        let _ = resolved.behaviors::<IncomingLogicalContext>();
        let _ = resolved.behaviors::<IncomingLogicalContext>();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
