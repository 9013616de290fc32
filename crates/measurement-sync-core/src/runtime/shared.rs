// crates/measurement-sync-core/src/runtime/shared.rs
// ============================================================================
// Module: Shared Reconciler Core
// Description: Context, definitions, readiness, and catalog subscription shared by units.
// Purpose: Coordinate reloads and apply passes for one or many reconciliation units.
// Dependencies: crate::{core, interfaces, runtime}, tokio, tokio-stream
// ============================================================================

//! ## Overview
//! [`SharedCore`] is the single coordinator behind both reconciler flavors.
//! It owns the context, the current definition set, the readiness machine, and
//! the catalog subscription, and drives a collection of units through the
//! [`UnitSet`] seam: one unit for the entity flavor, one per row for the
//! tabular flavor.
//!
//! A reload starts when the resolved context differs by value from the last
//! one loaded. Each reload bumps a generation counter; catalog emissions for
//! an older generation or another context are discarded. Every state change
//! happens under one mutex, so observers see either the schema before a
//! rebuild or the one after, never a partial build.
//!
//! Catalog failures collapse every schema to the meta field, log the error,
//! and hold readiness below `Ready` until a later successful load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::core::Context;
use crate::core::ContextKey;
use crate::core::ContextPatch;
use crate::core::DefinitionError;
use crate::core::DefinitionSet;
use crate::core::FieldDefinition;
use crate::core::FieldId;
use crate::core::MeasuredEntity;
use crate::core::ResolvedContext;
use crate::core::RowId;
use crate::interfaces::CatalogError;
use crate::interfaces::CatalogResolver;
use crate::interfaces::DefinitionMapper;
use crate::interfaces::DefinitionStream;
use crate::interfaces::ValidatorFactory;
use crate::runtime::lifecycle::Lifecycle;
use crate::runtime::log::EngineLogEvent;
use crate::runtime::log::EngineLogEventParams;
use crate::runtime::log::EngineLogSink;
use crate::runtime::log::LogLevel;
use crate::runtime::log::TracingLogSink;
use crate::runtime::normalizer::ExtractionOptions;
use crate::runtime::readiness::Readiness;
use crate::runtime::readiness::ReadinessStep;
use crate::runtime::readiness::Stopped;
use crate::runtime::rows::Column;
use crate::runtime::schema::SchemaBuilder;
use crate::runtime::schema::SchemaError;
use crate::runtime::schema::SchemaOptions;
use crate::runtime::unit::ReconciliationUnit;
use crate::runtime::validator::DefaultValidatorFactory;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capacity of the engine event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reconciler errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// No tokio runtime was available at construction.
    #[error("reconciler requires a tokio runtime: {0}")]
    Runtime(String),
    /// Shared state is unusable.
    #[error("reconciler state error: {0}")]
    State(String),
    /// The reconciler was stopped.
    #[error("reconciler stopped")]
    Stopped,
    /// The row does not exist.
    #[error("unknown row: {0}")]
    UnknownRow(RowId),
    /// Another row already uses the rank order.
    #[error("rank order {0} is already used by another row")]
    DuplicateRank(u32),
    /// No rank order is left above the highest one in use.
    #[error("no rank order left above the highest row")]
    RankExhausted,
    /// A schema operation failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<Stopped> for ReconcileError {
    fn from(_: Stopped) -> Self {
        Self::Stopped
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Notifications broadcast to reconciler subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A definition load started for a context.
    ReloadScheduled {
        /// Catalog key being loaded.
        key: ContextKey,
    },
    /// New definitions were applied to every schema.
    DefinitionsChanged {
        /// Catalog key the definitions belong to.
        key: ContextKey,
        /// Number of definitions.
        fields: usize,
    },
    /// The catalog failed; schemas collapsed to the meta field.
    DefinitionsFailed {
        /// Catalog key that failed.
        key: ContextKey,
        /// Failure message.
        message: String,
    },
    /// The table columns changed.
    ColumnsChanged {
        /// New columns.
        columns: Vec<Column>,
    },
    /// Readiness reached `Ready`.
    Ready,
    /// Readiness left `Ready`.
    NotReady,
    /// The context became unresolvable and the definitions were discarded.
    ContextReset,
    /// The reconciler stopped.
    Stopped,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Collaborators consumed by a reconciler.
#[derive(Clone)]
pub struct Collaborators {
    /// Definition catalog.
    pub catalog: Arc<dyn CatalogResolver>,
    /// Validator factory.
    pub validators: Arc<dyn ValidatorFactory>,
    /// Optional definition rewrite hook.
    pub mapper: Option<Arc<dyn DefinitionMapper>>,
    /// Log sink.
    pub sink: Arc<dyn EngineLogSink>,
}

impl Collaborators {
    /// Creates collaborators with default validators and tracing logs.
    #[must_use]
    pub fn new(catalog: Arc<dyn CatalogResolver>) -> Self {
        Self {
            catalog,
            validators: Arc::new(DefaultValidatorFactory),
            mapper: None,
            sink: Arc::new(TracingLogSink),
        }
    }

    /// Replaces the validator factory.
    #[must_use]
    pub fn with_validators(mut self, validators: Arc<dyn ValidatorFactory>) -> Self {
        self.validators = validators;
        self
    }

    /// Sets the definition rewrite hook.
    #[must_use]
    pub fn with_mapper(mut self, mapper: Arc<dyn DefinitionMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Replaces the log sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EngineLogSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("has_mapper", &self.mapper.is_some())
            .finish_non_exhaustive()
    }
}

/// Reconciler behavior options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Context the reconciler starts with.
    pub context: Context,
    /// Fields that keep their requirement under force-optional.
    pub force_optional_excluded: BTreeSet<FieldId>,
    /// Extraction filter.
    pub extraction: ExtractionOptions,
    /// Schema options.
    pub schema: SchemaOptions,
}

// ============================================================================
// SECTION: Unit Sets
// ============================================================================

/// Collection of units driven by a [`SharedCore`].
pub(crate) trait UnitSet: Send + 'static {
    /// Entity held by each unit.
    type Entity: MeasuredEntity;
    /// Key addressing one unit.
    type Key: Copy + Send + Sync + 'static;

    /// Visits every unit with its row id, if any.
    fn for_each_unit(
        &mut self,
        visit: &mut dyn FnMut(Option<RowId>, &mut ReconciliationUnit<Self::Entity>),
    );

    /// Returns one unit.
    fn unit_mut(
        &mut self,
        key: Self::Key,
    ) -> Result<&mut ReconciliationUnit<Self::Entity>, ReconcileError>;

    /// Reacts to newly applied definitions, optionally returning an event.
    fn definitions_changed(&mut self, _definitions: &DefinitionSet) -> Option<EngineEvent> {
        None
    }

    /// Reacts to definitions being dropped after a catalog failure.
    fn definitions_failed(&mut self) {}
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable state guarded by the core mutex.
pub(crate) struct CoreState<U> {
    /// Current context.
    pub(crate) context: Context,
    /// Context the current definitions were requested for.
    pub(crate) last_resolved: Option<ResolvedContext>,
    /// Applied definitions; `None` before the first load or after a failure.
    pub(crate) definitions: Option<DefinitionSet>,
    /// Reload generation; emissions for older generations are discarded.
    generation: u64,
    /// Live catalog subscription.
    subscription: Option<JoinHandle<()>>,
    /// Whether the owner asked for definitions to load.
    ready_requested: bool,
    /// Next entity sequence number.
    next_seq: u64,
    /// Driven units.
    pub(crate) units: U,
}

impl<U> CoreState<U> {
    /// Allocates an entity sequence number.
    pub(crate) const fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    /// Returns true when an emission belongs to the live reload.
    fn is_current(&self, generation: u64, context: &ResolvedContext) -> bool {
        self.generation == generation && self.last_resolved.as_ref() == Some(context)
    }
}

/// Shared, immutable parts of the core.
struct CoreInner<U> {
    /// Guarded state.
    state: Mutex<CoreState<U>>,
    /// Readiness machine.
    readiness: Readiness,
    /// Stop signal.
    lifecycle: Lifecycle,
    /// Runtime used to spawn catalog subscriptions.
    runtime: Handle,
    /// Collaborators.
    collaborators: Collaborators,
    /// Schema builder.
    builder: SchemaBuilder,
    /// Event broadcast.
    events: broadcast::Sender<EngineEvent>,
    /// Options.
    options: ReconcilerOptions,
}

// ============================================================================
// SECTION: Apply Tickets
// ============================================================================

/// Final result of an apply request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entity's values were applied.
    Applied,
    /// A later apply replaced the entity before it could be applied.
    Superseded,
}

/// Settles a pending apply once readiness allows.
type Settle = Box<dyn Fn(u64) -> Result<Option<ApplyOutcome>, ReconcileError> + Send + Sync>;

/// Handle on an apply request.
///
/// Dropping the ticket does not cancel the apply; the reconciler applies the
/// held entity on its own once ready.
pub struct ApplyTicket {
    /// Sequence number of the applied entity.
    seq: u64,
    /// Outcome known at creation.
    immediate: Option<ApplyOutcome>,
    /// Readiness to wait on.
    readiness: Readiness,
    /// Stop signal to observe.
    lifecycle: Lifecycle,
    /// Settlement callback.
    settle: Settle,
}

impl fmt::Debug for ApplyTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyTicket")
            .field("seq", &self.seq)
            .field("immediate", &self.immediate)
            .finish_non_exhaustive()
    }
}

impl ApplyTicket {
    /// Returns true when the apply completed at request time.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.immediate.is_some()
    }

    /// Waits for the apply to land or be superseded.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Stopped`] when the reconciler stops first,
    /// or another [`ReconcileError`] when the unit cannot take values.
    pub async fn outcome(self) -> Result<ApplyOutcome, ReconcileError> {
        if let Some(outcome) = self.immediate {
            return Ok(outcome);
        }
        loop {
            self.readiness.wait_until_ready(&self.lifecycle).await?;
            if let Some(outcome) = (self.settle)(self.seq)? {
                return Ok(outcome);
            }
        }
    }
}

// ============================================================================
// SECTION: Shared Core
// ============================================================================

/// Coordinator shared by the reconciler flavors.
pub(crate) struct SharedCore<U> {
    /// Shared parts.
    inner: Arc<CoreInner<U>>,
}

impl<U> Clone for SharedCore<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: UnitSet> SharedCore<U> {
    /// Creates a core; units are built with the core's schema builder.
    pub(crate) fn new(
        collaborators: Collaborators,
        options: ReconcilerOptions,
        units: impl FnOnce(&SchemaBuilder) -> U,
    ) -> Result<Self, ReconcileError> {
        let runtime =
            Handle::try_current().map_err(|err| ReconcileError::Runtime(err.to_string()))?;
        let builder = SchemaBuilder::new(Arc::clone(&collaborators.validators), options.schema);
        let units = units(&builder);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = CoreState {
            context: options.context.clone(),
            last_resolved: None,
            definitions: None,
            generation: 0,
            subscription: None,
            ready_requested: false,
            next_seq: 0,
            units,
        };
        Ok(Self {
            inner: Arc::new(CoreInner {
                state: Mutex::new(state),
                readiness: Readiness::new(),
                lifecycle: Lifecycle::new(),
                runtime,
                collaborators,
                builder,
                events,
                options,
            }),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Locks the shared state.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, CoreState<U>>, ReconcileError> {
        self.inner
            .state
            .lock()
            .map_err(|_| ReconcileError::State("reconciler mutex poisoned".to_string()))
    }

    /// Returns the readiness machine.
    pub(crate) fn readiness(&self) -> &Readiness {
        &self.inner.readiness
    }

    /// Returns the schema builder.
    pub(crate) fn builder(&self) -> &SchemaBuilder {
        &self.inner.builder
    }

    /// Returns the options.
    pub(crate) fn options(&self) -> &ReconcilerOptions {
        &self.inner.options
    }

    /// Subscribes to engine events.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Waits until ready or stopped.
    pub(crate) async fn wait_until_ready(&self) -> Result<(), ReconcileError> {
        self.inner.readiness.wait_until_ready(&self.inner.lifecycle).await?;
        Ok(())
    }

    /// Returns true once stopped.
    pub(crate) fn is_stopped(&self) -> bool {
        self.inner.lifecycle.is_stopped()
    }

    /// Fails with [`ReconcileError::Stopped`] once stopped.
    pub(crate) fn ensure_running(&self) -> Result<(), ReconcileError> {
        if self.is_stopped() { Err(ReconcileError::Stopped) } else { Ok(()) }
    }

    /// Records a log event.
    pub(crate) fn log(
        &self,
        level: LogLevel,
        event: &'static str,
        context_key: Option<&ContextKey>,
        row: Option<RowId>,
        message: impl Into<String>,
    ) {
        self.inner.collaborators.sink.record(&EngineLogEvent::new(EngineLogEventParams {
            event,
            level,
            context_key: context_key.cloned(),
            row,
            message: message.into(),
        }));
    }

    /// Broadcasts an event; having no subscribers is fine.
    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Runs a readiness transition and broadcasts ready edges.
    fn transition(&self, change: impl FnOnce(&Readiness) -> bool) {
        let readiness = &self.inner.readiness;
        let was_ready = readiness.is_ready();
        if change(readiness) {
            let now_ready = readiness.is_ready();
            if now_ready && !was_ready {
                self.emit(EngineEvent::Ready);
            } else if was_ready && !now_ready {
                self.emit(EngineEvent::NotReady);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------------

    /// Merges a context patch and schedules a reload or reset as needed.
    pub(crate) fn set_context_locked(&self, state: &mut CoreState<U>, patch: ContextPatch) {
        if !state.context.apply(patch) {
            return;
        }
        match state.context.resolve() {
            Some(resolved) => {
                if state.ready_requested && state.last_resolved.as_ref() != Some(&resolved) {
                    self.start_load(state, resolved);
                }
            }
            None => {
                if state.last_resolved.is_some() {
                    self.reset(state);
                }
            }
        }
    }

    /// Marks readiness as requested and loads definitions if none are pending.
    pub(crate) fn request_ready(&self) -> Result<(), ReconcileError> {
        self.ensure_running()?;
        let mut state = self.lock()?;
        state.ready_requested = true;
        let Some(resolved) = state.context.resolve() else {
            return Ok(());
        };
        let idle = state.subscription.is_none() && state.definitions.is_none();
        if self.inner.readiness.step() == ReadinessStep::Starting || idle {
            self.start_load(&mut state, resolved);
        }
        Ok(())
    }

    /// Starts a definition load for a resolved context.
    fn start_load(&self, state: &mut CoreState<U>, resolved: ResolvedContext) {
        if self.is_stopped() {
            return;
        }
        if let Some(previous) = state.subscription.take() {
            previous.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let key = resolved.key();
        state.last_resolved = Some(resolved.clone());
        self.transition(|readiness| readiness.begin_cycle(ReadinessStep::LoadingDefinitions));
        self.log(
            LogLevel::Debug,
            "reload_scheduled",
            Some(&key),
            None,
            format!("loading definitions (generation {generation})"),
        );
        self.emit(EngineEvent::ReloadScheduled {
            key,
        });
        let stream = self.inner.collaborators.catalog.resolve(&resolved);
        let core = self.clone();
        let handle = self.inner.runtime.spawn(async move {
            core.consume(generation, resolved, stream).await;
        });
        state.subscription = Some(handle);
    }

    /// Discards definitions after the context became unresolvable.
    fn reset(&self, state: &mut CoreState<U>) {
        if let Some(subscription) = state.subscription.take() {
            subscription.abort();
        }
        state.generation += 1;
        let previous = state.last_resolved.take().map(|resolved| resolved.key());
        state.definitions = None;
        let builder = &self.inner.builder;
        state.units.for_each_unit(&mut |_, unit| unit.clear(builder));
        self.transition(Readiness::reset);
        self.log(
            LogLevel::Info,
            "context_reset",
            previous.as_ref(),
            None,
            "context became unresolvable; definitions discarded",
        );
        self.emit(EngineEvent::ContextReset);
    }

    /// Drops held entities and definitions, keeping the context.
    ///
    /// The next ready request loads definitions again.
    pub(crate) fn unload(&self, state: &mut CoreState<U>) {
        if let Some(subscription) = state.subscription.take() {
            subscription.abort();
        }
        state.generation += 1;
        let previous = state.last_resolved.take().map(|resolved| resolved.key());
        state.definitions = None;
        let builder = &self.inner.builder;
        state.units.for_each_unit(&mut |_, unit| {
            *unit = ReconciliationUnit::new(builder.empty_schema());
        });
        self.transition(Readiness::reset);
        self.log(
            LogLevel::Info,
            "unloaded",
            previous.as_ref(),
            None,
            "held entities and definitions dropped",
        );
    }

    // ------------------------------------------------------------------------
    // Catalog Subscription
    // ------------------------------------------------------------------------

    /// Consumes catalog emissions until the stream ends, fails, or stops.
    async fn consume(self, generation: u64, resolved: ResolvedContext, mut stream: DefinitionStream) {
        let lifecycle = self.inner.lifecycle.clone();
        loop {
            let item = tokio::select! {
                () = lifecycle.stopped() => break,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(definitions)) => self.on_definitions(generation, &resolved, definitions),
                Some(Err(err)) => {
                    self.on_catalog_error(generation, &resolved, &err);
                    break;
                }
                None => break,
            }
        }
        if let Ok(mut state) = self.lock()
            && state.generation == generation
        {
            state.subscription = None;
        }
    }

    /// Applies one catalog emission.
    fn on_definitions(
        &self,
        generation: u64,
        resolved: &ResolvedContext,
        definitions: Vec<FieldDefinition>,
    ) {
        let key = resolved.key();
        let Ok(mut state) = self.lock() else {
            return;
        };
        if self.is_stopped() {
            return;
        }
        if !state.is_current(generation, resolved) {
            self.log(
                LogLevel::Debug,
                "stale_definitions_discarded",
                Some(&key),
                None,
                format!("discarding definitions from generation {generation}"),
            );
            return;
        }
        let definitions = match self.prepare(resolved, definitions) {
            Ok(definitions) => definitions,
            Err(err) => {
                self.fail(&mut state, &key, &err.to_string());
                return;
            }
        };
        if state.definitions.as_ref() == Some(&definitions) {
            if !self.inner.readiness.is_ready() {
                self.transition(|readiness| readiness.advance(ReadinessStep::Ready));
                apply_all(&mut state);
            }
            self.log(
                LogLevel::Debug,
                "definitions_unchanged",
                Some(&key),
                None,
                "equivalent definitions ignored",
            );
            return;
        }
        self.transition(|readiness| readiness.begin_cycle(ReadinessStep::SettingDefinitions));
        if let Some(current) = state.definitions.clone() {
            let extraction = self.inner.options.extraction;
            state.units.for_each_unit(&mut |_, unit| unit.capture_edits(&current, extraction));
        }
        self.transition(|readiness| readiness.advance(ReadinessStep::UpdatingSchema));
        let builder = &self.inner.builder;
        let mut failures = Vec::new();
        state.units.for_each_unit(&mut |row, unit| {
            if let Err(err) = unit.rebuild(builder, &definitions) {
                failures.push((row, err));
            }
        });
        for (row, err) in failures {
            self.log(LogLevel::Error, "schema_rebuild_failed", Some(&key), row, err.to_string());
        }
        let fields = definitions.len();
        let columns = state.units.definitions_changed(&definitions);
        state.definitions = Some(definitions);
        self.transition(|readiness| readiness.advance(ReadinessStep::Ready));
        apply_all(&mut state);
        self.log(
            LogLevel::Info,
            "definitions_applied",
            Some(&key),
            None,
            format!("{fields} field definition(s) applied"),
        );
        self.emit(EngineEvent::DefinitionsChanged {
            key,
            fields,
        });
        if let Some(event) = columns {
            self.emit(event);
        }
    }

    /// Relaxes requirements, runs the mapper, and validates the set.
    fn prepare(
        &self,
        resolved: &ResolvedContext,
        definitions: Vec<FieldDefinition>,
    ) -> Result<DefinitionSet, DefinitionError> {
        let mut set = DefinitionSet::new(definitions)?;
        if resolved.force_optional() {
            set = set.with_forced_optional(&self.inner.options.force_optional_excluded);
        }
        match &self.inner.collaborators.mapper {
            Some(mapper) => DefinitionSet::new(mapper.map(resolved, set.into_vec())),
            None => Ok(set),
        }
    }

    /// Handles a catalog failure for the live reload.
    fn on_catalog_error(&self, generation: u64, resolved: &ResolvedContext, err: &CatalogError) {
        let key = resolved.key();
        let Ok(mut state) = self.lock() else {
            return;
        };
        if !state.is_current(generation, resolved) {
            self.log(LogLevel::Debug, "stale_failure_discarded", Some(&key), None, err.to_string());
            return;
        }
        self.fail(&mut state, &key, &err.to_string());
    }

    /// Collapses every schema and holds readiness below `Ready`.
    fn fail(&self, state: &mut CoreState<U>, key: &ContextKey, message: &str) {
        self.log(LogLevel::Error, "definitions_failed", Some(key), None, message);
        self.transition(|readiness| readiness.begin_cycle(ReadinessStep::LoadingDefinitions));
        state.definitions = None;
        let builder = &self.inner.builder;
        let empty = DefinitionSet::empty();
        state.units.for_each_unit(&mut |_, unit| {
            if unit.rebuild(builder, &empty).is_ok() {
                unit.schema_mut().enable();
            }
        });
        state.units.definitions_failed();
        if let Some(subscription) = state.subscription.take() {
            subscription.abort();
        }
        self.emit(EngineEvent::DefinitionsFailed {
            key: key.clone(),
            message: message.to_string(),
        });
    }

    // ------------------------------------------------------------------------
    // Applying Entities
    // ------------------------------------------------------------------------

    /// Hands an entity to a unit, applying it now when ready.
    pub(crate) fn hold(
        &self,
        state: &mut CoreState<U>,
        key: U::Key,
        entity: Arc<U::Entity>,
    ) -> Result<ApplyTicket, ReconcileError> {
        let seq = state.next_seq();
        let ready = self.inner.readiness.is_ready();
        let CoreState {
            definitions,
            units,
            ..
        } = state;
        let unit = units.unit_mut(key)?;
        unit.hold(entity, seq);
        let mut immediate = None;
        if ready && let Some(definitions) = definitions.as_ref() {
            unit.apply_pending(definitions);
            if unit.is_applied(seq) {
                immediate = Some(ApplyOutcome::Applied);
            }
        }
        Ok(self.ticket(key, seq, immediate))
    }

    /// Builds a ticket for an apply request.
    fn ticket(&self, key: U::Key, seq: u64, immediate: Option<ApplyOutcome>) -> ApplyTicket {
        let core = self.clone();
        ApplyTicket {
            seq,
            immediate,
            readiness: self.inner.readiness.clone(),
            lifecycle: self.inner.lifecycle.clone(),
            settle: Box::new(move |seq| core.settle(key, seq)),
        }
    }

    /// Settles a deferred apply; `None` means readiness regressed meanwhile.
    fn settle(&self, key: U::Key, seq: u64) -> Result<Option<ApplyOutcome>, ReconcileError> {
        self.ensure_running()?;
        let mut state = self.lock()?;
        if !self.inner.readiness.is_ready() {
            return Ok(None);
        }
        let CoreState {
            definitions,
            units,
            ..
        } = &mut *state;
        let unit = units.unit_mut(key)?;
        if unit.held_seq() != Some(seq) {
            self.log(
                LogLevel::Debug,
                "apply_superseded",
                None,
                None,
                format!("apply {seq} superseded by a later apply"),
            );
            return Ok(Some(ApplyOutcome::Superseded));
        }
        let Some(definitions) = definitions.as_ref() else {
            return Ok(None);
        };
        unit.apply_pending(definitions);
        if unit.is_applied(seq) {
            Ok(Some(ApplyOutcome::Applied))
        } else {
            Err(ReconcileError::Schema(SchemaError::Disabled))
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stops the core: ends the subscription and releases waiters.
    pub(crate) fn stop(&self) {
        if !self.inner.lifecycle.stop() {
            return;
        }
        if let Ok(mut state) = self.inner.state.lock()
            && let Some(subscription) = state.subscription.take()
        {
            subscription.abort();
        }
        self.log(LogLevel::Info, "reconciler_stopped", None, None, "reconciler stopped");
        self.emit(EngineEvent::Stopped);
    }
}

/// Applies pending entities to every unit and enables their schemas.
fn apply_all<U: UnitSet>(state: &mut CoreState<U>) {
    let CoreState {
        definitions,
        units,
        ..
    } = state;
    if let Some(definitions) = definitions.as_ref() {
        units.for_each_unit(&mut |_, unit| unit.apply_pending(definitions));
    }
}
