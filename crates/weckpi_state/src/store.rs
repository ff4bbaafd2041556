//! The state store.
//!
//! The store holds one value per declared field and is the only place
//! mutations may land. Every successful mutation emits a [`ChangeBatch`]
//! to the registered listeners:
//! - `set` emits a batch with one change
//! - `replace_all` emits a single batch covering every field
//!
//! Listeners are called synchronously, in registration order, after the
//! store has released its value lock. A listener may therefore read the
//! store or mutate it again; nested notifications are delivered before the
//! outer dispatch continues.
//!
//! Writing a mutation and dispatching its batch happen under one reentrant
//! mutation lock, so concurrent writers on different threads are delivered
//! in sequence order. [`StateStore::exclusive`] extends that lock over a
//! caller's critical section, for example an echo-suppressed apply.

use crate::error::{StateError, StateResult};
use crate::path::FieldPath;
use crate::schema::{FieldKind, Schema};
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// How a batch came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A single field was replaced.
    Set,
    /// The whole tree was replaced from a snapshot.
    ReplaceAll,
}

/// A single field's new value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// The field that changed.
    pub path: FieldPath,
    /// Its new value.
    pub value: Value,
}

/// One change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    /// Monotonic mutation counter of the store.
    pub sequence: u64,
    /// What kind of mutation produced the batch.
    pub kind: ChangeKind,
    /// The affected fields, in schema order for `ReplaceAll`.
    pub changes: Vec<FieldChange>,
}

/// Callback invoked for every change batch.
pub type ChangeListener = Arc<dyn Fn(&ChangeBatch) + Send + Sync>;

/// Handle returned by [`StateStore::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Outcome of applying a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotReport {
    /// Fields absent from the snapshot that fell back to their default.
    pub defaulted: Vec<FieldPath>,
    /// Snapshot keys that are not part of the schema (dotted form).
    pub unknown: Vec<String>,
}

/// The canonical in-memory copy of the synchronized tree.
pub struct StateStore {
    schema: Arc<Schema>,
    values: RwLock<Vec<Value>>,
    listeners: RwLock<Vec<(ListenerId, ChangeListener)>>,
    sequence: AtomicU64,
    next_listener: AtomicU64,
    mutation: ReentrantMutex<()>,
}

impl StateStore {
    /// Creates a store holding every field's default.
    pub fn new(schema: Schema) -> Self {
        let values = schema.fields().map(|f| f.default.clone()).collect();
        Self {
            schema: Arc::new(schema),
            values: RwLock::new(values),
            listeners: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            next_listener: AtomicU64::new(1),
            mutation: ReentrantMutex::new(()),
        }
    }

    /// Returns the schema of the tree.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the number of mutations applied so far.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Reads the current value of a field.
    pub fn get(&self, path: &FieldPath) -> StateResult<Value> {
        let position = self
            .schema
            .position(path)
            .ok_or_else(|| StateError::unknown_field(path))?;
        Ok(self.values.read()[position].clone())
    }

    /// Parses `path` and reads the field.
    pub fn get_str(&self, path: &str) -> StateResult<Value> {
        self.get(&FieldPath::parse(path)?)
    }

    /// Runs `f` while holding the mutation lock.
    ///
    /// Mutations from other threads wait until `f` returns; mutations made
    /// by `f` itself, or by listeners it triggers, proceed.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _mutation = self.mutation.lock();
        f()
    }

    /// Replaces the value of a single field.
    ///
    /// Fails with [`StateError::UnknownField`], [`StateError::TypeMismatch`]
    /// or [`StateError::InvalidValue`] without mutating anything.
    pub fn set(&self, path: &FieldPath, value: Value) -> StateResult<()> {
        let position = self
            .schema
            .position(path)
            .ok_or_else(|| StateError::unknown_field(path))?;
        if let Some(spec) = self.schema.field_at(position) {
            spec.check(&value)?;
        }

        let _mutation = self.mutation.lock();
        let sequence = {
            let mut values = self.values.write();
            values[position] = value.clone();
            self.sequence.fetch_add(1, Ordering::SeqCst) + 1
        };

        trace!(path = %path, sequence, "field set");
        self.dispatch(ChangeBatch {
            sequence,
            kind: ChangeKind::Set,
            changes: vec![FieldChange {
                path: path.clone(),
                value,
            }],
        });
        Ok(())
    }

    /// Parses `path` and replaces the field.
    pub fn set_str(&self, path: &str, value: Value) -> StateResult<()> {
        self.set(&FieldPath::parse(path)?, value)
    }

    /// Replaces every field from a nested snapshot object.
    ///
    /// The whole snapshot is validated before anything is written. Fields
    /// missing from the snapshot fall back to their declared default; keys
    /// outside the schema are reported and ignored. Exactly one change
    /// batch is emitted.
    pub fn replace_all(&self, snapshot: &Value) -> StateResult<SnapshotReport> {
        let (next, report) = self.resolve_snapshot(snapshot)?;
        let _mutation = self.mutation.lock();

        let changes: Vec<FieldChange> = self
            .schema
            .fields()
            .zip(next.iter())
            .map(|(spec, value)| FieldChange {
                path: spec.path.clone(),
                value: value.clone(),
            })
            .collect();

        let sequence = {
            let mut values = self.values.write();
            *values = next;
            self.sequence.fetch_add(1, Ordering::SeqCst) + 1
        };

        trace!(
            sequence,
            fields = changes.len(),
            defaulted = report.defaulted.len(),
            unknown = report.unknown.len(),
            "tree replaced"
        );
        self.dispatch(ChangeBatch {
            sequence,
            kind: ChangeKind::ReplaceAll,
            changes,
        });
        Ok(report)
    }

    /// Checks a snapshot against the schema without applying it.
    pub fn validate_snapshot(&self, snapshot: &Value) -> StateResult<SnapshotReport> {
        self.resolve_snapshot(snapshot).map(|(_, report)| report)
    }

    /// Serializes the whole tree into a nested JSON object.
    pub fn snapshot(&self) -> Value {
        let values = self.values.read();
        let mut root = Value::Object(Default::default());
        for (spec, value) in self.schema.fields().zip(values.iter()) {
            spec.path.insert_into(&mut root, value.clone());
        }
        root
    }

    /// Registers a listener for change batches.
    pub fn on_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ChangeBatch) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn resolve_snapshot(&self, snapshot: &Value) -> StateResult<(Vec<Value>, SnapshotReport)> {
        if !snapshot.is_object() {
            return Err(StateError::invalid_snapshot(format!(
                "expected an object, got {}",
                FieldKind::describe(snapshot)
            )));
        }

        let mut report = SnapshotReport::default();
        let mut next = Vec::with_capacity(self.schema.len());
        for spec in self.schema.fields() {
            match spec.path.lookup(snapshot) {
                Some(value) => {
                    spec.check(value)?;
                    next.push(value.clone());
                }
                None => {
                    report.defaulted.push(spec.path.clone());
                    next.push(spec.default.clone());
                }
            }
        }

        self.collect_unknown(snapshot, None, &mut report.unknown);
        Ok((next, report))
    }

    fn collect_unknown(&self, node: &Value, prefix: Option<&FieldPath>, unknown: &mut Vec<String>) {
        let Some(map) = node.as_object() else {
            return;
        };
        for (key, child) in map {
            let path = match prefix {
                Some(prefix) => prefix.child(key.as_str()),
                None => match FieldPath::from_segments([key.as_str()]) {
                    Ok(path) => path,
                    Err(_) => {
                        unknown.push(key.clone());
                        continue;
                    }
                },
            };

            if self.schema.position(&path).is_some() {
                continue;
            }
            if child.is_object() && self.schema.is_group(&path) {
                self.collect_unknown(child, Some(&path), unknown);
            } else {
                unknown.push(path.to_dotted());
            }
        }
    }

    fn dispatch(&self, batch: ChangeBatch) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&batch);
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("fields", &self.schema.len())
            .field("sequence", &self.sequence())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
