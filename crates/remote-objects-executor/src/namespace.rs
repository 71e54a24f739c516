//! Per-session namespace and instance registry.

use std::any::TypeId;

use remote_objects_core::Uid;
use rhai::{Dynamic, Map, Scope};

/// Scope variable through which expressions reach their session record.
pub const SANDBOX: &str = "sandbox";

/// Key of the instance table inside the session record.
pub const INSTANCES: &str = "instances";

/// Identity of a retained object: its concrete type plus an address-like key.
pub type Identity = (TypeId, usize);

/// Extracts the identity of a value of one registered handle type.
pub type IdentityProbe = fn(&Dynamic) -> Option<Identity>;

/// A host type whose values have meaningful identity.
///
/// Two values with the same `identity` are the same server-side object, so
/// returning either one yields the same instance reference.
pub trait HostHandle: Clone + Send + Sync + 'static {
    /// Stable key of the underlying object, e.g. an `Arc` address.
    fn identity(&self) -> usize;
}

pub(crate) fn probe<T: HostHandle>(value: &Dynamic) -> Option<Identity> {
    value
        .read_lock::<T>()
        .map(|handle| (TypeId::of::<T>(), handle.identity()))
}

fn identify(value: &Dynamic, probes: &[IdentityProbe]) -> Option<Identity> {
    probes.iter().find_map(|probe| probe(value))
}

/// Session namespace.
///
/// Holds the scope every expression of the session runs in. The scope
/// exposes `sandbox["<uid>"]`, whose `instances` map is the instance
/// registry: objects that were returned by reference, plus slots filled by
/// client-side construction.
pub struct Namespace {
    uid: Uid,
    scope: Scope<'static>,
    next_index: u64,
}

impl Namespace {
    /// Create an empty namespace for `uid`.
    #[must_use]
    pub fn new(uid: Uid) -> Self {
        let mut namespace = Self {
            uid,
            scope: Scope::new(),
            next_index: 0,
        };
        namespace.store_instances(Map::new());
        namespace
    }

    #[must_use]
    pub const fn uid(&self) -> &Uid {
        &self.uid
    }

    /// Scope expressions are evaluated in.
    pub fn scope_mut(&mut self) -> &mut Scope<'static> {
        &mut self.scope
    }

    /// Expression text addressing the instance stored under `key`.
    #[must_use]
    pub fn instance_path(&self, key: &str) -> String {
        format!(
            "{SANDBOX}[{uid:?}].{INSTANCES}[{key:?}]",
            uid = self.uid.as_str()
        )
    }

    /// Value stored under `key`, if any.
    #[must_use]
    pub fn instance(&self, key: &str) -> Option<Dynamic> {
        self.instances().get(key).cloned()
    }

    /// Key of the instance `code` addresses when `code` is nothing but an
    /// instance path, as sent when a reference is awaited again.
    #[must_use]
    pub fn key_at(&self, code: &str) -> Option<String> {
        let code = code.trim().trim_end_matches(';').trim_end();
        self.instances()
            .keys()
            .find(|key| self.instance_path(key.as_str()) == code)
            .map(ToString::to_string)
    }

    /// Number of retained instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances().len()
    }

    /// Keep `value` in the instance registry and return its key.
    ///
    /// If an entry with the same identity already exists its key is reused;
    /// otherwise the next free index is allocated. Indices are never reused
    /// within a session.
    pub fn retain(&mut self, value: Dynamic, probes: &[IdentityProbe]) -> String {
        let mut instances = self.instances();

        if let Some(identity) = identify(&value, probes) {
            let existing = instances
                .iter()
                .find(|(_, stored)| identify(stored, probes) == Some(identity))
                .map(|(key, _)| key.to_string());
            if let Some(key) = existing {
                return key;
            }
        }

        let key = loop {
            let candidate = self.next_index.to_string();
            self.next_index += 1;
            if !instances.contains_key(candidate.as_str()) {
                break candidate;
            }
        };
        instances.insert(key.clone().into(), value);
        self.store_instances(instances);
        key
    }

    fn record(&self) -> Map {
        self.scope
            .get_value::<Map>(SANDBOX)
            .and_then(|root| root.get(self.uid.as_str()).cloned())
            .and_then(|record| record.try_cast::<Map>())
            .unwrap_or_default()
    }

    fn instances(&self) -> Map {
        self.record()
            .get(INSTANCES)
            .cloned()
            .and_then(|instances| instances.try_cast::<Map>())
            .unwrap_or_default()
    }

    // Expressions may overwrite parts of the record; rebuild what is missing.
    fn store_instances(&mut self, instances: Map) {
        let mut record = self.record();
        record.insert(INSTANCES.into(), Dynamic::from_map(instances));

        let mut root = self.scope.get_value::<Map>(SANDBOX).unwrap_or_default();
        root.insert(self.uid.as_str().into(), Dynamic::from_map(record));
        self.scope.set_value(SANDBOX, root);
    }
}
