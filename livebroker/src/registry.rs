//! The table of engaged calls.
//!
//! Every live subscription is recorded under its `service.method` identity.
//! There is at most one record per identity: a second subscriber to the same
//! method takes the record over, replacing the arguments that get replayed and
//! the observer that receives push-driven results.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use livebroker_schemas::{MethodReturnTypes, entity_of};
use serde_json::Value;

use crate::rpc::Observer;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    service: String,
    method: String,
}

impl MethodId {
    pub fn new<S: Into<String>, M: Into<String>>(service: S, method: M) -> MethodId {
        MethodId {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

struct Engaged {
    args: Arc<[Value]>,
    observer: Observer,
    token: u64,
}

/// Proof of an engagement, needed to disengage it again.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Engagement {
    pub token: u64,
    /// Whether this engagement created the record rather than taking over an
    /// existing one.
    pub created: bool,
}

/// An engaged call that a push event made stale.
pub(crate) struct Stale {
    pub id: MethodId,
    pub args: Arc<[Value]>,
    pub observer: Observer,
}

#[derive(Default)]
pub(crate) struct Registry {
    types: HashMap<String, MethodReturnTypes>,
    engaged: HashMap<MethodId, Engaged>,
    by_entity: HashMap<String, HashSet<MethodId>>,
    next_token: u64,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Replaces the return-type table of `service`. Identities of the service
    /// that are already engaged are re-indexed under their new entity types.
    pub fn register_method_types(&mut self, service: &str, types: MethodReturnTypes) {
        let engaged: Vec<MethodId> = self
            .engaged
            .keys()
            .filter(|id| id.service == service)
            .cloned()
            .collect();
        for id in engaged.iter() {
            self.unindex(id);
        }
        log::debug!("registered {} method types for {service}", types.len());
        self.types.insert(service.to_owned(), types);
        for id in engaged {
            self.index(id);
        }
    }

    pub fn return_type(&self, id: &MethodId) -> Option<&str> {
        self.types
            .get(&id.service)
            .and_then(|t| t.get(&id.method))
            .map(String::as_str)
    }

    pub fn engage(&mut self, id: MethodId, args: Arc<[Value]>, observer: Observer) -> Engagement {
        self.next_token += 1;
        let token = self.next_token;
        let created = match self.engaged.get_mut(&id) {
            Some(existing) => {
                log::debug!("{id} re-engaged, replacing its arguments");
                existing.args = args;
                existing.observer = observer;
                existing.token = token;
                false
            }
            None => {
                log::debug!("{id} engaged");
                self.engaged.insert(
                    id.clone(),
                    Engaged {
                        args,
                        observer,
                        token,
                    },
                );
                self.index(id);
                true
            }
        };
        Engagement { token, created }
    }

    /// Removes the record of `id` if `token` still owns it. Returns whether a
    /// record was removed.
    pub fn disengage(&mut self, id: &MethodId, token: u64) -> bool {
        if !self.is_engaged(id, token) {
            return false;
        }
        self.engaged.remove(id);
        self.unindex(id);
        log::debug!("{id} disengaged");
        true
    }

    pub fn is_engaged(&self, id: &MethodId, token: u64) -> bool {
        self.engaged.get(id).is_some_and(|e| e.token == token)
    }

    /// Every engaged call returning `entity_type`, as a single value or as a
    /// collection.
    pub fn stale(&self, entity_type: &str) -> Vec<Stale> {
        let Some(ids) = self.by_entity.get(entity_of(entity_type)) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                self.engaged.get(id).map(|e| Stale {
                    id: id.clone(),
                    args: e.args.clone(),
                    observer: e.observer.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.engaged.len()
    }

    fn index(&mut self, id: MethodId) {
        match self.return_type(&id).map(|ty| entity_of(ty).to_owned()) {
            Some(entity) => {
                self.by_entity.entry(entity).or_default().insert(id);
            }
            None => log::debug!("{id} has no return type, push events will not refresh it"),
        }
    }

    fn unindex(&mut self, id: &MethodId) {
        let Some(entity) = self.return_type(id).map(|ty| entity_of(ty).to_owned()) else {
            return;
        };
        if let Some(ids) = self.by_entity.get_mut(&entity) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_entity.remove(&entity);
            }
        }
    }
}
