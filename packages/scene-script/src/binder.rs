//! Rhai bindings for the entity catalog.
//!
//! Scripts get a single `scene` object with five methods:
//! - `scene.create(pos?, scale?, rot?)` -> id
//! - `scene.read(id)` -> `#{ position, scale, orientation }` or `()`
//! - `scene.update(id, pos?, scale?, rot?)`
//! - `scene.delete(id)`
//! - `scene.list()` -> array of ids, oldest first
//!
//! Vectors are maps with numeric `x`, `y`, `z`. Trailing arguments may be
//! omitted, and `()` in any position means "not provided". None of these calls
//! ever raise a script error: unknown ids and malformed values resolve to
//! no-ops, `()` or defaults.

use std::fmt;
use std::sync::{MutexGuard, PoisonError};

use rhai::{Array, Dynamic, Engine, Map, FLOAT, INT};

use crate::catalog::{Catalog, EntityId, PartialVector3, SharedCatalog, TransformPatch};
use crate::scene_graph::{HostScene, Transform, Vector3};

/// Script mistakes the binder absorbs instead of surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The id does not name a live entity.
    NotFound,
    /// A value had the wrong shape and was treated as "not provided".
    MalformedInput,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::NotFound => write!(f, "not found"),
            Fault::MalformedInput => write!(f, "malformed input"),
        }
    }
}

fn absorb(op: &str, fault: Fault, value: &Dynamic) {
    log::debug!("scene.{op}: {fault} ({}), ignored", value.type_name());
}

// ============================================================================
// Foreign -> native
// ============================================================================

fn number_from_foreign(value: &Dynamic) -> Option<f32> {
    if let Ok(f) = value.as_float() {
        return Some(f as f32);
    }
    if let Ok(i) = value.as_int() {
        return Some(i as f32);
    }
    None
}

/// Unwrap a foreign `#{x, y, z}` map.
///
/// `()` is "not provided". A map yields whichever components are numeric; the
/// catalog defaults the rest. Anything else is malformed.
pub fn vector_from_foreign(value: &Dynamic) -> Result<Option<PartialVector3>, Fault> {
    if value.is_unit() {
        return Ok(None);
    }
    let map = value.read_lock::<Map>().ok_or(Fault::MalformedInput)?;
    let component = |key: &str| map.get(key).and_then(number_from_foreign);

    Ok(Some(PartialVector3 {
        x: component("x"),
        y: component("y"),
        z: component("z"),
    }))
}

/// Unwrap a foreign id. Accepts non-negative integers and integral floats.
pub fn id_from_foreign(value: &Dynamic) -> Result<EntityId, Fault> {
    if let Ok(i) = value.as_int() {
        return u64::try_from(i).map(EntityId).map_err(|_| Fault::NotFound);
    }
    if let Ok(f) = value.as_float() {
        if f.is_finite() && f >= 0.0 && f.fract() == 0.0 {
            return Ok(EntityId(f as u64));
        }
        return Err(Fault::NotFound);
    }
    Err(Fault::MalformedInput)
}

fn field(op: &str, value: &Dynamic) -> Option<PartialVector3> {
    vector_from_foreign(value).unwrap_or_else(|fault| {
        absorb(op, fault, value);
        None
    })
}

fn patch_from_foreign(op: &str, position: &Dynamic, scale: &Dynamic, orientation: &Dynamic) -> TransformPatch {
    TransformPatch {
        position: field(op, position),
        scale: field(op, scale),
        orientation: field(op, orientation),
    }
}

// ============================================================================
// Native -> foreign
// ============================================================================

pub fn vector_to_foreign(v: &Vector3) -> Dynamic {
    let mut map = Map::new();
    map.insert("x".into(), Dynamic::from(v.x as FLOAT));
    map.insert("y".into(), Dynamic::from(v.y as FLOAT));
    map.insert("z".into(), Dynamic::from(v.z as FLOAT));
    Dynamic::from(map)
}

pub fn transform_to_foreign(transform: &Transform) -> Dynamic {
    let mut map = Map::new();
    map.insert("position".into(), vector_to_foreign(&transform.position));
    map.insert("scale".into(), vector_to_foreign(&transform.scale));
    map.insert("orientation".into(), vector_to_foreign(&transform.orientation));
    Dynamic::from(map)
}

pub fn id_to_foreign(id: EntityId) -> INT {
    id.0 as INT
}

// ============================================================================
// The `scene` object
// ============================================================================

/// Script-side handle to the catalog. Exposes ids and transforms only.
pub struct SceneApi<S: HostScene> {
    catalog: SharedCatalog<S>,
}

impl<S: HostScene> Clone for SceneApi<S> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
        }
    }
}

impl<S: HostScene> SceneApi<S> {
    pub fn new(catalog: SharedCatalog<S>) -> Self {
        Self { catalog }
    }

    /// Lock the catalog for a single operation.
    fn catalog(&self) -> MutexGuard<'_, Catalog<S>> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&mut self, position: Dynamic, scale: Dynamic, orientation: Dynamic) -> INT {
        let patch = patch_from_foreign("create", &position, &scale, &orientation);
        let id = self.catalog().create(patch);
        log::trace!("scene.create -> {:?} {:?}", id, patch);
        id_to_foreign(id)
    }

    pub fn read(&mut self, id: Dynamic) -> Dynamic {
        let snapshot = match id_from_foreign(&id) {
            Ok(id) => self.catalog().read(id),
            Err(fault) => {
                absorb("read", fault, &id);
                return Dynamic::UNIT;
            }
        };
        match snapshot {
            Some(transform) => {
                log::trace!("scene.read({}) -> {:?}", id, transform);
                transform_to_foreign(&transform)
            }
            None => {
                absorb("read", Fault::NotFound, &id);
                Dynamic::UNIT
            }
        }
    }

    pub fn update(&mut self, id: Dynamic, position: Dynamic, scale: Dynamic, orientation: Dynamic) {
        let entity = match id_from_foreign(&id) {
            Ok(entity) => entity,
            Err(fault) => return absorb("update", fault, &id),
        };
        let patch = patch_from_foreign("update", &position, &scale, &orientation);
        if self.catalog().update(entity, patch) {
            log::trace!("scene.update({:?}, {:?})", entity, patch);
        } else {
            absorb("update", Fault::NotFound, &id);
        }
    }

    pub fn delete(&mut self, id: Dynamic) {
        let entity = match id_from_foreign(&id) {
            Ok(entity) => entity,
            Err(fault) => return absorb("delete", fault, &id),
        };
        if self.catalog().delete(entity) {
            log::trace!("scene.delete({:?})", entity);
        } else {
            absorb("delete", Fault::NotFound, &id);
        }
    }

    pub fn list(&mut self) -> Array {
        let ids = self.catalog().list();
        log::trace!("scene.list() -> {} ids", ids.len());
        ids.into_iter().map(|id| Dynamic::from(id_to_foreign(id))).collect()
    }
}

/// Register the `Scene` type and its methods, overloaded for omitted trailing arguments.
pub fn register_scene_api<S>(engine: &mut Engine)
where
    S: HostScene + 'static,
{
    engine.register_type_with_name::<SceneApi<S>>("Scene");

    engine
        .register_fn("create", |api: &mut SceneApi<S>| {
            api.create(Dynamic::UNIT, Dynamic::UNIT, Dynamic::UNIT)
        })
        .register_fn("create", |api: &mut SceneApi<S>, pos: Dynamic| {
            api.create(pos, Dynamic::UNIT, Dynamic::UNIT)
        })
        .register_fn("create", |api: &mut SceneApi<S>, pos: Dynamic, scale: Dynamic| {
            api.create(pos, scale, Dynamic::UNIT)
        })
        .register_fn("create", SceneApi::<S>::create);

    engine.register_fn("read", SceneApi::<S>::read);

    engine
        .register_fn("update", |api: &mut SceneApi<S>, id: Dynamic| {
            api.update(id, Dynamic::UNIT, Dynamic::UNIT, Dynamic::UNIT)
        })
        .register_fn("update", |api: &mut SceneApi<S>, id: Dynamic, pos: Dynamic| {
            api.update(id, pos, Dynamic::UNIT, Dynamic::UNIT)
        })
        .register_fn(
            "update",
            |api: &mut SceneApi<S>, id: Dynamic, pos: Dynamic, scale: Dynamic| {
                api.update(id, pos, scale, Dynamic::UNIT)
            },
        )
        .register_fn("update", SceneApi::<S>::update);

    engine.register_fn("delete", SceneApi::<S>::delete);
    engine.register_fn("list", SceneApi::<S>::list);
}
