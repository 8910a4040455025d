//! Entity catalog.
//!
//! The catalog owns every script-created entity, hands out ids, and keeps the
//! host scene in step with entity lifecycle. Scripts only ever see ids and
//! transform copies; the scene node stays inside the [`Entity`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::scene_graph::{HostScene, Transform, Vector3};

/// Unique identifier for catalog entities. Never reused within a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

/// A vector as received from an untrusted caller: any component may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialVector3 {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
}

impl PartialVector3 {
    pub fn resolve(self, fallback: f32) -> Vector3 {
        Vector3 {
            x: self.x.unwrap_or(fallback),
            y: self.y.unwrap_or(fallback),
            z: self.z.unwrap_or(fallback),
        }
    }
}

impl From<Vector3> for PartialVector3 {
    fn from(v: Vector3) -> Self {
        Self {
            x: Some(v.x),
            y: Some(v.y),
            z: Some(v.z),
        }
    }
}

/// Transform fields supplied to `create` or `update`. `None` means "not provided".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformPatch {
    pub position: Option<PartialVector3>,
    pub scale: Option<PartialVector3>,
    pub orientation: Option<PartialVector3>,
}

impl TransformPatch {
    /// A patch that sets every field.
    pub fn full(transform: Transform) -> Self {
        Self {
            position: Some(transform.position.into()),
            scale: Some(transform.scale.into()),
            orientation: Some(transform.orientation.into()),
        }
    }

    /// Write the provided fields onto `transform`, each into its own attribute.
    fn apply(&self, transform: &mut Transform) {
        if let Some(position) = self.position {
            transform.position = position.resolve(0.0);
        }
        if let Some(scale) = self.scale {
            transform.scale = scale.resolve(1.0);
        }
        if let Some(orientation) = self.orientation {
            transform.orientation = orientation.resolve(0.0);
        }
    }
}

/// One catalog entry: a transform plus the host node it drives.
#[derive(Debug)]
pub struct Entity<N> {
    id: EntityId,
    transform: Transform,
    node: N,
}

impl<N> Entity<N> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }
}

/// Catalog shared between the host and the script worker.
pub type SharedCatalog<S> = Arc<Mutex<Catalog<S>>>;

/// Owner of all entities of one scene session.
pub struct Catalog<S: HostScene> {
    scene: S,
    entries: BTreeMap<EntityId, Entity<S::Node>>,
    next_id: u64,
}

impl<S: HostScene> Catalog<S> {
    pub fn new(scene: S) -> Self {
        Self {
            scene,
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }

    fn new_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Create an entity, attach its node to the scene, and return its id.
    /// Fields missing from `patch` default to the identity transform.
    pub fn create(&mut self, patch: TransformPatch) -> EntityId {
        let id = self.new_id();
        let mut transform = Transform::default();
        patch.apply(&mut transform);

        let node = self.scene.create_node(&transform);
        self.scene.attach(&node);
        self.entries.insert(id, Entity { id, transform, node });
        id
    }

    /// Copy of the entity's transform, or `None` if the id is unknown.
    pub fn read(&self, id: EntityId) -> Option<Transform> {
        self.entries.get(&id).map(|entity| entity.transform)
    }

    /// Overwrite the fields present in `patch`.
    /// Returns false (and changes nothing) if the id is unknown.
    pub fn update(&mut self, id: EntityId, patch: TransformPatch) -> bool {
        let Some(entity) = self.entries.get_mut(&id) else {
            return false;
        };
        patch.apply(&mut entity.transform);
        self.scene.update_node(&entity.node, &entity.transform);
        true
    }

    /// Remove an entity and release its scene node.
    /// Returns false if the id is unknown.
    pub fn delete(&mut self, id: EntityId) -> bool {
        match self.entries.remove(&id) {
            Some(entity) => {
                self.scene.detach(entity.node);
                true
            }
            None => false,
        }
    }

    /// Live ids, oldest first.
    pub fn list(&self) -> Vec<EntityId> {
        self.entries.keys().copied().collect()
    }

    /// Release every entity. Ids keep counting from where they were.
    pub fn clear(&mut self) {
        for (_, entity) in std::mem::take(&mut self.entries) {
            self.scene.detach(entity.node);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity<S::Node>> {
        self.entries.values()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }
}
