//! Host scene graph for script-driven entities.
//!
//! This module provides the transform data shared by the catalog and the host,
//! the [`HostScene`] interface the catalog drives, and a minimal in-memory
//! [`SceneGraph`] that a renderer can read model matrices from.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

/// 3D vector used for position, scale and orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Self = Self::splat(0.0);
    pub const ONE: Self = Self::splat(1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub const fn splat(v: f32) -> Self {
        Self { x: v, y: v, z: v }
    }
}

impl From<Vector3> for glam::Vec3 {
    fn from(v: Vector3) -> Self {
        glam::Vec3::new(v.x, v.y, v.z)
    }
}

/// Transform of a scene entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transform {
    pub position: Vector3,
    pub scale: Vector3,
    /// Euler angles in radians, applied in XYZ order.
    pub orientation: Vector3,
}

impl Transform {
    /// Model matrix for this transform (scale, then rotate, then translate).
    pub fn model_matrix(&self) -> glam::Mat4 {
        let translation = glam::Mat4::from_translation(self.position.into());
        let rotation = glam::Mat4::from_euler(
            glam::EulerRot::XYZ,
            self.orientation.x,
            self.orientation.y,
            self.orientation.z,
        );
        let scale = glam::Mat4::from_scale(self.scale.into());
        translation * rotation * scale
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vector3::ZERO,
            scale: Vector3::ONE,
            orientation: Vector3::ZERO,
        }
    }
}

/// The part of the host rendering engine the catalog talks to.
///
/// Nodes are handed out by the scene and owned exclusively by the entity that
/// requested them; `detach` takes the node back by value.
pub trait HostScene {
    type Node;

    /// Build a node for a new entity. The node is not rendered until attached.
    fn create_node(&mut self, transform: &Transform) -> Self::Node;

    /// Add a node to the rendered scene.
    fn attach(&mut self, node: &Self::Node);

    /// Push a changed transform to a node.
    fn update_node(&mut self, node: &Self::Node, transform: &Transform);

    /// Remove a node from the rendered scene and release it.
    fn detach(&mut self, node: Self::Node);
}

/// Handle to a node in a [`SceneGraph`]. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct NodeHandle(u64);

impl NodeHandle {
    pub fn key(&self) -> u64 {
        self.0
    }
}

/// A box mesh instance with its own transform.
#[derive(Debug, Clone)]
pub struct MeshInstance {
    pub transform: Transform,
}

impl MeshInstance {
    pub fn model_matrix(&self) -> glam::Mat4 {
        self.transform.model_matrix()
    }
}

/// In-memory scene graph holding one mesh instance per node.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: BTreeMap<u64, MeshInstance>,
    /// Nodes that are currently rendered.
    attached: BTreeSet<u64>,
    next_key: u64,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rendered mesh instances, in node creation order.
    pub fn meshes(&self) -> impl Iterator<Item = (u64, &MeshInstance)> {
        self.attached
            .iter()
            .filter_map(|key| self.nodes.get(key).map(|mesh| (*key, mesh)))
    }

    pub fn get(&self, node: &NodeHandle) -> Option<&MeshInstance> {
        self.nodes.get(&node.0)
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of rendered nodes.
    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    pub fn is_attached(&self, node: &NodeHandle) -> bool {
        self.attached.contains(&node.0)
    }
}

impl HostScene for SceneGraph {
    type Node = NodeHandle;

    fn create_node(&mut self, transform: &Transform) -> NodeHandle {
        let key = self.next_key;
        self.next_key += 1;
        self.nodes.insert(key, MeshInstance { transform: *transform });
        NodeHandle(key)
    }

    fn attach(&mut self, node: &NodeHandle) {
        if self.nodes.contains_key(&node.0) {
            self.attached.insert(node.0);
        }
    }

    fn update_node(&mut self, node: &NodeHandle, transform: &Transform) {
        if let Some(mesh) = self.nodes.get_mut(&node.0) {
            mesh.transform = *transform;
        }
    }

    fn detach(&mut self, node: NodeHandle) {
        self.attached.remove(&node.0);
        self.nodes.remove(&node.0);
    }
}
