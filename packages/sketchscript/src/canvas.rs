//! Canvas collaborator for script-driven drawing.
//!
//! The session only talks to the drawing surface through the [`Canvas`] trait:
//! enumerate shapes, read and move them, add and remove them, and query the
//! extent. [`SceneCanvas`] is the in-memory implementation used by the console
//! and the offline renderer.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use glam::Vec2;

/// Identity of a shape on the canvas. Never reused within one canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Rect,
    Ellipse,
}

impl ShapeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShapeKind::Rect => "rect",
            ShapeKind::Ellipse => "ellipse",
        }
    }
}

/// A drawable shape. `position` is the top-left corner of its bounding box.
#[derive(Debug, Clone)]
pub struct Shape {
    pub kind: ShapeKind,
    pub position: Vec2,
    pub size: Vec2,
    pub fill: [u8; 4], // RGBA
}

impl Shape {
    pub fn new(kind: ShapeKind, size: Vec2) -> Self {
        Self {
            kind,
            position: Vec2::ZERO,
            size,
            fill: [0, 173, 239, 255],
        }
    }

    pub fn at(mut self, position: Vec2) -> Self {
        self.position = position;
        self
    }
}

/// The drawing surface the scheduler animates.
pub trait Canvas {
    /// Width and height of the drawable area.
    fn extent(&self) -> Vec2;

    /// Ids of all shapes currently on the canvas, in insertion order.
    fn ids(&self) -> Vec<ShapeId>;

    fn get(&self, id: ShapeId) -> Option<&Shape>;

    fn get_mut(&mut self, id: ShapeId) -> Option<&mut Shape>;

    fn add(&mut self, shape: Shape) -> ShapeId;

    /// Returns false if the shape was not on the canvas.
    fn remove(&mut self, id: ShapeId) -> bool;

    fn clear(&mut self);

    /// Drain the ids removed since the last call.
    /// Callers holding per-shape state use this to evict it.
    fn take_removed(&mut self) -> Vec<ShapeId>;

    fn contains(&self, id: ShapeId) -> bool {
        self.get(id).is_some()
    }

    fn position(&self, id: ShapeId) -> Option<Vec2> {
        self.get(id).map(|s| s.position)
    }

    fn set_position(&mut self, id: ShapeId, position: Vec2) -> bool {
        match self.get_mut(id) {
            Some(shape) => {
                shape.position = position;
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.ids().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canvas shared between the session and the script API.
pub type SharedCanvas = Rc<RefCell<dyn Canvas>>;

/// In-memory canvas. Shapes keep insertion order for drawing and iteration.
#[derive(Debug)]
pub struct SceneCanvas {
    extent: Vec2,
    shapes: HashMap<ShapeId, Shape>,
    order: Vec<ShapeId>,
    removed: Vec<ShapeId>,
    next_id: u64,
}

impl SceneCanvas {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            extent: Vec2::new(width, height),
            shapes: HashMap::new(),
            order: Vec::new(),
            removed: Vec::new(),
            next_id: 1,
        }
    }

    pub fn shared(width: f32, height: f32) -> SharedCanvas {
        Rc::new(RefCell::new(Self::new(width, height)))
    }

    fn new_id(&mut self) -> ShapeId {
        let id = ShapeId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl Canvas for SceneCanvas {
    fn extent(&self) -> Vec2 {
        self.extent
    }

    fn ids(&self) -> Vec<ShapeId> {
        self.order.clone()
    }

    fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.get(&id)
    }

    fn get_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.shapes.get_mut(&id)
    }

    fn add(&mut self, shape: Shape) -> ShapeId {
        let id = self.new_id();
        self.shapes.insert(id, shape);
        self.order.push(id);
        id
    }

    fn remove(&mut self, id: ShapeId) -> bool {
        if self.shapes.remove(&id).is_none() {
            return false;
        }
        self.order.retain(|&other| other != id);
        self.removed.push(id);
        true
    }

    fn clear(&mut self) {
        self.removed.extend(self.order.drain(..));
        self.shapes.clear();
    }

    fn take_removed(&mut self) -> Vec<ShapeId> {
        std::mem::take(&mut self.removed)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}
