//! Rhai registration for the canvas script API.
//!
//! Scripts see the canvas as a global `canvas` of type `Canvas` and each
//! shape as a `Shape` handle. Handles hold the shape id and a shared pointer
//! to the canvas; every accessor borrows the canvas only for the duration of
//! the call, so handles stay valid (and report "no longer on the canvas")
//! after their shape is removed.

use std::fmt;

use glam::Vec2;
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, FLOAT, INT};

use crate::canvas::{Shape, ShapeId, ShapeKind, SharedCanvas};

/// Name of the host global bound to the canvas handle.
pub const CANVAS_GLOBAL: &str = "canvas";

const DEFAULT_SIZE: f32 = 40.0;

#[derive(Clone)]
pub struct CanvasHandle {
    canvas: SharedCanvas,
}

impl CanvasHandle {
    pub fn new(canvas: SharedCanvas) -> Self {
        Self { canvas }
    }

    fn add(&self, kind: ShapeKind, width: f32, height: f32) -> ShapeHandle {
        let mut canvas = self.canvas.borrow_mut();
        let size = Vec2::new(width, height);
        // New shapes start centred on the canvas.
        let position = (canvas.extent() - size) * 0.5;
        let id = canvas.add(Shape::new(kind, size).at(position));
        log::debug!("Script added {} #{}", kind.name(), id.0);
        ShapeHandle::new(id, self.canvas.clone())
    }
}

impl fmt::Display for CanvasHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let canvas = self.canvas.borrow();
        let extent = canvas.extent();
        write!(f, "Canvas({}x{}, {} shapes)", extent.x, extent.y, canvas.len())
    }
}

#[derive(Clone)]
pub struct ShapeHandle {
    id: ShapeId,
    canvas: SharedCanvas,
}

impl ShapeHandle {
    pub fn new(id: ShapeId, canvas: SharedCanvas) -> Self {
        Self { id, canvas }
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn on_canvas(&self) -> bool {
        self.canvas.borrow().contains(self.id)
    }

    fn read<R>(&self, f: impl FnOnce(&Shape) -> R) -> Result<R, Box<EvalAltResult>> {
        let canvas = self.canvas.borrow();
        canvas.get(self.id).map(f).ok_or_else(|| self.gone())
    }

    fn write<R>(&self, f: impl FnOnce(&mut Shape) -> R) -> Result<R, Box<EvalAltResult>> {
        let mut canvas = self.canvas.borrow_mut();
        canvas.get_mut(self.id).map(f).ok_or_else(|| self.gone())
    }

    fn gone(&self) -> Box<EvalAltResult> {
        format!("shape #{} is no longer on the canvas", self.id.0).into()
    }
}

impl fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let canvas = self.canvas.borrow();
        match canvas.get(self.id) {
            Some(shape) => write!(
                f,
                "Shape(#{} {} at ({}, {}) size {}x{})",
                self.id.0,
                shape.kind.name(),
                shape.position.x,
                shape.position.y,
                shape.size.x,
                shape.size.y
            ),
            None => write!(f, "Shape(#{} removed)", self.id.0),
        }
    }
}

/// Convert a script number (int or float) to f32.
fn to_number(value: &Dynamic) -> Result<f32, Box<EvalAltResult>> {
    if let Ok(f) = value.as_float() {
        return Ok(f as f32);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    Err(format!("expected a number, got {}", value.type_name()).into())
}

fn to_channel(value: &Dynamic) -> Result<u8, Box<EvalAltResult>> {
    Ok(to_number(value)?.round().clamp(0.0, 255.0) as u8)
}

/// Parse `[r, g, b]`, `[r, g, b, a]` (0-255) or `"#rrggbb"` / `"#rrggbbaa"`.
fn parse_colour(value: Dynamic) -> Result<[u8; 4], Box<EvalAltResult>> {
    if value.is_array() {
        let channels = value.cast::<Array>();
        if !(3..=4).contains(&channels.len()) {
            return Err(format!("invalid colour: expected 3 or 4 channels, got {}", channels.len()).into());
        }
        let mut rgba = [0, 0, 0, 255];
        for (slot, channel) in rgba.iter_mut().zip(channels.iter()) {
            *slot = to_channel(channel)?;
        }
        return Ok(rgba);
    }

    if value.is_string() {
        let text = value.cast::<ImmutableString>();
        return parse_hex_colour(&text).ok_or_else(|| format!("invalid colour: '{}'", text).into());
    }

    Err(format!("invalid colour: expected array or \"#rrggbb\", got {}", value.type_name()).into())
}

fn parse_hex_colour(text: &str) -> Option<[u8; 4]> {
    let hex = text.strip_prefix('#')?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return None;
    }
    let mut rgba = [0, 0, 0, 255];
    for (i, slot) in rgba.iter_mut().enumerate().take(hex.len() / 2) {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(rgba)
}

/// Register the `Canvas` and `Shape` types and the random-number globals.
pub fn register_canvas_api(engine: &mut Engine) {
    engine.register_type_with_name::<CanvasHandle>("Canvas");
    engine.register_type_with_name::<ShapeHandle>("Shape");

    // === Canvas ===
    engine
        .register_get("width", |c: &mut CanvasHandle| c.canvas.borrow().extent().x as FLOAT)
        .register_get("height", |c: &mut CanvasHandle| c.canvas.borrow().extent().y as FLOAT)
        .register_fn("len", |c: &mut CanvasHandle| c.canvas.borrow().len() as INT)
        .register_fn("clear", |c: &mut CanvasHandle| c.canvas.borrow_mut().clear())
        .register_fn("remove", |c: &mut CanvasHandle, shape: ShapeHandle| {
            c.canvas.borrow_mut().remove(shape.id)
        })
        .register_fn("shapes", |c: &mut CanvasHandle| -> Array {
            let ids = c.canvas.borrow().ids();
            ids.into_iter()
                .map(|id| Dynamic::from(ShapeHandle::new(id, c.canvas.clone())))
                .collect()
        })
        .register_fn(
            "rect",
            |c: &mut CanvasHandle, w: Dynamic, h: Dynamic| -> Result<ShapeHandle, Box<EvalAltResult>> {
                Ok(c.add(ShapeKind::Rect, to_number(&w)?, to_number(&h)?))
            },
        )
        .register_fn("rect", |c: &mut CanvasHandle| {
            c.add(ShapeKind::Rect, DEFAULT_SIZE, DEFAULT_SIZE)
        })
        .register_fn(
            "ellipse",
            |c: &mut CanvasHandle, w: Dynamic, h: Dynamic| -> Result<ShapeHandle, Box<EvalAltResult>> {
                Ok(c.add(ShapeKind::Ellipse, to_number(&w)?, to_number(&h)?))
            },
        )
        .register_fn("ellipse", |c: &mut CanvasHandle| {
            c.add(ShapeKind::Ellipse, DEFAULT_SIZE, DEFAULT_SIZE)
        })
        .register_fn("to_string", |c: &mut CanvasHandle| c.to_string())
        .register_fn("to_debug", |c: &mut CanvasHandle| c.to_string());

    // === Shape ===
    engine
        .register_get("id", |s: &mut ShapeHandle| s.id.0 as INT)
        .register_get("on_canvas", |s: &mut ShapeHandle| s.on_canvas())
        .register_get(
            "kind",
            |s: &mut ShapeHandle| -> Result<ImmutableString, Box<EvalAltResult>> {
                s.read(|shape| shape.kind.name().into())
            },
        )
        .register_get("x", |s: &mut ShapeHandle| -> Result<FLOAT, Box<EvalAltResult>> {
            s.read(|shape| shape.position.x as FLOAT)
        })
        .register_set(
            "x",
            |s: &mut ShapeHandle, v: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let x = to_number(&v)?;
                s.write(|shape| shape.position.x = x)
            },
        )
        .register_get("y", |s: &mut ShapeHandle| -> Result<FLOAT, Box<EvalAltResult>> {
            s.read(|shape| shape.position.y as FLOAT)
        })
        .register_set(
            "y",
            |s: &mut ShapeHandle, v: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let y = to_number(&v)?;
                s.write(|shape| shape.position.y = y)
            },
        )
        .register_get("width", |s: &mut ShapeHandle| -> Result<FLOAT, Box<EvalAltResult>> {
            s.read(|shape| shape.size.x as FLOAT)
        })
        .register_set(
            "width",
            |s: &mut ShapeHandle, v: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let w = to_number(&v)?.max(0.0);
                s.write(|shape| shape.size.x = w)
            },
        )
        .register_get("height", |s: &mut ShapeHandle| -> Result<FLOAT, Box<EvalAltResult>> {
            s.read(|shape| shape.size.y as FLOAT)
        })
        .register_set(
            "height",
            |s: &mut ShapeHandle, v: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let h = to_number(&v)?.max(0.0);
                s.write(|shape| shape.size.y = h)
            },
        )
        .register_get("color", |s: &mut ShapeHandle| -> Result<Array, Box<EvalAltResult>> {
            s.read(|shape| shape.fill.iter().map(|&c| Dynamic::from(c as INT)).collect())
        })
        .register_set(
            "color",
            |s: &mut ShapeHandle, v: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let fill = parse_colour(v)?;
                s.write(|shape| shape.fill = fill)
            },
        )
        .register_fn(
            "move_by",
            |s: &mut ShapeHandle, dx: Dynamic, dy: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let delta = Vec2::new(to_number(&dx)?, to_number(&dy)?);
                s.write(|shape| shape.position += delta)
            },
        )
        .register_fn("==", |a: &mut ShapeHandle, b: ShapeHandle| a.id == b.id)
        .register_fn("!=", |a: &mut ShapeHandle, b: ShapeHandle| a.id != b.id)
        .register_fn("to_string", |s: &mut ShapeHandle| s.to_string())
        .register_fn("to_debug", |s: &mut ShapeHandle| s.to_string());

    // === Randomness ===
    engine
        .register_fn("rand", |max: INT| -> Result<INT, Box<EvalAltResult>> {
            if max <= 0 {
                return Err(format!("rand(max) needs a positive max, got {}", max).into());
            }
            Ok(rand::thread_rng().gen_range(0..max))
        })
        .register_fn("rand_float", || rand::thread_rng().gen::<FLOAT>());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::SceneCanvas;
    use rhai::Scope;

    fn setup() -> (Engine, Scope<'static>, SharedCanvas) {
        let mut engine = Engine::new();
        register_canvas_api(&mut engine);
        let canvas = SceneCanvas::shared(200.0, 100.0);
        let mut scope = Scope::new();
        scope.push(CANVAS_GLOBAL, CanvasHandle::new(canvas.clone()));
        (engine, scope, canvas)
    }

    #[test]
    fn test_create_and_move_shapes() {
        let (engine, mut scope, canvas) = setup();
        engine
            .run_with_scope(
                &mut scope,
                r##"
                let r = canvas.rect(20, 10);
                r.x = 5;
                r.move_by(1.5, 2);
                let e = canvas.ellipse();
                e.color = "#ff000080";
                "##,
            )
            .unwrap();

        let canvas = canvas.borrow();
        let ids = canvas.ids();
        assert_eq!(ids.len(), 2);
        let rect = canvas.get(ids[0]).unwrap();
        assert_eq!(rect.position.x, 6.5);
        assert_eq!(rect.size, Vec2::new(20.0, 10.0));
        assert_eq!(canvas.get(ids[1]).unwrap().fill, [255, 0, 0, 128]);
    }

    #[test]
    fn test_new_shape_is_centred() {
        let (engine, mut scope, _canvas) = setup();
        let x: FLOAT = engine
            .eval_with_scope(&mut scope, "let r = canvas.rect(20, 10); r.x")
            .unwrap();
        assert_eq!(x, 90.0);
    }

    #[test]
    fn test_removed_shape_reports_error() {
        let (engine, mut scope, _canvas) = setup();
        engine
            .run_with_scope(&mut scope, "let r = canvas.rect(); canvas.remove(r);")
            .unwrap();
        let err = engine.run_with_scope(&mut scope, "r.x = 3;").unwrap_err();
        assert!(err.to_string().contains("no longer on the canvas"));

        let on: bool = engine.eval_with_scope(&mut scope, "r.on_canvas").unwrap();
        assert!(!on);
    }

    #[test]
    fn test_non_numeric_argument_is_rejected() {
        let (engine, mut scope, _canvas) = setup();
        let err = engine
            .run_with_scope(&mut scope, r#"canvas.rect("wide", 3)"#)
            .unwrap_err();
        assert!(err.to_string().contains("expected a number"));
    }

    #[test]
    fn test_shapes_enumerates_and_compares() {
        let (engine, mut scope, _canvas) = setup();
        let same: bool = engine
            .eval_with_scope(
                &mut scope,
                "let a = canvas.rect(); canvas.rect(); let all = canvas.shapes(); all.len() == 2 && all[0] == a && all[1] != a",
            )
            .unwrap();
        assert!(same);
    }

    #[test]
    fn test_colour_parsing() {
        assert_eq!(parse_hex_colour("#102030"), Some([16, 32, 48, 255]));
        assert_eq!(parse_hex_colour("102030"), None);
        assert_eq!(parse_hex_colour("#12"), None);

        let arr: Array = vec![Dynamic::from(300 as INT), Dynamic::from(0 as INT), Dynamic::from(7 as INT)];
        assert_eq!(parse_colour(Dynamic::from(arr)).unwrap(), [255, 0, 7, 255]);
        assert!(parse_colour(Dynamic::from(1 as INT)).is_err());
    }

    #[test]
    fn test_rand_bounds() {
        let (engine, mut scope, _canvas) = setup();
        for _ in 0..20 {
            let v: INT = engine.eval_with_scope(&mut scope, "rand(3)").unwrap();
            assert!((0..3).contains(&v));
        }
        assert!(engine.eval_with_scope::<INT>(&mut scope, "rand(0)").is_err());
    }
}
