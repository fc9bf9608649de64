//! Graphics state tracking for color operators
//!
//! Replays `q`/`Q` and the color operators of a content stream and keeps the
//! current stroking and non-stroking color space and color. The tracked state
//! always describes the *input* stream, so operands of later `sc`/`scn`
//! operators are interpreted in the space the original stream selected.

use lopdf::content::Operation;
use lopdf::{Document, Object};
use crate::color::{as_number, Color, ColorSpace};
use crate::error::{Error, Result};
use crate::pdf::resources::{Category, Resources};

/// Which of the two paint slots an operator addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    Stroking,
    NonStroking,
}

/// Color part of the graphics state
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub stroking_space: ColorSpace,
    pub stroking_color: Color,
    pub non_stroking_space: ColorSpace,
    pub non_stroking_color: Color,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            stroking_space: ColorSpace::DeviceGray,
            stroking_color: Color::Device(vec![0.0]),
            non_stroking_space: ColorSpace::DeviceGray,
            non_stroking_color: Color::Device(vec![0.0]),
        }
    }
}

impl GraphicsState {
    pub fn space(&self, paint: Paint) -> &ColorSpace {
        match paint {
            Paint::Stroking => &self.stroking_space,
            Paint::NonStroking => &self.non_stroking_space,
        }
    }

    pub fn color(&self, paint: Paint) -> &Color {
        match paint {
            Paint::Stroking => &self.stroking_color,
            Paint::NonStroking => &self.non_stroking_color,
        }
    }

    fn set_space(&mut self, paint: Paint, space: ColorSpace) {
        let initial = space.initial_color();
        match paint {
            Paint::Stroking => {
                self.stroking_space = space;
                self.stroking_color = initial;
            }
            Paint::NonStroking => {
                self.non_stroking_space = space;
                self.non_stroking_color = initial;
            }
        }
    }

    fn set_color(&mut self, paint: Paint, color: Color) {
        match paint {
            Paint::Stroking => self.stroking_color = color,
            Paint::NonStroking => self.non_stroking_color = color,
        }
    }
}

/// Stack of graphics states driven by `q`/`Q`
#[derive(Debug, Clone)]
pub struct StateTracker {
    stack: Vec<GraphicsState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            stack: vec![GraphicsState::default()],
        }
    }

    pub fn current(&self) -> &GraphicsState {
        // The stack is never empty: restore() keeps the bottom state
        &self.stack[self.stack.len() - 1]
    }

    fn current_mut(&mut self) -> &mut GraphicsState {
        let top = self.stack.len() - 1;
        &mut self.stack[top]
    }

    /// `q`
    pub fn save(&mut self) {
        let state = self.current().clone();
        self.stack.push(state);
    }

    /// `Q`; an unbalanced restore leaves the bottom state in place
    pub fn restore(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        } else {
            log::warn!("Unbalanced Q operator in content stream, ignoring");
        }
    }

    /// Update the state for one operator of the input stream
    pub fn apply(&mut self, op: &Operation, resources: &Resources, doc: &Document) -> Result<()> {
        match op.operator.as_str() {
            "q" => self.save(),
            "Q" => self.restore(),
            "CS" | "cs" => {
                let paint = paint_of(&op.operator);
                let name = single_name(op)?;
                let space = resolve_space(name, resources, doc)?;
                self.current_mut().set_space(paint, space);
            }
            "SC" | "SCN" | "sc" | "scn" => {
                let paint = paint_of(&op.operator);
                let color = parse_color(op, self.current().space(paint))?;
                self.current_mut().set_color(paint, color);
            }
            "G" | "g" => self.set_device(op, ColorSpace::DeviceGray)?,
            "RG" | "rg" => self.set_device(op, ColorSpace::DeviceRGB)?,
            "K" | "k" => self.set_device(op, ColorSpace::DeviceCMYK)?,
            _ => {}
        }
        Ok(())
    }

    fn set_device(&mut self, op: &Operation, space: ColorSpace) -> Result<()> {
        let paint = paint_of(&op.operator);
        let components = numbers(op, space.components())?;
        let state = self.current_mut();
        state.set_space(paint, space);
        state.set_color(paint, Color::Device(components));
        Ok(())
    }
}

/// Upper-case operators address the stroking slot
pub fn paint_of(operator: &str) -> Paint {
    if operator.starts_with(|c: char| c.is_ascii_uppercase()) {
        Paint::Stroking
    } else {
        Paint::NonStroking
    }
}

/// The single name operand of `cs`, `CS`, `sh` and `Do`
pub fn single_name(op: &Operation) -> Result<&[u8]> {
    match op.operands.as_slice() {
        [Object::Name(name)] => Ok(name),
        _ => Err(Error::operands(&op.operator, "expected a single name operand")),
    }
}

/// Color space selected by name: a device family or a ColorSpace resource,
/// as it was before the converter replaced it
pub fn resolve_space(name: &[u8], resources: &Resources, doc: &Document) -> Result<ColorSpace> {
    match name {
        b"DeviceGray" | b"DeviceRGB" | b"DeviceCMYK" | b"Pattern" => ColorSpace::from_family_name(name),
        _ => {
            let object = resources.lookup_original(doc, Category::ColorSpace, name)?;
            ColorSpace::from_object(&object, doc)
        }
    }
}

/// Exactly `count` numeric operands
pub fn numbers(op: &Operation, count: usize) -> Result<Vec<f64>> {
    if op.operands.len() != count {
        return Err(Error::operands(
            &op.operator,
            format!("expected {} operands, got {}", count, op.operands.len()),
        ));
    }
    op.operands
        .iter()
        .map(|o| as_number(o).ok_or_else(|| Error::operands(&op.operator, "expected a number")))
        .collect()
}

/// Decode `sc`/`scn` operands against the active space
fn parse_color(op: &Operation, space: &ColorSpace) -> Result<Color> {
    match (space, op.operands.split_last()) {
        (ColorSpace::Pattern(_), Some((Object::Name(name), components))) => {
            let underlying = if components.is_empty() {
                None
            } else {
                Some(
                    components
                        .iter()
                        .map(|o| {
                            as_number(o).ok_or_else(|| Error::operands(&op.operator, "expected a number"))
                        })
                        .collect::<Result<Vec<f64>>>()?,
                )
            };
            Ok(Color::Pattern {
                name: name.clone(),
                underlying,
            })
        }
        (ColorSpace::Pattern(_), _) => Err(Error::UnexpectedColorKind(format!(
            "'{}' in a Pattern space needs a pattern name",
            op.operator
        ))),
        (_, Some((Object::Name(_), _))) => Err(Error::UnexpectedColorKind(format!(
            "'{}' names a pattern but the active space is {}",
            op.operator,
            space.family()
        ))),
        _ => Ok(Color::Device(numbers(op, op.operands.len())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    fn name(n: &str) -> Object {
        Object::Name(n.as_bytes().to_vec())
    }

    #[test]
    fn test_initial_state_is_black_gray() {
        let tracker = StateTracker::new();
        assert!(matches!(tracker.current().stroking_space, ColorSpace::DeviceGray));
        assert_eq!(tracker.current().non_stroking_color, Color::Device(vec![0.0]));
    }

    #[test]
    fn test_direct_color_sets_space() {
        let doc = Document::with_version("1.5");
        let resources = Resources::new();
        let mut tracker = StateTracker::new();
        let rg = op("rg", vec![Object::Integer(1), Object::Real(0.5), Object::Integer(0)]);
        tracker.apply(&rg, &resources, &doc).unwrap();

        let state = tracker.current();
        assert!(matches!(state.non_stroking_space, ColorSpace::DeviceRGB));
        assert_eq!(state.non_stroking_color, Color::Device(vec![1.0, 0.5, 0.0]));
        assert!(matches!(state.stroking_space, ColorSpace::DeviceGray));
    }

    #[test]
    fn test_save_restore() {
        let doc = Document::with_version("1.5");
        let resources = Resources::new();
        let mut tracker = StateTracker::new();

        tracker.apply(&op("q", vec![]), &resources, &doc).unwrap();
        tracker
            .apply(&op("K", vec![Object::Integer(0), Object::Integer(0), Object::Integer(0), Object::Integer(1)]), &resources, &doc)
            .unwrap();
        assert!(matches!(tracker.current().stroking_space, ColorSpace::DeviceCMYK));
        assert_eq!(tracker.stack.len(), 2);

        tracker.apply(&op("Q", vec![]), &resources, &doc).unwrap();
        assert!(matches!(tracker.current().stroking_space, ColorSpace::DeviceGray));

        // Unbalanced Q is tolerated
        tracker.apply(&op("Q", vec![]), &resources, &doc).unwrap();
        assert_eq!(tracker.stack.len(), 1);
    }

    #[test]
    fn test_cs_resets_color() {
        let doc = Document::with_version("1.5");
        let resources = Resources::new();
        let mut tracker = StateTracker::new();
        tracker.apply(&op("cs", vec![name("DeviceCMYK")]), &resources, &doc).unwrap();
        assert_eq!(
            tracker.current().non_stroking_color,
            Color::Device(vec![0.0, 0.0, 0.0, 1.0])
        );

        tracker
            .apply(&op("sc", vec![Object::Real(0.1), Object::Real(0.2), Object::Real(0.3), Object::Real(0.4)]), &resources, &doc)
            .unwrap();
        assert!(matches!(tracker.current().non_stroking_color, Color::Device(ref c) if c.len() == 4));
    }

    #[test]
    fn test_pattern_color_with_underlying_components() {
        let doc = Document::with_version("1.5");
        let mut resources = Resources::new();
        let mut scratch = Document::with_version("1.5");
        resources.replace(
            &mut scratch,
            Category::ColorSpace,
            b"PCS",
            Object::Array(vec![name("Pattern"), name("DeviceRGB")]),
        );

        let mut tracker = StateTracker::new();
        tracker.apply(&op("cs", vec![name("PCS")]), &resources, &doc).unwrap();
        tracker
            .apply(&op("scn", vec![Object::Integer(1), Object::Integer(0), Object::Integer(0), name("P1")]), &resources, &doc)
            .unwrap();

        assert_eq!(
            tracker.current().non_stroking_color,
            Color::Pattern {
                name: b"P1".to_vec(),
                underlying: Some(vec![1.0, 0.0, 0.0]),
            }
        );
    }

    #[test]
    fn test_pattern_color_outside_pattern_space() {
        let doc = Document::with_version("1.5");
        let resources = Resources::new();
        let mut tracker = StateTracker::new();
        let err = tracker
            .apply(&op("scn", vec![name("P1")]), &resources, &doc)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedColorKind(_)));
    }

    #[test]
    fn test_device_color_in_pattern_space() {
        let doc = Document::with_version("1.5");
        let resources = Resources::new();
        let mut tracker = StateTracker::new();
        tracker.apply(&op("CS", vec![name("Pattern")]), &resources, &doc).unwrap();
        let err = tracker
            .apply(&op("SCN", vec![Object::Real(0.5)]), &resources, &doc)
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedColorKind(_)));
    }

    #[test]
    fn test_unknown_color_space_name() {
        let doc = Document::with_version("1.5");
        let resources = Resources::new();
        let mut tracker = StateTracker::new();
        let err = tracker
            .apply(&op("cs", vec![name("CS9")]), &resources, &doc)
            .unwrap_err();
        assert!(matches!(err, Error::MissingResource { .. }));
    }
}
