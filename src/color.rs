//! Color math and color space model
//!
//! Pure RGB/CMYK to gray conversion plus the closed set of color spaces the
//! converter understands. Anything outside that set is reported as
//! [`Error::UnsupportedColorSpace`] instead of being guessed at.

use lopdf::{Document, Object, StringFormat};
use crate::error::{Error, Result};
use crate::pdf::function::Function;
use crate::pdf::resources::resolve;

/// Gray level for an RGB color, each component in `[0, 1]`
pub fn rgb_to_gray(r: f64, g: f64, b: f64) -> f64 {
    (0.30 * r + 0.59 * g + 0.11 * b).clamp(0.0, 1.0)
}

/// Gray level for a CMYK color, each component in `[0, 1]`
///
/// Note this is a coverage sum, not `1 - coverage`, so `(0, 0, 0, 1)` gives
/// 1.0 (white). The same expression is used for the tint transforms built
/// for shadings. Images use the RGB route and keep black ink black.
pub fn cmyk_to_gray(c: f64, m: f64, y: f64, k: f64) -> f64 {
    (0.30 * c + 0.59 * m + 0.11 * y + k).clamp(0.0, 1.0)
}

/// A color space as seen by the content stream
#[derive(Debug, Clone)]
pub enum ColorSpace {
    DeviceGray,
    DeviceRGB,
    DeviceCMYK,
    /// Palette of `hival + 1` entries in `base`
    Indexed {
        base: Box<ColorSpace>,
        hival: u8,
        lookup: Vec<u8>,
    },
    /// Pattern space, with the underlying space of uncolored patterns
    Pattern(Option<Box<ColorSpace>>),
    /// DeviceN (and Separation, as a single colorant)
    DeviceN {
        colorants: Vec<Vec<u8>>,
        alternate: Box<ColorSpace>,
        tint_transform: Function,
    },
    /// CIE L*a*b*; counted but never converted
    Lab,
}

/// A color value in some color space
#[derive(Debug, Clone, PartialEq)]
pub enum Color {
    /// Plain components in the active (non-pattern) color space
    Device(Vec<f64>),
    /// Pattern name, plus the components of the underlying space for uncolored patterns
    Pattern {
        name: Vec<u8>,
        underlying: Option<Vec<f64>>,
    },
}

impl ColorSpace {
    /// Number of color components an `sc`/`scn` operand list carries
    pub fn components(&self) -> usize {
        match self {
            ColorSpace::DeviceGray | ColorSpace::Indexed { .. } => 1,
            ColorSpace::DeviceRGB | ColorSpace::Lab => 3,
            ColorSpace::DeviceCMYK => 4,
            ColorSpace::Pattern(base) => base.as_ref().map_or(0, |b| b.components()),
            ColorSpace::DeviceN { colorants, .. } => colorants.len(),
        }
    }

    /// Initial color after `cs`/`CS` selects this space
    pub fn initial_color(&self) -> Color {
        match self {
            ColorSpace::DeviceCMYK => Color::Device(vec![0.0, 0.0, 0.0, 1.0]),
            ColorSpace::DeviceN { colorants, .. } => Color::Device(vec![1.0; colorants.len()]),
            ColorSpace::Pattern(_) => Color::Pattern {
                name: Vec::new(),
                underlying: None,
            },
            other => Color::Device(vec![0.0; other.components()]),
        }
    }

    /// Short human readable name, for errors and logs
    pub fn family(&self) -> &'static str {
        match self {
            ColorSpace::DeviceGray => "DeviceGray",
            ColorSpace::DeviceRGB => "DeviceRGB",
            ColorSpace::DeviceCMYK => "DeviceCMYK",
            ColorSpace::Indexed { .. } => "Indexed",
            ColorSpace::Pattern(_) => "Pattern",
            ColorSpace::DeviceN { .. } => "DeviceN",
            ColorSpace::Lab => "Lab",
        }
    }

    /// Convert device components in this space to a gray level
    ///
    /// Separation and DeviceN colors go through their tint transform into the
    /// alternate space first; stored functions are resolved against `doc`.
    pub fn to_gray(&self, components: &[f64], doc: &Document) -> Result<f64> {
        if components.len() != self.components() {
            return Err(Error::UnexpectedColorKind(format!(
                "{} expects {} components, got {}",
                self.family(),
                self.components(),
                components.len()
            )));
        }

        match self {
            ColorSpace::DeviceGray => Ok(components[0].clamp(0.0, 1.0)),
            ColorSpace::DeviceRGB => Ok(rgb_to_gray(components[0], components[1], components[2])),
            ColorSpace::DeviceCMYK => Ok(cmyk_to_gray(
                components[0],
                components[1],
                components[2],
                components[3],
            )),
            ColorSpace::Indexed { base, hival, lookup } => {
                let index = components[0].round().clamp(0.0, *hival as f64) as usize;
                let n = base.components();
                let entry = lookup
                    .get(index * n..(index + 1) * n)
                    .ok_or_else(|| Error::UnexpectedColorKind(format!("palette has no entry {}", index)))?;
                let base_components: Vec<f64> = entry.iter().map(|&b| b as f64 / 255.0).collect();
                base.to_gray(&base_components, doc)
            }
            ColorSpace::Pattern(_) => Err(Error::UnexpectedColorKind(
                "device color requested from a pattern space".to_string(),
            )),
            ColorSpace::DeviceN {
                alternate,
                tint_transform,
                ..
            } => {
                let mut tint = tint_transform.evaluate(doc, components)?;
                tint.truncate(alternate.components());
                alternate.to_gray(&tint, doc)
            }
            ColorSpace::Lab => Err(Error::UnsupportedColorSpace(self.family().to_string())),
        }
    }

    /// Parse a color space object (a family name or an array), following references
    pub fn from_object(object: &Object, doc: &Document) -> Result<Self> {
        match resolve(doc, object)? {
            Object::Name(name) => Self::from_family_name(name),
            Object::Array(items) => Self::from_array(items, doc),
            _ => Err(Error::UnsupportedColorSpace(
                "color space must be a name or array".to_string(),
            )),
        }
    }

    /// Device families and their inline-image abbreviations
    pub fn from_family_name(name: &[u8]) -> Result<Self> {
        match name {
            b"DeviceGray" | b"G" | b"CalGray" => Ok(ColorSpace::DeviceGray),
            b"DeviceRGB" | b"RGB" | b"CalRGB" => Ok(ColorSpace::DeviceRGB),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::DeviceCMYK),
            b"Pattern" => Ok(ColorSpace::Pattern(None)),
            other => Err(Error::UnsupportedColorSpace(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    fn from_array(items: &[Object], doc: &Document) -> Result<Self> {
        let family = match items.first().map(|o| resolve(doc, o)).transpose()? {
            Some(Object::Name(name)) => name.as_slice(),
            _ => return Err(Error::UnsupportedColorSpace("empty color space array".to_string())),
        };
        let operand = |i: usize| array_operand(items, i, doc);

        match family {
            b"CalGray" | b"DeviceGray" | b"G" => Ok(ColorSpace::DeviceGray),
            b"CalRGB" | b"DeviceRGB" | b"RGB" => Ok(ColorSpace::DeviceRGB),
            b"DeviceCMYK" | b"CMYK" => Ok(ColorSpace::DeviceCMYK),
            b"Lab" => Ok(ColorSpace::Lab),
            b"ICCBased" => {
                let dict = match operand(1)? {
                    Object::Stream(stream) => &stream.dict,
                    Object::Dictionary(dict) => dict,
                    _ => return Err(Error::UnsupportedColorSpace("ICCBased without stream".to_string())),
                };
                if let Ok(alternate) = dict.get(b"Alternate") {
                    return Self::from_object(alternate, doc);
                }
                match dict.get(b"N").ok().and_then(as_number) {
                    Some(n) if n == 1.0 => Ok(ColorSpace::DeviceGray),
                    Some(n) if n == 3.0 => Ok(ColorSpace::DeviceRGB),
                    Some(n) if n == 4.0 => Ok(ColorSpace::DeviceCMYK),
                    n => Err(Error::UnsupportedColorSpace(format!("ICCBased with N = {:?}", n))),
                }
            }
            b"Indexed" | b"I" => {
                let base = Self::from_object(operand(1)?, doc)?;
                let hival = operand(2).ok().and_then(as_number).unwrap_or(0.0).clamp(0.0, 255.0) as u8;
                let lookup = match operand(3)? {
                    Object::String(bytes, _) => bytes.clone(),
                    Object::Stream(stream) => stream
                        .decompressed_content()
                        .unwrap_or_else(|_| stream.content.clone()),
                    _ => return Err(Error::UnsupportedColorSpace("Indexed lookup table".to_string())),
                };
                Ok(ColorSpace::Indexed {
                    base: Box::new(base),
                    hival,
                    lookup,
                })
            }
            b"Pattern" => match items.get(1) {
                Some(base) => Ok(ColorSpace::Pattern(Some(Box::new(Self::from_object(base, doc)?)))),
                None => Ok(ColorSpace::Pattern(None)),
            },
            b"Separation" | b"DeviceN" => {
                let colorants = match operand(1)? {
                    Object::Name(name) => vec![name.clone()],
                    Object::Array(names) => names
                        .iter()
                        .filter_map(|n| match n {
                            Object::Name(name) => Some(name.clone()),
                            _ => None,
                        })
                        .collect(),
                    _ => return Err(Error::UnsupportedColorSpace("DeviceN colorants".to_string())),
                };
                let alternate = Self::from_object(operand(2)?, doc)?;
                let tint_transform = Function::Stored(items.get(3).cloned().unwrap_or(Object::Null));
                Ok(ColorSpace::DeviceN {
                    colorants,
                    alternate: Box::new(alternate),
                    tint_transform,
                })
            }
            other => Err(Error::UnsupportedColorSpace(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Serialize back to a PDF object; calculator functions are stored as new streams in `doc`
    pub fn to_object(&self, doc: &mut Document) -> Object {
        match self {
            ColorSpace::DeviceGray => Object::Name(b"DeviceGray".to_vec()),
            ColorSpace::DeviceRGB => Object::Name(b"DeviceRGB".to_vec()),
            ColorSpace::DeviceCMYK => Object::Name(b"DeviceCMYK".to_vec()),
            ColorSpace::Lab => Object::Name(b"Lab".to_vec()),
            ColorSpace::Pattern(None) => Object::Name(b"Pattern".to_vec()),
            ColorSpace::Pattern(Some(base)) => Object::Array(vec![
                Object::Name(b"Pattern".to_vec()),
                base.to_object(doc),
            ]),
            ColorSpace::Indexed { base, hival, lookup } => Object::Array(vec![
                Object::Name(b"Indexed".to_vec()),
                base.to_object(doc),
                Object::Integer(*hival as i64),
                Object::String(lookup.clone(), StringFormat::Hexadecimal),
            ]),
            ColorSpace::DeviceN {
                colorants,
                alternate,
                tint_transform,
            } => Object::Array(vec![
                Object::Name(b"DeviceN".to_vec()),
                Object::Array(colorants.iter().cloned().map(Object::Name).collect()),
                alternate.to_object(doc),
                tint_transform.store(doc),
            ]),
        }
    }
}

fn array_operand<'a>(items: &'a [Object], index: usize, doc: &'a Document) -> Result<&'a Object> {
    let item = items
        .get(index)
        .ok_or_else(|| Error::UnsupportedColorSpace("color space array is too short".to_string()))?;
    resolve(doc, item)
}

/// Numeric value of an Integer or Real operand
pub(crate) fn as_number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// A Real operand for a computed value
pub(crate) fn real(value: f64) -> Object {
    Object::Real((value as f32).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_rgb_to_gray_matches_weights() {
        let steps: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];
        for &r in &steps {
            for &g in &steps {
                for &b in &steps {
                    let expected = (0.30 * r + 0.59 * g + 0.11 * b).clamp(0.0, 1.0);
                    assert!(close(rgb_to_gray(r, g, b), expected));
                }
            }
        }
        assert!(close(rgb_to_gray(1.0, 0.0, 0.0), 0.3));
        assert!(close(rgb_to_gray(0.0, 1.0, 0.0), 0.59));
        assert!(close(rgb_to_gray(1.0, 1.0, 1.0), 1.0));
    }

    #[test]
    fn test_cmyk_to_gray_clamps() {
        assert!(close(cmyk_to_gray(0.0, 0.0, 0.0, 0.0), 0.0));
        assert!(close(cmyk_to_gray(1.0, 0.0, 0.0, 0.0), 0.3));
        assert!(close(cmyk_to_gray(0.0, 0.0, 1.0, 0.5), 0.61));
        assert!(close(cmyk_to_gray(1.0, 1.0, 1.0, 1.0), 1.0));
        assert!(close(cmyk_to_gray(0.0, 1.0, 0.0, 0.6), 1.0));
        // Full black ink is a full coverage sum
        assert!(close(cmyk_to_gray(0.0, 0.0, 0.0, 1.0), 1.0));
    }

    #[test]
    fn test_initial_colors() {
        assert_eq!(ColorSpace::DeviceRGB.initial_color(), Color::Device(vec![0.0, 0.0, 0.0]));
        assert_eq!(
            ColorSpace::DeviceCMYK.initial_color(),
            Color::Device(vec![0.0, 0.0, 0.0, 1.0])
        );
        assert!(matches!(ColorSpace::Pattern(None).initial_color(), Color::Pattern { .. }));
    }

    #[test]
    fn test_to_gray_checks_arity() {
        let doc = Document::with_version("1.5");
        let err = ColorSpace::DeviceRGB.to_gray(&[1.0], &doc).unwrap_err();
        assert!(matches!(err, Error::UnexpectedColorKind(_)));
    }

    #[test]
    fn test_indexed_to_gray_uses_palette() {
        let space = ColorSpace::Indexed {
            base: Box::new(ColorSpace::DeviceRGB),
            hival: 1,
            lookup: vec![0, 0, 0, 255, 0, 0],
        };
        let doc = Document::with_version("1.5");
        assert!(close(space.to_gray(&[1.0], &doc).unwrap(), 0.3));
        assert!(close(space.to_gray(&[0.0], &doc).unwrap(), 0.0));
    }

    #[test]
    fn test_lab_is_unsupported() {
        let doc = Document::with_version("1.5");
        let err = ColorSpace::Lab.to_gray(&[50.0, 0.0, 0.0], &doc).unwrap_err();
        assert!(matches!(err, Error::UnsupportedColorSpace(_)));
    }

    #[test]
    fn test_separation_goes_through_tint_transform() {
        let mut doc = Document::with_version("1.5");
        // Spot color whose full tint is pure green in RGB
        let mut function = lopdf::Dictionary::new();
        function.set("FunctionType", Object::Integer(2));
        function.set("Domain", Object::Array(vec![Object::Integer(0), Object::Integer(1)]));
        function.set("C0", Object::Array(vec![Object::Integer(1), Object::Integer(1), Object::Integer(1)]));
        function.set("C1", Object::Array(vec![Object::Integer(0), Object::Integer(1), Object::Integer(0)]));
        function.set("N", Object::Integer(1));
        let function_id = doc.add_object(Object::Dictionary(function));

        let space = ColorSpace::from_object(
            &Object::Array(vec![
                Object::Name(b"Separation".to_vec()),
                Object::Name(b"Spot Green".to_vec()),
                Object::Name(b"DeviceRGB".to_vec()),
                Object::Reference(function_id),
            ]),
            &doc,
        )
        .unwrap();

        assert_eq!(space.components(), 1);
        assert!(close(space.to_gray(&[1.0], &doc).unwrap(), 0.59));
        assert!(close(space.to_gray(&[0.0], &doc).unwrap(), 1.0));
        assert!(close(space.to_gray(&[0.5], &doc).unwrap(), 0.795));
    }

    #[test]
    fn test_parse_family_names_and_arrays() {
        let doc = Document::with_version("1.5");
        let cs = ColorSpace::from_object(&Object::Name(b"DeviceCMYK".to_vec()), &doc).unwrap();
        assert!(matches!(cs, ColorSpace::DeviceCMYK));

        let pattern = Object::Array(vec![
            Object::Name(b"Pattern".to_vec()),
            Object::Name(b"DeviceRGB".to_vec()),
        ]);
        let cs = ColorSpace::from_object(&pattern, &doc).unwrap();
        match &cs {
            ColorSpace::Pattern(Some(base)) => assert!(matches!(**base, ColorSpace::DeviceRGB)),
            other => panic!("expected pattern space, got {:?}", other),
        }
        assert_eq!(cs.components(), 3);
    }

    #[test]
    fn test_parse_unknown_family_fails() {
        let doc = Document::with_version("1.5");
        let result = ColorSpace::from_object(&Object::Name(b"Bogus".to_vec()), &doc);
        assert!(matches!(result, Err(Error::UnsupportedColorSpace(_))));
    }
}
