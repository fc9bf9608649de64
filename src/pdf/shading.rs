//! Shading conversion
//!
//! A shading's colors come out of its function in the shading's own color
//! space, so the function is left alone and only the color space changes:
//! it becomes a DeviceN space whose colorants are the original components
//! and whose alternate is DeviceGray, with a calculator tint transform that
//! mixes the components down to one gray level.

use lopdf::{Dictionary, Document, Object};
use crate::color::ColorSpace;
use crate::error::{Error, Result};
use crate::pdf::function::{CalculatorFunction, Function};

/// Gray replacement for a shading color space, or `None` when it is already gray
pub fn gray_shading_space(space: &ColorSpace) -> Result<Option<ColorSpace>> {
    if let ColorSpace::DeviceN { alternate, .. } = space {
        if matches!(**alternate, ColorSpace::DeviceGray) {
            return Ok(None);
        }
    }
    if matches!(space, ColorSpace::Lab) {
        return Err(Error::UnsupportedColorSpace("Lab shading".to_string()));
    }

    let (colorants, function) = match space.components() {
        1 => return Ok(None),
        3 => ("RGB", CalculatorFunction::rgb_to_gray()),
        4 => ("CMYK", CalculatorFunction::cmyk_to_gray()),
        n => {
            return Err(Error::UnsupportedColorSpace(format!(
                "shading in {} with {} components",
                space.family(),
                n
            )))
        }
    };

    Ok(Some(ColorSpace::DeviceN {
        colorants: colorants.bytes().map(|c| vec![c]).collect(),
        alternate: Box::new(ColorSpace::DeviceGray),
        tint_transform: Function::Calculator(function),
    }))
}

/// Convert a shading dictionary or stream
///
/// Returns the rewritten shading, or `None` when it needs no change.
pub fn convert_shading(doc: &mut Document, mut shading: Object) -> Result<Option<Object>> {
    let space = {
        let dict = shading_dict(&mut shading)?;
        let object = dict
            .get(b"ColorSpace")
            .map_err(|_| Error::UnsupportedColorSpace("shading without /ColorSpace".to_string()))?;
        ColorSpace::from_object(object, doc)?
    };

    let gray = match gray_shading_space(&space)? {
        Some(gray) => gray,
        None => return Ok(None),
    };
    log::debug!("Replacing {} shading color space with DeviceN/DeviceGray", space.family());

    let gray_object = gray.to_object(doc);
    shading_dict(&mut shading)?.set("ColorSpace", gray_object);
    Ok(Some(shading))
}

fn shading_dict(shading: &mut Object) -> Result<&mut Dictionary> {
    match shading {
        Object::Dictionary(dict) => Ok(dict),
        Object::Stream(stream) => Ok(&mut stream.dict),
        _ => Err(Error::General("shading is neither a dictionary nor a stream".to_string())),
    }
}
