//! Pattern conversion
//!
//! Colored tiling patterns are content streams of their own and go through
//! the converter with their own resources. Uncolored tiling patterns get
//! their color from the `scn` that selects them, so they are left alone.
//! Shading patterns hand their embedded shading to the shading converter.

use lopdf::{Dictionary, Object, Stream};
use crate::error::{Error, Result};
use crate::pdf::content;
use crate::pdf::convert::Converter;
use crate::pdf::resources::{resolve, Resources};
use crate::pdf::shading::convert_shading;

const TILING: i64 = 1;
const SHADING: i64 = 2;
const UNCOLORED: i64 = 2;

impl Converter<'_> {
    /// Convert a resolved Pattern resource; `None` when it needs no change
    pub(crate) fn convert_pattern(&mut self, pattern: Object) -> Result<Option<Object>> {
        match pattern {
            Object::Stream(stream) if integer(&stream.dict, b"PatternType") == Some(TILING) => {
                Ok(self.convert_tiling(stream)?.map(Object::Stream))
            }
            Object::Dictionary(dict) if integer(&dict, b"PatternType") == Some(SHADING) => {
                Ok(self.convert_shading_pattern(dict)?.map(Object::Dictionary))
            }
            _ => Err(Error::General(
                "pattern is neither a tiling stream nor a shading dictionary".to_string(),
            )),
        }
    }

    fn convert_tiling(&mut self, mut pattern: Stream) -> Result<Option<Stream>> {
        if integer(&pattern.dict, b"PaintType") == Some(UNCOLORED) {
            return Ok(None);
        }

        let operations = content::decode(&content::stream_content(&pattern)?)?;
        let mut scope = match pattern.dict.get(b"Resources") {
            Ok(object) => Resources::load(object, self.doc)?,
            Err(_) => Resources::new(),
        };

        let converted = self.convert(&operations, &mut scope)?;
        pattern.dict.set("Resources", Object::Dictionary(scope.into_dictionary()));
        content::set_stream_content(&mut pattern, content::encode(&converted)?);
        Ok(Some(pattern))
    }

    fn convert_shading_pattern(&mut self, mut pattern: Dictionary) -> Result<Option<Dictionary>> {
        let shading = match pattern.get(b"Shading") {
            Ok(object) => resolve(self.doc, object)?.clone(),
            Err(_) => return Err(Error::General("shading pattern has no /Shading".to_string())),
        };

        match convert_shading(self.doc, shading)? {
            Some(converted) => {
                let value = match converted {
                    Object::Stream(_) => Object::Reference(self.doc.add_object(converted)),
                    dict => dict,
                };
                pattern.set("Shading", value);
                Ok(Some(pattern))
            }
            None => Ok(None),
        }
    }
}

fn integer(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict.get(key) {
        Ok(Object::Integer(value)) => Some(*value),
        _ => None,
    }
}
