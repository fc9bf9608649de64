//! Resource dictionaries
//!
//! A [`Resources`] value owns a working copy of one resource dictionary (a
//! page's, a form's or a tiling pattern's). Lookups resolve indirect
//! references through the document; replacements are written as new
//! indirect objects so other owners of the original object keep seeing it
//! unchanged. The entries they replaced stay available through
//! [`Resources::lookup_original`], for interpreting operands that were
//! written against the original resource.

use std::collections::HashMap;
use lopdf::{Dictionary, Document, Object, ObjectId};
use crate::error::{Error, Result};

/// Named resource categories the converter reads or rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    ColorSpace,
    Pattern,
    Shading,
    XObject,
}

impl Category {
    /// Key of the category subdictionary
    pub fn key(self) -> &'static [u8] {
        match self {
            Category::ColorSpace => b"ColorSpace",
            Category::Pattern => b"Pattern",
            Category::Shading => b"Shading",
            Category::XObject => b"XObject",
        }
    }
}

/// Follow indirect references until a direct object is reached
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object> {
    let mut current = object;
    for _ in 0..32 {
        match current {
            Object::Reference(id) => current = doc.get_object(*id)?,
            direct => return Ok(direct),
        }
    }
    Err(Error::General("reference chain too long".to_string()))
}

/// Working copy of a resource dictionary
#[derive(Debug, Clone, Default)]
pub struct Resources {
    dict: Dictionary,
    originals: HashMap<(Category, Vec<u8>), Object>,
}

impl Resources {
    /// Empty scope, for streams that define no resources
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dictionary(dict: Dictionary) -> Self {
        Self {
            dict,
            originals: HashMap::new(),
        }
    }

    /// Load a resource dictionary given directly or by reference
    ///
    /// Category subdictionaries held by reference are copied inline, so the
    /// scope can be rewritten without touching objects shared with other
    /// scopes.
    pub fn load(object: &Object, doc: &Document) -> Result<Self> {
        let dict = match resolve(doc, object)? {
            Object::Dictionary(dict) => dict.clone(),
            Object::Null => Dictionary::new(),
            _ => return Err(Error::General("Resources is not a dictionary".to_string())),
        };

        let mut inlined = Dictionary::new();
        for (key, value) in dict.iter() {
            match resolve(doc, value) {
                Ok(Object::Dictionary(sub)) => inlined.set(key.clone(), Object::Dictionary(sub.clone())),
                _ => inlined.set(key.clone(), value.clone()),
            }
        }

        Ok(Self::from_dictionary(inlined))
    }

    /// Resources in effect for a page, inherited through the page tree when absent
    pub fn for_page(doc: &Document, page_id: ObjectId) -> Result<Self> {
        let mut node_id = page_id;
        for _ in 0..64 {
            let node = doc.get_dictionary(node_id)?;
            if let Ok(resources) = node.get(b"Resources") {
                return Self::load(resources, doc);
            }
            match node.get(b"Parent") {
                Ok(Object::Reference(parent)) => node_id = *parent,
                _ => break,
            }
        }
        Ok(Self::new())
    }

    /// The raw (possibly indirect) entry registered under `name`
    pub fn entry(&self, category: Category, name: &[u8]) -> Option<&Object> {
        match self.dict.get(category.key()) {
            Ok(Object::Dictionary(sub)) => sub.get(name).ok(),
            _ => None,
        }
    }

    pub fn contains(&self, category: Category, name: &[u8]) -> bool {
        self.entry(category, name).is_some()
    }

    /// Resolved copy of the resource registered under `name`
    pub fn lookup(&self, doc: &Document, category: Category, name: &[u8]) -> Result<Object> {
        let entry = self
            .entry(category, name)
            .ok_or_else(|| Error::missing(category.key(), name))?;
        Ok(resolve(doc, entry)?.clone())
    }

    /// Like [`Resources::lookup`], but sees the entry as it was before any replacement
    pub fn lookup_original(&self, doc: &Document, category: Category, name: &[u8]) -> Result<Object> {
        match self.originals.get(&(category, name.to_vec())) {
            Some(original) => Ok(resolve(doc, original)?.clone()),
            None => self.lookup(doc, category, name),
        }
    }

    /// Register `value` under `name`, replacing the previous entry
    ///
    /// Streams and dictionaries are added to the document as new indirect
    /// objects; anything else is stored inline.
    pub fn replace(&mut self, doc: &mut Document, category: Category, name: &[u8], value: Object) {
        let value = match value {
            Object::Stream(_) | Object::Dictionary(_) => Object::Reference(doc.add_object(value)),
            direct => direct,
        };

        if let Some(previous) = self.entry(category, name).cloned() {
            self.originals
                .entry((category, name.to_vec()))
                .or_insert(previous);
        }

        let key = category.key();
        let mut sub = match self.dict.get(key) {
            Ok(Object::Dictionary(sub)) => sub.clone(),
            _ => Dictionary::new(),
        };
        sub.set(name.to_vec(), value);
        self.dict.set(key.to_vec(), Object::Dictionary(sub));
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }

    pub fn into_dictionary(self) -> Dictionary {
        self.dict
    }
}
