//! Operator rewriting
//!
//! [`Converter::convert`] makes one left-to-right pass over a content stream.
//! Each operator is first replayed into the [`StateTracker`], then rewritten
//! against the resulting state: colors become single gray levels, color
//! spaces become DeviceGray, and the patterns, shadings, images and forms the
//! stream names are converted and written back into the resource scope.

use std::collections::HashSet;

use lopdf::content::Operation;
use lopdf::{Document, Object, Stream};

use crate::color::{real, Color, ColorSpace};
use crate::error::{Error, Result};
use crate::pdf::content;
use crate::pdf::image::{convert_image, Placement};
use crate::pdf::resources::{Category, Resources};
use crate::pdf::shading::convert_shading;
use crate::pdf::state::{paint_of, single_name, Paint, StateTracker};

/// Engine settings
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Maximum nesting of forms and tiling patterns
    pub max_depth: usize,
    /// Quality used when an image is re-encoded as JPEG
    pub jpeg_quality: u8,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            max_depth: 32,
            jpeg_quality: 90,
        }
    }
}

/// Names already handled in one pass over one scope
#[derive(Debug, Default)]
struct Pass {
    patterns: HashSet<Vec<u8>>,
    shadings: HashSet<Vec<u8>>,
    xobjects: HashSet<Vec<u8>>,
}

/// Converts content streams of one document to grayscale
pub struct Converter<'d> {
    pub(crate) doc: &'d mut Document,
    pub(crate) options: ConvertOptions,
    depth: usize,
}

impl<'d> Converter<'d> {
    pub fn new(doc: &'d mut Document, options: ConvertOptions) -> Self {
        Self {
            doc,
            options,
            depth: 0,
        }
    }

    /// Rewrite `operations` to grayscale
    ///
    /// Resources the stream uses are converted and replaced in `resources`.
    /// Every call starts with fresh graphics state and fresh memo sets; nested
    /// forms and tiling patterns call back in here, up to `max_depth` deep.
    pub fn convert(&mut self, operations: &[Operation], resources: &mut Resources) -> Result<Vec<Operation>> {
        if self.depth >= self.options.max_depth {
            return Err(Error::RecursionLimit(self.options.max_depth));
        }
        self.depth += 1;
        let result = self.convert_scope(operations, resources);
        self.depth -= 1;
        result
    }

    fn convert_scope(&mut self, operations: &[Operation], resources: &mut Resources) -> Result<Vec<Operation>> {
        let mut pass = Pass::default();
        let mut tracker = StateTracker::new();
        let mut output = Vec::with_capacity(operations.len());

        for op in operations {
            tracker.apply(op, resources, self.doc)?;
            output.push(self.rewrite(op, &tracker, resources, &mut pass)?);
        }

        Ok(output)
    }

    fn rewrite(
        &mut self,
        op: &Operation,
        tracker: &StateTracker,
        resources: &mut Resources,
        pass: &mut Pass,
    ) -> Result<Operation> {
        let state = tracker.current();
        match op.operator.as_str() {
            "CS" | "cs" => self.rewrite_space(op, state.space(paint_of(&op.operator)), resources),
            "SC" | "SCN" | "sc" | "scn" => {
                let paint = paint_of(&op.operator);
                self.rewrite_color(op, state.space(paint), state.color(paint), resources, pass)
            }
            "RG" | "rg" | "K" | "k" => {
                let paint = paint_of(&op.operator);
                direct_gray(op, state.space(paint), state.color(paint), self.doc)
            }
            "sh" => {
                self.convert_named_shading(single_name(op)?, resources, pass)?;
                Ok(op.clone())
            }
            "BI" => self.rewrite_inline_image(op, resources),
            "Do" => {
                self.invoke_xobject(single_name(op)?, resources, pass)?;
                Ok(op.clone())
            }
            _ => Ok(op.clone()),
        }
    }

    /// `cs`/`CS`: pattern spaces keep their name with a gray base, everything else becomes DeviceGray
    fn rewrite_space(&mut self, op: &Operation, space: &ColorSpace, resources: &mut Resources) -> Result<Operation> {
        match space {
            ColorSpace::Pattern(None) => Ok(op.clone()),
            ColorSpace::Pattern(Some(base)) => {
                if !matches!(**base, ColorSpace::DeviceGray) {
                    let name = single_name(op)?;
                    let gray = ColorSpace::Pattern(Some(Box::new(ColorSpace::DeviceGray)));
                    let object = gray.to_object(self.doc);
                    resources.replace(self.doc, Category::ColorSpace, name, object);
                    log::debug!(
                        "Pattern color space /{} now has a DeviceGray base",
                        String::from_utf8_lossy(name)
                    );
                }
                Ok(op.clone())
            }
            _ => Ok(Operation::new(
                &op.operator,
                vec![Object::Name(b"DeviceGray".to_vec())],
            )),
        }
    }

    /// `sc`/`scn`/`SC`/`SCN`
    fn rewrite_color(
        &mut self,
        op: &Operation,
        space: &ColorSpace,
        color: &Color,
        resources: &mut Resources,
        pass: &mut Pass,
    ) -> Result<Operation> {
        match (space, color) {
            (ColorSpace::Pattern(base), Color::Pattern { name, underlying }) => {
                let mut operands = Vec::with_capacity(2);
                if let Some(components) = underlying {
                    let base = base.as_ref().ok_or_else(|| {
                        Error::UnexpectedColorKind(
                            "pattern color has components but the Pattern space has no base".to_string(),
                        )
                    })?;
                    operands.push(real(base.to_gray(components, self.doc)?));
                }
                operands.push(Object::Name(name.clone()));
                self.convert_named_pattern(name, resources, pass)?;
                Ok(Operation::new(&op.operator, operands))
            }
            (ColorSpace::DeviceGray, Color::Device(_)) => Ok(op.clone()),
            (ColorSpace::Pattern(_), Color::Device(_)) | (_, Color::Pattern { .. }) => {
                Err(Error::UnexpectedColorKind(format!(
                    "'{}' color does not match the {} color space",
                    op.operator,
                    space.family()
                )))
            }
            (_, Color::Device(components)) => {
                Ok(Operation::new(&op.operator, vec![real(space.to_gray(components, self.doc)?)]))
            }
        }
    }

    fn convert_named_pattern(&mut self, name: &[u8], resources: &mut Resources, pass: &mut Pass) -> Result<()> {
        if !pass.patterns.insert(name.to_vec()) {
            return Ok(());
        }
        let pattern = resources.lookup(self.doc, Category::Pattern, name)?;
        if let Some(converted) = self.convert_pattern(pattern)? {
            resources.replace(self.doc, Category::Pattern, name, converted);
            log::debug!("Converted pattern /{}", String::from_utf8_lossy(name));
        }
        Ok(())
    }

    fn convert_named_shading(&mut self, name: &[u8], resources: &mut Resources, pass: &mut Pass) -> Result<()> {
        if !pass.shadings.insert(name.to_vec()) {
            return Ok(());
        }
        let shading = resources.lookup(self.doc, Category::Shading, name)?;
        if let Some(converted) = convert_shading(self.doc, shading)? {
            resources.replace(self.doc, Category::Shading, name, converted);
            log::debug!("Converted shading /{}", String::from_utf8_lossy(name));
        }
        Ok(())
    }

    fn rewrite_inline_image(&mut self, op: &Operation, resources: &Resources) -> Result<Operation> {
        let image = match op.operands.as_slice() {
            [Object::Stream(image)] => image,
            _ => return Err(Error::operands("BI", "expected inline image data")),
        };
        match convert_image(self.doc, image, resources, Placement::Inline, &self.options)? {
            Some(gray) => Ok(Operation::new("BI", vec![Object::Stream(gray)])),
            None => Ok(op.clone()),
        }
    }

    /// `Do`: images are converted in place, forms are recursed into once per scope
    fn invoke_xobject(&mut self, name: &[u8], resources: &mut Resources, pass: &mut Pass) -> Result<()> {
        if !pass.xobjects.insert(name.to_vec()) {
            return Ok(());
        }

        let xobject = match resources.lookup(self.doc, Category::XObject, name)? {
            Object::Stream(stream) => stream,
            _ => {
                return Err(Error::General(format!(
                    "XObject /{} is not a stream",
                    String::from_utf8_lossy(name)
                )))
            }
        };
        let subtype = xobject
            .dict
            .get(b"Subtype")
            .and_then(|s| s.as_name())
            .map(|s| s.to_vec())
            .unwrap_or_default();

        let converted = match subtype.as_slice() {
            b"Image" => convert_image(self.doc, &xobject, resources, Placement::XObject, &self.options)?,
            b"Form" => Some(self.convert_form(xobject, resources)?),
            _ => None,
        };

        if let Some(stream) = converted {
            resources.replace(self.doc, Category::XObject, name, Object::Stream(stream));
            log::debug!(
                "Converted {} XObject /{}",
                String::from_utf8_lossy(&subtype),
                String::from_utf8_lossy(name)
            );
        }
        Ok(())
    }

    /// Recurse into a form with its own resources, or the caller's when it has none
    fn convert_form(&mut self, mut form: Stream, caller: &mut Resources) -> Result<Stream> {
        let operations = content::decode(&content::stream_content(&form)?)?;

        let converted = match form.dict.get(b"Resources").ok().cloned() {
            Some(object) => {
                let mut scope = Resources::load(&object, self.doc)?;
                let converted = self.convert(&operations, &mut scope)?;
                form.dict.set("Resources", Object::Dictionary(scope.into_dictionary()));
                converted
            }
            None => self.convert(&operations, caller)?,
        };

        content::set_stream_content(&mut form, content::encode(&converted)?);
        Ok(form)
    }
}

/// `RG`/`rg`/`K`/`k` become `G`/`g`
fn direct_gray(op: &Operation, space: &ColorSpace, color: &Color, doc: &Document) -> Result<Operation> {
    let components = match color {
        Color::Device(components) => components,
        Color::Pattern { .. } => {
            return Err(Error::UnexpectedColorKind(format!(
                "'{}' set a pattern color",
                op.operator
            )))
        }
    };
    let operator = match paint_of(&op.operator) {
        Paint::Stroking => "G",
        Paint::NonStroking => "g",
    };
    Ok(Operation::new(operator, vec![real(space.to_gray(components, doc)?)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Dictionary;

    fn name(n: &str) -> Object {
        Object::Name(n.as_bytes().to_vec())
    }

    fn run(doc: &mut Document, source: &str, resources: &mut Resources) -> Result<String> {
        let operations = content::decode(source.as_bytes())?;
        let output = Converter::new(doc, ConvertOptions::default()).convert(&operations, resources)?;
        Ok(content::describe_all(&output))
    }

    fn describe_source(source: &str) -> String {
        content::describe_all(&content::decode(source.as_bytes()).unwrap())
    }

    fn scope(category: Category, entries: Vec<(&str, Object)>) -> Resources {
        let mut sub = Dictionary::new();
        for (key, value) in entries {
            sub.set(key, value);
        }
        let mut dict = Dictionary::new();
        dict.set(String::from_utf8_lossy(category.key()).into_owned(), Object::Dictionary(sub));
        Resources::from_dictionary(dict)
    }

    fn form(content: &str, resources: Option<Dictionary>) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("Type", name("XObject"));
        dict.set("Subtype", name("Form"));
        if let Some(resources) = resources {
            dict.set("Resources", Object::Dictionary(resources));
        }
        Stream::new(dict, content.as_bytes().to_vec())
    }

    fn tiling(content: &str, paint_type: i64) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("PatternType", Object::Integer(1));
        dict.set("PaintType", Object::Integer(paint_type));
        dict.set("TilingType", Object::Integer(1));
        Stream::new(dict, content.as_bytes().to_vec())
    }

    fn stream_at(doc: &Document, resources: &Resources, category: Category, key: &[u8]) -> Stream {
        match resources.lookup(doc, category, key).unwrap() {
            Object::Stream(stream) => stream,
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_gray_stream_is_unchanged() {
        let mut doc = Document::with_version("1.5");
        let source = "q 0.5 g 0 0 10 10 re f 1 G /DeviceGray cs 0.2 sc 5 w Q";
        let output = run(&mut doc, source, &mut Resources::new()).unwrap();
        assert_eq!(output, describe_source(source));
    }

    #[test]
    fn test_rgb_stroke_becomes_gray() {
        let mut doc = Document::with_version("1.5");
        let output = run(&mut doc, "1 0 0 RG 0 0 100 100 re S", &mut Resources::new()).unwrap();
        assert_eq!(output, "0.3 G\n0 0 100 100 re\nS");
    }

    #[test]
    fn test_cmyk_fill_becomes_gray() {
        let mut doc = Document::with_version("1.5");
        let output = run(&mut doc, "0 0 0 1 k", &mut Resources::new()).unwrap();
        assert_eq!(output, "1 g");
    }

    #[test]
    fn test_color_space_operator_becomes_device_gray() {
        let mut doc = Document::with_version("1.5");
        let output = run(&mut doc, "/DeviceRGB cs 0 1 0 sc /DeviceCMYK CS", &mut Resources::new()).unwrap();
        assert_eq!(output, "/DeviceGray cs\n0.59 sc\n/DeviceGray CS");
    }

    #[test]
    fn test_indexed_color_uses_palette() {
        let mut doc = Document::with_version("1.5");
        let indexed = Object::Array(vec![
            name("Indexed"),
            name("DeviceRGB"),
            Object::Integer(1),
            Object::String(vec![0, 0, 0, 255, 0, 0], lopdf::StringFormat::Hexadecimal),
        ]);
        let mut resources = scope(Category::ColorSpace, vec![("CS1", indexed)]);
        let output = run(&mut doc, "/CS1 cs 1 scn", &mut resources).unwrap();
        assert_eq!(output, "/DeviceGray cs\n0.3 scn");
    }

    #[test]
    fn test_uncolored_pattern_keeps_name() {
        let mut doc = Document::with_version("1.5");
        let pattern_id = doc.add_object(tiling("0 0 1 1 re f", 2));
        let mut resources = scope(
            Category::ColorSpace,
            vec![("CS0", Object::Array(vec![name("Pattern"), name("DeviceRGB")]))],
        );
        resources.replace(&mut doc, Category::Pattern, b"P1", Object::Reference(pattern_id));

        let source = "/CS0 cs 1 0 0 /P1 scn 0 0 5 5 re f /CS0 cs 0 1 0 /P1 scn";
        let output = run(&mut doc, source, &mut resources).unwrap();
        assert_eq!(output, "/CS0 cs\n0.3 /P1 scn\n0 0 5 5 re\nf\n/CS0 cs\n0.59 /P1 scn");

        let space = resources.lookup(&doc, Category::ColorSpace, b"CS0").unwrap();
        assert!(matches!(&space.as_array().unwrap()[1], Object::Name(n) if n == b"DeviceGray"));
        // Uncolored patterns are left alone
        assert!(matches!(resources.entry(Category::Pattern, b"P1"), Some(Object::Reference(id)) if *id == pattern_id));
    }

    #[test]
    fn test_pattern_converted_once() {
        let mut doc = Document::with_version("1.5");
        let pattern_id = doc.add_object(tiling("0 1 0 rg 0 0 5 5 re f", 1));
        let mut resources = Resources::new();
        resources.replace(&mut doc, Category::Pattern, b"P1", Object::Reference(pattern_id));

        let before = doc.objects.len();
        let source = "/Pattern cs /P1 scn 0 0 1 1 re f /P1 scn 2 2 1 1 re f /P1 scn";
        let output = run(&mut doc, source, &mut resources).unwrap();
        assert_eq!(output, describe_source(source));
        assert_eq!(output.matches("/P1 scn").count(), 3);
        assert_eq!(doc.objects.len(), before + 1);

        let pattern = stream_at(&doc, &resources, Category::Pattern, b"P1");
        let inner = content::decode(&pattern.content).unwrap();
        assert_eq!(content::describe_all(&inner), "0.59 g\n0 0 5 5 re\nf");
    }

    #[test]
    fn test_shading_converted_once() {
        let mut doc = Document::with_version("1.5");
        let mut shading = Dictionary::new();
        shading.set("ShadingType", Object::Integer(2));
        shading.set("ColorSpace", name("DeviceRGB"));
        let mut resources = scope(Category::Shading, vec![("Sh1", Object::Dictionary(shading))]);

        let before = doc.objects.len();
        let output = run(&mut doc, "/Sh1 sh /Sh1 sh", &mut resources).unwrap();
        assert_eq!(output, "/Sh1 sh\n/Sh1 sh");
        // One tint transform and one replacement shading
        assert_eq!(doc.objects.len(), before + 2);

        let converted = resources.lookup(&doc, Category::Shading, b"Sh1").unwrap();
        let space = converted.as_dict().unwrap().get(b"ColorSpace").unwrap();
        assert!(matches!(&space.as_array().unwrap()[0], Object::Name(n) if n == b"DeviceN"));
    }

    #[test]
    fn test_form_visited_once() {
        let mut doc = Document::with_version("1.5");
        let form_id = doc.add_object(form("1 0 0 rg 0 0 10 10 re f", None));
        let mut resources = Resources::new();
        resources.replace(&mut doc, Category::XObject, b"Fm1", Object::Reference(form_id));

        let before = doc.objects.len();
        let output = run(&mut doc, "/Fm1 Do /Fm1 Do", &mut resources).unwrap();
        assert_eq!(output, "/Fm1 Do\n/Fm1 Do");
        assert_eq!(doc.objects.len(), before + 1);

        let converted = stream_at(&doc, &resources, Category::XObject, b"Fm1");
        let inner = content::decode(&converted.content).unwrap();
        assert_eq!(content::describe_all(&inner), "0.3 g\n0 0 10 10 re\nf");

        // The original form object is untouched
        let original = doc.get_object(form_id).unwrap().as_stream().unwrap();
        assert_eq!(original.content, b"1 0 0 rg 0 0 10 10 re f".to_vec());
    }

    #[test]
    fn test_form_with_own_resources() {
        let mut doc = Document::with_version("1.5");
        let mut image_dict = Dictionary::new();
        image_dict.set("Type", name("XObject"));
        image_dict.set("Subtype", name("Image"));
        image_dict.set("Width", Object::Integer(1));
        image_dict.set("Height", Object::Integer(1));
        image_dict.set("ColorSpace", name("DeviceRGB"));
        image_dict.set("BitsPerComponent", Object::Integer(8));
        let image_id = doc.add_object(Stream::new(image_dict, vec![0, 255, 0]));

        let mut xobjects = Dictionary::new();
        xobjects.set("Im1", Object::Reference(image_id));
        let mut own = Dictionary::new();
        own.set("XObject", Object::Dictionary(xobjects));
        let form_id = doc.add_object(form("q /Im1 Do Q", Some(own)));

        let mut resources = Resources::new();
        resources.replace(&mut doc, Category::XObject, b"Fm1", Object::Reference(form_id));
        run(&mut doc, "/Fm1 Do", &mut resources).unwrap();

        let converted = stream_at(&doc, &resources, Category::XObject, b"Fm1");
        let scope = Resources::load(converted.dict.get(b"Resources").unwrap(), &doc).unwrap();
        let image = stream_at(&doc, &scope, Category::XObject, b"Im1");
        assert_eq!(image.content, vec![150]);
        // The page scope did not gain the form's image
        assert!(!resources.contains(Category::XObject, b"Im1"));
    }

    #[test]
    fn test_self_invoking_form_hits_depth_limit() {
        let mut doc = Document::with_version("1.5");
        let form_id = doc.add_object(form("/Fm1 Do", None));
        let mut resources = Resources::new();
        resources.replace(&mut doc, Category::XObject, b"Fm1", Object::Reference(form_id));

        let err = run(&mut doc, "/Fm1 Do", &mut resources).unwrap_err();
        assert!(matches!(err, Error::RecursionLimit(32)));
    }

    #[test]
    fn test_missing_resources_abort() {
        let mut doc = Document::with_version("1.5");
        let err = run(&mut doc, "/Sh9 sh", &mut Resources::new()).unwrap_err();
        assert!(matches!(err, Error::MissingResource { .. }));

        let err = run(&mut doc, "/Pattern cs /P9 scn", &mut Resources::new()).unwrap_err();
        assert!(matches!(err, Error::MissingResource { .. }));
    }

    #[test]
    fn test_separation_color_goes_through_tint_transform() {
        let mut doc = Document::with_version("1.5");
        // Full tint is black ink only
        let mut function = Dictionary::new();
        function.set("FunctionType", Object::Integer(4));
        function.set("Domain", Object::Array(vec![Object::Integer(0), Object::Integer(1)]));
        function.set(
            "Range",
            Object::Array((0..4).flat_map(|_| [Object::Integer(0), Object::Integer(1)]).collect()),
        );
        let function_id = doc.add_object(Stream::new(function, b"{ 0 0 0 4 -1 roll }".to_vec()));

        let separation = Object::Array(vec![
            name("Separation"),
            name("Spot"),
            name("DeviceCMYK"),
            Object::Reference(function_id),
        ]);
        let mut resources = scope(Category::ColorSpace, vec![("CS2", separation)]);
        let output = run(&mut doc, "/CS2 cs 0.5 scn", &mut resources).unwrap();
        assert_eq!(output, "/DeviceGray cs\n0.5 scn");
    }

    #[test]
    fn test_separation_without_usable_function_fails() {
        let mut doc = Document::with_version("1.5");
        let separation = Object::Array(vec![
            name("Separation"),
            name("Spot"),
            name("DeviceCMYK"),
            Object::Null,
        ]);
        let mut resources = scope(Category::ColorSpace, vec![("CS2", separation)]);
        let err = run(&mut doc, "/CS2 cs 0.5 scn", &mut resources).unwrap_err();
        assert!(matches!(err, Error::Function(_)));
    }

    #[test]
    fn test_inline_image_is_converted() {
        let mut doc = Document::with_version("1.5");
        let mut dict = Dictionary::new();
        dict.set("W", Object::Integer(1));
        dict.set("H", Object::Integer(1));
        dict.set("CS", name("RGB"));
        dict.set("BPC", Object::Integer(8));
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new("BI", vec![Object::Stream(Stream::new(dict, vec![255, 0, 0]))]),
            Operation::new("Q", vec![]),
        ];

        let output = Converter::new(&mut doc, ConvertOptions::default())
            .convert(&operations, &mut Resources::new())
            .unwrap();
        assert_eq!(output.len(), 3);
        match output[1].operands.as_slice() {
            [Object::Stream(image)] => {
                assert!(matches!(image.dict.get(b"CS"), Ok(Object::Name(n)) if n == b"DeviceGray"));
                assert_eq!(image.content.len(), 1);
            }
            other => panic!("expected inline image, got {:?}", other),
        }
    }

    #[test]
    fn test_second_pass_is_noop() {
        let mut doc = Document::with_version("1.5");
        let source = "1 0 0 RG 0 0 100 100 re S /DeviceCMYK cs 0.2 0.4 0.1 0 sc f";
        let first = run(&mut doc, source, &mut Resources::new()).unwrap();
        let second = run(&mut doc, &first_as_source(&first), &mut Resources::new()).unwrap();
        assert_eq!(first, second);
    }

    fn first_as_source(described: &str) -> String {
        described.replace('\n', " ")
    }
}
