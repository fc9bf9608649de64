//! Image conversion
//!
//! Image XObjects and inline images share one path: unfilter the samples,
//! map every pixel to RGB and then to a single gray level, and re-encode as
//! an 8-bit DeviceGray image with the original filter where possible.
//!
//! Filter chains are undone stage by stage: Flate through flate2, ASCIIHex
//! and RunLength here, LZW, ASCII85 and predictor Flate through lopdf, and a
//! final DCT stage through the `image` JPEG decoder.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageFormat};
use lopdf::{Dictionary, Document, Object, Stream};

use crate::color::{as_number, rgb_to_gray, ColorSpace};
use crate::error::{Error, Result};
use crate::pdf::convert::ConvertOptions;
use crate::pdf::resources::{resolve, Category, Resources};

/// Where the image lives, which decides the dictionary key spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    XObject,
    Inline,
}

/// Dictionary keys that are rewritten for the gray image, both spellings
const REWRITTEN_KEYS: [&[u8]; 11] = [
    b"ColorSpace",
    b"CS",
    b"BitsPerComponent",
    b"BPC",
    b"Decode",
    b"D",
    b"DecodeParms",
    b"DP",
    b"Filter",
    b"F",
    b"Length",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    None,
    Flate,
    Dct,
    AsciiHex,
    RunLength,
    /// Any other filter, by its full name
    Other(String),
}

impl Filter {
    fn from_name(name: &[u8]) -> Self {
        match name {
            b"FlateDecode" | b"Fl" => Filter::Flate,
            b"DCTDecode" | b"DCT" => Filter::Dct,
            b"LZW" => Filter::Other("LZWDecode".to_string()),
            b"AHx" => Filter::AsciiHex,
            b"A85" => Filter::Other("ASCII85Decode".to_string()),
            b"RL" => Filter::RunLength,
            b"CCF" => Filter::Other("CCITTFaxDecode".to_string()),
            b"ASCIIHexDecode" => Filter::AsciiHex,
            b"RunLengthDecode" => Filter::RunLength,
            other => Filter::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    fn full_name(&self) -> Option<&str> {
        match self {
            Filter::None => None,
            Filter::Flate => Some("FlateDecode"),
            Filter::Dct => Some("DCTDecode"),
            Filter::AsciiHex => Some("ASCIIHexDecode"),
            Filter::RunLength => Some("RunLengthDecode"),
            Filter::Other(name) => Some(name.as_str()),
        }
    }

    fn name_for(&self, placement: Placement) -> Option<&str> {
        match (self, placement) {
            (Filter::Flate, Placement::Inline) => Some("Fl"),
            (Filter::Dct, Placement::Inline) => Some("DCT"),
            (Filter::AsciiHex, Placement::Inline) => Some("AHx"),
            (Filter::RunLength, Placement::Inline) => Some("RL"),
            _ => self.full_name(),
        }
    }
}

/// Filters that need an image codec this crate does not carry
const CODEC_FILTERS: [&str; 3] = ["JPXDecode", "JBIG2Decode", "CCITTFaxDecode"];

/// One stage of an image's filter pipeline, in decoding order
#[derive(Debug, Clone)]
struct Stage {
    filter: Filter,
    parms: Option<Object>,
}

/// Image data with every filter but a final DCT undone
enum Samples {
    Raw(Vec<u8>),
    Jpeg(Vec<u8>),
}

/// Convert an image to gray
///
/// Returns `None` when the image is left as it is: stencil masks, images
/// already in a one-component space, and images whose filter cannot be
/// decoded here.
pub fn convert_image(
    doc: &Document,
    image: &Stream,
    resources: &Resources,
    placement: Placement,
    options: &ConvertOptions,
) -> Result<Option<Stream>> {
    let dict = &image.dict;
    if matches!(entry(doc, dict, b"ImageMask", b"IM")?, Some(Object::Boolean(true))) {
        return Ok(None);
    }

    let stages = image_filters(doc, dict)?;
    // The last stage is the compression the gray image is written back with
    let filter = stages.last().map_or(Filter::None, |stage| stage.filter.clone());
    let space = match entry(doc, dict, b"ColorSpace", b"CS")? {
        Some(object) => image_space(object, doc, resources)?,
        None if matches!(filter, Filter::Other(_)) => {
            log::warn!("Leaving {:?} image without /ColorSpace unchanged", filter.full_name());
            return Ok(None);
        }
        None => return Err(Error::General("image has no /ColorSpace".to_string())),
    };
    if is_gray(&space) {
        return Ok(None);
    }

    let width = dimension(doc, dict, b"Width", b"W")?;
    let height = dimension(doc, dict, b"Height", b"H")?;

    let gray = match unfilter(&image.content, &stages)? {
        Some(Samples::Jpeg(data)) => gray_from_jpeg(&data, width, height)?,
        Some(Samples::Raw(samples)) => {
            let bpc = match entry(doc, dict, b"BitsPerComponent", b"BPC")?.and_then(as_number) {
                Some(bpc) => bpc as u32,
                None => return Err(Error::General("image has no /BitsPerComponent".to_string())),
            };
            let decode = decode_array(doc, dict, &space)?;
            gray_from_samples(&samples, width, height, bpc, &space, decode.as_deref())?
        }
        None => return Ok(None),
    };

    let (data, filter) = encode_with_fallback(&gray, width, height, filter, options)?;
    log::debug!(
        "Converted {}x{} {} image to DeviceGray ({:?})",
        width,
        height,
        space.family(),
        filter.full_name()
    );

    Ok(Some(gray_stream(dict, data, &filter, placement)))
}

/// An entry by its full or abbreviated key, resolved
fn entry<'a>(doc: &'a Document, dict: &'a Dictionary, full: &[u8], short: &[u8]) -> Result<Option<&'a Object>> {
    match dict.get(full).or_else(|_| dict.get(short)) {
        Ok(object) => Ok(Some(resolve(doc, object)?)),
        Err(_) => Ok(None),
    }
}

fn dimension(doc: &Document, dict: &Dictionary, full: &[u8], short: &[u8]) -> Result<usize> {
    match entry(doc, dict, full, short)?.and_then(as_number) {
        Some(value) if value >= 1.0 => Ok(value as usize),
        _ => Err(Error::General(format!(
            "image has no valid /{}",
            String::from_utf8_lossy(full)
        ))),
    }
}

/// The image's filters in decoding order, each with its own /DecodeParms entry
fn image_filters(doc: &Document, dict: &Dictionary) -> Result<Vec<Stage>> {
    let names: Vec<Vec<u8>> = match entry(doc, dict, b"Filter", b"F")? {
        None => Vec::new(),
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(items)) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match resolve(doc, item)? {
                    Object::Name(name) => names.push(name.clone()),
                    _ => return Err(Error::General("image /Filter array holds a non-name".to_string())),
                }
            }
            names
        }
        Some(_) => return Err(Error::General("image /Filter is not a name".to_string())),
    };

    let parms: Vec<Option<Object>> = match entry(doc, dict, b"DecodeParms", b"DP")? {
        None | Some(Object::Null) => Vec::new(),
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| match resolve(doc, item) {
                Ok(Object::Null) | Err(_) => None,
                Ok(object) => Some(object.clone()),
            })
            .collect(),
        Some(object) => vec![Some(object.clone())],
    };

    Ok(names
        .iter()
        .enumerate()
        .map(|(i, name)| Stage {
            filter: Filter::from_name(name),
            parms: parms.get(i).cloned().flatten(),
        })
        .collect())
}

/// Inline images may name a ColorSpace resource instead of a family
fn image_space(object: &Object, doc: &Document, resources: &Resources) -> Result<ColorSpace> {
    match object {
        Object::Name(name) => match ColorSpace::from_family_name(name) {
            Ok(space) => Ok(space),
            Err(_) => {
                let object = resources.lookup(doc, Category::ColorSpace, name)?;
                ColorSpace::from_object(&object, doc)
            }
        },
        other => ColorSpace::from_object(other, doc),
    }
}

fn is_gray(space: &ColorSpace) -> bool {
    match space {
        ColorSpace::Indexed { base, .. } => matches!(**base, ColorSpace::DeviceGray),
        other => other.components() == 1,
    }
}

fn decode_array(doc: &Document, dict: &Dictionary, space: &ColorSpace) -> Result<Option<Vec<f64>>> {
    if matches!(space, ColorSpace::Indexed { .. }) {
        return Ok(None);
    }
    let values = match entry(doc, dict, b"Decode", b"D")? {
        Some(Object::Array(items)) => items.iter().filter_map(as_number).collect::<Vec<f64>>(),
        _ => return Ok(None),
    };
    if values.len() != 2 * space.components() {
        log::warn!("Ignoring /Decode array of length {}", values.len());
        return Ok(None);
    }
    Ok(Some(values))
}

/// Undo the filter chain; `None` when a stage needs a codec this crate lacks
fn unfilter(content: &[u8], stages: &[Stage]) -> Result<Option<Samples>> {
    let mut data = content.to_vec();

    for (i, stage) in stages.iter().enumerate() {
        let last = i + 1 == stages.len();
        data = match &stage.filter {
            Filter::None => data,
            Filter::Dct if last => return Ok(Some(Samples::Jpeg(data))),
            Filter::Dct => {
                return Err(Error::General("DCTDecode must be the last image filter".to_string()))
            }
            Filter::Flate if stage.parms.is_none() => inflate(&data)?,
            Filter::AsciiHex => decode_ascii_hex(&data)?,
            Filter::RunLength => decode_run_length(&data)?,
            Filter::Other(name) if CODEC_FILTERS.contains(&name.as_str()) => {
                log::warn!("Leaving {} image unchanged: no decoder for it", name);
                return Ok(None);
            }
            // Predictor Flate, LZW and ASCII85; lopdf rejects anything else
            filter => {
                let mut dict = Dictionary::new();
                if let Some(name) = filter.full_name() {
                    dict.set("Filter", Object::Name(name.as_bytes().to_vec()));
                }
                if let Some(parms) = &stage.parms {
                    dict.set("DecodeParms", parms.clone());
                }
                Stream::new(dict, data).decompressed_content()?
            }
        };
    }

    Ok(Some(Samples::Raw(data)))
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Pairs of hex digits up to the `>` end marker; whitespace is skipped and a
/// trailing odd digit is padded with 0
fn decode_ascii_hex(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut digits = data
        .iter()
        .copied()
        .take_while(|&c| c != b'>')
        .filter(|c| !c.is_ascii_whitespace());

    while let Some(high) = digits.next() {
        let low = digits.next().unwrap_or(b'0');
        out.push((hex_value(high)? << 4) | hex_value(low)?);
    }
    Ok(out)
}

fn hex_value(digit: u8) -> Result<u8> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        _ => Err(Error::General(format!(
            "ASCIIHexDecode: invalid hex digit {:?}",
            digit as char
        ))),
    }
}

/// Length byte 0-127 copies the next n+1 bytes, 129-255 repeats the next byte
/// 257-n times, 128 ends the data
fn decode_run_length(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        i += 1;
        match length {
            0..=127 => {
                let literal = data
                    .get(i..i + length + 1)
                    .ok_or_else(|| Error::General("RunLengthDecode: literal run is cut short".to_string()))?;
                out.extend_from_slice(literal);
                i += length + 1;
            }
            128 => break,
            _ => {
                let byte = *data
                    .get(i)
                    .ok_or_else(|| Error::General("RunLengthDecode: missing byte for run".to_string()))?;
                out.resize(out.len() + 257 - length, byte);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn gray_from_jpeg(data: &[u8], width: usize, height: usize) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8();
    if decoded.width() as usize != width || decoded.height() as usize != height {
        return Err(Error::General(format!(
            "JPEG is {}x{} but the image dictionary says {}x{}",
            decoded.width(),
            decoded.height(),
            width,
            height
        )));
    }
    Ok(decoded
        .pixels()
        .map(|p| to_byte(rgb_to_gray(unit(p[0]), unit(p[1]), unit(p[2]))))
        .collect())
}

fn gray_from_samples(
    samples: &[u8],
    width: usize,
    height: usize,
    bpc: u32,
    space: &ColorSpace,
    decode: Option<&[f64]>,
) -> Result<Vec<u8>> {
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(Error::General(format!("unsupported BitsPerComponent {}", bpc)));
    }
    let n = space.components();
    if n == 0 {
        return Err(Error::UnsupportedColorSpace(format!("{} image", space.family())));
    }
    let too_large = || Error::General(format!("image of {}x{} samples is too large", width, height));
    let row_bytes = width
        .checked_mul(n)
        .and_then(|v| v.checked_mul(bpc as usize))
        .and_then(|bits| bits.checked_add(7))
        .map(|bits| bits / 8)
        .ok_or_else(too_large)?;
    let expected = row_bytes.checked_mul(height).ok_or_else(too_large)?;
    if samples.len() < expected {
        return Err(Error::General(format!(
            "image data has {} bytes, expected {}",
            samples.len(),
            expected
        )));
    }

    let max = ((1u32 << bpc) - 1) as f64;
    let indexed = matches!(space, ColorSpace::Indexed { .. });
    let mut components = vec![0.0; n];
    let mut gray = Vec::with_capacity(width * height);

    for row in samples.chunks(row_bytes).take(height) {
        let mut reader = SampleReader::new(row, bpc);
        for _ in 0..width {
            for (i, component) in components.iter_mut().enumerate() {
                let raw = reader.next() as f64;
                *component = match decode {
                    _ if indexed => raw,
                    Some(d) => d[2 * i] + raw / max * (d[2 * i + 1] - d[2 * i]),
                    None => raw / max,
                };
            }
            let [r, g, b] = to_rgb(space, &components)?;
            gray.push(to_byte(rgb_to_gray(r, g, b)));
        }
    }

    Ok(gray)
}

/// RGB intermediate for one pixel
fn to_rgb(space: &ColorSpace, c: &[f64]) -> Result<[f64; 3]> {
    match space {
        ColorSpace::DeviceGray => Ok([c[0], c[0], c[0]]),
        ColorSpace::DeviceRGB => Ok([c[0], c[1], c[2]]),
        ColorSpace::DeviceCMYK => {
            let k = 1.0 - c[3];
            Ok([(1.0 - c[0]) * k, (1.0 - c[1]) * k, (1.0 - c[2]) * k])
        }
        ColorSpace::Indexed { base, hival, lookup } => {
            let index = c[0].clamp(0.0, *hival as f64) as usize;
            let n = base.components();
            let entry = lookup
                .get(index * n..(index + 1) * n)
                .ok_or_else(|| Error::General(format!("image palette has no entry {}", index)))?;
            let base_components: Vec<f64> = entry.iter().map(|&b| unit(b)).collect();
            to_rgb(base, &base_components)
        }
        other => Err(Error::UnsupportedColorSpace(format!("{} image", other.family()))),
    }
}

fn unit(byte: u8) -> f64 {
    byte as f64 / 255.0
}

fn to_byte(level: f64) -> u8 {
    (level.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Reads big-endian samples of 1, 2, 4, 8 or 16 bits from one image row
struct SampleReader<'a> {
    row: &'a [u8],
    bpc: u32,
    bit: usize,
}

impl<'a> SampleReader<'a> {
    fn new(row: &'a [u8], bpc: u32) -> Self {
        Self { row, bpc, bit: 0 }
    }

    fn byte(&self, index: usize) -> u32 {
        self.row.get(index).copied().unwrap_or(0) as u32
    }

    fn next(&mut self) -> u32 {
        let at = self.bit / 8;
        let value = match self.bpc {
            8 => self.byte(at),
            16 => (self.byte(at) << 8) | self.byte(at + 1),
            bits => {
                let shift = 8 - bits as usize - self.bit % 8;
                (self.byte(at) >> shift) & ((1 << bits) - 1)
            }
        };
        self.bit += self.bpc as usize;
        value
    }
}

fn encode(gray: &[u8], width: usize, height: usize, filter: &Filter, options: &ConvertOptions) -> Result<Vec<u8>> {
    match filter {
        Filter::None => Ok(gray.to_vec()),
        Filter::Flate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(gray)?;
            Ok(encoder.finish()?)
        }
        Filter::Dct => {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, options.jpeg_quality)
                .encode(gray, width as u32, height as u32, ExtendedColorType::L8)
                .map_err(|e| Error::UnsupportedEncodingParameters(e.to_string()))?;
            Ok(out)
        }
        other => Err(Error::UnsupportedEncodingParameters(format!(
            "cannot encode with /{}",
            other.full_name().unwrap_or("?")
        ))),
    }
}

/// Encode with the original filter, falling back once to plain Flate
fn encode_with_fallback(
    gray: &[u8],
    width: usize,
    height: usize,
    filter: Filter,
    options: &ConvertOptions,
) -> Result<(Vec<u8>, Filter)> {
    match encode(gray, width, height, &filter, options) {
        Ok(data) => Ok((data, filter)),
        Err(Error::UnsupportedEncodingParameters(reason)) => {
            log::warn!("{}, falling back to FlateDecode", reason);
            let data = encode(gray, width, height, &Filter::Flate, options)?;
            Ok((data, Filter::Flate))
        }
        Err(e) => Err(e),
    }
}

fn gray_stream(original: &Dictionary, data: Vec<u8>, filter: &Filter, placement: Placement) -> Stream {
    let mut dict = original.clone();
    for key in REWRITTEN_KEYS {
        dict.remove(key);
    }

    let (space_key, space, bpc_key, filter_key) = match placement {
        Placement::XObject => ("ColorSpace", "DeviceGray", "BitsPerComponent", "Filter"),
        // lopdf reads inline images back only with the full gray name
        Placement::Inline => ("CS", "DeviceGray", "BPC", "F"),
    };
    dict.set(space_key, Object::Name(space.as_bytes().to_vec()));
    dict.set(bpc_key, Object::Integer(8));
    if let Some(name) = filter.name_for(placement) {
        dict.set(filter_key, Object::Name(name.as_bytes().to_vec()));
    }

    let mut stream = Stream::new(dict, data);
    match placement {
        Placement::Inline => {
            stream.dict.remove(b"Length");
        }
        Placement::XObject if *filter != Filter::None => {
            // Already encoded; keep Document::compress from filtering it again
            stream.allows_compression = false;
        }
        Placement::XObject => {}
    }
    stream
}
