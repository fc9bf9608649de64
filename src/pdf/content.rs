//! Content stream parsing and serialization
//!
//! Thin layer over `lopdf::content`. Inline images arrive from the parser as a
//! `BI` operation whose single operand is a stream (image dictionary plus
//! data); they are written back here as `BI <dict> ID <data> EI`.

use lopdf::content::{Content, Operation};
use lopdf::{Object, Stream};
use crate::error::Result;

/// Parse content stream bytes into operations
pub fn decode(bytes: &[u8]) -> Result<Vec<Operation>> {
    Ok(Content::decode(bytes)?.operations)
}

/// Serialize operations back into content stream bytes
///
/// Operations are separated by newlines, so an inline image never runs into
/// the operator before or after it.
pub fn encode(operations: &[Operation]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut run: Vec<Operation> = Vec::new();

    for op in operations {
        match (op.operator.as_str(), op.operands.as_slice()) {
            ("BI", [Object::Stream(image)]) => {
                flush(&mut run, &mut out)?;
                write_inline_image(image, &mut out)?;
            }
            _ => run.push(op.clone()),
        }
    }
    flush(&mut run, &mut out)?;

    Ok(out)
}

fn flush(run: &mut Vec<Operation>, out: &mut Vec<u8>) -> Result<()> {
    if !run.is_empty() {
        let content = Content {
            operations: std::mem::take(run),
        };
        out.extend(trim_end(&content.encode()?));
        out.push(b'\n');
    }
    Ok(())
}

fn write_inline_image(image: &Stream, out: &mut Vec<u8>) -> Result<()> {
    // Encoding the entries as operands of a dummy operator reuses lopdf's object writer
    let mut entries = Vec::new();
    for (key, value) in image.dict.iter() {
        if key == b"Length" {
            continue;
        }
        entries.push(Object::Name(key.clone()));
        entries.push(value.clone());
    }
    let header = Content {
        operations: vec![Operation::new("ID", entries)],
    };

    out.extend_from_slice(b"BI\n");
    out.extend(trim_end(&header.encode()?));
    // Exactly one whitespace byte separates ID from the data
    out.push(b'\n');
    out.extend_from_slice(&image.content);
    out.extend_from_slice(b"\nEI\n");
    Ok(())
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Plain bytes of a content stream, undoing its filter if it has one
pub fn stream_content(stream: &Stream) -> Result<Vec<u8>> {
    if stream.dict.has(b"Filter") {
        Ok(stream.decompressed_content()?)
    } else {
        Ok(stream.content.clone())
    }
}

/// Replace a stream's content with unfiltered bytes
pub fn set_stream_content(stream: &mut Stream, bytes: Vec<u8>) {
    stream.dict.remove(b"Filter");
    stream.dict.remove(b"DecodeParms");
    stream.set_content(bytes);
}

/// One-line rendering of an operation, for logs and assertions
pub fn describe(op: &Operation) -> String {
    let mut text = String::new();
    for operand in &op.operands {
        describe_object(operand, &mut text);
        text.push(' ');
    }
    text.push_str(&op.operator);
    text
}

/// Render a whole operation list, one operation per line
pub fn describe_all(operations: &[Operation]) -> String {
    operations
        .iter()
        .map(describe)
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_object(object: &Object, out: &mut String) {
    match object {
        Object::Null => out.push_str("null"),
        Object::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Object::Integer(i) => out.push_str(&i.to_string()),
        Object::Real(r) => out.push_str(&(*r as f32).to_string()),
        Object::Name(name) => {
            out.push('/');
            out.push_str(&String::from_utf8_lossy(name));
        }
        Object::String(bytes, _) => {
            out.push('(');
            out.push_str(&String::from_utf8_lossy(bytes));
            out.push(')');
        }
        Object::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                describe_object(item, out);
            }
            out.push(']');
        }
        Object::Dictionary(_) => out.push_str("<<...>>"),
        Object::Stream(stream) => out.push_str(&format!("<inline image, {} bytes>", stream.content.len())),
        Object::Reference((id, gen)) => out.push_str(&format!("{} {} R", id, gen)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Dictionary;

    #[test]
    fn test_decode_and_describe() {
        let operations = decode(b"1 0 0 RG 0 0 100 100 re S").unwrap();
        assert_eq!(operations.len(), 3);
        assert_eq!(describe(&operations[0]), "1 0 0 RG");
        assert_eq!(describe(&operations[1]), "0 0 100 100 re");
        assert_eq!(describe(&operations[2]), "S");
    }

    #[test]
    fn test_encode_decodes_to_same_operations() {
        let operations = decode(b"q /P1 scn 0.5 g 10 20 m 30 40 l f Q").unwrap();
        let bytes = encode(&operations).unwrap();
        let again = decode(&bytes).unwrap();
        assert_eq!(describe_all(&operations), describe_all(&again));
    }

    fn inline_gray_image(data: Vec<u8>) -> Stream {
        let mut dict = Dictionary::new();
        dict.set("W", Object::Integer(data.len() as i64));
        dict.set("H", Object::Integer(1));
        dict.set("CS", Object::Name(b"DeviceGray".to_vec()));
        dict.set("BPC", Object::Integer(8));
        Stream::new(dict, data)
    }

    #[test]
    fn test_encode_inline_image() {
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new("BI", vec![Object::Stream(inline_gray_image(vec![0x4D, 0xFF]))]),
            Operation::new("Q", vec![]),
        ];
        let bytes = encode(&operations).unwrap();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with("q\nBI\n"));
        assert!(text.contains("/W 2"));
        assert!(text.contains("/CS /DeviceGray"));
        let data_at = bytes.windows(3).position(|w| w == b"ID\n").unwrap() + 3;
        assert_eq!(&bytes[data_at..data_at + 2], &[0x4D, 0xFF]);
        assert!(text.ends_with("\nEI\nQ\n"));
        assert!(!text.contains("Length"));
    }

    #[test]
    fn test_inline_image_survives_reparse() {
        let source: &[u8] = b"q BI /W 3 /H 1 /CS /DeviceGray /BPC 8 ID \x4d\x80\xff EI Q 0 0 1 rg";
        let operations = decode(source).unwrap();
        assert_eq!(operations.len(), 4);

        let again = decode(&encode(&operations).unwrap()).unwrap();
        assert_eq!(describe_all(&again), describe_all(&operations));
        assert_eq!(describe_all(&again), "q\n<inline image, 3 bytes> BI\nQ\n0 0 1 rg");
        match &again[1].operands[0] {
            Object::Stream(image) => assert_eq!(image.content, vec![0x4D, 0x80, 0xFF]),
            other => panic!("expected inline image, got {:?}", other),
        }
    }

    #[test]
    fn test_consecutive_inline_images() {
        let operations = vec![
            Operation::new("BI", vec![Object::Stream(inline_gray_image(vec![0x41]))]),
            Operation::new("BI", vec![Object::Stream(inline_gray_image(vec![0x42, 0x43]))]),
        ];
        let again = decode(&encode(&operations).unwrap()).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(describe(&again[1]), "<inline image, 2 bytes> BI");
    }

    #[test]
    fn test_set_stream_content_drops_filter() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"FlateDecode".to_vec()));
        let mut stream = Stream::new(dict, vec![1, 2, 3]);
        set_stream_content(&mut stream, b"0 g".to_vec());
        assert!(!stream.dict.has(b"Filter"));
        assert_eq!(stream_content(&stream).unwrap(), b"0 g".to_vec());
    }
}
