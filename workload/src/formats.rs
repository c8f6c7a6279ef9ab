//! Input and output formats.

use bytes::{BufMut, Bytes, BytesMut};

use common::KeyValue;

/// One record per file: key is the file name, value the whole contents.
pub fn whole_file(name: &str, contents: Bytes) -> Vec<KeyValue> {
    vec![KeyValue::new(Bytes::from(name.to_string()), contents)]
}

/// One record per line: key is `name:line_number`, value the line.
pub fn lines(name: &str, contents: Bytes) -> Vec<KeyValue> {
    String::from_utf8_lossy(&contents)
        .lines()
        .enumerate()
        .map(|(i, line)| {
            KeyValue::new(
                Bytes::from(format!("{name}:{i}")),
                Bytes::from(line.to_string()),
            )
        })
        .collect()
}

/// Writes the reduced value untouched. Reducers that format their own
/// records pair with this.
pub fn raw(_key: &Bytes, value: &Bytes) -> Bytes {
    value.clone()
}

/// Writes `key<TAB>value` lines.
pub fn text(key: &Bytes, value: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(key.len() + value.len() + 2);
    buf.put_slice(key);
    buf.put_u8(b'\t');
    buf.put_slice(value);
    buf.put_u8(b'\n');
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_numbers_records() {
        let records = lines("in.txt", Bytes::from("a\nb\n"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].key, Bytes::from("in.txt:1"));
        assert_eq!(records[1].value, Bytes::from("b"));
    }

    #[test]
    fn test_text_output() {
        assert_eq!(text(&Bytes::from("k"), &Bytes::from("3")), Bytes::from("k\t3\n"));
        assert_eq!(raw(&Bytes::from("k"), &Bytes::from("v\n")), Bytes::from("v\n"));
    }
}
