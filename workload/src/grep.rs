//! Distributed grep.
//!
//! The auxiliary argument is the substring to search for. Matching lines are
//! keyed by their text, so the reducer counts how often each line occurs.

use anyhow::{bail, Result};
use bytes::Bytes;

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let pattern = string_from_bytes(aux)?;
    if pattern.is_empty() {
        bail!("grep needs a search pattern");
    }
    let contents = string_from_bytes(kv.value)?;
    let matches = contents
        .lines()
        .filter(|line| line.contains(pattern.as_str()))
        .map(str::to_string)
        .collect::<Vec<_>>();

    let iter = matches
        .into_iter()
        .map(|line| Ok(KeyValue::new(Bytes::from(line), Bytes::from("1"))));
    Ok(Box::new(iter))
}

pub fn reduce(
    _key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    Ok(Bytes::from(values.count().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_keeps_matching_lines() {
        let kv = KeyValue::new(Bytes::from("log"), Bytes::from("error a\nok\nerror b\n"));
        let lines: Vec<Bytes> = map(kv, Bytes::from("error"))
            .unwrap()
            .map(|kv| kv.unwrap().into_key())
            .collect();
        assert_eq!(lines, vec!["error a", "error b"]);
    }

    #[test]
    fn test_map_requires_pattern() {
        let kv = KeyValue::new(Bytes::from("log"), Bytes::from("x"));
        assert!(map(kv, Bytes::new()).is_err());
    }
}
