//! A MapReduce-compatible application that computes the
//! degree of each vertex in a graph, given a list of edges.
//!

use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

fn parse_line(line: &str) -> Result<(u64, u64)> {
    let mut iter = line.split_whitespace().take(2);
    let a = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    let b = iter
        .next()
        .ok_or_else(|| anyhow!("Invalid input file format"))?
        .parse()?;
    Ok((a, b))
}

/// Emits `(vertex, 1)` for both ends of every edge in the value.
pub fn map(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let s = string_from_bytes(kv.value)?;
    let edges = s
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect::<Result<Vec<_>>>()?;

    let iter = edges.into_iter().flat_map(move |(a, b)| {
        [
            Ok(KeyValue::new(Bytes::from(a.to_string()), Bytes::from("1"))),
            Ok(KeyValue::new(Bytes::from(b.to_string()), Bytes::from("1"))),
        ]
    });
    Ok(Box::new(iter))
}

/// Sums partial degrees. Output of the combiner feeds back into this.
pub fn combine(
    _key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    Ok(Bytes::from(sum(values)?.to_string()))
}

pub fn reduce(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let count = sum(values)?;

    let mut value = BytesMut::with_capacity(24);
    let vertex_no = string_from_bytes(key)?;
    value.put(format!("{}, deg={}\n", &vertex_no, count).as_bytes());
    Ok(value.freeze())
}

fn sum(values: Box<dyn Iterator<Item = Bytes> + '_>) -> Result<u64> {
    let mut count = 0u64;
    for value in values {
        count += string_from_bytes(value)?.trim().parse::<u64>()?;
    }
    Ok(count)
}
