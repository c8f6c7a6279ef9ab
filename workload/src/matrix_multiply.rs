//! MapReduce application for matrix multiplication.
//!
//! Composed of two stages. Input lines are `row column value matrix`, with
//! `matrix` either `A` or `B`. Stage one joins `A` columns with `B` rows and
//! emits partial products tagged `C`; stage two sums them per cell.

use anyhow::{anyhow, Result};
use bytes::{BufMut, Bytes, BytesMut};

use common::utils::string_from_bytes;
use common::{KeyValue, MapOutput};

pub fn map_phase_one(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let contents = string_from_bytes(kv.value)?;
    let lines = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|s| s.to_string())
        .collect::<Vec<String>>();

    let mut key_buf = BytesMut::with_capacity(lines.len() * 4);
    let mut value_buf = BytesMut::new();

    let iter = lines.into_iter().map(move |line| {
        let split = line.split(' ').collect::<Vec<_>>();
        let [row, column, value, matrix] = split[..] else {
            return Err(anyhow!("input was not in the expected format"));
        };

        match matrix {
            "A" => {
                key_buf.put_slice(column.as_bytes());
                value_buf.put_slice(row.as_bytes());
            }
            "B" => {
                key_buf.put_slice(row.as_bytes());
                value_buf.put_slice(column.as_bytes());
            }
            _ => return Err(anyhow!("unexpected matrix name {matrix}")),
        }
        value_buf.put_slice(format!(" {value} {matrix}").as_bytes());

        let key = key_buf.split().freeze();
        let value = value_buf.split().freeze();

        Ok(KeyValue { key, value })
    });
    Ok(Box::new(iter))
}

pub fn reduce_phase_one(
    _key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let mut matrix_a = vec![];
    let mut matrix_b = vec![];
    for value in values {
        let string = string_from_bytes(value)?;
        let split = string.split(' ').map(str::to_string).collect::<Vec<_>>();
        let [index, value, matrix] = &split[..] else {
            return Err(anyhow!("intermediate value was not in the expected format"));
        };
        let value = value.parse::<f64>()?;
        match matrix.as_str() {
            "A" => matrix_a.push((index.clone(), value)),
            "B" => matrix_b.push((index.clone(), value)),
            _ => return Err(anyhow!("unexpected matrix name {matrix}")),
        }
    }

    let mut buffer = BytesMut::new();
    for (row, val_a) in &matrix_a {
        for (column, val_b) in &matrix_b {
            let line = format!("{} {} {} C\n", row, column, val_a * val_b);
            buffer.put_slice(line.as_bytes());
        }
    }

    Ok(buffer.freeze())
}

pub fn map_phase_two(kv: KeyValue, _aux: Bytes) -> MapOutput {
    let contents = string_from_bytes(kv.value)?;
    let lines = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|s| s.to_string())
        .collect::<Vec<_>>();

    let iter = lines.into_iter().map(move |line| {
        let split = line.split(' ').collect::<Vec<_>>();
        let [row, column, value, matrix] = split[..] else {
            return Err(anyhow!("partial product was not in the expected format"));
        };
        Ok(KeyValue::new(
            Bytes::from(format!("{row} {column}")),
            Bytes::from(format!("{value} {matrix}")),
        ))
    });

    Ok(Box::new(iter))
}

pub fn reduce_phase_two(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let mut sum: f64 = 0.0;
    for value in values {
        let string = string_from_bytes(value)?;
        let product = string
            .split(' ')
            .next()
            .ok_or_else(|| anyhow!("empty partial product"))?;
        sum += product.parse::<f64>()?;
    }

    let mut buffer = BytesMut::new();
    buffer.put_slice(key.as_ref());
    buffer.put_slice(format!(" {sum} C\n").as_bytes());

    Ok(buffer.freeze())
}
