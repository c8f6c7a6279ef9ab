//! Driver entry points.
//!
//! Drivers behave like command line tools: they parse their own arguments and
//! finish through [`common::process::exit`] with a status code.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use bytes::{Bytes, BytesMut};
use itertools::Itertools;
use tracing::info;

use common::class::DriverContext;
use common::fs::{DfsPath, FileSystem, LocalFileSystem};
use common::process;
use common::KeyValue;

use crate::{formats, wc};

/// Counts words in every file below `args[0]` and writes the counts to
/// `args[1]/part-00000`, on the local disk.
pub fn word_count(ctx: &DriverContext) -> Result<()> {
    let [input, output] = ctx.args() else {
        eprintln!("usage: WordCount <input> <output>");
        process::exit(2);
    };

    let fs = LocalFileSystem::new("/");
    let input = DfsPath::new(input);
    let output = DfsPath::new(output).join("part-00000");

    let mut pairs: Vec<KeyValue> = vec![];
    for file in fs.list_files(&input, true)? {
        if ctx.is_interrupted() {
            bail!("word count interrupted");
        }
        let contents = fs.read(&file)?;
        for record in formats::whole_file(file.as_str(), contents) {
            for kv in wc::map(record, Bytes::new())? {
                pairs.push(kv?);
            }
        }
    }
    pairs.sort_by(|a, b| a.key.cmp(&b.key));

    let mut out = BytesMut::new();
    let mut words = 0;
    for (key, group) in &pairs.into_iter().chunk_by(|kv| kv.key()) {
        let values = group.map(KeyValue::into_value).collect::<Vec<_>>();
        let count = wc::reduce(key.clone(), Box::new(values.into_iter()), Bytes::new())?;
        out.extend_from_slice(&formats::text(&key, &count));
        words += 1;
    }
    fs.write(&output, out.freeze())?;

    info!("word count wrote {words} words to {output}");
    println!("{words} distinct words");
    process::exit(0)
}

/// Sleeps for `args[0]` milliseconds, returning early with an error when
/// the job is interrupted.
pub fn sleep(ctx: &DriverContext) -> Result<()> {
    let millis: u64 = ctx
        .args()
        .first()
        .ok_or_else(|| anyhow!("usage: Sleep <millis>"))?
        .parse()?;

    let deadline = Instant::now() + Duration::from_millis(millis);
    while Instant::now() < deadline {
        if ctx.is_interrupted() {
            bail!("sleep interrupted");
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tokio_util::sync::CancellationToken;

    use common::process::{run_trapped, Termination};

    use super::*;

    fn context(args: &[&str]) -> (DriverContext, CancellationToken) {
        let token = CancellationToken::new();
        let args = args.iter().map(|a| a.to_string()).collect();
        (DriverContext::new(args, token.clone()), token)
    }

    #[test]
    fn test_word_count_writes_counts_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("a.txt"), "b a b").unwrap();
        let output = dir.path().join("out");

        let (ctx, _token) = context(&[input.to_str().unwrap(), output.to_str().unwrap()]);
        let outcome = run_trapped(|| word_count(&ctx));
        assert!(matches!(outcome, Termination::Exited(0)));

        let written = fs::read_to_string(output.join("part-00000")).unwrap();
        assert_eq!(written, "a\t1\nb\t2\n");
    }

    #[test]
    fn test_word_count_usage_exit() {
        let (ctx, _token) = context(&[]);
        let outcome = run_trapped(|| word_count(&ctx));
        assert!(matches!(outcome, Termination::Exited(2)));
    }

    #[test]
    fn test_sleep_stops_when_interrupted() {
        let (ctx, token) = context(&["60000"]);
        token.cancel();
        assert!(sleep(&ctx).is_err());
    }
}
