//! Helper functions and structures for dealing with minio.
//!
//! [`Client`] is a thin async wrapper around the S3 SDK. [`S3FileSystem`]
//! exposes one bucket as a blocking [`FileSystem`], which is what the job
//! submission path expects.

use std::future::Future;
use std::io;

use anyhow::{anyhow, Error};
use aws_sdk_s3 as s3;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use bytes::Bytes;
use tokio::runtime::Runtime;
use tracing::debug;
use url::Url;

use crate::fs::{DfsPath, FileSystem};

#[derive(Debug, PartialEq, Eq)]
pub struct BucketKey {
    pub bucket: String,
    pub key: String,
}

/// Splits an `s3://bucket/some/key` URL into its bucket and key.
///
/// Trailing slashes are dropped from the key; a bare bucket has an empty key.
pub fn path_to_bucket_key(path: &str) -> Result<BucketKey, Error> {
    let url = Url::parse(path).map_err(|e| anyhow!("invalid object store URL {path}: {e}"))?;
    if url.scheme() != "s3" {
        return Err(anyhow!("{path} is not an s3:// URL"));
    }
    let bucket = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow!("{path} names no bucket"))?;

    Ok(BucketKey {
        bucket: bucket.to_string(),
        key: url.path().trim_matches('/').to_string(),
    })
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// id
    pub access_key_id: String,

    /// password
    pub secret_access_key: String,

    /// object store region
    pub region: String,

    /// minio url
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Client {
    pub client: s3::Client,
}

impl Client {
    pub fn from_conf(cfg: ClientConfig) -> Self {
        let cred = s3::config::Credentials::new(
            cfg.access_key_id,
            cfg.secret_access_key,
            None,
            None,
            "mrl",
        );
        let region = s3::config::Region::new(cfg.region);
        let conf = s3::config::Builder::new()
            .credentials_provider(cred)
            .region(region)
            .endpoint_url(cfg.url)
            .force_path_style(true)
            .behavior_version_latest()
            .build();

        Self {
            client: s3::Client::from_conf(conf),
        }
    }

    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, Error> {
        let data = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?
            .body
            .collect()
            .await?
            .into_bytes();
        Ok(data)
    }

    pub async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }

    /// Lists all objects whose key starts with `prefix`.
    pub async fn list_objects_in_dir(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, Error> {
        let mut response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(50)
            .into_paginator()
            .send();

        let mut objects = vec![];
        while let Some(result) = response.next().await {
            let output = result?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    objects.push(key.to_string());
                }
            }
        }

        Ok(objects)
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, Error> {
        let object_request = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;

        match object_request {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = err.into_service_error();
                if err.code() == Some("NotFound") || err.is_not_found() {
                    return Ok(false);
                }
                Err(anyhow!("head object {bucket}/{key} failed: {err}"))
            }
        }
    }

    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    pub async fn delete_path(&self, bucket: &str, path: &str) -> Result<usize, Error> {
        let objects = self.list_objects_in_dir(bucket, path).await?;
        for object in &objects {
            self.delete_object(bucket, object).await?;
        }

        Ok(objects.len())
    }
}

/// One bucket of an S3-compatible store, seen as a [`FileSystem`].
///
/// Directories are key prefixes; [`FileSystem::mkdirs`] writes an empty
/// `dir/` marker object so that empty directories survive. Every call blocks
/// on an internal runtime and must not be made from inside another tokio
/// runtime.
pub struct S3FileSystem {
    client: Client,
    bucket: String,
    runtime: Runtime,
}

impl S3FileSystem {
    pub fn new(cfg: ClientConfig, bucket: impl Into<String>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("mrl-s3")
            .enable_all()
            .build()?;
        Ok(Self {
            client: Client::from_conf(cfg),
            bucket: bucket.into(),
            runtime,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn block_on<T>(&self, fut: impl Future<Output = Result<T, Error>>) -> io::Result<T> {
        self.runtime.block_on(fut).map_err(io::Error::other)
    }
}

/// Object key for a path: no leading slash.
fn object_key(path: &DfsPath) -> String {
    path.as_str().trim_start_matches('/').to_string()
}

/// Prefix matching everything below a path.
fn dir_prefix(path: &DfsPath) -> String {
    if path.is_root() {
        String::new()
    } else {
        format!("{}/", object_key(path))
    }
}

impl FileSystem for S3FileSystem {
    fn uri(&self) -> String {
        format!("s3://{}/", self.bucket)
    }

    fn exists(&self, path: &DfsPath) -> io::Result<bool> {
        if path.is_root() {
            return Ok(true);
        }
        let key = object_key(path);
        if self.block_on(self.client.object_exists(&self.bucket, &key))? {
            return Ok(true);
        }
        self.is_dir(path)
    }

    fn is_dir(&self, path: &DfsPath) -> io::Result<bool> {
        let prefix = dir_prefix(path);
        let objects = self.block_on(self.client.list_objects_in_dir(&self.bucket, &prefix))?;
        Ok(!objects.is_empty())
    }

    fn delete(&self, path: &DfsPath, recursive: bool) -> io::Result<bool> {
        let key = object_key(path);
        let prefix = dir_prefix(path);
        let children = self.block_on(self.client.list_objects_in_dir(&self.bucket, &prefix))?;

        if !children.is_empty() {
            let has_content = children.iter().any(|child| *child != prefix);
            if has_content && !recursive {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{path} is a non-empty directory"),
                ));
            }
            debug!("deleting {} objects below s3://{}/{}", children.len(), self.bucket, prefix);
            self.block_on(self.client.delete_path(&self.bucket, &prefix))?;
            return Ok(true);
        }

        if self.block_on(self.client.object_exists(&self.bucket, &key))? {
            self.block_on(self.client.delete_object(&self.bucket, &key))?;
            return Ok(true);
        }
        Ok(false)
    }

    fn mkdirs(&self, path: &DfsPath) -> io::Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let marker = dir_prefix(path);
        self.block_on(self.client.put_object(&self.bucket, &marker, Bytes::new()))
    }

    fn write(&self, path: &DfsPath, data: Bytes) -> io::Result<()> {
        let key = object_key(path);
        self.block_on(self.client.put_object(&self.bucket, &key, data))
    }

    fn read(&self, path: &DfsPath) -> io::Result<Bytes> {
        let key = object_key(path);
        self.block_on(self.client.get_object(&self.bucket, &key))
    }

    fn list_files(&self, path: &DfsPath, recursive: bool) -> io::Result<Vec<DfsPath>> {
        let key = object_key(path);
        if !path.is_root() && self.block_on(self.client.object_exists(&self.bucket, &key))? {
            return Ok(vec![path.clone()]);
        }

        let prefix = dir_prefix(path);
        let objects = self.block_on(self.client.list_objects_in_dir(&self.bucket, &prefix))?;
        if objects.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path} does not exist"),
            ));
        }

        let mut files: Vec<DfsPath> = objects
            .iter()
            .filter(|object| !object.ends_with('/'))
            .filter(|object| recursive || !object[prefix.len()..].contains('/'))
            .map(DfsPath::new)
            .collect();
        files.sort();
        Ok(files)
    }
}
