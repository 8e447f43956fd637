use crate::chunking::DEFAULT_CHUNK_SIZE;
use crate::client::{ClientOptions, DEFAULT_MAX_ATTEMPTS};
use crate::placement::PlacementPolicy;
use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("endpoint '{s}' is not host:port"))?;
        if host.is_empty() {
            bail!("endpoint '{s}' has an empty host");
        }
        let port = port
            .parse::<u16>()
            .with_context(|| format!("endpoint '{s}' has an invalid port"))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Cluster layout and client tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub metadata: Endpoint,
    /// One endpoint per block-store shard, index = shard id.
    pub shards: Vec<Endpoint>,
    pub placement: PlacementPolicy,
    pub max_attempts: u32,
    pub chunk_size: usize,
}

impl ClusterConfig {
    /// One local shard, hash placement.
    pub fn single_node() -> Self {
        Self {
            metadata: Endpoint {
                host: "localhost".into(),
                port: 6000,
            },
            shards: vec![Endpoint {
                host: "localhost".into(),
                port: 5000,
            }],
            placement: PlacementPolicy::HashPartition,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            chunk_size: self.chunk_size,
            max_attempts: self.max_attempts,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parse the `key: value` format:
    ///
    /// ```text
    /// B: 2
    /// metadata: localhost:6000
    /// block0: localhost:5000
    /// block1: localhost:5001
    /// placement: hash
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let mut count: Option<usize> = None;
        let mut metadata: Option<Endpoint> = None;
        let mut blocks: BTreeMap<usize, Endpoint> = BTreeMap::new();
        let mut placement = PlacementPolicy::default();
        let mut max_attempts = DEFAULT_MAX_ATTEMPTS;
        let mut chunk_size = DEFAULT_CHUNK_SIZE;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let lineno = lineno + 1;
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("line {lineno}: expected 'key: value'"))?;
            let key = key.trim();
            let value = value.trim();

            match key {
                "B" => {
                    let n = value
                        .parse::<usize>()
                        .with_context(|| format!("line {lineno}: B must be a number"))?;
                    if n == 0 {
                        bail!("line {lineno}: B must be at least 1");
                    }
                    count = Some(n);
                }
                "metadata" => {
                    metadata = Some(value.parse::<Endpoint>().with_context(|| format!("line {lineno}"))?);
                }
                "placement" => {
                    placement = value.parse::<PlacementPolicy>().with_context(|| format!("line {lineno}"))?;
                }
                "retries" => {
                    max_attempts = value
                        .parse::<u32>()
                        .with_context(|| format!("line {lineno}: retries must be a number"))?;
                    if max_attempts == 0 {
                        bail!("line {lineno}: retries must be at least 1");
                    }
                }
                "chunk_size" => {
                    chunk_size = value
                        .parse::<usize>()
                        .with_context(|| format!("line {lineno}: chunk_size must be a number"))?;
                    if chunk_size == 0 {
                        bail!("line {lineno}: chunk_size must be at least 1");
                    }
                }
                k if k.starts_with("block") => {
                    let idx = k["block".len()..]
                        .parse::<usize>()
                        .with_context(|| format!("line {lineno}: bad block key '{k}'"))?;
                    let ep = value.parse::<Endpoint>().with_context(|| format!("line {lineno}"))?;
                    if blocks.insert(idx, ep).is_some() {
                        bail!("line {lineno}: block{idx} given twice");
                    }
                }
                other => bail!("line {lineno}: unknown key '{other}'"),
            }
        }

        let count = count.ok_or_else(|| anyhow!("missing 'B' (number of block stores)"))?;
        let metadata = metadata.ok_or_else(|| anyhow!("missing 'metadata' endpoint"))?;
        if blocks.len() != count {
            bail!("B is {count} but {} block endpoint(s) are listed", blocks.len());
        }
        let shards: Vec<Endpoint> = blocks
            .into_iter()
            .enumerate()
            .map(|(expected, (idx, ep))| {
                if idx == expected {
                    Ok(ep)
                } else {
                    Err(anyhow!("block endpoints must be numbered 0..{count}, missing block{expected}"))
                }
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            metadata,
            shards,
            placement,
            max_attempts,
            chunk_size,
        })
    }
}
