//! Hash-sharded group of `RamIndex` partitions.
//!
//! A key always lives in shard `hash(key) % shards`. Each shard carries its
//! own lock, so writers on different shards never contend.

use crate::collection::RowCollection;
use crate::index::{Index, KeyIter, RowIter};
use crate::merge::merge_all;
use crate::ram::RamIndex;
use crate::rowset::RowSet;
use crate::sort::SortPool;
use rowstore_common::{IndexConfig, Result};
use rowstore_row::{Cells, Entry, Row};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub struct RamIndexCluster {
    name: String,
    row: Arc<Row>,
    shards: Vec<RamIndex>,
}

impl RamIndexCluster {
    pub fn new(name: impl Into<String>, row: Arc<Row>, shards: usize) -> Self {
        Self::from_template(name, &RowSet::new(row), shards)
    }

    /// Shards sort on a pool of `config.sort_threads` workers.
    pub fn with_config(name: impl Into<String>, row: Arc<Row>, config: &IndexConfig) -> Self {
        let template = RowSet::new(row).with_sort_pool(SortPool::with_threads(config.sort_threads));
        Self::from_template(name, &template, config.shard_count())
    }

    /// Shards start as empty copies of `template`, inheriting its
    /// collection config and memory oracle.
    pub fn from_template(name: impl Into<String>, template: &RowSet, shards: usize) -> Self {
        let name = name.into();
        let shards = (0..shards.max(1))
            .map(|i| RamIndex::from_set(format!("{name}.{i}"), template.empty_like()))
            .collect();
        Self {
            name,
            row: template.row().clone(),
            shards,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &[u8]) -> &RamIndex {
        &self.shards[self.shard_index(key)]
    }

    pub fn shards(&self) -> &[RamIndex] {
        &self.shards
    }

    pub fn finish_initialization(&self) {
        for shard in &self.shards {
            shard.finish_initialization();
        }
    }

    /// Read-modify-write of one cell under the owning shard's lock.
    pub fn inc(
        &self,
        key: &[u8],
        col: usize,
        add: i64,
        initrow: Option<&Entry>,
    ) -> Result<Option<i64>> {
        self.shard(key).inc(key, col, add, initrow)
    }

    pub fn random(&self, n: usize) -> Vec<Entry> {
        let per_shard = n.div_ceil(self.shards.len());
        let mut sample: Vec<Entry> = self
            .shards
            .iter()
            .flat_map(|shard| shard.random(per_shard))
            .collect();
        sample.truncate(n);
        sample
    }

    fn extreme_key(&self, keys: impl Iterator<Item = Vec<u8>>, largest: bool) -> Option<Vec<u8>> {
        let order = self.row.order();
        if largest {
            keys.max_by(|a, b| order.compare(a, b))
        } else {
            keys.min_by(|a, b| order.compare(a, b))
        }
    }
}

impl Index for RamIndexCluster {
    fn size(&self) -> usize {
        self.shards.iter().map(RamIndex::size).sum()
    }

    fn row(&self) -> &Arc<Row> {
        &self.row
    }

    fn has(&self, key: &[u8]) -> bool {
        self.shard(key).has(key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.shard(key).get(key)
    }

    fn put(&self, entry: &Entry) -> Result<bool> {
        self.shard(entry.primary_key()).put(entry)
    }

    fn add_unique(&self, entry: &Entry) -> Result<()> {
        self.shard(entry.primary_key()).add_unique(entry)
    }

    fn replace(&self, entry: &Entry) -> Result<Option<Entry>> {
        self.shard(entry.primary_key()).replace(entry)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Entry>> {
        self.shard(key).remove(key)
    }

    fn remove_one(&self) -> Result<Option<Entry>> {
        for shard in &self.shards {
            if let Some(entry) = shard.remove_one()? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn remove_doubles(&self) -> Result<Vec<RowCollection>> {
        let mut doubles = Vec::new();
        for shard in &self.shards {
            doubles.extend(shard.remove_doubles()?);
        }
        Ok(doubles)
    }

    fn top(&self, n: usize) -> Result<Vec<Entry>> {
        let mut top = Vec::with_capacity(n);
        for shard in &self.shards {
            if top.len() >= n {
                break;
            }
            top.extend(shard.top(n - top.len())?);
        }
        Ok(top)
    }

    fn keys(&self, up: bool, first: Option<&[u8]>) -> Result<KeyIter> {
        let streams = self
            .shards
            .iter()
            .map(|shard| shard.keys(up, first))
            .collect::<Result<Vec<_>>>()?;
        Ok(merge_all(streams, self.row.order(), up))
    }

    fn rows(&self, up: bool, first: Option<&[u8]>) -> Result<RowIter> {
        let streams = self
            .shards
            .iter()
            .map(|shard| shard.rows(up, first))
            .collect::<Result<Vec<_>>>()?;
        Ok(merge_all(streams, self.row.order(), up))
    }

    fn smallest_key(&self) -> Option<Vec<u8>> {
        self.extreme_key(self.shards.iter().filter_map(RamIndex::smallest_key), false)
    }

    fn largest_key(&self) -> Option<Vec<u8>> {
        self.extreme_key(self.shards.iter().filter_map(RamIndex::largest_key), true)
    }

    fn mem(&self) -> usize {
        self.shards.iter().map(RamIndex::mem).sum()
    }

    fn optimize(&self) {
        for shard in &self.shards {
            shard.optimize();
        }
    }

    fn clear(&self) -> Result<()> {
        for shard in &self.shards {
            shard.clear()?;
        }
        Ok(())
    }

    fn close(&self) {
        for shard in &self.shards {
            shard.close();
        }
    }
}
