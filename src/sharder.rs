//! Deterministic bucketing of units into shards.
pub(crate) trait Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64;
}

/// The default (and only) sharder.
pub(crate) struct Md5Sharder;

impl Sharder for Md5Sharder {
    fn get_shard(&self, input: impl AsRef<[u8]>, total_shards: u64) -> u64 {
        let hash = md5::compute(input);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[0..8]);
        u64::from_be_bytes(prefix) % total_shards
    }
}
