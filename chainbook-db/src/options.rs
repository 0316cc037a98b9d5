use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options};

const BLOCK_SIZE: usize = 32 << 10;
const WRITE_BUFFER_SIZE: usize = 64 << 20;
const BLOOM_BITS_PER_KEY: f64 = 10.0;

fn table_options(cache: Option<&Cache>, bloom: bool) -> BlockBasedOptions {
    let mut table = BlockBasedOptions::default();
    table.set_block_size(BLOCK_SIZE);
    table.set_cache_index_and_filter_blocks(true);
    if let Some(cache) = cache {
        table.set_block_cache(cache);
    }
    if bloom {
        table.set_bloom_filter(BLOOM_BITS_PER_KEY, true);
    }
    table
}

/// Database options: a shared LRU block cache of `cache_size_mb`, bloom
/// filtered point lookups, lz4 on the upper levels and zstd at the bottom.
pub fn get_db_default_options(cache_size_mb: usize) -> Options {
    let cache = Cache::new_lru_cache(cache_size_mb << 20);

    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts.increase_parallelism(num_cpus::get().max(1) as i32);
    opts.set_enable_pipelined_write(true);
    opts.set_max_write_buffer_number(2);
    opts.set_write_buffer_size(WRITE_BUFFER_SIZE);
    opts.set_level_compaction_dynamic_level_bytes(true);
    opts.set_compression_type(DBCompressionType::Lz4);
    opts.set_bottommost_compression_type(DBCompressionType::Zstd);
    opts.set_block_based_table_factory(&table_options(Some(&cache), true));
    opts
}

/// Options for column families read by prefix scans only, where a bloom
/// filter never helps.
pub fn get_cf_scan_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(DBCompressionType::Lz4);
    opts.set_block_based_table_factory(&table_options(None, false));
    opts
}
