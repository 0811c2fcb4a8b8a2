//! Decode every block at once.
//!
//! Body ranges are independent once framing is done, so after one
//! sequential pass that pulls the undecoded bodies out of the source, the
//! layout work can fan out across threads. Without the `parallel` feature
//! the same entry point decodes sequentially.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use crate::block::BlockHeader;
use crate::document::{decode_body, read_range, Document};
use crate::error::{Error, Result};

struct Job {
    index:  usize,
    header: BlockHeader,
    bytes:  Vec<u8>,
}

impl<S: Read + Seek> Document<S> {
    /// Decode every undecoded block, in parallel when the `parallel` feature
    /// is enabled.
    ///
    /// Returns the failures by block index, in ascending order. Blocks that
    /// fail keep no body; every other block is cached as if
    /// [`decode_block`](Document::decode_block) had been called on it.
    pub fn decode_all_parallel(&mut self) -> Vec<(usize, Error)> {
        self.prime_catalog();
        let mut failures = Vec::new();
        let mut jobs = Vec::new();

        for (index, block) in self.blocks.iter().enumerate() {
            if block.is_decoded() {
                continue;
            }
            let Some(range) = block.range() else {
                failures.push((index, Error::NoSuchBlock(index)));
                continue;
            };
            match read_range(&mut self.source, range) {
                Ok(bytes) => jobs.push(Job { index, header: *block.header(), bytes }),
                Err(e) => failures.push((index, e)),
            }
        }
        debug!(jobs = jobs.len(), "bodies read");

        let file = self.header;
        let catalog = self.catalog.as_deref();
        let strategy = &*self.strategy;
        let allow_trailing = self.allow_trailing;
        let run = |job: Job| -> (usize, Result<_>) {
            let body = decode_body(&file, &job.header, job.bytes, catalog, strategy, allow_trailing);
            (job.index, body)
        };

        #[cfg(feature = "parallel")]
        let results: Vec<_> = {
            use rayon::prelude::*;
            jobs.into_par_iter().map(run).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = jobs.into_iter().map(run).collect();

        for (index, result) in results {
            match result {
                Ok(body) => self.blocks[index].set_decoded(body),
                Err(e) => {
                    warn!(block = index, code = %self.blocks[index].code(), "decode failed: {e}");
                    failures.push((index, e));
                }
            }
        }
        failures.sort_by_key(|(index, _)| *index);
        failures
    }
}
