use crate::error::SyncError;
use crate::types::BlockHash;
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

const MMAP_THRESHOLD: u64 = 32 * 1024 * 1024; // 32 MiB

/// A file split into content-addressed blocks.
///
/// `hashlist` is in file order and may repeat a hash; `blocks` holds each
/// distinct payload once.
#[derive(Debug, Clone, Default)]
pub struct ChunkedFile {
    pub hashlist: Vec<BlockHash>,
    pub blocks: HashMap<BlockHash, Arc<[u8]>>,
    pub size: u64,
}

impl ChunkedFile {
    pub fn payload(&self, hash: &BlockHash) -> Option<&Arc<[u8]>> {
        self.blocks.get(hash)
    }

    pub fn unique_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Split `data` into `chunk_size` pieces (last one may be shorter).
///
/// Empty input yields an empty hashlist.
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> ChunkedFile {
    let chunk_size = chunk_size.max(1);
    let mut out = ChunkedFile {
        hashlist: Vec::with_capacity(data.len().div_ceil(chunk_size)),
        blocks: HashMap::new(),
        size: data.len() as u64,
    };

    for chunk in data.chunks(chunk_size) {
        let hash = BlockHash::of(chunk);
        out.blocks.entry(hash).or_insert_with(|| Arc::from(chunk));
        out.hashlist.push(hash);
    }

    out
}

/// Read and chunk a local file. Large files are mapped instead of read.
pub fn chunk_file(path: &Path, chunk_size: usize) -> Result<ChunkedFile, SyncError> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let len = file.metadata().map_err(|e| SyncError::io(path, e))?.len();

    if len >= MMAP_THRESHOLD {
        // SAFETY: the map is read-only and dropped before return; concurrent
        // truncation of the source file is the caller's problem, as with any reader.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| SyncError::io(path, e))?;
        madvise_sequential(&mmap);
        tracing::debug!(path = %path.display(), len, "chunking from mmap");
        return Ok(chunk_bytes(&mmap, chunk_size));
    }

    let mut buf = Vec::with_capacity(len as usize);
    file.read_to_end(&mut buf).map_err(|e| SyncError::io(path, e))?;
    Ok(chunk_bytes(&buf, chunk_size))
}

fn madvise_sequential(mmap: &Mmap) {
    // SAFETY: the range is exactly the live mapping; the advice only affects
    // readahead and its result is ignored.
    unsafe {
        let _ = libc::madvise(
            mmap.as_ptr() as *mut libc::c_void,
            mmap.len(),
            libc::MADV_SEQUENTIAL,
        );
    }
}
