//! Binary shard files.
//!
//! Each shard of a saved index is one file, named by its ordinal. Files are
//! read back through a memory map and parsed in a single pass.
//!
//! # Storage Format
//!
//! All integers are little-endian.
//! - Header (32 bytes): magic `DQSH`, version, shard kind, dimension,
//!   vector count, trained flag, centroid count, reserved
//! - Records: `count` × (`i64` id, `dimension` × `f32`)
//! - When trained: `centroids` × `dimension` × `f32`, then one `u32`
//!   inverted-list index per record

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapOptions;

use crate::error::{IndexError, IndexResult};
use crate::vector::shard::{FlatShard, IvfShard, Shard, ShardBackend, ShardKind};
use crate::vector::types::VectorId;

/// Current shard file format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the shard header in bytes.
const HEADER_SIZE: usize = 32;

/// Magic bytes to identify shard files.
const MAGIC_BYTES: &[u8; 4] = b"DQSH";

const BYTES_PER_F32: usize = 4;
const BYTES_PER_ID: usize = 8;

/// Path of the file holding shard `ordinal` inside `dir`.
pub fn shard_path(dir: &Path, ordinal: usize) -> PathBuf {
    dir.join(format!("shard_{ordinal}.dqs"))
}

/// Writes one shard to `path`, replacing any existing file.
///
/// Data goes to a temporary sibling first and is renamed into place, so a
/// failed write never leaves a truncated shard behind.
pub fn write_shard(path: &Path, shard: &Shard) -> IndexResult<()> {
    let tmp_path = path.with_extension("dqs.tmp");
    let file = File::create(&tmp_path).map_err(|e| IndexError::io(&tmp_path, e))?;
    let mut writer = BufWriter::new(file);

    encode_shard(&mut writer, shard).map_err(|e| IndexError::io(&tmp_path, e))?;
    writer
        .into_inner()
        .map_err(|e| IndexError::io(&tmp_path, e.into_error()))?
        .sync_all()
        .map_err(|e| IndexError::io(&tmp_path, e))?;

    fs::rename(&tmp_path, path).map_err(|e| IndexError::io(path, e))
}

fn encode_shard(out: &mut impl Write, shard: &Shard) -> std::io::Result<()> {
    let (store, ivf) = match shard {
        Shard::Exhaustive(flat) => (flat, None),
        Shard::Partitioned(ivf) => (ivf.store(), Some(ivf)),
    };
    let centroids = ivf.map(|s| s.centroids()).unwrap_or_default();
    let trained = !centroids.is_empty();

    out.write_all(MAGIC_BYTES)?;
    out.write_all(&STORAGE_VERSION.to_le_bytes())?;
    out.write_all(&shard.kind().tag().to_le_bytes())?;
    out.write_all(&(store.dimension() as u32).to_le_bytes())?;
    out.write_all(&(store.len() as u32).to_le_bytes())?;
    out.write_all(&u32::from(trained).to_le_bytes())?;
    out.write_all(&(centroids.len() as u32).to_le_bytes())?;
    out.write_all(&0u32.to_le_bytes())?;

    for (pos, id) in store.ids().iter().enumerate() {
        out.write_all(&id.to_le_bytes())?;
        for value in store.reconstruct(pos) {
            out.write_all(&value.to_le_bytes())?;
        }
    }

    if let Some(ivf) = ivf.filter(|_| trained) {
        for centroid in ivf.centroids() {
            for value in centroid {
                out.write_all(&value.to_le_bytes())?;
            }
        }
        for list in ivf.assignments() {
            out.write_all(&list.to_le_bytes())?;
        }
    }

    out.flush()
}

/// Reads shard `ordinal` from `path`, checking it against the index
/// configuration it is being loaded into.
pub fn read_shard(
    path: &Path,
    ordinal: usize,
    kind: ShardKind,
    dimension: usize,
    nlist: usize,
) -> IndexResult<Shard> {
    if !path.exists() {
        return Err(IndexError::MissingShard {
            shard: ordinal,
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
    // SAFETY: the file is opened read-only and only read during this call.
    let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| IndexError::io(path, e))?;
    let mut reader = ByteReader::new(&mmap, path);

    let magic = reader.take(4)?;
    if magic != MAGIC_BYTES {
        return Err(IndexError::corrupted(path, "invalid magic bytes"));
    }
    let version = reader.u32()?;
    if version != STORAGE_VERSION {
        return Err(IndexError::corrupted(
            path,
            format!("unsupported shard format version {version}, expected {STORAGE_VERSION}"),
        ));
    }
    let stored_kind = ShardKind::from_tag(reader.u32()?)
        .ok_or_else(|| IndexError::corrupted(path, "unknown shard kind tag"))?;
    if stored_kind != kind {
        return Err(IndexError::corrupted(
            path,
            format!("shard kind is {stored_kind}, index expects {kind}"),
        ));
    }
    let stored_dimension = reader.u32()? as usize;
    if stored_dimension != dimension {
        return Err(IndexError::corrupted(
            path,
            format!("shard dimension is {stored_dimension}, index expects {dimension}"),
        ));
    }
    let count = reader.u32()? as usize;
    let trained = reader.u32()? != 0;
    let centroid_count = reader.u32()? as usize;
    let _reserved = reader.u32()?;

    let record_size = BYTES_PER_ID + dimension * BYTES_PER_F32;
    reader.require(count * record_size, "vector records")?;

    let mut ids: Vec<VectorId> = Vec::with_capacity(count);
    let mut vectors = Vec::with_capacity(count * dimension);
    for _ in 0..count {
        ids.push(reader.i64()?);
        for _ in 0..dimension {
            vectors.push(reader.f32()?);
        }
    }
    let store = FlatShard::from_parts(dimension, ids, vectors);

    let shard = match kind {
        ShardKind::Exhaustive => Shard::Exhaustive(store),
        ShardKind::Partitioned if !trained => {
            Shard::Partitioned(IvfShard::from_parts(store, nlist, Vec::new(), Vec::new()))
        }
        ShardKind::Partitioned => {
            if centroid_count == 0 {
                return Err(IndexError::corrupted(path, "trained shard without centroids"));
            }
            reader.require(
                centroid_count * dimension * BYTES_PER_F32 + count * 4,
                "centroids and list assignments",
            )?;
            let mut centroids = Vec::with_capacity(centroid_count);
            for _ in 0..centroid_count {
                let mut centroid = Vec::with_capacity(dimension);
                for _ in 0..dimension {
                    centroid.push(reader.f32()?);
                }
                centroids.push(centroid);
            }
            let mut assignments = Vec::with_capacity(count);
            for _ in 0..count {
                let list = reader.u32()?;
                if list as usize >= centroid_count {
                    return Err(IndexError::corrupted(
                        path,
                        format!("list assignment {list} out of range"),
                    ));
                }
                assignments.push(list);
            }
            Shard::Partitioned(IvfShard::from_parts(store, nlist, centroids, assignments))
        }
    };

    if !reader.is_at_end() {
        return Err(IndexError::corrupted(path, "trailing bytes after shard data"));
    }

    tracing::debug!(
        "Loaded shard {ordinal} ({} vectors, trained: {}) from {}",
        shard.len(),
        shard.is_trained(),
        path.display()
    );
    Ok(shard)
}

/// Little-endian cursor over a byte slice that reports truncation as
/// corruption of `path`.
struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], path: &'a Path) -> Self {
        Self {
            data,
            offset: 0,
            path,
        }
    }

    fn require(&self, len: usize, what: &str) -> IndexResult<()> {
        if self.data.len() - self.offset < len {
            return Err(IndexError::corrupted(
                self.path,
                format!("file truncated while reading {what}"),
            ));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> IndexResult<&'a [u8]> {
        if self.offset == 0 && self.data.len() < HEADER_SIZE {
            return Err(IndexError::corrupted(
                self.path,
                "file too small to contain header",
            ));
        }
        self.require(len, "shard data")?;
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> IndexResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> IndexResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> IndexResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> IndexResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn is_at_end(&self) -> bool {
        self.offset == self.data.len()
    }
}
