//! Decoding of Illumina chastity filter (.filter) files.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use errors::*;

/// Fixed size of the filter file header: empty word, version, cluster count.
const FILTER_HEADER_SIZE: u64 = 12;

/// Reader for one .filter file.
///
/// The header carries the cluster count; the payload is one byte per cluster
/// whose low bit is the pass-filter flag.
pub struct FilterReader<R: Read> {
    path: PathBuf,
    inner: R,
    total_clusters: u32,
    current: u32,
}

impl FilterReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<FilterReader<BufReader<File>>> {
        let inner = BufReader::new(
            File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?,
        );
        FilterReader::from_reader(inner, path)
    }

    /// Jump to the flag of cluster `index`.
    pub fn seek(&mut self, index: u32) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(FILTER_HEADER_SIZE + index as u64))
            .chain_err(|| format!("Problem seeking in {}", self.path.display()))?;
        self.current = index;
        Ok(())
    }
}

impl<R: Read> FilterReader<R> {
    pub fn from_reader(mut inner: R, path: &Path) -> Result<FilterReader<R>> {
        let empty = inner
            .read_u32::<LittleEndian>()
            .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
        if empty != 0 {
            bail!(ErrorKind::UnknownFormat(path.display().to_string()));
        }
        let _version = inner
            .read_u32::<LittleEndian>()
            .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
        let total_clusters = inner
            .read_u32::<LittleEndian>()
            .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
        Ok(FilterReader {
            path: path.to_path_buf(),
            inner: inner,
            total_clusters: total_clusters,
            current: 0,
        })
    }

    pub fn total_clusters(&self) -> u32 {
        self.total_clusters
    }

    /// Return the next cluster's pass-filter flag, `None` at end of tile.
    pub fn next(&mut self) -> Result<Option<u8>> {
        if self.current == self.total_clusters {
            return Ok(None);
        }
        let flag = self
            .inner
            .read_u8()
            .chain_err(|| ErrorKind::TruncatedFile(self.path.display().to_string()))?;
        self.current += 1;
        Ok(Some(flag & 1))
    }

    /// Read the whole payload; the result is shared by the position loader
    /// and the per-cluster path of the CBCL decoder.
    pub fn load_all(mut self) -> Result<Vec<u8>> {
        let mut flags = vec![0u8; self.total_clusters as usize];
        self.inner
            .read_exact(&mut flags)
            .chain_err(|| ErrorKind::TruncatedFile(self.path.display().to_string()))?;
        for flag in flags.iter_mut() {
            *flag &= 1;
        }
        Ok(flags)
    }
}
