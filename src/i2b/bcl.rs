//! Decoding of Illumina basecall files.
//!
//! Four generations of on-disk encoding are handled: classic per-tile BCL
//! (MiSeq), gzipped BCL (HiSeqX), per-lane BGZF BCL with a BCI tile index
//! (NextSeq) and per-tile deflate blocks inside CBCL (NovaSeq).  Secondary
//! basecall (SCL) files ride along for the E2 aux tag.

use byteorder::{LittleEndian, ReadBytesExt};
use flate2::read::{MultiGzDecoder, ZlibDecoder};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use errors::*;

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
const NO_CALL: u8 = b'N';

/// Longest read name the SAM spec allows us to emit.
pub const MAX_READ_NAME: usize = 127;

/// Basecall file flavor; decided once from the file name, never in the
/// per-cluster loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BclFormat {
    Bcl,
    BclGz,
    BclBgzf,
    Cbcl,
    Scl,
}

/// Detect the basecall file format from the file name.
pub fn detect_format(path: &Path) -> Result<BclFormat> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".bcl") {
        Ok(BclFormat::Bcl)
    } else if name.ends_with(".bcl.gz") {
        Ok(BclFormat::BclGz)
    } else if name.ends_with(".bcl.bgzf") {
        Ok(BclFormat::BclBgzf)
    } else if name.ends_with(".cbcl") {
        Ok(BclFormat::Cbcl)
    } else if name.ends_with(".scl") {
        Ok(BclFormat::Scl)
    } else {
        bail!(ErrorKind::UnknownFormat(path.display().to_string()))
    }
}

/// One cycle's worth of basecalls for one tile, one entry per cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleData {
    pub bases: Vec<u8>,
    pub quals: Vec<u8>,
}

impl CycleData {
    fn with_capacity(cap: usize) -> CycleData {
        CycleData {
            bases: Vec::with_capacity(cap),
            quals: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    fn push(&mut self, base: u8, qual: u8) {
        self.bases.push(base);
        self.quals.push(qual);
    }
}

/// Split a raw BCL byte into its base letter and quality.
///
/// Bits 0-1 index into "ACGT", bits 2-7 are the quality; quality zero means
/// the call is undetermined and the base is reported as 'N'.
fn decode_call(byte: u8) -> (u8, u8) {
    let qual = byte >> 2;
    let base = if qual == 0 {
        NO_CALL
    } else {
        BASES[(byte & 0x03) as usize]
    };
    (base, qual)
}

fn decode_raw<R: Read>(reader: &mut R, path: &Path) -> Result<CycleData> {
    let total = reader
        .read_u32::<LittleEndian>()
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
    let mut buf = vec![0u8; total as usize];
    reader
        .read_exact(&mut buf)
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;

    let mut data = CycleData::with_capacity(total as usize);
    for byte in &buf {
        let (base, qual) = decode_call(*byte);
        data.push(base, qual);
    }
    Ok(data)
}

/// Read a whole classic or gzipped BCL tile file.
pub fn read_bcl(path: &Path) -> Result<CycleData> {
    let file = File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?;
    match detect_format(path)? {
        BclFormat::Bcl => decode_raw(&mut BufReader::new(file), path),
        BclFormat::BclGz => decode_raw(&mut MultiGzDecoder::new(file), path),
        _ => bail!(ErrorKind::UnknownFormat(path.display().to_string())),
    }
}

// ---------------------------------------------------------------------------
// NextSeq: per-lane BGZF BCL plus BCI tile index
// ---------------------------------------------------------------------------

/// The BCI file of a NextSeq lane: `{tile, cluster count}` pairs in the order
/// the tiles are concatenated inside the per-lane BGZF BCL files.
#[derive(Debug, Clone)]
pub struct BgzfIndex {
    entries: Vec<(u32, u32)>,
}

impl BgzfIndex {
    pub fn open(path: &Path) -> Result<BgzfIndex> {
        let file = File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?;
        BgzfIndex::from_reader(BufReader::new(file), path)
    }

    pub fn from_reader<R: Read>(mut reader: R, path: &Path) -> Result<BgzfIndex> {
        let mut entries = Vec::new();
        loop {
            let tile = match reader.read_u32::<LittleEndian>() {
                Ok(tile) => tile,
                Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(Error::from(e))
                        .chain_err(|| format!("Problem reading {}", path.display()))
                }
            };
            let clusters = reader
                .read_u32::<LittleEndian>()
                .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
            entries.push((tile, clusters));
        }
        Ok(BgzfIndex { entries: entries })
    }

    pub fn clusters_for(&self, tile: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|&&(t, _)| t == tile)
            .map(|&(_, n)| n)
    }

    /// Number of clusters stored before `tile` in the concatenated stream.
    pub fn clusters_before(&self, tile: u32) -> Option<u64> {
        let mut skipped = 0u64;
        for &(t, n) in &self.entries {
            if t == tile {
                return Some(skipped);
            }
            skipped += n as u64;
        }
        None
    }
}

/// Extract one tile's cycle data from a per-lane BGZF BCL file.
///
/// BGZF is a sequence of gzip members, so a multi-member gzip decoder reads
/// it transparently; the BCI index tells us how far into the decompressed
/// stream the tile starts.
pub fn read_bgzf_tile(path: &Path, index: &BgzfIndex, tile: u32) -> Result<CycleData> {
    let skip = index
        .clusters_before(tile)
        .ok_or_else(|| ErrorKind::TileNotFound(tile, path.display().to_string()))?;
    let total = index.clusters_for(tile).unwrap_or(0);

    let file = File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?;
    let mut decoder = MultiGzDecoder::new(file);
    let _lane_total = decoder
        .read_u32::<LittleEndian>()
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
    io::copy(&mut decoder.by_ref().take(skip), &mut io::sink())
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;

    let mut buf = vec![0u8; total as usize];
    decoder
        .read_exact(&mut buf)
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;

    let mut data = CycleData::with_capacity(total as usize);
    for byte in &buf {
        let (base, qual) = decode_call(*byte);
        data.push(base, qual);
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// NovaSeq: CBCL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbclTileRecord {
    pub tile: u32,
    pub clusters: u32,
    pub uncompressed: u32,
    pub compressed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbclHeader {
    pub version: u16,
    pub header_size: u32,
    pub bits_per_base: u8,
    pub bits_per_qual: u8,
    /// Quality bin table: 2-bit quality index to stored score.
    pub bins: Vec<u8>,
    pub tiles: Vec<CbclTileRecord>,
    /// True when the file stores only clusters that passed the filter.
    pub pf_only: bool,
}

impl CbclHeader {
    pub fn from_reader<R: Read>(reader: &mut R, path: &Path) -> Result<CbclHeader> {
        let truncated = || ErrorKind::TruncatedFile(path.display().to_string());

        let version = reader.read_u16::<LittleEndian>().chain_err(&truncated)?;
        let header_size = reader.read_u32::<LittleEndian>().chain_err(&truncated)?;
        let bits_per_base = reader.read_u8().chain_err(&truncated)?;
        let bits_per_qual = reader.read_u8().chain_err(&truncated)?;
        if bits_per_base != 2 || bits_per_qual != 2 {
            bail!(ErrorKind::UnsupportedEncoding(format!(
                "{}: {} bits per base, {} bits per quality",
                path.display(),
                bits_per_base,
                bits_per_qual
            )));
        }

        let nbins = reader.read_u32::<LittleEndian>().chain_err(&truncated)?;
        let mut bins = Vec::with_capacity(nbins as usize);
        for _ in 0..nbins {
            let _bin = reader.read_u32::<LittleEndian>().chain_err(&truncated)?;
            let score = reader.read_u32::<LittleEndian>().chain_err(&truncated)?;
            bins.push(score as u8);
        }

        let ntiles = reader.read_u32::<LittleEndian>().chain_err(&truncated)?;
        let mut tiles = Vec::with_capacity(ntiles as usize);
        for _ in 0..ntiles {
            tiles.push(CbclTileRecord {
                tile: reader.read_u32::<LittleEndian>().chain_err(&truncated)?,
                clusters: reader.read_u32::<LittleEndian>().chain_err(&truncated)?,
                uncompressed: reader.read_u32::<LittleEndian>().chain_err(&truncated)?,
                compressed: reader.read_u32::<LittleEndian>().chain_err(&truncated)?,
            });
        }
        let pf_flag = reader.read_u8().chain_err(&truncated)?;

        Ok(CbclHeader {
            version: version,
            header_size: header_size,
            bits_per_base: bits_per_base,
            bits_per_qual: bits_per_qual,
            bins: bins,
            tiles: tiles,
            pf_only: pf_flag == 1,
        })
    }

    fn tile_index(&self, tile: u32) -> Option<usize> {
        self.tiles.iter().position(|rec| rec.tile == tile)
    }

    /// Byte offset of a tile's compressed block: header size plus the sum of
    /// all earlier compressed block sizes.
    fn block_offset(&self, index: usize) -> u64 {
        self.header_size as u64
            + self.tiles[..index]
                .iter()
                .map(|rec| rec.compressed as u64)
                .sum::<u64>()
    }

    /// The one surface this file stores, taken from its tile records.
    pub fn surface(&self) -> u32 {
        self.tiles.first().map(|rec| surface_of(rec.tile)).unwrap_or(0)
    }
}

/// Surface of a tile: the most significant decimal digit of its number.
pub fn surface_of(tile: u32) -> u32 {
    let mut t = tile;
    while t >= 10 {
        t /= 10;
    }
    t
}

/// Reader over one CBCL file; owned by a single tile job.
pub struct CbclReader {
    path: PathBuf,
    inner: BufReader<File>,
    header: CbclHeader,
}

impl CbclReader {
    pub fn open(path: &Path) -> Result<CbclReader> {
        let file = File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?;
        let mut inner = BufReader::new(file);
        let header = CbclHeader::from_reader(&mut inner, path)?;
        Ok(CbclReader {
            path: path.to_path_buf(),
            inner: inner,
            header: header,
        })
    }

    pub fn header(&self) -> &CbclHeader {
        &self.header
    }

    pub fn surface(&self) -> u32 {
        self.header.surface()
    }

    /// Decode one tile into a full per-cluster cycle vector.
    ///
    /// Returns `Ok(None)` when the tile lives on the other surface of the
    /// flowcell; the matching file of the sibling surface will serve it.  For
    /// files that store only passing clusters the result is re-expanded over
    /// `filter` so that entry *n* always refers to cluster *n* of the tile.
    pub fn read_tile(&mut self, tile: u32, filter: Option<&[u8]>) -> Result<Option<CycleData>> {
        if surface_of(tile) != self.header.surface() {
            return Ok(None);
        }
        let index = self
            .header
            .tile_index(tile)
            .ok_or_else(|| ErrorKind::TileNotFound(tile, self.path.display().to_string()))?;
        let record = self.header.tiles[index].clone();
        let offset = self.header.block_offset(index);

        advise_willneed(self.inner.get_ref(), offset, record.compressed as u64);
        self.inner
            .seek(SeekFrom::Start(offset))
            .chain_err(|| format!("Problem seeking in {}", self.path.display()))?;
        let mut compressed = vec![0u8; record.compressed as usize];
        self.inner
            .read_exact(&mut compressed)
            .chain_err(|| ErrorKind::TruncatedFile(self.path.display().to_string()))?;
        let block = inflate_block(&compressed, record.uncompressed as usize, &self.path)?;
        advise_dontneed(self.inner.get_ref(), offset, record.compressed as u64);

        let stored = unpack_block(&block, record.clusters as usize, &self.header.bins);
        if self.header.pf_only {
            match filter {
                Some(flags) => Ok(Some(expand_pf_only(stored, flags, &self.path)?)),
                None => Ok(Some(stored)),
            }
        } else {
            Ok(Some(stored))
        }
    }
}

/// Inflate one compressed tile block into exactly `expected` bytes.
fn inflate_block(compressed: &[u8], expected: usize, path: &Path) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(expected);
    // Blocks are gzip-wrapped by current instruments; fall back to a bare
    // zlib wrapper for older RTA versions.
    let n = if compressed.starts_with(&[0x1f, 0x8b]) {
        MultiGzDecoder::new(compressed).read_to_end(&mut block)
    } else {
        ZlibDecoder::new(compressed).read_to_end(&mut block)
    }
    .chain_err(|| ErrorKind::InflateError(path.display().to_string()))?;
    if n != expected {
        bail!(ErrorKind::InflateError(path.display().to_string()));
    }
    Ok(block)
}

/// Unpack two-clusters-per-byte CBCL data: the low nibble is cluster *2n*,
/// the high nibble cluster *2n+1*; within a nibble bits 0-1 are the base and
/// bits 2-3 the quality bin.
fn unpack_block(block: &[u8], clusters: usize, bins: &[u8]) -> CycleData {
    let mut data = CycleData::with_capacity(clusters);
    for i in 0..clusters {
        let byte = block[i / 2];
        let code = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
        let score = bins.get(((code >> 2) & 0x03) as usize).cloned().unwrap_or(0);
        let base = if score == 0 {
            NO_CALL
        } else {
            BASES[(code & 0x03) as usize]
        };
        data.push(base, score);
    }
    data
}

/// Re-expand a passing-clusters-only stream over the tile's filter flags so
/// that the caller sees one entry per cluster.  Clusters the file left out
/// come back as no-calls.
fn expand_pf_only(stored: CycleData, flags: &[u8], path: &Path) -> Result<CycleData> {
    let passing = flags.iter().filter(|&&f| f & 1 == 1).count();
    if stored.len() < passing {
        bail!(ErrorKind::TruncatedFile(path.display().to_string()));
    }
    let mut data = CycleData::with_capacity(flags.len());
    let mut next = 0;
    for flag in flags {
        if flag & 1 == 1 {
            data.push(stored.bases[next], stored.quals[next]);
            next += 1;
        } else {
            data.push(NO_CALL, 0);
        }
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Secondary basecalls (SCL)
// ---------------------------------------------------------------------------

/// Decode a secondary basecall file: a cluster count followed by 2-bit base
/// codes packed four per byte, most significant pair first.
pub fn read_scl<R: Read>(reader: &mut R, path: &Path) -> Result<Vec<u8>> {
    let total = reader
        .read_u32::<LittleEndian>()
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
    let mut buf = vec![0u8; (total as usize + 3) / 4];
    reader
        .read_exact(&mut buf)
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;

    let mut bases = Vec::with_capacity(total as usize);
    for i in 0..total as usize {
        let byte = buf[i / 4];
        let shift = 6 - 2 * (i % 4);
        bases.push(BASES[((byte >> shift) & 0x03) as usize]);
    }
    Ok(bases)
}

pub fn read_scl_file(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?;
    read_scl(&mut BufReader::new(file), path)
}

// ---------------------------------------------------------------------------
// Read-ahead advice
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
fn advise_willneed(file: &File, offset: u64, len: u64) {
    use libc;
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            libc::POSIX_FADV_WILLNEED,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_willneed(_file: &File, _offset: u64, _len: u64) {}

#[cfg(target_os = "linux")]
fn advise_dontneed(file: &File, offset: u64, len: u64) {
    use libc;
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::posix_fadvise(
            file.as_raw_fd(),
            offset as libc::off_t,
            len as libc::off_t,
            libc::POSIX_FADV_DONTNEED,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_dontneed(_file: &File, _offset: u64, _len: u64) {}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Cursor;
    use std::io::Write;
    use std::path::Path;

    #[test]
    fn raw_byte_decoding() {
        assert_eq!(decode_call(0x78), (b'A', 30));
        assert_eq!(decode_call(0x65), (b'C', 25));
        assert_eq!(decode_call(0x81), (b'C', 32));
        // Quality zero always decodes as a no-call.
        assert_eq!(decode_call(0x00), (b'N', 0));
        assert_eq!(decode_call(0x02), (b'N', 0));
    }

    #[test]
    fn raw_bcl_stream() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(4).unwrap();
        bytes.extend_from_slice(&[0x78, 0x00, 0x65, 0x81]);
        let data = decode_raw(&mut Cursor::new(bytes), Path::new("s_1_1101.bcl")).unwrap();
        assert_eq!(data.bases, b"ANCC".to_vec());
        assert_eq!(data.quals, vec![30, 0, 25, 32]);
    }

    #[test]
    fn raw_bcl_shorter_than_count_is_truncated() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(10).unwrap();
        bytes.extend_from_slice(&[0x78, 0x00]);
        let err = decode_raw(&mut Cursor::new(bytes), Path::new("s_1_1101.bcl")).unwrap_err();
        match err.kind() {
            &ErrorKind::TruncatedFile(_) => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn bci_tile_offsets() {
        let mut bytes = Vec::new();
        for &(tile, count) in &[(11101u32, 100u32), (11102, 50), (11103, 75)] {
            bytes.write_u32::<LittleEndian>(tile).unwrap();
            bytes.write_u32::<LittleEndian>(count).unwrap();
        }
        let index = BgzfIndex::from_reader(Cursor::new(bytes), Path::new("s_1.bci")).unwrap();
        assert_eq!(index.clusters_for(11102), Some(50));
        assert_eq!(index.clusters_before(11101), Some(0));
        assert_eq!(index.clusters_before(11103), Some(150));
        assert_eq!(index.clusters_before(11999), None);
    }

    fn cbcl_header_bytes(tiles: &[(u32, u32, u32, u32)], pf_only: bool) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(1).unwrap();
        let header_size = 6 + 2 + 4 + 4 * 8 + 4 + tiles.len() * 16 + 1;
        buf.write_u32::<LittleEndian>(header_size as u32).unwrap();
        buf.write_u8(2).unwrap();
        buf.write_u8(2).unwrap();
        buf.write_u32::<LittleEndian>(4).unwrap();
        for &(bin, score) in &[(0u32, 0u32), (1, 12), (2, 25), (3, 37)] {
            buf.write_u32::<LittleEndian>(bin).unwrap();
            buf.write_u32::<LittleEndian>(score).unwrap();
        }
        buf.write_u32::<LittleEndian>(tiles.len() as u32).unwrap();
        for &(tile, clusters, uncompressed, compressed) in tiles {
            buf.write_u32::<LittleEndian>(tile).unwrap();
            buf.write_u32::<LittleEndian>(clusters).unwrap();
            buf.write_u32::<LittleEndian>(uncompressed).unwrap();
            buf.write_u32::<LittleEndian>(compressed).unwrap();
        }
        buf.write_u8(if pf_only { 1 } else { 0 }).unwrap();
        buf
    }

    #[test]
    fn cbcl_header_fields() {
        let bytes = cbcl_header_bytes(&[(1101, 8, 4, 20), (1102, 8, 4, 22)], false);
        let header =
            CbclHeader::from_reader(&mut Cursor::new(&bytes), Path::new("L001_1.cbcl")).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.header_size as usize, bytes.len());
        assert_eq!(header.bins, vec![0, 12, 25, 37]);
        assert_eq!(header.tiles.len(), 2);
        assert_eq!(header.tiles[1].compressed, 22);
        assert!(!header.pf_only);
        assert_eq!(header.surface(), 1);
        // Offsets are the running sum of compressed sizes past the header.
        assert_eq!(header.block_offset(0), bytes.len() as u64);
        assert_eq!(header.block_offset(1), bytes.len() as u64 + 20);
    }

    #[test]
    fn cbcl_rejects_wide_encodings() {
        let mut bytes = cbcl_header_bytes(&[(1101, 8, 4, 20)], false);
        bytes[6] = 4; // bits per base
        let err = CbclHeader::from_reader(&mut Cursor::new(&bytes), Path::new("L001_1.cbcl"))
            .unwrap_err();
        match err.kind() {
            &ErrorKind::UnsupportedEncoding(_) => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn surface_is_the_leading_digit() {
        assert_eq!(surface_of(1101), 1);
        assert_eq!(surface_of(2316), 2);
        assert_eq!(surface_of(12304), 1);
        assert_eq!(surface_of(21101), 2);
    }

    #[test]
    fn nibble_unpacking_low_cluster_first() {
        // Byte 0xD8: low nibble 0x8 = base A, qbin 2; high 0xD = base C, qbin 3.
        let bins = vec![0u8, 12, 25, 37];
        let data = unpack_block(&[0xd8], 2, &bins);
        assert_eq!(data.bases, b"AC".to_vec());
        assert_eq!(data.quals, vec![25, 37]);
    }

    #[test]
    fn nibble_quality_bin_zero_is_no_call() {
        let bins = vec![0u8, 12, 25, 37];
        // Low nibble 0x1: base C, qbin 0 -> score 0 -> N.
        let data = unpack_block(&[0x01], 1, &bins);
        assert_eq!(data.bases, b"N".to_vec());
        assert_eq!(data.quals, vec![0]);
    }

    #[test]
    fn nibble_unpack_then_repack_is_identity() {
        let bins = vec![0u8, 12, 25, 37];
        // All quality bins nonzero so every base letter survives the decode.
        let block = [0xd8u8, 0x4c, 0x66, 0xff];
        let data = unpack_block(&block, 8, &bins);

        let mut packed = Vec::new();
        for pair in 0..4 {
            let mut byte = 0u8;
            for half in 0..2 {
                let i = pair * 2 + half;
                let qbin = bins.iter().position(|&s| s == data.quals[i]).unwrap() as u8;
                let base = match data.bases[i] {
                    b'A' => 0u8,
                    b'C' => 1,
                    b'G' => 2,
                    _ => 3,
                };
                byte |= ((qbin << 2) | base) << (4 * half);
            }
            packed.push(byte);
        }
        assert_eq!(packed, block.to_vec());
    }

    #[test]
    fn pf_only_expansion_restores_cluster_positions() {
        let stored = CycleData {
            bases: b"AC".to_vec(),
            quals: vec![25, 37],
        };
        let expanded = expand_pf_only(stored, &[1, 0, 1, 0], Path::new("L001_1.cbcl")).unwrap();
        assert_eq!(expanded.bases, b"ANCN".to_vec());
        assert_eq!(expanded.quals, vec![25, 0, 37, 0]);
    }

    #[test]
    fn pf_only_expansion_detects_short_blocks() {
        let stored = CycleData {
            bases: b"A".to_vec(),
            quals: vec![25],
        };
        let err = expand_pf_only(stored, &[1, 1, 1], Path::new("L001_1.cbcl")).unwrap_err();
        match err.kind() {
            &ErrorKind::TruncatedFile(_) => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn gzip_block_inflation_round_trip() {
        let payload = vec![0xd8u8, 0x4c, 0x11, 0x3f];
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();
        let block = inflate_block(&compressed, payload.len(), Path::new("L001_1.cbcl")).unwrap();
        assert_eq!(block, payload);
    }

    #[test]
    fn wrong_inflated_size_is_an_error() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[1u8, 2, 3]).unwrap();
        let compressed = encoder.finish().unwrap();
        let err = inflate_block(&compressed, 8, Path::new("L001_1.cbcl")).unwrap_err();
        match err.kind() {
            &ErrorKind::InflateError(_) => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn scl_two_bit_unpacking() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(5).unwrap();
        // 0b00_01_10_11 -> A C G T, then 0b10_000000 -> G.
        bytes.extend_from_slice(&[0x1b, 0x80]);
        let bases = read_scl(&mut Cursor::new(bytes), Path::new("s_1_1101.scl")).unwrap();
        assert_eq!(bases, b"ACGTG".to_vec());
    }

    #[test]
    fn format_detection() {
        assert_eq!(detect_format(Path::new("s_1_1101.bcl")).unwrap(), BclFormat::Bcl);
        assert_eq!(
            detect_format(Path::new("s_1_1101.bcl.gz")).unwrap(),
            BclFormat::BclGz
        );
        assert_eq!(
            detect_format(Path::new("0001.bcl.bgzf")).unwrap(),
            BclFormat::BclBgzf
        );
        assert_eq!(detect_format(Path::new("L001_2.cbcl")).unwrap(), BclFormat::Cbcl);
        assert_eq!(detect_format(Path::new("s_1_1101.scl")).unwrap(), BclFormat::Scl);
        assert!(detect_format(Path::new("s_1_1101.stats")).is_err());
    }
}
