//! Decoding of Illumina cluster position files (pos.txt, .locs, .clocs).

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use errors::*;

/// Scale and shift applied to all coordinate formats so that read names carry
/// small positive integers.
const COORD_SCALE: f64 = 10.0;
const COORD_SHIFT: f64 = 1000.0;

/// Block geometry of the .clocs format: 25px blocks tiling a 2048px wide
/// image, 82 blocks per line.
const CLOCS_BLOCK_SIZE: u32 = 25;
const CLOCS_IMAGE_WIDTH: u32 = 2048;
const CLOCS_BLOCKS_PER_LINE: u32 = (CLOCS_IMAGE_WIDTH + CLOCS_BLOCK_SIZE - 1) / CLOCS_BLOCK_SIZE;

/// On-disk position file format, detected from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionFormat {
    /// ASCII `x y` pairs, one cluster per line.
    PosTxt,
    /// Binary float32 pairs with an 8-byte unused header.
    Locs,
    /// Block-compressed byte offsets.
    Clocs,
}

/// Convert a floating point coordinate to its integer read-name form.
///
/// The 0.5 bias reproduces the truncation convention of the instrument
/// software.
fn scale_coordinate(v: f64) -> i32 {
    (COORD_SCALE * v + COORD_SHIFT + 0.5) as i32
}

/// Detect the position file format from the file name.
pub fn detect_format(path: &Path) -> Result<PositionFormat> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with("_pos.txt") || name.ends_with("pos.txt") {
        Ok(PositionFormat::PosTxt)
    } else if name.ends_with(".locs") {
        Ok(PositionFormat::Locs)
    } else if name.ends_with(".clocs") {
        Ok(PositionFormat::Clocs)
    } else {
        bail!(ErrorKind::UnknownFormat(path.display().to_string()))
    }
}

/// Reader for one position file; owned by a single tile job.
pub struct PositionReader {
    path: PathBuf,
    format: PositionFormat,
    inner: BufReader<File>,
}

impl PositionReader {
    pub fn open(path: &Path) -> Result<PositionReader> {
        let format = detect_format(path)?;
        let inner = BufReader::new(
            File::open(path).chain_err(|| format!("Problem opening {}", path.display()))?,
        );
        Ok(PositionReader {
            path: path.to_path_buf(),
            format: format,
            inner: inner,
        })
    }

    pub fn format(&self) -> PositionFormat {
        self.format
    }

    /// Load all cluster positions.
    ///
    /// When `filter` is given, only positions of clusters whose pass-filter
    /// flag is set are returned, in filtered cluster order.
    pub fn load(mut self, filter: Option<&[u8]>) -> Result<Vec<(i32, i32)>> {
        let positions = match self.format {
            PositionFormat::PosTxt => parse_pos(&mut self.inner, &self.path)?,
            PositionFormat::Locs => parse_locs(&mut self.inner, &self.path)?,
            PositionFormat::Clocs => parse_clocs(&mut self.inner, &self.path)?,
        };
        match filter {
            Some(flags) => {
                if flags.len() != positions.len() {
                    bail!(ErrorKind::TruncatedFile(self.path.display().to_string()));
                }
                Ok(positions
                    .into_iter()
                    .zip(flags.iter())
                    .filter(|&(_, f)| f & 1 == 1)
                    .map(|(p, _)| p)
                    .collect())
            }
            None => Ok(positions),
        }
    }
}

fn parse_pos<R: BufRead>(reader: &mut R, path: &Path) -> Result<Vec<(i32, i32)>> {
    let mut positions = Vec::new();
    for line in reader.lines() {
        let line = line.chain_err(|| format!("Problem reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let x = fields.next().and_then(|s| s.parse::<f64>().ok());
        let y = fields.next().and_then(|s| s.parse::<f64>().ok());
        match (x, y) {
            (Some(x), Some(y)) => positions.push((scale_coordinate(x), scale_coordinate(y))),
            _ => bail!(ErrorKind::UnknownFormat(path.display().to_string())),
        }
    }
    Ok(positions)
}

fn parse_locs<R: Read>(reader: &mut R, path: &Path) -> Result<Vec<(i32, i32)>> {
    // Header is 8 unused bytes followed by the total cluster count.
    let mut unused = [0u8; 8];
    reader
        .read_exact(&mut unused)
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
    let total = reader
        .read_u32::<LittleEndian>()
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;

    let mut positions = Vec::with_capacity(total as usize);
    for _ in 0..total {
        let x = reader
            .read_f32::<LittleEndian>()
            .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
        let y = reader
            .read_f32::<LittleEndian>()
            .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
        positions.push((scale_coordinate(x as f64), scale_coordinate(y as f64)));
    }
    Ok(positions)
}

fn parse_clocs<R: Read>(reader: &mut R, path: &Path) -> Result<Vec<(i32, i32)>> {
    let _version = reader
        .read_u8()
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
    let total_blocks = reader
        .read_u32::<LittleEndian>()
        .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;

    let mut positions = Vec::new();
    for block in 0..total_blocks {
        let count = reader
            .read_u8()
            .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
        let base_x = CLOCS_BLOCK_SIZE * COORD_SCALE as u32 * (block % CLOCS_BLOCKS_PER_LINE);
        let base_y = CLOCS_BLOCK_SIZE * COORD_SCALE as u32 * (block / CLOCS_BLOCKS_PER_LINE);
        for _ in 0..count {
            let dx = reader
                .read_u8()
                .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
            let dy = reader
                .read_u8()
                .chain_err(|| ErrorKind::TruncatedFile(path.display().to_string()))?;
            positions.push((
                (base_x + dx as u32 + COORD_SHIFT as u32) as i32,
                (base_y + dy as u32 + COORD_SHIFT as u32) as i32,
            ));
        }
    }
    Ok(positions)
}
