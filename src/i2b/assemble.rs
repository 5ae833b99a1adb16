//! Per-tile record assembly.
//!
//! A tile job owns its position, filter and basecall readers, walks the
//! clusters in position-file order and hands finished record groups to the
//! writer queue.  Paired records travel as one group so they stay adjacent
//! in the output.

use crossbeam_channel::Sender;
use glob::glob;
use rust_htslib::bam::record::{Aux, Record};
use rust_htslib::errors::Error as HtslibError;
use slog;
use std::path::{Path, PathBuf};

use errors::*;
use i2b::bcl;
use i2b::bcl::{BgzfIndex, CbclReader, CycleData};
use i2b::filter::FilterReader;
use i2b::options::I2bOptions;
use i2b::plan::{BarcodeTarget, CyclePlan, ReadSegment};
use i2b::pos::PositionReader;
use i2b::run_meta::{lane_dir, FolderLayout};

const FLAG_PAIRED: u16 = 0x1;
const FLAG_UNMAPPED: u16 = 0x4;
const FLAG_MATE_UNMAPPED: u16 = 0x8;
const FLAG_READ1: u16 = 0x40;
const FLAG_READ2: u16 = 0x80;
const FLAG_QC_FAIL: u16 = 0x200;

const PHRED_OFFSET: u8 = 33;

/// Everything shared read-only between the tile workers.
pub struct ConversionContext {
    pub opts: I2bOptions,
    pub plan: CyclePlan,
    pub barcodes: Vec<BarcodeTarget>,
    pub layout: FolderLayout,
    pub run_id: String,
    /// Tile index of the per-lane BGZF basecall files; NextSeq only.
    pub bci: Option<BgzfIndex>,
}

/// One read segment's decoded cycles for the current tile.
struct SegmentData {
    segment: ReadSegment,
    cycles: Vec<CycleData>,
    /// Secondary basecalls per cycle, when .scl decoding is enabled.
    secondary: Option<Vec<Vec<u8>>>,
}

/// A barcode tag's values for one cluster.
struct BarcodeValue {
    tag: String,
    qual_tag: String,
    bases: String,
    quals: String,
}

/// Decode one tile and send its records to the writer.
///
/// Returns the number of records emitted.
pub fn process_tile(
    ctx: &ConversionContext,
    logger: &slog::Logger,
    tile: u32,
    sink: &Sender<Vec<Record>>,
) -> Result<u64> {
    debug!(logger, "Decoding tile {}", tile);

    let flags = load_filter_flags(ctx, tile)?;
    let positions = load_positions(ctx, tile, &flags)?;
    let segments = load_segment_data(ctx, tile, &flags)?;

    let template_count = segments.iter().filter(|s| !s.segment.kind.is_index()).count();
    let paired = template_count > 1;

    let mut pos_iter = positions.iter();
    let mut emitted = 0u64;
    for cluster in 0..flags.len() {
        let pass = flags[cluster] & 1 == 1;
        if !ctx.opts.no_filter && !pass {
            continue;
        }
        let &(x, y) = pos_iter.next().ok_or_else(|| {
            Error::from(ErrorKind::TruncatedFile(format!(
                "position data for lane {} tile {}",
                ctx.opts.lane, tile
            )))
        })?;

        let name = read_name(&ctx.run_id, ctx.opts.lane, tile, x, y)?;
        let qc_fail = ctx.opts.no_filter && !pass;
        let barcodes =
            barcode_values(&ctx.barcodes, &segments, cluster, ctx.opts.index_separator);

        let mut group = Vec::with_capacity(template_count);
        let mut ordinal = 0;
        for segment_data in segments.iter().filter(|s| !s.segment.kind.is_index()) {
            let (seq, quals) = cluster_sequence(segment_data, cluster);
            let secondary = segment_data
                .secondary
                .as_ref()
                .map(|cycles| cycles.iter().map(|bases| bases[cluster]).collect::<Vec<u8>>());
            let record = make_record(
                &name,
                &seq,
                &quals,
                template_flags(paired, ordinal, qc_fail),
                &ctx.opts.read_group_id,
                &barcodes,
                secondary.as_ref().map(|s| s.as_slice()),
            )?;
            group.push(record);
            ordinal += 1;
        }

        emitted += group.len() as u64;
        // The queue applies backpressure here; send blocks while it is full.
        sink.send(group)
            .map_err(|_| Error::from(ErrorKind::WriteFailure("output queue closed".to_string())))?;
    }

    debug!(logger, "Tile {} produced {} records", tile, emitted);
    Ok(emitted)
}

/// Flag bits for a template read record.
fn template_flags(paired: bool, ordinal: usize, qc_fail: bool) -> u16 {
    let mut flags = FLAG_UNMAPPED;
    if paired {
        flags |= FLAG_PAIRED | FLAG_MATE_UNMAPPED;
        flags |= if ordinal == 0 { FLAG_READ1 } else { FLAG_READ2 };
    }
    if qc_fail {
        flags |= FLAG_QC_FAIL;
    }
    flags
}

/// Build the read name `<run_id>:<lane>:<tile>:<x>:<y>`; the prefix is left
/// out when the run metadata yields no identifier.
fn read_name(run_id: &str, lane: u32, tile: u32, x: i32, y: i32) -> Result<String> {
    let name = if run_id.is_empty() {
        format!("{}:{}:{}:{}", lane, tile, x, y)
    } else {
        format!("{}:{}:{}:{}:{}", run_id, lane, tile, x, y)
    };
    if name.len() > bcl::MAX_READ_NAME {
        bail!(
            "read name '{}' is longer than {} characters",
            name,
            bcl::MAX_READ_NAME
        );
    }
    Ok(name)
}

/// One segment's bases and qualities for one cluster, in cycle order.
fn cluster_sequence(data: &SegmentData, cluster: usize) -> (Vec<u8>, Vec<u8>) {
    let mut seq = Vec::with_capacity(data.cycles.len());
    let mut quals = Vec::with_capacity(data.cycles.len());
    for cycle in &data.cycles {
        seq.push(cycle.bases[cluster]);
        quals.push(cycle.quals[cluster]);
    }
    (seq, quals)
}

/// Resolve each barcode tag's sequence and quality strings for one cluster.
///
/// Dual indexes sharing one tag are joined with `-` and a space, or plainly
/// concatenated when the separator is disabled.  Qualities are stored
/// printably, shifted by 33.
fn barcode_values(
    targets: &[BarcodeTarget],
    segments: &[SegmentData],
    cluster: usize,
    with_separator: bool,
) -> Vec<BarcodeValue> {
    let seq_separator = if with_separator { "-" } else { "" };
    let qual_separator = if with_separator { " " } else { "" };

    targets
        .iter()
        .map(|target| {
            let mut seq_parts = Vec::with_capacity(target.segments.len());
            let mut qual_parts = Vec::with_capacity(target.segments.len());
            for &index in &target.segments {
                let (seq, quals) = cluster_sequence(&segments[index], cluster);
                seq_parts.push(String::from_utf8_lossy(&seq).into_owned());
                qual_parts.push(
                    quals
                        .iter()
                        .map(|&q| (q + PHRED_OFFSET) as char)
                        .collect::<String>(),
                );
            }
            BarcodeValue {
                tag: target.tag.clone(),
                qual_tag: target.qual_tag.clone(),
                bases: seq_parts.join(seq_separator),
                quals: qual_parts.join(qual_separator),
            }
        })
        .collect()
}

fn record_error(e: HtslibError) -> Error {
    ErrorKind::WriteFailure(format!("{}", e)).into()
}

/// Assemble one unaligned record.
fn make_record(
    name: &str,
    seq: &[u8],
    quals: &[u8],
    flag_bits: u16,
    read_group: &str,
    barcodes: &[BarcodeValue],
    secondary: Option<&[u8]>,
) -> Result<Record> {
    let mut record = Record::new();
    record.set(name.as_bytes(), None, seq, quals);
    record.set_tid(-1);
    record.set_pos(-1);
    record.set_mtid(-1);
    record.set_mpos(-1);
    record.set_insert_size(0);
    record.set_mapq(0);
    record.set_flags(flag_bits);

    record
        .push_aux(b"RG", Aux::String(read_group))
        .map_err(record_error)?;
    for barcode in barcodes {
        record
            .push_aux(barcode.tag.as_bytes(), Aux::String(&barcode.bases))
            .map_err(record_error)?;
        record
            .push_aux(barcode.qual_tag.as_bytes(), Aux::String(&barcode.quals))
            .map_err(record_error)?;
    }
    if let Some(secondary) = secondary {
        let secondary = String::from_utf8_lossy(secondary).into_owned();
        record
            .push_aux(b"E2", Aux::String(&secondary))
            .map_err(record_error)?;
    }
    Ok(record)
}

// ---------------------------------------------------------------------------
// Per-tile input location and loading
// ---------------------------------------------------------------------------

fn cycle_dir(ctx: &ConversionContext, cycle: u32) -> PathBuf {
    lane_dir(&ctx.opts.basecalls_dir, ctx.opts.lane).join(format!("C{}.1", cycle))
}

/// Load the tile's pass-filter flags.
///
/// MiSeq, HiSeqX and NovaSeq lanes have one .filter file per tile; NextSeq
/// writes a single per-lane file whose tile slices are found through the BCI
/// index.
fn load_filter_flags(ctx: &ConversionContext, tile: u32) -> Result<Vec<u8>> {
    let lane = ctx.opts.lane;
    let lane_path = lane_dir(&ctx.opts.basecalls_dir, lane);

    let per_tile = [
        lane_path.join(format!("s_{}_{}.filter", lane, tile)),
        ctx.opts.basecalls_dir.join(format!("s_{}_{}.filter", lane, tile)),
    ];
    for path in &per_tile {
        if path.is_file() {
            return FilterReader::open(path)?.load_all();
        }
    }

    let lane_file = lane_path.join(format!("s_{}.filter", lane));
    if lane_file.is_file() {
        let all = FilterReader::open(&lane_file)?.load_all()?;
        let index = ctx.bci.as_ref().ok_or_else(|| {
            Error::from(ErrorKind::TileNotFound(tile, lane_file.display().to_string()))
        })?;
        let before = index.clusters_before(tile).ok_or_else(|| {
            Error::from(ErrorKind::TileNotFound(tile, lane_file.display().to_string()))
        })? as usize;
        let count = index.clusters_for(tile).unwrap_or(0) as usize;
        if before + count > all.len() {
            bail!(ErrorKind::TruncatedFile(lane_file.display().to_string()));
        }
        return Ok(all[before..before + count].to_vec());
    }

    bail!(format!(
        "no filter file found for lane {} tile {} under {}",
        lane,
        tile,
        ctx.opts.basecalls_dir.display()
    ))
}

/// Find the tile's position file: per-tile files in the intensities lane
/// directory first, then the shared `s.locs` of patterned flowcells.
fn position_path(ctx: &ConversionContext, tile: u32) -> Result<PathBuf> {
    let lane = ctx.opts.lane;
    let intensities_lane = lane_dir(&ctx.opts.intensity_dir, lane);
    let candidates = [
        intensities_lane.join(format!("s_{}_{}.clocs", lane, tile)),
        intensities_lane.join(format!("s_{}_{}.locs", lane, tile)),
        intensities_lane.join(format!("s_{}_{}_pos.txt", lane, tile)),
        ctx.opts.intensity_dir.join(format!("s_{}_{}_pos.txt", lane, tile)),
        ctx.opts.intensity_dir.join("s.locs"),
    ];
    for candidate in &candidates {
        if candidate.is_file() {
            return Ok(candidate.clone());
        }
    }
    bail!(format!(
        "no position file found for lane {} tile {} under {}",
        lane,
        tile,
        ctx.opts.intensity_dir.display()
    ))
}

fn load_positions(
    ctx: &ConversionContext,
    tile: u32,
    flags: &[u8],
) -> Result<Vec<(i32, i32)>> {
    let path = position_path(ctx, tile)?;
    let reader = PositionReader::open(&path)?;
    let filter = if ctx.opts.no_filter { None } else { Some(flags) };
    let positions = reader.load(filter)?;
    if ctx.opts.no_filter && positions.len() != flags.len() {
        bail!(ErrorKind::TruncatedFile(path.display().to_string()));
    }
    Ok(positions)
}

/// Open and decode every basecall file the plan needs for this tile.
fn load_segment_data(
    ctx: &ConversionContext,
    tile: u32,
    flags: &[u8],
) -> Result<Vec<SegmentData>> {
    let mut segments = Vec::with_capacity(ctx.plan.segments.len());
    for segment in &ctx.plan.segments {
        let mut cycles = Vec::with_capacity(segment.num_cycles() as usize);
        for cycle in segment.first..(segment.last + 1) {
            cycles.push(read_cycle(ctx, tile, cycle, flags)?);
        }

        let secondary = if ctx.opts.generate_secondary_basecalls
            && ctx.layout == FolderLayout::MiSeq
            && !segment.kind.is_index()
        {
            let mut all = Vec::with_capacity(segment.num_cycles() as usize);
            for cycle in segment.first..(segment.last + 1) {
                let path =
                    cycle_dir(ctx, cycle).join(format!("s_{}_{}.scl", ctx.opts.lane, tile));
                let bases = bcl::read_scl_file(&path)?;
                if bases.len() != flags.len() {
                    bail!(ErrorKind::TruncatedFile(path.display().to_string()));
                }
                all.push(bases);
            }
            Some(all)
        } else {
            None
        };

        segments.push(SegmentData {
            segment: *segment,
            cycles: cycles,
            secondary: secondary,
        });
    }
    Ok(segments)
}

/// Decode one cycle of the tile into a full per-cluster vector.
fn read_cycle(
    ctx: &ConversionContext,
    tile: u32,
    cycle: u32,
    flags: &[u8],
) -> Result<CycleData> {
    let lane = ctx.opts.lane;
    let (path, data) = match ctx.layout {
        FolderLayout::MiSeq => {
            let path = cycle_dir(ctx, cycle).join(format!("s_{}_{}.bcl", lane, tile));
            let data = bcl::read_bcl(&path)?;
            (path, data)
        }
        FolderLayout::HiSeqX => {
            let path = cycle_dir(ctx, cycle).join(format!("s_{}_{}.bcl.gz", lane, tile));
            let data = bcl::read_bcl(&path)?;
            (path, data)
        }
        FolderLayout::NextSeq => {
            let path = lane_dir(&ctx.opts.basecalls_dir, lane).join(format!("{:04}.bcl.bgzf", cycle));
            let index = ctx.bci.as_ref().ok_or_else(|| {
                Error::from(ErrorKind::TileNotFound(tile, path.display().to_string()))
            })?;
            let data = bcl::read_bgzf_tile(&path, index, tile)?;
            (path, data)
        }
        FolderLayout::NovaSeq => {
            let dir = cycle_dir(ctx, cycle);
            let data = read_cbcl_cycle(&dir, tile, flags)?;
            (dir, data)
        }
    };
    if data.len() != flags.len() {
        bail!(ErrorKind::TruncatedFile(path.display().to_string()));
    }
    Ok(data)
}

/// Ask every CBCL file of the cycle directory for the tile; the file holding
/// the tile's surface answers, the sibling surface yields nothing.
fn read_cbcl_cycle(dir: &Path, tile: u32, flags: &[u8]) -> Result<CycleData> {
    let pattern = dir.join("*.cbcl");
    let mut paths: Vec<PathBuf> = pattern
        .to_str()
        .and_then(|p| glob(p).ok())
        .map(|paths| paths.filter_map(|p| p.ok()).collect())
        .unwrap_or_else(Vec::new);
    paths.sort();
    if paths.is_empty() {
        bail!(ErrorKind::TileNotFound(tile, dir.display().to_string()));
    }

    for path in &paths {
        let mut reader = CbclReader::open(path)?;
        if let Some(data) = reader.read_tile(tile, Some(flags))? {
            return Ok(data);
        }
    }
    bail!(ErrorKind::TileNotFound(tile, dir.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use i2b::plan::SegmentKind;

    fn segment_data(kind: SegmentKind, first: u32, cycles: Vec<(Vec<u8>, Vec<u8>)>) -> SegmentData {
        SegmentData {
            segment: ReadSegment {
                kind: kind,
                first: first,
                last: first + cycles.len() as u32 - 1,
            },
            cycles: cycles
                .into_iter()
                .map(|(bases, quals)| CycleData {
                    bases: bases,
                    quals: quals,
                })
                .collect(),
            secondary: None,
        }
    }

    #[test]
    fn read_names_with_and_without_run_identifier() {
        assert_eq!(
            read_name("HS23_6007", 1, 1101, 1235, 1989).unwrap(),
            "HS23_6007:1:1101:1235:1989"
        );
        assert_eq!(read_name("", 1, 1101, 1235, 1989).unwrap(), "1:1101:1235:1989");
    }

    #[test]
    fn oversized_read_names_are_rejected() {
        let run_id: String = ::std::iter::repeat('x').take(130).collect();
        assert!(read_name(&run_id, 1, 1101, 1235, 1989).is_err());
    }

    #[test]
    fn template_flag_combinations() {
        assert_eq!(template_flags(false, 0, false), FLAG_UNMAPPED);
        assert_eq!(template_flags(false, 0, true), FLAG_UNMAPPED | FLAG_QC_FAIL);
        assert_eq!(
            template_flags(true, 0, false),
            FLAG_PAIRED | FLAG_UNMAPPED | FLAG_MATE_UNMAPPED | FLAG_READ1
        );
        assert_eq!(
            template_flags(true, 1, false),
            FLAG_PAIRED | FLAG_UNMAPPED | FLAG_MATE_UNMAPPED | FLAG_READ2
        );
        // Paired flags differ only in the read ordinal bits.
        let r1 = template_flags(true, 0, true);
        let r2 = template_flags(true, 1, true);
        assert_eq!(r1 ^ r2, FLAG_READ1 | FLAG_READ2);
    }

    #[test]
    fn sequences_concatenate_in_cycle_order() {
        let data = segment_data(
            SegmentKind::Read1,
            1,
            vec![
                (b"AC".to_vec(), vec![30, 31]),
                (b"GT".to_vec(), vec![32, 33]),
                (b"TA".to_vec(), vec![34, 35]),
            ],
        );
        let (seq, quals) = cluster_sequence(&data, 0);
        assert_eq!(seq, b"AGT".to_vec());
        assert_eq!(quals, vec![30, 32, 34]);
        let (seq, quals) = cluster_sequence(&data, 1);
        assert_eq!(seq, b"CTA".to_vec());
        assert_eq!(quals, vec![31, 33, 35]);
    }

    fn dual_index_fixture() -> Vec<SegmentData> {
        vec![
            segment_data(SegmentKind::Read1, 1, vec![(b"A".to_vec(), vec![30])]),
            segment_data(
                SegmentKind::Index1,
                2,
                vec![(b"C".to_vec(), vec![20]), (b"G".to_vec(), vec![21])],
            ),
            segment_data(
                SegmentKind::Index2,
                4,
                vec![(b"T".to_vec(), vec![22]), (b"A".to_vec(), vec![23])],
            ),
        ]
    }

    #[test]
    fn merged_barcode_uses_separators() {
        let segments = dual_index_fixture();
        let targets = vec![BarcodeTarget {
            tag: "BC".to_string(),
            qual_tag: "QT".to_string(),
            segments: vec![1, 2],
        }];
        let values = barcode_values(&targets, &segments, 0, true);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].bases, "CG-TA");
        assert_eq!(values[0].quals, "56 78");
    }

    #[test]
    fn merged_barcode_without_separator_concatenates() {
        let segments = dual_index_fixture();
        let targets = vec![BarcodeTarget {
            tag: "BC".to_string(),
            qual_tag: "QT".to_string(),
            segments: vec![1, 2],
        }];
        let values = barcode_values(&targets, &segments, 0, false);
        assert_eq!(values[0].bases, "CGTA");
        assert_eq!(values[0].quals, "5678");
    }

    #[test]
    fn split_barcode_tags_stay_separate() {
        let segments = dual_index_fixture();
        let targets = vec![
            BarcodeTarget {
                tag: "BC".to_string(),
                qual_tag: "QT".to_string(),
                segments: vec![1],
            },
            BarcodeTarget {
                tag: "BR".to_string(),
                qual_tag: "QR".to_string(),
                segments: vec![2],
            },
        ];
        let values = barcode_values(&targets, &segments, 0, true);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].bases, "CG");
        assert_eq!(values[1].bases, "TA");
        assert_eq!(values[1].quals, "78");
    }

    #[test]
    fn records_carry_name_sequence_and_tags() {
        let barcodes = vec![BarcodeValue {
            tag: "BC".to_string(),
            qual_tag: "QT".to_string(),
            bases: "ACGT".to_string(),
            quals: "IIII".to_string(),
        }];
        let record = make_record(
            "1:1101:1235:1989",
            b"ACGTN",
            &[30, 31, 32, 33, 0],
            FLAG_UNMAPPED,
            "rg1",
            &barcodes,
            None,
        )
        .unwrap();
        assert_eq!(record.qname(), b"1:1101:1235:1989");
        assert_eq!(record.seq().as_bytes(), b"ACGTN".to_vec());
        assert_eq!(record.qual(), &[30, 31, 32, 33, 0]);
        assert_eq!(record.flags(), FLAG_UNMAPPED);
        assert_eq!(record.tid(), -1);
        match record.aux(b"RG").unwrap() {
            Aux::String(value) => assert_eq!(value, "rg1"),
            other => panic!("unexpected aux type: {:?}", other),
        }
        match record.aux(b"BC").unwrap() {
            Aux::String(value) => assert_eq!(value, "ACGT"),
            other => panic!("unexpected aux type: {:?}", other),
        }
    }
}
