//! Tile subset and cycle-range planning for one lane.
//!
//! The plan is built once from the run metadata and the command line, then
//! shared read-only by every tile job.

use slog;

use errors::*;
use i2b::run_meta::ReadDescription;

/// Logical name of a read segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Read1,
    Read2,
    Index1,
    Index2,
}

impl SegmentKind {
    pub fn is_index(&self) -> bool {
        match *self {
            SegmentKind::Index1 | SegmentKind::Index2 => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match *self {
            SegmentKind::Read1 => "read1",
            SegmentKind::Read2 => "read2",
            SegmentKind::Index1 => "readIndex",
            SegmentKind::Index2 => "readIndex2",
        }
    }
}

/// A contiguous, inclusive cycle range with a logical name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSegment {
    pub kind: SegmentKind,
    pub first: u32,
    pub last: u32,
}

impl ReadSegment {
    pub fn num_cycles(&self) -> u32 {
        self.last - self.first + 1
    }
}

/// Ordered read segments describing one tile's worth of cycles; identical
/// across all tiles of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePlan {
    pub segments: Vec<ReadSegment>,
}

impl CyclePlan {
    /// Assign contiguous cycle ranges, starting at 1, to the reads described
    /// by the run metadata.
    pub fn from_read_descriptions(reads: &[ReadDescription]) -> Result<CyclePlan> {
        if reads.is_empty() {
            bail!(ErrorKind::NoCycleRange);
        }

        let mut segments = Vec::new();
        let mut cycle = 1u32;
        let mut templates = 0;
        let mut indexes = 0;
        for read in reads {
            if read.num_cycles <= 0 {
                continue;
            }
            let kind = if read.is_index {
                indexes += 1;
                match indexes {
                    1 => SegmentKind::Index1,
                    2 => SegmentKind::Index2,
                    _ => bail!(ErrorKind::BadOption(
                        "more than two index reads in the run metadata".to_string()
                    )),
                }
            } else {
                templates += 1;
                match templates {
                    1 => SegmentKind::Read1,
                    2 => SegmentKind::Read2,
                    _ => bail!(ErrorKind::BadOption(
                        "more than two template reads in the run metadata".to_string()
                    )),
                }
            };
            let first = cycle;
            cycle += read.num_cycles as u32;
            segments.push(ReadSegment {
                kind: kind,
                first: first,
                last: cycle - 1,
            });
        }
        if segments.is_empty() {
            bail!(ErrorKind::NoCycleRange);
        }
        Ok(CyclePlan { segments: segments })
    }

    /// Build the plan from explicit cycle ranges on the command line.
    pub fn from_cycle_lists(
        first: &[u32],
        last: &[u32],
        index_first: &[u32],
        index_last: &[u32],
    ) -> Result<CyclePlan> {
        if first.len() != last.len() || index_first.len() != index_last.len() {
            bail!(ErrorKind::BadOption(
                "first/final cycle lists must have matching lengths".to_string()
            ));
        }
        if first.len() > 2 || index_first.len() > 2 {
            bail!(ErrorKind::BadOption(
                "at most two template and two index reads are supported".to_string()
            ));
        }
        if first.is_empty() && index_first.is_empty() {
            bail!(ErrorKind::NoCycleRange);
        }

        let mut segments = Vec::new();
        for (i, (&f, &l)) in first.iter().zip(last.iter()).enumerate() {
            if f == 0 || l < f {
                bail!(ErrorKind::BadOption(format!("bad cycle range {}-{}", f, l)));
            }
            segments.push(ReadSegment {
                kind: if i == 0 {
                    SegmentKind::Read1
                } else {
                    SegmentKind::Read2
                },
                first: f,
                last: l,
            });
        }
        for (i, (&f, &l)) in index_first.iter().zip(index_last.iter()).enumerate() {
            if f == 0 || l < f {
                bail!(ErrorKind::BadOption(format!("bad index cycle range {}-{}", f, l)));
            }
            segments.push(ReadSegment {
                kind: if i == 0 {
                    SegmentKind::Index1
                } else {
                    SegmentKind::Index2
                },
                first: f,
                last: l,
            });
        }
        Ok(CyclePlan { segments: segments })
    }

    pub fn is_paired(&self) -> bool {
        self.segments
            .iter()
            .any(|seg| seg.kind == SegmentKind::Read2)
    }

    pub fn template_segments(&self) -> Vec<&ReadSegment> {
        self.segments.iter().filter(|seg| !seg.kind.is_index()).collect()
    }

    pub fn index_segments(&self) -> Vec<&ReadSegment> {
        self.segments.iter().filter(|seg| seg.kind.is_index()).collect()
    }
}

/// Where one barcode tag's sequence and quality come from: one index read,
/// or two merged ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeTarget {
    pub tag: String,
    pub qual_tag: String,
    /// Indices into `CyclePlan::segments`, in read order.
    pub segments: Vec<usize>,
}

/// Map index read segments onto the configured barcode/quality tags.
///
/// Two index reads collapse into one tag only when the caller configured a
/// single tag and the reads are adjacent in cycle space.
pub fn assign_barcode_tags(
    plan: &CyclePlan,
    barcode_tags: &[String],
    quality_tags: &[String],
) -> Result<Vec<BarcodeTarget>> {
    if barcode_tags.len() != quality_tags.len() {
        bail!(ErrorKind::BadOption(format!(
            "{} barcode tag(s) but {} quality tag(s)",
            barcode_tags.len(),
            quality_tags.len()
        )));
    }
    if barcode_tags.len() > 2 {
        bail!(ErrorKind::BadOption(
            "at most two barcode tags are supported".to_string()
        ));
    }

    let index_segments: Vec<usize> = plan
        .segments
        .iter()
        .enumerate()
        .filter(|&(_, seg)| seg.kind.is_index())
        .map(|(i, _)| i)
        .collect();
    if index_segments.is_empty() {
        return Ok(Vec::new());
    }

    if barcode_tags.len() == 1 {
        if index_segments.len() == 2 {
            let first = &plan.segments[index_segments[0]];
            let second = &plan.segments[index_segments[1]];
            if second.first != first.last + 1 {
                bail!(ErrorKind::BadOption(
                    "two non-adjacent index reads need two barcode tags".to_string()
                ));
            }
        }
        return Ok(vec![BarcodeTarget {
            tag: barcode_tags[0].clone(),
            qual_tag: quality_tags[0].clone(),
            segments: index_segments,
        }]);
    }

    if index_segments.len() != barcode_tags.len() {
        bail!(ErrorKind::BadOption(format!(
            "{} barcode tag(s) for {} index read(s)",
            barcode_tags.len(),
            index_segments.len()
        )));
    }
    Ok(index_segments
        .iter()
        .zip(barcode_tags.iter().zip(quality_tags.iter()))
        .map(|(&seg, (tag, qual_tag))| BarcodeTarget {
            tag: tag.clone(),
            qual_tag: qual_tag.clone(),
            segments: vec![seg],
        })
        .collect())
}

/// Select and order the tiles to process.
pub fn plan_tiles(
    logger: &slog::Logger,
    all_tiles: &[u32],
    first_tile: u32,
    tile_limit: u32,
) -> Result<Vec<u32>> {
    if all_tiles.is_empty() {
        bail!(ErrorKind::NoTiles);
    }
    let mut tiles = all_tiles.to_vec();
    tiles.sort();
    tiles.dedup();

    let mut first_tile = first_tile;
    if first_tile == 0 && tile_limit != 0 {
        first_tile = tiles[0];
    }
    if first_tile != 0 {
        match tiles.iter().position(|&t| t == first_tile) {
            Some(pos) => {
                tiles = tiles.split_off(pos);
            }
            None => {
                warn!(
                    logger,
                    "First tile {} is not part of this lane, nothing to do", first_tile
                );
                return Ok(Vec::new());
            }
        }
        if tile_limit != 0 {
            tiles.truncate(tile_limit as usize);
        }
    }
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use i2b::run_meta::ReadDescription;

    fn discard_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, o!())
    }

    fn paired_dual_index_reads() -> Vec<ReadDescription> {
        vec![
            ReadDescription { number: 1, num_cycles: 150, is_index: false },
            ReadDescription { number: 2, num_cycles: 8, is_index: true },
            ReadDescription { number: 3, num_cycles: 8, is_index: true },
            ReadDescription { number: 4, num_cycles: 150, is_index: false },
        ]
    }

    #[test]
    fn contiguous_cycle_assignment() {
        let plan = CyclePlan::from_read_descriptions(&paired_dual_index_reads()).unwrap();
        let ranges: Vec<(SegmentKind, u32, u32)> = plan
            .segments
            .iter()
            .map(|seg| (seg.kind, seg.first, seg.last))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (SegmentKind::Read1, 1, 150),
                (SegmentKind::Index1, 151, 158),
                (SegmentKind::Index2, 159, 166),
                (SegmentKind::Read2, 167, 316),
            ]
        );
        assert!(plan.is_paired());
        assert_eq!(plan.template_segments().len(), 2);
        assert_eq!(plan.index_segments().len(), 2);
    }

    #[test]
    fn empty_metadata_has_no_cycle_range() {
        let err = CyclePlan::from_read_descriptions(&[]).unwrap_err();
        match err.kind() {
            &ErrorKind::NoCycleRange => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }

    #[test]
    fn explicit_cycle_lists() {
        let plan = CyclePlan::from_cycle_lists(&[1, 159], &[76, 234], &[77], &[84]).unwrap();
        assert_eq!(plan.segments.len(), 3);
        assert_eq!(plan.segments[0].kind, SegmentKind::Read1);
        assert_eq!(plan.segments[1].kind, SegmentKind::Read2);
        assert_eq!(plan.segments[2].kind, SegmentKind::Index1);
        assert_eq!(plan.segments[2].num_cycles(), 8);
    }

    #[test]
    fn mismatched_cycle_lists_are_rejected() {
        assert!(CyclePlan::from_cycle_lists(&[1, 10], &[5], &[], &[]).is_err());
    }

    #[test]
    fn single_tag_merges_adjacent_index_reads() {
        let plan = CyclePlan::from_read_descriptions(&paired_dual_index_reads()).unwrap();
        let targets = assign_barcode_tags(
            &plan,
            &["BC".to_string()],
            &["QT".to_string()],
        )
        .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].tag, "BC");
        assert_eq!(targets[0].segments.len(), 2);
    }

    #[test]
    fn two_tags_keep_index_reads_separate() {
        let plan = CyclePlan::from_read_descriptions(&paired_dual_index_reads()).unwrap();
        let targets = assign_barcode_tags(
            &plan,
            &["BC".to_string(), "BR".to_string()],
            &["QT".to_string(), "QR".to_string()],
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].tag, "BC");
        assert_eq!(targets[1].tag, "BR");
        assert_eq!(targets[0].segments, vec![1]);
        assert_eq!(targets[1].segments, vec![2]);
    }

    #[test]
    fn single_tag_rejects_non_adjacent_index_reads() {
        // Index reads at 77-84 and 235-242 with the template in between.
        let plan = CyclePlan::from_cycle_lists(&[1, 85], &[76, 234], &[77, 235], &[84, 242]).unwrap();
        assert!(assign_barcode_tags(&plan, &["BC".to_string()], &["QT".to_string()]).is_err());
    }

    #[test]
    fn tag_count_must_match_quality_count() {
        let plan = CyclePlan::from_read_descriptions(&paired_dual_index_reads()).unwrap();
        assert!(assign_barcode_tags(
            &plan,
            &["BC".to_string(), "BR".to_string()],
            &["QT".to_string()],
        )
        .is_err());
    }

    #[test]
    fn tile_subset_from_first_and_limit() {
        let logger = discard_logger();
        let tiles =
            plan_tiles(&logger, &[1105, 1101, 1103, 1102, 1104], 1103, 2).unwrap();
        assert_eq!(tiles, vec![1103, 1104]);
    }

    #[test]
    fn zero_first_tile_with_limit_starts_at_smallest() {
        let logger = discard_logger();
        let tiles = plan_tiles(&logger, &[1103, 1101, 1102], 0, 2).unwrap();
        assert_eq!(tiles, vec![1101, 1102]);
    }

    #[test]
    fn no_selection_keeps_all_tiles_sorted() {
        let logger = discard_logger();
        let tiles = plan_tiles(&logger, &[1102, 1101], 0, 0).unwrap();
        assert_eq!(tiles, vec![1101, 1102]);
    }

    #[test]
    fn unknown_first_tile_empties_the_plan() {
        let logger = discard_logger();
        let tiles = plan_tiles(&logger, &[1101, 1102], 1999, 0).unwrap();
        assert!(tiles.is_empty());
    }

    #[test]
    fn empty_tile_list_is_an_error() {
        let logger = discard_logger();
        let err = plan_tiles(&logger, &[], 0, 0).unwrap_err();
        match err.kind() {
            &ErrorKind::NoTiles => {}
            other => panic!("unexpected error kind: {:?}", other),
        }
    }
}
