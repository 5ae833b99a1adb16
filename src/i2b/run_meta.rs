//! Reading run metadata from the XML files of an Illumina run folder.
//!
//! Up to four documents contribute: `RunInfo.xml`, `runParameters.xml` (or
//! `RunParameters.xml`), and the `config.xml` files of the intensities and
//! basecalls directories.  Everything is pulled out with XPath and stored as
//! owned strings so the documents can be dropped before the workers start.

use chrono::{NaiveDate, NaiveDateTime};
use glob::glob;
use regex::Regex;
use slog;
use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use sxd_document::dom::{ChildOfElement, Document, Element};
use sxd_document::parser;
use sxd_document::Package;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{evaluate_xpath, Value};

use errors::*;

/// Instrument generation, decided from the files present in the lane
/// directory.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum FolderLayout {
    /// MiSeq and older HiSeq: `C<cycle>.1/s_<lane>_<tile>.bcl`
    MiSeq,
    /// HiSeq X: `C<cycle>.1/s_<lane>_<tile>.bcl.gz`
    HiSeqX,
    /// NextSeq: per-lane `<cycle>.bcl.bgzf` plus a `.bci` tile index
    NextSeq,
    /// NovaSeq: `C<cycle>.1/L<lane>_<surface>.cbcl`
    NovaSeq,
}

/// Path of the lane directory below the basecalls directory.
pub fn lane_dir(basecalls: &Path, lane: u32) -> PathBuf {
    basecalls.join(format!("L{:03}", lane))
}

fn any_match(pattern: &Path) -> bool {
    pattern
        .to_str()
        .and_then(|p| glob(p).ok())
        .map(|mut paths| paths.next().is_some())
        .unwrap_or(false)
}

pub fn guess_folder_layout(basecalls: &Path, lane: u32) -> Result<FolderLayout> {
    let lane_path = lane_dir(basecalls, lane);
    let novaseq_marker = lane_path.join("C1.1").join("*.cbcl");
    let nextseq_marker = lane_path.join("*.bcl.bgzf");
    let hiseqx_marker = lane_path.join("C1.1").join("*.bcl.gz");
    let miseq_marker = lane_path.join("C1.1").join("*.bcl");

    if any_match(&novaseq_marker) {
        Ok(FolderLayout::NovaSeq)
    } else if any_match(&nextseq_marker) {
        Ok(FolderLayout::NextSeq)
    } else if any_match(&hiseqx_marker) {
        Ok(FolderLayout::HiSeqX)
    } else if any_match(&miseq_marker) {
        Ok(FolderLayout::MiSeq)
    } else {
        bail!(ErrorKind::UnknownFormat(lane_path.display().to_string()))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ReadDescription {
    pub number: i32,
    pub num_cycles: i32,
    pub is_index: bool,
}

/// Everything the converter needs from the run metadata, fully owned.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub instrument: Option<String>,
    pub run_number: Option<String>,
    pub experiment_name: Option<String>,
    pub computer_name: Option<String>,
    pub software_name: Option<String>,
    pub software_version: Option<String>,
    pub basecaller_name: Option<String>,
    pub basecaller_version: Option<String>,
    /// Normalized to `YYYY-MM-DDT00:00:00+0000`.
    pub run_start_date: String,
    pub reads: Vec<ReadDescription>,
    pub tiles: Vec<u32>,
}

impl RunMeta {
    /// The run identifier used as the read name prefix.
    pub fn run_identifier(&self) -> String {
        match (&self.instrument, &self.run_number) {
            (&Some(ref instrument), &Some(ref number)) => {
                format!("{}_{}", instrument, number)
            }
            _ => match (&self.computer_name, &self.experiment_name) {
                (&Some(ref computer), &Some(ref experiment)) => {
                    format!("{}_{}", computer, experiment)
                }
                _ => String::new(),
            },
        }
    }
}

struct XmlDoc {
    package: Package,
}

impl XmlDoc {
    fn open(path: &Path) -> Result<Option<XmlDoc>> {
        if !path.is_file() {
            return Ok(None);
        }
        let mut contents = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .chain_err(|| format!("Problem reading {}", path.display()))?;
        let package = parser::parse(&contents)
            .chain_err(|| format!("Problem parsing XML from {}", path.display()))?;
        Ok(Some(XmlDoc { package: package }))
    }

    fn doc(&self) -> Document {
        self.package.as_document()
    }
}

/// Evaluate an XPath expression to a non-empty string.
fn xpath_string(doc: &Document, expr: &str) -> Option<String> {
    match evaluate_xpath(doc, expr) {
        Ok(value) => {
            let s = value.into_string();
            let s = s.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        Err(_) => None,
    }
}

/// Try each expression against each document in order, first hit wins.
fn lookup(docs: &[Option<&XmlDoc>], exprs: &[&str]) -> Option<String> {
    for doc in docs {
        if let &Some(doc) = doc {
            for expr in exprs {
                if let Some(s) = xpath_string(&doc.doc(), expr) {
                    return Some(s);
                }
            }
        }
    }
    None
}

/// Load and consolidate the run metadata for one lane.
pub fn load_run_meta(
    logger: &slog::Logger,
    run_folder: &Path,
    intensity_dir: &Path,
    basecalls_dir: &Path,
    lane: u32,
    date_override: Option<&str>,
) -> Result<RunMeta> {
    let run_info = XmlDoc::open(&run_folder.join("RunInfo.xml"))?;
    let run_params = match XmlDoc::open(&run_folder.join("runParameters.xml"))? {
        Some(doc) => Some(doc),
        None => XmlDoc::open(&run_folder.join("RunParameters.xml"))?,
    };
    let intensities_config = XmlDoc::open(&intensity_dir.join("config.xml"))?;
    let basecalls_config = XmlDoc::open(&basecalls_dir.join("config.xml"))?;

    debug!(
        logger,
        "Metadata documents: RunInfo={}, runParameters={}, intensities config={}, \
         basecalls config={}",
        run_info.is_some(),
        run_params.is_some(),
        intensities_config.is_some(),
        basecalls_config.is_some()
    );

    let all_docs = [
        run_info.as_ref(),
        run_params.as_ref(),
        intensities_config.as_ref(),
        basecalls_config.as_ref(),
    ];

    let raw_date = match date_override {
        Some(date) => Some(date.to_string()),
        None => lookup(
            &[
                run_params.as_ref(),
                basecalls_config.as_ref(),
                intensities_config.as_ref(),
                run_info.as_ref(),
            ],
            &["//RunStartDate/text()", "//RunFolderDate/text()", "//Date/text()"],
        ),
    };
    let run_start_date = match raw_date {
        Some(raw) => normalize_run_start_date(&raw)?,
        None => bail!(ErrorKind::MissingRunStartDate),
    };

    let mut reads = Vec::new();
    if let Some(ref doc) = run_info {
        reads = reads_from_cycle_counts(&doc.doc())?;
    }
    if reads.is_empty() {
        if let Some(ref doc) = run_params {
            reads = reads_from_cycle_counts(&doc.doc())?;
            if reads.is_empty() {
                reads = reads_from_planned_cycles(&doc.doc());
            }
        }
    }
    if reads.is_empty() {
        if let Some(ref doc) = basecalls_config {
            reads = reads_from_first_last_cycles(&doc.doc());
        }
    }

    let mut tiles = Vec::new();
    if let Some(ref doc) = run_info {
        tiles = tiles_from_tile_list(&doc.doc(), lane);
    }
    if tiles.is_empty() {
        if let Some(ref doc) = basecalls_config {
            tiles = tiles_from_tile_selection(&doc.doc(), lane);
        }
    }
    if tiles.is_empty() {
        if let Some(ref doc) = run_info {
            tiles = tiles_from_flowcell_layout(&doc.doc());
        }
    }

    Ok(RunMeta {
        instrument: lookup(&all_docs, &["//Run/Instrument/text()", "//Instrument/text()"]),
        run_number: lookup(
            &all_docs,
            &["//Run/@Number", "//ScanNumber/text()", "//RunNumber/text()"],
        ),
        experiment_name: lookup(&all_docs, &["//ExperimentName/text()"]),
        computer_name: lookup(&all_docs, &["//ComputerName/text()", "//MachineName/text()"]),
        software_name: lookup(
            &[run_params.as_ref(), intensities_config.as_ref()],
            &[
                "//Setup/ApplicationName/text()",
                "//ApplicationName/text()",
                "//Application/text()",
            ],
        ),
        software_version: lookup(
            &[run_params.as_ref(), intensities_config.as_ref()],
            &[
                "//Setup/ApplicationVersion/text()",
                "//ApplicationVersion/text()",
                "//SystemSuiteVersion/text()",
            ],
        ),
        basecaller_name: lookup(
            &[basecalls_config.as_ref(), run_params.as_ref()],
            &["//Software/@Name", "//BaseCallSoftware/@Name"],
        ),
        basecaller_version: lookup(
            &[basecalls_config.as_ref(), run_params.as_ref()],
            &[
                "//Software/@Version",
                "//BaseCallSoftware/@Version",
                "//RTAVersion/text()",
                "//RtaVersion/text()",
            ],
        ),
        run_start_date: run_start_date,
        reads: reads,
        tiles: tiles,
    })
}

/// Expand the run start date into its canonical form.
///
/// Instruments write either a compact `yyMMdd` folder date or an already
/// expanded timestamp; American `m/d/Y h:m:s AM` datetimes appear in old
/// RunInfo files.
pub fn normalize_run_start_date(raw: &str) -> Result<String> {
    let iso = Regex::new(r"^\d{4}-\d{2}-\d{2}").expect("static regex");
    if iso.is_match(raw) {
        return Ok(raw.to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%y%m%d") {
        return Ok(format!("{}T00:00:00+0000", date.format("%Y-%m-%d")));
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%-m/%-d/%Y %-I:%M:%S %p") {
        return Ok(format!("{}T00:00:00+0000", datetime.format("%Y-%m-%d")));
    }
    bail!(ErrorKind::BadOption(format!(
        "cannot interpret run start date '{}'",
        raw
    )))
}

/// Read descriptions in the `NumCycles`/`IsIndexedRead` attribute style of
/// RunInfo.xml and MiSeq runParameters.xml.
fn reads_from_cycle_counts(doc: &Document) -> Result<Vec<ReadDescription>> {
    let nodeset = match evaluate_xpath(doc, "//RunInfoRead|//Reads/Read") {
        Ok(Value::Nodeset(nodeset)) => nodeset,
        _ => return Ok(Vec::new()),
    };

    let mut reads = Vec::new();
    let mut number = 1;
    for node in nodeset.document_order() {
        if let Node::Element(elem) = node {
            let num_cycles = match elem
                .attribute("NumCycles")
                .and_then(|a| a.value().parse::<i32>().ok())
            {
                Some(n) => n,
                None => continue,
            };
            if num_cycles > 0 {
                reads.push(ReadDescription {
                    number: number,
                    num_cycles: num_cycles,
                    is_index: elem
                        .attribute("IsIndexedRead")
                        .map(|a| a.value() == "Y")
                        .unwrap_or(false),
                });
                number += 1;
            }
        }
    }
    Ok(reads)
}

/// Read descriptions in the `PlannedRead1Cycles` element style of MiniSeq,
/// NextSeq and NovaSeq RunParameters.xml.
fn reads_from_planned_cycles(doc: &Document) -> Vec<ReadDescription> {
    let mut reads = Vec::new();
    let mut number = 1;

    let plan = [
        ("//PlannedRead1Cycles/text()", false),
        ("//PlannedIndex1ReadCycles/text()", true),
        ("//PlannedIndex2ReadCycles/text()", true),
        ("//PlannedRead2Cycles/text()", false),
    ];
    for &(expr, is_index) in &plan {
        if let Ok(value) = evaluate_xpath(doc, expr) {
            let num_cycles = value.into_number() as i32;
            if num_cycles > 0 {
                reads.push(ReadDescription {
                    number: number,
                    num_cycles: num_cycles,
                    is_index: is_index,
                });
                number += 1;
            }
        }
    }
    reads
}

/// Read descriptions in the `FirstCycle`/`LastCycle` element style of the
/// basecalls `config.xml`.
fn reads_from_first_last_cycles(doc: &Document) -> Vec<ReadDescription> {
    let nodeset = match evaluate_xpath(doc, "//Run/RunParameters/Reads") {
        Ok(Value::Nodeset(nodeset)) => nodeset,
        _ => return Vec::new(),
    };

    let mut reads = Vec::new();
    let mut number = 1;
    for node in nodeset.document_order() {
        if let Node::Element(elem) = node {
            let first = xpath_element_number(&elem, "FirstCycle");
            let last = xpath_element_number(&elem, "LastCycle");
            if let (Some(first), Some(last)) = (first, last) {
                if last >= first {
                    reads.push(ReadDescription {
                        number: number,
                        num_cycles: last - first + 1,
                        is_index: false,
                    });
                    number += 1;
                }
            }
        }
    }
    reads
}

fn xpath_element_number(elem: &Element, name: &str) -> Option<i32> {
    elem.children().iter().find_map(|child| match child {
        &ChildOfElement::Element(e) if e.name().local_part() == name => {
            e.children().iter().find_map(|c| match c {
                &ChildOfElement::Text(t) => t.text().trim().parse::<i32>().ok(),
                _ => None,
            })
        }
        _ => None,
    })
}

/// Tiles from the explicit `<Tiles><Tile>` list of RunInfo.xml; entries look
/// like `1_1101` (lane underscore tile) or plain tile numbers.
fn tiles_from_tile_list(doc: &Document, lane: u32) -> Vec<u32> {
    let nodeset = match evaluate_xpath(doc, "//Tiles/Tile") {
        Ok(Value::Nodeset(nodeset)) => nodeset,
        _ => return Vec::new(),
    };

    let mut tiles = Vec::new();
    for node in nodeset.document_order() {
        let text = node.string_value();
        let text = text.trim();
        let tile = match text.find('_') {
            Some(pos) => {
                let (tile_lane, tile) = text.split_at(pos);
                if tile_lane.parse::<u32>() != Ok(lane) {
                    continue;
                }
                tile[1..].parse::<u32>().ok()
            }
            None => text.parse::<u32>().ok(),
        };
        if let Some(tile) = tile {
            tiles.push(tile);
        }
    }
    tiles
}

/// Tiles from the `<TileSelection>` section of the basecalls `config.xml`.
fn tiles_from_tile_selection(doc: &Document, lane: u32) -> Vec<u32> {
    let expr = format!("//TileSelection/Lane[@Index='{}']/Tile", lane);
    let nodeset = match evaluate_xpath(doc, expr.as_str()) {
        Ok(Value::Nodeset(nodeset)) => nodeset,
        _ => return Vec::new(),
    };

    nodeset
        .document_order()
        .iter()
        .filter_map(|node| node.string_value().trim().parse::<u32>().ok())
        .collect()
}

/// Tiles computed from the `FlowcellLayout` geometry when no explicit list
/// exists.
fn tiles_from_flowcell_layout(doc: &Document) -> Vec<u32> {
    let number = |expr: &str| -> i64 {
        evaluate_xpath(doc, expr)
            .map(|v| v.into_number())
            .unwrap_or(::std::f64::NAN) as i64
    };

    let surfaces = number("//FlowcellLayout/@SurfaceCount");
    let swaths = number("//FlowcellLayout/@SwathCount");
    let tile_count = number("//FlowcellLayout/@TileCount");
    if surfaces <= 0 || swaths <= 0 || tile_count <= 0 {
        return Vec::new();
    }
    let sections = number("//FlowcellLayout/@SectionPerLane");
    let five_digit = xpath_string(doc, "//@TileNamingConvention")
        .map(|s| s == "FiveDigit")
        .unwrap_or(false);

    compute_tiles(
        surfaces as u32,
        swaths as u32,
        tile_count as u32,
        if sections > 0 { sections as u32 } else { 1 },
        five_digit,
    )
}

/// Tile numbering formulas for both naming conventions.
pub fn compute_tiles(
    surfaces: u32,
    swaths: u32,
    tile_count: u32,
    sections: u32,
    five_digit: bool,
) -> Vec<u32> {
    let mut tiles = Vec::new();
    for surface in 1..(surfaces + 1) {
        if five_digit {
            for section in 1..(sections + 1) {
                for swath in 1..(swaths + 1) {
                    for tile in 1..(tile_count + 1) {
                        tiles.push(10000 * surface + 1000 * section + 100 * swath + tile);
                    }
                }
            }
        } else {
            for swath in 1..(swaths + 1) {
                for tile in 1..(tile_count + 1) {
                    tiles.push(1000 * surface + 100 * swath + tile);
                }
            }
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use sxd_document::parser;

    fn parse(xml: &str) -> Package {
        parser::parse(xml).unwrap()
    }

    #[test]
    fn date_compact_form_is_expanded() {
        assert_eq!(
            normalize_run_start_date("110323").unwrap(),
            "2011-03-23T00:00:00+0000"
        );
    }

    #[test]
    fn date_iso_form_passes_through() {
        assert_eq!(
            normalize_run_start_date("2019-04-14T00:00:00+0000").unwrap(),
            "2019-04-14T00:00:00+0000"
        );
    }

    #[test]
    fn date_american_datetime_is_expanded() {
        assert_eq!(
            normalize_run_start_date("4/14/2019 1:17:20 PM").unwrap(),
            "2019-04-14T00:00:00+0000"
        );
    }

    #[test]
    fn date_garbage_is_rejected() {
        assert!(normalize_run_start_date("yesterday").is_err());
    }

    #[test]
    fn run_info_reads() {
        let package = parse(
            r#"<RunInfo><Run Id="190414_A00111_0296" Number="296">
                 <Instrument>A00111</Instrument>
                 <Reads>
                   <Read Number="1" NumCycles="150" IsIndexedRead="N"/>
                   <Read Number="2" NumCycles="8" IsIndexedRead="Y"/>
                   <Read Number="3" NumCycles="8" IsIndexedRead="Y"/>
                   <Read Number="4" NumCycles="150" IsIndexedRead="N"/>
                 </Reads>
               </Run></RunInfo>"#,
        );
        let reads = reads_from_cycle_counts(&package.as_document()).unwrap();
        assert_eq!(reads.len(), 4);
        assert_eq!(reads[0].num_cycles, 150);
        assert!(!reads[0].is_index);
        assert!(reads[1].is_index);
        assert!(reads[2].is_index);
        assert_eq!(reads[3].number, 4);
    }

    #[test]
    fn planned_cycle_reads() {
        let package = parse(
            r#"<RunParameters>
                 <PlannedRead1Cycles>76</PlannedRead1Cycles>
                 <PlannedIndex1ReadCycles>8</PlannedIndex1ReadCycles>
                 <PlannedIndex2ReadCycles>0</PlannedIndex2ReadCycles>
                 <PlannedRead2Cycles>76</PlannedRead2Cycles>
               </RunParameters>"#,
        );
        let reads = reads_from_planned_cycles(&package.as_document());
        assert_eq!(reads.len(), 3);
        assert!(!reads[0].is_index);
        assert!(reads[1].is_index);
        assert_eq!(reads[2].num_cycles, 76);
    }

    #[test]
    fn config_first_last_cycle_reads() {
        let package = parse(
            r#"<BaseCallAnalysis><Run><RunParameters>
                 <Reads Index="1"><FirstCycle>1</FirstCycle><LastCycle>76</LastCycle></Reads>
                 <Reads Index="2"><FirstCycle>77</FirstCycle><LastCycle>152</LastCycle></Reads>
               </RunParameters></Run></BaseCallAnalysis>"#,
        );
        let reads = reads_from_first_last_cycles(&package.as_document());
        assert_eq!(reads.len(), 2);
        assert_eq!(reads[0].num_cycles, 76);
        assert_eq!(reads[1].num_cycles, 76);
    }

    #[test]
    fn tile_list_filters_by_lane() {
        let package = parse(
            r#"<RunInfo><Run><FlowcellLayout><TileSet><Tiles>
                 <Tile>1_1101</Tile><Tile>1_1102</Tile><Tile>2_1101</Tile>
               </Tiles></TileSet></FlowcellLayout></Run></RunInfo>"#,
        );
        assert_eq!(tiles_from_tile_list(&package.as_document(), 1), vec![1101, 1102]);
        assert_eq!(tiles_from_tile_list(&package.as_document(), 2), vec![1101]);
    }

    #[test]
    fn tile_selection_by_lane_index() {
        let package = parse(
            r#"<BaseCallAnalysis><Run><TileSelection>
                 <Lane Index="1"><Tile>1101</Tile><Tile>1102</Tile></Lane>
                 <Lane Index="2"><Tile>2203</Tile></Lane>
               </TileSelection></Run></BaseCallAnalysis>"#,
        );
        assert_eq!(
            tiles_from_tile_selection(&package.as_document(), 1),
            vec![1101, 1102]
        );
        assert_eq!(tiles_from_tile_selection(&package.as_document(), 2), vec![2203]);
    }

    #[test]
    fn four_digit_tile_numbers() {
        let tiles = compute_tiles(2, 2, 2, 1, false);
        assert_eq!(tiles, vec![1101, 1102, 1201, 1202, 2101, 2102, 2201, 2202]);
    }

    #[test]
    fn five_digit_tile_numbers() {
        let tiles = compute_tiles(1, 1, 2, 2, true);
        assert_eq!(tiles, vec![11101, 11102, 12101, 12102]);
    }

    #[test]
    fn layout_tiles_from_attributes() {
        let package = parse(
            r#"<RunInfo><Run><FlowcellLayout LaneCount="1" SurfaceCount="1"
                 SwathCount="2" TileCount="2"/></Run></RunInfo>"#,
        );
        assert_eq!(
            tiles_from_flowcell_layout(&package.as_document()),
            vec![1101, 1102, 1201, 1202]
        );
    }

    #[test]
    fn run_identifier_prefers_instrument_and_number() {
        let mut meta = RunMeta::default();
        meta.instrument = Some("HS23".to_string());
        meta.run_number = Some("6007".to_string());
        meta.computer_name = Some("seq-pc".to_string());
        meta.experiment_name = Some("exp1".to_string());
        assert_eq!(meta.run_identifier(), "HS23_6007");

        meta.instrument = None;
        assert_eq!(meta.run_identifier(), "seq-pc_exp1");

        meta.computer_name = None;
        assert_eq!(meta.run_identifier(), "");
    }
}
