//! SAM header construction: @HD, the @RG line and the chained @PG entries.

use rust_htslib::bam::header::{Header, HeaderRecord};

use i2b::options::I2bOptions;
use i2b::run_meta::RunMeta;

const UNKNOWN: &'static str = "Unknown";

/// Program identifiers of the @PG chain: the instrument control software,
/// the basecaller and this converter.
const PG_CONTROL: &'static str = "SCS";
const PG_BASECALLER: &'static str = "basecalling";
const PG_SELF: &'static str = env!("CARGO_PKG_NAME");

pub fn build_header(opts: &I2bOptions, meta: &RunMeta, command_line: &str) -> Header {
    let mut header = Header::new();

    let mut hd = HeaderRecord::new(b"HD");
    hd.push_tag(b"VN", "1.5");
    hd.push_tag(b"SO", "unsorted");
    header.push_record(&hd);

    let platform_unit = opts
        .platform_unit
        .clone()
        .unwrap_or_else(|| opts.platform_unit_default());

    let mut rg = HeaderRecord::new(b"RG");
    rg.push_tag(b"ID", &opts.read_group_id);
    rg.push_tag(b"DT", &meta.run_start_date);
    rg.push_tag(b"PU", &platform_unit);
    rg.push_tag(b"LB", &opts.library_name);
    rg.push_tag(b"PG", PG_CONTROL);
    rg.push_tag(b"SM", &opts.sample_alias);
    rg.push_tag(b"CN", &opts.sequencing_centre);
    rg.push_tag(b"PL", &opts.platform);
    if let Some(ref study) = opts.study_name {
        rg.push_tag(b"DS", study);
    }
    header.push_record(&rg);

    let or_unknown = |value: &Option<String>| -> String {
        value.clone().unwrap_or_else(|| UNKNOWN.to_string())
    };

    let mut control = HeaderRecord::new(b"PG");
    control.push_tag(b"ID", PG_CONTROL);
    control.push_tag(b"PN", or_unknown(&meta.software_name));
    control.push_tag(b"VN", or_unknown(&meta.software_version));
    control.push_tag(b"DS", "Controlling software on instrument");
    header.push_record(&control);

    let mut basecaller = HeaderRecord::new(b"PG");
    basecaller.push_tag(b"ID", PG_BASECALLER);
    basecaller.push_tag(b"PP", PG_CONTROL);
    basecaller.push_tag(b"PN", or_unknown(&meta.basecaller_name));
    basecaller.push_tag(b"VN", or_unknown(&meta.basecaller_version));
    basecaller.push_tag(b"DS", "Basecalling Package");
    header.push_record(&basecaller);

    let mut this_tool = HeaderRecord::new(b"PG");
    this_tool.push_tag(b"ID", PG_SELF);
    this_tool.push_tag(b"PP", PG_BASECALLER);
    this_tool.push_tag(b"PN", PG_SELF);
    this_tool.push_tag(b"VN", env!("CARGO_PKG_VERSION"));
    this_tool.push_tag(b"DS", "Convert Illumina basecall files to SAM/BAM/CRAM");
    this_tool.push_tag(b"CL", command_line);
    header.push_record(&this_tool);

    header
}
