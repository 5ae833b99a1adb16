//! Data structures and code for storing and handling settings from configuration file and
//! command line arguments.

use clap::ArgMatches;
use config::{Config, ConfigError, Environment, File};
use shellexpand;
use std::path::Path;

/// Arguments/configuration for the `i2b` command.
#[derive(Debug, Deserialize)]
pub struct I2bArgs {
    /// Path to the Illumina intensities directory.
    pub intensity_dir: String,
    /// Path to the basecalls directory; empty means `<intensity_dir>/BaseCalls`.
    pub basecalls_dir: String,
    /// Path to the run folder; empty means two levels above the intensities directory.
    pub run_folder: String,
    /// Lane to process.
    pub lane: i64,
    /// Output file path, `-` for stdout.
    pub output_file: String,
    /// Output format (`sam`, `bam`, `cram`); empty means "derive from file name".
    pub output_fmt: String,
    /// Compression level for the output file; -1 means library default.
    pub compression_level: i64,
    /// Whether to decode secondary basecall (.scl) files into E2 tags.
    pub generate_secondary_basecalls: bool,
    /// Whether to keep clusters that failed the chastity filter.
    pub no_filter: bool,
    /// Read group ID for the @RG header line and RG aux tags.
    pub read_group_id: String,
    /// Library name (@RG LB).
    pub library_name: String,
    /// Sample alias (@RG SM); empty means "same as library name".
    pub sample_alias: String,
    /// Study name (@RG DS); empty means "no DS field".
    pub study_name: String,
    /// Platform unit (@RG PU); empty means `<runfolder>_<lane>`.
    pub platform_unit: String,
    /// Run start date override; empty means "take from run metadata".
    pub run_start_date: String,
    /// Sequencing centre (@RG CN).
    pub sequencing_centre: String,
    /// Platform (@RG PL).
    pub platform: String,
    /// First tile to process; 0 means the lowest tile of the lane.
    pub first_tile: i64,
    /// Number of tiles to process from the first tile; 0 means all.
    pub tile_limit: i64,
    /// Comma-separated aux tag name(s) for index read sequences.
    pub barcode_tag: String,
    /// Comma-separated aux tag name(s) for index read qualities.
    pub quality_tag: String,
    /// Comma-separated template read number(s) the index read(s) belong to.
    pub bc_read: String,
    /// Comma-separated first cycles of the template reads; empty means "from metadata".
    pub first_cycle: String,
    /// Comma-separated final cycles of the template reads.
    pub final_cycle: String,
    /// Comma-separated first cycles of the index reads.
    pub first_index_cycle: String,
    /// Comma-separated final cycles of the index reads.
    pub final_index_cycle: String,
    /// Concatenate dual index barcodes without separator characters.
    pub no_index_separator: bool,
}

impl Default for I2bArgs {
    /// Return defaults for `i2b` command arguments.
    fn default() -> Self {
        return I2bArgs {
            intensity_dir: "".to_string(),
            basecalls_dir: "".to_string(),
            run_folder: "".to_string(),
            lane: 0,
            output_file: "".to_string(),
            output_fmt: "".to_string(),
            compression_level: -1,
            generate_secondary_basecalls: false,
            no_filter: false,
            read_group_id: "1".to_string(),
            library_name: "unknown".to_string(),
            sample_alias: "".to_string(),
            study_name: "".to_string(),
            platform_unit: "".to_string(),
            run_start_date: "".to_string(),
            sequencing_centre: "SC".to_string(),
            platform: "ILLUMINA".to_string(),
            first_tile: 0,
            tile_limit: 0,
            barcode_tag: "BC".to_string(),
            quality_tag: "QT".to_string(),
            bc_read: "".to_string(),
            first_cycle: "".to_string(),
            final_cycle: "".to_string(),
            first_index_cycle: "".to_string(),
            final_index_cycle: "".to_string(),
            no_index_separator: false,
        };
    }
}

/// Overall settings.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Further increase log output verbosity.
    pub debug: bool,
    /// Increase log output verbosity.
    pub verbose: bool,
    /// Decrease log output to a minimum.
    pub quiet: bool,
    /// Number of threads to use for parallel processing.
    pub threads: i64,
    /// Arguments to the `i2b` command.
    pub i2b: I2bArgs,
}

impl Default for Settings {
    /// Return default settings.
    fn default() -> Self {
        return Self {
            debug: false,
            verbose: false,
            quiet: false,
            threads: 8,
            i2b: I2bArgs::default(),
        };
    }
}

impl Settings {
    /// Construct from `ArgMatches`.
    ///
    /// Will first load `~/.bcl2bamrc.toml` and then consider the command line arguments
    /// that were parsed into `ArgMatches`.  Command line arguments take precedence over values
    /// from configuration file which take precedence over defaults.
    pub fn new(matches: &ArgMatches) -> Result<Self, ConfigError> {
        let mut s = Config::new();

        // Set defaults (currently explicit required, see for a future less-boilerplate option
        // https://github.com/mehcode/config-rs/issues/60)
        let default = Settings::default();

        s.set_default("debug", default.debug)?
            .set_default("verbose", default.verbose)?
            .set_default("quiet", default.quiet)?
            .set_default("threads", default.threads)?
            .set_default("i2b.intensity_dir", default.i2b.intensity_dir)?
            .set_default("i2b.basecalls_dir", default.i2b.basecalls_dir)?
            .set_default("i2b.run_folder", default.i2b.run_folder)?
            .set_default("i2b.lane", default.i2b.lane)?
            .set_default("i2b.output_file", default.i2b.output_file)?
            .set_default("i2b.output_fmt", default.i2b.output_fmt)?
            .set_default("i2b.compression_level", default.i2b.compression_level)?
            .set_default(
                "i2b.generate_secondary_basecalls",
                default.i2b.generate_secondary_basecalls,
            )?
            .set_default("i2b.no_filter", default.i2b.no_filter)?
            .set_default("i2b.read_group_id", default.i2b.read_group_id)?
            .set_default("i2b.library_name", default.i2b.library_name)?
            .set_default("i2b.sample_alias", default.i2b.sample_alias)?
            .set_default("i2b.study_name", default.i2b.study_name)?
            .set_default("i2b.platform_unit", default.i2b.platform_unit)?
            .set_default("i2b.run_start_date", default.i2b.run_start_date)?
            .set_default("i2b.sequencing_centre", default.i2b.sequencing_centre)?
            .set_default("i2b.platform", default.i2b.platform)?
            .set_default("i2b.first_tile", default.i2b.first_tile)?
            .set_default("i2b.tile_limit", default.i2b.tile_limit)?
            .set_default("i2b.barcode_tag", default.i2b.barcode_tag)?
            .set_default("i2b.quality_tag", default.i2b.quality_tag)?
            .set_default("i2b.bc_read", default.i2b.bc_read)?
            .set_default("i2b.first_cycle", default.i2b.first_cycle)?
            .set_default("i2b.final_cycle", default.i2b.final_cycle)?
            .set_default("i2b.first_index_cycle", default.i2b.first_index_cycle)?
            .set_default("i2b.final_index_cycle", default.i2b.final_index_cycle)?
            .set_default("i2b.no_index_separator", default.i2b.no_index_separator)?;

        // Next, load configuration file.
        let expanded = shellexpand::tilde("~/.bcl2bamrc.toml").into_owned().to_string();
        if Path::new(&expanded).exists() {
            s.merge(File::with_name(&expanded))?;
        }

        // Add in settings from the environment (with a prefix of BCL2BAM)
        // Eg. `BCL2BAM_THREADS=4 bcl2bam i2b ...` would set the `threads` key
        s.merge(Environment::with_prefix("BCL2BAM").separator("__"))?;

        // Add settings from command line.
        match matches.subcommand() {
            ("i2b", Some(m)) => {
                if m.is_present("quiet") {
                    s.set("quiet", true)?;
                }
                if m.is_present("verbose") {
                    s.set("verbose", true)?;
                }
                if m.is_present("threads") {
                    s.set("threads", m.value_of("threads").unwrap())?;
                }
                s.set("i2b.intensity_dir", m.value_of("intensity-dir").unwrap())?;
                s.set("i2b.output_file", m.value_of("output-file").unwrap())?;
                s.set("i2b.lane", m.value_of("lane").unwrap())?;
                if m.is_present("basecalls-dir") {
                    s.set("i2b.basecalls_dir", m.value_of("basecalls-dir").unwrap())?;
                }
                if m.is_present("run-folder") {
                    s.set("i2b.run_folder", m.value_of("run-folder").unwrap())?;
                }
                if m.is_present("output-fmt") {
                    s.set("i2b.output_fmt", m.value_of("output-fmt").unwrap())?;
                }
                if m.is_present("compression-level") {
                    s.set(
                        "i2b.compression_level",
                        m.value_of("compression-level").unwrap(),
                    )?;
                }
                if m.is_present("generate-secondary-basecalls") {
                    s.set("i2b.generate_secondary_basecalls", true)?;
                }
                if m.is_present("no-filter") {
                    s.set("i2b.no_filter", true)?;
                }
                if m.is_present("read-group-id") {
                    s.set("i2b.read_group_id", m.value_of("read-group-id").unwrap())?;
                }
                if m.is_present("library-name") {
                    s.set("i2b.library_name", m.value_of("library-name").unwrap())?;
                }
                if m.is_present("sample-alias") {
                    s.set("i2b.sample_alias", m.value_of("sample-alias").unwrap())?;
                }
                if m.is_present("study-name") {
                    s.set("i2b.study_name", m.value_of("study-name").unwrap())?;
                }
                if m.is_present("platform-unit") {
                    s.set("i2b.platform_unit", m.value_of("platform-unit").unwrap())?;
                }
                if m.is_present("run-start-date") {
                    s.set("i2b.run_start_date", m.value_of("run-start-date").unwrap())?;
                }
                if m.is_present("sequencing-centre") {
                    s.set(
                        "i2b.sequencing_centre",
                        m.value_of("sequencing-centre").unwrap(),
                    )?;
                }
                if m.is_present("platform") {
                    s.set("i2b.platform", m.value_of("platform").unwrap())?;
                }
                if m.is_present("first-tile") {
                    s.set("i2b.first_tile", m.value_of("first-tile").unwrap())?;
                }
                if m.is_present("tile-limit") {
                    s.set("i2b.tile_limit", m.value_of("tile-limit").unwrap())?;
                }
                if m.is_present("barcode-tag") {
                    s.set("i2b.barcode_tag", m.value_of("barcode-tag").unwrap())?;
                }
                if m.is_present("quality-tag") {
                    s.set("i2b.quality_tag", m.value_of("quality-tag").unwrap())?;
                }
                if m.is_present("bc-read") {
                    s.set("i2b.bc_read", m.value_of("bc-read").unwrap())?;
                }
                if m.is_present("first-cycle") {
                    s.set("i2b.first_cycle", m.value_of("first-cycle").unwrap())?;
                }
                if m.is_present("final-cycle") {
                    s.set("i2b.final_cycle", m.value_of("final-cycle").unwrap())?;
                }
                if m.is_present("first-index-cycle") {
                    s.set(
                        "i2b.first_index_cycle",
                        m.value_of("first-index-cycle").unwrap(),
                    )?;
                }
                if m.is_present("final-index-cycle") {
                    s.set(
                        "i2b.final_index_cycle",
                        m.value_of("final-index-cycle").unwrap(),
                    )?;
                }
                if m.is_present("no-index-separator") {
                    s.set("i2b.no_index_separator", true)?;
                }
            }
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid command {}",
                    matches.subcommand().0
                )))
            }
        }

        // Deserialize and freeze configuration.
        s.try_into()
    }
}
