//! Validated runtime configuration for the converter.
//!
//! `Settings` is whatever arrived from the configuration file, environment
//! and command line; everything is checked and typed here once, before any
//! worker starts.

use std::path::PathBuf;

use errors::*;
use settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Sam,
    Bam,
    Cram,
}

/// Fully validated options for one conversion run, shared read-only by all
/// tile jobs.
#[derive(Debug, Clone)]
pub struct I2bOptions {
    pub intensity_dir: PathBuf,
    pub basecalls_dir: PathBuf,
    pub run_folder: PathBuf,
    pub lane: u32,
    pub output_file: String,
    pub output_format: OutputFormat,
    pub compression_level: Option<u32>,
    pub generate_secondary_basecalls: bool,
    pub no_filter: bool,
    pub read_group_id: String,
    pub library_name: String,
    pub sample_alias: String,
    pub study_name: Option<String>,
    pub platform_unit: Option<String>,
    pub run_start_date: Option<String>,
    pub sequencing_centre: String,
    pub platform: String,
    pub first_tile: u32,
    pub tile_limit: u32,
    pub barcode_tags: Vec<String>,
    pub quality_tags: Vec<String>,
    pub bc_reads: Vec<u32>,
    pub first_cycles: Vec<u32>,
    pub final_cycles: Vec<u32>,
    pub first_index_cycles: Vec<u32>,
    pub final_index_cycles: Vec<u32>,
    pub index_separator: bool,
    pub threads: usize,
}

impl I2bOptions {
    pub fn from_settings(settings: &Settings) -> Result<I2bOptions> {
        let args = &settings.i2b;

        if args.intensity_dir.is_empty() {
            bail!(ErrorKind::MissingRequired("intensity-dir".to_string()));
        }
        if args.output_file.is_empty() {
            bail!(ErrorKind::MissingRequired("output-file".to_string()));
        }
        if args.lane < 1 || args.lane > 999 {
            bail!(ErrorKind::BadOption(format!(
                "lane must be between 1 and 999, got {}",
                args.lane
            )));
        }

        let intensity_dir = PathBuf::from(&args.intensity_dir);
        let basecalls_dir = if args.basecalls_dir.is_empty() {
            intensity_dir.join("BaseCalls")
        } else {
            PathBuf::from(&args.basecalls_dir)
        };
        let run_folder = if args.run_folder.is_empty() {
            intensity_dir
                .parent()
                .and_then(|p| p.parent())
                .map(|p| p.to_path_buf())
                .ok_or_else(|| {
                    ErrorKind::BadOption(format!(
                        "cannot derive the run folder from {}",
                        intensity_dir.display()
                    ))
                })?
        } else {
            PathBuf::from(&args.run_folder)
        };

        let output_format = parse_output_format(&args.output_fmt, &args.output_file)?;

        let compression_level = match args.compression_level {
            -1 => None,
            level if level >= 0 && level <= 9 => Some(level as u32),
            level => bail!(ErrorKind::BadOption(format!(
                "compression level must be between 0 and 9, got {}",
                level
            ))),
        };

        let barcode_tags = parse_tag_list(&args.barcode_tag, "barcode-tag")?;
        let quality_tags = parse_tag_list(&args.quality_tag, "quality-tag")?;

        let bc_reads = parse_u32_list(&args.bc_read, "bc-read")?;
        if bc_reads.iter().any(|&r| r != 1 && r != 2) || bc_reads.len() > 2 {
            bail!(ErrorKind::BadOption(
                "bc-read takes at most two values, each 1 or 2".to_string()
            ));
        }

        if args.first_tile < 0 || args.tile_limit < 0 {
            bail!(ErrorKind::BadOption(
                "first-tile and tile-limit must not be negative".to_string()
            ));
        }

        let sample_alias = if args.sample_alias.is_empty() {
            args.library_name.clone()
        } else {
            args.sample_alias.clone()
        };

        Ok(I2bOptions {
            intensity_dir: intensity_dir,
            basecalls_dir: basecalls_dir,
            run_folder: run_folder,
            lane: args.lane as u32,
            output_file: args.output_file.clone(),
            output_format: output_format,
            compression_level: compression_level,
            generate_secondary_basecalls: args.generate_secondary_basecalls,
            no_filter: args.no_filter,
            read_group_id: args.read_group_id.clone(),
            library_name: args.library_name.clone(),
            sample_alias: sample_alias,
            study_name: optional(&args.study_name),
            platform_unit: optional(&args.platform_unit),
            run_start_date: optional(&args.run_start_date),
            sequencing_centre: args.sequencing_centre.clone(),
            platform: args.platform.clone(),
            first_tile: args.first_tile as u32,
            tile_limit: args.tile_limit as u32,
            barcode_tags: barcode_tags,
            quality_tags: quality_tags,
            bc_reads: bc_reads,
            first_cycles: parse_u32_list(&args.first_cycle, "first-cycle")?,
            final_cycles: parse_u32_list(&args.final_cycle, "final-cycle")?,
            first_index_cycles: parse_u32_list(&args.first_index_cycle, "first-index-cycle")?,
            final_index_cycles: parse_u32_list(&args.final_index_cycle, "final-index-cycle")?,
            index_separator: !args.no_index_separator,
            threads: ::std::cmp::max(settings.threads, 3) as usize,
        })
    }

    /// Default platform unit: run folder base name plus lane.
    pub fn platform_unit_default(&self) -> String {
        let basename = self
            .run_folder
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");
        format!("{}_{}", basename, self.lane)
    }
}

fn optional(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn parse_output_format(raw: &str, output_file: &str) -> Result<OutputFormat> {
    match raw {
        "sam" => Ok(OutputFormat::Sam),
        "bam" => Ok(OutputFormat::Bam),
        "cram" => Ok(OutputFormat::Cram),
        "" => {
            if output_file == "-" || output_file.ends_with(".sam") {
                Ok(OutputFormat::Sam)
            } else if output_file.ends_with(".cram") {
                Ok(OutputFormat::Cram)
            } else {
                Ok(OutputFormat::Bam)
            }
        }
        other => bail!(ErrorKind::BadOption(format!(
            "unknown output format '{}'",
            other
        ))),
    }
}

/// Split a comma-separated list of aux tag names; SAM tags are two
/// characters.
fn parse_tag_list(raw: &str, name: &str) -> Result<Vec<String>> {
    let mut tags = Vec::new();
    for tag in raw.split(',') {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if tag.len() != 2 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
            bail!(ErrorKind::BadOption(format!(
                "{}: '{}' is not a two-character tag name",
                name, tag
            )));
        }
        tags.push(tag.to_string());
    }
    Ok(tags)
}

fn parse_u32_list(raw: &str, name: &str) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for field in raw.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        match field.parse::<u32>() {
            Ok(value) => values.push(value),
            Err(_) => bail!(ErrorKind::BadOption(format!(
                "{}: '{}' is not a number",
                name, field
            ))),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use settings::Settings;

    fn base_settings() -> Settings {
        let mut settings = Settings::default();
        settings.i2b.intensity_dir = "/seq/run/Data/Intensities".to_string();
        settings.i2b.output_file = "out.bam".to_string();
        settings.i2b.lane = 1;
        settings
    }

    #[test]
    fn directories_are_derived() {
        let opts = I2bOptions::from_settings(&base_settings()).unwrap();
        assert_eq!(
            opts.basecalls_dir,
            PathBuf::from("/seq/run/Data/Intensities/BaseCalls")
        );
        assert_eq!(opts.run_folder, PathBuf::from("/seq/run"));
        assert_eq!(opts.platform_unit_default(), "run_1");
    }

    #[test]
    fn lane_bounds_are_enforced() {
        let mut settings = base_settings();
        settings.i2b.lane = 1000;
        let err = I2bOptions::from_settings(&settings).unwrap_err();
        match err.kind() {
            &ErrorKind::BadOption(_) => {}
            other => panic!("unexpected error kind: {:?}", other),
        }

        settings.i2b.lane = 0;
        assert!(I2bOptions::from_settings(&settings).is_err());
    }

    #[test]
    fn output_format_from_file_name() {
        let mut settings = base_settings();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.output_format, OutputFormat::Bam);

        settings.i2b.output_file = "-".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.output_format, OutputFormat::Sam);

        settings.i2b.output_file = "out.cram".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.output_format, OutputFormat::Cram);

        settings.i2b.output_fmt = "sam".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.output_format, OutputFormat::Sam);
    }

    #[test]
    fn tag_lists_are_split_and_checked() {
        let mut settings = base_settings();
        settings.i2b.barcode_tag = "BC,BR".to_string();
        settings.i2b.quality_tag = "QT,QR".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.barcode_tags, vec!["BC", "BR"]);
        assert_eq!(opts.quality_tags, vec!["QT", "QR"]);

        settings.i2b.barcode_tag = "BARCODE".to_string();
        assert!(I2bOptions::from_settings(&settings).is_err());
    }

    #[test]
    fn bc_read_values_are_checked() {
        let mut settings = base_settings();
        settings.i2b.bc_read = "1,2".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.bc_reads, vec![1, 2]);

        settings.i2b.bc_read = "3".to_string();
        assert!(I2bOptions::from_settings(&settings).is_err());
    }

    #[test]
    fn compression_level_bounds() {
        let mut settings = base_settings();
        settings.i2b.compression_level = 9;
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.compression_level, Some(9));

        settings.i2b.compression_level = 17;
        assert!(I2bOptions::from_settings(&settings).is_err());
    }

    #[test]
    fn thread_count_has_a_floor() {
        let mut settings = base_settings();
        settings.threads = 1;
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.threads, 3);

        settings.threads = 12;
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.threads, 12);
    }

    #[test]
    fn sample_alias_falls_back_to_library() {
        let mut settings = base_settings();
        settings.i2b.library_name = "lib1".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.sample_alias, "lib1");

        settings.i2b.sample_alias = "sample7".to_string();
        let opts = I2bOptions::from_settings(&settings).unwrap();
        assert_eq!(opts.sample_alias, "sample7");
    }
}
