//! Output file handling, a thin layer over the SAM-family library.

use rust_htslib::bam;
use rust_htslib::bam::Format;

use errors::*;
use i2b::options::{I2bOptions, OutputFormat};

/// Open the output file in the requested format and apply the compression
/// level.  The writer is owned by the writer thread alone.
pub fn open_writer(opts: &I2bOptions, header: &bam::Header) -> Result<bam::Writer> {
    let format = match opts.output_format {
        OutputFormat::Sam => Format::Sam,
        OutputFormat::Bam => Format::Bam,
        OutputFormat::Cram => Format::Cram,
    };

    let mut writer = if opts.output_file == "-" {
        bam::Writer::from_stdout(header, format)
    } else {
        bam::Writer::from_path(&opts.output_file, header, format)
    }
    .map_err(|e| {
        Error::from(ErrorKind::WriteFailure(format!(
            "cannot open {}: {}",
            opts.output_file, e
        )))
    })?;

    if let Some(level) = opts.compression_level {
        writer
            .set_compression_level(bam::CompressionLevel::Level(level))
            .map_err(|e| Error::from(ErrorKind::WriteFailure(format!("{}", e))))?;
    }

    Ok(writer)
}
