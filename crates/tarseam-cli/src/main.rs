use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use tarseam::util::TeeReader;
use tarseam::{disassemble, DiscardSink, JsonPacker, JsonUnpacker, OutputStream, PathSource};

/// tarseam
#[derive(Debug, Parser)]
#[clap(name = "tarseam", version, about = "split tar archives into metadata and payloads, and put them back together")]
struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Disassemble a tar archive into a gzip'd metadata stream
    Disasm {
        /// where to write the metadata stream
        #[clap(long)]
        output: PathBuf,
        /// do not forward the archive bytes to stdout
        #[clap(long)]
        no_stdout: bool,
        /// the tar archive to read, or '-' for stdin
        input: String,
    },
    /// Reassemble a tar archive from metadata and a payload directory
    Asm {
        /// the metadata stream written by disasm
        #[clap(long)]
        input: PathBuf,
        /// where to write the archive, or '-' for stdout
        #[clap(long)]
        output: String,
        /// root directory holding the file payloads
        #[clap(long)]
        path: PathBuf,
        /// gzip the reassembled archive
        #[clap(long)]
        compress: bool,
    },
    /// Report the metadata overhead for one or more archives
    Checksize {
        /// preserve the temporary metadata files
        #[clap(long)]
        work: bool,
        /// tar archives to inspect
        #[clap(required = true)]
        archives: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match App::parse().cmd {
        Command::Disasm {
            output,
            no_stdout,
            input,
        } => disasm(&output, no_stdout, &input),
        Command::Asm {
            input,
            output,
            path,
            compress,
        } => asm(&input, &output, &path, compress),
        Command::Checksize { work, archives } => {
            for archive in &archives {
                checksize(archive, work)?;
            }
            Ok(())
        }
    }
}

fn open_input(spec: &str) -> Result<Box<dyn Read>> {
    if spec == "-" {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file =
            File::open(spec).with_context(|| format!("opening archive {spec:?}"))?;
        Ok(Box::new(file))
    }
}

fn disasm(output: &Path, no_stdout: bool, input: &str) -> Result<()> {
    let archive = open_input(input)?;

    let meta = File::create(output)
        .with_context(|| format!("creating metadata file {output:?}"))?;
    let mut packer = JsonPacker::new(GzEncoder::new(meta, Compression::default()));
    let mut sink = DiscardSink::new();

    // Forward the archive bytes to stdout while splitting, so disasm can sit
    // in the middle of a pipeline.
    let stats = if no_stdout {
        disassemble(archive, &mut packer, &mut sink)?
    } else {
        let stdout = io::stdout().lock();
        disassemble(TeeReader::new(archive, stdout), &mut packer, &mut sink)?
    };

    packer.into_inner().finish()?.sync_all()?;
    log::info!(
        "created {} from {} (read {} bytes, {} files)",
        output.display(),
        input,
        stats.bytes_read,
        stats.files
    );
    Ok(())
}

fn asm(input: &Path, output: &str, path: &Path, compress: bool) -> Result<()> {
    let meta = File::open(input)
        .with_context(|| format!("opening metadata file {input:?}"))?;
    let unpacker = JsonUnpacker::new(GzDecoder::new(meta));
    let source = PathSource::new(path);

    let mut out: Box<dyn Write> = if output == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(File::create(output).with_context(|| format!("creating {output:?}"))?)
    };
    if compress {
        out = Box::new(GzEncoder::new(out, Compression::default()));
    }

    let mut archive = OutputStream::new(source, unpacker);
    let written = io::copy(&mut archive, &mut out)?;
    out.flush()?;

    log::info!(
        "created {} from {} and {} (wrote {} bytes)",
        output,
        path.display(),
        input.display(),
        written
    );
    Ok(())
}

fn checksize(archive: &Path, keep_work: bool) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("opening {archive:?}"))?;
    let archive_size = file.metadata()?.len();
    println!("inspecting {:?} (size {}k)", archive.display(), archive_size / 1024);

    let mut packed = tempfile::NamedTempFile::new().context("creating work file")?;
    let stats = {
        let mut packer = JsonPacker::new(packed.as_file_mut());
        let mut sink = DiscardSink::new();
        disassemble(file, &mut packer, &mut sink)?
    };
    println!(" -- number of files: {}", stats.files);

    let packed_size = packed.as_file().metadata()?.len();
    println!(" -- size of metadata uncompressed: {}k", packed_size / 1024);

    let mut gz_packed = tempfile::NamedTempFile::new().context("creating work file")?;
    packed.as_file_mut().seek(SeekFrom::Start(0))?;
    let mut encoder = GzEncoder::new(gz_packed.as_file_mut(), Compression::default());
    io::copy(packed.as_file_mut(), &mut encoder)?;
    encoder.finish()?;

    let gz_size = gz_packed.as_file().metadata()?.len();
    println!(" -- size of gzip compressed metadata: {}k", gz_size / 1024);

    if keep_work {
        let (_, packed_path) = packed.keep().context("preserving work file")?;
        let (_, gz_path) = gz_packed.keep().context("preserving work file")?;
        println!(" -- working files preserved: {} {}", packed_path.display(), gz_path.display());
    }

    if archive_size > 0 && stats.bytes_read != archive_size {
        bail!(
            "byte accounting mismatch: read {} of {} bytes",
            stats.bytes_read,
            archive_size
        );
    }
    Ok(())
}
