mod error;
mod formats;
mod keys;
mod utils;
#[cfg(test)]
mod test_utils;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EpkError;
use crate::formats::{FileHandler, NoopHandler};

#[derive(Parser, Debug)]
#[command(name = "epkextract", version, about = "Extractor for signed and encrypted EPK2/EPK3 firmware files")]
struct Args {
    /// Firmware file to extract
    input_target: PathBuf,

    /// Destination root, output goes to <version>-<otaID> below it
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Directory holding the *.pem public keys and AES.key
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Do not look for nested firmware in extracted partitions
    #[arg(long)]
    no_recurse: bool,

    /// Extra options, e.g. dump_dec_hdrs
    #[arg(short = 'O', long = "option")]
    options: Vec<String>,
}

/// Configuration of a run, handed to every extractor and post-extraction hook.
#[derive(Clone, Debug)]
pub struct ProgramContext {
    pub config_dir: PathBuf,
    pub output_dir: PathBuf,
    pub options: Vec<String>,
}

impl ProgramContext {
    pub fn has_option(&self, name: &str) -> bool {
        self.options.iter().any(|option| option == name)
    }
}

/// Extracts partitions that are themselves EPK firmware next to the partition file.
struct NestedEpkHandler;

impl FileHandler for NestedEpkHandler {
    fn handle_file(&self, path: &Path, app_ctx: &ProgramContext) -> Result<(), EpkError> {
        if formats::sniff_file(path)?.is_none() {
            return Ok(());
        }

        let output_dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let nested_ctx = ProgramContext { output_dir, ..app_ctx.clone() };

        info!("{} contains nested firmware, extracting...", path.display());
        match formats::extract_file(path, &nested_ctx, self) {
            Ok(out_dir) => info!("Nested firmware extracted to {}", out_dir.display()),
            Err(err) => warn!("Nested firmware {} could not be extracted: {}", path.display(), err),
        }
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(args: Args) -> Result<(), EpkError> {
    let app_ctx = ProgramContext {
        config_dir: args.config_dir,
        output_dir: args.output_dir,
        options: args.options,
    };
    info!("Input target: {}", args.input_target.display());
    info!("Output folder: {}", app_ctx.output_dir.display());

    let Some(format) = formats::sniff_file(&args.input_target)? else {
        println!("Input format not recognized!");
        return Ok(());
    };
    info!("{} file detected!", format.name.to_uppercase());

    let handler: &dyn FileHandler = if args.no_recurse { &NoopHandler } else { &NestedEpkHandler };
    let out_dir = (format.run_func)(&args.input_target, &app_ctx, handler)?;
    info!("Firmware extracted to {}", out_dir.display());
    Ok(())
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
