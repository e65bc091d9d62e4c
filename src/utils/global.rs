use std::{fs::{self, OpenOptions}, io::Write, path::Path};

use tracing::info;

use crate::ProgramContext;
use crate::error::EpkError;

pub const DUMP_DEC_HDRS: &str = "dump_dec_hdrs";

pub fn opt_dump_dec_hdr(app_ctx: &ProgramContext, out_dir: &Path, data: &[u8], name: &str) -> Result<(), EpkError> {
    if !app_ctx.has_option(DUMP_DEC_HDRS) {
        return Ok(())
    }

    let filename = format!("_{}.bin", name);
    let output_path = out_dir.join(&filename);
    fs::create_dir_all(out_dir)?;

    let mut out_file = OpenOptions::new().write(true).create(true).truncate(true).open(output_path)?;
    out_file.write_all(data)?;

    info!("[i] Saved {} to {}", name, filename);

    Ok(())
}
