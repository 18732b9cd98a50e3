//! `stampede report` - standalone request profile from log files

use crate::error::CliResult;
use crate::request_log::tally_lines;
use stampede_core::RequestTally;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

pub fn execute(files: &[PathBuf]) -> CliResult<()> {
    let mut tally = RequestTally::new();

    for path in files {
        tracing::info!(file = %path.display(), "Reading request log");
        let file = File::open(path)?;
        tally_lines(&mut tally, BufReader::new(file))?;
    }

    print!("{}", tally.profile());
    Ok(())
}
