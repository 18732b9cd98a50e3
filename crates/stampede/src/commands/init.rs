//! `stampede init` - print a full sample configuration

use crate::config::SAMPLE_CONFIG;

pub fn execute() {
    print!("{SAMPLE_CONFIG}");
}
