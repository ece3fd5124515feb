//! Optional bounded sink recording locally published messages.

use log::{debug, error, info, warn};

use std::io::Write;
use std::{fs, path};

use crate::broker::message::{CommandMessage, DataMessage};
use crate::broker::Config;

/// Best-effort writer for published messages, opened at endpoint construction
/// when the configured recording directory exists.
///
/// A budget counter bounds the number of records. Once it reaches zero the
/// file is closed and further publishes proceed without recording.
pub struct Recorder {
    prefix: String,
    file: Option<fs::File>,
    remaining: u64,
}

impl Recorder {
    /// Returns None when recording is not configured, the directory does not
    /// exist, or the file cannot be opened. Failure to open is logged and
    /// ignored.
    pub fn from_config(prefix: &str, config: &Config) -> Option<Recorder> {
        let dir = &config.recording_directory;
        if dir.is_empty() {
            return None;
        }
        let dir = path::Path::new(dir);
        if !dir.is_dir() {
            debug!("{} recording directory {:?} does not exist", prefix, dir);
            return None;
        }

        let loc = dir.join("messages.dat");
        match fs::File::create(&loc) {
            Ok(file) => {
                debug!("{} opened file for recording {:?}", prefix, loc);
                let val = Recorder {
                    prefix: prefix.to_string(),
                    file: Some(file),
                    remaining: config.output_generator_file_cap,
                };
                Some(val)
            }
            Err(err) => {
                warn!("{} cannot open recording file {:?}: {}", prefix, loc, err);
                None
            }
        }
    }

    pub fn record_data(&mut self, msg: &DataMessage) {
        self.record_line(format_args!("data\t{}\t{}", msg.topic, msg.data))
    }

    pub fn record_command(&mut self, msg: &CommandMessage) {
        self.record_line(format_args!("command\t{}\t{:?}", msg.topic, msg.cmd))
    }

    fn record_line(&mut self, line: std::fmt::Arguments) {
        if self.remaining == 0 {
            self.file = None;
            return;
        }
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return,
        };
        if let Err(err) = writeln!(file, "{}", line) {
            error!("{} recording failed: {}, disabling", self.prefix, err);
            self.file = None;
            return;
        }
        self.remaining -= 1;
        if self.remaining == 0 {
            info!("{} record budget exhausted, closing recorder", self.prefix);
            self.file = None;
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
